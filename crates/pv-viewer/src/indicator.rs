//! Border loading indicator: `Idle → Animating → Idle`.

use std::time::Duration;
use std::time::Instant;

const CHECK_INTERVAL: Duration = Duration::from_millis(800);
const ALERT_FLASH: Duration = Duration::from_millis(400);

/// Border colors shown by the rendering surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndicatorColor {
    /// Nothing loading.
    Idle,
    /// A load is in progress.
    Active,
    /// Brief flash during the periodic still-loading check.
    Alert,
}

impl IndicatorColor {
    pub fn as_css(self) -> &'static str {
        match self {
            Self::Idle => "silver",
            Self::Active => "green",
            Self::Alert => "red",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IndicatorState {
    Idle,
    Animating {
        next_check: Instant,
        flash_until: Option<Instant>,
    },
}

/// Tick-driven indicator state machine.
///
/// While animating, every 800 ms: still loading flashes the alert
/// color for 400 ms and then reverts to active; no longer loading
/// stops the animation and reverts to idle. Driven from the event
/// pump, so no timer outlives its triggering condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadingIndicator {
    state: IndicatorState,
    color: IndicatorColor,
}

impl Default for LoadingIndicator {
    fn default() -> Self {
        Self {
            state: IndicatorState::Idle,
            color: IndicatorColor::Idle,
        }
    }
}

impl LoadingIndicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn color(&self) -> IndicatorColor {
        self.color
    }

    pub fn is_animating(&self) -> bool {
        matches!(self.state, IndicatorState::Animating { .. })
    }

    /// Enters the animating state and shows the active color.
    pub fn start(&mut self, now: Instant) {
        self.color = IndicatorColor::Active;
        self.state = IndicatorState::Animating {
            next_check: now + CHECK_INTERVAL,
            flash_until: None,
        };
    }

    /// Advances the state machine and returns the current color.
    pub fn tick(&mut self, now: Instant, is_loading: bool) -> IndicatorColor {
        let IndicatorState::Animating {
            mut next_check,
            mut flash_until,
        } = self.state
        else {
            return self.color;
        };

        if let Some(until) = flash_until
            && now >= until
        {
            flash_until = None;
            if is_loading {
                self.color = IndicatorColor::Active;
            }
        }

        if now >= next_check {
            if is_loading {
                self.color = IndicatorColor::Alert;
                flash_until = Some(now + ALERT_FLASH);
                next_check = now + CHECK_INTERVAL;
            } else {
                self.state = IndicatorState::Idle;
                self.color = IndicatorColor::Idle;
                return self.color;
            }
        }

        self.state = IndicatorState::Animating {
            next_check,
            flash_until,
        };
        self.color
    }
}
