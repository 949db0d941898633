//! Viewer core: wires the session, orchestrator, and controller of the
//! proxy-routed web viewer together and pumps their events.

use pv_core::ViewerResult;
use pv_ipc::ChannelConfig;
use pv_ipc::EndpointRole;
use pv_ipc::IpcMessage;
use pv_ipc::LocalIpcEndpoint;
use pv_ipc::PayloadKind;
use pv_ipc::SurfacePayload;
use pv_net::ContentClassifier;
use pv_net::ProxyUrlBuilder;
use pv_net::ResourceTransport;
use pv_net::UrlNormalizer;
use pv_settings::SettingsStore;
use pv_settings::ViewerSettings;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::mpsc;
use std::time::Instant;

mod fetch;
mod indicator;
mod nav;
mod session;

use fetch::FetchCompletion;
use fetch::InflightFetch;

pub use indicator::IndicatorColor;
pub use indicator::LoadingIndicator;
pub use nav::NavigationKey;
pub use session::SessionState;

/// Rewrites fetched markup so every embedded reference routes through
/// the proxy. Pure; implemented outside this crate.
pub trait MarkupRewriter {
    fn rewrite(&self, markup: &str, proxy_endpoint: &str) -> String;
}

/// Identity rewriter for hosts that rewrite on the surface side.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughRewriter;

impl MarkupRewriter for PassthroughRewriter {
    fn rewrite(&self, markup: &str, _proxy_endpoint: &str) -> String {
        markup.to_owned()
    }
}

/// Blocking user notifications owned by the host shell.
pub trait UserNotifier {
    fn alert(&self, message: &str);
    fn confirm(&self, message: &str) -> bool;
}

/// Best-effort, fire-and-forget deletion of transient navigation
/// records from host-maintained history.
pub trait HistoryScrubber {
    fn delete_record(&self, composite_key: &str);
}

/// External collaborators supplied by the host at construction.
pub struct ViewerHooks {
    pub transport: Arc<dyn ResourceTransport>,
    pub rewriter: Box<dyn MarkupRewriter>,
    pub notifier: Box<dyn UserNotifier>,
    pub scrubber: Box<dyn HistoryScrubber>,
    /// The rendering surface's own location; first half of the
    /// composite key handed to the scrubber.
    pub surface_location: String,
}

pub(crate) enum DeferredTask {
    DeleteRecord(String),
}

/// The viewer core. Single logical thread of control: all mutation
/// happens on the thread that calls [`Viewer::pump`]; worker threads
/// communicate only through channels.
pub struct Viewer {
    settings: ViewerSettings,
    normalizer: UrlNormalizer,
    proxy: ProxyUrlBuilder,
    classifier: ContentClassifier,
    session: SessionState,
    indicator: LoadingIndicator,
    transport: Arc<dyn ResourceTransport>,
    rewriter: Box<dyn MarkupRewriter>,
    notifier: Box<dyn UserNotifier>,
    scrubber: Box<dyn HistoryScrubber>,
    surface: LocalIpcEndpoint,
    surface_location: String,
    completion_tx: mpsc::Sender<FetchCompletion>,
    completion_rx: mpsc::Receiver<FetchCompletion>,
    next_request_id: u64,
    inflight: Option<InflightFetch>,
    deferred: VecDeque<DeferredTask>,
}

impl Viewer {
    /// Loads settings once from the store and wires the viewer.
    /// Returns the viewer plus the surface-side endpoint the host
    /// hands to its rendering surface.
    pub fn new(
        store: &dyn SettingsStore,
        hooks: ViewerHooks,
    ) -> ViewerResult<(Self, LocalIpcEndpoint)> {
        let settings = store.load()?;
        let normalizer = UrlNormalizer::new(&settings.secure_domains);
        let proxy = ProxyUrlBuilder::new(settings.proxy_endpoint.clone());
        let classifier = ContentClassifier::new()?;

        let (controller_end, surface_end) = pv_ipc::local_channel_pair(
            ChannelConfig::hardened(EndpointRole::Controller)?,
            ChannelConfig::hardened(EndpointRole::Surface)?,
        )?;

        let (completion_tx, completion_rx) = mpsc::channel();

        let viewer = Self {
            settings,
            normalizer,
            proxy,
            classifier,
            session: SessionState::new(),
            indicator: LoadingIndicator::new(),
            transport: hooks.transport,
            rewriter: hooks.rewriter,
            notifier: hooks.notifier,
            scrubber: hooks.scrubber,
            surface: controller_end,
            surface_location: hooks.surface_location,
            completion_tx,
            completion_rx,
            next_request_id: 1,
            inflight: None,
            deferred: VecDeque::new(),
        };

        Ok((viewer, surface_end))
    }

    pub fn settings(&self) -> &ViewerSettings {
        &self.settings
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn is_loading(&self) -> bool {
        self.session.is_loading
    }

    pub fn indicator_color(&self) -> IndicatorColor {
        self.indicator.color()
    }

    /// Drives one turn of the event loop: runs deferred tasks scheduled
    /// on the previous turn, dispatches inbound surface messages,
    /// applies fetch completions, and advances the loading indicator.
    /// Returns the indicator color after the turn.
    pub fn pump(&mut self, now: Instant) -> IndicatorColor {
        let mut tasks = std::mem::take(&mut self.deferred);
        for task in tasks.drain(..) {
            match task {
                DeferredTask::DeleteRecord(key) => self.scrubber.delete_record(&key),
            }
        }

        loop {
            match self.surface.try_recv() {
                Ok(Some(IpcMessage::Control(message))) => self.on_control_message(message, now),
                // Payloads only flow controller -> surface; ignore echoes.
                Ok(Some(IpcMessage::Payload(_))) => {}
                Ok(None) | Err(_) => break,
            }
        }

        while let Ok(completion) = self.completion_rx.try_recv() {
            self.handle_completion(completion);
        }

        self.indicator.tick(now, self.session.is_loading)
    }

    /// Sends a typed payload to the rendering surface. Best-effort:
    /// the surface side going away must not wedge navigation.
    pub(crate) fn emit(&self, data_type: PayloadKind, data_val: &str) {
        let _ = self.surface.send(&IpcMessage::Payload(SurfacePayload {
            proxy_url: self.settings.proxy_endpoint.clone(),
            data_type,
            data_val: data_val.to_owned(),
        }));
    }

    /// Resets the render surface to a blank state.
    pub(crate) fn clear_surface(&self) {
        self.emit(PayloadKind::Empty, "");
    }

    /// Defers deletion of the transient navigation record for `target`
    /// to the next pump turn, so it cannot race the navigation itself.
    pub(crate) fn schedule_record_deletion(&mut self, target: &str) {
        let key = format!("{}#{}", self.surface_location, target);
        self.deferred.push_back(DeferredTask::DeleteRecord(key));
    }

    pub(crate) fn next_request_id(&mut self) -> u64 {
        let id = self.next_request_id;
        self.next_request_id = self.next_request_id.saturating_add(1);
        id
    }
}
