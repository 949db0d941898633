//! Explicit session state shared by the orchestrator and controller.

/// Per-viewer navigation state. One instance per viewer; there is no
/// ambient global.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    /// True while a fetch is outstanding. Cleared on every completion
    /// path: success, HTTP error, network error, and client-side
    /// cancellation.
    pub is_loading: bool,
    /// The address bar's current value; base for resolving relative
    /// sub-resource references. Updated only when a top-level
    /// navigation is accepted.
    pub current_base_url: String,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }
}
