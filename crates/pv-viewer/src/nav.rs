//! Navigation control: user-initiated navigations and inbound
//! cross-boundary messages.

use crate::Viewer;
use pv_ipc::ControlMessage;
use pv_ipc::PayloadKind;
use pv_ipc::SpinnerSwitch;
use std::time::Instant;

/// Keystroke originating a navigation request, as mapped by the host.
/// Only the confirm key (Enter) commits a navigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationKey {
    Confirm,
    Other,
}

impl Viewer {
    /// Entry point for user navigation: the address-bar submit and
    /// omnibox-style runtime events. Ignored unless the originating
    /// keystroke is absent or the confirm key.
    pub fn on_user_navigate(
        &mut self,
        target: &str,
        originating_key: Option<NavigationKey>,
        now: Instant,
    ) {
        if target.is_empty() || matches!(originating_key, Some(NavigationKey::Other)) {
            return;
        }

        if target.starts_with('#') {
            self.navigate_to_fragment(target);
            return;
        }

        let normalized = match self.normalizer.normalize(target) {
            Ok(normalized) => normalized,
            Err(_error) => {
                self.notify_invalid_url(target);
                return;
            }
        };

        self.cancel_outstanding();
        self.clear_surface();
        self.schedule_record_deletion(&normalized);
        self.session.current_base_url = normalized.clone();
        self.load(&normalized, None, true, now);
    }

    /// Entry point for messages from the rendering surface.
    pub fn on_control_message(&mut self, message: ControlMessage, now: Instant) {
        match message {
            ControlMessage::Spinner(SpinnerSwitch::On) => {
                self.session.is_loading = true;
                self.indicator.start(now);
            }
            ControlMessage::Spinner(SpinnerSwitch::Off) => {
                self.session.is_loading = false;
            }
            ControlMessage::Navigate {
                link_url,
                explicit_type,
            } => {
                // Fall back to the raw value so malformed-but-intentional
                // links still propagate.
                let link = match self.normalizer.normalize(&link_url) {
                    Ok(normalized) => normalized,
                    Err(_error) => {
                        self.notify_invalid_url(&link_url);
                        link_url.clone()
                    }
                };

                if !link.is_empty() {
                    self.session.current_base_url = link.clone();
                    self.clear_surface();
                    self.cancel_outstanding();
                    self.load(&link, explicit_type.as_deref(), true, now);
                }

                // Scrubbed regardless of emptiness; the raw URL is still
                // part of the record key.
                self.schedule_record_deletion(&link);
            }
        }
    }

    /// In-page navigation to a fragment: stops the current load and
    /// hands the fragment straight to the surface.
    pub(crate) fn navigate_to_fragment(&mut self, fragment: &str) {
        self.cancel_outstanding();
        self.emit(PayloadKind::Href, fragment);
        self.schedule_record_deletion(fragment);
    }

    fn notify_invalid_url(&self, input: &str) {
        self.notifier
            .alert(&format!("Error: \"{input}\" is not a valid URL."));
    }
}

#[cfg(test)]
mod tests {
    use super::NavigationKey;
    use crate::testing::TEST_PROXY;
    use crate::testing::TEST_SURFACE;
    use crate::testing::harness;
    use pv_ipc::ControlMessage;
    use pv_ipc::PayloadKind;
    use pv_ipc::SpinnerSwitch;
    use std::time::Instant;

    #[test]
    fn non_confirm_keystrokes_are_ignored() {
        let mut built = harness(true);
        built.viewer.on_user_navigate(
            "http://example.com/",
            Some(NavigationKey::Other),
            Instant::now(),
        );

        assert!(!built.viewer.is_loading());
        assert_eq!(built.viewer.session().current_base_url, "");
        assert!(built.drain_payloads().is_empty());
    }

    #[test]
    fn invalid_addresses_notify_and_change_nothing() {
        let mut built = harness(true);
        built
            .viewer
            .on_user_navigate("http://", None, Instant::now());

        assert_eq!(
            built.notifier.alert_messages(),
            vec!["Error: \"http://\" is not a valid URL.".to_owned()]
        );
        assert!(!built.viewer.is_loading());
        assert_eq!(built.viewer.session().current_base_url, "");
        assert!(built.drain_payloads().is_empty());
        assert_eq!(built.transport.request_count(), 0);
    }

    #[test]
    fn default_allowlist_upgrades_github_to_https() {
        let mut built = harness(true);
        built
            .viewer
            .on_user_navigate("http://github.com/foo", None, Instant::now());

        assert_eq!(
            built.viewer.session().current_base_url,
            "https://github.com/foo"
        );

        built.pump_until_idle();
        assert!(
            built
                .scrubber
                .deleted_keys()
                .contains(&format!("{TEST_SURFACE}#https://github.com/foo"))
        );
    }

    #[test]
    fn non_http_schemes_are_left_unmodified() {
        let mut built = harness(true);
        built
            .viewer
            .on_user_navigate("ftp://x.com", None, Instant::now());

        assert_eq!(built.viewer.session().current_base_url, "ftp://x.com/");
        built.pump_until_idle();
    }

    #[test]
    fn accepted_navigations_clear_the_surface_before_loading() {
        let mut built = harness(true);
        built
            .viewer
            .on_user_navigate("http://example.com/", None, Instant::now());
        assert!(built.viewer.is_loading());

        let first = built.next_payload();
        assert_eq!(first, Some((PayloadKind::Empty, String::new())));

        built.pump_until_idle();
    }

    #[test]
    fn fragment_targets_skip_normalization_and_emit_href() {
        let mut built = harness(true);
        built
            .viewer
            .on_user_navigate("#anchor", None, Instant::now());

        let payload = built.next_payload();
        assert_eq!(payload, Some((PayloadKind::Href, "#anchor".to_owned())));
        assert!(!built.viewer.is_loading());
        assert_eq!(built.transport.request_count(), 0);

        built.viewer.pump(Instant::now());
        assert_eq!(
            built.scrubber.deleted_keys(),
            vec![format!("{TEST_SURFACE}##anchor")]
        );
    }

    #[test]
    fn spinner_messages_toggle_loading_without_touching_navigation() {
        let mut built = harness(true);
        let now = Instant::now();

        built
            .viewer
            .on_control_message(ControlMessage::Spinner(SpinnerSwitch::On), now);
        assert!(built.viewer.is_loading());
        assert_eq!(built.viewer.session().current_base_url, "");
        assert!(built.drain_payloads().is_empty());

        built
            .viewer
            .on_control_message(ControlMessage::Spinner(SpinnerSwitch::Off), now);
        assert!(!built.viewer.is_loading());
    }

    #[test]
    fn inbound_navigation_updates_state_and_loads_with_explicit_type() {
        let mut built = harness(true);
        built.viewer.on_control_message(
            ControlMessage::Navigate {
                link_url: "http://a.com/site.css".to_owned(),
                explicit_type: Some("text/css".to_owned()),
            },
            Instant::now(),
        );

        assert_eq!(
            built.viewer.session().current_base_url,
            "http://a.com/site.css"
        );
        let first = built.next_payload();
        assert_eq!(first, Some((PayloadKind::Empty, String::new())));

        built.pump_until_idle();
        let payloads = built.drain_payloads();
        assert!(
            payloads
                .iter()
                .any(|(kind, _)| *kind == PayloadKind::Styles)
        );
        assert!(
            built
                .scrubber
                .deleted_keys()
                .contains(&format!("{TEST_SURFACE}#http://a.com/site.css"))
        );
    }

    #[test]
    fn malformed_inbound_links_notify_but_still_propagate() {
        let mut built = harness(true);
        built.viewer.on_control_message(
            ControlMessage::Navigate {
                link_url: "http://".to_owned(),
                explicit_type: None,
            },
            Instant::now(),
        );

        assert_eq!(
            built.notifier.alert_messages(),
            vec!["Error: \"http://\" is not a valid URL.".to_owned()]
        );
        // The raw value still drove a navigation attempt.
        assert_eq!(built.viewer.session().current_base_url, "http://");
        built.pump_until_idle();
    }

    #[test]
    fn empty_inbound_links_skip_navigation_but_scrub_the_record() {
        let mut built = harness(true);
        built.viewer.on_control_message(
            ControlMessage::Navigate {
                link_url: String::new(),
                explicit_type: None,
            },
            Instant::now(),
        );

        assert_eq!(built.viewer.session().current_base_url, "");
        assert_eq!(built.transport.request_count(), 0);

        built.viewer.pump(Instant::now());
        assert_eq!(
            built.scrubber.deleted_keys(),
            vec![format!("{TEST_SURFACE}#")]
        );
    }

    #[test]
    fn superseding_navigation_discards_the_previous_response() {
        let mut built = harness(true);
        built
            .viewer
            .on_user_navigate("http://a.com/first.html", None, Instant::now());
        assert!(built.viewer.is_loading());

        // Navigation B lands while A is outstanding.
        built
            .viewer
            .on_user_navigate("http://b.com/second.html", None, Instant::now());

        built.pump_until_idle();

        // Only B's document may surface; nothing references A.
        let payloads = built.drain_payloads();
        assert!(
            payloads
                .iter()
                .all(|(_, data)| !data.contains("first.html"))
        );
    }

    #[test]
    fn proxied_loads_route_through_the_configured_endpoint() {
        let mut built = harness(true);
        built
            .viewer
            .on_user_navigate("http://example.com/index.html", None, Instant::now());
        built.pump_until_idle();

        let requests = built
            .transport
            .requests
            .lock()
            .map(|seen| seen.clone())
            .unwrap_or_default();
        assert_eq!(requests.len(), 1);
        assert_eq!(
            requests[0].url,
            format!("{TEST_PROXY}http%3A%2F%2Fexample.com%2Findex.html")
        );
    }
}
