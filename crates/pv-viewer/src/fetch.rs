//! Fetch orchestration: dispatching attempts, applying reconciliation,
//! and emitting terminal payloads.

use crate::Viewer;
use base64::Engine;
use encoding_rs::Encoding;
use pv_core::ViewerResult;
use pv_ipc::PayloadKind;
use pv_net::CancelFlag;
use pv_net::DirectKind;
use pv_net::FetchMode;
use pv_net::FetchRequest;
use pv_net::FetchResponse;
use pv_net::Reconciliation;
use pv_net::ResourcePlan;
use pv_net::classify::reconcile;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

/// Binary bodies at or above this size need explicit user confirmation.
pub(crate) const OVERSIZED_RESOURCE_BYTES: usize = 9_000_000;

const FETCH_THREAD_NAME: &str = "periscope-fetch";
const NETWORK_ERROR_NOTICE: &str = "NetworkError: A network error occurred.";
const OVERSIZED_RESOURCE_PROMPT: &str = "Too large resource! Proceed anyway?";
const FALLBACK_MIME: &str = "application/octet-stream";

/// One fetch attempt; ephemeral, never retried automatically.
#[derive(Debug, Clone)]
pub(crate) struct FetchAttempt {
    pub request_id: u64,
    /// The raw reference as navigated to; keeps the fragment the
    /// proxied URL no longer carries.
    pub reference: String,
    pub proxied_url: String,
    pub mode: FetchMode,
    pub is_top_level: bool,
    /// Set on refetches issued by reconciliation; a reclassified
    /// attempt is never reconciled again.
    pub reclassified: bool,
    pub parse_as_styles: bool,
}

pub(crate) struct InflightFetch {
    pub request_id: u64,
    pub cancel: CancelFlag,
}

pub(crate) struct FetchCompletion {
    pub attempt: FetchAttempt,
    pub outcome: ViewerResult<FetchResponse>,
}

impl Viewer {
    /// Loads an external resource. Fire-and-forget: completion is
    /// communicated through emitted payloads or user notifications.
    pub fn load(
        &mut self,
        resource_url: &str,
        explicit_type: Option<&str>,
        is_top_level: bool,
        now: Instant,
    ) {
        let base = if self.session.current_base_url.is_empty() {
            resource_url.to_owned()
        } else {
            self.session.current_base_url.clone()
        };
        let proxied_url = self.proxy.resolve(resource_url, &base);

        match self.classifier.plan(resource_url, explicit_type) {
            ResourcePlan::Direct(kind) => {
                self.emit(payload_kind_for(kind), &proxied_url);
            }
            ResourcePlan::Fetch(mode) => {
                let attempt = FetchAttempt {
                    request_id: self.next_request_id(),
                    reference: resource_url.to_owned(),
                    proxied_url,
                    mode,
                    is_top_level,
                    reclassified: false,
                    parse_as_styles: explicit_type == Some("text/css"),
                };

                self.session.is_loading = true;
                self.indicator.start(now);
                self.dispatch(attempt);
            }
        }
    }

    /// Clears the loading flag and signals transport cancellation for
    /// any outstanding fetch. A response that still arrives afterwards
    /// no longer matches an in-flight request id and is discarded.
    pub(crate) fn cancel_outstanding(&mut self) {
        self.session.is_loading = false;
        if let Some(inflight) = self.inflight.take() {
            inflight.cancel.cancel();
        }
    }

    fn dispatch(&mut self, attempt: FetchAttempt) {
        let cancel = CancelFlag::new();
        self.inflight = Some(InflightFetch {
            request_id: attempt.request_id,
            cancel: cancel.clone(),
        });

        let transport = Arc::clone(&self.transport);
        let completions = self.completion_tx.clone();
        let request = FetchRequest {
            url: attempt.proxied_url.clone(),
            mode: attempt.mode,
        };
        let is_top_level = attempt.is_top_level;

        let job = move || {
            let outcome = transport.fetch(&request, &cancel);
            let _ = completions.send(FetchCompletion { attempt, outcome });
        };

        if thread::Builder::new()
            .name(FETCH_THREAD_NAME.to_owned())
            .spawn(job)
            .is_err()
        {
            if is_top_level {
                self.notifier.alert(NETWORK_ERROR_NOTICE);
            }
            self.finish_load();
        }
    }

    fn refetch(&mut self, previous: FetchAttempt, mode: FetchMode) {
        let attempt = FetchAttempt {
            mode,
            reclassified: true,
            // The refetch parses plainly; the styles hint does not
            // survive reclassification.
            parse_as_styles: false,
            ..previous
        };
        self.dispatch(attempt);
    }

    pub(crate) fn handle_completion(&mut self, completion: FetchCompletion) {
        let matches_inflight = self
            .inflight
            .as_ref()
            .is_some_and(|inflight| inflight.request_id == completion.attempt.request_id);
        if !matches_inflight {
            // A response outliving its navigation emits nothing.
            return;
        }

        let FetchCompletion { attempt, outcome } = completion;

        let response = match outcome {
            Ok(response) => response,
            Err(_error) => {
                if self.session.is_loading && attempt.is_top_level {
                    self.notifier.alert(NETWORK_ERROR_NOTICE);
                }
                self.finish_load();
                return;
            }
        };

        match reconcile(
            attempt.mode,
            response.content_type.as_deref(),
            attempt.is_top_level,
            attempt.reclassified,
        ) {
            Reconciliation::RefetchText => {
                self.refetch(attempt, FetchMode::Text);
            }
            Reconciliation::RefetchBinary => {
                self.refetch(attempt, FetchMode::Binary);
            }
            Reconciliation::Direct(kind) => {
                self.emit(payload_kind_for(kind), &attempt.proxied_url);
                self.finish_load();
            }
            Reconciliation::Confirmed => {
                if response.is_ok_status() {
                    self.parse_and_emit(&attempt, &response);
                } else if attempt.is_top_level {
                    self.notifier.alert(&format!(
                        "HTTPError: {} {}",
                        response.status, response.reason
                    ));
                    // Show whatever body came back anyway.
                    self.parse_and_emit(&attempt, &response);
                }
                self.finish_load();
            }
        }
    }

    fn parse_and_emit(&mut self, attempt: &FetchAttempt, response: &FetchResponse) {
        match attempt.mode {
            FetchMode::Text => {
                let text = decode_text_body(&response.body, response.content_type.as_deref());
                let markup = if attempt.parse_as_styles {
                    format!("<style>{text}</style>")
                } else {
                    text
                };
                let rewritten = self
                    .rewriter
                    .rewrite(&markup, &self.settings.proxy_endpoint);

                if attempt.parse_as_styles {
                    self.emit(PayloadKind::Styles, &rewritten);
                } else {
                    self.emit(PayloadKind::Document, &rewritten);
                    if let Some(fragment) = fragment_reference(&attempt.reference) {
                        self.navigate_to_fragment(&fragment);
                    }
                }
            }
            FetchMode::Binary => {
                if response.body.len() >= OVERSIZED_RESOURCE_BYTES
                    && !self.notifier.confirm(OVERSIZED_RESOURCE_PROMPT)
                {
                    return;
                }

                let mime = data_url_mime(response.content_type.as_deref());
                let encoded = base64::engine::general_purpose::STANDARD.encode(&response.body);
                self.emit(PayloadKind::Resource, &format!("data:{mime};base64,{encoded}"));
            }
        }
    }

    pub(crate) fn finish_load(&mut self) {
        self.session.is_loading = false;
        self.inflight = None;
    }
}

fn payload_kind_for(kind: DirectKind) -> PayloadKind {
    match kind {
        DirectKind::Img => PayloadKind::Img,
        DirectKind::Audio => PayloadKind::Audio,
        DirectKind::Video => PayloadKind::Video,
    }
}

/// `#fragment` tail of a reference, when it has a non-empty one.
fn fragment_reference(reference: &str) -> Option<String> {
    let (_, fragment) = reference.split_once('#')?;
    if fragment.is_empty() {
        None
    } else {
        Some(format!("#{fragment}"))
    }
}

fn decode_text_body(body: &[u8], content_type: Option<&str>) -> String {
    if let Some(content_type) = content_type
        && let Some(label) = charset_from_content_type(content_type)
        && let Some(encoding) = Encoding::for_label(label.as_bytes())
    {
        let (decoded, _, _) = encoding.decode(body);
        return decoded.into_owned();
    }

    String::from_utf8_lossy(body).to_string()
}

fn charset_from_content_type(content_type: &str) -> Option<String> {
    for part in content_type.split(';').skip(1) {
        let Some((name, value)) = part.split_once('=') else {
            continue;
        };
        if !name.trim().eq_ignore_ascii_case("charset") {
            continue;
        }

        let label = value.trim().trim_matches('"').trim_matches('\'');
        if !label.is_empty() {
            return Some(label.to_owned());
        }
    }

    None
}

fn data_url_mime(content_type: Option<&str>) -> String {
    let declared = content_type
        .and_then(|value| value.split(';').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());

    match declared {
        Some(value) => value.to_ascii_lowercase(),
        None => FALLBACK_MIME.to_owned(),
    }
}
