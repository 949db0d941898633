//! Content classification: extension-based fetch planning and the
//! reconciliation of a guess against the server-declared content type.

use pv_core::ViewerError;
use pv_core::ViewerResult;
use regex::Regex;

const IMAGE_PATTERN: &str = r"\.(?:jpe?g|png|gif|svg|bmp|ico)(?:[?#].*)?$";
const AUDIO_PATTERN: &str = r"(?i)\.(?:mp3|wav|ogg)(?:[?#].*)?$";
const VIDEO_PATTERN: &str = r"(?i)\.(?:mp4|webm|3gp)(?:[?#].*)?$";
const DOCUMENT_PATTERN: &str = concat!(
    r"(?:\.(?:s?html?|php|(?:j|a)spx?|p(?:y|l)|",
    r"c(?:gi|ss)|js(?:on)?|txt|cfml?)|://.+?",
    r"/(?:[^.?#]*|[^a-z?#]*))(?:[?#].*)?$",
);

/// How a resource body is fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    Text,
    Binary,
}

impl FetchMode {
    /// Maps an explicit type supplied by an inbound navigation message.
    /// Only the opaque `resource` type fetches binary; everything else
    /// (including `text/css`) fetches text.
    pub fn for_explicit_type(explicit: &str) -> Self {
        if explicit == "resource" {
            Self::Binary
        } else {
            Self::Text
        }
    }
}

/// Media kinds delivered as direct proxied links, without a body fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectKind {
    Img,
    Audio,
    Video,
}

/// Outcome of the extension guess for a resource reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourcePlan {
    Direct(DirectKind),
    Fetch(FetchMode),
}

/// Coarse category of a server-declared content type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclaredCategory {
    Text { xml: bool },
    Image,
    Audio,
    Video,
    OtherBinary,
}

impl DeclaredCategory {
    /// Categorizes a `Content-Type` header value. Returns `None` for
    /// blank values, which callers treat the same as a missing header.
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let value = content_type.trim().to_ascii_lowercase();
        if value.is_empty() {
            return None;
        }

        let category = if value.starts_with("text") {
            Self::Text {
                xml: value.starts_with("text/xml"),
            }
        } else if value.starts_with("image") {
            Self::Image
        } else if value.starts_with("audio") {
            Self::Audio
        } else if value.starts_with("video") {
            Self::Video
        } else {
            Self::OtherBinary
        };

        Some(category)
    }
}

/// Decision produced by comparing the fetch-mode guess against the
/// server's declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// Parse the body as originally fetched.
    Confirmed,
    /// Refetch the resource in text mode.
    RefetchText,
    /// Refetch the resource in binary mode.
    RefetchBinary,
    /// Emit a direct link payload of the given kind; no body needed.
    Direct(DirectKind),
}

/// Decides how a fetched response is ultimately handled.
///
/// Rules are applied only to top-level requests or when the guess
/// turned out wrong, and never to a request that is itself a refetch —
/// each resource is refetched at most once.
pub fn reconcile(
    mode: FetchMode,
    declared: Option<&str>,
    is_top_level: bool,
    already_reclassified: bool,
) -> Reconciliation {
    if already_reclassified {
        return Reconciliation::Confirmed;
    }

    // A missing or blank declaration confirms the guess.
    let Some(category) = declared.and_then(DeclaredCategory::from_content_type) else {
        return Reconciliation::Confirmed;
    };

    let guess_was_wrong = match (mode, category) {
        (FetchMode::Text, DeclaredCategory::Text { .. }) => false,
        (FetchMode::Text, _) => true,
        (FetchMode::Binary, DeclaredCategory::Text { .. }) => true,
        (FetchMode::Binary, _) => false,
    };

    if !is_top_level && !guess_was_wrong {
        return Reconciliation::Confirmed;
    }

    match (mode, category) {
        (FetchMode::Binary, DeclaredCategory::Text { xml: true }) => Reconciliation::RefetchBinary,
        (FetchMode::Binary, DeclaredCategory::Text { xml: false }) => Reconciliation::RefetchText,
        (FetchMode::Text, DeclaredCategory::Image) => Reconciliation::Direct(DirectKind::Img),
        (FetchMode::Text, DeclaredCategory::Audio) => Reconciliation::Direct(DirectKind::Audio),
        (FetchMode::Text, DeclaredCategory::Video) => Reconciliation::Direct(DirectKind::Video),
        (FetchMode::Text, DeclaredCategory::OtherBinary) => Reconciliation::RefetchBinary,
        _ => Reconciliation::Confirmed,
    }
}

/// Plans fetches from a reference's trailing extension.
#[derive(Debug, Clone)]
pub struct ContentClassifier {
    image: Regex,
    audio: Regex,
    video: Regex,
    document: Regex,
}

impl ContentClassifier {
    pub fn new() -> ViewerResult<Self> {
        Ok(Self {
            image: compile(IMAGE_PATTERN)?,
            audio: compile(AUDIO_PATTERN)?,
            video: compile(VIDEO_PATTERN)?,
            document: compile(DOCUMENT_PATTERN)?,
        })
    }

    /// Guesses how to load `reference`. An explicit type from an
    /// inbound message bypasses the guess entirely.
    pub fn plan(&self, reference: &str, explicit_type: Option<&str>) -> ResourcePlan {
        if let Some(explicit) = explicit_type {
            return ResourcePlan::Fetch(FetchMode::for_explicit_type(explicit));
        }

        if self.document.is_match(reference) {
            ResourcePlan::Fetch(FetchMode::Text)
        } else if self.image.is_match(reference) {
            ResourcePlan::Direct(DirectKind::Img)
        } else if self.audio.is_match(reference) {
            ResourcePlan::Direct(DirectKind::Audio)
        } else if self.video.is_match(reference) {
            ResourcePlan::Direct(DirectKind::Video)
        } else {
            ResourcePlan::Fetch(FetchMode::Binary)
        }
    }
}

fn compile(pattern: &str) -> ViewerResult<Regex> {
    Regex::new(pattern).map_err(|error| {
        ViewerError::new(
            "net.classify.pattern_invalid",
            format!("failed to compile classifier pattern `{pattern}`: {error}"),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::ContentClassifier;
    use super::DeclaredCategory;
    use super::DirectKind;
    use super::FetchMode;
    use super::Reconciliation;
    use super::ResourcePlan;
    use super::reconcile;

    fn classifier() -> ContentClassifier {
        match ContentClassifier::new() {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        }
    }

    #[test]
    fn image_extensions_plan_direct_links() {
        let classifier = classifier();
        assert_eq!(
            classifier.plan("https://a.com/pic.png", None),
            ResourcePlan::Direct(DirectKind::Img)
        );
        assert_eq!(
            classifier.plan("https://a.com/pic.jpeg?s=2#top", None),
            ResourcePlan::Direct(DirectKind::Img)
        );
    }

    #[test]
    fn media_extensions_plan_direct_links_case_insensitively() {
        let classifier = classifier();
        assert_eq!(
            classifier.plan("https://a.com/track.MP3", None),
            ResourcePlan::Direct(DirectKind::Audio)
        );
        assert_eq!(
            classifier.plan("https://a.com/clip.webm", None),
            ResourcePlan::Direct(DirectKind::Video)
        );
    }

    #[test]
    fn document_extensions_plan_text_fetches() {
        let classifier = classifier();
        for reference in [
            "https://a.com/index.html",
            "https://a.com/page.php?id=3",
            "https://a.com/styles/site.css",
            "https://a.com/data.json",
        ] {
            assert_eq!(
                classifier.plan(reference, None),
                ResourcePlan::Fetch(FetchMode::Text),
                "reference: {reference}"
            );
        }
    }

    #[test]
    fn directory_style_paths_plan_text_fetches() {
        let classifier = classifier();
        assert_eq!(
            classifier.plan("https://a.com/", None),
            ResourcePlan::Fetch(FetchMode::Text)
        );
        assert_eq!(
            classifier.plan("https://a.com/docs/guide", None),
            ResourcePlan::Fetch(FetchMode::Text)
        );
    }

    #[test]
    fn unknown_extensions_plan_binary_fetches() {
        let classifier = classifier();
        assert_eq!(
            classifier.plan("https://a.com/archive.tar.gz", None),
            ResourcePlan::Fetch(FetchMode::Binary)
        );
    }

    #[test]
    fn explicit_types_bypass_the_guess() {
        let classifier = classifier();
        assert_eq!(
            classifier.plan("https://a.com/pic.png", Some("text/css")),
            ResourcePlan::Fetch(FetchMode::Text)
        );
        assert_eq!(
            classifier.plan("https://a.com/index.html", Some("resource")),
            ResourcePlan::Fetch(FetchMode::Binary)
        );
    }

    #[test]
    fn declared_categories_parse_by_prefix() {
        assert_eq!(
            DeclaredCategory::from_content_type("text/html; charset=utf-8"),
            Some(DeclaredCategory::Text { xml: false })
        );
        assert_eq!(
            DeclaredCategory::from_content_type("text/xml"),
            Some(DeclaredCategory::Text { xml: true })
        );
        assert_eq!(
            DeclaredCategory::from_content_type("Image/PNG"),
            Some(DeclaredCategory::Image)
        );
        assert_eq!(DeclaredCategory::from_content_type("   "), None);
    }

    #[test]
    fn missing_declaration_confirms_the_guess() {
        assert_eq!(
            reconcile(FetchMode::Text, None, true, false),
            Reconciliation::Confirmed
        );
        assert_eq!(
            reconcile(FetchMode::Binary, Some(""), true, false),
            Reconciliation::Confirmed
        );
    }

    #[test]
    fn top_level_binary_guess_with_html_declaration_refetches_text() {
        assert_eq!(
            reconcile(FetchMode::Binary, Some("text/html"), true, false),
            Reconciliation::RefetchText
        );
    }

    #[test]
    fn xml_declaration_on_a_binary_guess_refetches_binary_once() {
        let first = reconcile(FetchMode::Binary, Some("text/xml"), false, false);
        assert_eq!(first, Reconciliation::RefetchBinary);

        // The refetch is marked reclassified and must settle.
        let second = reconcile(FetchMode::Binary, Some("text/xml"), false, true);
        assert_eq!(second, Reconciliation::Confirmed);
    }

    #[test]
    fn text_guess_with_media_declaration_yields_direct_links() {
        assert_eq!(
            reconcile(FetchMode::Text, Some("image/png"), true, false),
            Reconciliation::Direct(DirectKind::Img)
        );
        assert_eq!(
            reconcile(FetchMode::Text, Some("audio/mpeg"), false, false),
            Reconciliation::Direct(DirectKind::Audio)
        );
        assert_eq!(
            reconcile(FetchMode::Text, Some("video/mp4"), true, false),
            Reconciliation::Direct(DirectKind::Video)
        );
    }

    #[test]
    fn text_guess_with_opaque_declaration_refetches_binary() {
        assert_eq!(
            reconcile(FetchMode::Text, Some("application/octet-stream"), false, false),
            Reconciliation::RefetchBinary
        );
    }

    #[test]
    fn confirmed_guesses_are_left_alone() {
        assert_eq!(
            reconcile(FetchMode::Text, Some("text/html"), true, false),
            Reconciliation::Confirmed
        );
        assert_eq!(
            reconcile(FetchMode::Binary, Some("application/zip"), true, false),
            Reconciliation::Confirmed
        );
        // Sub-resource with a correct guess: rules do not even apply.
        assert_eq!(
            reconcile(FetchMode::Binary, Some("application/zip"), false, false),
            Reconciliation::Confirmed
        );
    }
}
