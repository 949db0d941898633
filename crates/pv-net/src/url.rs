//! Address normalization and the secure-transport allowlist.

use crate::has_explicit_scheme;
use pv_core::ViewerError;
use pv_core::ViewerResult;
use regex::Regex;
use url::Url;

/// A domain allowlist entry such as `*.example.com`.
///
/// Matching is exact-literal except for `*`, which expands to a run of
/// word/hyphen/dot characters; the pattern is anchored at both ends.
#[derive(Debug, Clone)]
pub struct DomainPattern {
    raw: String,
    matcher: Option<Regex>,
}

impl DomainPattern {
    pub fn compile(pattern: &str) -> Self {
        let expanded = regex::escape(pattern).replace("\\*", "[\\w.-]*");
        // A pattern that fails to compile never matches; a bad allowlist
        // entry must not break navigation.
        let matcher = Regex::new(&format!("^{expanded}$")).ok();

        Self {
            raw: pattern.to_owned(),
            matcher,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, hostname: &str) -> bool {
        self.matcher
            .as_ref()
            .is_some_and(|matcher| matcher.is_match(hostname))
    }
}

/// Validates raw addresses and upgrades allowlisted hosts to `https`.
#[derive(Debug, Clone)]
pub struct UrlNormalizer {
    secure_domains: Vec<DomainPattern>,
}

impl UrlNormalizer {
    pub fn new(secure_domains: &[String]) -> Self {
        Self {
            secure_domains: secure_domains
                .iter()
                .map(|pattern| DomainPattern::compile(pattern))
                .collect(),
        }
    }

    pub fn secure_domains(&self) -> &[DomainPattern] {
        &self.secure_domains
    }

    /// Normalizes a user-entered address.
    ///
    /// Inputs without a `scheme://` prefix default to `http`. The
    /// scheme of a parsed `http` URL is rewritten to `https` when the
    /// hostname matches the allowlist; every other scheme is left
    /// untouched. Path, query, and fragment are preserved.
    pub fn normalize(&self, input: &str) -> ViewerResult<String> {
        let candidate = if has_explicit_scheme(input) {
            input.to_owned()
        } else {
            format!("http://{input}")
        };

        let mut parsed = Url::parse(&candidate).map_err(|error| {
            ViewerError::new(
                "net.url.invalid",
                format!("failed to parse URL `{input}`: {error}"),
            )
        })?;

        if parsed.scheme() == "http" && self.is_secure_host(parsed.host_str()) {
            let _ = parsed.set_scheme("https");
        }

        Ok(parsed.into())
    }

    fn is_secure_host(&self, hostname: Option<&str>) -> bool {
        let Some(hostname) = hostname else {
            return false;
        };

        self.secure_domains
            .iter()
            .any(|pattern| pattern.matches(hostname))
    }
}

#[cfg(test)]
mod tests {
    use super::DomainPattern;
    use super::UrlNormalizer;

    fn normalizer(patterns: &[&str]) -> UrlNormalizer {
        let owned: Vec<String> = patterns.iter().map(|p| (*p).to_owned()).collect();
        UrlNormalizer::new(&owned)
    }

    #[test]
    fn prepends_http_when_scheme_is_missing() {
        let normalized = normalizer(&[]).normalize("example.com/docs?a=1");
        assert_eq!(normalized, Ok("http://example.com/docs?a=1".to_owned()));
    }

    #[test]
    fn rejects_unparseable_addresses() {
        let normalized = normalizer(&[]).normalize("http://");
        assert!(normalized.is_err());
        if let Err(error) = normalized {
            assert_eq!(error.code, "net.url.invalid");
        }
    }

    #[test]
    fn upgrades_allowlisted_hosts_to_https() {
        let normalized = normalizer(&["github.com"]).normalize("http://github.com/foo");
        assert_eq!(normalized, Ok("https://github.com/foo".to_owned()));
    }

    #[test]
    fn preserves_scheme_for_hosts_outside_the_allowlist() {
        let normalized = normalizer(&["github.com"]).normalize("http://example.com/foo");
        assert_eq!(normalized, Ok("http://example.com/foo".to_owned()));
    }

    #[test]
    fn leaves_non_http_schemes_untouched() {
        let normalized = normalizer(&["x.com"]).normalize("ftp://x.com");
        assert!(normalized.is_ok_and(|url| url.starts_with("ftp://x.com")));
    }

    #[test]
    fn preserves_path_query_and_fragment_on_upgrade() {
        let normalized =
            normalizer(&["*.wikipedia.org"]).normalize("http://en.wikipedia.org/wiki/Rust?x=1#top");
        assert_eq!(
            normalized,
            Ok("https://en.wikipedia.org/wiki/Rust?x=1#top".to_owned())
        );
    }

    #[test]
    fn wildcard_matches_subdomains_only() {
        let pattern = DomainPattern::compile("*.example.com");
        assert!(pattern.matches("a.example.com"));
        assert!(pattern.matches("a.b.example.com"));
        assert!(!pattern.matches("example.com"));
        assert!(!pattern.matches("evilexample.com"));
    }

    #[test]
    fn literal_pattern_matches_exactly() {
        let pattern = DomainPattern::compile("github.com");
        assert!(pattern.matches("github.com"));
        assert!(!pattern.matches("gist.github.com"));
        assert!(!pattern.matches("github.com.evil.test"));
    }

    #[test]
    fn regex_metacharacters_in_patterns_stay_literal() {
        let pattern = DomainPattern::compile("a+b.example.com");
        assert!(pattern.matches("a+b.example.com"));
        assert!(!pattern.matches("aab.example.com"));
    }
}
