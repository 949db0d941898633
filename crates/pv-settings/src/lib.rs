//! Read-once viewer configuration backed by the host key-value store.

use pv_core::ViewerError;
use pv_core::ViewerResult;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

const KEY_PROXY_ENDPOINT: &str = "proxy_endpoint";
const KEY_SECURE_DOMAINS: &str = "secure_domains";

const DEFAULT_PROXY_ENDPOINT: &str =
    "https://feedback.googleusercontent.com/gadgets/proxy?container=fbk&url=";

const DEFAULT_SECURE_DOMAINS: [&str; 6] = [
    "torproject.org",
    "*.torproject.org",
    "*.wikipedia.org",
    "*.facebook.com",
    "github.com",
    "twitter.com",
];

/// Viewer configuration, loaded once at startup and read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewerSettings {
    /// URL prefix under which target URLs are embedded as an encoded
    /// query parameter.
    pub proxy_endpoint: String,
    /// Domain patterns whose plain-text transport is upgraded to
    /// encrypted transport. `*` matches a run of word/hyphen/dot
    /// characters.
    pub secure_domains: Vec<String>,
}

impl Default for ViewerSettings {
    fn default() -> Self {
        Self {
            proxy_endpoint: DEFAULT_PROXY_ENDPOINT.to_owned(),
            secure_domains: DEFAULT_SECURE_DOMAINS
                .iter()
                .map(|pattern| (*pattern).to_owned())
                .collect(),
        }
    }
}

/// Seam over the host runtime's persistent settings store.
pub trait SettingsStore {
    fn load(&self) -> ViewerResult<ViewerSettings>;
}

/// Fixed settings, for tests and hosts that configure in code.
#[derive(Debug, Clone, Default)]
pub struct StaticSettingsStore {
    pub settings: ViewerSettings,
}

impl StaticSettingsStore {
    pub fn new(settings: ViewerSettings) -> Self {
        Self { settings }
    }
}

impl SettingsStore for StaticSettingsStore {
    fn load(&self) -> ViewerResult<ViewerSettings> {
        Ok(self.settings.clone())
    }
}

/// File-backed settings store persisting hex-encoded `key\tvalue` lines.
#[derive(Debug, Clone)]
pub struct FileSettingsStore {
    path: PathBuf,
}

impl FileSettingsStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn store(&self, settings: &ViewerSettings) -> ViewerResult<()> {
        let mut map = BTreeMap::new();
        map.insert(
            KEY_PROXY_ENDPOINT.to_owned(),
            settings.proxy_endpoint.clone(),
        );
        map.insert(
            KEY_SECURE_DOMAINS.to_owned(),
            settings.secure_domains.join("\n"),
        );
        write_settings_map(&self.path, &map)
    }
}

impl SettingsStore for FileSettingsStore {
    fn load(&self) -> ViewerResult<ViewerSettings> {
        if !self.path.exists() {
            return Ok(ViewerSettings::default());
        }

        let map = read_settings_map(&self.path)?;
        let defaults = ViewerSettings::default();

        let proxy_endpoint = map
            .get(KEY_PROXY_ENDPOINT)
            .cloned()
            .unwrap_or(defaults.proxy_endpoint);

        let secure_domains = match map.get(KEY_SECURE_DOMAINS) {
            Some(raw) => raw
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(ToOwned::to_owned)
                .collect(),
            None => defaults.secure_domains,
        };

        Ok(ViewerSettings {
            proxy_endpoint,
            secure_domains,
        })
    }
}

fn read_settings_map(path: &Path) -> ViewerResult<BTreeMap<String, String>> {
    let content = fs::read_to_string(path).map_err(|error| {
        ViewerError::new(
            "settings.read_failed",
            format!("failed to read settings file `{}`: {error}", path.display()),
        )
    })?;

    let mut map = BTreeMap::new();
    for (index, line) in content.lines().enumerate() {
        if line.is_empty() {
            continue;
        }

        let (key_hex, value_hex) = line.split_once('\t').ok_or_else(|| {
            ViewerError::new(
                "settings.format_invalid",
                format!(
                    "invalid record format at `{}` line {}",
                    path.display(),
                    index + 1
                ),
            )
        })?;

        let key = decode_hex_string(key_hex)?;
        let value = decode_hex_string(value_hex)?;
        map.insert(key, value);
    }

    Ok(map)
}

fn write_settings_map(path: &Path, map: &BTreeMap<String, String>) -> ViewerResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|error| {
            ViewerError::new(
                "settings.dir_create_failed",
                format!(
                    "failed to create settings directory `{}`: {error}",
                    parent.display()
                ),
            )
        })?;
    }

    let mut encoded = String::new();
    for (key, value) in map {
        encoded.push_str(&encode_hex_string(key));
        encoded.push('\t');
        encoded.push_str(&encode_hex_string(value));
        encoded.push('\n');
    }

    fs::write(path, encoded).map_err(|error| {
        ViewerError::new(
            "settings.write_failed",
            format!(
                "failed to write settings file `{}`: {error}",
                path.display()
            ),
        )
    })
}

fn encode_hex_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len().saturating_mul(2));
    for byte in value.as_bytes() {
        out.push(hex_char(byte >> 4));
        out.push(hex_char(byte & 0x0f));
    }
    out
}

fn decode_hex_string(value: &str) -> ViewerResult<String> {
    if !value.len().is_multiple_of(2) {
        return Err(ViewerError::new(
            "settings.hex_invalid",
            "hex field length must be even",
        ));
    }

    let mut bytes = Vec::with_capacity(value.len() / 2);
    let chars: Vec<char> = value.chars().collect();
    let mut index = 0_usize;
    while index < chars.len() {
        let high = decode_hex_nibble(chars[index])?;
        let low = decode_hex_nibble(chars[index + 1])?;
        bytes.push((high << 4) | low);
        index += 2;
    }

    String::from_utf8(bytes).map_err(|error| {
        ViewerError::new(
            "settings.utf8_invalid",
            format!("settings field is not valid UTF-8: {error}"),
        )
    })
}

fn hex_char(value: u8) -> char {
    match value {
        0..=9 => (b'0' + value) as char,
        10..=15 => (b'a' + (value - 10)) as char,
        _ => '0',
    }
}

fn decode_hex_nibble(ch: char) -> ViewerResult<u8> {
    match ch {
        '0'..='9' => Ok((ch as u8) - b'0'),
        'a'..='f' => Ok((ch as u8) - b'a' + 10),
        'A'..='F' => Ok((ch as u8) - b'A' + 10),
        _ => Err(ViewerError::new(
            "settings.hex_invalid",
            format!("invalid hex character `{ch}`"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::FileSettingsStore;
    use super::SettingsStore;
    use super::StaticSettingsStore;
    use super::ViewerSettings;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_settings_path() -> std::path::PathBuf {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|value| value.as_nanos())
            .unwrap_or_default();
        std::env::temp_dir().join(format!("periscope-settings-test-{stamp}.kv"))
    }

    #[test]
    fn defaults_include_known_secure_domains() {
        let settings = ViewerSettings::default();
        assert!(settings.proxy_endpoint.ends_with("url="));
        assert!(
            settings
                .secure_domains
                .iter()
                .any(|pattern| pattern == "github.com")
        );
        assert!(
            settings
                .secure_domains
                .iter()
                .any(|pattern| pattern == "*.wikipedia.org")
        );
    }

    #[test]
    fn missing_file_yields_defaults() {
        let store = FileSettingsStore::new(temp_settings_path());
        let loaded = store.load();
        assert_eq!(loaded, Ok(ViewerSettings::default()));
    }

    #[test]
    fn settings_roundtrip_preserves_allowlist_order() {
        let path = temp_settings_path();
        let store = FileSettingsStore::new(path.clone());

        let settings = ViewerSettings {
            proxy_endpoint: "https://relay.example/fetch?url=".to_owned(),
            secure_domains: vec!["b.example".to_owned(), "*.a.example".to_owned()],
        };
        let wrote = store.store(&settings);
        assert!(wrote.is_ok());

        let loaded = store.load();
        assert_eq!(loaded, Ok(settings));

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn static_store_hands_back_configured_settings() {
        let store = StaticSettingsStore::new(ViewerSettings::default());
        let loaded = store.load();
        assert_eq!(loaded, Ok(ViewerSettings::default()));
    }
}
