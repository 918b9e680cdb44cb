//! Startup settings.
//!
//! Settings are built from three layers, lowest priority first:
//! 1. compiled defaults ([`Settings::default`]),
//! 2. an optional JSON file (missing keys keep their defaults),
//! 3. `LIVEFEED_*` environment variables.
//!
//! Invalid environment values are logged and ignored.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::state::ConnectMode;

/// Errors loading a settings file.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The file could not be read.
    #[error("Failed to read settings file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid settings JSON.
    #[error("Failed to parse settings file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Top-level settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    /// Mode used when `connect` is called without one.
    pub default_mode: ConnectMode,

    /// Whether `auto` mode may fall back to the raw backend.
    pub fallback_enabled: bool,

    pub official: OfficialSettings,
    pub raw: RawSettings,
    pub reconnect: ReconnectSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_mode: ConnectMode::Auto,
            fallback_enabled: true,
            official: OfficialSettings::default(),
            raw: RawSettings::default(),
            reconnect: ReconnectSettings::default(),
        }
    }
}

/// Settings for the official connector library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OfficialSettings {
    /// Upper bound on the library's connect call.
    pub connect_timeout_ms: u64,
}

impl Default for OfficialSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 15_000,
        }
    }
}

/// Smallest heartbeat interval accepted from a file or the environment.
pub const MIN_HEARTBEAT_INTERVAL_MS: u64 = 1000;

/// Settings for the raw protocol client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RawSettings {
    /// Timeout for the room page fetch.
    pub resolve_timeout_ms: u64,

    /// Time allowed for the WebSocket to open.
    pub open_timeout_ms: u64,

    /// Keep-alive interval once connected.
    pub heartbeat_interval_ms: u64,

    /// Room page URL; `{handle}` is replaced with the normalized handle.
    pub room_page_url: String,

    /// Push endpoint; `room_id` is appended as a query parameter.
    pub push_url: String,

    /// User-Agent for both the page fetch and the socket upgrade.
    pub user_agent: String,

    /// Extra headers for the page fetch.
    pub headers: BTreeMap<String, String>,
}

impl RawSettings {
    /// Page URL for `handle`.
    pub fn room_page_for(&self, handle: &str) -> String {
        self.room_page_url.replace("{handle}", handle)
    }

    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_millis(self.resolve_timeout_ms)
    }

    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }

    /// Never zero; a zero period would stall the session task.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.max(1))
    }
}

impl Default for RawSettings {
    fn default() -> Self {
        let mut headers = BTreeMap::new();
        headers.insert("Accept-Language".to_string(), "en-US,en;q=0.9".to_string());
        headers.insert("Referer".to_string(), "https://www.tiktok.com/".to_string());

        Self {
            resolve_timeout_ms: 10_000,
            open_timeout_ms: 10_000,
            heartbeat_interval_ms: 10_000,
            room_page_url: "https://www.tiktok.com/@{handle}/live".to_string(),
            push_url: "wss://webcast-ws.tiktok.com/webcast/im/push/v2/".to_string(),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36"
                .to_string(),
            headers,
        }
    }
}

/// Manager-level reconnection after an unexpected transport loss.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReconnectSettings {
    pub enabled: bool,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 10_000,
        }
    }
}

impl Settings {
    /// Load a settings file over the compiled defaults.
    pub fn load_from_path(path: &Path) -> Result<Self, SettingsError> {
        let display = path.display().to_string();
        let text = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: display.clone(),
            source,
        })?;
        let mut settings: Self = serde_json::from_str(&text).map_err(|source| SettingsError::Parse {
            path: display,
            source,
        })?;
        settings.clamp_heartbeat();
        Ok(settings)
    }

    fn clamp_heartbeat(&mut self) {
        if self.raw.heartbeat_interval_ms < MIN_HEARTBEAT_INTERVAL_MS {
            warn!(
                value = self.raw.heartbeat_interval_ms,
                min = MIN_HEARTBEAT_INTERVAL_MS,
                "heartbeat interval too small, clamping"
            );
            self.raw.heartbeat_interval_ms = MIN_HEARTBEAT_INTERVAL_MS;
        }
    }

    /// Defaults, then `path` if given, then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let mut settings = match path {
            Some(path) => Self::load_from_path(path)?,
            None => Self::default(),
        };
        apply_env_overrides(&mut settings);
        Ok(settings)
    }
}

/// Apply `LIVEFEED_*` environment overrides.
pub fn apply_env_overrides(settings: &mut Settings) {
    if let Some(v) = read_env_string("LIVEFEED_MODE") {
        match v.parse() {
            Ok(mode) => settings.default_mode = mode,
            Err(_) => warn!(key = "LIVEFEED_MODE", value = %v, "invalid mode env var, ignoring"),
        }
    }
    if let Some(v) = read_env_bool("LIVEFEED_FALLBACK") {
        settings.fallback_enabled = v;
    }
    if let Some(v) = read_env_u64("LIVEFEED_OFFICIAL_TIMEOUT_MS", 100, 600_000) {
        settings.official.connect_timeout_ms = v;
    }
    if let Some(v) = read_env_u64("LIVEFEED_RESOLVE_TIMEOUT_MS", 100, 600_000) {
        settings.raw.resolve_timeout_ms = v;
    }
    if let Some(v) = read_env_u64("LIVEFEED_OPEN_TIMEOUT_MS", 100, 600_000) {
        settings.raw.open_timeout_ms = v;
    }
    if let Some(v) = read_env_u64("LIVEFEED_HEARTBEAT_MS", MIN_HEARTBEAT_INTERVAL_MS, 600_000) {
        settings.raw.heartbeat_interval_ms = v;
    }
    if let Some(v) = read_env_string("LIVEFEED_USER_AGENT") {
        settings.raw.user_agent = v;
    }
    if let Some(v) = read_env_bool("LIVEFEED_RECONNECT") {
        settings.reconnect.enabled = v;
    }
    if let Some(v) = read_env_u64("LIVEFEED_RECONNECT_ATTEMPTS", 0, 100) {
        settings.reconnect.max_attempts = v as u32;
    }
}

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive) `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u64` within an inclusive range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_bool(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    let result = parse_bool(&val);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        warn!(key = name, value = %val, min, max, "invalid integer env var, ignoring");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("YES"), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn test_parse_u64_range() {
        assert_eq!(parse_u64_range("500", 100, 1000), Some(500));
        assert_eq!(parse_u64_range("50", 100, 1000), None);
        assert_eq!(parse_u64_range("abc", 0, 10), None);
    }

    #[test]
    fn test_room_page_template() {
        let raw = RawSettings::default();
        assert_eq!(
            raw.room_page_for("someone"),
            "https://www.tiktok.com/@someone/live"
        );
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "defaultMode": "raw", "raw": {{ "heartbeatIntervalMs": 2500 }} }}"#
        )
        .unwrap();

        let settings = Settings::load_from_path(file.path()).unwrap();
        assert_eq!(settings.default_mode, ConnectMode::Raw);
        assert_eq!(settings.raw.heartbeat_interval_ms, 2500);
        assert_eq!(settings.raw.open_timeout_ms, RawSettings::default().open_timeout_ms);
        assert!(settings.fallback_enabled);
    }

    #[test]
    fn test_zero_heartbeat_in_file_is_clamped() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "raw": {{ "heartbeatIntervalMs": 0 }} }}"#).unwrap();

        let settings = Settings::load_from_path(file.path()).unwrap();
        assert_eq!(settings.raw.heartbeat_interval_ms, MIN_HEARTBEAT_INTERVAL_MS);
    }

    #[test]
    fn test_heartbeat_interval_never_zero() {
        let raw = RawSettings {
            heartbeat_interval_ms: 0,
            ..RawSettings::default()
        };
        assert!(!raw.heartbeat_interval().is_zero());
    }

    #[test]
    fn test_bad_file_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();

        assert!(matches!(
            Settings::load_from_path(file.path()),
            Err(SettingsError::Parse { .. })
        ));
    }
}
