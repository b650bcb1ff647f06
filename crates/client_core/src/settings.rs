use std::{fs, path::Path, time::Duration};

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use url::Url;

pub const DEFAULT_SETTINGS_FILE: &str = "admin_chat.toml";

#[derive(Debug, Clone, PartialEq)]
pub struct ClientSettings {
    pub api_base_url: String,
    pub socket_path: String,
    pub database_url: String,
    pub handshake_timeout: Duration,
    pub reconnect_delay: Duration,
    pub reconnect_delay_max: Duration,
    /// Zero keeps retrying forever.
    pub reconnect_attempts: u32,
    pub request_timeout: Duration,
    pub page_size: u32,
    pub typing_expiry: Duration,
    pub typing_idle: Duration,
    pub confirmation_window: Duration,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:5000".into(),
            socket_path: "/ws".into(),
            database_url: "sqlite://./data/admin_chat.db".into(),
            handshake_timeout: Duration::from_secs(10),
            reconnect_delay: Duration::from_millis(1000),
            reconnect_delay_max: Duration::from_millis(5000),
            reconnect_attempts: 10,
            request_timeout: Duration::from_secs(30),
            page_size: 50,
            typing_expiry: Duration::from_secs(3),
            typing_idle: Duration::from_secs(2),
            confirmation_window: Duration::from_secs(5),
        }
    }
}

/// Knobs for the push-channel driver.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionSettings {
    pub socket_url: Url,
    pub handshake_timeout: Duration,
    pub reconnect_delay: Duration,
    pub reconnect_delay_max: Duration,
    pub reconnect_attempts: u32,
}

impl ConnectionSettings {
    pub fn new(socket_url: Url) -> Self {
        let defaults = ClientSettings::default();
        Self {
            socket_url,
            handshake_timeout: defaults.handshake_timeout,
            reconnect_delay: defaults.reconnect_delay,
            reconnect_delay_max: defaults.reconnect_delay_max,
            reconnect_attempts: defaults.reconnect_attempts,
        }
    }

    /// Exponential backoff, capped at `reconnect_delay_max`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1).min(16));
        self.reconnect_delay
            .saturating_mul(factor)
            .min(self.reconnect_delay_max)
    }

    pub fn attempts_exhausted(&self, attempt: u32) -> bool {
        self.reconnect_attempts != 0 && attempt >= self.reconnect_attempts
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoreSettings {
    pub page_size: u32,
    pub typing_expiry: Duration,
    pub typing_idle: Duration,
    pub confirmation_window: Duration,
}

impl Default for StoreSettings {
    fn default() -> Self {
        ClientSettings::default().store()
    }
}

impl ClientSettings {
    pub fn connection(&self) -> Result<ConnectionSettings> {
        Ok(ConnectionSettings {
            socket_url: socket_url(&self.api_base_url, &self.socket_path)?,
            handshake_timeout: self.handshake_timeout,
            reconnect_delay: self.reconnect_delay,
            reconnect_delay_max: self.reconnect_delay_max,
            reconnect_attempts: self.reconnect_attempts,
        })
    }

    pub fn store(&self) -> StoreSettings {
        StoreSettings {
            page_size: self.page_size,
            typing_expiry: self.typing_expiry,
            typing_idle: self.typing_idle,
            confirmation_window: self.confirmation_window,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    api_base_url: Option<String>,
    socket_path: Option<String>,
    database_url: Option<String>,
    handshake_timeout_secs: Option<u64>,
    reconnect_delay_ms: Option<u64>,
    reconnect_delay_max_ms: Option<u64>,
    reconnect_attempts: Option<u32>,
    request_timeout_secs: Option<u64>,
    page_size: Option<u32>,
}

pub fn load_settings() -> Result<ClientSettings> {
    let mut settings = ClientSettings::default();
    let path = Path::new(DEFAULT_SETTINGS_FILE);
    if path.exists() {
        apply_file(&mut settings, path)?;
    }
    apply_env(&mut settings, |key| std::env::var(key).ok());
    settings.database_url = normalize_database_url(&settings.database_url);
    Ok(settings)
}

pub fn apply_file(settings: &mut ClientSettings, path: &Path) -> Result<()> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read settings file '{}'", path.display()))?;
    let file_cfg: FileSettings = toml::from_str(&raw)
        .with_context(|| format!("invalid settings file '{}'", path.display()))?;

    if let Some(v) = file_cfg.api_base_url {
        settings.api_base_url = v;
    }
    if let Some(v) = file_cfg.socket_path {
        settings.socket_path = v;
    }
    if let Some(v) = file_cfg.database_url {
        settings.database_url = v;
    }
    if let Some(v) = file_cfg.handshake_timeout_secs {
        settings.handshake_timeout = Duration::from_secs(v);
    }
    if let Some(v) = file_cfg.reconnect_delay_ms {
        settings.reconnect_delay = Duration::from_millis(v);
    }
    if let Some(v) = file_cfg.reconnect_delay_max_ms {
        settings.reconnect_delay_max = Duration::from_millis(v);
    }
    if let Some(v) = file_cfg.reconnect_attempts {
        settings.reconnect_attempts = v;
    }
    if let Some(v) = file_cfg.request_timeout_secs {
        settings.request_timeout = Duration::from_secs(v);
    }
    if let Some(v) = file_cfg.page_size {
        settings.page_size = v;
    }
    Ok(())
}

pub fn apply_env(settings: &mut ClientSettings, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("API_BASE_URL") {
        settings.api_base_url = v;
    }
    if let Some(v) = lookup("APP__API_BASE_URL") {
        settings.api_base_url = v;
    }
    if let Some(v) = lookup("APP__SOCKET_PATH") {
        settings.socket_path = v;
    }
    if let Some(v) = lookup("DATABASE_URL") {
        settings.database_url = v;
    }
    if let Some(v) = lookup("APP__DATABASE_URL") {
        settings.database_url = v;
    }

    if let Some(v) = lookup("APP__HANDSHAKE_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
        settings.handshake_timeout = Duration::from_secs(v);
    }
    if let Some(v) = lookup("APP__RECONNECT_DELAY_MS").and_then(|v| v.parse().ok()) {
        settings.reconnect_delay = Duration::from_millis(v);
    }
    if let Some(v) = lookup("APP__RECONNECT_DELAY_MAX_MS").and_then(|v| v.parse().ok()) {
        settings.reconnect_delay_max = Duration::from_millis(v);
    }
    if let Some(v) = lookup("APP__RECONNECT_ATTEMPTS").and_then(|v| v.parse().ok()) {
        settings.reconnect_attempts = v;
    }
    if let Some(v) = lookup("APP__REQUEST_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
        settings.request_timeout = Duration::from_secs(v);
    }
    if let Some(v) = lookup("APP__PAGE_SIZE").and_then(|v| v.parse().ok()) {
        settings.page_size = v;
    }
}

/// `http(s)://host` → `ws(s)://host<path>`.
pub fn socket_url(api_base_url: &str, socket_path: &str) -> Result<Url> {
    let base = api_base_url.trim_end_matches('/');
    let ws_base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        return Err(anyhow!(
            "api_base_url must start with http:// or https://, got '{api_base_url}'"
        ));
    };
    let path = if socket_path.starts_with('/') {
        socket_path.to_string()
    } else {
        format!("/{socket_path}")
    };
    Url::parse(&format!("{ws_base}{path}"))
        .with_context(|| format!("invalid socket url derived from '{api_base_url}'"))
}

pub fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return ClientSettings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite:") || raw_database_url.contains("://") {
        return raw_database_url.to_string();
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}

#[cfg(test)]
#[path = "tests/settings_tests.rs"]
mod tests;
