//! Persistent player settings (JSON file in the user data directory).
//!
//! Precedence, lowest first: built-in defaults, the settings file,
//! `PCMSTREAM_*` environment variables, command-line flags.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use pcmstream_core::{EngineConfig, HttpSourceConfig, RequestMethod};
use serde::{Deserialize, Serialize};

const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8080/ajax?option=14";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    pub server_url: String,
    pub request_method: RequestMethod,
    pub sample_rate: u32,
    pub backlog_threshold: usize,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub fetch_timeout_ms: u64,
    pub preferred_output_device: Option<String>,
}

impl Default for AppSettings {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            server_url: DEFAULT_SERVER_URL.into(),
            request_method: RequestMethod::Post,
            sample_rate: engine.sample_rate,
            backlog_threshold: engine.backlog_threshold,
            retry_base_delay_ms: engine.retry_base_delay_ms,
            retry_max_delay_ms: engine.retry_max_delay_ms,
            fetch_timeout_ms: HttpSourceConfig::default().timeout.as_millis() as u64,
            preferred_output_device: None,
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        self.server_url = normalize_server_url(&self.server_url);
        self.sample_rate = self.sample_rate.clamp(8_000, 192_000);
        self.backlog_threshold = self.backlog_threshold.clamp(1, 1_000);
        self.retry_base_delay_ms = self.retry_base_delay_ms.clamp(10, 10_000);
        self.retry_max_delay_ms = self
            .retry_max_delay_ms
            .clamp(self.retry_base_delay_ms, 60_000);
        self.fetch_timeout_ms = self.fetch_timeout_ms.clamp(100, 60_000);
        self.preferred_output_device = self
            .preferred_output_device
            .as_ref()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
    }

    /// Apply `PCMSTREAM_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from `lookup`; unparsable values are ignored.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("PCMSTREAM_URL") {
            self.server_url = url;
        }
        if let Some(method) = lookup("PCMSTREAM_METHOD").and_then(|m| parse_request_method(&m)) {
            self.request_method = method;
        }
        if let Some(rate) = lookup("PCMSTREAM_SAMPLE_RATE").and_then(|v| v.parse().ok()) {
            self.sample_rate = rate;
        }
        if let Some(backlog) = lookup("PCMSTREAM_BACKLOG").and_then(|v| v.parse().ok()) {
            self.backlog_threshold = backlog;
        }
        if let Some(timeout) = lookup("PCMSTREAM_FETCH_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.fetch_timeout_ms = timeout;
        }
        if let Some(device) = lookup("PCMSTREAM_OUTPUT_DEVICE") {
            self.preferred_output_device = Some(device);
        }
        self.normalize();
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            sample_rate: self.sample_rate,
            backlog_threshold: self.backlog_threshold,
            retry_base_delay_ms: self.retry_base_delay_ms,
            retry_max_delay_ms: self.retry_max_delay_ms,
            ..EngineConfig::default()
        }
    }

    pub fn http_source_config(&self) -> HttpSourceConfig {
        HttpSourceConfig {
            url: self.server_url.clone(),
            method: self.request_method,
            timeout: Duration::from_millis(self.fetch_timeout_ms),
        }
    }
}

pub fn normalize_server_url(raw: &str) -> String {
    let url = raw.trim();
    if url.is_empty() {
        DEFAULT_SERVER_URL.into()
    } else if url.contains("://") {
        url.into()
    } else {
        format!("http://{url}")
    }
}

pub fn parse_request_method(raw: &str) -> Option<RequestMethod> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "get" => Some(RequestMethod::Get),
        "post" => Some(RequestMethod::Post),
        _ => None,
    }
}

pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pcmstream")
            .join("settings.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".config")
            })
            .join("pcmstream")
            .join("settings.json")
    }
}

/// Missing or unreadable files yield defaults.
pub fn load_settings(path: &Path) -> AppSettings {
    let mut settings = fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<AppSettings>(&raw).ok())
        .unwrap_or_default();
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}
