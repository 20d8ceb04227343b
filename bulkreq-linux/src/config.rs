//! Load config from file and environment.

use serde::Deserialize;
use std::path::PathBuf;

use bulkreq_core::{EngineConfig, RequestDescriptor};

/// Host configuration. File: $BULKREQ_CONFIG, ~/.config/bulkreq/config.toml or /etc/bulkreq/config.toml.
/// Env overrides: BULKREQ_MODEM_ADDR, BULKREQ_PAYLOAD_LEN, BULKREQ_CHUNK_SIZE, BULKREQ_SEND_SLOTS.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Modem link address (default 127.0.0.1:45680).
    #[serde(default = "default_modem_addr")]
    pub modem_addr: String,
    /// Size of the outgoing test payload (default 32768).
    #[serde(default = "default_payload_len")]
    pub payload_len: usize,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub request: RequestDescriptor,
}

fn default_modem_addr() -> String {
    "127.0.0.1:45680".to_string()
}
fn default_payload_len() -> usize {
    32 * 1024
}

impl Default for Config {
    fn default() -> Self {
        Self {
            modem_addr: default_modem_addr(),
            payload_len: default_payload_len(),
            engine: EngineConfig::default(),
            request: RequestDescriptor::default(),
        }
    }
}

/// Load config: default, then config file (if present), then env vars.
pub fn load() -> Config {
    let mut c = load_file().unwrap_or_default();
    apply_overrides(&mut c, |key| std::env::var(key).ok());
    c
}

fn apply_overrides(c: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(s) = var("BULKREQ_MODEM_ADDR") {
        c.modem_addr = s;
    }
    if let Some(n) = var("BULKREQ_PAYLOAD_LEN").and_then(|s| s.parse().ok()) {
        c.payload_len = n;
    }
    if let Some(n) = var("BULKREQ_CHUNK_SIZE").and_then(|s| s.parse().ok()) {
        c.engine.chunk_size = n;
    }
    if let Some(n) = var("BULKREQ_SEND_SLOTS").and_then(|s| s.parse().ok()) {
        c.engine.send_slots = n;
    }
}

fn config_paths() -> Vec<PathBuf> {
    let mut out = Vec::new();
    if let Some(p) = std::env::var_os("BULKREQ_CONFIG") {
        out.push(PathBuf::from(p));
    }
    if let Some(h) = std::env::var_os("HOME").map(PathBuf::from) {
        out.push(h.join(".config/bulkreq/config.toml"));
    }
    out.push(PathBuf::from("/etc/bulkreq/config.toml"));
    out
}

fn load_file() -> Option<Config> {
    let path = config_paths().into_iter().find(|p| p.exists())?;
    let text = match std::fs::read_to_string(&path) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to read config, using defaults");
            return None;
        }
    };
    match toml::from_str::<Config>(&text) {
        Ok(c) => {
            tracing::info!(path = %path.display(), "loaded config");
            Some(c)
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to parse config, using defaults");
            None
        }
    }
}
