// =============================================================================
// Runtime Configuration — relay settings with atomic save
// =============================================================================
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash.  All fields carry `#[serde(default)]` so that adding new fields
// never breaks loading an older config file.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_signal_timeout_ms() -> u64 {
    120_000
}

fn default_sweep_interval_ms() -> u64 {
    5_000
}

// =============================================================================
// RuntimeConfig
// =============================================================================

/// Top-level runtime configuration for the signal relay.
///
/// Every field has a serde default so that older JSON files missing new fields
/// will still deserialise correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Address the HTTP/WebSocket server binds to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// A signal not refreshed by its producer within this window is evicted
    /// by the expiry sweeper.
    #[serde(default = "default_signal_timeout_ms")]
    pub signal_timeout_ms: u64,

    /// How often the expiry sweeper scans the registry.
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            signal_timeout_ms: default_signal_timeout_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(
            path = %path.display(),
            bind_addr = %config.bind_addr,
            signal_timeout_ms = config.signal_timeout_ms,
            sweep_interval_ms = config.sweep_interval_ms,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise runtime config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }

    /// Apply environment overrides on top of whatever was loaded.
    ///
    /// `PORT` is honored for hosting platforms that inject one; the RELAY_*
    /// variables take precedence over the config file.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(port) = std::env::var("PORT") {
            if let Ok(port) = port.parse::<u16>() {
                self.bind_addr = format!("0.0.0.0:{port}");
            }
        }
        if let Ok(addr) = std::env::var("RELAY_BIND_ADDR") {
            if !addr.trim().is_empty() {
                self.bind_addr = addr;
            }
        }
        if let Ok(ms) = std::env::var("RELAY_SIGNAL_TIMEOUT_MS") {
            if let Ok(ms) = ms.parse::<u64>() {
                self.signal_timeout_ms = ms;
            }
        }
        if let Ok(ms) = std::env::var("RELAY_SWEEP_INTERVAL_MS") {
            if let Ok(ms) = ms.parse::<u64>() {
                self.sweep_interval_ms = ms;
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.bind_addr, "0.0.0.0:8080");
        assert_eq!(cfg.signal_timeout_ms, 120_000);
        assert_eq!(cfg.sweep_interval_ms, 5_000);
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.bind_addr, "0.0.0.0:8080");
        assert_eq!(cfg.signal_timeout_ms, 120_000);
        assert_eq!(cfg.sweep_interval_ms, 5_000);
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "signal_timeout_ms": 60000 }"#;
        let cfg: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.signal_timeout_ms, 60_000);
        assert_eq!(cfg.sweep_interval_ms, 5_000);
        assert_eq!(cfg.bind_addr, "0.0.0.0:8080");
    }

    #[test]
    fn roundtrip_serialisation() {
        let cfg = RuntimeConfig {
            bind_addr: "127.0.0.1:9000".to_string(),
            signal_timeout_ms: 30_000,
            sweep_interval_ms: 1_000,
        };
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: RuntimeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.bind_addr, cfg2.bind_addr);
        assert_eq!(cfg.signal_timeout_ms, cfg2.signal_timeout_ms);
        assert_eq!(cfg.sweep_interval_ms, cfg2.sweep_interval_ms);
    }
}
