//! Configuration for the mock analysis service.

use std::path::Path;

use serde::{Deserialize, Serialize};

use vigil_core::AnalysisMode;

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MockConfig {
    /// Network settings.
    pub network: NetworkConfig,
    /// Synthetic analysis behavior.
    pub analysis: AnalysisConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address to bind the HTTP / WebSocket listener on.
    pub bind: String,
}

/// Synthetic analysis behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Mode active before any `/set-analysis` call.
    pub initial_mode: AnalysisMode,
    /// The auxiliary analyzer refreshes on every n-th frame and repeats its
    /// previous value in between.
    pub aux_every: u32,
    /// The detection flips between AUTHORIZED and DENIED every n frames.
    pub alternate_every: u32,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8000".into(),
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            initial_mode: AnalysisMode::None,
            aux_every: 5,
            alternate_every: 25,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl MockConfig {
    /// Load from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
