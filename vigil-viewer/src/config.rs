//! Viewer configuration.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use vigil_core::stream::{DeviceProvider, VIDEO_PATH};
use vigil_core::{
    AnalysisMode, BackoffPolicy, CaptureHint, ImageDirectoryProvider, MergePolicy, Resolution,
    SessionConfig, SyntheticProvider,
};

/// Top-level configuration for the viewer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    /// Analysis service endpoints.
    pub network: NetworkConfig,
    /// Capture source.
    pub capture: CaptureConfig,
    /// Frame pacing and encoding.
    pub stream: StreamConfig,
    /// Reconnect policy.
    pub reconnect: ReconnectConfig,
    /// Overlay rendering and output.
    pub overlay: OverlayConfig,
    /// Auxiliary analysis selection.
    pub analysis: AnalysisConfig,
    /// Logging.
    pub logging: LoggingConfig,
}

/// Network settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// WebSocket video endpoint.
    pub endpoint: String,
    /// Base URL of the control API.
    pub control_url: String,
    /// Handshake / request timeout in milliseconds.
    pub timeout_ms: u64,
}

/// Which capture source to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureSource {
    Synthetic,
    Directory,
}

/// Capture settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub source: CaptureSource,
    /// Image directory when `source = "directory"`.
    pub directory: PathBuf,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Simulated metadata warm-up for the synthetic source.
    pub warmup_ms: u64,
    /// How long to wait for the device to report its resolution.
    pub ready_timeout_ms: u64,
}

/// Frame pacing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Minimum spacing between frames.
    pub frame_interval_ms: u64,
    /// JPEG quality, 1-100.
    pub jpeg_quality: u8,
    /// Heartbeat rate.
    pub refresh_hz: u32,
}

/// Reconnect backoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub base_delay_ms: u64,
    pub cap_delay_ms: u64,
    pub max_attempts: u32,
}

/// Overlay settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    pub merge_policy: MergePolicy,
    /// Viewport override; 0 follows the video resolution.
    pub viewport_width: u32,
    pub viewport_height: u32,
    /// PNG the overlay is written to. Empty disables output.
    pub output: PathBuf,
    /// Minimum spacing between PNG writes.
    pub write_interval_ms: u64,
}

/// Analysis selection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub mode: AnalysisMode,
}

/// Logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level.
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            endpoint: format!("ws://127.0.0.1:8000{VIDEO_PATH}"),
            control_url: "http://127.0.0.1:8000".into(),
            timeout_ms: 5000,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        let hint = CaptureHint::default();
        Self {
            source: CaptureSource::Synthetic,
            directory: PathBuf::from("frames"),
            width: hint.width,
            height: hint.height,
            fps: hint.fps,
            warmup_ms: 300,
            ready_timeout_ms: 10_000,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            frame_interval_ms: 200,
            jpeg_quality: 60,
            refresh_hz: 60,
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        let policy = BackoffPolicy::default();
        Self {
            base_delay_ms: policy.base_delay.as_millis() as u64,
            cap_delay_ms: policy.cap_delay.as_millis() as u64,
            max_attempts: policy.max_attempts,
        }
    }
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            merge_policy: MergePolicy::StickyAuxiliary,
            viewport_width: 0,
            viewport_height: 0,
            output: PathBuf::from("vigil-overlay.png"),
            write_interval_ms: 500,
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

impl ViewerConfig {
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

    /// Write default config to a file.
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(&Self::default()).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.network.timeout_ms)
    }

    /// Core session policy derived from this file.
    pub fn to_session_config(&self) -> SessionConfig {
        let viewport = Resolution::new(self.overlay.viewport_width, self.overlay.viewport_height);
        SessionConfig {
            capture: CaptureHint {
                width: self.capture.width,
                height: self.capture.height,
                fps: self.capture.fps,
            },
            frame_interval: Duration::from_millis(self.stream.frame_interval_ms),
            jpeg_quality: self.stream.jpeg_quality,
            refresh_interval: Duration::from_secs(1) / self.stream.refresh_hz.max(1),
            backoff: BackoffPolicy {
                base_delay: Duration::from_millis(self.reconnect.base_delay_ms),
                cap_delay: Duration::from_millis(self.reconnect.cap_delay_ms),
                max_attempts: self.reconnect.max_attempts,
            },
            merge_policy: self.overlay.merge_policy,
            viewport: viewport.is_usable().then_some(viewport),
            ready_timeout: Duration::from_millis(self.capture.ready_timeout_ms),
            ..SessionConfig::default()
        }
    }

    /// The configured capture source.
    pub fn device_provider(&self) -> Arc<dyn DeviceProvider> {
        match self.capture.source {
            CaptureSource::Synthetic => Arc::new(SyntheticProvider {
                warmup: Duration::from_millis(self.capture.warmup_ms),
            }),
            CaptureSource::Directory => {
                Arc::new(ImageDirectoryProvider::new(self.capture.directory.clone()))
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
