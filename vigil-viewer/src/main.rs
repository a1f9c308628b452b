//! Vigil viewer: entry point.
//!
//! ```text
//! vigil-viewer                        Stream with defaults
//! vigil-viewer --config <path>       Use custom config TOML
//! vigil-viewer --mode emotion        Select the auxiliary analysis
//! vigil-viewer --images <dir>        Loop still images instead of the test pattern
//! vigil-viewer --gen-config          Dump default config and exit
//! vigil-viewer --init-config         Write default config to --config and exit
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use vigil_core::{
    AnalysisControl, AnalysisMode, SessionNotice, StreamSession, VigilError, WebSocketConnector,
};
use vigil_viewer::config::{CaptureSource, ViewerConfig};
use vigil_viewer::display::DisplaySink;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "vigil-viewer", about = "Stream a camera to the analysis service")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "vigil-viewer.toml")]
    config: PathBuf,

    /// WebSocket endpoint (overrides config). Example: ws://10.0.0.5:8000/ws/video
    #[arg(short, long)]
    endpoint: Option<String>,

    /// Auxiliary analysis: none, emotion, mask, people.
    #[arg(short, long)]
    mode: Option<AnalysisMode>,

    /// Stream images from this directory instead of the test pattern.
    #[arg(long)]
    images: Option<PathBuf>,

    /// Stop after this many seconds.
    #[arg(long)]
    duration: Option<u64>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    /// Write the default configuration to the `--config` path and exit.
    #[arg(long)]
    init_config: bool,
}

/// Operator-facing alert for the failures that must not stay in the log.
fn alert(err: &VigilError) {
    error!(error = %err, "ALERT");
    eprintln!("\n*** {err} ***\n");
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&ViewerConfig::default())?;
        println!("{text}");
        return Ok(());
    }
    if cli.init_config {
        ViewerConfig::write_default(&cli.config)?;
        println!("wrote {}", cli.config.display());
        return Ok(());
    }

    let mut config = ViewerConfig::load(&cli.config);
    if let Some(endpoint) = cli.endpoint {
        config.network.endpoint = endpoint;
    }
    if let Some(mode) = cli.mode {
        config.analysis.mode = mode;
    }
    if let Some(dir) = cli.images {
        config.capture.source = CaptureSource::Directory;
        config.capture.directory = dir;
    }

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("vigil-viewer v{}", env!("CARGO_PKG_VERSION"));

    // ── 1. Analysis mode ────────────────────────────────────────

    let control = AnalysisControl::new(config.network.control_url.clone(), config.timeout());
    if let Err(e) = control.set_mode(config.analysis.mode).await {
        warn!(error = %e, mode = %config.analysis.mode, "could not set analysis mode");
    }

    // ── 2. Session ──────────────────────────────────────────────

    let connector = Arc::new(WebSocketConnector::new(
        config.network.endpoint.clone(),
        config.timeout(),
    ));
    let mut session = StreamSession::new(
        config.to_session_config(),
        config.device_provider(),
        connector,
    );
    let mut notices = session.subscribe();

    let sink = (!config.overlay.output.as_os_str().is_empty()).then(|| {
        DisplaySink::new(
            config.overlay.output.clone(),
            Duration::from_millis(config.overlay.write_interval_ms),
        )
        .spawn(session.overlay())
    });

    match session.start().await {
        Ok(resolution) => info!(%resolution, endpoint = %config.network.endpoint, "streaming"),
        Err(e) => {
            if e.is_user_visible() {
                alert(&e);
            }
            return Err(e.into());
        }
    }

    // ── 3. Run until stopped ────────────────────────────────────

    let deadline = async {
        match cli.duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received");
                break;
            }
            _ = &mut deadline => {
                info!("run duration elapsed");
                break;
            }
            notice = notices.recv() => match notice {
                Ok(SessionNotice::ConnectionLost { attempts }) => {
                    alert(&VigilError::PermanentDisconnect { attempts });
                    break;
                }
                Ok(SessionNotice::Reconnecting { attempt, delay }) => {
                    warn!(attempt, delay_ms = delay.as_millis() as u64, "connection dropped, retrying");
                }
                Ok(SessionNotice::Connected) => info!("connected to analysis service"),
                Ok(SessionNotice::Stopped { frames_sent, frames_dropped }) => {
                    info!(frames_sent, frames_dropped, "session ended");
                    break;
                }
                Ok(SessionNotice::Started { .. }) => {}
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "notice stream lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    }

    // ── 4. Shutdown ─────────────────────────────────────────────

    info!("shutting down");
    session.stop().await;
    drop(session);
    if let Some(sink) = sink {
        match sink.await {
            Ok(writes) => info!(writes, path = %config.overlay.output.display(), "overlay output closed"),
            Err(e) => warn!(error = %e, "display sink task failed"),
        }
    }

    Ok(())
}
