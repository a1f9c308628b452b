//! Vigil mock analysis service: entry point.
//!
//! ```text
//! vigil-mock                   Serve on the configured address
//! vigil-mock --bind <addr>    Override the bind address
//! vigil-mock --config <path>  Load a custom config TOML
//! vigil-mock --gen-config     Write default config to stdout
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use vigil_mock::config::MockConfig;
use vigil_mock::server::{AppState, serve};

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "vigil-mock", about = "Stand-in analysis service for vigil clients")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "vigil-mock.toml")]
    config: PathBuf,

    /// Bind address (overrides config). Example: 0.0.0.0:8000
    #[arg(short, long)]
    bind: Option<String>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        let text = toml::to_string_pretty(&MockConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let mut config = MockConfig::load(&cli.config);
    if let Some(bind) = cli.bind {
        config.network.bind = bind;
    }

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("vigil-mock v{}", env!("CARGO_PKG_VERSION"));
    info!("initial analysis mode: {}", config.analysis.initial_mode);
    info!("auxiliary cadence: every {} frames", config.analysis.aux_every);

    let listener = TcpListener::bind(&config.network.bind).await?;
    let state = AppState::new(config.analysis.clone());

    serve(listener, state, async {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down");
    })
    .await?;

    Ok(())
}
