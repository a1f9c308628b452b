//! HTTP / WebSocket front end.

use std::future::Future;
use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use vigil_core::control::{SET_ANALYSIS_PATH, SetAnalysis};
use vigil_core::stream::{VIDEO_PATH, decode_payload};
use vigil_core::AnalysisMode;

use crate::analysis::FakeAnalyzer;
use crate::config::AnalysisConfig;

// ── AppState ─────────────────────────────────────────────────────

/// Shared across all connections.
#[derive(Clone)]
pub struct AppState {
    mode: Arc<watch::Sender<AnalysisMode>>,
    analysis: AnalysisConfig,
}

impl AppState {
    pub fn new(analysis: AnalysisConfig) -> Self {
        let (mode, _) = watch::channel(analysis.initial_mode);
        Self {
            mode: Arc::new(mode),
            analysis,
        }
    }

    pub fn mode(&self) -> AnalysisMode {
        *self.mode.borrow()
    }
}

// ── Router ───────────────────────────────────────────────────────

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route(VIDEO_PATH, get(video_upgrade))
        .route(SET_ANALYSIS_PATH, post(set_analysis))
        .with_state(state)
}

/// Serve on `listener` until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    info!(%addr, "analysis service listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn set_analysis(
    State(state): State<AppState>,
    Json(body): Json<SetAnalysis>,
) -> impl IntoResponse {
    state.mode.send_replace(body.mode);
    info!(mode = %body.mode, "analysis type set");
    Json(json!({
        "status": "success",
        "type": body.mode,
        "message": format!("Analysis type set to: {}", body.mode),
    }))
}

async fn video_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| video_session(socket, state))
}

/// One client connection: decode, analyze, reply, in arrival order.
async fn video_session(mut socket: WebSocket, state: AppState) {
    let mut analyzer = FakeAnalyzer::new(state.analysis.aux_every, state.analysis.alternate_every);
    info!("video client connected");

    while let Some(msg) = socket.recv().await {
        let payload = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                warn!(error = %e, "websocket receive failed");
                break;
            }
        };

        let image = match decode_payload(&payload) {
            Ok(image) => image,
            Err(e) => {
                warn!(error = %e, "skipping undecodable frame");
                continue;
            }
        };

        let reply = analyzer.analyze(&image, state.mode());
        debug!(frame = analyzer.frames(), "frame analyzed");
        if socket.send(Message::Text(reply.to_string())).await.is_err() {
            break;
        }
    }

    info!(frames = analyzer.frames(), "video client disconnected");
}
