//! End-to-end: a real streaming session against the mock service.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use vigil_core::stream::link::Connector;
use vigil_core::stream::{FrameEncoder, SyntheticCamera, VIDEO_PATH};
use vigil_core::{
    AnalysisControl, AnalysisMode, CaptureHint, Resolution, SessionConfig, SessionNotice,
    StreamSession, SyntheticProvider, WebSocketConnector,
};
use vigil_mock::config::AnalysisConfig;
use vigil_mock::server::{AppState, serve};

// ── Helpers ──────────────────────────────────────────────────────

struct MockService {
    addr: String,
    state: AppState,
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<std::io::Result<()>>,
}

impl MockService {
    async fn start(analysis: AnalysisConfig) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let state = AppState::new(analysis);
        let (tx, rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(serve(listener, state.clone(), async {
            let _ = rx.await;
        }));
        Self {
            addr,
            state,
            shutdown: Some(tx),
            handle,
        }
    }

    fn video_url(&self) -> String {
        format!("ws://{}{VIDEO_PATH}", self.addr)
    }

    fn control(&self) -> AnalysisControl {
        AnalysisControl::new(format!("http://{}", self.addr), Duration::from_secs(5))
    }

    async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("mock service did not shut down")
            .unwrap()
            .unwrap();
    }
}

fn analysis(aux_every: u32) -> AnalysisConfig {
    AnalysisConfig {
        aux_every,
        ..AnalysisConfig::default()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_session_renders_mock_results() {
    let service = MockService::start(analysis(2)).await;
    service.control().set_mode(AnalysisMode::People).await.unwrap();
    assert_eq!(service.state.mode(), AnalysisMode::People);

    let config = SessionConfig {
        capture: CaptureHint {
            width: 160,
            height: 120,
            fps: 15,
        },
        ..SessionConfig::default()
    };
    let connector = Arc::new(WebSocketConnector::new(service.video_url(), Duration::from_secs(2)));
    let mut session = StreamSession::new(config, Arc::new(SyntheticProvider::default()), connector);
    let mut notices = session.subscribe();
    let mut overlay = session.overlay();

    assert_eq!(session.start().await.unwrap(), Resolution::new(160, 120));

    // Several results in a row keep the overlay painted.
    for _ in 0..3 {
        tokio::time::timeout(Duration::from_secs(5), overlay.changed())
            .await
            .expect("no overlay update")
            .unwrap();
        let surface = overlay.borrow_and_update();
        assert_eq!(surface.dimensions(), (160, 120));
        assert!(surface.pixels().any(|p| p.0[3] != 0));
    }

    session.stop().await;
    assert!(overlay.borrow().pixels().all(|p| p.0[3] == 0));

    let mut connected = false;
    while let Ok(notice) = notices.try_recv() {
        if notice == SessionNotice::Connected {
            connected = true;
        }
    }
    assert!(connected);
    service.stop().await;
}

#[tokio::test]
async fn test_undecodable_frame_is_skipped() {
    let service = MockService::start(analysis(1)).await;
    let connector = WebSocketConnector::new(service.video_url(), Duration::from_secs(2));
    let mut link = connector.connect().await.unwrap();

    let mut camera = SyntheticCamera::new(Resolution::new(48, 32), Duration::ZERO);
    let mut encoder = FrameEncoder::default();
    let frame = encoder.capture(&mut camera, Resolution::new(48, 32)).unwrap();

    link.send("data:image/jpeg;base64,@@@@".into()).unwrap();
    link.send(frame.payload).unwrap();

    let reply = tokio::time::timeout(Duration::from_secs(5), link.recv())
        .await
        .expect("no reply")
        .expect("link closed");
    let value: serde_json::Value = serde_json::from_str(&reply).unwrap();
    assert_eq!(value["face_results"][0]["location"], serde_json::json!([11, 29, 21, 19]));
    assert_eq!(value["vision_results"], serde_json::json!({}));

    link.close();
    service.stop().await;
}

#[tokio::test]
async fn test_set_analysis_switches_mode() {
    let service = MockService::start(AnalysisConfig::default()).await;
    assert_eq!(service.state.mode(), AnalysisMode::None);

    let control = service.control();
    control.set_mode(AnalysisMode::Emotion).await.unwrap();
    assert_eq!(service.state.mode(), AnalysisMode::Emotion);
    control.set_mode(AnalysisMode::None).await.unwrap();
    assert_eq!(service.state.mode(), AnalysisMode::None);

    drop(control);
    service.stop().await;
}
