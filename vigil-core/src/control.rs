//! Analysis-mode control API.
//!
//! The service runs one auxiliary analysis at a time, selected out of band
//! with `POST <control_url>/set-analysis` and a body of
//! `{"type": "<mode>"}`. `ureq` is blocking, so requests run on the
//! blocking pool.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::VigilError;

/// Path of the mode-selection endpoint.
pub const SET_ANALYSIS_PATH: &str = "/set-analysis";

/// Which auxiliary analysis the service should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisMode {
    #[default]
    None,
    Emotion,
    Mask,
    People,
}

impl AnalysisMode {
    pub const ALL: [AnalysisMode; 4] = [Self::None, Self::Emotion, Self::Mask, Self::People];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Emotion => "emotion",
            Self::Mask => "mask",
            Self::People => "people",
        }
    }
}

impl fmt::Display for AnalysisMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisMode {
    type Err = VigilError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| VigilError::Control(format!("unknown analysis mode '{s}'")))
    }
}

/// Request body for [`SET_ANALYSIS_PATH`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetAnalysis {
    #[serde(rename = "type")]
    pub mode: AnalysisMode,
}

// ── AnalysisControl ──────────────────────────────────────────────

#[derive(Clone)]
pub struct AnalysisControl {
    base_url: String,
    agent: ureq::Agent,
}

impl AnalysisControl {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            agent,
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}{SET_ANALYSIS_PATH}", self.base_url)
    }

    /// Select the service's auxiliary analysis.
    pub async fn set_mode(&self, mode: AnalysisMode) -> Result<(), VigilError> {
        let url = self.endpoint();
        let agent = self.agent.clone();
        debug!(%url, %mode, "setting analysis mode");

        tokio::task::spawn_blocking(move || {
            agent
                .post(&url)
                .send_json(SetAnalysis { mode })
                .map(|_| ())
                .map_err(|e| VigilError::Control(format!("{url}: {e}")))
        })
        .await
        .map_err(|e| VigilError::Control(format!("control task failed: {e}")))??;

        info!(%mode, "analysis mode set");
        Ok(())
    }
}

impl fmt::Debug for AnalysisControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisControl")
            .field("base_url", &self.base_url)
            .finish()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn mode_names_round_trip() {
        for mode in AnalysisMode::ALL {
            assert_eq!(mode.as_str().parse::<AnalysisMode>().unwrap(), mode);
        }
        assert_eq!(" Emotion ".parse::<AnalysisMode>().unwrap(), AnalysisMode::Emotion);
        assert!("gait".parse::<AnalysisMode>().is_err());
    }

    #[test]
    fn request_body_uses_type_key() {
        let body = serde_json::to_string(&SetAnalysis {
            mode: AnalysisMode::Mask,
        })
        .unwrap();
        assert_eq!(body, r#"{"type":"mask"}"#);
    }

    #[test]
    fn endpoint_joins_cleanly() {
        let ctl = AnalysisControl::new("http://127.0.0.1:8000/", Duration::from_secs(1));
        assert_eq!(ctl.endpoint(), "http://127.0.0.1:8000/set-analysis");
    }

    #[tokio::test]
    async fn posts_mode_to_service() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let mut request = String::new();
            while !request.contains(r#"{"type":"people"}"#) {
                let n = sock.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.push_str(&String::from_utf8_lossy(&buf[..n]));
            }
            sock.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\n{}")
                .await
                .unwrap();
            request
        });

        let ctl = AnalysisControl::new(format!("http://{addr}"), Duration::from_secs(5));
        ctl.set_mode(AnalysisMode::People).await.unwrap();

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /set-analysis"));
        assert!(request.contains(r#"{"type":"people"}"#));
    }

    #[tokio::test]
    async fn unreachable_service_is_a_control_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let ctl = AnalysisControl::new(format!("http://{addr}"), Duration::from_secs(1));
        let err = ctl.set_mode(AnalysisMode::Emotion).await.unwrap_err();
        assert!(matches!(err, VigilError::Control(_)));
        assert!(!err.is_user_visible());
    }
}
