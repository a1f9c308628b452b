//! Connection manager: one logical transport session with reconnects.
//!
//! Transport callbacks (handshake finished, message, close) are not ad hoc
//! closures here. They are [`Trigger`]s awaited by [`next_event`] and
//! applied to the [`ConnectionState`] machine, so every side effect is a
//! transition.
//!
//! [`next_event`]: ConnectionManager::next_event

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::VigilError;
use crate::state::connection::{BackoffPolicy, ConnectionPhase, ConnectionState, RetryDecision};
use crate::stream::link::{Connector, Link};

// ── FrameSink ────────────────────────────────────────────────────

/// Where the frame scheduler hands encoded frames.
pub trait FrameSink {
    /// Whether the transport is open.
    fn is_ready(&self) -> bool;

    /// Offer a payload. Returns `true` if it was accepted for
    /// transmission, `false` if it was dropped.
    fn send(&mut self, payload: String) -> bool;
}

// ── ConnectionEvent ──────────────────────────────────────────────

/// What the session needs to know about the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Handshake completed.
    Opened,
    /// A message arrived, forwarded verbatim.
    Message(String),
    /// The transport closed; attempt number `attempt` will start after
    /// `delay`.
    Reconnecting { attempt: u32, delay: Duration },
    /// The reconnect budget is exhausted.
    Abandoned { attempts: u32 },
}

/// Raw wake-up reasons, before they are applied to the state machine.
#[derive(Debug)]
enum Trigger {
    Handshake(Result<Link, VigilError>),
    Inbound(Option<String>),
    RetryDue,
}

// ── ConnectionManager ────────────────────────────────────────────

pub struct ConnectionManager {
    state: ConnectionState,
    policy: BackoffPolicy,
    connector: Arc<dyn Connector>,
    handshake: Option<JoinHandle<Result<Link, VigilError>>>,
    link: Option<Link>,
    retry_at: Option<Instant>,
    frames_dropped: u64,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>, policy: BackoffPolicy) -> Self {
        Self {
            state: ConnectionState::new(),
            policy,
            connector,
            handshake: None,
            link: None,
            retry_at: None,
            frames_dropped: 0,
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.state.phase()
    }

    pub fn is_open(&self) -> bool {
        self.state.is_open() && self.link.is_some()
    }

    /// When the pending reconnect fires, if one is scheduled.
    pub fn retry_at(&self) -> Option<Instant> {
        self.retry_at
    }

    /// Frames refused by [`send`](FrameSink::send) since construction.
    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped
    }

    /// `Idle → Connecting`: start the first handshake.
    pub fn open(&mut self) -> Result<(), VigilError> {
        self.state.begin_connect()?;
        self.spawn_handshake();
        Ok(())
    }

    /// Any state `→ Idle`: cancel the reconnect timer, abort an in-flight
    /// handshake, close the live transport.
    pub fn stop(&mut self) {
        if let Some(handshake) = self.handshake.take() {
            handshake.abort();
        }
        if let Some(link) = self.link.take() {
            link.close();
        }
        self.retry_at = None;
        if self.state.phase() != ConnectionPhase::Idle {
            debug!(phase = %self.state.phase(), "connection stopped");
        }
        self.state.reset();
    }

    /// Wait for the next transport event that the session must act on.
    ///
    /// Cancel-safe: it may be dropped from a `select!` at any await point
    /// without losing a transition.
    pub async fn next_event(&mut self) -> ConnectionEvent {
        loop {
            let trigger = self.wait_trigger().await;
            if let Some(event) = self.apply(trigger) {
                return event;
            }
        }
    }

    async fn wait_trigger(&mut self) -> Trigger {
        if let Some(handshake) = self.handshake.as_mut() {
            let outcome = match handshake.await {
                Ok(result) => result,
                Err(e) => Err(VigilError::Transport(format!("handshake task failed: {e}"))),
            };
            self.handshake = None;
            return Trigger::Handshake(outcome);
        }
        if let Some(link) = self.link.as_mut() {
            return Trigger::Inbound(link.recv().await);
        }
        if let Some(at) = self.retry_at {
            tokio::time::sleep_until(at).await;
            return Trigger::RetryDue;
        }
        std::future::pending().await
    }

    fn apply(&mut self, trigger: Trigger) -> Option<ConnectionEvent> {
        match trigger {
            Trigger::Handshake(Ok(link)) => match self.state.opened() {
                Ok(()) => {
                    self.retry_at = None;
                    self.link = Some(link);
                    info!("transport open");
                    Some(ConnectionEvent::Opened)
                }
                Err(e) => {
                    debug!(error = %e, "discarding stale handshake");
                    None
                }
            },
            Trigger::Handshake(Err(e)) => {
                warn!(error = %e, attempt = self.state.attempt_count(), "connect failed");
                self.on_closed()
            }
            Trigger::Inbound(Some(text)) => Some(ConnectionEvent::Message(text)),
            Trigger::Inbound(None) => {
                self.link = None;
                info!("transport closed");
                self.on_closed()
            }
            Trigger::RetryDue => {
                self.retry_at = None;
                match self.state.retry() {
                    Ok(attempt) => {
                        info!(attempt, "reconnecting");
                        self.spawn_handshake();
                    }
                    Err(e) => debug!(error = %e, "ignoring stale retry timer"),
                }
                None
            }
        }
    }

    fn on_closed(&mut self) -> Option<ConnectionEvent> {
        if let Err(e) = self.state.closed() {
            debug!(error = %e, "close in unexpected phase");
            return None;
        }
        match self.state.schedule_retry(&self.policy) {
            Ok(RetryDecision::Retry { delay }) => {
                self.retry_at = Some(Instant::now() + delay);
                let attempt = self.state.attempt_count() + 1;
                info!(attempt, delay_ms = delay.as_millis() as u64, "reconnect scheduled");
                Some(ConnectionEvent::Reconnecting { attempt, delay })
            }
            Ok(RetryDecision::Abandon { attempts }) => {
                warn!(attempts, "reconnect budget exhausted");
                Some(ConnectionEvent::Abandoned { attempts })
            }
            Err(e) => {
                debug!(error = %e, "cannot schedule retry");
                None
            }
        }
    }

    fn spawn_handshake(&mut self) {
        let connector = Arc::clone(&self.connector);
        self.handshake = Some(tokio::spawn(async move { connector.connect().await }));
    }
}

impl FrameSink for ConnectionManager {
    fn is_ready(&self) -> bool {
        self.is_open()
    }

    /// Drop-newest backpressure: the frame is discarded unless the
    /// transport is open with nothing outstanding.
    fn send(&mut self, payload: String) -> bool {
        let Some(link) = self.link.as_ref().filter(|_| self.state.is_open()) else {
            self.frames_dropped += 1;
            return false;
        };
        let pending = link.pending_bytes();
        if pending > 0 {
            debug!(pending, "transport congested, dropping frame");
            self.frames_dropped += 1;
            return false;
        }
        match link.send(payload) {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "frame send failed");
                self.frames_dropped += 1;
                false
            }
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.stop();
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::testing::ScriptedConnector;

    fn manager(connector: &Arc<ScriptedConnector>) -> ConnectionManager {
        ConnectionManager::new(connector.clone(), BackoffPolicy::default())
    }

    #[tokio::test(start_paused = true)]
    async fn open_then_message_then_close_schedules_retry() {
        let connector = Arc::new(ScriptedConnector::always_accept());
        let mut mgr = manager(&connector);
        mgr.open().unwrap();

        assert_eq!(mgr.next_event().await, ConnectionEvent::Opened);
        assert!(mgr.is_open());

        let driver = connector.take_driver().unwrap();
        driver.inbound.send("{\"face_results\":[]}".into()).await.unwrap();
        assert_eq!(
            mgr.next_event().await,
            ConnectionEvent::Message("{\"face_results\":[]}".into())
        );

        drop(driver);
        assert_eq!(
            mgr.next_event().await,
            ConnectionEvent::Reconnecting {
                attempt: 1,
                delay: Duration::from_millis(1000)
            }
        );
        assert_eq!(mgr.phase(), ConnectionPhase::Reconnecting);
        assert!(!mgr.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_delays_then_abandon() {
        let connector = Arc::new(ScriptedConnector::always_refuse());
        let mut mgr = manager(&connector);
        mgr.open().unwrap();

        let mut delays = Vec::new();
        let started = Instant::now();
        loop {
            match mgr.next_event().await {
                ConnectionEvent::Reconnecting { delay, .. } => {
                    delays.push(delay.as_millis() as u64)
                }
                ConnectionEvent::Abandoned { attempts } => {
                    assert_eq!(attempts, 5);
                    break;
                }
                other => panic!("unexpected event {other:?}"),
            }
        }

        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 10_000]);
        assert_eq!(mgr.phase(), ConnectionPhase::Abandoned);
        assert!(mgr.retry_at().is_none());
        assert_eq!(connector.attempts(), 6);
        assert!(started.elapsed() >= Duration::from_millis(25_000));
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_success_resets_attempts() {
        let connector = Arc::new(ScriptedConnector::refuse_then_accept(2));
        let mut mgr = manager(&connector);
        mgr.open().unwrap();

        assert!(matches!(mgr.next_event().await, ConnectionEvent::Reconnecting { attempt: 1, .. }));
        assert!(matches!(mgr.next_event().await, ConnectionEvent::Reconnecting { attempt: 2, .. }));
        assert_eq!(mgr.next_event().await, ConnectionEvent::Opened);
        assert_eq!(mgr.state().attempt_count(), 0);
        assert!(mgr.retry_at().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn send_requires_open_and_uncongested() {
        let connector = Arc::new(ScriptedConnector::always_accept());
        let mut mgr = manager(&connector);
        assert!(!mgr.send("early".into()));

        mgr.open().unwrap();
        assert!(!mgr.send("connecting".into()));
        assert_eq!(mgr.next_event().await, ConnectionEvent::Opened);

        assert!(mgr.send("one".into()));
        // Nothing drained the first frame: congested.
        assert!(!mgr.send("two".into()));

        let mut driver = connector.take_driver().unwrap();
        let first = driver.outbound.recv().await.unwrap();
        assert_eq!(first, "one");
        driver.acknowledge(first.len());
        assert!(mgr.send("three".into()));
        assert_eq!(mgr.frames_dropped(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_pending_retry_and_resets() {
        let connector = Arc::new(ScriptedConnector::always_refuse());
        let mut mgr = manager(&connector);
        mgr.open().unwrap();
        assert!(matches!(mgr.next_event().await, ConnectionEvent::Reconnecting { .. }));
        assert!(mgr.retry_at().is_some());

        mgr.stop();
        assert_eq!(mgr.phase(), ConnectionPhase::Idle);
        assert_eq!(mgr.state().attempt_count(), 0);
        assert!(mgr.retry_at().is_none());

        // No stale timer fires after stop.
        let waited = tokio::time::timeout(Duration::from_secs(60), mgr.next_event()).await;
        assert!(waited.is_err());
        assert_eq!(connector.attempts(), 1);

        // A fresh open behaves like the first one.
        mgr.open().unwrap();
        assert_eq!(
            mgr.next_event().await,
            ConnectionEvent::Reconnecting {
                attempt: 1,
                delay: Duration::from_millis(1000)
            }
        );
    }

    #[test]
    fn idle_manager_yields_no_events() {
        let connector = Arc::new(ScriptedConnector::always_accept());
        let mut mgr = manager(&connector);
        let mut next = tokio_test::task::spawn(mgr.next_event());
        tokio_test::assert_pending!(next.poll());
        tokio_test::assert_pending!(next.poll());
        drop(next);
        assert_eq!(connector.attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_closes_live_transport() {
        let connector = Arc::new(ScriptedConnector::always_accept());
        let mut mgr = manager(&connector);
        mgr.open().unwrap();
        assert_eq!(mgr.next_event().await, ConnectionEvent::Opened);

        let driver = connector.take_driver().unwrap();
        let token = driver.shutdown();
        mgr.stop();
        assert!(token.is_cancelled());
        assert!(!mgr.is_open());
    }
}
