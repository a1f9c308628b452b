//! Transport session state machine.
//!
//! Models the lifecycle of one logical connection to the analysis
//! service, with validated transitions that return `Result` instead of
//! panicking, and the exponential backoff policy that drives reconnects.

use std::time::Duration;

use tokio::time::Instant;

use crate::error::VigilError;

// ── BackoffPolicy ────────────────────────────────────────────────

/// Reconnect timing: `delay(n) = min(base * 2^n, cap)`, at most
/// `max_attempts` reconnects before giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub cap_delay: Duration,
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            cap_delay: Duration::from_millis(10_000),
            max_attempts: 5,
        }
    }
}

impl BackoffPolicy {
    /// Delay before reconnect attempt number `attempt` (zero-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.cap_delay)
    }
}

// ── ConnectionPhase ──────────────────────────────────────────────

/// The current phase of the transport session.
///
/// ```text
///  Idle ──► Connecting ──► Open
///   ▲           │  ▲         │
///   │           ▼  │         ▼
///   │         Closed ◄───────┘
///   │           │
///   │           ├──► Reconnecting ──► Connecting
///   │           └──► Abandoned (terminal)
///   └────────── any (explicit stop)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionPhase {
    /// No session. Initial state and the state after an explicit stop.
    #[default]
    Idle,
    /// A handshake is in flight.
    Connecting,
    /// Handshake complete; frames may be sent.
    Open,
    /// The transport errored or the remote closed it.
    Closed,
    /// Waiting for the backoff timer before the next attempt.
    Reconnecting,
    /// Reconnect budget exhausted. Terminal.
    Abandoned,
}

impl std::fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Open => write!(f, "Open"),
            Self::Closed => write!(f, "Closed"),
            Self::Reconnecting => write!(f, "Reconnecting"),
            Self::Abandoned => write!(f, "Abandoned"),
        }
    }
}

// ── RetryDecision ────────────────────────────────────────────────

/// What to do after the transport closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait `delay`, then attempt again.
    Retry { delay: Duration },
    /// Give up; the session must be torn down.
    Abandon { attempts: u32 },
}

// ── ConnectionState ──────────────────────────────────────────────

/// Phase plus the bookkeeping that drives backoff scheduling.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionState {
    phase: ConnectionPhase,
    attempt_count: u32,
    last_opened_at: Option<Instant>,
}

impl ConnectionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    /// Reconnect attempts made since the last successful handshake.
    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// When the transport last reached `Open`.
    pub fn last_opened_at(&self) -> Option<Instant> {
        self.last_opened_at
    }

    pub fn is_open(&self) -> bool {
        self.phase == ConnectionPhase::Open
    }

    // ── Transitions ──────────────────────────────────────────────

    /// `Idle → Connecting` on session start.
    pub fn begin_connect(&mut self) -> Result<(), VigilError> {
        match self.phase {
            ConnectionPhase::Idle => {
                self.phase = ConnectionPhase::Connecting;
                Ok(())
            }
            _ => Err(VigilError::InvalidTransition(
                "cannot connect: not in Idle state",
            )),
        }
    }

    /// `Connecting → Open`. Resets the attempt counter.
    pub fn opened(&mut self) -> Result<(), VigilError> {
        match self.phase {
            ConnectionPhase::Connecting => {
                self.phase = ConnectionPhase::Open;
                self.attempt_count = 0;
                self.last_opened_at = Some(Instant::now());
                Ok(())
            }
            _ => Err(VigilError::InvalidTransition(
                "cannot open: not in Connecting state",
            )),
        }
    }

    /// `Connecting | Open → Closed` on transport error or remote close.
    pub fn closed(&mut self) -> Result<(), VigilError> {
        match self.phase {
            ConnectionPhase::Connecting | ConnectionPhase::Open => {
                self.phase = ConnectionPhase::Closed;
                Ok(())
            }
            _ => Err(VigilError::InvalidTransition(
                "cannot close: not in Connecting or Open state",
            )),
        }
    }

    /// `Closed → Reconnecting | Abandoned`.
    pub fn schedule_retry(&mut self, policy: &BackoffPolicy) -> Result<RetryDecision, VigilError> {
        if self.phase != ConnectionPhase::Closed {
            return Err(VigilError::InvalidTransition(
                "cannot schedule retry: not in Closed state",
            ));
        }
        if self.attempt_count < policy.max_attempts {
            self.phase = ConnectionPhase::Reconnecting;
            Ok(RetryDecision::Retry {
                delay: policy.delay_for(self.attempt_count),
            })
        } else {
            self.phase = ConnectionPhase::Abandoned;
            Ok(RetryDecision::Abandon {
                attempts: self.attempt_count,
            })
        }
    }

    /// `Reconnecting → Connecting` when the backoff timer fires.
    ///
    /// Returns the attempt number now in flight (1-based).
    pub fn retry(&mut self) -> Result<u32, VigilError> {
        match self.phase {
            ConnectionPhase::Reconnecting => {
                self.attempt_count += 1;
                self.phase = ConnectionPhase::Connecting;
                Ok(self.attempt_count)
            }
            _ => Err(VigilError::InvalidTransition(
                "cannot retry: not in Reconnecting state",
            )),
        }
    }

    /// Any state `→ Idle` on explicit stop.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

// ── Tests ────────────────────────────────────────────────────────
