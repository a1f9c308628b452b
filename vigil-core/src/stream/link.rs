//! Transport-agnostic duplex text link.
//!
//! A [`Link`] is what the connection manager holds while the transport is
//! open: an outbound queue, an inbound queue, and a counter of bytes
//! handed to the transport but not yet written (the congestion signal).
//! The transport side holds the matching [`LinkDriver`] and pumps both
//! queues from background tasks.
//!
//! ```text
//! ConnectionManager                         transport tasks
//! ┌──────────────┐  outbound (String)   ┌──────────────────┐
//! │ Link::send   │ ───────────────────► │ writer: sink     │
//! │ Link::recv   │ ◄─────────────────── │ reader: stream   │
//! └──────────────┘  inbound (String)    └──────────────────┘
//!          pending bytes ▲────── acknowledge() ──┘
//! ```
//!
//! The inbound queue closing (all drivers dropped) is how the manager
//! learns that the transport closed.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::VigilError;

/// Inbound queue depth. The reader task backpressures beyond this.
const INBOUND_CAPACITY: usize = 64;

// ── Link ─────────────────────────────────────────────────────────

/// Manager-side half of an open transport.
#[derive(Debug)]
pub struct Link {
    outbound: mpsc::UnboundedSender<String>,
    inbound: mpsc::Receiver<String>,
    pending: Arc<AtomicUsize>,
    shutdown: CancellationToken,
}

/// Transport-side half of a [`Link`].
#[derive(Debug)]
pub struct LinkDriver {
    pub outbound: mpsc::UnboundedReceiver<String>,
    pub inbound: mpsc::Sender<String>,
    ack: LinkAck,
}

/// Cloneable handle for write acknowledgement and shutdown, so the
/// driver's queues can be moved into separate pump tasks.
#[derive(Debug, Clone)]
pub struct LinkAck {
    pending: Arc<AtomicUsize>,
    shutdown: CancellationToken,
}

impl Link {
    /// Create a connected `(Link, LinkDriver)` pair.
    pub fn channel() -> (Link, LinkDriver) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::channel(INBOUND_CAPACITY);
        let pending = Arc::new(AtomicUsize::new(0));
        let shutdown = CancellationToken::new();

        let link = Link {
            outbound: out_tx,
            inbound: in_rx,
            pending: Arc::clone(&pending),
            shutdown: shutdown.clone(),
        };
        let driver = LinkDriver {
            outbound: out_rx,
            inbound: in_tx,
            ack: LinkAck { pending, shutdown },
        };
        (link, driver)
    }

    /// Bytes queued for the transport but not yet written.
    pub fn pending_bytes(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Queue one text message.
    pub fn send(&self, text: String) -> Result<(), VigilError> {
        let len = text.len();
        self.pending.fetch_add(len, Ordering::AcqRel);
        self.outbound.send(text).map_err(|_| {
            self.pending.fetch_sub(len, Ordering::AcqRel);
            VigilError::ChannelClosed
        })
    }

    /// Next inbound message, or `None` once the transport has closed.
    pub async fn recv(&mut self) -> Option<String> {
        self.inbound.recv().await
    }

    /// Ask the transport tasks to close the connection.
    pub fn close(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl LinkDriver {
    /// Record that `len` queued bytes were written to the wire.
    pub fn acknowledge(&self, len: usize) {
        self.ack.acknowledge(len);
    }

    /// Token cancelled when the manager closes or drops the link.
    pub fn shutdown(&self) -> CancellationToken {
        self.ack.shutdown()
    }

    pub fn pending_bytes(&self) -> usize {
        self.ack.pending_bytes()
    }

    pub fn ack(&self) -> LinkAck {
        self.ack.clone()
    }
}

impl LinkAck {
    pub fn acknowledge(&self, len: usize) {
        // Saturating: a racing failed send may already have subtracted.
        let _ = self
            .pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |p| Some(p.saturating_sub(len)));
    }

    pub fn shutdown(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn pending_bytes(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }
}

// ── Connector ────────────────────────────────────────────────────

/// Opens transport sessions to the analysis service.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Perform the handshake and return an open link.
    async fn connect(&self) -> Result<Link, VigilError>;
}

// ── Tests ────────────────────────────────────────────────────────
