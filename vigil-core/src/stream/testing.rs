//! In-process transport doubles for unit tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;

use crate::error::VigilError;
use crate::stream::link::{Connector, Link, LinkDriver};

/// Refuses the first `refusals` handshakes, accepts the rest. The driver
/// of the most recent accepted link is parked until a test takes it.
pub(crate) struct ScriptedConnector {
    refusals: u32,
    attempts: AtomicU32,
    driver: Mutex<Option<LinkDriver>>,
}

impl ScriptedConnector {
    pub(crate) fn refuse_then_accept(refusals: u32) -> Self {
        Self {
            refusals,
            attempts: AtomicU32::new(0),
            driver: Mutex::new(None),
        }
    }

    pub(crate) fn always_accept() -> Self {
        Self::refuse_then_accept(0)
    }

    pub(crate) fn always_refuse() -> Self {
        Self::refuse_then_accept(u32::MAX)
    }

    /// Handshakes attempted so far.
    pub(crate) fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub(crate) fn take_driver(&self) -> Option<LinkDriver> {
        self.driver.lock().unwrap().take()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self) -> Result<Link, VigilError> {
        let n = self.attempts.fetch_add(1, Ordering::SeqCst);
        if n < self.refusals {
            return Err(VigilError::Transport("connection refused".into()));
        }
        let (link, driver) = Link::channel();
        *self.driver.lock().unwrap() = Some(driver);
        Ok(link)
    }
}
