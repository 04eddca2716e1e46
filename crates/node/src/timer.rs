//! Round timeout driver.
//!
//! A tokio task samples the node's (height, round) once per timeout period.
//! If the position has not moved since the previous sample the round has
//! stalled and the node is told to move on.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::ChainNode;

pub struct RoundTimer {
    handle: Option<JoinHandle<()>>,
}

impl RoundTimer {
    /// Start watching `node`. Must be called from within a tokio runtime.
    pub fn spawn(node: ChainNode, timeout: Duration) -> Self {
        let handle = tokio::spawn(async move {
            let mut watched = node.position();
            loop {
                tokio::time::sleep(timeout).await;
                let now = node.position();
                if now != watched {
                    trace!(height = now.0, round = now.1, "round progressed");
                    watched = now;
                    continue;
                }
                if node.handle_round_timeout(now.0, now.1) {
                    debug!(height = now.0, round = now.1, "stalled round abandoned");
                }
                watched = node.position();
            }
        });
        debug!(?timeout, "round timer started");
        Self {
            handle: Some(handle),
        }
    }

    /// Stop the timer. No-op if already stopped.
    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            debug!("round timer cancelled");
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for RoundTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
