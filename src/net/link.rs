//! Connection lifecycle handle shared by both halves of a socket.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Open/closed state of one upstream connection.
///
/// Clones share the same state. Closing is idempotent, and every pending
/// read or write selecting on [`Link::closed`] is woken.
#[derive(Debug, Clone, Default)]
pub struct Link {
    token: CancellationToken,
    closed: Arc<AtomicBool>,
}

impl Link {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    /// Close the connection. Returns `true` for exactly one caller.
    pub fn close(&self) -> bool {
        let was_open = !self.closed.swap(true, Ordering::AcqRel);
        self.token.cancel();
        was_open
    }

    /// Completes once the connection is closed.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }
}
