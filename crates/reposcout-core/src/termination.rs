//! One-shot shutdown broadcast shared by the listener and the pipeline.
//!
//! Built on a `watch` channel holding a single flag. Raising is idempotent:
//! only the first [`Termination::raise`] flips the flag, later calls are
//! logged and ignored.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

/// Cloneable handle on the shutdown flag.
#[derive(Clone, Debug)]
pub struct Termination {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for Termination {
    fn default() -> Self {
        Self::new()
    }
}

impl Termination {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Raise the signal. Returns `true` only for the call that raised it.
    pub fn raise(&self) -> bool {
        let first = self.tx.send_if_modified(|raised| {
            if *raised {
                false
            } else {
                *raised = true;
                true
            }
        });

        if first {
            info!("termination raised, no new work will be accepted");
        } else {
            warn!("termination already raised, ignoring repeat");
        }
        first
    }

    pub fn is_raised(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once the signal has been raised (immediately if it already was).
    pub fn raised(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.tx.subscribe();
        async move {
            // The sender lives as long as any Termination clone, and the only
            // error is "sender dropped", which also means nobody can raise.
            let _ = rx.wait_for(|raised| *raised).await;
        }
    }
}
