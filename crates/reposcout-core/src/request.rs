//! Opaque handle on one in-flight HTTP exchange.
//!
//! The listener creates a [`RequestHandle`] per inbound request and keeps the
//! matching [`PendingReply`]. The handle travels through the pipeline and is
//! consumed by the responder, so a second write is impossible to express. If
//! the listener has given up on the exchange (client went away, server shut
//! down) the write reports [`Delivery::Dropped`] and the reply is discarded.

use bytes::Bytes;
use http::{Method, StatusCode};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::oneshot;

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Everything the listener needs to write an HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: StatusCode,
    pub content_type: &'static str,
    pub body: Bytes,
}

impl Reply {
    /// Value for the `content-length` header.
    pub fn content_length(&self) -> usize {
        self.body.len()
    }
}

/// What happened to a reply handed to the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The listener received the reply.
    Delivered,
    /// The listener had already released the exchange.
    Dropped,
}

/// Read-only request metadata plus a write-once response sink.
#[derive(Debug)]
pub struct RequestHandle {
    id: u64,
    method: Method,
    target: String,
    sink: oneshot::Sender<Reply>,
}

/// Listener side of a [`RequestHandle`].
#[derive(Debug)]
pub struct PendingReply {
    rx: oneshot::Receiver<Reply>,
}

impl PendingReply {
    /// Wait for the pipeline to answer.
    ///
    /// Returns `None` if the handle was dropped without a reply.
    pub async fn wait(self) -> Option<Reply> {
        self.rx.await.ok()
    }
}

impl RequestHandle {
    /// Create a handle for a request with the given method and raw request
    /// target (path plus optional query, e.g. `/?topic=rust`).
    pub fn new(method: Method, target: impl Into<String>) -> (Self, PendingReply) {
        let (sink, rx) = oneshot::channel();
        let handle = Self {
            id: NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed),
            method,
            target: target.into(),
            sink,
        };
        (handle, PendingReply { rx })
    }

    /// Process-unique id, for log correlation only.
    pub const fn id(&self) -> u64 {
        self.id
    }

    pub const fn method(&self) -> &Method {
        &self.method
    }

    /// Raw request target as received.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Hand the reply to the listener and release the handle.
    pub(crate) fn send(self, reply: Reply) -> Delivery {
        match self.sink.send(reply) {
            Ok(()) => Delivery::Delivered,
            Err(_) => Delivery::Dropped,
        }
    }
}
