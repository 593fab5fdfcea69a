//! Turns a raw request handle into a [`WorkItem`] or a rejection.
//!
//! Rules are checked in order and the first failure wins:
//!
//! 1. the method must be `GET` (else 405);
//! 2. the request target must parse as a URI (else 400);
//! 3. the query string must be non-empty (else 400);
//! 4. the query must carry a non-empty `topic` parameter (else 400).
//!
//! Validation itself does no I/O. A [`Rejected`] hands the handle back so the
//! caller writes the fixed rejection body exactly once.

use crate::request::{Delivery, RequestHandle};
use crate::responder;
use http::{Method, StatusCode, Uri};

const BAD_REQUEST_BODY: &str = "<h1>Bad request.</h1>";
const METHOD_NOT_ALLOWED_BODY: &str = "<h1>Method not allowed.</h1>";

/// Why a request was answered with 400.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BadRequestReason {
    UnparseableTarget,
    MissingQuery,
    MissingTopic,
}

/// Client-caused failure. Always answered locally with a 4xx.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    MethodNotAllowed,
    BadRequest(BadRequestReason),
}

impl Rejection {
    pub const fn status(self) -> StatusCode {
        match self {
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    pub const fn body(self) -> &'static str {
        match self {
            Self::MethodNotAllowed => METHOD_NOT_ALLOWED_BODY,
            Self::BadRequest(_) => BAD_REQUEST_BODY,
        }
    }

    /// Short identifier for log fields.
    pub const fn reason(self) -> &'static str {
        match self {
            Self::MethodNotAllowed => "method_not_allowed",
            Self::BadRequest(BadRequestReason::UnparseableTarget) => "unparseable_target",
            Self::BadRequest(BadRequestReason::MissingQuery) => "missing_query",
            Self::BadRequest(BadRequestReason::MissingTopic) => "missing_topic",
        }
    }
}

/// A validated request: the handle plus the topic to resolve.
#[derive(Debug)]
pub struct WorkItem {
    handle: RequestHandle,
    topic: String,
}

impl WorkItem {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub const fn handle(&self) -> &RequestHandle {
        &self.handle
    }

    pub fn into_parts(self) -> (RequestHandle, String) {
        (self.handle, self.topic)
    }
}

/// A request that failed validation, still owning its handle.
#[derive(Debug)]
pub struct Rejected {
    pub handle: RequestHandle,
    pub rejection: Rejection,
}

impl Rejected {
    /// Write the rejection response and release the handle.
    pub fn respond(self) -> Delivery {
        responder::respond_rejection(self.handle, self.rejection)
    }
}

/// Validate `handle`, producing a work item or a rejection.
pub fn validate(handle: RequestHandle) -> Result<WorkItem, Rejected> {
    match extract_topic(handle.method(), handle.target()) {
        Ok(topic) => Ok(WorkItem { handle, topic }),
        Err(rejection) => Err(Rejected { handle, rejection }),
    }
}

/// The pure part of validation, on request metadata alone.
pub fn extract_topic(method: &Method, target: &str) -> Result<String, Rejection> {
    if method != Method::GET {
        return Err(Rejection::MethodNotAllowed);
    }

    let uri: Uri = target
        .parse()
        .map_err(|_| Rejection::BadRequest(BadRequestReason::UnparseableTarget))?;

    let query = uri
        .query()
        .filter(|q| !q.is_empty())
        .ok_or(Rejection::BadRequest(BadRequestReason::MissingQuery))?;

    url::form_urlencoded::parse(query.as_bytes())
        .find(|(name, _)| name == "topic")
        .map(|(_, value)| value.into_owned())
        .filter(|topic| !topic.is_empty())
        .ok_or(Rejection::BadRequest(BadRequestReason::MissingTopic))
}
