//! Final stage: write status, content type and body to a handle and release it.

use crate::Error;
use crate::request::{Delivery, Reply, RequestHandle};
use crate::types::RepoSummary;
use crate::validator::Rejection;
use bytes::Bytes;
use http::StatusCode;
use tracing::{debug, error};

pub const TEXT_HTML: &str = "text/html";
pub const APPLICATION_JSON: &str = "application/json";

const BAD_GATEWAY_BODY: &str = "<h1>Bad gateway.</h1>";
const UNAVAILABLE_BODY: &str = "<h1>Service unavailable.</h1>";
const INTERNAL_ERROR_BODY: &str = "<h1>Internal server error.</h1>";

/// Send `body` with the given content type and status, consuming the handle.
///
/// Content length is taken from `body`. A handle whose listener already went
/// away is released silently.
pub fn respond(
    handle: RequestHandle,
    body: impl Into<Bytes>,
    content_type: &'static str,
    status: StatusCode,
) -> Delivery {
    let request_id = handle.id();
    let reply = Reply {
        status,
        content_type,
        body: body.into(),
    };

    let delivery = handle.send(reply);
    if delivery == Delivery::Dropped {
        debug!(request_id, status = status.as_u16(), "exchange closed before reply, dropping");
    }
    delivery
}

/// `200 application/json` with the repositories as a JSON array.
pub fn respond_json(handle: RequestHandle, repos: &[RepoSummary]) -> Delivery {
    match serde_json::to_vec(repos) {
        Ok(body) => respond(handle, body, APPLICATION_JSON, StatusCode::OK),
        Err(e) => {
            error!(request_id = handle.id(), error = %e, "failed to encode response body");
            respond(
                handle,
                INTERNAL_ERROR_BODY,
                TEXT_HTML,
                StatusCode::INTERNAL_SERVER_ERROR,
            )
        },
    }
}

/// Fixed HTML body and 4xx status for a validation failure.
pub fn respond_rejection(handle: RequestHandle, rejection: Rejection) -> Delivery {
    respond(handle, rejection.body(), TEXT_HTML, rejection.status())
}

/// Gateway failure for a request whose upstream fetch failed.
///
/// Rate limiting is reported as 503 so clients know to come back later;
/// everything else is a 502.
pub fn respond_upstream_error(handle: RequestHandle, err: &Error) -> Delivery {
    match err {
        Error::RateLimited { .. } => respond_unavailable(handle),
        _ => respond(handle, BAD_GATEWAY_BODY, TEXT_HTML, StatusCode::BAD_GATEWAY),
    }
}

/// 503 for requests that arrive or are still queued while shutting down.
pub fn respond_unavailable(handle: RequestHandle) -> Delivery {
    respond(
        handle,
        UNAVAILABLE_BODY,
        TEXT_HTML,
        StatusCode::SERVICE_UNAVAILABLE,
    )
}
