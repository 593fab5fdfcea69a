//! HTTP front door.
//!
//! Every method and path is routed to one fallback handler, which wraps the
//! exchange in a [`RequestHandle`], submits it to the pipeline and waits for the
//! reply. Routing decisions (405, 400) belong to the pipeline's validator, not
//! to axum.

use axum::Router;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderValue, StatusCode};
use axum::response::Response;
use reposcout_core::responder::{self, TEXT_HTML};
use reposcout_core::{Intake, Reply, RequestHandle};
use tracing::{debug, error};

const INTERNAL_ERROR_BODY: &str = "<h1>Internal server error.</h1>";

#[derive(Clone)]
struct ListenerState {
    intake: Intake,
}

/// Router that feeds every request into `intake`.
pub fn router(intake: Intake) -> Router {
    Router::new()
        .fallback(exchange)
        .with_state(ListenerState { intake })
}

async fn exchange(State(state): State<ListenerState>, request: Request) -> Response {
    let target = request
        .uri()
        .path_and_query()
        .map_or_else(|| request.uri().path().to_string(), |pq| pq.as_str().to_string());
    let (handle, pending) = RequestHandle::new(request.method().clone(), target);
    let request_id = handle.id();

    if let Err(refused) = state.intake.submit(handle).await {
        debug!(request_id, "pipeline is shutting down, refusing request");
        responder::respond_unavailable(refused);
    }

    match pending.wait().await {
        Some(reply) => into_response(reply),
        None => {
            error!(request_id, "request released without a response");
            into_response(Reply {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                content_type: TEXT_HTML,
                body: INTERNAL_ERROR_BODY.into(),
            })
        },
    }
}

fn into_response(reply: Reply) -> Response {
    let length = reply.content_length();
    let mut response = Response::new(Body::from(reply.body));
    *response.status_mut() = reply.status;

    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(reply.content_type));
    headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
    response
}
