//! The receiver control endpoint (C6): `POST /ask`, `POST /candidate`,
//! plus the ambient `/healthz` and `/stats` observability routes.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::stream::Stream;
use tokio::sync::mpsc;

use fileferry_core::manifest;
use fileferry_core::protocol::{AskRequest, BusyBody, CandidateRequest};
use fileferry_core::session::{Decision, Session};
use fileferry_core::transfer_store::TransferStore;

use crate::negotiate;
use crate::state::AppState;

const SERVICE_ID_HEADER: &str = "x-service-id";

pub async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

pub async fn stats(State(state): State<Arc<AppState>>) -> Response {
    match state.current_store() {
        Some(store) => Json(store.aggregate()).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

/// `POST /ask` — see §4.6 for the full step-by-step flow.
pub async fn ask(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Json<AskRequest>, axum::extract::rejection::JsonRejection>,
) -> Response {
    let Json(request) = match body {
        Ok(json) => json,
        Err(rejection) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": rejection.to_string() })),
            )
                .into_response();
        }
    };

    if let Err(e) = manifest::verify(&request.signed_files) {
        tracing::warn!("rejecting /ask: invalid signature: {e}");
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "invalid file structure" })),
        )
            .into_response();
    }

    let permit = match state.guard.acquire() {
        Ok(permit) => permit,
        Err(_) => {
            return (StatusCode::SERVICE_UNAVAILABLE, Json(BusyBody::default())).into_response();
        }
    };

    let service_id = headers
        .get(SERVICE_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();
    let session_id = uuid::Uuid::new_v4().to_string();

    tracing::info!(
        session_id = %session_id,
        service_id = %service_id,
        total_files = request.signed_files.metadata.total_files,
        total_size = request.signed_files.metadata.total_size,
        "incoming transfer request"
    );

    let session = Arc::new(Session::new(session_id, service_id, request.offer));
    let store = TransferStore::new(state.config.aggregate_throttle);
    state.set_session(session.clone(), store.clone());

    let decision_rx = session.take_decision_receiver();
    let candidates_in_rx = session.take_candidates_in_receiver();
    let transfer_done_rx = session.take_transfer_done_receiver();

    // Hold the concurrency slot until the transfer concludes, not just
    // until this response stream ends (§4.5's "second gate variant").
    let state_for_release = state.clone();
    tokio::spawn(async move {
        if let Some(rx) = transfer_done_rx {
            let _ = rx.await;
        }
        drop(permit);
        state_for_release.clear_session();
    });

    spawn_confirmation_prompt(session.clone(), request.signed_files.metadata.total_files);

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let negotiation_session = session.clone();
    let negotiation_config = state.config.clone();
    tokio::spawn(async move {
        negotiate::run(
            negotiation_session,
            store,
            negotiation_config,
            decision_rx,
            candidates_in_rx,
            event_tx,
        )
        .await;
    });

    let stream = event_stream(event_rx);

    let mut response = Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
        .into_response();
    response
        .headers_mut()
        .insert("Cache-Control", "no-cache".parse().unwrap());
    response
        .headers_mut()
        .insert("Connection", "keep-alive".parse().unwrap());
    response
}

/// Surfaces the confirmation prompt to the operator and feeds their
/// decision back into the session. The out-of-scope interactive UI (§1)
/// would replace this with a proper prompt; here a line on stdin suffices.
fn spawn_confirmation_prompt(session: Arc<Session>, total_files: u64) {
    tokio::task::spawn_blocking(move || {
        println!(
            "Incoming transfer of {total_files} file(s) from {}. Accept? [y/N] ",
            session.service_id
        );
        let mut line = String::new();
        let accepted = std::io::stdin().read_line(&mut line).is_ok()
            && matches!(line.trim().to_lowercase().as_str(), "y" | "yes");
        let decision = if accepted {
            Decision::Accepted
        } else {
            Decision::Rejected
        };
        if let Err(e) = session.decide(decision) {
            tracing::warn!("failed to record operator decision: {e}");
        }
    });
}

/// Turns the negotiation task's raw `Event` stream into the `Infallible`
/// item type axum's `Sse` response expects. Negotiation failures are
/// already translated into an `error` SSE event before the channel closes
/// (see [`crate::negotiate::run`]), so this never needs to inspect the
/// event contents.
fn event_stream(mut rx: mpsc::UnboundedReceiver<Event>) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        while let Some(event) = rx.recv().await {
            yield Ok(event);
        }
    }
}

/// `POST /candidate`.
pub async fn candidate(
    State(state): State<Arc<AppState>>,
    body: Result<Json<CandidateRequest>, axum::extract::rejection::JsonRejection>,
) -> Response {
    let Json(candidate) = match body {
        Ok(json) => json,
        Err(rejection) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": rejection.to_string() })),
            )
                .into_response();
        }
    };

    match state.current_session() {
        Some(session) => {
            session.push_candidate_in(candidate);
            StatusCode::OK.into_response()
        }
        None => (StatusCode::SERVICE_UNAVAILABLE, Json(BusyBody::default())).into_response(),
    }
}
