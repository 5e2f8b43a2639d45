//! The sender's signaling client (C7): posts the signed manifest and SDP
//! offer to `POST /ask`, parses the streamed SSE response as an explicit
//! line-oriented state machine (§9 — the wire format has no framing
//! beyond blank-line-terminated `event:`/`data:` pairs, so a byte stream
//! is walked a line at a time rather than handed to a generic SSE crate),
//! and forwards trickle-ICE candidates to `POST /candidate`.

use futures::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use fileferry_core::error::{Error, Result};
use fileferry_core::manifest::SignedManifest;
use fileferry_core::protocol::{IceCandidateInit, SessionDescription};

const SERVICE_ID_HEADER: &str = "x-service-id";

/// What `/ask`'s event stream eventually resolves to.
pub enum AskOutcome {
    Accepted {
        answer: SessionDescription,
        /// Trickle-ICE candidates the receiver gathers, forwarded as they
        /// arrive. Closes once `candidates_done` is observed (or the
        /// stream ends).
        candidates_rx: mpsc::UnboundedReceiver<IceCandidateInit>,
    },
    Rejected,
}

/// Posts the offer and spawns a background task that parses the SSE
/// response body as it arrives. Returns once the stream has produced
/// either a `rejection` or an `answer` event, the stream fails outright,
/// or `ctx` is cancelled — the remaining candidate trickle continues to
/// populate `candidates_rx` after this returns.
pub async fn send_offer(
    ctx: &CancellationToken,
    client: &reqwest::Client,
    base_url: &str,
    service_id: &str,
    signed_files: SignedManifest,
    offer: SessionDescription,
) -> Result<AskOutcome> {
    let body = serde_json::json!({ "signed_files": signed_files, "offer": offer });

    let response = tokio::select! {
        biased;
        _ = ctx.cancelled() => return Err(Error::Cancelled),
        result = client
            .post(format!("{base_url}/ask"))
            .header(SERVICE_ID_HEADER, service_id)
            .json(&body)
            .send() => result.map_err(|e| Error::TransportFailure(format!("POST /ask failed: {e}")))?,
    };

    if response.status() == reqwest::StatusCode::SERVICE_UNAVAILABLE {
        return Err(Error::Busy);
    }
    if !response.status().is_success() {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        return Err(Error::InvalidRequest(format!(
            "/ask rejected with {status}: {text}"
        )));
    }

    let (answer_tx, answer_rx) = oneshot::channel();
    let (rejected_tx, rejected_rx) = oneshot::channel();
    let (candidates_tx, candidates_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        if let Err(e) = drain_event_stream(response, answer_tx, rejected_tx, candidates_tx).await {
            tracing::warn!("ask event stream ended with an error: {e}");
        }
    });

    tokio::select! {
        biased;
        _ = ctx.cancelled() => Err(Error::Cancelled),
        _ = rejected_rx => Ok(AskOutcome::Rejected),
        result = answer_rx => match result {
            Ok(answer) => Ok(AskOutcome::Accepted { answer, candidates_rx }),
            Err(_) => Err(Error::TransportFailure(
                "ask event stream closed before an answer arrived".into(),
            )),
        },
    }
}

/// Reads `response`'s body a line at a time, tracking the current SSE
/// `event:` name until a blank line flushes the buffered `data:` payload,
/// and dispatches on the event name.
async fn drain_event_stream(
    response: reqwest::Response,
    answer_tx: oneshot::Sender<SessionDescription>,
    rejected_tx: oneshot::Sender<()>,
    candidates_tx: mpsc::UnboundedSender<IceCandidateInit>,
) -> Result<()> {
    let mut stream = response.bytes_stream();
    let mut pending = String::new();
    let mut current_event: Option<String> = None;
    let mut current_data = String::new();
    let mut answer_tx = Some(answer_tx);
    let mut rejected_tx = Some(rejected_tx);

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| Error::TransportFailure(format!("ask stream read failed: {e}")))?;
        pending.push_str(&String::from_utf8_lossy(&chunk));

        while let Some(newline_at) = pending.find('\n') {
            let line = pending[..newline_at].trim_end_matches('\r').to_string();
            pending.drain(..=newline_at);

            if line.is_empty() {
                dispatch_event(
                    current_event.take(),
                    std::mem::take(&mut current_data),
                    &mut answer_tx,
                    &mut rejected_tx,
                    &candidates_tx,
                );
                continue;
            }

            if let Some(name) = line.strip_prefix("event:") {
                current_event = Some(name.trim().to_string());
            } else if let Some(data) = line.strip_prefix("data:") {
                current_data.push_str(data.trim());
            }
        }
    }

    Ok(())
}

fn dispatch_event(
    event: Option<String>,
    data: String,
    answer_tx: &mut Option<oneshot::Sender<SessionDescription>>,
    rejected_tx: &mut Option<oneshot::Sender<()>>,
    candidates_tx: &mpsc::UnboundedSender<IceCandidateInit>,
) {
    let Some(event) = event else { return };
    let parsed: serde_json::Value = match serde_json::from_str(&data) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!("discarding malformed ask event data: {e}");
            return;
        }
    };

    match event.as_str() {
        "rejection" => {
            if let Some(tx) = rejected_tx.take() {
                let _ = tx.send(());
            }
        }
        "answer" => {
            let Some(answer) = parsed.get("answer").cloned() else {
                return;
            };
            if let Ok(answer) = serde_json::from_value::<SessionDescription>(answer) {
                if let Some(tx) = answer_tx.take() {
                    let _ = tx.send(answer);
                }
            }
        }
        "candidate" => {
            let Some(candidate) = parsed.get("candidate").cloned() else {
                return;
            };
            if let Ok(candidate) = serde_json::from_value::<IceCandidateInit>(candidate) {
                let _ = candidates_tx.send(candidate);
            }
        }
        "candidates_done" => {
            tracing::debug!("receiver finished gathering ICE candidates");
        }
        "error" => {
            if let Some(message) = parsed.get("error").and_then(|v| v.as_str()) {
                tracing::warn!("receiver reported an error: {message}");
            }
        }
        other => {
            tracing::debug!("ignoring unrecognized ask event: {other}");
        }
    }
}

/// Forwards one locally gathered ICE candidate to the receiver.
/// Best-effort: a failed POST is logged, not retried (§9) — a dropped
/// candidate rarely matters since ICE tries every gathered pair anyway. A
/// cancelled `ctx` skips the POST entirely rather than racing it, since a
/// cancelled transfer has no further use for trickled candidates.
pub async fn send_candidate(
    ctx: &CancellationToken,
    client: &reqwest::Client,
    base_url: &str,
    candidate: &IceCandidateInit,
) {
    if ctx.is_cancelled() {
        return;
    }
    if let Err(e) = client
        .post(format!("{base_url}/candidate"))
        .json(candidate)
        .send()
        .await
    {
        tracing::warn!("failed to forward ICE candidate: {e}");
    }
}
