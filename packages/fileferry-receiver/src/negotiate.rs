//! Drives one accepted session's WebRTC negotiation (C13) end to end:
//! builds the local answer, trickles ICE candidates in both directions,
//! waits for the remote-opened `file-transfer` data channel, and hands it
//! off to the reassembly loop (C9). Everything here runs in a background
//! task spawned by the `/ask` handler; its only channel back to the HTTP
//! response is the `events` sender the SSE stream reads from.

use std::sync::Arc;
use std::time::Duration;

use axum::response::sse::Event;
use tokio::sync::{mpsc, oneshot};

use fileferry_core::protocol::{AskEvent, IceCandidateInit, SessionDescription};
use fileferry_core::session::{Decision, Session};
use fileferry_core::transfer_store::TransferStore;
use fileferry_core::transport::{peer, webrtc_adapter};

use crate::config::ReceiverConfig;
use crate::reception;

/// How long to wait for the sender to open the data channel after the
/// answer and candidates have gone out, before giving up on the session.
const DATA_CHANNEL_TIMEOUT: Duration = Duration::from_secs(30);

fn to_sse_event(event: &AskEvent) -> Event {
    Event::default()
        .event(event.event_name())
        .data(event.data_json().to_string())
}

/// Runs to completion (or failure) inside a single `tokio::spawn`'d task.
/// Always calls `session.mark_transfer_done()` on every exit path so the
/// handler's concurrency-slot-release task (§4.5) is never left waiting
/// forever on a negotiation that aborted early.
/// Drops to release the slot-holding task waiting on
/// `Session::mark_transfer_done`, no matter which path out of `run` is
/// taken — an early `return` on rejection, a timeout, a negotiation error,
/// or plain success all go through this guard's `Drop` instead of a
/// one-off call at the end of the function.
struct TransferDoneGuard {
    session: Arc<Session>,
}

impl Drop for TransferDoneGuard {
    fn drop(&mut self) {
        let _ = self.session.mark_transfer_done();
    }
}

pub async fn run(
    session: Arc<Session>,
    store: TransferStore,
    config: ReceiverConfig,
    decision_rx: Option<oneshot::Receiver<Decision>>,
    candidates_in_rx: Option<mpsc::UnboundedReceiver<IceCandidateInit>>,
    events: mpsc::UnboundedSender<Event>,
) {
    let _done_guard = TransferDoneGuard {
        session: session.clone(),
    };

    let decision = match decision_rx {
        Some(rx) => rx.await,
        None => return,
    };

    match decision {
        Ok(Decision::Rejected) | Err(_) => {
            let _ = events.send(to_sse_event(&AskEvent::rejection()));
            return;
        }
        Ok(Decision::Accepted) => {}
    }

    if let Err(e) = negotiate_and_receive(session.clone(), store, config, candidates_in_rx, events.clone()).await
    {
        tracing::error!(session_id = %session.id, "negotiation failed: {e}");
        let _ = events.send(to_sse_event(&AskEvent::Error {
            error: e.to_string(),
        }));
    }
}

async fn negotiate_and_receive(
    session: Arc<Session>,
    store: TransferStore,
    config: ReceiverConfig,
    candidates_in_rx: Option<mpsc::UnboundedReceiver<IceCandidateInit>>,
    events: mpsc::UnboundedSender<Event>,
) -> fileferry_core::Result<()> {
    let offer: SessionDescription = session.offer.clone();
    let mut answerer = peer::create_answer(offer).await?;

    let _ = events.send(to_sse_event(&AskEvent::Answer {
        answer: answerer.answer.clone(),
    }));

    if let Some(mut rx) = candidates_in_rx {
        let peer_connection = answerer.peer_connection.clone();
        tokio::spawn(async move {
            while let Some(candidate) = rx.recv().await {
                if let Err(e) = peer::add_ice_candidate(&peer_connection, candidate).await {
                    tracing::warn!("failed to add remote ice candidate: {e}");
                }
            }
        });
    }

    while let Some(candidate) = answerer.candidates.recv().await {
        match candidate {
            Some(candidate) => {
                let _ = events.send(to_sse_event(&AskEvent::Candidate { candidate }));
            }
            None => break,
        }
    }
    let _ = events.send(to_sse_event(&AskEvent::CandidatesDone {}));

    let channel = tokio::time::timeout(DATA_CHANNEL_TIMEOUT, answerer.data_channel_rx.recv())
        .await
        .ok()
        .flatten()
        .ok_or_else(|| {
            fileferry_core::Error::TransportFailure("data channel never opened".into())
        })?;

    let wrapped = webrtc_adapter::wrap(channel).await;
    reception::receive_session(
        Box::new(wrapped),
        store,
        config.output_root.clone(),
        config.staging_suffix.clone(),
    )
    .await?;

    Ok(())
}
