//! A negotiated session's shared state: the offer, the eventual answer,
//! the bidirectional ICE candidate FIFOs, the human decision, and the
//! transfer-completion signal.

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use crate::error::{Error, Result};
use crate::protocol::{IceCandidateInit, SessionDescription};
use crate::time::now_timestamp;

/// A single-shot value that can be sent at most once and received at most
/// once. Sending after the receiver has already been taken and dropped is
/// a no-op failure, not a panic.
struct SingleShot<T> {
    tx: Mutex<Option<oneshot::Sender<T>>>,
    rx: Mutex<Option<oneshot::Receiver<T>>>,
}

impl<T> SingleShot<T> {
    fn new() -> Self {
        let (tx, rx) = oneshot::channel();
        Self {
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(Some(rx)),
        }
    }

    fn send(&self, value: T) -> Result<()> {
        let tx = self
            .tx
            .lock()
            .take()
            .ok_or_else(|| Error::Internal("value already sent".into()))?;
        tx.send(value)
            .map_err(|_| Error::Internal("receiver already dropped".into()))
    }

    /// Takes the receiver; returns `None` if it has already been taken.
    fn take_receiver(&self) -> Option<oneshot::Receiver<T>> {
        self.rx.lock().take()
    }
}

/// An unbounded FIFO that can be closed to signal "no more items"; the
/// receiving half is taken exactly once by its single consumer.
struct Fifo<T> {
    tx: Mutex<Option<mpsc::UnboundedSender<T>>>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<T>>>,
}

impl<T> Fifo<T> {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(Some(rx)),
        }
    }

    fn push(&self, value: T) {
        if let Some(tx) = self.tx.lock().as_ref() {
            let _ = tx.send(value);
        }
    }

    /// Drops the sending half; the receiver's next `recv()` call observes
    /// the stream ending once buffered items are drained.
    fn close(&self) {
        self.tx.lock().take();
    }

    fn take_receiver(&self) -> Option<mpsc::UnboundedReceiver<T>> {
        self.rx.lock().take()
    }
}

/// Whether the human operator accepted or rejected the proposed transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accepted,
    Rejected,
}

/// One negotiated peer-to-peer transfer session, from `/ask` admission
/// through the last chunk (or failure).
pub struct Session {
    pub id: String,
    pub service_id: String,
    pub created_at: i64,
    pub offer: SessionDescription,

    decision: SingleShot<Decision>,
    candidates_in: Fifo<IceCandidateInit>,
    transfer_done: SingleShot<()>,
}

impl Session {
    pub fn new(id: String, service_id: String, offer: SessionDescription) -> Self {
        Self {
            id,
            service_id,
            created_at: now_timestamp(),
            offer,
            decision: SingleShot::new(),
            candidates_in: Fifo::new(),
            transfer_done: SingleShot::new(),
        }
    }

    /// Records the human operator's decision. Can only be called once.
    pub fn decide(&self, decision: Decision) -> Result<()> {
        self.decision.send(decision)
    }

    pub fn take_decision_receiver(&self) -> Option<oneshot::Receiver<Decision>> {
        self.decision.take_receiver()
    }

    /// Called by `POST /candidate` to forward an inbound candidate to
    /// whichever task consumes `candidates_in`.
    pub fn push_candidate_in(&self, candidate: IceCandidateInit) {
        self.candidates_in.push(candidate);
    }

    pub fn take_candidates_in_receiver(&self) -> Option<mpsc::UnboundedReceiver<IceCandidateInit>> {
        self.candidates_in.take_receiver()
    }

    /// Signals that the transfer has finished (successfully or not), so a
    /// handler holding the concurrency slot for the whole session (§4.5)
    /// can release it.
    pub fn mark_transfer_done(&self) -> Result<()> {
        self.transfer_done.send(())
    }

    pub fn take_transfer_done_receiver(&self) -> Option<oneshot::Receiver<()>> {
        self.transfer_done.take_receiver()
    }
}
