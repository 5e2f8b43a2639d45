//! Wire types shared by the signaling HTTP surface (§6) and the
//! data-channel message format.

use serde::{Deserialize, Serialize};

use crate::manifest::SignedManifest;

/// An SDP offer/answer, opaque to everything except the transport layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: String,
    pub sdp: String,
}

/// A trickle-ICE candidate, as produced/consumed by the transport layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IceCandidateInit {
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_m_line_index: Option<u16>,
}

/// Body of `POST /ask`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskRequest {
    pub signed_files: SignedManifest,
    pub offer: SessionDescription,
}

/// Body of `POST /candidate`.
pub type CandidateRequest = IceCandidateInit;

/// `{"error": "busy"}` — the machine-readable `503` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusyBody {
    pub error: String,
}

impl Default for BusyBody {
    fn default() -> Self {
        Self {
            error: "busy".to_string(),
        }
    }
}

/// The five named server-sent events emitted by `/ask` (§4.6/§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum AskEvent {
    Rejection {
        status: String,
    },
    Answer {
        answer: SessionDescription,
    },
    Candidate {
        candidate: IceCandidateInit,
    },
    CandidatesDone {},
    Error {
        error: String,
    },
}

impl AskEvent {
    pub fn rejection() -> Self {
        AskEvent::Rejection {
            status: "rejected".to_string(),
        }
    }

    /// The SSE `event:` line name for this variant.
    pub fn event_name(&self) -> &'static str {
        match self {
            AskEvent::Rejection { .. } => "rejection",
            AskEvent::Answer { .. } => "answer",
            AskEvent::Candidate { .. } => "candidate",
            AskEvent::CandidatesDone {} => "candidates_done",
            AskEvent::Error { .. } => "error",
        }
    }

    /// The JSON `data:` payload for this variant (without the envelope
    /// used by `Self`'s own `Serialize` impl — just the inner object).
    pub fn data_json(&self) -> serde_json::Value {
        match self {
            AskEvent::Rejection { status } => serde_json::json!({ "status": status }),
            AskEvent::Answer { answer } => serde_json::json!({ "answer": answer }),
            AskEvent::Candidate { candidate } => serde_json::json!({ "candidate": candidate }),
            AskEvent::CandidatesDone {} => serde_json::json!({}),
            AskEvent::Error { error } => serde_json::json!({ "error": error }),
        }
    }
}

/// A reference to the session a data-channel message belongs to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionRef {
    pub service_id: String,
    pub created_at: i64,
}

/// A chunk of file data in flight over the data channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "PascalCase")]
pub enum ChunkMessage {
    ChunkData {
        session: SessionRef,
        file_id: String,
        file_name: String,
        /// Forward-slash-joined path of this file relative to the
        /// transfer's roots (e.g. `photos/vacation/spain.jpg`), so the
        /// receiver can recreate the directory structure instead of
        /// flattening every file into a single output directory.
        relative_path: String,
        sequence_no: u32,
        offset: u64,
        /// Base64-encoded chunk payload.
        data: String,
        chunk_hash: String,
        total_size: u64,
        expected_hash: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_message_round_trips() {
        let msg = ChunkMessage::ChunkData {
            session: SessionRef {
                service_id: "svc-1".into(),
                created_at: 1000,
            },
            file_id: "/tmp/a.txt".into(),
            file_name: "a.txt".into(),
            relative_path: "a.txt".into(),
            sequence_no: 3,
            offset: 192,
            data: "aGVsbG8=".into(),
            chunk_hash: "deadbeef".into(),
            total_size: 256,
            expected_hash: "cafebabe".into(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"ChunkData\""));

        let parsed: ChunkMessage = serde_json::from_str(&json).unwrap();
        match parsed {
            ChunkMessage::ChunkData {
                sequence_no,
                offset,
                ..
            } => {
                assert_eq!(sequence_no, 3);
                assert_eq!(offset, 192);
            }
        }
    }

    #[test]
    fn ice_candidate_round_trips_with_optional_fields() {
        let candidate = IceCandidateInit {
            candidate: "candidate:1 1 UDP 2122260223 192.168.1.5 51000 typ host".into(),
            sdp_mid: Some("0".into()),
            sdp_m_line_index: Some(0),
        };
        let json = serde_json::to_string(&candidate).unwrap();
        let parsed: IceCandidateInit = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, candidate);
    }

    #[test]
    fn ice_candidate_deserializes_without_optional_fields() {
        let parsed: IceCandidateInit =
            serde_json::from_str(r#"{"candidate":"candidate:1 1 UDP 1 127.0.0.1 1 typ host"}"#)
                .unwrap();
        assert_eq!(parsed.sdp_mid, None);
        assert_eq!(parsed.sdp_m_line_index, None);
    }

    #[test]
    fn busy_body_matches_wire_shape() {
        let body = BusyBody::default();
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json, serde_json::json!({ "error": "busy" }));
    }

    #[test]
    fn ask_event_names_match_spec() {
        assert_eq!(AskEvent::rejection().event_name(), "rejection");
        assert_eq!(
            AskEvent::Answer {
                answer: SessionDescription {
                    sdp_type: "answer".into(),
                    sdp: "v=0".into()
                }
            }
            .event_name(),
            "answer"
        );
        assert_eq!(AskEvent::CandidatesDone {}.event_name(), "candidates_done");
    }
}
