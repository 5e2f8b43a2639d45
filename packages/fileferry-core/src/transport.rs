//! The `DataChannel` abstraction that C8/C9 operate against (§1's "assumed
//! to provide ordered, reliable bidirectional byte channels"), plus a
//! concrete adapter over the `webrtc` crate.
//!
//! The trait is the real seam; everything in C8/C9 is generic over it so
//! tests can substitute an in-memory pair instead of a real peer
//! connection.

use async_trait::async_trait;

use crate::error::{Error, Result};

/// An ordered, reliable, bidirectional byte-message channel.
#[async_trait]
pub trait DataChannel: Send {
    /// Sends one message. Messages are never fragmented by this trait —
    /// the implementation is responsible for staying under any underlying
    /// transport's message size limit.
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Receives the next message, or `Ok(None)` once the channel has
    /// closed cleanly.
    async fn recv(&mut self) -> Result<Option<Vec<u8>>>;

    /// Flushes any buffered output.
    async fn flush(&mut self) -> Result<()>;
}

/// The label used for the transfer data channel on both ends (§4.8).
pub const CHANNEL_LABEL: &str = "file-transfer";

pub mod webrtc_adapter {
    //! A [`DataChannel`] backed by a `webrtc` crate `RTCDataChannel`.
    //!
    //! `RTCDataChannel` exposes message delivery via an `on_message`
    //! callback rather than a pull API, so this adapter bridges the
    //! callback into an internal unbounded queue that `recv` drains.

    use std::sync::Arc;

    use async_trait::async_trait;
    use bytes::Bytes;
    use tokio::sync::mpsc;
    use webrtc::data_channel::data_channel_message::DataChannelMessage;
    use webrtc::data_channel::RTCDataChannel;

    use super::DataChannel;
    use crate::error::{Error, Result};

    /// Wraps an open `RTCDataChannel` as a [`DataChannel`]. Construct via
    /// [`wrap`], which registers the `on_message`/`on_close` callbacks.
    pub struct WebRtcDataChannel {
        channel: Arc<RTCDataChannel>,
        inbound: mpsc::UnboundedReceiver<Vec<u8>>,
    }

    /// Registers the callbacks that feed `recv()` and returns the wrapper.
    /// Call this once the channel has reached the `open` state.
    pub async fn wrap(channel: Arc<RTCDataChannel>) -> WebRtcDataChannel {
        let (tx, rx) = mpsc::unbounded_channel();

        channel.on_message(Box::new(move |msg: DataChannelMessage| {
            let tx = tx.clone();
            let data = msg.data.to_vec();
            Box::pin(async move {
                let _ = tx.send(data);
            })
        }));

        WebRtcDataChannel {
            channel,
            inbound: rx,
        }
    }

    #[async_trait]
    impl DataChannel for WebRtcDataChannel {
        async fn send(&mut self, data: &[u8]) -> Result<()> {
            self.channel
                .send(&Bytes::copy_from_slice(data))
                .await
                .map(|_| ())
                .map_err(|e| Error::TransportFailure(e.to_string()))
        }

        async fn recv(&mut self) -> Result<Option<Vec<u8>>> {
            Ok(self.inbound.recv().await)
        }

        async fn flush(&mut self) -> Result<()> {
            // RTCDataChannel has no explicit flush; sctp writes are
            // already submitted synchronously from `send`'s perspective.
            Ok(())
        }
    }
}

pub mod peer {
    //! Builds the `webrtc` crate peer connection each side needs to reach
    //! an open `file-transfer` data channel (C13): the offerer creates the
    //! channel and the SDP offer; the answerer waits for the remote
    //! channel and produces the SDP answer. Both sides bridge
    //! `on_ice_candidate` into a channel the same way
    //! [`super::webrtc_adapter::wrap`] bridges `on_message` — a callback
    //! API adapted to an async pull API.

    use std::sync::Arc;

    use tokio::sync::mpsc;
    use webrtc::api::interceptor_registry::register_default_interceptors;
    use webrtc::api::media_engine::MediaEngine;
    use webrtc::api::{APIBuilder, API};
    use webrtc::data_channel::RTCDataChannel;
    use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
    use webrtc::ice_transport::ice_server::RTCIceServer;
    use webrtc::interceptor::registry::Registry;
    use webrtc::peer_connection::configuration::RTCConfiguration;
    use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
    use webrtc::peer_connection::RTCPeerConnection;

    use super::CHANNEL_LABEL;
    use crate::error::{Error, Result};
    use crate::protocol::{IceCandidateInit, SessionDescription};

    fn transport_err(e: impl std::fmt::Display) -> Error {
        Error::TransportFailure(e.to_string())
    }

    async fn build_api() -> Result<API> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(transport_err)?;
        let mut registry = Registry::new();
        registry =
            register_default_interceptors(registry, &mut media_engine).map_err(transport_err)?;
        Ok(APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build())
    }

    fn default_config() -> RTCConfiguration {
        RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: vec!["stun:stun.l.google.com:19302".to_string()],
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    /// Bridges `on_ice_candidate` into a channel of `Some(candidate)` per
    /// gathered candidate, followed by one `None` when the browser/peer
    /// API signals gathering is complete (the callback fires once more
    /// with no candidate) — the caller's loop treats `None` as "stop
    /// waiting, emit `candidates_done`" rather than a closed channel.
    fn bridge_ice_candidates(
        peer_connection: &Arc<RTCPeerConnection>,
    ) -> mpsc::UnboundedReceiver<Option<IceCandidateInit>> {
        let (tx, rx) = mpsc::unbounded_channel();
        peer_connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let tx = tx.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    let _ = tx.send(None);
                    return;
                };
                if let Ok(init) = candidate.to_json() {
                    let _ = tx.send(Some(IceCandidateInit {
                        candidate: init.candidate,
                        sdp_mid: init.sdp_mid,
                        sdp_m_line_index: init.sdp_mline_index,
                    }));
                }
            })
        }));
        rx
    }

    /// The sender's side of a negotiation: the peer connection, the
    /// `file-transfer` channel it created, the local offer, and the
    /// outbound trickle-ICE candidate stream.
    pub struct Offerer {
        pub peer_connection: Arc<RTCPeerConnection>,
        pub data_channel: Arc<RTCDataChannel>,
        pub offer: SessionDescription,
        pub candidates: mpsc::UnboundedReceiver<Option<IceCandidateInit>>,
    }

    /// Creates the peer connection, the data channel, and the SDP offer.
    pub async fn create_offer() -> Result<Offerer> {
        let api = build_api().await?;
        let peer_connection = Arc::new(
            api.new_peer_connection(default_config())
                .await
                .map_err(transport_err)?,
        );
        let candidates = bridge_ice_candidates(&peer_connection);

        let data_channel = peer_connection
            .create_data_channel(CHANNEL_LABEL, None)
            .await
            .map_err(transport_err)?;

        let offer = peer_connection
            .create_offer(None)
            .await
            .map_err(transport_err)?;
        peer_connection
            .set_local_description(offer.clone())
            .await
            .map_err(transport_err)?;

        Ok(Offerer {
            peer_connection,
            data_channel,
            offer: SessionDescription {
                sdp_type: "offer".to_string(),
                sdp: offer.sdp,
            },
            candidates,
        })
    }

    /// The receiver's side of a negotiation: the peer connection, the
    /// local answer, the outbound candidate stream, and a channel that
    /// yields the remote-created data channel once it arrives.
    pub struct Answerer {
        pub peer_connection: Arc<RTCPeerConnection>,
        pub answer: SessionDescription,
        pub candidates: mpsc::UnboundedReceiver<Option<IceCandidateInit>>,
        pub data_channel_rx: mpsc::UnboundedReceiver<Arc<RTCDataChannel>>,
    }

    /// Creates the peer connection from a remote offer and produces the
    /// local answer. The caller still needs to drain `data_channel_rx` for
    /// the channel the remote side opens.
    pub async fn create_answer(offer: SessionDescription) -> Result<Answerer> {
        let api = build_api().await?;
        let peer_connection = Arc::new(
            api.new_peer_connection(default_config())
                .await
                .map_err(transport_err)?,
        );
        let candidates = bridge_ice_candidates(&peer_connection);

        let (dc_tx, data_channel_rx) = mpsc::unbounded_channel();
        peer_connection.on_data_channel(Box::new(move |channel: Arc<RTCDataChannel>| {
            let dc_tx = dc_tx.clone();
            Box::pin(async move {
                let _ = dc_tx.send(channel);
            })
        }));

        let remote_desc = RTCSessionDescription::offer(offer.sdp).map_err(transport_err)?;
        peer_connection
            .set_remote_description(remote_desc)
            .await
            .map_err(transport_err)?;

        let answer = peer_connection
            .create_answer(None)
            .await
            .map_err(transport_err)?;
        peer_connection
            .set_local_description(answer.clone())
            .await
            .map_err(transport_err)?;

        Ok(Answerer {
            peer_connection,
            answer: SessionDescription {
                sdp_type: "answer".to_string(),
                sdp: answer.sdp,
            },
            candidates,
            data_channel_rx,
        })
    }

    /// Applies a trickle-ICE candidate received from the peer.
    pub async fn add_ice_candidate(
        peer_connection: &RTCPeerConnection,
        candidate: IceCandidateInit,
    ) -> Result<()> {
        peer_connection
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_m_line_index,
                ..Default::default()
            })
            .await
            .map_err(transport_err)
    }

    /// Applies the remote SDP answer on the offering (sender) side.
    pub async fn set_remote_answer(
        peer_connection: &RTCPeerConnection,
        answer: SessionDescription,
    ) -> Result<()> {
        let desc = RTCSessionDescription::answer(answer.sdp).map_err(transport_err)?;
        peer_connection
            .set_remote_description(desc)
            .await
            .map_err(transport_err)
    }
}
