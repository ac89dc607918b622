use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use webrtc::api::APIBuilder;
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use super::{
    IceCandidate, PeerError, PeerEvent, PeerResult, PeerTransport, PeerTransportFactory,
    SessionDescription,
};
use crate::config::PairingConfig;

/// Builds answerer-side peer connections with the configured ICE servers.
#[derive(Debug, Clone)]
pub struct WebRtcPeerFactory {
    ice_servers: Vec<String>,
}

impl WebRtcPeerFactory {
    pub fn new(ice_servers: Vec<String>) -> Self {
        Self { ice_servers }
    }

    pub fn from_config(config: &PairingConfig) -> Self {
        Self::new(config.ice_servers.clone())
    }
}

#[async_trait]
impl PeerTransportFactory for WebRtcPeerFactory {
    async fn create(&self) -> PeerResult<Arc<dyn PeerTransport>> {
        let peer = WebRtcPeer::new(&self.ice_servers).await?;
        Ok(Arc::new(peer))
    }
}

/// Receiver side of a WebRTC connection.
///
/// The initiator opens the data channel; this side answers the offer, waits
/// for ICE gathering so the answer carries its candidates, and adopts the
/// channel the initiator announces. Candidates trickled in before the offer
/// is applied are held until the remote description is set.
pub struct WebRtcPeer {
    peer_connection: Arc<RTCPeerConnection>,
    data_channel: Arc<Mutex<Option<Arc<RTCDataChannel>>>>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<PeerEvent>>>,
    /// `Some` until the remote description is applied.
    pending_candidates: Mutex<Option<Vec<RTCIceCandidateInit>>>,
}

impl WebRtcPeer {
    pub async fn new(ice_servers: &[String]) -> PeerResult<Self> {
        let api = APIBuilder::new().build();
        let rtc_config = RTCConfiguration {
            ice_servers: if ice_servers.is_empty() {
                Vec::new()
            } else {
                vec![RTCIceServer {
                    urls: ice_servers.to_vec(),
                    ..Default::default()
                }]
            },
            ..Default::default()
        };
        let peer_connection = Arc::new(
            api.new_peer_connection(rtc_config)
                .await
                .map_err(|err| PeerError::Setup(err.to_string()))?,
        );

        let (events_tx, events_rx) = mpsc::unbounded_channel::<PeerEvent>();
        let data_channel = Arc::new(Mutex::new(None));

        let state_tx = events_tx.clone();
        peer_connection.on_peer_connection_state_change(Box::new(
            move |state: RTCPeerConnectionState| {
                let events = state_tx.clone();
                Box::pin(async move {
                    tracing::debug!(target = "pairing", ?state, "peer connection state changed");
                    match state {
                        RTCPeerConnectionState::Failed => {
                            let _ = events.send(PeerEvent::Error("peer connection failed".into()));
                        }
                        RTCPeerConnectionState::Disconnected | RTCPeerConnectionState::Closed => {
                            let _ = events.send(PeerEvent::Closed);
                        }
                        _ => {}
                    }
                })
            },
        ));

        let channel_slot = Arc::clone(&data_channel);
        let channel_tx = events_tx.clone();
        peer_connection.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
            let slot = Arc::clone(&channel_slot);
            let events = channel_tx.clone();
            Box::pin(async move {
                tracing::debug!(
                    target = "pairing",
                    label = dc.label(),
                    "data channel announced by initiator"
                );
                attach_data_channel(&dc, events);
                *slot.lock() = Some(dc);
            })
        }));

        Ok(Self {
            peer_connection,
            data_channel,
            events_rx: Mutex::new(Some(events_rx)),
            pending_candidates: Mutex::new(Some(Vec::new())),
        })
    }

    async fn apply_candidate(&self, init: RTCIceCandidateInit) -> PeerResult<()> {
        self.peer_connection
            .add_ice_candidate(init)
            .await
            .map_err(|err| PeerError::Candidate(err.to_string()))
    }

    async fn flush_pending_candidates(&self) {
        let pending = self.pending_candidates.lock().take().unwrap_or_default();
        if !pending.is_empty() {
            tracing::debug!(
                target = "pairing",
                count = pending.len(),
                "applying candidates received before the offer"
            );
        }
        for init in pending {
            if let Err(err) = self.apply_candidate(init).await {
                tracing::debug!(target = "pairing", error = %err, "early candidate rejected");
            }
        }
    }
}

fn attach_data_channel(dc: &Arc<RTCDataChannel>, events: mpsc::UnboundedSender<PeerEvent>) {
    let open_tx = events.clone();
    dc.on_open(Box::new(move || {
        let events = open_tx.clone();
        Box::pin(async move {
            let _ = events.send(PeerEvent::Connected);
        })
    }));

    let close_tx = events.clone();
    dc.on_close(Box::new(move || {
        let events = close_tx.clone();
        Box::pin(async move {
            let _ = events.send(PeerEvent::Closed);
        })
    }));

    let error_tx = events.clone();
    dc.on_error(Box::new(move |err| {
        let events = error_tx.clone();
        Box::pin(async move {
            let _ = events.send(PeerEvent::Error(err.to_string()));
        })
    }));

    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        let events = events.clone();
        Box::pin(async move {
            let _ = events.send(PeerEvent::Data(msg.data));
        })
    }));
}

#[async_trait]
impl PeerTransport for WebRtcPeer {
    async fn answer(&self, offer: SessionDescription) -> PeerResult<SessionDescription> {
        let remote = RTCSessionDescription::offer(offer.sdp)
            .map_err(|err| PeerError::Negotiation(format!("invalid offer: {err}")))?;
        self.peer_connection
            .set_remote_description(remote)
            .await
            .map_err(|err| PeerError::Negotiation(format!("set remote description: {err}")))?;
        self.flush_pending_candidates().await;
        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|err| PeerError::Negotiation(format!("create answer: {err}")))?;
        let mut gathering_complete = self.peer_connection.gathering_complete_promise().await;
        self.peer_connection
            .set_local_description(answer)
            .await
            .map_err(|err| PeerError::Negotiation(format!("set local description: {err}")))?;
        let _ = gathering_complete.recv().await;

        let local = self
            .peer_connection
            .local_description()
            .await
            .ok_or_else(|| PeerError::Negotiation("local description missing".into()))?;
        tracing::debug!(target = "pairing", sdp_len = local.sdp.len(), "answer ready");
        Ok(SessionDescription::answer(local.sdp))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> PeerResult<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: None,
        };
        if let Some(pending) = self.pending_candidates.lock().as_mut() {
            pending.push(init);
            return Ok(());
        }
        self.apply_candidate(init).await
    }

    async fn send(&self, frame: Bytes) -> PeerResult<()> {
        let channel = self.data_channel.lock().clone();
        let channel = channel.ok_or(PeerError::NotConnected)?;
        if channel.ready_state() != RTCDataChannelState::Open {
            return Err(PeerError::NotConnected);
        }
        channel
            .send(&frame)
            .await
            .map(|_| ())
            .map_err(|err| PeerError::Send(err.to_string()))
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<PeerEvent>> {
        self.events_rx.lock().take()
    }

    async fn close(&self) {
        let channel = self.data_channel.lock().take();
        if let Some(channel) = channel {
            let _ = channel.close().await;
        }
        if let Err(err) = self.peer_connection.close().await {
            tracing::debug!(target = "pairing", error = %err, "peer connection close failed");
        }
    }
}
