use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{Semaphore, mpsc};

use super::{
    IceCandidate, PeerError, PeerEvent, PeerResult, PeerTransport, PeerTransportFactory,
    SessionDescription,
};

/// Scripted peer transport for tests.
///
/// Answers every offer with a fixed reply. A gated peer holds each answer
/// until [`MockPeer::release`] is called, which lets tests keep a negotiation
/// in flight.
pub struct MockPeer {
    reply: PeerResult<SessionDescription>,
    gate: Option<Semaphore>,
    events_tx: mpsc::UnboundedSender<PeerEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<PeerEvent>>>,
    offers: Mutex<Vec<SessionDescription>>,
    candidates: Mutex<Vec<IceCandidate>>,
    sent: Mutex<Vec<Bytes>>,
    closed: AtomicBool,
}

impl MockPeer {
    pub fn new(reply: PeerResult<SessionDescription>, gated: bool) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            reply,
            gate: gated.then(|| Semaphore::new(0)),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            offers: Mutex::new(Vec::new()),
            candidates: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Lets one pending answer complete.
    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1);
        }
    }

    /// Pushes an event as if the underlying connection produced it.
    pub fn emit(&self, event: PeerEvent) -> bool {
        self.events_tx.send(event).is_ok()
    }

    pub fn offers(&self) -> Vec<SessionDescription> {
        self.offers.lock().clone()
    }

    pub fn candidates(&self) -> Vec<IceCandidate> {
        self.candidates.lock().clone()
    }

    pub fn sent(&self) -> Vec<Bytes> {
        self.sent.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerTransport for MockPeer {
    async fn answer(&self, offer: SessionDescription) -> PeerResult<SessionDescription> {
        self.offers.lock().push(offer);
        if let Some(gate) = &self.gate {
            let permit = gate
                .acquire()
                .await
                .map_err(|_| PeerError::Negotiation("gate closed".into()))?;
            permit.forget();
        }
        self.reply.clone()
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> PeerResult<()> {
        if self.is_closed() {
            return Err(PeerError::Candidate("peer closed".into()));
        }
        self.candidates.lock().push(candidate);
        Ok(())
    }

    async fn send(&self, frame: Bytes) -> PeerResult<()> {
        if self.is_closed() {
            return Err(PeerError::NotConnected);
        }
        self.sent.lock().push(frame);
        Ok(())
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<PeerEvent>> {
        self.events_rx.lock().take()
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Hands out [`MockPeer`]s and keeps every instance for inspection.
pub struct MockPeerFactory {
    reply: PeerResult<SessionDescription>,
    gated: bool,
    create_error: Option<String>,
    create_delay: Option<Duration>,
    created: Mutex<Vec<Arc<MockPeer>>>,
}

impl MockPeerFactory {
    pub fn answering(answer: SessionDescription) -> Self {
        Self {
            reply: Ok(answer),
            gated: false,
            create_error: None,
            create_delay: None,
            created: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            reply: Err(PeerError::Negotiation(reason.into())),
            gated: false,
            create_error: None,
            create_delay: None,
            created: Mutex::new(Vec::new()),
        }
    }

    /// Factory whose `create` itself fails.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            create_error: Some(reason.into()),
            ..Self::answering(SessionDescription::new(""))
        }
    }

    pub fn gated(mut self) -> Self {
        self.gated = true;
        self
    }

    /// Makes every `create` take `delay` before the peer exists.
    pub fn with_create_delay(mut self, delay: Duration) -> Self {
        self.create_delay = Some(delay);
        self
    }

    pub fn instances(&self) -> Vec<Arc<MockPeer>> {
        self.created.lock().clone()
    }

    pub fn latest(&self) -> Option<Arc<MockPeer>> {
        self.created.lock().last().cloned()
    }
}

#[async_trait]
impl PeerTransportFactory for MockPeerFactory {
    async fn create(&self) -> PeerResult<Arc<dyn PeerTransport>> {
        if let Some(delay) = self.create_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(reason) = &self.create_error {
            return Err(PeerError::Setup(reason.clone()));
        }
        let peer = Arc::new(MockPeer::new(self.reply.clone(), self.gated));
        self.created.lock().push(Arc::clone(&peer));
        Ok(peer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn gated_answer_waits_for_release() {
        let peer = Arc::new(MockPeer::new(Ok(SessionDescription::new("R1")), true));
        let pending = {
            let peer = Arc::clone(&peer);
            tokio::spawn(async move { peer.answer(SessionDescription::new("O1")).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!pending.is_finished());
        peer.release();
        let answer = tokio::time::timeout(Duration::from_secs(1), pending)
            .await
            .expect("answer released")
            .expect("task joined")
            .expect("answer ok");
        assert_eq!(answer.sdp, "R1");
        assert_eq!(peer.offers(), vec![SessionDescription::new("O1")]);
    }

    #[tokio::test]
    async fn factory_tracks_instances() {
        let factory = MockPeerFactory::answering(SessionDescription::new("R1"));
        factory.create().await.unwrap();
        factory.create().await.unwrap();
        assert_eq!(factory.instances().len(), 2);

        let unavailable = MockPeerFactory::unavailable("no ice");
        assert!(matches!(unavailable.create().await, Err(PeerError::Setup(_))));
    }

    #[tokio::test]
    async fn closed_peer_rejects_sends() {
        let peer = MockPeer::new(Ok(SessionDescription::new("R1")), false);
        peer.send(Bytes::from_static(b"a")).await.unwrap();
        peer.close().await;
        assert_eq!(
            peer.send(Bytes::from_static(b"b")).await,
            Err(PeerError::NotConnected)
        );
        assert_eq!(peer.sent().len(), 1);
    }
}
