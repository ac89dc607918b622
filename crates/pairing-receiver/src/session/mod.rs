//! The pairing session: key state, encrypted signaling, and the answerer-side
//! negotiation state machine.

use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::PairingConfig;
use crate::crypto::{
    CryptoService, EncryptedEnvelope, KeyMaterial, SealedBoxCrypto, auth_token_message,
};
use crate::error::{PairingError, PairingResult};
use crate::handlers::HandlerTable;
use crate::peer::{
    IceCandidate, PeerEvent, PeerSignal, PeerTransport, PeerTransportFactory, SessionDescription,
    WebRtcPeerFactory,
};
use crate::signaling::{
    ConnectParams, SignalFrame, SignalKind, SignalingChannel, WebSocketSignaling,
};

pub mod framing;
pub mod identity;
pub mod state;

pub use framing::{MAX_PEER_FRAME, PeerMessage};
pub use identity::SignalingIdentity;
pub use state::NegotiationState;

/// The live peer transport together with the generation it belongs to.
struct PeerSlot {
    id: u64,
    transport: Arc<dyn PeerTransport>,
    pump: JoinHandle<()>,
}

struct Negotiation {
    state: NegotiationState,
    /// Set while an `answer` computation is outstanding.
    answering: bool,
    /// Bumped whenever the current attempt is abandoned. Continuations that
    /// captured an older value must not touch the session.
    generation: u64,
    peer: Option<PeerSlot>,
    /// Candidates that arrived after an offer was accepted but before its
    /// transport existed.
    early_candidates: Vec<IceCandidate>,
    watchdog: Option<JoinHandle<()>>,
}

/// Receiver side of a pairing handshake.
///
/// Owns the installed key material, the signaling channel, and at most one
/// peer transport. Everything the session sends is encrypted with the
/// installed keys; inbound peer frames are decrypted before they reach the
/// `data` handler.
pub struct PairingSession {
    config: PairingConfig,
    crypto: Arc<dyn CryptoService>,
    signaling: Arc<dyn SignalingChannel>,
    peers: Arc<dyn PeerTransportFactory>,
    keys: RwLock<Option<Arc<KeyMaterial>>>,
    negotiation: Mutex<Negotiation>,
    state_tx: watch::Sender<NegotiationState>,
    signal_handlers: HandlerTable<SignalKind, Value>,
    peer_handlers: HandlerTable<PeerSignal, Value>,
    dispatch_task: Mutex<Option<JoinHandle<()>>>,
}

impl PairingSession {
    pub fn new(
        config: PairingConfig,
        crypto: Arc<dyn CryptoService>,
        signaling: Arc<dyn SignalingChannel>,
        peers: Arc<dyn PeerTransportFactory>,
    ) -> Arc<Self> {
        let (state_tx, _) = watch::channel(NegotiationState::Idle);
        Arc::new(Self {
            config,
            crypto,
            signaling,
            peers,
            keys: RwLock::new(None),
            negotiation: Mutex::new(Negotiation {
                state: NegotiationState::Idle,
                answering: false,
                generation: 0,
                peer: None,
                early_candidates: Vec::new(),
                watchdog: None,
            }),
            state_tx,
            signal_handlers: HandlerTable::new(),
            peer_handlers: HandlerTable::new(),
            dispatch_task: Mutex::new(None),
        })
    }

    /// Session wired to the shipped collaborators: sealed-box crypto,
    /// WebSocket signaling and a WebRTC answerer.
    pub fn with_defaults(config: PairingConfig) -> Arc<Self> {
        let crypto = Arc::new(SealedBoxCrypto::new());
        let signaling = Arc::new(WebSocketSignaling::new(config.heartbeat_interval));
        let peers = Arc::new(WebRtcPeerFactory::from_config(&config));
        Self::new(config, crypto, signaling, peers)
    }

    pub fn config(&self) -> &PairingConfig {
        &self.config
    }

    /// Installs the invitation keys and derives the auth token.
    ///
    /// Starts a new pairing attempt: any peer transport is discarded and the
    /// state returns to [`NegotiationState::Idle`], or to
    /// [`NegotiationState::AwaitingOffer`] with a fresh offer timeout when the
    /// signaling channel is still open. On failure the previously installed
    /// keys, if any, stay in place.
    pub async fn install_keys(
        self: &Arc<Self>,
        public_key: &str,
        private_key: &str,
        connection_id: &str,
    ) -> PairingResult<()> {
        for (name, value) in [
            ("public key", public_key),
            ("private key", private_key),
            ("connection id", connection_id),
        ] {
            if value.is_empty() {
                return Err(PairingError::InvalidKeyMaterial(format!("{name} is empty")));
            }
        }

        let message = auth_token_message(private_key, connection_id);
        let auth_token = self.crypto.sign(private_key, &message).await?;
        let keys = KeyMaterial::new(public_key, private_key, connection_id, auth_token);
        *self.keys.write() = Some(Arc::new(keys));
        tracing::info!(target = "pairing", connection_id, "key material installed");

        self.disconnect_peer().await;
        if self.signaling.is_open() {
            self.await_offer();
        }
        Ok(())
    }

    pub fn has_keys(&self) -> bool {
        self.keys.read().is_some()
    }

    pub fn identity(&self) -> PairingResult<SignalingIdentity> {
        let keys = self.keys()?;
        Ok(SignalingIdentity::from_keys(&self.config.role, &keys))
    }

    pub fn auth_token(&self) -> PairingResult<String> {
        Ok(self.keys()?.auth_token().to_string())
    }

    pub fn connection_id(&self) -> PairingResult<String> {
        Ok(self.keys()?.connection_id().to_string())
    }

    fn keys(&self) -> PairingResult<Arc<KeyMaterial>> {
        self.keys.read().clone().ok_or(PairingError::KeysNotInstalled)
    }

    /// Serializes `value` as JSON (strings included) and seals it.
    pub async fn encrypt<T>(&self, value: &T) -> PairingResult<EncryptedEnvelope>
    where
        T: Serialize + Sync + ?Sized,
    {
        let keys = self.keys()?;
        let plaintext = serde_json::to_vec(value)
            .map_err(|err| PairingError::CryptoFailure(format!("serialize plaintext: {err}")))?;
        Ok(self.crypto.encrypt(&keys, &plaintext).await?)
    }

    /// Opens `envelope` and parses the plaintext as JSON.
    pub async fn decrypt(&self, envelope: &EncryptedEnvelope) -> PairingResult<Value> {
        let keys = self.keys()?;
        let plaintext = self.crypto.decrypt(&keys, envelope).await?;
        serde_json::from_slice(&plaintext)
            .map_err(|err| PairingError::MalformedPayload(err.to_string()))
    }

    pub async fn decrypt_as<T: DeserializeOwned>(
        &self,
        envelope: &EncryptedEnvelope,
    ) -> PairingResult<T> {
        let value = self.decrypt(envelope).await?;
        serde_json::from_value(value).map_err(|err| PairingError::MalformedPayload(err.to_string()))
    }

    /// Joins the signaling channel.
    ///
    /// Sends the receiver identity as connect parameters unless
    /// `identity_override` is given, in which case that map is sent verbatim.
    pub async fn connect(
        self: &Arc<Self>,
        address: &str,
        identity_override: Option<ConnectParams>,
    ) -> PairingResult<()> {
        let keys = self.keys()?;
        let params = match identity_override {
            Some(params) => params,
            None => SignalingIdentity::from_keys(&self.config.role, &keys).to_params(),
        };

        let inbound = self.signaling.connect(address, &params).await?;
        tracing::info!(
            target = "pairing",
            connection_id = keys.connection_id(),
            "signaling channel joined"
        );

        let task = self.spawn_dispatch(inbound);
        if let Some(previous) = self.dispatch_task.lock().replace(task) {
            previous.abort();
        }

        self.await_offer();
        Ok(())
    }

    /// `Idle → AwaitingOffer`, arming the offer timeout when one is configured.
    fn await_offer(self: &Arc<Self>) {
        let mut neg = self.negotiation.lock();
        if neg.state == NegotiationState::Idle {
            self.set_state(&mut neg, NegotiationState::AwaitingOffer);
            if let Some(timeout) = self.config.offer_timeout {
                self.arm_watchdog(&mut neg, timeout, "offer");
            }
        }
    }

    fn spawn_dispatch(
        self: &Arc<Self>,
        mut inbound: mpsc::UnboundedReceiver<SignalFrame>,
    ) -> JoinHandle<()> {
        let session = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(frame) = inbound.recv().await {
                let Some(session) = session.upgrade() else {
                    break;
                };
                tracing::trace!(target = "pairing", signal = %frame.signal, "signal received");
                if !session.signal_handlers.dispatch(&frame.signal, frame.payload)
                    && frame.signal == SignalKind::Error
                {
                    tracing::warn!(target = "pairing", "signaling error with no handler bound");
                }
            }
            tracing::debug!(target = "pairing", "signaling stream ended");
        })
    }

    /// Binds the handler for `signal`, replacing any existing one.
    /// Returns `true` when a handler was replaced.
    pub fn bind<F, Fut>(&self, signal: impl Into<SignalKind>, handler: F) -> bool
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.signal_handlers.bind(signal.into(), handler)
    }

    pub fn unbind(&self, signal: impl Into<SignalKind>) -> bool {
        self.signal_handlers.unbind(&signal.into())
    }

    /// Best-effort send of an already sealed payload. A closed channel is
    /// logged and otherwise ignored.
    pub fn emit(&self, signal: impl Into<SignalKind>, envelope: &EncryptedEnvelope) {
        let signal = signal.into();
        let payload = match serde_json::to_value(envelope) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(
                    target = "pairing",
                    %signal,
                    error = %err,
                    "envelope not serializable"
                );
                return;
            }
        };
        if let Err(err) = self.signaling.send(SignalFrame::new(signal.clone(), payload)) {
            tracing::debug!(target = "pairing", %signal, error = %err, "emit dropped");
        }
    }

    /// Encrypts `value` and emits it under `signal`.
    pub async fn emit_sealed<T>(
        &self,
        signal: impl Into<SignalKind>,
        value: &T,
    ) -> PairingResult<()>
    where
        T: Serialize + Sync + ?Sized,
    {
        let signal = signal.into();
        let envelope = self.encrypt(value).await?;
        self.emit(signal, &envelope);
        Ok(())
    }

    pub fn is_signaling_open(&self) -> bool {
        self.signaling.is_open()
    }

    pub async fn close_signaling(&self) {
        if let Some(task) = self.dispatch_task.lock().take() {
            task.abort();
        }
        self.signaling.close().await;
        tracing::debug!(target = "pairing", "signaling channel closed");
    }

    /// Answers `offer` and returns the sealed answer for the caller to emit.
    ///
    /// Only one offer is answered at a time: a call that overlaps an
    /// outstanding answer fails with [`PairingError::NegotiationInProgress`],
    /// and a call from any state past `AwaitingOffer` fails with
    /// [`PairingError::InvalidState`]. Neither changes the state.
    pub async fn answer(
        self: &Arc<Self>,
        offer: SessionDescription,
    ) -> PairingResult<EncryptedEnvelope> {
        let keys = self.keys()?;
        let generation = self.begin_answer()?;

        let negotiated = tokio::time::timeout(
            self.config.negotiation_timeout,
            self.negotiate(generation, offer),
        )
        .await
        .unwrap_or_else(|_| {
            Err(PairingError::NegotiationFailure(format!(
                "no answer within {:?}",
                self.config.negotiation_timeout
            )))
        });
        let local = match negotiated {
            Ok(local) => local,
            Err(err) => return Err(self.fail_answer(generation, err)),
        };
        if self.negotiation.lock().generation != generation {
            return Err(abandoned());
        }

        let sealed = match serde_json::to_vec(&local) {
            Ok(plaintext) => self
                .crypto
                .encrypt(&keys, &plaintext)
                .await
                .map_err(PairingError::from),
            Err(err) => Err(PairingError::CryptoFailure(format!("serialize answer: {err}"))),
        };
        let envelope = match sealed {
            Ok(envelope) => envelope,
            Err(err) => return Err(self.fail_answer(generation, err)),
        };

        let mut neg = self.negotiation.lock();
        if neg.generation != generation {
            return Err(abandoned());
        }
        neg.answering = false;
        if !matches!(
            neg.state,
            NegotiationState::AnsweringOffer | NegotiationState::Connected
        ) {
            return Err(PairingError::NegotiationFailure(format!(
                "attempt ended in state {} before the answer was ready",
                neg.state
            )));
        }
        tracing::debug!(
            target = "pairing",
            peer_instance = generation,
            state = %neg.state,
            "answer ready"
        );
        Ok(envelope)
    }

    /// Decrypts an offer received over signaling and answers it.
    ///
    /// An offer that cannot be opened fails the current attempt.
    pub async fn answer_sealed(
        self: &Arc<Self>,
        envelope: &EncryptedEnvelope,
    ) -> PairingResult<EncryptedEnvelope> {
        let offer = match self.decrypt_as::<SessionDescription>(envelope).await {
            Ok(offer) => offer,
            Err(err) => {
                self.fail_handshake(&err);
                return Err(err);
            }
        };
        self.answer(offer).await
    }

    /// Decrypts a trickled ICE candidate and hands it to the current peer.
    ///
    /// A candidate that arrives while an accepted offer is still waiting for
    /// its transport is held and applied once the transport exists.
    pub async fn add_remote_candidate(&self, envelope: &EncryptedEnvelope) -> PairingResult<()> {
        let candidate: IceCandidate = self.decrypt_as(envelope).await?;
        let transport = {
            let mut neg = self.negotiation.lock();
            let generation = neg.generation;
            let current = neg
                .peer
                .as_ref()
                .filter(|slot| slot.id == generation)
                .map(|slot| Arc::clone(&slot.transport));
            match current {
                Some(transport) => transport,
                None if neg.answering => {
                    neg.early_candidates.push(candidate);
                    tracing::trace!(target = "pairing", "remote candidate held for transport");
                    return Ok(());
                }
                None => return Err(PairingError::InvalidState(neg.state)),
            }
        };
        transport
            .add_ice_candidate(candidate)
            .await
            .map_err(PairingError::from)
    }

    /// Binds `offer` and `candidate` so that sealed offers are answered and the
    /// sealed answer is emitted on `answer` without caller involvement.
    pub fn enable_auto_answer(self: &Arc<Self>) {
        let session = Arc::downgrade(self);
        self.bind(SignalKind::Offer, move |payload| {
            let session = session.clone();
            async move {
                let Some(session) = session.upgrade() else {
                    return;
                };
                let answered = match envelope_from_payload(payload) {
                    Ok(envelope) => session.answer_sealed(&envelope).await,
                    Err(err) => {
                        session.fail_handshake(&err);
                        Err(err)
                    }
                };
                match answered {
                    Ok(answer) => session.emit(SignalKind::Answer, &answer),
                    Err(err) => {
                        tracing::warn!(target = "pairing", error = %err, "offer not answered")
                    }
                }
            }
        });

        let session = Arc::downgrade(self);
        self.bind(SignalKind::Candidate, move |payload| {
            let session = session.clone();
            async move {
                let Some(session) = session.upgrade() else {
                    return;
                };
                let added = match envelope_from_payload(payload) {
                    Ok(envelope) => session.add_remote_candidate(&envelope).await,
                    Err(err) => Err(err),
                };
                if let Err(err) = added {
                    tracing::debug!(target = "pairing", error = %err, "remote candidate dropped");
                }
            }
        });
    }

    /// Closes and discards the current peer transport and returns to `Idle`.
    /// Results still in flight for the discarded transport are ignored.
    pub async fn disconnect_peer(&self) {
        let (slot, watchdog) = {
            let mut neg = self.negotiation.lock();
            neg.generation += 1;
            neg.answering = false;
            neg.early_candidates.clear();
            self.set_state(&mut neg, NegotiationState::Idle);
            (neg.peer.take(), neg.watchdog.take())
        };
        if let Some(watchdog) = watchdog {
            watchdog.abort();
        }
        if let Some(slot) = slot {
            slot.pump.abort();
            slot.transport.close().await;
            tracing::debug!(
                target = "pairing",
                peer_instance = slot.id,
                "peer transport discarded"
            );
        }
    }

    pub fn state(&self) -> NegotiationState {
        self.negotiation.lock().state
    }

    pub fn subscribe_state(&self) -> watch::Receiver<NegotiationState> {
        self.state_tx.subscribe()
    }

    fn begin_answer(self: &Arc<Self>) -> PairingResult<u64> {
        let mut neg = self.negotiation.lock();
        if neg.answering {
            return Err(PairingError::NegotiationInProgress);
        }
        if !neg.state.accepts_offer() {
            return Err(PairingError::InvalidState(neg.state));
        }
        if neg.state == NegotiationState::Idle {
            self.set_state(&mut neg, NegotiationState::AwaitingOffer);
        }
        neg.answering = true;
        self.set_state(&mut neg, NegotiationState::AnsweringOffer);
        let timeout = self.config.negotiation_timeout;
        self.arm_watchdog(&mut neg, timeout, "negotiation");
        Ok(neg.generation)
    }

    async fn negotiate(
        self: &Arc<Self>,
        generation: u64,
        offer: SessionDescription,
    ) -> PairingResult<SessionDescription> {
        let transport = self.ensure_transport(generation).await?;
        Ok(transport.answer(offer).await?)
    }

    async fn ensure_transport(
        self: &Arc<Self>,
        generation: u64,
    ) -> PairingResult<Arc<dyn PeerTransport>> {
        let existing = self
            .negotiation
            .lock()
            .peer
            .as_ref()
            .filter(|slot| slot.id == generation)
            .map(|slot| Arc::clone(&slot.transport));
        if let Some(transport) = existing {
            return Ok(transport);
        }

        let transport = self.peers.create().await?;
        let events = transport.take_events();
        let installed = {
            let mut neg = self.negotiation.lock();
            if neg.generation == generation {
                let held = std::mem::take(&mut neg.early_candidates);
                let pump = match events {
                    Some(events) => self.spawn_pump(generation, events),
                    None => tokio::spawn(async {}),
                };
                neg.peer = Some(PeerSlot {
                    id: generation,
                    transport: Arc::clone(&transport),
                    pump,
                });
                Some(held)
            } else {
                None
            }
        };
        let Some(held) = installed else {
            transport.close().await;
            return Err(abandoned());
        };
        tracing::debug!(target = "pairing", peer_instance = generation, "peer transport created");
        for candidate in held {
            if let Err(err) = transport.add_ice_candidate(candidate).await {
                tracing::debug!(
                    target = "pairing",
                    peer_instance = generation,
                    error = %err,
                    "held candidate rejected"
                );
            }
        }
        Ok(transport)
    }

    fn spawn_pump(
        self: &Arc<Self>,
        id: u64,
        mut events: mpsc::UnboundedReceiver<PeerEvent>,
    ) -> JoinHandle<()> {
        let session: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(session) = session.upgrade() else {
                    break;
                };
                session.handle_peer_event(id, event).await;
            }
        })
    }

    async fn handle_peer_event(&self, id: u64, event: PeerEvent) {
        let current = self
            .negotiation
            .lock()
            .peer
            .as_ref()
            .is_some_and(|slot| slot.id == id);
        if !current {
            tracing::trace!(
                target = "pairing",
                peer_instance = id,
                "event from discarded peer ignored"
            );
            return;
        }

        match event {
            PeerEvent::Connected => {
                let connected = {
                    let mut neg = self.negotiation.lock();
                    if neg.state == NegotiationState::AnsweringOffer {
                        if let Some(watchdog) = neg.watchdog.take() {
                            watchdog.abort();
                        }
                        self.set_state(&mut neg, NegotiationState::Connected);
                        true
                    } else {
                        false
                    }
                };
                if connected {
                    tracing::info!(target = "pairing", peer_instance = id, "peer connected");
                    self.peer_handlers.dispatch(&PeerSignal::Connect, Value::Null);
                } else {
                    tracing::debug!(
                        target = "pairing",
                        peer_instance = id,
                        "connect without an accepted offer ignored"
                    );
                }
            }
            PeerEvent::Data(frame) => match self.open_peer_frame(&frame).await {
                Ok(message) => {
                    self.peer_handlers.dispatch(
                        &PeerSignal::Data,
                        json!({ "type": message.kind, "data": message.data }),
                    );
                }
                Err(err) => {
                    tracing::warn!(
                        target = "pairing",
                        peer_instance = id,
                        error = %err,
                        "dropping peer frame"
                    );
                    self.peer_handlers
                        .dispatch(&PeerSignal::Error, json!({ "message": err.to_string() }));
                }
            },
            PeerEvent::Closed => {
                {
                    let mut neg = self.negotiation.lock();
                    if matches!(
                        neg.state,
                        NegotiationState::AnsweringOffer | NegotiationState::Connected
                    ) {
                        neg.answering = false;
                        self.set_state(&mut neg, NegotiationState::Failed);
                    }
                }
                tracing::info!(target = "pairing", peer_instance = id, "peer closed");
                self.peer_handlers.dispatch(&PeerSignal::Close, Value::Null);
            }
            PeerEvent::Error(message) => {
                {
                    let mut neg = self.negotiation.lock();
                    if let Some(watchdog) = neg.watchdog.take() {
                        watchdog.abort();
                    }
                    neg.answering = false;
                    self.set_state(&mut neg, NegotiationState::Failed);
                }
                tracing::warn!(
                    target = "pairing",
                    peer_instance = id,
                    error = %message,
                    "peer transport error"
                );
                self.peer_handlers
                    .dispatch(&PeerSignal::Error, json!({ "message": message }));
            }
        }
    }

    async fn open_peer_frame(&self, frame: &[u8]) -> PairingResult<PeerMessage> {
        let envelope = framing::decode_envelope(frame)?;
        self.decrypt_as(&envelope).await
    }

    fn fail_answer(&self, generation: u64, err: PairingError) -> PairingError {
        {
            let mut neg = self.negotiation.lock();
            if neg.generation != generation {
                return abandoned();
            }
            neg.answering = false;
            if let Some(watchdog) = neg.watchdog.take() {
                watchdog.abort();
            }
            self.set_state(&mut neg, NegotiationState::Failed);
        }
        tracing::warn!(
            target = "pairing",
            peer_instance = generation,
            error = %err,
            "negotiation failed"
        );
        self.peer_handlers
            .dispatch(&PeerSignal::Error, json!({ "message": err.to_string() }));
        err
    }

    /// An offer arrived but could not be opened.
    fn fail_handshake(&self, err: &PairingError) {
        if matches!(err, PairingError::KeysNotInstalled) {
            return;
        }
        {
            let mut neg = self.negotiation.lock();
            if neg.answering || !neg.state.accepts_offer() {
                return;
            }
            self.set_state(&mut neg, NegotiationState::Failed);
        }
        tracing::warn!(target = "pairing", error = %err, "offer rejected");
        self.peer_handlers
            .dispatch(&PeerSignal::Error, json!({ "message": err.to_string() }));
    }

    fn arm_watchdog(
        self: &Arc<Self>,
        neg: &mut Negotiation,
        timeout: Duration,
        phase: &'static str,
    ) {
        let generation = neg.generation;
        let session = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(session) = session.upgrade() {
                session.expire(generation, phase, timeout);
            }
        });
        if let Some(previous) = neg.watchdog.replace(handle) {
            previous.abort();
        }
    }

    fn expire(&self, generation: u64, phase: &'static str, timeout: Duration) {
        {
            let mut neg = self.negotiation.lock();
            if neg.generation != generation
                || !matches!(
                    neg.state,
                    NegotiationState::AwaitingOffer | NegotiationState::AnsweringOffer
                )
            {
                return;
            }
            neg.watchdog = None;
            self.set_state(&mut neg, NegotiationState::Failed);
        }
        tracing::warn!(target = "pairing", phase, ?timeout, "pairing attempt timed out");
        self.peer_handlers.dispatch(
            &PeerSignal::Error,
            json!({ "message": format!("{phase} timed out after {timeout:?}") }),
        );
    }

    fn set_state(&self, neg: &mut Negotiation, next: NegotiationState) {
        if neg.state == next {
            return;
        }
        tracing::debug!(target = "pairing", from = %neg.state, to = %next, "negotiation state");
        neg.state = next;
        self.state_tx.send_replace(next);
    }

    /// Seals `{type, data}` and writes it to the connected peer.
    pub async fn send_over_peer<T>(&self, signal_type: &str, data: &T) -> PairingResult<()>
    where
        T: Serialize + Sync + ?Sized,
    {
        let transport = {
            let neg = self.negotiation.lock();
            match (&neg.peer, neg.state) {
                (Some(slot), NegotiationState::Connected) => Arc::clone(&slot.transport),
                (_, state) => return Err(PairingError::InvalidState(state)),
            }
        };
        let data = serde_json::to_value(data)
            .map_err(|err| PairingError::MalformedPayload(format!("peer data: {err}")))?;
        let envelope = self.encrypt(&PeerMessage::new(signal_type, data)).await?;
        let frame = framing::encode_envelope(&envelope)?;
        transport
            .send(frame)
            .await
            .map_err(|err| PairingError::TransportFailure(err.to_string()))
    }

    pub fn on_peer_signal<F, Fut>(&self, signal: PeerSignal, handler: F) -> bool
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.peer_handlers.bind(signal, handler)
    }

    pub fn off_peer_signal(&self, signal: PeerSignal) -> bool {
        self.peer_handlers.unbind(&signal)
    }
}

impl Drop for PairingSession {
    fn drop(&mut self) {
        if let Some(task) = self.dispatch_task.get_mut().take() {
            task.abort();
        }
        let neg = self.negotiation.get_mut();
        if let Some(watchdog) = neg.watchdog.take() {
            watchdog.abort();
        }
        if let Some(slot) = neg.peer.take() {
            slot.pump.abort();
        }
    }
}

fn abandoned() -> PairingError {
    PairingError::NegotiationFailure("pairing attempt was abandoned".into())
}

fn envelope_from_payload(payload: Value) -> PairingResult<EncryptedEnvelope> {
    serde_json::from_value(payload)
        .map_err(|err| PairingError::MalformedPayload(format!("signal payload: {err}")))
}
