use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, mpsc};

use super::{ConnectParams, SignalFrame, SignalingChannel, SignalingError, SignalingResult};

#[derive(Default)]
struct MemoryState {
    address: Option<String>,
    params: Option<ConnectParams>,
    inbound_tx: Option<mpsc::UnboundedSender<SignalFrame>>,
    sent: Vec<SignalFrame>,
    connect_error: Option<String>,
}

/// In-process signaling channel for tests.
///
/// Records what the session connected with and sent, and lets the test inject
/// inbound frames as if the relay had delivered them.
pub struct MemorySignaling {
    state: Mutex<MemoryState>,
    outbound_tx: mpsc::UnboundedSender<SignalFrame>,
    outbound_rx: AsyncMutex<mpsc::UnboundedReceiver<SignalFrame>>,
}

impl MemorySignaling {
    pub fn new() -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        Self {
            state: Mutex::new(MemoryState::default()),
            outbound_tx,
            outbound_rx: AsyncMutex::new(outbound_rx),
        }
    }

    /// A channel whose `connect` always fails with `reason`.
    pub fn unreachable(reason: impl Into<String>) -> Self {
        let signaling = Self::new();
        signaling.state.lock().connect_error = Some(reason.into());
        signaling
    }

    pub fn connected_address(&self) -> Option<String> {
        self.state.lock().address.clone()
    }

    pub fn connected_params(&self) -> Option<ConnectParams> {
        self.state.lock().params.clone()
    }

    pub fn sent(&self) -> Vec<SignalFrame> {
        self.state.lock().sent.clone()
    }

    /// Waits for the next frame the session sends.
    pub async fn next_sent(&self) -> Option<SignalFrame> {
        self.outbound_rx.lock().await.recv().await
    }

    /// Delivers `frame` to the connected session. Returns `false` when closed.
    pub fn inject(&self, frame: SignalFrame) -> bool {
        let state = self.state.lock();
        match state.inbound_tx.as_ref() {
            Some(tx) => tx.send(frame).is_ok(),
            None => false,
        }
    }

    /// Simulates the relay dropping the connection.
    pub fn drop_connection(&self) {
        self.state.lock().inbound_tx = None;
    }
}

impl Default for MemorySignaling {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SignalingChannel for MemorySignaling {
    async fn connect(
        &self,
        address: &str,
        params: &ConnectParams,
    ) -> SignalingResult<mpsc::UnboundedReceiver<SignalFrame>> {
        let mut state = self.state.lock();
        if let Some(reason) = state.connect_error.clone() {
            return Err(SignalingError::Connect(reason));
        }
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        state.address = Some(address.to_string());
        state.params = Some(params.clone());
        state.inbound_tx = Some(inbound_tx);
        Ok(inbound_rx)
    }

    fn send(&self, frame: SignalFrame) -> SignalingResult<()> {
        let mut state = self.state.lock();
        if state.inbound_tx.is_none() {
            return Err(SignalingError::NotConnected);
        }
        state.sent.push(frame.clone());
        let _ = self.outbound_tx.send(frame);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.state.lock().inbound_tx.is_some()
    }

    async fn close(&self) {
        self.drop_connection();
    }
}
