use std::fmt;

/// Progress of the current pairing attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NegotiationState {
    Idle,
    AwaitingOffer,
    AnsweringOffer,
    Connected,
    Failed,
}

impl NegotiationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            NegotiationState::Idle => "idle",
            NegotiationState::AwaitingOffer => "awaiting_offer",
            NegotiationState::AnsweringOffer => "answering_offer",
            NegotiationState::Connected => "connected",
            NegotiationState::Failed => "failed",
        }
    }

    /// Whether an offer may be accepted from this state.
    pub fn accepts_offer(&self) -> bool {
        matches!(
            self,
            NegotiationState::Idle | NegotiationState::AwaitingOffer
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, NegotiationState::Failed)
    }
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
