use std::time::Duration;

pub const DEFAULT_NEGOTIATION_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";
pub const RECEIVER_ROLE: &str = "receiver";

const ENV_NEGOTIATION_TIMEOUT_MS: &str = "PAIRING_NEGOTIATION_TIMEOUT_MS";
const ENV_OFFER_TIMEOUT_MS: &str = "PAIRING_OFFER_TIMEOUT_MS";
const ENV_HEARTBEAT_SECS: &str = "PAIRING_HEARTBEAT_SECS";
const ENV_ICE_SERVERS: &str = "PAIRING_ICE_SERVERS";
const ENV_LOCALHOST_ONLY: &str = "PAIRING_LOCALHOST_ONLY";

/// Tunables for a pairing session and the default collaborators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingConfig {
    /// Upper bound for an accepted offer to reach `Connected`.
    pub negotiation_timeout: Duration,
    /// Optional bound on how long a connected session waits for an offer.
    pub offer_timeout: Option<Duration>,
    /// Keepalive period for the WebSocket signaling channel. Zero disables it.
    pub heartbeat_interval: Duration,
    /// STUN/TURN urls handed to the WebRTC peer connection.
    pub ice_servers: Vec<String>,
    /// Value sent as the `role` connect parameter.
    pub role: String,
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            negotiation_timeout: DEFAULT_NEGOTIATION_TIMEOUT,
            offer_timeout: None,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            ice_servers: vec![DEFAULT_STUN_SERVER.to_string()],
            role: RECEIVER_ROLE.to_string(),
        }
    }
}

impl PairingConfig {
    /// Defaults overridden by `PAIRING_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(ms) = parse_millis(&lookup, ENV_NEGOTIATION_TIMEOUT_MS) {
            config.negotiation_timeout = ms;
        }
        if let Some(ms) = parse_millis(&lookup, ENV_OFFER_TIMEOUT_MS) {
            config.offer_timeout = Some(ms);
        }
        if let Some(secs) = lookup(ENV_HEARTBEAT_SECS) {
            match secs.trim().parse::<u64>() {
                Ok(secs) => config.heartbeat_interval = Duration::from_secs(secs),
                Err(err) => tracing::warn!(
                    target = "pairing",
                    key = ENV_HEARTBEAT_SECS,
                    value = %secs,
                    error = %err,
                    "ignoring invalid heartbeat override"
                ),
            }
        }
        if let Some(servers) = lookup(ENV_ICE_SERVERS) {
            config.ice_servers = servers
                .split(',')
                .map(str::trim)
                .filter(|url| !url.is_empty())
                .map(str::to_string)
                .collect();
        }
        if lookup(ENV_LOCALHOST_ONLY).is_some() {
            config.ice_servers.clear();
        }

        config
    }

    pub fn with_negotiation_timeout(mut self, timeout: Duration) -> Self {
        self.negotiation_timeout = timeout;
        self
    }

    pub fn with_offer_timeout(mut self, timeout: Duration) -> Self {
        self.offer_timeout = Some(timeout);
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_ice_servers<I, S>(mut self, servers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ice_servers = servers.into_iter().map(Into::into).collect();
        self
    }

    /// No STUN/TURN; host candidates only.
    pub fn localhost() -> Self {
        Self {
            ice_servers: Vec::new(),
            ..Self::default()
        }
    }
}

fn parse_millis(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<Duration> {
    let raw = lookup(key)?;
    match raw.trim().parse::<u64>() {
        Ok(0) => {
            tracing::warn!(target = "pairing", key, "ignoring zero timeout override");
            None
        }
        Ok(ms) => Some(Duration::from_millis(ms)),
        Err(err) => {
            tracing::warn!(
                target = "pairing",
                key,
                value = %raw,
                error = %err,
                "ignoring invalid timeout override"
            );
            None
        }
    }
}
