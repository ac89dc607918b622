use std::fmt;

use crate::crypto::KeyMaterial;
use crate::signaling::ConnectParams;

pub const PARAM_ROLE: &str = "role";
pub const PARAM_CONNECTION_ID: &str = "connectionId";
pub const PARAM_AUTH_TOKEN: &str = "authToken";

/// Identity presented when joining the signaling channel.
#[derive(Clone, PartialEq, Eq)]
pub struct SignalingIdentity {
    pub role: String,
    pub connection_id: String,
    pub auth_token: String,
}

impl SignalingIdentity {
    pub fn from_keys(role: &str, keys: &KeyMaterial) -> Self {
        Self {
            role: role.to_string(),
            connection_id: keys.connection_id().to_string(),
            auth_token: keys.auth_token().to_string(),
        }
    }

    pub fn to_params(&self) -> ConnectParams {
        ConnectParams::new()
            .with(PARAM_ROLE, self.role.as_str())
            .with(PARAM_CONNECTION_ID, self.connection_id.as_str())
            .with(PARAM_AUTH_TOKEN, self.auth_token.as_str())
    }
}

impl fmt::Debug for SignalingIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalingIdentity")
            .field("role", &self.role)
            .field("connection_id", &self.connection_id)
            .field("auth_token", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_carry_the_triple() {
        let keys = KeyMaterial::new("A", "B", "c1", "tok");
        let identity = SignalingIdentity::from_keys("receiver", &keys);
        let params = identity.to_params();
        assert_eq!(params.get(PARAM_ROLE), Some("receiver"));
        assert_eq!(params.get(PARAM_CONNECTION_ID), Some("c1"));
        assert_eq!(params.get(PARAM_AUTH_TOKEN), Some("tok"));
        assert_eq!(params.len(), 3);
        assert!(!format!("{identity:?}").contains("tok"));
    }
}
