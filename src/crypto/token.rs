use std::collections::BTreeMap;

use base64::prelude::*;
use serde::{Deserialize, Serialize};

use crate::crypto::ethereum::{to_checksum_address, Address};
use crate::crypto::message::{canonical_text, parse_message, MessageInput};
use crate::error::{AuthError, Result};

/// Cookie carrying the single authentication token
pub const AUTH_COOKIE_NAME: &str = "__Host_auth_token";

/// Prefix of per-identity cookies, followed by the checksummed address and chain id
pub const IDENTITY_COOKIE_PREFIX: &str = "__Host_authToken";

/// Client-held proof of a sign-in: the signature and the signed message text
///
/// The token is opaque to the client. It travels as base64url-encoded JSON so
/// it never contains characters that are illegal in a cookie value.
///
/// A `message` given as a JSON object of fields is normalized to its
/// EIP-4361 text on decode.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WireToken")]
pub struct AuthToken {
    pub signature: String,
    pub message: String,
}

#[derive(Deserialize)]
struct WireToken {
    signature: String,
    message: MessageInput,
}

impl TryFrom<WireToken> for AuthToken {
    type Error = AuthError;

    fn try_from(wire: WireToken) -> Result<Self> {
        let message = match wire.message {
            MessageInput::Text(text) => text,
            fields => canonical_text(&fields.into_message()?),
        };
        Ok(Self::new(wire.signature, message))
    }
}

impl AuthToken {
    pub fn new(signature: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            signature: signature.into(),
            message: message.into(),
        }
    }

    /// Encode the token for use as a cookie value
    ///
    /// # Example
    /// ```rust
    /// use siwe_session::AuthToken;
    ///
    /// let token = AuthToken::new("0x", "message text");
    /// let encoded = token.encode().unwrap();
    /// assert_eq!(AuthToken::decode(&encoded).unwrap(), token);
    /// ```
    pub fn encode(&self) -> Result<String> {
        let json = serde_json::to_vec(self)
            .map_err(|e| AuthError::InvalidInput(format!("Failed to encode token: {e}")))?;
        Ok(BASE64_URL_SAFE_NO_PAD.encode(json))
    }

    /// Decode a cookie value back into a token
    ///
    /// # Errors
    /// - `InvalidToken` - Bad base64 or JSON; the cause is not reported
    pub fn decode(value: &str) -> Result<Self> {
        let json = BASE64_URL_SAFE_NO_PAD
            .decode(value.trim())
            .map_err(|_| AuthError::InvalidToken)?;
        serde_json::from_slice(&json).map_err(|_| AuthError::InvalidToken)
    }
}

/// Cookie name used for one (chain, address) identity
pub fn identity_cookie_name(chain_id: u64, address: &Address) -> String {
    format!(
        "{IDENTITY_COOKIE_PREFIX}{}{chain_id}",
        to_checksum_address(address)
    )
}

/// Tokens of one browser profile keyed by chain id, then by checksummed address
///
/// Signing in with one identity never invalidates the others.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet(BTreeMap<u64, BTreeMap<String, AuthToken>>);

impl TokenSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect per-identity tokens from `(cookie name, cookie value)` pairs
    ///
    /// Cookies that fail to decode, or whose name does not match the identity
    /// inside the signed message, are skipped.
    pub fn from_cookies<'a, I>(cookies: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut set = Self::new();
        for (name, value) in cookies {
            if !name.starts_with(IDENTITY_COOKIE_PREFIX) {
                continue;
            }
            let Ok(token) = AuthToken::decode(value) else {
                tracing::debug!(cookie = name, "Skipping undecodable identity cookie");
                continue;
            };
            let Ok(message) = parse_message(&token.message) else {
                tracing::debug!(cookie = name, "Skipping identity cookie with bad message");
                continue;
            };
            if identity_cookie_name(message.chain_id, &message.address) != name {
                tracing::debug!(cookie = name, "Skipping identity cookie with mismatched name");
                continue;
            }
            set.insert(message.chain_id, &message.address, token);
        }
        set
    }

    pub fn insert(&mut self, chain_id: u64, address: &Address, token: AuthToken) {
        self.0
            .entry(chain_id)
            .or_default()
            .insert(to_checksum_address(address), token);
    }

    pub fn get(&self, chain_id: u64, address: &Address) -> Option<&AuthToken> {
        self.0
            .get(&chain_id)
            .and_then(|by_address| by_address.get(&to_checksum_address(address)))
    }

    pub fn remove(&mut self, chain_id: u64, address: &Address) -> Option<AuthToken> {
        let by_address = self.0.get_mut(&chain_id)?;
        let removed = by_address.remove(&to_checksum_address(address));
        if by_address.is_empty() {
            self.0.remove(&chain_id);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.0.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
