//! Thin adapter over the `siwe` crate, which owns the EIP-4361 text format.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
pub use siwe::Message;

use crate::crypto::ethereum::{parse_address, to_checksum_address};
use crate::error::{AuthError, Result};

/// Parse EIP-4361 message text
///
/// # Errors
/// - `InvalidInput` - The text is not a well-formed challenge message
pub fn parse_message(raw: &str) -> Result<Message> {
    raw.parse::<Message>()
        .map_err(|e| AuthError::InvalidInput(format!("Invalid SIWE message: {e}")))
}

/// Canonical text a wallet signs for this message
pub fn canonical_text(message: &Message) -> String {
    message.to_string()
}

/// EIP-191 `personal_sign` digest of the canonical message text
///
/// # Errors
/// - `InvalidToken` - The message cannot be rendered
pub fn canonical_hash(message: &Message) -> Result<[u8; 32]> {
    message.eip191_hash().map_err(|_| AuthError::InvalidToken)
}

/// Whether the message's `expiration-time` and `not-before` bounds hold now
pub fn is_valid_now(message: &Message) -> bool {
    message.valid_now()
}

/// Challenge message as clients submit it
///
/// Either the EIP-4361 text itself, or its fields as a JSON object the way
/// JavaScript SIWE clients serialize a message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageInput {
    Text(String),
    Fields(MessageFields),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageFields {
    pub domain: String,
    pub address: String,
    #[serde(default)]
    pub statement: Option<String>,
    pub uri: String,
    pub version: String,
    pub chain_id: u64,
    pub nonce: String,
    pub issued_at: String,
    #[serde(default)]
    pub expiration_time: Option<String>,
    #[serde(default)]
    pub not_before: Option<String>,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub resources: Vec<String>,
}

impl From<&str> for MessageInput {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl MessageInput {
    /// Resolve into a parsed message
    ///
    /// Field input is rendered and parsed back, so both forms pass the same
    /// EIP-4361 checks (checksummed address, nonce shape, and so on).
    ///
    /// # Errors
    /// - `InvalidInput` - A field or the text is malformed
    pub fn into_message(self) -> Result<Message> {
        match self {
            Self::Text(text) => parse_message(&text),
            Self::Fields(fields) => parse_message(&canonical_text(&fields.into_message()?)),
        }
    }
}

impl MessageFields {
    fn into_message(self) -> Result<Message> {
        if self.version.trim() != "1" {
            return Err(AuthError::InvalidInput(format!(
                "Unsupported SIWE version '{}'",
                self.version
            )));
        }
        let address = parse_address(&self.address)
            .ok_or_else(|| AuthError::InvalidInput("Invalid SIWE address".to_string()))?;

        Ok(Message {
            domain: parse_field("domain", &self.domain)?,
            address,
            statement: self.statement,
            uri: parse_field("uri", &self.uri)?,
            version: siwe::Version::V1,
            chain_id: self.chain_id,
            nonce: self.nonce,
            issued_at: parse_field("issuedAt", &self.issued_at)?,
            expiration_time: self
                .expiration_time
                .map(|v| parse_field("expirationTime", &v))
                .transpose()?,
            not_before: self
                .not_before
                .map(|v| parse_field("notBefore", &v))
                .transpose()?,
            request_id: self.request_id,
            resources: self
                .resources
                .iter()
                .map(|r| parse_field("resources", r))
                .collect::<Result<Vec<_>>>()?,
        })
    }
}

fn parse_field<T: FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .parse::<T>()
        .map_err(|_| AuthError::InvalidInput(format!("Invalid SIWE field '{name}'")))
}

/// JSON rendering of a verified message, returned to clients
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub domain: String,
    pub address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statement: Option<String>,
    pub uri: String,
    pub version: String,
    pub chain_id: u64,
    pub nonce: String,
    pub issued_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiration_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_before: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<String>,
}

impl From<&Message> for MessageView {
    fn from(message: &Message) -> Self {
        Self {
            domain: message.domain.to_string(),
            address: to_checksum_address(&message.address),
            statement: message.statement.clone(),
            uri: message.uri.to_string(),
            version: match message.version {
                siwe::Version::V1 => "1".to_string(),
            },
            chain_id: message.chain_id,
            nonce: message.nonce.clone(),
            issued_at: message.issued_at.to_string(),
            expiration_time: message.expiration_time.as_ref().map(ToString::to_string),
            not_before: message.not_before.as_ref().map(ToString::to_string),
            request_id: message.request_id.clone(),
            resources: message.resources.iter().map(ToString::to_string).collect(),
        }
    }
}
