use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::crypto::ecdsa;
use crate::crypto::ethereum::{
    encode_is_valid_signature_args, is_magic_value, to_checksum_address, Address,
    IS_VALID_SIGNATURE_SELECTOR,
};
use crate::crypto::message::{canonical_hash, is_valid_now, Message};
use crate::crypto::token::AuthToken;
use crate::error::{AuthError, Result};
use crate::store::SessionStore;

/// Signature value meaning "validate on-chain": the hex form of an empty byte string
pub const CONTRACT_SIGNATURE_SENTINEL: &str = "0x";

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("no RPC endpoint configured for chain {0}")]
    UnsupportedChain(u64),

    #[error("RPC transport failure: {0}")]
    Transport(String),

    #[error("RPC call reverted or failed: {0}")]
    Rpc(String),

    #[error("malformed RPC response: {0}")]
    Malformed(String),
}

/// Read-only access to contract state on a chain
#[async_trait::async_trait]
pub trait ChainProvider: Send + Sync {
    /// Execute `selector(args)` against `contract` and return the raw result
    async fn call(
        &self,
        chain_id: u64,
        contract: Address,
        selector: [u8; 4],
        args: &[u8],
    ) -> std::result::Result<Vec<u8>, ProviderError>;
}

/// How a presented signature must be checked
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SignatureKind {
    /// Raw `r || s || v` bytes from an externally-owned account
    Eoa(Vec<u8>),
    /// Contract wallet, validated through EIP-1271
    ContractSentinel,
}

impl SignatureKind {
    /// Select the verification strategy from the signature field alone
    ///
    /// # Errors
    /// - `InvalidToken` - The signature is not `0x`-prefixed hex
    pub fn classify(signature: &str) -> Result<Self> {
        let signature = signature.trim();
        if signature == CONTRACT_SIGNATURE_SENTINEL {
            return Ok(Self::ContractSentinel);
        }
        let hex_part = signature
            .strip_prefix("0x")
            .ok_or(AuthError::InvalidToken)?;
        let bytes = hex::decode(hex_part).map_err(|_| AuthError::InvalidToken)?;
        Ok(Self::Eoa(bytes))
    }
}

/// Validates signed challenge messages for both wallet kinds
pub struct SignatureVerifier {
    store: Arc<dyn SessionStore>,
    provider: Option<Arc<dyn ChainProvider>>,
    timeout: Duration,
}

impl SignatureVerifier {
    pub fn new(
        store: Arc<dyn SessionStore>,
        provider: Option<Arc<dyn ChainProvider>>,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            provider,
            timeout,
        }
    }

    /// Verify `signature` over `message`
    ///
    /// # Returns
    /// * `Ok(())` - The message's address produced, or its contract accepted, the signature
    ///
    /// # Errors
    /// - `InvalidToken` - Bad signature, wrong signer, rejected by the contract, or
    ///   outside the message's validity window
    /// - `SessionNotFound` - Contract-wallet path only: the nonce was never issued
    /// - `VerificationUnavailable` - Contract-wallet path only: the chain call failed
    ///   or timed out
    pub async fn verify(&self, message: &Message, signature: &str) -> Result<()> {
        if !is_valid_now(message) {
            tracing::debug!(nonce = %message.nonce, "Message outside its validity window");
            return Err(AuthError::InvalidToken);
        }

        match SignatureKind::classify(signature)? {
            SignatureKind::Eoa(bytes) => ecdsa::verify_signature(message, &bytes),
            SignatureKind::ContractSentinel => self.verify_contract_wallet(message).await,
        }
    }

    /// Verify the pair carried by a cookie token, returning the parsed message
    pub async fn verify_token(&self, token: &AuthToken) -> Result<Message> {
        let message = token
            .message
            .parse::<Message>()
            .map_err(|_| AuthError::InvalidToken)?;
        self.verify(&message, &token.signature).await?;
        Ok(message)
    }

    async fn verify_contract_wallet(&self, message: &Message) -> Result<()> {
        if self.store.get(&message.nonce).await?.is_none() {
            return Err(AuthError::SessionNotFound);
        }

        let provider = self.provider.as_ref().ok_or_else(|| {
            AuthError::VerificationUnavailable("no chain provider configured".to_string())
        })?;

        let args = encode_is_valid_signature_args(&canonical_hash(message)?, &[]);
        let call = provider.call(
            message.chain_id,
            message.address,
            IS_VALID_SIGNATURE_SELECTOR,
            &args,
        );

        let returned = match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(returned)) => returned,
            Ok(Err(e)) => {
                tracing::warn!(
                    wallet = %to_checksum_address(&message.address),
                    chain_id = message.chain_id,
                    error = %e,
                    "Contract wallet check failed"
                );
                return Err(AuthError::VerificationUnavailable(e.to_string()));
            }
            Err(_) => {
                tracing::warn!(
                    wallet = %to_checksum_address(&message.address),
                    chain_id = message.chain_id,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Contract wallet check timed out"
                );
                return Err(AuthError::VerificationUnavailable(
                    "chain call timed out".to_string(),
                ));
            }
        };

        if is_magic_value(&returned) {
            Ok(())
        } else {
            Err(AuthError::InvalidToken)
        }
    }
}
