use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::{
    config::SiweConfig,
    crypto::{
        challenge::generate_nonce,
        ethereum::{to_checksum_address, Address},
        message::{canonical_text, parse_message, Message, MessageInput, MessageView},
        token::AuthToken,
    },
    error::{AuthError, Result},
    store::{spawn_session_sweeper, SessionStore, StoredSession},
    verifier::{ChainProvider, SignatureVerifier},
};

/// Sign-in service driving the session state machine
///
/// A nonce moves through three states:
/// 1. `Pending` - issued by [`AuthService::generate_nonce`]
/// 2. `Bound` - a verified message consumed it in [`AuthService::sign_in`]
/// 3. `Destroyed` - removed by [`AuthService::sign_out`] or by expiry
///
/// There is no way back from `Destroyed`. The service owns no mutable state of
/// its own; all of it lives in the injected [`SessionStore`].
pub struct AuthService {
    store: Arc<dyn SessionStore>,
    verifier: SignatureVerifier,
    pub config: SiweConfig,
}

/// Body of a sign-in request
///
/// `message` is the EIP-4361 text the wallet signed, or the same message as a
/// JSON object of fields; `signature` is the `0x`-prefixed hex signature, or
/// `0x` for a contract wallet.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SignInRequest {
    pub signature: String,
    pub message: MessageInput,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NonceResponse {
    pub nonce: String,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeResponse {
    pub logged_in: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<MessageView>,
}

/// Identity proven by a request's token
///
/// Created fresh for every request and never persisted.
#[derive(Clone, Debug)]
pub struct VerifiedIdentity {
    pub address: Address,
    pub chain_id: u64,
    pub message: Message,
}

impl VerifiedIdentity {
    fn from_message(message: Message) -> Self {
        Self {
            address: message.address,
            chain_id: message.chain_id,
            message,
        }
    }

    pub fn nonce(&self) -> &str {
        &self.message.nonce
    }

    pub fn checksum_address(&self) -> String {
        to_checksum_address(&self.address)
    }
}

/// Outcome of a successful sign-in
#[derive(Clone, Debug)]
pub struct SignedIn {
    pub identity: VerifiedIdentity,
    pub token: AuthToken,
}

impl AuthService {
    /// Create a service over `store`
    ///
    /// `provider` enables contract-wallet sign-ins; without one they fail as
    /// `VerificationUnavailable`.
    pub fn new(
        store: Arc<dyn SessionStore>,
        provider: Option<Arc<dyn ChainProvider>>,
        config: SiweConfig,
    ) -> Self {
        let verifier = SignatureVerifier::new(store.clone(), provider, config.chain.timeout());
        Self {
            store,
            verifier,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Issue a fresh nonce and register it as a pending session
    ///
    /// # Errors
    /// - `Storage` - The pending session could not be written; no nonce is returned
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn generate_nonce(&self) -> Result<String> {
        let nonce = generate_nonce();
        self.store
            .save(StoredSession::pending(nonce.clone(), Utc::now()))
            .await?;
        tracing::info!("Issued sign-in nonce");
        Ok(nonce)
    }

    /// Bind a signed challenge message to its pending session
    ///
    /// Checks run in one fixed order:
    /// 1. the nonce exists and its pending session has not expired
    /// 2. the signature verifies
    /// 3. the nonce is not already bound, checked atomically with the write
    ///
    /// # Errors
    /// - `InvalidInput` - The message text cannot be parsed
    /// - `SessionNotFound` - Unknown, destroyed or expired nonce
    /// - `InvalidToken` - Signature verification failed; the session stays pending
    /// - `VerificationUnavailable` - Contract-wallet check could not complete
    /// - `SessionAlreadyExists` - The nonce was already consumed
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn sign_in(&self, message_text: &str, signature: &str) -> Result<SignedIn> {
        self.sign_in_message(parse_message(message_text)?, signature)
            .await
    }

    /// [`AuthService::sign_in`] for an already parsed message
    pub async fn sign_in_message(&self, message: Message, signature: &str) -> Result<SignedIn> {
        let now = Utc::now();

        let session = self
            .store
            .get(&message.nonce)
            .await?
            .ok_or(AuthError::SessionNotFound)?;
        if !session.is_bound()
            && session.is_expired(now, self.config.pending_ttl(), self.config.bound_ttl())
        {
            self.store.remove(&session.nonce).await?;
            tracing::info!("Rejected sign-in on expired nonce");
            return Err(AuthError::SessionNotFound);
        }

        if let Err(e) = self.verifier.verify(&message, signature).await {
            tracing::warn!(
                wallet = %to_checksum_address(&message.address),
                error = %e,
                "Sign-in signature rejected"
            );
            return Err(e);
        }

        self.store
            .bind(&message.nonce, message.clone(), now)
            .await?;

        let token = AuthToken::new(signature.trim(), canonical_text(&message));
        let identity = VerifiedIdentity::from_message(message);
        tracing::info!(
            wallet = %identity.checksum_address(),
            chain_id = identity.chain_id,
            "Signed in"
        );

        Ok(SignedIn { identity, token })
    }

    /// Validate a cookie token against the session store
    ///
    /// The token must verify on its own, and its nonce must be bound to a
    /// message for the same address and chain. The latter stops a second party
    /// from re-signing a nonce they did not bind.
    ///
    /// # Errors
    /// - `InvalidToken` - The token does not verify
    /// - `InvalidNonce` - Nonce unknown, still pending, expired or bound to another identity
    /// - `SessionNotFound`, `VerificationUnavailable` - Contract-wallet path failures
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn authenticate(&self, token: &AuthToken) -> Result<VerifiedIdentity> {
        let message = self.verifier.verify_token(token).await?;

        let session = self
            .store
            .get(&message.nonce)
            .await?
            .ok_or(AuthError::InvalidNonce)?;
        let bound = session.message().ok_or(AuthError::InvalidNonce)?;
        if bound.address != message.address || bound.chain_id != message.chain_id {
            tracing::warn!(
                wallet = %to_checksum_address(&message.address),
                "Token presented for a nonce bound to another identity"
            );
            return Err(AuthError::InvalidNonce);
        }

        if session.is_expired(Utc::now(), self.config.pending_ttl(), self.config.bound_ttl()) {
            self.store.remove(&session.nonce).await?;
            return Err(AuthError::InvalidNonce);
        }

        Ok(VerifiedIdentity::from_message(message))
    }

    /// Destroy the session behind a verified identity
    ///
    /// Takes the identity by value: once signed out it cannot be used again.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn sign_out(&self, identity: VerifiedIdentity) -> Result<()> {
        self.store.remove(identity.nonce()).await?;
        tracing::info!(wallet = %identity.checksum_address(), "Signed out");
        Ok(())
    }

    /// Remove sessions that outlived their TTL
    pub async fn purge_expired(&self) -> Result<usize> {
        Ok(self
            .store
            .purge_expired(
                Utc::now(),
                self.config.pending_ttl(),
                self.config.bound_ttl(),
            )
            .await?)
    }

    /// Start the periodic purge on the current tokio runtime
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        spawn_session_sweeper(
            self.store.clone(),
            std::time::Duration::from_secs(self.config.session.sweep_interval_secs),
            self.config.pending_ttl(),
            self.config.bound_ttl(),
        )
    }
}
