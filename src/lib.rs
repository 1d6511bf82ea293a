//! # siwe-session
//!
//! Server-side **Sign-In with Ethereum** (EIP-4361) session authentication. A client proves
//! control of a wallet address by signing a challenge message, and the server turns that
//! proof into a short-lived, cookie-bound session.
//!
//! ## Features
//!
//! - **Single-use nonces** - 17 random alphanumeric characters, registered as pending sessions
//! - **Wallet signature checks** - EOA signatures via secp256k1 recovery, contract wallets via
//!   an EIP-1271 `isValidSignature` call that fails closed
//! - **Atomic session binding** - one compare-and-swap per nonce, so a nonce is consumed once
//! - **Cookie tokens** - one cookie per browser, or one per (chain, address) identity
//! - **axum integration** - ready-made routes and a request guard extractor
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use siwe_session::{siwe_router, AuthService, InMemorySessionStore, SiweConfig};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SiweConfig::from_env()?;
//! let auth = Arc::new(AuthService::new(Arc::new(InMemorySessionStore::new()), None, config));
//! let _sweeper = auth.spawn_sweeper();
//!
//! let app = siwe_router(auth)?;
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:3001").await?;
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Examples
//!
//! See the [basic_workflow example](demos/basic_workflow.rs) for a runnable server:
//!
//! ```bash
//! cargo run --example basic_workflow
//! ```

pub mod auth;
pub mod config;
pub mod crypto;
pub mod error;
pub mod http;
pub mod provider;
pub mod store;
pub mod verifier;

// Re-export main types for easier access
pub use auth::{AuthService, SignInRequest, SignedIn, VerifiedIdentity};
pub use config::{ChainRpcConfig, CookieConfig, SameSitePolicy, SessionConfig, SiweConfig};
pub use crypto::challenge::generate_nonce;
pub use crypto::token::{AuthToken, TokenSet};
pub use error::{AuthError, Result};
pub use http::{siwe_router, SiweSession, SiweState};
pub use provider::JsonRpcChainProvider;
pub use store::{InMemorySessionStore, SessionStore, StoredSession};
pub use verifier::{ChainProvider, SignatureKind, SignatureVerifier};
