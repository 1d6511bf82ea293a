//! Wallet cryptography and the cookie token codec.

pub mod challenge;
pub mod ecdsa;
pub mod ethereum;
pub mod message;
pub mod token;

pub use ecdsa::verify_signature;
pub use message::{parse_message, Message};
