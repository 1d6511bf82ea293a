use thiserror::Error;

/// Authentication and session lifecycle errors
///
/// Each variant maps to one externally visible outcome. The HTTP layer decides
/// the final status code, since `InvalidToken` is reported differently on the
/// sign-in route than on read paths.
///
/// # Example
/// ```rust
/// use siwe_session::{AuthError, Result};
///
/// fn handle_auth_result(result: Result<()>) {
///     match result {
///         Ok(()) => println!("Operation successful"),
///         Err(AuthError::SessionNotFound) => println!("Request a nonce first"),
///         Err(AuthError::InvalidToken) => println!("Bad proof"),
///         Err(e) => println!("Other error: {}", e),
///     }
/// }
/// ```
#[derive(Debug, Error)]
pub enum AuthError {
    /// Request body is malformed
    ///
    /// This error occurs when:
    /// - A required field is missing or has the wrong type
    /// - The challenge message text cannot be parsed
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// No authentication cookie was presented
    #[error("Unauthorized")]
    MissingToken,

    /// The nonce was never issued, was destroyed, or its pending session expired
    #[error("Session not initialized")]
    SessionNotFound,

    /// The nonce is already bound to a verified message
    #[error("Session already exists")]
    SessionAlreadyExists,

    /// Signature or message verification failed
    ///
    /// Carries no detail: callers must not learn whether the
    /// message or the signature was at fault.
    #[error("Invalid SIWE token")]
    InvalidToken,

    /// The presented nonce is not bound to the presented address
    #[error("Invalid SIWE nonce")]
    InvalidNonce,

    /// The on-chain signature check could not complete
    ///
    /// Always treated as a failed verification, never as success.
    #[error("Verification unavailable: {0}")]
    VerificationUnavailable(String),

    /// The session store failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration rejected at startup
    #[error("Invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, AuthError>;
