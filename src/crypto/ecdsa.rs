use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};

use crate::crypto::ethereum::{address_from_verifying_key, Address};
use crate::crypto::message::{canonical_hash, Message};
use crate::error::{AuthError, Result};

/// Recover the signing address from a 65-byte `r || s || v` signature
///
/// # Arguments
/// * `prehash` - 32-byte digest that was signed
/// * `signature` - Raw signature bytes, `v` being 0/1 or 27/28
///
/// # Returns
/// * `Ok(Address)` - Address whose key produced the signature
/// * `Err(AuthError::InvalidToken)` - Malformed signature or failed recovery
pub fn recover_signer(prehash: &[u8; 32], signature: &[u8]) -> Result<Address> {
    if signature.len() != 65 {
        return Err(AuthError::InvalidToken);
    }

    let mut sig = Signature::from_slice(&signature[..64]).map_err(|_| AuthError::InvalidToken)?;
    let mut recovery_id = normalize_recovery_id(signature[64])?;

    if let Some(normalized) = sig.normalize_s() {
        sig = normalized;
        recovery_id = RecoveryId::new(!recovery_id.is_y_odd(), recovery_id.is_x_reduced());
    }

    let key = VerifyingKey::recover_from_prehash(prehash, &sig, recovery_id)
        .map_err(|_| AuthError::InvalidToken)?;

    Ok(address_from_verifying_key(&key))
}

/// Verify an externally-owned account's signature over a challenge message
///
/// Recovers the signer of the message's EIP-191 digest and checks it against
/// the address the message claims. Unlike `Message::verify_eip191`, high-S
/// signatures are normalized first, so wallets that emit them still verify.
///
/// # Errors
/// - `InvalidToken` - For any mismatch or malformed input
pub fn verify_signature(message: &Message, signature: &[u8]) -> Result<()> {
    let signer = recover_signer(&canonical_hash(message)?, signature)?;
    if signer != message.address {
        return Err(AuthError::InvalidToken);
    }
    Ok(())
}

fn normalize_recovery_id(raw: u8) -> Result<RecoveryId> {
    let id = match raw {
        27 | 28 => raw - 27,
        0 | 1 => raw,
        _ => return Err(AuthError::InvalidToken),
    };
    RecoveryId::from_byte(id).ok_or(AuthError::InvalidToken)
}
