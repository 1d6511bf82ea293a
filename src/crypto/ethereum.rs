use k256::ecdsa::VerifyingKey;
use sha3::{Digest, Keccak256};

/// Format an address with the EIP-55 mixed-case checksum
pub use siwe::eip55 as to_checksum_address;

/// Raw 20-byte account address
pub type Address = [u8; 20];

/// `isValidSignature(bytes32,bytes)` selector from EIP-1271
pub const IS_VALID_SIGNATURE_SELECTOR: [u8; 4] = [0x16, 0x26, 0xba, 0x7e];

/// Value a contract wallet returns when it accepts a signature
pub const EIP1271_MAGIC_VALUE: [u8; 4] = IS_VALID_SIGNATURE_SELECTOR;

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// Derive the account address controlled by a secp256k1 public key
pub fn address_from_verifying_key(key: &VerifyingKey) -> Address {
    let encoded = key.to_encoded_point(false);
    // Skip the 0x04 SEC1 tag.
    let digest = keccak256(&encoded.as_bytes()[1..]);
    let mut address = [0u8; 20];
    address.copy_from_slice(&digest[12..]);
    address
}

/// Parse a `0x`-prefixed address, ignoring case
pub fn parse_address(value: &str) -> Option<Address> {
    let hex_part = value.trim().strip_prefix("0x")?;
    let bytes = hex::decode(hex_part).ok()?;
    bytes.try_into().ok()
}

/// ABI-encode the `(bytes32 hash, bytes signature)` arguments of `isValidSignature`
pub fn encode_is_valid_signature_args(hash: &[u8; 32], signature: &[u8]) -> Vec<u8> {
    let padded_len = signature.len().div_ceil(32) * 32;
    let mut out = Vec::with_capacity(32 * 3 + padded_len);

    out.extend_from_slice(hash);
    out.extend_from_slice(&abi_word(64));
    out.extend_from_slice(&abi_word(signature.len() as u64));
    out.extend_from_slice(signature);
    out.resize(32 * 3 + padded_len, 0);
    out
}

/// Whether an `isValidSignature` return value carries the acceptance magic value
///
/// The `bytes4` result is left-aligned in a 32-byte word.
pub fn is_magic_value(returned: &[u8]) -> bool {
    returned.len() == 32 && returned[..4] == EIP1271_MAGIC_VALUE
}

fn abi_word(value: u64) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[24..].copy_from_slice(&value.to_be_bytes());
    word
}
