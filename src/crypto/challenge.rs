/// Length of every issued nonce
pub const NONCE_LENGTH: usize = 17;

/// Generate a cryptographically secure random nonce
///
/// Returns 17 characters drawn from `[A-Za-z0-9]` by the thread-local CSPRNG,
/// the nonce format the `siwe` crate itself issues.
///
/// # Example
/// ```rust
/// use siwe_session::crypto::challenge::{generate_nonce, NONCE_LENGTH};
///
/// let nonce = generate_nonce();
/// assert_eq!(nonce.len(), NONCE_LENGTH);
/// ```
pub fn generate_nonce() -> String {
    siwe::generate_nonce()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generate_nonce_shape() {
        for _ in 0..100 {
            let nonce = generate_nonce();
            assert_eq!(nonce.len(), NONCE_LENGTH);
            assert!(nonce
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_'));
        }
    }

    #[test]
    fn test_nonces_do_not_collide() {
        let nonces: HashSet<String> = (0..10_000).map(|_| generate_nonce()).collect();
        assert_eq!(nonces.len(), 10_000);
    }

    #[test]
    fn test_nonces_unique_across_threads() {
        let handles: Vec<_> = (0..4)
            .map(|_| std::thread::spawn(|| (0..2_500).map(|_| generate_nonce()).collect::<Vec<_>>()))
            .collect();

        let mut all = HashSet::new();
        for handle in handles {
            for nonce in handle.join().unwrap() {
                assert!(all.insert(nonce));
            }
        }
        assert_eq!(all.len(), 10_000);
    }
}
