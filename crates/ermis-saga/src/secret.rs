//! Alias secrets: generation and hashing.

use rand::Rng;
use rand::distributions::Alphanumeric;
use sha2::{Digest, Sha256};

/// Random alphanumeric secret of `length` characters.
pub fn generate_secret(length: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

/// Hex-encoded SHA-256 of a secret, as stored on relations.
pub fn hash_secret(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}

/// Whether `presented` is one of the stored secrets.
pub fn secret_matches(stored: &[String], presented: &str) -> bool {
    !presented.is_empty() && stored.iter().any(|s| s == presented)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_secret_has_requested_length() {
        let secret = generate_secret(24);
        assert_eq!(secret.len(), 24);
        assert!(secret.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(secret, generate_secret(24));
    }

    #[test]
    fn hash_is_sha256_hex() {
        assert_eq!(
            hash_secret("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn empty_secret_never_matches() {
        let stored = vec!["s3cret".to_string()];
        assert!(secret_matches(&stored, "s3cret"));
        assert!(!secret_matches(&stored, "other"));
        assert!(!secret_matches(&[String::new()], ""));
    }
}
