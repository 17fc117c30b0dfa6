use sha2::{Digest, Sha256};

/// Sync signature of a sidecar: hex SHA-256 of its bytes. Content based,
/// so touching a file without changing it does not force a re-index.
pub fn signature(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_is_stable_hex() {
        let sig = signature(b"abc");
        assert_eq!(
            sig,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(signature(b"abc"), sig);
        assert_ne!(signature(b"abd"), sig);
    }
}
