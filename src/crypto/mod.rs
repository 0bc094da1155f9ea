//! Hashing primitives for the relay.
//!
//! SHA-256 is treated as a host service: the engine only ever asks a [`HashService`]
//! for single SHA-256 digests and composes them into Bitcoin's `hash256`. The default
//! service is backed by the `sha2` crate.

use sha2::{Digest, Sha256};

use crate::core::types::Hash256;

/// A provider of single SHA-256 digests.
pub trait HashService {
    fn sha256(&self, data: &[u8]) -> Hash256;
}

/// In-process SHA-256.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Hasher;

impl HashService for Sha256Hasher {
    fn sha256(&self, data: &[u8]) -> Hash256 {
        let digest = Sha256::digest(data);
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        out
    }
}

impl<T: HashService + ?Sized> HashService for &T {
    fn sha256(&self, data: &[u8]) -> Hash256 {
        (**self).sha256(data)
    }
}

/// Bitcoin's hash256 (double SHA-256). The digest is returned in the byte order
/// SHA-256 produces it, which is the little-endian order headers store hashes in.
pub fn hash256<H: HashService + ?Sized>(hasher: &H, data: &[u8]) -> Hash256 {
    let first = hasher.sha256(data);
    hasher.sha256(&first)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_empty() {
        let digest = Sha256Hasher.sha256(b"");
        assert_eq!(
            hex::encode(digest),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_hash256_is_double_sha256() {
        let once = Sha256Hasher.sha256(b"hello");
        let twice = Sha256Hasher.sha256(&once);
        assert_eq!(hash256(&Sha256Hasher, b"hello"), twice);
        assert_eq!(
            hex::encode(twice),
            "9595c9df90075148eb06860365df33584b75bff782a510c6cd4883a419833d50"
        );
    }

    #[test]
    fn test_custom_service_is_used() {
        struct Constant;
        impl HashService for Constant {
            fn sha256(&self, _data: &[u8]) -> Hash256 {
                [7u8; 32]
            }
        }
        assert_eq!(hash256(&Constant, b"anything"), [7u8; 32]);
    }
}
