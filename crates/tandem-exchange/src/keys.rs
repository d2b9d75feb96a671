//! Naming and hashing conventions for uploaded selfies.

use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Prefix every presigned selfie key starts with.
pub const SELFIE_PREFIX: &str = "selfies/";

/// Keys presigned for `owner` live under `selfies/{owner}/`.
pub fn owner_prefix(owner: Uuid) -> String {
    format!("{}{}/", SELFIE_PREFIX, owner)
}

pub fn new_selfie_key(owner: Uuid) -> String {
    format!("{}{}.jpg", owner_prefix(owner), Uuid::new_v4())
}

/// Whether `key` was presigned for `owner`.
pub fn is_owned_by(key: &str, owner: Uuid) -> bool {
    key.strip_prefix(&owner_prefix(owner))
        .is_some_and(|rest| !rest.is_empty() && !rest.contains('/'))
}

/// Lowercase hex SHA-256, the form the media index is keyed by.
pub fn content_hash(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_belong_to_their_uploader() {
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let key = new_selfie_key(alice);

        assert!(is_owned_by(&key, alice));
        assert!(!is_owned_by(&key, bob));
        assert!(!is_owned_by("selfies/alice.jpg", alice));
        assert!(!is_owned_by(&owner_prefix(alice), alice));
        assert!(!is_owned_by(&format!("{}x/y.jpg", owner_prefix(alice)), alice));
    }

    #[test]
    fn hash_is_hex_sha256() {
        assert_eq!(
            content_hash(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
