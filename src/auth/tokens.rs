use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};

/// Random 32-byte secret, hex encoded. Used for refresh tokens and invites.
pub fn generate_opaque_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Only hashes of opaque tokens are persisted.
pub fn hash_opaque_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}
