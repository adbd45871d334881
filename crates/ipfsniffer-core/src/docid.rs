//! Deterministic document id derivation.

use sha2::{Digest, Sha256};

/// Stable document id for a `(root CID, path)` pair.
///
/// `hex(sha256(root ":" path))`. Re-observations of the same target produce
/// the same id, which makes indexing an idempotent upsert.
pub fn for_root_and_path(root_cid: &str, path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(root_cid.as_bytes());
    hasher.update(b":");
    hasher.update(path.as_bytes());
    hex::encode(hasher.finalize())
}
