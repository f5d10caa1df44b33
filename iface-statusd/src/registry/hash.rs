use sha2::{Sha256, Digest};
use shared::types::StatusSnapshot;

/// Computes a SHA-256 hash of a status snapshot.
/// Entries serialize ordered by interface name, so the digest does not depend
/// on the order in which the control plane reported them.
pub fn compute_hash(snapshot: &StatusSnapshot) -> String {
    let json = serde_json::to_vec(snapshot)
        .expect("Failed to serialize snapshot for hashing");

    let hash = Sha256::digest(&json);
    hex::encode(hash)
}
