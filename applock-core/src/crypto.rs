//! PIN hashing for the enforcement gate.

use sha2::{Digest, Sha256};

/// Application-level salt mixed into every PIN digest.
///
/// Static and shared across installs: the stored hash resists a casual look
/// at the database, not an offline dictionary attack against it.
const PIN_SALT: &str = "applockd-pin-v1";

/// Minimum accepted length when establishing a new PIN.
pub const MIN_PIN_LEN: usize = 4;

/// Salted one-way digest of a PIN, hex-encoded.
pub fn hash_pin(pin: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(pin.as_bytes());
    hasher.update(PIN_SALT.as_bytes());
    hex::encode(hasher.finalize())
}

/// Compare a candidate PIN against a stored hash.
pub fn verify_pin(pin: &str, stored_hash: &str) -> bool {
    hash_pin(pin) == stored_hash
}
