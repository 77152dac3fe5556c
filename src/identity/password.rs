//! Salted one-way password hashing.

use rand::RngCore;
use sha2::Sha256;

/// Salt byte length for password hashing.
const SALT_BYTES: usize = 16;

/// Derived key length (SHA-256 output size).
const HASH_BYTES: usize = 32;

/// Generate a random salt (hex-encoded).
pub fn generate_salt() -> String {
    let mut bytes = [0u8; SALT_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Hash a password with salt using PBKDF2-HMAC-SHA256.
pub fn hash_password(password: &str, salt: &str, iterations: u32) -> String {
    let mut out = [0u8; HASH_BYTES];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt.as_bytes(), iterations, &mut out);
    hex::encode(out)
}

/// Check `password` against a stored hash.
pub fn verify_password(password: &str, salt: &str, stored_hash: &str, iterations: u32) -> bool {
    let attempt = hash_password(password, salt, iterations);
    constant_time_eq(stored_hash.as_bytes(), attempt.as_bytes())
}

/// Constant-time byte comparison to prevent timing attacks.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
