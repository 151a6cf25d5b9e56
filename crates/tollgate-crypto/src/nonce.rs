use rand::rngs::OsRng;
use rand::RngCore;

/// `len` random bytes rendered as `2 * len` lower-case hex characters.
#[must_use]
pub fn random_hex(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
