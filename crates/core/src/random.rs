//! Randomness capability used for every generated identifier.

use std::fmt::Write;

use rand::RngCore;

/// Source of random bytes for identifiers and database names.
///
/// Production code uses [`OsRandomSource`]; tests may inject deterministic
/// sequences to assert exact generated values.
pub trait RandomSource: Send + Sync {
    fn fill_bytes(&self, dest: &mut [u8]);
}

/// Thread-local CSPRNG seeded from the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsRandomSource;

impl RandomSource for OsRandomSource {
    fn fill_bytes(&self, dest: &mut [u8]) {
        rand::rng().fill_bytes(dest);
    }
}

/// Draw `N` bytes from a (possibly unsized) source.
pub fn random_bytes<const N: usize>(source: &dyn RandomSource) -> [u8; N] {
    let mut buf = [0u8; N];
    source.fill_bytes(&mut buf);
    buf
}

/// Lowercase hex encoding.
pub fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}
