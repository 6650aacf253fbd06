//! Session token generation.
//!
//! Tokens are 8 characters of `[A-Z0-9]` (36^8 space) drawn from the OS
//! CSPRNG. Generation does not guarantee uniqueness; the session store
//! retries against live records before committing.

use rand::rngs::OsRng;
use rand::Rng;

/// Token length exposed to users in reply syntax.
pub const TOKEN_LEN: usize = 8;

const TOKEN_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Generate a new session token.
pub fn generate() -> String {
    let mut rng = OsRng;
    (0..TOKEN_LEN)
        .map(|_| TOKEN_CHARSET[rng.gen_range(0..TOKEN_CHARSET.len())] as char)
        .collect()
}

/// Check whether a string is a well-formed token value.
///
/// Accepts lowercase input; callers normalize to uppercase before store
/// lookups.
pub fn is_well_formed(s: &str) -> bool {
    s.len() == TOKEN_LEN && s.bytes().all(|b| b.is_ascii_alphanumeric())
}
