// src/utils/token.rs
//! Session token generation.

use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::Rng;

/// Number of alphanumeric characters in a session token (~119 bits).
pub const SESSION_TOKEN_LENGTH: usize = 20;

/// Generates a fresh, unguessable session token from the OS random source.
pub fn generate_session_token() -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(SESSION_TOKEN_LENGTH)
        .map(char::from)
        .collect()
}
