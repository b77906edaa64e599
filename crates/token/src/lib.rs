//! Access tokens for stored files.
//!
//! Every file accepted by Filegate is bound to exactly one access token. The token is the only
//! credential needed to view or download that file, so it must never be derivable from the file
//! name, its content or its location.
//!
//! ## Token form
//!
//! `YYYYMMDDTHHMMSS.mmmZ-<32 lowercase hex>`
//!
//! Example: `20260111T143522.045Z-550e8400e29b41d4a716446655440000`
//!
//! - The timestamp prefix records when the token was minted (UTC, millisecond precision). It is
//!   there for ordering and audit only and carries no security weight.
//! - The suffix is a random version 4 UUID rendered in simple form (no hyphens), which supplies
//!   the unguessable part of the token.
//!
//! Tokens supplied by clients are parsed strictly: uppercase hex, hyphenated UUIDs, missing `Z`
//! suffixes and similar near-misses are rejected rather than normalised, so a token has exactly
//! one textual form and can be used as an index key directly.

mod token;

pub use token::AccessToken;

/// Error type for token operations.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    /// Input could not be parsed as an access token
    #[error("Invalid token: {0}")]
    InvalidInput(String),
}

/// Result type for token operations.
pub type TokenResult<T> = Result<T, TokenError>;
