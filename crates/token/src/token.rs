//! Implementation of [`AccessToken`].

use crate::{TokenError, TokenResult};
use chrono::{DateTime, Duration, NaiveDateTime, Timelike, Utc};
use std::{fmt, str::FromStr};
use uuid::Uuid;

const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S%.3f";

/// An opaque access token bound to one stored file.
///
/// Construct fresh tokens with [`AccessToken::generate`] and client-supplied ones with
/// [`AccessToken::parse`]. Once constructed, the textual form produced by `Display` is canonical
/// and round-trips through `parse` to an equal value.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccessToken {
    issued_at: DateTime<Utc>,
    nonce: Uuid,
}

impl AccessToken {
    /// Mints a new token.
    ///
    /// If `previous` is given, the timestamp of the new token is strictly greater than the
    /// previous one (by at least 1 ms), so tokens minted in sequence always sort in issue order.
    pub fn generate(previous: Option<&AccessToken>) -> Self {
        let now = truncate_to_millis(Utc::now());

        let issued_at = match previous {
            Some(prev) if now <= prev.issued_at => prev.issued_at + Duration::milliseconds(1),
            _ => now,
        };

        Self {
            issued_at,
            nonce: Uuid::new_v4(),
        }
    }

    /// Parses a token in canonical form.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::InvalidInput`] if `input` is not exactly
    /// `YYYYMMDDTHHMMSS.mmmZ-<32 lowercase hex>`.
    pub fn parse(input: &str) -> TokenResult<Self> {
        let (ts_str, nonce_str) = input.split_once('-').ok_or_else(|| {
            TokenError::InvalidInput(format!("missing '-' separator in '{}'", input))
        })?;

        let Some(ts_no_z) = ts_str.strip_suffix('Z') else {
            return Err(TokenError::InvalidInput(format!(
                "timestamp must end with 'Z': '{}'",
                ts_str
            )));
        };

        let naive = NaiveDateTime::parse_from_str(ts_no_z, TIMESTAMP_FORMAT).map_err(|e| {
            TokenError::InvalidInput(format!("invalid timestamp '{}': {}", ts_str, e))
        })?;

        if !is_canonical_nonce(nonce_str) {
            return Err(TokenError::InvalidInput(format!(
                "nonce must be 32 lowercase hex characters, got '{}'",
                nonce_str
            )));
        }
        let nonce = Uuid::parse_str(nonce_str)
            .map_err(|e| TokenError::InvalidInput(format!("invalid nonce: {}", e)))?;

        let issued_at = DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc);

        // Anything that does not print back to the input (for example a 2-digit fraction) is
        // a non-canonical spelling of some other token.
        let token = Self { issued_at, nonce };
        if token.to_string() != input {
            return Err(TokenError::InvalidInput(format!(
                "token is not in canonical form: '{}'",
                input
            )));
        }

        Ok(token)
    }

    /// Returns when this token was minted.
    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }
}

fn truncate_to_millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    let millis = ts.nanosecond() / 1_000_000;
    ts.with_nanosecond(millis * 1_000_000).unwrap_or(ts)
}

fn is_canonical_nonce(input: &str) -> bool {
    input.len() == 32
        && input
            .bytes()
            .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

impl fmt::Display for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}Z-{}",
            self.issued_at.format(TIMESTAMP_FORMAT),
            self.nonce.simple()
        )
    }
}

impl FromStr for AccessToken {
    type Err = TokenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AccessToken::parse(s)
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for AccessToken {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for AccessToken {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        AccessToken::parse(&s).map_err(serde::de::Error::custom)
    }
}
