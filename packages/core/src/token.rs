//! Bearer tokens and the client credentials used to obtain them.

use chrono::{DateTime, Duration, Utc};
use serde::de::Error as _;
use serde::Deserialize;
use serde_json::Number;
use std::str::FromStr;

/// OAuth scope requested for every token.
pub const SCOPE: &str = "S5Api";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GrantType {
    #[default]
    ClientCredentials,
    AuthorizationCode,
}

impl GrantType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantType::ClientCredentials => "client_credentials",
            GrantType::AuthorizationCode => "authorization_code",
        }
    }

    /// Map the numeric grant type stored with an API key.
    pub fn from_index(index: i64) -> Option<Self> {
        match index {
            0 => Some(GrantType::ClientCredentials),
            1 => Some(GrantType::AuthorizationCode),
            _ => None,
        }
    }
}

impl FromStr for GrantType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "client_credentials" | "0" => Ok(GrantType::ClientCredentials),
            "authorization_code" | "1" => Ok(GrantType::AuthorizationCode),
            other => Err(format!(
                "unknown grant type {other:?}; expected client_credentials or authorization_code"
            )),
        }
    }
}

impl std::fmt::Display for GrantType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client credentials for the token endpoint.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
    pub grant_type: GrantType,
}

impl Credentials {
    pub fn is_complete(&self) -> bool {
        !self.client_id.is_empty() && !self.client_secret.is_empty()
    }

    /// Name/value pairs of the token request form, in wire order.
    pub fn form_fields(&self) -> [(&'static str, &str); 4] {
        [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("grant_type", self.grant_type.as_str()),
            ("scope", SCOPE),
        ]
    }
}

/// Body of a successful token reply.
#[derive(Debug, Deserialize)]
struct TokenReply {
    access_token: String,
    token_type: String,
    expires_in: Number,
}

/// Lifetime in whole seconds; fractional values are truncated.
fn lifetime(expires_in: &Number) -> Option<Duration> {
    let secs = match expires_in.as_i64() {
        Some(secs) => secs,
        None => {
            let secs = expires_in.as_f64()?.trunc();
            if !(i64::MIN as f64..=i64::MAX as f64).contains(&secs) {
                return None;
            }
            secs as i64
        }
    };
    Duration::try_seconds(secs)
}

/// An access token with its validity window `[valid_from, valid_to)`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Token {
    pub token: String,
    pub token_type: String,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_to: Option<DateTime<Utc>>,
}

impl Token {
    /// Parse a token reply received at `now`.
    pub fn from_reply(body: &[u8], now: DateTime<Utc>) -> Result<Self, serde_json::Error> {
        let reply: TokenReply = serde_json::from_slice(body)?;
        let valid_to = lifetime(&reply.expires_in)
            .and_then(|d| now.checked_add_signed(d))
            .ok_or_else(|| {
                serde_json::Error::custom(format!(
                    "expires_in {} is out of range",
                    reply.expires_in
                ))
            })?;
        Ok(Token {
            token: reply.access_token,
            token_type: reply.token_type,
            valid_from: Some(now),
            valid_to: Some(valid_to),
        })
    }

    /// Token and type present, with a known expiry.
    pub fn is_complete(&self) -> bool {
        !self.token.is_empty() && !self.token_type.is_empty() && self.valid_to.is_some()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        !matches!(self.valid_to, Some(to) if now < to)
    }

    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.is_complete() && !self.is_expired(now)
    }

    /// `Authorization` header value, e.g. `Bearer abc`.
    pub fn authorization(&self) -> String {
        format!("{} {}", self.token_type, self.token)
    }
}
