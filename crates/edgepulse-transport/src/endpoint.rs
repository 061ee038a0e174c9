//! Telemetry sink address parsing
//!
//! The configured address selects plain or encrypted transport by its
//! scheme prefix. Trailing whitespace and control characters (a common
//! leftover of env files edited on other platforms) are stripped first.

use std::fmt;

use edgepulse_core::{EdgeError, EdgeResult};

const SECURE_SCHEME: &str = "wss://";
const PLAIN_SCHEME: &str = "ws://";

/// Transport security selected by the address scheme
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Security {
    Plain,
    Encrypted,
}

/// A validated telemetry sink address
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    url: String,
    security: Security,
}

impl Endpoint {
    /// Parse and validate a raw configured address
    pub fn parse(raw: &str) -> EdgeResult<Self> {
        let url = raw
            .trim_start()
            .trim_end_matches(|c: char| c.is_whitespace() || c.is_control());

        let lower = url.to_ascii_lowercase();
        let (security, rest) = if lower.starts_with(SECURE_SCHEME) {
            (Security::Encrypted, &url[SECURE_SCHEME.len()..])
        } else if lower.starts_with(PLAIN_SCHEME) {
            (Security::Plain, &url[PLAIN_SCHEME.len()..])
        } else {
            return Err(EdgeError::InvalidEndpoint(format!(
                "unsupported scheme in {:?}",
                url
            )));
        };

        let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
        if authority.is_empty() {
            return Err(EdgeError::InvalidEndpoint(format!("missing host in {:?}", url)));
        }
        if url.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(EdgeError::InvalidEndpoint(format!(
                "embedded whitespace in {:?}",
                url
            )));
        }

        Ok(Endpoint {
            url: url.to_string(),
            security,
        })
    }

    #[inline]
    pub fn url(&self) -> &str {
        &self.url
    }

    #[inline]
    pub fn security(&self) -> Security {
        self.security
    }

    #[inline]
    pub fn is_encrypted(&self) -> bool {
        self.security == Security::Encrypted
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}
