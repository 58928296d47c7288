//! Client identity derived from the transport-level source address.

use thiserror::Error;
use tracing::warn;

/// Reasons a source address could not be split into host and port.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    /// No `:port` suffix
    #[error("missing port in address {0:?}")]
    MissingPort(String),
    /// An unbracketed host containing `:`, or extra colons after `]`
    #[error("too many colons in address {0:?}")]
    TooManyColons(String),
    /// A `[` that is never closed
    #[error("missing ']' in address {0:?}")]
    MissingBracket(String),
    /// A `[` anywhere but the start
    #[error("unexpected '[' in address {0:?}")]
    UnexpectedOpenBracket(String),
    /// A `]` outside a bracketed host
    #[error("unexpected ']' in address {0:?}")]
    UnexpectedCloseBracket(String),
}

/// Split `host:port` or `[host]:port` and return the host portion.
///
/// The port is not validated and the host may be empty (`":8080"`).
pub fn split_host_port(addr: &str) -> Result<&str, AddressError> {
    let last_colon = addr
        .rfind(':')
        .ok_or_else(|| AddressError::MissingPort(addr.to_string()))?;

    let (host, rest_start) = if let Some(bracketed) = addr.strip_prefix('[') {
        let end = bracketed
            .find(']')
            .map(|i| i + 1)
            .ok_or_else(|| AddressError::MissingBracket(addr.to_string()))?;

        if end + 1 == addr.len() {
            return Err(AddressError::MissingPort(addr.to_string()));
        }
        if end + 1 != last_colon {
            // Either "[host]:a:b" or "[host]x"
            return Err(if addr.as_bytes()[end + 1] == b':' {
                AddressError::TooManyColons(addr.to_string())
            } else {
                AddressError::MissingPort(addr.to_string())
            });
        }
        (&addr[1..end], Some(end + 1))
    } else {
        let host = &addr[..last_colon];
        if host.contains(':') {
            return Err(AddressError::TooManyColons(addr.to_string()));
        }
        (host, None)
    };

    let (open_from, close_from) = match rest_start {
        Some(close_from) => (1, close_from),
        None => (0, 0),
    };
    if addr[open_from..].contains('[') {
        return Err(AddressError::UnexpectedOpenBracket(addr.to_string()));
    }
    if addr[close_from..].contains(']') {
        return Err(AddressError::UnexpectedCloseBracket(addr.to_string()));
    }

    Ok(host)
}

/// Identity of a client for rate limiting purposes.
///
/// The key is the host portion of the source address, kept as an opaque
/// string. The empty key is the shared fallback for clients whose address
/// could not be determined.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientKey(String);

impl ClientKey {
    /// Create a key from an already extracted host.
    pub fn new(host: impl Into<String>) -> Self {
        Self(host.into())
    }

    /// The key shared by every unidentifiable client.
    pub fn fallback() -> Self {
        Self(String::new())
    }

    /// Derive the key from a `host:port` source address.
    ///
    /// A missing or unparsable address is logged and mapped to the
    /// fallback key; it never fails the request.
    pub fn identify(remote_addr: Option<&str>) -> Self {
        let Some(addr) = remote_addr else {
            warn!("Request has no source address, using shared fallback limiter");
            return Self::fallback();
        };

        match split_host_port(addr) {
            Ok(host) => Self::new(host),
            Err(e) => {
                warn!(
                    address = %addr,
                    error = %e,
                    "Error parsing client address, using shared fallback limiter"
                );
                Self::fallback()
            }
        }
    }

    /// Whether this is the shared fallback key.
    pub fn is_fallback(&self) -> bool {
        self.0.is_empty()
    }

    /// Get the host string this key was built from.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ClientKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_fallback() {
            write!(f, "<fallback>")
        } else {
            write!(f, "{}", self.0)
        }
    }
}
