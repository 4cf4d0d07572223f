//! Server endpoint parsing.

use std::fmt;

use url::Url;

use crate::error::{Error, Result};

/// Which transport binding an endpoint selects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    /// Persistent duplex channel (`ws`, `wss`)
    WebSocket,
    /// Stateless request/response channel (`http`, `https`)
    Http,
}

/// Parsed RPC endpoint; `url` always ends in `/rpc`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub scheme: Scheme,
    pub url: Url,
}

impl Endpoint {
    /// Parse a server address such as `ws://localhost:8000` or
    /// `https://db.example.com/rpc`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for unparseable URLs or unsupported schemes.
    pub fn parse(address: &str) -> Result<Self> {
        let mut url = Url::parse(address.trim())
            .map_err(|e| Error::Config(format!("invalid endpoint {address}: {e}")))?;

        let scheme = match url.scheme() {
            "ws" | "wss" => Scheme::WebSocket,
            "http" | "https" => Scheme::Http,
            other => {
                return Err(Error::Config(format!(
                    "unsupported endpoint scheme: {other} (expected ws, wss, http or https)"
                )));
            }
        };

        let path = url.path().trim_end_matches('/');
        let path = if path.ends_with("/rpc") {
            path.to_string()
        } else {
            format!("{path}/rpc")
        };
        url.set_path(&path);

        Ok(Self { scheme, url })
    }

    #[must_use]
    pub fn is_persistent(&self) -> bool {
        self.scheme == Scheme::WebSocket
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_websocket_endpoint() {
        let endpoint = Endpoint::parse("ws://localhost:8000").unwrap();
        assert_eq!(endpoint.scheme, Scheme::WebSocket);
        assert!(endpoint.is_persistent());
        assert_eq!(endpoint.url.as_str(), "ws://localhost:8000/rpc");
    }

    #[test]
    fn test_http_endpoint_trailing_slash() {
        let endpoint = Endpoint::parse("https://db.example.com/").unwrap();
        assert_eq!(endpoint.scheme, Scheme::Http);
        assert_eq!(endpoint.url.as_str(), "https://db.example.com/rpc");
    }

    #[test]
    fn test_existing_rpc_suffix_kept() {
        let endpoint = Endpoint::parse("wss://db.example.com/rpc/").unwrap();
        assert_eq!(endpoint.url.as_str(), "wss://db.example.com/rpc");
    }

    #[test]
    fn test_base_path_preserved() {
        let endpoint = Endpoint::parse("http://proxy.local/surreal").unwrap();
        assert_eq!(endpoint.url.as_str(), "http://proxy.local/surreal/rpc");
    }

    #[test]
    fn test_unsupported_scheme() {
        let err = Endpoint::parse("ftp://example.com").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("ftp"));
    }

    #[test]
    fn test_invalid_url() {
        assert!(matches!(
            Endpoint::parse("not a url"),
            Err(Error::Config(_))
        ));
    }
}
