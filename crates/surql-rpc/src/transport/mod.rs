//! Transport bindings.
//!
//! A transport moves one encoded request to the server and hands back the
//! classified reply. The session decides everything else; transports never
//! inspect parameters or mutate session state.

use std::future::Future;

use crate::config::ClientConfig;
use crate::endpoint::{Endpoint, Scheme};
use crate::error::{Error, Result};
use crate::live::LiveRegistry;
use crate::protocol::{Incoming, MessageViolation, RequestId, Response};
use crate::session::Context;

pub mod http;
pub mod ws;

pub use http::HttpTransport;
pub use ws::{CloseHandle, WsTransport};

/// Operation label for violations found before the caller's method is known.
pub(crate) const READING_REPLY: &str = "reading a reply";

pub(crate) fn violation(err: &MessageViolation) -> Error {
    Error::Protocol {
        operation: READING_REPLY,
        message: err.0.clone(),
    }
}

/// Classify a decoded reply that must be a response.
pub(crate) fn expect_response(incoming: Incoming) -> Result<Response> {
    match incoming {
        Incoming::Response(response) => Ok(response),
        Incoming::Notification(notification) => Err(Error::Protocol {
            operation: READING_REPLY,
            message: format!(
                "expected a response, received a notification for live query {}",
                notification.id
            ),
        }),
    }
}

pub trait Transport: Send {
    fn is_open(&self) -> bool;

    /// Open the channel. Called lazily before the first exchange.
    fn open(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Send one encoded request and wait for its reply.
    fn exchange(
        &mut self,
        id: &RequestId,
        payload: Vec<u8>,
        context: &Context,
    ) -> impl Future<Output = Result<Response>> + Send;

    fn close(&mut self) -> impl Future<Output = ()> + Send;

    /// Whether the server keeps `use` and authentication state between calls.
    fn retains_context(&self) -> bool;

    /// Registry for live notifications; `None` if the binding cannot push.
    fn live_registry(&self) -> Option<&LiveRegistry>;
}

/// Transport selected from an endpoint's scheme
#[derive(Debug)]
pub enum Connection {
    Ws(WsTransport),
    Http(HttpTransport),
}

impl Connection {
    #[must_use]
    pub fn new(endpoint: &Endpoint, config: &ClientConfig) -> Self {
        match endpoint.scheme {
            Scheme::WebSocket => Self::Ws(WsTransport::new(endpoint.url.clone(), config)),
            Scheme::Http => Self::Http(HttpTransport::new(endpoint.url.clone(), config)),
        }
    }

    /// Handle that closes a persistent channel from another task.
    #[must_use]
    pub fn close_handle(&self) -> Option<CloseHandle> {
        match self {
            Self::Ws(ws) => Some(ws.close_handle()),
            Self::Http(_) => None,
        }
    }
}

impl Transport for Connection {
    fn is_open(&self) -> bool {
        match self {
            Self::Ws(ws) => ws.is_open(),
            Self::Http(http) => http.is_open(),
        }
    }

    async fn open(&mut self) -> Result<()> {
        match self {
            Self::Ws(ws) => ws.open().await,
            Self::Http(http) => http.open().await,
        }
    }

    async fn exchange(
        &mut self,
        id: &RequestId,
        payload: Vec<u8>,
        context: &Context,
    ) -> Result<Response> {
        match self {
            Self::Ws(ws) => ws.exchange(id, payload, context).await,
            Self::Http(http) => http.exchange(id, payload, context).await,
        }
    }

    async fn close(&mut self) {
        match self {
            Self::Ws(ws) => ws.close().await,
            Self::Http(http) => http.close().await,
        }
    }

    fn retains_context(&self) -> bool {
        match self {
            Self::Ws(ws) => ws.retains_context(),
            Self::Http(http) => http.retains_context(),
        }
    }

    fn live_registry(&self) -> Option<&LiveRegistry> {
        match self {
            Self::Ws(ws) => ws.live_registry(),
            Self::Http(http) => http.live_registry(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_follows_scheme() {
        let config = ClientConfig::default();

        let ws = Connection::new(&Endpoint::parse("ws://localhost:8000").unwrap(), &config);
        assert!(matches!(ws, Connection::Ws(_)));
        assert!(ws.retains_context());
        assert!(ws.live_registry().is_some());
        assert!(ws.close_handle().is_some());
        assert!(!ws.is_open());

        let http = Connection::new(&Endpoint::parse("http://localhost:8000").unwrap(), &config);
        assert!(matches!(http, Connection::Http(_)));
        assert!(!http.retains_context());
        assert!(http.live_registry().is_none());
        assert!(http.close_handle().is_none());
    }
}
