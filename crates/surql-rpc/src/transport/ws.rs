//! Persistent WebSocket binding.
//!
//! One socket per session, negotiated with the `cbor` sub-protocol. A reader
//! task owns the inbound half: replies are matched to pending calls by
//! request id, notifications go to the live registry. When the socket fails
//! or is closed, every pending call is failed with a connection error and the
//! transport reports itself closed so the next call reopens it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::error::CapacityError;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async_with_config};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::{Transport, violation};
use crate::codec::{self, DecodeError};
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::live::LiveRegistry;
use crate::protocol::{Incoming, RequestId, Response};
use crate::session::Context;

/// Sub-protocol requested from, and required of, the server
pub const SUBPROTOCOL: &str = "cbor";

/// Upper bound on the close handshake with an unresponsive peer
const CLOSE_GRACE: Duration = Duration::from_secs(1);

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Sink = Arc<tokio::sync::Mutex<SplitSink<Socket, Message>>>;
type PendingRequest = oneshot::Sender<Result<Response>>;

/// Calls waiting for a reply, plus whether the socket is still usable.
#[derive(Debug, Default)]
struct Pending {
    open: AtomicBool,
    waiting: Mutex<HashMap<RequestId, PendingRequest>>,
}

impl Pending {
    fn lock(&self) -> MutexGuard<'_, HashMap<RequestId, PendingRequest>> {
        self.waiting.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a waiter unless the socket is already closed.
    fn insert(&self, id: RequestId, tx: PendingRequest) -> bool {
        let mut waiting = self.lock();
        if !self.open.load(Ordering::SeqCst) {
            return false;
        }
        waiting.insert(id, tx);
        true
    }

    fn remove(&self, id: &RequestId) -> Option<PendingRequest> {
        self.lock().remove(id)
    }

    fn fail_all(&self, error: impl Fn() -> Error) {
        for (_, tx) in self.lock().drain() {
            let _ = tx.send(Err(error()));
        }
    }

    /// Mark closed, then fail every waiter.
    fn shut(&self, error: impl Fn() -> Error) {
        self.open.store(false, Ordering::SeqCst);
        self.fail_all(error);
    }
}

/// Removes a pending entry if the waiting call is dropped before its reply.
struct PendingGuard {
    pending: Arc<Pending>,
    id: RequestId,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.pending.remove(&self.id);
    }
}

/// Closes the current socket from any task.
///
/// Outstanding calls are unblocked with a connection error. Closing when no
/// socket is open does nothing; a later call opens a fresh socket.
#[derive(Debug, Clone, Default)]
pub struct CloseHandle {
    current: Arc<Mutex<Option<CancellationToken>>>,
}

impl CloseHandle {
    pub fn close(&self) {
        let current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(token) = current.as_ref() {
            token.cancel();
        }
    }

    fn install(&self, token: CancellationToken) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = Some(token);
    }
}

struct WsConnection {
    sink: Sink,
    pending: Arc<Pending>,
    shutdown: CancellationToken,
    reader: JoinHandle<()>,
}

pub struct WsTransport {
    url: Url,
    max_message_size: usize,
    live: LiveRegistry,
    closer: CloseHandle,
    connection: Option<WsConnection>,
}

impl std::fmt::Debug for WsTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsTransport")
            .field("url", &self.url.as_str())
            .field("open", &self.is_open())
            .field("live_queries", &self.live.len())
            .finish_non_exhaustive()
    }
}

impl WsTransport {
    #[must_use]
    pub fn new(url: Url, config: &ClientConfig) -> Self {
        Self {
            url,
            max_message_size: config.max_message_size,
            live: LiveRegistry::new(),
            closer: CloseHandle::default(),
            connection: None,
        }
    }

    #[must_use]
    pub fn close_handle(&self) -> CloseHandle {
        self.closer.clone()
    }

    async fn connect(&self) -> Result<Socket> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| Error::connection(format!("invalid request for {}: {e}", self.url)))?;
        request
            .headers_mut()
            .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(SUBPROTOCOL));

        let config = WebSocketConfig::default()
            .max_message_size(Some(self.max_message_size))
            .max_frame_size(Some(self.max_message_size));

        let (socket, response) = connect_async_with_config(request, Some(config), false)
            .await
            .map_err(|e| Error::connection(format!("cannot connect to {}: {e}", self.url)))?;

        let selected = response
            .headers()
            .get(SEC_WEBSOCKET_PROTOCOL)
            .and_then(|value| value.to_str().ok());
        if selected != Some(SUBPROTOCOL) {
            return Err(Error::connection(format!(
                "server at {} did not accept the {SUBPROTOCOL} sub-protocol",
                self.url
            )));
        }

        Ok(socket)
    }
}

impl Transport for WsTransport {
    fn is_open(&self) -> bool {
        self.connection
            .as_ref()
            .is_some_and(|c| c.pending.open.load(Ordering::SeqCst))
    }

    async fn open(&mut self) -> Result<()> {
        if let Some(stale) = self.connection.take() {
            stale.shutdown.cancel();
        }

        let socket = self.connect().await?;
        let (sink, stream) = socket.split();
        let sink: Sink = Arc::new(tokio::sync::Mutex::new(sink));

        let pending = Arc::new(Pending::default());
        pending.open.store(true, Ordering::SeqCst);

        let shutdown = CancellationToken::new();
        self.closer.install(shutdown.clone());

        let reader = tokio::spawn(read_loop(
            stream,
            sink.clone(),
            pending.clone(),
            self.live.clone(),
            shutdown.clone(),
            self.max_message_size,
        ));

        tracing::info!("Connected to {}", self.url);
        self.connection = Some(WsConnection {
            sink,
            pending,
            shutdown,
            reader,
        });
        Ok(())
    }

    async fn exchange(
        &mut self,
        id: &RequestId,
        payload: Vec<u8>,
        _context: &Context,
    ) -> Result<Response> {
        let connection = self
            .connection
            .as_ref()
            .ok_or_else(|| Error::connection("not connected"))?;

        let (tx, rx) = oneshot::channel();
        if !connection.pending.insert(id.clone(), tx) {
            return Err(Error::connection("connection is closed"));
        }
        let _guard = PendingGuard {
            pending: connection.pending.clone(),
            id: id.clone(),
        };

        connection
            .sink
            .lock()
            .await
            .send(Message::Binary(Bytes::from(payload)))
            .await
            .map_err(|e| Error::connection(format!("failed to send request {id}: {e}")))?;

        rx.await
            .map_err(|_| Error::connection("connection closed while waiting for a reply"))?
    }

    async fn close(&mut self) {
        let Some(connection) = self.connection.take() else {
            return;
        };
        connection.shutdown.cancel();
        if let Err(e) = connection.reader.await {
            tracing::debug!("WebSocket reader ended abnormally: {e}");
        }
        tracing::info!("Closed connection to {}", self.url);
    }

    fn retains_context(&self) -> bool {
        true
    }

    fn live_registry(&self) -> Option<&LiveRegistry> {
        Some(&self.live)
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.shutdown.cancel();
        }
    }
}

async fn read_loop(
    mut stream: SplitStream<Socket>,
    sink: Sink,
    pending: Arc<Pending>,
    live: LiveRegistry,
    shutdown: CancellationToken,
    max_message_size: usize,
) {
    let reason = loop {
        let frame = tokio::select! {
            () = shutdown.cancelled() => {
                if !close_within(&*sink, CLOSE_GRACE).await {
                    tracing::debug!("Close handshake timed out after {CLOSE_GRACE:?}");
                }
                break "connection closed by client".to_string();
            }
            frame = stream.next() => frame,
        };

        match frame {
            Some(Ok(Message::Binary(bytes))) => {
                handle_frame(&bytes, &pending, &live, max_message_size);
            }
            Some(Ok(Message::Text(_))) => {
                tracing::warn!("Ignoring text frame on a {SUBPROTOCOL} connection");
            }
            Some(Ok(Message::Close(_))) | None => {
                break "connection closed by server".to_string();
            }
            Some(Ok(_)) => {}
            Some(Err(tungstenite::Error::Capacity(CapacityError::MessageTooLong {
                size,
                max_size,
            }))) => {
                let error = DecodeError::TooLarge {
                    size,
                    max: max_size,
                };
                pending.fail_all(|| Error::Decode(error.clone()));
                break format!("inbound message too large ({size} bytes)");
            }
            Some(Err(e)) => break format!("connection lost: {e}"),
        }
    };

    tracing::debug!("WebSocket reader stopped: {reason}");
    // streams end before the transport reports closed, so a reopen never races them
    live.close_all();
    pending.shut(|| Error::connection(reason.clone()));
}

/// Run the close handshake, giving up after `grace`. Returns whether it finished.
async fn close_within<S>(sink: &tokio::sync::Mutex<S>, grace: Duration) -> bool
where
    S: futures_util::Sink<Message> + Unpin,
{
    let handshake = async { sink.lock().await.close().await };
    tokio::time::timeout(grace, handshake).await.is_ok()
}

fn handle_frame(bytes: &[u8], pending: &Pending, live: &LiveRegistry, max_message_size: usize) {
    let value = match codec::check_size(bytes.len(), max_message_size).and_then(|()| codec::decode(bytes)) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!("Failed to decode inbound frame: {e}");
            pending.fail_all(|| Error::Decode(e.clone()));
            return;
        }
    };

    match Incoming::classify(value) {
        Ok(Incoming::Notification(notification)) => {
            live.route(notification);
        }
        Ok(Incoming::Response(response)) => deliver(response, pending),
        Err(e) => {
            tracing::warn!("Received malformed message: {e}");
            pending.fail_all(|| violation(&e));
        }
    }
}

fn deliver(response: Response, pending: &Pending) {
    let waiter = match &response.id {
        Some(id) => pending.remove(id),
        // errors for unparseable requests come back without an id; an
        // id-less result is an unsolicited push and never answers a call
        None if response.result.is_err() => {
            let mut waiting = pending.lock();
            if waiting.len() == 1 {
                waiting.drain().next().map(|(_, tx)| tx)
            } else {
                None
            }
        }
        None => None,
    };

    match waiter {
        Some(tx) => {
            let _ = tx.send(Ok(response));
        }
        None => match &response.id {
            Some(id) => tracing::debug!("Dropping reply for request {id} that is no longer pending"),
            None if response.result.is_ok() => {
                tracing::debug!("Dropping unrecognised push without an id");
            }
            None => tracing::debug!("Dropping error reply without an id"),
        },
    }
}
