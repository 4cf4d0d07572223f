//! RPC protocol layer for the surql database driver.
//!
//! This crate implements the client side of the database's CBOR RPC
//! interface over WebSocket or HTTP.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`codec`]: CBOR wire codec with the extended-type tag registry
//! - [`protocol`]: Method names, request/response/notification messages
//! - [`request`]: Per-method parameter contracts and request assembly
//! - [`session`]: Token and namespace/database state of one connection
//! - [`client`]: The [`Surreal`] session client
//! - [`transport`]: WebSocket and HTTP bindings
//! - [`live`]: Live query routing
//! - [`config`], [`endpoint`], [`error`]
//!
//! # Example
//!
//! ```no_run
//! use surql_rpc::{ClientConfig, Credentials, Surreal};
//!
//! # async fn example() -> surql_rpc::Result<()> {
//! let config = ClientConfig::default().with_context("test", "test");
//! let mut db = Surreal::connect("ws://localhost:8000", config).await?;
//!
//! db.signin(&Credentials::root("root", "root")).await?;
//!
//! for statement in db.query("SELECT * FROM person", Default::default()).await? {
//!     println!("{}: {}", statement.status, statement.result);
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod codec;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod live;
pub mod protocol;
pub mod request;
pub mod session;
pub mod transport;

// Re-export main client types
pub use client::{Credentials, QueryResult, Surreal};
pub use config::ClientConfig;
pub use endpoint::{Endpoint, Scheme};

// Re-export error types
pub use codec::{DecodeError, DecodeWarning, EncodeError};
pub use error::{Error, Result};
pub use request::{Params, SchemaError, Violation};

// Re-export protocol types
pub use live::{LiveRegistry, LiveStream};
pub use protocol::{Action, Method, Notification, RequestId, Response, RpcError};
pub use session::Context;
pub use transport::{CloseHandle, Connection, HttpTransport, Transport, WsTransport};

// Re-export the value model
pub use surql_types::{Geometry, Object, Range, RecordId, RecordKey, Table, Value};
