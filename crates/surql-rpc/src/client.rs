//! The session client.
//!
//! [`Surreal`] owns one transport and one [`SessionState`]. Every operation
//! goes through [`Surreal::call`]: validate and build, encode, open the
//! transport if needed, exchange under the configured timeout, classify the
//! reply, then apply the side effects of a successful call.

use std::time::Instant;

use surql_types::{Object, Value};
use uuid::Uuid;

use crate::codec;
use crate::config::ClientConfig;
use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::live::LiveStream;
use crate::protocol::Method;
use crate::request::{self, Params};
use crate::session::{Context, SessionState};
use crate::transport::{CloseHandle, Connection, READING_REPLY, Transport};

/// Sign-in or sign-up credentials.
///
/// Without a namespace these are root credentials; with one they are scoped
/// to that namespace and optionally a database and access method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub namespace: Option<String>,
    pub database: Option<String>,
    pub access: Option<String>,
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn root(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            namespace: None,
            database: None,
            access: None,
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn scoped(
        namespace: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            namespace: Some(namespace.into()),
            ..Self::root(username, password)
        }
    }

    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    #[must_use]
    pub fn access(mut self, access: impl Into<String>) -> Self {
        self.access = Some(access.into());
        self
    }

    fn to_params(&self) -> Params {
        Params::new()
            .with("namespace", self.namespace.clone())
            .with("database", self.database.clone())
            .with("access", self.access.clone())
            .with("username", self.username.as_str())
            .with("password", self.password.as_str())
    }
}

/// Outcome of one statement in a `query` call
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    /// `OK` or `ERR`
    pub status: String,
    /// Server-reported execution time, e.g. `"1.2ms"`
    pub time: String,
    /// Statement output, or the error message when `status` is `ERR`
    pub result: Value,
}

impl QueryResult {
    fn from_value(value: Value) -> Option<Self> {
        let Value::Object(mut object) = value else {
            return None;
        };
        let status = match object.remove("status") {
            Some(Value::String(s)) => s,
            _ => return None,
        };
        let time = match object.remove("time") {
            Some(Value::String(s)) => s,
            _ => String::new(),
        };
        Some(Self {
            status,
            time,
            result: object.remove("result").unwrap_or_default(),
        })
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status.eq_ignore_ascii_case("OK")
    }
}

/// Client session over a transport
#[derive(Debug)]
pub struct Surreal<T: Transport = Connection> {
    transport: T,
    state: SessionState,
    config: ClientConfig,
    consecutive_timeouts: u32,
}

impl Surreal<Connection> {
    /// Connect to `address` and, if the config names them, select the
    /// namespace and database.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for a bad address, `Error::Connection` if the
    /// server cannot be reached, or the error of the initial `use` call.
    pub async fn connect(address: &str, config: ClientConfig) -> Result<Self> {
        let endpoint = Endpoint::parse(address)?;
        let transport = Connection::new(&endpoint, &config);
        let mut client = Self::with_transport(transport, config);

        client.transport.open().await?;
        if let (Some(namespace), Some(database)) =
            (client.config.namespace.clone(), client.config.database.clone())
        {
            client.use_ns_db(&namespace, &database).await?;
        }
        Ok(client)
    }

    /// Handle that closes a WebSocket connection from another task.
    #[must_use]
    pub fn close_handle(&self) -> Option<CloseHandle> {
        self.transport.close_handle()
    }
}

impl<T: Transport> Surreal<T> {
    /// Wrap an unopened transport; it is opened on the first call.
    pub fn with_transport(transport: T, config: ClientConfig) -> Self {
        Self {
            transport,
            state: SessionState::new(),
            config,
            consecutive_timeouts: 0,
        }
    }

    #[must_use]
    pub fn session(&self) -> &SessionState {
        &self.state
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Perform one RPC call.
    ///
    /// # Errors
    ///
    /// - `Error::Schema` if `params` break the method's contract (nothing is sent)
    /// - `Error::Connection` if the transport cannot be opened or is lost
    /// - `Error::Timeout` if no reply arrives within the configured timeout
    /// - `Error::Decode` / `Error::Protocol` for unusable replies
    /// - `Error::Server` if the server answers with an error
    pub async fn call(&mut self, method: Method, params: Params) -> Result<Value> {
        let id = self.state.next_request_id();
        let request = request::build(id.clone(), method, params.clone())?;

        if method == Method::Live && self.transport.live_registry().is_none() {
            return Err(Error::protocol(
                method,
                "live queries need a persistent connection",
            ));
        }

        let payload = codec::encode(&request.to_value())?;

        if !self.transport.is_open() {
            self.transport.open().await?;
        }

        // a persistent server remembers `use` and sign-in itself
        let context = if self.transport.retains_context() {
            Context::default()
        } else {
            self.state.context()
        };
        let timeout = self.config.timeout();
        let started = Instant::now();
        tracing::debug!("Sending {method} request {id} ({} bytes)", payload.len());

        let exchanged =
            tokio::time::timeout(timeout, self.transport.exchange(&id, payload, &context)).await;

        let response = match exchanged {
            Ok(Ok(response)) => {
                self.consecutive_timeouts = 0;
                response
            }
            Ok(Err(e)) => return Err(label(e, method)),
            Err(_) => {
                self.record_timeout().await;
                return Err(Error::Timeout {
                    operation: method.action(),
                    elapsed: started.elapsed(),
                });
            }
        };
        tracing::debug!("Request {id} completed in {:?}", started.elapsed());

        let result = response.result.map_err(|e| Error::server(method, e))?;
        if method.requires_result() && result.is_nullish() {
            return Err(Error::protocol(method, format!("no result for {method}")));
        }

        self.state
            .apply(method, &params, &result, response.id.as_ref());
        Ok(result)
    }

    /// Close the transport once it has timed out too often in a row.
    async fn record_timeout(&mut self) {
        self.consecutive_timeouts += 1;
        let limit = self.config.max_consecutive_timeouts;
        if limit > 0 && self.consecutive_timeouts >= limit {
            tracing::warn!(
                "{} consecutive timeouts; closing unresponsive connection",
                self.consecutive_timeouts
            );
            self.transport.close().await;
            self.consecutive_timeouts = 0;
        }
    }

    /// Select the namespace and database for later calls.
    ///
    /// # Errors
    ///
    /// See [`Surreal::call`].
    pub async fn use_ns_db(&mut self, namespace: &str, database: &str) -> Result<()> {
        let params = Params::new()
            .with("namespace", namespace)
            .with("database", database);
        self.call(Method::Use, params).await?;
        Ok(())
    }

    /// Sign in and keep the returned token for later calls.
    ///
    /// # Errors
    ///
    /// See [`Surreal::call`]; a non-text token is a protocol error.
    pub async fn signin(&mut self, credentials: &Credentials) -> Result<String> {
        let result = self.call(Method::Signin, credentials.to_params()).await?;
        token(Method::Signin, result)
    }

    /// Sign up a record user and keep the returned token.
    ///
    /// # Errors
    ///
    /// See [`Surreal::call`]; namespace, database and access are required.
    pub async fn signup(&mut self, credentials: &Credentials) -> Result<String> {
        let result = self.call(Method::Signup, credentials.to_params()).await?;
        token(Method::Signup, result)
    }

    /// Authenticate the session with an existing token.
    ///
    /// # Errors
    ///
    /// See [`Surreal::call`].
    pub async fn authenticate(&mut self, token: &str) -> Result<()> {
        self.call(Method::Authenticate, Params::new().with("token", token))
            .await?;
        Ok(())
    }

    /// Drop the session's authentication.
    ///
    /// # Errors
    ///
    /// See [`Surreal::call`].
    pub async fn invalidate(&mut self) -> Result<()> {
        self.call(Method::Invalidate, Params::new()).await?;
        Ok(())
    }

    /// Define a session variable usable as `$key` in queries.
    ///
    /// # Errors
    ///
    /// See [`Surreal::call`].
    pub async fn set(&mut self, key: &str, value: impl Into<Value>) -> Result<()> {
        let params = Params::new().with("key", key).with("value", value);
        self.call(Method::Let, params).await?;
        Ok(())
    }

    /// # Errors
    ///
    /// See [`Surreal::call`].
    pub async fn unset(&mut self, key: &str) -> Result<()> {
        self.call(Method::Unset, Params::new().with("key", key))
            .await?;
        Ok(())
    }

    /// # Errors
    ///
    /// See [`Surreal::call`].
    pub async fn select(&mut self, target: impl Into<Value>) -> Result<Value> {
        self.call(Method::Select, Params::new().with("target", target))
            .await
    }

    /// # Errors
    ///
    /// See [`Surreal::call`].
    pub async fn create(&mut self, target: impl Into<Value>, data: Option<Value>) -> Result<Value> {
        self.write(Method::Create, target.into(), data).await
    }

    /// # Errors
    ///
    /// See [`Surreal::call`].
    pub async fn update(&mut self, target: impl Into<Value>, data: Option<Value>) -> Result<Value> {
        self.write(Method::Update, target.into(), data).await
    }

    /// # Errors
    ///
    /// See [`Surreal::call`].
    pub async fn merge(&mut self, target: impl Into<Value>, data: Value) -> Result<Value> {
        self.write(Method::Merge, target.into(), Some(data)).await
    }

    /// # Errors
    ///
    /// See [`Surreal::call`].
    pub async fn upsert(&mut self, target: impl Into<Value>, data: Option<Value>) -> Result<Value> {
        self.write(Method::Upsert, target.into(), data).await
    }

    async fn write(&mut self, method: Method, target: Value, data: Option<Value>) -> Result<Value> {
        let params = Params::new().with("target", target).with("data", data);
        self.call(method, params).await
    }

    /// # Errors
    ///
    /// See [`Surreal::call`].
    pub async fn delete(&mut self, target: impl Into<Value>) -> Result<Value> {
        self.call(Method::Delete, Params::new().with("target", target))
            .await
    }

    /// # Errors
    ///
    /// See [`Surreal::call`].
    pub async fn insert(&mut self, table: impl Into<Value>, data: Value) -> Result<Value> {
        let params = Params::new().with("table", table).with("data", data);
        self.call(Method::Insert, params).await
    }

    /// # Errors
    ///
    /// See [`Surreal::call`].
    pub async fn insert_relation(&mut self, table: impl Into<Value>, data: Value) -> Result<Value> {
        let params = Params::new().with("table", table).with("data", data);
        self.call(Method::InsertRelation, params).await
    }

    /// Apply JSON Patch operations to the target.
    ///
    /// # Errors
    ///
    /// See [`Surreal::call`].
    pub async fn patch(&mut self, target: impl Into<Value>, diff: Vec<Value>) -> Result<Value> {
        let params = Params::new()
            .with("target", target)
            .with("diff", Value::Array(diff));
        self.call(Method::Patch, params).await
    }

    /// Run a query and return one result per statement.
    ///
    /// # Errors
    ///
    /// See [`Surreal::call`]; a reply that is not a list of statement results
    /// is a protocol error.
    pub async fn query(&mut self, statement: &str, bindings: Object) -> Result<Vec<QueryResult>> {
        let params = Params::new()
            .with("statement", statement)
            .with("bindings", bindings);
        let result = self.call(Method::Query, params).await?;

        let Value::Array(items) = result else {
            return Err(Error::protocol(
                Method::Query,
                format!("expected a list of statement results, found {}", result.kind()),
            ));
        };
        items
            .into_iter()
            .map(|item| {
                let kind = item.kind();
                QueryResult::from_value(item).ok_or_else(|| {
                    Error::protocol(Method::Query, format!("malformed statement result ({kind})"))
                })
            })
            .collect()
    }

    /// Start a live query on `table` and stream its notifications.
    ///
    /// Notifications that arrive before the subscription id is known are
    /// dropped.
    ///
    /// # Errors
    ///
    /// See [`Surreal::call`]; stateless transports cannot carry live queries.
    pub async fn live(&mut self, table: impl Into<Value>, diff: bool) -> Result<LiveStream> {
        let mut params = Params::new().with("table", table);
        if diff {
            params.insert("diff", true);
        }
        let result = self.call(Method::Live, params).await?;

        let id = result.as_uuid().ok_or_else(|| {
            Error::protocol(
                Method::Live,
                format!("expected a live query id, found {}", result.kind()),
            )
        })?;
        let registry = self
            .transport
            .live_registry()
            .ok_or_else(|| Error::protocol(Method::Live, "transport lost its live registry"))?;
        tracing::debug!("Live query {id} started");
        Ok(registry.register(id, self.config.notification_capacity))
    }

    /// End a live query; its stream ends once drained.
    ///
    /// # Errors
    ///
    /// See [`Surreal::call`].
    pub async fn kill(&mut self, id: Uuid) -> Result<()> {
        self.call(Method::Kill, Params::new().with("id", id))
            .await?;
        if let Some(registry) = self.transport.live_registry() {
            registry.unregister(&id);
        }
        Ok(())
    }

    /// # Errors
    ///
    /// See [`Surreal::call`].
    pub async fn info(&mut self) -> Result<Value> {
        self.call(Method::Info, Params::new()).await
    }

    /// Server version string, e.g. `surrealdb-2.1.0`.
    ///
    /// # Errors
    ///
    /// See [`Surreal::call`].
    pub async fn version(&mut self) -> Result<String> {
        let result = self.call(Method::Version, Params::new()).await?;
        match result {
            Value::String(version) => Ok(version),
            other => Err(Error::protocol(
                Method::Version,
                format!("expected text, found {}", other.kind()),
            )),
        }
    }

    pub async fn close(&mut self) {
        self.transport.close().await;
    }
}

fn token(method: Method, result: Value) -> Result<String> {
    match result {
        Value::String(token) => Ok(token),
        other => Err(Error::protocol(
            method,
            format!("expected a token, found {}", other.kind()),
        )),
    }
}

/// Name the caller's operation in errors raised before it was known.
fn label(error: Error, method: Method) -> Error {
    match error {
        Error::Protocol {
            operation: READING_REPLY,
            message,
        } => Error::Protocol {
            operation: method.action(),
            message,
        },
        other => other,
    }
}
