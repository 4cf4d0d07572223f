//! RPC message types.
//!
//! Requests are `{id, method, params}` objects. Inbound messages are either a
//! response (carrying `result` or `error`, usually with the request's `id`) or
//! a live notification (no top-level id, `result` describing a change).

use std::fmt;
use std::str::FromStr;

use surql_types::{Object, Value};
use uuid::Uuid;

/// The logical RPC surface of the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Use,
    Signin,
    Signup,
    Authenticate,
    Invalidate,
    Let,
    Unset,
    Select,
    Create,
    Insert,
    InsertRelation,
    Update,
    Merge,
    Patch,
    Upsert,
    Delete,
    Query,
    Live,
    Kill,
    Info,
    Version,
}

impl Method {
    /// Every method in declaration order
    pub const ALL: [Method; 21] = [
        Method::Use,
        Method::Signin,
        Method::Signup,
        Method::Authenticate,
        Method::Invalidate,
        Method::Let,
        Method::Unset,
        Method::Select,
        Method::Create,
        Method::Insert,
        Method::InsertRelation,
        Method::Update,
        Method::Merge,
        Method::Patch,
        Method::Upsert,
        Method::Delete,
        Method::Query,
        Method::Live,
        Method::Kill,
        Method::Info,
        Method::Version,
    ];

    /// Name sent on the wire
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Use => "use",
            Method::Signin => "signin",
            Method::Signup => "signup",
            Method::Authenticate => "authenticate",
            Method::Invalidate => "invalidate",
            Method::Let => "let",
            Method::Unset => "unset",
            Method::Select => "select",
            Method::Create => "create",
            Method::Insert => "insert",
            Method::InsertRelation => "insert_relation",
            Method::Update => "update",
            Method::Merge => "merge",
            Method::Patch => "patch",
            Method::Upsert => "upsert",
            Method::Delete => "delete",
            Method::Query => "query",
            Method::Live => "live",
            Method::Kill => "kill",
            Method::Info => "info",
            Method::Version => "version",
        }
    }

    /// Human-readable phrase used in error messages, e.g. "signing in".
    #[must_use]
    pub fn action(self) -> &'static str {
        match self {
            Method::Use => "selecting namespace and database",
            Method::Signin => "signing in",
            Method::Signup => "signing up",
            Method::Authenticate => "authenticating",
            Method::Invalidate => "invalidating the session",
            Method::Let => "defining a variable",
            Method::Unset => "removing a variable",
            Method::Select => "selecting records",
            Method::Create => "creating records",
            Method::Insert => "inserting records",
            Method::InsertRelation => "inserting relations",
            Method::Update => "updating records",
            Method::Merge => "merging records",
            Method::Patch => "patching records",
            Method::Upsert => "upserting records",
            Method::Delete => "deleting records",
            Method::Query => "querying",
            Method::Live => "starting a live query",
            Method::Kill => "killing a live query",
            Method::Info => "getting session info",
            Method::Version => "getting database version",
        }
    }

    /// Whether a successful reply must carry a non-null result.
    #[must_use]
    pub fn requires_result(self) -> bool {
        matches!(
            self,
            Method::Signin | Method::Signup | Method::Version | Method::Live | Method::Query
        )
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown method: {0}")]
pub struct ParseMethodError(String);

impl FromStr for Method {
    type Err = ParseMethodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        let normalized = match normalized.as_str() {
            "sign-in" => "signin",
            "sign-up" => "signup",
            "insert-relation" => "insert_relation",
            other => other,
        };
        Method::ALL
            .into_iter()
            .find(|m| m.as_str() == normalized)
            .ok_or_else(|| ParseMethodError(s.to_string()))
    }
}

/// Correlation identifier of a request
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RequestId {
    Number(u64),
    String(String),
}

impl RequestId {
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            RequestId::Number(n) => i64::try_from(*n).map_or_else(|_| Value::String(n.to_string()), Value::Integer),
            RequestId::String(s) => Value::String(s.clone()),
        }
    }

    /// Read an id from a message field; `None` when absent or not an id.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(RequestId::String(s.clone())),
            Value::Integer(n) => u64::try_from(*n).ok().map(RequestId::Number),
            _ => None,
        }
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{n}"),
            RequestId::String(s) => write!(f, "{s}"),
        }
    }
}

impl From<u64> for RequestId {
    fn from(n: u64) -> Self {
        RequestId::Number(n)
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        RequestId::String(s)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        RequestId::String(s.to_string())
    }
}

/// A validated request ready to be encoded
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: RequestId,
    pub method: Method,
    pub params: Vec<Value>,
}

impl Request {
    /// Wire form of the request. `params` is left out when empty.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut object = Object::with_capacity(3);
        object.insert("id", self.id.to_value());
        object.insert("method", self.method.as_str());
        if !self.params.is_empty() {
            object.insert("params", Value::Array(self.params.clone()));
        }
        Value::Object(object)
    }
}

/// Error object returned by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

/// Reply to a request
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Absent on stateless transports and some server-side parse errors
    pub id: Option<RequestId>,
    pub result: Result<Value, RpcError>,
}

/// Kind of change reported by a live query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Create,
    Update,
    Delete,
    Killed,
}

impl Action {
    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "CREATE" => Some(Action::Create),
            "UPDATE" => Some(Action::Update),
            "DELETE" => Some(Action::Delete),
            "KILLED" => Some(Action::Killed),
            _ => None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Action::Create => "CREATE",
            Action::Update => "UPDATE",
            Action::Delete => "DELETE",
            Action::Killed => "KILLED",
        })
    }
}

/// Unsolicited live-query push
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// Subscription id returned by `live`
    pub id: Uuid,
    pub action: Action,
    /// Record the change applies to
    pub record: Value,
    /// Record content (or diff when the subscription asked for one)
    pub result: Value,
}

impl Notification {
    fn from_object(object: &Object) -> Option<Self> {
        let id = object.get("id")?.as_uuid()?;
        let action = Action::parse(object.get("action")?.as_str()?)?;
        Some(Self {
            id,
            action,
            record: object.get("record").cloned().unwrap_or_default(),
            result: object.get("result").cloned().unwrap_or_default(),
        })
    }
}

/// Inbound message after classification
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Response(Response),
    Notification(Notification),
}

/// Inbound message that is neither a response nor a notification
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed message: {0}")]
pub struct MessageViolation(pub String);

impl Incoming {
    /// Classify a decoded inbound message.
    ///
    /// # Errors
    ///
    /// Returns `MessageViolation` if the message is not an object, has an
    /// unusable id, a malformed error object, or neither `result` nor `error`.
    pub fn classify(value: Value) -> Result<Self, MessageViolation> {
        let Value::Object(mut object) = value else {
            return Err(MessageViolation(format!(
                "expected an object, found {}",
                value.kind()
            )));
        };

        let id = match object.remove("id") {
            None | Some(Value::None | Value::Null) => None,
            Some(raw) => Some(RequestId::from_value(&raw).ok_or_else(|| {
                MessageViolation(format!("invalid id of kind {}", raw.kind()))
            })?),
        };

        if let Some(error) = object.remove("error") {
            if !error.is_nullish() {
                return Ok(Incoming::Response(Response {
                    id,
                    result: Err(parse_error(&error)?),
                }));
            }
        }

        let Some(result) = object.remove("result") else {
            return Err(MessageViolation(
                "message carries neither result nor error".to_string(),
            ));
        };

        if id.is_none() {
            if let Some(notification) = result.as_object().and_then(Notification::from_object) {
                return Ok(Incoming::Notification(notification));
            }
        }

        Ok(Incoming::Response(Response {
            id,
            result: Ok(result),
        }))
    }
}

fn parse_error(error: &Value) -> Result<RpcError, MessageViolation> {
    match error {
        Value::Object(object) => {
            let code = object.get("code").and_then(Value::as_i64).unwrap_or_default();
            let message = object
                .get("message")
                .and_then(Value::as_str)
                .ok_or_else(|| MessageViolation("error object has no message".to_string()))?;
            Ok(RpcError {
                code,
                message: message.to_string(),
            })
        }
        Value::String(message) => Ok(RpcError {
            code: 0,
            message: message.clone(),
        }),
        other => Err(MessageViolation(format!(
            "error must be an object, found {}",
            other.kind()
        ))),
    }
}
