//! Mutable per-connection session state.
//!
//! The state only changes in response to confirmed server replies: a
//! successful sign-in stores the token, `use` stores the namespace and
//! database, `invalidate` clears the token.

use surql_types::Value;
use uuid::Uuid;

use crate::protocol::{Method, RequestId};
use crate::request::Params;

/// Context attached to requests on transports that carry it out of band.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Context {
    pub token: Option<String>,
    pub namespace: Option<String>,
    pub database: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SessionState {
    id: String,
    sequence: u64,
    token: Option<String>,
    namespace: Option<String>,
    database: Option<String>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sequence: 0,
            token: None,
            namespace: None,
            database: None,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    #[must_use]
    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    /// Correlation id for the next request: `<session id>:<sequence>`.
    pub fn next_request_id(&mut self) -> RequestId {
        self.sequence += 1;
        RequestId::String(format!("{}:{}", self.id, self.sequence))
    }

    #[must_use]
    pub fn context(&self) -> Context {
        Context {
            token: self.token.clone(),
            namespace: self.namespace.clone(),
            database: self.database.clone(),
        }
    }

    /// Apply the side effects of a successful call.
    ///
    /// `reply_id` is the id the server echoed back, if any.
    pub fn apply(
        &mut self,
        method: Method,
        params: &Params,
        result: &Value,
        reply_id: Option<&RequestId>,
    ) {
        match method {
            Method::Signin | Method::Signup => {
                if let Value::String(token) = result {
                    self.token = Some(token.clone());
                }
                self.adopt_identity(reply_id);
            }
            Method::Authenticate => {
                if let Some(Value::String(token)) = params.get("token") {
                    self.token = Some(token.clone());
                }
            }
            Method::Invalidate => {
                self.token = None;
            }
            Method::Use => {
                self.namespace = params.get("namespace").and_then(Value::as_str).map(str::to_string);
                self.database = params.get("database").and_then(Value::as_str).map(str::to_string);
            }
            _ => {}
        }
    }

    /// Take over a session id the server assigned in its reply.
    fn adopt_identity(&mut self, reply_id: Option<&RequestId>) {
        let Some(RequestId::String(reply)) = reply_id else {
            return;
        };
        let session = reply.rsplit_once(':').map_or(reply.as_str(), |(session, _)| session);
        if session.is_empty() || session == self.id {
            return;
        }
        tracing::debug!("Adopting session id {session} from server reply");
        self.id = session.to_string();
    }
}
