//! Stateless HTTP binding.
//!
//! Every call is one `POST <base>/rpc`. The server keeps no session between
//! requests, so the token and namespace/database travel as headers each time.

use reqwest::StatusCode;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use url::Url;

use super::{Transport, expect_response, violation};
use crate::codec;
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::live::LiveRegistry;
use crate::protocol::{Incoming, RequestId, Response};
use crate::session::Context;

const CBOR_MEDIA_TYPE: &str = "application/cbor";
const NAMESPACE_HEADER: &str = "surreal-ns";
const DATABASE_HEADER: &str = "surreal-db";

/// Headers carrying the session context for one request.
///
/// # Errors
///
/// Returns `Error::Config` if a context value cannot be sent as a header.
pub fn headers(context: &Context) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static(CBOR_MEDIA_TYPE));
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(CBOR_MEDIA_TYPE));

    if let Some(token) = &context.token {
        headers.insert(AUTHORIZATION, header_value("token", &format!("Bearer {token}"))?);
    }
    if let Some(namespace) = &context.namespace {
        headers.insert(HeaderName::from_static(NAMESPACE_HEADER), header_value("namespace", namespace)?);
    }
    if let Some(database) = &context.database {
        headers.insert(HeaderName::from_static(DATABASE_HEADER), header_value("database", database)?);
    }
    Ok(headers)
}

fn header_value(what: &str, value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|_| Error::Config(format!("{what} contains characters not allowed in a header")))
}

#[derive(Debug)]
pub struct HttpTransport {
    url: Url,
    max_message_size: usize,
    client: Option<reqwest::Client>,
}

impl HttpTransport {
    #[must_use]
    pub fn new(url: Url, config: &ClientConfig) -> Self {
        Self {
            url,
            max_message_size: config.max_message_size,
            client: None,
        }
    }

    fn decode_reply(&self, status: StatusCode, body: &[u8]) -> Result<Response> {
        codec::check_size(body.len(), self.max_message_size)?;
        let value = match codec::decode(body) {
            Ok(value) => value,
            Err(_) if !status.is_success() => {
                return Err(Error::connection(format!(
                    "{} answered with HTTP {status}",
                    self.url
                )));
            }
            Err(e) => return Err(e.into()),
        };
        let incoming = Incoming::classify(value).map_err(|e| violation(&e))?;
        expect_response(incoming)
    }
}

impl Transport for HttpTransport {
    fn is_open(&self) -> bool {
        self.client.is_some()
    }

    async fn open(&mut self) -> Result<()> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::connection(format!("cannot create HTTP client: {e}")))?;
        self.client = Some(client);
        tracing::info!("Using stateless endpoint {}", self.url);
        Ok(())
    }

    async fn exchange(
        &mut self,
        id: &RequestId,
        payload: Vec<u8>,
        context: &Context,
    ) -> Result<Response> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| Error::connection("not connected"))?;

        let response = client
            .post(self.url.clone())
            .headers(headers(context)?)
            .body(payload)
            .send()
            .await
            .map_err(|e| Error::connection(format!("request {id} to {} failed: {e}", self.url)))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::connection(format!("failed to read reply to {id}: {e}")))?;
        tracing::debug!("Request {id} answered with HTTP {status} ({} bytes)", body.len());

        self.decode_reply(status, &body)
    }

    async fn close(&mut self) {
        self.client = None;
    }

    fn retains_context(&self) -> bool {
        false
    }

    fn live_registry(&self) -> Option<&LiveRegistry> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use surql_types::{Object, Value};

    fn transport() -> HttpTransport {
        HttpTransport::new(
            Url::parse("http://localhost:8000/rpc").unwrap(),
            &ClientConfig::default(),
        )
    }

    #[test]
    fn test_headers_without_context() {
        let headers = headers(&Context::default()).unwrap();
        assert_eq!(headers.get(ACCEPT).unwrap(), "application/cbor");
        assert_eq!(headers.get(CONTENT_TYPE).unwrap(), "application/cbor");
        assert!(headers.get(AUTHORIZATION).is_none());
        assert!(headers.get("Surreal-NS").is_none());
    }

    #[test]
    fn test_headers_carry_context() {
        let context = Context {
            token: Some("a.b.c".to_string()),
            namespace: Some("ns".to_string()),
            database: Some("db".to_string()),
        };
        let headers = headers(&context).unwrap();
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer a.b.c");
        assert_eq!(headers.get("Surreal-NS").unwrap(), "ns");
        assert_eq!(headers.get("Surreal-DB").unwrap(), "db");
    }

    #[test]
    fn test_header_rejects_control_characters() {
        let context = Context {
            namespace: Some("bad\nname".to_string()),
            ..Context::default()
        };
        assert!(matches!(headers(&context), Err(Error::Config(_))));
    }

    #[test]
    fn test_decode_reply_success() {
        let mut reply = Object::new();
        reply.insert("result", "2.1.0");
        let body = codec::encode(&Value::Object(reply)).unwrap();

        let response = transport().decode_reply(StatusCode::OK, &body).unwrap();
        assert_eq!(response.result, Ok(Value::from("2.1.0")));
    }

    #[test]
    fn test_decode_reply_error_status_with_garbage() {
        let err = transport()
            .decode_reply(StatusCode::BAD_GATEWAY, b"<html>")
            .unwrap_err();
        assert!(err.is_connection());
        assert!(err.to_string().contains("502"));
    }

    #[test]
    fn test_decode_reply_error_status_with_rpc_error() {
        let mut error = Object::new();
        error.insert("code", -32000);
        error.insert("message", "There was a problem with authentication");
        let mut reply = Object::new();
        reply.insert("error", error);
        let body = codec::encode(&Value::Object(reply)).unwrap();

        let response = transport()
            .decode_reply(StatusCode::UNAUTHORIZED, &body)
            .unwrap();
        assert_eq!(response.result.unwrap_err().code, -32000);
    }

    #[test]
    fn test_decode_reply_too_large() {
        let mut transport = transport();
        transport.max_message_size = 4;
        let err = transport.decode_reply(StatusCode::OK, &[0; 8]).unwrap_err();
        assert!(matches!(
            err,
            Error::Decode(codec::DecodeError::TooLarge { size: 8, max: 4 })
        ));
    }

    #[test]
    fn test_not_open_until_opened() {
        assert!(!transport().is_open());
    }
}
