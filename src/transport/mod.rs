//! Transport abstraction and response decoding.
//!
//! A [`Transport`] performs one HTTP exchange and hands back the raw bytes.
//! [`TransportClient`] layers the comment protocol on top: it decodes the
//! body in the expected format and turns both network problems and
//! protocol-level status failures into the crate's [`Error`] envelope.
//!
//! # Example
//!
//! ```rust,ignore
//! use nico_thread::transport::{Request, ResponseFormat, TransportClient};
//!
//! let http = TransportClient::new(my_transport);
//! let response = http
//!     .send(Request::get("https://nvapi.example/v1/comment/keys/post?threadId=1"), ResponseFormat::Meta)
//!     .await?;
//! println!("{}", response.body["postKey"]);
//! ```

#[cfg(feature = "reqwest-transport")]
#[cfg_attr(docsrs, doc(cfg(feature = "reqwest-transport")))]
pub mod http;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use encoding_rs::{Encoding, UTF_8};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{Cause, Error, ErrorCode, Result};
use crate::model::WireFormat;
use crate::xml;

#[cfg(feature = "reqwest-transport")]
pub use http::ReqwestTransport;

/// HTTP method of a [`Request`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// GET
    Get,
    /// POST
    Post,
}

/// One outgoing request.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Method.
    pub method: Method,
    /// Absolute URL including the query string.
    pub url: String,
    /// Header name/value pairs.
    pub headers: Vec<(String, String)>,
    /// Request body.
    pub body: Option<String>,
}

impl Request {
    /// A GET request without body.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// A POST request carrying `body`.
    pub fn post(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            headers: Vec::new(),
            body: Some(body.into()),
        }
    }

    /// Add one header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Add several headers.
    pub fn with_headers(mut self, headers: impl IntoIterator<Item = (String, String)>) -> Self {
        self.headers.extend(headers);
        self
    }

    /// Look up a header value, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Raw response as produced by a [`Transport`].
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    /// HTTP status code.
    pub status: u16,
    /// `Content-Type` header, if present.
    pub content_type: Option<String>,
    /// Undecoded body.
    pub body: Bytes,
}

impl RawResponse {
    /// A response with the given status and body.
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            content_type: None,
            body: body.into(),
        }
    }

    /// A JSON response.
    pub fn json(status: u16, body: &Value) -> Self {
        Self::new(status, body.to_string())
            .with_content_type("application/json; charset=utf-8")
    }

    /// An XML response.
    pub fn xml(status: u16, body: impl Into<String>) -> Self {
        Self::new(status, body.into()).with_content_type("text/xml; charset=utf-8")
    }

    /// Set the content type.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// True for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body decoded with the charset named in `Content-Type`, UTF-8 otherwise.
    /// Malformed sequences are replaced rather than rejected.
    pub fn text(&self) -> String {
        let encoding = self
            .content_type
            .as_deref()
            .and_then(charset)
            .and_then(|label| Encoding::for_label(label.as_bytes()))
            .unwrap_or(UTF_8);
        let (text, _, _) = encoding.decode(&self.body);
        text.into_owned()
    }
}

fn charset(content_type: &str) -> Option<&str> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches('"'))
    })
}

/// Performs a single request/response exchange.
///
/// Implementations report network-level problems as
/// [`ErrorKind::TransportFailure`](crate::ErrorKind::TransportFailure) and
/// must not retry.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Execute `request` and return the raw response, whatever its status.
    async fn execute(&self, request: Request) -> Result<RawResponse>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn execute(&self, request: Request) -> Result<RawResponse> {
        (**self).execute(request).await
    }
}

/// How a response body is decoded and checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    /// JSON `{ "meta": { "status", "errorCode" }, "data": … }`. A
    /// `meta.status` other than 200 is a protocol failure; the decoded body is
    /// the `data` member.
    Meta,
    /// Legacy JSON array of single-key objects.
    LegacyJson,
    /// Legacy `<packet>` XML, decoded to the same shape as [`ResponseFormat::LegacyJson`].
    LegacyXml,
    /// `application/x-www-form-urlencoded` text, decoded to an object of strings.
    Form,
}

impl From<WireFormat> for ResponseFormat {
    fn from(format: WireFormat) -> Self {
        match format {
            WireFormat::Json => ResponseFormat::LegacyJson,
            WireFormat::Xml => ResponseFormat::LegacyXml,
        }
    }
}

/// A decoded response.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedResponse {
    /// HTTP status code.
    pub status: u16,
    /// Decoded body.
    pub body: Value,
}

/// Sends requests through a [`Transport`] and decodes their responses.
#[derive(Debug)]
pub struct TransportClient<T> {
    transport: T,
}

impl<T: Transport> TransportClient<T> {
    /// Wrap a transport.
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Send `request` and decode the response as `format`.
    pub async fn send(&self, request: Request, format: ResponseFormat) -> Result<DecodedResponse> {
        debug!(method = ?request.method, url = %request.url, "sending request");
        let raw = self.transport.execute(request).await?;
        let body = decode(&raw, format)?;
        Ok(DecodedResponse {
            status: raw.status,
            body,
        })
    }
}

/// Decode and check one response.
pub fn decode(raw: &RawResponse, format: ResponseFormat) -> Result<Value> {
    let text = raw.text();
    match format {
        ResponseFormat::Meta => decode_meta(raw, &text),
        _ if !raw.is_success() => Err(Error::transport(format!(
            "server answered HTTP {}",
            raw.status
        ))
        .with_code(ErrorCode::Status(i64::from(raw.status)))
        .with_cause(Cause::Io(text))),
        ResponseFormat::LegacyJson => serde_json::from_str(&text).map_err(|err| {
            Error::protocol("malformed JSON response").with_cause(Cause::Io(err.to_string()))
        }),
        ResponseFormat::LegacyXml => xml::decode_packet(&text),
        ResponseFormat::Form => Ok(decode_form(&text)),
    }
}

fn decode_meta(raw: &RawResponse, text: &str) -> Result<Value> {
    let body: Value = match serde_json::from_str(text) {
        Ok(body) => body,
        Err(_) if !raw.is_success() => {
            return Err(Error::transport(format!("server answered HTTP {}", raw.status))
                .with_code(ErrorCode::Status(i64::from(raw.status)))
                .with_cause(Cause::Io(text.to_string())));
        }
        Err(err) => {
            return Err(Error::protocol("malformed JSON response")
                .with_cause(Cause::Io(err.to_string())));
        }
    };

    let meta = body.get("meta");
    match meta.and_then(|meta| meta.get("status")).and_then(Value::as_i64) {
        Some(200) => Ok(body.get("data").cloned().unwrap_or(Value::Null)),
        Some(status) => {
            let code = meta
                .and_then(|meta| meta.get("errorCode"))
                .and_then(Value::as_str)
                .map(|name| ErrorCode::Named(name.to_string()))
                .unwrap_or(ErrorCode::Status(status));
            Err(
                Error::protocol(format!("server returned status {status} ({code})"))
                    .with_code(code)
                    .with_response(body),
            )
        }
        None if !raw.is_success() => Err(Error::transport(format!(
            "server answered HTTP {}",
            raw.status
        ))
        .with_code(ErrorCode::Status(i64::from(raw.status)))
        .with_response(body)),
        None => Err(Error::protocol("response carries no meta status").with_response(body)),
    }
}

fn decode_form(text: &str) -> Value {
    let fields: Map<String, Value> = url::form_urlencoded::parse(text.trim().as_bytes())
        .map(|(key, value)| (key.into_owned(), Value::String(value.into_owned())))
        .collect();
    Value::Object(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    #[test]
    fn test_meta_success_returns_data() {
        let raw = RawResponse::json(200, &json!({"meta": {"status": 200}, "data": {"postKey": "pk"}}));
        let body = decode(&raw, ResponseFormat::Meta).unwrap();
        assert_eq!(body, json!({"postKey": "pk"}));
    }

    #[test]
    fn test_meta_failure_even_on_http_success() {
        let raw = RawResponse::json(
            200,
            &json!({"meta": {"status": 400, "errorCode": "INVALID_TOKEN"}}),
        );
        let err = decode(&raw, ResponseFormat::Meta).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolFailure);
        assert_eq!(err.code(), Some(&ErrorCode::Named("INVALID_TOKEN".to_string())));
        assert!(matches!(err.cause(), Some(Cause::Response(_))));
    }

    #[test]
    fn test_meta_failure_without_error_code_uses_status() {
        let raw = RawResponse::json(403, &json!({"meta": {"status": 403}}));
        let err = decode(&raw, ResponseFormat::Meta).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolFailure);
        assert_eq!(err.code(), Some(&ErrorCode::Status(403)));
    }

    #[test]
    fn test_http_failure_without_body_is_transport_failure() {
        let raw = RawResponse::new(502, "Bad Gateway");
        let err = decode(&raw, ResponseFormat::Meta).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransportFailure);

        let err = decode(&raw, ResponseFormat::LegacyXml).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransportFailure);
        assert_eq!(err.code(), Some(&ErrorCode::Status(502)));
    }

    #[test]
    fn test_malformed_legacy_json_is_protocol_failure() {
        let raw = RawResponse::new(200, "[{\"thread\":");
        let err = decode(&raw, ResponseFormat::LegacyJson).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolFailure);
    }

    #[test]
    fn test_form_decoding() {
        let raw = RawResponse::new(200, "threadkey=abc%3D&force_184=1\n");
        let body = decode(&raw, ResponseFormat::Form).unwrap();
        assert_eq!(body, json!({"threadkey": "abc=", "force_184": "1"}));
    }

    #[test]
    fn test_charset_from_content_type() {
        let (bytes, _, _) = encoding_rs::SHIFT_JIS.encode("コメント");
        let raw = RawResponse::new(200, bytes.into_owned())
            .with_content_type("text/xml; charset=Shift_JIS");
        assert_eq!(raw.text(), "コメント");

        let raw = RawResponse::new(200, "plain").with_content_type("text/plain");
        assert_eq!(raw.text(), "plain");
    }

    #[test]
    fn test_request_header_lookup() {
        let request = Request::get("https://example/").with_header("X-Frontend-Id", "6");
        assert_eq!(request.header("x-frontend-id"), Some("6"));
        assert_eq!(request.header("Cookie"), None);
    }
}
