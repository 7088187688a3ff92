//! Key-issuance calls: one endpoint per protocol and key kind, each answering
//! with a single opaque token.

use serde_json::Value;
use tracing::debug;

use super::{KeyKind, KeyRecord};
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::model::{legacy_language_code, Fork, WireVariant};
use crate::transport::{Request, ResponseFormat, Transport, TransportClient};

/// Everything a key-issuance call is parameterized by.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyRequest<'a> {
    /// Thread the key is for.
    pub thread_id: u64,
    /// Which key.
    pub kind: KeyKind,
    /// Protocol of the thread.
    pub variant: WireVariant,
    /// Video the thread belongs to; unified thread keys are issued per video.
    pub video_id: &'a str,
    /// Viewer language.
    pub language: &'a str,
    /// Fork of the comment being reacted to.
    pub fork: Fork,
    /// Block number of the next comment (legacy post keys).
    pub block_no: u64,
}

impl<'a> KeyRequest<'a> {
    /// A request for `kind` with main fork and block zero.
    pub fn new(
        thread_id: u64,
        kind: KeyKind,
        variant: WireVariant,
        video_id: &'a str,
        language: &'a str,
    ) -> Self {
        Self {
            thread_id,
            kind,
            variant,
            video_id,
            language,
            fork: Fork::Main,
            block_no: 0,
        }
    }

    /// Set the fork.
    pub fn with_fork(mut self, fork: Fork) -> Self {
        self.fork = fork;
        self
    }

    /// Set the block number.
    pub fn with_block_no(mut self, block_no: u64) -> Self {
        self.block_no = block_no;
        self
    }

    fn endpoint(&self, config: &ClientConfig) -> (Request, ResponseFormat, &'static str) {
        let thread = self.thread_id.to_string();
        let language = legacy_language_code(self.language).to_string();
        let nvapi = config.nvapi_base.trim_end_matches('/');
        let flapi = config.flapi_base.trim_end_matches('/');

        let (url, format, field) = match (self.variant, self.kind) {
            (WireVariant::Legacy, KeyKind::Thread) => (
                with_query(
                    &format!("{flapi}/getthreadkey"),
                    &[("thread", thread.as_str()), ("language_id", language.as_str())],
                ),
                ResponseFormat::Form,
                "threadkey",
            ),
            (WireVariant::Legacy, KeyKind::Post) => (
                with_query(
                    &format!("{flapi}/getpostkey"),
                    &[
                        ("thread", thread.as_str()),
                        ("block_no", self.block_no.to_string().as_str()),
                        ("device", "1"),
                        ("version", "1"),
                        ("version_sub", "6"),
                        ("yugi", ""),
                    ],
                ),
                ResponseFormat::Form,
                "postkey",
            ),
            (WireVariant::Legacy, KeyKind::Reaction) => (
                with_query(
                    &format!("{nvapi}/v1/nicorukey"),
                    &[
                        ("language", language.as_str()),
                        ("threadId", thread.as_str()),
                        ("fork", self.fork.legacy_code().to_string().as_str()),
                    ],
                ),
                ResponseFormat::Meta,
                "nicorukey",
            ),
            (WireVariant::Unified, KeyKind::Thread) => (
                with_query(
                    &format!("{nvapi}/v1/comment/keys/thread"),
                    &[("videoId", self.video_id)],
                ),
                ResponseFormat::Meta,
                "threadKey",
            ),
            (WireVariant::Unified, KeyKind::Post) => (
                with_query(
                    &format!("{nvapi}/v1/comment/keys/post"),
                    &[("threadId", thread.as_str())],
                ),
                ResponseFormat::Meta,
                "postKey",
            ),
            (WireVariant::Unified, KeyKind::Reaction) => (
                with_query(
                    &format!("{nvapi}/v1/comment/keys/nicoru"),
                    &[("threadId", thread.as_str())],
                ),
                ResponseFormat::Meta,
                "nicoruKey",
            ),
        };

        let mut request = Request::get(url).with_headers(config.key_headers());
        if self.kind == KeyKind::Reaction && self.variant == WireVariant::Unified {
            let language = if self.language.is_empty() {
                "ja-jp"
            } else {
                self.language
            };
            request = request.with_header("X-Niconico-Language", language);
        }
        (request, format, field)
    }
}

/// Call the key-issuance endpoint described by `request`.
///
/// An empty token counts as a failure.
pub async fn fetch_key<T: Transport>(
    http: &TransportClient<T>,
    config: &ClientConfig,
    request: &KeyRequest<'_>,
) -> Result<KeyRecord> {
    let (http_request, format, field) = request.endpoint(config);
    let response = http.send(http_request, format).await?;

    let token = response
        .body
        .get(field)
        .and_then(Value::as_str)
        .unwrap_or_default();
    if token.is_empty() {
        return Err(Error::key_fetch(format!(
            "server issued no {} key for thread {}",
            request.kind, request.thread_id
        ))
        .with_response(response.body));
    }

    let force_184 = response
        .body
        .get("force_184")
        .and_then(Value::as_str)
        .is_some_and(|flag| flag == "1");

    debug!(thread_id = request.thread_id, kind = %request.kind, "key issued");
    Ok(KeyRecord {
        thread_id: request.thread_id,
        kind: request.kind,
        token: token.to_string(),
        force_184,
    })
}

fn with_query(base: &str, pairs: &[(&str, &str)]) -> String {
    let query = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish();
    format!("{base}?{query}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint_url(request: &KeyRequest<'_>) -> String {
        request.endpoint(&ClientConfig::default()).0.url
    }

    #[test]
    fn test_legacy_endpoints() {
        let thread = KeyRequest::new(1, KeyKind::Thread, WireVariant::Legacy, "sm9", "en-us");
        assert_eq!(
            endpoint_url(&thread),
            "https://flapi.nicovideo.jp/api/getthreadkey?thread=1&language_id=1"
        );

        let post = KeyRequest::new(1, KeyKind::Post, WireVariant::Legacy, "sm9", "ja-jp")
            .with_block_no(3);
        assert_eq!(
            endpoint_url(&post),
            "https://flapi.nicovideo.jp/api/getpostkey?thread=1&block_no=3&device=1&version=1&version_sub=6&yugi="
        );

        let reaction = KeyRequest::new(1, KeyKind::Reaction, WireVariant::Legacy, "sm9", "zh-tw")
            .with_fork(Fork::Owner);
        assert_eq!(
            endpoint_url(&reaction),
            "https://nvapi.nicovideo.jp/v1/nicorukey?language=2&threadId=1&fork=1"
        );
    }

    #[test]
    fn test_unified_endpoints() {
        let thread = KeyRequest::new(1, KeyKind::Thread, WireVariant::Unified, "sm9", "ja-jp");
        assert_eq!(
            endpoint_url(&thread),
            "https://nvapi.nicovideo.jp/v1/comment/keys/thread?videoId=sm9"
        );

        let reaction = KeyRequest::new(5, KeyKind::Reaction, WireVariant::Unified, "sm9", "en-us");
        let (request, format, field) = reaction.endpoint(&ClientConfig::default());
        assert_eq!(
            request.url,
            "https://nvapi.nicovideo.jp/v1/comment/keys/nicoru?threadId=5"
        );
        assert_eq!(format, ResponseFormat::Meta);
        assert_eq!(field, "nicoruKey");
        assert_eq!(request.header("X-Niconico-Language"), Some("en-us"));
        assert_eq!(request.header("X-Frontend-Id"), Some("6"));
    }

    #[test]
    fn test_cookie_is_forwarded() {
        let config = ClientConfig::default().with_cookie("user_session=abc");
        let post = KeyRequest::new(1, KeyKind::Post, WireVariant::Unified, "sm9", "ja-jp");
        let (request, _, _) = post.endpoint(&config);
        assert_eq!(request.header("Cookie"), Some("user_session=abc"));
    }
}
