//! Scripted transport for testing.
//!
//! [`MockTransport`] answers requests from a queue of expected
//! [`Exchange`]s, in order, and records every request it sees together with
//! the (tokio) instant it arrived. With `#[tokio::test(start_paused = true)]`
//! those instants make backoff timing observable without real waiting.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::time::Instant;

use crate::error::{Cause, Error, Result};
use crate::transport::{Method, RawResponse, Request, Transport};

/// One expected request and the reply to give.
#[derive(Debug, Clone)]
pub struct Exchange {
    method: Option<Method>,
    url_prefix: String,
    reply: Reply,
}

#[derive(Debug, Clone)]
enum Reply {
    Respond(RawResponse),
    Fail(String),
}

impl Exchange {
    /// Expect a GET whose URL starts with `url_prefix`.
    pub fn get(url_prefix: impl Into<String>, response: RawResponse) -> Self {
        Self {
            method: Some(Method::Get),
            url_prefix: url_prefix.into(),
            reply: Reply::Respond(response),
        }
    }

    /// Expect a POST whose URL starts with `url_prefix`.
    pub fn post(url_prefix: impl Into<String>, response: RawResponse) -> Self {
        Self {
            method: Some(Method::Post),
            url_prefix: url_prefix.into(),
            reply: Reply::Respond(response),
        }
    }

    /// Expect any request to `url_prefix` and fail it at the network level.
    pub fn fail(url_prefix: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            method: None,
            url_prefix: url_prefix.into(),
            reply: Reply::Fail(message.into()),
        }
    }

    fn matches(&self, request: &Request) -> bool {
        self.method.map_or(true, |method| method == request.method)
            && request.url.starts_with(&self.url_prefix)
    }
}

/// A request seen by a [`MockTransport`].
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// The request.
    pub request: Request,
    /// When it arrived.
    pub at: Instant,
}

struct MockState {
    exchanges: VecDeque<Exchange>,
    recorded: Vec<RecordedRequest>,
    strict: bool,
}

/// A [`Transport`] replaying scripted exchanges.
pub struct MockTransport {
    state: Mutex<MockState>,
}

impl MockTransport {
    /// A strict mock: a request that does not match the next exchange fails.
    pub fn new(exchanges: Vec<Exchange>) -> Self {
        Self::with_mode(exchanges, true)
    }

    /// A relaxed mock: an unexpected request gets an HTTP 500 and the
    /// pending exchange stays queued.
    pub fn new_relaxed(exchanges: Vec<Exchange>) -> Self {
        Self::with_mode(exchanges, false)
    }

    fn with_mode(exchanges: Vec<Exchange>, strict: bool) -> Self {
        Self {
            state: Mutex::new(MockState {
                exchanges: exchanges.into(),
                recorded: Vec::new(),
                strict,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue another exchange.
    pub fn push(&self, exchange: Exchange) {
        self.state().exchanges.push_back(exchange);
    }

    /// Every request seen so far.
    pub fn requests(&self) -> Vec<Request> {
        self.state()
            .recorded
            .iter()
            .map(|recorded| recorded.request.clone())
            .collect()
    }

    /// Requests whose URL starts with `prefix`, with arrival times.
    pub fn requests_to(&self, prefix: &str) -> Vec<RecordedRequest> {
        self.state()
            .recorded
            .iter()
            .filter(|recorded| recorded.request.url.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// True once every exchange has been consumed.
    pub fn is_complete(&self) -> bool {
        self.state().exchanges.is_empty()
    }

    /// Number of exchanges not yet consumed.
    pub fn remaining_exchanges(&self) -> usize {
        self.state().exchanges.len()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn execute(&self, request: Request) -> Result<RawResponse> {
        let mut state = self.state();
        state.recorded.push(RecordedRequest {
            request: request.clone(),
            at: Instant::now(),
        });

        let Some(exchange) = state.exchanges.pop_front() else {
            return if state.strict {
                Err(Error::transport(format!(
                    "mock: no exchange left for {:?} {}",
                    request.method, request.url
                )))
            } else {
                Ok(RawResponse::new(500, "no handler for request"))
            };
        };

        if !exchange.matches(&request) {
            if state.strict {
                return Err(Error::transport(format!(
                    "mock: expected {:?} {}, got {:?} {}",
                    exchange.method, exchange.url_prefix, request.method, request.url
                )));
            }
            state.exchanges.push_front(exchange);
            return Ok(RawResponse::new(500, "request not recognized"));
        }

        match exchange.reply {
            Reply::Respond(response) => Ok(response),
            Reply::Fail(message) => {
                Err(Error::transport("mock network failure").with_cause(Cause::Io(message)))
            }
        }
    }
}

/// A `{meta: {status: 200}, data}` response.
pub fn meta_ok(data: Value) -> RawResponse {
    RawResponse::json(200, &json!({"meta": {"status": 200}, "data": data}))
}

/// A `{meta: {status, errorCode}}` failure with the same HTTP status.
pub fn meta_error(status: u16, error_code: &str) -> RawResponse {
    RawResponse::json(
        status,
        &json!({"meta": {"status": status, "errorCode": error_code}}),
    )
}

/// A legacy JSON array response.
pub fn legacy_json(entries: Value) -> RawResponse {
    RawResponse::json(200, &entries)
}

/// A form-encoded key response.
pub fn form(body: &str) -> RawResponse {
    RawResponse::new(200, body.to_string())
        .with_content_type("text/plain; charset=utf-8")
}
