//! Per-operation state machines.
//!
//! Each session borrows what it needs from the owning
//! [`ThreadClient`](crate::ThreadClient) for the duration of one call: the
//! transport, the configuration, the caller's notice handler and the key
//! store. Retries are explicit bounded loops; no session ever makes more than
//! [`MAX_ATTEMPTS`] attempts.

pub mod load;
pub mod post;
pub mod reaction;

pub use load::{LoadState, ThreadLoadSession};
pub use post::{ChatPostSession, Recovery};
pub use reaction::ReactionSession;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::ClientConfig;
use crate::error::Error;
use crate::transport::{Request, TransportClient};

/// Upper bound of attempts per operation: the first try plus one retry.
pub const MAX_ATTEMPTS: u32 = 2;

/// Something the caller may want to show while an operation is in flight.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum Notice {
    /// A load failed and will be retried after `delay`.
    LoadRetrying {
        /// The attempt about to start.
        attempt: u32,
        /// Wait before that attempt.
        delay: Duration,
        /// Why the previous attempt failed.
        error: Error,
    },
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::LoadRetrying { delay, .. } => {
                write!(f, "comment load failed, retrying in {}s", delay.as_secs())
            }
        }
    }
}

/// Callback receiving [`Notice`]s.
pub type NoticeHandler = Arc<dyn Fn(&Notice) + Send + Sync>;

/// What a session borrows from its client.
pub struct SessionContext<'a, T> {
    /// Transport.
    pub http: &'a TransportClient<T>,
    /// Endpoints, headers and backoff.
    pub config: &'a ClientConfig,
    /// Caller's notice handler.
    pub notice: Option<&'a NoticeHandler>,
}

impl<T> Clone for SessionContext<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for SessionContext<'_, T> {}

impl<'a, T> SessionContext<'a, T> {
    /// Bundle the borrowed parts.
    pub fn new(
        http: &'a TransportClient<T>,
        config: &'a ClientConfig,
        notice: Option<&'a NoticeHandler>,
    ) -> Self {
        Self {
            http,
            config,
            notice,
        }
    }

    pub(crate) fn notify(&self, notice: Notice) {
        if let Some(handler) = self.notice {
            handler(&notice);
        }
    }

    pub(crate) async fn backoff(&self) {
        tokio::time::sleep(self.config.retry_backoff()).await;
    }

    /// A packet POST with the frontend headers attached.
    pub(crate) fn packet_request(&self, url: impl Into<String>, body: String) -> Request {
        Request::post(url, body)
            .with_headers(self.config.frontend_headers())
            .with_header("Content-Type", crate::packet::CONTENT_TYPE)
    }
}

pub(crate) fn endpoint(server: &str, path: &str) -> String {
    format!("{}{path}", server.trim_end_matches('/'))
}
