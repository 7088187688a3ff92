//! Thread loading with a single timed retry.

use tracing::{debug, info, warn};

use super::{endpoint, Notice, SessionContext, MAX_ATTEMPTS};
use crate::error::{Error, Operation, Result};
use crate::keys::{fetch_key, KeyKind, KeyRequest, KeyStore};
use crate::model::{LoadedThread, MessageInfo, ProtocolMeta, WireVariant};
use crate::packet::build_thread_packet;
use crate::response;
use crate::transport::{ResponseFormat, Transport};

/// How one load attempt failed.
enum Failure {
    /// Nothing could be sent; retrying would fail the same way.
    Local(Error),
    /// The exchange with the comment server failed.
    Remote(Error),
}

/// Where a [`ThreadLoadSession`] is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    /// Not started.
    Idle,
    /// First attempt in flight.
    Loading,
    /// First attempt failed; waiting for or running the retry.
    Retrying,
    /// Comments loaded.
    Loaded,
    /// Both attempts failed.
    Failed,
}

/// Loads the comments of one [`MessageInfo`].
///
/// A failed first attempt is reported through the notice handler and retried
/// once after the configured backoff. On the retry the unified protocol
/// fetches a fresh thread key; the legacy protocol resends the packet of the
/// first attempt unchanged.
pub struct ThreadLoadSession<'a, T> {
    ctx: SessionContext<'a, T>,
    keys: &'a mut KeyStore,
    state: LoadState,
    fresh_key: bool,
}

impl<'a, T: Transport> ThreadLoadSession<'a, T> {
    /// A session in [`LoadState::Idle`].
    pub fn new(ctx: SessionContext<'a, T>, keys: &'a mut KeyStore) -> Self {
        Self {
            ctx,
            keys,
            state: LoadState::Idle,
            fresh_key: false,
        }
    }

    /// Fetch a fresh unified thread key already on the first attempt.
    pub fn with_fresh_key(mut self) -> Self {
        self.fresh_key = true;
        self
    }

    /// Current state.
    pub fn state(&self) -> LoadState {
        self.state
    }

    /// Load, retrying once. The result also replaces `msg.thread_info`.
    ///
    /// Failures that happen before anything is sent, such as a legacy video
    /// without an active thread, are returned at once without a retry.
    pub async fn run(&mut self, msg: &mut MessageInfo) -> Result<LoadedThread> {
        self.state = LoadState::Loading;
        let mut sent = None;
        let mut attempt = 1;

        loop {
            match self.attempt(msg, attempt, &mut sent).await {
                Ok(loaded) => {
                    info!(
                        video_id = %msg.video_id,
                        thread_id = loaded.info.thread_id,
                        total_res_count = loaded.info.total_res_count,
                        chats = loaded.chats.len(),
                        attempt,
                        "thread loaded"
                    );
                    msg.thread_info = Some(loaded.info.clone());
                    self.state = LoadState::Loaded;
                    return Ok(loaded);
                }
                Err(Failure::Local(err)) => {
                    warn!(video_id = %msg.video_id, attempt, error = %err, "thread load cannot start");
                    self.state = LoadState::Failed;
                    return Err(err.in_context(Operation::Load));
                }
                Err(Failure::Remote(err)) if attempt < MAX_ATTEMPTS => {
                    let delay = self.ctx.config.retry_backoff();
                    warn!(video_id = %msg.video_id, attempt, error = %err, "thread load failed, retrying");
                    self.state = LoadState::Retrying;
                    attempt += 1;
                    self.ctx.notify(Notice::LoadRetrying {
                        attempt,
                        delay,
                        error: err,
                    });
                    self.ctx.backoff().await;
                }
                Err(Failure::Remote(err)) => {
                    warn!(video_id = %msg.video_id, attempt, error = %err, "thread load failed");
                    self.state = LoadState::Failed;
                    return Err(Error::exhausted(Operation::Load, err));
                }
            }
        }
    }

    async fn attempt(
        &mut self,
        msg: &mut MessageInfo,
        attempt: u32,
        sent: &mut Option<String>,
    ) -> std::result::Result<LoadedThread, Failure> {
        let body = match msg.wire_variant() {
            WireVariant::Legacy => match sent.clone() {
                Some(body) => {
                    debug!(video_id = %msg.video_id, "resending previous packet");
                    body
                }
                None => {
                    if msg.default_thread().is_none() {
                        return Err(Failure::Local(Error::protocol(format!(
                            "video {} has no active thread",
                            msg.video_id
                        ))));
                    }
                    self.resolve_thread_keys(msg).await.map_err(Failure::Remote)?;
                    let body = encode_thread_packet(msg)?;
                    *sent = Some(body.clone());
                    body
                }
            },
            WireVariant::Unified => {
                if self.fresh_key || attempt > 1 {
                    let slot = msg.unified_key_slot();
                    self.refresh_unified_key(msg, slot).await.map_err(Failure::Remote)?;
                }
                encode_thread_packet(msg)?
            }
        };

        let (request, format) = match &msg.protocol {
            ProtocolMeta::Legacy(meta) => (
                self.ctx.packet_request(meta.server.as_str(), body),
                ResponseFormat::from(meta.format),
            ),
            ProtocolMeta::Unified(meta) => (
                self.ctx
                    .packet_request(endpoint(&meta.server, "/v1/threads"), body),
                ResponseFormat::Meta,
            ),
        };
        let response = self
            .ctx
            .http
            .send(request, format)
            .await
            .map_err(Failure::Remote)?;

        let loaded = match msg.default_thread().cloned() {
            Some(requested) if msg.wire_variant() == WireVariant::Legacy => {
                response::legacy_thread(&response.body, msg, &requested)
            }
            _ => response::unified_thread(&response.body, msg),
        };
        loaded.map_err(Failure::Remote)
    }

    /// Make sure every active thread that needs a thread key has one.
    async fn resolve_thread_keys(&mut self, msg: &mut MessageInfo) -> Result<()> {
        let ctx = self.ctx;
        let mut required: Vec<u64> = msg
            .active_threads()
            .filter(|thread| thread.is_threadkey_required)
            .map(|thread| thread.id)
            .collect();
        required.sort_unstable();
        required.dedup();

        for thread_id in required {
            let request = KeyRequest::new(
                thread_id,
                KeyKind::Thread,
                WireVariant::Legacy,
                &msg.video_id,
                &msg.language,
            );
            let record = self
                .keys
                .get_or_fetch(thread_id, KeyKind::Thread, || {
                    fetch_key(ctx.http, ctx.config, &request)
                })
                .await?;
            msg.thread_keys.insert(thread_id, record);
        }
        Ok(())
    }

    /// Replace the unified thread key with a freshly issued one.
    async fn refresh_unified_key(&mut self, msg: &mut MessageInfo, thread_id: u64) -> Result<()> {
        let ctx = self.ctx;
        self.keys.invalidate(thread_id, KeyKind::Thread);

        let request = KeyRequest::new(
            thread_id,
            KeyKind::Thread,
            WireVariant::Unified,
            &msg.video_id,
            &msg.language,
        );
        let record = self
            .keys
            .get_or_fetch(thread_id, KeyKind::Thread, || {
                fetch_key(ctx.http, ctx.config, &request)
            })
            .await?;

        if let ProtocolMeta::Unified(meta) = &mut msg.protocol {
            meta.thread_key = record.token.clone();
        }
        msg.thread_keys.insert(thread_id, record);
        Ok(())
    }
}

fn encode_thread_packet(msg: &MessageInfo) -> std::result::Result<String, Failure> {
    build_thread_packet(msg)
        .and_then(|packet| packet.encode())
        .map_err(Failure::Local)
}
