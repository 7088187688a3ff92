//! Comment posting with one recoverable retry.

use std::time::Duration;

use tracing::{info, warn};

use super::{endpoint, SessionContext, ThreadLoadSession, MAX_ATTEMPTS};
use crate::error::{Error, ErrorCode, ErrorKind, Operation, Result};
use crate::keys::{fetch_key, KeyKind, KeyRequest, KeyStore};
use crate::model::{MessageInfo, PostedChat, ProtocolMeta, ThreadInfo, WireVariant};
use crate::packet::{legacy, unified::ChatPacket};
use crate::response;
use crate::transport::{ResponseFormat, Transport};

/// What to do about a failed post.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Wait and send again.
    Retry,
    /// Invalidate thread keys, reload the thread, wait and send again.
    Reload,
    /// Give up.
    Fatal,
}

impl Recovery {
    /// Classify a post failure by its server code. Only protocol failures
    /// are recoverable; network and key fetch errors are fatal.
    pub fn classify(variant: WireVariant, err: &Error) -> Self {
        if err.kind() != ErrorKind::ProtocolFailure {
            return Recovery::Fatal;
        }
        match (variant, err.code()) {
            (WireVariant::Legacy, Some(ErrorCode::Status(2 | 4 | 5))) => Recovery::Retry,
            (WireVariant::Legacy, Some(ErrorCode::Status(3))) => Recovery::Reload,
            (WireVariant::Unified, Some(ErrorCode::Named(name)))
                if name == "INVALID_TOKEN" || name == "EXPIRED_TOKEN" =>
            {
                Recovery::Reload
            }
            _ => Recovery::Fatal,
        }
    }
}

/// Posts one comment to the loaded thread of a [`MessageInfo`].
pub struct ChatPostSession<'a, T> {
    ctx: SessionContext<'a, T>,
    keys: &'a mut KeyStore,
}

impl<'a, T: Transport> ChatPostSession<'a, T> {
    /// A new session.
    pub fn new(ctx: SessionContext<'a, T>, keys: &'a mut KeyStore) -> Self {
        Self { ctx, keys }
    }

    /// Post `text` with the space-separated `command` at playback `offset`.
    ///
    /// Requires a successful load. A recoverable failure is retried once,
    /// after a reload when the thread session went stale; the result of that
    /// retry is what is returned. A server code that cannot be recovered from
    /// is [`ErrorKind::Terminal`] at once. Key fetch and network failures
    /// keep their own kind.
    pub async fn run(
        &mut self,
        msg: &mut MessageInfo,
        text: &str,
        command: &str,
        offset: Duration,
    ) -> Result<PostedChat> {
        let variant = msg.wire_variant();
        let mut attempt = 1;

        loop {
            let err = match self.attempt(msg, text, command, offset).await {
                Ok(posted) => {
                    info!(video_id = %msg.video_id, no = posted.no, attempt, "comment posted");
                    return Ok(posted);
                }
                Err(err) => err,
            };

            let recovery = Recovery::classify(variant, &err);
            if recovery == Recovery::Fatal {
                warn!(video_id = %msg.video_id, attempt, error = %err, "comment post failed");
                if err.kind() == ErrorKind::ProtocolFailure && err.code().is_some() {
                    return Err(Error::rejected(Operation::Post, err));
                }
                return Err(err.in_context(Operation::Post));
            }
            if attempt >= MAX_ATTEMPTS {
                warn!(video_id = %msg.video_id, attempt, error = %err, "comment post failed again");
                return Err(Error::exhausted(Operation::Post, err));
            }

            warn!(video_id = %msg.video_id, attempt, ?recovery, error = %err, "comment post failed, retrying");
            if recovery == Recovery::Reload {
                self.reload(msg).await?;
            }
            self.ctx.backoff().await;
            attempt += 1;
        }
    }

    async fn reload(&mut self, msg: &mut MessageInfo) -> Result<()> {
        let mut thread_ids: Vec<u64> = msg.threads.iter().map(|thread| thread.id).collect();
        thread_ids.push(msg.unified_key_slot());
        for thread_id in thread_ids {
            self.keys.invalidate(thread_id, KeyKind::Thread);
        }

        let mut session = ThreadLoadSession::new(self.ctx, &mut *self.keys);
        if msg.wire_variant() == WireVariant::Unified {
            session = session.with_fresh_key();
        }
        session
            .run(msg)
            .await
            .map(drop)
            .map_err(|err| err.in_context(Operation::Post))
    }

    async fn attempt(
        &mut self,
        msg: &MessageInfo,
        text: &str,
        command: &str,
        offset: Duration,
    ) -> Result<PostedChat> {
        let thread = msg
            .thread_info
            .as_ref()
            .ok_or_else(|| Error::protocol("cannot post before the thread is loaded"))?;
        let vpos = (offset.as_millis() / 10) as i64;
        let post_key = self.post_key(msg, thread).await?;

        match &msg.protocol {
            ProtocolMeta::Legacy(meta) => {
                let body =
                    legacy::chat_packet(msg, meta, thread, text, command, vpos, &post_key).encode()?;
                let request = self.ctx.packet_request(meta.server.as_str(), body);
                let response = self
                    .ctx
                    .http
                    .send(request, ResponseFormat::from(meta.format))
                    .await?;
                response::legacy_chat_result(&response.body)
            }
            ProtocolMeta::Unified(meta) => {
                let packet = ChatPacket::new(msg, text, command, vpos * 10, &post_key);
                let body = serde_json::to_string(&packet)
                    .map_err(|err| Error::protocol(format!("could not encode packet: {err}")))?;
                let url = endpoint(
                    &meta.server,
                    &format!("/v1/threads/{}/comments", thread.thread_id),
                );
                let request = self.ctx.packet_request(url, body);
                let response = self.ctx.http.send(request, ResponseFormat::Meta).await?;
                response::unified_chat_result(&response.body)
            }
        }
    }

    async fn post_key(&mut self, msg: &MessageInfo, thread: &ThreadInfo) -> Result<String> {
        let ctx = self.ctx;
        let request = KeyRequest::new(
            thread.thread_id,
            KeyKind::Post,
            msg.wire_variant(),
            &msg.video_id,
            &thread.language,
        )
        .with_block_no(thread.block_no());
        let record = self
            .keys
            .get_or_fetch(thread.thread_id, KeyKind::Post, || {
                fetch_key(ctx.http, ctx.config, &request)
            })
            .await?;
        Ok(record.token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_classification() {
        let status = |code| Error::protocol("rejected").with_code(ErrorCode::Status(code));
        for code in [2, 4, 5] {
            assert_eq!(Recovery::classify(WireVariant::Legacy, &status(code)), Recovery::Retry);
        }
        assert_eq!(Recovery::classify(WireVariant::Legacy, &status(3)), Recovery::Reload);
        assert_eq!(Recovery::classify(WireVariant::Legacy, &status(1)), Recovery::Fatal);
        assert_eq!(Recovery::classify(WireVariant::Legacy, &status(8)), Recovery::Fatal);
    }

    #[test]
    fn test_unified_classification() {
        let named = |code: &str| Error::protocol("rejected").with_code(ErrorCode::Named(code.to_string()));
        assert_eq!(Recovery::classify(WireVariant::Unified, &named("INVALID_TOKEN")), Recovery::Reload);
        assert_eq!(Recovery::classify(WireVariant::Unified, &named("EXPIRED_TOKEN")), Recovery::Reload);
        assert_eq!(Recovery::classify(WireVariant::Unified, &named("DUPLICATE_COMMENT")), Recovery::Fatal);
        assert_eq!(
            Recovery::classify(WireVariant::Unified, &Error::protocol("rejected").with_code(ErrorCode::Status(3))),
            Recovery::Fatal
        );
    }

    #[test]
    fn test_failures_without_code_are_fatal() {
        assert_eq!(Recovery::classify(WireVariant::Legacy, &Error::transport("reset")), Recovery::Fatal);
        assert_eq!(Recovery::classify(WireVariant::Unified, &Error::key_fetch("empty")), Recovery::Fatal);

        let key_failure = Error::key_fetch("no post key")
            .with_code(ErrorCode::Named("INVALID_TOKEN".to_string()));
        assert_eq!(Recovery::classify(WireVariant::Unified, &key_failure), Recovery::Fatal);
    }
}
