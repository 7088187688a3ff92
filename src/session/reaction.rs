//! Reactions ("nicoru") to a loaded comment. Never retried.

use tracing::{info, warn};

use super::{endpoint, SessionContext};
use crate::error::{Error, ErrorCode, ErrorKind, Operation, Result};
use crate::keys::{fetch_key, KeyKind, KeyRequest, KeyStore};
use crate::model::{ChatRecord, MessageInfo, ProtocolMeta, Reaction};
use crate::packet::{legacy, unified::NicoruPacket};
use crate::response::{self, ALREADY_NICORUED, NICORU_ALREADY, NICORU_OK};
use crate::transport::{ResponseFormat, Transport};

/// Submits one reaction.
pub struct ReactionSession<'a, T> {
    ctx: SessionContext<'a, T>,
    keys: &'a mut KeyStore,
}

impl<'a, T: Transport> ReactionSession<'a, T> {
    /// A new session.
    pub fn new(ctx: SessionContext<'a, T>, keys: &'a mut KeyStore) -> Self {
        Self { ctx, keys }
    }

    /// React to `target`.
    ///
    /// Status `4` (already reacted) surfaces as [`ErrorKind::AlreadyDone`];
    /// any other non-zero status is terminal.
    pub async fn run(&mut self, msg: &MessageInfo, target: &ChatRecord) -> Result<Reaction> {
        let (status, reaction) = match self.submit(msg, target).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(video_id = %msg.video_id, no = target.no, error = %err, "reaction failed");
                if err.is_terminal() {
                    return Err(err);
                }
                return Err(err.in_context(Operation::React));
            }
        };

        match status {
            NICORU_OK => {
                info!(video_id = %msg.video_id, no = target.no, count = reaction.count, "reaction accepted");
                Ok(reaction)
            }
            NICORU_ALREADY => Err(Error::new(
                ErrorKind::AlreadyDone,
                format!("comment {} already has your reaction", target.no),
            )
            .with_code(ErrorCode::Status(status))),
            status => {
                warn!(video_id = %msg.video_id, no = target.no, status, "reaction rejected");
                Err(Error::new(
                    ErrorKind::Terminal,
                    format!("reaction failed with status {status}"),
                )
                .with_code(ErrorCode::Status(status)))
            }
        }
    }

    /// Send the reaction and map the response to a legacy status code.
    async fn submit(&mut self, msg: &MessageInfo, target: &ChatRecord) -> Result<(i64, Reaction)> {
        let thread = msg
            .thread_info
            .as_ref()
            .ok_or_else(|| Error::protocol("cannot react before the thread is loaded"))?;
        let thread_id = thread.thread_id;

        let ctx = self.ctx;
        let request = KeyRequest::new(
            thread_id,
            KeyKind::Reaction,
            msg.wire_variant(),
            &msg.video_id,
            &thread.language,
        )
        .with_fork(target.fork);
        let nicoru_key = self
            .keys
            .get_or_fetch(thread_id, KeyKind::Reaction, || {
                fetch_key(ctx.http, ctx.config, &request)
            })
            .await?
            .token;

        match &msg.protocol {
            ProtocolMeta::Legacy(meta) => {
                let body = legacy::nicoru_packet(msg, meta, thread_id, target, &nicoru_key).encode()?;
                let request = ctx.packet_request(meta.server.as_str(), body);
                let response = ctx
                    .http
                    .send(request, ResponseFormat::from(meta.format))
                    .await?;
                response::legacy_nicoru_result(&response.body)
            }
            ProtocolMeta::Unified(meta) => {
                let packet = NicoruPacket::new(msg, target, &nicoru_key);
                let body = serde_json::to_string(&packet)
                    .map_err(|err| Error::protocol(format!("could not encode packet: {err}")))?;
                let url = endpoint(&meta.server, &format!("/v1/threads/{thread_id}/nicorus"));
                let request = ctx.packet_request(url, body);

                match ctx.http.send(request, ResponseFormat::Meta).await {
                    Ok(response) => Ok((NICORU_OK, response::unified_nicoru(&response.body))),
                    Err(err) => match err.code() {
                        Some(ErrorCode::Named(name)) if name == ALREADY_NICORUED => Ok((
                            NICORU_ALREADY,
                            Reaction {
                                reaction_id: None,
                                count: target.nicoru_count,
                            },
                        )),
                        Some(ErrorCode::Status(status)) if err.kind() == ErrorKind::ProtocolFailure => {
                            Ok((*status, Reaction { reaction_id: None, count: target.nicoru_count }))
                        }
                        Some(ErrorCode::Named(_)) if err.kind() == ErrorKind::ProtocolFailure => {
                            Err(Error::exhausted(Operation::React, err))
                        }
                        _ => Err(err),
                    },
                }
            }
        }
    }
}
