//! Unified single-object packets.

use serde::Serialize;
use serde_json::Value;

use crate::model::{ChatRecord, MessageInfo, UnifiedMeta};

/// Body of `POST {server}/v1/threads`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnifiedPacket {
    /// Opaque parameters from the watch page.
    pub params: Value,
    /// Current thread key.
    pub thread_key: String,
    /// Optional modifiers.
    pub additionals: Additionals,
}

/// Optional modifiers of a unified load.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Additionals {
    /// Wayback timestamp.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub when: Option<i64>,
}

/// Build the load packet.
pub fn thread_packet(info: &MessageInfo, meta: &UnifiedMeta) -> UnifiedPacket {
    UnifiedPacket {
        params: meta.params.clone(),
        thread_key: meta.thread_key.clone(),
        additionals: Additionals {
            when: info.wayback(),
        },
    }
}

/// Body of `POST {server}/v1/threads/{id}/comments`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPacket {
    /// Comment text.
    pub body: String,
    /// Commands, one per element.
    pub commands: Vec<String>,
    /// Playback position in milliseconds.
    pub vpos_ms: i64,
    /// Single-use post key.
    pub post_key: String,
    /// Video identifier.
    pub video_id: String,
}

impl ChatPacket {
    /// A post of `text` with the space-separated `command` string.
    pub fn new(info: &MessageInfo, text: &str, command: &str, vpos_ms: i64, post_key: &str) -> Self {
        Self {
            body: text.to_string(),
            commands: split_commands(command),
            vpos_ms,
            post_key: post_key.to_string(),
            video_id: info.video_id.clone(),
        }
    }
}

/// Body of `POST {server}/v1/threads/{id}/nicorus`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NicoruPacket {
    /// Text of the comment reacted to.
    pub content: String,
    /// Fork label.
    pub fork: &'static str,
    /// Sequence number of the comment.
    pub no: u64,
    /// Single-use reaction key.
    pub nicoru_key: String,
    /// Video identifier.
    pub video_id: String,
}

impl NicoruPacket {
    /// A reaction to `target`.
    pub fn new(info: &MessageInfo, target: &ChatRecord, nicoru_key: &str) -> Self {
        Self {
            content: target.content.clone(),
            fork: target.fork.label(),
            no: target.no,
            nicoru_key: nicoru_key.to_string(),
            video_id: info.video_id.clone(),
        }
    }
}

/// Split a command string on any Unicode whitespace, including the
/// ideographic and no-break spaces.
pub fn split_commands(command: &str) -> Vec<String> {
    command.split_whitespace().map(str::to_string).collect()
}
