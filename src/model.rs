//! Caller-facing data model.
//!
//! [`MessageInfo`] describes one video's comment context. It is owned by the
//! caller; the client only attaches [`MessageInfo::thread_info`] and
//! [`MessageInfo::thread_keys`].

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::keys::KeyRecord;

/// Sub-category of comments within a video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Fork {
    /// The main comment stream.
    #[default]
    Main,
    /// Comments by the uploader.
    Owner,
    /// Simplified ("easy") comments.
    Easy,
}

impl Fork {
    /// Label used by the unified protocol.
    pub fn label(self) -> &'static str {
        match self {
            Fork::Main => "main",
            Fork::Owner => "owner",
            Fork::Easy => "easy",
        }
    }

    /// Numeric code used by the legacy protocol.
    pub fn legacy_code(self) -> i64 {
        match self {
            Fork::Main => 0,
            Fork::Owner => 1,
            Fork::Easy => 2,
        }
    }

    /// Parse a unified-protocol label.
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "main" => Some(Fork::Main),
            "owner" => Some(Fork::Owner),
            "easy" => Some(Fork::Easy),
            _ => None,
        }
    }

    /// Parse a legacy numeric code. Unknown codes count as owner comments,
    /// the only fork older servers used.
    pub fn from_legacy_code(code: i64) -> Self {
        match code {
            0 => Fork::Main,
            2 => Fork::Easy,
            _ => Fork::Owner,
        }
    }

    /// True for anything but the main stream.
    pub fn is_fork(self) -> bool {
        self != Fork::Main
    }
}

impl fmt::Display for Fork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One logical comment thread of a video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadDescriptor {
    /// Thread identifier.
    pub id: u64,
    /// Which fork this thread holds.
    #[serde(default)]
    pub fork: Fork,
    /// Only active threads are requested.
    #[serde(default = "default_true")]
    pub is_active: bool,
    /// Whether reading requires a thread key.
    #[serde(default)]
    pub is_threadkey_required: bool,
    /// Whether the legacy leaf sub-request is issued for this thread.
    #[serde(default = "default_true")]
    pub is_leaf_required: bool,
}

fn default_true() -> bool {
    true
}

impl ThreadDescriptor {
    /// An active main-fork thread that needs neither key nor special flags.
    pub fn main(id: u64) -> Self {
        Self {
            id,
            fork: Fork::Main,
            is_active: true,
            is_threadkey_required: false,
            is_leaf_required: true,
        }
    }

    /// An active thread of the given fork.
    pub fn forked(id: u64, fork: Fork) -> Self {
        Self {
            fork,
            ..Self::main(id)
        }
    }

    /// Mark the thread as requiring a thread key.
    pub fn with_threadkey_required(mut self) -> Self {
        self.is_threadkey_required = true;
        self
    }
}

/// Wire encoding of the legacy protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    /// JSON array of single-key objects.
    #[default]
    Json,
    /// `<packet>` XML document.
    Xml,
}

/// Metadata for the legacy multi-thread protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyMeta {
    /// Message server URL packets are posted to.
    pub server: String,
    /// Packet and response encoding.
    #[serde(default)]
    pub format: WireFormat,
    /// Caller-supplied user key, sent only for threads without a thread key.
    #[serde(default)]
    pub user_key: Option<String>,
    /// Explicit `res_from` for main threads.
    #[serde(default)]
    pub res_from: Option<i64>,
}

/// Metadata for the unified single-endpoint protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnifiedMeta {
    /// Comment server base URL.
    pub server: String,
    /// Opaque request parameters supplied by the watch page.
    pub params: Value,
    /// Current thread key.
    pub thread_key: String,
}

/// Protocol metadata attached to a [`MessageInfo`]; its shape selects the
/// wire variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "variant", rename_all = "lowercase")]
pub enum ProtocolMeta {
    /// Legacy protocol.
    Legacy(LegacyMeta),
    /// Unified protocol.
    Unified(UnifiedMeta),
}

/// Which wire protocol a session speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WireVariant {
    /// Legacy multi-thread array protocol.
    Legacy,
    /// Unified single-object protocol.
    Unified,
}

/// One video's comment context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageInfo {
    /// Video identifier.
    pub video_id: String,
    /// Viewer's user id, `0` when anonymous.
    #[serde(default)]
    pub user_id: u64,
    /// Whether the viewer has a premium account.
    #[serde(default)]
    pub is_premium: bool,
    /// Display language, e.g. `ja-jp`.
    #[serde(default = "default_language")]
    pub language: String,
    /// Video duration in seconds.
    #[serde(default)]
    pub duration: u32,
    /// Wayback timestamp; comments are requested as of this point in time.
    #[serde(default)]
    pub when: Option<i64>,
    /// Whether posting is forced to be anonymous.
    #[serde(default)]
    pub is_184_forced: bool,
    /// Threads of this video.
    pub threads: Vec<ThreadDescriptor>,
    /// Protocol metadata.
    pub protocol: ProtocolMeta,
    /// Result of the last successful load.
    #[serde(default)]
    pub thread_info: Option<ThreadInfo>,
    /// Thread keys resolved during loads, by thread id.
    #[serde(default)]
    pub thread_keys: BTreeMap<u64, KeyRecord>,
}

fn default_language() -> String {
    "ja-jp".to_string()
}

impl MessageInfo {
    /// Wire variant selected by the metadata shape.
    pub fn wire_variant(&self) -> WireVariant {
        match self.protocol {
            ProtocolMeta::Legacy(_) => WireVariant::Legacy,
            ProtocolMeta::Unified(_) => WireVariant::Unified,
        }
    }

    /// Active threads, in declaration order.
    pub fn active_threads(&self) -> impl Iterator<Item = &ThreadDescriptor> {
        self.threads.iter().filter(|thread| thread.is_active)
    }

    /// The thread loads report on and posts go to: the first active main
    /// thread, or the first active thread when there is no main one.
    pub fn default_thread(&self) -> Option<&ThreadDescriptor> {
        self.active_threads()
            .find(|thread| thread.fork == Fork::Main)
            .or_else(|| self.active_threads().next())
    }

    /// Id the unified thread key is stored under. Unified keys are issued
    /// per video, so this falls back from the loaded thread to the default
    /// thread and finally to `0` for a video without descriptors.
    pub fn unified_key_slot(&self) -> u64 {
        self.thread_info
            .as_ref()
            .map(|info| info.thread_id)
            .or_else(|| self.default_thread().map(|thread| thread.id))
            .unwrap_or_default()
    }

    /// Wayback timestamp, ignoring non-positive values.
    pub fn wayback(&self) -> Option<i64> {
        self.when.filter(|when| *when > 0)
    }
}

/// Protocol-specific bookkeeping a load leaves for later calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "variant", rename_all = "lowercase")]
pub enum ThreadSession {
    /// Legacy session ticket.
    Legacy {
        /// Ticket required when posting.
        ticket: String,
        /// Server clock at load time.
        server_time: Option<i64>,
        /// Thread revision.
        revision: Option<i64>,
    },
    /// The unified protocol keeps no ticket.
    Unified,
}

/// Normalized result of a load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadInfo {
    /// Thread the load reported on.
    pub thread_id: u64,
    /// Video identifier.
    pub video_id: String,
    /// Viewer's user id.
    pub user_id: u64,
    /// Server-computed response count, forks excluded.
    pub total_res_count: u64,
    /// Whether posting is forced to be anonymous.
    pub is_184_forced: bool,
    /// Display language.
    pub language: String,
    /// Wayback timestamp the load used.
    pub when: Option<i64>,
    /// True when loaded in wayback mode.
    pub is_wayback: bool,
    /// Protocol bookkeeping.
    pub session: ThreadSession,
}

impl ThreadInfo {
    /// Block number of the next comment, used when fetching legacy post keys.
    pub fn block_no(&self) -> u64 {
        (self.total_res_count + 1) / 100
    }

    /// Legacy ticket, when loaded over the legacy protocol.
    pub fn ticket(&self) -> Option<&str> {
        match &self.session {
            ThreadSession::Legacy { ticket, .. } => Some(ticket),
            ThreadSession::Unified => None,
        }
    }
}

/// One comment as returned by a load.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRecord {
    /// Thread the comment belongs to.
    pub thread_id: u64,
    /// Sequence number within the thread.
    pub no: u64,
    /// Unified-protocol comment id.
    pub id: Option<String>,
    /// Playback position in centiseconds.
    pub vpos: i64,
    /// Posting time, unix seconds.
    pub date: i64,
    /// Commands (position, color, size, ...).
    pub commands: Vec<String>,
    /// Author id (hashed for anonymous comments).
    pub user_id: String,
    /// Comment text.
    pub content: String,
    /// Fork the comment was posted to.
    pub fork: Fork,
    /// Reaction count.
    pub nicoru_count: u32,
    /// Moderation score.
    pub score: i32,
    /// Whether the author is premium.
    pub is_premium: bool,
    /// Whether the comment was deleted.
    pub deleted: bool,
}

/// Comments and metadata from one load.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedThread {
    /// Normalized thread metadata.
    pub info: ThreadInfo,
    /// Comments across all loaded threads.
    pub chats: Vec<ChatRecord>,
}

/// A comment the server accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostedChat {
    /// Assigned sequence number.
    pub no: u64,
    /// Assigned id (unified protocol only).
    pub id: Option<String>,
}

/// A reaction the server accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reaction {
    /// Reaction id, when the server reports one.
    pub reaction_id: Option<String>,
    /// Updated reaction count of the comment.
    pub count: u32,
}

/// Numeric language code of the legacy protocol.
///
/// Accepts `-` or `_` separators in any case; unknown languages map to `0`
/// (Japanese).
pub fn legacy_language_code(language: &str) -> i64 {
    match language.replace('-', "_").to_lowercase().as_str() {
        "en_us" => 1,
        "zh_tw" => 2,
        _ => 0,
    }
}
