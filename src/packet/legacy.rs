//! Legacy multi-thread array packets.
//!
//! A legacy packet is a list of named objects (`thread`, `thread_leaves`,
//! `chat`, `nicoru`), encoded either as a JSON array of single-key objects or
//! as a `<packet>` XML document.

use serde_json::{json, Map, Value};

use super::{leaf_content, VERSION, VERSION_OLD};
use crate::error::{Error, Result};
use crate::model::{
    legacy_language_code, ChatRecord, LegacyMeta, MessageInfo, ThreadDescriptor, ThreadInfo,
    WireFormat,
};
use crate::xml;

/// `res_from` of fork and leaf-less thread requests.
pub const FORK_RES_FROM: i64 = -1000;

/// One named object of a legacy packet.
#[derive(Debug, Clone, PartialEq)]
pub struct LegacyEntry {
    /// Element / key name, e.g. `thread`.
    pub name: String,
    /// Fields; `content` becomes element text in XML.
    pub fields: Map<String, Value>,
}

impl LegacyEntry {
    /// An entry with no fields.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Map::new(),
        }
    }

    /// Set one field.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.fields.insert(key.to_string(), value.into());
    }

    /// Read one field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

/// An encoded-on-demand legacy packet.
#[derive(Debug, Clone, PartialEq)]
pub struct LegacyPacket {
    /// Output encoding.
    pub format: WireFormat,
    /// Entries in request order.
    pub entries: Vec<LegacyEntry>,
}

impl LegacyPacket {
    /// Serialize as JSON array or XML document.
    pub fn encode(&self) -> Result<String> {
        match self.format {
            WireFormat::Json => {
                let entries: Vec<Value> = self
                    .entries
                    .iter()
                    .map(|entry| {
                        let mut object = Map::new();
                        object.insert(entry.name.clone(), Value::Object(entry.fields.clone()));
                        Value::Object(object)
                    })
                    .collect();
                Ok(Value::Array(entries).to_string())
            }
            WireFormat::Xml => xml::encode_packet(
                self.entries
                    .iter()
                    .map(|entry| (entry.name.as_str(), &entry.fields)),
            ),
        }
    }

    /// Entries named `name`.
    pub fn entries_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a LegacyEntry> {
        self.entries.iter().filter(move |entry| entry.name == name)
    }
}

/// Build the load packet: one or two entries per active thread.
///
/// Main threads that want leaves get a current-version `thread` entry plus a
/// `thread_leaves` entry; forks and leaf-less threads get a single
/// old-version `thread` entry reading from `res_from = -1000`.
pub fn thread_packet(info: &MessageInfo, meta: &LegacyMeta) -> Result<LegacyPacket> {
    let leaves = leaf_content(info.duration);
    let mut entries = Vec::new();

    for thread in info.active_threads() {
        let base = base_fields(info, meta, thread)?;

        if thread.fork.is_fork() || !thread.is_leaf_required {
            let mut entry = LegacyEntry::new("thread");
            entry.fields = base;
            entry.set("version", VERSION_OLD);
            entry.set("with_global", 1);
            entry.set("res_from", FORK_RES_FROM);
            entries.push(entry);
        } else {
            let mut entry = LegacyEntry::new("thread");
            entry.fields = base.clone();
            entry.set("version", VERSION);
            entry.set("with_global", 1);
            entries.push(entry);

            let mut leaf = LegacyEntry::new("thread_leaves");
            leaf.fields = base;
            leaf.set(xml::CONTENT_KEY, leaves.as_str());
            entries.push(leaf);
        }
    }

    Ok(LegacyPacket {
        format: meta.format,
        entries,
    })
}

fn base_fields(
    info: &MessageInfo,
    meta: &LegacyMeta,
    thread: &ThreadDescriptor,
) -> Result<Map<String, Value>> {
    let mut fields = Map::new();
    fields.insert("thread".into(), json!(thread.id.to_string()));
    fields.insert("user_id".into(), json!(user_id(info.user_id)));
    fields.insert("language".into(), json!(legacy_language_code(&info.language)));
    fields.insert("nicoru".into(), json!(3));
    fields.insert("scores".into(), json!(1));

    if thread.is_threadkey_required {
        let key = info.thread_keys.get(&thread.id).ok_or_else(|| {
            Error::key_fetch(format!("thread key for thread {} is not resolved", thread.id))
        })?;
        fields.insert("threadkey".into(), json!(key.token));
        fields.insert("force_184".into(), json!(if key.force_184 { "1" } else { "0" }));
    }
    if let Some(when) = info.wayback() {
        fields.insert("when".into(), json!(when));
    }
    if thread.fork.is_fork() {
        fields.insert("fork".into(), json!(thread.fork.legacy_code()));
    }
    if let Some(res_from) = meta.res_from {
        fields.insert("res_from".into(), json!(res_from));
    }
    if !fields.contains_key("threadkey") {
        if let Some(user_key) = meta.user_key.as_deref().filter(|key| !key.is_empty()) {
            fields.insert("userkey".into(), json!(user_key));
        }
    }
    Ok(fields)
}

fn user_id(user_id: u64) -> String {
    if user_id == 0 {
        String::new()
    } else {
        user_id.to_string()
    }
}

/// Build a comment post packet.
pub fn chat_packet(
    info: &MessageInfo,
    meta: &LegacyMeta,
    thread: &ThreadInfo,
    text: &str,
    command: &str,
    vpos: i64,
    post_key: &str,
) -> LegacyPacket {
    let mut chat = LegacyEntry::new("chat");
    chat.set("thread", thread.thread_id.to_string());
    chat.set("vpos", vpos);
    chat.set("mail", command.trim());
    chat.set("ticket", thread.ticket().unwrap_or_default());
    chat.set("user_id", user_id(info.user_id));
    chat.set("postkey", post_key);
    chat.set("premium", u8::from(info.is_premium));
    chat.set(xml::CONTENT_KEY, text);

    LegacyPacket {
        format: meta.format,
        entries: vec![chat],
    }
}

/// Build a reaction packet for `target`.
pub fn nicoru_packet(
    info: &MessageInfo,
    meta: &LegacyMeta,
    thread_id: u64,
    target: &ChatRecord,
    nicoru_key: &str,
) -> LegacyPacket {
    let mut nicoru = LegacyEntry::new("nicoru");
    nicoru.set("thread", thread_id.to_string());
    nicoru.set("user_id", user_id(info.user_id));
    nicoru.set("premium", u8::from(info.is_premium));
    nicoru.set("fork", target.fork.legacy_code());
    nicoru.set("language", legacy_language_code(&info.language));
    nicoru.set("id", target.no.to_string());
    nicoru.set("postdate", target.date);
    nicoru.set("nicorukey", nicoru_key);

    LegacyPacket {
        format: meta.format,
        entries: vec![nicoru],
    }
}
