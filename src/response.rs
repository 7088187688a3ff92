//! Normalization of decoded server responses.
//!
//! Legacy responses arrive as arrays of single-key objects; field values are
//! numbers in JSON and strings in XML, so every numeric read here accepts
//! both. Unified responses are the `data` member of a `{meta, data}` body.

use std::collections::HashSet;

use chrono::DateTime;
use serde_json::{Map, Value};

use crate::error::{Error, ErrorCode, Result};
use crate::model::{
    ChatRecord, Fork, LoadedThread, MessageInfo, PostedChat, Reaction, ThreadDescriptor,
    ThreadInfo, ThreadSession,
};
use crate::packet::unified::split_commands;

/// Reaction status: accepted.
pub const NICORU_OK: i64 = 0;

/// Reaction status: the viewer already reacted to this comment.
pub const NICORU_ALREADY: i64 = 4;

/// Unified error code for a repeated reaction.
pub const ALREADY_NICORUED: &str = "ALREADY_NICORUED";

fn int(fields: &Map<String, Value>, key: &str) -> Option<i64> {
    match fields.get(key)? {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|value| value as i64)),
        Value::String(text) => text.trim().parse().ok(),
        Value::Bool(flag) => Some(i64::from(*flag)),
        _ => None,
    }
}

fn text(fields: &Map<String, Value>, key: &str) -> Option<String> {
    match fields.get(key)? {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn flag(fields: &Map<String, Value>, key: &str) -> bool {
    match fields.get(key) {
        Some(Value::Bool(flag)) => *flag,
        _ => int(fields, key).is_some_and(|value| value != 0),
    }
}

/// Iterate the `(name, fields)` pairs of a legacy response array.
fn legacy_entries(body: &Value) -> Result<impl Iterator<Item = (&str, &Map<String, Value>)>> {
    let entries = body
        .as_array()
        .ok_or_else(|| Error::protocol("legacy response is not an array").with_response(body.clone()))?;
    Ok(entries.iter().filter_map(|entry| {
        let (name, fields) = entry.as_object()?.iter().next()?;
        Some((name.as_str(), fields.as_object()?))
    }))
}

/// Normalize a legacy load response.
///
/// The response count is the sum of `last_res` over main-stream `thread`
/// records, each thread counted once. The record of `requested` supplies the
/// ticket; a non-zero `resultcode` on it fails the load.
pub fn legacy_thread(
    body: &Value,
    msg: &MessageInfo,
    requested: &ThreadDescriptor,
) -> Result<LoadedThread> {
    let mut total = 0u64;
    let mut counted = HashSet::new();
    let mut session = None;
    let mut chats = Vec::new();

    for (name, fields) in legacy_entries(body)? {
        match name {
            "thread" => {
                let thread_id = int(fields, "thread").unwrap_or_default() as u64;
                let fork = Fork::from_legacy_code(int(fields, "fork").unwrap_or_default());

                if !fork.is_fork() && counted.insert(thread_id) {
                    total += int(fields, "last_res").unwrap_or_default().max(0) as u64;
                }

                if thread_id == requested.id && fork == requested.fork && session.is_none() {
                    let resultcode = int(fields, "resultcode").unwrap_or_default();
                    if resultcode != 0 {
                        return Err(Error::protocol(format!(
                            "thread {thread_id} answered resultcode {resultcode}"
                        ))
                        .with_code(ErrorCode::Status(resultcode))
                        .with_response(body.clone()));
                    }
                    session = Some(ThreadSession::Legacy {
                        ticket: text(fields, "ticket").unwrap_or_default(),
                        server_time: int(fields, "server_time"),
                        revision: int(fields, "revision"),
                    });
                }
            }
            "chat" => chats.push(legacy_chat(fields)),
            _ => {}
        }
    }

    let session = session.ok_or_else(|| {
        Error::protocol(format!("response carries no record for thread {}", requested.id))
            .with_response(body.clone())
    })?;

    let forced_by_key = msg
        .thread_keys
        .get(&requested.id)
        .is_some_and(|key| key.force_184);

    Ok(LoadedThread {
        info: ThreadInfo {
            thread_id: requested.id,
            video_id: msg.video_id.clone(),
            user_id: msg.user_id,
            total_res_count: total,
            is_184_forced: msg.is_184_forced || forced_by_key,
            language: msg.language.clone(),
            when: msg.wayback(),
            is_wayback: msg.wayback().is_some(),
            session,
        },
        chats,
    })
}

fn legacy_chat(fields: &Map<String, Value>) -> ChatRecord {
    ChatRecord {
        thread_id: int(fields, "thread").unwrap_or_default() as u64,
        no: int(fields, "no").unwrap_or_default() as u64,
        id: None,
        vpos: int(fields, "vpos").unwrap_or_default(),
        date: int(fields, "date").unwrap_or_default(),
        commands: text(fields, "mail")
            .map(|mail| split_commands(&mail))
            .unwrap_or_default(),
        user_id: text(fields, "user_id").unwrap_or_default(),
        content: text(fields, "content").unwrap_or_default(),
        fork: Fork::from_legacy_code(int(fields, "fork").unwrap_or_default()),
        nicoru_count: int(fields, "nicoru").unwrap_or_default().max(0) as u32,
        score: int(fields, "score").unwrap_or_default() as i32,
        is_premium: flag(fields, "premium"),
        deleted: flag(fields, "deleted"),
    }
}

/// Normalize a unified load response.
///
/// The response count is the global count minus the easy-comment count,
/// matching what the legacy protocol reports.
pub fn unified_thread(data: &Value, msg: &MessageInfo) -> Result<LoadedThread> {
    let global = data
        .get("globalComments")
        .and_then(|global| global.get(0))
        .and_then(Value::as_object)
        .and_then(|global| int(global, "count"))
        .ok_or_else(|| {
            Error::protocol("response carries no global comment count").with_response(data.clone())
        })?;

    let threads = data
        .get("threads")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let mut total = global;
    let mut thread_id = None;
    let mut chats = Vec::new();

    for thread in threads.iter().filter_map(Value::as_object) {
        let id = int(thread, "id").unwrap_or_default() as u64;
        let fork = thread
            .get("fork")
            .and_then(Value::as_str)
            .and_then(Fork::from_label)
            .unwrap_or_default();

        match fork {
            Fork::Easy => total -= int(thread, "commentCount").unwrap_or_default(),
            Fork::Main => {
                thread_id.get_or_insert(id);
            }
            Fork::Owner => {}
        }

        let comments = thread
            .get("comments")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        chats.extend(
            comments
                .iter()
                .filter_map(Value::as_object)
                .map(|comment| unified_chat(comment, id, fork)),
        );
    }

    let thread_id = thread_id
        .or_else(|| msg.default_thread().map(|thread| thread.id))
        .ok_or_else(|| Error::protocol("response carries no thread").with_response(data.clone()))?;

    Ok(LoadedThread {
        info: ThreadInfo {
            thread_id,
            video_id: msg.video_id.clone(),
            user_id: msg.user_id,
            total_res_count: total.max(0) as u64,
            is_184_forced: msg.is_184_forced,
            language: msg.language.clone(),
            when: msg.wayback(),
            is_wayback: msg.wayback().is_some(),
            session: ThreadSession::Unified,
        },
        chats,
    })
}

fn unified_chat(comment: &Map<String, Value>, thread_id: u64, fork: Fork) -> ChatRecord {
    let date = comment
        .get("postedAt")
        .and_then(Value::as_str)
        .and_then(|posted| DateTime::parse_from_rfc3339(posted).ok())
        .map(|posted| posted.timestamp())
        .unwrap_or_default();
    let commands = comment
        .get("commands")
        .and_then(Value::as_array)
        .map(|commands| {
            commands
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    ChatRecord {
        thread_id,
        no: int(comment, "no").unwrap_or_default() as u64,
        id: text(comment, "id"),
        vpos: int(comment, "vposMs").unwrap_or_default() / 10,
        date,
        commands,
        user_id: text(comment, "userId").unwrap_or_default(),
        content: text(comment, "body").unwrap_or_default(),
        fork,
        nicoru_count: int(comment, "nicoruCount").unwrap_or_default().max(0) as u32,
        score: int(comment, "score").unwrap_or_default() as i32,
        is_premium: flag(comment, "isPremium"),
        deleted: false,
    }
}

/// Read the `chat_result` of a legacy post. Status `0` is success; anything
/// else is a protocol failure carrying the status as code.
pub fn legacy_chat_result(body: &Value) -> Result<PostedChat> {
    let fields = legacy_entries(body)?
        .find(|(name, _)| *name == "chat_result")
        .map(|(_, fields)| fields)
        .ok_or_else(|| Error::protocol("response carries no chat_result").with_response(body.clone()))?;

    match int(fields, "status") {
        Some(0) => Ok(PostedChat {
            no: int(fields, "no").unwrap_or_default() as u64,
            id: None,
        }),
        Some(status) => Err(Error::protocol(format!("post rejected with status {status}"))
            .with_code(ErrorCode::Status(status))
            .with_response(body.clone())),
        None => Err(Error::protocol("chat_result carries no status").with_response(body.clone())),
    }
}

/// Read a unified post result.
pub fn unified_chat_result(data: &Value) -> Result<PostedChat> {
    let fields = data
        .as_object()
        .ok_or_else(|| Error::protocol("post response carries no data").with_response(data.clone()))?;
    let no = int(fields, "no")
        .ok_or_else(|| Error::protocol("post response carries no number").with_response(data.clone()))?;
    Ok(PostedChat {
        no: no as u64,
        id: text(fields, "id"),
    })
}

/// Read the status of a legacy reaction response alongside what it reports.
pub fn legacy_nicoru_result(body: &Value) -> Result<(i64, Reaction)> {
    let fields = legacy_entries(body)?
        .find(|(name, _)| *name == "nicoru_result")
        .map(|(_, fields)| fields)
        .ok_or_else(|| Error::protocol("response carries no nicoru_result").with_response(body.clone()))?;

    let status = int(fields, "status")
        .ok_or_else(|| Error::protocol("nicoru_result carries no status").with_response(body.clone()))?;
    Ok((
        status,
        Reaction {
            reaction_id: text(fields, "nicoru_id"),
            count: int(fields, "nicoru_count").unwrap_or_default().max(0) as u32,
        },
    ))
}

/// Read a successful unified reaction response.
pub fn unified_nicoru(data: &Value) -> Reaction {
    let empty = Map::new();
    let fields = data.as_object().unwrap_or(&empty);
    Reaction {
        reaction_id: text(fields, "nicoruId"),
        count: int(fields, "nicoruCount").unwrap_or_default().max(0) as u32,
    }
}
