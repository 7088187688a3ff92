//! Per-thread authorization keys.
//!
//! [`KeyStore`] caches thread keys for the lifetime of a client and hands out
//! fresh post and reaction keys on every request; the server treats those as
//! single-use. The store never retries: a failed fetch is reported as
//! [`ErrorKind::KeyFetchFailed`] and the calling session decides what to do.

mod fetch;

pub use fetch::{fetch_key, KeyRequest};

use std::collections::HashMap;
use std::fmt;
use std::future::Future;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Cause, Error, ErrorKind, Result};

/// Which token a key authorizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyKind {
    /// Reading a thread.
    Thread,
    /// Posting one comment.
    Post,
    /// Submitting one reaction.
    Reaction,
}

impl KeyKind {
    /// Only thread keys survive between requests.
    pub fn is_cached(self) -> bool {
        self == KeyKind::Thread
    }
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            KeyKind::Thread => "thread",
            KeyKind::Post => "post",
            KeyKind::Reaction => "reaction",
        })
    }
}

/// A token issued for one thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyRecord {
    /// Thread the token is scoped to.
    pub thread_id: u64,
    /// What the token authorizes.
    pub kind: KeyKind,
    /// Opaque token.
    pub token: String,
    /// Legacy thread keys also say whether posts are forced anonymous.
    #[serde(default)]
    pub force_184: bool,
}

impl KeyRecord {
    /// A record without the `force_184` flag.
    pub fn new(thread_id: u64, kind: KeyKind, token: impl Into<String>) -> Self {
        Self {
            thread_id,
            kind,
            token: token.into(),
            force_184: false,
        }
    }
}

/// Cache of thread keys, scoped to one client.
#[derive(Debug, Default)]
pub struct KeyStore {
    records: HashMap<(u64, KeyKind), KeyRecord>,
}

impl KeyStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached key for `(thread_id, kind)` or run `fetcher` to get
    /// one. Post and reaction keys always run `fetcher` and are never stored.
    pub async fn get_or_fetch<F, Fut>(
        &mut self,
        thread_id: u64,
        kind: KeyKind,
        fetcher: F,
    ) -> Result<KeyRecord>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<KeyRecord>>,
    {
        if kind.is_cached() {
            if let Some(record) = self.records.get(&(thread_id, kind)) {
                debug!(thread_id, %kind, "using cached key");
                return Ok(record.clone());
            }
        }

        debug!(thread_id, %kind, "fetching key");
        let record = fetcher()
            .await
            .map_err(|err| fetch_failed(thread_id, kind, err))?;

        if record.thread_id != thread_id || record.kind != kind {
            return Err(Error::key_fetch(format!(
                "fetched a {} key for thread {} while asking for a {kind} key for thread {thread_id}",
                record.kind, record.thread_id
            )));
        }

        if kind.is_cached() {
            self.records.insert((thread_id, kind), record.clone());
        }
        Ok(record)
    }

    /// Drop a cached key so the next [`KeyStore::get_or_fetch`] fetches it again.
    pub fn invalidate(&mut self, thread_id: u64, kind: KeyKind) -> Option<KeyRecord> {
        let removed = self.records.remove(&(thread_id, kind));
        if removed.is_some() {
            debug!(thread_id, %kind, "invalidated key");
        }
        removed
    }

    /// Peek at a cached key.
    pub fn get(&self, thread_id: u64, kind: KeyKind) -> Option<&KeyRecord> {
        self.records.get(&(thread_id, kind))
    }

    /// Number of cached keys.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn fetch_failed(thread_id: u64, kind: KeyKind, err: Error) -> Error {
    if err.kind() == ErrorKind::KeyFetchFailed {
        return err;
    }
    let mut wrapped = Error::key_fetch(format!(
        "could not obtain {kind} key for thread {thread_id}"
    ));
    if let Some(code) = err.code() {
        wrapped = wrapped.with_code(code.clone());
    }
    wrapped.with_cause(Cause::Inner(Box::new(err)))
}
