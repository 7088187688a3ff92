//! The caller-facing comment thread client.
//!
//! [`ThreadClient`] owns a [`Transport`], the [`ClientConfig`], the key store
//! and an optional notice handler. Every call runs one session from
//! [`crate::session`] against a caller-owned [`MessageInfo`].
//!
//! # Examples
//!
//! ```rust,no_run
//! # #[cfg(feature = "reqwest-transport")]
//! # {
//! use std::time::Duration;
//! use nico_thread::{ClientConfig, MessageInfo, ThreadClient};
//!
//! # async fn run(mut info: MessageInfo) -> nico_thread::Result<()> {
//! let mut client = ThreadClient::connect(ClientConfig::default())?;
//! client.on_notice(|notice| eprintln!("{notice}"));
//!
//! let loaded = client.load_comments(&mut info).await?;
//! println!("{} comments", loaded.info.total_res_count);
//!
//! let posted = client.post_chat(&mut info, "hello", "184", Duration::from_secs(12)).await?;
//! println!("posted as #{}", posted.no);
//! # Ok(())
//! # }
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use crate::config::ClientConfig;
use crate::error::Result;
use crate::keys::KeyStore;
use crate::model::{ChatRecord, LoadedThread, MessageInfo, PostedChat, Reaction, ThreadInfo};
use crate::session::{
    ChatPostSession, Notice, NoticeHandler, ReactionSession, SessionContext, ThreadLoadSession,
};
use crate::transport::{Transport, TransportClient};

/// Comment thread client, generic over its transport.
///
/// Methods take `&mut self`: a client runs one operation at a time. Thread
/// keys cached by one call are reused by the next.
pub struct ThreadClient<T> {
    http: TransportClient<T>,
    keys: KeyStore,
    config: ClientConfig,
    notice: Option<NoticeHandler>,
}

impl<T: Transport> ThreadClient<T> {
    /// A client with the default configuration.
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, ClientConfig::default())
    }

    /// A client with an explicit configuration.
    pub fn with_config(transport: T, config: ClientConfig) -> Self {
        Self {
            http: TransportClient::new(transport),
            keys: KeyStore::new(),
            config,
            notice: None,
        }
    }

    /// Receive [`Notice`]s, e.g. to tell the user a load is being retried.
    pub fn on_notice<F>(&mut self, handler: F)
    where
        F: Fn(&Notice) + Send + Sync + 'static,
    {
        self.notice = Some(Arc::new(handler));
    }

    /// The configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The key store.
    pub fn keys(&self) -> &KeyStore {
        &self.keys
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        self.http.transport()
    }

    /// Load the threads of `info` and return the normalized thread metadata.
    pub async fn load(&mut self, info: &mut MessageInfo) -> Result<ThreadInfo> {
        self.load_comments(info).await.map(|loaded| loaded.info)
    }

    /// Load the threads of `info`, returning comments alongside the metadata.
    pub async fn load_comments(&mut self, info: &mut MessageInfo) -> Result<LoadedThread> {
        let ctx = SessionContext::new(&self.http, &self.config, self.notice.as_ref());
        ThreadLoadSession::new(ctx, &mut self.keys).run(info).await
    }

    /// Post a comment to the loaded thread at playback `offset`.
    pub async fn post_chat(
        &mut self,
        info: &mut MessageInfo,
        text: &str,
        command: &str,
        offset: Duration,
    ) -> Result<PostedChat> {
        let ctx = SessionContext::new(&self.http, &self.config, self.notice.as_ref());
        ChatPostSession::new(ctx, &mut self.keys)
            .run(info, text, command, offset)
            .await
    }

    /// React to a loaded comment.
    pub async fn react(&mut self, info: &MessageInfo, chat: &ChatRecord) -> Result<Reaction> {
        let ctx = SessionContext::new(&self.http, &self.config, self.notice.as_ref());
        ReactionSession::new(ctx, &mut self.keys).run(info, chat).await
    }
}

#[cfg(feature = "reqwest-transport")]
#[cfg_attr(docsrs, doc(cfg(feature = "reqwest-transport")))]
impl ThreadClient<crate::transport::ReqwestTransport> {
    /// A client speaking HTTP through reqwest.
    pub fn connect(config: ClientConfig) -> Result<Self> {
        let transport = crate::transport::ReqwestTransport::new()?;
        Ok(Self::with_config(transport, config))
    }
}

impl<T> std::fmt::Debug for ThreadClient<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadClient")
            .field("config", &self.config)
            .field("cached_keys", &self.keys.len())
            .field("has_notice_handler", &self.notice.is_some())
            .finish()
    }
}
