//! # nico-thread
//!
//! An async client for niconico comment threads: load comments, post new ones
//! and react to existing ones over either wire protocol.
//!
//! Two protocols are spoken:
//! - **Legacy**: packets are arrays of named objects (`thread`,
//!   `thread_leaves`, `chat`, `nicoru`) sent as JSON or XML to a message
//!   server, one or two objects per thread.
//! - **Unified**: a single JSON object posted to `/v1/threads`, with
//!   `{meta, data}` responses.
//!
//! Which one a call uses is decided by the shape of
//! [`MessageInfo::protocol`].
//!
//! ## Design
//!
//! Payload construction ([`packet`]) and response normalization
//! ([`response`]) are pure. All I/O goes through the [`Transport`] trait, so
//! the same client runs over reqwest (feature `reqwest-transport`) or over
//! the scripted [`mock::MockTransport`] in tests. Each operation is a small
//! state machine in [`session`] with at most one retry.
//!
//! ## Examples
//!
//! ```rust
//! use nico_thread::packet::{build_thread_packet, leaf_content};
//! use nico_thread::MessageInfo;
//!
//! let info: MessageInfo = serde_json::from_value(serde_json::json!({
//!     "videoId": "sm9",
//!     "duration": 50,
//!     "threads": [{"id": 1}],
//!     "protocol": {"variant": "legacy", "server": "https://nmsg.example/api.json/"}
//! }))
//! .unwrap();
//!
//! let body = build_thread_packet(&info).unwrap().encode().unwrap();
//! assert!(body.contains(&leaf_content(50)));
//! ```
//!
//! ### Over HTTP
//!
//! ```rust,no_run
//! # #[cfg(feature = "reqwest-transport")]
//! # {
//! use nico_thread::{ClientConfig, MessageInfo, ThreadClient};
//!
//! # async fn run(mut info: MessageInfo) -> nico_thread::Result<()> {
//! let mut client = ThreadClient::connect(ClientConfig::default())?;
//! let thread = client.load(&mut info).await?;
//! println!("{} comments", thread.total_res_count);
//! # Ok(())
//! # }
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod client;
pub mod config;
pub mod error;
pub mod keys;
pub mod model;
pub mod packet;
pub mod response;
pub mod session;
pub mod transport;
pub mod xml;

// Scripted transport for testing
pub mod mock;

pub use client::ThreadClient;
pub use config::ClientConfig;
pub use error::{Error, ErrorCode, ErrorKind, Result};
pub use keys::{KeyKind, KeyRecord, KeyStore};
pub use model::{
    ChatRecord, Fork, LegacyMeta, LoadedThread, MessageInfo, PostedChat, ProtocolMeta, Reaction,
    ThreadDescriptor, ThreadInfo, ThreadSession, UnifiedMeta, WireFormat, WireVariant,
};
pub use session::Notice;
pub use transport::{RawResponse, Request, Transport};
