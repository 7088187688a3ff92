//! Request payload construction.
//!
//! Building a packet is pure: it reads a [`MessageInfo`] (with its thread
//! keys already resolved) and produces the wire payload. Which builder runs is
//! decided once by the shape of [`MessageInfo::protocol`].

pub mod legacy;
pub mod unified;

pub use legacy::{LegacyEntry, LegacyPacket};
pub use unified::UnifiedPacket;

use crate::error::{Error, Result};
use crate::model::{MessageInfo, ProtocolMeta};

/// Version marker of main-thread requests.
pub const VERSION: &str = "20090904";

/// Version marker of fork and leaf-less requests.
pub const VERSION_OLD: &str = "20061206";

/// Content type of every packet body.
pub const CONTENT_TYPE: &str = "text/plain; charset=UTF-8";

/// Number of comments to request for a video of `duration` seconds.
pub fn request_count(duration: u32) -> u32 {
    match duration {
        0..=59 => 100,
        60..=239 => 200,
        240..=299 => 400,
        _ => 1000,
    }
}

/// Leaf sub-request content for a video of `duration` seconds: one leaf per
/// started minute, plus the overall count and the reaction ranking.
///
/// ```
/// assert_eq!(nico_thread::packet::leaf_content(50), "0-1:100,100,nicoru:100");
/// assert_eq!(nico_thread::packet::leaf_content(600), "0-11:100,1000,nicoru:100");
/// ```
pub fn leaf_content(duration: u32) -> String {
    let minutes = duration / 60 + 1;
    format!("0-{minutes}:100,{},nicoru:100", request_count(duration))
}

/// A thread-load payload in either wire variant.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// Legacy multi-thread array.
    Legacy(LegacyPacket),
    /// Unified single object.
    Unified(UnifiedPacket),
}

impl Packet {
    /// Serialize the packet body.
    pub fn encode(&self) -> Result<String> {
        match self {
            Packet::Legacy(packet) => packet.encode(),
            Packet::Unified(packet) => serde_json::to_string(packet)
                .map_err(|err| Error::protocol(format!("could not encode packet: {err}"))),
        }
    }
}

/// Build the thread-load packet for `info`.
pub fn build_thread_packet(info: &MessageInfo) -> Result<Packet> {
    match &info.protocol {
        ProtocolMeta::Legacy(meta) => legacy::thread_packet(info, meta).map(Packet::Legacy),
        ProtocolMeta::Unified(meta) => Ok(Packet::Unified(unified::thread_packet(info, meta))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_count_thresholds() {
        assert_eq!(request_count(0), 100);
        assert_eq!(request_count(59), 100);
        assert_eq!(request_count(60), 200);
        assert_eq!(request_count(239), 200);
        assert_eq!(request_count(240), 400);
        assert_eq!(request_count(299), 400);
        assert_eq!(request_count(300), 1000);
        assert_eq!(request_count(7200), 1000);
    }

    #[test]
    fn test_leaf_content() {
        assert_eq!(leaf_content(50), "0-1:100,100,nicoru:100");
        assert_eq!(leaf_content(60), "0-2:100,200,nicoru:100");
        assert_eq!(leaf_content(250), "0-5:100,400,nicoru:100");
    }
}
