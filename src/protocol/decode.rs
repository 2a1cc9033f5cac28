// src/protocol/decode.rs

//! Typed decoders for the control-plane replies this client parses: role
//! reports, master address pairs, sentinel peer records, and pub/sub pushes.
//!
//! Decoding happens at the boundary; malformed input produces a decode error
//! instead of a runtime type panic.

use super::RespFrame;
use crate::errors::SentinelPoolError;
use std::net::Ipv4Addr;

// Positional fields within a sentinel peer record.
const PEER_HOST_INDEX: usize = 3;
const PEER_PORT_INDEX: usize = 5;

/// Extracts the textual content of a string-like frame.
pub fn frame_to_string(frame: &RespFrame) -> Result<String, SentinelPoolError> {
    match frame {
        RespFrame::SimpleString(s) => Ok(s.clone()),
        RespFrame::BulkString(b) => Ok(String::from_utf8_lossy(b).into_owned()),
        RespFrame::Integer(i) => Ok(i.to_string()),
        other => Err(SentinelPoolError::UnexpectedReply(format!(
            "expected a string frame, got {other:?}"
        ))),
    }
}

/// Decodes a `ROLE` reply; the first element is the role string.
pub fn role_name(reply: &RespFrame) -> Result<String, SentinelPoolError> {
    let RespFrame::Array(items) = reply else {
        return Err(SentinelPoolError::UnexpectedReply(format!(
            "ROLE reply is not a sequence: {reply:?}"
        )));
    };
    let first = items.first().ok_or_else(|| {
        SentinelPoolError::UnexpectedReply("ROLE reply is an empty sequence".to_string())
    })?;
    frame_to_string(first)
}

/// The two-element host/port pair returned by `SENTINEL get-master-addr-by-name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasterAddr {
    pub host: String,
    pub port: String,
}

impl MasterAddr {
    pub fn decode(reply: &RespFrame) -> Result<Self, SentinelPoolError> {
        let RespFrame::Array(items) = reply else {
            return Err(SentinelPoolError::UnexpectedReply(format!(
                "master address reply is not a sequence: {reply:?}"
            )));
        };
        let [host, port, ..] = items.as_slice() else {
            return Err(SentinelPoolError::UnexpectedReply(
                "master address reply has fewer than two elements".to_string(),
            ));
        };
        Ok(Self {
            host: frame_to_string(host)?,
            port: frame_to_string(port)?,
        })
    }

    /// Renders `host:port`. A host that is not a valid IPv4 literal is
    /// wrapped in brackets so the port suffix stays unambiguous.
    pub fn to_authority(&self) -> String {
        if self.host.parse::<Ipv4Addr>().is_ok() {
            format!("{}:{}", self.host, self.port)
        } else {
            format!("[{}]:{}", self.host, self.port)
        }
    }
}

/// Decodes a `SENTINEL sentinels <name>` reply into peer addresses.
///
/// Each record is a flat field sequence; host and port sit at fixed offsets
/// within it.
pub fn peer_addresses(reply: &RespFrame) -> Result<Vec<String>, SentinelPoolError> {
    let RespFrame::Array(records) = reply else {
        return Err(SentinelPoolError::UnexpectedReply(format!(
            "sentinel peer list is not a sequence: {reply:?}"
        )));
    };
    records
        .iter()
        .map(|record| {
            let RespFrame::Array(fields) = record else {
                return Err(SentinelPoolError::UnexpectedReply(format!(
                    "sentinel peer record is not a sequence: {record:?}"
                )));
            };
            let field = |index: usize| {
                fields.get(index).ok_or_else(|| {
                    SentinelPoolError::UnexpectedReply(format!(
                        "sentinel peer record is missing field {index}"
                    ))
                })
            };
            let host = frame_to_string(field(PEER_HOST_INDEX)?)?;
            let port = frame_to_string(field(PEER_PORT_INDEX)?)?;
            Ok(format!("{host}:{port}"))
        })
        .collect()
}

/// A pub/sub push delivery: `["message", channel, payload]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushMessage {
    pub channel: String,
    pub payload: String,
}

impl PushMessage {
    /// Interprets a frame as a push delivery. Frames that are not message
    /// pushes (subscription confirmations, stray replies) yield `None`.
    pub fn decode(frame: &RespFrame) -> Option<Self> {
        let RespFrame::Array(items) = frame else {
            return None;
        };
        let [kind, channel, payload] = items.as_slice() else {
            return None;
        };
        if !frame_to_string(kind).ok()?.eq_ignore_ascii_case("message") {
            return None;
        }
        Some(Self {
            channel: frame_to_string(channel).ok()?,
            payload: frame_to_string(payload).ok()?,
        })
    }
}
