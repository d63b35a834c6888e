// debugwire protocol definitions and frame handling
//
// Frames are length-prefixed: a fixed binary header followed by a JSON body.

use crate::commands::Command;
use crate::events::EventFrame;
use crate::reader::{read_header, read_json};
use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

// All multi-byte header values are big-endian (network byte order)

pub type WireResult<T> = Result<T, WireError>;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Invalid handshake")]
    InvalidHandshake,

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Timed out after {elapsed:?} waiting for {operation}")]
    TimedOut { operation: String, elapsed: Duration },

    #[error("Duplicate entry: {0}")]
    DuplicateEntry(String),

    #[error("Unknown location: {0}")]
    UnknownLocation(String),

    #[error("Protocol mismatch: expected {expected}, got {actual}")]
    ProtocolMismatch { expected: String, actual: String },

    #[error("Command failed: {0}")]
    Command(String),
}

impl WireError {
    pub fn timed_out(operation: impl Into<String>, elapsed: Duration) -> Self {
        WireError::TimedOut {
            operation: operation.into(),
            elapsed,
        }
    }

    pub fn mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        WireError::ProtocolMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Transport-level errors end the session; nothing retries past them.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            WireError::Io(_) | WireError::ChannelClosed | WireError::InvalidHandshake
        )
    }
}

// Versioned handshake, exchanged by both sides before any frame
pub const HANDSHAKE: &[u8] = b"DEBUGWIRE-v1";

// Frame structure:
// length (4 bytes) - includes header
// id (4 bytes) - command id, id of the command a reply answers, or low bits of an event sequence id
// flags (1 byte) - 0x00 = command, 0x80 = reply, 0x40 = event
// body (variable) - JSON

pub const HEADER_SIZE: usize = 9;
pub const COMMAND_FLAG: u8 = 0x00;
pub const REPLY_FLAG: u8 = 0x80;
pub const EVENT_FLAG: u8 = 0x40;

/// Maximum allowed frame size (10MB)
pub const MAX_FRAME_SIZE: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFrame {
    pub id: u32,
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyStatus {
    Ack,
    Removed,
    Error,
}

impl fmt::Display for ReplyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplyStatus::Ack => write!(f, "ack"),
            ReplyStatus::Removed => write!(f, "removed"),
            ReplyStatus::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyFrame {
    pub correlates_to: u32,
    pub status: ReplyStatus,
    pub detail: String,
}

#[derive(Serialize, Deserialize)]
struct ReplyBody {
    status: ReplyStatus,
    detail: String,
}

impl ReplyFrame {
    pub fn ack(correlates_to: u32, detail: impl Into<String>) -> Self {
        Self {
            correlates_to,
            status: ReplyStatus::Ack,
            detail: detail.into(),
        }
    }

    pub fn removed(correlates_to: u32, detail: impl Into<String>) -> Self {
        Self {
            correlates_to,
            status: ReplyStatus::Removed,
            detail: detail.into(),
        }
    }

    pub fn error(correlates_to: u32, detail: impl Into<String>) -> Self {
        Self {
            correlates_to,
            status: ReplyStatus::Error,
            detail: detail.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.status == ReplyStatus::Error
    }

    pub fn check_error(&self) -> WireResult<()> {
        if self.is_error() {
            Err(WireError::Command(self.detail.clone()))
        } else {
            Ok(())
        }
    }
}

impl fmt::Display for ReplyFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} #{}] {}", self.status, self.correlates_to, self.detail)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Command(CommandFrame),
    Reply(ReplyFrame),
    Event(EventFrame),
}

impl Frame {
    pub fn id(&self) -> u32 {
        match self {
            Frame::Command(cmd) => cmd.id,
            Frame::Reply(reply) => reply.correlates_to,
            Frame::Event(event) => event.sequence_id as u32,
        }
    }

    fn flags(&self) -> u8 {
        match self {
            Frame::Command(_) => COMMAND_FLAG,
            Frame::Reply(_) => REPLY_FLAG,
            Frame::Event(_) => EVENT_FLAG,
        }
    }

    pub fn encode(&self) -> WireResult<Vec<u8>> {
        let body = match self {
            Frame::Command(cmd) => serde_json::to_vec(&cmd.command)?,
            Frame::Reply(reply) => serde_json::to_vec(&ReplyBody {
                status: reply.status,
                detail: reply.detail.clone(),
            })?,
            Frame::Event(event) => serde_json::to_vec(event)?,
        };

        let length = HEADER_SIZE + body.len();
        if length > MAX_FRAME_SIZE {
            return Err(WireError::Protocol(format!(
                "Frame too large: {} bytes (max: {} bytes)",
                length, MAX_FRAME_SIZE
            )));
        }

        let mut buf = BytesMut::with_capacity(length);
        buf.put_u32(length as u32);
        buf.put_u32(self.id());
        buf.put_u8(self.flags());
        buf.put_slice(&body);

        Ok(buf.to_vec())
    }

    pub fn decode(buf: &[u8]) -> WireResult<Self> {
        let mut buf = buf;
        let (length, id, flags) = read_header(&mut buf)?;

        if length != HEADER_SIZE + buf.len() {
            return Err(WireError::Protocol(format!(
                "Frame length mismatch: header says {}, got {}",
                length,
                HEADER_SIZE + buf.len()
            )));
        }

        match flags {
            COMMAND_FLAG => {
                let command = read_json(&mut buf)?;
                Ok(Frame::Command(CommandFrame { id, command }))
            }
            REPLY_FLAG => {
                let body: ReplyBody = read_json(&mut buf)?;
                Ok(Frame::Reply(ReplyFrame {
                    correlates_to: id,
                    status: body.status,
                    detail: body.detail,
                }))
            }
            EVENT_FLAG => {
                let event: EventFrame = read_json(&mut buf)?;
                if event.sequence_id as u32 != id {
                    return Err(WireError::Protocol(format!(
                        "Event header id {} does not match sequence id {}",
                        id, event.sequence_id
                    )));
                }
                Ok(Frame::Event(event))
            }
            other => Err(WireError::Protocol(format!("Invalid frame flag: {:#x}", other))),
        }
    }
}
