//! Wire format for the actuator link.
//!
//! Little-endian throughout:
//!
//! ```text
//! frame   := 0xFF 0x00 count:u8 message{count}
//! message := message_type:u8 var_type:u8 id:u8 size:u8 payload[size]
//! ```
//!
//! Outbound frames carry only int16 variables: `id 0x02 value_lo value_hi`.

use std::io;
use std::time::Duration;
use thiserror::Error;

pub const SYNC: [u8; 2] = [0xFF, 0x00];
/// Byte written repeatedly by the controller during the handshake.
pub const HANDSHAKE_PROBE: u8 = 0xFF;
/// Byte the actuator answers the probe with.
pub const HANDSHAKE_ACK: u8 = 0x0A;
pub const MESSAGE_HEADER_LEN: usize = 4;
pub const INT16_SIZE: u8 = 2;
const FLOAT32_SIZE: usize = 4;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("Desynchronised stream: expected ff 00, got {0:02x} {1:02x}")]
    Desync(u8, u8),
    #[error("Read timed out after {0:?}")]
    Timeout(Duration),
    #[error("Serial stream closed")]
    Closed,
    #[error("Unknown message type {0}")]
    UnknownMessageType(u8),
    #[error("Unknown variable type {0}")]
    UnknownVarType(u8),
    #[error("Byte payloads are not supported (variable id {0})")]
    UnsupportedByte(u8),
    #[error("{var_type:?} payload needs {expected} bytes, got {actual}")]
    ShortPayload {
        var_type: VarType,
        expected: usize,
        actual: usize,
    },
    #[error("Truncated frame")]
    Truncated,
    #[error("Serial I/O error: {0}")]
    Io(#[from] io::Error),
}

impl FrameError {
    /// Transient errors are logged and the read loop continues on the same
    /// connection; the others mean the connection is gone.
    pub fn is_transient(&self) -> bool {
        match self {
            FrameError::Closed => false,
            FrameError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
            ),
            _ => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Variable,
    Debug,
    Event,
}

impl TryFrom<u8> for MessageType {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MessageType::Variable),
            1 => Ok(MessageType::Debug),
            2 => Ok(MessageType::Event),
            other => Err(FrameError::UnknownMessageType(other)),
        }
    }
}

impl From<MessageType> for u8 {
    fn from(value: MessageType) -> Self {
        match value {
            MessageType::Variable => 0,
            MessageType::Debug => 1,
            MessageType::Event => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarType {
    Byte,
    Int16,
    Text,
    Float32,
}

impl TryFrom<u8> for VarType {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(VarType::Byte),
            1 => Ok(VarType::Int16),
            2 => Ok(VarType::Text),
            3 => Ok(VarType::Float32),
            other => Err(FrameError::UnknownVarType(other)),
        }
    }
}

impl From<VarType> for u8 {
    fn from(value: VarType) -> Self {
        match value {
            VarType::Byte => 0,
            VarType::Int16 => 1,
            VarType::Text => 2,
            VarType::Float32 => 3,
        }
    }
}

/// Decoded payload, keyed by the message's [`VarType`].
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Int16(i16),
    Float32(f32),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub message_type: MessageType,
    pub var_type: VarType,
    pub id: u8,
    pub size: u8,
    pub payload: Payload,
}

impl Message {
    pub fn as_int16(&self) -> Option<i16> {
        match self.payload {
            Payload::Int16(value) => Some(value),
            _ => None,
        }
    }
}

/// Messages of one frame, partitioned by type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    pub variables: Vec<Message>,
    pub debugs: Vec<Message>,
    pub events: Vec<Message>,
}

impl Frame {
    pub fn push(&mut self, message: Message) {
        match message.message_type {
            MessageType::Variable => self.variables.push(message),
            MessageType::Debug => self.debugs.push(message),
            MessageType::Event => self.events.push(message),
        }
    }

    pub fn variable(&self, id: u8) -> Option<&Message> {
        self.variables.iter().find(|m| m.id == id)
    }

    pub fn len(&self) -> usize {
        self.variables.len() + self.debugs.len() + self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Check the two sync bytes that open every frame.
pub fn check_sync(first: u8, second: u8) -> Result<(), FrameError> {
    if [first, second] == SYNC {
        Ok(())
    } else {
        Err(FrameError::Desync(first, second))
    }
}

/// Parsed 4-byte message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub message_type: MessageType,
    pub var_type: VarType,
    pub id: u8,
    pub size: u8,
}

pub fn parse_message_header(bytes: [u8; MESSAGE_HEADER_LEN]) -> Result<MessageHeader, FrameError> {
    Ok(MessageHeader {
        message_type: MessageType::try_from(bytes[0])?,
        var_type: VarType::try_from(bytes[1])?,
        id: bytes[2],
        size: bytes[3],
    })
}

pub fn decode_payload(header: &MessageHeader, data: &[u8]) -> Result<Payload, FrameError> {
    let need = |expected: usize| {
        if data.len() < expected {
            Err(FrameError::ShortPayload {
                var_type: header.var_type,
                expected,
                actual: data.len(),
            })
        } else {
            Ok(())
        }
    };
    match header.var_type {
        VarType::Int16 => {
            need(INT16_SIZE as usize)?;
            Ok(Payload::Int16(i16::from_le_bytes([data[0], data[1]])))
        }
        VarType::Float32 => {
            need(FLOAT32_SIZE)?;
            Ok(Payload::Float32(f32::from_le_bytes([data[0], data[1], data[2], data[3]])))
        }
        VarType::Text => {
            let text = String::from_utf8_lossy(data);
            Ok(Payload::Text(text.trim_end_matches('\0').to_string()))
        }
        VarType::Byte => Err(FrameError::UnsupportedByte(header.id)),
    }
}

/// Outbound accumulation buffer. Every flush clears it.
#[derive(Debug, Default)]
pub struct SendBuffer {
    data: Vec<u8>,
    count: u8,
}

impl SendBuffer {
    pub fn new() -> Self {
        Self {
            data: Vec::with_capacity(64),
            count: 0,
        }
    }

    pub fn push_int16(&mut self, id: u8, value: i16) {
        if self.count == u8::MAX {
            tracing::warn!("Send buffer full, dropping variable {}", id);
            return;
        }
        self.data.push(id);
        self.data.push(INT16_SIZE);
        self.data.extend_from_slice(&value.to_le_bytes());
        self.count += 1;
    }

    pub fn len(&self) -> usize {
        self.count as usize
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Take the encoded frame and reset the buffer. `None` when nothing is pending.
    pub fn take_frame(&mut self) -> Option<Vec<u8>> {
        if self.count == 0 {
            return None;
        }
        let mut frame = Vec::with_capacity(3 + self.data.len());
        frame.extend_from_slice(&SYNC);
        frame.push(self.count);
        frame.append(&mut self.data);
        self.count = 0;
        Some(frame)
    }
}
