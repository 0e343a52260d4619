//! Frame-level reads and writes over a [`SerialTransport`], plus the
//! connection handshake.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, timeout};

use super::codec::{
    check_sync, decode_payload, parse_message_header, Frame, FrameError, Message,
    HANDSHAKE_ACK, HANDSHAKE_PROBE, MESSAGE_HEADER_LEN,
};
use super::transport::SerialTransport;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("Port enumeration failed: {0}")]
    Enumerate(#[source] std::io::Error),
    #[error("No serial ports found")]
    NoPorts,
    #[error("Failed to open {port}: {source}")]
    Open {
        port: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Handshake I/O error: {0}")]
    HandshakeIo(#[from] std::io::Error),
    #[error("No handshake reply after {0} attempts")]
    HandshakeExhausted(u32),
}

/// Handshake retry policy.
#[derive(Debug, Clone, Copy)]
pub struct HandshakePolicy {
    pub attempts: u32,
    pub spacing: Duration,
    pub reply_timeout: Duration,
}

/// Probe the actuator with `0xFF` until it answers `0x0A`.
///
/// An unanswered or wrong reply counts as a failed attempt; a write error or
/// end of stream aborts immediately.
pub async fn handshake(transport: &dyn SerialTransport, policy: HandshakePolicy) -> Result<(), LinkError> {
    let mut reply = [0u8; 1];
    for attempt in 1..=policy.attempts {
        tracing::debug!("Handshake attempt {}/{}", attempt, policy.attempts);
        transport.write_all(&[HANDSHAKE_PROBE]).await?;
        match timeout(policy.reply_timeout, transport.read(&mut reply)).await {
            Ok(Ok(0)) => {
                return Err(LinkError::HandshakeIo(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "no reply from serial port",
                )));
            }
            Ok(Ok(_)) if reply[0] == HANDSHAKE_ACK => return Ok(()),
            Ok(Ok(_)) => tracing::trace!("Unexpected handshake reply {:#04x}", reply[0]),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::TimedOut => {}
            Ok(Err(e)) => return Err(LinkError::HandshakeIo(e)),
            Err(_) => tracing::trace!("Handshake reply timed out"),
        }
        if attempt < policy.attempts {
            sleep(policy.spacing).await;
        }
    }
    Err(LinkError::HandshakeExhausted(policy.attempts))
}

/// Reader/writer for framed messages on an established connection.
#[derive(Clone)]
pub struct Protocol {
    transport: Arc<dyn SerialTransport>,
    read_timeout: Duration,
}

impl Protocol {
    pub fn new(transport: Arc<dyn SerialTransport>, read_timeout: Duration) -> Self {
        Self { transport, read_timeout }
    }

    async fn read_exact(&self, buf: &mut [u8]) -> Result<(), FrameError> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = timeout(self.read_timeout, self.transport.read(&mut buf[filled..]))
                .await
                .map_err(|_| FrameError::Timeout(self.read_timeout))??;
            if n == 0 {
                return Err(FrameError::Closed);
            }
            filled += n;
        }
        Ok(())
    }

    async fn read_byte(&self) -> Result<u8, FrameError> {
        let mut byte = [0u8; 1];
        self.read_exact(&mut byte).await?;
        Ok(byte[0])
    }

    /// Read the frame header and return the message count. The count byte is
    /// only consumed once the sync bytes have matched.
    pub async fn read_header(&self) -> Result<u8, FrameError> {
        let first = self.read_byte().await?;
        let second = self.read_byte().await?;
        check_sync(first, second)?;
        self.read_byte().await
    }

    pub async fn read_message(&self) -> Result<Message, FrameError> {
        let mut raw = [0u8; MESSAGE_HEADER_LEN];
        self.read_exact(&mut raw).await?;
        let header = parse_message_header(raw)?;
        let mut data = vec![0u8; header.size as usize];
        self.read_exact(&mut data).await?;
        Ok(Message {
            message_type: header.message_type,
            var_type: header.var_type,
            id: header.id,
            size: header.size,
            payload: decode_payload(&header, &data)?,
        })
    }

    /// Read one full frame. A fresh [`Frame`] is built every call.
    pub async fn read_frame(&self) -> Result<Frame, FrameError> {
        let count = self.read_header().await?;
        let mut frame = Frame::default();
        for _ in 0..count {
            frame.push(self.read_message().await?);
        }
        Ok(frame)
    }

    pub async fn write_frame(&self, frame: &[u8]) -> Result<(), FrameError> {
        self.transport.write_all(frame).await?;
        Ok(())
    }
}
