// Event channel
//
// A duplex, ordered frame stream between exactly two endpoints. Reads and
// writes use separate halves so a reader task and writers never contend.
// The read half buffers partial frames, so a receive that times out midway
// picks up where it left off.

use crate::protocol::{Frame, WireError, WireResult, HANDSHAKE, HEADER_SIZE, MAX_FRAME_SIZE};
use bytes::BytesMut;
use futures::StreamExt;
use std::io;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Any byte stream a channel can run over (TCP in production, in-memory pipes in tests)
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + 'static> Transport for T {}

type BoxedTransport = Box<dyn Transport>;

/// Which side of the handshake this endpoint plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The driver: sends the magic first
    Initiator,
    /// The debuggee: answers the magic
    Responder,
}

pub struct EventChannel {
    reader: Mutex<FramedRead<ReadHalf<BoxedTransport>, LengthDelimitedCodec>>,
    writer: Mutex<WriteHalf<BoxedTransport>>,
    closed: CancellationToken,
    timeout: Duration,
}

impl std::fmt::Debug for EventChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventChannel")
            .field("closed", &self.closed.is_cancelled())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl EventChannel {
    /// Perform the handshake for `role` and wrap the stream
    pub async fn establish(
        stream: impl Transport,
        role: Role,
        timeout: Duration,
    ) -> WireResult<Self> {
        let mut stream: BoxedTransport = Box::new(stream);

        let start = Instant::now();
        tokio::time::timeout(timeout, handshake(&mut stream, role))
            .await
            .map_err(|_| WireError::timed_out("handshake", start.elapsed()))??;

        let (reader, writer) = tokio::io::split(stream);
        Ok(Self {
            reader: Mutex::new(FramedRead::new(reader, frame_codec())),
            writer: Mutex::new(writer),
            closed: CancellationToken::new(),
            timeout,
        })
    }

    /// Write one frame. Concurrent senders are serialized by the writer lock.
    pub async fn send(&self, frame: &Frame) -> WireResult<()> {
        if self.closed.is_cancelled() {
            return Err(WireError::ChannelClosed);
        }

        let encoded = frame.encode()?;
        let mut writer = self.writer.lock().await;
        let result = async {
            writer.write_all(&encoded).await?;
            writer.flush().await
        }
        .await;

        if let Err(e) = result {
            warn!("Failed to write frame id={}: {}", frame.id(), e);
            self.closed.cancel();
            return Err(map_io(e));
        }

        debug!("Sent frame id={} ({} bytes)", frame.id(), encoded.len());
        Ok(())
    }

    /// Receive the next frame, bounded by the channel's default timeout
    pub async fn receive(&self) -> WireResult<Frame> {
        self.receive_timeout(self.timeout).await
    }

    pub async fn receive_timeout(&self, timeout: Duration) -> WireResult<Frame> {
        let start = Instant::now();
        match tokio::time::timeout(timeout, self.receive_until_closed()).await {
            Ok(result) => result,
            Err(_) => Err(WireError::timed_out("frame", start.elapsed())),
        }
    }

    /// Receive without a deadline; only close or a transport failure ends the wait.
    /// Meant for long-lived reader tasks.
    pub async fn receive_until_closed(&self) -> WireResult<Frame> {
        if self.closed.is_cancelled() {
            return Err(WireError::ChannelClosed);
        }

        let mut reader = self.reader.lock().await;
        let result = tokio::select! {
            _ = self.closed.cancelled() => Err(WireError::ChannelClosed),
            next = reader.next() => decode_next(next),
        };

        if let Err(e) = &result {
            if e.is_fatal() {
                self.closed.cancel();
            }
        }
        result
    }

    /// Close both directions. Blocked and future receives fail with `ChannelClosed`.
    pub async fn close(&self) {
        if self.closed.is_cancelled() {
            return;
        }
        info!("Closing event channel");
        self.closed.cancel();
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            debug!("Shutdown after close: {}", e);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Token cancelled when the channel closes for any reason
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    pub fn default_timeout(&self) -> Duration {
        self.timeout
    }
}

async fn handshake(stream: &mut BoxedTransport, role: Role) -> WireResult<()> {
    debug!("Performing handshake as {:?}", role);

    let mut buf = vec![0u8; HANDSHAKE.len()];
    if role == Role::Initiator {
        stream.write_all(HANDSHAKE).await?;
        stream.flush().await?;
    }

    stream.read_exact(&mut buf).await.map_err(map_io)?;
    if buf != HANDSHAKE {
        warn!("Invalid handshake: {:?}", String::from_utf8_lossy(&buf));
        return Err(WireError::InvalidHandshake);
    }

    if role == Role::Responder {
        stream.write_all(HANDSHAKE).await?;
        stream.flush().await?;
    }

    info!("Handshake successful");
    Ok(())
}

/// Splits the byte stream on the frame length prefix. The length counts
/// itself, and the prefix stays on the frame so `Frame::decode` sees the
/// whole header.
pub(crate) fn frame_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .big_endian()
        .length_field_offset(0)
        .length_field_length(4)
        .length_adjustment(-4)
        .num_skip(0)
        .max_frame_length(MAX_FRAME_SIZE)
        .new_codec()
}

// Anything wrong with the framing itself is an InvalidData I/O error, which
// is fatal: the stream position can no longer be trusted
fn decode_next(next: Option<io::Result<BytesMut>>) -> WireResult<Frame> {
    let packet = match next {
        Some(Ok(packet)) => packet,
        Some(Err(e)) => return Err(map_io(e)),
        None => return Err(WireError::ChannelClosed),
    };
    if packet.len() < HEADER_SIZE {
        return Err(WireError::Io(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Frame too short: {} bytes", packet.len()),
        )));
    }
    Frame::decode(&packet)
}

// A peer hanging up mid-read is a closed channel, not an I/O fault
fn map_io(e: std::io::Error) -> WireError {
    match e.kind() {
        std::io::ErrorKind::UnexpectedEof
        | std::io::ErrorKind::BrokenPipe
        | std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::ConnectionAborted => WireError::ChannelClosed,
        _ => WireError::Io(e),
    }
}
