use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::error::PeerError;
use super::message::{Handshake, Message, HANDSHAKE_LEN};
use crate::constants::{BLOCK_SIZE, FRAME_SLACK, READ_TIMEOUT, WRITE_TIMEOUT};

/// Frame cap before the torrent's dimensions are known: enough for a
/// standard block message or a metadata-exchange piece.
const DEFAULT_MAX_FRAME: usize = BLOCK_SIZE as usize + 13 + FRAME_SLACK;

/// Length-prefixed framing over a peer TCP stream.
///
/// Reads are buffered and bounded: a frame announcing a body larger
/// than the connection's cap is rejected rather than buffered, which
/// keeps a hostile peer from ballooning memory. The cap starts at the
/// block-message size and is raised by the session once the piece count
/// (and so the bitfield length) is known.
pub struct PeerTransport {
    stream: TcpStream,
    buf: BytesMut,
    max_frame: usize,
}

impl PeerTransport {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            buf: BytesMut::with_capacity(32 * 1024),
            max_frame: DEFAULT_MAX_FRAME,
        }
    }

    /// Raises (or lowers) the frame cap for this connection.
    pub fn set_max_frame_len(&mut self, max_frame: usize) {
        self.max_frame = max_frame;
    }

    pub async fn send_handshake(&mut self, handshake: &Handshake) -> Result<(), PeerError> {
        write_all(&mut self.stream, &handshake.encode()).await
    }

    pub async fn receive_handshake(&mut self) -> Result<Handshake, PeerError> {
        while self.buf.len() < HANDSHAKE_LEN {
            fill(&mut self.stream, &mut self.buf).await?;
        }
        let data = self.buf.split_to(HANDSHAKE_LEN);
        Handshake::decode(&data)
    }

    pub async fn send(&mut self, message: &Message) -> Result<(), PeerError> {
        write_all(&mut self.stream, &message.encode()).await
    }

    pub async fn receive(&mut self) -> Result<Message, PeerError> {
        let frame = read_frame(&mut self.stream, &mut self.buf, self.max_frame).await?;
        Message::decode(frame)
    }

    /// Splits into independently-owned read and write halves so a peer
    /// task can wait for incoming messages and scheduler commands at
    /// the same time. Buffered bytes move into the reader.
    pub fn into_split(self) -> (FrameReader, FrameWriter) {
        let (read, write) = self.stream.into_split();
        (
            FrameReader {
                half: read,
                buf: self.buf,
                max_frame: self.max_frame,
            },
            FrameWriter { half: write },
        )
    }
}

/// The receiving half of a split transport.
///
/// `receive` is cancellation-safe: partial frames stay in the internal
/// buffer across dropped futures, so it can sit in a `select!` arm.
pub struct FrameReader {
    half: OwnedReadHalf,
    buf: BytesMut,
    max_frame: usize,
}

impl FrameReader {
    pub async fn receive(&mut self) -> Result<Message, PeerError> {
        let frame = read_frame(&mut self.half, &mut self.buf, self.max_frame).await?;
        Message::decode(frame)
    }
}

/// The sending half of a split transport.
pub struct FrameWriter {
    half: OwnedWriteHalf,
}

impl FrameWriter {
    pub async fn send(&mut self, message: &Message) -> Result<(), PeerError> {
        write_all(&mut self.half, &message.encode()).await
    }
}

async fn write_all<W>(writer: &mut W, data: &[u8]) -> Result<(), PeerError>
where
    W: AsyncWrite + Unpin,
{
    timeout(WRITE_TIMEOUT, writer.write_all(data))
        .await
        .map_err(|_| PeerError::Timeout)??;
    Ok(())
}

async fn fill<R>(reader: &mut R, buf: &mut BytesMut) -> Result<(), PeerError>
where
    R: AsyncRead + Unpin,
{
    let n = timeout(READ_TIMEOUT, reader.read_buf(buf))
        .await
        .map_err(|_| PeerError::Timeout)??;
    if n == 0 {
        return Err(PeerError::ConnectionClosed);
    }
    Ok(())
}

/// Reads one complete frame (length prefix included) into a `Bytes`.
async fn read_frame<R>(
    reader: &mut R,
    buf: &mut BytesMut,
    max_frame: usize,
) -> Result<Bytes, PeerError>
where
    R: AsyncRead + Unpin,
{
    while buf.len() < 4 {
        fill(reader, buf).await?;
    }

    let length = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if length > max_frame {
        return Err(PeerError::FrameTooLarge(length));
    }

    let total = 4 + length;
    while buf.len() < total {
        fill(reader, buf).await?;
    }

    Ok(buf.split_to(total).freeze())
}
