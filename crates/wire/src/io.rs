//! Byte-exact socket I/O.
//!
//! Two flavours are provided:
//!
//! - **Blocking** (`recv_exact`, `send_all`, `recv_message`, `send_message`):
//!   the caller is parked until the whole buffer moved. Used by the handshake
//!   and by the client.
//! - **Non-blocking** (`try_recv`, [`FrameReader`]): never waits. A read
//!   that would block hands control back to the event loop and the partially
//!   received frame is kept, so the next readiness notification resumes
//!   exactly where the previous one stopped.

use std::io::{self, Read};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::codec::{HeaderError, Message, HEADER_LEN};
use crate::error::{Error, Result};

/// Read exactly `buf.len()` bytes. End of stream or reset → `Unreachable`.
pub async fn recv_exact<R>(reader: &mut R, buf: &mut [u8]) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]).await {
            Ok(0) => return Err(Error::Unreachable),
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(Error::from_io(err)),
        }
    }
    Ok(())
}

/// Write all of `buf`. Broken pipe or reset → `Unreachable`.
pub async fn send_all<W>(writer: &mut W, buf: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(buf).await.map_err(Error::from_io)?;
    writer.flush().await.map_err(Error::from_io)
}

/// Receive a whole message: header, validation, then payload.
pub async fn recv_message<R>(reader: &mut R, max_payload: u32) -> Result<Message>
where
    R: AsyncRead + Unpin,
{
    let mut msg = Message::new();
    recv_exact(reader, msg.header_mut()).await?;
    msg.fix_header(max_payload)?;
    if msg.payload_size() > 0 {
        recv_exact(reader, msg.payload_mut()).await?;
    }
    Ok(msg)
}

/// Send header then payload.
pub async fn send_message<W>(writer: &mut W, msg: &Message) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    send_all(writer, &msg.to_bytes()).await
}

/// Streams that support a non-blocking read attempt.
pub trait TryRead {
    fn try_read_into(&self, buf: &mut [u8]) -> io::Result<usize>;
}

impl TryRead for tokio::net::UnixStream {
    fn try_read_into(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.try_read(buf)
    }
}

/// The stream must have been switched to non-blocking mode.
impl TryRead for std::os::unix::net::UnixStream {
    fn try_read_into(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut stream = self;
        stream.read(buf)
    }
}

/// Outcome of a single non-blocking read.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Recv {
    Data(usize),
    /// Nothing to read right now; wait for the next readiness event.
    WouldBlock,
    /// Orderly close or reset.
    Closed,
}

pub fn try_recv<S: TryRead + ?Sized>(stream: &S, buf: &mut [u8]) -> Result<Recv> {
    loop {
        match stream.try_read_into(buf) {
            Ok(0) if !buf.is_empty() => return Ok(Recv::Closed),
            Ok(n) => return Ok(Recv::Data(n)),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(Recv::WouldBlock),
            Err(err) if crate::error::is_disconnect(&err) => return Ok(Recv::Closed),
            Err(err) => return Err(Error::Io(err)),
        }
    }
}

/// What a [`FrameReader`] produced.
#[derive(Debug)]
pub enum ReadEvent {
    /// A complete, validated message.
    Frame(Message),
    /// A header was rejected and its message dropped.
    Malformed(HeaderError),
    /// No complete message yet.
    WouldBlock,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
enum Stage {
    Header,
    Payload,
    /// Discarding the payload of a rejected but well-formed header.
    Skip { remaining: usize },
}

const SKIP_CHUNK: usize = 4096;

/// Per-connection resumable reader.
#[derive(Debug)]
pub struct FrameReader {
    msg: Message,
    filled: usize,
    stage: Stage,
    max_payload: u32,
}

impl FrameReader {
    pub fn new(max_payload: u32) -> Self {
        Self {
            msg: Message::new(),
            filled: 0,
            stage: Stage::Header,
            max_payload,
        }
    }

    /// True when no partial frame is buffered.
    pub fn is_idle(&self) -> bool {
        self.stage == Stage::Header && self.filled == 0
    }

    /// Read as far as the stream allows without blocking.
    ///
    /// Returns `Err(Unreachable)` when the peer closes before a header is
    /// complete and `Err(Truncated)` when it closes inside a payload.
    pub fn poll_read<S: TryRead + ?Sized>(&mut self, stream: &S) -> Result<ReadEvent> {
        loop {
            match self.stage {
                Stage::Header => {
                    let n = match try_recv(stream, &mut self.msg.header_mut()[self.filled..])? {
                        Recv::WouldBlock => return Ok(ReadEvent::WouldBlock),
                        Recv::Closed => {
                            if self.filled > 0 {
                                let received = self.filled;
                                tracing::debug!(received, "peer closed mid-header");
                            }
                            return Err(Error::Unreachable);
                        }
                        Recv::Data(n) => n,
                    };
                    self.filled += n;
                    if self.filled < HEADER_LEN {
                        continue;
                    }
                    self.filled = 0;
                    match self.msg.fix_header(self.max_payload) {
                        Ok(header) if header.payload_len == 0 => {
                            return Ok(ReadEvent::Frame(self.take()));
                        }
                        Ok(_) => self.stage = Stage::Payload,
                        Err(Error::MalformedHeader(err)) => {
                            if let Some(len) = err.skip_len() {
                                tracing::debug!(len, error = %err, "skipping rejected payload");
                                self.stage = Stage::Skip {
                                    remaining: len as usize,
                                };
                            }
                            self.msg = Message::new();
                            return Ok(ReadEvent::Malformed(err));
                        }
                        Err(err) => return Err(err),
                    }
                }
                Stage::Payload => {
                    let expected = self.msg.payload_size();
                    let n = match try_recv(stream, &mut self.msg.payload_mut()[self.filled..])? {
                        Recv::WouldBlock => return Ok(ReadEvent::WouldBlock),
                        Recv::Closed => return Err(self.truncated(expected)),
                        Recv::Data(n) => n,
                    };
                    self.filled += n;
                    if self.filled == expected {
                        return Ok(ReadEvent::Frame(self.take()));
                    }
                }
                Stage::Skip { remaining } => {
                    if remaining == 0 {
                        self.stage = Stage::Header;
                        continue;
                    }
                    let mut scratch = [0u8; SKIP_CHUNK];
                    let want = remaining.min(SKIP_CHUNK);
                    match try_recv(stream, &mut scratch[..want])? {
                        Recv::WouldBlock => return Ok(ReadEvent::WouldBlock),
                        Recv::Closed => {
                            return Err(Error::Truncated {
                                expected: remaining,
                                received: 0,
                            })
                        }
                        Recv::Data(n) => {
                            self.stage = Stage::Skip {
                                remaining: remaining - n,
                            }
                        }
                    }
                }
            }
        }
    }

    fn take(&mut self) -> Message {
        self.filled = 0;
        self.stage = Stage::Header;
        std::mem::take(&mut self.msg)
    }

    fn truncated(&self, expected: usize) -> Error {
        Error::Truncated {
            expected,
            received: self.filled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Header, MessageType, DEFAULT_MAX_PAYLOAD, MAGIC, PROTOCOL_VERSION};
    use bytes::{BufMut, BytesMut};
    use std::io::Write;
    use std::os::unix::net::UnixStream;
    use xxhash_rust::xxh3::xxh3_64;

    fn pair() -> (UnixStream, UnixStream) {
        let (a, b) = UnixStream::pair().unwrap();
        b.set_nonblocking(true).unwrap();
        (a, b)
    }

    fn frame(kind: MessageType, tag: u32, payload: &[u8]) -> Vec<u8> {
        Message::encode(kind, tag, payload.to_vec())
            .unwrap()
            .to_bytes()
            .to_vec()
    }

    #[test]
    fn test_empty_socket_would_block() {
        let (_tx, rx) = pair();
        let mut reader = FrameReader::new(DEFAULT_MAX_PAYLOAD);
        assert!(matches!(reader.poll_read(&rx).unwrap(), ReadEvent::WouldBlock));
        assert!(reader.is_idle());
    }

    #[test]
    fn test_partial_frame_resumes() {
        let (mut tx, rx) = pair();
        let wire = frame(MessageType::Publish, 5, b"hello");
        let mut reader = FrameReader::new(DEFAULT_MAX_PAYLOAD);

        tx.write_all(&wire[..10]).unwrap();
        assert!(matches!(reader.poll_read(&rx).unwrap(), ReadEvent::WouldBlock));
        assert!(!reader.is_idle());

        tx.write_all(&wire[10..18]).unwrap();
        assert!(matches!(reader.poll_read(&rx).unwrap(), ReadEvent::WouldBlock));

        tx.write_all(&wire[18..]).unwrap();
        match reader.poll_read(&rx).unwrap() {
            ReadEvent::Frame(msg) => {
                assert_eq!(msg.header().unwrap().tag, 5);
                assert_eq!(msg.payload(), b"hello");
            }
            other => panic!("expected frame, got {:?}", other),
        }
        assert!(reader.is_idle());
    }

    #[test]
    fn test_close_between_frames_is_unreachable() {
        let (tx, rx) = pair();
        drop(tx);
        let mut reader = FrameReader::new(DEFAULT_MAX_PAYLOAD);
        assert!(matches!(reader.poll_read(&rx), Err(Error::Unreachable)));
    }

    #[test]
    fn test_close_mid_header_is_unreachable() {
        let (mut tx, rx) = pair();
        let wire = frame(MessageType::Fence, 1, b"");
        tx.write_all(&wire[..HEADER_LEN / 2]).unwrap();
        drop(tx);
        let mut reader = FrameReader::new(DEFAULT_MAX_PAYLOAD);
        assert!(matches!(reader.poll_read(&rx), Err(Error::Unreachable)));
    }

    #[test]
    fn test_close_mid_payload_is_truncated() {
        let (mut tx, rx) = pair();
        let wire = frame(MessageType::Fence, 1, &[0u8; 32]);
        tx.write_all(&wire[..HEADER_LEN + 4]).unwrap();
        drop(tx);
        let mut reader = FrameReader::new(DEFAULT_MAX_PAYLOAD);
        match reader.poll_read(&rx) {
            Err(Error::Truncated { expected, received }) => {
                assert_eq!(expected, 32);
                assert_eq!(received, 4);
            }
            other => panic!("expected truncation, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_header_is_dropped() {
        let (mut tx, rx) = pair();
        let mut garbage = Header::new(MessageType::Lookup, 1, 0).encode();
        garbage[13] ^= 0x01;
        tx.write_all(&garbage).unwrap();
        tx.write_all(&frame(MessageType::Disconnect, 2, b"")).unwrap();

        let mut reader = FrameReader::new(DEFAULT_MAX_PAYLOAD);
        assert!(matches!(
            reader.poll_read(&rx).unwrap(),
            ReadEvent::Malformed(HeaderError::CheckMismatch { .. })
        ));
        match reader.poll_read(&rx).unwrap() {
            ReadEvent::Frame(msg) => assert_eq!(msg.header().unwrap().tag, 2),
            other => panic!("expected frame, got {:?}", other),
        }
    }

    #[test]
    fn test_oversize_payload_is_skipped() {
        let (mut tx, rx) = pair();
        tx.write_all(&frame(MessageType::Publish, 1, &[7u8; 64])).unwrap();
        tx.write_all(&frame(MessageType::Connect, 2, b"ok")).unwrap();

        let mut reader = FrameReader::new(16);
        assert!(matches!(
            reader.poll_read(&rx).unwrap(),
            ReadEvent::Malformed(HeaderError::Oversize { len: 64, max: 16 })
        ));
        match reader.poll_read(&rx).unwrap() {
            ReadEvent::Frame(msg) => assert_eq!(msg.payload(), b"ok"),
            other => panic!("expected frame, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type_payload_is_skipped() {
        let (mut tx, rx) = pair();
        let mut raw = BytesMut::with_capacity(HEADER_LEN);
        raw.put_u16(MAGIC);
        raw.put_u8(PROTOCOL_VERSION);
        raw.put_u8(42);
        raw.put_u32(1);
        raw.put_u32(20);
        let check = xxh3_64(&raw[..12]) as u32;
        raw.put_u32(check);
        tx.write_all(&raw).unwrap();
        tx.write_all(&[0xaa; 20]).unwrap();
        tx.write_all(&frame(MessageType::Connect, 9, b"ok")).unwrap();

        let mut reader = FrameReader::new(DEFAULT_MAX_PAYLOAD);
        assert!(matches!(
            reader.poll_read(&rx).unwrap(),
            ReadEvent::Malformed(HeaderError::UnknownType { kind: 42, len: 20 })
        ));
        match reader.poll_read(&rx).unwrap() {
            ReadEvent::Frame(msg) => {
                assert_eq!(msg.header().unwrap().tag, 9);
                assert_eq!(msg.payload(), b"ok");
            }
            other => panic!("expected frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_blocking_round_trip() {
        let (mut a, mut b) = tokio::net::UnixStream::pair().unwrap();
        let sent = Message::encode(MessageType::Credential, 0, b"T35T".to_vec()).unwrap();
        send_message(&mut a, &sent).await.unwrap();
        let got = recv_message(&mut b, DEFAULT_MAX_PAYLOAD).await.unwrap();
        assert_eq!(got.header().unwrap().kind, MessageType::Credential);
        assert_eq!(got.payload(), b"T35T");

        drop(a);
        let mut buf = [0u8; 4];
        assert!(matches!(recv_exact(&mut b, &mut buf).await, Err(Error::Unreachable)));
    }
}
