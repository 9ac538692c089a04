use std::pin::Pin;
use std::task::Poll;
use std::time::Duration;

use bytes::{Buf, BufMut, BytesMut};
use futures::future::poll_fn;
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::StompError;
use crate::frame::Frame;
use crate::parser::{Parsed, Phase, parse_frame};

/// How long a partially received frame may stall before the read fails
/// with [`StompError::PacketParsingTimeout`].
pub(crate) const PARSE_TIMEOUT: Duration = Duration::from_secs(5);

/// `StompCodec` implements `tokio_util::codec::{Decoder, Encoder}` for the
/// STOMP wire protocol.
///
/// Encoding writes the command line, the headers in declaration order, a
/// `content-length` header equal to the body byte length (injected exactly
/// once, unless the frame already carries one or suppresses it), a blank
/// line, the raw body and a single NUL. Decoding accepts both
/// content-length-delimited and NUL-terminated bodies.
pub struct StompCodec {
    // Stateless: parsing works directly off the provided `src` buffer.
}

impl StompCodec {
    pub fn new() -> Self {
        Self {}
    }
}

impl Default for StompCodec {
    fn default() -> Self {
        Self::new()
    }
}

/// Drop blank separator lines sitting in front of the next command.
fn skip_blank_lines(src: &mut BytesMut) {
    while let Some(&b) = src.chunk().first() {
        if b == b'\n' || b == b'\r' {
            src.advance(1);
        } else {
            break;
        }
    }
}

impl Decoder for StompCodec {
    type Item = Frame;
    type Error = StompError;

    /// Decode one frame from `src`, consuming its bytes. Returns `Ok(None)`
    /// when more bytes are required; malformed input yields a typed error
    /// and never consumes the offending frame.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        skip_blank_lines(src);
        match parse_frame(src.chunk())? {
            Parsed::Partial(_) => Ok(None),
            Parsed::Frame {
                command,
                headers,
                body,
                consumed,
            } => {
                src.advance(consumed);
                Ok(Some(Frame {
                    command,
                    headers,
                    body,
                    suppress_content_length: false,
                }))
            }
        }
    }

    /// Like `decode`, but the stream has ended: leftover bytes that do not
    /// form a complete frame are a typed error. A truncated declared-length
    /// body means the declared length overran the actual bytes, which is an
    /// `InvalidMessageLength`; any other truncation is an `InvalidFormat`.
    /// An empty buffer is a clean end of stream.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        skip_blank_lines(src);
        if src.is_empty() {
            return Ok(None);
        }
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None => match parse_frame(src.chunk())? {
                Parsed::Partial(Phase::FixedBody) => Err(StompError::InvalidMessageLength),
                Parsed::Partial(_) => Err(StompError::InvalidFormat(
                    "truncated frame at end of stream".to_string(),
                )),
                Parsed::Frame { .. } => unreachable!("decode already consumed complete frames"),
            },
        }
    }
}

impl Encoder<Frame> for StompCodec {
    type Error = StompError;

    /// Refuses to serialize a frame whose explicit `content-length` header
    /// disagrees with the actual body length.
    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let explicit = frame
            .headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("content-length"));
        if let Some((_, value)) = explicit {
            let declared: usize = value.trim().parse().map_err(|_| {
                StompError::InvalidFormat(format!("invalid content-length: {:?}", value))
            })?;
            if declared != frame.body.len() {
                return Err(StompError::InvalidMessageLength);
            }
        }

        dst.extend_from_slice(frame.command.as_bytes());
        dst.put_u8(b'\n');

        for (k, v) in &frame.headers {
            dst.extend_from_slice(k.as_bytes());
            dst.put_u8(b':');
            dst.extend_from_slice(v.as_bytes());
            dst.put_u8(b'\n');
        }
        if explicit.is_none() && !frame.suppress_content_length {
            dst.extend_from_slice(b"content-length:");
            dst.extend_from_slice(frame.body.len().to_string().as_bytes());
            dst.put_u8(b'\n');
        }

        dst.put_u8(b'\n');
        dst.extend_from_slice(&frame.body);
        dst.put_u8(0);
        Ok(())
    }
}

/// Buffered frame reader over the raw transport read half.
///
/// Waiting for the first byte of a frame is unbounded. Once any frame bytes
/// are buffered, every further read needed to complete the frame must make
/// progress within the timeout, or the read fails with
/// [`StompError::PacketParsingTimeout`] instead of hanging on a stalled
/// partial frame.
pub(crate) struct FrameReader<R> {
    io: R,
    buf: BytesMut,
    codec: StompCodec,
    timeout: Duration,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub(crate) fn new(io: R) -> Self {
        Self::with_timeout(io, PARSE_TIMEOUT)
    }

    pub(crate) fn with_timeout(io: R, timeout: Duration) -> Self {
        Self {
            io,
            buf: BytesMut::with_capacity(4096),
            codec: StompCodec::new(),
            timeout,
        }
    }

    /// Read the next frame, blocking until one decodes, the stream ends
    /// cleanly (`Ok(None)`) or the stream fails.
    pub(crate) async fn read_frame(&mut self) -> Result<Option<Frame>, StompError> {
        loop {
            if let Some(frame) = self.codec.decode(&mut self.buf)? {
                return Ok(Some(frame));
            }
            let n = if self.buf.is_empty() {
                self.io.read_buf(&mut self.buf).await?
            } else {
                match tokio::time::timeout(self.timeout, self.io.read_buf(&mut self.buf)).await {
                    Ok(read) => read?,
                    Err(_) => return Err(StompError::PacketParsingTimeout),
                }
            };
            if n == 0 {
                return self.codec.decode_eof(&mut self.buf);
            }
        }
    }

    /// Non-blocking receive: `Ok(None)` immediately when nothing is
    /// buffered and nothing is readable right now, otherwise exactly one
    /// frame, finishing a partial frame the way `read_frame` would.
    pub(crate) async fn poll_frame(&mut self) -> Result<Option<Frame>, StompError> {
        loop {
            skip_blank_lines(&mut self.buf);
            if !self.buf.is_empty() {
                return self.read_frame().await;
            }
            match self.read_now().await? {
                None | Some(0) => return Ok(None),
                Some(_) => {}
            }
        }
    }

    /// One readiness-probe read: `Ok(None)` when the transport has no bytes
    /// available right now, `Ok(Some(n))` after appending `n` read bytes
    /// (0 meaning end of stream).
    async fn read_now(&mut self) -> Result<Option<usize>, StompError> {
        let mut tmp = [0u8; 4096];
        let read = poll_fn(|cx| {
            let mut rb = ReadBuf::new(&mut tmp);
            match Pin::new(&mut self.io).poll_read(cx, &mut rb) {
                Poll::Pending => Poll::Ready(Ok(None)),
                Poll::Ready(Ok(())) => Poll::Ready(Ok(Some(rb.filled().len()))),
                Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
            }
        })
        .await?;
        if let Some(n) = read {
            self.buf.extend_from_slice(&tmp[..n]);
        }
        Ok(read)
    }
}
