//! Length-delimited framing.
//!
//! A frame is a 4-byte big-endian length followed by that many body bytes.

// ============================================================================
// Imports
// ============================================================================

use std::io::ErrorKind;

use futures_util::Stream;
use futures_util::stream;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Default upper bound for an inbound frame body (16 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Size of the length prefix.
const LENGTH_PREFIX: usize = 4;

// ============================================================================
// Encoding
// ============================================================================

/// Prepends the length prefix to `body`.
///
/// # Errors
///
/// Returns [`Error::FrameTooLarge`] if the body does not fit a `u32` length.
pub fn encode_frame(body: &[u8]) -> Result<Vec<u8>> {
    let len = u32::try_from(body.len()).map_err(|_| Error::FrameTooLarge {
        size: body.len(),
        max: u32::MAX as usize,
    })?;

    let mut frame = Vec::with_capacity(LENGTH_PREFIX + body.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(body);
    Ok(frame)
}

/// Writes one frame and flushes.
///
/// The frame is written with a single `write_all` so a peer never sees a
/// prefix without its body from this side.
pub async fn write_frame<W>(writer: &mut W, body: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(body)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

// ============================================================================
// Decoding
// ============================================================================

/// Reads one frame body.
///
/// Returns `Ok(None)` when the stream ends at a frame boundary.
///
/// # Errors
///
/// - [`Error::FrameTooLarge`] if the announced length exceeds `max_frame_size`
/// - [`Error::Io`] if the stream fails or ends inside a body
pub async fn read_frame<R>(reader: &mut R, max_frame_size: usize) -> Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; LENGTH_PREFIX];
    match reader.read_exact(&mut prefix).await {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let size = u32::from_be_bytes(prefix) as usize;
    if size > max_frame_size {
        return Err(Error::FrameTooLarge {
            size,
            max: max_frame_size,
        });
    }

    let mut body = vec![0u8; size];
    reader.read_exact(&mut body).await?;
    Ok(Some(body))
}

/// Turns a reader into a stream of frame bodies.
///
/// The stream ends after a clean EOF or after yielding the first error.
/// Polling it from `tokio::select!` is cancel-safe: a partially read frame
/// stays inside the stream state.
pub fn frame_stream<R>(reader: R, max_frame_size: usize) -> impl Stream<Item = Result<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    stream::unfold(Some(reader), move |state| async move {
        let mut reader = state?;
        match read_frame(&mut reader, max_frame_size).await {
            Ok(Some(body)) => Some((Ok(body), Some(reader))),
            Ok(None) => None,
            Err(e) => Some((Err(e), None)),
        }
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use futures_util::StreamExt;
    use proptest::prelude::*;

    #[test]
    fn test_encode_prefix() {
        let frame = encode_frame(b"abc").expect("encode");
        assert_eq!(frame, vec![0, 0, 0, 3, b'a', b'b', b'c']);
    }

    #[tokio::test]
    async fn test_read_two_frames_then_eof() {
        let mut wire = encode_frame(b"first").expect("encode");
        wire.extend(encode_frame(b"").expect("encode"));
        let mut reader = wire.as_slice();

        let first = read_frame(&mut reader, 64).await.expect("read");
        let second = read_frame(&mut reader, 64).await.expect("read");
        let end = read_frame(&mut reader, 64).await.expect("read");

        assert_eq!(first.as_deref(), Some(&b"first"[..]));
        assert_eq!(second.as_deref(), Some(&b""[..]));
        assert!(end.is_none());
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let wire = encode_frame(&[7u8; 32]).expect("encode");
        let mut reader = wire.as_slice();

        let err = read_frame(&mut reader, 16).await.unwrap_err();
        assert!(matches!(err, Error::FrameTooLarge { size: 32, max: 16 }));
    }

    #[tokio::test]
    async fn test_truncated_body_is_io_error() {
        let mut wire = encode_frame(b"truncated").expect("encode");
        wire.truncate(6);
        let mut reader = wire.as_slice();

        let err = read_frame(&mut reader, 64).await.unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[tokio::test]
    async fn test_frame_stream_stops_after_error() {
        let mut wire = encode_frame(b"ok").expect("encode");
        wire.extend(encode_frame(&[0u8; 100]).expect("encode"));
        wire.extend(encode_frame(b"never").expect("encode"));

        let frames: Vec<_> = frame_stream(wire.as_slice(), 10).collect().await;
        assert_eq!(frames.len(), 2);
        assert!(frames[0].is_ok());
        assert!(frames[1].is_err());
    }

    #[tokio::test]
    async fn test_write_frame_matches_encode() {
        let mut out = Vec::new();
        write_frame(&mut out, b"payload").await.expect("write");
        assert_eq!(out, encode_frame(b"payload").expect("encode"));
    }

    proptest! {
        #[test]
        fn prop_decoder_never_exceeds_limit(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
            let frames: Vec<_> = tokio_test::block_on(frame_stream(bytes.as_slice(), 64).collect());
            for frame in frames.iter().flatten() {
                prop_assert!(frame.len() <= 64);
            }
            prop_assert!(frames.iter().filter(|f| f.is_err()).count() <= 1);
        }
    }
}
