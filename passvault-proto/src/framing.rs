//! Framing shared by the endpoint and the registry.
//!
//! Each message is a big-endian `u32` byte count followed by that many
//! bytes of JSON.

use bytes::{Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum frame size (1 MB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Errors raised while moving frames over a stream.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("frame too large: {0} bytes")]
    TooLarge(usize),
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Read a length-delimited frame, or `None` if the stream ends before the
/// first byte of the length prefix.
async fn read_frame_or_eof<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Option<Bytes>, FrameError> {
    let mut prefix = [0u8; 4];
    if reader.read(&mut prefix[..1]).await? == 0 {
        return Ok(None);
    }
    reader.read_exact(&mut prefix[1..]).await?;

    let size = u32::from_be_bytes(prefix) as usize;
    if size > MAX_FRAME_SIZE {
        return Err(FrameError::TooLarge(size));
    }

    let mut payload = BytesMut::zeroed(size);
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload.freeze()))
}

/// Read one raw frame. EOF anywhere is an error.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Bytes, FrameError> {
    read_frame_or_eof(reader)
        .await?
        .ok_or_else(|| FrameError::Io(io::ErrorKind::UnexpectedEof.into()))
}

/// Write one raw frame and flush.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    data: &[u8],
) -> Result<(), FrameError> {
    if data.len() > MAX_FRAME_SIZE {
        return Err(FrameError::TooLarge(data.len()));
    }

    let prefix = (data.len() as u32).to_be_bytes();
    writer.write_all(&prefix).await?;
    writer.write_all(data).await?;
    writer.flush().await?;

    Ok(())
}

/// Encode `msg` as JSON and write it as one frame.
pub async fn write_message<W, T>(writer: &mut W, msg: &T) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload = serde_json::to_vec(msg)?;
    write_frame(writer, &payload).await
}

/// Read one frame and decode it as JSON.
///
/// Returns `Ok(None)` when the peer closed the stream cleanly between
/// frames.
pub async fn read_message<R, T>(reader: &mut R) -> Result<Option<T>, FrameError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    match read_frame_or_eof(reader).await? {
        Some(frame) => Ok(Some(serde_json::from_slice(&frame)?)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{Request, Response};
    use std::io::Cursor;

    #[tokio::test]
    async fn prefix_counts_payload_bytes_only() {
        let mut wire = Vec::new();
        write_message(&mut wire, &Response::Outcome(true)).await.unwrap();

        let payload = br#"{"outcome":true}"#;
        assert_eq!(&wire[..4], &(payload.len() as u32).to_be_bytes());
        assert_eq!(&wire[4..], payload);

        let raw = read_frame(&mut Cursor::new(wire)).await.unwrap();
        assert_eq!(&raw[..], payload);
    }

    #[tokio::test]
    async fn messages_come_back_in_write_order() {
        let requests = vec![
            Request::ListServices {
                username: "alice".to_string(),
            },
            Request::GetService {
                username: "alice".to_string(),
                service: "gmail".to_string(),
            },
        ];

        let mut wire = Vec::new();
        for request in &requests {
            write_message(&mut wire, request).await.unwrap();
        }

        let mut reader = Cursor::new(wire);
        for expected in &requests {
            let got: Request = read_message(&mut reader).await.unwrap().unwrap();
            assert_eq!(&got, expected);
        }

        let end: Option<Request> = read_message(&mut reader).await.unwrap();
        assert!(end.is_none(), "clean EOF between frames reads as None");
    }

    #[tokio::test]
    async fn oversized_payload_is_refused_before_writing() {
        let services = vec!["x".repeat(1024); 1024];
        let mut wire = Vec::new();

        let err = write_message(&mut wire, &Response::Services(services))
            .await
            .unwrap_err();
        assert!(matches!(err, FrameError::TooLarge(n) if n > MAX_FRAME_SIZE));
        assert!(wire.is_empty());
    }

    #[tokio::test]
    async fn oversized_prefix_is_refused_without_reading_payload() {
        let announced = (MAX_FRAME_SIZE as u32) + 1;
        let mut reader = Cursor::new(announced.to_be_bytes().to_vec());

        let err = read_message::<_, Request>(&mut reader).await.unwrap_err();
        assert!(matches!(err, FrameError::TooLarge(n) if n == MAX_FRAME_SIZE + 1));
    }

    #[tokio::test]
    async fn eof_inside_a_frame_is_an_error() {
        let mut wire = 100_u32.to_be_bytes().to_vec();
        wire.extend_from_slice(&[b'{'; 50]);

        match read_message::<_, Response>(&mut Cursor::new(wire)).await {
            Err(FrameError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("expected UnexpectedEof, got {other:?}"),
        }

        let short_prefix = vec![0_u8, 0];
        assert!(read_message::<_, Response>(&mut Cursor::new(short_prefix))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn garbage_payload_is_malformed() {
        let mut wire = Vec::new();
        write_frame(&mut wire, b"not json").await.unwrap();

        let result = read_message::<_, Request>(&mut Cursor::new(wire)).await;
        assert!(matches!(result, Err(FrameError::Malformed(_))));
    }
}
