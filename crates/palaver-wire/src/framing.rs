//! Multipart framing over byte streams.
//!
//! Layout: a 4-byte big-endian total length, then each frame as its own
//! 4-byte big-endian length followed by its bytes. The total length counts
//! everything after the outer header.

use bytes::Bytes;
use palaver_types::PalaverError;
use std::io::{Read, Write};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum single message size (16 MiB).
pub const MAX_MESSAGE_SIZE: u32 = 16 * 1024 * 1024;

fn encode_multipart(frames: &[Bytes]) -> Result<Vec<u8>, PalaverError> {
    let body_len: usize = frames.iter().map(|f| 4 + f.len()).sum();
    if body_len > MAX_MESSAGE_SIZE as usize {
        return Err(PalaverError::MessageTooLarge {
            size: body_len as u32,
            max: MAX_MESSAGE_SIZE,
        });
    }
    let mut buf = Vec::with_capacity(4 + body_len);
    buf.extend_from_slice(&(body_len as u32).to_be_bytes());
    for frame in frames {
        buf.extend_from_slice(&(frame.len() as u32).to_be_bytes());
        buf.extend_from_slice(frame);
    }
    Ok(buf)
}

fn decode_multipart(body: &[u8]) -> Result<Vec<Bytes>, PalaverError> {
    let mut frames = Vec::new();
    let mut offset = 0usize;
    while offset < body.len() {
        if offset + 4 > body.len() {
            return Err(PalaverError::MalformedFrame(
                "truncated frame length header".into(),
            ));
        }
        let len = u32::from_be_bytes([
            body[offset],
            body[offset + 1],
            body[offset + 2],
            body[offset + 3],
        ]) as usize;
        offset += 4;
        if offset + len > body.len() {
            return Err(PalaverError::MalformedFrame(format!(
                "frame length {len} exceeds remaining {}",
                body.len() - offset
            )));
        }
        frames.push(Bytes::copy_from_slice(&body[offset..offset + len]));
        offset += len;
    }
    Ok(frames)
}

fn check_size(len: u32) -> Result<(), PalaverError> {
    if len > MAX_MESSAGE_SIZE {
        return Err(PalaverError::MessageTooLarge {
            size: len,
            max: MAX_MESSAGE_SIZE,
        });
    }
    Ok(())
}

/// Write one multipart message to an async stream.
pub async fn write_frames<W: AsyncWrite + Unpin>(
    writer: &mut W,
    frames: &[Bytes],
) -> Result<(), PalaverError> {
    let buf = encode_multipart(frames)?;
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one multipart message from an async stream.
///
/// A clean EOF at the outer header surfaces as
/// [`PalaverError::ConnectionClosed`].
pub async fn read_frames<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<Bytes>, PalaverError> {
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(PalaverError::ConnectionClosed);
        }
        Err(e) => return Err(PalaverError::Io(e)),
    }

    let len = u32::from_be_bytes(header);
    check_size(len)?;

    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await?;
    decode_multipart(&body)
}

/// Blocking variant of [`write_frames`] for the synchronous transport.
pub fn write_frames_blocking<W: Write>(writer: &mut W, frames: &[Bytes]) -> Result<(), PalaverError> {
    let buf = encode_multipart(frames)?;
    writer.write_all(&buf)?;
    writer.flush()?;
    Ok(())
}

/// Blocking variant of [`read_frames`] for the synchronous transport.
///
/// Receive timeouts configured on the socket surface as `Io` errors with
/// `WouldBlock`/`TimedOut` kinds; the caller maps them to `Timeout`.
pub fn read_frames_blocking<R: Read>(reader: &mut R) -> Result<Vec<Bytes>, PalaverError> {
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header) {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(PalaverError::ConnectionClosed);
        }
        Err(e) => return Err(PalaverError::Io(e)),
    }

    let len = u32::from_be_bytes(header);
    check_size(len)?;

    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body)?;
    decode_multipart(&body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_async_roundtrip() {
        let frames = vec![
            Bytes::from_static(b"pv1"),
            Bytes::from_static(b""),
            Bytes::from_static(b"payload bytes"),
        ];

        let (mut client, mut server) = tokio::io::duplex(1024);
        write_frames(&mut client, &frames).await.unwrap();
        let read = read_frames(&mut server).await.unwrap();
        assert_eq!(read, frames);
    }

    #[tokio::test]
    async fn test_eof_is_connection_closed() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);
        assert!(matches!(
            read_frames(&mut server).await,
            Err(PalaverError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_oversize_header_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let len = MAX_MESSAGE_SIZE + 1;
        tokio::io::AsyncWriteExt::write_all(&mut client, &len.to_be_bytes())
            .await
            .unwrap();
        assert!(matches!(
            read_frames(&mut server).await,
            Err(PalaverError::MessageTooLarge { .. })
        ));
    }

    #[test]
    fn test_blocking_roundtrip() {
        let frames = vec![Bytes::from_static(b"a"), Bytes::from_static(b"bc")];
        let mut buf = Vec::new();
        write_frames_blocking(&mut buf, &frames).unwrap();
        let read = read_frames_blocking(&mut buf.as_slice()).unwrap();
        assert_eq!(read, frames);
    }

    #[test]
    fn test_truncated_body_rejected() {
        let frames = vec![Bytes::from_static(b"hello")];
        let mut buf = Vec::new();
        write_frames_blocking(&mut buf, &frames).unwrap();
        // Corrupt the inner frame length so it claims more than remains.
        buf[7] = 0xFF;
        assert!(matches!(
            read_frames_blocking(&mut buf.as_slice()),
            Err(PalaverError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_empty_frames_preserved() {
        let frames = vec![Bytes::new(), Bytes::new(), Bytes::from_static(b"x")];
        let mut buf = Vec::new();
        write_frames_blocking(&mut buf, &frames).unwrap();
        assert_eq!(read_frames_blocking(&mut buf.as_slice()).unwrap(), frames);
    }
}
