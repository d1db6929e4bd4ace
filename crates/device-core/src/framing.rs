//! Length-prefixed JSON framing shared by the server and client sides of the
//! connection: a 4-byte big-endian length prefix followed by a UTF-8 JSON
//! payload, symmetric in both directions.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Default maximum frame size accepted by the device manager: 64 MiB.
pub const DEFAULT_MAX_FRAME_BYTES: u32 = 64 * 1024 * 1024;

/// Default maximum frame size a client is willing to read: 8 MiB.
pub const CLIENT_MAX_FRAME_BYTES: u32 = 8 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    #[error("frame of {len} bytes exceeds the {limit} byte limit")]
    TooLarge { len: u32, limit: u32 },
    #[error("frame payload is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),
    #[error("I/O error while framing: {0}")]
    Io(#[from] std::io::Error),
}

/// Read one length-prefixed frame from `reader`.
///
/// Returns `Ok(None)` when the peer closed the connection cleanly between
/// frames (no bytes read for the length prefix at all). A partial read of
/// the length prefix, or any failure once a frame has started, is a
/// [`FramingError::Io`] — the caller should treat that as a broken
/// connection rather than a clean disconnect.
pub async fn read_frame<R>(
    reader: &mut R,
    max_frame_bytes: u32,
) -> Result<Option<String>, FramingError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    let n = read_fill_or_eof(reader, &mut len_buf).await?;
    if n == 0 {
        return Ok(None);
    }
    if n < len_buf.len() {
        return Err(FramingError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "connection closed mid length-prefix",
        )));
    }

    let len = u32::from_be_bytes(len_buf);
    if len > max_frame_bytes {
        return Err(FramingError::TooLarge {
            len,
            limit: max_frame_bytes,
        });
    }

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    let text = std::str::from_utf8(&payload)?.to_owned();
    Ok(Some(text))
}

/// Like `read_exact`, but distinguishes "zero bytes read, peer closed
/// cleanly" from "some bytes read, then EOF" by returning the byte count
/// instead of erroring on a zero-length read.
async fn read_fill_or_eof<R>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Write one length-prefixed frame to `writer` and flush it.
pub async fn write_frame<W>(writer: &mut W, payload: &str) -> Result<(), FramingError>
where
    W: AsyncWrite + Unpin,
{
    let bytes = payload.as_bytes();
    let len: u32 = bytes
        .len()
        .try_into()
        .map_err(|_| FramingError::TooLarge {
            len: u32::MAX,
            limit: u32::MAX,
        })?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(bytes).await?;
    writer.flush().await?;
    Ok(())
}
