use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};

/// Reads one newline-delimited JSON value from `reader`. Returns `Ok(None)`
/// on a clean EOF (the peer closed the connection), matching the "one
/// message per transport frame" wire format of spec.md §6.
pub async fn read_frame<T, R>(reader: &mut R) -> Result<Option<T>>
where
    T: DeserializeOwned,
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let read = reader.read_line(&mut line).await?;
    if read == 0 {
        return Ok(None);
    }
    let value = serde_json::from_str(line.trim_end()).map_err(Error::Codec)?;
    Ok(Some(value))
}

/// Writes one value as a newline-delimited JSON frame and flushes.
pub async fn write_frame<T, W>(writer: &mut W, value: &T) -> Result<()>
where
    T: Serialize,
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_string(value).map_err(Error::Codec)?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}
