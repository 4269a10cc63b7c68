use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::message::MAX_MESSAGE_BYTES;
use crate::P2pError;

/// Read one `\n`-terminated line into `buf`. `Ok(false)` on clean EOF.
///
/// A final line cut short by EOF is still returned; a line longer than
/// [`MAX_MESSAGE_BYTES`] is an error.
pub(crate) async fn read_line<R>(reader: &mut R, buf: &mut Vec<u8>) -> Result<bool, P2pError>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let limit = MAX_MESSAGE_BYTES as u64 + 1;
    let n = reader.take(limit).read_until(b'\n', buf).await?;
    if n == 0 {
        return Ok(false);
    }
    if buf.len() > MAX_MESSAGE_BYTES {
        return Err(P2pError::MessageTooLarge);
    }
    Ok(true)
}

/// Drain `outbox` onto `writer` until every sender is gone or a write fails.
pub(crate) async fn write_loop<W>(mut writer: W, mut outbox: mpsc::UnboundedReceiver<String>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = outbox.recv().await {
        if let Err(err) = writer.write_all(line.as_bytes()).await {
            tracing::debug!(%err, "peer write failed");
            break;
        }
    }
    let _ = writer.shutdown().await;
}
