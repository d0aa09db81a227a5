//! Bulk transfer of the software package over the charger's Wi-Fi hotspot
//!
//! Plain TCP: write the whole payload, then read one buffer and compare it
//! against the acknowledgement token.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Sent by the charger once the whole file arrived
pub const ACK_TOKEN: &[u8] = b"FileReceived!";

/// Size of the single read that must hold the acknowledgement
pub const ACK_BUFFER_SIZE: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    Acknowledged,
    /// The charger answered with something other than the token
    UnexpectedReply(Vec<u8>),
}

/// Connect to `host:port`, send `payload` and read the acknowledgement.
///
/// The whole exchange is bounded by `timeout`.
pub async fn send_file(
    host: &str,
    port: u16,
    payload: &[u8],
    ack_token: &[u8],
    timeout: Duration,
) -> std::io::Result<TransferOutcome> {
    tokio::time::timeout(timeout, exchange(host, port, payload, ack_token))
        .await
        .map_err(|_| {
            std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("bulk transfer to {host}:{port} timed out after {timeout:?}"),
            )
        })?
}

async fn exchange(host: &str, port: u16, payload: &[u8], ack_token: &[u8]) -> std::io::Result<TransferOutcome> {
    let mut stream = TcpStream::connect((host, port)).await?;
    tracing::debug!(host, port, len = payload.len(), "bulk connection open");

    stream.write_all(payload).await?;
    stream.flush().await?;

    let mut buf = vec![0u8; ACK_BUFFER_SIZE];
    let n = stream.read(&mut buf).await?;
    buf.truncate(n);

    if buf == ack_token {
        Ok(TransferOutcome::Acknowledged)
    } else {
        Ok(TransferOutcome::UnexpectedReply(buf))
    }
}
