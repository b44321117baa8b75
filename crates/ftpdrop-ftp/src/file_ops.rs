//! File-level operations: binary upload (STOR).

use crate::client::FtpClient;
use crate::error::{FtpErrorKind, FtpResult};
use crate::types::TransferType;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;

/// Chunk size for streaming transfers (64 KiB).
const CHUNK: usize = 65_536;

impl FtpClient {
    /// Stream `source` to the server as a binary `STOR`. Returns the number
    /// of bytes sent once the server has confirmed the transfer.
    pub async fn store<R>(&mut self, remote_name: &str, mut source: R) -> FtpResult<u64>
    where
        R: AsyncRead + Unpin,
    {
        if remote_name.is_empty() {
            return Err(FtpErrorKind::InvalidConfig.err("Remote name must not be empty"));
        }
        self.set_type(TransferType::Binary).await?;

        let mut ds = self.open_data_channel().await?;
        let started = self.start_transfer(&format!("STOR {}", remote_name)).await?;

        let clock = Instant::now();
        let data_timeout = self.config.data_timeout;
        let mut sent: u64 = 0;
        let mut buf = vec![0u8; CHUNK];
        loop {
            let n = source.read(&mut buf).await.map_err(|e| {
                FtpErrorKind::IoError.err(format!("Reading upload source failed: {}", e))
            })?;
            if n == 0 {
                break;
            }
            timeout(data_timeout, ds.write_all(&buf[..n]))
                .await
                .map_err(|_| FtpErrorKind::Timeout.err("Data channel write timed out"))?
                .map_err(|e| FtpErrorKind::TransferFailed.err(format!("Data channel write: {}", e)))?;
            sent += n as u64;
        }
        ds.flush().await?;
        // Closing the data connection is what marks end-of-file for STOR.
        ds.shutdown().await?;
        drop(ds);

        self.finish_transfer(&started).await?;

        self.info.bytes_uploaded += sent;
        log::debug!(
            "STOR {} complete: {} bytes in {} ms",
            remote_name,
            sent,
            clock.elapsed().as_millis()
        );
        Ok(sent)
    }
}
