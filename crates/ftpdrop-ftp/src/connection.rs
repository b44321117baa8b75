//! TCP connect and greeting for the control connection.
//!
//! Applies the connect timeout from `FtpConnectionConfig` and consumes the
//! server greeting, which must be a 2xx reply (a `120` "ready in n
//! minutes" is followed by the real greeting).

use crate::error::{FtpErrorKind, FtpResult};
use crate::protocol::FtpCodec;
use crate::types::{FtpConnectionConfig, FtpResponse};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Establish the control connection and return a ready-to-use codec
/// **plus** the server welcome banner.
pub async fn connect(config: &FtpConnectionConfig) -> FtpResult<(FtpCodec, FtpResponse)> {
    let addr = config.address();

    let tcp = timeout(config.connect_timeout, TcpStream::connect(&addr))
        .await
        .map_err(|_| FtpErrorKind::Timeout.err(format!("TCP connect to {} timed out", addr)))?
        .map_err(|e| FtpErrorKind::ConnectionFailed.err(format!("TCP connect to {}: {}", addr, e)))?;

    tcp.set_nodelay(true).ok();

    let mut codec = FtpCodec::new(tcp, config.command_timeout);
    let banner = timeout(config.connect_timeout, read_greeting(&mut codec))
        .await
        .map_err(|_| FtpErrorKind::Timeout.err(format!("No greeting from {}", addr)))??;

    Ok((codec, banner))
}

async fn read_greeting(codec: &mut FtpCodec) -> FtpResult<FtpResponse> {
    let mut banner = codec.read_response().await?;
    while banner.code == 120 {
        banner = codec.read_response().await?;
    }
    if !banner.is_completion() {
        return Err(FtpErrorKind::ConnectionFailed.err(format!(
            "Server refused session: {}",
            banner.text()
        ))
        .with_code(banner.code));
    }
    Ok(banner)
}
