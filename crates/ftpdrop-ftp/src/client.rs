//! One control connection and the commands an uploader needs.
//!
//! Lifecycle: `connect()` → `login()` → `set_type()` → `cwd()` →
//! transfers (`file_ops.rs`) → `quit()`.
//!
//! Each stage is a separate call so callers can tell a refused
//! connection from a rejected login or a missing directory.

use crate::connection;
use crate::error::{FtpError, FtpErrorKind, FtpResult};
use crate::protocol::FtpCodec;
use crate::transfer;
use crate::types::*;
use chrono::Utc;
use secrecy::ExposeSecret;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::time::timeout;

/// A connected FTP control session.
pub struct FtpClient {
    pub(crate) codec: FtpCodec,
    pub(crate) config: FtpConnectionConfig,
    pub info: FtpSessionInfo,
}

impl FtpClient {
    /// Open the control connection and read the greeting.
    pub async fn connect(config: FtpConnectionConfig) -> FtpResult<Self> {
        if config.host.trim().is_empty() {
            return Err(FtpErrorKind::InvalidConfig.err("Host must not be empty"));
        }

        let (codec, banner) = connection::connect(&config).await?;
        log::debug!("Connected to {}: {}", config.address(), banner.text());

        let info = FtpSessionInfo {
            host: config.host.clone(),
            port: config.port,
            username: config.username.clone(),
            logged_in: false,
            current_directory: None,
            server_banner: banner.text(),
            connected_at: Utc::now(),
            transfer_type: None,
            bytes_uploaded: 0,
        };

        Ok(Self { codec, config, info })
    }

    /// `USER` / `PASS` with the configured credentials.
    pub async fn login(&mut self) -> FtpResult<()> {
        let user_resp = self
            .codec
            .execute(&format!("USER {}", self.config.username))
            .await?;

        if user_resp.is_intermediate() {
            let pass_resp = self
                .codec
                .execute(&format!("PASS {}", self.config.password.expose_secret()))
                .await?;
            if !pass_resp.is_completion() {
                return Err(auth_error(pass_resp.code, &pass_resp.text()));
            }
        } else if !user_resp.is_completion() {
            return Err(auth_error(user_resp.code, &user_resp.text()));
        }

        self.info.logged_in = true;
        Ok(())
    }

    pub async fn set_type(&mut self, tt: TransferType) -> FtpResult<()> {
        if self.info.transfer_type == Some(tt) {
            return Ok(());
        }
        self.codec.expect_ok(tt.command()).await?;
        self.info.transfer_type = Some(tt);
        Ok(())
    }

    /// Current remote directory.
    pub async fn pwd(&mut self) -> FtpResult<String> {
        let resp = self.codec.expect_ok("PWD").await?;
        let dir = parse_pwd(&resp.text())?;
        self.info.current_directory = Some(dir.clone());
        Ok(dir)
    }

    /// Change into `path`.
    pub async fn cwd(&mut self, path: &str) -> FtpResult<()> {
        self.codec.expect_ok(&format!("CWD {}", path)).await?;
        self.info.current_directory = Some(path.to_string());
        Ok(())
    }

    pub async fn noop(&mut self) -> FtpResult<()> {
        self.codec.expect_ok("NOOP").await?;
        Ok(())
    }

    pub(crate) async fn open_data_channel(&mut self) -> FtpResult<TcpStream> {
        transfer::open_data_channel(
            &mut self.codec,
            self.config.data_channel_mode,
            &self.config.host,
            self.config.data_timeout,
        )
        .await
    }

    /// Send a transfer command after the data channel is open and require a
    /// 1xx (or, for fast servers, an immediate 2xx) reply.
    pub(crate) async fn start_transfer(&mut self, cmd: &str) -> FtpResult<FtpResponse> {
        let resp = self.codec.execute(cmd).await?;
        if !resp.is_preliminary() && !resp.is_completion() {
            return Err(FtpError::from_reply(resp.code, &resp.text()));
        }
        Ok(resp)
    }

    /// Read the transfer-complete reply (226/250).
    pub(crate) async fn finish_transfer(&mut self, started: &FtpResponse) -> FtpResult<()> {
        if started.is_completion() {
            return Ok(());
        }
        let done = self.codec.read_response().await?;
        if !done.is_completion() {
            return Err(FtpError::from_reply(done.code, &done.text()));
        }
        Ok(())
    }

    /// `NLST`: bare names in the current (or given) directory.
    pub async fn nlst(&mut self, path: Option<&str>) -> FtpResult<Vec<String>> {
        self.set_type(TransferType::Ascii).await?;
        let mut ds = self.open_data_channel().await?;
        let cmd = match path {
            Some(p) => format!("NLST {}", p),
            None => "NLST".to_string(),
        };
        let started = match self.start_transfer(&cmd).await {
            Ok(resp) => resp,
            // An empty directory is reported as 450/550 by some servers.
            Err(e) if e.code == Some(450) || e.kind == FtpErrorKind::NotFound => {
                return Ok(Vec::new())
            }
            Err(e) => return Err(e),
        };

        let mut buf = Vec::new();
        timeout(self.config.data_timeout, ds.read_to_end(&mut buf))
            .await
            .map_err(|_| FtpErrorKind::Timeout.err("NLST data read timed out"))??;
        drop(ds);
        self.finish_transfer(&started).await?;

        let text = String::from_utf8_lossy(&buf);
        Ok(text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }

    /// Gracefully close the session. Never fails: the socket is dropped
    /// with `self` regardless of what the server says.
    pub async fn quit(mut self) {
        match self.codec.execute("QUIT").await {
            Ok(resp) => log::debug!("QUIT: {}", resp.text()),
            Err(e) => log::debug!("QUIT to {} failed: {}", self.config.address(), e),
        }
        self.codec.shutdown().await;
    }

    pub fn config(&self) -> &FtpConnectionConfig {
        &self.config
    }
}

fn auth_error(code: u16, text: &str) -> FtpError {
    FtpErrorKind::AuthFailed.err(format!("Login failed: {}", text)).with_code(code)
}

/// Quoted path from a 257 reply.
fn parse_pwd(text: &str) -> FtpResult<String> {
    if let Some(start) = text.find('"') {
        if let Some(end) = text[start + 1..].find('"') {
            return Ok(text[start + 1..start + 1 + end].to_string());
        }
    }
    Err(FtpErrorKind::ProtocolError.err(format!("Cannot parse PWD: {}", text)))
}
