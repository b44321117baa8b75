//! Control-channel line codec: CRLF-terminated commands out, numbered
//! replies in (RFC 959 §4.2, including `NNN-` continuation lines).
//!
//! The codec is stream-agnostic so it can run over a `TcpStream` or an
//! in-memory duplex in tests.

use crate::error::{FtpError, FtpErrorKind, FtpResult};
use crate::types::FtpResponse;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::time::timeout;

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Reader and writer halves of one control connection.
pub struct FtpCodec {
    reader: BufReader<BoxedReader>,
    writer: BoxedWriter,
    reply_timeout: Duration,
}

impl FtpCodec {
    /// Create a codec over any bidirectional byte stream.
    pub fn new<S>(stream: S, reply_timeout: Duration) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (rd, wr) = tokio::io::split(stream);
        Self {
            reader: BufReader::new(Box::new(rd)),
            writer: Box::new(wr),
            reply_timeout,
        }
    }

    /// Write `cmd` followed by CRLF. Embedded line breaks are refused.
    pub async fn send_command(&mut self, cmd: &str) -> FtpResult<()> {
        if cmd.contains(&['\r', '\n'][..]) {
            return Err(FtpErrorKind::InvalidConfig.err(
                "FTP command arguments must not contain CR or LF",
            ));
        }
        let line = format!("{}\r\n", cmd);
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;
        log::trace!(">>> {}", redact(cmd));
        Ok(())
    }

    /// Next raw line, CRLF included.
    async fn read_line_raw(&mut self) -> FtpResult<String> {
        let mut buf = String::new();
        let n = timeout(self.reply_timeout, self.reader.read_line(&mut buf))
            .await
            .map_err(|_| {
                FtpErrorKind::Timeout.err(format!(
                    "No reply from server within {}s",
                    self.reply_timeout.as_secs()
                ))
            })??;
        if n == 0 {
            return Err(FtpErrorKind::Disconnected.err("Server closed connection"));
        }
        Ok(buf)
    }

    /// Read one reply. A first line of `NNN-` keeps reading until a line
    /// starting `NNN ` with the same code.
    pub async fn read_response(&mut self) -> FtpResult<FtpResponse> {
        let first = self.read_line_raw().await?;
        let first_trimmed = first.trim_end_matches(&['\r', '\n'][..]);
        let code = parse_code(first_trimmed)?;
        let mut lines = vec![first_trimmed.to_string()];

        // "NNN-" means more lines follow until "NNN " is seen.
        if first_trimmed.as_bytes().get(3) == Some(&b'-') {
            let terminator = format!("{} ", code);
            loop {
                let next = self.read_line_raw().await?;
                let next_trimmed = next.trim_end_matches(&['\r', '\n'][..]);
                lines.push(next_trimmed.to_string());
                if next_trimmed.starts_with(&terminator) || next_trimmed == code.to_string() {
                    break;
                }
            }
        }

        let resp = FtpResponse { code, lines };
        log::trace!("<<< {}", resp.lines.last().map(String::as_str).unwrap_or(""));
        Ok(resp)
    }

    /// Send a command and return the response.
    pub async fn execute(&mut self, cmd: &str) -> FtpResult<FtpResponse> {
        self.send_command(cmd).await?;
        self.read_response().await
    }

    /// Send a command and expect a positive-completion (2xx) reply.
    pub async fn expect_ok(&mut self, cmd: &str) -> FtpResult<FtpResponse> {
        let resp = self.execute(cmd).await?;
        if !resp.is_completion() {
            return Err(FtpError::from_reply(resp.code, &resp.text()));
        }
        Ok(resp)
    }

    /// Best-effort shutdown of the write half.
    pub async fn shutdown(&mut self) {
        let _ = self.writer.shutdown().await;
    }
}

/// Keep credentials out of trace output.
fn redact(cmd: &str) -> &str {
    if cmd.get(..5).is_some_and(|verb| verb.eq_ignore_ascii_case("PASS ")) {
        "PASS ****"
    } else {
        cmd
    }
}

/// Parse the 3-digit reply code from the start of a line.
fn parse_code(line: &str) -> FtpResult<u16> {
    let digits = line
        .get(..3)
        .filter(|d| d.bytes().all(|b| b.is_ascii_digit()))
        .ok_or_else(|| FtpErrorKind::ProtocolError.err(format!("Invalid reply: '{}'", line)))?;
    digits
        .parse::<u16>()
        .map_err(|_| FtpErrorKind::ProtocolError.err(format!("Invalid reply code in: '{}'", line)))
}
