use serde::Serialize;
use thiserror::Error;

/// What went wrong, coarse enough for callers to branch on.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum FtpErrorKind {
    /// DNS, TCP connect, or a greeting that was not 220.
    ConnectionFailed,
    AuthFailed,
    /// Negative reply with no more specific meaning, including 552 (storage
    /// allocation exceeded) and 553 (name not allowed).
    CommandRejected,
    /// PASV/EPSV data connection could not be opened.
    DataChannelFailed,
    TransferFailed,
    /// Reply the client could not make sense of.
    ProtocolError,
    IoError,
    Timeout,
    /// Control connection went away (421, reset, EOF).
    Disconnected,
    PermissionDenied,
    NotFound,
    InvalidConfig,
}

impl FtpErrorKind {
    /// Build an error of this kind.
    pub fn err(self, message: impl Into<String>) -> FtpError {
        FtpError {
            kind: self,
            message: message.into(),
            code: None,
        }
    }

    fn from_reply_text(code: u16, text: &str) -> Self {
        match code {
            421 => Self::Disconnected,
            425 | 426 => Self::DataChannelFailed,
            430 | 530 | 532 => Self::AuthFailed,
            451 | 452 => Self::TransferFailed,
            450 | 550 => {
                let text = text.to_ascii_lowercase();
                let mentions = |words: &[&str]| words.iter().any(|w| text.contains(w));
                if mentions(&["permission", "denied"]) {
                    Self::PermissionDenied
                } else if mentions(&["not found", "no such"]) {
                    Self::NotFound
                } else {
                    Self::CommandRejected
                }
            }
            400..=599 => Self::CommandRejected,
            _ => Self::ProtocolError,
        }
    }
}

#[derive(Debug, Clone, Serialize, Error)]
#[serde(rename_all = "camelCase")]
#[error("{message} ({kind:?}{})", .code.map(|c| format!(", reply {}", c)).unwrap_or_default())]
pub struct FtpError {
    pub kind: FtpErrorKind,
    pub message: String,
    /// Server reply code, when the error came from a reply.
    pub code: Option<u16>,
}

pub type FtpResult<T> = Result<T, FtpError>;

impl FtpError {
    /// Error for a negative (or unexpected) server reply.
    pub fn from_reply(code: u16, text: &str) -> Self {
        FtpErrorKind::from_reply_text(code, text)
            .err(text)
            .with_code(code)
    }

    pub fn with_code(mut self, code: u16) -> Self {
        self.code = Some(code);
        self
    }

    /// Whether a new session might get further than this one did.
    pub fn is_transient(&self) -> bool {
        use FtpErrorKind::*;
        matches!(
            self.kind,
            ConnectionFailed | DataChannelFailed | TransferFailed | Timeout | Disconnected | IoError
        )
    }
}

impl From<std::io::Error> for FtpError {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind as Io;
        let kind = match e.kind() {
            Io::TimedOut => FtpErrorKind::Timeout,
            Io::ConnectionReset | Io::ConnectionAborted | Io::BrokenPipe | Io::UnexpectedEof => {
                FtpErrorKind::Disconnected
            }
            _ => FtpErrorKind::IoError,
        };
        kind.err(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_refusal_is_permanent() {
        let e = FtpError::from_reply(530, "530 Login incorrect.");
        assert_eq!(e.kind, FtpErrorKind::AuthFailed);
        assert_eq!(e.code, Some(530));
        assert!(!e.is_transient());
    }

    #[test]
    fn test_550_is_split_on_reply_text() {
        let kind = |text: &str| FtpError::from_reply(550, text).kind;
        assert_eq!(kind("550 Permission denied"), FtpErrorKind::PermissionDenied);
        assert_eq!(kind("550 No such file or directory"), FtpErrorKind::NotFound);
        assert_eq!(kind("550 Failed to change directory"), FtpErrorKind::CommandRejected);
    }

    #[test]
    fn test_aborted_transfer_is_transient() {
        let e = FtpError::from_reply(426, "426 Connection closed; transfer aborted.");
        assert_eq!(e.kind, FtpErrorKind::DataChannelFailed);
        assert!(e.is_transient());
        assert!(FtpError::from_reply(451, "451 Local error").is_transient());
    }

    #[test]
    fn test_display() {
        let e = FtpError::from_reply(552, "552 Quota exceeded");
        assert_eq!(e.to_string(), "552 Quota exceeded (CommandRejected, reply 552)");
        assert!(!e.is_transient());
        assert_eq!(FtpErrorKind::Timeout.err("connect").to_string(), "connect (Timeout)");
    }

    #[test]
    fn test_socket_reset_is_disconnect() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert_eq!(FtpError::from(io).kind, FtpErrorKind::Disconnected);
    }
}
