//! Connection settings, session bookkeeping and reply values.

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::Serialize;
use std::time::Duration;

/// Standard FTP control port.
pub const DEFAULT_CONTROL_PORT: u16 = 21;

/// `TYPE` argument.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum TransferType {
    Ascii,
    #[default]
    Binary,
}

impl TransferType {
    pub(crate) fn command(self) -> &'static str {
        match self {
            TransferType::Ascii => "TYPE A",
            TransferType::Binary => "TYPE I",
        }
    }
}

/// How the data channel is opened. Only client-connects modes are offered;
/// the uploader runs behind NAT more often than not.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum DataChannelMode {
    /// `PASV`, IPv4 only.
    #[default]
    Passive,
    /// `EPSV` (RFC 2428), reuses the control host.
    ExtendedPassive,
}

/// Everything needed to open and log in one control connection.
#[derive(Debug, Clone)]
pub struct FtpConnectionConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub transfer_type: TransferType,
    pub data_channel_mode: DataChannelMode,
    /// TCP connect + greeting.
    pub connect_timeout: Duration,
    /// Each control-channel reply.
    pub command_timeout: Duration,
    /// Data connection establishment and each data read/write.
    pub data_timeout: Duration,
}

impl FtpConnectionConfig {
    pub fn new(host: impl Into<String>, username: impl Into<String>, password: SecretString) -> Self {
        Self {
            host: host.into(),
            username: username.into(),
            password,
            ..Self::default()
        }
    }

    /// `host:port` as used for the control connection.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for FtpConnectionConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_CONTROL_PORT,
            username: "anonymous".into(),
            password: SecretString::new("anonymous@".into()),
            transfer_type: TransferType::Binary,
            data_channel_mode: DataChannelMode::Passive,
            connect_timeout: Duration::from_secs(15),
            command_timeout: Duration::from_secs(30),
            data_timeout: Duration::from_secs(30),
        }
    }
}

/// What we know about a logged-in session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FtpSessionInfo {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub logged_in: bool,
    pub current_directory: Option<String>,
    pub server_banner: String,
    pub connected_at: DateTime<Utc>,
    pub transfer_type: Option<TransferType>,
    pub bytes_uploaded: u64,
}

/// One server reply; `lines` holds every line of a multi-line reply.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FtpResponse {
    pub code: u16,
    pub lines: Vec<String>,
}

impl FtpResponse {
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    /// Positive-preliminary reply (1xx).
    pub fn is_preliminary(&self) -> bool {
        (100..200).contains(&self.code)
    }

    /// Positive-completion reply (2xx).
    pub fn is_completion(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// Positive-intermediate reply (3xx).
    pub fn is_intermediate(&self) -> bool {
        (300..400).contains(&self.code)
    }
}
