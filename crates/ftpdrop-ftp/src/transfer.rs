//! Passive data connections.
//!
//! Two client-connects modes (RFC 959 + RFC 2428):
//! - **PASV**: server opens an IPv4 port, client connects
//! - **EPSV**: extended passive, client connects to the control host

use crate::error::{FtpErrorKind, FtpResult};
use crate::protocol::FtpCodec;
use crate::types::DataChannelMode;
use lazy_static::lazy_static;
use regex::Regex;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};

lazy_static! {
    static ref PASV_RE: Regex =
        Regex::new(r"(\d{1,3}),(\d{1,3}),(\d{1,3}),(\d{1,3}),(\d{1,3}),(\d{1,3})")
            .expect("PASV pattern is valid");
    static ref EPSV_RE: Regex =
        Regex::new(r"\((.)(.)(.)(\d+)(.)\)").expect("EPSV pattern is valid");
}

/// Where a passive data connection should go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataTarget {
    Addr(SocketAddr),
    /// Same host as the control connection.
    ControlHost(u16),
}

/// Ask the server for a data port and connect to it.
///
/// `host` is the control-connection host; it is used for EPSV and when a
/// PASV reply advertises an unroutable address.
pub async fn open_data_channel(
    codec: &mut FtpCodec,
    mode: DataChannelMode,
    host: &str,
    data_timeout: Duration,
) -> FtpResult<TcpStream> {
    let target = match mode {
        DataChannelMode::Passive => {
            let resp = codec.expect_ok("PASV").await?;
            parse_pasv_response(&resp.text())?
        }
        DataChannelMode::ExtendedPassive => {
            let resp = codec.expect_ok("EPSV").await?;
            DataTarget::ControlHost(parse_epsv_response(&resp.text())?)
        }
    };

    let addr = match target {
        DataTarget::Addr(addr) => addr.to_string(),
        DataTarget::ControlHost(port) => format!("{}:{}", host, port),
    };
    log::debug!("Opening data connection to {}", addr);

    let tcp = timeout(data_timeout, TcpStream::connect(&addr))
        .await
        .map_err(|_| FtpErrorKind::DataChannelFailed.err(format!("Data connect to {} timed out", addr)))?
        .map_err(|e| FtpErrorKind::DataChannelFailed.err(format!("Data connect to {}: {}", addr, e)))?;
    tcp.set_nodelay(true).ok();
    Ok(tcp)
}

/// Parse `h1,h2,h3,h4,p1,p2` from a 227 response.
///
/// Format: `227 Entering Passive Mode (h1,h2,h3,h4,p1,p2)`; some servers
/// omit the parentheses. An advertised `0.0.0.0` maps to the control host.
pub fn parse_pasv_response(text: &str) -> FtpResult<DataTarget> {
    let caps = PASV_RE
        .captures(text)
        .ok_or_else(|| FtpErrorKind::ProtocolError.err(format!("Cannot parse PASV: {}", text)))?;

    let nums = (1..=6)
        .map(|i| {
            caps[i]
                .parse::<u8>()
                .map_err(|_| FtpErrorKind::ProtocolError.err("PASV number out of range"))
        })
        .collect::<FtpResult<Vec<u8>>>()?;

    let ip = Ipv4Addr::new(nums[0], nums[1], nums[2], nums[3]);
    let port = u16::from(nums[4]) * 256 + u16::from(nums[5]);
    if ip.is_unspecified() {
        return Ok(DataTarget::ControlHost(port));
    }
    Ok(DataTarget::Addr(SocketAddr::new(IpAddr::V4(ip), port)))
}

/// Parse the port out of a 229 response.
///
/// Format: `229 Entering Extended Passive Mode (|||port|)`; the delimiter
/// may be any printable character but must be the same four times.
pub fn parse_epsv_response(text: &str) -> FtpResult<u16> {
    let caps = EPSV_RE
        .captures(text)
        .ok_or_else(|| FtpErrorKind::ProtocolError.err(format!("Cannot parse EPSV: {}", text)))?;
    let delim = &caps[1];
    if &caps[2] != delim || &caps[3] != delim || &caps[5] != delim {
        return Err(FtpErrorKind::ProtocolError.err(format!("Bad EPSV delimiters: {}", text)));
    }
    caps[4]
        .parse::<u16>()
        .map_err(|_| FtpErrorKind::ProtocolError.err("EPSV port out of range"))
}
