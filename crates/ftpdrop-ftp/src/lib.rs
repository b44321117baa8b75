//! # ftpdrop-ftp
//!
//! Plain FTP client for one-shot uploads.
//!
//! A small, fully asynchronous implementation of the parts of RFC 959
//! (plus RFC 2428 EPSV) an upload job needs.
//!
//! Architecture:
//! - `types`: config, session info, reply type
//! - `error`: FTP-specific error type
//! - `protocol`: low-level command/response codec
//! - `connection`: TCP connect + greeting
//! - `client`: stateful client (login, TYPE, CWD, NLST, QUIT)
//! - `transfer`: passive data channels (PASV/EPSV)
//! - `file_ops`: STOR
//! - `testing`: scripted server (feature `test-server`)

pub mod types;
pub mod error;
pub mod protocol;
pub mod connection;
pub mod client;
pub mod transfer;
pub mod file_ops;

#[cfg(any(test, feature = "test-server"))]
pub mod testing;

pub use client::FtpClient;
pub use error::{FtpError, FtpErrorKind, FtpResult};
pub use types::*;
