//! One-shot FTP uploads.
//!
//! Every upload opens its own control connection, stores one file and
//! closes the session again. Nothing is pooled between jobs.

use crate::error::UploadError;
use crate::settings::Settings;
use async_trait::async_trait;
use ftpdrop_ftp::{DataChannelMode, FtpClient, FtpConnectionConfig, TransferType};
use std::path::Path;
use std::sync::Arc;

/// Stores a local file on the remote side.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FileUploader: Send + Sync {
    /// Upload `local_path` as `remote_name`; returns the number of bytes
    /// the server acknowledged.
    async fn upload(&self, local_path: &Path, remote_name: &str) -> Result<u64, UploadError>;
}

/// Builds the uploader for a settings snapshot. Called on every pipeline
/// start so new credentials take effect on restart.
pub type UploaderFactory = Arc<dyn Fn(&Settings) -> Arc<dyn FileUploader> + Send + Sync>;

/// Factory producing [`FtpUploader`]s with the given data-channel mode.
pub fn ftp_uploader_factory(mode: DataChannelMode) -> UploaderFactory {
    Arc::new(move |settings: &Settings| {
        Arc::new(FtpUploader::from_settings(settings).with_data_channel_mode(mode))
            as Arc<dyn FileUploader>
    })
}

/// Plain-FTP uploader bound to one set of credentials.
#[derive(Debug, Clone)]
pub struct FtpUploader {
    config: FtpConnectionConfig,
    remote_dir: String,
}

impl FtpUploader {
    pub fn from_settings(settings: &Settings) -> Self {
        let mut config = FtpConnectionConfig::new(
            settings.host.clone(),
            settings.user.clone(),
            settings.password.clone(),
        );
        config.port = settings.port;
        config.transfer_type = TransferType::Binary;
        Self {
            config,
            remote_dir: settings.remote_dir.clone(),
        }
    }

    pub fn with_data_channel_mode(mut self, mode: DataChannelMode) -> Self {
        self.config.data_channel_mode = mode;
        self
    }

    pub fn config_mut(&mut self) -> &mut FtpConnectionConfig {
        &mut self.config
    }

    /// Connect, log in, list the remote directory and disconnect.
    pub async fn test_connection(&self) -> Result<Vec<String>, UploadError> {
        let mut client = self.open_session().await?;
        let result: Result<Vec<String>, UploadError> = async {
            if !self.remote_dir.is_empty() {
                client
                    .cwd(&self.remote_dir)
                    .await
                    .map_err(|e| UploadError::ChangeDirectory(e.to_string()))?;
            }
            client.nlst(None).await.map_err(UploadError::transfer)
        }
        .await;
        client.quit().await;
        result
    }

    async fn open_session(&self) -> Result<FtpClient, UploadError> {
        log::debug!(
            "FTP session to {} as {:?}, remote dir {:?}",
            self.config.address(),
            self.config.username,
            self.remote_dir
        );
        let mut client = FtpClient::connect(self.config.clone())
            .await
            .map_err(UploadError::connect)?;
        if let Err(e) = client.login().await {
            client.quit().await;
            return Err(UploadError::login(e));
        }
        Ok(client)
    }
}

#[async_trait]
impl FileUploader for FtpUploader {
    async fn upload(&self, local_path: &Path, remote_name: &str) -> Result<u64, UploadError> {
        let file = tokio::fs::File::open(local_path)
            .await
            .map_err(|e| UploadError::LocalFile(format!("{}: {}", local_path.display(), e)))?;

        let mut client = self.open_session().await?;
        let result: Result<u64, UploadError> = async {
            client
                .set_type(TransferType::Binary)
                .await
                .map_err(UploadError::transfer)?;
            if !self.remote_dir.is_empty() {
                client
                    .cwd(&self.remote_dir)
                    .await
                    .map_err(|e| UploadError::ChangeDirectory(e.to_string()))?;
            }
            client
                .store(remote_name, file)
                .await
                .map_err(UploadError::transfer)
        }
        .await;
        client.quit().await;

        match &result {
            Ok(bytes) => log::info!(
                "Uploaded {} to {}:{}/{} ({} bytes)",
                local_path.display(),
                self.config.host,
                self.remote_dir.trim_end_matches('/'),
                remote_name,
                bytes
            ),
            Err(e) => log::warn!("Upload of {} failed: {}", local_path.display(), e),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ftpdrop_ftp::testing::FakeFtpServer;
    use secrecy::SecretString;
    use std::time::Duration;

    fn settings_for(server: &FakeFtpServer, password: &str) -> Settings {
        let mut s = Settings::defaults(Path::new("/unused"));
        s.host = server.host();
        s.port = server.port();
        s.user = "user".into();
        s.password = SecretString::new(password.into());
        s
    }

    #[tokio::test]
    async fn test_upload_stores_file_in_remote_dir() {
        let server = FakeFtpServer::start("user", "pw").await.unwrap();
        server.add_dir("/incoming");
        let mut settings = settings_for(&server, "pw");
        settings.remote_dir = "/incoming".into();

        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("a.bin");
        std::fs::write(&local, b"\x00\x01binary\r\n").unwrap();

        let uploader = FtpUploader::from_settings(&settings);
        let n = uploader.upload(&local, "a.bin").await.unwrap();
        assert_eq!(n, 10);
        assert_eq!(server.file("/incoming/a.bin").unwrap(), b"\x00\x01binary\r\n");
        assert!(local.exists());
    }

    #[tokio::test]
    async fn test_upload_over_epsv() {
        let server = FakeFtpServer::start("user", "pw").await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("e.txt");
        std::fs::write(&local, b"epsv").unwrap();

        let uploader = FtpUploader::from_settings(&settings_for(&server, "pw"))
            .with_data_channel_mode(DataChannelMode::ExtendedPassive);
        uploader.upload(&local, "e.txt").await.unwrap();
        assert_eq!(server.file("/e.txt").unwrap(), b"epsv");
    }

    #[tokio::test]
    async fn test_wrong_password_is_auth_error() {
        let server = FakeFtpServer::start("user", "pw").await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("x");
        std::fs::write(&local, b"x").unwrap();

        let err = FtpUploader::from_settings(&settings_for(&server, "nope"))
            .upload(&local, "x")
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Auth(_)), "{:?}", err);
        assert_eq!(server.stor_attempts(), 0);
    }

    #[tokio::test]
    async fn test_missing_remote_dir_is_change_directory_error() {
        let server = FakeFtpServer::start("user", "pw").await.unwrap();
        let mut settings = settings_for(&server, "pw");
        settings.remote_dir = "/missing".into();
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("x");
        std::fs::write(&local, b"x").unwrap();

        let err = FtpUploader::from_settings(&settings)
            .upload(&local, "x")
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::ChangeDirectory(_)), "{:?}", err);
    }

    #[tokio::test]
    async fn test_rejected_store_is_transfer_error() {
        let server = FakeFtpServer::start("user", "pw").await.unwrap();
        server.fail_next_stores(1);
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("x");
        std::fs::write(&local, b"x").unwrap();

        let err = FtpUploader::from_settings(&settings_for(&server, "pw"))
            .upload(&local, "x")
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Transfer(_)), "{:?}", err);
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_refused_store_is_not_retryable() {
        let server = FakeFtpServer::start("user", "pw").await.unwrap();
        server.refuse_next_stores(1);
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("locked.txt");
        std::fs::write(&local, b"x").unwrap();

        let err = FtpUploader::from_settings(&settings_for(&server, "pw"))
            .upload(&local, "locked.txt")
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Rejected(_)), "{:?}", err);
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_missing_local_file_never_connects() {
        let server = FakeFtpServer::start("user", "pw").await.unwrap();
        let err = FtpUploader::from_settings(&settings_for(&server, "pw"))
            .upload(Path::new("/definitely/not/here"), "x")
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::LocalFile(_)));
        assert_eq!(server.sessions(), 0);
    }

    #[tokio::test]
    async fn test_unreachable_host_is_connect_error() {
        // Bind then drop to get a port nobody listens on.
        let port = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let mut settings = Settings::defaults(Path::new("/unused"));
        settings.host = "127.0.0.1".into();
        settings.port = port;
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("x");
        std::fs::write(&local, b"x").unwrap();

        let mut uploader = FtpUploader::from_settings(&settings);
        uploader.config_mut().connect_timeout = Duration::from_secs(2);
        let err = uploader.upload(&local, "x").await.unwrap_err();
        assert!(matches!(err, UploadError::Connect(_)), "{:?}", err);
    }

    #[tokio::test]
    async fn test_connection_lists_remote_dir() {
        let server = FakeFtpServer::start("user", "pw").await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("listed.txt");
        std::fs::write(&local, b"l").unwrap();

        let uploader = FtpUploader::from_settings(&settings_for(&server, "pw"));
        uploader.upload(&local, "listed.txt").await.unwrap();
        let names = uploader.test_connection().await.unwrap();
        assert_eq!(names, vec!["listed.txt".to_string()]);
    }
}
