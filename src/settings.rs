//! Persistent connection and folder settings.
//!
//! The file is a flat list of `KEY=VALUE` lines:
//!
//! ```text
//! HOSTNAME=ftp.example.com
//! USER=alice
//! PASSWORD=secret
//! SOURCE=/data/outbox
//! TARGET=/data/sent
//! DESTINATION=/incoming
//! PORT=21
//! ```
//!
//! `DESTINATION` is the remote upload directory. Relative `SOURCE`/`TARGET`
//! paths resolve against the store's base directory.

use crate::error::ConfigError;
use arc_swap::ArcSwap;
use ftpdrop_ftp::DEFAULT_CONTROL_PORT;
use secrecy::{ExposeSecret, SecretString};
use std::fmt::Write as _;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const SETTINGS_FILE_NAME: &str = "settings.ini";
pub const DEFAULT_SOURCE_DIR: &str = "source";
pub const DEFAULT_TARGET_DIR: &str = "target";
pub const DEFAULT_REMOTE_DIR: &str = "/";

const KEY_HOST: &str = "HOSTNAME";
const KEY_USER: &str = "USER";
const KEY_PASSWORD: &str = "PASSWORD";
const KEY_SOURCE: &str = "SOURCE";
const KEY_TARGET: &str = "TARGET";
const KEY_REMOTE_DIR: &str = "DESTINATION";
const KEY_PORT: &str = "PORT";

/// Connection parameters and folder paths.
#[derive(Debug, Clone)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: SecretString,
    /// Watched folder.
    pub source_dir: PathBuf,
    /// Archive folder for uploaded files.
    pub target_dir: PathBuf,
    /// Remote directory files are stored into.
    pub remote_dir: String,
}

impl Settings {
    /// First-run settings: no credentials, `source`/`target` under `base_dir`.
    pub fn defaults(base_dir: &Path) -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_CONTROL_PORT,
            user: String::new(),
            password: SecretString::new(String::new()),
            source_dir: base_dir.join(DEFAULT_SOURCE_DIR),
            target_dir: base_dir.join(DEFAULT_TARGET_DIR),
            remote_dir: DEFAULT_REMOTE_DIR.to_string(),
        }
    }

    /// Parse settings text. Bad lines are logged and skipped.
    pub fn parse(text: &str, base_dir: &Path) -> Self {
        let mut settings = Self::defaults(base_dir);

        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                let err = ConfigError::MalformedLine {
                    line: idx + 1,
                    content: line.to_string(),
                };
                log::warn!("Skipping settings entry: {}", err);
                continue;
            };
            let (key, value) = (key.trim(), value.trim());

            match key {
                KEY_HOST => settings.host = value.to_string(),
                KEY_USER => settings.user = value.to_string(),
                KEY_PASSWORD => settings.password = SecretString::new(value.to_string()),
                KEY_SOURCE if !value.is_empty() => settings.source_dir = base_dir.join(value),
                KEY_TARGET if !value.is_empty() => settings.target_dir = base_dir.join(value),
                KEY_SOURCE | KEY_TARGET => {}
                KEY_REMOTE_DIR if !value.is_empty() => settings.remote_dir = value.to_string(),
                KEY_REMOTE_DIR => {}
                KEY_PORT => match value.parse::<u16>() {
                    Ok(port) if port != 0 => settings.port = port,
                    _ => log::warn!(
                        "Ignoring invalid {} value {:?} on line {}, using {}",
                        KEY_PORT,
                        value,
                        idx + 1,
                        DEFAULT_CONTROL_PORT
                    ),
                },
                other => log::warn!("Ignoring unknown settings key {:?} on line {}", other, idx + 1),
            }
        }

        settings
    }

    /// Render to the on-disk format. Fails if any value cannot be stored
    /// on a single line.
    pub fn render(&self) -> Result<String, ConfigError> {
        let source = path_value(KEY_SOURCE, &self.source_dir)?;
        let target = path_value(KEY_TARGET, &self.target_dir)?;
        let port = self.port.to_string();
        let entries = [
            (KEY_HOST, self.host.as_str()),
            (KEY_USER, self.user.as_str()),
            (KEY_PASSWORD, self.password.expose_secret().as_str()),
            (KEY_SOURCE, source),
            (KEY_TARGET, target),
            (KEY_REMOTE_DIR, self.remote_dir.as_str()),
            (KEY_PORT, port.as_str()),
        ];

        let mut out = String::new();
        for (key, value) in entries {
            if value.contains(&['\r', '\n'][..]) {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    reason: "line breaks are not allowed".into(),
                });
            }
            let _ = writeln!(out, "{}={}", key, value);
        }
        Ok(out)
    }

    /// Create `source_dir` and `target_dir` if missing.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.source_dir)?;
        fs::create_dir_all(&self.target_dir)
    }
}

fn path_value<'a>(key: &str, path: &'a Path) -> Result<&'a str, ConfigError> {
    path.to_str().ok_or_else(|| ConfigError::InvalidValue {
        key: key.to_string(),
        reason: format!("{} is not valid UTF-8", path.display()),
    })
}

/// Loads, caches and saves [`Settings`].
pub struct SettingsStore {
    path: PathBuf,
    base_dir: PathBuf,
    current: ArcSwap<Settings>,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>, base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        Self {
            path: path.into(),
            current: ArcSwap::from_pointee(Settings::defaults(&base_dir)),
            base_dir,
        }
    }

    /// `settings.ini` in the process working directory.
    pub fn in_working_dir() -> Result<Self, ConfigError> {
        let cwd = std::env::current_dir().map_err(|e| ConfigError::io(".", e))?;
        Ok(Self::new(cwd.join(SETTINGS_FILE_NAME), cwd))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the settings file, writing a default one on first run, and make
    /// sure both local folders exist.
    pub fn load(&self) -> Result<Settings, ConfigError> {
        let settings = match fs::read_to_string(&self.path) {
            Ok(text) => Settings::parse(&text, &self.base_dir),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("No settings at {}, writing defaults", self.path.display());
                let defaults = Settings::defaults(&self.base_dir);
                self.write_atomic(&defaults.render()?)?;
                defaults
            }
            Err(e) => return Err(ConfigError::io(&self.path, e)),
        };

        settings
            .ensure_dirs()
            .map_err(|e| ConfigError::io(&settings.source_dir, e))?;

        log::debug!(
            "Loaded settings: host={} port={} user={} source={} target={} remote_dir={}",
            settings.host,
            settings.port,
            settings.user,
            settings.source_dir.display(),
            settings.target_dir.display(),
            settings.remote_dir
        );
        self.current.store(Arc::new(settings.clone()));
        Ok(settings)
    }

    /// Snapshot of the last loaded or saved settings.
    pub fn get(&self) -> Arc<Settings> {
        self.current.load_full()
    }

    /// Persist `settings`. Readers see either the old or the new file,
    /// never a partial one.
    pub fn save(&self, settings: &Settings) -> Result<(), ConfigError> {
        let text = settings.render()?;
        self.write_atomic(&text)?;
        self.current.store(Arc::new(settings.clone()));
        log::info!("Settings saved to {}", self.path.display());
        Ok(())
    }

    fn write_atomic(&self, text: &str) -> Result<(), ConfigError> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| SETTINGS_FILE_NAME.to_string());
        let tmp = dir.join(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4().simple()));

        let result = (|| {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(text.as_bytes())?;
            file.sync_all()?;
            fs::rename(&tmp, &self.path)
        })();

        if let Err(e) = result {
            let _ = fs::remove_file(&tmp);
            return Err(ConfigError::io(&self.path, e));
        }
        Ok(())
    }
}
