use std::env::current_exe;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::str;
use std::sync::{Arc, Mutex, PoisonError};
use directories_next::ProjectDirs;
use fd_lock::{RwLock, RwLockWriteGuard};
use log::{debug, info, warn};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::config::types::Config;
use crate::error::ConfigError;

// creates a path next to the executable with a .json extension
// this could be useful for usb sticks
fn get_portable_config_path() -> Option<PathBuf> {
    match current_exe() {
        Ok(mut path) => {
            // F:\ble-discovery.exe => F:\ble-discovery.json
            if !path.set_extension("json") {
                warn!("current exe has no filename: {}", path.to_string_lossy());
                return None
            }

            Some(path)
        },
        Err(err) => {
            warn!("failed to get current exe path: {:?}", err);
            None
        },
    }
}

// creates a path to ble-discovery.json in an os dependent standard directory, such as %AppData% on
// windows.
fn get_local_config_path() -> Option<PathBuf> {
    ProjectDirs::from("org", "ble-discovery", "ble-discovery").map(|dirs| {
        dirs.config_dir().join("ble-discovery.json")
    })
}

pub fn get_config_path() -> Result<PathBuf, ConfigError> {
    if let Some(path) = get_portable_config_path() {
        match std::fs::metadata(&path) {
            Ok(attr) if attr.is_file() => return Ok(path),
            Ok(_) => {},
            Err(err) => {
                debug!("Could not read metadata of: {}; Using local path instead. ({:?})", path.to_string_lossy(), err);
            },
        }
    }

    get_local_config_path().ok_or(ConfigError::NoConfigPath)
}

pub struct ConfigIOLocker {
    rw_lock: RwLock<std::fs::File>,
}

impl ConfigIOLocker {
    /// Takes an exclusive lock on the config file, so that only one instance drives the scanner.
    pub fn lock(&mut self) -> Result<RwLockWriteGuard<'_, std::fs::File>, ConfigError> {
        self.rw_lock.try_write().map_err(|source| ConfigError::CanNotLock { source })
    }
}

struct ConfigIOInner {
    file: std::fs::File,
    path: PathBuf,
}

#[derive(Clone)]
pub struct ConfigIO {
    inner: Arc<Mutex<ConfigIOInner>>,
}

impl ConfigIO {
    pub fn new_sync() -> Result<Self, ConfigError> {
        let path = get_config_path()?;
        Self::open_sync(&path)
    }

    pub fn open_sync(path: &Path) -> Result<Self, ConfigError> {
        info!("Using config file {}", path.to_string_lossy());

        if let Some(directory) = path.parent() {
            std::fs::create_dir_all(directory)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .truncate(false)
            .append(false)
            .create(true)
            .open(path)?;

        let inner = ConfigIOInner {
            file,
            path: path.to_path_buf(),
        };
        Ok(ConfigIO { inner: Arc::new(Mutex::new(inner)) })
    }

    pub fn path(&self) -> PathBuf {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).path.clone()
    }

    pub fn locker(&self) -> Result<ConfigIOLocker, ConfigError> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);

        Ok(ConfigIOLocker {
            rw_lock: RwLock::new(inner.file.try_clone()?),
        })
    }

    // The File returned from here should never be closed!
    fn get_file(&self) -> Result<File, ConfigError> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let file = inner.file.try_clone()?; // std File
        Ok(File::from_std(file)) // tokio File
    }

    /// Reads the config. An empty file (such as one just created) yields the defaults.
    pub async fn read(&self) -> Result<Config, ConfigError> {
        let mut file = self.get_file()?;
        debug!("Reading config file");

        let mut content = vec![];
        file.rewind().await?;
        file.read_to_end(&mut content).await?;

        if content.iter().all(u8::is_ascii_whitespace) {
            return Ok(Config::default());
        }

        let content = str::from_utf8(&content)?;
        let config: Config = serde_json::from_str(content)?;
        Ok(config)
    }

    /// Writes the default config into a file that is still empty, so there is something to edit.
    /// Returns false if the file already had content.
    pub async fn init_if_empty(&self) -> Result<bool, ConfigError> {
        let file = self.get_file()?;
        if file.metadata().await?.len() > 0 {
            return Ok(false);
        }

        self.save(&Config::default()).await?;
        info!("Wrote default config to {}", self.path().to_string_lossy());
        Ok(true)
    }

    pub async fn save(&self, config: &Config) -> Result<(), ConfigError> {
        let mut file = self.get_file()?;
        debug!("Saving config");

        let content = serde_json::to_string_pretty(config)?;
        file.rewind().await?;
        file.set_len(0).await?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn empty_file_reads_as_defaults() {
        let dir = tempdir().unwrap();
        let io = ConfigIO::open_sync(&dir.path().join("nested").join("config.json")).unwrap();

        assert_eq!(io.read().await.unwrap(), Config::default());
    }

    #[tokio::test]
    async fn save_then_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        let io = ConfigIO::open_sync(&path).unwrap();

        let mut config = Config::default();
        config.scan.report_delay_ms = 250;
        config.permission.platform_version = 31;
        io.save(&config).await.unwrap();
        io.save(&config).await.unwrap();

        assert_eq!(io.read().await.unwrap(), config);
        assert_eq!(io.path(), path);
    }

    #[tokio::test]
    async fn first_run_writes_defaults_once() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        let io = ConfigIO::open_sync(&path).unwrap();

        assert!(io.init_if_empty().await.unwrap());
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("\"serviceUuid\""));
        assert_eq!(io.read().await.unwrap(), Config::default());

        let mut config = Config::default();
        config.list.nearby_only = true;
        io.save(&config).await.unwrap();
        assert!(!io.init_if_empty().await.unwrap());
        assert_eq!(io.read().await.unwrap(), config);
    }

    #[tokio::test]
    async fn malformed_file_is_a_json_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = ConfigIO::open_sync(&path).unwrap().read().await.unwrap_err();
        assert!(matches!(err, ConfigError::JsonError { .. }));
    }
}
