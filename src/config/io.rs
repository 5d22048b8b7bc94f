use std::env::current_exe;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use directories_next::ProjectDirs;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use serde_json;
use fd_lock::{RwLock, RwLockWriteGuard};
use log::{info, warn};
use std::fs::OpenOptions;
use std::str;

use crate::config::types::Config;
use crate::error::ConfigError;

// creates a path to bt-profile-manager.json in the same directory as the executable
fn get_portable_config_path() -> Option<PathBuf> {
    match current_exe() {
        Ok(mut path) => {
            // /opt/bt-profile-manager => /opt/bt-profile-manager.json
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

// creates a path in an os dependent standard directory, such as ~/.config on linux
fn get_local_config_path() -> Option<PathBuf> {
    ProjectDirs::from("org", "bt-profile-manager", "bt-profile-manager").map(|dirs| {
        dirs.config_dir().join("bt-profile-manager.json")
    })
}

fn get_config_path() -> Result<PathBuf, ConfigError> {
    if let Some(path) = get_portable_config_path() {
        match std::fs::metadata(&path) {
            Ok(attr) => {
                if attr.is_file() {
                    return Ok(path);
                }
            },
            Err(err) => {
                info!("No portable config at {}; Using local path instead. ({})", path.to_string_lossy(), err);
            },
        }
    }

    get_local_config_path().ok_or(ConfigError::NoConfigPath)
}

pub struct ConfigIOLocker {
    rw_lock: RwLock<std::fs::File>,
}

impl ConfigIOLocker {
    /// Exclusive lock on the config file; held for as long as the guard lives.
    pub fn lock(&mut self) -> Result<RwLockWriteGuard<std::fs::File>, ConfigError> {
        self.rw_lock.try_write().map_err(|source| ConfigError::CanNotLock { source })
    }
}

struct ConfigIOInner {
    path: PathBuf,
    file: std::fs::File,
}

#[derive(Clone)]
pub struct ConfigIO {
    inner: Arc<Mutex<ConfigIOInner>>,
}

impl ConfigIO {
    /// Opens (creating if needed) `path`, or the default config location when `None`.
    pub fn new_sync(path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => path,
            None => get_config_path()?,
        };
        info!("Using config file {}", path.to_string_lossy());

        if let Some(directory) = path.parent().filter(|directory| !directory.as_os_str().is_empty()) {
            std::fs::create_dir_all(directory)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .truncate(false)
            .append(false)
            .create(true)
            .open(&path)?;

        let inner = ConfigIOInner {
            path,
            file,
        };
        Ok(ConfigIO { inner: Arc::new(Mutex::new(inner)) })
    }

    pub fn path(&self) -> PathBuf {
        let inner = self.inner.lock().expect("Failed to lock ConfigIO inner");
        inner.path.clone()
    }

    /// Only one instance of the service should own a config file at a time.
    pub fn locker(&self) -> Result<ConfigIOLocker, ConfigError> {
        let inner = self.inner.lock().expect("Failed to lock ConfigIO inner");

        Ok(ConfigIOLocker {
            rw_lock: RwLock::new(inner.file.try_clone()?),
        })
    }

    // The File returned from here should never be closed!
    fn get_file(&self) -> Result<File, ConfigError> {
        let inner = self.inner.lock().expect("Failed to lock ConfigIO inner");
        let file = inner.file.try_clone()?; // std File
        Ok(File::from_std(file)) // tokio File
    }

    /// An empty file reads as the default config.
    pub async fn read(&self) -> Result<Config, ConfigError> {
        let mut file = self.get_file()?;
        info!("Reading config file");

        let mut content = vec![];
        file.rewind().await?;
        file.read_to_end(&mut content).await?;

        if content.is_empty() {
            return Ok(Config::default());
        }

        let content = str::from_utf8(&content)?;
        Ok(serde_json::from_str(content)?)
    }

    pub async fn save(&self, config: &Config) -> Result<(), ConfigError> {
        let mut file = self.get_file()?;
        info!("Saving config");

        let content = serde_json::to_string_pretty(config)?;
        file.rewind().await?;
        file.set_len(0).await?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn scratch_path(name: &str) -> PathBuf {
        let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
        std::env::temp_dir().join(format!("bt-profile-manager-{}-{}-{}.json", name, std::process::id(), nanos))
    }

    #[tokio::test]
    async fn test_empty_file_reads_as_default() {
        let path = scratch_path("empty");
        let io = ConfigIO::new_sync(Some(path.clone())).unwrap();

        assert_eq!(io.read().await.unwrap(), Config::default());
        assert_eq!(io.path(), path);

        std::fs::remove_file(path).unwrap();
    }

    #[tokio::test]
    async fn test_save_then_read() {
        let path = scratch_path("save");
        let io = ConfigIO::new_sync(Some(path.clone())).unwrap();
        let config = Config { connect_timeout_ms: 1234, max_connected_devices: Some(3), ..Config::default() };

        io.save(&config).await.unwrap();

        assert_eq!(io.read().await.unwrap(), config);
        let reopened = ConfigIO::new_sync(Some(path.clone())).unwrap();
        assert_eq!(reopened.read().await.unwrap(), config);

        std::fs::remove_file(path).unwrap();
    }

    #[tokio::test]
    async fn test_second_lock_fails() {
        let path = scratch_path("lock");
        let io = ConfigIO::new_sync(Some(path.clone())).unwrap();
        let mut first = io.locker().unwrap();
        let _guard = first.lock().unwrap();

        let other = ConfigIO::new_sync(Some(path.clone())).unwrap();
        let mut second = other.locker().unwrap();

        assert!(matches!(second.lock(), Err(ConfigError::CanNotLock { .. })));

        std::fs::remove_file(path).unwrap();
    }
}
