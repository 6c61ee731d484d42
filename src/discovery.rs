/* src/discovery.rs */

use crate::error::ConfigError;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Per-home subdirectory holding tenant `.json` files.
pub const CONFIG_FOLDER_NAME: &str = ".web-servers";

/// Where tenant configuration comes from.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// Candidate home directories. An error here is fatal to the load.
    async fn home_directories(&self) -> Result<Vec<PathBuf>, ConfigError>;

    /// Config files under one home, sorted by path.
    async fn config_files(&self, home: &Path) -> Result<Vec<PathBuf>, ConfigError>;

    async fn read_to_string(&self, path: &Path) -> Result<String, ConfigError>;

    async fn exists(&self, path: &Path) -> bool;
}

/// Walks `<root>/*/.web-servers/*.json` on the real filesystem.
#[derive(Debug, Clone)]
pub struct FsConfigSource {
    root: PathBuf,
}

impl FsConfigSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ConfigSource for FsConfigSource {
    async fn home_directories(&self) -> Result<Vec<PathBuf>, ConfigError> {
        let read_root = |source| ConfigError::ReadHomeRoot {
            path: self.root.clone(),
            source,
        };
        let mut entries = fs::read_dir(&self.root).await.map_err(read_root)?;
        let mut homes = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(read_root)? {
            // Only directories can be home folders.
            if entry.file_type().await.is_ok_and(|t| t.is_dir()) {
                homes.push(entry.path());
            }
        }
        homes.sort();
        Ok(homes)
    }

    async fn config_files(&self, home: &Path) -> Result<Vec<PathBuf>, ConfigError> {
        let folder = home.join(CONFIG_FOLDER_NAME);
        let read_folder = |source: io::Error| {
            if source.kind() == io::ErrorKind::NotFound {
                ConfigError::NoConfigFolder {
                    home: home.to_path_buf(),
                }
            } else {
                ConfigError::ReadConfigFolder {
                    home: home.to_path_buf(),
                    source,
                }
            }
        };

        let mut entries = fs::read_dir(&folder).await.map_err(read_folder)?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(read_folder)? {
            let path = entry.path();
            let is_file = entry.file_type().await.is_ok_and(|t| t.is_file());
            if is_file && path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    async fn read_to_string(&self, path: &Path) -> Result<String, ConfigError> {
        fs::read_to_string(path).await.map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                ConfigError::ConfigVanished {
                    path: path.to_path_buf(),
                }
            } else {
                ConfigError::ReadConfig {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })
    }

    async fn exists(&self, path: &Path) -> bool {
        fs::metadata(path).await.is_ok()
    }
}

/// A fixed in-memory listing, for exercising the loader without touching disk.
#[derive(Debug, Clone, Default)]
pub struct StaticConfigSource {
    homes: BTreeMap<PathBuf, Option<BTreeMap<String, String>>>,
    existing: BTreeSet<PathBuf>,
}

impl StaticConfigSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a home with a config folder holding `file_name` (contents verbatim).
    #[must_use]
    pub fn with_file(
        mut self,
        home: impl Into<PathBuf>,
        file_name: impl Into<String>,
        contents: impl Into<String>,
    ) -> Self {
        self.homes
            .entry(home.into())
            .or_insert_with(|| Some(BTreeMap::new()))
            .get_or_insert_with(BTreeMap::new)
            .insert(file_name.into(), contents.into());
        self
    }

    /// Adds a home that has no config folder at all.
    #[must_use]
    pub fn with_empty_home(mut self, home: impl Into<PathBuf>) -> Self {
        self.homes.entry(home.into()).or_insert(None);
        self
    }

    /// Marks a path as present for the existence checks.
    #[must_use]
    pub fn with_existing(mut self, path: impl Into<PathBuf>) -> Self {
        self.existing.insert(path.into());
        self
    }
}

#[async_trait]
impl ConfigSource for StaticConfigSource {
    async fn home_directories(&self) -> Result<Vec<PathBuf>, ConfigError> {
        Ok(self.homes.keys().cloned().collect())
    }

    async fn config_files(&self, home: &Path) -> Result<Vec<PathBuf>, ConfigError> {
        match self.homes.get(home) {
            Some(Some(files)) => {
                let folder = home.join(CONFIG_FOLDER_NAME);
                Ok(files
                    .keys()
                    .filter(|name| name.ends_with(".json"))
                    .map(|name| folder.join(name))
                    .collect())
            }
            _ => Err(ConfigError::NoConfigFolder {
                home: home.to_path_buf(),
            }),
        }
    }

    async fn read_to_string(&self, path: &Path) -> Result<String, ConfigError> {
        let vanished = || ConfigError::ConfigVanished {
            path: path.to_path_buf(),
        };
        let folder = path.parent().ok_or_else(vanished)?;
        let home = folder.parent().ok_or_else(vanished)?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(vanished)?;
        self.homes
            .get(home)
            .and_then(Option::as_ref)
            .and_then(|files| files.get(name))
            .cloned()
            .ok_or_else(vanished)
    }

    async fn exists(&self, path: &Path) -> bool {
        self.existing.contains(path)
    }
}
