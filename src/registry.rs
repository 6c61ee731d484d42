/* src/registry.rs */

use crate::discovery::ConfigSource;
use crate::error::ConfigError;
use crate::models::{ConfigFile, HostConfig};
use crate::validation;
use fancy_log::{LogLevel, log};
use futures::future::join_all;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::path::{Path, PathBuf};

/// The set of tenants served by this process.
///
/// Built once at startup and never mutated afterwards; share it behind an `Arc`.
#[derive(Debug, Default)]
pub struct Registry {
    files: Vec<ConfigFile>,
    index: HashMap<String, usize>,
}

impl Registry {
    /// Builds a registry, keeping the first file (by config path) for each
    /// host domain. Rejected duplicates are logged.
    pub fn from_files(files: impl IntoIterator<Item = ConfigFile>) -> Self {
        let (registry, rejected) = Self::build(files);
        for err in rejected {
            log(LogLevel::Warn, &format!("Duplicate host skipped: {err}"));
        }
        registry
    }

    /// Like `from_files`, but hands back the rejected duplicates.
    pub fn build(files: impl IntoIterator<Item = ConfigFile>) -> (Self, Vec<ConfigError>) {
        let mut files: Vec<ConfigFile> = files.into_iter().collect();
        files.sort_by(|a, b| a.config_path.cmp(&b.config_path));

        let mut registry = Self::default();
        let mut rejected = Vec::new();
        for file in files {
            match registry.index.entry(file.config.host_domain.clone()) {
                Entry::Occupied(slot) => rejected.push(ConfigError::DuplicateHostDomain {
                    host: file.config.host_domain,
                    first: registry.files[*slot.get()].config_path.clone(),
                }),
                Entry::Vacant(slot) => {
                    slot.insert(registry.files.len());
                    registry.files.push(file);
                }
            }
        }
        (registry, rejected)
    }

    /// Exact-match lookup by host domain.
    pub fn find(&self, hostname: &str) -> Option<&ConfigFile> {
        self.index.get(hostname).map(|&i| &self.files[i])
    }

    pub fn files(&self) -> &[ConfigFile] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn serves_https(&self) -> bool {
        self.files.iter().any(|f| f.config.allow_https)
    }
}

/// Discovers, validates and indexes every tenant config.
///
/// Homes and files are processed concurrently; a bad file or unreadable home
/// only drops itself. Fails only when the list of homes cannot be read.
pub async fn load(source: &dyn ConfigSource) -> Result<Registry, ConfigError> {
    let homes = source.home_directories().await?;
    let per_home = join_all(homes.iter().map(|home| load_home(source, home))).await;
    let registry = Registry::from_files(per_home.into_iter().flatten());
    log(
        LogLevel::Info,
        &format!("Loaded {} host configuration(s).", registry.len()),
    );
    Ok(registry)
}

async fn load_home(source: &dyn ConfigSource, home: &Path) -> Vec<ConfigFile> {
    let paths = match source.config_files(home).await {
        Ok(paths) => paths,
        Err(err @ ConfigError::NoConfigFolder { .. }) => {
            log(LogLevel::Debug, &err.to_string());
            return Vec::new();
        }
        Err(err) => {
            log(LogLevel::Warn, &err.to_string());
            return Vec::new();
        }
    };

    join_all(paths.into_iter().map(|path| load_file(source, home, path)))
        .await
        .into_iter()
        .flatten()
        .collect()
}

async fn load_file(source: &dyn ConfigSource, home: &Path, path: PathBuf) -> Option<ConfigFile> {
    let file = match parse_file(source, home, &path).await {
        Ok(file) => file,
        Err(err) => {
            log(
                LogLevel::Warn,
                &format!("'{}' skipped: {err}", path.display()),
            );
            return None;
        }
    };

    let missing = validation::check_existence(&file.config, source).await;
    if !missing.is_empty() {
        for err in missing {
            log(
                LogLevel::Warn,
                &format!("'{}' skipped: {err}", path.display()),
            );
        }
        return None;
    }

    log(
        LogLevel::Debug,
        &format!(
            "Loaded '{}' from {}",
            file.config.host_domain,
            path.display()
        ),
    );
    Some(file)
}

async fn parse_file(
    source: &dyn ConfigSource,
    home: &Path,
    path: &Path,
) -> Result<ConfigFile, ConfigError> {
    let invalid_json = |source| ConfigError::InvalidJson {
        path: path.to_path_buf(),
        source,
    };

    let text = source.read_to_string(path).await?;
    let mut document: serde_json::Value = serde_json::from_str(&text).map_err(invalid_json)?;
    validation::drop_unused_certificate_options(&mut document);
    validation::check_types(&document)?;
    validation::check_required(&document)?;
    let config: HostConfig = serde_json::from_value(document).map_err(invalid_json)?;

    let mut file = ConfigFile {
        home_path: home.to_path_buf(),
        config,
        config_directory_path: path.parent().map(Path::to_path_buf).unwrap_or_default(),
        config_file_name: path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default(),
        config_path: path.to_path_buf(),
    };
    validation::apply_defaults(&mut file);
    validation::check_certificate_source(&file.config)?;
    validation::check_logic(&file.config)?;
    Ok(file)
}
