// Storage configuration management
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Environment variable overriding the data directory
pub const DATA_DIR_ENV: &str = "FILESHELF_DATA_DIR";

/// Storage configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory holding staging, content and metadata
    pub root: PathBuf,
}

impl StorageConfig {
    pub fn with_root<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Load configuration with the following priority:
    /// 1. FILESHELF_DATA_DIR environment variable
    /// 2. config.toml file
    /// 3. Default: ./files-db
    pub async fn load() -> Result<Self> {
        if let Ok(env_path) = std::env::var(DATA_DIR_ENV) {
            return Ok(Self::with_root(env_path));
        }

        if let Some(config_path) = Self::config_file_path() {
            if config_path.exists() {
                return Self::load_from(&config_path).await;
            }
        }

        Ok(Self::default())
    }

    /// Parse a configuration file
    pub async fn load_from(config_path: &Path) -> Result<Self> {
        let content = fs::read_to_string(config_path)
            .await
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))
    }

    /// Get the config file path (~/.config/fileshelf/config.toml)
    fn config_file_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("fileshelf").join("config.toml"))
    }

    /// Save configuration to the default config file
    pub async fn save(&self) -> Result<()> {
        let config_path = Self::config_file_path().context("Failed to determine config directory")?;
        self.save_to(&config_path).await
    }

    pub async fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(config_path, content)
            .await
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    /// Staging subtree for in-flight uploads
    pub fn staging_path(&self) -> PathBuf {
        self.root.join("temp")
    }

    /// Content subtree keyed by hex-encoded hash
    pub fn store_path(&self) -> PathBuf {
        self.root.join("files")
    }

    /// Metadata database path
    pub fn db_path(&self) -> PathBuf {
        self.root.join("db.sqlite")
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::with_root("./files-db")
    }
}
