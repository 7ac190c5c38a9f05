use anyhow::{Context as _, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;

use std::path::PathBuf;

use crate::config::ConfigBundle;

use super::ConfigSource;

pub const DISKPILOT_CONFIG_DIR_DEFAULT: &str = "/etc/diskpilot";

pub struct FileSystemConfigSource {
    config_dir: PathBuf,
}

impl FileSystemConfigSource {
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
        }
    }

    pub fn new_with_default_config_dir() -> Self {
        Self::new(PathBuf::from(DISKPILOT_CONFIG_DIR_DEFAULT))
    }

    /// Loads one TOML file of the config dir, a missing file is not an error.
    async fn load<T: DeserializeOwned>(&self, file_name: &str) -> Result<Option<T>> {
        let config_path = self.config_dir.join(file_name);

        if !config_path.exists() {
            tracing::debug!("Config file not found, skip: {config_path:?}");
            return Ok(None);
        }
        tracing::debug!("Loading config from: {config_path:?}");

        let config = tokio::fs::read_to_string(&config_path)
            .await
            .map_err(anyhow::Error::from)
            .and_then(|content| {
                toml::from_str::<T>(&content).context("Failed to parse content as TOML")
            })
            .with_context(|| format!("Failed to load config from: {config_path:?}"))?;

        Ok(Some(config))
    }
}

#[async_trait]
impl ConfigSource for FileSystemConfigSource {
    fn source_debug_string(&self) -> String {
        format!("filesystem: {:?}", self.config_dir)
    }

    async fn get_config(&self) -> Result<ConfigBundle> {
        Ok(ConfigBundle {
            install: self.load("install.toml").await?.unwrap_or_default(),
            device: self.load("deviceinfo.toml").await?.unwrap_or_default(),
            channel: self.load("channel.toml").await?.unwrap_or_default(),
            partition_map: self.load("partition_map.toml").await?,
        })
    }
}

#[cfg(test)]
pub mod tests {

    #[allow(unused_imports)]
    use super::*;
    use crate::{config::install::LayoutKind, types::FilesystemKind};
    use anyhow::Result;

    #[tokio::test]
    async fn test_empty_config_dir() -> Result<()> {
        let dir = tempfile::tempdir()?;

        let config = FileSystemConfigSource::new(dir.path()).get_config().await?;
        assert_eq!(config, ConfigBundle::default());
        Ok(())
    }

    #[tokio::test]
    async fn test_load_config_dir() -> Result<()> {
        let dir = tempfile::tempdir()?;
        tokio::fs::write(dir.path().join("install.toml"), "layout = \"ota\"\n").await?;
        tokio::fs::write(
            dir.path().join("deviceinfo.toml"),
            "boot_filesystem = \"fat32\"\n",
        )
        .await?;
        tokio::fs::write(
            dir.path().join("partition_map.toml"),
            crate::config::partition_map::tests::AB_MAP,
        )
        .await?;

        let config = FileSystemConfigSource::new(dir.path()).get_config().await?;
        assert_eq!(config.install.layout, LayoutKind::Ota);
        assert_eq!(config.device.boot_filesystem, FilesystemKind::Fat32);
        assert_eq!(config.partition_map.map(|m| m.len()), Some(3));
        Ok(())
    }

    #[tokio::test]
    async fn test_broken_file_names_path() -> Result<()> {
        let dir = tempfile::tempdir()?;
        tokio::fs::write(dir.path().join("channel.toml"), "supported = 1\n").await?;

        let err = FileSystemConfigSource::new(dir.path())
            .get_config()
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("channel.toml"));
        Ok(())
    }
}
