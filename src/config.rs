use anyhow::{Context, Result};
use directories::BaseDirs;
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

const CONFIG_FILE: &str = "config.json";
const LOG_FILE: &str = "modshell.log";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub library_dir: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_true")]
    pub log_to_file: bool,
    #[serde(skip)]
    base_dir: PathBuf,
}

impl AppConfig {
    pub fn load_or_create() -> Result<Self> {
        Self::load_or_create_at(&base_data_dir()?)
    }

    pub fn load_or_create_at(base_dir: &Path) -> Result<Self> {
        fs::create_dir_all(base_dir).context("create app data dir")?;
        let path = base_dir.join(CONFIG_FILE);
        if path.exists() {
            let raw = fs::read_to_string(&path).context("read app config")?;
            let mut config: AppConfig = serde_json::from_str(&raw).context("parse app config")?;
            config.base_dir = base_dir.to_path_buf();
            if config.library_dir.as_os_str().is_empty() {
                config.library_dir = default_library_dir(base_dir);
                config.save()?;
            }
            return Ok(config);
        }

        let config = AppConfig {
            library_dir: default_library_dir(base_dir),
            log_level: default_log_level(),
            log_to_file: true,
            base_dir: base_dir.to_path_buf(),
        };
        config.save()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        fs::create_dir_all(&self.base_dir).context("create app data dir")?;
        let path = self.base_dir.join(CONFIG_FILE);
        let raw = serde_json::to_string_pretty(self).context("serialize app config")?;
        fs::write(path, raw).context("write app config")?;
        Ok(())
    }

    /// Unknown level names fall back to `info`.
    pub fn level_filter(&self) -> LevelFilter {
        LevelFilter::from_str(self.log_level.trim()).unwrap_or(LevelFilter::Info)
    }

    pub fn log_path(&self) -> Option<PathBuf> {
        self.log_to_file.then(|| self.base_dir.join(LOG_FILE))
    }
}

fn default_library_dir(base_dir: &Path) -> PathBuf {
    base_dir.join("library")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

pub fn base_data_dir() -> Result<PathBuf> {
    let base = BaseDirs::new().context("resolve home dir")?;
    Ok(base.data_local_dir().join("modshell"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn creates_defaults_on_first_run() {
        let dir = tempdir().unwrap();
        let config = AppConfig::load_or_create_at(dir.path()).unwrap();

        assert_eq!(config.library_dir, dir.path().join("library"));
        assert_eq!(config.level_filter(), LevelFilter::Info);
        assert_eq!(config.log_path(), Some(dir.path().join(LOG_FILE)));
        assert!(dir.path().join(CONFIG_FILE).exists());
    }

    #[test]
    fn reads_existing_config_and_fills_gaps() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE),
            r#"{"log_level": "debug", "log_to_file": false}"#,
        )
        .unwrap();

        let config = AppConfig::load_or_create_at(dir.path()).unwrap();
        assert_eq!(config.level_filter(), LevelFilter::Debug);
        assert_eq!(config.log_path(), None);
        assert_eq!(config.library_dir, dir.path().join("library"));

        let reloaded = AppConfig::load_or_create_at(dir.path()).unwrap();
        assert_eq!(reloaded, config);
    }

    #[test]
    fn unknown_level_falls_back_to_info() {
        let dir = tempdir().unwrap();
        let mut config = AppConfig::load_or_create_at(dir.path()).unwrap();
        config.log_level = "chatty".to_string();
        assert_eq!(config.level_filter(), LevelFilter::Info);
        config.log_level = " WARN ".to_string();
        assert_eq!(config.level_filter(), LevelFilter::Warn);
    }

    #[test]
    fn broken_config_is_an_error() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), "{ not json").unwrap();

        let err = AppConfig::load_or_create_at(dir.path()).unwrap_err();
        assert!(format!("{err:#}").contains("parse app config"));
    }
}
