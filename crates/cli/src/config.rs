//! Persistent govctl settings

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::output::OutputFormat;

const DEFAULT_API_URL: &str = "http://localhost:8080";

/// Stored defaults for govctl
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    pub api_url: Option<String>,
    /// `table` or `json`
    pub default_format: Option<String>,
}

impl Config {
    /// Read `path`; a missing file means no stored defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content)
                .with_context(|| format!("Invalid config file {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e).with_context(|| format!("Cannot read {}", path.display())),
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Cannot create {}", dir.display()))?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content).with_context(|| format!("Cannot write {}", path.display()))
    }

    /// `~/.config/govctl/config.json`
    pub fn config_path() -> Result<PathBuf> {
        let home = dirs_next::home_dir().context("No home directory to keep govctl settings in")?;
        Ok(home.join(".config/govctl/config.json"))
    }

    /// Flag or env value first, then the config file, then localhost
    pub fn resolve_api_url(&self, flag: Option<&str>) -> String {
        flag.map(str::to_string)
            .or_else(|| self.api_url.clone())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string())
    }

    /// Flag first, then the config file, then table output
    pub fn resolve_format(&self, flag: Option<OutputFormat>) -> OutputFormat {
        flag.or_else(|| {
            self.default_format
                .as_deref()
                .and_then(OutputFormat::from_name)
        })
        .unwrap_or_default()
    }
}
