use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::error::ConfigError;
use crate::fetcher::AssetFormat;
use crate::http::header_map;

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_timeout() -> f64 {
    30.0
}

/// Run configuration, read from a YAML file.
///
/// ```yaml
/// book_list:
///   - https://www.calameo.com/read/000000000aaaaaaaaaaaa
/// svg_quality: false
/// headers:
///   User-Agent: Mozilla/5.0
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub book_list: Vec<String>,

    #[serde(default)]
    pub svg_quality: bool,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    #[serde(default = "default_timeout")]
    pub timeout_secs: f64,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config = Self::from_yaml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        config.validate()?;
        debug!("Loaded configuration with {} books", config.book_list.len());
        Ok(config)
    }

    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.book_list.is_empty() {
            warn!("book_list is empty, nothing to download");
        }

        for entry in &self.book_list {
            let invalid = |reason: String| ConfigError::InvalidUrl {
                url: entry.clone(),
                reason,
            };
            let url = Url::parse(entry).map_err(|e| invalid(e.to_string()))?;
            if url.scheme() != "http" && url.scheme() != "https" {
                return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
            }
        }

        if !self.timeout_secs.is_finite() || self.timeout_secs < 0.0 {
            return Err(ConfigError::InvalidTimeout(self.timeout_secs));
        }

        header_map(&self.headers)?;

        Ok(())
    }

    pub fn asset_format(&self) -> AssetFormat {
        if self.svg_quality {
            AssetFormat::Vector
        } else {
            AssetFormat::Raster
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_secs)
    }
}
