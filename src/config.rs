//! Explorer configuration, loaded from JSON and overridden by CLI flags

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::controller::Gates;
use crate::index::Viewport;
use crate::records::{AnyFetcher, DirFetcher, HttpFetcher};
use crate::surface::LngLat;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config {}: {source}", path.display())]
    Io { path: PathBuf, source: std::io::Error },
    #[error("invalid config {}: {source}", path.display())]
    Parse { path: PathBuf, source: serde_json::Error },
    #[error("could not build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Where auxiliary records come from
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RecordSource {
    /// `{base_url}/assets/data/{key}/{id}.json`
    Http { base_url: String },
    /// `{root}/assets/data/{key}/{id}.json`
    Dir { root: PathBuf },
}

impl Default for RecordSource {
    fn default() -> Self {
        RecordSource::Dir { root: PathBuf::from(".") }
    }
}

/// Initial view and zoom limits
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewConfig {
    pub center: LngLat,
    pub zoom: f64,
    pub min_zoom: f64,
    pub max_zoom: f64,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            // Central New York
            center: LngLat::new(-75.40770744775523, 42.8821336509194),
            zoom: 5.8,
            min_zoom: 2.0,
            max_zoom: 15.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExplorerConfig {
    pub records: RecordSource,
    /// Directory holding `{source}.geojson`
    pub tiles_dir: PathBuf,
    pub view: ViewConfig,
    pub min_export_zoom: f64,
    /// Hover is ignored at or below this zoom
    pub hover_min_zoom: f64,
    /// Where `map_csv_export.zip` is written
    pub export_dir: PathBuf,
    pub request_timeout_secs: u64,
}

impl Default for ExplorerConfig {
    fn default() -> Self {
        Self {
            records: RecordSource::default(),
            tiles_dir: PathBuf::from("assets/tiles"),
            view: ViewConfig::default(),
            min_export_zoom: 7.5,
            hover_min_zoom: 5.0,
            export_dir: PathBuf::from("."),
            request_timeout_secs: 30,
        }
    }
}

impl ExplorerConfig {
    /// Read a JSON config file; absent fields take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn gates(&self) -> Gates {
        Gates {
            hover_min_zoom: self.hover_min_zoom,
            min_export_zoom: self.min_export_zoom,
        }
    }

    /// Start view sized to `cols` x `rows` cells
    pub fn viewport(&self, cols: u16, rows: u16) -> Viewport {
        Viewport {
            center: self.view.center,
            zoom: self.view.zoom.clamp(self.view.min_zoom, self.view.max_zoom),
            cols: cols.max(1),
            rows: rows.max(1),
            min_zoom: self.view.min_zoom,
            max_zoom: self.view.max_zoom,
        }
    }

    pub fn fetcher(&self) -> Result<AnyFetcher, ConfigError> {
        Ok(match &self.records {
            RecordSource::Http { base_url } => AnyFetcher::Http(HttpFetcher::new(
                base_url,
                Duration::from_secs(self.request_timeout_secs),
            )?),
            RecordSource::Dir { root } => AnyFetcher::Dir(DirFetcher::new(root.clone())),
        })
    }
}
