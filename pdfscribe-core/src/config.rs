use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use thiserror::Error;

use crate::geometry::{OverlayCalibration, BASE_FONT_SIZE, DEFAULT_CALIBRATION};
use crate::viewport::{DEFAULT_ZOOM, MAX_RENDER_WIDTH};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path:?}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path:?}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service_url: String,
    pub max_width: f32,
    pub initial_zoom: f32,
    pub calibration: f32,
    pub base_font_size: f32,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub request_timeout: Duration,
    pub pdfium_library: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_url: "http://localhost:8000".to_owned(),
            max_width: MAX_RENDER_WIDTH,
            initial_zoom: DEFAULT_ZOOM,
            calibration: DEFAULT_CALIBRATION,
            base_font_size: BASE_FONT_SIZE,
            request_timeout: Duration::from_secs(30),
            pdfium_library: None,
        }
    }
}

pub fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("net", "pdfscribe", "pdfscribe")
}

impl Config {
    pub fn default_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Reads `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn overlay_calibration(&self) -> OverlayCalibration {
        OverlayCalibration {
            factor: self.calibration,
            base_font_size: self.base_font_size,
        }
    }
}
