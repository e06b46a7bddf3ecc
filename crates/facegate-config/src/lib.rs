use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const PRIMARY_CONFIG_PATH: &str = "/etc/facegate/config.toml";
pub const SECONDARY_CONFIG_PATH: &str = "/usr/local/etc/facegate/config.toml";
pub const DEFAULT_EMBEDDING_TOLERANCE: f64 = 0.6;
pub const DEFAULT_HEURISTIC_TOLERANCE: f64 = 0.3;
pub const DEFAULT_REQUIRED_SAMPLES: usize = 3;
pub const DEFAULT_SESSION_TTL_SECS: u64 = 300;
pub const DEFAULT_MIN_IMAGE_WIDTH: u32 = 100;
pub const DEFAULT_MIN_IMAGE_HEIGHT: u32 = 100;
pub const DEFAULT_MIN_FACE_SIDE: u32 = 50;
pub const DEFAULT_MIN_FACE_AREA_RATIO: f64 = 0.1;
pub const DEFAULT_BLUR_THRESHOLD: f64 = 100.0;
pub const DEFAULT_TEMPLATE_STORE_PATH: &str = "/var/lib/facegate/templates.json";
pub const DEFAULT_AUDIT_LOG_PATH: &str = "/var/lib/facegate/attempts.jsonl";
pub const DEFAULT_AUDIT_QUERY_LIMIT: usize = 10;
pub const DEFAULT_JITTERS: u32 = 1;

/// Which extractor/metric pair a deployment matches with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Learned face embeddings compared by Euclidean distance.
    #[default]
    Embedding,
    /// Colour/brightness/histogram feature bags compared by weighted similarity.
    Heuristic,
}

impl Strategy {
    pub fn default_tolerance(self) -> f64 {
        match self {
            Strategy::Embedding => DEFAULT_EMBEDDING_TOLERANCE,
            Strategy::Heuristic => DEFAULT_HEURISTIC_TOLERANCE,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::Embedding => "embedding",
            Strategy::Heuristic => "heuristic",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub strategy: Option<Strategy>,
    pub match_tolerance: Option<f64>,
    pub required_samples: Option<usize>,
    pub session_ttl_secs: Option<u64>,
    pub min_image_width: Option<u32>,
    pub min_image_height: Option<u32>,
    pub min_face_side: Option<u32>,
    pub min_face_area_ratio: Option<f64>,
    pub blur_threshold: Option<f64>,
    pub liveness_check: Option<bool>,
    pub template_store_path: Option<PathBuf>,
    pub audit_log_path: Option<PathBuf>,
    pub audit_query_limit: Option<usize>,
    pub landmark_model: Option<PathBuf>,
    pub encoder_model: Option<PathBuf>,
    pub jitters: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    pub strategy: Strategy,
    pub match_tolerance: f64,
    pub required_samples: usize,
    pub session_ttl: Duration,
    pub min_image_width: u32,
    pub min_image_height: u32,
    pub min_face_side: u32,
    pub min_face_area_ratio: f64,
    pub blur_threshold: f64,
    pub liveness_check: bool,
    pub template_store_path: PathBuf,
    pub audit_log_path: PathBuf,
    pub audit_query_limit: usize,
    pub landmark_model: Option<PathBuf>,
    pub encoder_model: Option<PathBuf>,
    pub jitters: u32,
}

impl ResolvedConfig {
    pub fn from_raw(raw: ConfigFile) -> Self {
        let strategy = raw.strategy.unwrap_or_default();
        Self {
            strategy,
            match_tolerance: raw
                .match_tolerance
                .unwrap_or_else(|| strategy.default_tolerance()),
            required_samples: raw
                .required_samples
                .unwrap_or(DEFAULT_REQUIRED_SAMPLES)
                .max(1),
            session_ttl: Duration::from_secs(
                raw.session_ttl_secs.unwrap_or(DEFAULT_SESSION_TTL_SECS),
            ),
            min_image_width: raw.min_image_width.unwrap_or(DEFAULT_MIN_IMAGE_WIDTH),
            min_image_height: raw.min_image_height.unwrap_or(DEFAULT_MIN_IMAGE_HEIGHT),
            min_face_side: raw.min_face_side.unwrap_or(DEFAULT_MIN_FACE_SIDE),
            min_face_area_ratio: raw
                .min_face_area_ratio
                .unwrap_or(DEFAULT_MIN_FACE_AREA_RATIO),
            blur_threshold: raw.blur_threshold.unwrap_or(DEFAULT_BLUR_THRESHOLD),
            liveness_check: raw.liveness_check.unwrap_or(true),
            template_store_path: raw
                .template_store_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_TEMPLATE_STORE_PATH)),
            audit_log_path: raw
                .audit_log_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_AUDIT_LOG_PATH)),
            audit_query_limit: raw
                .audit_query_limit
                .unwrap_or(DEFAULT_AUDIT_QUERY_LIMIT)
                .max(1),
            landmark_model: raw.landmark_model,
            encoder_model: raw.encoder_model,
            jitters: raw.jitters.unwrap_or(DEFAULT_JITTERS),
        }
    }

    /// Rejects values that would make the quality gate or matcher meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.match_tolerance.is_finite() || self.match_tolerance <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "match_tolerance must be a positive number, found {}",
                self.match_tolerance
            )));
        }
        if !(self.min_face_area_ratio > 0.0 && self.min_face_area_ratio <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "min_face_area_ratio must be within (0, 1], found {}",
                self.min_face_area_ratio
            )));
        }
        if !self.blur_threshold.is_finite() || self.blur_threshold < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "blur_threshold must be zero or positive, found {}",
                self.blur_threshold
            )));
        }
        Ok(())
    }
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self::from_raw(ConfigFile::default())
    }
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub contents: ConfigFile,
    pub source: PathBuf,
}

impl LoadedConfig {
    pub fn new(contents: ConfigFile, source: PathBuf) -> Self {
        Self { contents, source }
    }

    pub fn source(&self) -> &Path {
        &self.source
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfigWithSource {
    pub resolved: ResolvedConfig,
    pub source: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

pub fn default_sources() -> [PathBuf; 2] {
    [
        PathBuf::from(PRIMARY_CONFIG_PATH),
        PathBuf::from(SECONDARY_CONFIG_PATH),
    ]
}

pub fn load_from_paths(paths: &[PathBuf]) -> Result<Option<LoadedConfig>, ConfigError> {
    for path in paths {
        match fs::read_to_string(path) {
            Ok(contents) => {
                let parsed =
                    toml::from_str::<ConfigFile>(&contents).map_err(|err| ConfigError::Parse {
                        path: path.clone(),
                        message: err.to_string(),
                    })?;
                return Ok(Some(LoadedConfig::new(parsed, path.clone())));
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
            Err(err) => {
                return Err(ConfigError::Read {
                    path: path.clone(),
                    source: err,
                })
            }
        }
    }

    Ok(None)
}

pub fn load_resolved_from_paths(
    paths: &[PathBuf],
) -> Result<ResolvedConfigWithSource, ConfigError> {
    let loaded = match load_from_paths(paths)? {
        Some(entry) => {
            let path = entry.source.clone();
            ResolvedConfigWithSource {
                resolved: ResolvedConfig::from_raw(entry.contents),
                source: Some(path),
            }
        }
        None => ResolvedConfigWithSource {
            resolved: ResolvedConfig::default(),
            source: None,
        },
    };
    loaded.resolved.validate()?;
    Ok(loaded)
}
