use anyhow::{bail, Context, Result};
use facegate_core::matcher::validate_threshold;
use facegate_core::{CaptureFacing, DEFAULT_SIMILARITY_THRESHOLD, FACE_INPUT_SIZE};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// CLI configuration: optional TOML file, then `FACEGATE_*` overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Path to the SQLite reference store.
    pub db_path: PathBuf,
    /// Cosine similarity a capture must exceed to be accepted.
    pub similarity_threshold: f32,
    /// Sensor used for captures when `--facing` is not given.
    pub camera_facing: CaptureFacing,
    /// Side length of the prepared face crop.
    pub face_input_size: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_data_dir().join("references.db"),
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            camera_facing: CaptureFacing::default(),
            face_input_size: FACE_INPUT_SIZE,
        }
    }
}

impl Config {
    /// Load from `FACEGATE_CONFIG` (if set) and the process environment.
    pub fn load() -> Result<Self> {
        let base = match std::env::var("FACEGATE_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        base.with_overrides(|key| std::env::var(key).ok())?
            .validated()
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("parse config {}", path.display()))
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Apply `FACEGATE_*` overrides from `lookup`.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("FACEGATE_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("FACEGATE_SIMILARITY_THRESHOLD") {
            self.similarity_threshold = v
                .trim()
                .parse()
                .with_context(|| format!("FACEGATE_SIMILARITY_THRESHOLD={v:?}"))?;
        }
        if let Some(v) = lookup("FACEGATE_CAMERA_FACING") {
            self.camera_facing = v.parse()?;
        }
        if let Some(v) = lookup("FACEGATE_FACE_INPUT_SIZE") {
            self.face_input_size = v
                .trim()
                .parse()
                .with_context(|| format!("FACEGATE_FACE_INPUT_SIZE={v:?}"))?;
        }
        Ok(self)
    }

    pub fn validated(self) -> Result<Self> {
        validate_threshold(self.similarity_threshold)?;
        if self.face_input_size == 0 {
            bail!("face_input_size must be non-zero");
        }
        Ok(self)
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facegate")
}
