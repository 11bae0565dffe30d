use crate::utils::ExtractError;
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const TESSDATA_ENV: &str = "TESSDATA_PREFIX";
pub const STORAGE_ROOT_ENV: &str = "NIDSCAN_STORAGE_ROOT";

/// Runtime settings for the extraction pipeline.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    /// Directory holding the `uploads`, `crops` and `preprocessed` areas.
    pub storage_root: PathBuf,
    /// Caller-facing prefix that stored artifacts are exposed under.
    pub public_prefix: String,
    /// Tesseract traineddata directory. `None` uses the library default.
    pub tessdata: Option<PathBuf>,
    /// Images smaller than this on either side get upscaled before recognition.
    pub min_dimension: u32,
    pub upscale_margin: f32,
    pub jpeg_quality: u8,
    /// Normalise each crop before handing it to the recognizer.
    pub preprocess_crops: bool,
    /// Normalise the uploaded card photo before detection and cropping.
    pub preprocess_source: bool,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        ExtractorConfig {
            storage_root: PathBuf::from("static"),
            public_prefix: "/static".to_string(),
            tessdata: None,
            min_dimension: 32,
            upscale_margin: 1.5,
            jpeg_quality: 95,
            preprocess_crops: true,
            preprocess_source: false,
        }
    }
}

impl ExtractorConfig {
    /// Reads a JSON config file. Keys that are left out keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ExtractError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ExtractError::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: ExtractorConfig = serde_json::from_str(&raw).map_err(|e| {
            ExtractError::ConfigError(format!("Invalid config {}: {}", path.display(), e))
        })?;
        config.validated()
    }

    /// Applies `TESSDATA_PREFIX` and `NIDSCAN_STORAGE_ROOT` when set.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(tessdata) = std::env::var_os(TESSDATA_ENV).filter(|v| !v.is_empty()) {
            self.tessdata = Some(PathBuf::from(tessdata));
        }
        if let Some(root) = std::env::var_os(STORAGE_ROOT_ENV).filter(|v| !v.is_empty()) {
            self.storage_root = PathBuf::from(root);
        }
        self
    }

    pub fn validated(self) -> Result<Self, ExtractError> {
        if self.min_dimension == 0 {
            return Err(ExtractError::ConfigError(
                "min_dimension must be positive".to_string(),
            ));
        }
        if !self.upscale_margin.is_finite() || self.upscale_margin < 1.0 {
            return Err(ExtractError::ConfigError(format!(
                "upscale_margin must be >= 1.0, got {}",
                self.upscale_margin
            )));
        }
        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return Err(ExtractError::ConfigError(format!(
                "jpeg_quality must be in 1..=100, got {}",
                self.jpeg_quality
            )));
        }
        if !self.public_prefix.starts_with('/') {
            return Err(ExtractError::ConfigError(format!(
                "public_prefix must start with '/', got '{}'",
                self.public_prefix
            )));
        }
        Ok(self)
    }
}
