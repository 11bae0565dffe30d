use crate::models::DetectionMap;
use crate::utils::ExtractError;
use std::fs;
use std::path::{Path, PathBuf};

/// Region detection capability: image in, field label -> bounding box out.
pub trait RegionDetector: Send + Sync {
    fn detect(&self, image: &Path) -> Result<DetectionMap, ExtractError>;
}

/// Boxes that were already computed for the image.
impl RegionDetector for DetectionMap {
    fn detect(&self, _image: &Path) -> Result<DetectionMap, ExtractError> {
        Ok(self.clone())
    }
}

/// Reads detections written by an external detector as JSON: `{"Add1": [x1, y1, x2, y2], ...}`.
///
/// Labels outside the field set are ignored.
#[derive(Debug, Clone)]
pub struct BoxFileDetector {
    boxes: Option<PathBuf>,
}

impl BoxFileDetector {
    /// Always reads the given file.
    pub fn new(boxes: impl Into<PathBuf>) -> Self {
        BoxFileDetector {
            boxes: Some(boxes.into()),
        }
    }

    /// Reads `<image>.json` next to each image, e.g. `card.jpg` -> `card.json`.
    pub fn sidecar() -> Self {
        BoxFileDetector { boxes: None }
    }

    fn boxes_path(&self, image: &Path) -> PathBuf {
        match &self.boxes {
            Some(path) => path.clone(),
            None => image.with_extension("json"),
        }
    }
}

impl RegionDetector for BoxFileDetector {
    fn detect(&self, image: &Path) -> Result<DetectionMap, ExtractError> {
        let path = self.boxes_path(image);
        let raw = fs::read_to_string(&path).map_err(|e| {
            ExtractError::DetectionError(format!("Failed to read boxes {}: {}", path.display(), e))
        })?;
        let detections: DetectionMap = serde_json::from_str(&raw).map_err(|e| {
            ExtractError::DetectionError(format!("Invalid boxes {}: {}", path.display(), e))
        })?;
        log::debug!("Loaded {} boxes from {}", detections.len(), path.display());
        Ok(detections)
    }
}
