use crate::models::{CropMap, DetectionMap, FieldLabel};
use crate::processing::image::{open_image, save_jpeg};
use crate::utils::{unique_subdir, ExtractError};
use image::DynamicImage;
use std::path::{Path, PathBuf};

/// Cuts detected regions out of a card photo and persists each one as its own JPEG.
///
/// Every call writes into a fresh directory under `crops_dir`, so two photos with the same
/// file name never overwrite each other's crops.
#[derive(Debug, Clone)]
pub struct CropEngine {
    crops_dir: PathBuf,
    jpeg_quality: u8,
}

impl CropEngine {
    pub fn new(crops_dir: impl Into<PathBuf>, jpeg_quality: u8) -> Self {
        CropEngine {
            crops_dir: crops_dir.into(),
            jpeg_quality,
        }
    }

    pub fn crops_dir(&self) -> &Path {
        &self.crops_dir
    }

    /// One crop per detection entry. Fails for the whole request if the source cannot be opened.
    pub fn crop_regions(
        &self,
        image_path: &Path,
        detections: &DetectionMap,
    ) -> Result<CropMap, ExtractError> {
        let img = open_image(image_path).map_err(|e| {
            ExtractError::ImageProcessingError(format!("Failed to open image: {}", e))
        })?;

        let stem = image_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());
        let request_dir = unique_subdir(&self.crops_dir, &format!("{}-", stem))?;

        let mut crops = CropMap::new();
        for (label, bbox) in detections.iter() {
            let rect = bbox.clamp_to(img.width(), img.height());
            if bbox.is_degenerate() {
                log::warn!("Degenerate box for {}: {:?}, clamped to {:?}", label, bbox, rect);
            }
            let region = img.crop_imm(
                rect.left() as u32,
                rect.top() as u32,
                rect.width(),
                rect.height(),
            );
            let out_path = Self::crop_path(&request_dir, &stem, label);
            self.persist(&region, &out_path)?;
            log::debug!("Cropped {} {}x{} -> {}", label, rect.width(), rect.height(), out_path.display());
            crops.insert(label, out_path);
        }

        log::info!("Cropped {} regions from {}", crops.len(), image_path.display());
        Ok(crops)
    }

    /// Deterministic name for a source stem and label inside a request directory.
    pub fn crop_path(request_dir: &Path, source_stem: &str, label: FieldLabel) -> PathBuf {
        request_dir.join(format!("{}_{}.jpg", source_stem, label))
    }

    fn persist(&self, region: &DynamicImage, out_path: &Path) -> Result<(), ExtractError> {
        save_jpeg(&region.to_rgb8(), out_path, self.jpeg_quality).map_err(|e| {
            ExtractError::ImageProcessingError(format!(
                "Failed to save crop {}: {}",
                out_path.display(),
                e
            ))
        })
    }
}
