use crate::utils::{unique_subdir, ExtractError, ExtractorConfig};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::io::Reader as ImageReader;
use image::{ColorType, DynamicImage, Rgb32FImage, RgbImage};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

/// Cheap checks run before any expensive operation touches an image file.
pub struct ImageValidator;

impl ImageValidator {
    /// True iff the file exists, is non-empty and decodes to an image with both sides > 0.
    pub fn validate(path: &Path) -> bool {
        Self::inspect(path).is_ok()
    }

    /// Like [`ImageValidator::validate`] but reports why the file was rejected.
    pub fn inspect(path: &Path) -> Result<(u32, u32), String> {
        let meta = fs::metadata(path)
            .map_err(|e| format!("cannot access {}: {}", path.display(), e))?;
        if !meta.is_file() {
            return Err(format!("{} is not a file", path.display()));
        }
        if meta.len() == 0 {
            return Err(format!("{} is empty", path.display()));
        }
        let (width, height) = ImageReader::open(path)
            .and_then(|reader| reader.with_guessed_format())
            .map_err(|e| format!("cannot open {}: {}", path.display(), e))?
            .into_dimensions()
            .map_err(|e| format!("cannot decode {}: {}", path.display(), e))?;
        if width == 0 || height == 0 {
            return Err(format!("{} has invalid dimensions {}x{}", path.display(), width, height));
        }
        Ok((width, height))
    }
}

/// Decodes an image by its content. The extension is only used when the content carries
/// no recognisable signature.
pub fn open_image(path: &Path) -> Result<DynamicImage, String> {
    ImageReader::open(path)
        .and_then(|reader| reader.with_guessed_format())
        .map_err(|e| format!("cannot open {}: {}", path.display(), e))?
        .decode()
        .map_err(|e| format!("cannot decode {}: {}", path.display(), e))
}

/// Normalises images into 3-channel 8-bit JPEGs the recognizer accepts.
#[derive(Debug, Clone)]
pub struct ImagePreprocessor {
    min_dimension: u32,
    upscale_margin: f32,
    jpeg_quality: u8,
    output_dir: Option<PathBuf>,
}

impl Default for ImagePreprocessor {
    fn default() -> Self {
        Self::from_config(&ExtractorConfig::default())
    }
}

impl ImagePreprocessor {
    pub fn from_config(config: &ExtractorConfig) -> Self {
        ImagePreprocessor {
            min_dimension: config.min_dimension,
            upscale_margin: config.upscale_margin,
            jpeg_quality: config.jpeg_quality,
            output_dir: None,
        }
    }

    /// Write derivatives into `dir` instead of a `preprocessed/` folder next to the source.
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    /// Copy that writes into a fresh directory of its own under the configured output
    /// directory, so derivatives of one request never overwrite another's.
    ///
    /// Without an output directory, derivatives land next to their sources and the copy is
    /// returned unchanged.
    pub fn scoped(&self) -> Result<ImagePreprocessor, ExtractError> {
        let mut scoped = self.clone();
        if let Some(dir) = &self.output_dir {
            scoped.output_dir = Some(unique_subdir(dir, "run-")?);
        }
        Ok(scoped)
    }

    /// Best-effort normalisation.
    ///
    /// Returns the path of a freshly written derivative, or the original path when
    /// normalisation fails but the original still validates. Fails only when both do.
    pub fn preprocess(&self, path: &Path) -> Result<PathBuf, ExtractError> {
        match self.normalize(path) {
            Ok(prepared) => {
                log::debug!("Preprocessed {} -> {}", path.display(), prepared.display());
                Ok(prepared)
            }
            Err(cause) => match ImageValidator::inspect(path) {
                Ok(_) => {
                    log::warn!(
                        "Preprocessing failed for {} ({}); using original",
                        path.display(),
                        cause
                    );
                    Ok(path.to_path_buf())
                }
                Err(fallback) => Err(ExtractError::PreprocessingError { cause, fallback }),
            },
        }
    }

    fn normalize(&self, path: &Path) -> Result<PathBuf, String> {
        let img = Self::decode(path)?;
        if img.width() == 0 || img.height() == 0 {
            return Err(format!("image has invalid dimensions: {}x{}", img.width(), img.height()));
        }

        let img = self.upscale_if_small(img);
        let rgb = coerce_to_rgb8(img)?;

        let out_dir = match &self.output_dir {
            Some(dir) => dir.clone(),
            None => path
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join("preprocessed"),
        };
        fs::create_dir_all(&out_dir)
            .map_err(|e| format!("cannot create {}: {}", out_dir.display(), e))?;

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());
        let out_path = out_dir.join(format!("{}_prep.jpg", stem));

        save_jpeg(&rgb, &out_path, self.jpeg_quality)
            .map_err(|e| format!("failed to save preprocessed image {}: {}", out_path.display(), e))?;

        ImageValidator::inspect(&out_path)
            .map_err(|e| format!("preprocessed image cannot be read back: {}", e))?;

        Ok(out_path)
    }

    /// Decodes as colour; when that fails, sniffs the content and goes through grayscale.
    fn decode(path: &Path) -> Result<DynamicImage, String> {
        match image::open(path) {
            Ok(img) => Ok(img),
            Err(color_err) => {
                let gray = ImageReader::open(path)
                    .map_err(|e| e.to_string())
                    .and_then(|reader| reader.with_guessed_format().map_err(|e| e.to_string()))
                    .and_then(|reader| reader.decode().map_err(|e| e.to_string()))
                    .map_err(|gray_err| {
                        format!(
                            "cannot read image {}: {}; grayscale read failed: {}",
                            path.display(),
                            color_err,
                            gray_err
                        )
                    })?
                    .to_luma8();
                Ok(DynamicImage::ImageRgb8(DynamicImage::ImageLuma8(gray).to_rgb8()))
            }
        }
    }

    fn upscale_if_small(&self, img: DynamicImage) -> DynamicImage {
        let (w, h) = (img.width(), img.height());
        let min = self.min_dimension;
        if w >= min && h >= min {
            return img;
        }

        let scale = (min as f32 / h as f32).max(min as f32 / w as f32) * self.upscale_margin;
        let new_w = ((w as f32 * scale) as u32).max(min);
        let new_h = ((h as f32 * scale) as u32).max(min);
        log::debug!("Upscaling {}x{} -> {}x{}", w, h, new_w, new_h);
        img.resize_exact(new_w, new_h, FilterType::CatmullRom)
    }
}

/// Converts any decoded image to 3-channel 8-bit.
///
/// Float images outside the nominal range, or holding non-finite samples, are
/// min-max rescaled first; non-finite samples left after that reject the image.
pub fn coerce_to_rgb8(img: DynamicImage) -> Result<RgbImage, String> {
    match img {
        DynamicImage::ImageRgb32F(_) | DynamicImage::ImageRgba32F(_) => {
            rescale_float(img.to_rgb32f())
        }
        other => Ok(other.to_rgb8()),
    }
}

fn rescale_float(buf: Rgb32FImage) -> Result<RgbImage, String> {
    let (width, height) = buf.dimensions();
    let mut samples = buf.into_raw();

    let finite = samples.iter().copied().filter(|v| v.is_finite());
    let (min, max) = finite.fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    let needs_rescale = samples
        .iter()
        .any(|v| !v.is_finite() || *v < 0.0 || *v > 1.0);

    if needs_rescale && min.is_finite() && max.is_finite() {
        let span = max - min;
        for v in samples.iter_mut().filter(|v| v.is_finite()) {
            *v = if span > 0.0 { (*v - min) / span } else { 0.0 };
        }
    }

    if samples.iter().any(|v| !v.is_finite()) {
        return Err("image contains invalid pixel values (NaN or Inf)".to_string());
    }

    let bytes: Vec<u8> = samples
        .iter()
        .map(|v| (v * 255.0).round().clamp(0.0, 255.0) as u8)
        .collect();
    RgbImage::from_raw(width, height, bytes)
        .ok_or_else(|| "pixel buffer does not match image dimensions".to_string())
}

/// Writes an RGB image as JPEG with the given quality.
pub fn save_jpeg(img: &RgbImage, path: &Path, quality: u8) -> Result<(), String> {
    let file = File::create(path).map_err(|e| e.to_string())?;
    let mut writer = BufWriter::new(file);
    JpegEncoder::new_with_quality(&mut writer, quality)
        .encode(img.as_raw(), img.width(), img.height(), ColorType::Rgb8)
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};

    fn write_png(dir: &Path, name: &str, width: u32, height: u32) -> PathBuf {
        let img = ImageBuffer::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, 128u8])
        });
        let path = dir.join(name);
        img.save(&path).unwrap();
        path
    }

    #[test]
    fn test_validate() {
        let dir = tempfile::tempdir().unwrap();
        let good = write_png(dir.path(), "good.png", 8, 4);
        assert!(ImageValidator::validate(&good));
        assert_eq!(ImageValidator::inspect(&good), Ok((8, 4)));

        let empty = dir.path().join("empty.png");
        fs::write(&empty, b"").unwrap();
        assert!(!ImageValidator::validate(&empty));

        let garbage = dir.path().join("garbage.jpg");
        fs::write(&garbage, b"definitely not an image").unwrap();
        assert!(!ImageValidator::validate(&garbage));

        assert!(!ImageValidator::validate(&dir.path().join("missing.png")));
        assert!(!ImageValidator::validate(dir.path()));
    }

    #[test]
    fn test_content_decides_the_format() {
        let dir = tempfile::tempdir().unwrap();
        let png = write_png(dir.path(), "real.png", 12, 7);
        let bytes = fs::read(&png).unwrap();

        let mislabelled = dir.path().join("photo.jpg");
        fs::write(&mislabelled, &bytes).unwrap();
        let bare = dir.path().join("upload");
        fs::write(&bare, &bytes).unwrap();

        assert_eq!(ImageValidator::inspect(&mislabelled), Ok((12, 7)));
        assert_eq!(ImageValidator::inspect(&bare), Ok((12, 7)));
        assert_eq!(open_image(&bare).unwrap().width(), 12);
    }

    #[test]
    fn test_small_images_are_upscaled() {
        let dir = tempfile::tempdir().unwrap();
        let small = write_png(dir.path(), "small.png", 20, 10);

        let prepared = ImagePreprocessor::default().preprocess(&small).unwrap();
        assert_eq!(prepared, dir.path().join("preprocessed").join("small_prep.jpg"));

        // scale = max(32/10, 32/20) * 1.5 = 4.8
        let (w, h) = ImageValidator::inspect(&prepared).unwrap();
        assert_eq!((w, h), (96, 48));
    }

    #[test]
    fn test_large_images_keep_their_size() {
        let dir = tempfile::tempdir().unwrap();
        let src = write_png(dir.path(), "card.png", 64, 40);
        let out = dir.path().join("out");

        let prepared = ImagePreprocessor::default()
            .with_output_dir(&out)
            .preprocess(&src)
            .unwrap();
        assert!(prepared.starts_with(&out));
        assert_eq!(ImageValidator::inspect(&prepared), Ok((64, 40)));
    }

    #[test]
    fn test_extension_mismatch_goes_through_grayscale() {
        let dir = tempfile::tempdir().unwrap();
        let png = write_png(dir.path(), "real.png", 40, 40);
        let mislabelled = dir.path().join("photo.jpg");
        fs::copy(&png, &mislabelled).unwrap();

        let prepared = ImagePreprocessor::default().preprocess(&mislabelled).unwrap();
        assert_eq!(prepared, dir.path().join("preprocessed").join("photo_prep.jpg"));

        let out = image::open(&prepared).unwrap().to_rgb8();
        for pixel in out.pixels() {
            let [r, g, b] = pixel.0;
            assert!(r.abs_diff(g) <= 2 && g.abs_diff(b) <= 2, "not gray: {:?}", pixel.0);
        }
    }

    #[test]
    fn test_falls_back_to_original_when_output_is_unwritable() {
        let dir = tempfile::tempdir().unwrap();
        let src = write_png(dir.path(), "card.png", 20, 10);
        let blocker = dir.path().join("not_a_dir");
        fs::write(&blocker, b"file").unwrap();

        let prepared = ImagePreprocessor::default()
            .with_output_dir(&blocker)
            .preprocess(&src)
            .unwrap();
        assert_eq!(prepared, src);
    }

    #[test]
    fn test_scoped_preprocessors_do_not_share_output() {
        let dir = tempfile::tempdir().unwrap();
        let src = write_png(dir.path(), "card_Name1.png", 40, 40);
        let base = ImagePreprocessor::default().with_output_dir(dir.path().join("prep"));

        let first = base.scoped().unwrap().preprocess(&src).unwrap();
        let second = base.scoped().unwrap().preprocess(&src).unwrap();
        assert_ne!(first, second);
        assert!(first.starts_with(dir.path().join("prep")));
        assert!(first.exists() && second.exists());
    }

    #[test]
    fn test_unreadable_image_fails_with_both_causes() {
        let dir = tempfile::tempdir().unwrap();
        let garbage = dir.path().join("broken.jpg");
        fs::write(&garbage, b"\xff\xd8 truncated").unwrap();

        match ImagePreprocessor::default().preprocess(&garbage) {
            Err(ExtractError::PreprocessingError { cause, fallback }) => {
                assert!(cause.contains("broken.jpg"));
                assert!(fallback.contains("broken.jpg"));
            }
            other => panic!("expected preprocessing error, got {:?}", other),
        }
    }

    #[test]
    fn test_float_images_are_rescaled() {
        let buf = Rgb32FImage::from_fn(2, 1, |x, _| {
            if x == 0 {
                Rgb([-1.0, 0.0, 1.0])
            } else {
                Rgb([3.0, 3.0, 3.0])
            }
        });
        let rgb = coerce_to_rgb8(DynamicImage::ImageRgb32F(buf)).unwrap();
        assert_eq!(rgb.get_pixel(0, 0).0, [0, 64, 128]);
        assert_eq!(rgb.get_pixel(1, 0).0, [255, 255, 255]);

        let nan = Rgb32FImage::from_fn(1, 1, |_, _| Rgb([f32::NAN, 0.5, 0.5]));
        assert!(coerce_to_rgb8(DynamicImage::ImageRgb32F(nan)).is_err());
    }
}
