use crate::models::{
    CropMap, DetectionMap, DocumentRecord, FieldLabel, FieldMap, FieldResults, Language,
    SkipReason, FIELD_ORDER,
};
use crate::processing::{
    CropEngine, FieldRecognitionDispatcher, ImagePreprocessor, RecognizerRegistry, RegionDetector,
};
use crate::utils::{Area, ArtifactStore, ExtractError, ExtractorConfig};
use crate::validation::NationalIdDecoder;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared flag that stops a pipeline run at the next stage boundary.
///
/// An in-flight decode or recognition call always runs to completion.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything a full run produced, with caller-facing references next to internal paths.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Image the regions were cut from (the preprocessed source when enabled).
    pub image: PathBuf,
    pub image_url: String,
    pub boxes: DetectionMap,
    pub crop_map: CropMap,
    pub crops: FieldMap<String>,
    pub record: DocumentRecord,
}

pub struct IdCardExtractor {
    config: ExtractorConfig,
    store: ArtifactStore,
    detector: Box<dyn RegionDetector>,
    cropper: CropEngine,
    dispatcher: FieldRecognitionDispatcher,
    cancel: CancelToken,
}

impl IdCardExtractor {
    /// Builds an extractor backed by Tesseract, reading traineddata from `config.tessdata`.
    pub fn new(
        config: ExtractorConfig,
        detector: impl RegionDetector + 'static,
    ) -> Result<Self, ExtractError> {
        let registry = Arc::new(RecognizerRegistry::tesseract(config.tessdata.clone()));
        Self::with_registry(config, detector, registry)
    }

    /// Builds an extractor around an existing recognizer registry, so several extractors
    /// can share the per-language recognizers of one process.
    pub fn with_registry(
        config: ExtractorConfig,
        detector: impl RegionDetector + 'static,
        registry: Arc<RecognizerRegistry>,
    ) -> Result<Self, ExtractError> {
        let config = config.validated()?;
        let store = ArtifactStore::new(&config.storage_root, config.public_prefix.clone());
        store.ensure_dirs()?;

        let cropper = CropEngine::new(store.area_dir(Area::Crops), config.jpeg_quality);
        let mut dispatcher = FieldRecognitionDispatcher::new(registry);
        if config.preprocess_crops {
            dispatcher = dispatcher.with_preprocessor(
                ImagePreprocessor::from_config(&config)
                    .with_output_dir(store.area_dir(Area::Preprocessed)),
            );
        }

        log::debug!("Extractor storage root: {}", store.root().display());
        Ok(IdCardExtractor {
            config,
            store,
            detector: Box::new(detector),
            cropper,
            dispatcher,
            cancel: CancelToken::new(),
        })
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn registry(&self) -> &RecognizerRegistry {
        self.dispatcher.registry()
    }

    fn checkpoint(&self, stage: &'static str) -> Result<(), ExtractError> {
        if self.cancel.is_cancelled() {
            log::warn!("Run cancelled before {}", stage);
            return Err(ExtractError::Cancelled(stage));
        }
        Ok(())
    }

    fn require_image(image: &Path) -> Result<(), ExtractError> {
        if !image.is_file() {
            return Err(ExtractError::MissingInput(image.display().to_string()));
        }
        Ok(())
    }

    /// Runs the detector. Every field of the card must come back with a box.
    pub fn detect(&self, image: &Path) -> Result<DetectionMap, ExtractError> {
        Self::require_image(image)?;
        let detections = self.detector.detect(image)?;
        if let Some(label) = detections.first_missing() {
            return Err(ExtractError::MissingDetection(label));
        }
        log::info!("Detected {} regions in {}", detections.len(), image.display());
        Ok(detections)
    }

    /// Cuts one crop per detection entry.
    pub fn crop(&self, image: &Path, detections: &DetectionMap) -> Result<CropMap, ExtractError> {
        Self::require_image(image)?;
        self.cropper.crop_regions(image, detections)
    }

    /// Recognizes all six fields and derives the birth date from the ID number.
    ///
    /// Fields that cannot be read come back empty. The call fails only for a missing crop,
    /// or when no recognizer could be initialised for any field.
    pub fn recognize(&self, crops: &CropMap) -> Result<DocumentRecord, ExtractError> {
        self.checkpoint("recognition")?;
        let results = self.dispatcher.dispatch(crops)?;

        let unavailable = results.iter().all(|(_, outcome)| {
            matches!(
                outcome.skip_reason(),
                Some(SkipReason::LanguageUnavailable(_))
            )
        });
        if unavailable {
            return Err(ExtractError::RecognizerUnavailable(self.fault_summary()));
        }

        let skipped = results.skipped().count();
        if skipped > 0 {
            log::warn!("{} of {} fields came back empty", skipped, FIELD_ORDER.len());
        }

        self.checkpoint("birth date decoding")?;
        let birth_date = Self::derive_birth_date(&results);
        Ok(DocumentRecord::from_results(&results, birth_date))
    }

    fn fault_summary(&self) -> String {
        Language::ALL
            .iter()
            .filter_map(|language| {
                self.registry()
                    .fault(*language)
                    .map(|message| format!("{}: {}", language, message))
            })
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Birth date from the first recognized line of `Num1`, if it decodes.
    pub fn derive_birth_date(results: &FieldResults) -> Option<String> {
        let num1 = results.field(FieldLabel::Num1);
        let line = num1.first_line()?;
        let birth_date = NationalIdDecoder::birth_date_from_line(line);
        if birth_date.is_none() {
            log::debug!("No birth date derivable from Num1 line '{}'", line);
        }
        birth_date
    }

    /// Crop, then recognize, starting from boxes that were already detected.
    pub fn run_from_detections(
        &self,
        image: &Path,
        detections: &DetectionMap,
    ) -> Result<DocumentRecord, ExtractError> {
        Self::require_image(image)?;
        if let Some(label) = detections.first_missing() {
            return Err(ExtractError::MissingDetection(label));
        }
        self.checkpoint("cropping")?;
        let crops = self.crop(image, detections)?;
        self.recognize(&crops)
    }

    /// Detection, cropping, recognition and decoding for one card photo.
    pub fn run_full(&self, image: &Path) -> Result<DocumentRecord, ExtractError> {
        Ok(self.run_report(image)?.record)
    }

    /// Like [`IdCardExtractor::run_full`], keeping the intermediate boxes and crops.
    pub fn run_report(&self, image: &Path) -> Result<RunReport, ExtractError> {
        Self::require_image(image)?;
        let source = self.prepare_source(image)?;

        self.checkpoint("detection")?;
        let boxes = self.detect(&source)?;
        self.checkpoint("cropping")?;
        let crop_map = self.crop(&source, &boxes)?;
        let record = self.recognize(&crop_map)?;

        log::info!("Extraction finished for {}", image.display());
        Ok(RunReport {
            image_url: self.store.public_url(&source),
            image: source,
            crops: self.public_crops(&crop_map),
            boxes,
            crop_map,
            record,
        })
    }

    /// Stores an uploaded card photo and runs the full pipeline on it.
    pub fn run_upload(&self, file_name: &str, bytes: &[u8]) -> Result<RunReport, ExtractError> {
        let upload = self.store.store_upload(file_name, bytes)?;
        self.run_report(&upload)
    }

    /// Caller-facing references for every crop.
    pub fn public_crops(&self, crops: &CropMap) -> FieldMap<String> {
        crops
            .iter()
            .map(|(label, path)| (label, self.store.public_url(path)))
            .collect()
    }

    fn prepare_source(&self, image: &Path) -> Result<PathBuf, ExtractError> {
        if !self.config.preprocess_source {
            return Ok(image.to_path_buf());
        }
        self.checkpoint("source preprocessing")?;
        ImagePreprocessor::from_config(&self.config)
            .with_output_dir(self.store.area_dir(Area::Preprocessed))
            .scoped()?
            .preprocess(image)
    }
}
