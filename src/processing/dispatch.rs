use crate::models::{
    CropMap, FieldLabel, FieldOutcome, FieldResults, RecognizedField, SkipReason, FIELD_ORDER,
};
use crate::processing::image::{ImagePreprocessor, ImageValidator};
use crate::processing::ocr::RecognizerRegistry;
use crate::utils::{ExtractError, RecognitionError};
use std::path::Path;
use std::sync::Arc;

/// Runs recognition for the six card fields, one after another.
///
/// A field that cannot be recognized ends up empty; only a missing crop aborts the run.
pub struct FieldRecognitionDispatcher {
    registry: Arc<RecognizerRegistry>,
    preprocessor: Option<ImagePreprocessor>,
}

impl FieldRecognitionDispatcher {
    pub fn new(registry: Arc<RecognizerRegistry>) -> Self {
        FieldRecognitionDispatcher {
            registry,
            preprocessor: None,
        }
    }

    /// Normalise each crop before it is handed to the recognizer.
    pub fn with_preprocessor(mut self, preprocessor: ImagePreprocessor) -> Self {
        self.preprocessor = Some(preprocessor);
        self
    }

    pub fn registry(&self) -> &RecognizerRegistry {
        &self.registry
    }

    pub fn dispatch(&self, crops: &CropMap) -> Result<FieldResults, ExtractError> {
        let ordered = Self::ordered_crops(crops)?;
        // Each run writes its derivatives into its own directory
        let preprocessor = self
            .preprocessor
            .as_ref()
            .map(ImagePreprocessor::scoped)
            .transpose()?;
        let outcomes =
            ordered.map(|(label, path)| self.recognize_field(label, path, preprocessor.as_ref()));
        Ok(FieldResults::new(outcomes))
    }

    /// Crop paths in field order. Every field must be present.
    pub fn ordered_crops(crops: &CropMap) -> Result<[(FieldLabel, &Path); 6], ExtractError> {
        Ok([
            Self::crop_for(crops, FIELD_ORDER[0])?,
            Self::crop_for(crops, FIELD_ORDER[1])?,
            Self::crop_for(crops, FIELD_ORDER[2])?,
            Self::crop_for(crops, FIELD_ORDER[3])?,
            Self::crop_for(crops, FIELD_ORDER[4])?,
            Self::crop_for(crops, FIELD_ORDER[5])?,
        ])
    }

    fn crop_for(crops: &CropMap, label: FieldLabel) -> Result<(FieldLabel, &Path), ExtractError> {
        crops
            .get(label)
            .map(|path| (label, path.as_path()))
            .ok_or(ExtractError::MissingCrop(label))
    }

    pub fn recognize_field(
        &self,
        label: FieldLabel,
        crop: &Path,
        preprocessor: Option<&ImagePreprocessor>,
    ) -> FieldOutcome {
        let outcome = self.try_recognize(label, crop, preprocessor);
        match &outcome {
            FieldOutcome::Recognized(field) => {
                log::debug!("{}: {} line(s) recognized", label, field.lines().len())
            }
            FieldOutcome::Skipped(reason) => {
                log::warn!("{} ({}) skipped: {}", label, crop.display(), reason)
            }
        }
        outcome
    }

    fn try_recognize(
        &self,
        label: FieldLabel,
        crop: &Path,
        preprocessor: Option<&ImagePreprocessor>,
    ) -> FieldOutcome {
        let language = label.language();
        let recognizer = match self.registry.get(language) {
            Ok(recognizer) => recognizer,
            Err(e) => return FieldOutcome::Skipped(SkipReason::LanguageUnavailable(e.to_string())),
        };

        if let Err(reason) = ImageValidator::inspect(crop) {
            return FieldOutcome::Skipped(SkipReason::ValidationFailed(reason));
        }

        let prepared = match preprocessor {
            Some(preprocessor) => match preprocessor.preprocess(crop) {
                Ok(path) => path,
                Err(e) => return FieldOutcome::Skipped(SkipReason::ValidationFailed(e.to_string())),
            },
            None => crop.to_path_buf(),
        };

        match recognizer.recognize(&prepared) {
            Ok(result) => FieldOutcome::Recognized(RecognizedField(Self::order_lines(
                label,
                result.into_lines(),
            ))),
            Err(RecognitionError::NoImageData(msg)) => FieldOutcome::Skipped(
                SkipReason::RecognitionFailed(format!("image may be corrupted or incompatible: {}", msg)),
            ),
            Err(e) => FieldOutcome::Skipped(SkipReason::RecognitionFailed(e.to_string())),
        }
    }

    /// Puts engine lines into reading order. Right-to-left fields with more than one
    /// line are reversed; `Num2` keeps the engine order.
    pub fn order_lines(label: FieldLabel, mut lines: Vec<String>) -> Vec<String> {
        if label.reads_right_to_left() && lines.len() > 1 {
            lines.reverse();
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Language;
    use crate::processing::ocr::{RecognitionResult, TextRecognizer};
    use image::{ImageBuffer, Rgb};
    use std::path::PathBuf;

    struct Fixed(Vec<&'static str>);

    impl TextRecognizer for Fixed {
        fn recognize(&self, _image: &Path) -> Result<RecognitionResult, RecognitionError> {
            Ok(RecognitionResult::new(self.0.iter().map(|s| s.to_string()).collect()))
        }
    }

    struct Broken;

    impl TextRecognizer for Broken {
        fn recognize(&self, image: &Path) -> Result<RecognitionResult, RecognitionError> {
            Err(RecognitionError::NoImageData(image.display().to_string()))
        }
    }

    fn write_crops(dir: &Path) -> CropMap {
        FIELD_ORDER
            .iter()
            .map(|label| {
                let path = dir.join(format!("card_{}.png", label));
                ImageBuffer::from_pixel(40, 40, Rgb([255u8, 255, 255]))
                    .save(&path)
                    .unwrap();
                (*label, path)
            })
            .collect()
    }

    fn registry_with(
        arabic: Option<Arc<dyn TextRecognizer>>,
        english: Option<Arc<dyn TextRecognizer>>,
    ) -> Arc<RecognizerRegistry> {
        Arc::new(RecognizerRegistry::new(
            move |lang: Language| -> Result<Arc<dyn TextRecognizer>, RecognitionError> {
                let chosen = match lang {
                    Language::Arabic => arabic.clone(),
                    Language::English => english.clone(),
                };
                chosen.ok_or(RecognitionError::Unavailable {
                    language: lang,
                    message: "no traineddata".to_string(),
                })
            },
        ))
    }

    #[test]
    fn test_line_order() {
        let raw = vec!["C".to_string(), "B".to_string(), "A".to_string()];
        assert_eq!(
            FieldRecognitionDispatcher::order_lines(FieldLabel::Name1, raw),
            vec!["A", "B", "C"]
        );
        assert_eq!(
            FieldRecognitionDispatcher::order_lines(FieldLabel::Num2, vec!["1".into(), "2".into()]),
            vec!["1", "2"]
        );
        assert_eq!(
            FieldRecognitionDispatcher::order_lines(FieldLabel::Add1, vec!["only".into()]),
            vec!["only"]
        );
    }

    #[test]
    fn test_all_fields_recognized_with_rtl_reversal() {
        let dir = tempfile::tempdir().unwrap();
        let crops = write_crops(dir.path());
        let dispatcher = FieldRecognitionDispatcher::new(registry_with(
            Some(Arc::new(Fixed(vec!["second", "first"]))),
            Some(Arc::new(Fixed(vec!["A1", "B2"]))),
        ));

        let results = dispatcher.dispatch(&crops).unwrap();
        for label in FIELD_ORDER {
            let expected = if label == FieldLabel::Num2 {
                vec!["A1", "B2"]
            } else {
                vec!["first", "second"]
            };
            assert_eq!(results.field(label).lines(), expected.as_slice());
        }
        assert_eq!(results.skipped().count(), 0);
    }

    #[test]
    fn test_unavailable_language_only_skips_its_fields() {
        let dir = tempfile::tempdir().unwrap();
        let crops = write_crops(dir.path());
        let dispatcher =
            FieldRecognitionDispatcher::new(registry_with(None, Some(Arc::new(Fixed(vec!["X9"])))));

        let results = dispatcher.dispatch(&crops).unwrap();
        assert_eq!(results.field(FieldLabel::Num2).lines(), &["X9".to_string()]);
        let skipped: Vec<FieldLabel> = results.skipped().map(|(label, _)| label).collect();
        assert_eq!(skipped.len(), 5);
        assert!(matches!(
            results.get(FieldLabel::Add1),
            FieldOutcome::Skipped(SkipReason::LanguageUnavailable(_))
        ));
    }

    #[test]
    fn test_invalid_crop_and_engine_errors_skip_single_fields() {
        let dir = tempfile::tempdir().unwrap();
        let mut crops = write_crops(dir.path());
        crops.insert(FieldLabel::Name2, PathBuf::from("/nonexistent/card_Name2.png"));

        let dispatcher = FieldRecognitionDispatcher::new(registry_with(
            Some(Arc::new(Fixed(vec!["ok"]))),
            Some(Arc::new(Broken)),
        ));
        let results = dispatcher.dispatch(&crops).unwrap();

        assert!(matches!(
            results.get(FieldLabel::Name2),
            FieldOutcome::Skipped(SkipReason::ValidationFailed(_))
        ));
        assert!(matches!(
            results.get(FieldLabel::Num2),
            FieldOutcome::Skipped(SkipReason::RecognitionFailed(_))
        ));
        assert_eq!(results.field(FieldLabel::Name1).lines(), &["ok".to_string()]);
        assert!(results.field(FieldLabel::Name2).is_empty());
    }

    #[test]
    fn test_missing_crop_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut crops = write_crops(dir.path());
        crops.remove(FieldLabel::Name2);

        let dispatcher = FieldRecognitionDispatcher::new(registry_with(None, None));
        match dispatcher.dispatch(&crops) {
            Err(ExtractError::MissingCrop(label)) => assert_eq!(label, FieldLabel::Name2),
            other => panic!("expected missing crop, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_crops_are_preprocessed_before_recognition() {
        let dir = tempfile::tempdir().unwrap();
        let crops = write_crops(dir.path());
        let prep_dir = dir.path().join("prep");
        let dispatcher = FieldRecognitionDispatcher::new(registry_with(
            Some(Arc::new(Fixed(vec!["a"]))),
            Some(Arc::new(Fixed(vec!["b"]))),
        ))
        .with_preprocessor(ImagePreprocessor::default().with_output_dir(&prep_dir));

        let first = dispatcher.dispatch(&crops).unwrap();
        let second = dispatcher.dispatch(&crops).unwrap();
        assert_eq!(first.skipped().count(), 0);
        assert_eq!(second.skipped().count(), 0);

        let runs: Vec<PathBuf> = std::fs::read_dir(&prep_dir)
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect();
        assert_eq!(runs.len(), 2);
        for run in runs {
            assert!(run.join("card_Num1_prep.jpg").exists());
        }
    }
}
