use crate::models::Language;
use crate::utils::RecognitionError;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tesseract::{PageSegMode, Tesseract};

/// Recognized text lines in the order the engine emitted them (left to right, top to bottom).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecognitionResult {
    lines: Vec<String>,
}

impl RecognitionResult {
    pub fn new(lines: Vec<String>) -> Self {
        RecognitionResult { lines }
    }

    /// Splits raw engine text into trimmed, non-empty lines.
    pub fn from_text(text: &str) -> Self {
        RecognitionResult {
            lines: text
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn into_lines(self) -> Vec<String> {
        self.lines
    }
}

/// Text recognition capability for one language.
pub trait TextRecognizer: Send + Sync {
    fn recognize(&self, image: &Path) -> Result<RecognitionResult, RecognitionError>;
}

/// Builds the recognizer for a language. Called at most once per language unless reset.
pub trait RecognizerFactory: Send + Sync {
    fn build(&self, language: Language) -> Result<Arc<dyn TextRecognizer>, RecognitionError>;
}

impl<F> RecognizerFactory for F
where
    F: Fn(Language) -> Result<Arc<dyn TextRecognizer>, RecognitionError> + Send + Sync,
{
    fn build(&self, language: Language) -> Result<Arc<dyn TextRecognizer>, RecognitionError> {
        self(language)
    }
}

/// Tesseract-backed recognizer.
///
/// The engine loaded at build time is parked in the recognizer and reused by every call.
/// Calls on one recognizer are serialised by its lock.
pub struct TesseractRecognizer {
    datapath: Option<String>,
    language: Language,
    engine: Mutex<Option<Tesseract>>,
}

impl TesseractRecognizer {
    pub fn new(datapath: Option<&Path>, language: Language) -> Result<Self, RecognitionError> {
        let datapath = match datapath {
            Some(path) => Some(
                path.to_str()
                    .ok_or_else(|| RecognitionError::Unavailable {
                        language,
                        message: format!("tessdata path is not valid UTF-8: {}", path.display()),
                    })?
                    .to_string(),
            ),
            None => None,
        };

        let engine = Self::load(datapath.as_deref(), language)
            .map_err(|message| RecognitionError::Unavailable { language, message })?;

        log::info!("Initialised Tesseract for '{}'", language);
        Ok(TesseractRecognizer {
            datapath,
            language,
            engine: Mutex::new(Some(engine)),
        })
    }

    fn load(datapath: Option<&str>, language: Language) -> Result<Tesseract, String> {
        let mut tess = Tesseract::new(datapath, Some(language.tesseract_code()))
            .map_err(|e| format!("Tesseract init error: {}", e))?;
        tess.set_page_seg_mode(PageSegMode::PsmSingleBlock);
        Ok(tess)
    }

    fn engine(&self) -> MutexGuard<'_, Option<Tesseract>> {
        self.engine
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// True when an initialised engine is parked for the next call.
    pub fn has_engine(&self) -> bool {
        self.engine().is_some()
    }
}

impl TextRecognizer for TesseractRecognizer {
    fn recognize(&self, image: &Path) -> Result<RecognitionResult, RecognitionError> {
        let image_str = image.to_str().ok_or_else(|| {
            RecognitionError::Failed(format!("image path is not valid UTF-8: {}", image.display()))
        })?;

        let mut slot = self.engine();
        // `set_image` consumes the engine; after a failed call the slot stays empty and
        // the next call loads a new one
        let tess = match slot.take() {
            Some(tess) => tess,
            None => {
                log::debug!("Reloading Tesseract for '{}'", self.language);
                Self::load(self.datapath.as_deref(), self.language)
                    .map_err(RecognitionError::Failed)?
            }
        };

        let mut tess = tess
            .set_image(image_str)
            .map_err(|e| RecognitionError::NoImageData(format!("{}: {}", image.display(), e)))?;
        let text = tess.get_text();
        *slot = Some(tess);

        let text = text.map_err(|e| RecognitionError::Failed(format!("Tesseract error: {}", e)))?;
        Ok(RecognitionResult::from_text(&text))
    }
}

/// Builds [`TesseractRecognizer`]s from an optional traineddata directory.
#[derive(Debug, Clone, Default)]
pub struct TesseractFactory {
    datapath: Option<PathBuf>,
}

impl TesseractFactory {
    pub fn new(datapath: Option<PathBuf>) -> Self {
        TesseractFactory { datapath }
    }
}

impl RecognizerFactory for TesseractFactory {
    fn build(&self, language: Language) -> Result<Arc<dyn TextRecognizer>, RecognitionError> {
        let recognizer = TesseractRecognizer::new(self.datapath.as_deref(), language)?;
        Ok(Arc::new(recognizer))
    }
}

enum Slot {
    Empty,
    Ready(Arc<dyn TextRecognizer>),
    Faulted(String),
}

/// Process-wide cache of one recognizer per language.
///
/// Each language has its own lock, so a slow first initialisation of one language never
/// blocks the other. A failed initialisation sticks until [`RecognizerRegistry::reset`].
pub struct RecognizerRegistry {
    factory: Box<dyn RecognizerFactory>,
    slots: [Mutex<Slot>; 2],
}

impl RecognizerRegistry {
    pub fn new(factory: impl RecognizerFactory + 'static) -> Self {
        RecognizerRegistry {
            factory: Box::new(factory),
            slots: [Mutex::new(Slot::Empty), Mutex::new(Slot::Empty)],
        }
    }

    pub fn tesseract(datapath: Option<PathBuf>) -> Self {
        Self::new(TesseractFactory::new(datapath))
    }

    fn slot(&self, language: Language) -> MutexGuard<'_, Slot> {
        // Slot updates are single assignments, so a poisoned lock still holds a consistent value
        self.slots[language.index()]
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, language: Language) -> Result<Arc<dyn TextRecognizer>, RecognitionError> {
        let mut slot = self.slot(language);
        match &*slot {
            Slot::Ready(recognizer) => return Ok(Arc::clone(recognizer)),
            Slot::Faulted(message) => {
                return Err(RecognitionError::Unavailable {
                    language,
                    message: message.clone(),
                })
            }
            Slot::Empty => {}
        }

        match self.factory.build(language) {
            Ok(recognizer) => {
                *slot = Slot::Ready(Arc::clone(&recognizer));
                Ok(recognizer)
            }
            Err(err) => {
                let message = match err {
                    RecognitionError::Unavailable { message, .. } => message,
                    other => other.to_string(),
                };
                log::warn!("Recognizer for '{}' failed to initialise: {}", language, message);
                *slot = Slot::Faulted(message.clone());
                Err(RecognitionError::Unavailable { language, message })
            }
        }
    }

    /// Sticky fault message for a language, if its initialisation failed.
    pub fn fault(&self, language: Language) -> Option<String> {
        match &*self.slot(language) {
            Slot::Faulted(message) => Some(message.clone()),
            _ => None,
        }
    }

    /// Forgets the cached recognizer or fault so the next `get` initialises again.
    pub fn reset(&self, language: Language) {
        *self.slot(language) = Slot::Empty;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    type Built = Result<Arc<dyn TextRecognizer>, RecognitionError>;

    struct Echo;

    impl TextRecognizer for Echo {
        fn recognize(&self, image: &Path) -> Result<RecognitionResult, RecognitionError> {
            Ok(RecognitionResult::new(vec![image.display().to_string()]))
        }
    }

    #[test]
    fn test_tesseract_engine_is_loaded_once_and_reused() {
        let recognizer = match TesseractRecognizer::new(None, Language::English) {
            Ok(recognizer) => recognizer,
            Err(e) => {
                eprintln!("eng traineddata not installed, skipping: {}", e);
                return;
            }
        };
        assert!(recognizer.has_engine());

        let dir = tempfile::tempdir().unwrap();
        let blank = dir.path().join("blank.png");
        image::ImageBuffer::from_pixel(64, 32, image::Rgb([255u8, 255, 255]))
            .save(&blank)
            .unwrap();

        for _ in 0..2 {
            recognizer.recognize(&blank).unwrap();
            assert!(recognizer.has_engine());
        }

        let missing = recognizer.recognize(&dir.path().join("missing.png"));
        assert!(matches!(missing, Err(RecognitionError::NoImageData(_))));
        assert!(!recognizer.has_engine());

        recognizer.recognize(&blank).unwrap();
        assert!(recognizer.has_engine());
    }

    #[test]
    fn test_from_text_drops_blank_lines() {
        let result = RecognitionResult::from_text("  first \n\n\tsecond\n   \n");
        assert_eq!(result.lines(), &["first".to_string(), "second".to_string()]);
        assert!(RecognitionResult::from_text("").lines().is_empty());
    }

    #[test]
    fn test_initialises_once_under_concurrency() {
        let builds = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&builds);
        let registry = Arc::new(RecognizerRegistry::new(move |_lang: Language| -> Built {
            counter.fetch_add(1, Ordering::SeqCst);
            thread::sleep(std::time::Duration::from_millis(20));
            Ok(Arc::new(Echo))
        }));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || registry.get(Language::Arabic).is_ok())
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap());
        }
        assert_eq!(builds.load(Ordering::SeqCst), 1);

        registry.get(Language::English).unwrap();
        assert_eq!(builds.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_failure_is_sticky_until_reset() {
        let builds = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&builds);
        let registry = RecognizerRegistry::new(move |lang: Language| -> Built {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(RecognitionError::Unavailable {
                    language: lang,
                    message: "missing ara.traineddata".to_string(),
                })
            } else {
                Ok(Arc::new(Echo))
            }
        });

        for _ in 0..3 {
            match registry.get(Language::Arabic) {
                Err(RecognitionError::Unavailable { message, .. }) => {
                    assert_eq!(message, "missing ara.traineddata")
                }
                _ => panic!("expected sticky fault"),
            }
        }
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert!(registry.fault(Language::Arabic).is_some());

        registry.reset(Language::Arabic);
        assert!(registry.get(Language::Arabic).is_ok());
        assert_eq!(registry.fault(Language::Arabic), None);
    }
}
