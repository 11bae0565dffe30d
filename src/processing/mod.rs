pub mod crop;
pub mod detection;
pub mod dispatch;
pub mod image;
pub mod numerals;
pub mod ocr;

pub use crop::CropEngine;
pub use detection::{BoxFileDetector, RegionDetector};
pub use dispatch::FieldRecognitionDispatcher;
pub use image::{ImagePreprocessor, ImageValidator};
pub use numerals::NumeralNormalizer;
pub use ocr::{
    RecognitionResult, RecognizerFactory, RecognizerRegistry, TesseractFactory,
    TesseractRecognizer, TextRecognizer,
};
