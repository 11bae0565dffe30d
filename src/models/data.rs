use crate::models::fields::{FieldLabel, FieldMap, FIELD_ORDER};
use imageproc::rect::Rect;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::path::PathBuf;

/// Axis-aligned region in source-image pixel space, as `[x1, y1, x2, y2]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 4]", into = "[f32; 4]")]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        BoundingBox { x1, y1, x2, y2 }
    }

    pub fn is_degenerate(&self) -> bool {
        !(self.x1 < self.x2 && self.y1 < self.y2)
    }

    /// Pixel rectangle inside a `width` x `height` image.
    ///
    /// Swapped, out-of-range or zero-area boxes are clamped to the image and never
    /// produce less than a single pixel, so imprecise detections still crop.
    pub fn clamp_to(&self, width: u32, height: u32) -> Rect {
        let (left, right) = Self::clamp_axis(self.x1, self.x2, width);
        let (top, bottom) = Self::clamp_axis(self.y1, self.y2, height);
        Rect::at(left as i32, top as i32).of_size(right - left, bottom - top)
    }

    fn clamp_axis(a: f32, b: f32, extent: u32) -> (u32, u32) {
        let extent = extent.max(1);
        // f32::max/min drop NaN in favour of the other operand
        let lo = a.min(b).max(0.0).floor() as u32;
        let hi = a.max(b).max(0.0).ceil() as u32;
        let lo = lo.min(extent - 1);
        let hi = hi.clamp(lo + 1, extent);
        (lo, hi)
    }
}

impl From<[f32; 4]> for BoundingBox {
    fn from(coords: [f32; 4]) -> Self {
        BoundingBox::new(coords[0], coords[1], coords[2], coords[3])
    }
}

impl From<BoundingBox> for [f32; 4] {
    fn from(bbox: BoundingBox) -> Self {
        [bbox.x1, bbox.y1, bbox.x2, bbox.y2]
    }
}

/// Field label -> detected region. Produced once per request by the detector.
pub type DetectionMap = FieldMap<BoundingBox>;

/// Field label -> persisted crop file.
pub type CropMap = FieldMap<PathBuf>;

/// Recognized text lines for one field, in reading order.
///
/// An empty field means recognition ran and produced nothing usable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecognizedField(pub Vec<String>);

impl RecognizedField {
    pub fn empty() -> Self {
        RecognizedField(Vec::new())
    }

    pub fn lines(&self) -> &[String] {
        &self.0
    }

    pub fn first_line(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn joined(&self) -> String {
        self.0
            .iter()
            .map(|line| line.trim())
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Why a field ended up empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    LanguageUnavailable(String),
    ValidationFailed(String),
    RecognitionFailed(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SkipReason::LanguageUnavailable(msg) => write!(f, "language unavailable: {}", msg),
            SkipReason::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
            SkipReason::RecognitionFailed(msg) => write!(f, "recognition failed: {}", msg),
        }
    }
}

/// Terminal state of one field after a dispatch run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldOutcome {
    Recognized(RecognizedField),
    Skipped(SkipReason),
}

impl FieldOutcome {
    pub fn field(&self) -> RecognizedField {
        match self {
            FieldOutcome::Recognized(field) => field.clone(),
            FieldOutcome::Skipped(_) => RecognizedField::empty(),
        }
    }

    pub fn skip_reason(&self) -> Option<&SkipReason> {
        match self {
            FieldOutcome::Skipped(reason) => Some(reason),
            FieldOutcome::Recognized(_) => None,
        }
    }
}

/// One outcome per field of the fixed order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldResults {
    outcomes: [FieldOutcome; 6],
}

impl FieldResults {
    pub(crate) fn new(outcomes: [FieldOutcome; 6]) -> Self {
        FieldResults { outcomes }
    }

    pub fn get(&self, label: FieldLabel) -> &FieldOutcome {
        &self.outcomes[label.index()]
    }

    pub fn field(&self, label: FieldLabel) -> RecognizedField {
        self.get(label).field()
    }

    pub fn iter(&self) -> impl Iterator<Item = (FieldLabel, &FieldOutcome)> {
        FIELD_ORDER.iter().map(move |label| (*label, self.get(*label)))
    }

    pub fn skipped(&self) -> impl Iterator<Item = (FieldLabel, &SkipReason)> {
        self.iter()
            .filter_map(|(label, outcome)| outcome.skip_reason().map(|reason| (label, reason)))
    }
}

/// Final structured output of a pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    #[serde(rename = "Add1")]
    pub add1: RecognizedField,
    #[serde(rename = "Add2")]
    pub add2: RecognizedField,
    #[serde(rename = "Name1")]
    pub name1: RecognizedField,
    #[serde(rename = "Name2")]
    pub name2: RecognizedField,
    #[serde(rename = "Num1")]
    pub num1: RecognizedField,
    #[serde(rename = "Num2")]
    pub num2: RecognizedField,
    /// Derived birth date (`YYYY-MM-DD`), absent when the ID digits do not decode.
    #[serde(
        rename = "BD",
        serialize_with = "serialize_absent_as_empty",
        deserialize_with = "deserialize_empty_as_absent",
        default
    )]
    pub birth_date: Option<String>,
}

impl DocumentRecord {
    pub fn from_results(results: &FieldResults, birth_date: Option<String>) -> Self {
        DocumentRecord {
            add1: results.field(FieldLabel::Add1),
            add2: results.field(FieldLabel::Add2),
            name1: results.field(FieldLabel::Name1),
            name2: results.field(FieldLabel::Name2),
            num1: results.field(FieldLabel::Num1),
            num2: results.field(FieldLabel::Num2),
            birth_date,
        }
    }

    pub fn field(&self, label: FieldLabel) -> &RecognizedField {
        match label {
            FieldLabel::Add1 => &self.add1,
            FieldLabel::Add2 => &self.add2,
            FieldLabel::Name1 => &self.name1,
            FieldLabel::Name2 => &self.name2,
            FieldLabel::Num1 => &self.num1,
            FieldLabel::Num2 => &self.num2,
        }
    }

    /// One string per field, lines joined by a single space.
    pub fn flattened(&self) -> FlatRecord {
        FlatRecord {
            fields: FIELD_ORDER
                .iter()
                .map(|label| (*label, self.field(*label).joined()))
                .collect(),
            birth_date: self.birth_date.clone().unwrap_or_default(),
        }
    }
}

/// Single-string-per-field view of a [`DocumentRecord`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlatRecord {
    #[serde(flatten)]
    pub fields: FieldMap<String>,
    #[serde(rename = "BD")]
    pub birth_date: String,
}

fn serialize_absent_as_empty<S: Serializer>(
    value: &Option<String>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(value.as_deref().unwrap_or(""))
}

fn deserialize_empty_as_absent<'de, D: serde::Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.is_empty()))
}
