pub mod data;
pub mod fields;

pub use data::{
    BoundingBox, CropMap, DetectionMap, DocumentRecord, FieldOutcome, FieldResults, FlatRecord,
    RecognizedField, SkipReason,
};
pub use fields::{FieldLabel, FieldMap, Language, FIELD_ORDER};
