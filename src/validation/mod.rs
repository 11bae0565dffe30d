pub mod national_id;

pub use national_id::{calendar_birth_date, NationalIdDecoder, BIRTH_DATE_DIGITS};
