use crate::processing::NumeralNormalizer;
use chrono::NaiveDate;

/// Number of leading digits that carry the birth date.
pub const BIRTH_DATE_DIGITS: usize = 7;

/// Decodes the birth date embedded in the national ID number.
///
/// Layout of the first seven digits: century code (`2` = 1900s, `3` = 2000s),
/// two-digit year, two-digit month, two-digit day.
pub struct NationalIdDecoder;

impl NationalIdDecoder {
    /// Birth date as `YYYY-MM-DD`, or `None` when the digits cannot be decoded.
    ///
    /// Month and day are copied verbatim and are not calendar-checked: the input is
    /// OCR output and an odd value is still worth reporting.
    pub fn decode_birth_date(digits: &str) -> Option<String> {
        let head: Vec<char> = digits.chars().take(BIRTH_DATE_DIGITS).collect();
        if head.len() < BIRTH_DATE_DIGITS || !head.iter().all(|c| c.is_ascii_digit()) {
            return None;
        }

        let century = match head[0] {
            '2' => "19",
            '3' => "20",
            _ => return None,
        };
        let year: String = head[1..3].iter().collect();
        let month: String = head[3..5].iter().collect();
        let day: String = head[5..7].iter().collect();

        Some(format!("{}{}-{}-{}", century, year, month, day))
    }

    /// Birth date from a recognized ID-number line, which may hold alternate
    /// numerals, spaces or stray punctuation.
    pub fn birth_date_from_line(line: &str) -> Option<String> {
        let digits = NumeralNormalizer::canonical_digits(line.trim());
        Self::decode_birth_date(&digits)
    }
}

/// Strict calendar view of a decoded birth date. `None` for impossible dates like `1990-13-01`.
pub fn calendar_birth_date(birth_date: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(birth_date, "%Y-%m-%d").ok()
}
