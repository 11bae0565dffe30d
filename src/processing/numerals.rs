/// NumeralNormalizer maps alternate digit glyphs onto ASCII digits.
///
/// Covered sets: Arabic-Indic (U+0660..U+0669), Extended Arabic-Indic
/// (U+06F0..U+06F9, Persian/Urdu forms) and fullwidth digits (U+FF10..U+FF19).
/// Every other character passes through untouched.
pub struct NumeralNormalizer;

impl NumeralNormalizer {
    pub fn normalize(text: &str) -> String {
        text.chars().map(Self::normalize_char).collect()
    }

    pub fn normalize_char(c: char) -> char {
        let base = match c {
            '\u{0660}'..='\u{0669}' => 0x0660,
            '\u{06F0}'..='\u{06F9}' => 0x06F0,
            '\u{FF10}'..='\u{FF19}' => 0xFF10,
            _ => return c,
        };
        char::from_digit(c as u32 - base, 10).unwrap_or(c)
    }

    /// Canonical digit run of a recognized line: normalised, non-digits dropped.
    pub fn canonical_digits(text: &str) -> String {
        text.chars()
            .map(Self::normalize_char)
            .filter(|c| c.is_ascii_digit())
            .collect()
    }
}
