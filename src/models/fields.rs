use serde::de::{Deserialize, Deserializer};
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Semantic regions printed on the front of the card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FieldLabel {
    Add1,
    Add2,
    Name1,
    Name2,
    Num1,
    Num2,
}

/// Fixed processing order. Collaborators that take positional lists expect this order.
pub const FIELD_ORDER: [FieldLabel; 6] = [
    FieldLabel::Add1,
    FieldLabel::Add2,
    FieldLabel::Name1,
    FieldLabel::Name2,
    FieldLabel::Num1,
    FieldLabel::Num2,
];

impl FieldLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldLabel::Add1 => "Add1",
            FieldLabel::Add2 => "Add2",
            FieldLabel::Name1 => "Name1",
            FieldLabel::Name2 => "Name2",
            FieldLabel::Num1 => "Num1",
            FieldLabel::Num2 => "Num2",
        }
    }

    pub fn index(&self) -> usize {
        match self {
            FieldLabel::Add1 => 0,
            FieldLabel::Add2 => 1,
            FieldLabel::Name1 => 2,
            FieldLabel::Name2 => 3,
            FieldLabel::Num1 => 4,
            FieldLabel::Num2 => 5,
        }
    }

    /// Language hint handed to the recognizer. Only the secondary number line is Latin.
    pub fn language(&self) -> Language {
        match self {
            FieldLabel::Num2 => Language::English,
            _ => Language::Arabic,
        }
    }

    /// Right-to-left fields get their recognized lines reversed.
    pub fn reads_right_to_left(&self) -> bool {
        self.language().is_right_to_left()
    }
}

impl fmt::Display for FieldLabel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldLabel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FIELD_ORDER
            .iter()
            .copied()
            .find(|label| label.as_str() == s)
            .ok_or_else(|| format!("Unknown field label: {}", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    Arabic,
    English,
}

impl Language {
    pub const ALL: [Language; 2] = [Language::Arabic, Language::English];

    /// Short hint code (`ar`, `en`).
    pub fn code(&self) -> &'static str {
        match self {
            Language::Arabic => "ar",
            Language::English => "en",
        }
    }

    /// Tesseract traineddata name.
    pub fn tesseract_code(&self) -> &'static str {
        match self {
            Language::Arabic => "ara",
            Language::English => "eng",
        }
    }

    pub fn is_right_to_left(&self) -> bool {
        matches!(self, Language::Arabic)
    }

    pub(crate) fn index(&self) -> usize {
        match self {
            Language::Arabic => 0,
            Language::English => 1,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Fixed-size record holding at most one value per field label.
///
/// Serialises as a JSON object keyed by label. When deserialising, keys outside the
/// closed label set are dropped rather than rejected.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldMap<T> {
    slots: [Option<T>; 6],
}

impl<T> Default for FieldMap<T> {
    fn default() -> Self {
        FieldMap {
            slots: [None, None, None, None, None, None],
        }
    }
}

impl<T> FieldMap<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, label: FieldLabel, value: T) -> Option<T> {
        self.slots[label.index()].replace(value)
    }

    pub fn get(&self, label: FieldLabel) -> Option<&T> {
        self.slots[label.index()].as_ref()
    }

    pub fn remove(&mut self, label: FieldLabel) -> Option<T> {
        self.slots[label.index()].take()
    }

    pub fn contains(&self, label: FieldLabel) -> bool {
        self.slots[label.index()].is_some()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Present entries in field order.
    pub fn iter(&self) -> impl Iterator<Item = (FieldLabel, &T)> {
        FIELD_ORDER
            .iter()
            .filter_map(move |label| self.get(*label).map(|value| (*label, value)))
    }

    /// First label of the fixed order that has no entry.
    pub fn first_missing(&self) -> Option<FieldLabel> {
        FIELD_ORDER.iter().copied().find(|label| !self.contains(*label))
    }

    /// Builds a map from loosely labelled entries, ignoring labels outside the fixed set.
    pub fn from_labeled<K, I>(entries: I) -> Self
    where
        K: AsRef<str>,
        I: IntoIterator<Item = (K, T)>,
    {
        let mut map = FieldMap::new();
        for (key, value) in entries {
            match key.as_ref().parse::<FieldLabel>() {
                Ok(label) => {
                    map.insert(label, value);
                }
                Err(_) => log::debug!("Ignoring unknown field label '{}'", key.as_ref()),
            }
        }
        map
    }
}

impl<T> FromIterator<(FieldLabel, T)> for FieldMap<T> {
    fn from_iter<I: IntoIterator<Item = (FieldLabel, T)>>(iter: I) -> Self {
        let mut map = FieldMap::new();
        for (label, value) in iter {
            map.insert(label, value);
        }
        map
    }
}

impl<T: Serialize> Serialize for FieldMap<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (label, value) in self.iter() {
            map.serialize_entry(label.as_str(), value)?;
        }
        map.end()
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for FieldMap<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw: HashMap<String, T> = HashMap::deserialize(deserializer)?;
        Ok(FieldMap::from_labeled(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_per_field() {
        for label in FIELD_ORDER {
            let expected = if label == FieldLabel::Num2 { "en" } else { "ar" };
            assert_eq!(label.language().code(), expected);
        }
        assert!(!FieldLabel::Num2.reads_right_to_left());
        assert!(FieldLabel::Name1.reads_right_to_left());
    }

    #[test]
    fn test_unknown_labels_are_ignored() {
        let json = r#"{"Name1": 1, "Num2": 2, "Photo": 3}"#;
        let map: FieldMap<u32> = serde_json::from_str(json).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map.get(FieldLabel::Num2), Some(&2));
        assert_eq!(map.first_missing(), Some(FieldLabel::Add1));
    }

    #[test]
    fn test_iteration_follows_field_order() {
        let map: FieldMap<&str> = vec![
            (FieldLabel::Num2, "b"),
            (FieldLabel::Add1, "a"),
        ]
        .into_iter()
        .collect();
        let labels: Vec<FieldLabel> = map.iter().map(|(label, _)| label).collect();
        assert_eq!(labels, vec![FieldLabel::Add1, FieldLabel::Num2]);
        assert_eq!(serde_json::to_string(&map).unwrap(), r#"{"Add1":"a","Num2":"b"}"#);
    }
}
