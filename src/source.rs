use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::FieldError;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Text(String),
    Float(f64),
    Int(i64),
    Empty,
}

impl AttributeValue {
    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::Text(text) => Some(text.trim_matches(|c: char| c.is_whitespace() || c == '\0').to_string()),
            Self::Float(value) => Some(value.to_string()),
            Self::Int(value) => Some(value.to_string()),
            Self::Empty => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(value) => Some(*value),
            Self::Int(value) => Some(*value as f64),
            // Decimal strings may carry several backslash separated values.
            Self::Text(text) => text.split('\\').next()?.trim().parse().ok(),
            Self::Empty => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            Self::Float(value) if value.fract() == 0.0 => Some(*value as i64),
            Self::Text(text) => text.split('\\').next()?.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Text(text) => text.trim().is_empty(),
            _ => false,
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

pub trait AttributeSource {
    fn attribute(&self, keyword: &str) -> Option<AttributeValue>;

    fn item(&self, keyword: &str, index: usize) -> Option<&dyn AttributeSource>;
}

pub(crate) fn require(
    source: &dyn AttributeSource,
    keyword: &'static str,
) -> Result<AttributeValue, FieldError> {
    source
        .attribute(keyword)
        .ok_or(FieldError::Missing(keyword))
}

pub(crate) fn require_text(
    source: &dyn AttributeSource,
    keyword: &'static str,
) -> Result<String, FieldError> {
    Ok(require(source, keyword)?.as_text().unwrap_or_default())
}

pub(crate) fn require_f64(
    source: &dyn AttributeSource,
    keyword: &'static str,
) -> Result<f64, FieldError> {
    let value = require(source, keyword)?;
    value
        .as_f64()
        .ok_or_else(|| FieldError::malformed(keyword, format!("{value:?} is not a number")))
}

pub(crate) fn require_i64(
    source: &dyn AttributeSource,
    keyword: &'static str,
) -> Result<i64, FieldError> {
    let value = require(source, keyword)?;
    value
        .as_i64()
        .ok_or_else(|| FieldError::malformed(keyword, format!("{value:?} is not an integer")))
}

/// Owned attribute table, used for synthetic sources and tests.
#[derive(Debug, Clone, Default)]
pub struct AttributeSet {
    values: BTreeMap<String, AttributeValue>,
    sequences: BTreeMap<String, Vec<AttributeSet>>,
}

impl AttributeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, keyword: &str, value: impl Into<AttributeValue>) -> Self {
        self.insert(keyword, value);
        self
    }

    pub fn with_sequence(mut self, keyword: &str, items: Vec<AttributeSet>) -> Self {
        self.sequences.insert(keyword.to_string(), items);
        self
    }

    pub fn insert(&mut self, keyword: &str, value: impl Into<AttributeValue>) {
        self.values.insert(keyword.to_string(), value.into());
    }

    pub fn remove(&mut self, keyword: &str) {
        self.values.remove(keyword);
        self.sequences.remove(keyword);
    }
}

impl AttributeSource for AttributeSet {
    fn attribute(&self, keyword: &str) -> Option<AttributeValue> {
        self.values.get(keyword).cloned()
    }

    fn item(&self, keyword: &str, index: usize) -> Option<&dyn AttributeSource> {
        self.sequences
            .get(keyword)?
            .get(index)
            .map(|item| item as &dyn AttributeSource)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decimal_strings_parse_first_value() {
        let value = AttributeValue::from(" 33.3\\12 ");
        assert_eq!(value.as_f64(), Some(33.3));
        assert_eq!(AttributeValue::from("12").as_i64(), Some(12));
        assert!(AttributeValue::from("  ").is_empty());
    }

    #[test]
    fn sequence_items_are_addressable() {
        let set = AttributeSet::new().with_sequence(
            "Regions",
            vec![AttributeSet::new().with("PhysicalDeltaX", 0.01)],
        );
        let item = set.item("Regions", 0).expect("first item");
        assert_eq!(item.attribute("PhysicalDeltaX"), Some(AttributeValue::Float(0.01)));
        assert!(set.item("Regions", 1).is_none());
        assert!(set.item("Missing", 0).is_none());
    }
}
