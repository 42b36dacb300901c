use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::schema::PropertyType;

/// A typed property value.
///
/// Untagged so that mapping literals can be written as plain JSON values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Int(i64),
    Float(f64),
    DateTime(NaiveDateTime),
    Tags(BTreeSet<String>),
    String(String),
}

impl PropertyValue {
    pub const fn property_type(&self) -> PropertyType {
        match self {
            Self::Int(_) => PropertyType::Int,
            Self::Float(_) => PropertyType::Float,
            Self::DateTime(_) => PropertyType::DateTime,
            Self::Tags(_) => PropertyType::Tags,
            Self::String(_) => PropertyType::String,
        }
    }

    /// Whether the value counts as absent for a required property.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::String(s) => s.trim().is_empty(),
            Self::Tags(t) => t.is_empty(),
            Self::Int(_) | Self::Float(_) | Self::DateTime(_) => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub const fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            Self::DateTime(d) => Some(*d),
            _ => None,
        }
    }
}

/// The output of a successful run over one fragment.
///
/// `title`, `text` and `date` are always present and non-empty; every other
/// property is optional and lives in `properties`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedArticle {
    pub title: String,
    pub text: String,
    pub date: NaiveDateTime,
    /// Remaining properties keyed by name, in name order
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, PropertyValue>,
}

impl NormalizedArticle {
    pub fn get(&self, name: &str) -> Option<&PropertyValue> {
        self.properties.get(name)
    }

    pub fn medium(&self) -> Option<&str> {
        self.get("medium").and_then(PropertyValue::as_str)
    }

    pub fn url(&self) -> Option<&str> {
        self.get("url").and_then(PropertyValue::as_str)
    }

    pub fn section(&self) -> Option<&str> {
        self.get("section").and_then(PropertyValue::as_str)
    }

    pub fn byline(&self) -> Option<&str> {
        self.get("byline").and_then(PropertyValue::as_str)
    }

    pub fn author(&self) -> Option<&str> {
        self.get("author").and_then(PropertyValue::as_str)
    }

    pub fn length(&self) -> Option<i64> {
        self.get("length").and_then(PropertyValue::as_int)
    }

    pub fn page(&self) -> Option<i64> {
        self.get("page").and_then(PropertyValue::as_int)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_values_deserialize_by_shape() {
        let v: PropertyValue = serde_json::from_str("12").unwrap();
        assert_eq!(v, PropertyValue::Int(12));

        let v: PropertyValue = serde_json::from_str("1.5").unwrap();
        assert_eq!(v, PropertyValue::Float(1.5));

        let v: PropertyValue = serde_json::from_str("\"2012-01-01T00:00:00\"").unwrap();
        assert_eq!(v.property_type(), PropertyType::DateTime);

        let v: PropertyValue = serde_json::from_str("\"De Volkskrant\"").unwrap();
        assert_eq!(v, PropertyValue::String("De Volkskrant".into()));

        let v: PropertyValue = serde_json::from_str(r#"["b", "a"]"#).unwrap();
        assert_eq!(v.property_type(), PropertyType::Tags);
    }

    #[test]
    fn test_emptiness() {
        assert!(PropertyValue::String("  ".into()).is_empty());
        assert!(PropertyValue::Tags(BTreeSet::new()).is_empty());
        assert!(!PropertyValue::Int(0).is_empty());
    }
}
