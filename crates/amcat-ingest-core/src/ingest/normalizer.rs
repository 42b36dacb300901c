use std::collections::BTreeMap;

use thiserror::Error;

use super::extractor::RawFieldSet;
use super::mapping::{check_literal, coerce, FieldMapping, MappingSource};
use crate::article::{NormalizedArticle, PropertyValue};
use crate::schema::{DestinationSchema, PropertyType};

#[derive(Debug, Error)]
pub enum NormalizationError {
    #[error("Failed to parse value {value:?} for {field}: expected {expected}")]
    Coercion {
        field: String,
        value: String,
        expected: PropertyType,
    },
    #[error("Literal for {field} is a {found}, expected {expected}")]
    LiteralType {
        field: String,
        expected: PropertyType,
        found: PropertyType,
    },
    #[error("Expected a non-empty value for required field(s): {}", .0.join(", "))]
    MissingRequired(Vec<String>),
    #[error("Property {0} is not declared")]
    UndeclaredProperty(String),
}

pub type NormalizationResult<T> = Result<T, NormalizationError>;

/// Applies a mapping to raw fields and builds the article.
#[derive(Debug, Clone, Copy)]
pub struct Assembler<'a> {
    schema: &'a DestinationSchema,
    mapping: &'a FieldMapping,
}

impl<'a> Assembler<'a> {
    #[must_use]
    pub const fn new(schema: &'a DestinationSchema, mapping: &'a FieldMapping) -> Self {
        Self { schema, mapping }
    }

    /// Typed values for every mapped destination that has one.
    fn values(&self, fields: &RawFieldSet) -> NormalizationResult<BTreeMap<String, PropertyValue>> {
        let mut values = BTreeMap::new();
        for (destination, source) in self.mapping.iter() {
            let ptype = self
                .schema
                .property_type(destination)
                .ok_or_else(|| NormalizationError::UndeclaredProperty(destination.to_string()))?;
            let value = match source {
                MappingSource::Field(raw) => match fields.get(raw) {
                    Some(raw_value) => coerce(destination, raw_value, ptype)?,
                    None => None,
                },
                MappingSource::Literal(literal) => {
                    Some(check_literal(destination, literal, ptype)?)
                }
            };
            if let Some(value) = value.filter(|v| !v.is_empty()) {
                values.insert(destination.to_string(), value);
            }
        }
        Ok(values)
    }

    /// Build one article. Every coercion error and a missing title, text or
    /// date fail the whole fragment.
    pub fn assemble(&self, fields: &RawFieldSet) -> NormalizationResult<NormalizedArticle> {
        let mut values = self.values(fields)?;

        let title = values.remove("title");
        let text = values.remove("text");
        let date = values.remove("date");
        match (title, text, date) {
            (
                Some(PropertyValue::String(title)),
                Some(PropertyValue::String(text)),
                Some(PropertyValue::DateTime(date)),
            ) => Ok(NormalizedArticle {
                title,
                text,
                date,
                properties: values,
            }),
            (title, text, date) => {
                let missing = [
                    ("title", title.is_none()),
                    ("text", text.is_none()),
                    ("date", date.is_none()),
                ]
                .into_iter()
                .filter(|(_, missing)| *missing)
                .map(|(name, _)| name.to_string())
                .collect();
                Err(NormalizationError::MissingRequired(missing))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::schema::Property;

    fn csv_mapping() -> (DestinationSchema, FieldMapping) {
        let schema =
            DestinationSchema::with_properties([Property::new("pagina_int", PropertyType::Int)])
                .unwrap();
        let mapping = FieldMapping::new()
            .field("title", "kop")
            .field("date", "datum")
            .field("text", "tekst")
            .field("pagina_int", "pagina")
            .literal("medium", PropertyValue::String("Trouw".into()));
        (schema, mapping)
    }

    #[test]
    fn test_assemble() {
        let (schema, mapping) = csv_mapping();
        let assembler = Assembler::new(&schema, &mapping);

        let row = RawFieldSet::new()
            .with("kop", "kop2")
            .with("datum", "10 maart 1980")
            .with("tekst", "text2")
            .with("pagina", "");
        let article = assembler.assemble(&row).unwrap();
        assert_eq!(article.title, "kop2");
        assert_eq!(article.date.date(), NaiveDate::from_ymd_opt(1980, 3, 10).unwrap());
        assert_eq!(article.medium(), Some("Trouw"));
        assert_eq!(article.get("pagina_int"), None);

        let row = row.with("pagina", "12");
        let article = assembler.assemble(&row).unwrap();
        assert_eq!(article.get("pagina_int"), Some(&PropertyValue::Int(12)));
    }

    #[test]
    fn test_missing_required() {
        let (schema, mapping) = csv_mapping();
        let assembler = Assembler::new(&schema, &mapping);

        let row = RawFieldSet::new().with("kop", " ").with("datum", "2001-01-01");
        let err = assembler.assemble(&row).unwrap_err();
        assert!(matches!(
            err,
            NormalizationError::MissingRequired(missing) if missing == vec!["title", "text"]
        ));
    }

    #[test]
    fn test_coercion_failure() {
        let (schema, mapping) = csv_mapping();
        let assembler = Assembler::new(&schema, &mapping);
        let row = RawFieldSet::new()
            .with("kop", "k")
            .with("datum", "geen datum")
            .with("tekst", "t");
        assert!(matches!(
            assembler.assemble(&row),
            Err(NormalizationError::Coercion { field, .. }) if field == "date"
        ));
    }

    #[test]
    fn test_required_with_wrong_type() {
        let schema = DestinationSchema::new();
        let mapping = FieldMapping::identity().literal("title", PropertyValue::Int(3));
        let assembler = Assembler::new(&schema, &mapping);
        let row = RawFieldSet::new().with("text", "t").with("date", "2001-01-01");
        assert!(matches!(
            assembler.assemble(&row),
            Err(NormalizationError::LiteralType { .. })
        ));
    }
}
