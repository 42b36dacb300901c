//! Field mappings, mapping suggestions and value coercion.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::extractor::{RawFieldSet, RawValue};
use super::normalizer::{NormalizationError, NormalizationResult};
use crate::article::PropertyValue;
use crate::dates::read_date;
use crate::error::{Error, Result};
use crate::patterns::compile;
use crate::schema::{
    is_builtin, parse_property_name, to_valid_field_name, DestinationSchema, Property,
    PropertyType, BUILTIN_PROPERTIES, REQUIRED_PROPERTIES,
};

/// Distinct sample values kept per raw field when suggesting.
pub const MAX_SAMPLE_VALUES: usize = 5;

static ISO_DATE: LazyLock<Regex> = LazyLock::new(|| {
    compile(r"^(\d{4})-(\d{2})-(\d{2})(?:[T ]\d{2}:\d{2}(?::\d{2}(?:\.\d+)?)?(?:Z|[+-]\d{2}:?\d{2})?)?$")
});

/// Where a destination property gets its value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum MappingSource {
    /// A raw field of the fragment
    Field(String),
    /// The same constant for every article
    Literal(PropertyValue),
}

/// Destination property name to value source.
///
/// Serialises as `{"title": {"type": "field", "value": "kop"}, ...}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldMapping {
    entries: BTreeMap<String, MappingSource>,
}

impl FieldMapping {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Map every built-in property to the raw field of the same name.
    #[must_use]
    pub fn identity() -> Self {
        BUILTIN_PROPERTIES
            .iter()
            .fold(Self::new(), |m, (name, _)| m.field(*name, *name))
    }

    #[must_use]
    pub fn field(self, destination: impl Into<String>, raw: impl Into<String>) -> Self {
        self.with_source(destination, MappingSource::Field(raw.into()))
    }

    #[must_use]
    pub fn literal(self, destination: impl Into<String>, value: PropertyValue) -> Self {
        self.with_source(destination, MappingSource::Literal(value))
    }

    #[must_use]
    pub fn with_source(mut self, destination: impl Into<String>, source: MappingSource) -> Self {
        self.entries.insert(destination.into(), source);
        self
    }

    pub fn get(&self, destination: &str) -> Option<&MappingSource> {
        self.entries.get(destination)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MappingSource)> {
        self.entries.iter().map(|(d, s)| (d.as_str(), s))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Read a mapping from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Check the mapping against a schema before any fragment is read.
    pub fn validate(&self, schema: &DestinationSchema) -> Result<()> {
        for destination in self.entries.keys() {
            if parse_property_name(destination).is_none() {
                return Err(Error::InvalidPropertyName(destination.clone()));
            }
            if !schema.contains(destination) {
                return Err(Error::UnknownDestination(destination.clone()));
            }
        }
        let unmapped: Vec<String> = REQUIRED_PROPERTIES
            .iter()
            .filter(|name| !self.entries.contains_key(**name))
            .map(ToString::to_string)
            .collect();
        if !unmapped.is_empty() {
            return Err(Error::UnmappedRequired(unmapped));
        }
        Ok(())
    }
}

fn is_iso_date(value: &str) -> bool {
    ISO_DATE.captures(value.trim()).is_some_and(|caps| {
        let part = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());
        match (part(1), part(2), part(3)) {
            (Some(y), Some(m), Some(d)) => i32::try_from(y)
                .ok()
                .and_then(|y| NaiveDate::from_ymd_opt(y, m, d))
                .is_some(),
            _ => false,
        }
    })
}

fn is_web_url(value: &str) -> bool {
    url::Url::parse(value.trim()).is_ok_and(|u| matches!(u.scheme(), "http" | "https"))
}

fn with_suffix(name: String, ptype: PropertyType, suffix: &str) -> (String, PropertyType) {
    if name.ends_with(&format!("_{suffix}")) {
        (name, ptype)
    } else {
        (format!("{name}_{suffix}"), ptype)
    }
}

/// `field` without a trailing `_int`, `_url` or other type suffix.
fn strip_type_suffix(field: &str) -> &str {
    let field = field.trim();
    field
        .rsplit_once('_')
        .filter(|(base, suffix)| {
            !base.is_empty() && PropertyType::from_suffix(&suffix.to_lowercase()).is_some()
        })
        .map_or(field, |(base, _)| base)
}

/// Guess a destination property and its type for a raw field.
///
/// Built-in names map to themselves; a name carrying a type suffix keeps
/// it; otherwise the sample value decides, trying an ISO date, an integer,
/// a float and a web URL in that order. A column called `id` and a field
/// without a sample get no suggestion.
pub fn guess_destination_and_type(
    field: &str,
    sample: Option<&str>,
) -> Option<(String, PropertyType)> {
    if field == "id" {
        return None;
    }
    let lower = field.trim().to_lowercase();
    if let Some((name, ptype)) = BUILTIN_PROPERTIES.iter().find(|(n, _)| *n == lower) {
        return Some(((*name).to_string(), *ptype));
    }
    if let Some((_, Some(ptype))) = parse_property_name(field) {
        if ptype != PropertyType::String {
            return Some((field.to_string(), ptype));
        }
    }

    let sample = sample?.trim();
    let name = to_valid_field_name(strip_type_suffix(field));
    if is_iso_date(sample) {
        return Some(with_suffix(name, PropertyType::DateTime, "date"));
    }
    if sample.parse::<i64>().is_ok() {
        return Some(with_suffix(name, PropertyType::Int, "int"));
    }
    if sample.parse::<f64>().is_ok() {
        return Some(with_suffix(name, PropertyType::Float, "num"));
    }
    if is_web_url(sample) {
        return Some(with_suffix(name, PropertyType::String, "url"));
    }
    Some((name, PropertyType::String))
}

/// A proposed mapping for one raw field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSuggestion {
    pub field: String,
    pub destination: Option<String>,
    #[serde(rename = "type")]
    pub ptype: Option<PropertyType>,
    /// Distinct non-empty values seen for the field
    pub values: Vec<String>,
}

impl FieldSuggestion {
    /// Turn accepted suggestions into a mapping plus the extra properties
    /// the schema has to declare for it. The first suggestion for a
    /// destination wins.
    pub fn into_mapping(
        suggestions: impl IntoIterator<Item = Self>,
    ) -> (FieldMapping, Vec<Property>) {
        let mut mapping = FieldMapping::new();
        let mut extra = Vec::new();
        for suggestion in suggestions {
            let (Some(destination), Some(ptype)) = (suggestion.destination, suggestion.ptype) else {
                continue;
            };
            if mapping.get(&destination).is_some() {
                continue;
            }
            if !is_builtin(&destination) {
                extra.push(Property::new(destination.clone(), ptype));
            }
            mapping = mapping.field(destination, suggestion.field);
        }
        (mapping, extra)
    }
}

/// Suggest a mapping from sampled fragments.
///
/// Fields keep the order they were first seen in unless `sort` is set,
/// which tabular formats use since their column order carries no meaning
/// for the suggestion list.
pub fn suggest_fields<'a>(
    samples: impl IntoIterator<Item = &'a RawFieldSet>,
    sort: bool,
) -> Vec<FieldSuggestion> {
    let mut order: Vec<String> = Vec::new();
    let mut values: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for sample in samples {
        for (name, value) in sample.iter() {
            let seen = values.entry(name.to_string()).or_insert_with(|| {
                order.push(name.to_string());
                Vec::new()
            });
            if value.is_blank() || seen.len() >= MAX_SAMPLE_VALUES {
                continue;
            }
            let value = value.to_string();
            if !seen.contains(&value) {
                seen.push(value);
            }
        }
    }
    if sort {
        order.sort();
    }

    order
        .into_iter()
        .map(|field| {
            let values = values.remove(&field).unwrap_or_default();
            let guess = guess_destination_and_type(&field, values.first().map(String::as_str));
            let (destination, ptype) = guess.map_or((None, None), |(d, t)| (Some(d), Some(t)));
            FieldSuggestion {
                field,
                destination,
                ptype,
                values,
            }
        })
        .collect()
}

fn coercion_error(field: &str, value: &RawValue, expected: PropertyType) -> NormalizationError {
    NormalizationError::Coercion {
        field: field.to_string(),
        value: value.to_string(),
        expected,
    }
}

/// Convert a raw value to the type of its destination property.
///
/// Blank values coerce to `None`: the property is left out.
pub fn coerce(
    field: &str,
    value: &RawValue,
    ptype: PropertyType,
) -> NormalizationResult<Option<PropertyValue>> {
    if value.is_blank() {
        return Ok(None);
    }
    let fail = || coercion_error(field, value, ptype);

    let coerced = match (ptype, value) {
        (PropertyType::String, v) => PropertyValue::String(v.to_string().trim().to_string()),
        (PropertyType::Int, RawValue::Int(i)) => PropertyValue::Int(*i),
        (PropertyType::Int, RawValue::Text(s)) => {
            PropertyValue::Int(s.trim().parse().map_err(|_| fail())?)
        }
        #[allow(clippy::cast_precision_loss)]
        (PropertyType::Float, RawValue::Int(i)) => PropertyValue::Float(*i as f64),
        (PropertyType::Float, RawValue::Text(s)) => {
            PropertyValue::Float(s.trim().parse().map_err(|_| fail())?)
        }
        (PropertyType::DateTime, RawValue::DateTime(d)) => PropertyValue::DateTime(*d),
        (PropertyType::DateTime, RawValue::Text(s)) => {
            PropertyValue::DateTime(read_date(s.trim(), None).map_err(|_| fail())?)
        }
        (PropertyType::Tags, v) => {
            let tags: BTreeSet<String> = v
                .to_string()
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect();
            if tags.is_empty() {
                return Ok(None);
            }
            PropertyValue::Tags(tags)
        }
        _ => return Err(fail()),
    };
    Ok(Some(coerced))
}

/// Check a literal against its destination type. Integers widen to floats.
pub fn check_literal(
    field: &str,
    literal: &PropertyValue,
    ptype: PropertyType,
) -> NormalizationResult<PropertyValue> {
    match (ptype, literal) {
        (expected, value) if value.property_type() == expected => Ok(value.clone()),
        #[allow(clippy::cast_precision_loss)]
        (PropertyType::Float, PropertyValue::Int(i)) => Ok(PropertyValue::Float(*i as f64)),
        (expected, value) => Err(NormalizationError::LiteralType {
            field: field.to_string(),
            expected,
            found: value.property_type(),
        }),
    }
}
