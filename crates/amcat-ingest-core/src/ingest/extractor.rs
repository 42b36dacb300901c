use std::fmt;

use chrono::NaiveDateTime;
use serde::Serialize;
use thiserror::Error;

use super::formats;
use super::parser::{DocumentFormat, DocumentFragment, FragmentBody};
use crate::config::IngestConfig;
use crate::dates::DateError;

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("No {0} found")]
    MissingField(&'static str),
    #[error("Unparseable date: {0}")]
    Date(#[from] DateError),
    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: String, value: String },
    #[error("Malformed fragment: {0}")]
    Malformed(String),
    #[error("{format} extractor cannot read a {found} fragment")]
    UnexpectedFragment {
        format: DocumentFormat,
        found: &'static str,
    },
}

pub type ExtractionResult<T> = Result<T, ExtractionError>;

/// A field value as produced by an extractor, before coercion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum RawValue {
    Text(String),
    Int(i64),
    DateTime(NaiveDateTime),
    /// Placeholder for a value the source did not have, such as a short CSV row
    Missing,
}

impl RawValue {
    /// Missing values and blank strings carry nothing to map.
    pub fn is_blank(&self) -> bool {
        match self {
            Self::Text(s) => s.trim().is_empty(),
            Self::Missing => true,
            Self::Int(_) | Self::DateTime(_) => false,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Int(i) => write!(f, "{i}"),
            Self::DateTime(d) => write!(f, "{}", d.format("%Y-%m-%dT%H:%M:%S")),
            Self::Missing => Ok(()),
        }
    }
}

impl From<String> for RawValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for RawValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<i64> for RawValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<NaiveDateTime> for RawValue {
    fn from(d: NaiveDateTime) -> Self {
        Self::DateTime(d)
    }
}

/// Raw fields of one fragment, in the order the extractor found them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RawFieldSet {
    fields: Vec<(String, RawValue)>,
}

impl RawFieldSet {
    #[must_use]
    pub const fn new() -> Self {
        Self { fields: Vec::new() }
    }

    /// Set a field, replacing an earlier value but keeping its position.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<RawValue>) {
        let name = name.into();
        let value = value.into();
        if let Some(slot) = self.fields.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = value;
        } else {
            self.fields.push((name, value));
        }
    }

    /// Set a field unless the value is blank.
    pub fn insert_nonblank(&mut self, name: impl Into<String>, value: impl Into<RawValue>) {
        let value = value.into();
        if !value.is_blank() {
            self.insert(name, value);
        }
    }

    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<RawValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&RawValue> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(RawValue::as_text)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn remove(&mut self, name: &str) -> Option<RawValue> {
        let index = self.fields.iter().position(|(n, _)| n == name)?;
        Some(self.fields.remove(index).1)
    }

    /// Fill in fields that are not set yet.
    pub fn merge_missing(&mut self, defaults: &Self) {
        for (name, value) in &defaults.fields {
            if self.get(name).is_none_or(RawValue::is_blank) {
                self.insert(name.clone(), value.clone());
            }
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RawValue)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<K: Into<String>, V: Into<RawValue>> FromIterator<(K, V)> for RawFieldSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut set = Self::new();
        for (k, v) in iter {
            set.insert(k, v);
        }
        set
    }
}

/// What an extractor may look at besides the fragment itself.
#[derive(Debug, Clone, Copy)]
pub struct ExtractContext<'a> {
    pub config: &'a IngestConfig,
    /// Name of the document the fragment came from
    pub document: &'a str,
}

impl<'a> ExtractContext<'a> {
    #[must_use]
    pub const fn new(config: &'a IngestConfig, document: &'a str) -> Self {
        Self { config, document }
    }
}

/// Turn a fragment into raw fields using the extractor for `format`.
pub fn extract(
    format: DocumentFormat,
    fragment: &DocumentFragment,
    ctx: &ExtractContext<'_>,
) -> ExtractionResult<RawFieldSet> {
    let unexpected = || ExtractionError::UnexpectedFragment {
        format,
        found: fragment.body.kind(),
    };

    match (format, &fragment.body) {
        (DocumentFormat::LexisNexis, FragmentBody::Text(text)) => {
            formats::lexisnexis::extract(text, ctx.config)
        }
        (DocumentFormat::Apa, FragmentBody::Runs(page)) => formats::apa::extract(page),
        (DocumentFormat::BzkHtml, FragmentBody::Html(html)) => {
            formats::bzk_html::extract(html, ctx)
        }
        (DocumentFormat::BzkEml, FragmentBody::Text(text)) => formats::bzk_eml::extract(text, ctx),
        (DocumentFormat::BzkPdf, FragmentBody::Lines(article)) => {
            formats::bzk_pdf::extract(article, ctx)
        }
        (DocumentFormat::DeFacto, FragmentBody::Html(html)) => formats::defacto::extract(html, ctx),
        (DocumentFormat::Csv | DocumentFormat::Xlsx, FragmentBody::Record(fields)) => {
            Ok(fields.clone())
        }
        (DocumentFormat::Xml, FragmentBody::Markup(xml)) => formats::xml::extract(xml),
        (DocumentFormat::Text, FragmentBody::Text(text)) => Ok(formats::text::extract(text, ctx)),
        _ => Err(unexpected()),
    }
}
