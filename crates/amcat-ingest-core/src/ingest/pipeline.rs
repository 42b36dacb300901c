use std::fmt;
use std::path::Path;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::container::{Container, ContainerResolver, DecodedDocument, Encoding, RawDocument};
use super::extractor::{extract, ExtractContext, ExtractionError};
use super::mapping::{suggest_fields, FieldMapping, FieldSuggestion};
use super::normalizer::{Assembler, NormalizationError};
use super::parser::{DocumentFormat, DocumentFragment, ParseError, ParseResult};
use crate::article::NormalizedArticle;
use crate::config::IngestConfig;
use crate::error::{Error, Result};
use crate::schema::DestinationSchema;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),
    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),
    #[error("Normalization error: {0}")]
    Normalization(#[from] NormalizationError),
}

pub type IngestResult<T> = std::result::Result<T, IngestError>;

/// A failure scoped to one fragment, or to a whole document when it could
/// not be split.
#[derive(Debug)]
pub struct IngestionError {
    /// Name of the document the failure belongs to
    pub source: String,
    pub fragment: Option<usize>,
    pub error: IngestError,
}

impl fmt::Display for IngestionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.fragment {
            Some(index) => write!(f, "{} [fragment {index}]: {}", self.source, self.error),
            None => write!(f, "{}: {}", self.source, self.error),
        }
    }
}

impl std::error::Error for IngestionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// One uploaded file.
#[derive(Debug, Clone)]
pub struct Upload {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl Upload {
    #[must_use]
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .map_or_else(|| path.to_string_lossy().into_owned(), String::from);
        Ok(Self::new(name, bytes))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestStats {
    pub documents: usize,
    pub fragments: usize,
    pub articles: usize,
    pub failures: usize,
    pub duration_ms: u64,
}

impl IngestStats {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            documents: 0,
            fragments: 0,
            articles: 0,
            failures: 0,
            duration_ms: 0,
        }
    }
}

impl Default for IngestStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Where the articles of one document came from.
#[derive(Debug, Clone, Serialize)]
pub struct FileProvenance {
    pub id: Uuid,
    pub source: String,
    pub format: DocumentFormat,
    pub encoding: String,
    pub articles: usize,
    /// Search query from a LexisNexis cover page
    pub query: Option<String>,
    pub imported_at: DateTime<Utc>,
}

impl FileProvenance {
    fn new(source: &str, format: DocumentFormat, encoding: &str, query: Option<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            source: source.to_string(),
            format,
            encoding: encoding.to_string(),
            articles: 0,
            query,
            imported_at: Utc::now(),
        }
    }

    pub fn message(&self) -> String {
        let mut message = format!(
            "Uploaded {} articles from file {:?} using {}",
            self.articles, self.source, self.format
        );
        if let Some(query) = &self.query {
            message.push_str(&format!("; LexisNexis query: {query:?}"));
        }
        message
    }
}

/// Everything one run produced: articles in source order, and the errors
/// of the fragments that did not make it.
#[derive(Debug)]
pub struct BatchIngestResult {
    pub run_id: Uuid,
    pub articles: Vec<NormalizedArticle>,
    pub errors: Vec<IngestionError>,
    pub stats: IngestStats,
    pub provenance: Vec<FileProvenance>,
}

impl BatchIngestResult {
    #[must_use]
    pub fn new() -> Self {
        Self {
            run_id: Uuid::now_v7(),
            articles: Vec::new(),
            errors: Vec::new(),
            stats: IngestStats::new(),
            provenance: Vec::new(),
        }
    }

    fn add_success(&mut self, article: NormalizedArticle) {
        self.stats.articles += 1;
        if let Some(file) = self.provenance.last_mut() {
            file.articles += 1;
        }
        self.articles.push(article);
    }

    fn add_failure(&mut self, source: &str, fragment: Option<usize>, error: IngestError) {
        match fragment {
            Some(index) => warn!(source, fragment = index, error = %error, "Fragment failed"),
            None => warn!(source, error = %error, "Document failed"),
        }
        self.stats.failures += 1;
        self.errors.push(IngestionError {
            source: source.to_string(),
            fragment,
            error,
        });
    }

    pub fn success_count(&self) -> usize {
        self.articles.len()
    }

    pub fn failure_count(&self) -> usize {
        self.errors.len()
    }

    /// Share of failures among everything attempted; zero for an empty run.
    #[allow(clippy::cast_precision_loss)]
    pub fn error_ratio(&self) -> f64 {
        let attempted = self.success_count() + self.failure_count();
        if attempted == 0 {
            return 0.0;
        }
        self.failure_count() as f64 / attempted as f64
    }
}

impl Default for BatchIngestResult {
    fn default() -> Self {
        Self::new()
    }
}

/// What format detection made of one document.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentSummary {
    pub name: String,
    pub format: Option<DocumentFormat>,
    pub encoding: Option<String>,
    pub fragments: usize,
    pub error: Option<String>,
}

/// Turns uploads into decoded, classified documents.
///
/// Shared by ingestion and by the schema-free operations (detection and
/// mapping suggestion).
#[derive(Debug, Clone, Default)]
pub struct UploadReader {
    config: IngestConfig,
    format: Option<DocumentFormat>,
    encoding: Encoding,
    container: Container,
}

impl UploadReader {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_config(mut self, config: IngestConfig) -> Self {
        self.config = config;
        self
    }

    /// Skip detection and treat every document as `format`.
    #[must_use]
    pub fn with_format(mut self, format: DocumentFormat) -> Self {
        self.format = Some(format);
        self
    }

    #[must_use]
    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    #[must_use]
    pub fn with_container(mut self, container: Container) -> Self {
        self.container = container;
        self
    }

    pub const fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Decode and classify one document.
    ///
    /// The outer error is fatal to the run (undecodable under an explicit
    /// encoding); the inner one only to this document.
    fn open<'a>(
        &self,
        raw: &'a RawDocument,
    ) -> Result<ParseResult<(DocumentFormat, DecodedDocument<'a>)>> {
        if let Some(format) = self.format {
            let doc = if format.is_binary() {
                raw.undecoded()
            } else {
                raw.decode(self.encoding)?
            };
            return Ok(Ok((format, doc)));
        }
        if let Some(format) = DocumentFormat::detect_binary(&raw.name, &raw.bytes) {
            return Ok(Ok((format, raw.undecoded())));
        }
        let doc = raw.decode(self.encoding)?;
        Ok(DocumentFormat::detect_text(&doc).map(|format| (format, doc)))
    }

    fn documents<'a>(
        &self,
        upload: &'a Upload,
    ) -> Result<Box<dyn Iterator<Item = Result<RawDocument>> + 'a>> {
        ContainerResolver::new(self.container).resolve(&upload.name, &upload.bytes)
    }

    /// Suggest a mapping from the first fragments of every document.
    ///
    /// Fragments that fail to split or extract are left out of the sample.
    pub fn suggest(&self, upload: &Upload) -> Result<Vec<FieldSuggestion>> {
        let mut samples = Vec::new();
        let mut tabular = false;

        for raw in self.documents(upload)? {
            let raw = raw?;
            let Ok((format, doc)) = self.open(&raw)? else {
                debug!(document = %raw.name, "Skipping unclassified document");
                continue;
            };
            tabular |= format.is_tabular();
            let split = match format.split(&doc, &self.config) {
                Ok(split) => split,
                Err(e) => {
                    debug!(document = %raw.name, error = %e, "Skipping unsplittable document");
                    continue;
                }
            };
            let ctx = ExtractContext::new(&self.config, &raw.name);
            samples.extend(
                split
                    .fragments
                    .take(self.config.sample_size)
                    .filter_map(|fragment| fragment.ok())
                    .filter_map(|fragment| extract(format, &fragment, &ctx).ok()),
            );
        }

        debug!(samples = samples.len(), "Sampled fragments");
        Ok(suggest_fields(&samples, tabular))
    }

    /// Detected format and fragment count of every document in the upload.
    pub fn detect(&self, upload: &Upload) -> Result<Vec<DocumentSummary>> {
        let mut summaries = Vec::new();
        for raw in self.documents(upload)? {
            let raw = raw?;
            let mut summary = DocumentSummary {
                name: raw.name.clone(),
                format: None,
                encoding: None,
                fragments: 0,
                error: None,
            };
            match self.open(&raw)? {
                Ok((format, doc)) => {
                    summary.format = Some(format);
                    summary.encoding = Some(doc.encoding.to_string());
                    match format.split(&doc, &self.config) {
                        Ok(split) => summary.fragments = split.fragments.count(),
                        Err(e) => summary.error = Some(e.to_string()),
                    }
                }
                Err(e) => summary.error = Some(e.to_string()),
            }
            summaries.push(summary);
        }
        Ok(summaries)
    }
}

/// Runs uploads through split, extract, map, coerce and assemble.
///
/// Configuration problems are reported by [`IngestPipeline::new`] and by
/// [`IngestPipeline::ingest`] before anything is produced; every later
/// failure is confined to its fragment.
#[derive(Debug, Clone)]
pub struct IngestPipeline {
    reader: UploadReader,
    schema: DestinationSchema,
    mapping: FieldMapping,
}

impl IngestPipeline {
    pub fn new(schema: DestinationSchema, mapping: FieldMapping) -> Result<Self> {
        mapping.validate(&schema)?;
        Ok(Self {
            reader: UploadReader::new(),
            schema,
            mapping,
        })
    }

    #[must_use]
    pub fn with_config(mut self, config: IngestConfig) -> Self {
        self.reader = self.reader.with_config(config);
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: DocumentFormat) -> Self {
        self.reader = self.reader.with_format(format);
        self
    }

    #[must_use]
    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.reader = self.reader.with_encoding(encoding);
        self
    }

    #[must_use]
    pub fn with_container(mut self, container: Container) -> Self {
        self.reader = self.reader.with_container(container);
        self
    }

    pub const fn schema(&self) -> &DestinationSchema {
        &self.schema
    }

    pub const fn mapping(&self) -> &FieldMapping {
        &self.mapping
    }

    pub fn suggest(&self, upload: &Upload) -> Result<Vec<FieldSuggestion>> {
        self.reader.suggest(upload)
    }

    fn process(
        &self,
        format: DocumentFormat,
        fragment: &DocumentFragment,
        ctx: &ExtractContext<'_>,
    ) -> IngestResult<NormalizedArticle> {
        let fields = extract(format, fragment, ctx)?;
        let article = Assembler::new(&self.schema, &self.mapping).assemble(&fields)?;
        Ok(article)
    }

    /// Ingest every document of an upload, in source order.
    pub fn ingest(&self, upload: &Upload) -> Result<BatchIngestResult> {
        let start = Instant::now();
        let config = self.reader.config();
        let mut result = BatchIngestResult::new();

        for raw in self.reader.documents(upload)? {
            let raw = raw?;
            result.stats.documents += 1;

            let (format, doc) = match self.reader.open(&raw)? {
                Ok(opened) => opened,
                Err(e) => {
                    result.add_failure(&raw.name, None, e.into());
                    continue;
                }
            };
            info!(document = %raw.name, %format, encoding = doc.encoding, "Ingesting document");

            let split = match format.split(&doc, config) {
                Ok(split) => split,
                Err(e) => {
                    result.add_failure(&raw.name, None, e.into());
                    continue;
                }
            };
            result.provenance.push(FileProvenance::new(
                &raw.name,
                format,
                doc.encoding,
                split.query.clone(),
            ));

            let ctx = ExtractContext::new(config, &raw.name);
            for (position, fragment) in split.fragments.enumerate() {
                result.stats.fragments += 1;
                let outcome = fragment
                    .map_err(IngestError::from)
                    .and_then(|fragment| self.process(format, &fragment, &ctx));
                match outcome {
                    Ok(article) => {
                        debug!(
                            document = %raw.name,
                            fragment = position,
                            title = %article.title,
                            "Assembled article"
                        );
                        result.add_success(article);
                    }
                    Err(e) => result.add_failure(&raw.name, Some(position), e),
                }
            }
        }

        result.stats.duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(
            run = %result.run_id,
            documents = result.stats.documents,
            articles = result.success_count(),
            failures = result.failure_count(),
            duration_ms = result.stats.duration_ms,
            "Ingestion finished"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::article::PropertyValue;
    use crate::schema::{Property, PropertyType};

    fn csv_pipeline() -> IngestPipeline {
        let schema =
            DestinationSchema::with_properties([Property::new("pagina_int", PropertyType::Int)])
                .unwrap();
        let mapping = FieldMapping::new()
            .field("title", "kop")
            .field("date", "datum")
            .field("text", "tekst")
            .field("pagina_int", "pagina");
        IngestPipeline::new(schema, mapping).unwrap()
    }

    #[test]
    fn test_unmapped_required_is_fatal() {
        let mapping = FieldMapping::new().field("title", "kop");
        let err = IngestPipeline::new(DestinationSchema::new(), mapping).unwrap_err();
        assert!(matches!(err, Error::UnmappedRequired(missing) if missing == vec!["text", "date"]));
    }

    #[test]
    fn test_ingest_csv() {
        let upload = Upload::new(
            "upload.csv",
            b"kop,datum,tekst,pagina\nkop1,2001-01-01,text1,12\nkop2,10 maart 1980,text2,\n".to_vec(),
        );
        let result = csv_pipeline().ingest(&upload).unwrap();

        assert_eq!(result.success_count(), 2);
        assert_eq!(result.failure_count(), 0);
        assert_eq!(result.articles[0].get("pagina_int"), Some(&PropertyValue::Int(12)));
        assert_eq!(result.articles[1].get("pagina_int"), None);
        assert_eq!(result.stats.documents, 1);
        assert_eq!(result.stats.fragments, 2);
        assert_eq!(result.provenance.len(), 1);
        assert_eq!(
            result.provenance[0].message(),
            "Uploaded 2 articles from file \"upload.csv\" using csv"
        );
    }

    #[test]
    fn test_failure_keeps_going() {
        let upload = Upload::new(
            "upload.csv",
            b"kop,datum,tekst,pagina\nkop1,2001-01-01,text1,1\nkop2,2001-01-02,text2,twee\nkop3,2001-01-03,text3,3\n"
                .to_vec(),
        );
        let result = csv_pipeline().ingest(&upload).unwrap();

        assert_eq!(result.success_count(), 2);
        assert_eq!(result.failure_count(), 1);
        let error = &result.errors[0];
        assert_eq!(error.source, "upload.csv");
        assert_eq!(error.fragment, Some(1));
        assert!(matches!(
            error.error,
            IngestError::Normalization(NormalizationError::Coercion { .. })
        ));
        assert!((result.error_ratio() - 1.0 / 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_unclassified_document() {
        let upload = Upload::new("notes.txt", b"just a line of prose".to_vec());
        let result = csv_pipeline().ingest(&upload).unwrap();
        assert_eq!(result.success_count(), 0);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].fragment, None);
        assert!(matches!(
            result.errors[0].error,
            IngestError::Parse(ParseError::Unclassified(_))
        ));
    }

    #[test]
    fn test_explicit_encoding_failure_is_fatal() {
        let upload = Upload::new("upload.csv", b"kop,tekst\ncaf\xe9,x\n".to_vec());
        let pipeline = csv_pipeline().with_encoding(Encoding::Utf8);
        assert!(matches!(pipeline.ingest(&upload), Err(Error::Decode { .. })));
    }

    #[test]
    fn test_empty_run_ratio() {
        assert!(BatchIngestResult::new().error_ratio().abs() < f64::EPSILON);
    }

    #[test]
    fn test_detect() {
        let upload = Upload::new("upload.csv", b"kop;tekst\na;b\nc;d\n".to_vec());
        let summaries = UploadReader::new().detect(&upload).unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].format, Some(DocumentFormat::Csv));
        assert_eq!(summaries[0].fragments, 2);
        assert_eq!(summaries[0].encoding.as_deref(), Some("UTF-8"));
    }

    #[test]
    fn test_suggest_sorted_for_tables() {
        let upload = Upload::new("upload.csv", b"tekst,datum\nhallo,2001-01-01\n".to_vec());
        let suggestions = UploadReader::new().suggest(&upload).unwrap();
        let fields: Vec<_> = suggestions.iter().map(|s| s.field.as_str()).collect();
        assert_eq!(fields, vec!["datum", "tekst"]);
        assert_eq!(suggestions[0].ptype, Some(PropertyType::DateTime));
    }
}
