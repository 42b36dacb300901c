use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::container::DecodedDocument;
use super::extractor::RawFieldSet;
use super::formats::{self, apa::TextRun, bzk_html::HtmlFragment, bzk_pdf::PdfArticle};
use crate::config::IngestConfig;
use crate::error::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Could not determine the format of {0}")]
    Unclassified(String),
    #[error("No {0} found")]
    Missing(&'static str),
    #[error("Empty fragment")]
    EmptyFragment,
    #[error("Conversion failed: {0}")]
    Converter(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Spreadsheet error: {0}")]
    Spreadsheet(#[from] calamine::Error),
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("PDF error: {0}")]
    Pdf(#[from] lopdf::Error),
    #[error("Parse failed: {0}")]
    ParseFailed(String),
}

pub type ParseResult<T> = Result<T, ParseError>;

/// Every document layout the pipeline understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentFormat {
    /// LexisNexis plain-text export with `N of M DOCUMENTS` banners
    LexisNexis,
    /// APA news agency RTF export
    Apa,
    /// BZK press-cutting HTML
    BzkHtml,
    /// BZK press-cutting mail
    BzkEml,
    /// BZK press-cutting PDF
    BzkPdf,
    /// DeFacto student HTML export
    DeFacto,
    Csv,
    Xlsx,
    Xml,
    /// One article per plain text file
    Text,
}

impl DocumentFormat {
    pub const ALL: [Self; 10] = [
        Self::LexisNexis,
        Self::Apa,
        Self::BzkHtml,
        Self::BzkEml,
        Self::BzkPdf,
        Self::DeFacto,
        Self::Csv,
        Self::Xlsx,
        Self::Xml,
        Self::Text,
    ];

    pub const fn label(self) -> &'static str {
        match self {
            Self::LexisNexis => "lexisnexis",
            Self::Apa => "apa",
            Self::BzkHtml => "bzk_html",
            Self::BzkEml => "bzk_eml",
            Self::BzkPdf => "bzk_pdf",
            Self::DeFacto => "defacto",
            Self::Csv => "csv",
            Self::Xlsx => "xlsx",
            Self::Xml => "xml",
            Self::Text => "text",
        }
    }

    /// Formats read from raw bytes rather than decoded text.
    pub const fn is_binary(self) -> bool {
        matches!(self, Self::Apa | Self::BzkPdf | Self::Xlsx)
    }

    /// Whether extracted field order follows the source (extractor formats)
    /// rather than an arbitrary column order (tabular formats).
    pub const fn is_tabular(self) -> bool {
        matches!(self, Self::Csv | Self::Xlsx | Self::Xml)
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "rtf" => Some(Self::Apa),
            "eml" => Some(Self::BzkEml),
            "pdf" => Some(Self::BzkPdf),
            "csv" | "tsv" => Some(Self::Csv),
            "xlsx" | "xlsm" | "xls" => Some(Self::Xlsx),
            "xml" => Some(Self::Xml),
            _ => None,
        }
    }

    /// Recognise binary formats by magic bytes or extension.
    pub fn detect_binary(name: &str, bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(b"{\\rtf") {
            return Some(Self::Apa);
        }
        if bytes.starts_with(b"%PDF") {
            return Some(Self::BzkPdf);
        }
        if bytes.starts_with(b"PK\x03\x04") || bytes.starts_with(b"\xD0\xCF\x11\xE0") {
            return Some(Self::Xlsx);
        }
        let ext = name.rsplit_once('.').map(|(_, ext)| ext)?;
        Self::from_extension(ext).filter(|f| f.is_binary())
    }

    /// Pick a text format for a decoded document.
    ///
    /// Markup is recognised by its tags; for plain text the LexisNexis banner
    /// count competes with the number of consistently delimited CSV rows.
    pub fn detect_text(doc: &DecodedDocument<'_>) -> ParseResult<Self> {
        let text = doc.text.trim_start_matches('\u{feff}');
        let head: String = text.chars().take(4096).collect::<String>().to_lowercase();
        let extension = doc.extension();

        if extension.as_deref() == Some("eml") || formats::bzk_eml::looks_like_mail(text) {
            return Ok(Self::BzkEml);
        }
        if head.contains("<html") || head.contains("<body") || head.contains("<div") {
            if text.contains("class=\"eintrag\"") {
                return Ok(Self::DeFacto);
            }
            return Ok(Self::BzkHtml);
        }
        if head.trim_start().starts_with("<?xml") || extension.as_deref() == Some("xml") {
            return Ok(Self::Xml);
        }
        if extension.as_deref().and_then(Self::from_extension) == Some(Self::Csv) {
            return Ok(Self::Csv);
        }

        let banners = formats::lexisnexis::count_banners(text);
        let rows = formats::csv::sniff_delimiter(text).map_or(0, |(_, rows)| rows);
        match (banners, rows) {
            (0, 0) => Err(ParseError::Unclassified(doc.name.to_string())),
            (b, r) if b >= r => Ok(Self::LexisNexis),
            _ => Ok(Self::Csv),
        }
    }

    /// Split a document into fragments.
    ///
    /// The returned sequence is lazy where the format allows it; splitting the
    /// same document again starts over from the first fragment.
    pub fn split<'a>(
        self,
        doc: &'a DecodedDocument<'a>,
        config: &'a IngestConfig,
    ) -> ParseResult<Split<'a>> {
        let (bodies, query): (FragmentBodies<'a>, Option<String>) = match self {
            Self::LexisNexis => {
                let (query, bodies) = formats::lexisnexis::split(&doc.text, config)?;
                (bodies, query)
            }
            Self::Apa => (formats::apa::split(doc.bytes, &config.rtf)?, None),
            Self::BzkHtml => (formats::bzk_html::split(&doc.text)?, None),
            Self::BzkEml | Self::Text => (
                Box::new(std::iter::once(Ok(FragmentBody::Text(doc.text.clone())))),
                None,
            ),
            Self::BzkPdf => (formats::bzk_pdf::split(doc.bytes)?, None),
            Self::DeFacto => (formats::defacto::split(&doc.text)?, None),
            Self::Csv => (formats::csv::split(&doc.text, config.csv.delimiter)?, None),
            Self::Xlsx => (formats::csv::split_workbook(doc.bytes)?, None),
            Self::Xml => (formats::xml::split(&doc.text, &config.xml.article_path), None),
        };

        let fragments = bodies
            .enumerate()
            .map(|(index, body)| body.map(|body| DocumentFragment::new(index, body)));
        Ok(Split {
            fragments: Box::new(fragments),
            query,
        })
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for DocumentFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase().replace(['-', ' '], "_");
        Self::ALL
            .into_iter()
            .find(|f| f.label() == wanted)
            .ok_or_else(|| Error::UnknownFormat(s.to_string()))
    }
}

/// One unit of a document that becomes at most one article.
#[derive(Debug, Clone)]
pub struct DocumentFragment {
    /// Position of the fragment within its document, starting at zero
    pub index: usize,
    pub body: FragmentBody,
}

impl DocumentFragment {
    #[must_use]
    pub const fn new(index: usize, body: FragmentBody) -> Self {
        Self { index, body }
    }
}

#[derive(Debug, Clone)]
pub enum FragmentBody {
    /// A block of plain text
    Text(String),
    /// Text lines of one article in a page-based layout
    Lines(PdfArticle),
    /// Styled runs of one converted page
    Runs(Vec<TextRun>),
    Html(HtmlFragment),
    /// Serialised XML of one article element
    Markup(String),
    /// Fields already keyed by column
    Record(RawFieldSet),
}

impl FragmentBody {
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Lines(_) => "lines",
            Self::Runs(_) => "runs",
            Self::Html(_) => "html",
            Self::Markup(_) => "markup",
            Self::Record(_) => "record",
        }
    }
}

pub(crate) type FragmentBodies<'a> = Box<dyn Iterator<Item = ParseResult<FragmentBody>> + 'a>;

pub type Fragments<'a> = Box<dyn Iterator<Item = ParseResult<DocumentFragment>> + 'a>;

/// The fragments of one document plus document-level provenance.
pub struct Split<'a> {
    pub fragments: Fragments<'a>,
    /// Search query recorded on the document's cover page
    pub query: Option<String>,
}
