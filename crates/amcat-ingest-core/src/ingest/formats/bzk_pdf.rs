//! BZK press cuttings as PDF.
//!
//! Index pages list `headline (medium) ..... page`; an article starts at the
//! first line that repeats an indexed headline.

use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use tracing::debug;

use crate::ingest::extractor::{ExtractContext, ExtractionError, ExtractionResult, RawFieldSet};
use crate::ingest::parser::{FragmentBodies, FragmentBody, ParseError, ParseResult};
use crate::patterns::compile;

static INDEX_LINE: LazyLock<Regex> = LazyLock::new(|| compile(r"^[^\(]+\([^\)]+\)..+[0-9]+$"));
static INDEX_ENTRY: LazyLock<Regex> =
    LazyLock::new(|| compile(r"([^\(]+)(\([0-9]+\))? \(([^\)]+)\).+"));
static DATE: LazyLock<Regex> = LazyLock::new(|| compile(r"([0-9]{2})-([0-9]{2})-([0-9]{4})"));
static PAGE: LazyLock<Regex> = LazyLock::new(|| compile(r"\(p.([0-9]+)([0-9\-]+)?\)"));

/// The text lines of one article, headline first, with the medium the
/// index listed for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdfArticle {
    pub lines: Vec<String>,
    pub medium: Option<String>,
}

struct IndexEntry {
    headline: String,
    medium: String,
}

fn is_index_page(lines: &[String]) -> bool {
    lines.iter().any(|l| INDEX_LINE.is_match(l))
}

fn index_entries(lines: &[String]) -> impl Iterator<Item = IndexEntry> + '_ {
    lines.iter().filter_map(|line| {
        let caps = INDEX_ENTRY.captures(line)?;
        Some(IndexEntry {
            headline: caps[1].trim().to_lowercase(),
            medium: caps[3].trim().to_string(),
        })
    })
}

/// Group page lines into articles.
pub fn split_pages(pages: Vec<Vec<String>>) -> Vec<PdfArticle> {
    let mut index = Vec::new();
    let mut articles: Vec<PdfArticle> = Vec::new();

    for page in pages {
        if is_index_page(&page) {
            index.extend(index_entries(&page));
            continue;
        }
        for line in page {
            let key = line.trim().to_lowercase();
            if let Some(entry) = index.iter().find(|e: &&IndexEntry| e.headline == key) {
                articles.push(PdfArticle {
                    lines: Vec::new(),
                    medium: Some(entry.medium.clone()),
                });
            }
            match articles.last_mut() {
                Some(article) => article.lines.push(line),
                None => debug!(line = %line, "skipping text before the first headline"),
            }
        }
    }
    articles
}

pub(crate) fn split(bytes: &[u8]) -> ParseResult<FragmentBodies<'static>> {
    let document = lopdf::Document::load_mem(bytes)?;
    let mut pages = Vec::new();
    for number in document.get_pages().keys() {
        let text = document.extract_text(&[*number])?;
        pages.push(
            text.lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect(),
        );
    }

    let articles = split_pages(pages);
    if articles.is_empty() {
        return Err(ParseError::Missing("indexed headlines"));
    }
    Ok(Box::new(
        articles.into_iter().map(|a| Ok(FragmentBody::Lines(a))),
    ))
}

pub fn extract(article: &PdfArticle, ctx: &ExtractContext<'_>) -> ExtractionResult<RawFieldSet> {
    let [headline, dateline, body @ ..] = article.lines.as_slice() else {
        return Err(ExtractionError::MissingField("date"));
    };

    let caps = DATE
        .captures(dateline)
        .ok_or(ExtractionError::MissingField("date"))?;
    let date = NaiveDate::from_ymd_opt(
        caps[3].parse().unwrap_or_default(),
        caps[2].parse().unwrap_or_default(),
        caps[1].parse().unwrap_or_default(),
    )
    .and_then(|d| d.and_hms_opt(0, 0, 0))
    .ok_or_else(|| ExtractionError::InvalidValue {
        field: "date".into(),
        value: caps[0].to_string(),
    })?;

    let mut text = String::new();
    for line in body.iter().filter(|l| l.chars().count() > 2) {
        text.push('\n');
        text.push_str(line);
    }
    let text = text
        .replace("-\n", "")
        .replace("  ", " ")
        .replace('\n', " ");

    let medium = match article.medium.as_deref().map(str::trim) {
        Some(m) if !m.is_empty() => ctx.config.medium_alias(m),
        _ => "unknown",
    };

    let mut fields = RawFieldSet::new();
    fields.insert_nonblank("title", headline.trim());
    fields.insert_nonblank("text", text.trim());
    fields.insert("date", date);
    if let Some(page) = PAGE.captures(dateline).and_then(|c| c[1].parse::<i64>().ok()) {
        fields.insert("page", page);
    }
    fields.insert("medium", medium);
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IngestConfig;
    use crate::ingest::extractor::RawValue;

    fn page(lines: &[&str]) -> Vec<String> {
        lines.iter().map(ToString::to_string).collect()
    }

    fn pages() -> Vec<Vec<String>> {
        vec![
            page(&[
                "Inhoudsopgave",
                "Kabinet presenteert plannen (NRC Handelsblad) ...... 2",
                "Gemeenten willen geld (2) (Trouw) ...... 3",
            ]),
            page(&[
                "Knipselkrant 14 maart",
                "Kabinet presenteert plannen",
                "NRC Handelsblad 13-03-2014 (p.3-4)",
                "Het kabinet heeft plannen gepre-",
                "senteerd voor  de zorg.",
                "12",
            ]),
            page(&[
                "vervolg van de plannen.",
                "GEMEENTEN WILLEN GELD",
                "Trouw 12-03-2014",
                "Gemeenten vragen meer geld.",
            ]),
        ]
    }

    #[test]
    fn test_split_pages() {
        let articles = split_pages(pages());
        assert_eq!(articles.len(), 2);
        assert_eq!(articles[0].lines[0], "Kabinet presenteert plannen");
        assert_eq!(articles[0].lines.len(), 6);
        assert_eq!(articles[0].medium.as_deref(), Some("NRC Handelsblad"));
        assert_eq!(articles[1].lines[0], "GEMEENTEN WILLEN GELD");
        assert_eq!(articles[1].medium.as_deref(), Some("Trouw"));
    }

    #[test]
    fn test_extract_article() {
        let config = IngestConfig::default();
        let ctx = ExtractContext::new(&config, "knipsel.pdf");
        let articles = split_pages(pages());

        let fields = extract(&articles[0], &ctx).unwrap();
        assert_eq!(fields.text("title"), Some("Kabinet presenteert plannen"));
        assert_eq!(
            fields.text("text"),
            Some("Het kabinet heeft plannen gepresenteerd voor de zorg. vervolg van de plannen.")
        );
        assert_eq!(fields.get("page"), Some(&RawValue::Int(3)));
        assert_eq!(fields.text("medium"), Some("NRC Handelsblad"));

        let fields = extract(&articles[1], &ctx).unwrap();
        assert!(!fields.contains("page"));
        assert_eq!(fields.text("medium"), Some("Trouw"));
    }

    #[test]
    fn test_missing_dateline() {
        let config = IngestConfig::default();
        let ctx = ExtractContext::new(&config, "knipsel.pdf");
        let article = PdfArticle {
            lines: vec!["Kop".into(), "geen datum".into(), "tekst".into()],
            medium: None,
        };
        assert!(matches!(
            extract(&article, &ctx),
            Err(ExtractionError::MissingField("date"))
        ));
    }

    #[test]
    fn test_not_a_pdf() {
        assert!(matches!(split(b"%PDF-garbage"), Err(ParseError::Pdf(_))));
    }
}
