//! BZK press-cutting HTML.
//!
//! Three generations of the export are in circulation:
//!
//! * a "werkmap" or "intranet/rss" page with one `div` per article and the
//!   fields in elements with fixed ids,
//! * a page with an `<h1>` carrying the date of the cutting and articles
//!   separated by `<hr>`,
//! * a Word export where articles are runs of paragraphs between elements
//!   holding an `<hr>`.
//!
//! In the last two the first part is an index and is skipped.

use std::sync::LazyLock;

use chrono::NaiveDateTime;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use super::collapse_whitespace;
use crate::dates::read_date;
use crate::ingest::extractor::{ExtractContext, ExtractionError, ExtractionResult, RawFieldSet};
use crate::ingest::parser::{FragmentBodies, FragmentBody, ParseError, ParseResult};
use crate::patterns::{compile, selector};

static TITLE: LazyLock<Selector> = LazyLock::new(|| selector("title"));
static H1: LazyLock<Selector> = LazyLock::new(|| selector("h1"));
static SPAN: LazyLock<Selector> = LazyLock::new(|| selector("span"));
static HR: LazyLock<Selector> = LazyLock::new(|| selector("hr"));
static SPAN_HR: LazyLock<Selector> = LazyLock::new(|| selector("span > hr"));
static ITALIC: LazyLock<Selector> = LazyLock::new(|| selector("i"));
static BODY_HR: LazyLock<Selector> = LazyLock::new(|| selector("body > hr"));
static BODY_CHILDREN: LazyLock<Selector> = LazyLock::new(|| selector("body > *"));
static BODY_DIV_CHILDREN: LazyLock<Selector> = LazyLock::new(|| selector("body > div > *"));
static WERKMAP_DIVS: LazyLock<Selector> = LazyLock::new(|| selector("#articleTable div"));
static RSS_DIVS: LazyLock<Selector> = LazyLock::new(|| selector("#sort div"));
static ARTICLE_TITLE: LazyLock<Selector> = LazyLock::new(|| selector("#articleTitle"));
static ARTICLE_INTRO: LazyLock<Selector> = LazyLock::new(|| selector("#articleIntro"));
static ARTICLE_PAGE: LazyLock<Selector> = LazyLock::new(|| selector("#articlePage"));
static SOURCE_TITLE: LazyLock<Selector> = LazyLock::new(|| selector("#sourceTitle"));
static ARTICLE_DATE: LazyLock<Selector> = LazyLock::new(|| selector("#articleDate"));

static PAGE_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| compile(r"pagina ([0-9]+)([,\-][0-9]+)?([a-zA-Z0-9 ]+)?"));

/// How the elements of an [`HtmlFragment`] are to be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HtmlLayout {
    /// One `div` with `#articleTitle`, `#articleDate`, ...
    Werkmap,
    /// `<h2>` headline, italic dateline and paragraphs
    Headed,
    /// Headline paragraph, dateline paragraph, body paragraphs
    Word,
    /// A DeFacto `div.eintrag`
    Eintrag,
}

/// The serialised elements of one article in an HTML export.
#[derive(Debug, Clone)]
pub struct HtmlFragment {
    pub markup: String,
    pub layout: HtmlLayout,
    /// Fields taken from the surrounding document, used where the article
    /// has none of its own
    pub inherited: RawFieldSet,
}

impl HtmlFragment {
    #[must_use]
    pub fn new(markup: String, layout: HtmlLayout) -> Self {
        Self {
            markup,
            layout,
            inherited: RawFieldSet::new(),
        }
    }

    #[must_use]
    pub fn with_inherited(mut self, inherited: RawFieldSet) -> Self {
        self.inherited = inherited;
        self
    }

    /// Parse the markup back into a tree.
    pub fn parse(&self) -> Html {
        Html::parse_fragment(&self.markup)
    }
}

pub(crate) fn element_text(element: ElementRef<'_>) -> String {
    collapse_whitespace(&element.text().collect::<String>())
}

fn markup(elements: &[ElementRef<'_>]) -> String {
    elements.iter().map(ElementRef::html).collect()
}

fn contains_hr(element: ElementRef<'_>) -> bool {
    element.value().name() == "hr" || element.select(&HR).next().is_some()
}

/// Partition elements at separators, dropping the leading index part.
fn partition<'a>(
    elements: impl Iterator<Item = ElementRef<'a>>,
    is_separator: impl Fn(ElementRef<'a>) -> bool,
) -> Vec<Vec<ElementRef<'a>>> {
    let mut parts = vec![Vec::new()];
    for element in elements {
        if is_separator(element) {
            parts.push(Vec::new());
        } else if let Some(part) = parts.last_mut() {
            part.push(element);
        }
    }
    parts.into_iter().skip(1).filter(|p| !p.is_empty()).collect()
}

fn werkmap_fragments(document: &Html, rss: bool) -> Vec<HtmlFragment> {
    let divs: Vec<ElementRef<'_>> = if rss {
        document
            .select(&RSS_DIVS)
            .filter(|div| div.value().id().is_some_and(|id| id.contains("sort_")))
            .collect()
    } else {
        document
            .select(&WERKMAP_DIVS)
            .filter(|div| div.select(&ARTICLE_TITLE).next().is_some())
            .collect()
    };
    divs.into_iter()
        .map(|div| HtmlFragment::new(div.html(), HtmlLayout::Werkmap))
        .collect()
}

fn cutting_date(document: &Html) -> Option<NaiveDateTime> {
    let h1 = document.select(&H1).next()?;
    let mut title = h1.text().collect::<String>();
    if title.trim().is_empty() {
        title = h1.select(&SPAN).next().map(element_text)?;
    }
    let (_, date) = title.split_once('-')?;
    match read_date(date.trim(), None) {
        Ok(date) => Some(date),
        Err(e) => {
            debug!(error = %e, "no date in page heading");
            None
        }
    }
}

fn headed_fragments(document: &Html) -> Vec<HtmlFragment> {
    let mut inherited = RawFieldSet::new();
    if let Some(date) = cutting_date(document) {
        inherited.insert("date", date);
    }

    let children: Vec<ElementRef<'_>> = if document.select(&BODY_HR).next().is_some() {
        document.select(&BODY_CHILDREN).collect()
    } else {
        document.select(&BODY_DIV_CHILDREN).collect()
    };
    let items = partition(children.into_iter(), |e| {
        e.value().name() == "hr" || (e.value().name() == "div" && e.select(&SPAN_HR).next().is_some())
    });

    items
        .iter()
        .map(|item| {
            HtmlFragment::new(markup(item), HtmlLayout::Headed).with_inherited(inherited.clone())
        })
        .collect()
}

fn word_fragments(document: &Html) -> Vec<HtmlFragment> {
    partition(document.select(&BODY_DIV_CHILDREN), contains_hr)
        .iter()
        .map(|part| HtmlFragment::new(markup(part), HtmlLayout::Word))
        .collect()
}

pub(crate) fn split(text: &str) -> ParseResult<FragmentBodies<'static>> {
    let document = Html::parse_document(text);
    let title = document
        .select(&TITLE)
        .next()
        .map(|t| element_text(t).to_lowercase())
        .unwrap_or_default();

    let fragments = if title.contains("werkmap") {
        werkmap_fragments(&document, false)
    } else if title.contains("intranet/rss") {
        werkmap_fragments(&document, true)
    } else if document.select(&H1).next().is_some() {
        headed_fragments(&document)
    } else {
        word_fragments(&document)
    };

    if fragments.is_empty() {
        return Err(ParseError::Missing("article elements"));
    }
    Ok(Box::new(
        fragments.into_iter().map(|f| Ok(FragmentBody::Html(f))),
    ))
}

fn medium_name<'a>(raw: &'a str, ctx: &'a ExtractContext<'_>) -> &'a str {
    let raw = raw.trim().trim_matches('"').trim();
    if raw.is_empty() {
        "unknown"
    } else {
        ctx.config.medium_alias(raw)
    }
}

/// `<medium> <dd-mm-yyyy>` or `<medium> <d> <month> <yyyy>`; anything else
/// is just a medium.
pub(crate) fn parse_dateline(
    dateline: &str,
    ctx: &ExtractContext<'_>,
) -> ExtractionResult<(String, Option<NaiveDateTime>)> {
    let bits: Vec<&str> = dateline.split_whitespace().collect();
    let numeric = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());

    let (medium, date) = match bits.as_slice() {
        [medium @ .., last] if last.contains('-') => (medium.join(" "), Some(read_date(last, None)?)),
        [medium @ .., day, month, year] if numeric(*day) && numeric(*year) => (
            medium.join(" "),
            Some(read_date(&format!("{day} {month} {year}"), None)?),
        ),
        _ => (bits.join(" "), None),
    };
    Ok((medium_name(&medium, ctx).to_string(), date))
}

fn first_text(html: &Html, selector: &Selector) -> Option<String> {
    html.select(selector).next().map(element_text)
}

fn extract_werkmap(html: &Html, ctx: &ExtractContext<'_>) -> ExtractionResult<RawFieldSet> {
    let title = first_text(html, &ARTICLE_TITLE).ok_or(ExtractionError::MissingField("title"))?;
    let date = first_text(html, &ARTICLE_DATE).ok_or(ExtractionError::MissingField("date"))?;
    let medium = first_text(html, &SOURCE_TITLE).unwrap_or_default();

    let mut fields = RawFieldSet::new();
    fields.insert_nonblank("title", title);
    fields.insert_nonblank("text", first_text(html, &ARTICLE_INTRO).unwrap_or_default());
    fields.insert("date", read_date(&date, None)?);
    fields.insert("medium", medium_name(&medium, ctx));

    if let Some(page) = first_text(html, &ARTICLE_PAGE) {
        if let Some(caps) = PAGE_NUMBER.captures(&page) {
            if let Some(number) = caps.get(1).and_then(|m| m.as_str().parse::<i64>().ok()) {
                fields.insert("page", number);
            }
            if let Some(section) = caps.get(3) {
                fields.insert_nonblank("section", section.as_str().trim());
            }
        }
    }
    Ok(fields)
}

fn top_level(html: &Html) -> Vec<ElementRef<'_>> {
    html.root_element()
        .children()
        .filter_map(ElementRef::wrap)
        .collect()
}

fn extract_headed(html: &Html, ctx: &ExtractContext<'_>) -> ExtractionResult<RawFieldSet> {
    let mut title = None;
    let mut dateline = None;
    let mut paragraphs = Vec::new();

    for element in top_level(html) {
        let name = element.value().name();
        if name == "h2" {
            let mut text = element_text(element);
            if text.is_empty() {
                text = element.select(&SPAN).next().map(element_text).unwrap_or_default();
            }
            title = Some(text);
        } else if name == "i" || (name == "p" && element.select(&ITALIC).next().is_some()) {
            dateline = Some(element_text(element));
        } else if name == "p" || name == "div" {
            paragraphs.push(element_text(element));
        }
    }

    let title = title
        .filter(|t| !t.is_empty())
        .ok_or(ExtractionError::MissingField("title"))?;
    let mut fields = RawFieldSet::new();
    fields.insert("title", title);
    fields.insert_nonblank("text", paragraphs.join("\n"));
    if let Some(dateline) = dateline {
        let (medium, date) = parse_dateline(&dateline, ctx)?;
        if let Some(date) = date {
            fields.insert("date", date);
        }
        fields.insert("medium", medium);
    }
    Ok(fields)
}

fn extract_word(html: &Html, ctx: &ExtractContext<'_>) -> ExtractionResult<RawFieldSet> {
    let elements = top_level(html);
    let [headline, dateline, body @ ..] = elements.as_slice() else {
        return Err(ExtractionError::Malformed(
            "expected a headline and a dateline".into(),
        ));
    };
    let (medium, date) = parse_dateline(&element_text(*dateline), ctx)?;

    let mut fields = RawFieldSet::new();
    fields.insert_nonblank("title", element_text(*headline));
    fields.insert_nonblank(
        "text",
        body.iter()
            .map(|e| element_text(*e))
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n"),
    );
    if let Some(date) = date {
        fields.insert("date", date);
    }
    fields.insert("medium", medium);
    Ok(fields)
}

pub fn extract(fragment: &HtmlFragment, ctx: &ExtractContext<'_>) -> ExtractionResult<RawFieldSet> {
    let html = fragment.parse();
    let mut fields = match fragment.layout {
        HtmlLayout::Werkmap => extract_werkmap(&html, ctx)?,
        HtmlLayout::Headed => extract_headed(&html, ctx)?,
        HtmlLayout::Word => extract_word(&html, ctx)?,
        HtmlLayout::Eintrag => {
            return Err(ExtractionError::Malformed(
                "DeFacto entry handed to the BZK extractor".into(),
            ))
        }
    };
    fields.merge_missing(&fragment.inherited);
    if !fields.contains("date") {
        return Err(ExtractionError::MissingField("date"));
    }
    Ok(fields)
}
