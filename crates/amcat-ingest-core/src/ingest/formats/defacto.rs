//! DeFacto (student edition) HTML, saved from the print view.
//!
//! Every article is a `div.eintrag` with an `<h3>` headline, a `<pre>` block
//! holding `<medium> [Nr. n] vom dd.mm.yyyy [hh.mm] [Seite n]` and a
//! `Ressort:` line, and `<p>` paragraphs.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};

use super::bzk_html::{element_text, HtmlFragment, HtmlLayout};
use crate::dates::read_date;
use crate::ingest::extractor::{ExtractContext, ExtractionError, ExtractionResult, RawFieldSet};
use crate::ingest::parser::{FragmentBodies, FragmentBody, ParseError, ParseResult};
use crate::patterns::{compile, selector};

static ENTRY: LazyLock<Selector> = LazyLock::new(|| selector("div.eintrag"));
static HEADLINE: LazyLock<Selector> = LazyLock::new(|| selector("h3"));
static META: LazyLock<Selector> = LazyLock::new(|| selector("pre"));
static PARAGRAPH: LazyLock<Selector> = LazyLock::new(|| selector("p"));

static META_LINE: LazyLock<Regex> = LazyLock::new(|| {
    compile(r"^(.*?)\s*(Nr. \d+)? vom (\d\d\.\d\d\.\d\d\d\d)( \d\d[.:]\d\d\b)?(.*)")
});
static PAGE: LazyLock<Regex> = LazyLock::new(|| compile(r"Seite:? (\d+)"));
static SECTION: LazyLock<Regex> = LazyLock::new(|| compile(r"Ressort:(.*)"));

pub(crate) fn split(text: &str) -> ParseResult<FragmentBodies<'static>> {
    let document = Html::parse_document(text);
    let entries: Vec<HtmlFragment> = document
        .select(&ENTRY)
        .map(|div| HtmlFragment::new(div.html(), HtmlLayout::Eintrag))
        .collect();
    if entries.is_empty() {
        return Err(ParseError::Missing("div.eintrag elements"));
    }
    Ok(Box::new(entries.into_iter().map(|e| Ok(FragmentBody::Html(e)))))
}

fn read_meta(meta: &str, ctx: &ExtractContext<'_>, fields: &mut RawFieldSet) -> ExtractionResult<()> {
    let caps = META_LINE
        .captures(meta.trim_start())
        .ok_or_else(|| ExtractionError::Malformed(format!("cannot read meta line {meta:?}")))?;

    let medium = caps[1].trim();
    let medium = medium
        .strip_prefix('"')
        .and_then(|m| m.strip_suffix('"'))
        .unwrap_or(medium);

    let mut date = caps[3].to_string();
    if let Some(time) = caps.get(4) {
        date.push_str(&time.as_str().replace('.', ":"));
    }
    fields.insert("date", read_date(&date, None)?);

    if let Some(page) = PAGE
        .captures(caps.get(5).map_or("", |m| m.as_str()))
        .and_then(|c| c[1].parse::<i64>().ok())
    {
        fields.insert("page", page);
    }
    if !medium.is_empty() {
        fields.insert("medium", ctx.config.medium_alias(medium));
    }
    if let Some(section) = SECTION.captures(meta) {
        fields.insert_nonblank("section", section[1].trim());
    }
    Ok(())
}

pub fn extract(fragment: &HtmlFragment, ctx: &ExtractContext<'_>) -> ExtractionResult<RawFieldSet> {
    if fragment.layout != HtmlLayout::Eintrag {
        return Err(ExtractionError::Malformed(
            "expected a DeFacto entry".into(),
        ));
    }
    let html = fragment.parse();

    let title = html
        .select(&HEADLINE)
        .next()
        .map(element_text)
        .filter(|t| !t.is_empty())
        .ok_or(ExtractionError::MissingField("title"))?;
    let meta = html
        .select(&META)
        .next()
        .map(|pre| pre.text().collect::<String>())
        .ok_or(ExtractionError::MissingField("date"))?;
    let body = html
        .select(&PARAGRAPH)
        .map(element_text)
        .collect::<Vec<_>>()
        .join("\n\n");

    let mut fields = RawFieldSet::new();
    fields.insert("title", title);
    fields.insert_nonblank("text", body.trim());
    read_meta(&meta, ctx, &mut fields)?;
    Ok(fields)
}
