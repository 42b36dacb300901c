//! LexisNexis plain-text exports.
//!
//! An export is a cover page followed by articles, each introduced by a
//! centred `N of M DOCUMENTS` banner. An article consists of
//!
//! 1. a header of indented lines (medium, date, sometimes a time),
//! 2. a left-aligned headline, optionally followed by a byline,
//! 3. a block of `KEY: value` meta fields,
//! 4. the body,
//! 5. a trailing block of meta fields (`LOAD-DATE`, `LANGUAGE`, ...).

use std::sync::LazyLock;

use chrono::{NaiveDateTime, NaiveTime};
use regex::Regex;

use super::collapse_whitespace;
use crate::config::{IngestConfig, LexisNexisConfig};
use crate::dates::{is_date, read_date, Language};
use crate::ingest::extractor::{ExtractionError, ExtractionResult, RawFieldSet, RawValue};
use crate::ingest::parser::{FragmentBodies, FragmentBody, ParseError, ParseResult};
use crate::patterns::compile;

static DOCUMENT_COUNT: LazyLock<Regex> = LazyLock::new(|| {
    compile(r"^\s*(?:(?:FOCUS -)? *\d* (?:of|OF) \d* DOCUMENTS?|(?i:Dokument) *\d* *von *\d*)")
});
static HEADER_META: LazyLock<Regex> = LazyLock::new(|| compile(r"^([\w -]*):(.*)"));
/// Like a header key but without lower case letters
static BODY_META: LazyLock<Regex> = LazyLock::new(|| compile(r"^([^0-9a-z: ]+):(.*)$"));
/// A line such as `UPDATE: 2. September 2011` ends the body, as does a copyright notice
static BODY_END: LazyLock<Regex> = LazyLock::new(|| {
    compile(
        r"^(?:[^0-9a-z: ]+:.*[ -]\d{4}$|PUBLICATION-TYPE:|SECTION:|LENGTH:[^:]*$|LANGUE:[^:]*$|RUBRIK:|Copyright \d{4}.*)",
    )
});
static COPYRIGHT_LINE: LazyLock<Regex> = LazyLock::new(|| compile(r"^Copyright \d{4}"));
static COPYRIGHT_SOURCE: LazyLock<Regex> =
    LazyLock::new(|| compile(r"(?i)^copyright\s\x{a9}?\s?(?:\d{4})?(.*)"));
static SPLIT_LANGUAGES: LazyLock<Regex> = LazyLock::new(|| compile(r"[^\w ]"));
static YEAR_AT_END: LazyLock<Regex> = LazyLock::new(|| compile(r"(.*)(\d{4})$"));
static ISSUE: LazyLock<Regex> = LazyLock::new(|| compile(r"[-\d]+[^\d]+\d+"));
static TIME_LINE: LazyLock<Regex> = LazyLock::new(|| compile(r"\b\d?\d:\d\d\s(?:PM\b)?"));
static ONLINE_BLOCKS: LazyLock<Regex> = LazyLock::new(|| compile(r"\n *\n\s*"));
static WORD_COUNT: LazyLock<Regex> = LazyLock::new(|| compile(r"^(\d+) words"));

const COPYRIGHT_PREFIX_LEN: usize = "Copyright xxxx".len();

pub fn is_banner(line: &str) -> bool {
    DOCUMENT_COUNT.is_match(line)
}

pub fn count_banners(text: &str) -> usize {
    text.lines().filter(|l| is_banner(l)).count()
}

/// Split an export into its cover page and the rest, which starts at the
/// first banner.
pub fn split_header(text: &str) -> Option<(&str, &str)> {
    let text = text.trim_start_matches('\u{feff}');
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        if is_banner(line) {
            return Some((text[..offset].trim(), text[offset..].trim()));
        }
        offset += line.len();
    }
    None
}

/// Parse the cover page into `key: value` pairs; lines without a key
/// continue the previous value.
pub fn parse_header(header: &str) -> Vec<(String, String)> {
    let mut meta: Vec<(String, Vec<&str>)> = Vec::new();
    for line in header.split('\n') {
        if let Some(caps) = HEADER_META.captures(line) {
            let key = caps.get(1).map_or("", |m| m.as_str()).trim();
            let value = caps.get(2).map_or("", |m| m.as_str());
            match meta.iter_mut().find(|(k, _)| k == key) {
                Some((_, values)) => values.push(value),
                None => meta.push((key.to_string(), vec![value])),
            }
        } else if let Some((_, values)) = meta.last_mut() {
            values.push(line);
        }
    }
    meta.into_iter()
        .map(|(key, values)| (key, values.join("\n").trim().to_string()))
        .collect()
}

/// The search query recorded on the cover page, if any.
pub fn get_query(header: &[(String, String)], config: &LexisNexisConfig) -> Option<String> {
    config.query_keys.iter().find_map(|wanted| {
        header
            .iter()
            .find(|(key, _)| key.trim().to_lowercase() == *wanted)
            .map(|(_, value)| value.clone())
    })
}

/// Articles following the first banner, one per banner.
struct Articles<'a> {
    lines: std::str::Split<'a, char>,
    finished: bool,
}

impl Iterator for Articles<'_> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        if self.finished {
            return None;
        }
        let mut article = String::new();
        for line in self.lines.by_ref() {
            if is_banner(line) {
                return Some(article);
            }
            article.push_str(line);
            article.push('\n');
        }
        self.finished = true;
        Some(article)
    }
}

pub(crate) fn split<'a>(
    text: &'a str,
    config: &IngestConfig,
) -> ParseResult<(Option<String>, FragmentBodies<'a>)> {
    let (header, body) = split_header(text).ok_or(ParseError::Missing("document banner"))?;
    let query = get_query(&parse_header(header), &config.lexisnexis);

    let mut lines = body.split('\n');
    lines.next();
    let articles = Articles {
        lines,
        finished: false,
    };
    Ok((query, Box::new(articles.map(|a| Ok(FragmentBody::Text(a))))))
}

fn is_blank(line: &str) -> bool {
    line.trim().is_empty()
}

fn is_indented(line: &str) -> bool {
    line.starts_with(' ')
}

/// Drop leading and trailing blank lines and carriage returns.
fn strip_article(article: &str) -> Option<Vec<&str>> {
    let lines: Vec<&str> = article
        .split('\n')
        .map(|l| l.trim_end_matches('\r'))
        .collect();
    let first = lines.iter().position(|l| !is_blank(l))?;
    let last = lines.iter().rposition(|l| !is_blank(l))?;
    Some(lines[first..=last].to_vec())
}

fn next_is_indented(rest: &[&str], skip_blank: bool) -> bool {
    for line in rest.iter().skip(1) {
        if !is_blank(line) {
            return is_indented(line);
        }
        if !skip_blank {
            return false;
        }
    }
    false
}

/// Whether the text is followed by a blank line, one or two indented date
/// lines and another blank line.
fn followed_by_date_block(rest: &[&str]) -> bool {
    let mut i = 0;
    while rest.len() - i >= 5 {
        let l = &rest[i..];
        if is_blank(l[1]) && is_indented(l[2]) && is_blank(l[3]) {
            return true;
        }
        if is_blank(l[1]) && is_indented(l[2]) && is_indented(l[3]) && is_blank(l[4]) {
            return true;
        }
        if is_blank(l[1]) || is_indented(l[1]) {
            return false;
        }
        i += 1;
    }
    false
}

/// Cursor over the lines of one article.
struct ArticleReader<'a, 'c> {
    lines: Vec<&'a str>,
    pos: usize,
    config: &'c LexisNexisConfig,
    metadata_language: Option<Language>,
}

type MetaField = (String, String, String);

impl<'a, 'c> ArticleReader<'a, 'c> {
    fn line(&self, offset: usize) -> Option<&'a str> {
        self.lines.get(self.pos + offset).copied()
    }

    fn rest(&self) -> &[&'a str] {
        self.lines.get(self.pos..).unwrap_or_default()
    }

    fn at_end(&self) -> bool {
        self.pos >= self.lines.len()
    }

    fn in_header(&mut self, headline: &mut Vec<&'a str>) -> bool {
        let Some(first) = self.line(0) else {
            return false;
        };
        if is_blank(first) {
            return true;
        }

        // a page-wide line followed by indented lines is still header
        if !is_indented(first)
            && next_is_indented(self.rest(), false)
            && first.trim().chars().count() > 75
        {
            return true;
        }

        if !is_indented(first) && next_is_indented(self.rest(), true) {
            headline.push(first);
            self.pos += 1;
        } else {
            while let Some(line) = self.line(0) {
                if is_indented(line) || !followed_by_date_block(self.rest()) {
                    break;
                }
                headline.push(line);
                self.pos += 1;
            }
        }

        self.line(0).is_some_and(|l| is_blank(l) || is_indented(l))
    }

    /// Consume the indented header lines, collecting any headline that is
    /// interleaved with them.
    fn consume_header(&mut self) -> (Vec<String>, Vec<&'a str>) {
        let mut header = Vec::new();
        let mut headline = Vec::new();
        while self.in_header(&mut headline) {
            let Some(line) = self.line(0) else { break };
            self.pos += 1;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let line = if COPYRIGHT_LINE.is_match(line) {
                line.get(COPYRIGHT_PREFIX_LEN..).unwrap_or_default()
            } else {
                line
            };
            header.push(line.to_string());
        }
        (header, headline)
    }

    /// Consume the headline and byline that precede the meta block.
    fn consume_headline(&mut self) -> (Option<String>, Option<String>) {
        let mut headline = Vec::new();
        let mut byline = Vec::new();
        let mut in_byline = false;

        while let Some(raw) = self.line(0) {
            let line = raw.trim();
            if BODY_META.is_match(line) {
                return (None, None);
            }
            if line.is_empty() {
                // title, blank, byline, blank, META: the blank is not the end
                let rest = self.rest();
                let byline_follows = rest.len() > 4
                    && rest[2].is_empty()
                    && !rest[1].is_empty()
                    && BODY_META.is_match(rest[3])
                    && !BODY_META.is_match(rest[1]);
                if !byline_follows {
                    break;
                }
                in_byline = true;
                self.pos += 1;
                continue;
            }

            let target = if in_byline { &mut byline } else { &mut headline };
            if let Some(line) = line.strip_suffix(';') {
                target.push(line);
                in_byline = true;
            } else {
                target.push(line);
            }
            self.pos += 1;
        }

        let join = |parts: Vec<&str>| (!parts.is_empty()).then(|| collapse_whitespace(&parts.join(" ")));
        (join(headline), join(byline))
    }

    /// Consume `KEY: value` lines up to the start of the body, which is
    /// marked by two blank lines or a line that is not a meta field.
    fn consume_meta(&mut self, after_body: bool) -> Vec<MetaField> {
        let mut fields = Vec::new();

        while let Some(raw) = self.line(0) {
            let line = raw.trim();
            let next = self.line(1).map(str::trim);
            let meta = BODY_META.captures(line);

            if (line.is_empty() && next.is_none_or(str::is_empty))
                || (!line.is_empty() && meta.is_none())
            {
                break;
            }

            if let (Some(caps), false) = (&meta, after_body) {
                let key = caps.get(1).map_or("", |m| m.as_str());
                let value = caps.get(2).map_or("", |m| m.as_str());
                // an unknown key followed by body text is the start of the body
                if !value.trim().is_empty() && !self.config.is_meta_field(key) {
                    if let Some(next_block) = next_block(self.rest()) {
                        if !BODY_META.is_match(next_block) {
                            break;
                        }
                    }
                }
            }
            self.pos += 1;

            if let Some(caps) = meta {
                let orig_key = caps.get(1).map_or("", |m| m.as_str());
                let mut value = caps.get(2).map_or("", |m| m.as_str()).to_string();
                let lower = orig_key.to_lowercase();
                if self.metadata_language.is_none() {
                    self.metadata_language = self.config.metadata_languages.get(&lower).copied();
                }
                while let Some(cont) = self.line(0).filter(|l| !is_blank(l)) {
                    value.push(' ');
                    value.push_str(cont);
                    self.pos += 1;
                }
                fields.push((
                    orig_key.to_string(),
                    self.config.canonical_key(&lower),
                    collapse_whitespace(&value),
                ));
            }
        }
        fields
    }

    /// Consume body lines up to the trailing meta block or copyright notice.
    fn consume_body(&mut self) -> Vec<&'a str> {
        let end = self
            .rest()
            .iter()
            .position(|l| BODY_END.is_match(l.trim()))
            .map_or(self.lines.len(), |i| self.pos + i);
        let body = self.lines[self.pos..end].to_vec();
        self.pos = end;
        body
    }
}

/// First non-blank line after a blank line.
fn next_block<'a>(lines: &[&'a str]) -> Option<&'a str> {
    let mut found_blank = false;
    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            found_blank = true;
        } else if found_blank {
            return Some(line);
        }
    }
    None
}

/// Articles from the online section have a fixed six-block layout:
/// medium, url, date, title, word count, lead.
fn parse_online_article(lines: &[&str]) -> Option<RawFieldSet> {
    let text = lines.join("\n");
    let blocks: Vec<&str> = ONLINE_BLOCKS.split(&text).collect();
    let [medium, url, date, title, words, lead] = blocks.as_slice() else {
        return None;
    };
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return None;
    }
    let lead = lead.strip_prefix("Bewaar lees artikel").unwrap_or(lead);
    let words: i64 = WORD_COUNT.captures(words)?.get(1)?.as_str().parse().ok()?;
    let date = read_date(date, None).ok()?;

    Some(
        RawFieldSet::new()
            .with("title", title.trim())
            .with("text", lead.trim())
            .with("date", date)
            .with("medium", medium.trim())
            .with("length", words)
            .with("url", url.trim()),
    )
}

fn get_source(header: &[String], dateline: usize, config: &LexisNexisConfig) -> String {
    let index = if dateline > 0 { 0 } else { 1 };
    let mut source = header
        .get(index)
        .or_else(|| header.first())
        .cloned()
        .unwrap_or_default();
    if config.publisher_sources.iter().any(|p| p == source.trim())
        && dateline > 2
        && !is_blank(&header[dateline - 1])
    {
        source.clone_from(&header[dateline - 1]);
    }
    source
}

/// Languages used to read the header date: the article languages plus the
/// language of the metadata keys. Without both, every month table is used.
fn date_languages(
    meta: &RawFieldSet,
    metadata_language: Option<Language>,
    config: &IngestConfig,
) -> Option<Vec<Language>> {
    let metadata_language = metadata_language?;
    let declared = meta.text("language").unwrap_or_default();
    let mut pool: Vec<Language> = SPLIT_LANGUAGES
        .split(declared)
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .filter_map(|l| config.language(l))
        .collect();
    if pool.is_empty() {
        return None;
    }
    pool.push(metadata_language);
    pool.dedup();
    Some(pool)
}

struct HeaderDate {
    date: String,
    dateline: Option<usize>,
    source: String,
}

fn find_header_date(
    header: &[String],
    meta: &mut RawFieldSet,
    pool: Option<&[Language]>,
    config: &LexisNexisConfig,
) -> ExtractionResult<HeaderDate> {
    if let Some(i) = header.iter().position(|l| is_date(l, pool)) {
        return Ok(HeaderDate {
            date: header[i].clone(),
            dateline: Some(i),
            source: get_source(header, i, config),
        });
    }

    // month and year only, the last such line wins
    for (i, line) in header.iter().enumerate().rev() {
        let date = format!("1 {line}");
        if is_date(&date, pool) {
            return Ok(HeaderDate {
                date,
                dateline: None,
                source: get_source(header, i, config),
            });
        }
    }

    // a season or bare year, as used by journals
    if let Some(caps) = header.iter().find_map(|l| YEAR_AT_END.captures(l)) {
        let season = caps.get(1).map_or("", |m| m.as_str());
        let year = caps.get(2).map_or("", |m| m.as_str());
        let month = config
            .seasons
            .get(&season.replace(',', "").trim().to_lowercase())
            .copied()
            .unwrap_or(1);
        if let Some(issue) = header.iter().find_map(|l| ISSUE.find(l)) {
            meta.insert("issue", issue.as_str());
        }
        return Ok(HeaderDate {
            date: format!("{year}-{month:02}-01"),
            dateline: None,
            source: header[0].clone(),
        });
    }

    let trimmed: Vec<&str> = header.iter().map(|l| l.trim()).collect();
    if let [medium] = trimmed.as_slice() {
        if config.load_date_media.iter().any(|m| m == medium) {
            if let Some(RawValue::Text(date)) = meta.remove("load-date") {
                return Ok(HeaderDate {
                    date,
                    dateline: None,
                    source: header[0].clone(),
                });
            }
        }
    }

    Err(ExtractionError::MissingField("date"))
}

/// Add the time printed on the line after the date line, if the date has none.
fn merge_time(
    date: NaiveDateTime,
    header: &[String],
    dateline: Option<usize>,
) -> ExtractionResult<NaiveDateTime> {
    let Some(timeline) = dateline.and_then(|i| header.get(i + 1)) else {
        return Ok(date);
    };
    match TIME_LINE.find(timeline) {
        Some(m) if date.time() == NaiveTime::MIN => Ok(read_date(
            &format!("{} {}", date.format("%Y-%m-%d"), m.as_str()),
            None,
        )?),
        _ => Ok(date),
    }
}

fn parse_length(value: &str) -> ExtractionResult<i64> {
    value
        .split_whitespace()
        .next()
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| ExtractionError::InvalidValue {
            field: "length".into(),
            value: value.to_string(),
        })
}

/// Extract the fields of one article.
pub fn extract(article: &str, config: &IngestConfig) -> ExtractionResult<RawFieldSet> {
    let lines = strip_article(article).ok_or_else(|| ExtractionError::Malformed("empty article".into()))?;
    if let Some(online) = parse_online_article(&lines) {
        return Ok(online);
    }

    let ln = &config.lexisnexis;
    let mut reader = ArticleReader {
        lines,
        pos: 0,
        config: ln,
        metadata_language: None,
    };

    let (header, header_headline) = reader.consume_header();
    if reader.at_end() {
        return Err(ExtractionError::Malformed("article has no body".into()));
    }

    let (mut title, mut byline) = if header_headline.is_empty() {
        reader.consume_headline()
    } else {
        let joined = collapse_whitespace(&header_headline.join(" "));
        let (mut title, byline) = match joined.split_once(';') {
            Some((t, b)) => (t.trim().to_string(), Some(b.trim().to_string())),
            None => (joined, None),
        };
        if title
            .split_once(':')
            .is_some_and(|(label, _)| !label.is_empty() && label.chars().all(|c| c.is_ascii_uppercase()))
        {
            title = title.split_once(':').map(|(_, t)| t.to_string()).unwrap_or_default();
        }
        (Some(title), byline)
    };

    let head_meta = reader.consume_meta(false);
    let first_key = head_meta.first().map(|(orig, key, _)| (orig.clone(), key.clone()));
    let mut meta: RawFieldSet = head_meta.into_iter().map(|(_, k, v)| (k, v)).collect();

    if title.is_none() {
        title = ["title", "kop"]
            .iter()
            .find_map(|k| meta.remove(k))
            .map(|v| v.to_string());
    }

    let body = reader.consume_body();
    for (_, key, value) in reader.consume_meta(true) {
        meta.insert(key, value);
    }

    let pool = date_languages(&meta, reader.metadata_language, config);
    let found = find_header_date(&header, &mut meta, pool.as_deref(), ln)?;
    let date = read_date(&found.date, pool.as_deref())?;
    let date = merge_time(date, &header, found.dateline)?;

    let source = COPYRIGHT_SOURCE
        .captures(&found.source)
        .and_then(|c| c.get(1))
        .map_or(found.source.as_str(), |m| m.as_str())
        .trim()
        .to_string();

    let mut text = body.join("\n").trim().to_string();
    if text.is_empty() {
        if let Some(graphic) = meta.remove("graphic") {
            text = graphic.to_string();
        }
    }

    if title.is_none() {
        if let Some(headline) = meta.remove("headline") {
            if !meta.contains("title") {
                meta.insert("title", headline);
            }
        }
        if let Some(meta_title) = meta.remove("title") {
            let meta_title = collapse_whitespace(&meta_title.to_string());
            match meta_title.split_once(';') {
                Some((t, b)) if byline.is_none() => {
                    title = Some(t.trim().to_string());
                    byline = Some(b.trim().to_string());
                }
                _ => title = Some(meta_title),
            }
        } else if let Some((orig, key)) = first_key {
            // the headline was mistaken for a meta field
            if !ln.is_meta_field(&orig) {
                if let Some(value) = meta.remove(&key) {
                    title = Some(format!("{key}: {value}"));
                }
            }
        }
    }

    if let Some(meta_byline) = meta.remove("byline") {
        if let (Some(t), Some(b)) = (title.as_mut(), byline.as_ref()) {
            t.push_str("; ");
            t.push_str(b);
        }
        byline = Some(meta_byline.to_string());
    }

    if let Some(length) = meta.remove("length") {
        meta.insert("length", parse_length(&length.to_string())?);
    }

    let mut fields = RawFieldSet::new();
    if let Some(title) = title {
        fields.insert_nonblank("title", title.trim());
    }
    if let Some(byline) = byline {
        fields.insert_nonblank("byline", byline);
    }
    fields.insert_nonblank("text", text);
    fields.insert("date", date);
    fields.insert_nonblank("medium", source);
    for (key, value) in meta.iter() {
        fields.insert_nonblank(key, value.clone());
    }
    Ok(fields)
}
