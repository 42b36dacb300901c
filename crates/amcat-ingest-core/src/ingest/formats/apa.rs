//! APA news agency exports.
//!
//! The export is RTF. It is converted to HTML with an external converter,
//! split into pages at `<hr>` and every page is flattened into styled text
//! runs. Bold runs hold the headline, italic runs before the headline hold
//! the metadata and plain runs the body.

use std::collections::BTreeMap;
use std::io::Write;
use std::process::Command;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Node};
use tracing::debug;

use super::{collapse_whitespace, latin1};
use crate::config::RtfConverterConfig;
use crate::dates::read_date;
use crate::ingest::extractor::{ExtractionError, ExtractionResult, RawFieldSet};
use crate::ingest::parser::{FragmentBodies, FragmentBody, ParseError, ParseResult};
use crate::patterns::compile;

const FS20: &[u8] = b"\\fs20";
const PAGE_RULE: [u8; 67] = [b'_'; 67];
const BYTE_PLACEHOLDER: &str = "UNDECODEDBYTEPLACEHOLDER";
const UNICODE_PLACEHOLDER: &str = "UNDECODEDUNICODEPLACEHOLDER";
const UNKNOWN_MEDIUM: &str = "APA - Unknown";

static STOP_AT: LazyLock<Regex> = LazyLock::new(|| {
    compile(
        r"Gespeicherter Anhang:|Der gegenständliche Text ist eine Abschrift|Gespeicherte Anhänge",
    )
});

// 11.05.2004
static DATE: LazyLock<Regex> =
    LazyLock::new(|| compile(r"(?P<day>\d{2})\.(?P<month>\d{2})\.(?P<year>\d{4})"));
// 15.Aug 2013
static DATE_NAMED: LazyLock<Regex> =
    LazyLock::new(|| compile(r"(?P<day>\d{2})\.(?P<month>\w{3}) (?P<year>\d{4})"));
// 11.05.2004 18.00 Uhr
static DATETIME: LazyLock<Regex> = LazyLock::new(|| {
    compile(
        r"(?P<day>\d{2})\.(?P<month>\d{2})\.(?P<year>\d{4}) (?P<hour>\d{2})\.(?P<minute>\d{2}) Uhr",
    )
});
static PAGE: LazyLock<Regex> = LazyLock::new(|| compile(r"Seite:? *L?(?P<page>\d+)"));
static SECTION: LazyLock<Regex> =
    LazyLock::new(|| compile(r"Ressort: *(?P<section>[^;:.?!-]+)"));
static AUTHOR: LazyLock<Regex> = LazyLock::new(|| compile(r"^Von (?P<author>[^0-9]+)$"));
static MEDIUM: LazyLock<Regex> = LazyLock::new(|| {
    compile(r"(?P<medium>.*) vom (?P<day>\d{2})\.(?P<month>\d{2})\.(?P<year>\d{4})")
});
static MEDIUM_QUOTED: LazyLock<Regex> = LazyLock::new(|| {
    compile(
        r#""(?P<medium>.+)" (?P<section>.+) vom (?P<day>\d{2})\.(?P<month>\d{2})\.(?P<year>\d{4})"#,
    )
});

/// Patterns tried against every metadata run, in order; later matches win.
fn meta_patterns() -> [&'static Regex; 8] {
    [
        &*DATE,
        &*DATE_NAMED,
        &*DATETIME,
        &*PAGE,
        &*SECTION,
        &*AUTHOR,
        &*MEDIUM,
        &*MEDIUM_QUOTED,
    ]
}

/// A piece of page text with the styling that surrounded it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextRun {
    pub text: String,
    pub bold: bool,
    pub italic: bool,
    /// A `<br>`; carries no text
    pub line_break: bool,
}

impl TextRun {
    #[must_use]
    pub fn new(text: impl Into<String>, bold: bool, italic: bool) -> Self {
        Self {
            text: text.into(),
            bold,
            italic,
            line_break: false,
        }
    }

    #[must_use]
    pub const fn line_break() -> Self {
        Self {
            text: String::new(),
            bold: false,
            italic: false,
            line_break: true,
        }
    }

    fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }

    const fn is_plain(&self) -> bool {
        !self.bold && !self.italic
    }
}

/// RTF rewritten so the converter only sees ASCII, plus what was replaced.
struct FixedRtf {
    rtf: Vec<u8>,
    bytes: Vec<u8>,
    unicode: Vec<char>,
}

/// Length of a `\uNNNN?` escape at the start of `rest`.
fn unicode_escape(rest: &[u8]) -> Option<(usize, char)> {
    let digits = rest.strip_prefix(b"\\u")?;
    let len = digits.iter().take_while(|b| b.is_ascii_digit()).count();
    if len == 0 || digits.get(len) != Some(&b'?') {
        return None;
    }
    let code: u32 = std::str::from_utf8(&digits[..len]).ok()?.parse().ok()?;
    Some((len + 3, char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER)))
}

/// Page rules become `\page`, `\fs20` gets a trailing space, and escapes and
/// non-ASCII bytes are swapped for placeholders the converter leaves alone.
fn fix_rtf(rtf: &[u8]) -> FixedRtf {
    let mut fixed = FixedRtf {
        rtf: Vec::with_capacity(rtf.len()),
        bytes: Vec::new(),
        unicode: Vec::new(),
    };
    let mut i = 0;
    while i < rtf.len() {
        let rest = &rtf[i..];
        if rest.starts_with(&PAGE_RULE) {
            fixed.rtf.extend_from_slice(b"\\page");
            i += PAGE_RULE.len();
        } else if rest.starts_with(FS20) {
            fixed.rtf.extend_from_slice(FS20);
            fixed.rtf.push(b' ');
            i += FS20.len();
        } else if let Some((len, c)) = unicode_escape(rest) {
            fixed.rtf.extend_from_slice(UNICODE_PLACEHOLDER.as_bytes());
            fixed.unicode.push(c);
            i += len;
        } else if rest[0] >= 0x80 {
            fixed.rtf.extend_from_slice(BYTE_PLACEHOLDER.as_bytes());
            fixed.bytes.push(rest[0]);
            i += 1;
        } else {
            fixed.rtf.push(rest[0]);
            i += 1;
        }
    }
    fixed
}

/// Replace successive occurrences of `token` with successive `values`.
fn restore(html: &str, token: &str, values: impl IntoIterator<Item = char>) -> String {
    let mut values = values.into_iter();
    let mut parts = html.split(token);
    let mut out = parts.next().unwrap_or_default().to_string();
    for part in parts {
        match values.next() {
            Some(c) => out.push(c),
            None => out.push_str(token),
        }
        out.push_str(part);
    }
    out
}

fn convert(rtf: &[u8], config: &RtfConverterConfig) -> ParseResult<String> {
    let converter = config.find_available().ok_or_else(|| {
        ParseError::Converter(format!(
            "no RTF converter available (tried {})",
            config.converters.join(", ")
        ))
    })?;

    let fixed = fix_rtf(rtf);
    let mut input = tempfile::NamedTempFile::new()?;
    input.write_all(&fixed.rtf)?;
    input.flush()?;

    let output = Command::new(&converter)
        .args(&config.args)
        .arg(input.path())
        .output()?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ParseError::Converter(format!(
            "{} failed: {}",
            converter.display(),
            stderr.trim()
        )));
    }
    debug!(converter = %converter.display(), bytes = output.stdout.len(), "converted RTF");

    let html = restore(&latin1(&output.stdout), BYTE_PLACEHOLDER, fixed.bytes.iter().copied().map(char::from));
    let html = restore(&html, UNICODE_PLACEHOLDER, fixed.unicode);
    Ok(html.replace("&gt;", ">").replace("&lt;", "<"))
}

fn looks_like_html(bytes: &[u8]) -> bool {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let head: Vec<u8> = bytes[start..].iter().take(16).map(u8::to_ascii_lowercase).collect();
    head.starts_with(b"<html") || head.starts_with(b"<!doctype")
}

const SKIPPED: [&str; 4] = ["head", "title", "style", "script"];

/// Flatten converted HTML into pages of styled runs, split at `<hr>`.
pub fn pages(html: &str) -> Vec<Vec<TextRun>> {
    let document = Html::parse_document(html);
    let mut pages = vec![Vec::new()];

    for node in document.tree.root().descendants() {
        match node.value() {
            Node::Element(e) if e.name() == "hr" => pages.push(Vec::new()),
            Node::Element(e) if e.name() == "br" => {
                if let Some(page) = pages.last_mut() {
                    page.push(TextRun::line_break());
                }
            }
            Node::Text(text) => {
                let tags: Vec<&str> = node
                    .ancestors()
                    .filter_map(|a| a.value().as_element().map(|e| e.name()))
                    .collect();
                if tags.iter().any(|t| SKIPPED.contains(t)) {
                    continue;
                }
                let bold = tags.iter().any(|t| matches!(*t, "b" | "strong"));
                let italic = tags.iter().any(|t| matches!(*t, "i" | "em"));
                if let Some(page) = pages.last_mut() {
                    page.push(TextRun::new(&**text, bold, italic));
                }
            }
            _ => {}
        }
    }

    pages.retain(|page| page.iter().any(|run| !run.is_blank()));
    pages
}

pub(crate) fn split(
    bytes: &[u8],
    config: &RtfConverterConfig,
) -> ParseResult<FragmentBodies<'static>> {
    let html = if looks_like_html(bytes) {
        std::str::from_utf8(bytes).map_or_else(|_| latin1(bytes), str::to_string)
    } else {
        convert(bytes, config)?
    };
    let pages = pages(&html);
    Ok(Box::new(pages.into_iter().map(|page| Ok(FragmentBody::Runs(page)))))
}

/// Join runs into text; runs keep one space where they had whitespace at
/// their edges and lines are trimmed.
fn join_runs<'r>(runs: impl IntoIterator<Item = &'r TextRun>) -> String {
    let mut text = String::new();
    for run in runs {
        if run.line_break {
            text.push('\n');
            continue;
        }
        if run.text.starts_with(char::is_whitespace) && !text.ends_with(char::is_whitespace) {
            text.push(' ');
        }
        text.push_str(&collapse_whitespace(&run.text));
        if run.text.ends_with(char::is_whitespace) && !run.is_blank() {
            text.push(' ');
        }
    }
    text.lines()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Body runs up to the first attachment or transcript notice.
fn body<'r>(runs: impl IntoIterator<Item = &'r TextRun>) -> String {
    join_runs(runs.into_iter().take_while(|run| !STOP_AT.is_match(&run.text)))
}

fn read_apa_date(fields: &BTreeMap<String, String>) -> ExtractionResult<chrono::NaiveDateTime> {
    let get = |k: &str| fields.get(k).map(String::as_str);
    let (Some(day), Some(month), Some(year)) = (get("day"), get("month"), get("year")) else {
        return Err(ExtractionError::MissingField("date"));
    };
    let mut date = if month.chars().all(|c| c.is_ascii_digit()) {
        format!("{year}-{month}-{day}")
    } else {
        format!("{day} {month} {year}")
    };
    if let (Some(hour), Some(minute)) = (get("hour"), get("minute")) {
        date.push_str(&format!(" {hour}:{minute}"));
    }
    Ok(read_date(&date, None)?)
}

/// Date, page, section, author and medium found in one metadata string.
fn match_meta(text: &str, fields: &mut BTreeMap<String, String>) -> bool {
    let mut matched = false;
    for pattern in meta_patterns() {
        let Some(caps) = pattern.captures(text) else {
            continue;
        };
        matched = true;
        for name in pattern.capture_names().flatten() {
            if let Some(m) = caps.name(name) {
                fields.insert(name.to_string(), m.as_str().trim().to_string());
            }
        }
    }
    matched
}

fn line_field(label: &str) -> Option<&'static str> {
    match label.to_lowercase().as_str() {
        "titel" | "überschrift" | "headline" => Some("title"),
        "datum" | "date" => Some("date"),
        "medium" | "quelle" => Some("medium"),
        "ressort" | "rubrik" => Some("section"),
        "seite" => Some("page"),
        "autor" | "von" => Some("author"),
        _ => None,
    }
}

/// Pages written as `Label:` lines with the body after a bold `Inhalt:`.
///
/// Returns `None` when the page has no `Inhalt:` label.
fn extract_lines(page: &[TextRun]) -> ExtractionResult<Option<RawFieldSet>> {
    let lines: Vec<&[TextRun]> = page.split(|run| run.line_break).collect();
    let label_of = |line: &[TextRun]| -> Option<(usize, String)> {
        let (index, run) = line.iter().enumerate().find(|(_, run)| !run.is_blank())?;
        let label = run.text.trim().strip_suffix(':')?;
        run.bold.then(|| (index, label.trim().to_string()))
    };

    let Some(content) = lines
        .iter()
        .position(|line| label_of(line).is_some_and(|(_, label)| label == "Inhalt"))
    else {
        return Ok(None);
    };

    let mut meta = RawFieldSet::new();
    let mut unlabelled = Vec::new();
    for line in &lines[..content] {
        match label_of(line) {
            Some((index, label)) => {
                let value = join_runs(&line[index + 1..]);
                let key = line_field(&label).map_or(label, str::to_string);
                meta.insert_nonblank(key, value);
            }
            None => {
                let text = join_runs(line.iter());
                if !text.is_empty() {
                    unlabelled.push(text);
                }
            }
        }
    }

    let mut fields = RawFieldSet::new();
    let title = meta
        .remove("title")
        .map(|t| t.to_string())
        .or_else(|| unlabelled.first().cloned())
        .ok_or(ExtractionError::MissingField("title"))?;
    fields.insert("title", title);

    let break_run = TextRun::line_break();
    let (index, _) = label_of(lines[content]).unwrap_or_default();
    let mut body_runs: Vec<&TextRun> = lines[content][index + 1..].iter().collect();
    for line in &lines[content + 1..] {
        body_runs.push(&break_run);
        body_runs.extend(line.iter());
    }
    fields.insert_nonblank("text", body(body_runs));

    let date = meta
        .remove("date")
        .ok_or(ExtractionError::MissingField("date"))?
        .to_string();
    let mut parts = BTreeMap::new();
    let date = if match_meta(&date, &mut parts) {
        read_apa_date(&parts)?
    } else {
        read_date(&date, None)?
    };
    fields.insert("date", date);

    for (key, value) in meta.iter() {
        fields.insert(key, value.clone());
    }
    Ok(Some(fields))
}

/// Pages where styling tells headline, metadata and body apart.
fn extract_styled(page: &[TextRun]) -> ExtractionResult<RawFieldSet> {
    let first_headline = page
        .iter()
        .position(|run| run.bold)
        .ok_or_else(|| ExtractionError::Malformed("no possible headlines found".into()))?;

    let mut meta = BTreeMap::new();
    let mut byline = Vec::new();
    for run in page[..first_headline].iter().filter(|r| r.italic && !r.is_blank()) {
        if !match_meta(run.text.trim(), &mut meta) {
            byline.push(run.text.trim());
        }
    }

    let date = read_apa_date(&meta)?;
    let medium = meta
        .get("medium")
        .map_or(UNKNOWN_MEDIUM, String::as_str)
        .trim()
        .trim_matches('"')
        .to_string();

    let mut headline: String = page.iter().filter(|r| r.bold).map(|r| r.text.as_str()).collect();
    if headline.contains(&medium) {
        let dashes = medium.matches('-').count();
        headline = headline
            .splitn(dashes + 2, '-')
            .last()
            .unwrap_or_default()
            .to_string();
    }

    let mut fields = RawFieldSet::new();
    fields.insert_nonblank("title", collapse_whitespace(&headline));
    fields.insert_nonblank("text", body(page.iter().filter(|r| r.is_plain() || r.line_break)));
    fields.insert("date", date);
    fields.insert("medium", medium);
    if let Some(section) = meta.get("section") {
        fields.insert_nonblank("section", section.as_str());
    }
    if let Some(page) = meta.get("page").and_then(|p| p.parse::<i64>().ok()) {
        fields.insert("page", page);
    }
    if let Some(author) = meta.get("author") {
        fields.insert_nonblank("author", author.as_str());
    }
    if !byline.is_empty() {
        fields.insert("byline", byline.join(" - "));
    }
    Ok(fields)
}

/// Extract the fields of one page; the line-based layout wins when present.
pub fn extract(page: &[TextRun]) -> ExtractionResult<RawFieldSet> {
    match extract_lines(page)? {
        Some(fields) => Ok(fields),
        None => extract_styled(page),
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::ingest::extractor::RawValue;

    const STYLED: &str = r#"<html><head><title>export</title></head><body>
<i>Kurier vom 11.05.2004</i><br>
<i>Seite 14</i><br>
<i>Ressort: Chronik</i><br>
<i>Von Robert Zwickelsdorfer</i><br>
<i>Wien</i><br>
<b>Kurier - Neue Brücke eröffnet</b><br>
Die neue Brücke wurde <i>gestern</i> eröffnet.<br>
Der Verkehr fließt.<br>
Gespeicherter Anhang: foto.jpg
<hr>
<i>"Die Presse" Inland vom 12.05.2004 18.30 Uhr</i><br>
<b>Zweiter Artikel</b><br>
Text zwei.
<hr>
</body></html>"#;

    const LINES: &str = "<html><body>\n\
<b>Titel:</b> Regierung beschließt Budget<br>\n\
<b>Datum:</b> 15.08.2013<br>\n\
<b>Medium:</b> Der Standard<br>\n\
<b>Ressort:</b> Inland<br>\n\
<b>Inhalt:</b> Die Regierung hat das Budget beschlossen.<br>\n\
Die Opposition kritisiert das.<br>\n\
</body></html>";

    fn date(y: i32, m: u32, d: u32, h: u32, min: u32) -> RawValue {
        RawValue::DateTime(NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(h, min, 0).unwrap())
    }

    #[test]
    fn test_fix_rtf() {
        let mut rtf = b"{\\rtf1 \\fs20Hallo ".to_vec();
        rtf.extend_from_slice(&PAGE_RULE);
        rtf.extend_from_slice(b" B\xf6rse \\u8364? x}");
        let fixed = fix_rtf(&rtf);
        let text = String::from_utf8(fixed.rtf).unwrap();

        assert!(text.is_ascii());
        assert!(text.contains("\\fs20 Hallo"));
        assert!(text.contains("\\page"));
        assert!(!text.contains('_'));
        assert_eq!(fixed.bytes, vec![0xf6]);
        assert_eq!(fixed.unicode, vec!['€']);

        let html = restore(&text, BYTE_PLACEHOLDER, fixed.bytes.iter().copied().map(char::from));
        let html = restore(&html, UNICODE_PLACEHOLDER, fixed.unicode);
        assert!(html.contains("Börse €"));
    }

    #[test]
    fn test_pages_split_at_rules() {
        let pages = pages(STYLED);
        assert_eq!(pages.len(), 2);
        assert!(pages[0].iter().any(|r| r.bold && r.text.contains("Neue Brücke")));
        assert!(!pages[0].iter().any(|r| r.text.contains("export")));
    }

    #[test]
    fn test_styled_page() {
        let pages = pages(STYLED);
        let fields = extract(&pages[0]).unwrap();

        assert_eq!(fields.text("title"), Some("Neue Brücke eröffnet"));
        assert_eq!(fields.text("medium"), Some("Kurier"));
        assert_eq!(fields.text("section"), Some("Chronik"));
        assert_eq!(fields.text("author"), Some("Robert Zwickelsdorfer"));
        assert_eq!(fields.text("byline"), Some("Wien"));
        assert_eq!(fields.get("page"), Some(&RawValue::Int(14)));
        assert_eq!(fields.get("date"), Some(&date(2004, 5, 11, 0, 0)));
        assert_eq!(
            fields.text("text"),
            Some("Die neue Brücke wurde eröffnet.\nDer Verkehr fließt.")
        );
    }

    #[test]
    fn test_quoted_medium_with_time() {
        let pages = pages(STYLED);
        let fields = extract(&pages[1]).unwrap();

        assert_eq!(fields.text("title"), Some("Zweiter Artikel"));
        assert_eq!(fields.text("medium"), Some("Die Presse"));
        assert_eq!(fields.text("section"), Some("Inland"));
        assert_eq!(fields.get("date"), Some(&date(2004, 5, 12, 18, 30)));
        assert_eq!(fields.text("text"), Some("Text zwei."));
    }

    #[test]
    fn test_line_based_page() {
        let pages = pages(LINES);
        let fields = extract(&pages[0]).unwrap();

        assert_eq!(fields.text("title"), Some("Regierung beschließt Budget"));
        assert_eq!(fields.get("date"), Some(&date(2013, 8, 15, 0, 0)));
        assert_eq!(fields.text("medium"), Some("Der Standard"));
        assert_eq!(fields.text("section"), Some("Inland"));
        assert_eq!(
            fields.text("text"),
            Some("Die Regierung hat das Budget beschlossen.\nDie Opposition kritisiert das.")
        );
    }

    #[test]
    fn test_page_without_headline() {
        let page = vec![TextRun::new("just text", false, false)];
        assert!(matches!(extract(&page), Err(ExtractionError::Malformed(_))));
    }

    #[test]
    fn test_missing_date() {
        let page = vec![
            TextRun::new("Wien", false, true),
            TextRun::new("Headline", true, false),
            TextRun::new("Body", false, false),
        ];
        assert!(matches!(extract(&page), Err(ExtractionError::MissingField("date"))));
    }

    #[test]
    fn test_html_input_skips_conversion() {
        let config = RtfConverterConfig {
            converters: vec!["definitely-not-installed-rtf-converter".into()],
            args: vec![],
        };
        let bodies: Vec<_> = split(STYLED.as_bytes(), &config).unwrap().collect();
        assert_eq!(bodies.len(), 2);

        let err = split(b"{\\rtf1 x}", &config).err().unwrap();
        assert!(matches!(err, ParseError::Converter(_)));
    }
}
