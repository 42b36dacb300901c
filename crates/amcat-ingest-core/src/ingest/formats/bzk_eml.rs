//! BZK press cuttings delivered as a single mail message.
//!
//! The mail body starts after a line beginning with `1red`. The first
//! non-empty line after it reads `<date>, <section>, <medium>`, the first
//! all-caps line is the headline, and the rest is quoted-printable text.

use std::sync::LazyLock;

use chrono::{Months, NaiveDateTime};
use regex::{Captures, Regex};

use crate::dates::read_date;
use crate::ingest::extractor::{ExtractContext, ExtractionError, ExtractionResult, RawFieldSet};
use crate::patterns::compile;

static ESCAPED_BYTE: LazyLock<Regex> = LazyLock::new(|| compile("=([A-F0-9]{2})"));

const CONTENT_MARKER: &str = "1red";

/// Days a cutting may lie after its mail before the year is taken to be wrong.
const MAX_DAYS_AFTER_MAIL: i64 = 200;

pub fn looks_like_mail(text: &str) -> bool {
    let mut date = false;
    let mut marker = false;
    for line in text.lines() {
        date |= line.starts_with("Date:");
        marker |= line.starts_with(CONTENT_MARKER);
    }
    date && marker
}

fn is_upper(line: &str) -> bool {
    line.chars().any(char::is_alphabetic) && !line.chars().any(char::is_lowercase)
}

fn decode_escapes(text: &str) -> String {
    ESCAPED_BYTE
        .replace_all(text, |caps: &Captures<'_>| match &caps[1] {
            "92" => "'".to_string(),
            "85" => "...".to_string(),
            code => u8::from_str_radix(code, 16)
                .map_or_else(|_| caps[0].to_string(), |b| char::from(b).to_string()),
        })
        .into_owned()
}

/// Read the cutting date. `'14` is a two-digit year; a trailing `=` means
/// the year was lost to a soft line break and is taken from the mail.
fn cutting_date(raw: &str, mail_date: NaiveDateTime) -> ExtractionResult<NaiveDateTime> {
    let mut raw = raw.trim().to_string();
    if let Some((head, year)) = raw.split_once('\'') {
        raw = format!("{head}20{year}");
    }
    let Some((head, _)) = raw.split_once('=') else {
        return Ok(read_date(&raw, None)?);
    };

    let date = read_date(&format!("{head}{}", mail_date.format("%Y")), None)?;
    if (date - mail_date).num_days() > MAX_DAYS_AFTER_MAIL {
        return Ok(date.checked_sub_months(Months::new(12)).unwrap_or(date));
    }
    Ok(date)
}

fn paragraphs<'a>(lines: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut paragraph = String::new();
    for line in lines {
        let line = line.trim_end_matches('=');
        if line.is_empty() {
            paragraphs.push(std::mem::take(&mut paragraph));
        } else if is_upper(line) {
            paragraph.push_str(line);
            paragraph.push('\n');
        } else {
            paragraph.push_str(line);
        }
    }
    paragraphs.push(paragraph);
    paragraphs.retain(|p| !p.is_empty());
    paragraphs
}

pub fn extract(text: &str, ctx: &ExtractContext<'_>) -> ExtractionResult<RawFieldSet> {
    let mail_date = text
        .lines()
        .find_map(|l| l.strip_prefix("Date:"))
        .ok_or(ExtractionError::MissingField("mail date"))?;
    let mail_date = read_date(mail_date.trim(), None)?;

    let mut lines = text
        .lines()
        .skip_while(|l| !l.starts_with(CONTENT_MARKER))
        .skip(1);

    let mut fields = RawFieldSet::new();
    let mut title = None;
    for line in lines.by_ref() {
        if is_upper(line) {
            title = Some(line.trim().to_string());
            break;
        }
        if line.trim().is_empty() || fields.contains("date") {
            continue;
        }
        let meta: Vec<&str> = line.split(", ").collect();
        let [date, section, medium, ..] = meta.as_slice() else {
            return Err(ExtractionError::Malformed(format!(
                "expected date, section and medium in {line:?}"
            )));
        };
        fields.insert("date", cutting_date(date, mail_date)?);
        fields.insert_nonblank("section", section.trim());
        fields.insert("medium", ctx.config.medium_alias(medium));
    }

    let title = title.ok_or(ExtractionError::MissingField("title"))?;
    if !fields.contains("date") {
        return Err(ExtractionError::MissingField("date"));
    }

    let mut body = String::new();
    for paragraph in paragraphs(lines) {
        body.push_str(&paragraph);
        body.push_str("\n\n");
        // closing "(name, place)" line ends the article
        if paragraph.starts_with('(') && paragraph.contains(',') {
            break;
        }
    }

    fields.insert("title", decode_escapes(&title));
    fields.insert_nonblank("text", decode_escapes(body.trim()));
    Ok(fields)
}
