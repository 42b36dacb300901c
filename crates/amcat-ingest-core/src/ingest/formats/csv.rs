//! Tabular uploads: delimited text and spreadsheets.
//!
//! The first row names the fields; every later row becomes one record with
//! exactly one value per header, short rows padded with
//! [`RawValue::Missing`] and long rows truncated.

use std::collections::BTreeMap;
use std::io::Cursor;

use calamine::{Data, Reader};
use csv::ReaderBuilder;

use crate::ingest::extractor::{RawFieldSet, RawValue};
use crate::ingest::parser::{FragmentBodies, FragmentBody, ParseError, ParseResult};

const DELIMITERS: [u8; 4] = [b',', b';', b'\t', b'|'];

/// Lines looked at when guessing the delimiter.
const SNIFF_LINES: usize = 50;

/// Guess the delimiter of a text.
///
/// Returns the delimiter under which the most rows have as many fields as
/// the header, together with that row count. A header of a single field
/// never counts.
pub fn sniff_delimiter(text: &str) -> Option<(u8, usize)> {
    let sample = text
        .trim_start_matches('\u{feff}')
        .lines()
        .filter(|l| !l.trim().is_empty())
        .take(SNIFF_LINES)
        .collect::<Vec<_>>()
        .join("\n");

    let mut best: Option<(u8, usize)> = None;
    for delimiter in DELIMITERS {
        let mut reader = ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(false)
            .flexible(true)
            .from_reader(sample.as_bytes());
        let mut widths = reader.records().map_while(Result::ok).map(|r| r.len());
        let Some(header) = widths.next().filter(|&w| w > 1) else {
            continue;
        };
        let rows = widths.filter(|&w| w == header).count();
        if rows > 0 && best.is_none_or(|(_, r)| rows > r) {
            best = Some((delimiter, rows));
        }
    }
    best
}

/// Header names made unique and non-empty, so every row has one key per column.
fn header_names<I, S>(raw: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen: BTreeMap<String, usize> = BTreeMap::new();
    raw.into_iter()
        .enumerate()
        .map(|(i, name)| {
            let name = name.as_ref().trim();
            let name = if name.is_empty() {
                format!("column {}", i + 1)
            } else {
                name.to_string()
            };
            let count = seen.entry(name.clone()).or_insert(0);
            *count += 1;
            if *count == 1 {
                name
            } else {
                format!("{name} {count}")
            }
        })
        .collect()
}

fn row_fields(headers: &[String], values: impl IntoIterator<Item = String>) -> RawFieldSet {
    let mut values = values.into_iter();
    headers
        .iter()
        .map(|h| (h.clone(), values.next().map_or(RawValue::Missing, RawValue::Text)))
        .collect()
}

/// The delimiter that splits the header line into the most fields.
fn header_delimiter(text: &str) -> u8 {
    let header = text.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    DELIMITERS
        .into_iter()
        .map(|d| (d, header.bytes().filter(|&b| b == d).count()))
        .filter(|&(_, n)| n > 0)
        .max_by_key(|&(_, n)| n)
        .map_or(b',', |(d, _)| d)
}

pub(crate) fn split(text: &str, delimiter: Option<char>) -> ParseResult<FragmentBodies<'_>> {
    let text = text.trim_start_matches('\u{feff}');
    let delimiter = match delimiter {
        Some(c) => u8::try_from(c)
            .map_err(|_| ParseError::ParseFailed(format!("delimiter {c:?} is not a single byte")))?,
        None => sniff_delimiter(text).map_or_else(|| header_delimiter(text), |(d, _)| d),
    };

    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(text.as_bytes());
    let headers = reader.headers()?;
    if headers.iter().all(|h| h.trim().is_empty()) {
        return Err(ParseError::Missing("header row"));
    }
    let headers = header_names(headers);

    Ok(Box::new(reader.into_records().map(move |record| {
        let record = record?;
        let values = record.iter().map(str::to_string);
        Ok(FragmentBody::Record(row_fields(&headers, values)))
    })))
}

/// Spreadsheet cells as text, so later coercion does not depend on the
/// source format.
fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        // Display drops the fraction of integral floats
        Data::Float(f) => f.to_string(),
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => dt.as_datetime().map_or_else(
            || dt.to_string(),
            |d| d.format("%Y-%m-%dT%H:%M:%S").to_string(),
        ),
        Data::Error(e) => format!("#{e:?}"),
    }
}

pub(crate) fn split_workbook(bytes: &[u8]) -> ParseResult<FragmentBodies<'static>> {
    let mut workbook = calamine::open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))?;
    let sheet = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or(ParseError::Missing("worksheet"))?;
    let range = workbook.worksheet_range(&sheet)?;

    let mut rows = range.rows();
    let headers = rows
        .next()
        .map(|row| header_names(row.iter().map(cell_text)))
        .ok_or(ParseError::Missing("header row"))?;

    let records: Vec<RawFieldSet> = rows
        .filter(|row| row.iter().any(|c| !matches!(c, Data::Empty)))
        .map(|row| row_fields(&headers, row.iter().map(cell_text)))
        .collect();
    Ok(Box::new(
        records.into_iter().map(|r| Ok(FragmentBody::Record(r))),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records(text: &str, delimiter: Option<char>) -> Vec<RawFieldSet> {
        split(text, delimiter)
            .unwrap()
            .map(|b| match b.unwrap() {
                FragmentBody::Record(r) => r,
                other => panic!("unexpected fragment {other:?}"),
            })
            .collect()
    }

    #[test]
    fn test_sniff_delimiter() {
        assert_eq!(sniff_delimiter("a;b;c\n1;2;3\n4;5;6\n"), Some((b';', 2)));
        assert_eq!(sniff_delimiter("a\tb\n1\t2\n"), Some((b'\t', 1)));
        assert_eq!(sniff_delimiter("a,b\n1,2\n3,4,5\n"), Some((b',', 1)));
        assert_eq!(sniff_delimiter("one line of prose\nanother line"), None);
    }

    #[test]
    fn test_rows_match_header_width() {
        let text = "\u{feff}kop,datum,tekst\nkop1,2001-01-01\nkop2,2001-01-02,text2,extra\n\nkop3,,text3\n";
        let rows = records(text, None);
        assert_eq!(rows.len(), 3);
        for row in &rows {
            assert_eq!(row.names().collect::<Vec<_>>(), vec!["kop", "datum", "tekst"]);
        }
        assert_eq!(rows[0].get("tekst"), Some(&RawValue::Missing));
        assert_eq!(rows[1].text("tekst"), Some("text2"));
        assert_eq!(rows[2].text("datum"), Some(""));
    }

    #[test]
    fn test_all_rows_short() {
        let rows = records("kop;datum;tekst\nk1;2001-01-01\nk2;2001-01-02\n", None);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].text("datum"), Some("2001-01-02"));
        assert_eq!(rows[1].get("tekst"), Some(&RawValue::Missing));
    }

    #[test]
    fn test_explicit_delimiter() {
        let rows = records("kop|tekst\nx|y\n", Some('|'));
        assert_eq!(rows[0].text("tekst"), Some("y"));
        assert!(matches!(split("a,b", Some('€')), Err(ParseError::ParseFailed(_))));
    }

    #[test]
    fn test_header_names_unique() {
        assert_eq!(
            header_names(["kop", "", "kop", " tekst "]),
            vec!["kop", "column 2", "kop 2", "tekst"]
        );
    }

    #[test]
    fn test_cell_text() {
        assert_eq!(cell_text(&Data::Float(12.0)), "12");
        assert_eq!(cell_text(&Data::Float(1.5)), "1.5");
        assert_eq!(cell_text(&Data::Int(7)), "7");
        assert_eq!(cell_text(&Data::Empty), "");
        assert_eq!(cell_text(&Data::String("kop".into())), "kop");
    }

    #[test]
    fn test_not_a_workbook() {
        assert!(split_workbook(b"kop,datum\n").is_err());
    }
}
