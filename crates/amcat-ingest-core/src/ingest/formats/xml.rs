//! XML exports with one element per article.
//!
//! Articles are selected by a path: `a/b/c` from the document root or
//! `//name` for an element anywhere. The attributes of an article element
//! and the text of each of its child elements become fields.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::ingest::extractor::{ExtractionError, ExtractionResult, RawFieldSet};
use crate::ingest::parser::{FragmentBodies, FragmentBody, ParseError, ParseResult};

#[derive(Debug, Clone, PartialEq, Eq)]
enum ArticlePath {
    Anywhere(String),
    Rooted(Vec<String>),
}

impl ArticlePath {
    fn parse(path: &str) -> Self {
        path.strip_prefix("//").map_or_else(
            || {
                Self::Rooted(
                    path.trim_matches('/')
                        .split('/')
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect(),
                )
            },
            |name| Self::Anywhere(name.to_string()),
        )
    }

    fn matches(&self, ancestors: &[String], name: &str) -> bool {
        match self {
            Self::Anywhere(wanted) => wanted == name,
            Self::Rooted(segments) => {
                segments.len() == ancestors.len() + 1
                    && segments.last().is_some_and(|s| s == name)
                    && segments.iter().zip(ancestors).all(|(s, a)| s == a)
            }
        }
    }
}

fn local_name(element: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(element.local_name().as_ref()).into_owned()
}

/// Streams the serialised markup of every element on the article path.
struct ArticleElements<'a> {
    text: &'a str,
    reader: Reader<&'a [u8]>,
    path: ArticlePath,
    ancestors: Vec<String>,
    done: bool,
}

impl<'a> ArticleElements<'a> {
    fn new(text: &'a str, path: &str) -> Self {
        Self {
            text,
            reader: Reader::from_str(text),
            path: ArticlePath::parse(path),
            ancestors: Vec::new(),
            done: false,
        }
    }

    fn byte_position(&self) -> ParseResult<usize> {
        usize::try_from(self.reader.buffer_position())
            .map_err(|_| ParseError::ParseFailed("document too large".into()))
    }

    fn markup(&self, start: usize, end: usize) -> ParseResult<FragmentBody> {
        self.text
            .get(start..end)
            .map(|m| FragmentBody::Markup(m.to_string()))
            .ok_or_else(|| ParseError::ParseFailed(format!("bad element span {start}..{end}")))
    }

    fn next_article(&mut self) -> ParseResult<Option<FragmentBody>> {
        loop {
            let start = self.byte_position()?;
            match self.reader.read_event()? {
                Event::Start(e) => {
                    let name = local_name(&e);
                    if self.path.matches(&self.ancestors, &name) {
                        self.reader.read_to_end(e.name())?;
                        let end = self.byte_position()?;
                        return self.markup(start, end).map(Some);
                    }
                    self.ancestors.push(name);
                }
                Event::Empty(e) => {
                    if self.path.matches(&self.ancestors, &local_name(&e)) {
                        let end = self.byte_position()?;
                        return self.markup(start, end).map(Some);
                    }
                }
                Event::End(_) => {
                    self.ancestors.pop();
                }
                Event::Eof => return Ok(None),
                _ => {}
            }
        }
    }
}

impl Iterator for ArticleElements<'_> {
    type Item = ParseResult<FragmentBody>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_article() {
            Ok(Some(body)) => Some(Ok(body)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                // the reader cannot resync after malformed markup
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

pub(crate) fn split<'a>(text: &'a str, article_path: &str) -> FragmentBodies<'a> {
    Box::new(ArticleElements::new(text, article_path))
}

fn attributes(element: &BytesStart<'_>, fields: &mut RawFieldSet) -> ExtractionResult<()> {
    for attr in element.attributes() {
        let attr = attr.map_err(|e| ExtractionError::Malformed(e.to_string()))?;
        let name = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| ExtractionError::Malformed(e.to_string()))?;
        fields.insert_nonblank(name, value.trim());
    }
    Ok(())
}

fn append(fields: &mut RawFieldSet, name: String, value: &str) {
    let value = value.trim();
    if value.is_empty() {
        return;
    }
    let joined = match fields.text(&name) {
        Some(existing) => format!("{existing}\n{value}"),
        None => value.to_string(),
    };
    fields.insert(name, joined);
}

/// Fields of one article element.
///
/// Text directly inside the article element, outside any child, becomes
/// `text` unless a child of that name exists.
pub fn extract(xml: &str) -> ExtractionResult<RawFieldSet> {
    let malformed = |e: quick_xml::Error| ExtractionError::Malformed(e.to_string());
    let mut reader = Reader::from_str(xml);
    let mut fields = RawFieldSet::new();
    let mut depth = 0usize;
    let mut child: Option<(String, String)> = None;
    let mut own_text = String::new();

    loop {
        match reader.read_event().map_err(malformed)? {
            Event::Start(e) => {
                match depth {
                    0 => attributes(&e, &mut fields)?,
                    1 => child = Some((local_name(&e), String::new())),
                    _ => {}
                }
                depth += 1;
            }
            Event::Empty(e) if depth == 0 => attributes(&e, &mut fields)?,
            Event::Text(t) => {
                let text = t.unescape().map_err(malformed)?;
                match (&mut child, depth) {
                    (Some((_, value)), d) if d >= 2 => value.push_str(&text),
                    (_, 1) => own_text.push_str(&text),
                    _ => {}
                }
            }
            Event::CData(c) => {
                if let Some((_, value)) = child.as_mut() {
                    value.push_str(&String::from_utf8_lossy(&c));
                }
            }
            Event::End(_) => {
                depth = depth.saturating_sub(1);
                if depth == 1 {
                    if let Some((name, value)) = child.take() {
                        append(&mut fields, name, &value);
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !fields.contains("text") {
        fields.insert_nonblank("text", own_text.trim());
    }
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXPORT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<export>
  <articles source="archive">
    <article id="a1" lang="nl">
      <title>Kabinet &amp; Kamer</title>
      <date>2014-03-13</date>
      <author>Jan</author>
      <author>Piet</author>
      <body><p>Eerste alinea.</p></body>
    </article>
    <article id="a2"><title>Tweede</title></article>
    <note><article id="nested"/></note>
  </articles>
</export>"#;

    fn markup(path: &str) -> Vec<String> {
        split(EXPORT, path)
            .map(|b| match b.unwrap() {
                FragmentBody::Markup(m) => m,
                other => panic!("unexpected fragment {other:?}"),
            })
            .collect()
    }

    #[test]
    fn test_split_anywhere() {
        let articles = markup("//article");
        assert_eq!(articles.len(), 3);
        assert!(articles[0].starts_with("<article id=\"a1\""));
        assert!(articles[0].ends_with("</article>"));
        assert_eq!(articles[2], "<article id=\"nested\"/>");
    }

    #[test]
    fn test_split_rooted() {
        assert_eq!(markup("export/articles/article").len(), 2);
        assert_eq!(markup("/export/articles/note/article").len(), 1);
        assert!(markup("articles/article").is_empty());
    }

    #[test]
    fn test_extract_fields() {
        let fields = extract(&markup("//article")[0]).unwrap();
        assert_eq!(fields.text("id"), Some("a1"));
        assert_eq!(fields.text("lang"), Some("nl"));
        assert_eq!(fields.text("title"), Some("Kabinet & Kamer"));
        assert_eq!(fields.text("date"), Some("2014-03-13"));
        assert_eq!(fields.text("author"), Some("Jan\nPiet"));
        assert_eq!(fields.text("body"), Some("Eerste alinea."));
    }

    #[test]
    fn test_own_text_becomes_text() {
        let fields = extract("<article date=\"2014-01-01\">Los verhaal</article>").unwrap();
        assert_eq!(fields.text("text"), Some("Los verhaal"));
        assert_eq!(fields.text("date"), Some("2014-01-01"));
    }

    #[test]
    fn test_malformed_document() {
        let results: Vec<_> = split("<export><article>x</wrong></export>", "//article").collect();
        assert_eq!(results.len(), 1);
        assert!(results[0].is_err());
    }
}
