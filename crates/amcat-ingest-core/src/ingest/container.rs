use std::fmt;
use std::io::{Cursor, Read};
use std::str::FromStr;

use chardetng::EncodingDetector;
use encoding_rs::ISO_8859_15;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

/// How uploaded bytes are decoded into text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Encoding {
    /// UTF-8, then a statistical guess, then Latin-1
    #[default]
    Autodetect,
    #[serde(rename = "ISO-8859-15")]
    Iso8859_15,
    #[serde(rename = "UTF-8")]
    Utf8,
    #[serde(rename = "Latin-1")]
    Latin1,
}

impl Encoding {
    pub const ALL: [Self; 4] = [Self::Autodetect, Self::Iso8859_15, Self::Utf8, Self::Latin1];

    pub const fn label(self) -> &'static str {
        match self {
            Self::Autodetect => "Autodetect",
            Self::Iso8859_15 => "ISO-8859-15",
            Self::Utf8 => "UTF-8",
            Self::Latin1 => "Latin-1",
        }
    }

    /// Decode `bytes`, returning the text and the name of the encoding used.
    ///
    /// Only an explicit encoding can fail; autodetection always ends in
    /// Latin-1, which maps every byte.
    pub fn decode(self, name: &str, bytes: &[u8]) -> Result<(String, &'static str)> {
        match self {
            Self::Autodetect => Ok(autodetect(bytes)),
            Self::Utf8 => decode_utf8(bytes)
                .map(|s| (s, "UTF-8"))
                .ok_or_else(|| Error::Decode {
                    name: name.to_string(),
                    encoding: self.label().to_string(),
                }),
            Self::Iso8859_15 => ISO_8859_15
                .decode_without_bom_handling_and_without_replacement(bytes)
                .map(|s| (s.into_owned(), "ISO-8859-15"))
                .ok_or_else(|| Error::Decode {
                    name: name.to_string(),
                    encoding: self.label().to_string(),
                }),
            Self::Latin1 => Ok((decode_latin1(bytes), "Latin-1")),
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Encoding {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_lowercase().replace(['-', '_', ' '], "");
        match wanted.as_str() {
            "autodetect" | "auto" => Ok(Self::Autodetect),
            "iso885915" | "latin9" => Ok(Self::Iso8859_15),
            "utf8" => Ok(Self::Utf8),
            "latin1" | "iso88591" => Ok(Self::Latin1),
            _ => Err(Error::UnknownEncoding(s.to_string())),
        }
    }
}

fn decode_utf8(bytes: &[u8]) -> Option<String> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    std::str::from_utf8(bytes).ok().map(str::to_string)
}

/// Every byte maps to the code point of the same value.
fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

fn autodetect(bytes: &[u8]) -> (String, &'static str) {
    if let Some(text) = decode_utf8(bytes) {
        return (text, "UTF-8");
    }

    let mut detector = EncodingDetector::new();
    detector.feed(bytes, true);
    let guess = detector.guess(None, true);
    if let Some(text) = guess.decode_without_bom_handling_and_without_replacement(bytes) {
        debug!(encoding = guess.name(), "Detected encoding");
        return (text.into_owned(), guess.name());
    }

    (decode_latin1(bytes), "Latin-1")
}

/// Whether an upload is a zip of documents or a single document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Container {
    /// Zip when the name ends in `.zip` or the bytes carry the zip magic
    #[default]
    Auto,
    Zip,
    Single,
}

impl Container {
    pub fn is_zip(self, name: &str, bytes: &[u8]) -> bool {
        match self {
            Self::Zip => true,
            Self::Single => false,
            Self::Auto => {
                name.to_lowercase().ends_with(".zip")
                    || (bytes.starts_with(ZIP_MAGIC) && !is_office_document(name))
            }
        }
    }
}

/// XLSX files are zips too; only their extension tells them apart.
fn is_office_document(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower.ends_with(".xlsx") || lower.ends_with(".xlsm") || lower.ends_with(".docx")
}

/// One uploaded file, or one member of an uploaded zip.
#[derive(Debug, Clone)]
pub struct RawDocument {
    /// File name; for zip members the path inside the archive
    pub name: String,
    pub bytes: Vec<u8>,
}

impl RawDocument {
    #[must_use]
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }

    pub fn decode(&self, encoding: Encoding) -> Result<DecodedDocument<'_>> {
        let (text, encoding) = encoding.decode(&self.name, &self.bytes)?;
        Ok(DecodedDocument {
            name: &self.name,
            bytes: &self.bytes,
            text,
            encoding,
        })
    }

    /// A view for binary formats that never look at decoded text.
    pub fn undecoded(&self) -> DecodedDocument<'_> {
        DecodedDocument {
            name: &self.name,
            bytes: &self.bytes,
            text: String::new(),
            encoding: "binary",
        }
    }
}

pub(crate) fn file_stem(name: &str) -> &str {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    base.rsplit_once('.').map_or(base, |(stem, _)| stem)
}

pub(crate) fn file_directory(name: &str) -> Option<&str> {
    name.rsplit_once(['/', '\\']).map(|(dir, _)| dir)
}

/// A document together with its decoded text.
#[derive(Debug, Clone)]
pub struct DecodedDocument<'a> {
    pub name: &'a str,
    pub bytes: &'a [u8],
    pub text: String,
    pub encoding: &'static str,
}

impl<'a> DecodedDocument<'a> {
    /// File name without directories and extension.
    pub fn stem(&self) -> &'a str {
        file_stem(self.name)
    }

    /// Directory part of the name, if any.
    pub fn directory(&self) -> Option<&'a str> {
        file_directory(self.name)
    }

    pub fn extension(&self) -> Option<String> {
        let base = self.name.rsplit(['/', '\\']).next().unwrap_or(self.name);
        base.rsplit_once('.').map(|(_, ext)| ext.to_lowercase())
    }
}

/// Turns one upload into the sequence of documents it contains.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContainerResolver {
    container: Container,
}

impl ContainerResolver {
    #[must_use]
    pub const fn new(container: Container) -> Self {
        Self { container }
    }

    /// Documents in the upload, lazily read from a zip when it is one.
    pub fn resolve<'a>(
        &self,
        name: &'a str,
        bytes: &'a [u8],
    ) -> Result<Box<dyn Iterator<Item = Result<RawDocument>> + 'a>> {
        if !self.container.is_zip(name, bytes) {
            return Ok(Box::new(std::iter::once(Ok(RawDocument::new(
                name,
                bytes.to_vec(),
            )))));
        }

        let archive = zip::ZipArchive::new(Cursor::new(bytes)).map_err(|source| {
            Error::Container {
                name: name.to_string(),
                source,
            }
        })?;
        Ok(Box::new(ZipEntries {
            name,
            archive,
            index: 0,
        }))
    }
}

struct ZipEntries<'a> {
    name: &'a str,
    archive: zip::ZipArchive<Cursor<&'a [u8]>>,
    index: usize,
}

impl ZipEntries<'_> {
    fn read_entry(&mut self, index: usize) -> Result<Option<RawDocument>> {
        let container_error = |source| Error::Container {
            name: self.name.to_string(),
            source,
        };
        let mut entry = self.archive.by_index(index).map_err(container_error)?;
        if entry.is_dir() {
            return Ok(None);
        }
        let entry_name = entry.name().to_string();
        let mut bytes = Vec::new();
        entry
            .read_to_end(&mut bytes)
            .map_err(|e| Error::Container {
                name: self.name.to_string(),
                source: zip::result::ZipError::Io(e),
            })?;
        Ok(Some(RawDocument::new(entry_name, bytes)))
    }
}

impl Iterator for ZipEntries<'_> {
    type Item = Result<RawDocument>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.index < self.archive.len() {
            let index = self.index;
            self.index += 1;
            match self.read_entry(index) {
                Ok(Some(doc)) => return Some(Ok(doc)),
                Ok(None) => {}
                Err(e) => return Some(Err(e)),
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn zip_of(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buf);
            let options = zip::write::SimpleFileOptions::default();
            writer.add_directory("nested/", options).unwrap();
            for (name, data) in entries {
                writer.start_file(*name, options).unwrap();
                writer.write_all(data).unwrap();
            }
            writer.finish().unwrap();
        }
        buf.into_inner()
    }

    #[test]
    fn test_encoding_labels() {
        assert_eq!("utf-8".parse::<Encoding>().unwrap(), Encoding::Utf8);
        assert_eq!("ISO-8859-15".parse::<Encoding>().unwrap(), Encoding::Iso8859_15);
        assert_eq!("Latin-1".parse::<Encoding>().unwrap(), Encoding::Latin1);
        assert_eq!("Autodetect".parse::<Encoding>().unwrap(), Encoding::Autodetect);
        assert!(matches!(
            "ebcdic".parse::<Encoding>(),
            Err(Error::UnknownEncoding(_))
        ));
    }

    #[test]
    fn test_autodetect_utf8_and_latin1() {
        let (text, used) = Encoding::Autodetect.decode("a", "Börsen".as_bytes()).unwrap();
        assert_eq!(text, "Börsen");
        assert_eq!(used, "UTF-8");

        let (text, used) = Encoding::Autodetect
            .decode("a", b"\xEF\xBB\xBFkop,datum")
            .unwrap();
        assert_eq!(text, "kop,datum");
        assert_eq!(used, "UTF-8");

        let latin = b"B\xf6rsen-Zeitung meldet \xfcber den M\xe4rz";
        let (text, _) = Encoding::Autodetect.decode("a", latin).unwrap();
        assert!(text.starts_with("Börsen-Zeitung"));
    }

    #[test]
    fn test_explicit_utf8_rejects_invalid_bytes() {
        let err = Encoding::Utf8.decode("upload.txt", b"B\xf6rsen").unwrap_err();
        assert!(matches!(err, Error::Decode { .. }));

        let (text, _) = Encoding::Latin1.decode("upload.txt", b"B\xf6rsen").unwrap();
        assert_eq!(text, "Börsen");
    }

    #[test]
    fn test_single_document() {
        let resolver = ContainerResolver::default();
        let docs: Vec<_> = resolver
            .resolve("a.txt", b"hello")
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].name, "a.txt");
    }

    #[test]
    fn test_zip_skips_directories() {
        let bytes = zip_of(&[("nested/a.txt", b"one"), ("b.txt", b"two")]);
        let resolver = ContainerResolver::default();
        let docs: Vec<_> = resolver
            .resolve("upload.zip", &bytes)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();

        let names: Vec<_> = docs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["nested/a.txt", "b.txt"]);
        assert_eq!(docs[1].bytes, b"two");
    }

    #[test]
    fn test_bad_zip_is_a_container_error() {
        let resolver = ContainerResolver::new(Container::Zip);
        assert!(matches!(
            resolver.resolve("upload.zip", b"not a zip"),
            Err(Error::Container { .. })
        ));
    }

    #[test]
    fn test_document_names() {
        let raw = RawDocument::new("export/2014-01-01_headline.txt", Vec::new());
        let doc = raw.undecoded();
        assert_eq!(doc.stem(), "2014-01-01_headline");
        assert_eq!(doc.directory(), Some("export"));
        assert_eq!(doc.extension().as_deref(), Some("txt"));
    }
}
