//! One article per plain text file; fields come from the file name.

use crate::ingest::container::{file_directory, file_stem};
use crate::ingest::extractor::{ExtractContext, RawFieldSet};

/// `Filename`, `Text`, `Path` and, for names containing `_`, one
/// `Filename part N` per part (counted from 1).
pub fn extract(text: &str, ctx: &ExtractContext<'_>) -> RawFieldSet {
    let stem = file_stem(ctx.document);

    let mut fields = RawFieldSet::new();
    fields.insert("Filename", stem);
    fields.insert("Text", text.trim_start_matches('\u{feff}'));
    if let Some(path) = file_directory(ctx.document) {
        fields.insert_nonblank("Path", path);
    }
    if stem.contains('_') {
        for (i, part) in stem.split('_').enumerate() {
            fields.insert(format!("Filename part {}", i + 1), part);
        }
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IngestConfig;

    #[test]
    fn test_fields_from_name() {
        let config = IngestConfig::default();
        let ctx = ExtractContext::new(&config, "binnenland/2014-01-01_kabinet.txt");
        let fields = extract("Het kabinet.", &ctx);

        assert_eq!(fields.text("Filename"), Some("2014-01-01_kabinet"));
        assert_eq!(fields.text("Text"), Some("Het kabinet."));
        assert_eq!(fields.text("Path"), Some("binnenland"));
        assert_eq!(fields.text("Filename part 1"), Some("2014-01-01"));
        assert_eq!(fields.text("Filename part 2"), Some("kabinet"));
    }

    #[test]
    fn test_plain_name() {
        let config = IngestConfig::default();
        let ctx = ExtractContext::new(&config, "verhaal.txt");
        let fields = extract("x", &ctx);
        assert_eq!(fields.names().collect::<Vec<_>>(), vec!["Filename", "Text"]);
    }
}
