use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::dates::Language;
use crate::error::{Error, Result};

/// Environment variable pointing at a configuration file.
pub const CONFIG_ENV: &str = "AMCAT_INGEST_CONFIG";

/// Configuration shared by every stage of a run.
///
/// Built once and handed to the pipeline; nothing in the crate reads
/// configuration from global state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub lexisnexis: LexisNexisConfig,
    /// Language names (as found in article metadata) to month-name tables
    pub languages: BTreeMap<String, Language>,
    /// Raw medium names to canonical medium names
    pub medium_aliases: BTreeMap<String, String>,
    pub rtf: RtfConverterConfig,
    pub csv: CsvConfig,
    pub xml: XmlConfig,
    /// Fragments sampled per document when suggesting a mapping
    pub sample_size: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        let languages = [
            ("english", Language::English),
            ("en", Language::English),
            ("dutch", Language::Dutch),
            ("nederlands", Language::Dutch),
            ("nl", Language::Dutch),
            ("german", Language::German),
            ("deutsch", Language::German),
            ("de", Language::German),
            ("french", Language::French),
            ("français", Language::French),
            ("francais", Language::French),
            ("fr", Language::French),
            ("spanish", Language::Spanish),
            ("español", Language::Spanish),
            ("es", Language::Spanish),
            ("italian", Language::Italian),
            ("italiano", Language::Italian),
            ("it", Language::Italian),
        ];

        Self {
            lexisnexis: LexisNexisConfig::default(),
            languages: languages
                .into_iter()
                .map(|(name, lang)| (name.to_string(), lang))
                .collect(),
            medium_aliases: BTreeMap::new(),
            rtf: RtfConverterConfig::default(),
            csv: CsvConfig::default(),
            xml: XmlConfig::default(),
            sample_size: 5,
        }
    }
}

impl IngestConfig {
    /// Read a TOML configuration file. Missing keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&content)?)
    }

    /// Load from `$AMCAT_INGEST_CONFIG`, else the per-user config file,
    /// else defaults.
    pub fn from_env() -> Result<Self> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Self::load(Path::new(&path));
        }
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("amcat-ingest").join("config.toml"))
    }

    /// Canonical medium name for a raw medium string.
    pub fn medium_alias<'a>(&'a self, medium: &'a str) -> &'a str {
        self.medium_aliases
            .get(medium.trim())
            .map_or_else(|| medium.trim(), String::as_str)
    }

    /// Look up a language by the (case-insensitive) name used in metadata.
    pub fn language(&self, name: &str) -> Option<Language> {
        self.languages.get(&name.trim().to_lowercase()).copied()
    }
}

/// Tables driving the LexisNexis extractor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LexisNexisConfig {
    /// Body meta keys (lowercase) that are always metadata, never body text
    pub meta_fields: Vec<String>,
    /// Localised meta keys to canonical field names
    pub body_keys: BTreeMap<String, String>,
    /// Meta keys that reveal the language of the export
    pub metadata_languages: BTreeMap<String, Language>,
    /// Publisher lines skipped when picking the medium
    pub publisher_sources: Vec<String>,
    /// Header-only media whose date comes from `LOAD-DATE`
    pub load_date_media: Vec<String>,
    /// Cover page keys holding the search query
    pub query_keys: Vec<String>,
    pub seasons: BTreeMap<String, u32>,
}

impl Default for LexisNexisConfig {
    fn default() -> Self {
        let meta_fields = [
            "length", "section", "byline", "language", "load-date", "publication-type",
            "graphic", "headline", "title", "author", "dateline", "type", "highlight",
            "correction-date", "journal-code", "document-type", "edition", "series",
            "name", "url", "issue", "kop", "update", "autor", "rubrik", "länge", "sprache",
            "code-revue", "auteur", "rubrique", "langue", "date-chargement",
            "type-publication", "longueur", "lengte", "sectie", "taal",
        ];
        let body_keys = [
            ("autor", "author"),
            ("rubrik", "section"),
            ("länge", "length"),
            ("sprache", "language"),
            ("auteur", "author"),
            ("rubrique", "section"),
            ("langue", "language"),
            ("longueur", "length"),
            ("titre", "title"),
            ("name", "byline"),
            ("lengte", "length"),
            ("sectie", "section"),
            ("taal", "language"),
            ("length", "length"),
            ("language", "language"),
            ("section", "section"),
            ("author", "author"),
        ];
        let metadata_languages = [
            ("length", Language::English),
            ("section", Language::English),
            ("load-date", Language::English),
            ("language", Language::English),
            ("autor", Language::German),
            ("länge", Language::German),
            ("rubrik", Language::German),
            ("sprache", Language::German),
            ("auteur", Language::French),
            ("longueur", Language::French),
            ("rubrique", Language::French),
            ("langue", Language::French),
            ("lengte", Language::Dutch),
            ("sectie", Language::Dutch),
            ("taal", Language::Dutch),
        ];
        let seasons = [("spring", 3), ("summer", 6), ("fall", 9), ("winter", 12)];

        Self {
            meta_fields: meta_fields.iter().map(ToString::to_string).collect(),
            body_keys: body_keys
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
            metadata_languages: metadata_languages
                .iter()
                .map(|(k, v)| ((*k).to_string(), *v))
                .collect(),
            publisher_sources: vec![
                "PCM Uitgevers B.V.".into(),
                "De Persgroep Nederland BV".into(),
            ],
            load_date_media: vec!["India Today".into(), "Business Today".into()],
            query_keys: vec!["zoektermen".into(), "query".into(), "terms".into()],
            seasons: seasons
                .iter()
                .map(|(k, v)| ((*k).to_string(), *v))
                .collect(),
        }
    }
}

impl LexisNexisConfig {
    pub fn is_meta_field(&self, key: &str) -> bool {
        let key = key.to_lowercase();
        self.meta_fields.iter().any(|k| *k == key)
    }

    pub fn canonical_key(&self, key: &str) -> String {
        let key = key.to_lowercase();
        self.body_keys.get(&key).cloned().unwrap_or(key)
    }
}

/// External converter used to turn RTF into HTML
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RtfConverterConfig {
    /// Ordered list of converter binaries to try (first available wins)
    pub converters: Vec<String>,
    pub args: Vec<String>,
}

impl Default for RtfConverterConfig {
    fn default() -> Self {
        Self {
            converters: vec!["unrtf".into()],
            args: vec!["--html".into()],
        }
    }
}

impl RtfConverterConfig {
    /// Find the first available converter from the preference list
    pub fn find_available(&self) -> Option<PathBuf> {
        self.converters.iter().find_map(|name| which::which(name).ok())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CsvConfig {
    /// Field delimiter; sniffed from the header line when unset
    pub delimiter: Option<char>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct XmlConfig {
    /// `a/b/c` from the document root, or `//name` anywhere
    pub article_path: String,
}

impl Default for XmlConfig {
    fn default() -> Self {
        Self {
            article_path: "//article".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: IngestConfig = toml::from_str(
            r#"
            sample_size = 10

            [medium_aliases]
            "NRC Handelsblad" = "NRC"

            [xml]
            article_path = "export/item"
            "#,
        )
        .unwrap();

        assert_eq!(config.sample_size, 10);
        assert_eq!(config.xml.article_path, "export/item");
        assert_eq!(config.medium_alias("NRC Handelsblad "), "NRC");
        assert_eq!(config.medium_alias("Trouw"), "Trouw");
        assert_eq!(config.rtf.converters, vec!["unrtf".to_string()]);
        assert_eq!(config.lexisnexis.seasons.get("winter"), Some(&12));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[csv]\ndelimiter = \";\"\n").unwrap();

        let config = IngestConfig::load(&path).unwrap();
        assert_eq!(config.csv.delimiter, Some(';'));

        let missing = IngestConfig::load(&dir.path().join("nope.toml"));
        assert!(matches!(missing, Err(Error::Io { .. })));
    }

    #[test]
    fn test_lexisnexis_keys() {
        let config = LexisNexisConfig::default();
        assert!(config.is_meta_field("LÄNGE"));
        assert!(config.is_meta_field("Load-Date"));
        assert!(!config.is_meta_field("Frankfurt"));
        assert_eq!(config.canonical_key("RUBRIK"), "section");
        assert_eq!(config.canonical_key("PUBLICATION-TYPE"), "publication-type");
    }

    #[test]
    fn test_language_names() {
        let config = IngestConfig::default();
        assert_eq!(config.language("GERMAN"), Some(Language::German));
        assert_eq!(config.language(" Deutsch "), Some(Language::German));
        assert_eq!(config.language("klingon"), None);
    }
}
