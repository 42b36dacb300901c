use std::path::PathBuf;

use thiserror::Error;

/// Errors that abort a run before any fragment is processed.
///
/// Per-fragment failures never surface here; they are collected as
/// [`IngestionError`](crate::ingest::IngestionError) values instead.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Unknown encoding: {0}")]
    UnknownEncoding(String),

    #[error("Unknown format: {0}")]
    UnknownFormat(String),

    #[error("Could not decode {name} as {encoding}")]
    Decode { name: String, encoding: String },

    #[error("Unreadable zip archive {name}: {source}")]
    Container {
        name: String,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("Invalid property name: {0}")]
    InvalidPropertyName(String),

    #[error("Property {name} is declared as {declared} but its suffix implies {implied}")]
    SuffixConflict {
        name: String,
        declared: String,
        implied: String,
    },

    #[error("Mapping targets undeclared property: {0}")]
    UnknownDestination(String),

    #[error("Required properties are not mapped: {}", .0.join(", "))]
    UnmappedRequired(Vec<String>),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration file: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
