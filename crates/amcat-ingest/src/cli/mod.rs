pub mod detect;
pub mod fields;
pub mod ingest;

use std::path::PathBuf;

use amcat_ingest_core::{Container, DocumentFormat, Encoding, IngestConfig, Upload, UploadReader};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "amcat-ingest",
    about = "Turn uploaded news exports into normalized articles",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the detected format and fragment count of each document
    Detect {
        #[command(flatten)]
        input: InputArgs,
    },
    /// Suggest a field mapping from sampled fragments (JSON)
    Fields {
        #[command(flatten)]
        input: InputArgs,
    },
    /// Write normalized articles as JSON lines
    Ingest {
        #[command(flatten)]
        input: InputArgs,
        #[command(flatten)]
        options: ingest::IngestArgs,
    },
}

/// How to read the uploaded file.
#[derive(Args)]
pub struct InputArgs {
    /// Uploaded file (a single document or a zip of documents)
    pub file: PathBuf,
    /// Skip detection and read every document as this format
    #[arg(long, value_parser = parse_format)]
    pub format: Option<DocumentFormat>,
    /// Text encoding (Autodetect, UTF-8, ISO-8859-15, Latin-1)
    #[arg(long, default_value = "Autodetect", value_parser = parse_encoding)]
    pub encoding: Encoding,
    /// Treat the file as a zip archive regardless of its name
    #[arg(long)]
    pub zip: bool,
    /// Configuration file (TOML); defaults to $AMCAT_INGEST_CONFIG or the user config
    #[arg(long)]
    pub config: Option<PathBuf>,
}

fn parse_format(s: &str) -> Result<DocumentFormat, String> {
    s.parse().map_err(|e: amcat_ingest_core::Error| e.to_string())
}

fn parse_encoding(s: &str) -> Result<Encoding, String> {
    s.parse().map_err(|e: amcat_ingest_core::Error| e.to_string())
}

impl InputArgs {
    pub fn config(&self) -> Result<IngestConfig> {
        let config = match &self.config {
            Some(path) => IngestConfig::load(path)?,
            None => IngestConfig::from_env()?,
        };
        Ok(config)
    }

    pub fn reader(&self, config: IngestConfig) -> UploadReader {
        let mut reader = UploadReader::new()
            .with_config(config)
            .with_encoding(self.encoding)
            .with_container(self.container());
        if let Some(format) = self.format {
            reader = reader.with_format(format);
        }
        reader
    }

    pub const fn container(&self) -> Container {
        if self.zip {
            Container::Zip
        } else {
            Container::Auto
        }
    }

    pub fn upload(&self) -> Result<Upload> {
        Upload::from_path(&self.file)
            .with_context(|| format!("cannot read upload {}", self.file.display()))
    }
}
