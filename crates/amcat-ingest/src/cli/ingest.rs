use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use amcat_ingest_core::{
    BatchIngestResult, DestinationSchema, FieldMapping, FieldSuggestion, IngestPipeline,
};
use anyhow::{bail, Context, Result};
use clap::Args;
use tracing::info;

use super::InputArgs;

#[derive(Args)]
pub struct IngestArgs {
    /// Field mapping (JSON object of destination to source)
    #[arg(long)]
    pub mapping: Option<PathBuf>,
    /// Extra destination properties (JSON list of {"name", "type"})
    #[arg(long)]
    pub schema: Option<PathBuf>,
    /// Map suggested fields that the mapping leaves out
    #[arg(long)]
    pub suggest: bool,
    /// Write articles here instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    /// Fail when more than this share of fragments could not be ingested
    #[arg(long)]
    pub max_error_ratio: Option<f64>,
}

pub fn run(input: &InputArgs, options: &IngestArgs) -> Result<()> {
    if let Some(ratio) = options.max_error_ratio {
        if !(0.0..=1.0).contains(&ratio) {
            bail!("--max-error-ratio must lie between 0 and 1, got {ratio}");
        }
    }

    let upload = input.upload()?;
    let config = input.config()?;

    let mut schema = match &options.schema {
        Some(path) => DestinationSchema::load(path)
            .with_context(|| format!("invalid schema {}", path.display()))?,
        None => DestinationSchema::new(),
    };
    let mut mapping = match &options.mapping {
        Some(path) => FieldMapping::load(path)
            .with_context(|| format!("invalid mapping {}", path.display()))?,
        None if options.suggest => FieldMapping::new(),
        None => FieldMapping::identity(),
    };

    if options.suggest {
        let suggestions = input.reader(config.clone()).suggest(&upload)?;
        let (suggested, extra) = FieldSuggestion::into_mapping(suggestions);
        for (destination, source) in suggested.iter() {
            if mapping.get(destination).is_none() {
                info!(destination, "Using suggested mapping");
                mapping = mapping.with_source(destination, source.clone());
            }
        }
        for property in extra {
            schema.declare(property)?;
        }
    }

    let mut pipeline = IngestPipeline::new(schema, mapping)?
        .with_config(config)
        .with_encoding(input.encoding)
        .with_container(input.container());
    if let Some(format) = input.format {
        pipeline = pipeline.with_format(format);
    }

    let result = pipeline.ingest(&upload)?;
    match &options.output {
        Some(path) => {
            let file =
                File::create(path).with_context(|| format!("cannot create {}", path.display()))?;
            write_articles(&result, BufWriter::new(file))?;
        }
        None => write_articles(&result, io::stdout().lock())?,
    }
    report(&result);

    if let Some(max) = options.max_error_ratio {
        let ratio = result.error_ratio();
        if ratio > max {
            bail!(
                "{} of {} fragments failed ({:.0}%), more than the allowed {:.0}%",
                result.failure_count(),
                result.failure_count() + result.success_count(),
                ratio * 100.0,
                max * 100.0
            );
        }
    }
    Ok(())
}

fn write_articles(result: &BatchIngestResult, mut out: impl Write) -> Result<()> {
    for article in &result.articles {
        serde_json::to_writer(&mut out, article)?;
        writeln!(out)?;
    }
    out.flush()?;
    Ok(())
}

fn report(result: &BatchIngestResult) {
    for error in &result.errors {
        eprintln!("error: {error}");
    }
    for file in &result.provenance {
        eprintln!("{}", file.message());
    }
    eprintln!(
        "Ingested {} articles from {} documents, {} errors",
        result.success_count(),
        result.stats.documents,
        result.failure_count()
    );
}
