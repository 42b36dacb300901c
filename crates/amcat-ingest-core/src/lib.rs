pub mod article;
pub mod config;
pub mod dates;
pub mod error;
pub mod ingest;
mod patterns;
pub mod schema;

pub use article::{NormalizedArticle, PropertyValue};
pub use config::IngestConfig;
pub use dates::{read_date, DateError, Language};
pub use error::{Error, Result};
pub use ingest::{
    BatchIngestResult, Container, DocumentFormat, Encoding, FieldMapping, FieldSuggestion,
    IngestPipeline, IngestionError, Upload, UploadReader,
};
pub use schema::{DestinationSchema, Property, PropertyType};
