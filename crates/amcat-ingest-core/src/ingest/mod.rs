mod container;
mod extractor;
pub mod formats;
mod mapping;
mod normalizer;
mod parser;
mod pipeline;

pub use container::{Container, ContainerResolver, DecodedDocument, Encoding, RawDocument};
pub use extractor::{
    extract, ExtractContext, ExtractionError, ExtractionResult, RawFieldSet, RawValue,
};
pub use formats::{apa::TextRun, bzk_html::HtmlFragment, bzk_html::HtmlLayout, bzk_pdf::PdfArticle};
pub use mapping::{
    check_literal, coerce, guess_destination_and_type, suggest_fields, FieldMapping,
    FieldSuggestion, MappingSource,
};
pub use normalizer::{Assembler, NormalizationError, NormalizationResult};
pub use parser::{
    DocumentFormat, DocumentFragment, FragmentBody, Fragments, ParseError, ParseResult, Split,
};
pub use pipeline::{
    BatchIngestResult, DocumentSummary, FileProvenance, IngestError, IngestPipeline,
    IngestResult, IngestStats, IngestionError, Upload, UploadReader,
};
