use std::io::{Cursor, Write};

use amcat_ingest_core::ingest::{IngestError, NormalizationError};
use amcat_ingest_core::{
    DestinationSchema, DocumentFormat, FieldMapping, IngestPipeline, Property, PropertyType,
    PropertyValue, Upload, UploadReader,
};
use chrono::NaiveDate;

const LEXISNEXIS: &str = include_str!("../testdata/lexisnexis/export.txt");

fn csv_pipeline() -> IngestPipeline {
    let schema =
        DestinationSchema::with_properties([Property::new("pagina_int", PropertyType::Int)])
            .unwrap();
    let mapping = FieldMapping::new()
        .field("title", "kop")
        .field("date", "datum")
        .field("text", "tekst")
        .field("pagina_int", "pagina");
    IngestPipeline::new(schema, mapping).unwrap()
}

fn zip_of(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut buf);
        let options = zip::write::SimpleFileOptions::default();
        for (name, data) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap();
    }
    buf.into_inner()
}

#[test]
fn test_lexisnexis_export() {
    let pipeline = IngestPipeline::new(DestinationSchema::new(), FieldMapping::identity()).unwrap();
    let upload = Upload::new("export.txt", LEXISNEXIS.as_bytes().to_vec());
    let result = pipeline.ingest(&upload).unwrap();

    assert_eq!(result.stats.fragments, 4);
    assert_eq!(result.success_count(), 3);
    assert_eq!(result.failure_count(), 1);
    assert_eq!(result.errors[0].fragment, Some(3));
    assert!(matches!(result.errors[0].error, IngestError::Extraction(_)));

    let first = &result.articles[0];
    assert_eq!(first.title, "This is a headline");
    assert_eq!(first.length(), Some(306));
    assert_eq!(first.medium(), Some("Börsen-Zeitung"));

    let provenance = &result.provenance[0];
    assert_eq!(provenance.format, DocumentFormat::LexisNexis);
    assert_eq!(provenance.articles, 3);
    assert!(provenance.message().contains("; LexisNexis query: "));
}

#[test]
fn test_csv_scenario() {
    let upload = Upload::new(
        "kranten.csv",
        b"kop,datum,tekst,pagina\nkop1,2001-01-01,text1,12\nkop2,10 maart 1980,text2,\n".to_vec(),
    );
    let result = csv_pipeline().ingest(&upload).unwrap();

    let titles: Vec<_> = result.articles.iter().map(|a| a.title.as_str()).collect();
    assert_eq!(titles, vec!["kop1", "kop2"]);
    let pages: Vec<_> = result.articles.iter().map(|a| a.get("pagina_int")).collect();
    assert_eq!(pages, vec![Some(&PropertyValue::Int(12)), None]);
    assert!(result
        .articles
        .iter()
        .any(|a| a.date.date() == NaiveDate::from_ymd_opt(1980, 3, 10).unwrap()));
}

#[test]
fn test_one_bad_fragment_in_ten() {
    let mut csv = String::from("kop,datum,tekst\n");
    for i in 0..10 {
        let date = if i == 6 { "geen datum".to_string() } else { format!("2001-01-{:02}", i + 1) };
        csv.push_str(&format!("kop{i},{date},tekst {i}\n"));
    }
    let upload = Upload::new("batch.csv", csv.into_bytes());
    let result = csv_pipeline().ingest(&upload).unwrap();

    assert_eq!(result.success_count(), 9);
    assert_eq!(result.failure_count(), 1);
    assert_eq!(result.errors[0].fragment, Some(6));
    assert_eq!(result.errors[0].source, "batch.csv");
    assert!(matches!(
        &result.errors[0].error,
        IngestError::Normalization(NormalizationError::Coercion { field, value, .. })
            if field == "date" && value == "geen datum"
    ));
}

#[test]
fn test_impossible_date_fails_its_row() {
    let upload = Upload::new(
        "kranten.csv",
        b"kop,datum,tekst\nkop1,2001-02-28,text1\nkop2,2001-02-30,text2\n".to_vec(),
    );
    let result = csv_pipeline().ingest(&upload).unwrap();

    assert_eq!(result.success_count(), 1);
    assert_eq!(result.errors[0].fragment, Some(1));
    assert!(matches!(
        &result.errors[0].error,
        IngestError::Normalization(NormalizationError::Coercion { field, value, .. })
            if field == "date" && value == "2001-02-30"
    ));
}

#[test]
fn test_csv_with_short_rows() {
    let upload = Upload::new(
        "data.csv",
        b"kop,datum,tekst,pagina\nk1,2001-01-01,t1\nk2,2001-01-02,t2\n".to_vec(),
    );
    let result = csv_pipeline().ingest(&upload).unwrap();

    assert_eq!(result.failure_count(), 0);
    assert_eq!(result.success_count(), 2);
    assert_eq!(result.provenance[0].format, DocumentFormat::Csv);
    assert!(result.articles.iter().all(|a| a.get("pagina_int").is_none()));
}

#[test]
fn test_ingest_is_repeatable() {
    let pipeline = IngestPipeline::new(DestinationSchema::new(), FieldMapping::identity()).unwrap();
    let upload = Upload::new("export.txt", LEXISNEXIS.as_bytes().to_vec());

    let first = pipeline.ingest(&upload).unwrap();
    let second = pipeline.ingest(&upload).unwrap();
    assert_eq!(
        serde_json::to_string(&first.articles).unwrap(),
        serde_json::to_string(&second.articles).unwrap()
    );
    assert_ne!(first.run_id, second.run_id);
}

#[test]
fn test_zip_upload() {
    let bytes = zip_of(&[
        ("januari.csv", b"kop,datum,tekst\na,2001-01-01,x\n"),
        ("februari.csv", b"kop;datum;tekst\nb;2001-02-01;y\nc;2001-02-02;z\n"),
    ]);
    let upload = Upload::new("kranten.zip", bytes);
    let result = csv_pipeline().ingest(&upload).unwrap();

    assert_eq!(result.stats.documents, 2);
    assert_eq!(result.success_count(), 3);
    let sources: Vec<_> = result.provenance.iter().map(|p| p.source.as_str()).collect();
    assert_eq!(sources, vec!["januari.csv", "februari.csv"]);
}

#[test]
fn test_date_suggested_before_int() {
    let upload = Upload::new("upload.csv", b"kop,verschenen\nx,2001-01-01\n".to_vec());
    let suggestions = UploadReader::new().suggest(&upload).unwrap();
    let verschenen = suggestions.iter().find(|s| s.field == "verschenen").unwrap();
    assert_eq!(verschenen.ptype, Some(PropertyType::DateTime));
    assert_eq!(verschenen.destination.as_deref(), Some("verschenen_date"));
}

#[test]
fn test_upload_from_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("upload.csv");
    std::fs::write(&path, "kop,datum,tekst\na,2001-01-01,x\n").unwrap();

    let upload = Upload::from_path(&path).unwrap();
    assert_eq!(upload.name, "upload.csv");
    assert_eq!(csv_pipeline().ingest(&upload).unwrap().success_count(), 1);
}
