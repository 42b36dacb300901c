use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const ARTICLES: &str = "\
kop,datum,tekst,pagina
kop1,2001-01-01,text1,12
kop2,10 maart 1980,text2,
";

const MAPPING: &str = r#"{
    "title": {"type": "field", "value": "kop"},
    "date": {"type": "field", "value": "datum"},
    "text": {"type": "field", "value": "tekst"},
    "pagina_int": {"type": "field", "value": "pagina"},
    "medium": {"type": "literal", "value": "Trouw"}
}"#;

const SCHEMA: &str = r#"[{"name": "pagina_int", "type": "int"}]"#;

fn amcat(dir: &Path) -> Command {
    let mut cmd: Command = cargo_bin_cmd!("amcat-ingest").into();
    cmd.current_dir(dir);
    cmd.env("AMCAT_INGEST_CONFIG", dir.join("missing-config.toml"));
    cmd
}

/// A temp dir holding `articles.csv`, `mapping.json` and `schema.json`.
fn upload_dir() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().to_path_buf();
    fs::write(dir.join("articles.csv"), ARTICLES).unwrap();
    fs::write(dir.join("mapping.json"), MAPPING).unwrap();
    fs::write(dir.join("schema.json"), SCHEMA).unwrap();
    (tmp, dir)
}

fn ingest_args() -> Vec<&'static str> {
    vec![
        "ingest",
        "articles.csv",
        "--config",
        "config.toml",
        "--mapping",
        "mapping.json",
        "--schema",
        "schema.json",
    ]
}

#[test]
fn binary_runs() {
    let mut cmd: Command = cargo_bin_cmd!("amcat-ingest").into();
    cmd.arg("--version");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("amcat-ingest"));
}

#[test]
fn detect_csv() {
    let (tmp, dir) = upload_dir();
    fs::write(dir.join("config.toml"), "").unwrap();
    amcat(&dir)
        .args(["detect", "articles.csv", "--config", "config.toml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("articles.csv\tcsv\tUTF-8\t2 fragments"));
    drop(tmp);
}

#[test]
fn fields_suggests_date() {
    let (tmp, dir) = upload_dir();
    fs::write(dir.join("config.toml"), "").unwrap();
    amcat(&dir)
        .args(["fields", "articles.csv", "--config", "config.toml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"destination\": \"datum_date\""))
        .stdout(predicate::str::contains("\"type\": \"datetime\""));
    drop(tmp);
}

#[test]
fn ingest_writes_json_lines() {
    let (tmp, dir) = upload_dir();
    fs::write(dir.join("config.toml"), "").unwrap();
    let output = amcat(&dir).args(ingest_args()).output().unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).unwrap();
    let lines: Vec<serde_json::Value> = stdout
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["title"], "kop1");
    assert_eq!(lines[0]["properties"]["pagina_int"], 12);
    assert_eq!(lines[0]["properties"]["medium"], "Trouw");
    assert_eq!(lines[1]["date"], "1980-03-10T00:00:00");
    assert!(lines[1]["properties"].get("pagina_int").is_none());

    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("Ingested 2 articles from 1 documents, 0 errors"));
    drop(tmp);
}

#[test]
fn ingest_to_output_file() {
    let (tmp, dir) = upload_dir();
    fs::write(dir.join("config.toml"), "").unwrap();
    let mut args = ingest_args();
    args.extend(["--output", "articles.jsonl"]);
    amcat(&dir)
        .args(args)
        .assert()
        .success()
        .stdout(predicate::str::is_empty());

    let written = fs::read_to_string(dir.join("articles.jsonl")).unwrap();
    assert_eq!(written.lines().count(), 2);
    drop(tmp);
}

#[test]
fn ingest_reports_fragment_errors() {
    let (tmp, dir) = upload_dir();
    fs::write(dir.join("config.toml"), "").unwrap();
    fs::write(
        dir.join("articles.csv"),
        "kop,datum,tekst,pagina\nkop1,2001-01-01,text1,12\nkop2,2001-01-02,text2,twaalf\n",
    )
    .unwrap();

    amcat(&dir)
        .args(ingest_args())
        .assert()
        .success()
        .stderr(predicate::str::contains("articles.csv [fragment 1]"))
        .stderr(predicate::str::contains("1 errors"));

    let mut args = ingest_args();
    args.extend(["--max-error-ratio", "0.25"]);
    amcat(&dir)
        .args(args)
        .assert()
        .failure()
        .stderr(predicate::str::contains("more than the allowed 25%"));
    drop(tmp);
}

#[test]
fn ingest_rejects_unmapped_required() {
    let (tmp, dir) = upload_dir();
    fs::write(dir.join("config.toml"), "").unwrap();
    fs::write(
        dir.join("mapping.json"),
        r#"{"title": {"type": "field", "value": "kop"}}"#,
    )
    .unwrap();

    amcat(&dir)
        .args(ingest_args())
        .assert()
        .failure()
        .stderr(predicate::str::contains("Required properties are not mapped: text, date"));
    drop(tmp);
}

#[test]
fn ingest_with_suggested_mapping() {
    let (tmp, dir) = upload_dir();
    fs::write(dir.join("config.toml"), "").unwrap();
    fs::write(
        dir.join("articles.csv"),
        "title,date,text,views\nKop,2014-03-13,Tekst,120\n",
    )
    .unwrap();

    amcat(&dir)
        .args(["ingest", "articles.csv", "--config", "config.toml", "--suggest"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"views_int\":120"));
    drop(tmp);
}

#[test]
fn unknown_encoding_is_rejected() {
    let (tmp, dir) = upload_dir();
    amcat(&dir)
        .args(["detect", "articles.csv", "--encoding", "ebcdic"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown encoding: ebcdic"));
    drop(tmp);
}

#[test]
fn missing_upload_fails() {
    let (tmp, dir) = upload_dir();
    fs::write(dir.join("config.toml"), "").unwrap();
    amcat(&dir)
        .args(["detect", "nothing.csv", "--config", "config.toml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot read upload"));
    drop(tmp);
}
