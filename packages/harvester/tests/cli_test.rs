//! Tests for the command-line binary.

use std::fs;
use std::path::Path;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::tempdir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fixture_path(name: &str) -> String {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
        .display()
        .to_string()
}

#[test]
fn test_pages_prints_sequence() {
    cargo_bin_cmd!("simpleurl-harvester")
        .args([
            "pages",
            "https://example.org/api?rows=10&start=0",
            "--size-param",
            "rows",
            "--from-param",
            "start",
            "--total",
            "25",
        ])
        .assert()
        .success()
        .stdout(
            "https://example.org/api?rows=10&start=0\n\
             https://example.org/api?rows=10&start=10\n\
             https://example.org/api?rows=5&start=20\n",
        );
}

#[test]
fn test_pages_without_total_prints_url_once() {
    cargo_bin_cmd!("simpleurl-harvester")
        .args([
            "pages",
            "https://example.org/api?rows=10&start=0",
            "--size-param",
            "rows",
            "--from-param",
            "start",
        ])
        .assert()
        .success()
        .stdout("https://example.org/api?rows=10&start=0\n");
}

#[test]
fn test_sniff_fixture_formats() {
    for (fixture, format) in [
        ("ckan/page-0.json", "json"),
        ("csw/getrecords.xml", "xml"),
        ("dcat/catalog.rdf", "rdfxml"),
        ("stac/items.json", "stac"),
    ] {
        cargo_bin_cmd!("simpleurl-harvester")
            .args(["sniff", &fixture_path(fixture)])
            .assert()
            .success()
            .stdout(format!("{format}\n"));
    }
}

#[test]
fn test_sniff_missing_file_fails() {
    cargo_bin_cmd!("simpleurl-harvester")
        .args(["sniff", "/nonexistent/payload.json"])
        .assert()
        .failure();
}

#[test]
fn test_harvest_missing_config_fails() {
    cargo_bin_cmd!("simpleurl-harvester")
        .args(["harvest", "/nonexistent/source.yaml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_harvest_paged_source_into_directory() {
    let server = MockServer::start().await;
    for (start, fixture) in [("0", "page-0"), ("2", "page-1"), ("4", "page-2")] {
        let body = fs::read_to_string(fixture_path(&format!("ckan/{fixture}.json"))).unwrap();
        Mock::given(method("GET"))
            .and(path("/api/3/action/package_search"))
            .and(query_param("start", start))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;
    }

    let work = tempdir().unwrap();
    let config = work.path().join("source.yaml");
    let output = work.path().join("records");
    fs::write(
        &config,
        format!(
            "name: local-ckan\n\
             url: {}/api/3/action/package_search?q=roads&rows=2&start=0\n\
             page_size_param: rows\n\
             page_from_param: start\n\
             total_count_path: /result/count\n\
             records_path: /result/results\n\
             record_id_path: id\n",
            server.uri()
        ),
    )
    .unwrap();

    let stdout = {
        let config = config.clone();
        let output = output.clone();
        tokio::task::spawn_blocking(move || {
            let assert = cargo_bin_cmd!("simpleurl-harvester")
                .arg("harvest")
                .arg(&config)
                .arg("--output")
                .arg(&output)
                .arg("--json")
                .assert()
                .success();
            String::from_utf8(assert.get_output().stdout.clone()).unwrap()
        })
        .await
        .unwrap()
    };

    let report: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(report["source"], "local-ckan");
    assert_eq!(report["pages_processed"], 3);
    assert_eq!(report["records_processed"], 5);
    assert_eq!(report["stats"]["added"], 5);
    assert_eq!(report["removed"], 0);
    assert_eq!(report["errors"].as_array().unwrap().len(), 1);

    assert!(output.join("roads-2024.xml").exists());
    assert!(output.join("ferries.xml").exists());
    let stored = fs::read_dir(&output).unwrap().count();
    assert_eq!(stored, 5);
}
