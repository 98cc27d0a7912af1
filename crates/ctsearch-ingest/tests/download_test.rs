//! Downloader tests against a mock HTTP server.

use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use ctsearch_core::Error;
use ctsearch_ingest::{AactDownloader, ClinicalTrialsGovClient};

const DOWNLOAD_PAGE: &str = r#"<html><body>
    <select class="form-select">
      <option value="">Current Month's Daily Static Copies</option>
      <option value="/static/static_db_copies/daily/2025-05-11">05/11/2025</option>
    </select></body></html>"#;

fn study(nct_id: &str) -> serde_json::Value {
    json!({
        "protocolSection": {
            "identificationModule": {"nctId": nct_id, "briefTitle": format!("Trial {nct_id}")},
            "conditionsModule": {"conditions": ["Melanoma"]}
        }
    })
}

#[tokio::test]
async fn test_aact_downloads_zip_served_directly() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/download"))
        .respond_with(ResponseTemplate::new(200).set_body_string(DOWNLOAD_PAGE))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/static/static_db_copies/daily/2025-05-11"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/zip")
                .set_body_bytes(b"PK\x03\x04zipdata".to_vec()),
        )
        .expect(1)
        .mount(&server)
        .await;

    let downloader = AactDownloader::new(dir.path())
        .unwrap()
        .with_base_url(server.uri());

    let output = downloader.download_latest_dataset().await.unwrap();

    assert_eq!(output, downloader.output_path());
    assert!(output.starts_with(dir.path().join("raw")));
    assert_eq!(std::fs::read(&output).unwrap(), b"PK\x03\x04zipdata");
}

#[tokio::test]
async fn test_aact_follows_link_on_snapshot_page() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/download"))
        .respond_with(ResponseTemplate::new(200).set_body_string(DOWNLOAD_PAGE))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/static/static_db_copies/daily/2025-05-11"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<a href="/files/20250511_clinical_trials_ctgov.zip">Download</a>"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/20250511_clinical_trials_ctgov.zip"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"archive".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let downloader = AactDownloader::new(dir.path())
        .unwrap()
        .with_base_url(server.uri());

    let output = downloader.download_latest_dataset().await.unwrap();
    assert_eq!(std::fs::read(&output).unwrap(), b"archive");
}

#[tokio::test]
async fn test_aact_missing_link_is_not_found() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/download"))
        .respond_with(ResponseTemplate::new(200).set_body_string(DOWNLOAD_PAGE))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/static/static_db_copies/daily/2025-05-11"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<p>Nothing here</p>"))
        .mount(&server)
        .await;

    let downloader = AactDownloader::new(dir.path())
        .unwrap()
        .with_base_url(server.uri());

    let err = downloader.download_latest_dataset().await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)), "got {err:?}");
    assert!(!downloader.output_path().exists());
}

#[tokio::test]
async fn test_aact_reuses_existing_file() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let downloader = AactDownloader::new(dir.path())
        .unwrap()
        .with_base_url(server.uri());
    std::fs::write(downloader.output_path(), b"cached").unwrap();

    let output = downloader.download_latest_dataset().await.unwrap();
    assert_eq!(std::fs::read(output).unwrap(), b"cached");
}

#[tokio::test]
async fn test_aact_page_error_is_request_error() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/download"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let downloader = AactDownloader::new(dir.path())
        .unwrap()
        .with_base_url(server.uri());

    let err = downloader.latest_dataset_url().await.unwrap_err();
    assert!(matches!(err, Error::Request(_)));
}

#[tokio::test]
async fn test_aact_stalled_server_hits_read_timeout() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/download"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(DOWNLOAD_PAGE)
                .set_delay(std::time::Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let downloader = AactDownloader::new(dir.path())
        .unwrap()
        .with_base_url(server.uri())
        .with_read_timeout(std::time::Duration::from_millis(200))
        .unwrap();

    let err = downloader.download_latest_dataset().await.unwrap_err();
    assert!(matches!(err, Error::Request(_)), "got {err:?}");
    assert!(!downloader.output_path().exists());
}

#[tokio::test]
async fn test_search_follows_page_tokens() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/studies"))
        .and(query_param("pageToken", "page2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "studies": [study("NCT00000003")]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/studies"))
        .and(query_param("query.term", "melanoma"))
        .and(query_param("countTotal", "true"))
        .and(query_param("pageSize", "10"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "studies": [study("NCT00000001"), study("NCT00000002")],
            "totalCount": 3,
            "nextPageToken": "page2"
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    let client = ClinicalTrialsGovClient::new(dir.path())
        .unwrap()
        .with_api_url(server.uri());

    let results = client.search_trials("melanoma", None, 10).await.unwrap();

    let ids: Vec<_> = results.iter().map(|r| r["NCTId"].as_str().unwrap()).collect();
    assert_eq!(ids, vec!["NCT00000001", "NCT00000002", "NCT00000003"]);
    assert_eq!(results[0]["Condition"], json!(["Melanoma"]));
}

#[tokio::test]
async fn test_search_stops_at_max_results() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/studies"))
        .and(query_param("pageSize", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "studies": [study("NCT1"), study("NCT2")],
            "totalCount": 500,
            "nextPageToken": "more"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = ClinicalTrialsGovClient::new(dir.path())
        .unwrap()
        .with_api_url(server.uri());

    let results = client.search_trials("cancer", None, 2).await.unwrap();
    assert_eq!(results.len(), 2);
}

#[tokio::test]
async fn test_search_stops_on_empty_page() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/studies"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"studies": []})))
        .expect(1)
        .mount(&server)
        .await;

    let client = ClinicalTrialsGovClient::new(dir.path())
        .unwrap()
        .with_api_url(server.uri());

    let results = client.search_trials("nothing", Some(&["NCTId"]), 50).await.unwrap();
    assert!(results.is_empty());
}

#[tokio::test]
async fn test_bulk_download_writes_file() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/bulk/studies"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"bulk".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let client = ClinicalTrialsGovClient::new(dir.path())
        .unwrap()
        .with_bulk_url(format!("{}/bulk/studies", server.uri()));

    let first = client.download_bulk_data().await.unwrap();
    assert_eq!(std::fs::read(&first).unwrap(), b"bulk");

    // Second call reuses today's file
    let second = client.download_bulk_data().await.unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_save_search_results() {
    let dir = TempDir::new().unwrap();
    let client = ClinicalTrialsGovClient::new(dir.path()).unwrap();
    let results = vec![json!({"NCTId": "NCT1"})];

    let path = client
        .save_search_results(&results, "lung cancer")
        .unwrap();

    let name = path.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("search_lung_cancer_"));
    assert!(name.ends_with(".json"));

    let saved: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(saved["query"], "lung cancer");
    assert_eq!(saved["results"][0]["NCTId"], "NCT1");
    assert!(saved["timestamp"].is_string());
}
