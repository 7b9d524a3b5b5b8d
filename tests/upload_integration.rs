//! Integration tests for multipart uploads.

mod support;

use std::io::Write;

use httpreq::{ErrorCode, HttpClient, RequestOptions, UploadFile, Verb};
use support::socket_guard::start_mock_server_or_skip;
use tempfile::{NamedTempFile, TempDir};
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

fn temp_file_with(contents: &[u8]) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("failed to create temp file");
    file.write_all(contents).expect("failed to write temp file");
    file.flush().expect("failed to flush temp file");
    file
}

#[tokio::test]
async fn test_upload_files_sends_multipart_body() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("POST"))
        .and(path("/upload"))
        .respond_with(ResponseTemplate::new(200).set_body_string("stored"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let first = temp_file_with(b"first file contents");
    let second = temp_file_with(b"second");

    let client = HttpClient::new();
    let url = format!("{}/upload", mock_server.uri());
    let options = RequestOptions::new().parameter("note", "two files");
    let response = client
        .upload_files(
            &url,
            [
                UploadFile::new(first.path()),
                UploadFile::with_field("attachment", second.path()),
            ],
            Some(options),
        )
        .await
        .unwrap();
    assert_eq!(response.text(), Some("stored"));

    let received = mock_server.received_requests().await.unwrap();
    assert_eq!(received.len(), 1);
    let request = &received[0];

    let content_type = request
        .headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap();
    let boundary = content_type
        .strip_prefix("multipart/form-data; boundary=")
        .expect("multipart content type with boundary");

    let declared: usize = request
        .headers
        .get("content-length")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .expect("content-length sent");
    assert_eq!(declared, request.body.len());

    let body = String::from_utf8_lossy(&request.body);
    assert!(body.starts_with(&format!("--{boundary}\r\n")));
    assert!(body.ends_with(&format!("--{boundary}--\r\n")));
    assert!(body.contains("name=\"note\"\r\n\r\ntwo files\r\n"));
    assert!(body.contains("name=\"file\"; filename="));
    assert!(body.contains("name=\"attachment\"; filename="));
    assert!(body.contains("first file contents"));
    assert!(body.contains("\r\n\r\nsecond\r\n"));
}

#[tokio::test]
async fn test_upload_files_honors_method_override() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("PUT"))
        .and(path("/replace"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&mock_server)
        .await;

    let file = temp_file_with(b"replacement");
    let client = HttpClient::new();
    let url = format!("{}/replace", mock_server.uri());
    let response = client
        .upload_files(&url, [file.path()], Some(RequestOptions::new().method(Verb::Put)))
        .await
        .unwrap();
    assert_eq!(response.status_code, 201);
}

#[tokio::test]
async fn test_upload_with_get_is_rejected() {
    let file = temp_file_with(b"never sent");
    let client = HttpClient::new();

    let err = client
        .upload_files(
            "http://127.0.0.1:9/upload",
            [file.path()],
            Some(RequestOptions::new().method(Verb::Get)),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::CantSendFilesUsingGet);

    let err = client
        .get(
            "http://127.0.0.1:9/upload",
            Some(RequestOptions::new().file(file.path())),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::CantSendFilesUsingGet);
}

#[tokio::test]
async fn test_missing_upload_file_fails_before_network() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let missing = temp_dir.path().join("does-not-exist.txt");

    let client = HttpClient::new();
    let url = format!("{}/upload", mock_server.uri());
    let err = client
        .upload_files(&url, [missing.as_path()], None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::FileError);
}

#[tokio::test]
async fn test_upload_files_with_body_conflicts() {
    let file = temp_file_with(b"data");
    let client = HttpClient::new();

    let err = client
        .upload_files(
            "http://127.0.0.1:9/upload",
            [file.path()],
            Some(RequestOptions::new().body("inline")),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ConflictingBody);
}
