use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tower::util::ServiceExt;

use fileshelf::server::{router, ErrorResponse, SaveResponse};
use fileshelf::{StorageConfig, StorageEngine};

async fn create_test_app() -> (Router, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let engine = StorageEngine::open(StorageConfig::with_root(temp_dir.path()))
        .await
        .unwrap();
    (router(Arc::new(engine)), temp_dir)
}

async fn send(app: &Router, method: Method, uri: &str, body: Vec<u8>) -> (StatusCode, Vec<u8>) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, bytes.to_vec())
}

fn count_files(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| {
            let entry = entry.unwrap();
            if entry.file_type().unwrap().is_dir() {
                count_files(&entry.path())
            } else {
                1
            }
        })
        .sum()
}

#[tokio::test]
async fn test_put_get_delete_cycle() {
    let (app, _temp) = create_test_app().await;
    let test_file = vec![0u8, 1, 2, 3];

    let (status, body) = send(&app, Method::PUT, "/test-file.bin", test_file.clone()).await;
    assert_eq!(status, StatusCode::OK);
    let saved: SaveResponse = serde_json::from_slice(&body).unwrap();
    assert!(!saved.id.to_string().is_empty());

    let (status, body) = send(&app, Method::GET, "/test-file.bin", vec![]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, test_file);

    let (status, _) = send(&app, Method::DELETE, "/test-file.bin", vec![]).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, Method::GET, "/test-file.bin", vec![]).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let error: ErrorResponse = serde_json::from_slice(&body).unwrap();
    assert!(error.error.contains("not found"));
}

#[tokio::test]
async fn test_duplicate_name_is_bad_request() {
    let (app, _temp) = create_test_app().await;

    let (status, _) = send(&app, Method::PUT, "/report.txt", b"first".to_vec()).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, Method::PUT, "/report.txt", b"second".to_vec()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let error: ErrorResponse = serde_json::from_slice(&body).unwrap();
    assert!(error.error.contains("report.txt"));

    let (_, body) = send(&app, Method::GET, "/report.txt", vec![]).await;
    assert_eq!(body, b"first");
}

#[tokio::test]
async fn test_delete_missing_is_not_found() {
    let (app, _temp) = create_test_app().await;

    let (status, _) = send(&app, Method::DELETE, "/never-uploaded", vec![]).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_nested_names_and_missing_name() {
    let (app, _temp) = create_test_app().await;

    let (status, _) = send(&app, Method::PUT, "/dir/sub/file.txt", b"nested".to_vec()).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, Method::GET, "/dir/sub/file.txt", vec![]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"nested");

    let (status, _) = send(&app, Method::PUT, "/", b"nameless".to_vec()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_concurrent_uploads_store_one_blob() {
    let (app, temp) = create_test_app().await;
    let test_file = vec![0u8, 1, 2, 3];
    let n = 100;

    let uploads: Vec<_> = (0..n)
        .map(|i| {
            let app = app.clone();
            let body = test_file.clone();
            tokio::spawn(async move { send(&app, Method::PUT, &format!("/file{}", i), body).await })
        })
        .collect();

    for upload in uploads {
        let (status, _) = upload.await.unwrap();
        assert_eq!(status, StatusCode::OK);
    }

    assert_eq!(count_files(&temp.path().join("files")), 1);

    let downloads: Vec<_> = (0..n)
        .map(|i| {
            let app = app.clone();
            tokio::spawn(async move { send(&app, Method::GET, &format!("/file{}", i), vec![]).await })
        })
        .collect();

    for download in downloads {
        let (status, body) = download.await.unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, test_file);
    }
}
