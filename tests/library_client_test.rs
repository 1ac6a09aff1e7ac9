//! Library Client Integration Tests
//!
//! Tests for the init and finalize calls against a mock library service.
//!
//! ## Test Coverage
//!
//! - Init sends filename and digest with Basic credentials
//! - Init response parsing and status classification
//! - Finalize form layout, Accept header and book id extraction
//! - Finalize error classification with server messages surfaced verbatim

use calibre_uploadr::auth::ApiKey;
use calibre_uploadr::client::{FinalizeSubmission, LibraryClient, LibraryClientConfig};
use calibre_uploadr::metadata::{BookMetadata, SeriesEntry};
use calibre_uploadr::upload::{ErrorKind, LibraryService};
use serde_json::json;
use std::io::Write;
use wiremock::matchers::{body_string_contains, header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Base64 of "test-key:" (API key as user, empty password)
const BASIC_AUTH: &str = "Basic dGVzdC1rZXk6";

const FILE_DIGEST: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

/// Helper to create a client pointed at a mock server
fn create_client(mock_server: &MockServer) -> LibraryClient {
    let config = LibraryClientConfig::new(
        format!("{}/calibre-api/v1", mock_server.uri()),
        ApiKey::new("test-key").unwrap(),
    );
    LibraryClient::new(config).unwrap()
}

fn submission(metadata: BookMetadata) -> FinalizeSubmission {
    FinalizeSubmission {
        storage_key: "uploads/k1/dune.epub".into(),
        file_digest: FILE_DIGEST.into(),
        metadata,
        metadata_digest: "41736fc3740ccf5aa7f23a469563d0f3f99fd8ddcac2bced3cf67423e1c98fb4".into(),
        cover: None,
    }
}

fn init_body() -> serde_json::Value {
    json!({
        "url": "https://bucket.s3.amazonaws.com/",
        "params": {
            "key": "uploads/k1/dune.epub",
            "policy": "eyJleHAiOiIyMDI2In0=",
            "x-amz-credential": "AKIA/20261019/us-east-1/s3/aws4_request",
            "x-amz-signature": "abc123"
        }
    })
}

mod init {
    use super::*;

    #[tokio::test]
    async fn test_init_sends_filename_digest_and_credentials() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/calibre-api/v1/uploads/init"))
            .and(header("authorization", BASIC_AUTH))
            .and(body_string_contains("name=\"filename\""))
            .and(body_string_contains("dune.epub"))
            .and(body_string_contains("name=\"digest\""))
            .and(body_string_contains(FILE_DIGEST))
            .respond_with(ResponseTemplate::new(200).set_body_json(init_body()))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_client(&mock_server);
        let session = client.init_upload("dune.epub", FILE_DIGEST).await.unwrap();

        assert_eq!(session.target_url, "https://bucket.s3.amazonaws.com/");
        assert_eq!(session.storage_key, "uploads/k1/dune.epub");
        let names: Vec<&str> = session.form_fields.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(
            names,
            vec!["key", "policy", "x-amz-credential", "x-amz-signature"],
            "Form fields must keep the server's order"
        );
    }

    #[tokio::test]
    async fn test_init_accepts_created() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/calibre-api/v1/uploads/init"))
            .respond_with(ResponseTemplate::new(201).set_body_json(init_body()))
            .mount(&mock_server)
            .await;

        let client = create_client(&mock_server);
        assert!(client.init_upload("dune.epub", FILE_DIGEST).await.is_ok());
    }

    #[tokio::test]
    async fn test_init_unauthorized_is_auth_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/calibre-api/v1/uploads/init"))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(json!({"error": "Invalid API key"})),
            )
            .mount(&mock_server)
            .await;

        let client = create_client(&mock_server);
        let err = client.init_upload("dune.epub", FILE_DIGEST).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Auth);
        assert_eq!(err.status(), Some(401));
        assert_eq!(err.server_message(), Some("Invalid API key"));
    }

    #[tokio::test]
    async fn test_init_server_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/calibre-api/v1/uploads/init"))
            .respond_with(ResponseTemplate::new(502).set_body_string("Bad Gateway"))
            .mount(&mock_server)
            .await;

        let client = create_client(&mock_server);
        let err = client.init_upload("dune.epub", FILE_DIGEST).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Server);
        assert!(err.to_string().contains("502"), "Error should mention status: {}", err);
    }

    #[tokio::test]
    async fn test_init_client_error_is_protocol_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/calibre-api/v1/uploads/init"))
            .respond_with(ResponseTemplate::new(422).set_body_string("digest missing"))
            .mount(&mock_server)
            .await;

        let client = create_client(&mock_server);
        let err = client.init_upload("dune.epub", FILE_DIGEST).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert_eq!(err.server_message(), Some("digest missing"));
    }

    #[tokio::test]
    async fn test_init_missing_fields_is_protocol_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/calibre-api/v1/uploads/init"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"url": "https://bucket/"})),
            )
            .mount(&mock_server)
            .await;

        let client = create_client(&mock_server);
        let err = client.init_upload("dune.epub", FILE_DIGEST).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
    }

    #[tokio::test]
    async fn test_init_connection_refused_is_network_error() {
        let config = LibraryClientConfig::new(
            "http://127.0.0.1:1/calibre-api/v1",
            ApiKey::new("test-key").unwrap(),
        );
        let client = LibraryClient::new(config).unwrap();

        let err = client.init_upload("dune.epub", FILE_DIGEST).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Network);
    }
}

mod finalize {
    use super::*;

    #[tokio::test]
    async fn test_finalize_success_returns_book_id() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/calibre-api/v1/uploads/finalize"))
            .and(header("authorization", BASIC_AUTH))
            .and(header("accept", "application/json"))
            .and(body_string_contains("name=\"key\""))
            .and(body_string_contains("uploads/k1/dune.epub"))
            .and(body_string_contains("name=\"metadata[calibre_metadata_digest]\""))
            .and(body_string_contains("name=\"metadata[author_list][]\""))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("x-request-id", "req-123")
                    .set_body_json(json!({"id": 4242})),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let metadata = BookMetadata {
            title: Some("Dune".into()),
            authors: vec!["Frank Herbert".into()],
            ..Default::default()
        };

        let client = create_client(&mock_server);
        let outcome = client.finalize(&submission(metadata)).await.unwrap();

        assert_eq!(outcome.book_id.as_deref(), Some("4242"));
        assert_eq!(outcome.request_id.as_deref(), Some("req-123"));
    }

    #[tokio::test]
    async fn test_finalize_form_order() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/calibre-api/v1/uploads/finalize"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "b1"})))
            .mount(&mock_server)
            .await;

        let metadata = BookMetadata {
            title: Some("Dune".into()),
            series: vec![SeriesEntry::new("Dune Chronicles", Some("1"))],
            authors: vec!["Frank Herbert".into()],
            tags: vec!["scifi".into()],
            bookshelves: Some(vec!["Favorites".into()]),
            ..Default::default()
        };

        let client = create_client(&mock_server);
        client.finalize(&submission(metadata)).await.unwrap();

        let requests = mock_server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        let body = String::from_utf8_lossy(&requests[0].body).into_owned();

        let order = [
            "name=\"key\"",
            "name=\"digest\"",
            "name=\"metadata[calibre_metadata_digest]\"",
            "name=\"metadata[title]\"",
            "name=\"metadata[series][][title]\"",
            "name=\"metadata[series][][index]\"",
            "name=\"metadata[author_list][]\"",
            "name=\"metadata[tag_list][]\"",
            "name=\"metadata[bookshelves][]\"",
        ];
        let positions: Vec<usize> = order
            .iter()
            .map(|needle| body.find(needle).unwrap_or_else(|| panic!("missing {}", needle)))
            .collect();
        assert!(
            positions.windows(2).all(|w| w[0] < w[1]),
            "Finalize fields out of order: {:?}",
            positions
        );

        // Leading empty entry plus one per shelf
        assert_eq!(body.matches("name=\"metadata[bookshelves][]\"").count(), 2);
        assert!(!body.contains("metadata[cover]"));
    }

    #[tokio::test]
    async fn test_finalize_attaches_cover() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/calibre-api/v1/uploads/finalize"))
            .and(body_string_contains("name=\"metadata[cover]\""))
            .and(body_string_contains("image/png"))
            .and(body_string_contains("fake-png-bytes"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 1})))
            .expect(1)
            .mount(&mock_server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let cover_path = dir.path().join("cover.png");
        let mut cover = std::fs::File::create(&cover_path).unwrap();
        cover.write_all(b"fake-png-bytes").unwrap();

        let mut submission = submission(BookMetadata::with_title("Dune"));
        submission.cover = Some(cover_path);

        let client = create_client(&mock_server);
        client.finalize(&submission).await.unwrap();
    }

    #[tokio::test]
    async fn test_finalize_validation_error_message_verbatim() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/calibre-api/v1/uploads/finalize"))
            .respond_with(ResponseTemplate::new(422).set_body_json(json!({"error": "ISBN invalid"})))
            .mount(&mock_server)
            .await;

        let client = create_client(&mock_server);
        let err = client
            .finalize(&submission(BookMetadata::with_title("Dune")))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.status(), Some(422));
        assert_eq!(err.server_message(), Some("ISBN invalid"));
        assert!(err.to_string().contains("ISBN invalid"));
    }

    #[tokio::test]
    async fn test_finalize_forbidden_is_auth_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/calibre-api/v1/uploads/finalize"))
            .respond_with(ResponseTemplate::new(403).set_body_string("Forbidden"))
            .mount(&mock_server)
            .await;

        let client = create_client(&mock_server);
        let err = client
            .finalize(&submission(BookMetadata::with_title("Dune")))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Auth);
    }

    #[tokio::test]
    async fn test_finalize_server_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/calibre-api/v1/uploads/finalize"))
            .respond_with(ResponseTemplate::new(500).set_body_string("Internal Server Error"))
            .mount(&mock_server)
            .await;

        let client = create_client(&mock_server);
        let err = client
            .finalize(&submission(BookMetadata::with_title("Dune")))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Server);
        assert_eq!(err.server_message(), Some("Internal Server Error"));
    }

    #[tokio::test]
    async fn test_finalize_success_without_id() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/calibre-api/v1/uploads/finalize"))
            .and(header_exists("authorization"))
            .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
            .mount(&mock_server)
            .await;

        let client = create_client(&mock_server);
        let outcome = client
            .finalize(&submission(BookMetadata::with_title("Dune")))
            .await
            .unwrap();
        assert_eq!(outcome.book_id, None);
    }
}
