//! Cloud KMS client against a local mock of the REST API.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use envelope_keys::config::ConfigStore;
use envelope_keys::crypto::DataKey;
use envelope_keys::keystore::MemoryKeyStore;
use envelope_keys::kms::{CloudKmsClient, KeyServiceError, KeyWrapService};
use envelope_keys::provisioner::{KeyProvisioner, ProvisionError, ProvisionerOptions};

mod common;
use common::{mock_kms_response, start_mock_kms, temp_config, write_config, MockRequest};

fn settings(addr: std::net::SocketAddr, key: &str) -> String {
    format!(
        r#"{{
            "project": "docs-prod",
            "encryption": {{
                "location": "global",
                "keyring": "documents",
                "key": "{}",
                "endpoint": "http://{}/v1"
            }}
        }}"#,
        key, addr
    )
}

fn client(file: &tempfile::NamedTempFile, timeout: Duration) -> CloudKmsClient {
    CloudKmsClient::new(ConfigStore::load(file.path()).unwrap(), "t", timeout).unwrap()
}

#[tokio::test]
async fn test_wrap_round_trip_through_mock() {
    let seen: Arc<Mutex<Vec<MockRequest>>> = Arc::new(Mutex::new(Vec::new()));
    let recorder = seen.clone();
    let addr = start_mock_kms(move |request| {
        let recorder = recorder.clone();
        async move {
            let response = mock_kms_response(&request);
            recorder.lock().unwrap().push(request);
            response
        }
    })
    .await;

    let file = temp_config(&settings(addr, "dek-wrapper"));
    let config = ConfigStore::load(file.path()).unwrap();
    let client = CloudKmsClient::new(config, "test-token", Duration::from_secs(5)).unwrap();

    let key = DataKey::from_bytes([5; 32]);
    let wrapped = client.wrap_key(&key).await.unwrap();
    assert_eq!(client.unwrap_key(&wrapped).await.unwrap(), key);

    let requests = seen.lock().unwrap();
    assert_eq!(requests.len(), 2);
    assert_eq!(
        requests[0].path,
        "/v1/projects/docs-prod/locations/global/keyRings/documents/cryptoKeys/dek-wrapper:encrypt"
    );
    assert!(requests[1].path.ends_with(":decrypt"));
    assert_eq!(requests[0].authorization.as_deref(), Some("Bearer test-token"));
    // The request carries the real key; only the local copy is wiped after sending.
    assert_eq!(
        requests[0].body["plaintext"].as_str(),
        Some(STANDARD.encode([5u8; 32]).as_str())
    );
    assert_eq!(requests[1].body["ciphertext"].as_str(), Some(wrapped.as_str()));
}

#[tokio::test]
async fn test_key_path_follows_reload() {
    let paths: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let recorder = paths.clone();
    let addr = start_mock_kms(move |request| {
        let recorder = recorder.clone();
        async move {
            recorder.lock().unwrap().push(request.path.clone());
            mock_kms_response(&request)
        }
    })
    .await;

    let mut file = temp_config(&settings(addr, "key-a"));
    let config = ConfigStore::load(file.path()).unwrap();
    let client = CloudKmsClient::new(config.clone(), "t", Duration::from_secs(5)).unwrap();

    client.wrap_key(&DataKey::from_bytes([1; 32])).await.unwrap();
    write_config(&mut file, &settings(addr, "key-b"));
    config.reload().await.unwrap();
    client.wrap_key(&DataKey::from_bytes([1; 32])).await.unwrap();

    let paths = paths.lock().unwrap();
    assert!(paths[0].contains("/cryptoKeys/key-a:"));
    assert!(paths[1].contains("/cryptoKeys/key-b:"));
}

#[tokio::test]
async fn test_permission_denied_surfaces_status() {
    let addr =
        start_mock_kms(|_| async { (403, r#"{"error":"permission denied"}"#.to_string()) }).await;
    let file = temp_config(&settings(addr, "k"));
    let client = client(&file, Duration::from_secs(5));

    match client.wrap_key(&DataKey::from_bytes([1; 32])).await {
        Err(KeyServiceError::Status { status, body }) => {
            assert_eq!(status, 403);
            assert!(body.contains("permission denied"));
        }
        other => panic!("expected status error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_malformed_response() {
    let addr = start_mock_kms(|_| async { (200, r#"{"unexpected": true}"#.to_string()) }).await;
    let file = temp_config(&settings(addr, "k"));
    let client = client(&file, Duration::from_secs(5));

    let err = client.wrap_key(&DataKey::from_bytes([1; 32])).await.unwrap_err();
    assert!(matches!(err, KeyServiceError::Malformed(_)));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_slow_service_times_out() {
    let addr = start_mock_kms(|request| async move {
        tokio::time::sleep(Duration::from_secs(3)).await;
        mock_kms_response(&request)
    })
    .await;
    let file = temp_config(&settings(addr, "k"));
    let client = client(&file, Duration::from_millis(200));

    let err = client.wrap_key(&DataKey::from_bytes([1; 32])).await.unwrap_err();
    assert!(matches!(err, KeyServiceError::Timeout(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_provisioner_over_cloud_kms() {
    let addr = start_mock_kms(|request| async move { mock_kms_response(&request) }).await;
    let file = temp_config(&settings(addr, "k"));
    let config = ConfigStore::load(file.path()).unwrap();
    let client = CloudKmsClient::new(config, "t", Duration::from_secs(5)).unwrap();
    let store = MemoryKeyStore::new();
    let provisioner = KeyProvisioner::new(client, store.clone(), ProvisionerOptions::default());

    let key = provisioner.get_or_create("u1").await.unwrap();
    let records = store.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].principal, "u1");

    provisioner.evict("u1");
    assert_eq!(provisioner.get_or_create("u1").await.unwrap(), key);
}

#[tokio::test]
async fn test_unreachable_service_is_retryable() {
    // Bind then drop so the port is closed.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let file = temp_config(&settings(addr, "k"));
    let client = client(&file, Duration::from_secs(5));
    let provisioner =
        KeyProvisioner::new(client, MemoryKeyStore::new(), ProvisionerOptions::default());

    let err = provisioner.get_or_create("u1").await.unwrap_err();
    assert!(matches!(err, ProvisionError::KeyService(KeyServiceError::Request(_))));
    assert!(err.is_retryable());
    assert_eq!(provisioner.cache_len(), 0);
}
