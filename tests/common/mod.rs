//! Shared utilities for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::io::{Seek, SeekFrom, Write};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use envelope_keys::crypto::{DataKey, WrappedKey};
use envelope_keys::keystore::{KeyStore, MemoryKeyStore, StoreError};
use envelope_keys::kms::{KeyServiceError, KeyWrapService, LocalKeyWrapper};

/// Settings file with a `.json` suffix so the loader picks the JSON parser.
pub fn temp_config(body: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
    write_config(&mut file, body);
    file
}

/// Rewrite the settings file in place.
pub fn write_config(file: &mut tempfile::NamedTempFile, body: &str) {
    let f = file.as_file_mut();
    f.set_len(0).unwrap();
    f.seek(SeekFrom::Start(0)).unwrap();
    f.write_all(body.as_bytes()).unwrap();
    f.sync_all().unwrap();
}

pub fn master_key() -> DataKey {
    DataKey::from_bytes([0x42; 32])
}

/// Key wrapper that counts calls and can be slowed, stalled, or made to fail.
#[derive(Default)]
pub struct InstrumentedWrapper {
    inner: Option<LocalKeyWrapper>,
    pub wraps: AtomicUsize,
    pub unwraps: AtomicUsize,
    pub fail: AtomicBool,
    pub stall: AtomicBool,
    delay: Duration,
}

impl InstrumentedWrapper {
    pub fn new() -> Self {
        Self::with_delay(Duration::ZERO)
    }

    /// Every call sleeps for `delay` before answering.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            inner: Some(LocalKeyWrapper::new(master_key())),
            delay,
            ..Default::default()
        }
    }

    pub fn wraps(&self) -> usize {
        self.wraps.load(Ordering::SeqCst)
    }

    pub fn unwraps(&self) -> usize {
        self.unwraps.load(Ordering::SeqCst)
    }

    async fn gate(&self) -> Result<&LocalKeyWrapper, KeyServiceError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.stall.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(KeyServiceError::Status {
                status: 503,
                body: "service unavailable".into(),
            });
        }
        self.inner
            .as_ref()
            .ok_or_else(|| KeyServiceError::Misconfigured("no master key".into()))
    }
}

#[async_trait]
impl KeyWrapService for InstrumentedWrapper {
    async fn wrap_key(&self, key: &DataKey) -> Result<WrappedKey, KeyServiceError> {
        self.wraps.fetch_add(1, Ordering::SeqCst);
        self.gate().await?.wrap_key(key).await
    }

    async fn unwrap_key(&self, wrapped: &WrappedKey) -> Result<DataKey, KeyServiceError> {
        self.unwraps.fetch_add(1, Ordering::SeqCst);
        self.gate().await?.unwrap_key(wrapped).await
    }
}

/// In-memory key store that counts reads and writes.
///
/// Writes can be made to fail or to hang without touching the inner store.
#[derive(Default)]
pub struct CountingKeyStore {
    pub inner: MemoryKeyStore,
    pub reads: AtomicUsize,
    pub writes: AtomicUsize,
    pub fail_writes: AtomicBool,
    pub stall_writes: AtomicBool,
}

impl CountingKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeyStore for CountingKeyStore {
    async fn get_wrapped_key(&self, principal: &str) -> Result<Option<WrappedKey>, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.get_wrapped_key(principal).await
    }

    async fn put_wrapped_key_if_absent(
        &self,
        principal: &str,
        wrapped: &WrappedKey,
    ) -> Result<bool, StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.stall_writes.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("disk full".into()));
        }
        self.inner.put_wrapped_key_if_absent(principal, wrapped).await
    }
}

/// One request received by the mock key service.
#[derive(Debug, Clone)]
pub struct MockRequest {
    pub path: String,
    pub authorization: Option<String>,
    pub body: Value,
}

/// Start a programmable HTTP backend on an ephemeral port.
///
/// The handler sees each parsed request and returns the status and body.
pub async fn start_mock_kms<F, Fut>(handler: F) -> SocketAddr
where
    F: Fn(MockRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handler = Arc::new(handler);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let handler = handler.clone();
                    tokio::spawn(async move {
                        let request = match read_request(&mut socket).await {
                            Some(request) => request,
                            None => return,
                        };
                        let (status, body) = handler(request).await;
                        let status_text = match status {
                            200 => "200 OK",
                            400 => "400 Bad Request",
                            403 => "403 Forbidden",
                            404 => "404 Not Found",
                            500 => "500 Internal Server Error",
                            503 => "503 Service Unavailable",
                            _ => "200 OK",
                        };

                        let response = format!(
                            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status_text,
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

async fn read_request(socket: &mut TcpStream) -> Option<MockRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.lines();
    let path = lines.next()?.split_whitespace().nth(1)?.to_string();

    let mut content_length = 0usize;
    let mut authorization = None;
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            let value = value.trim();
            match name.trim().to_ascii_lowercase().as_str() {
                "content-length" => content_length = value.parse().ok()?,
                "authorization" => authorization = Some(value.to_string()),
                _ => {}
            }
        }
    }

    while buf.len() < header_end + content_length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let body = serde_json::from_slice(&buf[header_end..header_end + content_length])
        .unwrap_or(Value::Null);
    Some(MockRequest {
        path,
        authorization,
        body,
    })
}

/// Key service behaviour with a reversible stand-in for real encryption.
pub fn mock_kms_response(request: &MockRequest) -> (u16, String) {
    use base64::{engine::general_purpose::STANDARD, Engine};

    if request.path.ends_with(":encrypt") {
        let plaintext = request.body["plaintext"].as_str().unwrap_or_default();
        let ciphertext = STANDARD.encode(format!("wrapped:{}", plaintext));
        (200, serde_json::json!({ "ciphertext": ciphertext }).to_string())
    } else if request.path.ends_with(":decrypt") {
        let ciphertext = request.body["ciphertext"].as_str().unwrap_or_default();
        let decoded = STANDARD
            .decode(ciphertext)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok());
        match decoded.as_deref().and_then(|s| s.strip_prefix("wrapped:")) {
            Some(plaintext) => (200, serde_json::json!({ "plaintext": plaintext }).to_string()),
            None => (400, r#"{"error":"invalid ciphertext"}"#.to_string()),
        }
    } else {
        (404, r#"{"error":"not found"}"#.to_string())
    }
}
