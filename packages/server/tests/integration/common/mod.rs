use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::HeaderMap;
use serde_json::Value;
use tempfile::TempDir;
use tokio::sync::Semaphore;

use common::storage::filesystem::FilesystemBlobStore;
use common::storage::{BlobStore, ContentHash};
use common::{HashLocks, MetadataLedger, StorageConfig};
use server::config::{
    AppConfig, CorsConfig, DatabaseConfig, RecoveryConfig, ServerConfig,
};
use server::ledger::SeaOrmLedger;
use server::service::ObjectStore;
use server::state::AppState;
use worker::{
    JobQueue, MANIFEST_NAME, ProcessingError, TranscodeOutput, Transcoder, WorkerConfig,
    WorkerPool,
};

pub mod routes {
    pub const FILES: &str = "/api/v1/files";

    pub fn file(id: &str) -> String {
        format!("/api/v1/files/{id}")
    }

    pub fn content(id: &str) -> String {
        format!("/api/v1/files/{id}/content")
    }

    pub fn stream(id: &str, path: &str) -> String {
        format!("/api/v1/files/{id}/stream/{path}")
    }
}

/// PNG signature followed by `seed`, so different seeds hash differently.
pub fn png(seed: &[u8]) -> Vec<u8> {
    let mut data = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    data.extend_from_slice(seed);
    data
}

/// An `ftyp` box header followed by `seed`.
pub fn mp4(seed: &[u8]) -> Vec<u8> {
    let mut data = vec![0x00, 0x00, 0x00, 0x18];
    data.extend_from_slice(b"ftypisom");
    data.extend_from_slice(seed);
    data
}

/// Stands in for ffmpeg. Each call waits for a permit when gated.
#[derive(Default)]
pub struct FakeTranscoder {
    gate: Option<Semaphore>,
    fail: AtomicBool,
    calls: AtomicUsize,
}

impl FakeTranscoder {
    pub fn gated() -> Arc<Self> {
        Arc::new(Self {
            gate: Some(Semaphore::new(0)),
            ..Default::default()
        })
    }

    pub fn failing() -> Arc<Self> {
        let transcoder = Self::default();
        transcoder.fail.store(true, Ordering::SeqCst);
        Arc::new(transcoder)
    }

    /// Let `n` gated jobs proceed.
    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn transcode(
        &self,
        _source: &Path,
        output_dir: &Path,
    ) -> Result<TranscodeOutput, ProcessingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate closed").forget();
        }

        if self.fail.load(Ordering::SeqCst) {
            return Err(ProcessingError::ExitStatus {
                code: Some(1),
                output: "Invalid data found when processing input".into(),
            });
        }

        let manifest = output_dir.join(MANIFEST_NAME);
        tokio::fs::write(
            &manifest,
            "#EXTM3U\n#EXT-X-TARGETDURATION:10\n#EXTINF:10.0,\nindex0.ts\n#EXT-X-ENDLIST\n",
        )
        .await
        .map_err(ProcessingError::OutputDir)?;
        tokio::fs::write(output_dir.join("index0.ts"), [0x47u8; 188])
            .await
            .map_err(ProcessingError::OutputDir)?;

        Ok(TranscodeOutput {
            manifest,
            log: String::new(),
        })
    }
}

pub struct TestOptions {
    pub transcoder: Arc<FakeTranscoder>,
    pub workers: usize,
    pub queue_capacity: usize,
    pub max_upload_size: u64,
}

impl Default for TestOptions {
    fn default() -> Self {
        Self {
            transcoder: Arc::new(FakeTranscoder::default()),
            workers: 2,
            queue_capacity: 16,
            max_upload_size: 1 << 20,
        }
    }
}

/// A running test server backed by a temporary directory and an in-memory
/// SQLite ledger.
pub struct TestApp {
    pub addr: SocketAddr,
    pub client: Client,
    pub store: ObjectStore,
    pub transcoder: Arc<FakeTranscoder>,
    _pool: WorkerPool,
    _dir: TempDir,
}

/// Parsed HTTP response for test assertions.
pub struct TestResponse {
    pub status: u16,
    pub headers: HeaderMap,
    /// Raw response body.
    pub bytes: Vec<u8>,
    /// Parsed JSON body, or `Null` if the response is not valid JSON.
    pub body: Value,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with(TestOptions::default()).await
    }

    pub async fn spawn_with(options: TestOptions) -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");

        let app_config = AppConfig {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
                cors: CorsConfig::default(),
            },
            database: DatabaseConfig {
                url: "sqlite::memory:".to_string(),
            },
            storage: StorageConfig {
                root: dir.path().join("store"),
                max_upload_size: options.max_upload_size,
                max_video_upload_size: options.max_upload_size,
                ..Default::default()
            },
            worker: WorkerConfig {
                workers: options.workers,
                queue_capacity: options.queue_capacity,
                max_retries: 0,
                ..Default::default()
            },
            recovery: RecoveryConfig {
                enabled: false,
                ..Default::default()
            },
        };

        let db = server::database::init_db(&app_config.database.url)
            .await
            .expect("Failed to initialize database");
        let ledger: Arc<dyn MetadataLedger> = Arc::new(SeaOrmLedger::new(db));
        let blobs: Arc<dyn BlobStore> = Arc::new(
            FilesystemBlobStore::new(&app_config.storage.root)
                .await
                .expect("Failed to open blob store"),
        );

        let locks = HashLocks::new();
        let (queue, receiver) = JobQueue::bounded(app_config.worker.queue_capacity);
        let pool = WorkerPool::spawn(
            &app_config.worker,
            receiver,
            Arc::clone(&ledger),
            options.transcoder.clone(),
            locks.clone(),
        );

        let store = ObjectStore::new(blobs, ledger, queue, locks, app_config.storage.clone());
        let state = AppState {
            store: store.clone(),
            config: app_config,
        };
        let app = server::build_router(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            client: Client::new(),
            store,
            transcoder: options.transcoder,
            _pool: pool,
            _dir: dir,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn upload(
        &self,
        owner: &str,
        file_name: &str,
        mime_type: &str,
        file_bytes: Vec<u8>,
    ) -> TestResponse {
        let part = reqwest::multipart::Part::bytes(file_bytes)
            .file_name(file_name.to_string())
            .mime_str(mime_type)
            .expect("Failed to set MIME type");
        let form = reqwest::multipart::Form::new().part("file", part);

        let res = self
            .client
            .post(self.url(routes::FILES))
            .header("X-User-Id", owner)
            .multipart(form)
            .send()
            .await
            .expect("Failed to send multipart upload request");

        TestResponse::from_response(res).await
    }

    /// Upload and assert success, returning the file id.
    pub async fn upload_ok(
        &self,
        owner: &str,
        file_name: &str,
        mime_type: &str,
        file_bytes: Vec<u8>,
    ) -> String {
        let res = self.upload(owner, file_name, mime_type, file_bytes).await;
        assert_eq!(res.status, 201, "upload failed: {}", res.text());
        res.id()
    }

    pub async fn get(&self, path: &str, owner: &str) -> TestResponse {
        self.get_with_headers(path, owner, &[]).await
    }

    pub async fn get_with_headers(
        &self,
        path: &str,
        owner: &str,
        headers: &[(&str, &str)],
    ) -> TestResponse {
        let mut req = self.client.get(self.url(path)).header("X-User-Id", owner);
        for (name, value) in headers {
            req = req.header(*name, *value);
        }
        let res = req.send().await.expect("Failed to send GET request");

        TestResponse::from_response(res).await
    }

    pub async fn get_without_owner(&self, path: &str) -> TestResponse {
        let res = self
            .client
            .get(self.url(path))
            .send()
            .await
            .expect("Failed to send GET request");

        TestResponse::from_response(res).await
    }

    pub async fn delete(&self, path: &str, owner: &str) -> TestResponse {
        let res = self
            .client
            .delete(self.url(path))
            .header("X-User-Id", owner)
            .send()
            .await
            .expect("Failed to send DELETE request");

        TestResponse::from_response(res).await
    }

    /// Current status string of a file as seen by its owner.
    pub async fn status_of(&self, id: &str, owner: &str) -> String {
        let res = self.get(&routes::file(id), owner).await;
        assert_eq!(res.status, 200, "get failed: {}", res.text());
        res.body["status"]
            .as_str()
            .expect("response should contain 'status'")
            .to_string()
    }

    /// Poll until the file reaches `status`, failing after a few seconds.
    pub async fn wait_for_status(&self, id: &str, owner: &str, status: &str) {
        let mut last = String::new();
        for _ in 0..250 {
            last = self.status_of(id, owner).await;
            if last == status {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("file {id} stuck in '{last}', expected '{status}'");
    }

    /// Directory holding the original and derived output for `hash_hex`.
    pub fn blob_dir(&self, hash_hex: &str) -> PathBuf {
        let hash = ContentHash::from_hex(hash_hex).expect("invalid hash");
        self.store.blobs().address_for(&hash)
    }

    pub async fn references(&self, hash_hex: &str) -> u64 {
        let hash = ContentHash::from_hex(hash_hex).expect("invalid hash");
        self.store
            .ledger()
            .count_by_hash(&hash)
            .await
            .expect("count_by_hash failed")
    }
}

impl TestResponse {
    pub async fn from_response(res: reqwest::Response) -> Self {
        let status = res.status().as_u16();
        let headers = res.headers().clone();
        let bytes = res.bytes().await.map(|b| b.to_vec()).unwrap_or_default();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        Self {
            status,
            headers,
            bytes,
            body,
        }
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn id(&self) -> String {
        self.body["id"]
            .as_str()
            .expect("response body should contain 'id'")
            .to_string()
    }

    pub fn content_hash(&self) -> String {
        self.body["content_hash"]
            .as_str()
            .expect("response body should contain 'content_hash'")
            .to_string()
    }

    pub fn code(&self) -> &str {
        self.body["code"].as_str().unwrap_or_default()
    }
}
