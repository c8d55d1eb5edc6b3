#![allow(dead_code)]

use async_trait::async_trait;
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse, HttpStreamResponse, RetryPolicy};
use bridge_traits::storage::{FileMetadata, FileSystemAccess};
use bridge_traits::time::SystemClock;
use bytes::Bytes;
use core_remote::{
    MediaFetcher, MusicService, RequestExecutor, ResponseCache, ServerEndpoint, ServerVersion,
};
use core_runtime::config::{NetworkConfig, PlaybackConfig};
use mockall::mock;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

mock! {
    pub Http {}

    #[async_trait]
    impl HttpClient for Http {
        async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse>;
        async fn execute_stream(&self, request: HttpRequest) -> BridgeResult<HttpStreamResponse>;
    }
}

// ============================================================================
// Responses
// ============================================================================

/// `{"subsonic-response": {"status":"ok","version":<version>, <fields>}}`
pub fn ok_envelope(version: &str, fields: &str) -> HttpResponse {
    let separator = if fields.is_empty() { "" } else { "," };
    let body = format!(
        r#"{{"subsonic-response":{{"status":"ok","version":"{}"{}{}}}}}"#,
        version, separator, fields
    );
    HttpResponse::new(200, body).with_header("Content-Type", "application/json")
}

pub fn failed_envelope(code: i32, message: &str) -> String {
    format!(
        r#"{{"subsonic-response":{{"status":"failed","version":"1.16.1","error":{{"code":{},"message":"{}"}}}}}}"#,
        code, message
    )
}

pub fn binary_stream(status: u16, content_type: &str, body: &[u8]) -> HttpStreamResponse {
    let mut headers = HashMap::new();
    headers.insert("Content-Type".to_string(), content_type.to_string());
    HttpStreamResponse {
        status,
        headers,
        content_length: Some(body.len() as u64),
        body: Box::new(io::Cursor::new(body.to_vec())),
    }
}

pub fn connection_reset() -> BridgeError {
    BridgeError::Connection("connection reset by peer".to_string())
}

// ============================================================================
// In-memory file system
// ============================================================================

type Files = Arc<Mutex<HashMap<PathBuf, Vec<u8>>>>;

#[derive(Clone, Default)]
pub struct MemoryFs {
    pub files: Files,
    pub writes: Arc<AtomicUsize>,
}

impl MemoryFs {
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn paths_under(&self, dir: &str) -> Vec<PathBuf> {
        self.files
            .lock()
            .keys()
            .filter(|p| p.starts_with(dir))
            .cloned()
            .collect()
    }
}

struct MemoryWriter {
    path: PathBuf,
    files: Files,
}

impl core_async::io::AsyncWrite for MemoryWriter {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        self.files
            .lock()
            .entry(self.path.clone())
            .or_default()
            .extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

fn missing(path: &Path) -> BridgeError {
    BridgeError::Io(io::Error::new(
        io::ErrorKind::NotFound,
        path.display().to_string(),
    ))
}

#[async_trait]
impl FileSystemAccess for MemoryFs {
    async fn get_cache_directory(&self) -> BridgeResult<PathBuf> {
        Ok(PathBuf::from("/cache"))
    }

    async fn get_data_directory(&self) -> BridgeResult<PathBuf> {
        Ok(PathBuf::from("/data"))
    }

    async fn exists(&self, path: &Path) -> BridgeResult<bool> {
        Ok(self.files.lock().contains_key(path))
    }

    async fn metadata(&self, path: &Path) -> BridgeResult<FileMetadata> {
        let files = self.files.lock();
        let data = files.get(path).ok_or_else(|| missing(path))?;
        Ok(FileMetadata {
            size: data.len() as u64,
            modified_at: None,
            is_directory: false,
        })
    }

    async fn create_dir_all(&self, _path: &Path) -> BridgeResult<()> {
        Ok(())
    }

    async fn read_file(&self, path: &Path) -> BridgeResult<Bytes> {
        let files = self.files.lock();
        let data = files.get(path).ok_or_else(|| missing(path))?;
        Ok(Bytes::from(data.clone()))
    }

    async fn write_file(&self, path: &Path, data: Bytes) -> BridgeResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.files.lock().insert(path.to_path_buf(), data.to_vec());
        Ok(())
    }

    async fn delete_file(&self, path: &Path) -> BridgeResult<()> {
        self.files.lock().remove(path);
        Ok(())
    }

    async fn rename(&self, from: &Path, to: &Path) -> BridgeResult<()> {
        let mut files = self.files.lock();
        let data = files.remove(from).ok_or_else(|| missing(from))?;
        files.insert(to.to_path_buf(), data);
        Ok(())
    }

    async fn open_read_stream(
        &self,
        path: &Path,
    ) -> BridgeResult<Box<dyn core_async::io::AsyncRead + Send + Unpin>> {
        let data = self.read_file(path).await?;
        Ok(Box::new(io::Cursor::new(data.to_vec())))
    }

    async fn open_write_stream(
        &self,
        path: &Path,
    ) -> BridgeResult<Box<dyn core_async::io::AsyncWrite + Send + Unpin>> {
        self.files.lock().insert(path.to_path_buf(), Vec::new());
        Ok(Box::new(MemoryWriter {
            path: path.to_path_buf(),
            files: Arc::clone(&self.files),
        }))
    }

    async fn open_append_stream(
        &self,
        path: &Path,
    ) -> BridgeResult<Box<dyn core_async::io::AsyncWrite + Send + Unpin>> {
        self.files.lock().entry(path.to_path_buf()).or_default();
        Ok(Box::new(MemoryWriter {
            path: path.to_path_buf(),
            files: Arc::clone(&self.files),
        }))
    }
}

// ============================================================================
// Wiring
// ============================================================================

pub const ARTWORK_DIR: &str = "/cache/artwork";
pub const RESPONSE_DIR: &str = "/cache/responses";

pub fn network(backoff: Duration) -> NetworkConfig {
    NetworkConfig {
        retry: RetryPolicy::default().with_backoff(backoff),
        ..NetworkConfig::default()
    }
}

pub fn build_service_with(
    http: MockHttp,
    fs: MemoryFs,
    network: NetworkConfig,
    playback: PlaybackConfig,
) -> MusicService {
    let server = ServerEndpoint::new("http://music.test", "alice", "secret", "1.8.0", "tests");
    let executor = Arc::new(RequestExecutor::new(Arc::new(http), server, network));
    let fs: Arc<dyn FileSystemAccess> = Arc::new(fs);
    let versions = Arc::new(ServerVersion::new());
    let cache = ResponseCache::new(Arc::clone(&fs), Arc::new(SystemClock), PathBuf::from(RESPONSE_DIR));
    let fetcher = Arc::new(MediaFetcher::new(
        Arc::clone(&executor),
        fs,
        Arc::clone(&versions),
        playback,
        PathBuf::from(ARTWORK_DIR),
    ));
    MusicService::new(executor, cache, fetcher, versions)
}

pub fn build_service(http: MockHttp, fs: MemoryFs) -> MusicService {
    build_service_with(http, fs, network(Duration::ZERO), PlaybackConfig::default())
}
