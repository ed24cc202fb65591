//! # Download Manager
//!
//! Makes the audio files of a book available on local disk.
//!
//! Requests are answered from a per-book availability map first, then from
//! the [`DiskCache`], and only then queued for download. A single worker
//! task drains the queue in strict FIFO order, one transfer at a time:
//!
//! ```text
//! request() ──> availability map ──> DiskCache::resolve ──> mpsc queue
//!                                                              │
//!                       ┌──────────────────────────────────────┘
//!                       ▼
//!                 download worker ── ContentSource::download_stream
//!                       │              └─> <fp>.part ─rename─> <fp>.audio
//!                       ├─> PlayerEvent::DownloadProgress (per whole percent)
//!                       ├─> DiskCache::reclaim_space
//!                       └─> completion signal (blocking requests)
//! ```
//!
//! Blocking requests wait for their completion signal with a bounded
//! timeout. Failed downloads leave no partial file behind and are not
//! retried.

use crate::cache::{
    config::CacheConfig,
    fingerprint::book_fingerprint,
    stats::DownloadProgress,
    store::DiskCache,
};
use crate::error::{PlaybackError, Result};
use crate::model::Book;
use bridge_traits::ContentSource;
use core_runtime::events::{EventBus, PlayerEvent};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};

const READ_CHUNK_BYTES: usize = 64 * 1024;

/// How a caller waits for a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadMode {
    /// Wait until the file is on disk (bounded by `download_wait_timeout`).
    Blocking,
    /// Queue the download and return immediately.
    Background,
}

/// Result of a [`DownloadManager::request`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileAvailability {
    Ready(PathBuf),
    Queued,
}

impl FileAvailability {
    pub fn path(&self) -> Option<&Path> {
        match self {
            FileAvailability::Ready(path) => Some(path),
            FileAvailability::Queued => None,
        }
    }
}

/// One queued transfer.
#[derive(Debug)]
pub struct DownloadTask {
    pub book_id: String,
    pub file_index: usize,
    pub content_url: String,
    pub fingerprint: String,
    /// Size reported by the server, used when the response has no length.
    pub expected_bytes: u64,
    completion: Option<oneshot::Sender<Result<PathBuf>>>,
}

struct Shared {
    config: CacheConfig,
    store: DiskCache,
    source: Arc<dyn ContentSource>,
    events: EventBus,
    /// book id -> file index -> local path
    available: Mutex<HashMap<String, HashMap<usize, PathBuf>>>,
    downloading: AtomicBool,
    active: Mutex<Option<DownloadProgress>>,
    queued: AtomicUsize,
}

/// Single-worker FIFO downloader in front of the disk cache.
pub struct DownloadManager {
    shared: Arc<Shared>,
    queue: Mutex<Option<mpsc::UnboundedSender<DownloadTask>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl DownloadManager {
    /// Create the manager and spawn its worker on the current Tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`PlaybackError::Config`] for an invalid [`CacheConfig`]
    /// - [`PlaybackError::Runtime`] when called outside a Tokio runtime
    pub fn new(
        config: CacheConfig,
        source: Arc<dyn ContentSource>,
        events: EventBus,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|e| PlaybackError::Config(format!("Invalid cache configuration: {}", e)))?;

        let handle = tokio::runtime::Handle::try_current().map_err(|_| {
            core_runtime::Error::CapabilityMissing {
                capability: "TokioRuntime".to_string(),
                message: "DownloadManager must be created inside a Tokio runtime".to_string(),
            }
        })?;

        let shared = Arc::new(Shared {
            store: DiskCache::new(&config),
            config,
            source,
            events,
            available: Mutex::new(HashMap::new()),
            downloading: AtomicBool::new(false),
            active: Mutex::new(None),
            queued: AtomicUsize::new(0),
        });

        let (sender, receiver) = mpsc::unbounded_channel();
        let worker = handle.spawn(run_worker(Arc::clone(&shared), receiver));

        Ok(Self {
            shared,
            queue: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.shared.config
    }

    /// The underlying disk cache, for maintenance (stats, purge, clear).
    pub fn store(&self) -> &DiskCache {
        &self.shared.store
    }

    /// Make file `file_index` of `book` available locally.
    ///
    /// Already available files are returned without touching the queue.
    /// Blocking requests re-check that a previously registered file still
    /// exists on disk and fetch it again if it was evicted.
    ///
    /// # Errors
    ///
    /// - [`PlaybackError::InvalidFileIndex`] for an out-of-range index
    /// - [`PlaybackError::Timeout`] when a blocking wait expires
    /// - [`PlaybackError::Download`] when the transfer failed
    #[instrument(skip(self, book), fields(book_id = %book.id))]
    pub async fn request(
        &self,
        book: &Book,
        file_index: usize,
        mode: DownloadMode,
    ) -> Result<FileAvailability> {
        let Some(file) = book.file(file_index) else {
            return Err(PlaybackError::InvalidFileIndex {
                index: file_index,
                count: book.files.len(),
            });
        };

        if let Some(path) = self.cached_path(&book.id, file_index) {
            if mode == DownloadMode::Background || path_exists(&path).await {
                return Ok(FileAvailability::Ready(path));
            }
            warn!(file_index, "Registered file vanished from disk, fetching again");
            self.forget_file(&book.id, file_index);
        }

        let fingerprint =
            book_fingerprint(book, file_index, self.shared.config.fingerprint_scheme);

        if let Some(path) = self.shared.store.resolve(&fingerprint).await {
            debug!(file_index, fingerprint = %fingerprint, "Cache hit");
            self.shared.register(&book.id, file_index, path.clone());
            return Ok(FileAvailability::Ready(path));
        }

        let (completion, receiver) = match mode {
            DownloadMode::Blocking => {
                let (tx, rx) = oneshot::channel();
                (Some(tx), Some(rx))
            }
            DownloadMode::Background => (None, None),
        };

        self.enqueue(DownloadTask {
            book_id: book.id.clone(),
            file_index,
            content_url: file.content_url.clone(),
            fingerprint,
            expected_bytes: file.byte_len,
            completion,
        })?;

        let Some(receiver) = receiver else {
            return Ok(FileAvailability::Queued);
        };

        let wait = self.shared.config.download_wait_timeout;
        match timeout(wait, receiver).await {
            Ok(Ok(result)) => result.map(FileAvailability::Ready),
            Ok(Err(_)) => Err(PlaybackError::Internal(
                "download worker dropped the request".to_string(),
            )),
            Err(_) => {
                warn!(file_index, ?wait, "Gave up waiting for download");
                Err(PlaybackError::timeout("download", wait))
            }
        }
    }

    /// Local path of a file already registered as available.
    pub fn cached_path(&self, book_id: &str, file_index: usize) -> Option<PathBuf> {
        self.shared
            .available
            .lock()
            .get(book_id)
            .and_then(|files| files.get(&file_index))
            .cloned()
    }

    pub fn is_available(&self, book_id: &str, file_index: usize) -> bool {
        self.cached_path(book_id, file_index).is_some()
    }

    /// Drop availability records of a book. Files stay on disk.
    pub fn forget_book(&self, book_id: &str) {
        self.shared.available.lock().remove(book_id);
    }

    pub fn forget_file(&self, book_id: &str, file_index: usize) {
        if let Some(files) = self.shared.available.lock().get_mut(book_id) {
            files.remove(&file_index);
        }
    }

    /// Whether the worker is transferring right now.
    pub fn is_downloading(&self) -> bool {
        self.shared.downloading.load(Ordering::SeqCst)
    }

    /// Progress of the running transfer.
    pub fn active_download(&self) -> Option<DownloadProgress> {
        self.shared.active.lock().clone()
    }

    /// Tasks waiting behind the running transfer.
    pub fn queue_len(&self) -> usize {
        self.shared.queued.load(Ordering::SeqCst)
    }

    /// Close the queue and wait for the worker to drain it.
    pub async fn shutdown(&self) {
        self.queue.lock().take();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                error!(error = %e, "Download worker terminated abnormally");
            }
        }
    }

    fn enqueue(&self, task: DownloadTask) -> Result<()> {
        let queue = self.queue.lock();
        let Some(sender) = queue.as_ref() else {
            return Err(PlaybackError::Internal(
                "download manager is shut down".to_string(),
            ));
        };

        debug!(file_index = task.file_index, "Queued download");
        self.shared.queued.fetch_add(1, Ordering::SeqCst);
        sender.send(task).map_err(|_| {
            self.shared.queued.fetch_sub(1, Ordering::SeqCst);
            PlaybackError::Internal("download queue closed".to_string())
        })
    }
}

impl std::fmt::Debug for DownloadManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadManager")
            .field("cache_dir", &self.shared.store.dir())
            .field("is_downloading", &self.is_downloading())
            .field("queue_len", &self.queue_len())
            .finish()
    }
}

async fn run_worker(shared: Arc<Shared>, mut receiver: mpsc::UnboundedReceiver<DownloadTask>) {
    match shared.store.remove_partials().await {
        Ok(0) => {}
        Ok(removed) => info!(removed, "Removed interrupted downloads"),
        Err(e) => warn!(error = %e, "Failed to scan cache for partial downloads"),
    }

    while let Some(mut task) = receiver.recv().await {
        shared.queued.fetch_sub(1, Ordering::SeqCst);
        let result = shared.process(&task).await;
        if let Some(completion) = task.completion.take() {
            // Receiver gone means the caller timed out; nothing to do.
            let _ = completion.send(result);
        }
    }

    debug!("Download worker exiting");
}

impl Shared {
    fn register(&self, book_id: &str, file_index: usize, path: PathBuf) {
        self.available
            .lock()
            .entry(book_id.to_string())
            .or_default()
            .insert(file_index, path);
    }

    fn registered(&self, book_id: &str, file_index: usize) -> Option<PathBuf> {
        self.available
            .lock()
            .get(book_id)
            .and_then(|files| files.get(&file_index))
            .cloned()
    }

    #[instrument(skip(self, task), fields(book_id = %task.book_id, file_index = task.file_index))]
    async fn process(&self, task: &DownloadTask) -> Result<PathBuf> {
        // Duplicates queued before the first copy finished end here.
        if let Some(path) = self.registered(&task.book_id, task.file_index) {
            if path_exists(&path).await {
                return Ok(path);
            }
        }
        if let Some(path) = self.store.resolve(&task.fingerprint).await {
            self.register(&task.book_id, task.file_index, path.clone());
            return Ok(path);
        }

        info!("Downloading");
        self.downloading.store(true, Ordering::SeqCst);
        *self.active.lock() = Some(DownloadProgress::new(
            task.book_id.clone(),
            task.file_index,
            Some(task.expected_bytes),
        ));

        let temp = self.store.temp_path(&task.fingerprint);
        let limit = self.config.transfer_timeout;
        let result = match timeout(limit, self.transfer(task, &temp)).await {
            Ok(result) => result,
            Err(_) => Err(PlaybackError::timeout("transfer", limit)),
        };

        self.downloading.store(false, Ordering::SeqCst);
        *self.active.lock() = None;

        match result {
            Ok(path) => {
                info!("Download complete");
                self.register(&task.book_id, task.file_index, path.clone());
                let _ = self.events.emit(PlayerEvent::DownloadCompleted {
                    book_id: task.book_id.clone(),
                    file_index: task.file_index,
                });
                if let Err(e) = self.store.reclaim_space_protecting(Some(&path)).await {
                    warn!(error = %e, "Cache space reclamation failed");
                }
                Ok(path)
            }
            Err(e) => {
                self.store.discard(&temp).await;
                let err = match e {
                    PlaybackError::Download { .. } | PlaybackError::Timeout { .. } => e,
                    other => PlaybackError::Download {
                        file_index: task.file_index,
                        message: other.to_string(),
                    },
                };
                error!(error = %err, "Download failed");
                let _ = self.events.emit(PlayerEvent::DownloadFailed {
                    book_id: task.book_id.clone(),
                    file_index: task.file_index,
                    message: err.to_string(),
                });
                Err(err)
            }
        }
    }

    async fn transfer(&self, task: &DownloadTask, temp: &Path) -> Result<PathBuf> {
        self.store.ensure_dir().await?;

        let stream = self.source.download_stream(&task.content_url).await?;
        let announced = stream.content_length;
        if let (Some(length), Some(active)) = (announced, self.active.lock().as_mut()) {
            if length > 0 {
                active.total_bytes = Some(length);
            }
        }

        let mut reader = stream.reader;
        let mut file = tokio::fs::File::create(temp).await?;
        let mut buffer = vec![0u8; READ_CHUNK_BYTES];
        let mut downloaded: u64 = 0;

        loop {
            let read = reader.read(&mut buffer).await?;
            if read == 0 {
                break;
            }
            file.write_all(&buffer[..read]).await?;
            downloaded += read as u64;

            let advanced = self
                .active
                .lock()
                .as_mut()
                .and_then(|progress| progress.update(downloaded));
            if let Some(percent) = advanced {
                let _ = self.events.emit(PlayerEvent::DownloadProgress {
                    file_index: task.file_index,
                    percent,
                });
            }
        }

        file.flush().await?;
        drop(file);

        if let Some(expected) = announced {
            if downloaded < expected {
                return Err(PlaybackError::Download {
                    file_index: task.file_index,
                    message: format!("connection closed after {} of {} bytes", downloaded, expected),
                });
            }
        }

        self.store.finalize(temp, &task.fingerprint).await
    }
}

async fn path_exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}
