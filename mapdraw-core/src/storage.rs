//! Durable storage for serialized sketch documents.
//!
//! A storage instance belongs to one drawing session: the first successful
//! store allocates the file/admin ids and every later store overwrites the
//! same file.

use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

use crate::document::DocumentType;
use crate::error::{MapError, MapResult};

/// Ids handed out by a successful store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoreResult {
    /// Public id used to read the document back.
    pub file_id: String,
    /// Private id that authorizes overwriting the document.
    pub admin_id: String,
}

impl StoreResult {
    fn allocate() -> Self {
        Self {
            file_id: Uuid::new_v4().simple().to_string(),
            admin_id: Uuid::new_v4().simple().to_string(),
        }
    }
}

/// A document as read back from storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredDocument {
    /// Public file id.
    pub file_id: String,
    /// Private admin id.
    pub admin_id: String,
    /// Declared type of `data`.
    pub document_type: DocumentType,
    /// Last write, milliseconds since the Unix epoch.
    pub updated_ms: u64,
    /// The serialized document.
    pub data: String,
}

/// Persists serialized documents.
#[async_trait]
pub trait DocumentStorage: Send + Sync {
    /// Store a document.
    ///
    /// Returns `Ok(None)` when the document was not persisted because it is
    /// empty; that is not an error.
    async fn store(&self, document: &str, document_type: DocumentType) -> MapResult<Option<StoreResult>>;

    /// Read a document back by its public id.
    async fn load(&self, file_id: &str) -> MapResult<Option<StoredDocument>>;
}

/// One recorded call to [`MemoryDocumentStorage::store`].
#[derive(Debug, Clone)]
pub struct StoreRecord {
    /// The stored document.
    pub document: String,
    /// Its declared type.
    pub document_type: DocumentType,
    /// When the store happened (tokio clock, so paused tests see virtual time).
    pub at: Instant,
}

#[derive(Debug, Default)]
struct MemoryInner {
    ids: Option<StoreResult>,
    current: Option<StoredDocument>,
    history: Vec<StoreRecord>,
}

/// In-memory storage, used when embedded and in tests.
#[derive(Debug, Default)]
pub struct MemoryDocumentStorage {
    inner: Mutex<MemoryInner>,
}

impl MemoryDocumentStorage {
    /// Create an empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every successful store, oldest first.
    #[must_use]
    pub fn history(&self) -> Vec<StoreRecord> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).history.clone()
    }

    /// Number of successful stores.
    #[must_use]
    pub fn store_count(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).history.len()
    }
}

#[async_trait]
impl DocumentStorage for MemoryDocumentStorage {
    async fn store(&self, document: &str, document_type: DocumentType) -> MapResult<Option<StoreResult>> {
        if document.trim().is_empty() {
            return Ok(None);
        }
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let ids = inner.ids.get_or_insert_with(StoreResult::allocate).clone();
        inner.current = Some(StoredDocument {
            file_id: ids.file_id.clone(),
            admin_id: ids.admin_id.clone(),
            document_type,
            updated_ms: current_timestamp_ms(),
            data: document.to_string(),
        });
        inner.history.push(StoreRecord {
            document: document.to_string(),
            document_type,
            at: Instant::now(),
        });
        Ok(Some(ids))
    }

    async fn load(&self, file_id: &str) -> MapResult<Option<StoredDocument>> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(inner.current.clone().filter(|doc| doc.file_id == file_id))
    }
}

/// Storage writing one JSON envelope per document into a data directory.
///
/// Loading a document before anything was stored makes later stores
/// overwrite that document.
#[derive(Debug)]
pub struct FileDocumentStorage {
    data_dir: PathBuf,
    ids: tokio::sync::Mutex<Option<StoreResult>>,
}

impl FileDocumentStorage {
    /// Create a storage rooted at `data_dir`, creating the directory.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::Io`] if the directory cannot be created.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> MapResult<Self> {
        let data_dir = data_dir.into();
        std::fs::create_dir_all(&data_dir)?;
        Ok(Self {
            data_dir,
            ids: tokio::sync::Mutex::new(None),
        })
    }

    /// Continue writing to a document stored earlier.
    #[must_use]
    pub fn resume(self, ids: StoreResult) -> Self {
        Self {
            ids: tokio::sync::Mutex::new(Some(ids)),
            ..self
        }
    }

    /// The data directory.
    #[must_use]
    pub fn data_dir(&self) -> &PathBuf {
        &self.data_dir
    }

    /// Ids of the document this storage writes to, once allocated.
    pub async fn current_ids(&self) -> Option<StoreResult> {
        self.ids.lock().await.clone()
    }

    fn path_for(&self, file_id: &str) -> PathBuf {
        self.data_dir.join(format!("{}.json", sanitize_filename(file_id)))
    }
}

#[async_trait]
impl DocumentStorage for FileDocumentStorage {
    async fn store(&self, document: &str, document_type: DocumentType) -> MapResult<Option<StoreResult>> {
        if document.trim().is_empty() {
            return Ok(None);
        }
        // held across the write so two stores never allocate two files
        let mut ids = self.ids.lock().await;
        let current = ids.get_or_insert_with(StoreResult::allocate).clone();
        let envelope = StoredDocument {
            file_id: current.file_id.clone(),
            admin_id: current.admin_id.clone(),
            document_type,
            updated_ms: current_timestamp_ms(),
            data: document.to_string(),
        };
        let json = serde_json::to_string_pretty(&envelope)?;
        let path = self.path_for(&current.file_id);
        tokio::fs::write(&path, json).await?;
        tracing::info!(file_id = %current.file_id, path = %path.display(), "stored {document_type} document");
        Ok(Some(current))
    }

    async fn load(&self, file_id: &str) -> MapResult<Option<StoredDocument>> {
        let path = self.path_for(file_id);
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(MapError::Io(e)),
        };
        let doc: StoredDocument = serde_json::from_str(&contents)?;
        if doc.file_id != file_id {
            return Err(MapError::Storage(format!(
                "{} holds document {} instead of {file_id}",
                path.display(),
                doc.file_id
            )));
        }
        let mut ids = self.ids.lock().await;
        if ids.is_none() {
            tracing::debug!(file_id = %doc.file_id, "continuing loaded document");
            *ids = Some(StoreResult {
                file_id: doc.file_id.clone(),
                admin_id: doc.admin_id.clone(),
            });
        }
        Ok(Some(doc))
    }
}

/// Sanitize an id for use as a filename.
///
/// Replaces any character that is not alphanumeric, `-`, or `_` with `_`.
fn sanitize_filename(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Get the current Unix timestamp in milliseconds.
fn current_timestamp_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |d| {
        // Timestamp will not exceed u64 max for millennia
        #[allow(clippy::cast_possible_truncation)]
        {
            d.as_millis() as u64
        }
    })
}
