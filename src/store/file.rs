use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::debug;

use super::{HistoryEntry, PageRef, PersistenceGateway, StoreFuture, VaultEntry};
use crate::error::{PipelineError, PipelineResult};
use crate::geometry::NormalizedRegion;
use crate::recognition::RecognitionResult;
use crate::session::Session;

#[derive(Debug, Serialize, Deserialize, Default)]
struct StoreDocument {
    #[serde(default)]
    histories: Vec<HistoryRow>,
    #[serde(default)]
    vault: Vec<VaultRow>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct HistoryRow {
    user_id: String,
    #[serde(flatten)]
    entry: HistoryEntry,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct VaultRow {
    user_id: String,
    #[serde(flatten)]
    entry: VaultEntry,
}

/// JSON document store shared by all users on this machine; each row is
/// owned by the user that created it.
#[derive(Debug)]
pub struct FileGateway {
    path: PathBuf,
    session: Option<Session>,
    lock: Arc<Mutex<()>>,
}

impl FileGateway {
    pub fn new(path: impl Into<PathBuf>, session: Option<Session>) -> Self {
        Self {
            path: path.into(),
            session,
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn user_id(&self) -> PipelineResult<String> {
        self.session
            .as_ref()
            .map(|session| session.user_id.clone())
            .ok_or(PipelineError::NotAuthenticated)
    }

    /// Reads, edits and rewrites the document on the blocking pool.
    async fn update<T, A>(&self, apply: A) -> PipelineResult<T>
    where
        T: Send + 'static,
        A: FnOnce(&str, &mut StoreDocument) -> PipelineResult<T> + Send + 'static,
    {
        let user_id = self.user_id()?;
        let path = self.path.clone();
        let lock = Arc::clone(&self.lock);
        tokio::task::spawn_blocking(move || {
            let _guard = lock
                .lock()
                .map_err(|_| PipelineError::Persistence("store lock poisoned".to_string()))?;
            let mut document = read_document(&path).map_err(persistence_error)?;
            let value = apply(&user_id, &mut document)?;
            write_document(&path, &document).map_err(persistence_error)?;
            Ok(value)
        })
        .await
        .map_err(|err| PipelineError::persistence(format!("store task failed: {}", err)))?
    }

    async fn view<T, R>(&self, read: R) -> PipelineResult<T>
    where
        T: Send + 'static,
        R: FnOnce(&str, StoreDocument) -> T + Send + 'static,
    {
        let user_id = self.user_id()?;
        let path = self.path.clone();
        let lock = Arc::clone(&self.lock);
        tokio::task::spawn_blocking(move || {
            let _guard = lock
                .lock()
                .map_err(|_| PipelineError::Persistence("store lock poisoned".to_string()))?;
            let document = read_document(&path).map_err(persistence_error)?;
            Ok(read(&user_id, document))
        })
        .await
        .map_err(|err| PipelineError::persistence(format!("store task failed: {}", err)))?
    }
}

impl PersistenceGateway for FileGateway {
    fn create_history_entry<'a>(
        &'a self,
        region: NormalizedRegion,
        page: &'a PageRef,
        result: &'a RecognitionResult,
    ) -> StoreFuture<'a, String> {
        let page = page.clone();
        let result = result.clone();
        Box::pin(async move {
            self.update(move |user_id, document| {
                let id = new_id(user_id);
                document.histories.insert(
                    0,
                    HistoryRow {
                        user_id: user_id.to_string(),
                        entry: HistoryEntry {
                            id: id.clone(),
                            page: page.clone(),
                            region,
                            result,
                            visible: true,
                            created_at: now_rfc3339(),
                        },
                    },
                );
                debug!("history entry {} created for page {}", id, page);
                Ok(id)
            })
            .await
        })
    }

    fn set_history_visibility<'a>(&'a self, id: &'a str, visible: bool) -> StoreFuture<'a, ()> {
        let id = id.to_string();
        Box::pin(async move {
            self.update(move |user_id, document| {
                let row = document
                    .histories
                    .iter_mut()
                    .find(|row| row.user_id == user_id && row.entry.id == id.as_str())
                    .ok_or_else(|| not_found("history entry", &id))?;
                row.entry.visible = visible;
                Ok(())
            })
            .await
        })
    }

    fn delete_history_entry<'a>(&'a self, id: &'a str) -> StoreFuture<'a, ()> {
        let id = id.to_string();
        Box::pin(async move {
            self.update(move |user_id, document| {
                let before = document.histories.len();
                document
                    .histories
                    .retain(|row| !(row.user_id == user_id && row.entry.id == id.as_str()));
                if document.histories.len() == before {
                    return Err(not_found("history entry", &id));
                }
                Ok(())
            })
            .await
        })
    }

    fn create_vault_entry<'a>(
        &'a self,
        result: &'a RecognitionResult,
    ) -> StoreFuture<'a, String> {
        let result = result.clone();
        Box::pin(async move {
            self.update(move |user_id, document| {
                let id = new_id(user_id);
                document.vault.insert(
                    0,
                    VaultRow {
                        user_id: user_id.to_string(),
                        entry: VaultEntry {
                            id: id.clone(),
                            original: result.text,
                            translated: result.translated,
                            phonetic: result.phonetic,
                            created_at: now_rfc3339(),
                        },
                    },
                );
                debug!("vault entry {} created", id);
                Ok(id)
            })
            .await
        })
    }

    fn delete_vault_entry<'a>(&'a self, id: &'a str) -> StoreFuture<'a, ()> {
        let id = id.to_string();
        Box::pin(async move {
            self.update(move |user_id, document| {
                let before = document.vault.len();
                document
                    .vault
                    .retain(|row| !(row.user_id == user_id && row.entry.id == id.as_str()));
                if document.vault.len() == before {
                    return Err(not_found("vault entry", &id));
                }
                Ok(())
            })
            .await
        })
    }

    fn list_history_for_page<'a>(
        &'a self,
        page: &'a PageRef,
    ) -> StoreFuture<'a, Vec<HistoryEntry>> {
        let page = page.clone();
        Box::pin(async move {
            self.view(move |user_id, document| {
                document
                    .histories
                    .into_iter()
                    .filter(|row| row.user_id == user_id && row.entry.page == page)
                    .map(|row| row.entry)
                    .collect()
            })
            .await
        })
    }

    fn list_vault<'a>(&'a self) -> StoreFuture<'a, Vec<VaultEntry>> {
        Box::pin(async move {
            self.view(|user_id, document| {
                document
                    .vault
                    .into_iter()
                    .filter(|row| row.user_id == user_id)
                    .map(|row| row.entry)
                    .collect()
            })
            .await
        })
    }
}

fn read_document(path: &Path) -> Result<StoreDocument> {
    if !path.exists() {
        return Ok(StoreDocument::default());
    }
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read store: {}", path.display()))?;
    if content.trim().is_empty() {
        return Ok(StoreDocument::default());
    }
    serde_json::from_str(&content)
        .with_context(|| format!("failed to parse store JSON: {}", path.display()))
}

fn write_document(path: &Path, document: &StoreDocument) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).with_context(|| "failed to create store directory")?;
    }
    let content = serde_json::to_string_pretty(document)?;
    fs::write(path, content)
        .with_context(|| format!("failed to write store: {}", path.display()))?;
    Ok(())
}

fn persistence_error(err: anyhow::Error) -> PipelineError {
    PipelineError::persistence(format!("{:#}", err))
}

fn not_found(kind: &str, id: &str) -> PipelineError {
    PipelineError::Persistence(format!("{} {} not found", kind, id))
}

fn new_id(user_id: &str) -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_nanos();
    let seed = format!("{}:{}:{}", user_id, nanos, seq);
    format!("{:x}", md5::compute(seed.as_bytes()))
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| OffsetDateTime::now_utc().unix_timestamp().to_string())
}
