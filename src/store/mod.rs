//! Durable history and vault rows.
//!
//! Every call is attributed to the session the gateway was opened with;
//! without one, calls fail with `not authenticated`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;

use crate::error::PipelineResult;
use crate::geometry::NormalizedRegion;
use crate::recognition::RecognitionResult;

mod file;

pub use file::FileGateway;

/// A page of a chapter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageRef {
    pub chapter_id: String,
    pub page_index: u32,
}

impl PageRef {
    pub fn new(chapter_id: impl Into<String>, page_index: u32) -> Self {
        Self {
            chapter_id: chapter_id.into(),
            page_index,
        }
    }
}

impl fmt::Display for PageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.chapter_id, self.page_index)
    }
}

/// A persisted, page-scoped recognition result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: String,
    pub page: PageRef,
    pub region: NormalizedRegion,
    pub result: RecognitionResult,
    pub visible: bool,
    pub created_at: String,
}

/// A saved word or phrase, independent of any page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultEntry {
    pub id: String,
    pub original: String,
    pub translated: Option<String>,
    pub phonetic: Option<String>,
    pub created_at: String,
}

pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = PipelineResult<T>> + Send + 'a>>;

pub trait PersistenceGateway: Send + Sync {
    /// Duplicate selections create duplicate rows.
    fn create_history_entry<'a>(
        &'a self,
        region: NormalizedRegion,
        page: &'a PageRef,
        result: &'a RecognitionResult,
    ) -> StoreFuture<'a, String>;

    fn set_history_visibility<'a>(&'a self, id: &'a str, visible: bool) -> StoreFuture<'a, ()>;

    fn delete_history_entry<'a>(&'a self, id: &'a str) -> StoreFuture<'a, ()>;

    fn create_vault_entry<'a>(&'a self, result: &'a RecognitionResult)
    -> StoreFuture<'a, String>;

    fn delete_vault_entry<'a>(&'a self, id: &'a str) -> StoreFuture<'a, ()>;

    /// Newest first.
    fn list_history_for_page<'a>(&'a self, page: &'a PageRef)
    -> StoreFuture<'a, Vec<HistoryEntry>>;

    /// Newest first.
    fn list_vault<'a>(&'a self) -> StoreFuture<'a, Vec<VaultEntry>>;
}
