//! Record-level store combining the page manager and the key index.
//!
//! Records are written as `"{key}:{value}\n"` into the current page; when a
//! record does not fit, the page is flushed and a fresh one is allocated.
//! Each write lands in the index log so reads can locate the latest record
//! for a key after a restart.

use crate::index::{IndexError, KeyIndex, RecordLocation};
use crate::page::{Page, PAGE_SIZE};
use crate::pager::{PageError, PageManager};
use std::path::Path;

/// File name of the raw pages file inside the data directory.
pub const PAGES_FILE: &str = "data_pages.db";
/// File name of the index log inside the data directory.
pub const INDEX_FILE: &str = "data_pages.idx";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error(transparent)]
    Page(#[from] PageError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error("record for key '{0}' exceeds page size")]
    RecordTooLarge(String),
    #[error("corrupt record for key '{0}'")]
    CorruptRecord(String),
}

/// Paged record store for the KV engine.
#[derive(Debug)]
pub struct PageStore {
    pager: PageManager,
    index: KeyIndex,
    current: Page,
}

impl PageStore {
    /// Open or create the store inside `data_dir`. A fresh page is allocated
    /// for new writes; the tail of a previous run's last page is not reused.
    pub fn open(data_dir: &Path) -> Result<Self, StorageError> {
        std::fs::create_dir_all(data_dir).map_err(PageError::Io)?;
        let pager = PageManager::open(&data_dir.join(PAGES_FILE))?;
        let index = KeyIndex::open(&data_dir.join(INDEX_FILE))?;
        let current = pager.allocate_page();
        tracing::info!(
            "page store opened: {} indexed record(s), next page {}",
            index.len(),
            current.id
        );
        Ok(Self {
            pager,
            index,
            current,
        })
    }

    /// Append a record for `key`, rolling to a fresh page when full.
    pub fn append_record(&mut self, key: &str, value: &str) -> Result<RecordLocation, StorageError> {
        let record = format!("{}:{}\n", key, value);
        let bytes = record.as_bytes();
        if bytes.len() > PAGE_SIZE {
            return Err(StorageError::RecordTooLarge(key.to_string()));
        }

        if !self.current.fits(bytes.len()) {
            self.pager.write_page(&self.current)?;
            self.current = self.pager.allocate_page();
        }

        let offset = self.current.append(bytes);
        self.pager.write_page(&self.current)?;

        let location = RecordLocation {
            page_id: self.current.id,
            offset,
            len: bytes.len(),
        };
        self.index.insert(key, location)?;
        Ok(location)
    }

    /// Read back the latest value recorded for `key`, if any.
    pub fn read_value(&self, key: &str) -> Result<Option<String>, StorageError> {
        let location = match self.index.get(key) {
            Some(loc) => loc,
            None => return Ok(None),
        };

        let page = self.pager.read_page(location.page_id)?;
        let slice = &page.buffer[location.offset..location.offset + location.len];
        let record = std::str::from_utf8(slice)
            .map_err(|_| StorageError::CorruptRecord(key.to_string()))?;

        // Record layout is "{key}:{value}\n".
        let body = record
            .strip_prefix(key)
            .and_then(|r| r.strip_prefix(':'))
            .and_then(|r| r.strip_suffix('\n'))
            .ok_or_else(|| StorageError::CorruptRecord(key.to_string()))?;
        Ok(Some(body.to_string()))
    }

    /// Number of keys with an indexed record.
    pub fn indexed_keys(&self) -> usize {
        self.index.len()
    }
}
