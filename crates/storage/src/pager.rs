//! Page-granular I/O over a single backing file.
//!
//! All operations are serialized by an internal mutex; callers holding the
//! engine lock may acquire it, never the reverse.

use crate::page::{Page, PAGE_SIZE};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum PageError {
    #[error("page I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid page id {0}")]
    InvalidPageId(i64),
}

struct PagerInner {
    file: File,
    next_page_id: i64,
}

/// Allocates, writes and reads fixed-size pages in a single file.
pub struct PageManager {
    inner: Mutex<PagerInner>,
}

impl std::fmt::Debug for PageManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageManager").finish_non_exhaustive()
    }
}

impl PageManager {
    /// Open or create the pages file. The next page id continues after the
    /// last fully written page.
    pub fn open(path: &Path) -> Result<Self, PageError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        let len = file.metadata()?.len();
        let next_page_id = (len / PAGE_SIZE as u64) as i64;
        Ok(Self {
            inner: Mutex::new(PagerInner { file, next_page_id }),
        })
    }

    /// Hand out a fresh zeroed page with the next id.
    pub fn allocate_page(&self) -> Page {
        let mut inner = self.inner.lock().expect("pager mutex poisoned");
        let page = Page::new(inner.next_page_id);
        inner.next_page_id += 1;
        page
    }

    /// Write the full page buffer at `page.id * PAGE_SIZE`.
    pub fn write_page(&self, page: &Page) -> Result<(), PageError> {
        if page.id < 0 {
            return Err(PageError::InvalidPageId(page.id));
        }
        let mut inner = self.inner.lock().expect("pager mutex poisoned");
        inner
            .file
            .seek(SeekFrom::Start(page.id as u64 * PAGE_SIZE as u64))?;
        inner.file.write_all(&page.buffer)?;
        inner.file.flush()?;
        Ok(())
    }

    /// Read the full page at `page_id`. Fails with an I/O error if the file
    /// does not contain `PAGE_SIZE` bytes at that offset.
    pub fn read_page(&self, page_id: i64) -> Result<Page, PageError> {
        if page_id < 0 {
            return Err(PageError::InvalidPageId(page_id));
        }
        let mut inner = self.inner.lock().expect("pager mutex poisoned");
        inner
            .file
            .seek(SeekFrom::Start(page_id as u64 * PAGE_SIZE as u64))?;
        let mut buffer = vec![0u8; PAGE_SIZE];
        inner.file.read_exact(&mut buffer)?;
        Ok(Page {
            id: page_id,
            buffer,
            used: PAGE_SIZE,
        })
    }

    /// The id the next allocation will receive.
    pub fn next_page_id(&self) -> i64 {
        self.inner.lock().expect("pager mutex poisoned").next_page_id
    }
}
