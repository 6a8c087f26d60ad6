//! Fixed-size page representation.

/// Size of every page on disk, in bytes.
pub const PAGE_SIZE: usize = 4096;

/// A fixed-size page. Pages are addressed on disk at `id * PAGE_SIZE`.
#[derive(Debug, Clone)]
pub struct Page {
    /// Monotonic page identifier.
    pub id: i64,
    /// The page contents; always exactly `PAGE_SIZE` bytes.
    pub buffer: Vec<u8>,
    /// Bytes written so far. Not stored on disk; pages read back report the
    /// full page size and are sliced through the key index.
    pub used: usize,
}

impl Page {
    /// A fresh, zeroed page.
    pub fn new(id: i64) -> Self {
        Self {
            id,
            buffer: vec![0u8; PAGE_SIZE],
            used: 0,
        }
    }

    /// Whether `len` more bytes fit in this page.
    pub fn fits(&self, len: usize) -> bool {
        self.used + len <= PAGE_SIZE
    }

    /// Append bytes at the current write offset. Returns the offset the
    /// bytes were written at. Panics in debug builds if they do not fit;
    /// callers check [`Page::fits`] first.
    pub fn append(&mut self, bytes: &[u8]) -> usize {
        debug_assert!(self.fits(bytes.len()));
        let offset = self.used;
        self.buffer[offset..offset + bytes.len()].copy_from_slice(bytes);
        self.used += bytes.len();
        offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_page_zeroed() {
        let page = Page::new(7);
        assert_eq!(page.id, 7);
        assert_eq!(page.buffer.len(), PAGE_SIZE);
        assert_eq!(page.used, 0);
        assert!(page.buffer.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_append_advances_offset() {
        let mut page = Page::new(0);
        let off1 = page.append(b"hello");
        let off2 = page.append(b"world");
        assert_eq!(off1, 0);
        assert_eq!(off2, 5);
        assert_eq!(&page.buffer[..10], b"helloworld");
        assert_eq!(page.used, 10);
    }

    #[test]
    fn test_fits_at_boundary() {
        let mut page = Page::new(0);
        page.used = PAGE_SIZE - 4;
        assert!(page.fits(4));
        assert!(!page.fits(5));
    }
}
