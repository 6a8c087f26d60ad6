//! Append-only key→record-location index.
//!
//! The pages file carries raw records with no self-describing layout, so the
//! index log beside it is what makes disk reads addressable. Entries are
//! framed as `[4-byte length][4-byte CRC32][JSON payload]`, both integers
//! little-endian. On open the whole log is scanned front to back (last entry
//! per key wins); the scan ends at the first frame that is short, fails its
//! checksum or does not decode, keeping everything before it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// Bytes of length + checksum in front of each payload.
const FRAME_HEADER: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("index I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("index serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Where a record lives inside the pages file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordLocation {
    pub page_id: i64,
    pub offset: usize,
    pub len: usize,
}

#[derive(Serialize, Deserialize)]
struct IndexEntry {
    key: String,
    #[serde(flatten)]
    location: RecordLocation,
}

/// In-memory key→location map backed by the append-only log.
pub struct KeyIndex {
    map: HashMap<String, RecordLocation>,
    writer: BufWriter<std::fs::File>,
}

impl std::fmt::Debug for KeyIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyIndex")
            .field("keys", &self.map.len())
            .finish_non_exhaustive()
    }
}

impl KeyIndex {
    /// Open or create the index log at `path`, replaying existing entries.
    pub fn open(path: &Path) -> Result<Self, IndexError> {
        let map = Self::replay(path)?;
        let file = OpenOptions::new().append(true).create(true).open(path)?;
        Ok(Self {
            map,
            writer: BufWriter::new(file),
        })
    }

    /// Record that `key`'s latest value lives at `location`.
    pub fn insert(&mut self, key: &str, location: RecordLocation) -> Result<(), IndexError> {
        let entry = IndexEntry {
            key: key.to_string(),
            location,
        };
        let payload = serde_json::to_vec(&entry)?;

        let mut frame = Vec::with_capacity(FRAME_HEADER + payload.len());
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
        frame.extend_from_slice(&payload);
        self.writer.write_all(&frame)?;
        self.writer.flush()?;

        self.map.insert(entry.key, location);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<RecordLocation> {
        self.map.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Scan the log into a map. A damaged tail loses only the frames at and
    /// past the damage.
    fn replay(path: &Path) -> Result<HashMap<String, RecordLocation>, IndexError> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => return Err(IndexError::Io(e)),
        };

        let mut map = HashMap::new();
        let mut cursor = 0;

        while cursor < bytes.len() {
            let payload = match checked_frame(&bytes[cursor..]) {
                Some(payload) => payload,
                None => {
                    tracing::warn!(
                        "index log damaged {} byte(s) before the end; keeping {} entr(ies)",
                        bytes.len() - cursor,
                        map.len()
                    );
                    break;
                }
            };
            match serde_json::from_slice::<IndexEntry>(payload) {
                Ok(entry) => {
                    map.insert(entry.key, entry.location);
                }
                Err(e) => {
                    tracing::warn!("undecodable index entry at byte {}: {}", cursor, e);
                    break;
                }
            }
            cursor += FRAME_HEADER + payload.len();
        }

        Ok(map)
    }
}

/// Validate the frame at the front of `bytes` and return its payload, or
/// `None` when the frame is short or fails its checksum.
fn checked_frame(bytes: &[u8]) -> Option<&[u8]> {
    if bytes.len() < FRAME_HEADER {
        return None;
    }
    let len = read_u32(&bytes[0..4]) as usize;
    let checksum = read_u32(&bytes[4..8]);
    let payload = bytes.get(FRAME_HEADER..FRAME_HEADER + len)?;
    (crc32fast::hash(payload) == checksum).then_some(payload)
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(word)
}
