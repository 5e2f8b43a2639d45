//! The chunker (C3): a lazy, finite, non-restartable sequence of [`Chunk`]s
//! read from a single file.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Default chunk size, tuned so a chunk plus message framing fits
/// comfortably below a typical LAN transport's MTU (~1400 bytes) when the
/// caller does not need to shrink it further for a constrained path.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// A bounded-size contiguous slice of a file, carrying its sequence
/// number, byte offset, per-chunk hash, and (via the caller) the
/// whole-file expected hash.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chunk {
    pub sequence_no: u32,
    pub offset: u64,
    pub data: Vec<u8>,
    pub hash: String,
    pub is_last: bool,
}

/// Reads a file as a lazy sequence of [`Chunk`]s. `next()` returns `None`
/// forever once the last chunk (`is_last = true`) has been produced, or
/// immediately for a zero-byte file's single empty-but-last chunk.
pub struct Chunker {
    file: File,
    file_size: u64,
    chunk_size: usize,
    offset: u64,
    sequence_no: u32,
    done: bool,
}

impl Chunker {
    /// Opens `path` for chunked reading. `chunk_size` of `0` is rejected.
    pub fn open(path: &Path, chunk_size: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::Internal("chunk size must be non-zero".into()));
        }
        let file = File::open(path)
            .map_err(|e| Error::Io(format!("cannot open {}: {e}", path.display())))?;
        let file_size = file
            .metadata()
            .map_err(|e| Error::Io(format!("cannot stat {}: {e}", path.display())))?
            .len();
        Ok(Self {
            file,
            file_size,
            chunk_size,
            offset: 0,
            sequence_no: 0,
            done: false,
        })
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Produces the next chunk, or `Ok(None)` once the sequence is
    /// exhausted.
    pub fn next_chunk(&mut self) -> Result<Option<Chunk>> {
        if self.done {
            return Ok(None);
        }

        let remaining = self.file_size - self.offset;
        let want = (self.chunk_size as u64).min(remaining) as usize;

        // A zero-byte file still yields exactly one (empty) chunk, marked
        // `is_last`, so callers always see at least one message per file.
        let mut buf = vec![0u8; want];
        if want > 0 {
            self.file
                .seek(SeekFrom::Start(self.offset))
                .map_err(|e| Error::Io(format!("seek failed: {e}")))?;
            self.file
                .read_exact(&mut buf)
                .map_err(|e| Error::Io(format!("read failed: {e}")))?;
        }

        let offset = self.offset;
        let is_last = offset + want as u64 >= self.file_size;
        let hash = hex::encode(Sha256::digest(&buf));
        let chunk = Chunk {
            sequence_no: self.sequence_no,
            offset,
            data: buf,
            hash,
            is_last,
        };

        self.offset += want as u64;
        self.sequence_no += 1;
        self.done = is_last;

        Ok(Some(chunk))
    }
}

impl Iterator for Chunker {
    type Item = Result<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_chunk().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn write_file(dir: &tempfile::TempDir, name: &str, data: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, data).unwrap();
        path
    }

    #[test]
    fn coverage_matches_file_bytes_exactly() {
        let dir = tempdir().unwrap();
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let path = write_file(&dir, "f", &data);

        let chunker = Chunker::open(&path, 777).unwrap();
        let chunks: Vec<Chunk> = chunker.map(|c| c.unwrap()).collect();

        let reassembled: Vec<u8> = chunks.iter().flat_map(|c| c.data.clone()).collect();
        assert_eq!(reassembled, data);

        let total: usize = chunks.iter().map(|c| c.data.len()).sum();
        assert_eq!(total as u64, data.len() as u64);

        let last_count = chunks.iter().filter(|c| c.is_last).count();
        assert_eq!(last_count, 1);
        assert!(chunks.last().unwrap().is_last);
    }

    #[test]
    fn sequence_numbers_and_offsets_are_contiguous() {
        let dir = tempdir().unwrap();
        let data = vec![7u8; 1000];
        let path = write_file(&dir, "f", &data);

        let chunker = Chunker::open(&path, 64).unwrap();
        let mut expected_offset = 0u64;
        for (i, chunk) in chunker.enumerate() {
            let chunk = chunk.unwrap();
            assert_eq!(chunk.sequence_no, i as u32);
            assert_eq!(chunk.offset, expected_offset);
            expected_offset += chunk.data.len() as u64;
        }
        assert_eq!(expected_offset, 1000);
    }

    #[test]
    fn empty_file_yields_single_last_chunk() {
        let dir = tempdir().unwrap();
        let path = write_file(&dir, "empty", b"");

        let mut chunker = Chunker::open(&path, DEFAULT_CHUNK_SIZE).unwrap();
        let chunk = chunker.next_chunk().unwrap().unwrap();
        assert!(chunk.is_last);
        assert!(chunk.data.is_empty());
        assert!(chunker.next_chunk().unwrap().is_none());
    }

    #[test]
    fn exact_multiple_of_chunk_size() {
        let dir = tempdir().unwrap();
        let data = vec![1u8; 128];
        let path = write_file(&dir, "f", &data);

        let chunker = Chunker::open(&path, 64).unwrap();
        let chunks: Vec<Chunk> = chunker.map(|c| c.unwrap()).collect();
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].offset == 0 && !chunks[0].is_last);
        assert!(chunks[1].offset == 64 && chunks[1].is_last);
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let dir = tempdir().unwrap();
        let path = write_file(&dir, "f", b"x");
        assert!(Chunker::open(&path, 0).is_err());
    }

    #[test]
    fn calling_next_after_last_yields_none() {
        let dir = tempdir().unwrap();
        let path = write_file(&dir, "f", b"abc");
        let mut chunker = Chunker::open(&path, 64).unwrap();
        assert!(chunker.next_chunk().unwrap().unwrap().is_last);
        assert!(chunker.next_chunk().unwrap().is_none());
        assert!(chunker.next_chunk().unwrap().is_none());
    }

    #[test]
    fn per_chunk_hash_matches_data() {
        let dir = tempdir().unwrap();
        let path = write_file(&dir, "f", b"hello chunk");
        let mut chunker = Chunker::open(&path, 5).unwrap();
        let chunk = chunker.next_chunk().unwrap().unwrap();
        assert_eq!(chunk.hash, hex::encode(Sha256::digest(&chunk.data)));
    }
}
