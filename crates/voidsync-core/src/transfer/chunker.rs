//! Fixed-size file chunking.

/// Default chunk size (64 KiB)
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Split in-memory file content into fixed-size pieces
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    chunk_size: usize,
}

impl Chunker {
    /// Create a new chunker with default chunk size
    #[must_use]
    pub fn new() -> Self {
        Self::with_chunk_size(DEFAULT_CHUNK_SIZE)
    }

    /// Create a new chunker with custom chunk size (clamped to at least 1 byte)
    #[must_use]
    pub fn with_chunk_size(size: usize) -> Self {
        Self {
            chunk_size: size.max(1),
        }
    }

    /// Get chunk size
    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Calculate number of chunks for a file: `ceil(file_size / chunk_size)`
    #[must_use]
    pub fn chunk_count(&self, file_size: u64) -> u64 {
        file_size.div_ceil(self.chunk_size as u64)
    }

    /// Chunk `index` of `data`, or `None` past the end
    #[must_use]
    pub fn chunk<'a>(&self, data: &'a [u8], index: u64) -> Option<&'a [u8]> {
        let start = usize::try_from(index).ok()?.checked_mul(self.chunk_size)?;
        if start >= data.len() {
            return None;
        }
        let end = start.saturating_add(self.chunk_size).min(data.len());
        Some(&data[start..end])
    }

    /// Iterate `(index, bytes)` over every chunk of `data`, in order
    pub fn chunks<'a>(&self, data: &'a [u8]) -> impl Iterator<Item = (u64, &'a [u8])> + use<'a> {
        data.chunks(self.chunk_size)
            .enumerate()
            .map(|(index, chunk)| (index as u64, chunk))
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new()
    }
}
