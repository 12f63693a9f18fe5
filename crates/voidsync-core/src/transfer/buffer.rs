//! Receiver-side chunk reassembly.

use crate::error::{Error, Result};
use std::borrow::Cow;

/// Result of writing one chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkWrite {
    /// Slot was empty
    Filled,
    /// Slot already held a chunk; it was overwritten and the fill count is unchanged
    Duplicate,
}

/// Fixed number of slots, each empty or holding one chunk
#[derive(Debug, Clone)]
pub struct ChunkBuffer {
    slots: Vec<Option<Vec<u8>>>,
    filled: u64,
    bytes: u64,
}

impl ChunkBuffer {
    /// Allocate `total_chunks` empty slots
    #[must_use]
    pub fn new(total_chunks: u64) -> Self {
        let len = usize::try_from(total_chunks).unwrap_or(usize::MAX);
        let mut slots = Vec::new();
        slots.resize_with(len, || None);
        Self {
            slots,
            filled: 0,
            bytes: 0,
        }
    }

    /// Store `data` at `index`
    ///
    /// # Errors
    /// Returns `Error::InvalidMessage` if `index` is outside `[0, total)`.
    pub fn insert(&mut self, index: u64, data: Vec<u8>) -> Result<ChunkWrite> {
        let total = self.total();
        let slot = usize::try_from(index)
            .ok()
            .and_then(|i| self.slots.get_mut(i))
            .ok_or_else(|| {
                Error::InvalidMessage(Cow::Owned(format!(
                    "chunk index {index} out of range (total {total})"
                )))
            })?;

        let added = data.len() as u64;
        match slot.replace(data) {
            Some(previous) => {
                self.bytes = self.bytes - previous.len() as u64 + added;
                Ok(ChunkWrite::Duplicate)
            }
            None => {
                self.filled += 1;
                self.bytes += added;
                Ok(ChunkWrite::Filled)
            }
        }
    }

    /// Number of slots
    #[must_use]
    pub fn total(&self) -> u64 {
        self.slots.len() as u64
    }

    /// Number of filled slots
    #[must_use]
    pub fn filled(&self) -> u64 {
        self.filled
    }

    /// Bytes currently held
    #[must_use]
    pub fn bytes_received(&self) -> u64 {
        self.bytes
    }

    /// Check if every slot is filled
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.filled == self.total()
    }

    /// Fraction of filled slots; an empty buffer counts as fully filled
    #[must_use]
    pub fn fill_ratio(&self) -> f64 {
        if self.slots.is_empty() {
            return 1.0;
        }
        self.filled as f64 / self.slots.len() as f64
    }

    /// Indices of empty slots, ascending
    #[must_use]
    pub fn missing(&self) -> Vec<u64> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_none())
            .map(|(i, _)| i as u64)
            .collect()
    }

    /// Concatenate every slot in order, failing if any is empty
    ///
    /// # Errors
    /// Returns `Error::IncompleteTransfer` (with an empty `file_id`, filled in
    /// by the caller) when slots are missing.
    pub fn assemble(self) -> Result<Vec<u8>> {
        if !self.is_complete() {
            return Err(Error::IncompleteTransfer {
                file_id: String::new(),
                missing: self.total() - self.filled,
                total: self.total(),
            });
        }
        Ok(self.assemble_lossy())
    }

    /// Concatenate filled slots in order, skipping gaps
    #[must_use]
    pub fn assemble_lossy(self) -> Vec<u8> {
        let capacity = usize::try_from(self.bytes).unwrap_or(0);
        let mut out = Vec::with_capacity(capacity);
        for chunk in self.slots.into_iter().flatten() {
            out.extend_from_slice(&chunk);
        }
        out
    }
}
