//! Bounded replay buffer of accepted samples
//!
//! Once full, every insertion replaces a uniformly random resident entry,
//! which keeps the buffer close to a reservoir sample of the whole stream.
//! Sampling never fails: asking for more than is stored returns everything.

use crate::types::FeedbackData;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// A buffered sample with its insertion sequence number
#[derive(Debug, Clone)]
pub struct BufferEntry {
    /// Monotonic insertion order
    pub seq: u64,
    /// The stored sample
    pub sample: FeedbackData,
}

/// Size-capped store of accepted feedback
#[derive(Debug)]
pub struct ReplayBuffer {
    max_size: usize,
    min_size: usize,
    entries: Vec<BufferEntry>,
    next_seq: u64,
    evicted: u64,
    rng: StdRng,
}

impl ReplayBuffer {
    /// Create buffer with capacity `max_size` that is ready at `min_size`
    #[must_use]
    pub fn new(max_size: usize, min_size: usize) -> Self {
        Self::with_rng(max_size, min_size, StdRng::from_os_rng())
    }

    /// Create buffer with a deterministic random source
    #[must_use]
    pub fn with_seed(max_size: usize, min_size: usize, seed: u64) -> Self {
        Self::with_rng(max_size, min_size, StdRng::seed_from_u64(seed))
    }

    fn with_rng(max_size: usize, min_size: usize, rng: StdRng) -> Self {
        Self {
            max_size,
            min_size,
            entries: Vec::with_capacity(max_size.min(1024)),
            next_seq: 0,
            evicted: 0,
            rng,
        }
    }

    /// Insert a sample, returning the evicted one when the buffer was full
    pub fn add(&mut self, sample: FeedbackData) -> Option<FeedbackData> {
        if self.max_size == 0 {
            return Some(sample);
        }

        let entry = BufferEntry {
            seq: self.next_seq,
            sample,
        };
        self.next_seq += 1;

        if self.entries.len() < self.max_size {
            self.entries.push(entry);
            return None;
        }

        let victim = self.rng.random_range(0..self.entries.len());
        let old = std::mem::replace(&mut self.entries[victim], entry);
        self.evicted += 1;
        Some(old.sample)
    }

    /// Draw `min(n, size())` distinct samples uniformly at random
    pub fn sample(&mut self, n: usize) -> Vec<FeedbackData> {
        let amount = n.min(self.entries.len());
        rand::seq::index::sample(&mut self.rng, self.entries.len(), amount)
            .into_iter()
            .map(|idx| self.entries[idx].sample.clone())
            .collect()
    }

    /// Number of stored samples
    #[inline]
    #[must_use]
    pub fn size(&self) -> usize {
        self.entries.len()
    }

    /// Whether the buffer holds nothing
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether enough samples are stored for training
    #[inline]
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.entries.len() >= self.min_size
    }

    /// Capacity
    #[inline]
    #[must_use]
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Readiness threshold
    #[inline]
    #[must_use]
    pub fn min_size(&self) -> usize {
        self.min_size
    }

    /// Number of samples evicted since creation
    #[inline]
    #[must_use]
    pub fn evicted_count(&self) -> u64 {
        self.evicted
    }

    /// Iterate stored entries in storage order
    pub fn iter(&self) -> impl Iterator<Item = &BufferEntry> {
        self.entries.iter()
    }

    /// Drop every stored sample
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
