//! # Single-flight filter
//!
//! A fixed, process-wide 65,536-bit set indexed by `crc16(key) % 65536`. A
//! set bit means "a task with this fingerprint is in flight; suppress
//! duplicates". A collision only delays one key's first backfill behind an
//! unrelated task sharing its fingerprint; it never causes a wrong answer.
//!
//! Implemented as atomic test-and-set/clear on 64-bit word lanes instead of
//! behind a lock, since no cross-bit consistency is required.

use std::sync::atomic::{AtomicU64, Ordering};

const TOTAL_BITS: usize = 65_536;
const WORDS: usize = TOTAL_BITS / 64;

pub struct SingleFlightFilter {
    words: Vec<AtomicU64>,
}

impl SingleFlightFilter {
    pub fn new() -> Self {
        let mut words = Vec::with_capacity(WORDS);
        words.resize_with(WORDS, || AtomicU64::new(0));
        SingleFlightFilter { words }
    }

    fn locate(fingerprint: u16) -> (usize, u64) {
        let bit = fingerprint as usize;
        (bit / 64, 1u64 << (bit % 64))
    }

    /// Atomically sets the bit for `fingerprint`, returning `true` if it
    /// was already set (i.e. a task with this fingerprint is already in
    /// flight and this submission should be suppressed).
    pub fn test_and_set(&self, fingerprint: u16) -> bool {
        let (word, mask) = Self::locate(fingerprint);
        let previous = self.words[word].fetch_or(mask, Ordering::AcqRel);
        previous & mask != 0
    }

    /// Clears the bit for `fingerprint`, allowing a future submission with
    /// the same fingerprint to proceed.
    pub fn clear(&self, fingerprint: u16) {
        let (word, mask) = Self::locate(fingerprint);
        self.words[word].fetch_and(!mask, Ordering::AcqRel);
    }

    pub fn is_set(&self, fingerprint: u16) -> bool {
        let (word, mask) = Self::locate(fingerprint);
        self.words[word].load(Ordering::Acquire) & mask != 0
    }

    /// Clears every bit. Used during shutdown: pending resolver tasks are
    /// dropped and their filter bits reset.
    pub fn clear_all(&self) {
        for word in &self.words {
            word.store(0, Ordering::Release);
        }
    }
}

impl Default for SingleFlightFilter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_set_reports_not_already_set() {
        let filter = SingleFlightFilter::new();
        assert!(!filter.test_and_set(42));
        assert!(filter.is_set(42));
    }

    #[test]
    fn second_set_reports_already_set() {
        let filter = SingleFlightFilter::new();
        assert!(!filter.test_and_set(42));
        assert!(filter.test_and_set(42));
    }

    #[test]
    fn clear_allows_resubmission() {
        let filter = SingleFlightFilter::new();
        filter.test_and_set(7);
        filter.clear(7);
        assert!(!filter.is_set(7));
        assert!(!filter.test_and_set(7));
    }

    #[test]
    fn bits_are_independent() {
        let filter = SingleFlightFilter::new();
        filter.test_and_set(0);
        filter.test_and_set(65_535);
        assert!(filter.is_set(0));
        assert!(filter.is_set(65_535));
        assert!(!filter.is_set(1));
    }

    #[test]
    fn clear_all_resets_everything() {
        let filter = SingleFlightFilter::new();
        for h in [1u16, 100, 30_000, 65_000] {
            filter.test_and_set(h);
        }
        filter.clear_all();
        for h in [1u16, 100, 30_000, 65_000] {
            assert!(!filter.is_set(h));
        }
    }
}
