//! Observation window: bounded ring buffer of `WindowRecord`s.

use std::collections::VecDeque;

use serde::Serialize;

use crate::WindowRecord;

/// Default record-count cap.
pub const DEFAULT_MAX_RECORDS: usize = 50;
/// Default estimated-byte cap (1 MiB).
pub const DEFAULT_MAX_BYTES: usize = 1024 * 1024;

/// Memory accounting for the window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WindowStats {
    /// Records currently held.
    pub record_count: usize,
    /// Estimated bytes currently held.
    pub estimated_bytes: usize,
    /// Total records evicted by cleanup since creation.
    pub cleanup_count: u64,
    /// Largest record count ever reached after cleanup.
    pub max_size_reached: usize,
    /// Mean estimated record size, 0 when empty.
    pub avg_record_bytes: f64,
}

/// Bounded observation window. O(1) append; cleanup evicts from the head so
/// the buffer stays within both the count cap and the byte cap.
#[derive(Debug)]
pub struct ObservationWindow {
    ring: VecDeque<WindowRecord>,
    max_records: usize,
    max_bytes: usize,
    estimated_bytes: usize,
    cleanup_count: u64,
    max_size_reached: usize,
}

impl Default for ObservationWindow {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RECORDS, DEFAULT_MAX_BYTES)
    }
}

impl ObservationWindow {
    /// Create a window with explicit caps. Caps below 1 are raised to 1.
    #[must_use]
    pub fn new(max_records: usize, max_bytes: usize) -> Self {
        let max_records = max_records.max(1);
        Self {
            ring: VecDeque::with_capacity(max_records.min(4096)),
            max_records,
            max_bytes: max_bytes.max(1),
            estimated_bytes: 0,
            cleanup_count: 0,
            max_size_reached: 0,
        }
    }

    /// Append one record, then run cleanup so both caps hold.
    ///
    /// Returns the number of records evicted by this append.
    pub fn append(&mut self, record: WindowRecord) -> usize {
        self.estimated_bytes += record.estimated_bytes();
        self.ring.push_back(record);
        let evicted = self.cleanup();
        self.max_size_reached = self.max_size_reached.max(self.ring.len());
        evicted
    }

    /// Enforce the count cap, then the byte cap: count overflow truncates
    /// the head to the cap; byte overflow drops the oldest ceil(len/5)
    /// records, repeating until the budget holds (one oversized record can
    /// outweigh a whole batch). Evictions are added to `cleanup_count`.
    fn cleanup(&mut self) -> usize {
        let mut evicted = 0;
        if self.ring.len() > self.max_records {
            evicted += self.drop_oldest(self.ring.len() - self.max_records);
        }
        while self.estimated_bytes > self.max_bytes && !self.ring.is_empty() {
            evicted += self.drop_oldest(self.ring.len().div_ceil(5));
        }
        self.cleanup_count += evicted as u64;
        evicted
    }

    fn drop_oldest(&mut self, n: usize) -> usize {
        let take = n.min(self.ring.len());
        for _ in 0..take {
            if let Some(dropped) = self.ring.pop_front() {
                self.estimated_bytes = self
                    .estimated_bytes
                    .saturating_sub(dropped.estimated_bytes());
            }
        }
        take
    }

    /// Number of records currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// True when the window holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Estimated bytes currently held.
    #[must_use]
    pub fn estimated_bytes(&self) -> usize {
        self.estimated_bytes
    }

    /// All records, oldest first.
    pub fn records(&self) -> impl Iterator<Item = &WindowRecord> {
        self.ring.iter()
    }

    /// Most recent record, if any.
    #[must_use]
    pub fn newest(&self) -> Option<&WindowRecord> {
        self.ring.back()
    }

    /// Most recent record for `task_id` among the newest `scan` entries.
    /// Used by the step-jump consistency guard.
    #[must_use]
    pub fn last_for_task(&self, task_id: &str, scan: usize) -> Option<&WindowRecord> {
        self.ring
            .iter()
            .rev()
            .take(scan)
            .find(|r| r.task_id == task_id)
    }

    /// Memory accounting snapshot.
    #[must_use]
    pub fn stats(&self) -> WindowStats {
        let record_count = self.ring.len();
        let avg_record_bytes = if record_count == 0 {
            0.0
        } else {
            self.estimated_bytes as f64 / record_count as f64
        };
        WindowStats {
            record_count,
            estimated_bytes: self.estimated_bytes,
            cleanup_count: self.cleanup_count,
            max_size_reached: self.max_size_reached,
            avg_record_bytes,
        }
    }
}
