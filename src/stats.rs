//! Circular-buffer statistics over recent attribute samples.
//!
//! [`StatBuffer`] keeps the last `N` samples of a readback and derives
//! mean/std/min/max/last from the live window on demand. Statistics are
//! always recomputed from the window, never maintained incrementally — the
//! window is tiny (default 10) and a recompute cannot drift.
//!
//! [`HistoryBuffer`] adds episode semantics for interlock tracking: whenever
//! an appended value belongs to a configured *base set* (the known-good
//! states), the buffer collapses to that single element. What remains is a
//! trailing record of how the interlock chain got to where it is since the
//! last known-good state.
//!
//! # Example
//!
//! ```
//! use plc_mirror::StatBuffer;
//!
//! let mut buf = StatBuffer::new(3);
//! for v in [1.0, 2.0, 3.0, 4.0] {
//!     buf.append(v);
//! }
//! assert_eq!(buf.samples(), &[2.0, 3.0, 4.0]);
//! assert_eq!(buf.mean(), Some(3.0));
//! assert_eq!(buf.last(), Some(4.0));
//! ```

use std::collections::VecDeque;

/// Default window capacity.
pub const DEFAULT_CAPACITY: usize = 10;

/// Fixed-capacity ring of recent samples with derived statistics.
#[derive(Debug, Clone)]
pub struct StatBuffer {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl StatBuffer {
    /// Creates an empty buffer holding at most `capacity` samples.
    ///
    /// A zero capacity is clamped to 1; a windowless buffer has no meaning.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Creates a buffer with the default capacity of 10.
    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }

    /// Appends a sample, evicting the oldest when the window is full.
    pub fn append(&mut self, value: f64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    /// Changes the window capacity.
    ///
    /// Shrinking evicts the oldest overflow immediately.
    pub fn resize(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    /// Drops all samples, keeping the capacity.
    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Returns the window capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of live samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns whether the window holds no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Returns whether the window has reached capacity.
    pub fn is_full(&self) -> bool {
        self.samples.len() == self.capacity
    }

    /// Returns the live samples, oldest first.
    pub fn samples(&self) -> Vec<f64> {
        self.samples.iter().copied().collect()
    }

    /// Mean of the live window.
    pub fn mean(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
    }

    /// Population standard deviation of the live window.
    pub fn std(&self) -> Option<f64> {
        let mean = self.mean()?;
        let var = self
            .samples
            .iter()
            .map(|v| (v - mean) * (v - mean))
            .sum::<f64>()
            / self.samples.len() as f64;
        Some(var.sqrt())
    }

    /// Minimum of the live window.
    pub fn min(&self) -> Option<f64> {
        self.samples.iter().copied().reduce(f64::min)
    }

    /// Maximum of the live window.
    pub fn max(&self) -> Option<f64> {
        self.samples.iter().copied().reduce(f64::max)
    }

    /// Most recently appended sample.
    pub fn last(&self) -> Option<f64> {
        self.samples.back().copied()
    }
}

impl PartialEq for StatBuffer {
    fn eq(&self, other: &Self) -> bool {
        self.capacity == other.capacity && self.samples == other.samples
    }
}

/// Ring buffer that resets to a single element on known-good values.
///
/// Used for interlock history: the base set holds the "everything fine"
/// states, and each excursion away from them is recorded until the next
/// return to base.
///
/// # Example
///
/// ```
/// use plc_mirror::HistoryBuffer;
///
/// let mut hist = HistoryBuffer::new(8, vec![0.0]);
/// hist.append(3.0); // interlock code 3
/// hist.append(5.0); // escalated to 5
/// assert_eq!(hist.samples(), &[3.0, 5.0]);
///
/// hist.append(0.0); // back to known-good: episode boundary
/// assert_eq!(hist.samples(), &[0.0]);
/// ```
#[derive(Debug, Clone)]
pub struct HistoryBuffer {
    inner: StatBuffer,
    base_set: Vec<f64>,
}

impl HistoryBuffer {
    /// Creates a history buffer with the given capacity and base set.
    pub fn new(capacity: usize, base_set: Vec<f64>) -> Self {
        Self {
            inner: StatBuffer::new(capacity),
            base_set,
        }
    }

    /// Appends a sample; a base-set member collapses the buffer to `[value]`.
    pub fn append(&mut self, value: f64) {
        if self.base_set.contains(&value) {
            self.inner.clear();
        }
        self.inner.append(value);
    }

    /// Returns the live samples, oldest first.
    pub fn samples(&self) -> Vec<f64> {
        self.inner.samples()
    }

    /// Returns the number of live samples.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns whether the buffer holds no samples.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Returns the underlying statistics window.
    pub fn stats(&self) -> &StatBuffer {
        &self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_eviction_keeps_last_n_in_order() {
        let mut buf = StatBuffer::new(3);
        for v in 0..7 {
            buf.append(f64::from(v));
        }
        assert_eq!(buf.len(), 3);
        assert_eq!(buf.samples(), &[4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_statistics() {
        let mut buf = StatBuffer::new(5);
        for v in [2.0, 4.0, 4.0, 4.0, 6.0] {
            buf.append(v);
        }
        assert_eq!(buf.mean(), Some(4.0));
        assert_eq!(buf.min(), Some(2.0));
        assert_eq!(buf.max(), Some(6.0));
        assert_eq!(buf.last(), Some(6.0));
        // Population std of [2,4,4,4,6] is sqrt(8/5).
        let std = buf.std().unwrap();
        assert!((std - (8.0f64 / 5.0).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_empty_statistics() {
        let buf = StatBuffer::new(3);
        assert!(buf.is_empty());
        assert_eq!(buf.mean(), None);
        assert_eq!(buf.std(), None);
        assert_eq!(buf.min(), None);
        assert_eq!(buf.max(), None);
        assert_eq!(buf.last(), None);
    }

    #[test]
    fn test_resize_shrink_evicts_oldest() {
        let mut buf = StatBuffer::new(5);
        for v in 0..5 {
            buf.append(f64::from(v));
        }
        buf.resize(2);
        assert_eq!(buf.samples(), &[3.0, 4.0]);
        assert_eq!(buf.capacity(), 2);

        buf.resize(4);
        assert_eq!(buf.samples(), &[3.0, 4.0]);
        buf.append(9.0);
        assert_eq!(buf.samples(), &[3.0, 4.0, 9.0]);
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let mut buf = StatBuffer::new(0);
        assert_eq!(buf.capacity(), 1);
        buf.append(1.0);
        buf.append(2.0);
        assert_eq!(buf.samples(), &[2.0]);
        buf.resize(0);
        assert_eq!(buf.capacity(), 1);
    }

    #[test]
    fn test_is_full() {
        let mut buf = StatBuffer::new(2);
        assert!(!buf.is_full());
        buf.append(1.0);
        assert!(!buf.is_full());
        buf.append(1.0);
        assert!(buf.is_full());
    }

    #[test]
    fn test_history_episode_reset() {
        let mut hist = HistoryBuffer::new(8, vec![0.0, 1.0]);
        hist.append(3.0);
        hist.append(4.0);
        hist.append(5.0);
        assert_eq!(hist.samples(), &[3.0, 4.0, 5.0]);

        hist.append(1.0); // base value delimits the episode
        assert_eq!(hist.samples(), &[1.0]);

        hist.append(7.0);
        assert_eq!(hist.samples(), &[1.0, 7.0]);
    }

    #[test]
    fn test_history_ring_behavior_off_base() {
        let mut hist = HistoryBuffer::new(2, vec![0.0]);
        hist.append(3.0);
        hist.append(4.0);
        hist.append(5.0);
        assert_eq!(hist.samples(), &[4.0, 5.0]);
    }
}
