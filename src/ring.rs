//! Fixed-capacity circular store of recent scalar observations.
//!
//! Sized to the largest rolling window in use; replaces the unbounded
//! tick-history list with O(1) push and constant memory.

/// Circular buffer over `f64` observations.
///
/// Once `capacity` values have been pushed it holds exactly the last
/// `capacity`; before that it holds a prefix of the stream.
#[derive(Debug, Clone)]
pub struct HistoryRing {
    data: Vec<f64>,
    /// Next slot to write (one past the most recent value).
    write: usize,
    len: usize,
    capacity: usize,
}

impl HistoryRing {
    /// Create a ring with the given capacity.
    ///
    /// # Panics
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring capacity must be non-zero");
        Self {
            data: vec![0.0; capacity],
            write: 0,
            len: 0,
            capacity,
        }
    }

    /// Push a value, overwriting the oldest slot once full. O(1).
    pub fn push(&mut self, value: f64) {
        self.data[self.write] = value;
        self.write = (self.write + 1) % self.capacity;
        if self.len < self.capacity {
            self.len += 1;
        }
    }

    /// Value pushed `k` steps before the most recent.
    ///
    /// `get(0)` is the newest value; `get(capacity - 1)` the oldest retained.
    /// Returns `None` for `k >= capacity` or before enough values have been
    /// pushed.
    pub fn get(&self, k: usize) -> Option<f64> {
        if k >= self.len {
            return None;
        }
        let idx = (self.write + self.capacity - 1 - k) % self.capacity;
        Some(self.data[idx])
    }

    /// Exact sum of the newest `n` values, `None` if fewer are retained.
    ///
    /// Used by the periodic resynchronization pass to rebuild running sums.
    pub fn sum_recent(&self, n: usize) -> Option<f64> {
        if n == 0 || n > self.len {
            return None;
        }
        let mut sum = 0.0;
        for k in 0..n {
            let idx = (self.write + self.capacity - 1 - k) % self.capacity;
            sum += self.data[idx];
        }
        Some(sum)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Discard all retained values, keeping the allocation.
    pub fn clear(&mut self) {
        self.write = 0;
        self.len = 0;
    }
}
