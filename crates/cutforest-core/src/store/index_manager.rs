//! Free-list management over dense integer ids
//!
//! The manager keeps the free portion of `[0, capacity)` as a set of maximal
//! disjoint intervals, ordered by start. Allocation always hands out the
//! lowest free id, which keeps runs deterministic under a fixed seed.

use crate::error::{check_argument, ForestError, Result};
use std::collections::BTreeMap;

/// Free-interval manager over the id range `[0, capacity)`.
#[derive(Debug, Clone)]
pub struct IndexIntervalManager {
    capacity: usize,
    // start -> end (exclusive) of each maximal free interval
    free: BTreeMap<usize, usize>,
    free_count: usize,
}

impl IndexIntervalManager {
    /// Create a manager with every id in `[0, capacity)` free
    pub fn new(capacity: usize) -> Result<Self> {
        check_argument(capacity > 0, "capacity must be greater than 0")?;
        let mut free = BTreeMap::new();
        free.insert(0, capacity);
        Ok(Self {
            capacity,
            free,
            free_count: capacity,
        })
    }

    /// Rebuild the free set from an occupancy array: ids whose entry is zero
    /// are free, all others are allocated. Capacity equals `counts.len()`.
    pub fn from_ref_counts(counts: &[u32]) -> Result<Self> {
        check_argument(!counts.is_empty(), "occupancy array must not be empty")?;
        let mut free = BTreeMap::new();
        let mut free_count = 0;
        let mut run_start = None;
        for (i, &count) in counts.iter().enumerate() {
            match (count, run_start) {
                (0, None) => run_start = Some(i),
                (0, Some(_)) => {}
                (_, Some(start)) => {
                    free.insert(start, i);
                    free_count += i - start;
                    run_start = None;
                }
                (_, None) => {}
            }
        }
        if let Some(start) = run_start {
            free.insert(start, counts.len());
            free_count += counts.len() - start;
        }
        Ok(Self {
            capacity: counts.len(),
            free,
            free_count,
        })
    }

    /// Take the lowest free id
    pub fn take_index(&mut self) -> Result<usize> {
        let (&start, &end) = self
            .free
            .iter()
            .next()
            .ok_or_else(|| ForestError::Capacity("no free index available".to_string()))?;
        self.free.remove(&start);
        if start + 1 < end {
            self.free.insert(start + 1, end);
        }
        self.free_count -= 1;
        Ok(start)
    }

    /// Release a currently allocated id back to the free set
    pub fn release_index(&mut self, index: usize) -> Result<()> {
        if index >= self.capacity {
            return Err(ForestError::InvalidHandle(format!(
                "index {} out of range {}",
                index, self.capacity
            )));
        }
        let predecessor = self
            .free
            .range(..=index)
            .next_back()
            .map(|(&start, &end)| (start, end));
        if let Some((start, end)) = predecessor {
            if index < end {
                return Err(ForestError::InvalidHandle(format!(
                    "index {} is already free",
                    index
                )));
            }
            // coalesce with the predecessor when adjacent
            if end == index {
                let new_end = index + 1;
                self.free.insert(start, new_end);
                self.coalesce_forward(start, new_end);
                self.free_count += 1;
                return Ok(());
            }
        }
        self.free.insert(index, index + 1);
        self.coalesce_forward(index, index + 1);
        self.free_count += 1;
        Ok(())
    }

    fn coalesce_forward(&mut self, start: usize, end: usize) {
        let successor = self
            .free
            .range(end..)
            .next()
            .map(|(&next_start, &next_end)| (next_start, next_end));
        if let Some((next_start, next_end)) = successor {
            if next_start == end {
                self.free.remove(&next_start);
                self.free.insert(start, next_end);
            }
        }
    }

    /// Extend the id range; ids `[capacity, new_capacity)` become free
    pub fn extend_capacity(&mut self, new_capacity: usize) -> Result<()> {
        check_argument(
            new_capacity >= self.capacity,
            "capacity cannot shrink",
        )?;
        if new_capacity == self.capacity {
            return Ok(());
        }
        let added = new_capacity - self.capacity;
        // merge with a trailing free interval when present
        let last = self.free.iter().next_back().map(|(&s, &e)| (s, e));
        if let Some((start, end)) = last {
            if end == self.capacity {
                self.free.insert(start, new_capacity);
                self.capacity = new_capacity;
                self.free_count += added;
                return Ok(());
            }
        }
        self.free.insert(self.capacity, new_capacity);
        self.capacity = new_capacity;
        self.free_count += added;
        Ok(())
    }

    /// True when no free id remains
    pub fn is_empty(&self) -> bool {
        self.free_count == 0
    }

    /// Size of the managed id range
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of ids currently allocated
    pub fn used(&self) -> usize {
        self.capacity - self.free_count
    }
}
