//! Compacting, reference-counted point storage
//!
//! Points are fixed-length `f32` vectors of dimension
//! `shingle_size * base_dimension`, stored once in a flat array even when many
//! shingles overlap. Consumers hold stable integer handles; a location table
//! adds a level of indirection so that compaction can move data without
//! invalidating handles.
//!
//! With internal shingling enabled the store maintains the rolling shingle
//! itself and callers append `base_dimension`-sized updates. Successive
//! shingles share `dimensions - base_dimension` values, so an append usually
//! writes only `base_dimension` new cells.
//!
//! With internal rotation enabled successive updates overwrite a cyclic phase
//! position instead of sliding the window. Rotation is kept as an invariant on
//! storage offsets (`offset % dimensions` equals the rotation phase at
//! insertion time); reads undo the rotation, and compaction preserves the
//! invariant by zero-padding destination blocks.

use crate::error::{check_argument, ForestError, Result};
use crate::state::{delta_decode, delta_encode, PointStoreState};
use crate::store::index_manager::IndexIntervalManager;
use crate::store::PointAccess;
use crate::summary::{SampleSummary, DEFAULT_LOWER_FRACTION, DEFAULT_UPPER_FRACTION};
use std::collections::HashMap;
use tracing::debug;

/// Handle returned when an append cannot produce a point yet (shingle warm-up)
pub const INFEASIBLE_INDEX: i32 = -1;

/// Location-table entry for a freed handle
pub const INFEASIBLE_LOCATION: i32 = -1;

/// Configuration builder for [`PointStore`]
#[derive(Debug, Clone)]
pub struct PointStoreBuilder {
    dimensions: usize,
    shingle_size: usize,
    capacity: usize,
    initial_size: Option<usize>,
    internal_shingling: bool,
    internal_rotation: bool,
}

impl PointStoreBuilder {
    /// Start a builder with the mandatory sizing parameters
    pub fn new(dimensions: usize, shingle_size: usize, capacity: usize) -> Self {
        Self {
            dimensions,
            shingle_size,
            capacity,
            initial_size: None,
            internal_shingling: false,
            internal_rotation: false,
        }
    }

    /// Initial store size in points; defaults to `capacity`
    pub fn initial_size(mut self, initial_size: usize) -> Self {
        self.initial_size = Some(initial_size);
        self
    }

    /// Maintain the rolling shingle inside the store
    pub fn internal_shingling(mut self, enabled: bool) -> Self {
        self.internal_shingling = enabled;
        self
    }

    /// Use cyclic-phase shingles instead of a sliding window
    pub fn internal_rotation(mut self, enabled: bool) -> Self {
        self.internal_rotation = enabled;
        self
    }

    /// Validate the configuration and build the store
    pub fn build(self) -> Result<PointStore> {
        check_argument(self.dimensions > 0, "dimensions must be greater than 0")?;
        check_argument(self.capacity > 0, "capacity must be greater than 0")?;
        check_argument(
            self.shingle_size >= 1 && self.dimensions % self.shingle_size == 0,
            "shingle size must divide dimensions",
        )?;
        check_argument(
            !self.internal_rotation || self.shingle_size > 1,
            "rotation requires a shingle size greater than 1",
        )?;
        let initial = self.initial_size.unwrap_or(self.capacity);
        check_argument(
            initial >= 1 && initial <= self.capacity,
            "initial size must lie in [1, capacity]",
        )?;

        let dimensions = self.dimensions;
        Ok(PointStore {
            index_manager: IndexIntervalManager::new(initial)?,
            store: vec![0.0; initial * dimensions],
            internal_shingle: if self.internal_shingling {
                vec![0.0; dimensions]
            } else {
                Vec::new()
            },
            rotation_enabled: self.internal_rotation,
            next_sequence_index: 0,
            ref_count: vec![0; initial],
            ref_count_overflow: HashMap::new(),
            locations: vec![INFEASIBLE_LOCATION; initial],
            start_of_free_segment: 0,
            dimensions,
            shingle_size: self.shingle_size,
            base_dimension: dimensions / self.shingle_size,
            capacity: self.capacity,
            current_store_capacity: initial,
            internal_shingling_enabled: self.internal_shingling,
        })
    }
}

/// Reference-counted arena of shingled points with stable integer handles
#[derive(Debug, Clone)]
pub struct PointStore {
    index_manager: IndexIntervalManager,
    store: Vec<f32>,
    internal_shingle: Vec<f32>,
    rotation_enabled: bool,
    next_sequence_index: u64,
    ref_count: Vec<u8>,
    ref_count_overflow: HashMap<u32, u32>,
    locations: Vec<i32>,
    start_of_free_segment: usize,
    dimensions: usize,
    shingle_size: usize,
    base_dimension: usize,
    capacity: usize,
    current_store_capacity: usize,
    internal_shingling_enabled: bool,
}

impl PointStore {
    /// Start building a store
    pub fn builder(dimensions: usize, shingle_size: usize, capacity: usize) -> PointStoreBuilder {
        PointStoreBuilder::new(dimensions, shingle_size, capacity)
    }

    /// Append a point and return its handle.
    ///
    /// With internal shingling the input is a `base_dimension`-length update
    /// and the first `shingle_size - 1` appends return [`INFEASIBLE_INDEX`];
    /// otherwise the input must be a full `dimensions`-length point. On
    /// failure no handle is allocated and no point data is written.
    pub fn add(&mut self, point: &[f32], _sequence_number: u64) -> Result<i32> {
        if self.internal_shingling_enabled {
            check_argument(
                point.len() == self.base_dimension,
                "point length must equal the base dimension",
            )?;
        } else {
            check_argument(
                point.len() == self.dimensions,
                "point length must equal dimensions",
            )?;
        }

        self.next_sequence_index += 1;
        let temp_point = if self.internal_shingling_enabled {
            // the rolling shingle is kept in sliding order; rotation is applied
            // on output only
            Self::fold_into_shingle(
                &mut self.internal_shingle,
                point,
                self.base_dimension,
                self.dimensions,
            );
            if self.next_sequence_index < self.shingle_size as u64 {
                return Ok(INFEASIBLE_INDEX);
            }
            self.internal_shingle.clone()
        } else {
            point.to_vec()
        };

        let mut amount_to_write = self.amount_to_write(&temp_point);
        if self.start_of_free_segment + amount_to_write > self.current_store_capacity * self.dimensions
        {
            self.compact()?;
            // compaction changes the tail, so the overlap check must rerun
            amount_to_write = self.amount_to_write(&temp_point);
            while self.start_of_free_segment + amount_to_write
                > self.current_store_capacity * self.dimensions
            {
                if !self.resize_store() {
                    return Err(ForestError::Capacity("point store is full".to_string()));
                }
            }
        }

        let next_index = self.take_index()?;
        self.locations[next_index] =
            (self.start_of_free_segment + amount_to_write - self.dimensions) as i32;
        if amount_to_write <= self.dimensions {
            let src = self.dimensions - amount_to_write;
            self.store[self.start_of_free_segment..self.start_of_free_segment + amount_to_write]
                .copy_from_slice(&temp_point[src..src + amount_to_write]);
        } else {
            let dest = self.start_of_free_segment + amount_to_write - self.dimensions;
            // alignment padding stays zeroed
            for cell in &mut self.store[self.start_of_free_segment..dest] {
                *cell = 0.0;
            }
            self.store[dest..dest + self.dimensions].copy_from_slice(&temp_point);
        }
        self.start_of_free_segment += amount_to_write;
        self.ref_count[next_index] = 1;
        Ok(next_index as i32)
    }

    /// Number of cells the next append must claim, including any rotation
    /// alignment padding.
    fn amount_to_write(&self, temp_point: &[f32]) -> usize {
        let phase = |seq: u64| ((seq * self.base_dimension as u64) % self.dimensions as u64) as usize;
        if self.check_shingle_alignment(self.start_of_free_segment, temp_point) {
            if !self.rotation_enabled
                || self.start_of_free_segment % self.dimensions
                    == phase(self.next_sequence_index - 1)
            {
                return self.base_dimension;
            }
        } else if !self.rotation_enabled {
            return self.dimensions;
        }
        self.dimensions
            + (self.dimensions - self.start_of_free_segment % self.dimensions
                + phase(self.next_sequence_index))
                % self.dimensions
    }

    /// True when the tail of the flat store already holds the first
    /// `dimensions - base_dimension` values of `point`.
    fn check_shingle_alignment(&self, location: usize, point: &[f32]) -> bool {
        if location + self.base_dimension < self.dimensions {
            return false;
        }
        let tail = location + self.base_dimension - self.dimensions;
        (0..self.dimensions - self.base_dimension).all(|i| point[i] == self.store[tail + i])
    }

    fn take_index(&mut self) -> Result<usize> {
        if self.index_manager.is_empty() {
            if self.index_manager.capacity() < self.capacity {
                let old = self.index_manager.capacity();
                let new_capacity = self.capacity.min(1 + (1.1 * old as f64) as usize);
                self.index_manager.extend_capacity(new_capacity)?;
                self.ref_count.resize(new_capacity, 0);
                self.locations.resize(new_capacity, INFEASIBLE_LOCATION);
            } else {
                return Err(ForestError::Capacity(
                    "index manager in point store is full".to_string(),
                ));
            }
        }
        self.index_manager.take_index()
    }

    /// Grow the flat store by roughly 1.1x, bounded by `capacity` points, or
    /// `2 * capacity` under rotation to leave room for a compaction cycle.
    /// Returns false when no further growth is possible.
    fn resize_store(&mut self) -> bool {
        let max_capacity = if self.rotation_enabled {
            2 * self.capacity
        } else {
            self.capacity
        };
        let new_capacity = max_capacity.min(1 + (1.1 * self.current_store_capacity as f64) as usize);
        if new_capacity > self.current_store_capacity {
            debug!(
                from = self.current_store_capacity,
                to = new_capacity,
                "resizing point store"
            );
            self.store.resize(new_capacity * self.dimensions, 0.0);
            self.current_store_capacity = new_capacity;
            true
        } else {
            false
        }
    }

    /// Increment the reference count of a live handle and return the new
    /// observable count. Counts past 255 promote into the overflow map.
    pub fn increment_ref_count(&mut self, handle: i32) -> Result<u32> {
        let index = self.check_live(handle)?;
        if let Some(excess) = self.ref_count_overflow.get_mut(&(index as u32)) {
            *excess += 1;
            return Ok(255 + *excess);
        }
        if self.ref_count[index] == u8::MAX {
            self.ref_count_overflow.insert(index as u32, 1);
            Ok(256)
        } else {
            self.ref_count[index] += 1;
            Ok(self.ref_count[index] as u32)
        }
    }

    /// Decrement the reference count of a live handle and return the new
    /// observable count. Reaching zero frees the handle; its storage is
    /// reclaimed by the next compaction.
    pub fn decrement_ref_count(&mut self, handle: i32) -> Result<u32> {
        let index = self.check_live(handle)?;
        if let Some(excess) = self.ref_count_overflow.remove(&(index as u32)) {
            if excess > 1 {
                self.ref_count_overflow.insert(index as u32, excess - 1);
            }
            return Ok(255 + excess - 1);
        }
        if self.ref_count[index] == 1 {
            self.index_manager.release_index(index)?;
            self.ref_count[index] = 0;
            self.locations[index] = INFEASIBLE_LOCATION;
            Ok(0)
        } else {
            self.ref_count[index] -= 1;
            Ok(self.ref_count[index] as u32)
        }
    }

    /// Observable reference count of a handle (primary byte plus overflow)
    pub fn ref_count(&self, handle: i32) -> Result<u32> {
        let index = self.check_range(handle)?;
        let excess = self
            .ref_count_overflow
            .get(&(index as u32))
            .copied()
            .unwrap_or(0);
        Ok(self.ref_count[index] as u32 + excess)
    }

    fn check_range(&self, handle: i32) -> Result<usize> {
        if handle < 0 || handle as usize >= self.locations.len() {
            return Err(ForestError::InvalidHandle(format!(
                "handle {} not supported by store",
                handle
            )));
        }
        Ok(handle as usize)
    }

    fn check_live(&self, handle: i32) -> Result<usize> {
        let index = self.check_range(handle)?;
        if self.ref_count[index] == 0 {
            return Err(ForestError::InvalidHandle(format!(
                "handle {} is not in use",
                handle
            )));
        }
        Ok(index)
    }

    /// Copy of the stored point in logical (unrotated) order
    pub fn numeric_vector(&self, handle: i32) -> Result<Vec<f32>> {
        let index = self.check_range(handle)?;
        let location = self.locations[index];
        if location < 0 {
            return Err(ForestError::InvalidHandle(format!(
                "handle {} has no stored point",
                handle
            )));
        }
        let address = location as usize;
        if !self.rotation_enabled {
            Ok(self.store[address..address + self.dimensions].to_vec())
        } else {
            let mut answer = vec![0.0; self.dimensions];
            for i in 0..self.dimensions {
                answer[(address + i) % self.dimensions] = self.store[address + i];
            }
            Ok(answer)
        }
    }

    /// Rewrite the flat store so that live regions pack densely from offset 0.
    ///
    /// Live `(location, handle)` pairs are sorted by location and walked
    /// greedily into blocks of overlapping storage; each block is moved left
    /// as a unit and the location table is rewritten. Under rotation each
    /// destination is padded with zeros so `offset % dimensions` is preserved.
    pub fn compact(&mut self) -> Result<()> {
        let bound = self.current_store_capacity * self.dimensions;
        let mut live: Vec<(usize, usize)> = Vec::with_capacity(self.index_manager.used());
        for (handle, &location) in self.locations.iter().enumerate() {
            if location >= 0 && (location as usize) < bound {
                live.push((location as usize, handle));
            }
        }
        live.sort_unstable();

        let reclaimable = self.start_of_free_segment;
        let mut fresh_start = 0usize;
        let mut j = 0;
        let end = live.len();
        while j < end {
            let block_start = live[j].0;
            let mut block_end = block_start + self.dimensions;
            // block_start >= fresh_start: blocks only ever move left
            let initial = if self.rotation_enabled {
                (self.dimensions + block_start - fresh_start) % self.dimensions
            } else {
                0
            };

            let mut j_dynamic = j + 1;
            for k in j + 1..end {
                let next = live[k].0;
                if block_end >= next {
                    j_dynamic += 1;
                    block_end = block_end.max(next + self.dimensions);
                } else {
                    break;
                }
            }

            for cell in &mut self.store[fresh_start..fresh_start + initial] {
                *cell = 0.0;
            }
            fresh_start += initial;

            let copy_dest = fresh_start;
            for offset in block_start..block_end {
                debug_assert!(
                    !self.rotation_enabled
                        || fresh_start % self.dimensions == offset % self.dimensions
                );
                if j < end && offset == live[j].0 {
                    self.locations[live[j].1] = fresh_start as i32;
                    j += 1;
                }
                fresh_start += 1;
            }
            if copy_dest < block_start {
                self.store.copy_within(block_start..block_end, copy_dest);
            }

            if j != j_dynamic {
                return Err(ForestError::IllegalState(
                    "block accounting mismatch during compaction".to_string(),
                ));
            }
        }
        self.start_of_free_segment = fresh_start;
        debug!(
            live = live.len(),
            reclaimed = reclaimable.saturating_sub(fresh_start),
            "compacted point store"
        );
        Ok(())
    }

    /// Number of live handles
    pub fn size(&self) -> usize {
        self.index_manager.used()
    }

    /// Fold a `base_dimension`-length update into the rolling shingle,
    /// normalizing negative zeros.
    fn fold_into_shingle(target: &mut [f32], point: &[f32], base_dimension: usize, dimensions: usize) {
        target.copy_within(base_dimension..dimensions, 0);
        for i in 0..base_dimension {
            target[dimensions - base_dimension + i] =
                if point[i] == 0.0 { 0.0 } else { point[i] };
        }
    }

    fn rotation_phase(&self) -> usize {
        ((self.next_sequence_index * self.base_dimension as u64) % self.dimensions as u64) as usize
    }

    /// Copy of the current rolling shingle, rotated when rotation is enabled
    pub fn shingle(&self) -> Result<Vec<f32>> {
        check_argument(
            self.internal_shingling_enabled,
            "internal shingling is not enabled",
        )?;
        Ok(self.copy_shingle())
    }

    fn copy_shingle(&self) -> Vec<f32> {
        if !self.rotation_enabled {
            self.internal_shingle.clone()
        } else {
            let offset = self.rotation_phase();
            let mut answer = vec![0.0; self.dimensions];
            for i in 0..self.dimensions {
                answer[(offset + i) % self.dimensions] = self.internal_shingle[i];
            }
            answer
        }
    }

    /// Fold `point` into a copy of the current shingle without mutating the
    /// store; with internal shingling disabled returns a cleaned copy of the
    /// input.
    pub fn transform_to_shingled_point(&self, point: &[f32]) -> Result<Vec<f32>> {
        if self.internal_shingling_enabled && point.len() == self.base_dimension {
            let mut target = self.copy_shingle();
            if !self.rotation_enabled {
                Self::fold_into_shingle(&mut target, point, self.base_dimension, self.dimensions);
            } else {
                let offset = self.rotation_phase();
                for i in 0..self.base_dimension {
                    target[offset + i] = if point[i] == 0.0 { 0.0 } else { point[i] };
                }
            }
            Ok(target)
        } else {
            check_argument(
                point.len() == self.dimensions,
                "point length must equal dimensions",
            )?;
            Ok(point
                .iter()
                .map(|&v| if v == 0.0 { 0.0 } else { v })
                .collect())
        }
    }

    /// Map coordinate indices of the base-dimension input space into the
    /// shingled space, accounting for the current rotation phase.
    pub fn transform_indices(&self, indices: &[usize]) -> Result<Vec<usize>> {
        check_argument(
            self.internal_shingling_enabled,
            "only allowed with internal shingling",
        )?;
        check_argument(indices.len() <= self.base_dimension, "incorrect length")?;
        let mut results = Vec::with_capacity(indices.len());
        if !self.rotation_enabled {
            for &index in indices {
                check_argument(index < self.base_dimension, "incorrect index")?;
                results.push(index + self.dimensions - self.base_dimension);
            }
        } else {
            let offset = self.rotation_phase();
            for &index in indices {
                check_argument(index < self.base_dimension, "incorrect index")?;
                results.push((index + offset) % self.dimensions);
            }
        }
        Ok(results)
    }

    /// Weighted per-coordinate statistics over the live points, weighting each
    /// point by its reference count.
    pub fn summarize(&self) -> Result<SampleSummary> {
        let mut points = Vec::with_capacity(self.size());
        for handle in 0..self.locations.len() as i32 {
            let weight = self.ref_count(handle)?;
            if weight > 0 {
                points.push((self.numeric_vector(handle)?, weight as f32));
            }
        }
        SampleSummary::from_weighted_points(
            self.dimensions,
            &points,
            DEFAULT_LOWER_FRACTION,
            DEFAULT_UPPER_FRACTION,
        )
    }

    /// Dimension of a stored point
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Shingle size (1 when shingling is not in use)
    pub fn shingle_size(&self) -> usize {
        self.shingle_size
    }

    /// Dimension of a single un-shingled observation
    pub fn base_dimension(&self) -> usize {
        self.base_dimension
    }

    /// Maximum number of points this store will hold
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// True when the store maintains the rolling shingle itself
    pub fn is_internal_shingling_enabled(&self) -> bool {
        self.internal_shingling_enabled
    }

    /// True when shingles use cyclic-phase layout
    pub fn is_internal_rotation_enabled(&self) -> bool {
        self.rotation_enabled
    }

    /// Sequence index of the next expected append
    pub fn next_sequence_index(&self) -> u64 {
        self.next_sequence_index
    }

    /// First offset where new data can be written
    pub fn start_of_free_segment(&self) -> usize {
        self.start_of_free_segment
    }

    /// Current size of the flat store, in points
    pub fn current_store_capacity(&self) -> usize {
        self.current_store_capacity
    }

    /// Current size of the handle range
    pub fn index_capacity(&self) -> usize {
        self.index_manager.capacity()
    }

    /// Location-table entry for a handle; [`INFEASIBLE_LOCATION`] when free
    pub fn location(&self, handle: i32) -> Result<i32> {
        let index = self.check_range(handle)?;
        Ok(self.locations[index])
    }

    /// Copy of the location table
    pub fn location_list(&self) -> Vec<i32> {
        self.locations.clone()
    }

    /// Observable reference counts for every handle
    pub fn observable_ref_counts(&self) -> Vec<u32> {
        (0..self.locations.len())
            .map(|i| {
                self.ref_count[i] as u32
                    + self
                        .ref_count_overflow
                        .get(&(i as u32))
                        .copied()
                        .unwrap_or(0)
            })
            .collect()
    }

    /// The occupied prefix of the flat store
    pub fn store_prefix(&self) -> &[f32] {
        &self.store[..self.start_of_free_segment]
    }

    /// Capture the store as a snapshot descriptor. Only the occupied prefix
    /// of the flat store is saved; `compress` delta-codes the location table.
    pub fn to_state(&self, compress: bool) -> PointStoreState {
        PointStoreState {
            dimensions: self.dimensions,
            shingle_size: self.shingle_size,
            capacity: self.capacity,
            internal_shingling: self.internal_shingling_enabled,
            internal_rotation: self.rotation_enabled,
            current_store_capacity: self.current_store_capacity,
            index_capacity: self.locations.len(),
            start_of_free_segment: self.start_of_free_segment,
            next_sequence_index: self.next_sequence_index,
            internal_shingle: if self.internal_shingling_enabled {
                Some(self.internal_shingle.clone())
            } else {
                None
            },
            ref_counts: self.observable_ref_counts(),
            locations: if compress {
                delta_encode(&self.locations)
            } else {
                self.locations.clone()
            },
            store: self.store_prefix().to_vec(),
            compressed: compress,
        }
    }

    /// Rebuild a store from a snapshot descriptor
    pub fn from_state(state: &PointStoreState) -> Result<Self> {
        if state.ref_counts.len() != state.index_capacity
            || state.locations.len() != state.index_capacity
        {
            return Err(ForestError::Misaligned(
                "reference counts and locations disagree with the index capacity".to_string(),
            ));
        }
        if state.store.len() != state.start_of_free_segment {
            return Err(ForestError::Misaligned(
                "flat store prefix disagrees with the free segment start".to_string(),
            ));
        }
        let locations = if state.compressed {
            delta_decode(&state.locations)
        } else {
            state.locations.clone()
        };
        let mut store = state.store.clone();
        store.resize(state.current_store_capacity * state.dimensions, 0.0);
        let builder = PointStoreBuilder::new(state.dimensions, state.shingle_size, state.capacity)
            .internal_shingling(state.internal_shingling)
            .internal_rotation(state.internal_rotation);
        Self::from_snapshot(
            builder,
            store,
            locations,
            &state.ref_counts,
            state.start_of_free_segment,
            state.next_sequence_index,
            state.current_store_capacity,
            state.internal_shingle.clone(),
        )
    }

    /// Reassemble a store from snapshot parts. Lengths are validated before
    /// any allocation; counts past 255 are split into the overflow map.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_snapshot(
        builder: PointStoreBuilder,
        store: Vec<f32>,
        locations: Vec<i32>,
        ref_counts: &[u32],
        start_of_free_segment: usize,
        next_sequence_index: u64,
        current_store_capacity: usize,
        internal_shingle: Option<Vec<f32>>,
    ) -> Result<PointStore> {
        let mut point_store = builder.build()?;
        if ref_counts.len() != locations.len() {
            return Err(ForestError::Misaligned(
                "reference counts and locations disagree in length".to_string(),
            ));
        }
        if store.len() != current_store_capacity * point_store.dimensions {
            return Err(ForestError::Misaligned(
                "flat store length disagrees with capacity".to_string(),
            ));
        }
        if start_of_free_segment > store.len() {
            return Err(ForestError::Misaligned(
                "free segment start exceeds the flat store".to_string(),
            ));
        }
        if let Some(shingle) = &internal_shingle {
            if !point_store.internal_shingling_enabled || shingle.len() != point_store.dimensions {
                return Err(ForestError::Misaligned(
                    "incorrect shingle information".to_string(),
                ));
            }
        }

        point_store.ref_count = vec![0; ref_counts.len()];
        point_store.ref_count_overflow.clear();
        for (i, &count) in ref_counts.iter().enumerate() {
            if count <= 255 {
                point_store.ref_count[i] = count as u8;
            } else {
                point_store.ref_count[i] = u8::MAX;
                point_store.ref_count_overflow.insert(i as u32, count - 255);
            }
        }
        point_store.index_manager = IndexIntervalManager::from_ref_counts(ref_counts)?;
        point_store.locations = locations;
        point_store.store = store;
        point_store.start_of_free_segment = start_of_free_segment;
        point_store.next_sequence_index = next_sequence_index;
        point_store.current_store_capacity = current_store_capacity;
        if let Some(shingle) = internal_shingle {
            point_store.internal_shingle = shingle;
        }
        Ok(point_store)
    }
}

impl PointAccess for PointStore {
    fn point(&self, handle: i32) -> Result<Vec<f32>> {
        self.numeric_vector(handle)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shingle_overlap_reuse() {
        let mut store = PointStore::builder(6, 3, 8)
            .internal_shingling(true)
            .build()
            .unwrap();

        assert_eq!(store.add(&[1.0, 2.0], 0).unwrap(), INFEASIBLE_INDEX);
        assert_eq!(store.add(&[3.0, 4.0], 1).unwrap(), INFEASIBLE_INDEX);

        let h0 = store.add(&[5.0, 6.0], 2).unwrap();
        assert_eq!(h0, 0);
        assert_eq!(store.location(h0).unwrap(), 0);
        assert_eq!(store.start_of_free_segment(), 6);
        assert_eq!(
            store.numeric_vector(h0).unwrap(),
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]
        );

        let h1 = store.add(&[7.0, 8.0], 3).unwrap();
        assert_eq!(store.location(h1).unwrap(), 2);
        assert_eq!(store.start_of_free_segment(), 8);
        assert_eq!(
            store.numeric_vector(h1).unwrap(),
            vec![3.0, 4.0, 5.0, 6.0, 7.0, 8.0]
        );
    }

    #[test]
    fn test_full_write_on_misaligned_tail() {
        let mut store = PointStore::builder(4, 2, 8).build().unwrap();
        let h0 = store.add(&[1.0, 2.0, 3.0, 4.0], 0).unwrap();
        // tail [3,4] does not match the head [9,9]
        let h1 = store.add(&[9.0, 9.0, 5.0, 6.0], 1).unwrap();
        assert_eq!(store.start_of_free_segment(), 8);
        assert_eq!(store.numeric_vector(h0).unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(store.numeric_vector(h1).unwrap(), vec![9.0, 9.0, 5.0, 6.0]);
    }

    #[test]
    fn test_ref_count_overflow() {
        let mut store = PointStore::builder(2, 1, 4).build().unwrap();
        let h = store.add(&[1.0, 2.0], 0).unwrap();
        for _ in 0..299 {
            store.increment_ref_count(h).unwrap();
        }
        assert_eq!(store.ref_count(h).unwrap(), 300);
        for expected in (0..300).rev() {
            assert_eq!(store.decrement_ref_count(h).unwrap(), expected);
        }
        assert_eq!(store.size(), 0);
        assert!(store.numeric_vector(h).is_err());
        // the freed handle is reallocated first
        assert_eq!(store.add(&[3.0, 4.0], 1).unwrap(), h);
    }

    #[test]
    fn test_compaction_reclaims_holes() {
        let dims = 3;
        let mut store = PointStore::builder(dims, 1, 8).build().unwrap();
        let a = store.add(&[1.0, 1.0, 1.0], 0).unwrap();
        let b = store.add(&[2.0, 2.0, 2.0], 1).unwrap();
        let c = store.add(&[3.0, 3.0, 3.0], 2).unwrap();
        let d = store.add(&[4.0, 4.0, 4.0], 3).unwrap();
        assert_eq!(store.start_of_free_segment(), 4 * dims);

        store.decrement_ref_count(b).unwrap();
        store.decrement_ref_count(c).unwrap();
        store.compact().unwrap();

        assert_eq!(store.start_of_free_segment(), 2 * dims);
        assert_eq!(store.location(a).unwrap(), 0);
        assert_eq!(store.location(d).unwrap(), dims as i32);
        assert_eq!(store.numeric_vector(a).unwrap(), vec![1.0, 1.0, 1.0]);
        assert_eq!(store.numeric_vector(d).unwrap(), vec![4.0, 4.0, 4.0]);
        assert_eq!(store.size(), 2);
    }

    #[test]
    fn test_compaction_preserves_overlapping_blocks() {
        let mut store = PointStore::builder(6, 3, 8)
            .internal_shingling(true)
            .build()
            .unwrap();
        for i in 0..8 {
            store.add(&[i as f32, (10 * i) as f32], i as u64).unwrap();
        }
        let live: Vec<(i32, Vec<f32>)> = (0..store.index_capacity() as i32)
            .filter(|&h| store.ref_count(h).unwrap() > 0)
            .map(|h| (h, store.numeric_vector(h).unwrap()))
            .collect();
        // free one handle in the middle of the overlapping run
        store.decrement_ref_count(live[2].0).unwrap();
        store.compact().unwrap();
        for (h, expected) in live.iter().filter(|(h, _)| *h != live[2].0) {
            assert_eq!(&store.numeric_vector(*h).unwrap(), expected);
        }
    }

    #[test]
    fn test_capacity_error_leaves_store_consistent() {
        let mut store = PointStore::builder(2, 1, 2).build().unwrap();
        let a = store.add(&[1.0, 2.0], 0).unwrap();
        let b = store.add(&[3.0, 4.0], 1).unwrap();
        let err = store.add(&[5.0, 6.0], 2).unwrap_err();
        assert!(matches!(err, ForestError::Capacity(_)));
        assert_eq!(store.size(), 2);
        assert_eq!(store.numeric_vector(a).unwrap(), vec![1.0, 2.0]);
        assert_eq!(store.numeric_vector(b).unwrap(), vec![3.0, 4.0]);
    }

    #[test]
    fn test_rotation_slots_are_stable() {
        let mut store = PointStore::builder(6, 3, 16)
            .internal_shingling(true)
            .internal_rotation(true)
            .build()
            .unwrap();
        let mut handles = Vec::new();
        for i in 1..=9 {
            let h = store
                .add(&[i as f32, (i + 100) as f32], i as u64)
                .unwrap();
            if h != INFEASIBLE_INDEX {
                handles.push((h, store.next_sequence_index()));
            }
        }
        // each observation occupies the slot determined by its own sequence
        // phase, independent of when the containing shingle was created
        for &(h, seq) in &handles {
            let vector = store.numeric_vector(h).unwrap();
            for back in 0..3u64 {
                let obs_seq = seq - back;
                let slot = ((obs_seq * 2) % 6) as usize;
                assert_eq!(vector[(slot + 6 - 2) % 6], obs_seq as f32);
            }
        }
        // rotation invariant: offsets keep their phase
        for &(h, _) in &handles {
            let location = store.location(h).unwrap() as usize;
            let phase_before = location % 6;
            store.compact().unwrap();
            let location_after = store.location(h).unwrap() as usize;
            assert_eq!(location_after % 6, phase_before);
        }
    }

    #[test]
    fn test_transform_to_shingled_point_does_not_mutate() {
        let mut store = PointStore::builder(4, 2, 4)
            .internal_shingling(true)
            .build()
            .unwrap();
        store.add(&[1.0, 2.0], 0).unwrap();
        store.add(&[3.0, 4.0], 1).unwrap();

        let probed = store.transform_to_shingled_point(&[5.0, 6.0]).unwrap();
        assert_eq!(probed, vec![3.0, 4.0, 5.0, 6.0]);
        assert_eq!(store.shingle().unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_transform_indices() {
        let mut store = PointStore::builder(6, 3, 4)
            .internal_shingling(true)
            .build()
            .unwrap();
        store.add(&[1.0, 2.0], 0).unwrap();
        assert_eq!(store.transform_indices(&[0, 1]).unwrap(), vec![4, 5]);
        assert!(store.transform_indices(&[2]).is_err());
    }

    #[test]
    fn test_summarize_weights_by_ref_count() {
        let mut store = PointStore::builder(1, 1, 4).build().unwrap();
        let a = store.add(&[0.0], 0).unwrap();
        let b = store.add(&[10.0], 1).unwrap();
        for _ in 0..8 {
            store.increment_ref_count(b).unwrap();
        }
        let summary = store.summarize().unwrap();
        assert_eq!(summary.total_weight, 10.0);
        assert!((summary.mean[0] - 9.0).abs() < 1e-6);
        assert_eq!(summary.median[0], 10.0);

        store.decrement_ref_count(a).unwrap();
        let summary = store.summarize().unwrap();
        assert_eq!(summary.total_weight, 9.0);
        assert_eq!(summary.mean[0], 10.0);
    }

    #[test]
    fn test_invalid_arguments_raised_before_mutation() {
        let mut store = PointStore::builder(4, 2, 4).build().unwrap();
        assert!(store.add(&[1.0], 0).is_err());
        assert_eq!(store.next_sequence_index(), 0);
        assert!(store.increment_ref_count(3).is_err());
        assert!(store.increment_ref_count(-1).is_err());
        assert!(store.decrement_ref_count(0).is_err());
    }
}
