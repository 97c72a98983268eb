//! Forest façade
//!
//! Wires the point store, samplers and trees into the per-update ingest
//! pipeline: transform the input, append it to the store, offer the handle to
//! every component's sampler, apply the resulting tree insertions and
//! evictions, and settle reference counts. Scoring is a read-only phase across
//! all trees and may run in parallel.

use crate::error::{check_argument, Result};
use crate::sampler::CompactSampler;
use crate::store::{PointStore, INFEASIBLE_INDEX};
use crate::tree::RandomCutTree;
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use tracing::debug;

const DEFAULT_NUMBER_OF_TREES: usize = 30;
const DEFAULT_SAMPLE_SIZE: usize = 256;

/// A sampler paired with the tree it feeds
#[derive(Debug, Clone)]
pub struct SamplerPlusTree {
    pub(crate) sampler: CompactSampler,
    pub(crate) tree: RandomCutTree,
}

impl SamplerPlusTree {
    /// The sampler half of the component
    pub fn sampler(&self) -> &CompactSampler {
        &self.sampler
    }

    /// The tree half of the component
    pub fn tree(&self) -> &RandomCutTree {
        &self.tree
    }
}

/// Configuration for [`Forest`]
#[derive(Debug, Clone)]
pub struct ForestBuilder {
    dimensions: usize,
    shingle_size: usize,
    number_of_trees: usize,
    sample_size: usize,
    time_decay: Option<f64>,
    output_after: Option<usize>,
    internal_shingling: bool,
    internal_rotation: bool,
    bounding_box_caching: bool,
    store_sequence_indexes: bool,
    center_of_mass: bool,
    initial_store_size: Option<usize>,
    random_seed: u64,
}

impl ForestBuilder {
    /// Start a builder for points of the given (shingled) dimension
    pub fn new(dimensions: usize, shingle_size: usize) -> Self {
        Self {
            dimensions,
            shingle_size,
            number_of_trees: DEFAULT_NUMBER_OF_TREES,
            sample_size: DEFAULT_SAMPLE_SIZE,
            time_decay: None,
            output_after: None,
            internal_shingling: false,
            internal_rotation: false,
            bounding_box_caching: true,
            store_sequence_indexes: false,
            center_of_mass: false,
            initial_store_size: None,
            random_seed: 42,
        }
    }

    /// Number of trees in the ensemble
    pub fn number_of_trees(mut self, number_of_trees: usize) -> Self {
        self.number_of_trees = number_of_trees;
        self
    }

    /// Reservoir size per tree
    pub fn sample_size(mut self, sample_size: usize) -> Self {
        self.sample_size = sample_size;
        self
    }

    /// Decay rate of sampler weights; defaults to `1 / (10 * sample_size)`
    pub fn time_decay(mut self, time_decay: f64) -> Self {
        self.time_decay = Some(time_decay);
        self
    }

    /// Updates absorbed before scoring produces output; defaults to a quarter
    /// of the sample size
    pub fn output_after(mut self, output_after: usize) -> Self {
        self.output_after = Some(output_after);
        self
    }

    /// Maintain the rolling shingle inside the point store
    pub fn internal_shingling(mut self, enabled: bool) -> Self {
        self.internal_shingling = enabled;
        self
    }

    /// Use cyclic-phase shingles instead of a sliding window
    pub fn internal_rotation(mut self, enabled: bool) -> Self {
        self.internal_rotation = enabled;
        self
    }

    /// Cache bounding boxes on tree nodes
    pub fn bounding_box_caching(mut self, enabled: bool) -> Self {
        self.bounding_box_caching = enabled;
        self
    }

    /// Track sequence indices in components
    pub fn store_sequence_indexes(mut self, enabled: bool) -> Self {
        self.store_sequence_indexes = enabled;
        self
    }

    /// Carried configuration flag; no effect on this implementation
    pub fn center_of_mass(mut self, enabled: bool) -> Self {
        self.center_of_mass = enabled;
        self
    }

    /// Initial point-store size, in points
    pub fn initial_store_size(mut self, initial_store_size: usize) -> Self {
        self.initial_store_size = Some(initial_store_size);
        self
    }

    /// Seed for all per-component random streams
    pub fn random_seed(mut self, random_seed: u64) -> Self {
        self.random_seed = random_seed;
        self
    }

    /// Validate the configuration and build the forest
    pub fn build(self) -> Result<Forest> {
        check_argument(self.number_of_trees > 0, "need at least one tree")?;
        check_argument(self.sample_size > 0, "sample size must be greater than 0")?;
        let capacity = self.number_of_trees * self.sample_size + 1;
        let mut store_builder = PointStore::builder(self.dimensions, self.shingle_size, capacity)
            .internal_shingling(self.internal_shingling)
            .internal_rotation(self.internal_rotation);
        if let Some(initial) = self.initial_store_size {
            store_builder = store_builder.initial_size(initial);
        }
        let store = store_builder.build()?;

        let time_decay = self
            .time_decay
            .unwrap_or(1.0 / (10.0 * self.sample_size as f64));
        check_argument(time_decay >= 0.0, "time decay cannot be negative")?;
        let output_after = self.output_after.unwrap_or((self.sample_size / 4).max(1));

        let mut components = Vec::with_capacity(self.number_of_trees);
        for i in 0..self.number_of_trees {
            // distinct, reproducible streams per component
            let component_seed = self.random_seed.wrapping_add(1 + i as u64);
            components.push(SamplerPlusTree {
                sampler: CompactSampler::new(self.sample_size, time_decay, component_seed)?,
                tree: RandomCutTree::new(
                    self.sample_size,
                    self.dimensions,
                    self.bounding_box_caching,
                    component_seed.wrapping_mul(0x9e37_79b9_7f4a_7c15),
                )?,
            });
        }

        Ok(Forest {
            dimensions: self.dimensions,
            shingle_size: self.shingle_size,
            number_of_trees: self.number_of_trees,
            sample_size: self.sample_size,
            time_decay,
            output_after,
            internal_shingling: self.internal_shingling,
            internal_rotation: self.internal_rotation,
            bounding_box_caching: self.bounding_box_caching,
            store_sequence_indexes: self.store_sequence_indexes,
            center_of_mass: self.center_of_mass,
            random_seed: self.random_seed,
            store,
            components,
            total_updates: 0,
        })
    }
}

/// An ensemble of random cut trees over a shared point store.
#[derive(Debug, Clone)]
pub struct Forest {
    dimensions: usize,
    shingle_size: usize,
    number_of_trees: usize,
    sample_size: usize,
    time_decay: f64,
    output_after: usize,
    internal_shingling: bool,
    internal_rotation: bool,
    bounding_box_caching: bool,
    store_sequence_indexes: bool,
    center_of_mass: bool,
    random_seed: u64,
    pub(crate) store: PointStore,
    pub(crate) components: Vec<SamplerPlusTree>,
    pub(crate) total_updates: u64,
}

impl Forest {
    /// Start a builder for points of the given (shingled) dimension
    pub fn builder(dimensions: usize, shingle_size: usize) -> ForestBuilder {
        ForestBuilder::new(dimensions, shingle_size)
    }

    /// Absorb one update.
    ///
    /// With internal shingling the input is one `base_dimension`-length
    /// observation, otherwise a full shingled point. Reference counts settle
    /// so that every count equals the number of samplers holding the handle.
    pub fn update(&mut self, point: &[f32]) -> Result<()> {
        let handle = self.store.add(point, self.total_updates)?;
        self.total_updates += 1;
        if handle == INFEASIBLE_INDEX {
            return Ok(());
        }
        let sequence_index = self.total_updates;
        for component in self.components.iter_mut() {
            if component.sampler.accept_point(sequence_index) {
                let mut deleted = None;
                if let Some(evicted) = component.sampler.evicted() {
                    let removed = component.tree.remove_point(
                        evicted.value as i32,
                        evicted.sequence_index,
                        &self.store,
                    )?;
                    deleted = Some(removed);
                }
                let added = component
                    .tree
                    .add_point(handle, sequence_index, &self.store)?;
                component.sampler.add_point(added as u32)?;
                self.store.increment_ref_count(added)?;
                if let Some(removed) = deleted {
                    self.store.decrement_ref_count(removed)?;
                }
            }
        }
        // release the transient hold taken by add
        let remaining = self.store.decrement_ref_count(handle)?;
        if remaining == 0 {
            debug!(handle, "update was sampled by no tree");
        }
        Ok(())
    }

    /// Anomaly score of a point against the current ensemble: the average of
    /// per-tree expected-inverse-depth scores. Returns 0 until `output_after`
    /// updates have been absorbed.
    pub fn score(&self, point: &[f32]) -> Result<f64> {
        if self.total_updates < self.output_after as u64 {
            return Ok(0.0);
        }
        let shingled = self.store.transform_to_shingled_point(point)?;
        self.score_shingled(&shingled)
    }

    fn score_shingled(&self, shingled: &[f32]) -> Result<f64> {
        #[cfg(feature = "parallel")]
        let scores: Result<Vec<f64>> = self
            .components
            .par_iter()
            .filter(|c| c.tree.mass() > 0)
            .map(|c| c.tree.score(shingled, &self.store))
            .collect();
        #[cfg(not(feature = "parallel"))]
        let scores: Result<Vec<f64>> = self
            .components
            .iter()
            .filter(|c| c.tree.mass() > 0)
            .map(|c| c.tree.score(shingled, &self.store))
            .collect();
        let scores = scores?;
        if scores.is_empty() {
            return Ok(0.0);
        }
        Ok(scores.iter().sum::<f64>() / scores.len() as f64)
    }

    /// Point dimension after shingling
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Shingle size
    pub fn shingle_size(&self) -> usize {
        self.shingle_size
    }

    /// Number of trees in the ensemble
    pub fn number_of_trees(&self) -> usize {
        self.number_of_trees
    }

    /// Reservoir size per tree
    pub fn sample_size(&self) -> usize {
        self.sample_size
    }

    /// Decay rate of sampler weights
    pub fn time_decay(&self) -> f64 {
        self.time_decay
    }

    /// Updates absorbed before scoring produces output
    pub fn output_after(&self) -> usize {
        self.output_after
    }

    /// Whether the point store maintains the rolling shingle
    pub fn is_internal_shingling_enabled(&self) -> bool {
        self.internal_shingling
    }

    /// Whether shingles use cyclic-phase layout
    pub fn is_internal_rotation_enabled(&self) -> bool {
        self.internal_rotation
    }

    /// Whether trees cache bounding boxes
    pub fn is_bounding_box_caching_enabled(&self) -> bool {
        self.bounding_box_caching
    }

    /// Whether components track sequence indices
    pub fn is_store_sequence_indexes_enabled(&self) -> bool {
        self.store_sequence_indexes
    }

    /// Carried configuration flag
    pub fn is_center_of_mass_enabled(&self) -> bool {
        self.center_of_mass
    }

    /// Seed the forest was built with
    pub fn random_seed(&self) -> u64 {
        self.random_seed
    }

    /// Total updates absorbed
    pub fn total_updates(&self) -> u64 {
        self.total_updates
    }

    /// The shared point store
    pub fn point_store(&self) -> &PointStore {
        &self.store
    }

    /// The sampler-plus-tree components
    pub fn components(&self) -> &[SamplerPlusTree] {
        &self.components
    }

    pub(crate) fn set_total_updates(&mut self, total_updates: u64) {
        self.total_updates = total_updates;
    }
}
