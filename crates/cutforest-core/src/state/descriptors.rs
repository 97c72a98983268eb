//! Plain-data state descriptors

use crate::error::{ForestError, Result};
use serde::{Deserialize, Serialize};

/// Version written into every new [`ForestState`]
pub const STATE_VERSION: &str = "4.0";

/// Versions this build is able to load
pub(crate) const KNOWN_VERSIONS: &[&str] = &["4.0"];

pub(crate) fn check_version(version: &str) -> Result<()> {
    if KNOWN_VERSIONS.contains(&version) {
        Ok(())
    } else {
        Err(ForestError::UnsupportedVersion(version.to_string()))
    }
}

/// Captured random-stream position, allowing a restored component to continue
/// the exact sequence of draws of the component it was captured from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RngState {
    /// The 256-bit stream seed
    pub seed: [u8; 32],
    /// Word position within the stream
    pub word_pos: u128,
}

/// Concurrency hints carried alongside a snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorContext {
    /// Whether the forest scored trees in parallel
    pub parallel_execution_enabled: bool,
    /// Requested worker count; 0 means the runtime default
    pub thread_pool_size: usize,
}

/// Snapshot of a [`PointStore`](crate::store::PointStore)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointStoreState {
    /// Point dimension
    pub dimensions: usize,
    /// Shingle size
    pub shingle_size: usize,
    /// Maximum number of points
    pub capacity: usize,
    /// Whether the store maintained the rolling shingle
    pub internal_shingling: bool,
    /// Whether shingles used cyclic-phase layout
    pub internal_rotation: bool,
    /// Flat-store size, in points
    pub current_store_capacity: usize,
    /// Handle-range size
    pub index_capacity: usize,
    /// First writable offset of the flat store
    pub start_of_free_segment: usize,
    /// Sequence index of the next append
    pub next_sequence_index: u64,
    /// Rolling shingle, in sliding order; present only with internal shingling
    pub internal_shingle: Option<Vec<f32>>,
    /// Observable reference count per handle
    pub ref_counts: Vec<u32>,
    /// Location table; delta-coded when `compressed`
    pub locations: Vec<i32>,
    /// Occupied prefix of the flat store
    pub store: Vec<f32>,
    /// Whether index lists are delta-coded
    pub compressed: bool,
}

/// Snapshot of a [`CompactSampler`](crate::sampler::CompactSampler)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactSamplerState {
    /// Maximum number of entries
    pub sample_size: usize,
    /// Decay rate applied to sequence indices
    pub time_decay: f64,
    /// Number of occupied entries
    pub size: usize,
    /// Heap weights
    pub weight: Vec<f32>,
    /// Point-store handles, parallel to `weight`
    pub point_index: Vec<u32>,
    /// Sequence indices, parallel to `weight`
    pub sequence_index: Vec<u64>,
    /// Largest sequence index observed
    pub max_sequence_index: u64,
    /// Random-stream position for exact continuation
    pub rng: Option<RngState>,
}

/// Snapshot of a [`RandomCutTree`](crate::tree::RandomCutTree)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeState {
    /// Maximum number of distinct points
    pub max_size: usize,
    /// Point dimension
    pub dimensions: usize,
    /// Whether bounding boxes were cached
    pub bounding_box_caching: bool,
    /// Root node code, `-1` when empty
    pub root: i32,
    /// Cut dimension per internal node
    pub cut_dimension: Vec<u32>,
    /// Cut value per internal node
    pub cut_value: Vec<f32>,
    /// Left child code per internal node
    pub left: Vec<i32>,
    /// Right child code per internal node
    pub right: Vec<i32>,
    /// Parent code per internal node
    pub parent: Vec<i32>,
    /// Subtree mass per internal node
    pub mass: Vec<u32>,
    /// Free internal slots
    pub free_internal: Vec<u32>,
    /// Point handle per leaf; delta-coded when `compressed`
    pub leaf_point: Vec<i32>,
    /// Parent code per leaf
    pub leaf_parent: Vec<i32>,
    /// Duplicate count per leaf
    pub leaf_mass: Vec<u32>,
    /// Free leaf slots
    pub free_leaf: Vec<u32>,
    /// When true the tree must be completed by replaying its sampler
    pub partial_tree_in_use: bool,
    /// Whether index lists are delta-coded
    pub compressed: bool,
    /// Random-stream position for exact continuation
    pub rng: Option<RngState>,
}

/// Complete snapshot of a forest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForestState {
    /// Format version; loaders reject versions they do not know
    pub version: String,
    /// Number of trees
    pub number_of_trees: usize,
    /// Point dimension after shingling
    pub dimensions: usize,
    /// Shingle size
    pub shingle_size: usize,
    /// Reservoir size per tree
    pub sample_size: usize,
    /// Decay rate applied to sequence indices
    pub time_decay: f64,
    /// Updates absorbed before scoring produces output
    pub output_after: usize,
    /// Center-of-mass flag, carried for descriptor compatibility
    pub center_of_mass: bool,
    /// Whether components track sequence indices
    pub store_sequence_indexes: bool,
    /// Whether trees cached bounding boxes
    pub bounding_box_caching: bool,
    /// Whether the store maintained the rolling shingle
    pub internal_shingling: bool,
    /// Whether shingles used cyclic-phase layout
    pub internal_rotation: bool,
    /// Numeric precision marker; this implementation always writes true
    pub single_precision: bool,
    /// Whether index lists in child states are delta-coded
    pub compress: bool,
    /// Whether saved trees require sampler replay on load
    pub partial_trees_in_use: bool,
    /// Whether sampler states are present
    pub save_sampler_state: bool,
    /// Whether tree states are present
    pub save_tree_state: bool,
    /// Whether the point-store state is present
    pub save_coordinator_state: bool,
    /// Total updates absorbed by the forest
    pub total_updates: u64,
    /// Point-store snapshot
    pub point_store: Option<PointStoreState>,
    /// Per-tree sampler snapshots
    pub sampler_states: Option<Vec<CompactSamplerState>>,
    /// Per-tree structure snapshots
    pub tree_states: Option<Vec<TreeState>>,
    /// Concurrency hints
    pub executor_context: Option<ExecutorContext>,
}

impl ForestState {
    /// Serialize the state to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ForestError::IllegalState(format!("state encoding failed: {}", e)))
    }

    /// Deserialize a state from bytes, validating the version
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (state, _): (ForestState, usize) =
            bincode::serde::decode_from_slice(bytes, bincode::config::standard())
                .map_err(|e| ForestError::Misaligned(format!("state decoding failed: {}", e)))?;
        check_version(&state.version)?;
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_gate() {
        assert!(check_version("4.0").is_ok());
        let err = check_version("9.9").unwrap_err();
        assert!(matches!(err, ForestError::UnsupportedVersion(_)));
    }
}
