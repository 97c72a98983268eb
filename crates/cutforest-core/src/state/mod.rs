//! Snapshot descriptors and the forest state mapper
//!
//! State is semantic, not byte-exact: descriptors are plain serde structs
//! enumerating configuration, the point store, per-tree sampler and tree
//! structures. [`ForestMapper`] converts between a live
//! [`Forest`](crate::forest::Forest) and a [`ForestState`], preserving
//! statistical equivalence: a rebuilt forest produces identical outputs for
//! any subsequent input sequence as long as samplers and the point store (or
//! a semantic equivalent) were saved.

mod descriptors;
mod legacy;
mod mapper;

pub use descriptors::{
    CompactSamplerState, ExecutorContext, ForestState, PointStoreState, RngState, TreeState,
    STATE_VERSION,
};
pub use legacy::convert_array_samplers;
pub use mapper::ForestMapper;

/// Delta-code an index list: first entry absolute, the rest successive
/// differences.
pub(crate) fn delta_encode(values: &[i32]) -> Vec<i32> {
    let mut out = Vec::with_capacity(values.len());
    let mut previous = 0i32;
    for &value in values {
        out.push(value.wrapping_sub(previous));
        previous = value;
    }
    out
}

/// Inverse of [`delta_encode`].
pub(crate) fn delta_decode(deltas: &[i32]) -> Vec<i32> {
    let mut out = Vec::with_capacity(deltas.len());
    let mut running = 0i32;
    for &delta in deltas {
        running = running.wrapping_add(delta);
        out.push(running);
    }
    out
}
