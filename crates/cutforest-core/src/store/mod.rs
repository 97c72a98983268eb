//! Point storage: handle management and the compacting point arena

mod index_manager;
mod point_store;

pub use index_manager::IndexIntervalManager;
pub use point_store::{PointStore, PointStoreBuilder, INFEASIBLE_INDEX, INFEASIBLE_LOCATION};

use crate::error::Result;

/// Handle-to-vector resolution, the seam between point consumers (trees,
/// summaries) and the storage layer.
pub trait PointAccess {
    /// Copy of the stored point in logical order
    fn point(&self, handle: i32) -> Result<Vec<f32>>;

    /// Dimension of every stored point
    fn dimensions(&self) -> usize;
}
