//! # Cutforest Core
//!
//! Streaming random cut forest machinery for anomaly detection over shingled
//! multivariate numeric streams.
//!
//! ## Components
//!
//! - **Point store**: a compacting, reference-counted arena that stores
//!   overlapping shingled vectors once and hands out stable integer handles
//!   ([`store::PointStore`])
//! - **Samplers**: time-decayed weighted reservoirs over handles
//!   ([`sampler::CompactSampler`])
//! - **Trees**: compact array-based random cut trees with deterministic
//!   seeded cuts ([`tree::RandomCutTree`])
//! - **Forest**: the façade wiring one update through store, samplers and
//!   trees, with read-only (optionally parallel) scoring ([`forest::Forest`])
//! - **State**: semantic snapshot descriptors and the mapper that restores a
//!   statistically equivalent forest ([`state::ForestMapper`])
//!
//! ## Concurrency model
//!
//! Single writer, many readers: every mutation takes `&mut self` and runs to
//! completion on the calling task. Scoring shares the forest immutably and
//! fans out across trees when the `parallel` feature (default on) is enabled.
//!
//! Forecast-error tracking and calibration live in the companion
//! `cutforest-cast` crate.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod forest;
pub mod sampler;
pub mod state;
pub mod store;
pub mod summary;
pub mod tree;
pub mod types;

pub use error::{ForestError, Result};
pub use forest::{Forest, ForestBuilder, SamplerPlusTree};
pub use sampler::{CompactSampler, SimpleStreamSampler};
pub use state::{
    CompactSamplerState, ExecutorContext, ForestMapper, ForestState, PointStoreState, TreeState,
    STATE_VERSION,
};
pub use store::{
    IndexIntervalManager, PointAccess, PointStore, PointStoreBuilder, INFEASIBLE_INDEX,
    INFEASIBLE_LOCATION,
};
pub use summary::SampleSummary;
pub use tree::RandomCutTree;
pub use types::{DiVector, RangeVector, Weighted};
