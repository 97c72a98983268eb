//! Conversion between a live forest and its state descriptor

use crate::error::{ForestError, Result};
use crate::forest::{Forest, SamplerPlusTree};
use crate::sampler::CompactSampler;
use crate::state::descriptors::{check_version, ExecutorContext, ForestState, TreeState, STATE_VERSION};
use crate::store::PointStore;
use crate::tree::RandomCutTree;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use tracing::{debug, info};

/// Converts a [`Forest`] to a [`ForestState`] and back.
///
/// The flags select which pieces a snapshot carries. A rebuilt forest is
/// statistically equivalent to the original; when tree structures are saved
/// (including their random-stream positions) the rebuilt forest continues
/// with outputs identical to the original for the same subsequent inputs.
#[derive(Debug, Clone)]
pub struct ForestMapper {
    /// Include tree structures (cuts, node arrays) in the snapshot
    pub save_tree_state: bool,
    /// Include the point-store snapshot
    pub save_coordinator_state: bool,
    /// Include per-tree sampler snapshots
    pub save_sampler_state: bool,
    /// Include concurrency hints
    pub save_executor_context: bool,
    /// Delta-code index lists in child states
    pub compress: bool,
    /// Save samplers only and repopulate trees from them at load; a smaller
    /// snapshot traded against a longer load
    pub partial_trees_in_use: bool,
}

impl Default for ForestMapper {
    fn default() -> Self {
        Self {
            save_tree_state: false,
            save_coordinator_state: true,
            save_sampler_state: true,
            save_executor_context: false,
            compress: true,
            partial_trees_in_use: false,
        }
    }
}

impl ForestMapper {
    /// A mapper with the default flag set
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture the state of a forest
    pub fn to_state(&self, forest: &Forest) -> Result<ForestState> {
        let point_store = if self.save_coordinator_state {
            Some(forest.point_store().to_state(self.compress))
        } else {
            None
        };
        let sampler_states = if self.save_sampler_state {
            Some(
                forest
                    .components()
                    .iter()
                    .map(|c| c.sampler().to_state())
                    .collect(),
            )
        } else {
            None
        };
        let partial = self.partial_trees_in_use || forest.is_store_sequence_indexes_enabled();
        let tree_states = if self.save_tree_state {
            let mut states = Vec::with_capacity(forest.number_of_trees());
            for component in forest.components() {
                if partial {
                    states.push(empty_tree_state(
                        forest.sample_size(),
                        forest.dimensions(),
                        forest.is_bounding_box_caching_enabled(),
                        self.compress,
                    )?);
                } else {
                    states.push(component.tree().to_state(self.compress, false));
                }
            }
            Some(states)
        } else {
            None
        };
        let executor_context = if self.save_executor_context {
            Some(ExecutorContext {
                parallel_execution_enabled: cfg!(feature = "parallel"),
                thread_pool_size: 0,
            })
        } else {
            None
        };

        debug!(
            trees = forest.number_of_trees(),
            total_updates = forest.total_updates(),
            "captured forest state"
        );
        Ok(ForestState {
            version: STATE_VERSION.to_string(),
            number_of_trees: forest.number_of_trees(),
            dimensions: forest.dimensions(),
            shingle_size: forest.shingle_size(),
            sample_size: forest.sample_size(),
            time_decay: forest.time_decay(),
            output_after: forest.output_after(),
            center_of_mass: forest.is_center_of_mass_enabled(),
            store_sequence_indexes: forest.is_store_sequence_indexes_enabled(),
            bounding_box_caching: forest.is_bounding_box_caching_enabled(),
            internal_shingling: forest.is_internal_shingling_enabled(),
            internal_rotation: forest.is_internal_rotation_enabled(),
            single_precision: true,
            compress: self.compress,
            partial_trees_in_use: partial,
            save_sampler_state: self.save_sampler_state,
            save_tree_state: self.save_tree_state,
            save_coordinator_state: self.save_coordinator_state,
            total_updates: forest.total_updates(),
            point_store,
            sampler_states,
            tree_states,
            executor_context,
        })
    }

    /// Rebuild a forest from a state descriptor
    pub fn to_model(
        &self,
        state: &ForestState,
        executor_context: Option<&ExecutorContext>,
        seed: u64,
    ) -> Result<Forest> {
        self.to_model_with_store(state, executor_context, seed, None)
    }

    /// Rebuild a forest, optionally supplying the point store externally
    /// instead of reading it from the state.
    pub fn to_model_with_store(
        &self,
        state: &ForestState,
        executor_context: Option<&ExecutorContext>,
        seed: u64,
        external_store: Option<PointStore>,
    ) -> Result<Forest> {
        check_version(&state.version)?;
        let _context = executor_context.or(state.executor_context.as_ref());

        let store = match external_store {
            Some(store) => store,
            None => {
                let point_store_state = state.point_store.as_ref().ok_or_else(|| {
                    ForestError::MissingState(
                        "coordinator state absent and no external point store supplied"
                            .to_string(),
                    )
                })?;
                PointStore::from_state(point_store_state)?
            }
        };
        if store.dimensions() != state.dimensions || store.shingle_size() != state.shingle_size {
            return Err(ForestError::Misaligned(
                "point store disagrees with the forest configuration".to_string(),
            ));
        }

        let sampler_states = state.sampler_states.as_ref().ok_or_else(|| {
            ForestError::MissingState("sampler states are required to rebuild".to_string())
        })?;
        if sampler_states.len() != state.number_of_trees {
            return Err(ForestError::Misaligned(
                "sampler state count disagrees with the number of trees".to_string(),
            ));
        }
        if let Some(tree_states) = &state.tree_states {
            if tree_states.len() != state.number_of_trees {
                return Err(ForestError::Misaligned(
                    "tree state count disagrees with the number of trees".to_string(),
                ));
            }
        }

        let mut forest = Forest::builder(state.dimensions, state.shingle_size)
            .number_of_trees(state.number_of_trees)
            .sample_size(state.sample_size)
            .time_decay(state.time_decay)
            .output_after(state.output_after)
            .internal_shingling(state.internal_shingling)
            .internal_rotation(state.internal_rotation)
            .bounding_box_caching(state.bounding_box_caching)
            .store_sequence_indexes(state.store_sequence_indexes)
            .center_of_mass(state.center_of_mass)
            .random_seed(seed)
            .build()?;

        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        let mut components = Vec::with_capacity(state.number_of_trees);
        for i in 0..state.number_of_trees {
            let sampler_seed = rng.gen::<u64>();
            let tree_seed = rng.gen::<u64>();
            let sampler = CompactSampler::from_state(&sampler_states[i], sampler_seed)?;
            let tree = match &state.tree_states {
                Some(tree_states) => {
                    let mut tree = RandomCutTree::from_state(&tree_states[i], tree_seed)?;
                    if tree_states[i].partial_tree_in_use {
                        replay(&mut tree, &sampler, &store)?;
                    }
                    tree
                }
                None => {
                    let mut tree = RandomCutTree::new(
                        state.sample_size,
                        state.dimensions,
                        state.bounding_box_caching,
                        tree_seed,
                    )?;
                    replay(&mut tree, &sampler, &store)?;
                    tree
                }
            };
            components.push(SamplerPlusTree { sampler, tree });
        }

        forest.store = store;
        forest.components = components;
        forest.set_total_updates(state.total_updates);
        info!(
            trees = state.number_of_trees,
            total_updates = state.total_updates,
            "rebuilt forest from state"
        );
        Ok(forest)
    }
}

// seed a tree from the contents of its sampler
fn replay(tree: &mut RandomCutTree, sampler: &CompactSampler, store: &PointStore) -> Result<()> {
    for entry in sampler.weighted_sample() {
        tree.add_point(entry.value as i32, entry.sequence_index, store)?;
    }
    Ok(())
}

fn empty_tree_state(
    max_size: usize,
    dimensions: usize,
    bounding_box_caching: bool,
    compress: bool,
) -> Result<TreeState> {
    let fresh = RandomCutTree::new(max_size, dimensions, bounding_box_caching, 0)?;
    let mut state = fresh.to_state(compress, true);
    state.rng = None;
    Ok(state)
}
