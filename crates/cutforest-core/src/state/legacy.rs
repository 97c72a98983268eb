//! Import of legacy array-based sampler dumps
//!
//! Older deployments persisted samplers that owned their points outright, with
//! no shared point store. Conversion synthesizes the compact representation:
//! identical points across samplers collapse into one stored point whose
//! reference count equals the number of holdings, and each sampler becomes a
//! compact sampler state over the synthesized handles.

use crate::error::{check_argument, Result};
use crate::sampler::SimpleStreamSampler;
use crate::state::descriptors::{CompactSamplerState, PointStoreState};
use crate::store::PointStore;
use std::collections::HashMap;
use tracing::debug;

/// Convert array-based samplers into a synthesized point-store state plus one
/// compact sampler state per input sampler.
pub fn convert_array_samplers(
    samplers: &[SimpleStreamSampler],
    dimensions: usize,
    compress: bool,
) -> Result<(PointStoreState, Vec<CompactSamplerState>)> {
    check_argument(!samplers.is_empty(), "need at least one sampler")?;
    check_argument(dimensions > 0, "dimensions must be greater than 0")?;
    let total_entries: usize = samplers.iter().map(|s| s.weighted_points().len()).sum();
    check_argument(total_entries > 0, "samplers hold no points")?;

    let mut store = PointStore::builder(dimensions, 1, total_entries).build()?;
    // identical points collapse onto one handle; key on the bit patterns so
    // that -0.0 and 0.0 stay distinct exactly as stored
    let mut seen: HashMap<Vec<u32>, i32> = HashMap::new();
    let mut sampler_states = Vec::with_capacity(samplers.len());

    for sampler in samplers {
        let entries = sampler.weighted_points();
        let mut weight = Vec::with_capacity(entries.len());
        let mut point_index = Vec::with_capacity(entries.len());
        let mut sequence_index = Vec::with_capacity(entries.len());
        let mut max_sequence_index = 0;
        for entry in entries {
            check_argument(
                entry.value.len() == dimensions,
                "sampled point has wrong dimension",
            )?;
            let key: Vec<u32> = entry.value.iter().map(|v| v.to_bits()).collect();
            let handle = match seen.get(&key) {
                Some(&handle) => {
                    store.increment_ref_count(handle)?;
                    handle
                }
                None => {
                    let handle = store.add(&entry.value, entry.sequence_index)?;
                    seen.insert(key, handle);
                    handle
                }
            };
            weight.push(entry.weight);
            point_index.push(handle as u32);
            sequence_index.push(entry.sequence_index);
            max_sequence_index = max_sequence_index.max(entry.sequence_index);
        }
        sampler_states.push(CompactSamplerState {
            sample_size: sampler.sample_size(),
            time_decay: sampler.time_decay(),
            size: entries.len(),
            weight,
            point_index,
            sequence_index,
            max_sequence_index,
            rng: None,
        });
    }

    debug!(
        samplers = samplers.len(),
        distinct_points = seen.len(),
        total_entries,
        "converted array samplers"
    );
    Ok((store.to_state(compress), sampler_states))
}
