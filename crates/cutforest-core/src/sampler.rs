//! Stream samplers
//!
//! [`CompactSampler`] is the production sampler: a time-decayed weighted
//! reservoir over point-store handles, kept as a max-heap on three parallel
//! arrays so its state maps directly onto a snapshot. Newer updates draw
//! stochastically lower weights, so the reservoir slowly forgets the past.
//!
//! [`SimpleStreamSampler`] keeps owned points instead of handles. It exists
//! for importing legacy array-based sampler dumps and is not used by the live
//! forest.

use crate::error::{check_argument, ForestError, Result};
use crate::state::{CompactSamplerState, RngState};
use crate::types::Weighted;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

/// Time-decayed weighted reservoir of point-store handles.
#[derive(Debug, Clone)]
pub struct CompactSampler {
    capacity: usize,
    size: usize,
    // max-heap on weight across the three parallel arrays
    weight: Vec<f32>,
    point_index: Vec<u32>,
    sequence_index: Vec<u64>,
    time_decay: f64,
    max_sequence_index: u64,
    rng: ChaCha20Rng,
    evicted: Option<Weighted<u32>>,
    pending_weight: Option<(f32, u64)>,
}

impl CompactSampler {
    /// Create an empty sampler holding at most `sample_size` entries
    pub fn new(sample_size: usize, time_decay: f64, seed: u64) -> Result<Self> {
        check_argument(sample_size > 0, "sample size must be greater than 0")?;
        check_argument(time_decay >= 0.0, "time decay cannot be negative")?;
        Ok(Self {
            capacity: sample_size,
            size: 0,
            weight: vec![0.0; sample_size],
            point_index: vec![0; sample_size],
            sequence_index: vec![0; sample_size],
            time_decay,
            max_sequence_index: 0,
            rng: ChaCha20Rng::seed_from_u64(seed),
            evicted: None,
            pending_weight: None,
        })
    }

    /// Rebuild a sampler from snapshot arrays. The heap order is
    /// re-established; `Misaligned` when array lengths disagree.
    pub fn from_parts(
        sample_size: usize,
        time_decay: f64,
        seed: u64,
        size: usize,
        mut weight: Vec<f32>,
        mut point_index: Vec<u32>,
        mut sequence_index: Vec<u64>,
        max_sequence_index: u64,
    ) -> Result<Self> {
        if weight.len() != point_index.len() || weight.len() != sequence_index.len() {
            return Err(ForestError::Misaligned(
                "sampler arrays disagree in length".to_string(),
            ));
        }
        if size > sample_size || weight.len() < size {
            return Err(ForestError::Misaligned(
                "sampler size exceeds its arrays".to_string(),
            ));
        }
        let mut sampler = Self::new(sample_size, time_decay, seed)?;
        weight.resize(sample_size, 0.0);
        point_index.resize(sample_size, 0);
        sequence_index.resize(sample_size, 0);
        sampler.weight = weight;
        sampler.point_index = point_index;
        sampler.sequence_index = sequence_index;
        sampler.size = size;
        sampler.max_sequence_index = max_sequence_index;
        for i in (0..size / 2).rev() {
            sampler.sift_down(i);
        }
        Ok(sampler)
    }

    /// First phase of an accept: decide whether the update at
    /// `sequence_index` enters the reservoir. When the reservoir is full the
    /// heaviest entry is staged for eviction and exposed via [`evicted`].
    ///
    /// [`evicted`]: CompactSampler::evicted
    pub fn accept_point(&mut self, sequence_index: u64) -> bool {
        self.evicted = None;
        let weight = self.compute_weight(sequence_index);
        if self.size < self.capacity {
            self.pending_weight = Some((weight, sequence_index));
            self.max_sequence_index = self.max_sequence_index.max(sequence_index);
            return true;
        }
        if weight < self.weight[0] {
            self.evicted = Some(Weighted::new(
                self.point_index[0],
                self.weight[0],
                self.sequence_index[0],
            ));
            self.remove_root();
            self.pending_weight = Some((weight, sequence_index));
            self.max_sequence_index = self.max_sequence_index.max(sequence_index);
            return true;
        }
        false
    }

    /// Second phase of an accept: record the handle chosen for the staged
    /// weight. Must follow a successful [`accept_point`].
    ///
    /// [`accept_point`]: CompactSampler::accept_point
    pub fn add_point(&mut self, point_index: u32) -> Result<()> {
        let (weight, sequence_index) = self.pending_weight.take().ok_or_else(|| {
            ForestError::IllegalState(
                "add_point requires a preceding successful accept_point".to_string(),
            )
        })?;
        let slot = self.size;
        self.weight[slot] = weight;
        self.point_index[slot] = point_index;
        self.sequence_index[slot] = sequence_index;
        self.size += 1;
        self.sift_up(slot);
        Ok(())
    }

    /// Entry evicted by the most recent accept, when any
    pub fn evicted(&self) -> Option<Weighted<u32>> {
        self.evicted
    }

    /// Copy of the current reservoir contents
    pub fn weighted_sample(&self) -> Vec<Weighted<u32>> {
        (0..self.size)
            .map(|i| {
                Weighted::new(
                    self.point_index[i],
                    self.weight[i],
                    self.sequence_index[i],
                )
            })
            .collect()
    }

    /// Number of entries currently held
    pub fn size(&self) -> usize {
        self.size
    }

    /// Maximum number of entries
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The decay rate applied to sequence indices
    pub fn time_decay(&self) -> f64 {
        self.time_decay
    }

    /// Largest sequence index observed so far
    pub fn max_sequence_index(&self) -> u64 {
        self.max_sequence_index
    }

    pub(crate) fn heap_arrays(&self) -> (Vec<f32>, Vec<u32>, Vec<u64>) {
        (
            self.weight[..self.size].to_vec(),
            self.point_index[..self.size].to_vec(),
            self.sequence_index[..self.size].to_vec(),
        )
    }

    /// Capture the sampler as a snapshot descriptor
    pub fn to_state(&self) -> CompactSamplerState {
        let (weight, point_index, sequence_index) = self.heap_arrays();
        CompactSamplerState {
            sample_size: self.capacity,
            time_decay: self.time_decay,
            size: self.size,
            weight,
            point_index,
            sequence_index,
            max_sequence_index: self.max_sequence_index,
            rng: Some(RngState {
                seed: self.rng.get_seed(),
                word_pos: self.rng.get_word_pos(),
            }),
        }
    }

    /// Rebuild a sampler from a snapshot descriptor. A captured random-stream
    /// position takes precedence over `seed`.
    pub fn from_state(state: &CompactSamplerState, seed: u64) -> Result<Self> {
        let mut sampler = Self::from_parts(
            state.sample_size,
            state.time_decay,
            seed,
            state.size,
            state.weight.clone(),
            state.point_index.clone(),
            state.sequence_index.clone(),
            state.max_sequence_index,
        )?;
        if let Some(rng) = &state.rng {
            sampler.rng = ChaCha20Rng::from_seed(rng.seed);
            sampler.rng.set_word_pos(rng.word_pos);
        }
        Ok(sampler)
    }

    // weight = -seq * decay + ln(-ln(u)), u uniform in (0, 1]; larger weights
    // are evicted first, so later sequence indices survive preferentially
    fn compute_weight(&mut self, sequence_index: u64) -> f32 {
        let u: f64 = 1.0 - self.rng.gen::<f64>();
        (-(sequence_index as f64) * self.time_decay + (-u.ln()).ln()) as f32
    }

    fn remove_root(&mut self) {
        self.size -= 1;
        let last = self.size;
        self.weight.swap(0, last);
        self.point_index.swap(0, last);
        self.sequence_index.swap(0, last);
        self.sift_down(0);
    }

    fn swap_entries(&mut self, a: usize, b: usize) {
        self.weight.swap(a, b);
        self.point_index.swap(a, b);
        self.sequence_index.swap(a, b);
    }

    fn sift_up(&mut self, mut slot: usize) {
        while slot > 0 {
            let parent = (slot - 1) / 2;
            if self.weight[slot] > self.weight[parent] {
                self.swap_entries(slot, parent);
                slot = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down(&mut self, mut slot: usize) {
        loop {
            let left = 2 * slot + 1;
            if left >= self.size {
                break;
            }
            let mut largest = left;
            let right = left + 1;
            if right < self.size && self.weight[right] > self.weight[left] {
                largest = right;
            }
            if self.weight[largest] > self.weight[slot] {
                self.swap_entries(slot, largest);
                slot = largest;
            } else {
                break;
            }
        }
    }
}

/// Array-based sampler that owns its points. Legacy import surface only.
#[derive(Debug, Clone)]
pub struct SimpleStreamSampler {
    sample_size: usize,
    time_decay: f64,
    entries: Vec<Weighted<Vec<f32>>>,
    rng: ChaCha20Rng,
}

impl SimpleStreamSampler {
    /// Create an empty array-based sampler
    pub fn new(sample_size: usize, time_decay: f64, seed: u64) -> Result<Self> {
        check_argument(sample_size > 0, "sample size must be greater than 0")?;
        check_argument(time_decay >= 0.0, "time decay cannot be negative")?;
        Ok(Self {
            sample_size,
            time_decay,
            entries: Vec::with_capacity(sample_size),
            rng: ChaCha20Rng::seed_from_u64(seed),
        })
    }

    /// Offer a point; returns true when the point entered the sample
    pub fn sample(&mut self, point: Vec<f32>, sequence_index: u64) -> bool {
        let u: f64 = 1.0 - self.rng.gen::<f64>();
        let weight = (-(sequence_index as f64) * self.time_decay + (-u.ln()).ln()) as f32;
        if self.entries.len() < self.sample_size {
            self.entries.push(Weighted::new(point, weight, sequence_index));
            return true;
        }
        let (heaviest, _) = self
            .entries
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.weight.partial_cmp(&b.1.weight).expect("finite weights"))
            .expect("sampler is non-empty");
        if weight < self.entries[heaviest].weight {
            self.entries[heaviest] = Weighted::new(point, weight, sequence_index);
            return true;
        }
        false
    }

    /// The sampled points
    pub fn weighted_points(&self) -> &[Weighted<Vec<f32>>] {
        &self.entries
    }

    /// Maximum number of entries
    pub fn sample_size(&self) -> usize {
        self.sample_size
    }

    /// The decay rate applied to sequence indices
    pub fn time_decay(&self) -> f64 {
        self.time_decay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fills_then_evicts_heaviest() {
        let mut sampler = CompactSampler::new(4, 0.0, 42).unwrap();
        for seq in 1..=4 {
            assert!(sampler.accept_point(seq));
            assert!(sampler.evicted().is_none());
            sampler.add_point(seq as u32).unwrap();
        }
        assert_eq!(sampler.size(), 4);

        let mut evictions = 0;
        for seq in 5..=200 {
            if sampler.accept_point(seq) {
                let evicted = sampler.evicted().expect("full sampler must evict");
                assert!(evicted.weight >= sampler.weighted_sample().iter().fold(
                    f32::NEG_INFINITY,
                    |m, w| m.max(w.weight)
                ));
                sampler.add_point(seq as u32).unwrap();
                evictions += 1;
            }
        }
        assert!(evictions > 0);
        assert_eq!(sampler.size(), 4);
    }

    #[test]
    fn test_time_decay_prefers_recent() {
        let mut sampler = CompactSampler::new(32, 0.05, 7).unwrap();
        for seq in 1..=2000 {
            if sampler.accept_point(seq) {
                sampler.add_point(seq as u32).unwrap();
            }
        }
        let sample = sampler.weighted_sample();
        let mean_seq: f64 =
            sample.iter().map(|w| w.sequence_index as f64).sum::<f64>() / sample.len() as f64;
        assert!(mean_seq > 1000.0, "decayed sampler should favor recency, got {}", mean_seq);
    }

    #[test]
    fn test_add_point_requires_accept() {
        let mut sampler = CompactSampler::new(2, 0.0, 1).unwrap();
        assert!(sampler.add_point(0).is_err());
        assert!(sampler.accept_point(1));
        sampler.add_point(0).unwrap();
        assert!(sampler.add_point(0).is_err());
    }

    #[test]
    fn test_deterministic_under_seed() {
        let run = |seed| {
            let mut sampler = CompactSampler::new(8, 0.01, seed).unwrap();
            for seq in 1..=500 {
                if sampler.accept_point(seq) {
                    sampler.add_point(seq as u32).unwrap();
                }
            }
            sampler.weighted_sample()
        };
        assert_eq!(run(11), run(11));
        assert_ne!(run(11), run(13));
    }

    #[test]
    fn test_from_parts_restores_heap() {
        let mut sampler = CompactSampler::new(8, 0.01, 3).unwrap();
        for seq in 1..=100 {
            if sampler.accept_point(seq) {
                sampler.add_point(seq as u32).unwrap();
            }
        }
        let (weight, point_index, sequence_index) = sampler.heap_arrays();
        let restored = CompactSampler::from_parts(
            8,
            0.01,
            3,
            sampler.size(),
            weight,
            point_index,
            sequence_index,
            sampler.max_sequence_index(),
        )
        .unwrap();
        let mut a = sampler.weighted_sample();
        let mut b = restored.weighted_sample();
        a.sort_by(|x, y| x.sequence_index.cmp(&y.sequence_index));
        b.sort_by(|x, y| x.sequence_index.cmp(&y.sequence_index));
        assert_eq!(a, b);

        let bad = CompactSampler::from_parts(8, 0.01, 3, 2, vec![0.0], vec![0, 1], vec![0, 1], 2);
        assert!(bad.is_err());
    }

    #[test]
    fn test_simple_sampler_bounds_size() {
        let mut sampler = SimpleStreamSampler::new(4, 0.0, 5).unwrap();
        for seq in 1..=50 {
            sampler.sample(vec![seq as f32], seq);
        }
        assert_eq!(sampler.weighted_points().len(), 4);
    }
}
