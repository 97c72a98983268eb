//! Compact random cut tree
//!
//! A pointer-free binary tree over point-store handles. Internal nodes carry a
//! random axis-parallel cut; leaves reference a stored point and a mass
//! (duplicate points share a leaf). Node storage is a set of parallel arrays
//! with free-list reuse, so the whole structure maps directly onto a snapshot.
//!
//! Node codes: values in `[0, max_size)` address internal nodes, values in
//! `[max_size, 2 * max_size)` address leaves, [`NULL_NODE`] is absent.

use crate::error::{check_argument, ForestError, Result};
use crate::state::{delta_decode, delta_encode, RngState, TreeState};
use crate::store::PointAccess;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

/// Code of an absent node
pub const NULL_NODE: i32 = -1;

/// Array-backed random cut tree over point handles.
#[derive(Debug, Clone)]
pub struct RandomCutTree {
    max_size: usize,
    dimensions: usize,
    bounding_box_caching: bool,
    rng: ChaCha20Rng,
    root: i32,

    cut_dimension: Vec<u32>,
    cut_value: Vec<f32>,
    left: Vec<i32>,
    right: Vec<i32>,
    parent: Vec<i32>,
    mass: Vec<u32>,
    free_internal: Vec<u32>,

    leaf_point: Vec<i32>,
    leaf_parent: Vec<i32>,
    leaf_mass: Vec<u32>,
    free_leaf: Vec<u32>,

    box_min: Vec<f32>,
    box_max: Vec<f32>,
    box_valid: Vec<bool>,
}

impl RandomCutTree {
    /// Create an empty tree holding at most `max_size` distinct points
    pub fn new(
        max_size: usize,
        dimensions: usize,
        bounding_box_caching: bool,
        seed: u64,
    ) -> Result<Self> {
        check_argument(max_size > 0, "max size must be greater than 0")?;
        check_argument(dimensions > 0, "dimensions must be greater than 0")?;
        let box_cells = if bounding_box_caching {
            max_size * dimensions
        } else {
            0
        };
        Ok(Self {
            max_size,
            dimensions,
            bounding_box_caching,
            rng: ChaCha20Rng::seed_from_u64(seed),
            root: NULL_NODE,
            cut_dimension: vec![0; max_size],
            cut_value: vec![0.0; max_size],
            left: vec![NULL_NODE; max_size],
            right: vec![NULL_NODE; max_size],
            parent: vec![NULL_NODE; max_size],
            mass: vec![0; max_size],
            free_internal: (0..max_size as u32).rev().collect(),
            leaf_point: vec![NULL_NODE; max_size],
            leaf_parent: vec![NULL_NODE; max_size],
            leaf_mass: vec![0; max_size],
            free_leaf: (0..max_size as u32).rev().collect(),
            box_min: vec![0.0; box_cells],
            box_max: vec![0.0; box_cells],
            box_valid: vec![false; if bounding_box_caching { max_size } else { 0 }],
        })
    }

    #[inline]
    fn is_leaf(&self, code: i32) -> bool {
        code >= self.max_size as i32
    }

    #[inline]
    fn leaf_slot(&self, code: i32) -> usize {
        code as usize - self.max_size
    }

    fn node_mass(&self, code: i32) -> u32 {
        if self.is_leaf(code) {
            self.leaf_mass[self.leaf_slot(code)]
        } else {
            self.mass[code as usize]
        }
    }

    /// Total number of points held, counting duplicates
    pub fn mass(&self) -> u32 {
        if self.root == NULL_NODE {
            0
        } else {
            self.node_mass(self.root)
        }
    }

    /// Dimension of the points this tree partitions
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Maximum number of distinct points
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    fn set_parent(&mut self, code: i32, parent: i32) {
        if self.is_leaf(code) {
            let slot = self.leaf_slot(code);
            self.leaf_parent[slot] = parent;
        } else {
            self.parent[code as usize] = parent;
        }
    }

    fn new_leaf(&mut self, point_index: i32) -> Result<i32> {
        let slot = self.free_leaf.pop().ok_or_else(|| {
            ForestError::IllegalState("leaf store exhausted".to_string())
        })? as usize;
        self.leaf_point[slot] = point_index;
        self.leaf_parent[slot] = NULL_NODE;
        self.leaf_mass[slot] = 1;
        Ok((slot + self.max_size) as i32)
    }

    fn new_internal(&mut self, cut_dimension: u32, cut_value: f32, mass: u32) -> Result<i32> {
        let slot = self.free_internal.pop().ok_or_else(|| {
            ForestError::IllegalState("internal node store exhausted".to_string())
        })? as usize;
        self.cut_dimension[slot] = cut_dimension;
        self.cut_value[slot] = cut_value;
        self.left[slot] = NULL_NODE;
        self.right[slot] = NULL_NODE;
        self.parent[slot] = NULL_NODE;
        self.mass[slot] = mass;
        if self.bounding_box_caching {
            self.box_valid[slot] = false;
        }
        Ok(slot as i32)
    }

    /// Insert the point referenced by `point_index`. Returns the handle the
    /// tree actually references: the existing handle when the point
    /// duplicates a stored leaf, otherwise `point_index` itself.
    pub fn add_point(
        &mut self,
        point_index: i32,
        _sequence_index: u64,
        store: &dyn PointAccess,
    ) -> Result<i32> {
        let point = store.point(point_index)?;
        check_argument(point.len() == self.dimensions, "point has wrong dimension")?;
        if self.root == NULL_NODE {
            let leaf = self.new_leaf(point_index)?;
            self.root = leaf;
            return Ok(point_index);
        }
        let (new_root, reference) = self.insert(self.root, &point, point_index, store)?;
        self.root = new_root;
        self.set_parent(new_root, NULL_NODE);
        Ok(reference)
    }

    fn insert(
        &mut self,
        node: i32,
        point: &[f32],
        point_index: i32,
        store: &dyn PointAccess,
    ) -> Result<(i32, i32)> {
        if self.is_leaf(node) {
            let slot = self.leaf_slot(node);
            let leaf_point = store.point(self.leaf_point[slot])?;
            if leaf_point == point {
                self.leaf_mass[slot] += 1;
                return Ok((node, self.leaf_point[slot]));
            }
            let (cut_dimension, cut_value) =
                self.random_cut(&Self::merge(&leaf_point, &leaf_point, point));
            let old_mass = self.leaf_mass[slot];
            let leaf = self.new_leaf(point_index)?;
            let internal = self.new_internal(cut_dimension, cut_value, old_mass + 1)?;
            self.attach_children(internal, node, leaf, point[cut_dimension as usize] <= cut_value);
            return Ok((internal, point_index));
        }

        let (box_min, box_max) = self.bounding_box(node, store)?;
        let merged = Self::merge(&box_min, &box_max, point);
        let (cut_dimension, cut_value) = self.random_cut(&merged);
        let d = cut_dimension as usize;
        let separates = (point[d] <= cut_value && box_min[d] > cut_value)
            || (point[d] > cut_value && box_max[d] <= cut_value);
        if separates {
            let leaf = self.new_leaf(point_index)?;
            let internal =
                self.new_internal(cut_dimension, cut_value, self.node_mass(node) + 1)?;
            self.attach_children(internal, node, leaf, point[d] <= cut_value);
            if self.bounding_box_caching {
                let slot = internal as usize;
                self.write_box(slot, &merged.0, &merged.1);
            }
            return Ok((internal, point_index));
        }

        let slot = node as usize;
        let go_left = point[self.cut_dimension[slot] as usize] <= self.cut_value[slot];
        let child = if go_left {
            self.left[slot]
        } else {
            self.right[slot]
        };
        let (new_child, reference) = self.insert(child, point, point_index, store)?;
        if go_left {
            self.left[slot] = new_child;
        } else {
            self.right[slot] = new_child;
        }
        self.set_parent(new_child, node);
        self.mass[slot] += 1;
        if self.bounding_box_caching && self.box_valid[slot] {
            // a cached box stays valid under insertion by absorbing the point
            let base = slot * self.dimensions;
            for (i, &value) in point.iter().enumerate() {
                self.box_min[base + i] = self.box_min[base + i].min(value);
                self.box_max[base + i] = self.box_max[base + i].max(value);
            }
        }
        Ok((node, reference))
    }

    fn attach_children(&mut self, internal: i32, existing: i32, leaf: i32, leaf_goes_left: bool) {
        let slot = internal as usize;
        if leaf_goes_left {
            self.left[slot] = leaf;
            self.right[slot] = existing;
        } else {
            self.left[slot] = existing;
            self.right[slot] = leaf;
        }
        self.set_parent(leaf, internal);
        self.set_parent(existing, internal);
    }

    fn merge(min: &[f32], max: &[f32], point: &[f32]) -> (Vec<f32>, Vec<f32>) {
        let merged_min = min.iter().zip(point).map(|(&a, &b)| a.min(b)).collect();
        let merged_max = max.iter().zip(point).map(|(&a, &b)| a.max(b)).collect();
        (merged_min, merged_max)
    }

    // uniform cut over the sum of side lengths of the box
    fn random_cut(&mut self, bounds: &(Vec<f32>, Vec<f32>)) -> (u32, f32) {
        let (min, max) = bounds;
        let range_sum: f64 = min
            .iter()
            .zip(max)
            .map(|(&a, &b)| (b - a) as f64)
            .sum();
        let mut breakpoint = self.rng.gen::<f64>() * range_sum;
        for d in 0..self.dimensions {
            let range = (max[d] - min[d]) as f64;
            if breakpoint <= range && range > 0.0 {
                let mut cut = min[d] + breakpoint as f32;
                // a cut at the upper face would fail to separate
                if cut >= max[d] {
                    cut = max[d].next_down().max(min[d]);
                }
                return (d as u32, cut);
            }
            breakpoint -= range;
        }
        // numeric slack pushed past the last dimension with extent
        let d = (0..self.dimensions)
            .rev()
            .find(|&d| max[d] > min[d])
            .unwrap_or(0);
        (d as u32, min[d])
    }

    /// Remove one occurrence of the point referenced by `point_index`.
    /// Returns the handle the tree was referencing for it.
    pub fn remove_point(
        &mut self,
        point_index: i32,
        _sequence_index: u64,
        store: &dyn PointAccess,
    ) -> Result<i32> {
        if self.root == NULL_NODE {
            return Err(ForestError::IllegalState(
                "removing a point from an empty tree".to_string(),
            ));
        }
        let point = store.point(point_index)?;
        let mut path = Vec::new();
        let mut node = self.root;
        while !self.is_leaf(node) {
            path.push(node);
            let slot = node as usize;
            node = if point[self.cut_dimension[slot] as usize] <= self.cut_value[slot] {
                self.left[slot]
            } else {
                self.right[slot]
            };
        }
        let leaf = node;
        let slot = self.leaf_slot(leaf);
        let stored = store.point(self.leaf_point[slot])?;
        if stored != point {
            return Err(ForestError::IllegalState(
                "tree does not contain the point being removed".to_string(),
            ));
        }
        let reference = self.leaf_point[slot];

        if self.leaf_mass[slot] > 1 {
            self.leaf_mass[slot] -= 1;
            for &ancestor in &path {
                self.mass[ancestor as usize] -= 1;
            }
            return Ok(reference);
        }

        let Some(&spliced) = path.last() else {
            // the leaf was the root
            self.root = NULL_NODE;
            self.release_leaf(slot);
            return Ok(reference);
        };
        let spliced_slot = spliced as usize;
        let sibling = if self.left[spliced_slot] == leaf {
            self.right[spliced_slot]
        } else {
            self.left[spliced_slot]
        };
        let grand = self.parent[spliced_slot];
        if grand == NULL_NODE {
            self.root = sibling;
            self.set_parent(sibling, NULL_NODE);
        } else {
            let grand_slot = grand as usize;
            if self.left[grand_slot] == spliced {
                self.left[grand_slot] = sibling;
            } else {
                self.right[grand_slot] = sibling;
            }
            self.set_parent(sibling, grand);
        }
        for &ancestor in &path[..path.len() - 1] {
            self.mass[ancestor as usize] -= 1;
            if self.bounding_box_caching {
                // a deletion can shrink the box
                self.box_valid[ancestor as usize] = false;
            }
        }
        self.release_leaf(slot);
        self.release_internal(spliced_slot);
        Ok(reference)
    }

    fn release_leaf(&mut self, slot: usize) {
        self.leaf_point[slot] = NULL_NODE;
        self.leaf_parent[slot] = NULL_NODE;
        self.leaf_mass[slot] = 0;
        self.free_leaf.push(slot as u32);
    }

    fn release_internal(&mut self, slot: usize) {
        self.left[slot] = NULL_NODE;
        self.right[slot] = NULL_NODE;
        self.parent[slot] = NULL_NODE;
        self.mass[slot] = 0;
        if self.bounding_box_caching {
            self.box_valid[slot] = false;
        }
        self.free_internal.push(slot as u32);
    }

    fn write_box(&mut self, slot: usize, min: &[f32], max: &[f32]) {
        let base = slot * self.dimensions;
        self.box_min[base..base + self.dimensions].copy_from_slice(min);
        self.box_max[base..base + self.dimensions].copy_from_slice(max);
        self.box_valid[slot] = true;
    }

    /// Bounding box of a subtree, caching the result on internal nodes when
    /// caching is enabled.
    fn bounding_box(&mut self, node: i32, store: &dyn PointAccess) -> Result<(Vec<f32>, Vec<f32>)> {
        if self.is_leaf(node) {
            let point = store.point(self.leaf_point[self.leaf_slot(node)])?;
            return Ok((point.clone(), point));
        }
        let slot = node as usize;
        if self.bounding_box_caching && self.box_valid[slot] {
            let base = slot * self.dimensions;
            return Ok((
                self.box_min[base..base + self.dimensions].to_vec(),
                self.box_max[base..base + self.dimensions].to_vec(),
            ));
        }
        let (left_min, left_max) = self.bounding_box(self.left[slot], store)?;
        let (right_min, right_max) = self.bounding_box(self.right[slot], store)?;
        let min: Vec<f32> = left_min
            .iter()
            .zip(&right_min)
            .map(|(&a, &b)| a.min(b))
            .collect();
        let max: Vec<f32> = left_max
            .iter()
            .zip(&right_max)
            .map(|(&a, &b)| a.max(b))
            .collect();
        if self.bounding_box_caching {
            self.write_box(slot, &min, &max);
        }
        Ok((min, max))
    }

    // read-only box computation for scoring; uses the cache but never writes
    fn bounding_box_read(
        &self,
        node: i32,
        store: &dyn PointAccess,
    ) -> Result<(Vec<f32>, Vec<f32>)> {
        if self.is_leaf(node) {
            let point = store.point(self.leaf_point[self.leaf_slot(node)])?;
            return Ok((point.clone(), point));
        }
        let slot = node as usize;
        if self.bounding_box_caching && self.box_valid[slot] {
            let base = slot * self.dimensions;
            return Ok((
                self.box_min[base..base + self.dimensions].to_vec(),
                self.box_max[base..base + self.dimensions].to_vec(),
            ));
        }
        let (left_min, left_max) = self.bounding_box_read(self.left[slot], store)?;
        let (right_min, right_max) = self.bounding_box_read(self.right[slot], store)?;
        Ok((
            left_min
                .iter()
                .zip(&right_min)
                .map(|(&a, &b)| a.min(b))
                .collect(),
            left_max
                .iter()
                .zip(&right_max)
                .map(|(&a, &b)| a.max(b))
                .collect(),
        ))
    }

    /// Expected-inverse-depth anomaly score of `point` against this tree,
    /// scaled by `log2(1 + mass)`. Pure read; an empty tree scores 0.
    pub fn score(&self, point: &[f32], store: &dyn PointAccess) -> Result<f64> {
        check_argument(point.len() == self.dimensions, "point has wrong dimension")?;
        if self.root == NULL_NODE {
            return Ok(0.0);
        }
        let raw = self.score_node(self.root, point, 0.0, store)?;
        Ok(raw * (1.0 + self.mass() as f64).log2())
    }

    fn score_node(
        &self,
        node: i32,
        point: &[f32],
        depth: f64,
        store: &dyn PointAccess,
    ) -> Result<f64> {
        if self.is_leaf(node) {
            let slot = self.leaf_slot(node);
            let stored = store.point(self.leaf_point[slot])?;
            let mass = self.leaf_mass[slot] as f64;
            if stored == point {
                return Ok(1.0 / (depth + (1.0 + mass).log2()));
            }
            return Ok(1.0 / (depth + 1.0));
        }
        let slot = node as usize;
        let (box_min, box_max) = self.bounding_box_read(node, store)?;
        let outside: f64 = box_min
            .iter()
            .zip(&box_max)
            .zip(point)
            .map(|((&lo, &hi), &v)| ((lo - v).max(0.0) + (v - hi).max(0.0)) as f64)
            .sum();
        let child = if point[self.cut_dimension[slot] as usize] <= self.cut_value[slot] {
            self.left[slot]
        } else {
            self.right[slot]
        };
        if outside == 0.0 {
            return self.score_node(child, point, depth + 1.0, store);
        }
        let range_sum: f64 = box_min
            .iter()
            .zip(&box_max)
            .zip(point)
            .map(|((&lo, &hi), &v)| (hi.max(v) - lo.min(v)) as f64)
            .sum();
        let separation = outside / range_sum;
        let inner = self.score_node(child, point, depth + 1.0, store)?;
        Ok(separation / (depth + 1.0) + (1.0 - separation) * inner)
    }

    /// Capture the tree structure as a snapshot descriptor
    pub fn to_state(&self, compress: bool, partial_tree_in_use: bool) -> TreeState {
        TreeState {
            max_size: self.max_size,
            dimensions: self.dimensions,
            bounding_box_caching: self.bounding_box_caching,
            root: self.root,
            cut_dimension: self.cut_dimension.clone(),
            cut_value: self.cut_value.clone(),
            left: self.left.clone(),
            right: self.right.clone(),
            parent: self.parent.clone(),
            mass: self.mass.clone(),
            free_internal: self.free_internal.clone(),
            leaf_point: if compress {
                delta_encode(&self.leaf_point)
            } else {
                self.leaf_point.clone()
            },
            leaf_parent: self.leaf_parent.clone(),
            leaf_mass: self.leaf_mass.clone(),
            free_leaf: self.free_leaf.clone(),
            partial_tree_in_use,
            compressed: compress,
            rng: Some(RngState {
                seed: self.rng.get_seed(),
                word_pos: self.rng.get_word_pos(),
            }),
        }
    }

    /// Reassemble a tree from a snapshot descriptor. Array lengths are
    /// validated; the box cache starts cold. A captured random-stream
    /// position takes precedence over `seed`.
    pub fn from_state(state: &TreeState, seed: u64) -> Result<Self> {
        let mut tree = Self::new(
            state.max_size,
            state.dimensions,
            state.bounding_box_caching,
            seed,
        )?;
        let max_size = state.max_size;
        let aligned = state.cut_dimension.len() == max_size
            && state.cut_value.len() == max_size
            && state.left.len() == max_size
            && state.right.len() == max_size
            && state.parent.len() == max_size
            && state.mass.len() == max_size
            && state.leaf_point.len() == max_size
            && state.leaf_parent.len() == max_size
            && state.leaf_mass.len() == max_size;
        if !aligned {
            return Err(ForestError::Misaligned(
                "tree arrays disagree with max size".to_string(),
            ));
        }
        if state.root != NULL_NODE && (state.root < 0 || state.root as usize >= 2 * max_size) {
            return Err(ForestError::Misaligned("tree root out of range".to_string()));
        }
        tree.root = state.root;
        tree.cut_dimension = state.cut_dimension.clone();
        tree.cut_value = state.cut_value.clone();
        tree.left = state.left.clone();
        tree.right = state.right.clone();
        tree.parent = state.parent.clone();
        tree.mass = state.mass.clone();
        tree.free_internal = state.free_internal.clone();
        tree.leaf_point = if state.compressed {
            delta_decode(&state.leaf_point)
        } else {
            state.leaf_point.clone()
        };
        tree.leaf_parent = state.leaf_parent.clone();
        tree.leaf_mass = state.leaf_mass.clone();
        tree.free_leaf = state.free_leaf.clone();
        if let Some(rng) = &state.rng {
            tree.rng = ChaCha20Rng::from_seed(rng.seed);
            tree.rng.set_word_pos(rng.word_pos);
        }
        Ok(tree)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::PointStore;

    fn seeded_store(points: &[Vec<f32>]) -> (PointStore, Vec<i32>) {
        let dimensions = points[0].len();
        let mut store = PointStore::builder(dimensions, 1, points.len().max(2) + 2)
            .build()
            .unwrap();
        let handles = points
            .iter()
            .enumerate()
            .map(|(i, p)| store.add(p, i as u64).unwrap())
            .collect();
        (store, handles)
    }

    #[test]
    fn test_insert_and_mass() {
        let (store, handles) = seeded_store(&[
            vec![0.0, 0.0],
            vec![1.0, 1.0],
            vec![2.0, 0.5],
            vec![0.5, 2.0],
        ]);
        let mut tree = RandomCutTree::new(8, 2, true, 42).unwrap();
        for (i, &h) in handles.iter().enumerate() {
            assert_eq!(tree.add_point(h, i as u64, &store).unwrap(), h);
            assert_eq!(tree.mass(), (i + 1) as u32);
        }
    }

    #[test]
    fn test_duplicate_points_share_a_leaf() {
        let (store, handles) =
            seeded_store(&[vec![1.0, 2.0], vec![3.0, 4.0], vec![1.0, 2.0]]);
        let mut tree = RandomCutTree::new(8, 2, false, 7).unwrap();
        tree.add_point(handles[0], 0, &store).unwrap();
        tree.add_point(handles[1], 1, &store).unwrap();
        // the duplicate resolves to the handle already in the tree
        let reference = tree.add_point(handles[2], 2, &store).unwrap();
        assert_eq!(reference, handles[0]);
        assert_eq!(tree.mass(), 3);

        let removed = tree.remove_point(handles[0], 0, &store).unwrap();
        assert_eq!(removed, handles[0]);
        assert_eq!(tree.mass(), 2);
    }

    #[test]
    fn test_remove_splices_and_empties() {
        let (store, handles) =
            seeded_store(&[vec![0.0], vec![5.0], vec![10.0]]);
        let mut tree = RandomCutTree::new(4, 1, true, 11).unwrap();
        for (i, &h) in handles.iter().enumerate() {
            tree.add_point(h, i as u64, &store).unwrap();
        }
        for (i, &h) in handles.iter().enumerate() {
            tree.remove_point(h, i as u64, &store).unwrap();
            assert_eq!(tree.mass(), (handles.len() - i - 1) as u32);
        }
        assert_eq!(tree.score(&[0.0], &store).unwrap(), 0.0);
        // the structure must be rebuildable after emptying
        tree.add_point(handles[0], 9, &store).unwrap();
        assert_eq!(tree.mass(), 1);
    }

    #[test]
    fn test_remove_absent_point_is_illegal() {
        let (store, handles) = seeded_store(&[vec![0.0], vec![5.0]]);
        let mut tree = RandomCutTree::new(4, 1, false, 3).unwrap();
        tree.add_point(handles[0], 0, &store).unwrap();
        assert!(tree.remove_point(handles[1], 1, &store).is_err());
    }

    #[test]
    fn test_outlier_scores_higher() {
        let mut points: Vec<Vec<f32>> = Vec::new();
        for i in 0..40 {
            points.push(vec![(i % 5) as f32 * 0.1, (i % 7) as f32 * 0.1]);
        }
        let (store, handles) = seeded_store(&points);
        let mut tree = RandomCutTree::new(64, 2, true, 17).unwrap();
        for (i, &h) in handles.iter().enumerate() {
            tree.add_point(h, i as u64, &store).unwrap();
        }
        let inlier = tree.score(&[0.2, 0.3], &store).unwrap();
        let outlier = tree.score(&[40.0, -40.0], &store).unwrap();
        assert!(
            outlier > inlier,
            "outlier {} should exceed inlier {}",
            outlier,
            inlier
        );
    }

    #[test]
    fn test_cached_and_uncached_scores_agree() {
        let points: Vec<Vec<f32>> = (0..30)
            .map(|i| vec![(i as f32).sin(), (i as f32).cos(), i as f32 * 0.1])
            .collect();
        let (store, handles) = seeded_store(&points);
        let mut cached = RandomCutTree::new(32, 3, true, 23).unwrap();
        let mut plain = RandomCutTree::new(32, 3, false, 23).unwrap();
        for (i, &h) in handles.iter().enumerate() {
            cached.add_point(h, i as u64, &store).unwrap();
            plain.add_point(h, i as u64, &store).unwrap();
        }
        let probe = vec![0.4, 0.4, 1.1];
        let a = cached.score(&probe, &store).unwrap();
        let b = plain.score(&probe, &store).unwrap();
        assert!((a - b).abs() < 1e-12);
    }

    #[test]
    fn test_snapshot_roundtrip_preserves_scores() {
        let points: Vec<Vec<f32>> = (0..20).map(|i| vec![i as f32, (i * i) as f32]).collect();
        let (store, handles) = seeded_store(&points);
        let mut tree = RandomCutTree::new(32, 2, false, 5).unwrap();
        for (i, &h) in handles.iter().enumerate() {
            tree.add_point(h, i as u64, &store).unwrap();
        }
        let state = tree.to_state(true, false);
        let rebuilt = RandomCutTree::from_state(&state, 99).unwrap();
        let probe = vec![7.5, 31.0];
        assert_eq!(
            tree.score(&probe, &store).unwrap(),
            rebuilt.score(&probe, &store).unwrap()
        );

        // a captured rng position means both trees draw the same future cuts
        let mut original = tree.clone();
        let mut restored = RandomCutTree::from_state(&state, 1234).unwrap();
        let (store2, extra) = {
            let mut s = store.clone();
            let h = s.add(&[100.0, 100.0], 99).unwrap();
            (s, h)
        };
        original.add_point(extra, 21, &store2).unwrap();
        restored.add_point(extra, 21, &store2).unwrap();
        let probe2 = vec![50.0, 50.0];
        assert_eq!(
            original.score(&probe2, &store2).unwrap(),
            restored.score(&probe2, &store2).unwrap()
        );
    }
}
