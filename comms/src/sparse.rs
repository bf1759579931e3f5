//! The sparse training data and model types shared between workers and servers.

use std::collections::{HashMap, hash_map};

/// Identifies one coordinate of the global weight vector.
pub type FeatureIndex = u64;

/// One training example, a list of `(index, value)` pairs with an optional label.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SparseSample {
    pub label: Option<f32>,
    pub features: Vec<(FeatureIndex, f32)>,
}

impl SparseSample {
    pub fn new(label: Option<f32>, features: Vec<(FeatureIndex, f32)>) -> Self {
        Self { label, features }
    }

    /// The feature indices touched by this sample.
    pub fn indices(&self) -> impl Iterator<Item = FeatureIndex> + '_ {
        self.features.iter().map(|&(i, _)| i)
    }
}

/// An ordered collection of samples, a minibatch when produced by the data pipeline.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SparseDataset {
    samples: Vec<SparseSample>,
}

impl SparseDataset {
    pub fn new(samples: Vec<SparseSample>) -> Self {
        Self { samples }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    #[inline]
    pub fn samples(&self) -> &[SparseSample] {
        &self.samples
    }

    pub fn push(&mut self, sample: SparseSample) {
        self.samples.push(sample);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SparseSample> {
        self.samples.iter()
    }

    /// Every feature index touched by the dataset, repeated once per occurrence.
    pub fn indices(&self) -> impl Iterator<Item = FeatureIndex> + '_ {
        self.samples.iter().flat_map(SparseSample::indices)
    }

    /// The largest feature index in the dataset, if any.
    pub fn max_index(&self) -> Option<FeatureIndex> {
        self.indices().max()
    }
}

impl FromIterator<SparseSample> for SparseDataset {
    fn from_iter<T: IntoIterator<Item = SparseSample>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a SparseDataset {
    type Item = &'a SparseSample;
    type IntoIter = std::slice::Iter<'a, SparseSample>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// A worker's cached view of the weights a dataset touches.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SparseModel {
    weights: HashMap<FeatureIndex, f32>,
}

impl SparseModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            weights: HashMap::with_capacity(capacity),
        }
    }

    #[inline]
    pub fn get(&self, index: FeatureIndex) -> Option<f32> {
        self.weights.get(&index).copied()
    }

    pub fn insert(&mut self, index: FeatureIndex, weight: f32) {
        self.weights.insert(index, weight);
    }

    #[inline]
    pub fn contains(&self, index: FeatureIndex) -> bool {
        self.weights.contains_key(&index)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.weights.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn iter(&self) -> hash_map::Iter<'_, FeatureIndex, f32> {
        self.weights.iter()
    }

    pub fn indices(&self) -> impl Iterator<Item = FeatureIndex> + '_ {
        self.weights.keys().copied()
    }
}

/// The sparse update produced by one worker for one minibatch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SparseGradient {
    deltas: HashMap<FeatureIndex, f32>,
    version: u32,
}

impl SparseGradient {
    /// Creates an empty gradient stamped with `version`.
    pub fn new(version: u32) -> Self {
        Self {
            deltas: HashMap::new(),
            version,
        }
    }

    /// Adds `delta` to the accumulated update of `index`.
    pub fn accumulate(&mut self, index: FeatureIndex, delta: f32) {
        *self.deltas.entry(index).or_insert(0.) += delta;
    }

    /// Multiplies every accumulated delta by `factor`.
    pub fn scale(&mut self, factor: f32) {
        self.deltas.values_mut().for_each(|d| *d *= factor);
    }

    #[inline]
    pub fn get(&self, index: FeatureIndex) -> Option<f32> {
        self.deltas.get(&index).copied()
    }

    #[inline]
    pub fn version(&self) -> u32 {
        self.version
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.deltas.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (FeatureIndex, f32)> + '_ {
        self.deltas.iter().map(|(&i, &d)| (i, d))
    }

    /// The size in bytes of this gradient once split and encoded for a single shard.
    pub fn serialized_size(&self) -> usize {
        2 * size_of::<u32>() + self.deltas.len() * (size_of::<u32>() + size_of::<f32>())
    }
}

impl FromIterator<(FeatureIndex, f32)> for SparseGradient {
    fn from_iter<T: IntoIterator<Item = (FeatureIndex, f32)>>(iter: T) -> Self {
        let mut grad = Self::new(0);
        iter.into_iter().for_each(|(i, d)| grad.accumulate(i, d));
        grad
    }
}

/// The kinds of gradient a weight store knows how to apply.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelGradient {
    /// One delta per coordinate, position is the index.
    Dense(Vec<f32>),
    /// Only the touched coordinates.
    Sparse(SparseGradient),
}

impl ModelGradient {
    /// The amount of entries the gradient carries.
    pub fn len(&self) -> usize {
        match self {
            ModelGradient::Dense(deltas) => deltas.len(),
            ModelGradient::Sparse(grad) => grad.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gradient_accumulates_repeated_indices() {
        let mut grad = SparseGradient::new(3);
        grad.accumulate(7, 1.0);
        grad.accumulate(7, 0.5);
        grad.accumulate(2, -1.0);
        grad.scale(2.0);

        assert_eq!(grad.len(), 2);
        assert_eq!(grad.get(7), Some(3.0));
        assert_eq!(grad.get(2), Some(-2.0));
        assert_eq!(grad.version(), 3);
        assert_eq!(grad.serialized_size(), 8 + 2 * 8);
    }

    #[test]
    fn dataset_indices_span_all_samples() {
        let ds: SparseDataset = [
            SparseSample::new(Some(1.0), vec![(3, 1.0), (8, 2.0)]),
            SparseSample::new(None, vec![(3, 0.5)]),
        ]
        .into_iter()
        .collect();

        assert_eq!(ds.indices().collect::<Vec<_>>(), vec![3, 8, 3]);
        assert_eq!(ds.max_index(), Some(8));
    }
}
