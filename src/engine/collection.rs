// Copyright © 2026 Pathway

use std::ops::Range;
use std::sync::Arc;

use super::dataset::{Dataset, Partition, PartitionIter};
use super::error::DynResult;

/// A dataset held in memory, already split into partitions.
#[derive(Debug, Clone)]
pub struct Collection<T> {
    partitions: Arc<Vec<Vec<T>>>,
}

impl<T> Collection<T> {
    pub fn from_partitions(partitions: Vec<Vec<T>>) -> Self {
        Self {
            partitions: Arc::new(partitions),
        }
    }

    pub fn n_partitions(&self) -> usize {
        self.partitions.len()
    }
}

impl<T: Clone> Collection<T> {
    /// Splits `items` into `n_partitions` contiguous chunks of nearly equal size.
    pub fn from_vec(items: Vec<T>, n_partitions: usize) -> Self {
        let n_partitions = n_partitions.max(1);
        let chunk_size = items.len().div_ceil(n_partitions).max(1);
        let mut partitions: Vec<Vec<T>> = items
            .chunks(chunk_size)
            .map(<[T]>::to_vec)
            .collect();
        partitions.resize_with(n_partitions, Vec::new);
        Self::from_partitions(partitions)
    }
}

impl Collection<u64> {
    pub fn range(range: Range<u64>, n_partitions: usize) -> Self {
        Self::from_vec(range.collect(), n_partitions)
    }
}

pub struct CollectionPartition<T> {
    partitions: Arc<Vec<Vec<T>>>,
    idx: usize,
}

impl<T> Dataset for Collection<T>
where
    T: Clone + Send + Sync,
{
    type Item = T;
    type Part = CollectionPartition<T>;

    fn parts(&self) -> DynResult<Vec<Self::Part>> {
        Ok((0..self.partitions.len())
            .map(|idx| CollectionPartition {
                partitions: self.partitions.clone(),
                idx,
            })
            .collect())
    }
}

impl<T> Partition for CollectionPartition<T>
where
    T: Clone + Send + Sync,
{
    type Item = T;

    fn idx(&self) -> usize {
        self.idx
    }

    fn compute(&self) -> DynResult<PartitionIter<'_, T>> {
        Ok(Box::new(self.partitions[self.idx].iter().cloned().map(Ok)))
    }
}
