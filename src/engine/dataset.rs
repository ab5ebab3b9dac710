// Copyright © 2026 Pathway

use std::sync::Arc;

use super::error::DynResult;
use super::WorkerId;
use super::WorkerInfo;

/// Lazy, forward-only output of a single partition.
pub type PartitionIter<'a, T> = Box<dyn Iterator<Item = DynResult<T>> + Send + 'a>;

/// One independently schedulable unit of work.
///
/// `compute` may be called again after a worker failure, so it must not
/// depend on state left behind by an earlier run.
pub trait Partition: Send + Sync {
    type Item: Send;

    /// Ordinal of the partition within its dataset.
    fn idx(&self) -> usize;

    fn compute(&self) -> DynResult<PartitionIter<'_, Self::Item>>;

    /// Workers on which the partition should preferably run. A hint only.
    fn locality(&self, _workers: &[WorkerInfo]) -> Vec<WorkerId> {
        Vec::new()
    }
}

pub trait Dataset: Send + Sync {
    type Item: Send;
    type Part: Partition<Item = Self::Item>;

    fn parts(&self) -> DynResult<Vec<Self::Part>>;

    /// Invoked once after every partition of a job over this dataset has finished.
    fn cleanup(&self) -> DynResult<()> {
        Ok(())
    }
}

pub trait DatasetExt: Dataset + Sized {
    fn map<T, F>(self, func: F) -> Map<Self, F>
    where
        F: Fn(Self::Item) -> T + Send + Sync,
        T: Send,
    {
        Map {
            source: self,
            func: Arc::new(func),
        }
    }
}

impl<D: Dataset> DatasetExt for D {}

/// Element-wise transformation of another dataset. Partitioning, locality
/// and cleanup are those of the source.
pub struct Map<D, F> {
    source: D,
    func: Arc<F>,
}

pub struct MapPartition<P, F> {
    source: P,
    func: Arc<F>,
}

impl<D, F, T> Dataset for Map<D, F>
where
    D: Dataset,
    F: Fn(D::Item) -> T + Send + Sync,
    T: Send,
{
    type Item = T;
    type Part = MapPartition<D::Part, F>;

    fn parts(&self) -> DynResult<Vec<Self::Part>> {
        Ok(self
            .source
            .parts()?
            .into_iter()
            .map(|source| MapPartition {
                source,
                func: self.func.clone(),
            })
            .collect())
    }

    fn cleanup(&self) -> DynResult<()> {
        self.source.cleanup()
    }
}

impl<P, F, T> Partition for MapPartition<P, F>
where
    P: Partition,
    F: Fn(P::Item) -> T + Send + Sync,
    T: Send,
{
    type Item = T;

    fn idx(&self) -> usize {
        self.source.idx()
    }

    fn compute(&self) -> DynResult<PartitionIter<'_, T>> {
        let func = &*self.func;
        Ok(Box::new(
            self.source.compute()?.map(move |item| item.map(func)),
        ))
    }

    fn locality(&self, workers: &[WorkerInfo]) -> Vec<WorkerId> {
        self.source.locality(workers)
    }
}
