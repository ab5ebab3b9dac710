// Copyright © 2026 Pathway

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use log::{debug, error};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use super::dataset::{Dataset, Partition};
use super::error::{DynResult, Error, Result};
use super::{WorkerId, WorkerInfo, WorkerRegistry};

/// Where a partition is scheduled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub partition: usize,
    pub worker: Option<WorkerId>,
    pub node_local: bool,
}

/// Assigns every partition to the least loaded of its node-local workers, or to
/// the least loaded worker overall when it has none.
pub fn place<P: Partition>(parts: &[P], workers: &[WorkerInfo]) -> Vec<Placement> {
    let mut load: HashMap<&WorkerId, usize> = workers.iter().map(|w| (&w.id, 0)).collect();
    let mut placements = Vec::with_capacity(parts.len());

    for part in parts {
        let preferred = part.locality(workers);
        let node_local = preferred.iter().any(|id| load.contains_key(id));
        let chosen = workers
            .iter()
            .map(|worker| &worker.id)
            .filter(|id| !node_local || preferred.contains(*id))
            .min_by_key(|id| load[*id]);
        if let Some(count) = chosen.and_then(|id| load.get_mut(id)) {
            *count += 1;
        }
        placements.push(Placement {
            partition: part.idx(),
            worker: chosen.cloned(),
            node_local,
        });
    }

    placements
}

/// Runs jobs over datasets within this process.
///
/// Partitions are computed in parallel on a dedicated thread pool; once all of
/// them have finished, the dataset's `cleanup` hook runs exactly once.
pub struct Executor {
    workers: Arc<dyn WorkerRegistry>,
    thread_pool: ThreadPool,
}

impl Executor {
    pub fn new(workers: Arc<dyn WorkerRegistry>, n_threads: usize) -> Result<Self> {
        let thread_pool = ThreadPoolBuilder::new()
            .num_threads(n_threads)
            .thread_name(|idx| format!("pathway:executor-{idx}"))
            .build()?;
        Ok(Self {
            workers,
            thread_pool,
        })
    }

    pub fn plan<P: Partition>(&self, parts: &[P]) -> Vec<Placement> {
        place(parts, &self.workers.list_workers())
    }

    /// Computes every partition and returns their outputs ordered by partition.
    pub fn execute<D: Dataset>(&self, dataset: &D) -> Result<Vec<Vec<D::Item>>> {
        let parts = dataset.parts().map_err(Error::Planning)?;
        for placement in self.plan(&parts) {
            debug!(
                "Partition {} placed on {:?} (node-local: {})",
                placement.partition, placement.worker, placement.node_local
            );
        }

        let outputs: Vec<Result<Vec<D::Item>>> = self
            .thread_pool
            .install(|| parts.par_iter().map(Self::run_partition).collect());

        let cleanup_result = dataset.cleanup();
        match (outputs.into_iter().collect::<Result<Vec<_>>>(), cleanup_result) {
            (Ok(outputs), Ok(())) => Ok(outputs),
            (Ok(_), Err(e)) => Err(Error::Cleanup(e)),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(cleanup_error)) => {
                error!("Dataset cleanup after a failed job also failed: {cleanup_error}");
                Err(e)
            }
        }
    }

    pub fn collect<D: Dataset>(&self, dataset: &D) -> Result<Vec<D::Item>> {
        Ok(self.execute(dataset)?.into_iter().flatten().collect())
    }

    pub fn count<D: Dataset>(&self, dataset: &D) -> Result<usize> {
        Ok(self.execute(dataset)?.iter().map(Vec::len).sum())
    }

    pub fn sum<D: Dataset<Item = u64>>(&self, dataset: &D) -> Result<u64> {
        Ok(self.execute(dataset)?.into_iter().flatten().sum())
    }

    fn run_partition<P: Partition>(part: &P) -> Result<Vec<P::Item>> {
        let computed = catch_unwind(AssertUnwindSafe(|| -> DynResult<Vec<P::Item>> {
            part.compute()?.collect()
        }))
        .map_err(Error::from_panic_payload)?;
        computed.map_err(|source| Error::PartitionFailed {
            partition: part.idx(),
            source,
        })
    }
}
