// Copyright © 2026 Pathway

use super::helpers::{executor, ip, workers};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use assert_matches::assert_matches;

use pathway_elastic::engine::executor::place;
use pathway_elastic::engine::{
    Collection, Dataset, DatasetExt, DynResult, Error, Partition, PartitionIter, WorkerId,
    WorkerInfo,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Behavior {
    Succeed,
    Fail,
    Panic,
}

struct TestDataset {
    behaviors: Vec<Behavior>,
    cleanups: Arc<AtomicUsize>,
}

struct TestPartition {
    idx: usize,
    behavior: Behavior,
    preferred: Vec<WorkerId>,
}

impl TestDataset {
    fn new(behaviors: Vec<Behavior>) -> Self {
        Self {
            behaviors,
            cleanups: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl Dataset for TestDataset {
    type Item = usize;
    type Part = TestPartition;

    fn parts(&self) -> DynResult<Vec<TestPartition>> {
        Ok(self
            .behaviors
            .iter()
            .enumerate()
            .map(|(idx, behavior)| TestPartition {
                idx,
                behavior: *behavior,
                preferred: Vec::new(),
            })
            .collect())
    }

    fn cleanup(&self) -> DynResult<()> {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Partition for TestPartition {
    type Item = usize;

    fn idx(&self) -> usize {
        self.idx
    }

    fn compute(&self) -> DynResult<PartitionIter<'_, usize>> {
        match self.behavior {
            Behavior::Succeed => Ok(Box::new((0..3).map(move |i| Ok(self.idx * 10 + i)))),
            Behavior::Fail => Err("partition failure".into()),
            Behavior::Panic => panic!("partition panic"),
        }
    }

    fn locality(&self, _workers: &[WorkerInfo]) -> Vec<WorkerId> {
        self.preferred.clone()
    }
}

#[test]
fn test_collection_partitions() -> eyre::Result<()> {
    let executor = executor(2);
    let collection = Collection::range(0..10, 3);
    assert_eq!(collection.n_partitions(), 3);
    assert_eq!(executor.count(&collection)?, 10);
    assert_eq!(executor.sum(&collection)?, 45);
    assert_eq!(
        executor.execute(&collection)?,
        vec![vec![0, 1, 2, 3], vec![4, 5, 6, 7], vec![8, 9]]
    );
    Ok(())
}

#[test]
fn test_collection_with_more_partitions_than_items() -> eyre::Result<()> {
    let executor = executor(2);
    let collection = Collection::from_vec(vec!["a", "b"], 4);
    assert_eq!(collection.n_partitions(), 4);
    assert_eq!(
        executor.execute(&collection)?,
        vec![vec!["a"], vec!["b"], vec![], vec![]]
    );
    Ok(())
}

#[test]
fn test_map_keeps_partitioning() -> eyre::Result<()> {
    let executor = executor(2);
    let doubled = Collection::range(0..6, 2).map(|x| x * 2);
    assert_eq!(
        executor.execute(&doubled)?,
        vec![vec![0, 2, 4], vec![6, 8, 10]]
    );
    Ok(())
}

#[test]
fn test_cleanup_runs_once_after_success() -> eyre::Result<()> {
    let executor = executor(4);
    let dataset = TestDataset::new(vec![Behavior::Succeed; 5]);
    let output = executor.collect(&dataset)?;
    assert_eq!(output.len(), 15);
    assert_eq!(dataset.cleanups.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn test_cleanup_runs_once_when_a_partition_fails() {
    let executor = executor(4);
    let dataset = TestDataset::new(vec![Behavior::Succeed, Behavior::Fail, Behavior::Succeed]);
    let result = executor.collect(&dataset);
    assert_matches!(result, Err(Error::PartitionFailed { partition: 1, .. }));
    assert_eq!(dataset.cleanups.load(Ordering::SeqCst), 1);
}

#[test]
fn test_cleanup_runs_once_for_an_empty_dataset() -> eyre::Result<()> {
    let executor = executor(1);
    let dataset = TestDataset::new(Vec::new());
    assert!(executor.collect(&dataset)?.is_empty());
    assert_eq!(dataset.cleanups.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn test_partition_panic_is_reported() {
    let executor = executor(2);
    let dataset = TestDataset::new(vec![Behavior::Panic]);
    let result = executor.collect(&dataset);
    assert_matches!(result, Err(Error::WorkerPanic(message)) if message == "partition panic");
    assert_eq!(dataset.cleanups.load(Ordering::SeqCst), 1);
}

#[test]
fn test_placement_prefers_local_workers_and_balances_load() {
    let workers = workers();
    let parts: Vec<TestPartition> = (0..4)
        .map(|idx| TestPartition {
            idx,
            behavior: Behavior::Succeed,
            preferred: if idx < 2 {
                vec![WorkerId::from("worker-0"), WorkerId::from("worker-1")]
            } else {
                Vec::new()
            },
        })
        .collect();

    let placements = place(&parts, &workers);
    assert!(placements[0].node_local);
    assert!(placements[1].node_local);
    assert!(!placements[2].node_local);
    let local_workers: Vec<_> = placements[..2]
        .iter()
        .map(|placement| placement.worker.clone().unwrap())
        .collect();
    assert_eq!(
        local_workers,
        vec![WorkerId::from("worker-0"), WorkerId::from("worker-1")]
    );
    assert_eq!(placements[2].worker, Some(WorkerId::from("worker-2")));
    assert_eq!(placements[3].worker, Some(WorkerId::from("worker-3")));
}

#[test]
fn test_unknown_preferred_workers_are_ignored() {
    let parts = vec![TestPartition {
        idx: 0,
        behavior: Behavior::Succeed,
        preferred: vec![WorkerId::from("gone")],
    }];
    let workers = vec![WorkerInfo::new("worker-0", [ip("10.0.0.1")])];
    let placements = place(&parts, &workers);
    assert!(!placements[0].node_local);
    assert_eq!(placements[0].worker, Some(WorkerId::from("worker-0")));
}
