// Copyright © 2026 Pathway

use super::helpers::{context, context_with_config, executor, report, three_node_cluster, INDEX};

use std::time::Duration;

use assert_matches::assert_matches;
use serde_json::{json, Value as JsonValue};

use pathway_elastic::connectors::elasticsearch::bulk::{
    submit_actions, BulkChunker, BulkLimits, BulkStats,
};
use pathway_elastic::connectors::elasticsearch::{
    BulkAction, BulkOperation, BulkOptions, ElasticConfig, Error as ElasticError, IndexTarget,
    Operation, SearchOptions,
};
use pathway_elastic::engine::{Collection, DynResult, Error};

fn target() -> IndexTarget {
    IndexTarget {
        index: INDEX.to_string(),
        doc_type: None,
    }
}

fn decode(lines: &[Vec<u8>]) -> Vec<JsonValue> {
    lines
        .iter()
        .map(|line| serde_json::from_slice(line).unwrap())
        .collect()
}

fn limits(chunk_size: usize, max_chunk_bytes: usize) -> BulkLimits {
    BulkLimits {
        chunk_size,
        max_chunk_bytes,
        timeout: Duration::from_secs(10),
    }
}

fn keyed_documents(ids: std::ops::Range<u64>, n_partitions: usize) -> Collection<(u64, JsonValue)> {
    Collection::from_vec(
        ids.map(|i| (i, json!({ "n": i, "name": format!("doc-{i}") })))
            .collect(),
        n_partitions,
    )
}

fn with_refresh() -> BulkOptions {
    BulkOptions {
        refresh: true,
        ..BulkOptions::default()
    }
}

#[test]
fn test_action_encoding() -> eyre::Result<()> {
    let target = IndexTarget {
        index: "logs".to_string(),
        doc_type: Some("event".to_string()),
    };
    let document = json!({ "a": 1 });

    assert_eq!(
        decode(&BulkAction::index(&target, document.clone()).encode()?),
        vec![json!({ "index": { "_index": "logs", "_type": "event" } }), document.clone()]
    );
    assert_eq!(
        decode(&BulkAction::create(&target, 7, document.clone()).encode()?),
        vec![
            json!({ "create": { "_index": "logs", "_type": "event", "_id": "7" } }),
            document.clone()
        ]
    );
    assert_eq!(
        decode(&BulkAction::update(&target, "x", document.clone()).encode()?),
        vec![
            json!({ "update": { "_index": "logs", "_type": "event", "_id": "x" } }),
            json!({ "doc": { "a": 1 } })
        ]
    );
    assert_eq!(
        decode(&BulkAction::upsert(&target, "x", document.clone()).encode()?),
        vec![
            json!({ "update": { "_index": "logs", "_type": "event", "_id": "x" } }),
            json!({ "doc": { "a": 1 }, "doc_as_upsert": true })
        ]
    );
    assert_eq!(
        decode(&BulkAction::delete(&target, "x").encode()?),
        vec![json!({ "delete": { "_index": "logs", "_type": "event", "_id": "x" } })]
    );
    assert_eq!(BulkOperation::Upsert.action_name(), "update");
    Ok(())
}

#[test]
fn test_chunks_are_bounded_by_count() -> eyre::Result<()> {
    let actions = (0..10).map(|i| DynResult::Ok(BulkAction::delete(&target(), i)));
    let sizes = BulkChunker::new(actions, limits(3, usize::MAX))
        .map(|chunk| chunk.map(|chunk| chunk.len()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(report)?;
    assert_eq!(sizes, vec![3, 3, 3, 1]);
    Ok(())
}

#[test]
fn test_chunks_are_bounded_by_bytes() -> eyre::Result<()> {
    let action = BulkAction::create(&target(), 1, json!({ "payload": "x".repeat(100) }));
    let action_bytes: usize = action.encode()?.iter().map(|line| line.len() + 1).sum();

    let actions = (0..7).map(|i| {
        DynResult::Ok(BulkAction::create(
            &target(),
            i,
            json!({ "payload": "x".repeat(100) }),
        ))
    });
    let chunks = BulkChunker::new(actions, limits(100, action_bytes * 3))
        .collect::<Result<Vec<_>, _>>()
        .map_err(report)?;
    let sizes: Vec<usize> = chunks.iter().map(|chunk| chunk.len()).collect();
    assert_eq!(sizes, vec![3, 3, 1]);
    assert!(chunks.iter().all(|chunk| chunk.n_bytes() <= action_bytes * 3));

    let ids: Vec<String> = chunks
        .iter()
        .flat_map(|chunk| chunk.actions().iter().map(|action| action.id.clone().unwrap()))
        .collect();
    assert_eq!(ids, (0..7).map(|i| i.to_string()).collect::<Vec<_>>());
    Ok(())
}

#[test]
fn test_oversized_action_is_sent_alone() -> eyre::Result<()> {
    let actions: Vec<DynResult<BulkAction>> = vec![
        Ok(BulkAction::delete(&target(), 1)),
        Ok(BulkAction::create(&target(), 2, json!({ "payload": "x".repeat(500) }))),
        Ok(BulkAction::delete(&target(), 3)),
    ];
    let sizes = BulkChunker::new(actions.into_iter(), limits(100, 200))
        .map(|chunk| chunk.map(|chunk| chunk.len()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(report)?;
    assert_eq!(sizes, vec![1, 1, 1]);
    Ok(())
}

#[test]
fn test_create_counts_and_refreshes_once() -> eyre::Result<()> {
    let cluster = three_node_cluster();
    cluster.create_index(INDEX, 3, 0);
    let options = BulkOptions {
        chunk_size: Some(10),
        ..with_refresh()
    };
    let write = context(&cluster).create(keyed_documents(0..100, 4), &options)?;
    assert_eq!(write.refresh_indices(), [INDEX.to_string()]);

    let per_partition = executor(4).execute(&write)?;
    assert_eq!(per_partition, vec![vec![25], vec![25], vec![25], vec![25]]);

    let stats = cluster.stats();
    assert_eq!(stats.bulk_sizes.len(), 12);
    assert!(stats.bulk_sizes.iter().all(|size| *size <= 10));
    assert_eq!(stats.bulk_sizes.iter().sum::<usize>(), 100);
    assert_eq!(stats.refreshes, vec![vec![INDEX.to_string()]]);
    assert_eq!(cluster.n_documents(INDEX), 100);
    assert_eq!(
        cluster.document(INDEX, "42"),
        Some(json!({ "n": 42, "name": "doc-42" }))
    );
    Ok(())
}

#[test]
fn test_refresh_runs_once_with_empty_partitions() -> eyre::Result<()> {
    let cluster = three_node_cluster();
    cluster.create_index(INDEX, 2, 0);
    let write = context(&cluster).create(keyed_documents(0..1, 6), &with_refresh())?;

    assert_eq!(executor(3).sum(&write)?, 1);
    assert_eq!(cluster.stats().refreshes.len(), 1);
    assert_eq!(cluster.stats().bulk_sizes, vec![1]);
    Ok(())
}

#[test]
fn test_no_refresh_unless_requested() -> eyre::Result<()> {
    let cluster = three_node_cluster();
    let write = context(&cluster).create(keyed_documents(0..10, 2), &BulkOptions::default())?;
    assert!(write.refresh_indices().is_empty());
    assert_eq!(executor(2).sum(&write)?, 10);
    assert!(cluster.stats().refreshes.is_empty());
    Ok(())
}

#[test]
fn test_existing_ids_are_omitted_from_the_count() -> eyre::Result<()> {
    let cluster = three_node_cluster();
    cluster.create_index(INDEX, 2, 0);
    let context = context(&cluster);
    let executor = executor(2);

    assert_eq!(
        executor.sum(&context.create(keyed_documents(0..10, 2), &BulkOptions::default())?)?,
        10
    );
    let replacements = Collection::from_vec(
        (5..15_u64).map(|i| (i, json!({ "n": i, "name": "replaced" }))).collect(),
        2,
    );
    assert_eq!(
        executor.sum(&context.create(replacements, &BulkOptions::default())?)?,
        5
    );
    assert_eq!(cluster.n_documents(INDEX), 15);
    assert_eq!(
        cluster.document(INDEX, "5"),
        Some(json!({ "n": 5, "name": "doc-5" }))
    );
    assert_eq!(
        cluster.document(INDEX, "12"),
        Some(json!({ "n": 12, "name": "replaced" }))
    );
    Ok(())
}

#[test]
fn test_submission_counts_applied_and_rejected_actions() -> eyre::Result<()> {
    let cluster = three_node_cluster();
    cluster.create_index(INDEX, 2, 0);
    let context = context(&cluster);
    let mut client = context.client(&[])?;

    let actions = [0, 1, 2, 1, 3]
        .into_iter()
        .map(|i| DynResult::Ok(BulkAction::create(&target(), i, json!({ "n": i }))));
    let stats =
        submit_actions(&mut **client, actions, limits(2, usize::MAX), false).map_err(report)?;
    assert_eq!(
        stats,
        BulkStats {
            succeeded: 4,
            failed: 1
        }
    );
    assert_eq!(cluster.stats().bulk_sizes, vec![2, 2, 1]);
    Ok(())
}

#[test]
fn test_rejections_fail_the_partition_when_asked_to() -> eyre::Result<()> {
    let cluster = three_node_cluster();
    cluster.create_index(INDEX, 1, 0);
    let context = context(&cluster);
    executor(1).sum(&context.create(keyed_documents(0..3, 1), &BulkOptions::default())?)?;

    let options = BulkOptions {
        raise_on_error: true,
        ..BulkOptions::default()
    };
    let result = executor(1).sum(&context.create(keyed_documents(0..3, 1), &options)?);
    let Err(Error::PartitionFailed { partition, source }) = result else {
        panic!("expected a partition failure, got {result:?}");
    };
    assert_eq!(partition, 0);
    assert_matches!(
        source.downcast_ref::<ElasticError>(),
        Some(ElasticError::BulkItemsRejected { rejected: 3, .. })
    );
    Ok(())
}

#[test]
fn test_index_generates_ids() -> eyre::Result<()> {
    let cluster = three_node_cluster();
    cluster.create_index(INDEX, 2, 0);
    let documents = Collection::from_vec((0..5).map(|i| json!({ "n": i })).collect(), 2);
    let write = context(&cluster).index(documents, &with_refresh())?;
    assert_eq!(executor(2).sum(&write)?, 5);
    assert_eq!(cluster.n_documents(INDEX), 5);
    Ok(())
}

#[test]
fn test_update_and_upsert() -> eyre::Result<()> {
    let cluster = three_node_cluster();
    cluster.create_index(INDEX, 2, 0);
    let context = context(&cluster);
    let executor = executor(2);
    executor.sum(&context.create(keyed_documents(0..5, 1), &BulkOptions::default())?)?;

    let partials = Collection::from_vec(
        (3..8_u64).map(|i| (i, json!({ "name": "changed" }))).collect(),
        2,
    );
    let updated = executor.sum(&context.update(partials.clone(), &BulkOptions::default())?)?;
    assert_eq!(updated, 2);
    assert_eq!(
        cluster.document(INDEX, "3"),
        Some(json!({ "n": 3, "name": "changed" }))
    );
    assert_eq!(cluster.document(INDEX, "6"), None);

    let upserted = executor.sum(&context.upsert(partials, &BulkOptions::default())?)?;
    assert_eq!(upserted, 5);
    assert_eq!(
        cluster.document(INDEX, "6"),
        Some(json!({ "name": "changed" }))
    );
    assert_eq!(cluster.n_documents(INDEX), 8);
    Ok(())
}

#[test]
fn test_repeated_upserts_merge_into_one_document() -> eyre::Result<()> {
    let cluster = three_node_cluster();
    cluster.create_index(INDEX, 2, 0);
    let context = context(&cluster);
    let executor = executor(1);

    for partial in [json!({ "number": 1 }), json!({ "text": "a" })] {
        let partials = Collection::from_vec(vec![(5_u64, partial)], 1);
        assert_eq!(
            executor.sum(&context.upsert(partials, &BulkOptions::default())?)?,
            1
        );
    }
    assert_eq!(cluster.n_documents(INDEX), 1);
    assert_eq!(
        cluster.document(INDEX, "5"),
        Some(json!({ "number": 1, "text": "a" }))
    );
    Ok(())
}

#[test]
fn test_delete() -> eyre::Result<()> {
    let cluster = three_node_cluster();
    cluster.create_index(INDEX, 3, 0);
    let context = context(&cluster);
    let executor = executor(2);
    executor.sum(&context.create(keyed_documents(0..300, 4), &BulkOptions::default())?)?;

    let ids = Collection::range(100..200, 3);
    assert_eq!(
        executor.sum(&context.delete(ids.clone(), &with_refresh())?)?,
        100
    );
    assert_eq!(executor.sum(&context.delete(ids, &BulkOptions::default())?)?, 0);
    assert_eq!(cluster.n_documents(INDEX), 200);

    let mut remaining = executor
        .collect(&context.search(SearchOptions::default())?)?
        .into_iter()
        .map(|hit| hit.id.parse())
        .collect::<Result<Vec<u64>, _>>()?;
    remaining.sort_unstable();
    let expected: Vec<u64> = (0..100).chain(200..300).collect();
    assert_eq!(remaining, expected);
    Ok(())
}

#[test]
fn test_generic_bulk_refreshes_named_indices() -> eyre::Result<()> {
    let cluster = three_node_cluster();
    cluster.create_index("a", 1, 0);
    cluster.create_index("b", 1, 0);
    let a = IndexTarget {
        index: "a".to_string(),
        doc_type: None,
    };
    let b = IndexTarget {
        index: "b".to_string(),
        doc_type: None,
    };
    let actions = Collection::from_vec(
        vec![
            BulkAction::create(&a, 1, json!({})),
            BulkAction::create(&b, 1, json!({})),
            BulkAction::delete(&b, 2),
        ],
        2,
    );
    let options = BulkOptions {
        index: Some("b, a".to_string()),
        ..with_refresh()
    };
    let write = context(&cluster).bulk(actions, &options)?;
    assert_eq!(write.refresh_indices(), ["a".to_string(), "b".to_string()]);
    assert_eq!(executor(2).sum(&write)?, 2);
    assert_eq!(
        cluster.stats().refreshes,
        vec![vec!["a".to_string(), "b".to_string()]]
    );
    Ok(())
}

#[test]
fn test_hard_failure_fails_the_job() -> eyre::Result<()> {
    let cluster = three_node_cluster();
    cluster.create_index(INDEX, 1, 0);
    let write = context(&cluster).create(keyed_documents(0..10, 2), &with_refresh())?;
    cluster.set_available(false);

    let result = executor(2).sum(&write);
    let Err(Error::PartitionFailed { source, .. }) = result else {
        panic!("expected a partition failure, got {result:?}");
    };
    assert_matches!(
        source.downcast_ref::<ElasticError>(),
        Some(ElasticError::Request {
            operation: Operation::Bulk,
            index,
            ..
        }) if index == INDEX
    );
    assert!(cluster.stats().refreshes.is_empty());
    Ok(())
}

#[test]
fn test_refresh_failure_after_successful_writes() -> eyre::Result<()> {
    let cluster = three_node_cluster();
    let options = BulkOptions {
        index: Some("missing".to_string()),
        ..with_refresh()
    };
    let actions = Collection::from_vec(vec![BulkAction::create(&target(), 1, json!({}))], 1);
    let write = context(&cluster).bulk(actions, &options)?;

    let result = executor(1).sum(&write);
    assert_matches!(result, Err(Error::Cleanup(_)));
    assert_eq!(cluster.n_documents(INDEX), 1);
    Ok(())
}

#[test]
fn test_writes_need_an_index() {
    let cluster = three_node_cluster();
    let context = context_with_config(&cluster, ElasticConfig::default());
    assert_matches!(
        context
            .create(keyed_documents(0..1, 1), &BulkOptions::default())
            .err(),
        Some(ElasticError::MissingIndex)
    );
    assert_matches!(
        context
            .bulk(Collection::<BulkAction>::from_vec(Vec::new(), 1), &with_refresh())
            .err(),
        Some(ElasticError::MissingIndex)
    );
}
