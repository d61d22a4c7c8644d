mod common;

use std::sync::atomic::Ordering;
use std::sync::Barrier;
use std::thread;
use std::time::Duration;

use common::*;
use proptest::prelude::*;
use sombra_apply::command::{Command, CommandBatch};
use sombra_apply::record::{LabelField, NodeRecord};
use sombra_apply::sync::WorkSyncConfig;
use sombra_apply::types::{IdType, NodeId, TxId};
use sombra_apply::{ApplyMode, ApplyOptions, Result};
use sombra_apply_testkit::Event;

const NUM_THREADS: usize = 8;
const BATCHES_PER_THREAD: usize = 25;

fn node_id(thread: usize, batch: usize) -> u64 {
    (thread * BATCHES_PER_THREAD + batch) as u64
}

fn coalescing_options() -> ApplyOptions {
    let config = WorkSyncConfig {
        max_batch_units: 16,
        max_batch_wait: Duration::from_micros(200),
    };
    ApplyOptions::new()
        .label_sync(config)
        .index_sync(config)
        .id_sync(config)
}

#[test]
fn concurrent_batches_all_reach_the_label_index() -> Result<()> {
    let fx = Fixture::with_options(coalescing_options());
    let barrier = Barrier::new(NUM_THREADS);
    thread::scope(|scope| -> Result<()> {
        let handles: Vec<_> = (0..NUM_THREADS)
            .map(|t| {
                let fx = &fx;
                let barrier = &barrier;
                scope.spawn(move || -> Result<()> {
                    barrier.wait();
                    for b in 0..BATCHES_PER_THREAD {
                        let id = node_id(t, b);
                        let batch = CommandBatch::new(
                            TxId(id + 1),
                            vec![created_node(id, &[(t % 3) as u32])],
                        );
                        fx.engine.apply(&batch, ApplyMode::Internal)?;
                    }
                    Ok(())
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("apply thread panicked")?;
        }
        Ok(())
    })?;

    let total = (NUM_THREADS * BATCHES_PER_THREAD) as u64;
    for t in 0..NUM_THREADS {
        for b in 0..BATCHES_PER_THREAD {
            let labels = fx.labels.labels(NodeId(node_id(t, b)));
            assert_eq!(labels.len(), 1);
            assert_eq!(labels[0].0, (t % 3) as u32);
        }
    }
    let stats = fx.engine.label_sync().stats();
    assert_eq!(stats.submitted, total);
    assert_eq!(stats.units_applied, total);
    assert!(stats.applies <= stats.submitted);
    assert_eq!(stats.failures, 0);
    assert_eq!(fx.metrics.batches_applied.load(Ordering::Relaxed), total);
    assert_eq!(fx.locks.held(), 0);
    Ok(())
}

#[test]
fn concurrent_id_updates_are_applied_once_each() -> Result<()> {
    let fx = Fixture::with_options(coalescing_options());
    thread::scope(|scope| {
        for t in 0..NUM_THREADS {
            let fx = &fx;
            scope.spawn(move || {
                for b in 0..BATCHES_PER_THREAD {
                    let id = node_id(t, b);
                    let batch = CommandBatch::new(TxId(id + 1), vec![created_node(id, &[])]);
                    fx.engine
                        .apply(&batch, ApplyMode::Internal)
                        .expect("batch applies");
                }
            });
        }
    });

    let total = (NUM_THREADS * BATCHES_PER_THREAD) as u64;
    let used = fx
        .journal
        .filtered(|e| matches!(e, Event::IdUsed(IdType::Node, _)));
    assert_eq!(used.len() as u64, total);
    assert_eq!(fx.generator(IdType::Node).generator().high_id(), total);
    let stats = fx
        .engine
        .id_syncs()
        .get(IdType::Node)
        .expect("node sync registered")
        .stats();
    assert_eq!(stats.units_applied, total);
    Ok(())
}

#[test]
fn writers_of_one_node_do_not_interleave() -> Result<()> {
    let fx = Fixture::new();
    thread::scope(|scope| {
        for t in 0..4u32 {
            let fx = &fx;
            scope.spawn(move || {
                for _ in 0..20 {
                    let batch = CommandBatch::new(TxId(1), vec![relabelled_node(1, &[], &[t])]);
                    fx.engine
                        .apply(&batch, ApplyMode::Internal)
                        .expect("batch applies");
                }
            });
        }
    });

    let mut held = false;
    for event in fx.journal.events() {
        match event {
            Event::NodeLocked(1) => {
                assert!(!held, "node lock granted twice");
                held = true;
            }
            Event::NodeUnlocked(1) => held = false,
            _ => {}
        }
    }
    assert_eq!(fx.locks.held(), 0);
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn label_index_ends_with_the_last_label_set(
        steps in prop::collection::vec((0u64..4, prop::collection::vec(0u32..6, 0..4)), 1..24)
    ) {
        let fx = Fixture::new();
        let mut current: Vec<Vec<u32>> = vec![Vec::new(); 4];
        for (node, next) in &steps {
            let mut before = NodeRecord::new(*node);
            before.in_use = true;
            before.labels = LabelField::inline(&labels(&current[*node as usize]));
            let mut after = before.clone();
            after.labels = LabelField::inline(&labels(next));
            fx.apply(vec![Command::node(before, after)], ApplyMode::Internal)
                .map_err(|err| TestCaseError::fail(err.to_string()))?;
            let mut sorted = next.clone();
            sorted.sort_unstable();
            sorted.dedup();
            current[*node as usize] = sorted;
        }
        for (node, expected) in current.iter().enumerate() {
            let actual: Vec<u32> = fx
                .labels
                .labels(NodeId(node as u64))
                .iter()
                .map(|l| l.0)
                .collect();
            prop_assert_eq!(&actual, expected);
        }
    }
}
