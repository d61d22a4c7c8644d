mod common;

use std::error::Error as _;

use common::*;
use sombra_apply::cache::TokenKind;
use sombra_apply::command::{Command, CommandBatch};
use sombra_apply::record::{NodeRecord, PropertyValue, TokenRecord};
use sombra_apply::schema::{IndexDescriptor, SchemaDescriptor, SchemaRule};
use sombra_apply::store::RecordStore;
use sombra_apply::types::{ApplyError, IdType, IndexError, PropId, TxId};
use sombra_apply::{ApplyMode, RecoveryStats, Result};
use sombra_apply_testkit::{Event, IndexState};

fn unique_index(id: u64) -> SchemaRule {
    SchemaRule::Index(
        IndexDescriptor::unique_for_schema(id, SchemaDescriptor::for_label(1, &[PropId(7)]))
            .with_owning_constraint(id + 1),
    )
}

fn batch(tx: u64, commands: Vec<Command>) -> CommandBatch {
    CommandBatch::new(TxId(tx), commands)
}

#[test]
fn replay_applies_every_batch_in_order() -> Result<()> {
    let fx = Fixture::new();
    let batches = vec![
        batch(1, vec![created_node(3, &[1]), created_node(9, &[])]),
        batch(2, vec![created_node(5, &[2])]),
        batch(
            3,
            vec![Command::label_token(
                TokenRecord::new(1),
                TokenRecord::named(1, 10, "Person"),
            )],
        ),
    ];
    let stats = fx.engine.recover(&batches)?;
    assert_eq!(
        stats,
        RecoveryStats {
            batches: 3,
            commands: 4,
            aborted: 0
        }
    );
    assert_eq!(fx.stores.nodes.highest_possible_id_in_use(), 9);
    assert!(fx.journal.in_order(
        &Event::HighId {
            id_type: IdType::Node,
            id: 9
        },
        &Event::HighId {
            id_type: IdType::Node,
            id: 5
        }
    ));
    assert_eq!(fx.token(TokenKind::Label, 1).as_deref(), Some("Person"));
    assert_eq!(fx.labels.labels(sombra_apply::types::NodeId(5)).len(), 1);
    Ok(())
}

#[test]
fn replay_stops_at_the_first_failing_batch() {
    let fx = Fixture::new();
    fx.stores.nodes.records.fail_writes_to(5);
    let batches = vec![
        batch(1, vec![created_node(3, &[])]),
        batch(2, vec![created_node(5, &[])]),
        batch(3, vec![created_node(7, &[])]),
    ];
    let err = fx.engine.recover(&batches).unwrap_err();
    assert!(matches!(err, ApplyError::Io(_)));
    assert!(fx.stores.nodes.records.record(3).is_some());
    assert!(fx.stores.nodes.records.record(7).is_none());
}

#[test]
fn activations_are_deferred_to_the_end_of_replay() -> Result<()> {
    let fx = Fixture::new();
    let batches = vec![
        batch(1, vec![create_rule(unique_index(5))]),
        batch(2, vec![update_rule(unique_index(5))]),
        batch(3, vec![created_node(3, &[1])]),
    ];
    fx.engine.recover(&batches)?;
    let node_written = Event::Update {
        id_type: IdType::Node,
        id: 3,
        in_use: true,
    };
    assert!(fx.journal.in_order(&node_written, &Event::IndexActivated(5)));
    assert_eq!(fx.indexing.state(5), Some(IndexState::Active));
    Ok(())
}

#[test]
fn replayed_activation_indexes_earlier_writes_of_its_batch() -> Result<()> {
    let fx = Fixture::new();
    fx.apply(vec![create_rule(unique_index(5))], ApplyMode::Internal)?;
    fx.apply(
        vec![
            created_node(3, &[1]),
            created_property(10, 3, &[(7, PropertyValue::Int(1))]),
            update_rule(unique_index(5)),
        ],
        ApplyMode::Recovery,
    )?;
    assert_eq!(fx.indexing.entries(5), vec![(3, vec![PropertyValue::Int(1)])]);
    assert_eq!(fx.indexing.state(5), Some(IndexState::Active));
    assert!(fx.caches.schema.get(5).is_some());
    Ok(())
}

#[test]
fn missing_index_activation_is_fatal() {
    let fx = Fixture::new();
    let err = fx
        .apply(vec![update_rule(unique_index(9))], ApplyMode::Recovery)
        .unwrap_err();
    match &err {
        ApplyError::IndexActivation { index, .. } => assert_eq!(*index, 9),
        other => panic!("unexpected error: {other:?}"),
    }
    let source = err
        .source()
        .and_then(|source| source.downcast_ref::<IndexError>());
    assert_eq!(source, Some(&IndexError::NotFound(9)));
    assert!(err.to_string().contains("unable to enable constraint"));
}

#[test]
fn failed_activation_keeps_the_index_engine_reason() {
    let fx = Fixture::new();
    fx.indexing.register_online(5);
    fx.indexing.fail_activation(5, "population failed");
    let err = fx
        .apply(vec![update_rule(unique_index(5))], ApplyMode::External)
        .unwrap_err();
    let source = err
        .source()
        .and_then(|source| source.downcast_ref::<IndexError>());
    assert_eq!(
        source,
        Some(&IndexError::Failed {
            index: 5,
            reason: "population failed".into()
        })
    );
}

#[test]
fn index_dropped_during_replay_is_not_activated() -> Result<()> {
    let fx = Fixture::new();
    let batches = vec![
        batch(1, vec![update_rule(unique_index(5))]),
        batch(2, vec![delete_rule(unique_index(5))]),
    ];
    fx.engine.recover(&batches)?;
    assert!(!fx.journal.contains(&Event::IndexActivated(5)));
    assert_eq!(fx.indexing.state(5), Some(IndexState::Dropped));
    Ok(())
}

#[test]
fn plain_index_update_does_not_activate() -> Result<()> {
    let fx = Fixture::new();
    let rule = SchemaRule::Index(label_index(5, 1, 7));
    fx.apply(vec![update_rule(rule)], ApplyMode::Recovery)?;
    assert!(fx
        .journal
        .filtered(|e| matches!(e, Event::IndexActivated(_)))
        .is_empty());
    Ok(())
}

#[test]
fn internal_apply_activates_after_the_batch() -> Result<()> {
    let fx = Fixture::new();
    fx.apply(vec![create_rule(unique_index(5))], ApplyMode::Internal)?;
    assert_eq!(fx.indexing.state(5), Some(IndexState::Populating));
    fx.apply(vec![update_rule(unique_index(5))], ApplyMode::Internal)?;
    assert!(fx
        .journal
        .in_order(&Event::SchemaRuleAdded(5), &Event::IndexActivated(5)));
    assert_eq!(fx.indexing.state(5), Some(IndexState::Active));
    Ok(())
}

#[test]
fn external_batches_track_high_ids_and_invalidate_caches() -> Result<()> {
    let fx = Fixture::new();
    let mut after = NodeRecord::new(30);
    after.in_use = true;
    fx.apply(
        vec![
            Command::node(NodeRecord::new(30), after),
            Command::label_token(TokenRecord::new(2), TokenRecord::named(2, 20, "City")),
        ],
        ApplyMode::External,
    )?;
    assert!(fx.journal.contains(&Event::HighId {
        id_type: IdType::Node,
        id: 30
    }));
    assert!(fx
        .journal
        .contains(&Event::TokenRemoved(TokenKind::Label, 2)));
    Ok(())
}
