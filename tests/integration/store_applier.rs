mod common;

use std::sync::atomic::Ordering;

use common::*;
use sombra_apply::cache::TokenKind;
use sombra_apply::command::Command;
use sombra_apply::record::{
    LabelField, MetaDataRecord, NamedToken, NodeRecord, PropertyBlock, PropertyRecord,
    PropertyValue, RelationshipGroupRecord, RelationshipRecord, TokenRecord,
};
use sombra_apply::schema::{ConstraintRule, SchemaDescriptor, SchemaRule};
use sombra_apply::store::{MetaDataStore, NodeStore, RecordStore};
use sombra_apply::types::{ApplyError, IdType, PropId, TypeId};
use sombra_apply::{ApplyMode, Result};
use sombra_apply_testkit::Event;

fn node_with_dynamic_labels() -> Command {
    let (one, two, three) = (dynamic(1), dynamic(2), dynamic(3));
    let mut before = NodeRecord::new(11);
    before.in_use = true;
    before.labels = LabelField::dynamic(vec![one.clone(), two.clone()]);
    let mut after = NodeRecord::new(12);
    after.in_use = true;
    after.labels = LabelField::dynamic(vec![one, two, three]);
    Command::node(before, after)
}

fn update(id_type: IdType, id: u64) -> Event {
    Event::Update {
        id_type,
        id,
        in_use: true,
    }
}

fn high_id(id_type: IdType, id: u64) -> Event {
    Event::HighId { id_type, id }
}

fn label_token_created() -> Command {
    Command::label_token(TokenRecord::new(42), TokenRecord::named(42, 323, "token"))
}

#[test]
fn node_is_written_under_its_write_lock() -> Result<()> {
    let fx = Fixture::new();
    assert!(!fx.apply(vec![node_with_dynamic_labels()], ApplyMode::Internal)?);

    let journal = &fx.journal;
    assert!(journal.in_order(&Event::NodeLocked(12), &update(IdType::Node, 12)));
    assert!(journal.in_order(&update(IdType::Node, 12), &Event::NodeUnlocked(12)));
    assert!(journal
        .filtered(|e| matches!(e, Event::HighId { .. }))
        .is_empty());
    assert!(journal
        .filtered(|e| matches!(e, Event::TokenRemoved(..) | Event::SchemaRuleRemoved(_)))
        .is_empty());
    assert_eq!(fx.locks.held(), 0);
    assert!(fx.stores.nodes.records.record(12).is_some());
    Ok(())
}

#[test]
fn recovered_node_raises_high_ids_before_the_write() -> Result<()> {
    let fx = Fixture::new();
    fx.apply(vec![node_with_dynamic_labels()], ApplyMode::Recovery)?;

    let journal = &fx.journal;
    assert!(journal.in_order(&high_id(IdType::Node, 12), &update(IdType::Node, 12)));
    assert!(journal.in_order(&high_id(IdType::NodeLabels, 3), &update(IdType::NodeLabels, 3)));
    assert_eq!(fx.stores.nodes.highest_possible_id_in_use(), 12);
    assert_eq!(
        fx.stores.nodes.dynamic_label_store().highest_possible_id_in_use(),
        3
    );
    assert_eq!(fx.metrics.recovery_batches.load(Ordering::Relaxed), 1);
    Ok(())
}

#[test]
fn dense_transition_is_counted() -> Result<()> {
    let fx = Fixture::new();
    let mut before = NodeRecord::new(4);
    before.in_use = true;
    let mut after = before.clone();
    after.dense = true;
    fx.apply(vec![Command::node(before, after)], ApplyMode::Internal)?;
    assert_eq!(fx.metrics.dense_transitions.load(Ordering::Relaxed), 1);
    Ok(())
}

#[test]
fn recovered_relationship_covers_its_secondary_unit() -> Result<()> {
    let fx = Fixture::new();
    let mut after = RelationshipRecord::between(5, 1, 2, TypeId(3));
    after.in_use = true;
    after.secondary_unit = Some(9);
    fx.apply(
        vec![Command::relationship(RelationshipRecord::new(5), after)],
        ApplyMode::Recovery,
    )?;
    assert!(fx
        .journal
        .in_order(&high_id(IdType::Relationship, 9), &update(IdType::Relationship, 5)));
    assert!(!fx.journal.contains(&high_id(IdType::Relationship, 5)));
    Ok(())
}

#[test]
fn internal_relationship_leaves_high_id_alone() -> Result<()> {
    let fx = Fixture::new();
    let mut after = RelationshipRecord::between(5, 1, 2, TypeId(3));
    after.in_use = true;
    fx.apply(
        vec![Command::relationship(RelationshipRecord::new(5), after)],
        ApplyMode::Internal,
    )?;
    assert!(fx.journal.contains(&update(IdType::Relationship, 5)));
    assert_eq!(fx.stores.relationships.highest_possible_id_in_use(), 0);
    Ok(())
}

#[test]
fn node_property_is_written_under_the_node_lock() -> Result<()> {
    let fx = Fixture::new();
    let after = node_property(8, 3, &[(1, PropertyValue::Int(10))]);
    fx.apply(
        vec![Command::property(PropertyRecord::new(8), after)],
        ApplyMode::Internal,
    )?;
    assert!(fx
        .journal
        .in_order(&Event::NodeLocked(3), &update(IdType::Property, 8)));
    assert!(fx
        .journal
        .in_order(&update(IdType::Property, 8), &Event::NodeUnlocked(3)));
    Ok(())
}

#[test]
fn relationship_property_takes_no_lock() -> Result<()> {
    let fx = Fixture::new();
    let mut after = PropertyRecord::new(8);
    after.in_use = true;
    after.set_rel_id(6);
    fx.apply(
        vec![Command::property(PropertyRecord::new(8), after)],
        ApplyMode::Internal,
    )?;
    assert!(fx
        .journal
        .filtered(|e| matches!(e, Event::NodeLocked(_) | Event::RelationshipLocked(_)))
        .is_empty());
    Ok(())
}

#[test]
fn recovered_property_raises_value_store_high_ids() -> Result<()> {
    let fx = Fixture::new();
    let mut after = node_property(8, 3, &[]);
    let mut block = PropertyBlock::new(PropId(2), PropertyValue::Str("a long string".into()));
    block.value_records = vec![dynamic(40), dynamic(41)];
    after.set(block);
    let mut array = PropertyBlock::new(PropId(4), PropertyValue::IntArray(vec![1, 2, 3]));
    array.value_records = vec![dynamic(17)];
    after.set(array);
    fx.apply(
        vec![Command::property(PropertyRecord::new(8), after)],
        ApplyMode::Recovery,
    )?;
    assert!(fx.journal.contains(&high_id(IdType::Property, 8)));
    assert!(fx.journal.contains(&high_id(IdType::StringBlock, 41)));
    assert!(fx.journal.contains(&high_id(IdType::ArrayBlock, 17)));
    assert!(fx.journal.contains(&update(IdType::StringBlock, 40)));
    Ok(())
}

#[test]
fn recovered_relationship_group_is_tracked() -> Result<()> {
    let fx = Fixture::new();
    let mut after = RelationshipGroupRecord::new(21, TypeId(2));
    after.in_use = true;
    fx.apply(
        vec![Command::relationship_group(
            RelationshipGroupRecord::new(21, TypeId(2)),
            after,
        )],
        ApplyMode::Recovery,
    )?;
    assert!(fx.journal.in_order(
        &high_id(IdType::RelationshipGroup, 21),
        &update(IdType::RelationshipGroup, 21)
    ));
    Ok(())
}

#[test]
fn created_label_token_reaches_the_cache() -> Result<()> {
    let fx = Fixture::new();
    fx.apply(vec![label_token_created()], ApplyMode::Internal)?;
    let added = Event::TokenAdded(TokenKind::Label, NamedToken::new("token", 42));
    assert!(fx.journal.in_order(&update(IdType::LabelToken, 42), &added));
    assert!(!fx.journal.contains(&Event::TokenRemoved(TokenKind::Label, 42)));
    assert_eq!(fx.token(TokenKind::Label, 42).as_deref(), Some("token"));
    Ok(())
}

#[test]
fn recovered_label_token_is_invalidated_then_added() -> Result<()> {
    let fx = Fixture::new();
    fx.apply(vec![label_token_created()], ApplyMode::Recovery)?;
    let journal = &fx.journal;
    let removed = Event::TokenRemoved(TokenKind::Label, 42);
    let added = Event::TokenAdded(TokenKind::Label, NamedToken::new("token", 42));
    assert!(journal.in_order(&removed, &update(IdType::LabelToken, 42)));
    assert!(journal.in_order(&update(IdType::LabelToken, 42), &added));
    assert!(journal.contains(&high_id(IdType::LabelToken, 42)));
    assert!(journal.contains(&high_id(IdType::LabelTokenName, 323)));
    Ok(())
}

#[test]
fn updated_token_is_not_re_added() -> Result<()> {
    let fx = Fixture::new();
    let before = TokenRecord::named(42, 323, "token");
    let mut after = before.clone();
    after.created = false;
    after.internal = true;
    fx.apply(vec![Command::label_token(before, after)], ApplyMode::Internal)?;
    assert!(fx.journal.contains(&update(IdType::LabelToken, 42)));
    assert!(fx
        .journal
        .filtered(|e| matches!(e, Event::TokenAdded(..)))
        .is_empty());
    Ok(())
}

#[test]
fn recovered_token_update_keeps_the_token_cached() -> Result<()> {
    let fx = Fixture::new();
    fx.apply(vec![label_token_created()], ApplyMode::Internal)?;
    fx.journal.clear();

    let before = TokenRecord::named(42, 323, "token");
    let mut after = before.clone();
    after.created = false;
    fx.apply(vec![Command::label_token(before, after)], ApplyMode::Recovery)?;

    let removed = Event::TokenRemoved(TokenKind::Label, 42);
    let added = Event::TokenAdded(TokenKind::Label, NamedToken::new("token", 42));
    assert!(fx.journal.in_order(&removed, &added));
    assert_eq!(
        fx.journal
            .filtered(|e| matches!(e, Event::TokenAdded(..)))
            .len(),
        1
    );
    assert_eq!(fx.token(TokenKind::Label, 42).as_deref(), Some("token"));
    Ok(())
}

#[test]
fn recovered_token_deletion_stays_evicted() -> Result<()> {
    let fx = Fixture::new();
    fx.apply(vec![label_token_created()], ApplyMode::Internal)?;
    let before = TokenRecord::named(42, 323, "token");
    fx.apply(
        vec![Command::label_token(before, TokenRecord::new(42))],
        ApplyMode::Recovery,
    )?;
    assert!(fx.journal.contains(&Event::TokenRemoved(TokenKind::Label, 42)));
    assert_eq!(fx.token(TokenKind::Label, 42), None);
    Ok(())
}

#[test]
fn internal_updates_leave_caches_alone() -> Result<()> {
    let fx = Fixture::new();
    let rule = SchemaRule::Index(label_index(5, 1, 7));
    fx.apply(
        vec![label_token_created(), create_rule(rule.clone())],
        ApplyMode::Internal,
    )?;
    let before = TokenRecord::named(42, 323, "token");
    let mut after = before.clone();
    after.created = false;
    fx.apply(
        vec![Command::label_token(before, after), update_rule(rule)],
        ApplyMode::Internal,
    )?;
    assert!(fx
        .journal
        .filtered(|e| matches!(e, Event::TokenRemoved(..) | Event::SchemaRuleRemoved(_)))
        .is_empty());
    assert_eq!(fx.token(TokenKind::Label, 42).as_deref(), Some("token"));
    assert!(fx.caches.schema.get(5).is_some());
    Ok(())
}

#[test]
fn token_kinds_are_routed_to_their_holders() -> Result<()> {
    let fx = Fixture::new();
    fx.apply(
        vec![
            Command::property_key_token(TokenRecord::new(3), TokenRecord::named(3, 30, "name")),
            Command::relationship_type_token(
                TokenRecord::new(4),
                TokenRecord::named(4, 40, "KNOWS"),
            ),
        ],
        ApplyMode::Internal,
    )?;
    assert_eq!(fx.token(TokenKind::PropertyKey, 3).as_deref(), Some("name"));
    assert_eq!(
        fx.token(TokenKind::RelationshipType, 4).as_deref(),
        Some("KNOWS")
    );
    assert_eq!(fx.token(TokenKind::Label, 3), None);
    Ok(())
}

#[test]
fn created_index_rule_is_cached_and_created() -> Result<()> {
    let fx = Fixture::new();
    let rule = SchemaRule::Index(label_index(5, 1, 7));
    fx.apply(vec![create_rule(rule)], ApplyMode::Internal)?;
    let journal = &fx.journal;
    assert!(journal.in_order(&update(IdType::Schema, 5), &Event::SchemaRuleAdded(5)));
    assert!(journal.contains(&Event::IndexesCreated(vec![5])));
    assert!(fx.caches.schema.get(5).is_some());
    assert!(!journal.contains(&Event::ConstraintTx(TX)));
    Ok(())
}

#[test]
fn deleted_rule_leaves_the_cache() -> Result<()> {
    let fx = Fixture::new();
    let rule = SchemaRule::Index(label_index(5, 1, 7));
    fx.apply(vec![create_rule(rule.clone())], ApplyMode::Internal)?;
    fx.apply(vec![delete_rule(rule)], ApplyMode::Internal)?;
    assert!(fx.journal.contains(&Event::SchemaRuleRemoved(5)));
    assert!(fx.journal.contains(&Event::IndexDropped(5)));
    assert!(fx.caches.schema.get(5).is_none());
    Ok(())
}

#[test]
fn uniqueness_constraint_records_the_introducing_tx() -> Result<()> {
    let fx = Fixture::new();
    let schema = SchemaDescriptor::for_label(1, &[PropId(7)]);
    let rule = SchemaRule::Constraint(ConstraintRule::uniqueness(6, schema, 5));
    fx.apply(vec![create_rule(rule.clone())], ApplyMode::Internal)?;
    assert!(fx
        .journal
        .in_order(&update(IdType::Schema, 6), &Event::ConstraintTx(TX)));
    assert!(fx
        .journal
        .in_order(&Event::ConstraintTx(TX), &Event::SchemaRuleAdded(6)));
    assert_eq!(fx.stores.meta_data.latest_constraint_introducing_tx(), TX);

    fx.journal.clear();
    fx.apply(vec![update_rule(rule.clone())], ApplyMode::Internal)?;
    assert!(fx.journal.contains(&Event::ConstraintTx(TX)));

    fx.journal.clear();
    fx.apply(vec![delete_rule(rule)], ApplyMode::Internal)?;
    assert!(!fx.journal.contains(&Event::ConstraintTx(TX)));
    assert!(fx.journal.contains(&Event::SchemaRuleRemoved(6)));
    Ok(())
}

#[test]
fn existence_constraint_does_not_touch_the_constraint_tx() -> Result<()> {
    let fx = Fixture::new();
    let schema = SchemaDescriptor::for_label(1, &[PropId(7)]);
    let rule = SchemaRule::Constraint(ConstraintRule::existence(6, schema));
    fx.apply(vec![create_rule(rule)], ApplyMode::Internal)?;
    assert!(fx
        .journal
        .filtered(|e| matches!(e, Event::ConstraintTx(_)))
        .is_empty());
    assert!(fx.caches.schema.get(6).is_some());
    Ok(())
}

#[test]
fn recovered_rule_is_invalidated_before_it_is_re_added() -> Result<()> {
    let fx = Fixture::new();
    let rule = SchemaRule::Index(label_index(5, 1, 7));
    fx.apply(vec![create_rule(rule)], ApplyMode::Recovery)?;
    let journal = &fx.journal;
    assert!(journal.in_order(&high_id(IdType::Schema, 5), &update(IdType::Schema, 5)));
    assert!(journal.in_order(&Event::SchemaRuleRemoved(5), &update(IdType::Schema, 5)));
    assert!(journal.in_order(&update(IdType::Schema, 5), &Event::SchemaRuleAdded(5)));
    Ok(())
}

#[test]
fn recovered_rule_update_stays_cached() -> Result<()> {
    let fx = Fixture::new();
    let rule = SchemaRule::Index(label_index(5, 1, 7));
    fx.apply(vec![create_rule(rule.clone())], ApplyMode::Internal)?;
    fx.journal.clear();

    fx.apply(vec![update_rule(rule)], ApplyMode::Recovery)?;
    let journal = &fx.journal;
    assert!(journal.in_order(&Event::SchemaRuleRemoved(5), &Event::SchemaRuleAdded(5)));
    assert!(fx.caches.schema.get(5).is_some());
    assert_eq!(fx.caches.schema.indexes().len(), 1);
    Ok(())
}

#[test]
fn meta_data_sets_the_graph_property_chain() -> Result<()> {
    let fx = Fixture::new();
    fx.apply(
        vec![Command::meta_data(
            MetaDataRecord::default(),
            MetaDataRecord { next_prop: 99 },
        )],
        ApplyMode::Internal,
    )?;
    assert!(fx.journal.contains(&Event::GraphNextProp(99)));
    assert_eq!(fx.stores.meta_data.graph_next_prop(), 99);
    Ok(())
}

#[test]
fn id_usage_reaches_the_registered_generators() -> Result<()> {
    let fx = Fixture::new();
    fx.apply(vec![created_node(3, &[1])], ApplyMode::Internal)?;
    assert!(fx.journal.contains(&Event::IdUsed(IdType::Node, 3)));
    assert_eq!(fx.generator(IdType::Node).generator().high_id(), 4);

    let mut before = NodeRecord::new(3);
    before.in_use = true;
    fx.apply(
        vec![Command::node(before, NodeRecord::new(3))],
        ApplyMode::Internal,
    )?;
    assert!(fx.journal.contains(&Event::IdFreed(IdType::Node, 3)));
    assert_eq!(fx.generator(IdType::Node).generator().free_ids(), vec![3]);
    Ok(())
}

#[test]
fn failed_store_write_fails_the_batch_and_releases_the_lock() {
    let fx = Fixture::new();
    fx.stores.nodes.records.fail_writes_to(3);
    let err = fx
        .apply(vec![created_node(3, &[]), created_node(4, &[])], ApplyMode::Internal)
        .unwrap_err();
    assert!(matches!(err, ApplyError::Io(_)));
    assert_eq!(fx.locks.held(), 0);
    assert!(fx.stores.nodes.records.record(4).is_none());
    assert_eq!(fx.metrics.batches_failed.load(Ordering::Relaxed), 1);
}

#[test]
fn id_generator_failure_surfaces_from_close() {
    let fx = Fixture::new();
    fx.generator(IdType::Node).fail();
    let err = fx
        .apply(vec![created_node(3, &[])], ApplyMode::Internal)
        .unwrap_err();
    assert!(matches!(err, ApplyError::Invalid(_)));
    assert!(fx.stores.nodes.records.record(3).is_some());
}
