//! Integration tests for reopening a world from its persisted state.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use ebb_storage::{MemoryStorage, PrimitiveStorage};
use ebb_world::{
    Component, ComponentTypeId, EntityCommandBuffer, StagedTransaction, TxPool, WorldError,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
struct Foo {
    value: i64,
}

impl Component for Foo {
    const NAME: &'static str = "foo";
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
struct Bar {
    count: u32,
}

impl Component for Bar {
    const NAME: &'static str = "bar";
}

// Conflicts with Foo: same name, different shape.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
struct FooReshaped {
    value: i64,
    extra: bool,
}

impl Component for FooReshaped {
    const NAME: &'static str = "foo";
}

struct World {
    manager: EntityCommandBuffer,
    foo: ComponentTypeId,
    bar: ComponentTypeId,
}

fn fresh_store() -> Arc<MemoryStorage> {
    Arc::new(MemoryStorage::new())
}

fn open_world(store: &Arc<MemoryStorage>) -> World {
    let mut manager = EntityCommandBuffer::open(
        Arc::clone(store) as Arc<dyn PrimitiveStorage>,
        "recovery-test",
    )
    .unwrap();
    let foo = manager.register_component::<Foo>().unwrap();
    let bar = manager.register_component::<Bar>().unwrap();
    World { manager, foo, bar }
}

#[test]
fn test_loading_from_storage_does_not_repeat_entity_ids() {
    let store = fresh_store();
    let mut w = open_world(&store);

    let ids = w.manager.create_many_entities(50, &[w.foo]).unwrap();
    w.manager.commit_pending().unwrap();
    let next_id = ids.last().unwrap().raw() + 1;

    // A new manager over the same store must pick up where this one left
    // off.
    let mut w = open_world(&store);
    let got = w.manager.create_entity(&[w.foo]).unwrap();
    assert_eq!(got.raw(), next_id);
}

#[test]
fn test_first_entity_id_is_one() {
    let store = fresh_store();
    let mut w = open_world(&store);
    let id = w.manager.create_entity(&[w.foo]).unwrap();
    assert_eq!(id.raw(), 1);
}

#[test]
fn test_component_sets_can_be_recovered() {
    let store = fresh_store();
    let mut w = open_world(&store);

    let first = w.manager.create_entity(&[w.bar]).unwrap();
    w.manager.commit_pending().unwrap();

    let mut w = open_world(&store);
    let second = w.manager.create_entity(&[w.bar]).unwrap();

    let first_comps = w.manager.component_types_for_entity(first).unwrap();
    let second_comps = w.manager.component_types_for_entity(second).unwrap();
    assert_eq!(first_comps, second_comps);

    let first_arch = w.manager.arch_id_for_components(&first_comps).unwrap();
    let second_arch = w.manager.arch_id_for_components(&second_comps).unwrap();
    assert_eq!(first_arch, second_arch);
}

#[test]
fn test_archetypes_are_remembered_from_previous_db() {
    let store = fresh_store();
    let mut w = open_world(&store);

    w.manager.create_entity(&[w.bar]).unwrap();
    let first = w.manager.create_entity(&[w.foo]).unwrap();
    let comps = w.manager.component_types_for_entity(first).unwrap();
    let first_arch = w.manager.arch_id_for_components(&comps).unwrap();
    w.manager.commit_pending().unwrap();

    let mut w = open_world(&store);
    let id = w.manager.create_entity(&[w.foo]).unwrap();
    let comps = w.manager.component_types_for_entity(id).unwrap();
    let got_arch = w.manager.arch_id_for_components(&comps).unwrap();
    assert_eq!(got_arch, first_arch);
    w.manager.commit_pending().unwrap();
}

#[test]
fn test_component_types_can_be_read_after_reload() {
    let store = fresh_store();
    let mut w = open_world(&store);

    w.manager.create_entity(&[w.foo]).unwrap();
    let id = w.manager.create_entity(&[w.foo, w.bar]).unwrap();
    w.manager.commit_pending().unwrap();

    let w = open_world(&store);
    let comps = w.manager.component_types_for_entity(id).unwrap();
    assert_eq!(comps.len(), 2);
}

#[test]
fn test_entities_can_be_fetched_after_reload() {
    let store = fresh_store();
    let mut w = open_world(&store);

    let ids = w.manager.create_many_entities(10, &[w.foo, w.bar]).unwrap();
    let comps = w.manager.component_types_for_entity(ids[0]).unwrap();
    let arch = w.manager.arch_id_for_components(&comps).unwrap();
    assert_eq!(w.manager.entities_for_arch_id(arch).unwrap().len(), 10);

    w.manager.commit_pending().unwrap();

    let w = open_world(&store);
    let found = w.manager.entities_for_arch_id(arch).unwrap();
    assert_eq!(found, ids);
}

#[test]
fn test_removal_of_entities_is_remembered_after_reload() {
    let store = fresh_store();
    let mut w = open_world(&store);

    let ids = w.manager.create_many_entities(10, &[w.foo, w.bar]).unwrap();
    w.manager.commit_pending().unwrap();

    let removed = ids[5];
    w.manager.remove_entity(removed).unwrap();
    w.manager.commit_pending().unwrap();

    let w = open_world(&store);
    for id in ids {
        let result = w.manager.get_component_for_entity::<Foo>(id);
        if id == removed {
            assert!(result.is_err());
        } else {
            assert!(result.is_ok());
        }
    }
}

#[test]
fn test_removed_component_value_survives_a_discard() {
    let store = fresh_store();
    let mut w = open_world(&store);

    let id = w.manager.create_entity(&[w.foo, w.bar]).unwrap();
    let want = Foo { value: 99 };
    w.manager.set_component_for_entity(id, &want).unwrap();
    w.manager.commit_pending().unwrap();

    w.manager.remove_component_from_entity(w.foo, id).unwrap();
    assert!(matches!(
        w.manager.get_component_for_entity::<Foo>(id),
        Err(WorldError::ComponentNotOnEntity { .. })
    ));

    // The removal is undone, so the original value must come back.
    w.manager.discard_pending();
    assert_eq!(w.manager.get_component_for_entity::<Foo>(id).unwrap(), want);
}

#[test]
fn test_archetype_count_tracks_discarded_changes() {
    let store = fresh_store();
    let mut w = open_world(&store);

    w.manager.create_entity(&[w.foo]).unwrap();
    assert_eq!(w.manager.archetype_count(), 1);
    w.manager.commit_pending().unwrap();

    w.manager.create_entity(&[w.foo, w.bar]).unwrap();
    assert_eq!(w.manager.archetype_count(), 2);
    w.manager.discard_pending();

    // The staged archetype evaporated with the discard.
    w.manager.create_entity(&[w.foo]).unwrap();
    assert_eq!(w.manager.archetype_count(), 1);
}

#[test]
fn test_component_values_survive_reload() {
    let store = fresh_store();
    let mut w = open_world(&store);

    let ids = w.manager.create_many_entities(4, &[w.foo]).unwrap();
    for (offset, &id) in ids.iter().enumerate() {
        w.manager
            .set_component_for_entity(id, &Foo { value: offset as i64 * 10 })
            .unwrap();
    }
    w.manager.commit_pending().unwrap();

    let w = open_world(&store);
    for (offset, &id) in ids.iter().enumerate() {
        assert_eq!(
            w.manager.get_component_for_entity::<Foo>(id).unwrap(),
            Foo {
                value: offset as i64 * 10
            }
        );
    }
}

#[test]
fn test_schema_mismatch_is_detected_on_reload() {
    let store = fresh_store();
    {
        let _w = open_world(&store);
    }

    let mut manager = EntityCommandBuffer::open(
        Arc::clone(&store) as Arc<dyn PrimitiveStorage>,
        "recovery-test",
    )
    .unwrap();
    let err = manager.register_component::<FooReshaped>().unwrap_err();
    assert!(matches!(err, WorldError::SchemaMismatch { .. }));
}

#[test]
fn test_pending_transactions_survive_a_crash() {
    let store = fresh_store();
    let mut pool = TxPool::new();
    pool.push(StagedTransaction {
        message_id: 7,
        payload: b"attack goblin".to_vec(),
    });

    {
        let mut w = open_world(&store);
        w.manager.start_next_tick(&pool).unwrap();
        w.manager.create_entity(&[w.foo]).unwrap();
        // Dropped without finalizing: the crash point.
    }

    let mut w = open_world(&store);
    let recovered = w.manager.take_recovered_transactions().unwrap();
    assert_eq!(recovered, pool);
    // The half-finished tick left no entities behind.
    let arch = w.manager.arch_id_for_components(&[w.foo]).unwrap();
    assert!(w.manager.entities_for_arch_id(arch).unwrap().is_empty());

    // Replaying and finalizing clears the log for good.
    w.manager.start_next_tick(&pool).unwrap();
    w.manager.create_entity(&[w.foo]).unwrap();
    w.manager.finalize_tick().unwrap();

    let mut w = open_world(&store);
    assert!(w.manager.take_recovered_transactions().is_none());
}

#[test]
fn test_tick_cannot_start_before_recovered_transactions_are_taken() {
    let store = fresh_store();
    {
        let mut w = open_world(&store);
        w.manager.start_next_tick(&TxPool::new()).unwrap();
    }

    let mut w = open_world(&store);
    assert!(matches!(
        w.manager.start_next_tick(&TxPool::new()),
        Err(WorldError::InvalidState(_))
    ));
    w.manager.take_recovered_transactions();
    w.manager.start_next_tick(&TxPool::new()).unwrap();
}
