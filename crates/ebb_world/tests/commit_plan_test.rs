//! Integration tests for the commit planner's row bookkeeping.
//!
//! Removing an entity swaps the tail row into its slot, which relocates
//! whichever entity lived there; a tick that mixes creations and removals in
//! one archetype exercises every interaction between fresh appends and those
//! cascading swaps. These tests drive the planner across many interleavings
//! and then check the invariants that must hold in the committed store:
//! dense equal-length columns, one location per live entity, and every
//! component value still readable and correct.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use ebb_storage::{MemoryStorage, PrimitiveStorage};
use ebb_world::{ColumnStore, Component, ComponentTypeId, EntityCommandBuffer, EntityId};

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
struct Marker {
    stamp: u64,
}

impl Component for Marker {
    const NAME: &'static str = "marker";
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
struct Shadow {
    stamp: u64,
}

impl Component for Shadow {
    const NAME: &'static str = "shadow";
}

struct World {
    store: Arc<MemoryStorage>,
    manager: EntityCommandBuffer,
    marker: ComponentTypeId,
    shadow: ComponentTypeId,
}

fn open_world(store: Arc<MemoryStorage>) -> World {
    let mut manager = EntityCommandBuffer::open(
        Arc::clone(&store) as Arc<dyn PrimitiveStorage>,
        "plan-test",
    )
    .unwrap();
    let marker = manager.register_component::<Marker>().unwrap();
    let shadow = manager.register_component::<Shadow>().unwrap();
    World {
        store,
        manager,
        marker,
        shadow,
    }
}

/// Stamps each entity's components with its own ID so a misdirected swap is
/// visible as a wrong value.
fn stamp(w: &mut World, ids: &[EntityId]) {
    for &id in ids {
        w.manager
            .set_component_for_entity(id, &Marker { stamp: id.raw() })
            .unwrap();
        w.manager
            .set_component_for_entity(id, &Shadow { stamp: id.raw() })
            .unwrap();
    }
}

/// Checks the committed store directly: columns dense and equal in length,
/// membership consistent, and every survivor's values intact.
fn verify_archetype(w: &World, survivors: &[EntityId]) {
    let comps = w
        .manager
        .component_types_for_entity(survivors[0])
        .unwrap();
    let matching = w
        .manager
        .iter_archetypes_matching(|c| c == comps.as_slice());
    assert_eq!(matching.len(), 1);
    let arch = matching[0];

    let mut members = w.manager.entities_for_arch_id(arch).unwrap();
    members.sort_unstable();
    let mut expected = survivors.to_vec();
    expected.sort_unstable();
    assert_eq!(members, expected, "membership list disagrees with survivors");

    let columns = ColumnStore::new(
        Arc::clone(&w.store) as Arc<dyn PrimitiveStorage>,
        ebb_storage::KeySpace::new("plan-test"),
    );
    let rows = columns.rows_in_archetype(arch).unwrap();
    assert_eq!(rows as usize, survivors.len());

    for &id in survivors {
        assert_eq!(
            w.manager
                .get_component_for_entity::<Marker>(id)
                .unwrap(),
            Marker { stamp: id.raw() },
            "marker of entity {id} was clobbered by a swap"
        );
        assert_eq!(
            w.manager
                .get_component_for_entity::<Shadow>(id)
                .unwrap(),
            Shadow { stamp: id.raw() },
            "shadow of entity {id} was clobbered by a swap"
        );
    }
}

#[test]
fn test_every_removal_interleaving_keeps_columns_dense() {
    const BASE: usize = 6;
    const FRESH: usize = 2;

    // Every subset of the six committed entities gets removed in one tick
    // that also creates two fresh entities in the same archetype.
    for mask in 0u32..(1 << BASE) {
        let mut w = open_world(Arc::new(MemoryStorage::new()));
        let comps = [w.marker, w.shadow];

        let ids = w.manager.create_many_entities(BASE, &comps).unwrap();
        stamp(&mut w, &ids);
        w.manager.commit_pending().unwrap();

        let mut survivors: Vec<EntityId> = Vec::new();
        for (bit, &id) in ids.iter().enumerate() {
            if mask & (1 << bit) != 0 {
                w.manager.remove_entity(id).unwrap();
            } else {
                survivors.push(id);
            }
        }
        let fresh = w.manager.create_many_entities(FRESH, &comps).unwrap();
        stamp(&mut w, &fresh);
        survivors.extend(&fresh);

        w.manager.commit_pending().unwrap();
        verify_archetype(&w, &survivors);

        // The same picture must come back from a cold reload.
        let w = open_world(w.store);
        verify_archetype(&w, &survivors);
    }
}

#[test]
fn test_removals_without_creations_compact_the_tail() {
    let mut w = open_world(Arc::new(MemoryStorage::new()));
    let comps = [w.marker, w.shadow];
    let ids = w.manager.create_many_entities(5, &comps).unwrap();
    stamp(&mut w, &ids);
    w.manager.commit_pending().unwrap();

    // Remove the head and the tail in one tick.
    w.manager.remove_entity(ids[0]).unwrap();
    w.manager.remove_entity(ids[4]).unwrap();
    w.manager.commit_pending().unwrap();

    verify_archetype(&w, &[ids[1], ids[2], ids[3]]);
}

#[test]
fn test_migrations_and_removals_share_a_source_archetype() {
    let mut w = open_world(Arc::new(MemoryStorage::new()));
    let ids = w.manager.create_many_entities(4, &[w.marker]).unwrap();
    for &id in &ids {
        w.manager
            .set_component_for_entity(id, &Marker { stamp: id.raw() })
            .unwrap();
    }
    w.manager.commit_pending().unwrap();

    // One entity leaves by removal, one by migration, in the same tick.
    w.manager.remove_entity(ids[1]).unwrap();
    w.manager.add_component_to_entity(w.shadow, ids[2]).unwrap();
    w.manager
        .set_component_for_entity(ids[2], &Shadow { stamp: ids[2].raw() })
        .unwrap();
    w.manager.commit_pending().unwrap();

    // The migrated entity kept its carried value in the new archetype.
    assert_eq!(
        w.manager.get_component_for_entity::<Marker>(ids[2]).unwrap(),
        Marker {
            stamp: ids[2].raw()
        }
    );
    assert_eq!(
        w.manager.get_component_for_entity::<Shadow>(ids[2]).unwrap(),
        Shadow {
            stamp: ids[2].raw()
        }
    );

    // The source archetype kept the two entities that stayed.
    let source = w.manager.iter_archetypes_matching(|c| c.len() == 1);
    assert_eq!(source.len(), 1);
    let mut members = w.manager.entities_for_arch_id(source[0]).unwrap();
    members.sort_unstable();
    assert_eq!(members, vec![ids[0], ids[3]]);

    // Stayers still read their own values after the swaps.
    for id in [ids[0], ids[3]] {
        assert_eq!(
            w.manager.get_component_for_entity::<Marker>(id).unwrap(),
            Marker { stamp: id.raw() }
        );
    }
}

#[test]
fn test_back_to_back_migration_returns_home() {
    let mut w = open_world(Arc::new(MemoryStorage::new()));
    let id = w.manager.create_entity(&[w.marker]).unwrap();
    w.manager
        .set_component_for_entity(id, &Marker { stamp: 77 })
        .unwrap();
    w.manager.commit_pending().unwrap();

    // Out and back within one tick: the entity ends up in its original
    // archetype with its original value, plus nothing else.
    w.manager.add_component_to_entity(w.shadow, id).unwrap();
    w.manager.remove_component_from_entity(w.shadow, id).unwrap();
    w.manager.commit_pending().unwrap();

    assert_eq!(
        w.manager.component_types_for_entity(id).unwrap(),
        vec![w.marker]
    );
    assert_eq!(
        w.manager.get_component_for_entity::<Marker>(id).unwrap(),
        Marker { stamp: 77 }
    );
}
