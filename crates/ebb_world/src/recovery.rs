//! # Recovery
//!
//! Rebuilds a world's in-memory indices from the raw persisted records when
//! a store is opened: the component registry, the archetype index, the
//! next-entity-ID counter, per-archetype row counts, and any pending
//! transaction log left behind by a crash mid-tick.
//!
//! Column contents are never scanned. Their existence follows from the
//! location keys, the archetype definitions, and the list lengths; the only
//! full-column read is the cheap length check that enforces the equal-length
//! invariant. A length mismatch means the store no longer reflects a whole
//! number of committed ticks, and the process halts rather than guess.

use std::collections::HashMap;

use crate::archetype::{ArchetypeId, ArchetypeIndex};
use crate::codec;
use crate::component::ComponentRegistry;
use crate::error::WorldResult;
use crate::txpool::TxPool;
use ebb_storage::{KeySpace, PrimitiveStorage};

/// The first entity ID a fresh world assigns.
pub(crate) const FIRST_ENTITY_ID: u64 = 1;

/// Everything recovered from a persisted world at open.
pub(crate) struct RecoveredState {
    pub registry: ComponentRegistry,
    pub archetypes: ArchetypeIndex,
    pub next_entity_id: u64,
    pub column_lens: HashMap<ArchetypeId, u64>,
    pub pending: Option<TxPool>,
}

/// Loads and verifies the persisted state of a world.
///
/// # Errors
///
/// Storage failures, or codec errors when a persisted record is malformed.
///
/// # Panics
///
/// Panics when the columns of an archetype disagree on their length; that is
/// an invariant violation and silent correction is forbidden.
pub(crate) fn recover(
    store: &dyn PrimitiveStorage,
    keys: &KeySpace,
) -> WorldResult<RecoveredState> {
    let registry = match store.get(&keys.component_registry())? {
        Some(bytes) => ComponentRegistry::from_entries(codec::decode_registry(&bytes)?),
        None => ComponentRegistry::new(),
    };

    let mut archetypes = ArchetypeIndex::new();
    for bytes in store.list_range(&keys.archetype_defs(), 0, -1)? {
        archetypes.insert(codec::decode_archetype(&bytes)?);
    }

    let mut column_lens = HashMap::new();
    for (arch, signature) in archetypes.iter() {
        let rows = store.list_len(&keys.archetype_entities(arch.raw()))?;
        for &comp in signature.components() {
            let len = store.list_len(&keys.component_column(arch.raw(), comp.raw()))?;
            assert_eq!(
                len, rows,
                "archetype {arch} column {comp} holds {len} rows but the \
                 membership list holds {rows}; the store is inconsistent",
            );
        }
        column_lens.insert(arch, rows);
    }

    let next_entity_id = match store.get(&keys.next_entity_id())? {
        Some(bytes) => codec::decode_counter(&bytes)?,
        None => FIRST_ENTITY_ID,
    };

    let pending = match store.get(&keys.pending_tx())? {
        Some(bytes) => Some(codec::decode_tx_pool(&bytes)?),
        None => None,
    };

    tracing::info!(
        namespace = keys.namespace(),
        components = registry.len(),
        archetypes = archetypes.len(),
        next_entity_id,
        pending_transactions = pending.as_ref().map_or(0, TxPool::len),
        "recovered world state"
    );

    Ok(RecoveredState {
        registry,
        archetypes,
        next_entity_id,
        column_lens,
        pending,
    })
}
