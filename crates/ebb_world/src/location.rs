//! # Entity Locations
//!
//! A location names where an entity's component data lives: which archetype,
//! and which row within that archetype's columns. Locations are persisted
//! one key per entity; the index here is a read-through cache over those
//! keys that the commit path updates in lockstep with the store.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::archetype::ArchetypeId;
use crate::codec;
use crate::entity::EntityId;
use crate::error::WorldResult;
use ebb_storage::{KeySpace, PrimitiveStorage};

/// Where an entity's components live.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Location {
    /// The archetype holding the entity.
    pub arch: ArchetypeId,
    /// The entity's row within the archetype's columns.
    pub row: u64,
}

impl Location {
    /// Creates a location.
    #[inline]
    #[must_use]
    pub const fn new(arch: ArchetypeId, row: u64) -> Self {
        Self { arch, row }
    }
}

/// Read-through cache over the persisted `LOC:<entity>` keys.
///
/// The cache only ever holds committed state. Commit applies its planned
/// location writes here after the storage transaction succeeds, so a miss
/// and a hit always agree with the store.
pub(crate) struct LocationIndex {
    store: Arc<dyn PrimitiveStorage>,
    keys: KeySpace,
    cache: Mutex<HashMap<EntityId, Option<Location>>>,
}

impl LocationIndex {
    pub(crate) fn new(store: Arc<dyn PrimitiveStorage>, keys: KeySpace) -> Self {
        Self {
            store,
            keys,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the committed location of an entity, if it has one.
    pub(crate) fn get(&self, entity: EntityId) -> WorldResult<Option<Location>> {
        if let Some(hit) = self.cache.lock().get(&entity) {
            return Ok(*hit);
        }
        let loaded = match self.store.get(&self.keys.entity_location(entity.raw()))? {
            Some(bytes) => Some(codec::decode_location(&bytes)?),
            None => None,
        };
        self.cache.lock().insert(entity, loaded);
        Ok(loaded)
    }

    /// Absorbs the location writes of a committed plan.
    pub(crate) fn absorb<'a, I>(&self, writes: I)
    where
        I: IntoIterator<Item = (&'a EntityId, &'a Option<Location>)>,
    {
        let mut cache = self.cache.lock();
        for (entity, location) in writes {
            cache.insert(*entity, *location);
        }
    }
}
