//! # Read-Only Store View
//!
//! A projection of the committed baseline for callers outside the tick
//! owner: query handlers, snapshot endpoints, anything that must never see
//! half a tick. The view holds no overlays; it reads the persisted records
//! directly, through the same registry and archetype index the command
//! buffer maintains, so a reader and the buffer always agree on IDs.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::archetype::{ArchetypeId, ArchetypeIndex, ArchetypeSignature};
use crate::codec;
use crate::columns::ColumnStore;
use crate::component::{Component, ComponentRegistry, ComponentTypeId};
use crate::entity::EntityId;
use crate::error::{WorldError, WorldResult};
use crate::location::Location;
use ebb_storage::{KeySpace, PrimitiveStorage};

/// Read-only view of a world's committed state.
#[derive(Clone)]
pub struct StoreReader {
    store: Arc<dyn PrimitiveStorage>,
    keys: KeySpace,
    registry: Arc<RwLock<ComponentRegistry>>,
    archetypes: Arc<RwLock<ArchetypeIndex>>,
    columns: ColumnStore,
}

impl StoreReader {
    pub(crate) fn new(
        store: Arc<dyn PrimitiveStorage>,
        keys: KeySpace,
        registry: Arc<RwLock<ComponentRegistry>>,
        archetypes: Arc<RwLock<ArchetypeIndex>>,
    ) -> Self {
        Self {
            columns: ColumnStore::new(Arc::clone(&store), keys.clone()),
            store,
            keys,
            registry,
            archetypes,
        }
    }

    fn location(&self, entity: EntityId) -> WorldResult<Option<Location>> {
        match self.store.get(&self.keys.entity_location(entity.raw()))? {
            Some(bytes) => Ok(Some(codec::decode_location(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Whether the entity exists in the committed baseline.
    ///
    /// # Errors
    ///
    /// Storage failures only.
    pub fn contains_entity(&self, entity: EntityId) -> WorldResult<bool> {
        Ok(self.location(entity)?.is_some())
    }

    /// Reads a committed component value.
    ///
    /// # Errors
    ///
    /// `NoSuchEntity`, `UnknownComponent`, or `ComponentNotOnEntity`.
    pub fn get_component_for_entity<C: Component>(&self, entity: EntityId) -> WorldResult<C> {
        let component = self.registry.read().id_of::<C>()?;
        let loc = self
            .location(entity)?
            .ok_or(WorldError::NoSuchEntity(entity))?;
        let carries = self
            .archetypes
            .read()
            .signature(loc.arch)
            .is_some_and(|signature| signature.contains(component));
        if !carries {
            return Err(WorldError::ComponentNotOnEntity { entity, component });
        }
        let bytes = self.columns.read(loc.arch, component, loc.row)?;
        Ok(codec::decode_value(&bytes)?)
    }

    /// The component set of the entity's committed archetype.
    ///
    /// # Errors
    ///
    /// `NoSuchEntity`.
    pub fn component_types_for_entity(
        &self,
        entity: EntityId,
    ) -> WorldResult<Vec<ComponentTypeId>> {
        let loc = self
            .location(entity)?
            .ok_or(WorldError::NoSuchEntity(entity))?;
        self.archetypes
            .read()
            .signature(loc.arch)
            .map(|signature| signature.components().to_vec())
            .ok_or(WorldError::NoSuchArchetype(loc.arch))
    }

    /// Resolves a component set to its committed archetype, without
    /// allocating one.
    #[must_use]
    pub fn arch_id_for_components(
        &self,
        components: &[ComponentTypeId],
    ) -> Option<ArchetypeId> {
        let signature = ArchetypeSignature::new(components.to_vec());
        self.archetypes.read().lookup(&signature)
    }

    /// The committed members of an archetype, in row order.
    ///
    /// # Errors
    ///
    /// `NoSuchArchetype` for an ID that was never committed.
    pub fn entities_for_arch_id(&self, arch: ArchetypeId) -> WorldResult<Vec<EntityId>> {
        if self.archetypes.read().signature(arch).is_none() {
            return Err(WorldError::NoSuchArchetype(arch));
        }
        self.columns.entities(arch)
    }

    /// Number of committed archetypes.
    #[must_use]
    pub fn archetype_count(&self) -> usize {
        self.archetypes.read().len()
    }

    /// The committed archetypes whose ordered component list satisfies the
    /// layout predicate.
    pub fn iter_archetypes_matching<F>(&self, predicate: F) -> Vec<ArchetypeId>
    where
        F: Fn(&[ComponentTypeId]) -> bool,
    {
        self.archetypes
            .read()
            .iter()
            .filter(|(_, signature)| predicate(signature.components()))
            .map(|(id, _)| id)
            .collect()
    }
}
