//! # Archetype Columns
//!
//! Dense per-archetype, per-component storage. Each (archetype, component)
//! pair maps to one ordered list in the backing store, indexed by row, and
//! each archetype additionally keeps a membership list with the entity ID
//! occupying every row. All lists of one archetype stay equal in length:
//! entering entities push onto every list, leaving entities swap-remove the
//! same row from every list.
//!
//! The commit path plans its own batched writes against these keys; the
//! mutating methods here exist for the contract's sake and for tests, where
//! single-key writes are enough.

use std::sync::Arc;

use crate::archetype::ArchetypeId;
use crate::codec;
use crate::component::ComponentTypeId;
use crate::entity::EntityId;
use crate::error::{WorldError, WorldResult};
use ebb_storage::{KeySpace, PrimitiveStorage, StorageError};

/// Typed facade over the column and membership lists of a world.
#[derive(Clone)]
pub struct ColumnStore {
    store: Arc<dyn PrimitiveStorage>,
    keys: KeySpace,
}

impl ColumnStore {
    /// Creates a facade over the given store and key space.
    #[must_use]
    pub fn new(store: Arc<dyn PrimitiveStorage>, keys: KeySpace) -> Self {
        Self { store, keys }
    }

    fn column_key(&self, arch: ArchetypeId, comp: ComponentTypeId) -> String {
        self.keys.component_column(arch.raw(), comp.raw())
    }

    fn members_key(&self, arch: ArchetypeId) -> String {
        self.keys.archetype_entities(arch.raw())
    }

    /// Appends an encoded value to a column and returns the new row index.
    ///
    /// # Errors
    ///
    /// Storage failures only.
    pub fn append(
        &self,
        arch: ArchetypeId,
        comp: ComponentTypeId,
        bytes: &[u8],
    ) -> WorldResult<u64> {
        let len = self.store.list_push(&self.column_key(arch, comp), bytes)?;
        Ok(len - 1)
    }

    /// Reads the encoded value at a row of a column.
    ///
    /// # Errors
    ///
    /// `Storage` with an out-of-range index when the row does not exist.
    pub fn read(
        &self,
        arch: ArchetypeId,
        comp: ComponentTypeId,
        row: u64,
    ) -> WorldResult<Vec<u8>> {
        let key = self.column_key(arch, comp);
        let mut values = self.store.list_range(&key, row as i64, row as i64)?;
        values
            .pop()
            .ok_or(WorldError::Storage(StorageError::IndexOutOfRange {
                key,
                index: row,
            }))
    }

    /// Overwrites the encoded value at an existing row of a column.
    ///
    /// # Errors
    ///
    /// `Storage` with an out-of-range index when the row does not exist.
    pub fn write(
        &self,
        arch: ArchetypeId,
        comp: ComponentTypeId,
        row: u64,
        bytes: &[u8],
    ) -> WorldResult<()> {
        self.store
            .list_set_at(&self.column_key(arch, comp), row, bytes)?;
        Ok(())
    }

    /// Removes a row from a column by swapping the tail into its place.
    ///
    /// When the row is the tail, this is a plain pop.
    ///
    /// # Errors
    ///
    /// `Storage` with an out-of-range index when the row does not exist.
    pub fn swap_remove(
        &self,
        arch: ArchetypeId,
        comp: ComponentTypeId,
        row: u64,
    ) -> WorldResult<()> {
        let key = self.column_key(arch, comp);
        let len = self.store.list_len(&key)?;
        if row >= len {
            return Err(WorldError::Storage(StorageError::IndexOutOfRange {
                key,
                index: row,
            }));
        }
        let tail = len - 1;
        if row != tail {
            let moved = self.read(arch, comp, tail)?;
            self.store.list_set_at(&key, row, &moved)?;
        }
        self.store.list_pop(&key)?;
        Ok(())
    }

    /// Number of rows in an archetype, taken from its membership list.
    ///
    /// All columns of the archetype share this length.
    ///
    /// # Errors
    ///
    /// Storage failures only.
    pub fn rows_in_archetype(&self, arch: ArchetypeId) -> WorldResult<u64> {
        Ok(self.store.list_len(&self.members_key(arch))?)
    }

    /// The entity occupying each row of an archetype, in row order.
    ///
    /// # Errors
    ///
    /// Storage failures, or a codec error when a membership element is
    /// malformed.
    pub fn entities(&self, arch: ArchetypeId) -> WorldResult<Vec<EntityId>> {
        let raw = self.store.list_range(&self.members_key(arch), 0, -1)?;
        raw.iter()
            .map(|bytes| codec::decode_entity_id(bytes).map_err(WorldError::from))
            .collect()
    }
}
