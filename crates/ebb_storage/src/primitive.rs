//! # Primitive Storage Contract
//!
//! The storage operations the entity store demands of its backend.
//!
//! The contract is deliberately small: byte values, ordered lists, an atomic
//! counter, and one batch primitive with all-or-nothing semantics. Anything
//! richer (archetypes, locations, overlays) is layered on top by the world
//! crate and never leaks down here.

use crate::error::StorageResult;

/// One planned write inside an atomic batch.
///
/// The commit planner in the world crate produces a sequence of these and
/// hands them to [`PrimitiveStorage::transaction`] in one shot. Operations
/// are applied in order; a later op may rely on the effect of an earlier one
/// (for example, a `ListSet` into a slot created by a `ListPush` in the same
/// batch).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WriteOp {
    /// Overwrite the byte value at a key, creating it if absent.
    Set {
        /// Target key.
        key: String,
        /// New value.
        value: Vec<u8>,
    },
    /// Remove a key entirely, whatever its shape.
    Delete {
        /// Target key.
        key: String,
    },
    /// Append a value to the tail of a list, creating the list if absent.
    ListPush {
        /// Target list key.
        key: String,
        /// Element to append.
        value: Vec<u8>,
    },
    /// Overwrite the element at an existing index of a list.
    ListSet {
        /// Target list key.
        key: String,
        /// Index to overwrite; must be within bounds when the op applies.
        index: u64,
        /// New element value.
        value: Vec<u8>,
    },
    /// Remove the tail element of a list.
    ListPopTail {
        /// Target list key.
        key: String,
    },
}

/// The backing-store contract.
///
/// Implementations must serialize concurrent callers internally; the trait
/// takes `&self` everywhere so one connection can be shared behind an `Arc`.
pub trait PrimitiveStorage: Send + Sync {
    /// Reads the byte value at a key. `None` when the key is absent.
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Overwrites the byte value at a key.
    fn set(&self, key: &str, value: &[u8]) -> StorageResult<()>;

    /// Removes a key. Removing an absent key is not an error.
    fn delete(&self, key: &str) -> StorageResult<()>;

    /// Atomically increments the integer counter at a key and returns the
    /// new value. An absent key counts up from zero.
    fn incr(&self, key: &str) -> StorageResult<i64>;

    /// Appends an element to the tail of a list and returns the new length.
    fn list_push(&self, key: &str, value: &[u8]) -> StorageResult<u64>;

    /// Removes and returns the tail element of a list. `None` when the list
    /// is absent or empty.
    fn list_pop(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Returns the elements in the inclusive index range `[lo, hi]`.
    ///
    /// Negative indices count back from the tail, so `(0, -1)` is the whole
    /// list. An absent list yields an empty range.
    fn list_range(&self, key: &str, lo: i64, hi: i64) -> StorageResult<Vec<Vec<u8>>>;

    /// Returns the length of a list. An absent list has length zero.
    fn list_len(&self, key: &str) -> StorageResult<u64>;

    /// Overwrites the element at an existing index of a list.
    fn list_set_at(&self, key: &str, index: u64, value: &[u8]) -> StorageResult<()>;

    /// Applies a batch of writes with all-or-nothing semantics.
    ///
    /// Ops apply in order. If any op cannot apply, no op in the batch may
    /// leave a visible effect.
    fn transaction(&self, ops: &[WriteOp]) -> StorageResult<()>;
}
