//! # World Error Types
//!
//! All errors that can come out of the entity store. Every failure surfaces
//! to the caller; the command buffer never silently drops a mutation. The
//! one exception to error-based reporting is a detected violation of the
//! store's structural invariants (for example, columns of one archetype
//! disagreeing on their length), which halts the process rather than risk
//! silently correcting corrupted state.

use thiserror::Error;

use crate::archetype::ArchetypeId;
use crate::codec::CodecError;
use crate::component::ComponentTypeId;
use crate::entity::EntityId;
use ebb_storage::StorageError;

/// Errors reported by the entity store.
#[derive(Error, Debug)]
pub enum WorldError {
    /// The operation referenced an entity that is not in the effective view.
    #[error("no such entity: {0}")]
    NoSuchEntity(EntityId),

    /// A read or removal referenced a component the entity does not carry.
    #[error("component {component} is not on entity {entity}")]
    ComponentNotOnEntity {
        /// The entity in question.
        entity: EntityId,
        /// The component that is absent.
        component: ComponentTypeId,
    },

    /// An add referenced a component the entity already carries.
    #[error("component {component} is already on entity {entity}")]
    ComponentAlreadyPresent {
        /// The entity in question.
        entity: EntityId,
        /// The component that is already attached.
        component: ComponentTypeId,
    },

    /// A component ID or type that is not in the registry.
    #[error("component {0} is not registered")]
    UnknownComponent(String),

    /// The operation referenced an archetype ID that does not exist.
    #[error("no such archetype: {0}")]
    NoSuchArchetype(ArchetypeId),

    /// A registration disagreed with the persisted encoding for its name.
    #[error("schema mismatch for component {name}: encoding differs from the persisted exemplar")]
    SchemaMismatch {
        /// The component name being re-registered.
        name: String,
    },

    /// The operation is not valid in the current lifecycle phase.
    #[error("invalid lifecycle state: {0}")]
    InvalidState(&'static str),

    /// The backing store failed. On commit this leaves the pending overlays
    /// intact so the caller may retry or discard.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A persisted record or component payload failed to decode.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Result alias for world operations.
pub type WorldResult<T> = Result<T, WorldError>;
