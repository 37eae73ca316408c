//! # EBB World
//!
//! Staged, tick-transactional entity-component store on a key-value backend.
//!
//! Entities carry a dynamic set of registered component types and live
//! grouped by archetype: the exact set of components they carry. Each
//! archetype stores its data in dense per-component columns in the backing
//! store, with a membership list naming the entity at every row.
//!
//! All mutation goes through the [`EntityCommandBuffer`]. During a tick,
//! writes accumulate in in-memory overlays on top of the committed baseline;
//! reads see baseline plus pending. The tick then ends one of two ways:
//!
//! - [`EntityCommandBuffer::commit_pending`] flushes everything in one
//!   atomic storage batch
//! - [`EntityCommandBuffer::discard_pending`] drops the overlays as if the
//!   tick never ran
//!
//! Crash safety comes from the pending-transaction log: the serialized
//! transaction pool is persisted before a tick's systems run and cleared
//! inside the commit batch, so a restart always finds either a pre-tick or a
//! post-tick baseline together with what it needs to replay.
//!
//! ## Example
//!
//! ```rust,ignore
//! use ebb_world::{Component, EntityCommandBuffer};
//!
//! let mut world = EntityCommandBuffer::open(store, "my-world")?;
//! let position = world.register_component::<Position>()?;
//!
//! let id = world.create_entity(&[position])?;
//! world.set_component_for_entity(id, &Position { x: 1.0, y: 2.0 })?;
//! world.commit_pending()?;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod archetype;
pub mod codec;
pub mod columns;
pub mod component;
pub mod ecb;
pub mod entity;
pub mod error;
pub mod location;
pub mod reader;
mod recovery;
pub mod txpool;

pub use archetype::{ArchetypeId, ArchetypeIndex, ArchetypeSignature};
pub use codec::{CodecError, CodecResult};
pub use columns::ColumnStore;
pub use component::{Component, ComponentInfo, ComponentRegistry, ComponentTypeId};
pub use ecb::{CommitStats, EntityCommandBuffer};
pub use entity::EntityId;
pub use error::{WorldError, WorldResult};
pub use location::Location;
pub use reader::StoreReader;
pub use txpool::{StagedTransaction, TxPool};
