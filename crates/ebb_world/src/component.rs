//! # Component Types and Registry
//!
//! Components are plain serializable value types. The registry assigns each
//! component name a stable numeric ID at registration time and persists the
//! mapping, so a component known under a given name receives the same ID in
//! every run of the world. The encoded default value of the type (its
//! *exemplar*) is stored alongside the ID; it validates re-registrations
//! against the persisted schema and doubles as the zero-encoding written
//! when a component is first attached to an entity.

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec;
use crate::error::{WorldError, WorldResult};

/// A value type that can live on entities.
///
/// The name must be unique within a world and stable across releases; it is
/// the durable identity of the component, the numeric ID is derived from it
/// at first registration.
pub trait Component:
    Serialize + DeserializeOwned + Default + Send + Sync + 'static
{
    /// Stable, world-unique component name.
    const NAME: &'static str;
}

/// Stable numeric identifier for a registered component type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ComponentTypeId(u32);

impl ComponentTypeId {
    /// Wraps a raw identifier.
    #[inline]
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw identifier value.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ComponentTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Registry entry for one component type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComponentInfo {
    /// The assigned numeric ID.
    pub id: ComponentTypeId,
    /// The stable component name.
    pub name: String,
    /// Encoded default value: the schema exemplar and zero-encoding.
    pub exemplar: Vec<u8>,
}

/// The id/name/exemplar mapping for all component types of a world.
///
/// Entries loaded from storage become usable for typed access only once the
/// matching Rust type has been registered in this process; until then they
/// exist to pin IDs and validate schemas.
#[derive(Default)]
pub struct ComponentRegistry {
    infos: Vec<ComponentInfo>,
    by_name: HashMap<String, ComponentTypeId>,
    by_type: HashMap<TypeId, ComponentTypeId>,
}

impl ComponentRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a registry from persisted entries.
    ///
    /// # Panics
    ///
    /// Panics when the entries are not dense and ordered by ID. That only
    /// happens when the persisted registry record is corrupt, which is fatal
    /// by contract.
    #[must_use]
    pub(crate) fn from_entries(entries: Vec<ComponentInfo>) -> Self {
        let mut registry = Self::new();
        for (position, info) in entries.into_iter().enumerate() {
            assert_eq!(
                info.id.raw() as usize,
                position,
                "component registry is corrupt: entry {} holds id {}",
                position,
                info.id,
            );
            registry.by_name.insert(info.name.clone(), info.id);
            registry.infos.push(info);
        }
        registry
    }

    /// Registers a component type, idempotently by name.
    ///
    /// The first registration of a name allocates the next dense ID. A
    /// re-registration returns the existing ID, provided the encoded default
    /// of the type still matches the stored exemplar.
    ///
    /// # Errors
    ///
    /// `SchemaMismatch` when the name is known but the exemplar encoding
    /// differs from the persisted one.
    pub fn register<C: Component>(&mut self) -> WorldResult<ComponentTypeId> {
        let exemplar = codec::encode_value(&C::default())?;
        if let Some(&id) = self.by_name.get(C::NAME) {
            let known = &self.infos[id.raw() as usize];
            if known.exemplar != exemplar {
                return Err(WorldError::SchemaMismatch {
                    name: C::NAME.to_string(),
                });
            }
            self.by_type.insert(TypeId::of::<C>(), id);
            return Ok(id);
        }

        let id = ComponentTypeId::new(self.infos.len() as u32);
        self.infos.push(ComponentInfo {
            id,
            name: C::NAME.to_string(),
            exemplar,
        });
        self.by_name.insert(C::NAME.to_string(), id);
        self.by_type.insert(TypeId::of::<C>(), id);
        Ok(id)
    }

    /// Resolves the ID registered for a Rust component type.
    ///
    /// # Errors
    ///
    /// `UnknownComponent` when the type has not been registered in this
    /// process.
    pub fn id_of<C: Component>(&self) -> WorldResult<ComponentTypeId> {
        self.by_type
            .get(&TypeId::of::<C>())
            .copied()
            .ok_or_else(|| WorldError::UnknownComponent(C::NAME.to_string()))
    }

    /// Looks up a registry entry by ID.
    #[must_use]
    pub fn by_id(&self, id: ComponentTypeId) -> Option<&ComponentInfo> {
        self.infos.get(id.raw() as usize)
    }

    /// Looks up a registry entry by name.
    #[must_use]
    pub fn by_name(&self, name: &str) -> Option<&ComponentInfo> {
        self.by_name.get(name).and_then(|id| self.by_id(*id))
    }

    /// Returns the zero-encoding for a component ID.
    ///
    /// # Errors
    ///
    /// `UnknownComponent` when the ID is not in the registry.
    pub fn exemplar(&self, id: ComponentTypeId) -> WorldResult<&[u8]> {
        self.by_id(id)
            .map(|info| info.exemplar.as_slice())
            .ok_or_else(|| WorldError::UnknownComponent(id.to_string()))
    }

    /// All registry entries, ordered by ID.
    #[must_use]
    pub fn entries(&self) -> &[ComponentInfo] {
        &self.infos
    }

    /// Number of registered component types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.infos.len()
    }

    /// True when nothing has been registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }
}
