//! # Archetypes
//!
//! An archetype is the exact set of component types carried by a group of
//! entities. Signatures are canonical (sorted by component ID, duplicates
//! removed) so that any ordering of the same components resolves to the same
//! archetype. IDs are dense from zero and stable for the lifetime of a
//! world: an archetype's ID is its position in the persisted definition
//! list, and definitions are only ever appended.

use std::collections::HashMap;
use std::fmt;

use crate::component::ComponentTypeId;

/// Stable identifier for an archetype.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ArchetypeId(u32);

impl ArchetypeId {
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

impl fmt::Display for ArchetypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Canonical component set identifying an archetype.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ArchetypeSignature {
    components: Vec<ComponentTypeId>,
}

impl ArchetypeSignature {
    /// Canonicalizes a component list into a signature.
    #[must_use]
    pub fn new(mut components: Vec<ComponentTypeId>) -> Self {
        components.sort_unstable();
        components.dedup();
        Self { components }
    }

    /// The component IDs, sorted ascending.
    #[must_use]
    pub fn components(&self) -> &[ComponentTypeId] {
        &self.components
    }

    /// Whether the signature carries a component.
    #[must_use]
    pub fn contains(&self, id: ComponentTypeId) -> bool {
        self.components.binary_search(&id).is_ok()
    }

    /// The signature extended with one component.
    #[must_use]
    pub fn with(&self, id: ComponentTypeId) -> Self {
        let mut components = self.components.clone();
        components.push(id);
        Self::new(components)
    }

    /// The signature with one component removed.
    #[must_use]
    pub fn without(&self, id: ComponentTypeId) -> Self {
        let components = self
            .components
            .iter()
            .copied()
            .filter(|&c| c != id)
            .collect();
        Self { components }
    }

    /// Number of component types in the signature.
    #[must_use]
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// True for the empty component set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

/// Bidirectional signature/ID index over the committed archetypes.
#[derive(Default)]
pub struct ArchetypeIndex {
    signatures: Vec<ArchetypeSignature>,
    by_signature: HashMap<ArchetypeSignature, ArchetypeId>,
}

impl ArchetypeIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves a signature to its ID, if the archetype exists.
    #[must_use]
    pub fn lookup(&self, signature: &ArchetypeSignature) -> Option<ArchetypeId> {
        self.by_signature.get(signature).copied()
    }

    /// Inserts a signature, allocating the next dense ID.
    ///
    /// Inserting a signature that is already present returns the existing
    /// ID; the mapping stays injective.
    pub fn insert(&mut self, signature: ArchetypeSignature) -> ArchetypeId {
        if let Some(id) = self.lookup(&signature) {
            return id;
        }
        let id = ArchetypeId::new(self.signatures.len() as u32);
        self.by_signature.insert(signature.clone(), id);
        self.signatures.push(signature);
        id
    }

    /// Returns the signature of an archetype.
    #[must_use]
    pub fn signature(&self, id: ArchetypeId) -> Option<&ArchetypeSignature> {
        self.signatures.get(id.raw() as usize)
    }

    /// Number of known archetypes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    /// True when no archetype has been created.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    /// Iterates over all archetypes in ID order.
    pub fn iter(&self) -> impl Iterator<Item = (ArchetypeId, &ArchetypeSignature)> {
        self.signatures
            .iter()
            .enumerate()
            .map(|(i, sig)| (ArchetypeId::new(i as u32), sig))
    }
}
