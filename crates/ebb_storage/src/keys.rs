//! # World Key Schema
//!
//! Every key a world touches is derived here, namespaced so that several
//! worlds can share one database without colliding.
//!
//! | Purpose | Key |
//! |---|---|
//! | Next entity ID counter | `WORLD:<ns>:NEXT_ENTITY_ID` |
//! | Component registry | `WORLD:<ns>:COMP_REG` |
//! | Archetype definition list | `WORLD:<ns>:ARCH_DEFS` |
//! | Entity location | `WORLD:<ns>:LOC:<entityId>` |
//! | Component column | `WORLD:<ns>:COL:A-<archId>:C-<compId>` |
//! | Archetype membership list | `WORLD:<ns>:ENTS:A-<archId>` |
//! | Pending-tx recovery log | `WORLD:<ns>:PENDING_TX` |

/// Key builder for one world namespace.
#[derive(Clone, Debug)]
pub struct KeySpace {
    namespace: String,
}

impl KeySpace {
    /// Creates a key space for the given world namespace.
    #[must_use]
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    /// Returns the world namespace.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Key of the next-entity-ID counter.
    #[must_use]
    pub fn next_entity_id(&self) -> String {
        format!("WORLD:{}:NEXT_ENTITY_ID", self.namespace)
    }

    /// Key of the persisted component registry.
    #[must_use]
    pub fn component_registry(&self) -> String {
        format!("WORLD:{}:COMP_REG", self.namespace)
    }

    /// Key of the archetype definition list.
    #[must_use]
    pub fn archetype_defs(&self) -> String {
        format!("WORLD:{}:ARCH_DEFS", self.namespace)
    }

    /// Key of one entity's location record.
    #[must_use]
    pub fn entity_location(&self, entity: u64) -> String {
        format!("WORLD:{}:LOC:{}", self.namespace, entity)
    }

    /// Key of one component column within an archetype.
    #[must_use]
    pub fn component_column(&self, arch: u32, comp: u32) -> String {
        format!("WORLD:{}:COL:A-{}:C-{}", self.namespace, arch, comp)
    }

    /// Key of one archetype's membership list.
    #[must_use]
    pub fn archetype_entities(&self, arch: u32) -> String {
        format!("WORLD:{}:ENTS:A-{}", self.namespace, arch)
    }

    /// Key of the pending-transaction recovery log.
    #[must_use]
    pub fn pending_tx(&self) -> String {
        format!("WORLD:{}:PENDING_TX", self.namespace)
    }
}
