//! # Entity Command Buffer
//!
//! The staged, tick-transactional front of the store. All mutations made
//! during a tick land in in-memory overlays on top of the committed
//! baseline; reads consult the overlays first and fall through to storage,
//! so a system always sees baseline plus its own pending writes.
//! [`EntityCommandBuffer::commit_pending`] flushes the overlays to the
//! backing store as one atomic batch; [`EntityCommandBuffer::discard_pending`]
//! drops them, reverting to the last committed baseline.
//!
//! ## Overlays
//!
//! 1. Locations: entity to pending location, or a tombstone for removal
//! 2. Components: (entity, component) to pending encoded value or tombstone
//! 3. Archetypes: definitions staged since the last commit
//! 4. The next-entity-ID counter, copied from the persisted value
//!
//! ## Guarantees
//!
//! 1. Between ticks the overlays are empty and the store is consistent
//! 2. A failed commit leaves the overlays intact for retry or discard
//! 3. Entity IDs are monotonic and never reused, across restarts
//! 4. Archetype definitions staged in a discarded tick evaporate; the
//!    persisted definition list is only appended inside the commit batch

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::archetype::{ArchetypeId, ArchetypeIndex, ArchetypeSignature};
use crate::codec;
use crate::columns::ColumnStore;
use crate::component::{Component, ComponentRegistry, ComponentTypeId};
use crate::entity::EntityId;
use crate::error::{WorldError, WorldResult};
use crate::location::{Location, LocationIndex};
use crate::reader::StoreReader;
use crate::recovery;
use crate::txpool::TxPool;
use ebb_storage::{KeySpace, PrimitiveStorage, WriteOp};

/// Lifecycle phase of the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    /// Component types may be registered; no tick has run.
    Registering,
    /// The first mutation or tick has happened; registration is closed.
    Running,
}

/// What one commit did, reported to the injected observer.
#[derive(Clone, Copy, Debug, Default)]
pub struct CommitStats {
    /// Entities created this tick.
    pub created: u64,
    /// Entities removed this tick.
    pub removed: u64,
    /// Entities migrated between archetypes this tick.
    pub migrated: u64,
    /// In-place component value writes this tick.
    pub component_writes: u64,
    /// Storage operations in the commit batch.
    pub ops: u64,
    /// Wall time spent planning and submitting the batch.
    pub duration: Duration,
}

/// The planned effect of one commit, produced before anything is written.
struct CommitPlan {
    ops: Vec<WriteOp>,
    loc_writes: BTreeMap<EntityId, Option<Location>>,
    len_changes: HashMap<ArchetypeId, u64>,
    stats: CommitStats,
}

/// The staged entity-component store for one world.
///
/// Single-writer: one buffer owns all mutations for a tick. Concurrent
/// readers use [`EntityCommandBuffer::reader`], which reflects only
/// committed state.
pub struct EntityCommandBuffer {
    store: Arc<dyn PrimitiveStorage>,
    keys: KeySpace,
    registry: Arc<RwLock<ComponentRegistry>>,
    archetypes: Arc<RwLock<ArchetypeIndex>>,
    locations: LocationIndex,
    columns: ColumnStore,
    column_lens: HashMap<ArchetypeId, u64>,

    phase: Phase,
    next_id: u64,
    next_id_committed: u64,
    recovered: Option<TxPool>,
    pending_tx_written: bool,

    loc_overlay: BTreeMap<EntityId, Option<Location>>,
    comp_overlay: BTreeMap<(EntityId, ComponentTypeId), Option<Vec<u8>>>,
    arch_overlay: Vec<ArchetypeSignature>,
    arch_overlay_lookup: HashMap<ArchetypeSignature, ArchetypeId>,
    pending_rows: HashMap<ArchetypeId, u64>,

    observer: Option<Box<dyn Fn(&CommitStats) + Send + Sync>>,
}

impl EntityCommandBuffer {
    /// Opens the world stored under `namespace`, recovering all indices from
    /// the persisted records.
    ///
    /// # Errors
    ///
    /// Storage failures, or codec errors when a persisted record is
    /// malformed.
    ///
    /// # Panics
    ///
    /// Panics when the persisted columns violate the equal-length invariant;
    /// see the recovery module.
    pub fn open(
        store: Arc<dyn PrimitiveStorage>,
        namespace: impl Into<String>,
    ) -> WorldResult<Self> {
        let keys = KeySpace::new(namespace);
        let recovered = recovery::recover(store.as_ref(), &keys)?;
        Ok(Self {
            locations: LocationIndex::new(Arc::clone(&store), keys.clone()),
            columns: ColumnStore::new(Arc::clone(&store), keys.clone()),
            store,
            keys,
            registry: Arc::new(RwLock::new(recovered.registry)),
            archetypes: Arc::new(RwLock::new(recovered.archetypes)),
            column_lens: recovered.column_lens,
            phase: Phase::Registering,
            next_id: recovered.next_entity_id,
            next_id_committed: recovered.next_entity_id,
            recovered: recovered.pending,
            pending_tx_written: false,
            loc_overlay: BTreeMap::new(),
            comp_overlay: BTreeMap::new(),
            arch_overlay: Vec::new(),
            arch_overlay_lookup: HashMap::new(),
            pending_rows: HashMap::new(),
            observer: None,
        })
    }

    /// Registers a component type with this world.
    ///
    /// Must happen before the first mutation or tick of this process. The
    /// persisted registry is updated immediately when the type is new.
    ///
    /// # Errors
    ///
    /// `InvalidState` once the store is running, `SchemaMismatch` when the
    /// name is known under a different encoding, or a storage failure while
    /// persisting the mapping.
    pub fn register_component<C: Component>(&mut self) -> WorldResult<ComponentTypeId> {
        if self.phase == Phase::Running {
            return Err(WorldError::InvalidState(
                "component registration is closed once the world is running",
            ));
        }
        let (id, grew) = {
            let mut registry = self.registry.write();
            let before = registry.len();
            let id = registry.register::<C>()?;
            (id, registry.len() != before)
        };
        if grew {
            let bytes = codec::encode_registry(self.registry.read().entries());
            self.store.set(&self.keys.component_registry(), &bytes)?;
            tracing::debug!(component = C::NAME, %id, "registered component");
        }
        Ok(id)
    }

    /// Installs the commit observer callback.
    ///
    /// The callback runs on the committing thread after every successful
    /// commit; there are no background threads here.
    pub fn set_commit_observer<F>(&mut self, observer: F)
    where
        F: Fn(&CommitStats) + Send + Sync + 'static,
    {
        self.observer = Some(Box::new(observer));
    }

    /// Takes the transaction pool recovered from a crash mid-tick, if any.
    ///
    /// The caller must replay these transactions before accepting new ones.
    pub fn take_recovered_transactions(&mut self) -> Option<TxPool> {
        self.recovered.take()
    }

    /// A read-only view of the committed baseline, independent of this
    /// buffer's overlays. Safe to hand to other threads.
    #[must_use]
    pub fn reader(&self) -> StoreReader {
        StoreReader::new(
            Arc::clone(&self.store),
            self.keys.clone(),
            Arc::clone(&self.registry),
            Arc::clone(&self.archetypes),
        )
    }

    // =========================================================================
    // Tick boundary
    // =========================================================================

    /// Opens a tick by persisting the serialized transaction pool.
    ///
    /// This must complete before any system runs so that a crash during the
    /// tick can replay the same transactions against the pre-tick baseline.
    ///
    /// # Errors
    ///
    /// `InvalidState` when a tick is already open or recovered transactions
    /// have not been taken yet, or a storage failure.
    pub fn start_next_tick(&mut self, pool: &TxPool) -> WorldResult<()> {
        if self.recovered.is_some() {
            return Err(WorldError::InvalidState(
                "recovered transactions must be taken before starting a tick",
            ));
        }
        if self.pending_tx_written {
            return Err(WorldError::InvalidState("a tick is already open"));
        }
        self.ensure_running();
        let bytes = codec::encode_tx_pool(pool);
        self.store.set(&self.keys.pending_tx(), &bytes)?;
        self.pending_tx_written = true;
        Ok(())
    }

    /// Closes the tick: commits all pending changes and clears the
    /// persisted transaction pool in the same batch.
    ///
    /// # Errors
    ///
    /// See [`EntityCommandBuffer::commit_pending`].
    pub fn finalize_tick(&mut self) -> WorldResult<()> {
        self.commit_pending()
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Creates an entity carrying the given component set, each component
    /// initialized to its zero-encoding. Returns the new ID.
    ///
    /// # Errors
    ///
    /// `UnknownComponent` when any component is not registered.
    pub fn create_entity(&mut self, components: &[ComponentTypeId]) -> WorldResult<EntityId> {
        self.ensure_running();
        self.require_registered(components)?;

        let signature = ArchetypeSignature::new(components.to_vec());
        let arch = self.arch_id_for_signature(&signature);
        let row = self.claim_pending_row(arch);

        let entity = EntityId::new(self.next_id);
        self.next_id += 1;
        self.loc_overlay.insert(entity, Some(Location::new(arch, row)));

        let registry = self.registry.read();
        for &comp in signature.components() {
            let zero = registry.exemplar(comp)?.to_vec();
            self.comp_overlay.insert((entity, comp), Some(zero));
        }
        Ok(entity)
    }

    /// Creates `count` entities with the same component set and guaranteed
    /// contiguous IDs.
    ///
    /// # Errors
    ///
    /// `UnknownComponent` when any component is not registered.
    pub fn create_many_entities(
        &mut self,
        count: usize,
        components: &[ComponentTypeId],
    ) -> WorldResult<Vec<EntityId>> {
        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            ids.push(self.create_entity(components)?);
        }
        Ok(ids)
    }

    /// Removes an entity. The physical swap-remove in every column of its
    /// archetype is deferred to commit.
    ///
    /// # Errors
    ///
    /// `NoSuchEntity` when the entity is absent from the effective view.
    pub fn remove_entity(&mut self, entity: EntityId) -> WorldResult<()> {
        self.ensure_running();
        let loc = self
            .effective_location(entity)?
            .ok_or(WorldError::NoSuchEntity(entity))?;
        let signature = self.signature_of(loc.arch)?;
        for &comp in signature.components() {
            self.comp_overlay.insert((entity, comp), None);
        }
        self.loc_overlay.insert(entity, None);
        Ok(())
    }

    /// Adds a component to an entity, migrating it to the archetype of its
    /// grown component set. Existing values are carried forward; the new
    /// component starts at its zero-encoding.
    ///
    /// # Errors
    ///
    /// `NoSuchEntity`, `UnknownComponent`, or `ComponentAlreadyPresent`.
    pub fn add_component_to_entity(
        &mut self,
        component: ComponentTypeId,
        entity: EntityId,
    ) -> WorldResult<()> {
        self.ensure_running();
        self.require_registered(&[component])?;
        let loc = self
            .effective_location(entity)?
            .ok_or(WorldError::NoSuchEntity(entity))?;
        let signature = self.signature_of(loc.arch)?;
        if signature.contains(component) {
            return Err(WorldError::ComponentAlreadyPresent { entity, component });
        }

        self.stage_carried_values(entity, &signature)?;
        let target = signature.with(component);
        self.relocate(entity, &target);

        let zero = self.registry.read().exemplar(component)?.to_vec();
        self.comp_overlay.insert((entity, component), Some(zero));
        Ok(())
    }

    /// Removes a component from an entity, migrating it to the archetype of
    /// its shrunken component set. The removed value stays persisted until
    /// commit, so a discard restores it.
    ///
    /// # Errors
    ///
    /// `NoSuchEntity` or `ComponentNotOnEntity`.
    pub fn remove_component_from_entity(
        &mut self,
        component: ComponentTypeId,
        entity: EntityId,
    ) -> WorldResult<()> {
        self.ensure_running();
        let loc = self
            .effective_location(entity)?
            .ok_or(WorldError::NoSuchEntity(entity))?;
        let signature = self.signature_of(loc.arch)?;
        if !signature.contains(component) {
            return Err(WorldError::ComponentNotOnEntity { entity, component });
        }

        let target = signature.without(component);
        self.stage_carried_values(entity, &target)?;
        self.relocate(entity, &target);
        self.comp_overlay.insert((entity, component), None);
        Ok(())
    }

    /// Overwrites a component value. The write lands in the overlay only;
    /// the baseline changes at commit.
    ///
    /// # Errors
    ///
    /// `NoSuchEntity`, `UnknownComponent`, or `ComponentNotOnEntity`.
    pub fn set_component_for_entity<C: Component>(
        &mut self,
        entity: EntityId,
        value: &C,
    ) -> WorldResult<()> {
        self.ensure_running();
        let component = self.registry.read().id_of::<C>()?;
        let loc = self
            .effective_location(entity)?
            .ok_or(WorldError::NoSuchEntity(entity))?;
        let signature = self.signature_of(loc.arch)?;
        if !signature.contains(component) {
            return Err(WorldError::ComponentNotOnEntity { entity, component });
        }
        let bytes = codec::encode_value(value)?;
        self.comp_overlay.insert((entity, component), Some(bytes));
        Ok(())
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Reads a component value from the effective view: the overlay value if
    /// present, otherwise the persisted column.
    ///
    /// # Errors
    ///
    /// `NoSuchEntity`, `UnknownComponent`, or `ComponentNotOnEntity`.
    pub fn get_component_for_entity<C: Component>(&self, entity: EntityId) -> WorldResult<C> {
        let component = self.registry.read().id_of::<C>()?;
        let bytes = self.component_bytes(component, entity)?;
        Ok(codec::decode_value(&bytes)?)
    }

    /// Reads the encoded bytes of a component from the effective view.
    ///
    /// # Errors
    ///
    /// `NoSuchEntity` or `ComponentNotOnEntity`.
    pub fn component_bytes(
        &self,
        component: ComponentTypeId,
        entity: EntityId,
    ) -> WorldResult<Vec<u8>> {
        let loc = self
            .effective_location(entity)?
            .ok_or(WorldError::NoSuchEntity(entity))?;
        let signature = self.signature_of(loc.arch)?;
        if !signature.contains(component) {
            return Err(WorldError::ComponentNotOnEntity { entity, component });
        }
        match self.comp_overlay.get(&(entity, component)) {
            Some(Some(bytes)) => Ok(bytes.clone()),
            Some(None) => Err(WorldError::ComponentNotOnEntity { entity, component }),
            None => {
                let persisted = self
                    .locations
                    .get(entity)?
                    .ok_or(WorldError::NoSuchEntity(entity))?;
                self.columns.read(persisted.arch, component, persisted.row)
            }
        }
    }

    /// The component set of the entity's effective archetype.
    ///
    /// # Errors
    ///
    /// `NoSuchEntity`.
    pub fn component_types_for_entity(
        &self,
        entity: EntityId,
    ) -> WorldResult<Vec<ComponentTypeId>> {
        let loc = self
            .effective_location(entity)?
            .ok_or(WorldError::NoSuchEntity(entity))?;
        Ok(self.signature_of(loc.arch)?.components().to_vec())
    }

    /// Resolves the archetype for a component set, staging a new archetype
    /// when the set has never been seen.
    ///
    /// # Errors
    ///
    /// `UnknownComponent` when any component is not registered.
    pub fn arch_id_for_components(
        &mut self,
        components: &[ComponentTypeId],
    ) -> WorldResult<ArchetypeId> {
        self.require_registered(components)?;
        let signature = ArchetypeSignature::new(components.to_vec());
        Ok(self.arch_id_for_signature(&signature))
    }

    /// The entities whose effective archetype is `arch`, in row order:
    /// persisted members minus the relocated or removed, plus the staged
    /// arrivals.
    ///
    /// # Errors
    ///
    /// `NoSuchArchetype` for an ID that was never allocated.
    pub fn entities_for_arch_id(&self, arch: ArchetypeId) -> WorldResult<Vec<EntityId>> {
        let committed = self.archetypes.read().len();
        if arch.raw() as usize >= committed + self.arch_overlay.len() {
            return Err(WorldError::NoSuchArchetype(arch));
        }

        let mut out = if (arch.raw() as usize) < committed {
            self.columns.entities(arch)?
        } else {
            Vec::new()
        };
        // Any entity in the location overlay either left this archetype or
        // is listed among the staged arrivals below.
        out.retain(|entity| !self.loc_overlay.contains_key(entity));

        let mut staged: Vec<(u64, EntityId)> = self
            .loc_overlay
            .iter()
            .filter_map(|(&entity, loc)| match loc {
                Some(l) if l.arch == arch => Some((l.row, entity)),
                _ => None,
            })
            .collect();
        staged.sort_unstable();
        out.extend(staged.into_iter().map(|(_, entity)| entity));
        Ok(out)
    }

    /// Committed archetypes plus archetypes staged this tick.
    #[must_use]
    pub fn archetype_count(&self) -> usize {
        self.archetypes.read().len() + self.arch_overlay.len()
    }

    /// The effective archetypes whose ordered component list satisfies the
    /// layout predicate.
    pub fn iter_archetypes_matching<F>(&self, predicate: F) -> Vec<ArchetypeId>
    where
        F: Fn(&[ComponentTypeId]) -> bool,
    {
        let committed = self.archetypes.read().len();
        let mut out = Vec::new();
        {
            let archetypes = self.archetypes.read();
            for (id, signature) in archetypes.iter() {
                if predicate(signature.components()) {
                    out.push(id);
                }
            }
        }
        for (offset, signature) in self.arch_overlay.iter().enumerate() {
            if predicate(signature.components()) {
                out.push(ArchetypeId::new((committed + offset) as u32));
            }
        }
        out
    }

    // =========================================================================
    // Tick transaction
    // =========================================================================

    /// Flushes all pending changes to the backing store in one atomic batch.
    ///
    /// Either every staged effect is visible to the next read or none are.
    /// On a storage failure the overlays are left intact so the caller can
    /// retry or discard.
    ///
    /// # Errors
    ///
    /// `Storage` when the batch is rejected.
    pub fn commit_pending(&mut self) -> WorldResult<()> {
        let started = Instant::now();
        if self.loc_overlay.is_empty()
            && self.comp_overlay.is_empty()
            && self.arch_overlay.is_empty()
            && self.next_id == self.next_id_committed
            && !self.pending_tx_written
        {
            return Ok(());
        }

        let plan = self.build_plan()?;
        self.store.transaction(&plan.ops)?;
        self.absorb_plan(plan, started);
        Ok(())
    }

    /// Drops every overlay, reverting the effective view to the last
    /// committed baseline. Infallible.
    pub fn discard_pending(&mut self) {
        self.loc_overlay.clear();
        self.comp_overlay.clear();
        self.arch_overlay.clear();
        self.arch_overlay_lookup.clear();
        self.pending_rows.clear();
        self.next_id = self.next_id_committed;
        tracing::debug!("discarded pending overlays");
    }

    // =========================================================================
    // Commit planning
    // =========================================================================

    /// Plans the full write batch for the pending overlays without touching
    /// the store.
    ///
    /// Row assignment happens in two passes, because rows handed out during
    /// the tick assume no removals. Arrivals take rows at the current column
    /// tail in staging order; vacated rows are then resolved in descending
    /// order with swap-from-tail, rewriting the location of whichever entity
    /// the swap moves.
    fn build_plan(&self) -> WorldResult<CommitPlan> {
        let mut ops: Vec<WriteOp> = Vec::new();
        let mut stats = CommitStats::default();

        for signature in &self.arch_overlay {
            ops.push(WriteOp::ListPush {
                key: self.keys.archetype_defs(),
                value: codec::encode_archetype(signature),
            });
        }

        // Partition the location overlay into arrivals and vacated rows.
        let mut incoming: BTreeMap<ArchetypeId, Vec<(u64, EntityId)>> = BTreeMap::new();
        let mut vacated: BTreeMap<ArchetypeId, Vec<u64>> = BTreeMap::new();
        let mut loc_writes: BTreeMap<EntityId, Option<Location>> = BTreeMap::new();

        for (&entity, &staged) in &self.loc_overlay {
            let persisted = self.locations.get(entity)?;
            match staged {
                None => {
                    if let Some(p) = persisted {
                        vacated.entry(p.arch).or_default().push(p.row);
                        loc_writes.insert(entity, None);
                        stats.removed += 1;
                    }
                    // Created and removed in the same tick: no trace.
                }
                Some(target) => {
                    if let Some(p) = persisted {
                        vacated.entry(p.arch).or_default().push(p.row);
                        stats.migrated += 1;
                    } else {
                        stats.created += 1;
                    }
                    incoming.entry(target.arch).or_default().push((target.row, entity));
                }
            }
        }

        let affected: BTreeSet<ArchetypeId> = incoming
            .keys()
            .chain(vacated.keys())
            .copied()
            .collect();
        let mut len_changes: HashMap<ArchetypeId, u64> = HashMap::new();

        for arch in affected {
            let signature = self.signature_of(arch)?;
            let base_len = self.committed_len(arch);
            let mut rows: Vec<EntityId> = if base_len > 0 {
                self.columns.entities(arch)?
            } else {
                Vec::new()
            };
            assert_eq!(
                rows.len() as u64,
                base_len,
                "archetype {arch} membership list disagrees with its row count; \
                 the store is inconsistent",
            );

            // Arrivals, in staging order.
            let mut arrivals = incoming.remove(&arch).unwrap_or_default();
            arrivals.sort_unstable();
            let mut staged_columns: HashMap<ComponentTypeId, Vec<Vec<u8>>> = HashMap::new();
            for (offset, &(_, entity)) in arrivals.iter().enumerate() {
                let row = base_len + offset as u64;
                for &comp in signature.components() {
                    let value = match self.comp_overlay.get(&(entity, comp)) {
                        Some(Some(bytes)) => bytes.clone(),
                        _ => unreachable!(
                            "entity {entity} arrived in archetype {arch} without a \
                             staged value for component {comp}"
                        ),
                    };
                    ops.push(WriteOp::ListPush {
                        key: self.keys.component_column(arch.raw(), comp.raw()),
                        value: value.clone(),
                    });
                    staged_columns.entry(comp).or_default().push(value);
                }
                ops.push(WriteOp::ListPush {
                    key: self.keys.archetype_entities(arch.raw()),
                    value: codec::encode_entity_id(entity),
                });
                rows.push(entity);
                loc_writes.insert(entity, Some(Location::new(arch, row)));
            }

            // Vacated rows, highest first so every swap pulls from the live
            // tail. A swap target can become a later swap's source, so the
            // values written by earlier swaps are remembered; the baseline
            // column is only consulted for rows this plan has not touched.
            let mut moved_values: HashMap<(ComponentTypeId, u64), Vec<u8>> = HashMap::new();
            let mut gone = vacated.remove(&arch).unwrap_or_default();
            gone.sort_unstable_by(|a, b| b.cmp(a));
            let mut len = rows.len() as u64;
            for row in gone {
                let tail = len - 1;
                if row != tail {
                    let moved = rows[tail as usize];
                    for &comp in signature.components() {
                        let value = if let Some(rewritten) = moved_values.get(&(comp, tail)) {
                            rewritten.clone()
                        } else if tail >= base_len {
                            staged_columns[&comp][(tail - base_len) as usize].clone()
                        } else {
                            self.columns.read(arch, comp, tail)?
                        };
                        ops.push(WriteOp::ListSet {
                            key: self.keys.component_column(arch.raw(), comp.raw()),
                            index: row,
                            value: value.clone(),
                        });
                        moved_values.insert((comp, row), value);
                    }
                    ops.push(WriteOp::ListSet {
                        key: self.keys.archetype_entities(arch.raw()),
                        index: row,
                        value: codec::encode_entity_id(moved),
                    });
                    rows[row as usize] = moved;
                    loc_writes.insert(moved, Some(Location::new(arch, row)));
                }
                for &comp in signature.components() {
                    ops.push(WriteOp::ListPopTail {
                        key: self.keys.component_column(arch.raw(), comp.raw()),
                    });
                }
                ops.push(WriteOp::ListPopTail {
                    key: self.keys.archetype_entities(arch.raw()),
                });
                rows.truncate(tail as usize);
                len = tail;
            }
            len_changes.insert(arch, len);
        }

        // In-place component writes for entities that did not move, at their
        // final row. These follow the swaps so the newest value wins.
        for ((entity, comp), value) in &self.comp_overlay {
            if self.loc_overlay.contains_key(entity) {
                continue;
            }
            let Some(value) = value else { continue };
            let persisted = self
                .locations
                .get(*entity)?
                .ok_or(WorldError::NoSuchEntity(*entity))?;
            let row = match loc_writes.get(entity) {
                Some(Some(moved)) => moved.row,
                _ => persisted.row,
            };
            ops.push(WriteOp::ListSet {
                key: self
                    .keys
                    .component_column(persisted.arch.raw(), comp.raw()),
                index: row,
                value: value.clone(),
            });
            stats.component_writes += 1;
        }

        for (entity, location) in &loc_writes {
            match location {
                Some(l) => ops.push(WriteOp::Set {
                    key: self.keys.entity_location(entity.raw()),
                    value: codec::encode_location(l),
                }),
                None => ops.push(WriteOp::Delete {
                    key: self.keys.entity_location(entity.raw()),
                }),
            }
        }

        if self.next_id != self.next_id_committed {
            ops.push(WriteOp::Set {
                key: self.keys.next_entity_id(),
                value: codec::encode_counter(self.next_id),
            });
        }
        if self.pending_tx_written {
            ops.push(WriteOp::Delete {
                key: self.keys.pending_tx(),
            });
        }

        stats.ops = ops.len() as u64;
        Ok(CommitPlan {
            ops,
            loc_writes,
            len_changes,
            stats,
        })
    }

    /// Folds a successfully written plan into the committed caches and
    /// clears the overlays.
    fn absorb_plan(&mut self, plan: CommitPlan, started: Instant) {
        {
            let mut archetypes = self.archetypes.write();
            for signature in self.arch_overlay.drain(..) {
                archetypes.insert(signature);
            }
        }
        self.arch_overlay_lookup.clear();
        self.pending_rows.clear();
        for (arch, len) in plan.len_changes {
            self.column_lens.insert(arch, len);
        }
        self.locations.absorb(&plan.loc_writes);
        self.next_id_committed = self.next_id;
        self.pending_tx_written = false;
        self.loc_overlay.clear();
        self.comp_overlay.clear();

        let mut stats = plan.stats;
        stats.duration = started.elapsed();
        tracing::debug!(
            created = stats.created,
            removed = stats.removed,
            migrated = stats.migrated,
            component_writes = stats.component_writes,
            ops = stats.ops,
            "committed tick"
        );
        if let Some(observer) = &self.observer {
            observer(&stats);
        }
    }

    // =========================================================================
    // Internal helpers
    // =========================================================================

    fn ensure_running(&mut self) {
        if self.phase == Phase::Registering {
            self.phase = Phase::Running;
        }
    }

    fn require_registered(&self, components: &[ComponentTypeId]) -> WorldResult<()> {
        let registry = self.registry.read();
        for &comp in components {
            if registry.by_id(comp).is_none() {
                return Err(WorldError::UnknownComponent(comp.to_string()));
            }
        }
        Ok(())
    }

    /// The entity's location in the effective view.
    fn effective_location(&self, entity: EntityId) -> WorldResult<Option<Location>> {
        if let Some(&staged) = self.loc_overlay.get(&entity) {
            return Ok(staged);
        }
        self.locations.get(entity)
    }

    /// The signature of a committed or staged archetype.
    fn signature_of(&self, arch: ArchetypeId) -> WorldResult<ArchetypeSignature> {
        if let Some(signature) = self.archetypes.read().signature(arch) {
            return Ok(signature.clone());
        }
        let committed = self.archetypes.read().len();
        (arch.raw() as usize)
            .checked_sub(committed)
            .and_then(|offset| self.arch_overlay.get(offset))
            .cloned()
            .ok_or(WorldError::NoSuchArchetype(arch))
    }

    fn committed_len(&self, arch: ArchetypeId) -> u64 {
        self.column_lens.get(&arch).copied().unwrap_or(0)
    }

    /// Resolves or stages the archetype for a canonical signature.
    fn arch_id_for_signature(&mut self, signature: &ArchetypeSignature) -> ArchetypeId {
        if let Some(id) = self.archetypes.read().lookup(signature) {
            return id;
        }
        if let Some(&id) = self.arch_overlay_lookup.get(signature) {
            return id;
        }
        let id = ArchetypeId::new(
            (self.archetypes.read().len() + self.arch_overlay.len()) as u32,
        );
        self.arch_overlay.push(signature.clone());
        self.arch_overlay_lookup.insert(signature.clone(), id);
        tracing::debug!(archetype = %id, components = signature.len(), "staged new archetype");
        id
    }

    /// Hands out the next provisional row of an archetype for this tick.
    fn claim_pending_row(&mut self, arch: ArchetypeId) -> u64 {
        let base = self.committed_len(arch);
        let pending = self.pending_rows.entry(arch).or_insert(0);
        let row = base + *pending;
        *pending += 1;
        row
    }

    /// Copies the persisted values of `carried` components into the overlay
    /// so a migration can re-home them at commit.
    fn stage_carried_values(
        &mut self,
        entity: EntityId,
        carried: &ArchetypeSignature,
    ) -> WorldResult<()> {
        let missing: Vec<ComponentTypeId> = carried
            .components()
            .iter()
            .copied()
            .filter(|comp| !self.comp_overlay.contains_key(&(entity, *comp)))
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        let persisted = self
            .locations
            .get(entity)?
            .ok_or(WorldError::NoSuchEntity(entity))?;
        for comp in missing {
            let value = self.columns.read(persisted.arch, comp, persisted.row)?;
            self.comp_overlay.insert((entity, comp), Some(value));
        }
        Ok(())
    }

    /// Points the entity's overlay location at a fresh row of the archetype
    /// matching `target`.
    fn relocate(&mut self, entity: EntityId, target: &ArchetypeSignature) {
        let arch = self.arch_id_for_signature(target);
        let row = self.claim_pending_row(arch);
        self.loc_overlay.insert(entity, Some(Location::new(arch, row)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicU64, Ordering};
    use ebb_storage::MemoryStorage;

    #[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Foo {
        value: i64,
    }

    impl Component for Foo {
        const NAME: &'static str = "foo";
    }

    #[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Bar {
        count: u32,
    }

    impl Component for Bar {
        const NAME: &'static str = "bar";
    }

    #[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Unused {
        flag: bool,
    }

    impl Component for Unused {
        const NAME: &'static str = "unused";
    }

    struct Fixture {
        store: Arc<MemoryStorage>,
        world: EntityCommandBuffer,
        foo: ComponentTypeId,
        bar: ComponentTypeId,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStorage::new());
        let mut world =
            EntityCommandBuffer::open(Arc::clone(&store) as Arc<dyn PrimitiveStorage>, "test")
                .unwrap();
        let foo = world.register_component::<Foo>().unwrap();
        let bar = world.register_component::<Bar>().unwrap();
        Fixture {
            store,
            world,
            foo,
            bar,
        }
    }

    #[test]
    fn test_created_entity_starts_at_zero_values() {
        let mut f = fixture();
        let id = f.world.create_entity(&[f.foo, f.bar]).unwrap();
        assert_eq!(
            f.world.get_component_for_entity::<Foo>(id).unwrap(),
            Foo::default()
        );
        assert_eq!(
            f.world.get_component_for_entity::<Bar>(id).unwrap(),
            Bar::default()
        );
    }

    #[test]
    fn test_set_then_get_roundtrips_across_commit() {
        let mut f = fixture();
        let id = f.world.create_entity(&[f.foo]).unwrap();
        let want = Foo { value: -42 };
        f.world.set_component_for_entity(id, &want).unwrap();
        assert_eq!(f.world.get_component_for_entity::<Foo>(id).unwrap(), want);

        f.world.commit_pending().unwrap();
        assert_eq!(f.world.get_component_for_entity::<Foo>(id).unwrap(), want);
    }

    #[test]
    fn test_entity_ids_are_contiguous_and_monotonic() {
        let mut f = fixture();
        let ids = f.world.create_many_entities(5, &[f.foo]).unwrap();
        for pair in ids.windows(2) {
            assert_eq!(pair[1].raw(), pair[0].raw() + 1);
        }
        f.world.remove_entity(ids[4]).unwrap();
        let next = f.world.create_entity(&[f.foo]).unwrap();
        assert_eq!(next.raw(), ids[4].raw() + 1);
    }

    #[test]
    fn test_unregistered_component_is_rejected() {
        let mut f = fixture();
        let id = f.world.create_entity(&[f.foo]).unwrap();
        assert!(matches!(
            f.world.get_component_for_entity::<Unused>(id),
            Err(WorldError::UnknownComponent(_))
        ));
        assert!(matches!(
            f.world.create_entity(&[ComponentTypeId::new(99)]),
            Err(WorldError::UnknownComponent(_))
        ));
    }

    #[test]
    fn test_component_guards() {
        let mut f = fixture();
        let id = f.world.create_entity(&[f.foo]).unwrap();

        assert!(matches!(
            f.world.add_component_to_entity(f.foo, id),
            Err(WorldError::ComponentAlreadyPresent { .. })
        ));
        assert!(matches!(
            f.world.remove_component_from_entity(f.bar, id),
            Err(WorldError::ComponentNotOnEntity { .. })
        ));
        assert!(matches!(
            f.world.get_component_for_entity::<Bar>(id),
            Err(WorldError::ComponentNotOnEntity { .. })
        ));

        let ghost = EntityId::new(404);
        assert!(matches!(
            f.world.remove_entity(ghost),
            Err(WorldError::NoSuchEntity(_))
        ));
        assert!(matches!(
            f.world.get_component_for_entity::<Foo>(ghost),
            Err(WorldError::NoSuchEntity(_))
        ));
    }

    #[test]
    fn test_add_component_migrates_and_keeps_values() {
        let mut f = fixture();
        let id = f.world.create_entity(&[f.foo]).unwrap();
        f.world
            .set_component_for_entity(id, &Foo { value: 7 })
            .unwrap();
        f.world.commit_pending().unwrap();

        f.world.add_component_to_entity(f.bar, id).unwrap();
        let mut types = f.world.component_types_for_entity(id).unwrap();
        types.sort_unstable();
        assert_eq!(types, vec![f.foo, f.bar]);
        assert_eq!(
            f.world.get_component_for_entity::<Foo>(id).unwrap(),
            Foo { value: 7 }
        );

        f.world.commit_pending().unwrap();
        assert_eq!(
            f.world.get_component_for_entity::<Foo>(id).unwrap(),
            Foo { value: 7 }
        );
        assert_eq!(
            f.world.get_component_for_entity::<Bar>(id).unwrap(),
            Bar::default()
        );
    }

    #[test]
    fn test_discard_drops_component_added_this_tick() {
        let mut f = fixture();
        let id = f.world.create_entity(&[f.foo]).unwrap();
        f.world.commit_pending().unwrap();

        f.world.add_component_to_entity(f.bar, id).unwrap();
        f.world
            .set_component_for_entity(id, &Bar { count: 3 })
            .unwrap();
        f.world.discard_pending();

        assert_eq!(f.world.component_types_for_entity(id).unwrap(), vec![f.foo]);
        assert!(f.world.get_component_for_entity::<Bar>(id).is_err());
    }

    #[test]
    fn test_create_and_remove_in_one_tick_leaves_no_trace() {
        let mut f = fixture();
        let keeper = f.world.create_entity(&[f.foo]).unwrap();
        let doomed = f.world.create_entity(&[f.foo]).unwrap();
        f.world.remove_entity(doomed).unwrap();
        f.world.commit_pending().unwrap();

        let arch = f.world.arch_id_for_components(&[f.foo]).unwrap();
        assert_eq!(f.world.entities_for_arch_id(arch).unwrap(), vec![keeper]);
        let reader = f.world.reader();
        assert!(!reader.contains_entity(doomed).unwrap());
        assert!(reader.contains_entity(keeper).unwrap());
    }

    #[test]
    fn test_entities_for_arch_id_reflects_overlay() {
        let mut f = fixture();
        let ids = f.world.create_many_entities(3, &[f.foo]).unwrap();
        f.world.commit_pending().unwrap();
        let arch = f.world.arch_id_for_components(&[f.foo]).unwrap();

        f.world.remove_entity(ids[1]).unwrap();
        let fresh = f.world.create_entity(&[f.foo]).unwrap();
        let members = f.world.entities_for_arch_id(arch).unwrap();
        assert_eq!(members, vec![ids[0], ids[2], fresh]);

        assert!(matches!(
            f.world.entities_for_arch_id(ArchetypeId::new(9)),
            Err(WorldError::NoSuchArchetype(_))
        ));
    }

    #[test]
    fn test_failed_commit_keeps_overlays_for_retry() {
        let mut f = fixture();
        let id = f.world.create_entity(&[f.foo]).unwrap();
        f.world
            .set_component_for_entity(id, &Foo { value: 5 })
            .unwrap();

        // Poison a column key so the batch is rejected by the backend.
        let poisoned = KeySpace::new("test").component_column(0, f.foo.raw());
        f.store.set(&poisoned, b"junk").unwrap();
        assert!(matches!(
            f.world.commit_pending(),
            Err(WorldError::Storage(_))
        ));

        // The pending view is still intact.
        assert_eq!(
            f.world.get_component_for_entity::<Foo>(id).unwrap(),
            Foo { value: 5 }
        );

        // Clearing the obstruction lets the same overlays commit.
        f.store.delete(&poisoned).unwrap();
        f.world.commit_pending().unwrap();
        assert_eq!(
            f.world.reader().get_component_for_entity::<Foo>(id).unwrap(),
            Foo { value: 5 }
        );
    }

    #[test]
    fn test_registration_closes_when_running() {
        let mut f = fixture();
        f.world.create_entity(&[f.foo]).unwrap();
        assert!(matches!(
            f.world.register_component::<Unused>(),
            Err(WorldError::InvalidState(_))
        ));
    }

    #[test]
    fn test_tick_cannot_be_opened_twice() {
        let mut f = fixture();
        let pool = TxPool::new();
        f.world.start_next_tick(&pool).unwrap();
        assert!(matches!(
            f.world.start_next_tick(&pool),
            Err(WorldError::InvalidState(_))
        ));
        f.world.finalize_tick().unwrap();
        f.world.start_next_tick(&pool).unwrap();
    }

    #[test]
    fn test_reader_sees_committed_state_only() {
        let mut f = fixture();
        let committed = f.world.create_entity(&[f.foo]).unwrap();
        f.world.commit_pending().unwrap();
        let staged = f.world.create_entity(&[f.foo]).unwrap();

        let reader = f.world.reader();
        assert!(reader.contains_entity(committed).unwrap());
        assert!(!reader.contains_entity(staged).unwrap());
        assert_eq!(reader.archetype_count(), 1);
    }

    #[test]
    fn test_archetype_matching_covers_pending_archetypes() {
        let mut f = fixture();
        f.world.create_entity(&[f.foo]).unwrap();
        f.world.commit_pending().unwrap();
        f.world.create_entity(&[f.foo, f.bar]).unwrap();

        let foo = f.foo;
        let with_foo = f.world.iter_archetypes_matching(|comps| comps.contains(&foo));
        assert_eq!(with_foo.len(), 2);

        let bar = f.bar;
        let committed_with_bar = f
            .world
            .reader()
            .iter_archetypes_matching(|comps| comps.contains(&bar));
        assert!(committed_with_bar.is_empty());
    }

    #[test]
    fn test_commit_observer_reports_stats() {
        let mut f = fixture();
        let commits = Arc::new(AtomicU64::new(0));
        let created = Arc::new(AtomicU64::new(0));
        let commits_seen = Arc::clone(&commits);
        let created_seen = Arc::clone(&created);
        f.world.set_commit_observer(move |stats| {
            commits_seen.fetch_add(1, Ordering::Relaxed);
            created_seen.fetch_add(stats.created, Ordering::Relaxed);
        });

        f.world.create_many_entities(4, &[f.foo]).unwrap();
        f.world.commit_pending().unwrap();
        assert_eq!(commits.load(Ordering::Relaxed), 1);
        assert_eq!(created.load(Ordering::Relaxed), 4);
    }

    #[test]
    fn test_empty_commit_is_a_no_op() {
        let mut f = fixture();
        f.world.commit_pending().unwrap();
        assert_eq!(f.store.key_count(), 1); // just the registry
    }
}
