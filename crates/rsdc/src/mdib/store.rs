// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Versioned MDIB container.
//!
//! Readers take a lock-free snapshot (`ArcSwap`); all mutation funnels
//! through the single commit path in [`crate::mdib::transaction`] (provider)
//! or the report apply path (consumer mirror), both serialized by the commit
//! lock. Indices are part of the snapshot and swap atomically with it.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::{Mutex, MutexGuard, RwLock};

use crate::biceps::{ContextState, Descriptor, Handle, State};
use crate::ident::Uuid;
use crate::mdib::changeset::ChangeSet;
use crate::{Error, Result};

/// Immutable, fully indexed view of the MDIB at one `mdib_version`.
#[derive(Debug, Clone)]
pub struct MdibSnapshot {
    pub mdib_version: u64,
    /// Changes iff the provider restarts or resets continuity.
    pub sequence_id: Uuid,
    /// Optional provider re-identification tag.
    pub instance_id: Option<u64>,

    descriptors: HashMap<Handle, Arc<Descriptor>>,
    /// Single-states, keyed by their descriptor handle.
    states: HashMap<Handle, Arc<State>>,
    /// Context states, keyed by their own handle.
    context_states: HashMap<Handle, Arc<ContextState>>,

    /// Parent handle -> child handles, insertion order preserved.
    children: HashMap<Handle, Vec<Handle>>,
    /// MDS handles, insertion order preserved.
    roots: Vec<Handle>,
    /// (coding system, code) -> metric descriptor handles.
    by_code: HashMap<(String, String), Vec<Handle>>,
    /// Context descriptor handle -> context state handles, insertion order.
    contexts_by_descriptor: HashMap<Handle, Vec<Handle>>,
}

impl MdibSnapshot {
    pub fn empty(sequence_id: Uuid) -> Self {
        Self {
            mdib_version: 0,
            sequence_id,
            instance_id: None,
            descriptors: HashMap::new(),
            states: HashMap::new(),
            context_states: HashMap::new(),
            children: HashMap::new(),
            roots: Vec::new(),
            by_code: HashMap::new(),
            contexts_by_descriptor: HashMap::new(),
        }
    }

    pub fn get_descriptor(&self, handle: &str) -> Option<&Arc<Descriptor>> {
        self.descriptors.get(handle)
    }

    /// Single-state of a descriptor.
    pub fn get_state(&self, descriptor_handle: &str) -> Option<&Arc<State>> {
        self.states.get(descriptor_handle)
    }

    /// Context state by its own handle.
    pub fn get_context_state(&self, handle: &str) -> Option<&Arc<ContextState>> {
        self.context_states.get(handle)
    }

    /// All context states of a context descriptor, insertion order.
    pub fn context_states_of(&self, descriptor_handle: &str) -> Vec<Arc<ContextState>> {
        self.contexts_by_descriptor
            .get(descriptor_handle)
            .map(|handles| {
                handles
                    .iter()
                    .filter_map(|h| self.context_states.get(h).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Child descriptor handles, in source/insertion order.
    pub fn children_of(&self, handle: &str) -> &[Handle] {
        self.children.get(handle).map(Vec::as_slice).unwrap_or(&[])
    }

    /// MDS root handles.
    pub fn roots(&self) -> &[Handle] {
        &self.roots
    }

    /// Metric descriptor handles carrying the given type code.
    pub fn metrics_by_code(&self, coding_system: &str, code: &str) -> &[Handle] {
        self.by_code
            .get(&(coding_system.to_string(), code.to_string()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &Arc<Descriptor>> {
        self.descriptors.values()
    }

    pub fn states(&self) -> impl Iterator<Item = &Arc<State>> {
        self.states.values()
    }

    pub fn context_states(&self) -> impl Iterator<Item = &Arc<ContextState>> {
        self.context_states.values()
    }

    pub fn descriptor_count(&self) -> usize {
        self.descriptors.len()
    }

    /// Handles of `root` and its whole subtree, depth-first, parents before
    /// children.
    pub fn subtree(&self, root: &str) -> Vec<Handle> {
        let mut out = Vec::new();
        let mut stack = vec![root.to_string()];
        while let Some(handle) = stack.pop() {
            if self.descriptors.contains_key(&handle) {
                for child in self.children_of(&handle).iter().rev() {
                    stack.push(child.clone());
                }
                out.push(handle);
            }
        }
        out
    }

    /// Check the structural invariants. Called by tests and on consumer
    /// bootstrap; commit-time validation keeps them true incrementally.
    pub fn validate(&self) -> Result<()> {
        for descriptor in self.descriptors.values() {
            if let Some(parent) = &descriptor.parent {
                if !self.descriptors.contains_key(parent) {
                    return Err(Error::UnknownHandle(format!(
                        "parent '{}' of '{}'",
                        parent, descriptor.handle
                    )));
                }
            } else if !descriptor.kind().is_root() {
                return Err(Error::InvalidState(format!(
                    "non-MDS descriptor '{}' without parent",
                    descriptor.handle
                )));
            }

            if descriptor.kind().is_multi_state() {
                if self.states.contains_key(&descriptor.handle) {
                    return Err(Error::KindMismatch(format!(
                        "context descriptor '{}' with single-state",
                        descriptor.handle
                    )));
                }
            } else if !self.states.contains_key(&descriptor.handle) {
                return Err(Error::InvalidState(format!(
                    "descriptor '{}' without state",
                    descriptor.handle
                )));
            }
        }

        for state in self.states.values() {
            let descriptor = self.descriptors.get(&state.descriptor_handle).ok_or_else(|| {
                Error::UnknownHandle(format!("state references '{}'", state.descriptor_handle))
            })?;
            if state.payload.descriptor_kind() != descriptor.kind() {
                return Err(Error::KindMismatch(format!(
                    "state kind does not match descriptor '{}'",
                    descriptor.handle
                )));
            }
        }

        for context in self.context_states.values() {
            let descriptor = self
                .descriptors
                .get(&context.descriptor_handle)
                .ok_or_else(|| {
                    Error::UnknownHandle(format!(
                        "context state '{}' references '{}'",
                        context.handle, context.descriptor_handle
                    ))
                })?;
            if context.kind().descriptor_kind() != descriptor.kind() {
                return Err(Error::KindMismatch(format!(
                    "context state '{}' does not match descriptor kind",
                    context.handle
                )));
            }
        }

        // At most one associated state per singleton context descriptor.
        for (descriptor_handle, handles) in &self.contexts_by_descriptor {
            let associated = handles
                .iter()
                .filter_map(|h| self.context_states.get(h))
                .filter(|c| c.is_associated())
                .count();
            if associated > 1 {
                let singleton = handles
                    .iter()
                    .filter_map(|h| self.context_states.get(h))
                    .any(|c| c.kind().singleton_association());
                if singleton {
                    return Err(Error::InvalidState(format!(
                        "multiple associated contexts for '{}'",
                        descriptor_handle
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Mutable clone of a snapshot's tables. Used by the commit paths to stage
/// the next snapshot; keeps every index in step with the primary tables.
pub(crate) struct SnapshotBuilder {
    snapshot: MdibSnapshot,
}

impl SnapshotBuilder {
    pub fn from(base: &MdibSnapshot) -> Self {
        Self {
            snapshot: base.clone(),
        }
    }

    pub fn base(&self) -> &MdibSnapshot {
        &self.snapshot
    }

    pub fn put_descriptor(&mut self, descriptor: Arc<Descriptor>) {
        let handle = descriptor.handle.clone();
        let previous = self.snapshot.descriptors.insert(handle.clone(), Arc::clone(&descriptor));

        match &previous {
            Some(old) => {
                // Parent is immutable; only the code index can move.
                if let Some(code) = &old.type_code {
                    if old.kind().is_metric() {
                        remove_index_entry(&mut self.snapshot.by_code, &code.index_key(), &handle);
                    }
                }
            }
            None => {
                match &descriptor.parent {
                    Some(parent) => self
                        .snapshot
                        .children
                        .entry(parent.clone())
                        .or_default()
                        .push(handle.clone()),
                    None => self.snapshot.roots.push(handle.clone()),
                }
            }
        }

        if descriptor.kind().is_metric() {
            if let Some(code) = &descriptor.type_code {
                self.snapshot
                    .by_code
                    .entry(code.index_key())
                    .or_default()
                    .push(handle);
            }
        }
    }

    /// Remove one descriptor plus its own states and index entries. The
    /// caller removes the subtree first (children before parents).
    pub fn remove_descriptor(&mut self, handle: &str) {
        let Some(descriptor) = self.snapshot.descriptors.remove(handle) else {
            return;
        };
        match &descriptor.parent {
            Some(parent) => {
                if let Some(siblings) = self.snapshot.children.get_mut(parent) {
                    siblings.retain(|h| h != handle);
                }
            }
            None => self.snapshot.roots.retain(|h| h != handle),
        }
        self.snapshot.children.remove(handle);
        if descriptor.kind().is_metric() {
            if let Some(code) = &descriptor.type_code {
                remove_index_entry(&mut self.snapshot.by_code, &code.index_key(), handle);
            }
        }
        self.snapshot.states.remove(handle);
        if let Some(contexts) = self.snapshot.contexts_by_descriptor.remove(handle) {
            for context in contexts {
                self.snapshot.context_states.remove(&context);
            }
        }
    }

    pub fn put_state(&mut self, state: Arc<State>) {
        self.snapshot
            .states
            .insert(state.descriptor_handle.clone(), state);
    }

    pub fn put_context_state(&mut self, state: Arc<ContextState>) {
        let handle = state.handle.clone();
        let descriptor_handle = state.descriptor_handle.clone();
        if self
            .snapshot
            .context_states
            .insert(handle.clone(), state)
            .is_none()
        {
            self.snapshot
                .contexts_by_descriptor
                .entry(descriptor_handle)
                .or_default()
                .push(handle);
        }
    }

    pub fn build(mut self, mdib_version: u64, sequence_id: Uuid, instance_id: Option<u64>) -> MdibSnapshot {
        self.snapshot.mdib_version = mdib_version;
        self.snapshot.sequence_id = sequence_id;
        self.snapshot.instance_id = instance_id;
        self.snapshot
    }
}

fn remove_index_entry(
    index: &mut HashMap<(String, String), Vec<Handle>>,
    key: &(String, String),
    handle: &str,
) {
    if let Some(handles) = index.get_mut(key) {
        handles.retain(|h| h != handle);
        if handles.is_empty() {
            index.remove(key);
        }
    }
}

/// Callback invoked with every committed change-set, in commit order.
pub type ChangeObserver = Box<dyn Fn(&ChangeSet) + Send + Sync>;

/// The MDIB: lock-free snapshot for readers, one serialized commit path.
pub struct Mdib {
    snapshot: ArcSwap<MdibSnapshot>,
    commit_lock: Mutex<()>,
    observers: RwLock<Vec<ChangeObserver>>,
}

impl Mdib {
    /// Empty MDIB with a fresh sequence id (provider construction).
    #[must_use]
    pub fn new() -> Self {
        Self::with_snapshot(MdibSnapshot::empty(Uuid::generate()))
    }

    /// MDIB seeded from a full snapshot (consumer bootstrap).
    #[must_use]
    pub fn with_snapshot(snapshot: MdibSnapshot) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(snapshot),
            commit_lock: Mutex::new(()),
            observers: RwLock::new(Vec::new()),
        }
    }

    /// Atomic snapshot of the committed MDIB. Never blocks on writers.
    pub fn snapshot(&self) -> Arc<MdibSnapshot> {
        self.snapshot.load_full()
    }

    pub fn mdib_version(&self) -> u64 {
        self.snapshot.load().mdib_version
    }

    pub fn sequence_id(&self) -> Uuid {
        self.snapshot.load().sequence_id
    }

    /// Register an observer for committed change-sets. Observers run inside
    /// the commit section: keep them fast and non-blocking (enqueue, don't
    /// deliver).
    pub fn register_observer(&self, observer: ChangeObserver) {
        self.observers.write().push(observer);
    }

    pub(crate) fn lock_commit(&self) -> MutexGuard<'_, ()> {
        self.commit_lock.lock()
    }

    /// Swap in a new committed snapshot and notify observers. The caller
    /// holds the commit lock, which makes emission order equal commit order.
    pub(crate) fn install(
        &self,
        _guard: &MutexGuard<'_, ()>,
        snapshot: MdibSnapshot,
        change: Option<&ChangeSet>,
    ) {
        self.snapshot.store(Arc::new(snapshot));
        if let Some(change) = change {
            for observer in self.observers.read().iter() {
                observer(change);
            }
        }
    }

    /// Replace the MDIB wholesale (consumer gap recovery). No change-set is
    /// emitted; resynchronization is signalled out of band.
    pub fn reset(&self, snapshot: MdibSnapshot) {
        let guard = self.lock_commit();
        self.install(&guard, snapshot, None);
    }
}

impl Default for Mdib {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Mdib {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.snapshot.load();
        f.debug_struct("Mdib")
            .field("mdib_version", &snapshot.mdib_version)
            .field("sequence_id", &snapshot.sequence_id)
            .field("descriptors", &snapshot.descriptors.len())
            .finish()
    }
}
