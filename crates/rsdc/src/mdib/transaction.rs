// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transactional MDIB mutation.
//!
//! A [`Transaction`] stages clones of the entities the caller touches and
//! commits them atomically: validation against the *current* committed
//! snapshot, per-entity version bumps, index rebuild and change-set emission
//! all happen under the MDIB's single commit lock. A failed validation
//! leaves the MDIB untouched and notifies nobody.

use std::sync::Arc;

use crate::biceps::{
    ContextAssociation, ContextState, Descriptor, Handle, SampleArrayValue, State, StateKind,
    StatePayload,
};
use crate::mdib::changeset::ChangeSet;
use crate::mdib::store::{Mdib, MdibSnapshot, SnapshotBuilder};
use crate::{Error, Result};

/// What a transaction is allowed to touch. One transaction of any kind
/// commits at a time; the kind bounds the change-set buckets it can fill.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TransactionKind {
    Descriptor,
    Metric,
    Alert,
    Component,
    Operational,
    Context,
    Waveform,
}

impl TransactionKind {
    fn allows_state(self, state_kind: StateKind) -> bool {
        matches!(
            (self, state_kind),
            (Self::Descriptor, _)
                | (Self::Metric, StateKind::Metric)
                | (Self::Waveform, StateKind::Waveform)
                | (Self::Alert, StateKind::Alert)
                | (Self::Component, StateKind::Component)
                | (Self::Operational, StateKind::Operational)
        )
    }
}

enum DescriptorOp {
    Create {
        descriptor: Descriptor,
        state: Option<State>,
    },
    Update(Descriptor),
    Delete,
}

/// A staged MDIB mutation. Obtain via [`Mdib::begin`], mutate through the
/// proxies, then [`commit`](Transaction::commit). Dropping without commit
/// discards every staged edit.
pub struct Transaction<'m> {
    mdib: &'m Mdib,
    kind: TransactionKind,
    base: Arc<MdibSnapshot>,
    descriptor_ops: Vec<(Handle, DescriptorOp)>,
    states: Vec<(Handle, State)>,
    contexts: Vec<(Handle, ContextState)>,
}

impl Mdib {
    /// Start a transaction of the given kind.
    pub fn begin(&self, kind: TransactionKind) -> Transaction<'_> {
        Transaction {
            mdib: self,
            kind,
            base: self.snapshot(),
            descriptor_ops: Vec::new(),
            states: Vec::new(),
            contexts: Vec::new(),
        }
    }
}

impl<'m> Transaction<'m> {
    pub fn kind(&self) -> TransactionKind {
        self.kind
    }

    /// Mutable proxy of a single-state, cloned from the committed state on
    /// first touch. The clone's preserved source text is dropped.
    pub fn write_state(&mut self, handle: &str) -> Result<&mut State> {
        if let Some(index) = self.states.iter().position(|(h, _)| h == handle) {
            return Ok(&mut self.states[index].1);
        }
        // States created by a staged descriptor insert are edited in place.
        let staged_create = self.descriptor_ops.iter().position(|(h, op)| {
            h == handle && matches!(op, DescriptorOp::Create { state: Some(_), .. })
        });
        if let Some(index) = staged_create {
            match &mut self.descriptor_ops[index].1 {
                DescriptorOp::Create {
                    state: Some(state), ..
                } => return Ok(state),
                _ => unreachable!("position matched a create with state"),
            }
        }
        let current = self
            .base
            .get_state(handle)
            .ok_or_else(|| Error::UnknownHandle(handle.to_string()))?;
        if !self.kind.allows_state(current.kind()) {
            return Err(Error::KindMismatch(format!(
                "{:?} state '{}' in {:?} transaction",
                current.kind(),
                handle,
                self.kind
            )));
        }
        let mut clone = State::clone(current);
        clone.invalidate_source();
        self.states.push((handle.to_string(), clone));
        Ok(&mut self.states.last_mut().expect("just pushed").1)
    }

    /// Mutable proxy of a descriptor (descriptor transactions only).
    pub fn write_descriptor(&mut self, handle: &str) -> Result<&mut Descriptor> {
        self.require_kind(TransactionKind::Descriptor)?;
        if let Some(index) = self.descriptor_ops.iter().position(|(h, _)| h == handle) {
            match &mut self.descriptor_ops[index].1 {
                DescriptorOp::Create { descriptor, .. } | DescriptorOp::Update(descriptor) => {
                    return Ok(descriptor)
                }
                DescriptorOp::Delete => {
                    return Err(Error::StaleTransaction(format!(
                        "'{}' already deleted in this transaction",
                        handle
                    )))
                }
            }
        }
        let current = self
            .base
            .get_descriptor(handle)
            .ok_or_else(|| Error::UnknownHandle(handle.to_string()))?;
        let mut clone = Descriptor::clone(current);
        clone.invalidate_source();
        self.descriptor_ops
            .push((handle.to_string(), DescriptorOp::Update(clone)));
        match &mut self.descriptor_ops.last_mut().expect("just pushed").1 {
            DescriptorOp::Update(descriptor) => Ok(descriptor),
            _ => unreachable!(),
        }
    }

    /// Stage a descriptor create. Non-context descriptors get a default
    /// state unless one is supplied; context descriptors must not carry one.
    pub fn insert(&mut self, descriptor: Descriptor, state: Option<State>) -> Result<()> {
        self.require_kind(TransactionKind::Descriptor)?;
        let handle = descriptor.handle.clone();
        if self.base.get_descriptor(&handle).is_some()
            || self.descriptor_ops.iter().any(|(h, _)| *h == handle)
        {
            return Err(Error::DuplicateHandle(handle));
        }
        let kind = descriptor.kind();
        let state = if kind.is_multi_state() {
            if state.is_some() {
                return Err(Error::KindMismatch(format!(
                    "context descriptor '{}' cannot take a single-state",
                    handle
                )));
            }
            None
        } else {
            let state = match state {
                Some(state) => {
                    if state.payload.descriptor_kind() != kind {
                        return Err(Error::KindMismatch(format!(
                            "state kind does not match new descriptor '{}'",
                            handle
                        )));
                    }
                    if state.descriptor_handle != handle {
                        return Err(Error::KindMismatch(format!(
                            "state handle '{}' does not reference '{}'",
                            state.descriptor_handle, handle
                        )));
                    }
                    state
                }
                None => State::new(
                    &handle,
                    StatePayload::default_for(kind).ok_or_else(|| {
                        Error::KindMismatch(format!("no default state for '{}'", handle))
                    })?,
                ),
            };
            Some(state)
        };
        self.descriptor_ops
            .push((handle, DescriptorOp::Create { descriptor, state }));
        Ok(())
    }

    /// Stage removal of a descriptor and (at commit time) its subtree.
    pub fn remove(&mut self, handle: &str) -> Result<()> {
        self.require_kind(TransactionKind::Descriptor)?;
        if self.base.get_descriptor(handle).is_none() {
            return Err(Error::UnknownHandle(handle.to_string()));
        }
        self.descriptor_ops
            .push((handle.to_string(), DescriptorOp::Delete));
        Ok(())
    }

    /// Mutable proxy of an existing context state (context transactions).
    pub fn write_context_state(&mut self, handle: &str) -> Result<&mut ContextState> {
        self.require_kind(TransactionKind::Context)?;
        if let Some(index) = self.contexts.iter().position(|(h, _)| h == handle) {
            return Ok(&mut self.contexts[index].1);
        }
        let current = self
            .base
            .get_context_state(handle)
            .ok_or_else(|| Error::UnknownHandle(handle.to_string()))?;
        let mut clone = ContextState::clone(current);
        clone.invalidate_source();
        self.contexts.push((handle.to_string(), clone));
        Ok(&mut self.contexts.last_mut().expect("just pushed").1)
    }

    /// Stage a fresh context state (context transactions).
    pub fn insert_context_state(&mut self, state: ContextState) -> Result<()> {
        self.require_kind(TransactionKind::Context)?;
        let handle = state.handle.clone();
        if self.base.get_context_state(&handle).is_some()
            || self.contexts.iter().any(|(h, _)| *h == handle)
        {
            return Err(Error::DuplicateHandle(handle));
        }
        self.contexts.push((handle, state));
        Ok(())
    }

    /// Stage a waveform sample bundle (waveform transactions).
    pub fn set_samples(&mut self, handle: &str, value: SampleArrayValue) -> Result<()> {
        self.require_kind(TransactionKind::Waveform)?;
        let state = self.write_state(handle)?;
        match &mut state.payload {
            StatePayload::RealTimeSampleArrayMetric { value: slot, .. } => {
                *slot = Some(value);
                Ok(())
            }
            _ => Err(Error::KindMismatch(format!(
                "'{}' is not a waveform state",
                handle
            ))),
        }
    }

    fn require_kind(&self, required: TransactionKind) -> Result<()> {
        if self.kind == required {
            Ok(())
        } else {
            Err(Error::KindMismatch(format!(
                "operation requires a {:?} transaction, this one is {:?}",
                required, self.kind
            )))
        }
    }

    /// Validate and commit. On success the MDIB version advances by one and
    /// the change-set reaches every registered observer, in commit order.
    /// On failure nothing is installed and nobody is notified. A transaction
    /// with no staged edits is a no-op and does not bump the version.
    pub fn commit(self) -> Result<u64> {
        let Transaction {
            mdib,
            kind,
            base: _,
            descriptor_ops,
            states,
            contexts,
        } = self;

        if descriptor_ops.is_empty() && states.is_empty() && contexts.is_empty() {
            log::debug!("[mdib] empty {:?} transaction, skipping commit", kind);
            return Ok(mdib.mdib_version());
        }

        let guard = mdib.lock_commit();
        let current = mdib.snapshot();
        let next_version = current.mdib_version + 1;
        let mut builder = SnapshotBuilder::from(&current);
        let mut change = ChangeSet::new(next_version, current.sequence_id, current.instance_id);

        // Phase 1: descriptor tree edits, in staged order.
        let mut updated_without_state: Vec<Handle> = Vec::new();
        for (handle, op) in descriptor_ops {
            match op {
                DescriptorOp::Create { descriptor, state } => {
                    if builder.base().get_descriptor(&handle).is_some() {
                        return Err(Error::DuplicateHandle(handle));
                    }
                    if let Some(parent) = &descriptor.parent {
                        if builder.base().get_descriptor(parent).is_none() {
                            return Err(Error::UnknownHandle(format!(
                                "parent '{}' of new '{}'",
                                parent, handle
                            )));
                        }
                    }
                    let descriptor = Arc::new(descriptor);
                    builder.put_descriptor(Arc::clone(&descriptor));
                    change.descriptors.created.push(Arc::clone(&descriptor));
                    if let Some(mut state) = state {
                        state.descriptor_version = descriptor.version;
                        let state = Arc::new(state);
                        builder.put_state(Arc::clone(&state));
                        change.descriptors.states.push(state);
                    }
                }
                DescriptorOp::Update(mut descriptor) => {
                    let committed = builder.base().get_descriptor(&handle).ok_or_else(|| {
                        Error::StaleTransaction(format!("descriptor '{}' vanished", handle))
                    })?;
                    descriptor.version = committed.version + 1;
                    let descriptor = Arc::new(descriptor);
                    builder.put_descriptor(Arc::clone(&descriptor));
                    change.descriptors.updated.push(descriptor);
                    if !states.iter().any(|(h, _)| *h == handle) {
                        updated_without_state.push(handle);
                    }
                }
                DescriptorOp::Delete => {
                    if builder.base().get_descriptor(&handle).is_none() {
                        return Err(Error::StaleTransaction(format!(
                            "descriptor '{}' vanished",
                            handle
                        )));
                    }
                    // Children first so every removal is a leaf removal.
                    let mut subtree = builder.base().subtree(&handle);
                    subtree.reverse();
                    for victim in subtree {
                        builder.remove_descriptor(&victim);
                        change.descriptors.deleted.push(victim);
                    }
                }
            }
        }

        // Phase 2: staged single-states.
        for (handle, mut state) in states {
            let descriptor = builder.base().get_descriptor(&handle).ok_or_else(|| {
                Error::StaleTransaction(format!("descriptor '{}' vanished", handle))
            })?;
            if state.payload.descriptor_kind() != descriptor.kind() {
                return Err(Error::KindMismatch(format!(
                    "state kind does not match descriptor '{}'",
                    handle
                )));
            }
            state.version = builder
                .base()
                .get_state(&handle)
                .map_or(0, |committed| committed.version + 1);
            state.descriptor_version = descriptor.version;
            let state = Arc::new(state);
            builder.put_state(Arc::clone(&state));
            match kind {
                TransactionKind::Descriptor => change.descriptors.states.push(state),
                _ => match state.kind() {
                    StateKind::Metric => change.metric_states.push(state),
                    StateKind::Waveform => change.waveform_states.push(state),
                    StateKind::Alert => change.alert_states.push(state),
                    StateKind::Component => change.component_states.push(state),
                    StateKind::Operational => change.operational_states.push(state),
                },
            }
        }

        // Phase 3: descriptor updates re-version their untouched state.
        for handle in updated_without_state {
            let descriptor = match builder.base().get_descriptor(&handle) {
                Some(descriptor) => Arc::clone(descriptor),
                None => continue, // deleted later in the same transaction
            };
            let Some(committed) = builder.base().get_state(&handle) else {
                continue; // multi-state descriptor
            };
            let mut state = State::clone(committed);
            state.invalidate_source();
            state.version += 1;
            state.descriptor_version = descriptor.version;
            let state = Arc::new(state);
            builder.put_state(Arc::clone(&state));
            change.descriptors.states.push(state);
        }

        // Phase 4: context states, with association bookkeeping.
        for (handle, mut state) in contexts {
            let descriptor = builder
                .base()
                .get_descriptor(&state.descriptor_handle)
                .ok_or_else(|| {
                    Error::StaleTransaction(format!(
                        "context descriptor '{}' vanished",
                        state.descriptor_handle
                    ))
                })?;
            if state.kind().descriptor_kind() != descriptor.kind() {
                return Err(Error::KindMismatch(format!(
                    "context state '{}' does not match descriptor kind",
                    handle
                )));
            }

            let previous = builder.base().get_context_state(&handle).cloned();
            state.version = previous.as_ref().map_or(0, |p| p.version + 1);
            state.descriptor_version = descriptor.version;

            let was_associated = previous.as_ref().is_some_and(|p| p.is_associated());
            if state.is_associated() && !was_associated {
                state.binding_mdib_version = Some(next_version);
                if state.kind().singleton_association() {
                    // Singleton rule: displace any currently associated
                    // sibling of the same descriptor.
                    for sibling in builder.base().context_states_of(&state.descriptor_handle) {
                        if sibling.handle != handle && sibling.is_associated() {
                            let mut displaced = ContextState::clone(&sibling);
                            displaced.invalidate_source();
                            displaced.association = ContextAssociation::Disassociated;
                            displaced.unbinding_mdib_version = Some(next_version);
                            displaced.version += 1;
                            let displaced = Arc::new(displaced);
                            builder.put_context_state(Arc::clone(&displaced));
                            change.context_states.push(displaced);
                        }
                    }
                }
            } else if !state.is_associated() && was_associated {
                state.unbinding_mdib_version = Some(next_version);
            }

            let state = Arc::new(state);
            builder.put_context_state(Arc::clone(&state));
            change.context_states.push(state);
        }

        let snapshot = builder.build(next_version, current.sequence_id, current.instance_id);
        debug_assert!(snapshot.validate().is_ok());
        mdib.install(&guard, snapshot, Some(&change));
        log::debug!(
            "[mdib] committed {:?} transaction -> version {}",
            kind,
            next_version
        );
        Ok(next_version)
    }
}
