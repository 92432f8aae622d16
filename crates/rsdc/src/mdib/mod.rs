// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # MDIB engine
//!
//! The in-memory, versioned medical data model: an indexed store with
//! lock-free snapshots for readers, transactional mutation through a single
//! commit lock, and ordered change-set emission to registered observers.
//!
//! ```text
//! readers ----> ArcSwap<MdibSnapshot>  (atomic borrow, never blocks)
//!                      ^
//! Transaction::commit -+-- commit lock: validate -> bump versions ->
//!                          rebuild indices -> swap -> notify observers
//! ```
//!
//! `mdib_version` advances by exactly one per committed transaction; report
//! emission order equals commit order equals version order.

mod changeset;
/// BICEPS message bodies carrying MDIB content (gets and reports).
pub mod messages;
mod store;
mod transaction;

pub use changeset::{ChangeSet, DescriptorChanges};
pub use messages::{InvocationReportPart, Report};
pub use store::{ChangeObserver, Mdib, MdibSnapshot};
pub use transaction::{Transaction, TransactionKind};

pub(crate) use store::SnapshotBuilder;
