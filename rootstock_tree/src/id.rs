// Copyright 2025 the Rootstock Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Generational control identifiers.

/// Identifier for a control in a [`ControlTree`](crate::ControlTree).
///
/// This is a small, copyable handle that stays stable across updates but
/// becomes invalid when the underlying slot is reused.
/// It consists of a slot index and a generation counter.
///
/// ## Semantics
///
/// - On insert, a fresh slot is allocated with generation `1`.
/// - On remove, the slot is freed; any existing `ControlId` that pointed to
///   that slot is now stale.
/// - On reuse of a freed slot, its generation is incremented, producing a
///   new, distinct `ControlId`.
///
/// ### Liveness
///
/// Use [`ControlTree::is_alive`](crate::ControlTree::is_alive) to check
/// whether a `ControlId` still refers to a live control. Stale `ControlId`s
/// never alias a different live control because the generation must match.
/// Holding an id never keeps the control alive; the tree is the only owner.
///
/// ### Notes
///
/// - The generation increments on slot reuse and never decreases.
/// - `u32` is ample for practical lifetimes; behavior on generation overflow
///   is unspecified.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct ControlId(pub(crate) u32, pub(crate) u32);

impl ControlId {
    pub(crate) const fn new(idx: u32, generation: u32) -> Self {
        Self(idx, generation)
    }

    pub(crate) const fn idx(self) -> usize {
        self.0 as usize
    }

    pub(crate) const fn generation(self) -> u32 {
        self.1
    }
}
