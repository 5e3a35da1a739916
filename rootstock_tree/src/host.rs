// Copyright 2025 the Rootstock Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The hosting context a tree operates in.

/// The ambient hosting environment of one [`ControlTree`](crate::ControlTree).
///
/// `parking` is the off-screen surface that hosts any peer whose logical
/// parent cannot host it right now: the control is an orphan, or its parent
/// has no peer yet. Parked peers are fully constructed and keep their state;
/// they are physically re-attached once a real surface becomes available.
///
/// The context is owned by the tree it serves, so independent trees (and
/// tests) each carry their own parking surface rather than sharing a global
/// one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostContext<S> {
    parking: S,
}

impl<S> HostContext<S> {
    /// Creates a context parking homeless peers on `parking`.
    #[must_use]
    pub fn new(parking: S) -> Self {
        Self { parking }
    }

    /// The parking surface.
    #[must_use]
    pub fn parking(&self) -> &S {
        &self.parking
    }
}
