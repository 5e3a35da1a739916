// Copyright 2025 the Rootstock Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Rootstock Deferred: property cells that survive native peer swaps.
//!
//! A logical control in a native-toolkit abstraction layer does not always
//! have a native peer object behind it: the peer is created lazily, and it may
//! be destroyed and rebuilt when a configuration change cannot be expressed as
//! an in-place mutation on the native object. This crate provides the storage
//! primitive that makes those swaps invisible to callers.
//!
//! ## Core Concepts
//!
//! ### Live vs. cached storage
//!
//! A [`DeferredCell`] holds one logical property. Its value lives in exactly
//! one of two places at any time:
//!
//! - **Live** — the native peer is the source of truth; reads and writes go
//!   straight through the cell's `retrieve`/`apply` callbacks.
//! - **Cached** — no peer exists; reads and writes use a local slot.
//!
//! The storage mode is selected by the caller on every access: passing
//! `Some(peer)` means live, `None` means cached. The component that owns the
//! peer handle (see `rootstock_peer`) supplies `Some` exactly when a peer is
//! live and synchronization is not suspended.
//!
//! ### Flush and refresh
//!
//! Switching storage mode must not lose the last externally observed value.
//! That is guaranteed by two transition hooks, each used exactly once per
//! peer lifetime:
//!
//! - [`DeferredCell::flush`] — push the cached value onto a freshly created
//!   peer.
//! - [`DeferredCell::refresh`] — pull the peer's final value into the cache
//!   just before the peer is destroyed.
//!
//! [`DeferredFlags`] is the same mechanism specialized for a set of
//! independent boolean flags sharing one storage word, and [`DeferredGroup`]
//! is an ordered collection of cells and flag sets that can be bulk-flushed
//! ([`DeferredGroup::apply_all`]) or bulk-refreshed
//! ([`DeferredGroup::receive_all`]).
//!
//! ## Quick Start
//!
//! ```rust
//! use rootstock_deferred::{DeferredCell, DeferredGroup};
//!
//! // A stand-in for a native peer object.
//! struct Peer {
//!     title: &'static str,
//! }
//!
//! let mut group: DeferredGroup<Peer> = DeferredGroup::new();
//! let title = group.add_cell(DeferredCell::new(
//!     "",
//!     |peer: &Peer| peer.title,
//!     |peer: &mut Peer, value: &&'static str| peer.title = *value,
//! ));
//!
//! // No peer yet: the write lands in the cache.
//! group.set(title, None, "hello");
//! assert_eq!(group.get(title, None), "hello");
//!
//! // Peer materializes: replay every buffered property onto it.
//! let mut peer = Peer { title: "" };
//! group.apply_all(&mut peer);
//! assert_eq!(peer.title, "hello");
//!
//! // With a live peer, reads come from the peer itself.
//! peer.title = "changed by the toolkit";
//! assert_eq!(group.get(title, Some(&peer)), "changed by the toolkit");
//! ```
//!
//! ## Ordering
//!
//! [`DeferredGroup::apply_all`] and [`DeferredGroup::receive_all`] visit
//! slots in registration order. Ordering matters when one property's
//! application has side effects observable by another (geometry vs.
//! visibility is the classic case); registration order is the single
//! tie-break rule, so concrete controls should document theirs.
//!
//! ## `no_std` Support
//!
//! This crate is `no_std` and uses `alloc`. It does not depend on `std`.

#![no_std]

extern crate alloc;

mod cell;
mod flags;
mod group;

pub use cell::DeferredCell;
pub use flags::{DeferredFlags, Flag};
pub use group::{CellKey, DeferredGroup, FlagsKey};
