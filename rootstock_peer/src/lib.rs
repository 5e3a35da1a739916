// Copyright 2025 the Rootstock Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Rootstock Peer: the native-peer lifecycle state machine.
//!
//! A logical control wraps a native toolkit object (its *peer*). The peer is
//! created lazily, and some configuration changes cannot be expressed as
//! in-place mutations on a live peer: the only way to apply them is to
//! destroy the peer and build a new one. This crate owns that protocol.
//!
//! ## Core Concepts
//!
//! ### Capability traits
//!
//! The toolkit is injected through two small interfaces instead of a deep
//! inheritance hierarchy:
//!
//! - [`Toolkit`] — toolkit-wide primitives shared by every widget: destroy a
//!   peer, reparent it, derive the hosting surface a live peer offers to
//!   children, and produce a copyable tag identifying a peer.
//! - [`Widget`] — per concrete widget type: construct the peer on a given
//!   surface, bind and unbind its event subscriptions, plus default-empty
//!   lifecycle notification hooks.
//!
//! ### The lifecycle
//!
//! [`PeerLifecycle`] is a state machine over `NoPeer → Creating → Live →
//! Destroying → NoPeer`, with recreation expressed as destroy-then-create
//! under a marker. It guarantees the deferred-property contract of
//! `rootstock_deferred`: [`DeferredGroup::receive_all`] runs once right
//! before a peer dies, and [`DeferredGroup::apply_all`] runs once right
//! after a peer is born, so property values survive any number of swaps.
//!
//! ### Batching rebuilds
//!
//! Setting N style-affecting properties in a row would naively rebuild the
//! peer N times. Two brackets coalesce that:
//!
//! - [`PeerLifecycle::begin_init`] / [`PeerLifecycle::end_init`] — a
//!   non-reentrant transaction; recreates requested inside it are folded
//!   into at most one rebuild at `end_init`, followed by the queued
//!   post-init actions in FIFO order.
//! - [`PeerLifecycle::begin_ignore_recreate`] /
//!   [`PeerLifecycle::end_ignore_recreate`] — a plain nesting counter for
//!   internal operation sequences that must not rebuild mid-flight.
//!
//! ### Subscription discipline
//!
//! [`SubscriptionRebinder`] re-establishes event subscriptions on every peer
//! swap and guarantees they are torn down before the peer is destroyed:
//! exactly one bind and one unbind per peer instance.
//!
//! ## Errors
//!
//! Failures are precise, typed, and propagated to the immediate caller; the
//! core performs no retries and no swallowing. See [`LifecycleError`]. The
//! only logging this crate emits is a `log::warn!` when a peer is actually
//! recreated, which callers can silence around known-noisy regions with
//! [`PeerLifecycle::disable_recreate_warning`].
//!
//! ## Concurrency
//!
//! Single-threaded by contract: every operation is a bounded, synchronous
//! state transition. Multi-threaded embedders must marshal calls onto the
//! one thread that owns the UI object graph.
//!
//! This crate is `no_std` and uses `alloc`. It does not depend on `std`.
//!
//! [`DeferredGroup::receive_all`]: rootstock_deferred::DeferredGroup::receive_all
//! [`DeferredGroup::apply_all`]: rootstock_deferred::DeferredGroup::apply_all

#![no_std]

extern crate alloc;

mod binder;
mod error;
mod kit;
mod lifecycle;

pub use binder::SubscriptionRebinder;
pub use error::{LifecycleError, PeerCreationError};
pub use kit::{Toolkit, Widget};
pub use lifecycle::{DestroyMode, PeerLifecycle, PeerState, PostInitAction};
