// Copyright 2025 the Rootstock Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Capability interfaces the toolkit supplies to the lifecycle core.
//!
//! The original design reached these primitives through deep inheritance
//! from a common native-window base class; here they are two small traits.
//! [`Toolkit`] carries what is uniform across the whole toolkit, [`Widget`]
//! what differs per concrete widget type. The lifecycle core never touches
//! the native API directly.

use core::hash::Hash;

use crate::error::PeerCreationError;

/// Toolkit-wide primitives, shared by every widget type.
///
/// `Peer` is the native handle a logical control wraps; `Surface` is a
/// handle to something peers can be physically attached to. Dropping a
/// `Peer` value never destroys the native object — destruction is only ever
/// the explicit [`destroy_peer`](Self::destroy_peer) call. That is what
/// makes the "do not destroy" mode of
/// [`PeerLifecycle`](crate::PeerLifecycle) a plain skip: the handle is
/// dropped, the native object lives on under whoever hosts it.
pub trait Toolkit {
    /// The native peer handle.
    type Peer: 'static;
    /// A handle to a peer-hosting surface.
    type Surface: Clone + PartialEq;
    /// A copyable tag identifying a live peer, usable as a map key.
    type PeerTag: Copy + Eq + Hash + 'static;

    /// Destroys the native object behind `peer`.
    ///
    /// Must not destroy the peers of the control's logical children; the
    /// caller re-hosts or destroys those explicitly beforehand.
    fn destroy_peer(&mut self, peer: Self::Peer);

    /// Physically re-attaches `peer` under `surface`, preserving the peer's
    /// identity.
    fn reparent(&mut self, peer: &mut Self::Peer, surface: &Self::Surface);

    /// Returns the surface a live peer offers to hosted children, or `None`
    /// if this peer cannot host.
    fn surface_of(&mut self, peer: &Self::Peer) -> Option<Self::Surface>;

    /// Returns the identifying tag of a live peer.
    fn tag_of(&self, peer: &Self::Peer) -> Self::PeerTag;
}

/// Per-widget-type capability: how to construct this widget's peer and wire
/// its event subscriptions.
///
/// The notification hooks default to no-ops; concrete widgets override the
/// ones they care about (the original expressed these as virtual
/// `OnWxWindowCreated`-style methods).
pub trait Widget<T: Toolkit> {
    /// Constructs the native peer on the given hosting surface.
    ///
    /// A failure here is final from the lifecycle's point of view: the
    /// control stays peerless and the error propagates to whoever asked for
    /// materialization.
    fn create_peer(&mut self, tk: &mut T, surface: &T::Surface)
    -> Result<T::Peer, PeerCreationError>;

    /// Registers every event subscription this widget type requires against
    /// `peer`.
    ///
    /// Handlers must route events to the logical control, not capture the
    /// peer instance; that is what lets the same control receive events
    /// uniformly across peer recreation.
    fn bind(&mut self, tk: &mut T, peer: &mut T::Peer);

    /// Removes exactly the subscriptions [`bind`](Self::bind) added.
    ///
    /// Runs before the peer is destroyed, so the toolkit can never invoke a
    /// callback whose owner back-reference has gone stale.
    fn unbind(&mut self, tk: &mut T, peer: &mut T::Peer);

    /// The peer was created, bound, and all buffered properties replayed.
    fn peer_created(&mut self, tk: &mut T) {
        let _ = tk;
    }

    /// The peer is about to be unbound and destroyed.
    fn peer_destroying(&mut self, tk: &mut T) {
        let _ = tk;
    }

    /// The peer is gone. `recreating` distinguishes "destroyed for good"
    /// from "destroyed as part of a recreate".
    fn peer_destroyed(&mut self, tk: &mut T, recreating: bool) {
        let _ = (tk, recreating);
    }

    /// This control's own logical parent changed.
    fn parent_changed(&mut self, tk: &mut T) {
        let _ = tk;
    }

    /// Some ancestor's parent changed (the control's own parent did not).
    ///
    /// Lets controls relying on ancestor-derived state (inherited theme,
    /// effective visibility) react to moves higher up the tree.
    fn ancestor_parent_changed(&mut self, tk: &mut T) {
        let _ = tk;
    }
}
