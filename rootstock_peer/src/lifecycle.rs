// Copyright 2025 the Rootstock Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The peer lifecycle state machine.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt;
use core::mem;

use rootstock_deferred::DeferredGroup;

use crate::binder::SubscriptionRebinder;
use crate::error::LifecycleError;
use crate::kit::{Toolkit, Widget};

/// An action queued by [`PeerLifecycle::schedule_recreate`] during an init
/// bracket.
///
/// Actions capture no reference to the control; they receive the toolkit and
/// the current peer (if one exists) from the drain site, so a queued action
/// cannot outlive the object it acts on.
pub type PostInitAction<T> = Box<dyn FnOnce(&mut T, Option<&mut <T as Toolkit>::Peer>)>;

/// Externally observable lifecycle states.
///
/// `Creating` and `Destroying` are transient: every operation here runs to
/// completion synchronously, so outside a call frame a control is always
/// either `NoPeer` or `Live`. The transient states are visible only to code
/// invoked from inside a transition (widget hooks, property callbacks).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PeerState {
    /// No native peer exists.
    NoPeer,
    /// The peer is being constructed, bound, and replayed into.
    Creating,
    /// A native peer exists and is the source of truth for properties.
    Live,
    /// The peer is being captured, unbound, and torn down.
    Destroying,
}

/// Whether a destroy captures final peer state into the property cache.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DestroyMode {
    /// Capture live values first so a later recreation reproduces them.
    Capture,
    /// The control itself is going away; capturing state is pointless and
    /// skipped.
    Final,
}

bitflags::bitflags! {
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    struct LifecycleFlags: u8 {
        /// Inside `ensure`, from construction through property replay.
        const CREATING         = 0b0000_0001;
        /// Inside `destroy`, from capture through toolkit teardown.
        const DESTROYING       = 0b0000_0010;
        /// Inside a `begin_init`/`end_init` bracket.
        const IN_INIT          = 0b0000_0100;
        /// A recreate was requested while batched or suppressed.
        const RECREATE_PENDING = 0b0000_1000;
        /// Drop the peer handle on destroy instead of calling the toolkit
        /// destructor (the peer is hosted somewhere that destroys it).
        const DO_NOT_DESTROY   = 0b0001_0000;
    }
}

enum Slot<P> {
    Vacant,
    Live(P),
}

/// Owns a control's optional native peer and drives every transition on it.
///
/// The lifecycle does not know the toolkit or the widget; both are passed
/// into each operation by the caller (typically the control tree), along
/// with the control's [`DeferredGroup`] and [`SubscriptionRebinder`]. That
/// keeps a control's pieces independently borrowable and keeps this type a
/// pure state machine.
///
/// The ordering contract around the deferred cache:
///
/// - `ensure`: create → bind → live → `apply_all` (replay buffered values).
/// - `destroy`: `receive_all` (capture final values) → unbind → toolkit
///   destroy.
/// - `recreate`: destroy with capture, then ensure — so the rebuilt peer
///   reproduces the last externally observed state.
pub struct PeerLifecycle<T: Toolkit> {
    slot: Slot<T::Peer>,
    flags: LifecycleFlags,
    /// Recreate-suppression bracket depth (`begin_ignore_recreate`).
    suppress_recreate: u32,
    /// Depth of the bracket silencing the recreate warning.
    recreate_warn_disabled: u32,
    /// Non-zero while a destroy is part of a recreate rather than final.
    recreating: u32,
    post_init: Vec<PostInitAction<T>>,
}

impl<T: Toolkit> PeerLifecycle<T> {
    /// Creates a lifecycle in the `NoPeer` state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slot: Slot::Vacant,
            flags: LifecycleFlags::empty(),
            suppress_recreate: 0,
            recreate_warn_disabled: 0,
            recreating: 0,
            post_init: Vec::new(),
        }
    }

    /// Returns the current state; see [`PeerState`] for observability notes.
    #[must_use]
    pub fn state(&self) -> PeerState {
        if matches!(self.slot, Slot::Live(_)) {
            PeerState::Live
        } else if self.flags.contains(LifecycleFlags::CREATING) {
            PeerState::Creating
        } else if self.flags.contains(LifecycleFlags::DESTROYING) {
            PeerState::Destroying
        } else {
            PeerState::NoPeer
        }
    }

    /// Returns `true` if a native peer exists.
    #[must_use]
    #[inline]
    pub fn is_live(&self) -> bool {
        matches!(self.slot, Slot::Live(_))
    }

    /// Borrows the peer, if live.
    #[must_use]
    pub fn peer(&self) -> Option<&T::Peer> {
        match &self.slot {
            Slot::Live(peer) => Some(peer),
            Slot::Vacant => None,
        }
    }

    /// Mutably borrows the peer, if live.
    pub fn peer_mut(&mut self) -> Option<&mut T::Peer> {
        match &mut self.slot {
            Slot::Live(peer) => Some(peer),
            Slot::Vacant => None,
        }
    }

    /// Returns `true` while the peer is mid-creation; widgets use this to
    /// ignore toolkit callbacks fired by construction itself.
    #[must_use]
    #[inline]
    pub fn events_suspended(&self) -> bool {
        self.flags.contains(LifecycleFlags::CREATING)
    }

    /// Returns `true` while a destroy is part of a recreate.
    #[must_use]
    #[inline]
    pub fn is_recreating(&self) -> bool {
        self.recreating > 0
    }

    /// Returns `true` inside a `begin_init`/`end_init` bracket.
    #[must_use]
    #[inline]
    pub fn init_active(&self) -> bool {
        self.flags.contains(LifecycleFlags::IN_INIT)
    }

    /// Returns `true` inside a recreate-suppression bracket.
    #[must_use]
    #[inline]
    pub fn is_suppressed(&self) -> bool {
        self.suppress_recreate > 0
    }

    /// Current nesting depth of the recreate-suppression bracket.
    ///
    /// Lets orchestrating callers predict whether the next
    /// [`end_ignore_recreate`](Self::end_ignore_recreate) closes the
    /// outermost bracket and may therefore rebuild the peer.
    #[must_use]
    #[inline]
    pub fn suppress_depth(&self) -> u32 {
        self.suppress_recreate
    }

    /// Returns `true` if a recreate was requested while batched or
    /// suppressed and has not run yet.
    #[must_use]
    #[inline]
    pub fn recreate_pending(&self) -> bool {
        self.flags.contains(LifecycleFlags::RECREATE_PENDING)
    }

    /// Marks the peer as hosted by something that will destroy it itself;
    /// `destroy` then drops the handle without calling the toolkit.
    pub fn set_do_not_destroy(&mut self, value: bool) {
        self.flags.set(LifecycleFlags::DO_NOT_DESTROY, value);
    }

    /// Returns the do-not-destroy mark.
    #[must_use]
    pub fn do_not_destroy(&self) -> bool {
        self.flags.contains(LifecycleFlags::DO_NOT_DESTROY)
    }

    /// Materializes the peer if it does not exist yet.
    ///
    /// On `NoPeer`: constructs the peer on `surface`, binds subscriptions,
    /// transitions to `Live`, replays every buffered property
    /// ([`DeferredGroup::apply_all`]), then notifies the widget. Already
    /// `Live`: no side effects.
    ///
    /// Construction failure leaves the state at `NoPeer` and propagates; the
    /// caller may retry later, the lifecycle itself never does.
    pub fn ensure(
        &mut self,
        tk: &mut T,
        widget: &mut dyn Widget<T>,
        surface: &T::Surface,
        props: &mut DeferredGroup<T::Peer>,
        binder: &mut SubscriptionRebinder,
    ) -> Result<(), LifecycleError> {
        if self.is_live() {
            return Ok(());
        }
        self.flags.insert(LifecycleFlags::CREATING);
        let mut peer = match widget.create_peer(tk, surface) {
            Ok(peer) => peer,
            Err(e) => {
                self.flags.remove(LifecycleFlags::CREATING);
                return Err(e.into());
            }
        };
        binder.bind(widget, tk, &mut peer);
        self.slot = Slot::Live(peer);
        if let Slot::Live(peer) = &mut self.slot {
            props.apply_all(peer);
        }
        widget.peer_created(tk);
        self.flags.remove(LifecycleFlags::CREATING);
        Ok(())
    }

    /// Tears the peer down. No-op on `NoPeer`.
    ///
    /// With [`DestroyMode::Capture`], live property values are pulled into
    /// the cache first ([`DeferredGroup::receive_all`]) so a later
    /// recreation reproduces them; [`DestroyMode::Final`] skips the capture.
    /// Subscriptions are unbound before the toolkit destructor runs.
    pub fn destroy(
        &mut self,
        tk: &mut T,
        widget: &mut dyn Widget<T>,
        props: &mut DeferredGroup<T::Peer>,
        binder: &mut SubscriptionRebinder,
        mode: DestroyMode,
    ) {
        let Slot::Live(mut peer) = mem::replace(&mut self.slot, Slot::Vacant) else {
            return;
        };
        self.flags.insert(LifecycleFlags::DESTROYING);
        if mode == DestroyMode::Capture {
            props.receive_all(&peer);
        }
        widget.peer_destroying(tk);
        binder.unbind(widget, tk, &mut peer);
        if self.flags.contains(LifecycleFlags::DO_NOT_DESTROY) {
            drop(peer);
        } else {
            tk.destroy_peer(peer);
        }
        self.flags.remove(LifecycleFlags::DESTROYING);
        widget.peer_destroyed(tk, self.recreating > 0);
    }

    /// Destroys and rebuilds the peer so configuration baked into peer
    /// construction takes effect.
    ///
    /// Inside an init bracket or a suppression bracket this only records the
    /// request and returns `Ok(false)`; on `NoPeer` it is a no-op. Otherwise
    /// the peer's state is captured, the peer destroyed and recreated on
    /// `surface`, and the cache replayed; returns `Ok(true)`.
    pub fn recreate_if_needed(
        &mut self,
        tk: &mut T,
        widget: &mut dyn Widget<T>,
        surface: &T::Surface,
        props: &mut DeferredGroup<T::Peer>,
        binder: &mut SubscriptionRebinder,
    ) -> Result<bool, LifecycleError> {
        if self.flags.contains(LifecycleFlags::IN_INIT) || self.suppress_recreate > 0 {
            self.flags.insert(LifecycleFlags::RECREATE_PENDING);
            return Ok(false);
        }
        if !self.is_live() {
            return Ok(false);
        }
        self.recreating += 1;
        self.destroy(tk, widget, props, binder, DestroyMode::Capture);
        let result = self.ensure(tk, widget, surface, props, binder);
        self.recreating -= 1;
        if result.is_ok() && self.recreate_warn_disabled == 0 {
            log::warn!("native peer recreated to apply a construction-time change");
        }
        result.map(|()| true)
    }

    /// Opens the init transaction bracket.
    ///
    /// Recreates requested inside the bracket are coalesced into at most one
    /// rebuild at [`end_init`](Self::end_init). Nesting is rejected.
    pub fn begin_init(&mut self) -> Result<(), LifecycleError> {
        if self.flags.contains(LifecycleFlags::IN_INIT) {
            return Err(LifecycleError::InitNested);
        }
        self.flags.insert(LifecycleFlags::IN_INIT);
        Ok(())
    }

    /// Closes the init bracket: performs the one coalesced recreate if any
    /// was requested, then drains queued post-init actions in FIFO order.
    ///
    /// Returns whether a recreate actually ran.
    pub fn end_init(
        &mut self,
        tk: &mut T,
        widget: &mut dyn Widget<T>,
        surface: &T::Surface,
        props: &mut DeferredGroup<T::Peer>,
        binder: &mut SubscriptionRebinder,
    ) -> Result<bool, LifecycleError> {
        if !self.flags.contains(LifecycleFlags::IN_INIT) {
            return Err(LifecycleError::InitNotActive);
        }
        self.flags.remove(LifecycleFlags::IN_INIT);
        let mut recreated = false;
        if self.flags.contains(LifecycleFlags::RECREATE_PENDING) && self.suppress_recreate == 0 {
            self.flags.remove(LifecycleFlags::RECREATE_PENDING);
            recreated = self.recreate_if_needed(tk, widget, surface, props, binder)?;
        }
        let actions = mem::take(&mut self.post_init);
        for action in actions {
            let peer = match &mut self.slot {
                Slot::Live(peer) => Some(peer),
                Slot::Vacant => None,
            };
            action(tk, peer);
        }
        Ok(recreated)
    }

    /// Opens a recreate-suppression bracket; nests freely.
    pub fn begin_ignore_recreate(&mut self) {
        self.suppress_recreate += 1;
    }

    /// Closes a suppression bracket. When the outermost bracket closes and a
    /// recreate was requested inside, a single coalesced recreate runs.
    ///
    /// Returns whether a recreate actually ran.
    pub fn end_ignore_recreate(
        &mut self,
        tk: &mut T,
        widget: &mut dyn Widget<T>,
        surface: &T::Surface,
        props: &mut DeferredGroup<T::Peer>,
        binder: &mut SubscriptionRebinder,
    ) -> Result<bool, LifecycleError> {
        if self.suppress_recreate == 0 {
            return Err(LifecycleError::IgnoreRecreateNotActive);
        }
        self.suppress_recreate -= 1;
        if self.suppress_recreate == 0
            && self.flags.contains(LifecycleFlags::RECREATE_PENDING)
            && !self.flags.contains(LifecycleFlags::IN_INIT)
        {
            self.flags.remove(LifecycleFlags::RECREATE_PENDING);
            return self.recreate_if_needed(tk, widget, surface, props, binder);
        }
        Ok(false)
    }

    /// Requests a recreate and an action to run once the peer exists again.
    ///
    /// Outside an init bracket: recreates immediately (subject to
    /// suppression) and runs `action` right away. Inside: marks the recreate
    /// pending and queues `action` behind the bracket, after the rebuild.
    ///
    /// Returns whether a recreate ran now.
    pub fn schedule_recreate(
        &mut self,
        tk: &mut T,
        widget: &mut dyn Widget<T>,
        surface: &T::Surface,
        props: &mut DeferredGroup<T::Peer>,
        binder: &mut SubscriptionRebinder,
        action: PostInitAction<T>,
    ) -> Result<bool, LifecycleError> {
        if self.flags.contains(LifecycleFlags::IN_INIT) {
            self.flags.insert(LifecycleFlags::RECREATE_PENDING);
            self.post_init.push(action);
            return Ok(false);
        }
        let recreated = self.recreate_if_needed(tk, widget, surface, props, binder)?;
        let peer = match &mut self.slot {
            Slot::Live(peer) => Some(peer),
            Slot::Vacant => None,
        };
        action(tk, peer);
        Ok(recreated)
    }

    /// Silences the recreate warning for a region where frequent rebuilds
    /// are expected and accepted.
    pub fn disable_recreate_warning(&mut self) {
        self.recreate_warn_disabled += 1;
    }

    /// Re-enables the recreate warning; pairs with
    /// [`disable_recreate_warning`](Self::disable_recreate_warning).
    pub fn enable_recreate_warning(&mut self) {
        debug_assert!(
            self.recreate_warn_disabled > 0,
            "enable_recreate_warning without a matching disable"
        );
        self.recreate_warn_disabled = self.recreate_warn_disabled.saturating_sub(1);
    }
}

impl<T: Toolkit> Default for PeerLifecycle<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Toolkit> fmt::Debug for PeerLifecycle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerLifecycle")
            .field("state", &self.state())
            .field("suppress_recreate", &self.suppress_recreate)
            .field("recreating", &self.recreating)
            .field("pending_post_init", &self.post_init.len())
            .finish_non_exhaustive()
    }
}
