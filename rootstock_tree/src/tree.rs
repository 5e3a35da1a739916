// Copyright 2025 the Rootstock Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The control arena and the orchestration of peers across it.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt;

use hashbrown::HashMap;
use smallvec::SmallVec;

use rootstock_deferred::{CellKey, DeferredGroup, Flag, FlagsKey};
use rootstock_peer::{
    DestroyMode, LifecycleError, PeerLifecycle, PeerState, PostInitAction, SubscriptionRebinder,
    Toolkit, Widget,
};

use crate::host::HostContext;
use crate::id::ControlId;

/// One logical control: its widget capability, lifecycle, deferred
/// properties, subscription bookkeeping, and place in the tree.
///
/// Nodes are owned by the [`ControlTree`] and reached through
/// [`ControlTree::node`] / [`ControlTree::node_mut`].
pub struct ControlNode<T: Toolkit> {
    widget: Box<dyn Widget<T>>,
    lifecycle: PeerLifecycle<T>,
    props: DeferredGroup<T::Peer>,
    binder: SubscriptionRebinder,
    parent: Option<ControlId>,
    children: SmallVec<[ControlId; 4]>,
    /// The surface the live peer is physically attached to. `None` while
    /// there is no peer.
    hosted_on: Option<T::Surface>,
}

impl<T: Toolkit> ControlNode<T> {
    fn new(widget: Box<dyn Widget<T>>, props: DeferredGroup<T::Peer>) -> Self {
        Self {
            widget,
            lifecycle: PeerLifecycle::new(),
            props,
            binder: SubscriptionRebinder::new(),
            parent: None,
            children: SmallVec::new(),
            hosted_on: None,
        }
    }

    /// The peer handle to synchronize properties against right now:
    /// `Some` iff the peer is live and events are not suspended.
    fn sync_peer(&self) -> Option<&T::Peer> {
        if self.lifecycle.events_suspended() {
            None
        } else {
            self.lifecycle.peer()
        }
    }

    /// Reads a deferred property: from the live peer when one exists, from
    /// the cache otherwise.
    pub fn get<V: Clone + 'static>(&self, key: CellKey<V>) -> V {
        self.props.get(key, self.sync_peer())
    }

    /// Writes a deferred property: onto the live peer when one exists, into
    /// the cache otherwise (to be replayed at the next peer birth).
    pub fn set<V: Clone + 'static>(&mut self, key: CellKey<V>, value: V) {
        let peer = if self.lifecycle.events_suspended() {
            None
        } else {
            self.lifecycle.peer_mut()
        };
        self.props.set(key, peer, value);
    }

    /// Reads a deferred flag; see [`get`](Self::get) for routing.
    pub fn get_flag(&self, key: FlagsKey, flag: Flag) -> bool {
        self.props.get_flag(key, self.sync_peer(), flag)
    }

    /// Writes a deferred flag; see [`set`](Self::set) for routing.
    pub fn set_flag(&mut self, key: FlagsKey, flag: Flag, value: bool) {
        let peer = if self.lifecycle.events_suspended() {
            None
        } else {
            self.lifecycle.peer_mut()
        };
        self.props.set_flag(key, peer, flag, value);
    }

    /// The node's lifecycle, for read-only inspection.
    #[must_use]
    pub fn lifecycle(&self) -> &PeerLifecycle<T> {
        &self.lifecycle
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> PeerState {
        self.lifecycle.state()
    }

    /// Returns `true` if a native peer exists.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.lifecycle.is_live()
    }

    /// Borrows the live peer, if any.
    #[must_use]
    pub fn peer(&self) -> Option<&T::Peer> {
        self.lifecycle.peer()
    }

    /// Mutably borrows the live peer, if any.
    pub fn peer_mut(&mut self) -> Option<&mut T::Peer> {
        self.lifecycle.peer_mut()
    }

    /// The surface the live peer is attached to, if any.
    #[must_use]
    pub fn hosted_on(&self) -> Option<&T::Surface> {
        self.hosted_on.as_ref()
    }

    /// The logical parent.
    #[must_use]
    pub fn parent(&self) -> Option<ControlId> {
        self.parent
    }

    /// The logical children, in insertion order.
    #[must_use]
    pub fn children(&self) -> &[ControlId] {
        &self.children
    }

    /// The widget capability, for embedder-side downcasting.
    pub fn widget_mut(&mut self) -> &mut dyn Widget<T> {
        self.widget.as_mut()
    }
}

impl<T: Toolkit> fmt::Debug for ControlNode<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlNode")
            .field("state", &self.lifecycle.state())
            .field("parent", &self.parent)
            .field("children", &self.children)
            .finish_non_exhaustive()
    }
}

struct Slot<T: Toolkit> {
    generation: u32,
    node: Option<ControlNode<T>>,
}

fn node_in<T: Toolkit>(slots: &[Slot<T>], id: ControlId) -> Option<&ControlNode<T>> {
    let slot = slots.get(id.idx())?;
    if slot.generation != id.generation() {
        return None;
    }
    slot.node.as_ref()
}

fn node_in_mut<T: Toolkit>(slots: &mut [Slot<T>], id: ControlId) -> Option<&mut ControlNode<T>> {
    let slot = slots.get_mut(id.idx())?;
    if slot.generation != id.generation() {
        return None;
    }
    slot.node.as_mut()
}

fn expect_node_mut<T: Toolkit>(slots: &mut [Slot<T>], id: ControlId) -> &mut ControlNode<T> {
    node_in_mut(slots, id).expect("stale or removed ControlId")
}

/// A tree of logical controls and the single owner of their nodes.
///
/// The tree is where the pieces meet: it resolves which surface each peer
/// should be hosted on (the logical parent's surface when available, the
/// [`HostContext`] parking surface otherwise), drives the per-node
/// [`PeerLifecycle`]s, physically reparents peers as the logical structure
/// changes, and maintains the peer-tag → control lookup used to route
/// toolkit events back to logical controls.
///
/// Structural mutators panic on stale [`ControlId`]s (documented per
/// method); read accessors return `Option`/empty instead.
pub struct ControlTree<T: Toolkit> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    host: HostContext<T::Surface>,
    by_peer: HashMap<T::PeerTag, ControlId>,
}

impl<T: Toolkit> ControlTree<T> {
    /// Creates an empty tree operating in `host`.
    #[must_use]
    pub fn new(host: HostContext<T::Surface>) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            host,
            by_peer: HashMap::new(),
        }
    }

    /// The hosting context this tree operates in.
    #[must_use]
    pub fn host(&self) -> &HostContext<T::Surface> {
        &self.host
    }

    /// Inserts a new control with no parent and no peer.
    ///
    /// Nothing native is touched; the peer is materialized on first
    /// [`ensure_peer`](Self::ensure_peer).
    pub fn insert(&mut self, widget: Box<dyn Widget<T>>, props: DeferredGroup<T::Peer>) -> ControlId {
        let node = ControlNode::new(widget, props);
        if let Some(idx) = self.free.pop() {
            let slot = &mut self.slots[idx as usize];
            slot.generation += 1;
            slot.node = Some(node);
            ControlId::new(idx, slot.generation)
        } else {
            let idx = u32::try_from(self.slots.len()).expect("control arena slot count overflow");
            self.slots.push(Slot {
                generation: 1,
                node: Some(node),
            });
            ControlId::new(idx, 1)
        }
    }

    /// Returns `true` if `id` refers to a live control.
    #[must_use]
    pub fn is_alive(&self, id: ControlId) -> bool {
        self.slots
            .get(id.idx())
            .is_some_and(|s| s.generation == id.generation() && s.node.is_some())
    }

    /// Number of live controls.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Returns `true` if the tree holds no live controls.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Borrows a node; `None` for stale ids.
    #[must_use]
    pub fn node(&self, id: ControlId) -> Option<&ControlNode<T>> {
        node_in(&self.slots, id)
    }

    /// Mutably borrows a node; `None` for stale ids.
    pub fn node_mut(&mut self, id: ControlId) -> Option<&mut ControlNode<T>> {
        node_in_mut(&mut self.slots, id)
    }

    /// The logical parent of `id`, or `None` for roots and stale ids.
    #[must_use]
    pub fn parent(&self, id: ControlId) -> Option<ControlId> {
        node_in(&self.slots, id).and_then(|n| n.parent)
    }

    /// The logical children of `id`; empty for leaves and stale ids.
    #[must_use]
    pub fn children(&self, id: ControlId) -> &[ControlId] {
        match node_in(&self.slots, id) {
            Some(n) => &n.children,
            None => &[],
        }
    }

    /// Looks up the control currently owning the peer identified by `tag`.
    #[must_use]
    pub fn control_by_peer(&self, tag: T::PeerTag) -> Option<ControlId> {
        self.by_peer.get(&tag).copied().filter(|id| self.is_alive(*id))
    }

    /// Appends `child` to `parent`'s children, notifies the child's widget,
    /// and re-resolves the child's hosting surface.
    ///
    /// A live child peer moves onto the parent's surface when the parent can
    /// host; a peerless child simply records the new parent and materializes
    /// under it later.
    ///
    /// # Panics
    ///
    /// If either id is stale, `child` is already parented, or the attachment
    /// would create a cycle.
    pub fn add_child(&mut self, tk: &mut T, parent: ControlId, child: ControlId) {
        assert!(self.is_alive(parent), "add_child: stale parent id");
        assert!(self.is_alive(child), "add_child: stale child id");
        assert!(parent != child, "add_child: control cannot be its own parent");
        if let Some(cnode) = node_in(&self.slots, child) {
            assert!(cnode.parent.is_none(), "add_child: child is already parented");
        }
        let mut cursor = Some(parent);
        while let Some(cur) = cursor {
            assert!(cur != child, "add_child: attachment would create a cycle");
            cursor = node_in(&self.slots, cur).and_then(|n| n.parent);
        }

        expect_node_mut(&mut self.slots, parent).children.push(child);
        let cnode = expect_node_mut(&mut self.slots, child);
        cnode.parent = Some(parent);
        cnode.widget.parent_changed(tk);
        self.update_hosting_surface(tk, child);
    }

    /// Detaches `child` from `parent`; the orphan's live peer (if any) is
    /// re-parked so it keeps existing without a logical parent.
    ///
    /// # Panics
    ///
    /// If either id is stale or `child` is not a child of `parent`.
    pub fn remove_child(&mut self, tk: &mut T, parent: ControlId, child: ControlId) {
        let pnode = expect_node_mut(&mut self.slots, parent);
        let pos = pnode
            .children
            .iter()
            .position(|&c| c == child)
            .expect("remove_child: not a child of this parent");
        pnode.children.remove(pos);

        let cnode = expect_node_mut(&mut self.slots, child);
        cnode.parent = None;
        cnode.widget.parent_changed(tk);
        self.update_hosting_surface(tk, child);
    }

    /// The surface `id`'s peer should be hosted on right now: the parent's
    /// peer surface if the parent is live and can host, the parking surface
    /// otherwise.
    fn desired_surface(&self, tk: &mut T, id: ControlId) -> T::Surface {
        let resolved = node_in(&self.slots, id)
            .and_then(|n| n.parent)
            .and_then(|pid| node_in(&self.slots, pid))
            .and_then(|p| p.lifecycle.peer())
            .and_then(|peer| tk.surface_of(peer));
        match resolved {
            Some(surface) => surface,
            None => self.host.parking().clone(),
        }
    }

    /// Re-resolves where `id`'s peer should be hosted and physically moves a
    /// live peer there, preserving its identity. Peerless nodes defer; the
    /// surface is consulted when the peer is materialized.
    ///
    /// After a move, every descendant's widget gets
    /// [`ancestor_parent_changed`](Widget::ancestor_parent_changed).
    ///
    /// # Panics
    ///
    /// If `id` is stale.
    pub fn update_hosting_surface(&mut self, tk: &mut T, id: ControlId) {
        let desired = self.desired_surface(tk, id);
        let node = expect_node_mut(&mut self.slots, id);
        if !node.lifecycle.is_live() {
            return;
        }
        if node.hosted_on.as_ref() == Some(&desired) {
            return;
        }
        if let Some(peer) = node.lifecycle.peer_mut() {
            tk.reparent(peer, &desired);
        }
        node.hosted_on = Some(desired);
        self.notify_subtree_ancestor_changed(tk, id);
    }

    fn notify_subtree_ancestor_changed(&mut self, tk: &mut T, id: ControlId) {
        let mut stack: Vec<ControlId> = self.children(id).to_vec();
        while let Some(next) = stack.pop() {
            if let Some(node) = node_in_mut(&mut self.slots, next) {
                node.widget.ancestor_parent_changed(tk);
                stack.extend_from_slice(&node.children);
            }
        }
    }

    /// Materializes `id`'s peer on its currently resolved hosting surface.
    /// No-op when already live.
    ///
    /// On success the peer's tag is registered for
    /// [`control_by_peer`](Self::control_by_peer) and each child's hosting
    /// surface is re-resolved, moving previously parked child peers onto the
    /// fresh surface.
    ///
    /// # Panics
    ///
    /// If `id` is stale.
    pub fn ensure_peer(&mut self, tk: &mut T, id: ControlId) -> Result<(), LifecycleError> {
        let surface = self.desired_surface(tk, id);
        let node = expect_node_mut(&mut self.slots, id);
        if node.lifecycle.is_live() {
            return Ok(());
        }
        node.lifecycle.ensure(
            tk,
            node.widget.as_mut(),
            &surface,
            &mut node.props,
            &mut node.binder,
        )?;
        node.hosted_on = Some(surface);
        if let Some(peer) = node.lifecycle.peer() {
            let tag = tk.tag_of(peer);
            self.by_peer.insert(tag, id);
        }
        let children: SmallVec<[ControlId; 4]> =
            expect_node_mut(&mut self.slots, id).children.clone();
        for child in children {
            self.update_hosting_surface(tk, child);
        }
        Ok(())
    }

    /// Destroys `id`'s peer and every descendant peer, deepest first, so no
    /// peer outlives the surface hosting it. Final property values are
    /// captured into each node's cache. Logical structure is untouched.
    ///
    /// # Panics
    ///
    /// If `id` is stale.
    pub fn destroy_peer(&mut self, tk: &mut T, id: ControlId) {
        assert!(self.is_alive(id), "destroy_peer: stale ControlId");
        self.destroy_subtree_peers(tk, id, DestroyMode::Capture);
    }

    fn destroy_subtree_peers(&mut self, tk: &mut T, id: ControlId, mode: DestroyMode) {
        let children: SmallVec<[ControlId; 4]> = match node_in(&self.slots, id) {
            Some(n) => n.children.clone(),
            None => return,
        };
        for child in children {
            self.destroy_subtree_peers(tk, child, mode);
        }
        let Some(node) = node_in_mut(&mut self.slots, id) else {
            return;
        };
        let tag = node.lifecycle.peer().map(|p| tk.tag_of(p));
        node.lifecycle.destroy(
            tk,
            node.widget.as_mut(),
            &mut node.props,
            &mut node.binder,
            mode,
        );
        node.hosted_on = None;
        if let Some(tag) = tag {
            self.by_peer.remove(&tag);
        }
    }

    fn destroy_child_peers(&mut self, tk: &mut T, id: ControlId) {
        let children: SmallVec<[ControlId; 4]> = match node_in(&self.slots, id) {
            Some(n) => n.children.clone(),
            None => return,
        };
        for child in children {
            self.destroy_subtree_peers(tk, child, DestroyMode::Capture);
        }
    }

    fn peer_tag(&self, tk: &T, id: ControlId) -> Option<T::PeerTag> {
        node_in(&self.slots, id)
            .and_then(|n| n.lifecycle.peer())
            .map(|p| tk.tag_of(p))
    }

    /// Post-recreate bookkeeping: the node sits on `surface` with a new
    /// peer, and the lookup map must forget the old tag.
    fn record_swap(
        &mut self,
        tk: &T,
        id: ControlId,
        surface: &T::Surface,
        old_tag: Option<T::PeerTag>,
    ) {
        if let Some(tag) = old_tag {
            self.by_peer.remove(&tag);
        }
        let new_tag = {
            let node = expect_node_mut(&mut self.slots, id);
            node.hosted_on = Some(surface.clone());
            node.lifecycle.peer().map(|p| tk.tag_of(p))
        };
        if let Some(tag) = new_tag {
            self.by_peer.insert(tag, id);
        }
    }

    /// A rebuild destroyed the old peer but could not construct the new
    /// one: the control is `NoPeer` and retryable, so the destroyed peer's
    /// tag must stop resolving and `hosted_on` must be cleared before the
    /// error propagates.
    fn record_failed_swap(&mut self, id: ControlId, old_tag: Option<T::PeerTag>) {
        if let Some(tag) = old_tag {
            self.by_peer.remove(&tag);
        }
        if let Some(node) = node_in_mut(&mut self.slots, id) {
            node.hosted_on = None;
        }
    }

    /// Rebuilds `id`'s peer so configuration baked into construction takes
    /// effect, honoring the node's init and suppression brackets.
    ///
    /// When the rebuild actually proceeds, descendant peers are destroyed
    /// first (state captured) since their host surface is going away; they
    /// re-materialize lazily under the new surface. Returns whether a
    /// rebuild ran.
    ///
    /// # Panics
    ///
    /// If `id` is stale.
    pub fn recreate_if_needed(
        &mut self,
        tk: &mut T,
        id: ControlId,
    ) -> Result<bool, LifecycleError> {
        let surface = self.desired_surface(tk, id);
        {
            let node = expect_node_mut(&mut self.slots, id);
            if node.lifecycle.init_active() || node.lifecycle.is_suppressed() {
                return node.lifecycle.recreate_if_needed(
                    tk,
                    node.widget.as_mut(),
                    &surface,
                    &mut node.props,
                    &mut node.binder,
                );
            }
            if !node.lifecycle.is_live() {
                return Ok(false);
            }
        }
        self.destroy_child_peers(tk, id);
        let old_tag = self.peer_tag(tk, id);
        let result = {
            let node = expect_node_mut(&mut self.slots, id);
            node.lifecycle.recreate_if_needed(
                tk,
                node.widget.as_mut(),
                &surface,
                &mut node.props,
                &mut node.binder,
            )
        };
        match result {
            Ok(recreated) => {
                if recreated {
                    self.record_swap(tk, id, &surface, old_tag);
                }
                Ok(recreated)
            }
            Err(e) => {
                self.record_failed_swap(id, old_tag);
                Err(e)
            }
        }
    }

    /// Opens the init bracket on `id`; see [`PeerLifecycle::begin_init`].
    ///
    /// # Panics
    ///
    /// If `id` is stale.
    pub fn begin_init(&mut self, id: ControlId) -> Result<(), LifecycleError> {
        expect_node_mut(&mut self.slots, id).lifecycle.begin_init()
    }

    /// Closes the init bracket on `id`, performing the coalesced rebuild if
    /// one was requested (with descendant-peer teardown, as in
    /// [`recreate_if_needed`](Self::recreate_if_needed)) and draining the
    /// node's post-init actions. Returns whether a rebuild ran.
    ///
    /// # Panics
    ///
    /// If `id` is stale.
    pub fn end_init(&mut self, tk: &mut T, id: ControlId) -> Result<bool, LifecycleError> {
        let surface = self.desired_surface(tk, id);
        let will_recreate = {
            let node = expect_node_mut(&mut self.slots, id);
            node.lifecycle.init_active()
                && node.lifecycle.recreate_pending()
                && !node.lifecycle.is_suppressed()
                && node.lifecycle.is_live()
        };
        if will_recreate {
            self.destroy_child_peers(tk, id);
        }
        let old_tag = self.peer_tag(tk, id);
        let result = {
            let node = expect_node_mut(&mut self.slots, id);
            node.lifecycle.end_init(
                tk,
                node.widget.as_mut(),
                &surface,
                &mut node.props,
                &mut node.binder,
            )
        };
        match result {
            Ok(recreated) => {
                if recreated {
                    self.record_swap(tk, id, &surface, old_tag);
                }
                Ok(recreated)
            }
            Err(e) => {
                // Bracket misuse destroys nothing; only a failed rebuild
                // leaves stale bookkeeping behind.
                if will_recreate {
                    self.record_failed_swap(id, old_tag);
                }
                Err(e)
            }
        }
    }

    /// Opens a recreate-suppression bracket on `id`; nests freely.
    ///
    /// # Panics
    ///
    /// If `id` is stale.
    pub fn begin_ignore_recreate(&mut self, id: ControlId) {
        expect_node_mut(&mut self.slots, id)
            .lifecycle
            .begin_ignore_recreate();
    }

    /// Closes a suppression bracket on `id`; the outermost close performs
    /// the coalesced rebuild if one was requested while suppressed. Returns
    /// whether a rebuild ran.
    ///
    /// # Panics
    ///
    /// If `id` is stale.
    pub fn end_ignore_recreate(
        &mut self,
        tk: &mut T,
        id: ControlId,
    ) -> Result<bool, LifecycleError> {
        let surface = self.desired_surface(tk, id);
        let will_recreate = {
            let node = expect_node_mut(&mut self.slots, id);
            node.lifecycle.suppress_depth() == 1
                && node.lifecycle.recreate_pending()
                && !node.lifecycle.init_active()
                && node.lifecycle.is_live()
        };
        if will_recreate {
            self.destroy_child_peers(tk, id);
        }
        let old_tag = self.peer_tag(tk, id);
        let result = {
            let node = expect_node_mut(&mut self.slots, id);
            node.lifecycle.end_ignore_recreate(
                tk,
                node.widget.as_mut(),
                &surface,
                &mut node.props,
                &mut node.binder,
            )
        };
        match result {
            Ok(recreated) => {
                if recreated {
                    self.record_swap(tk, id, &surface, old_tag);
                }
                Ok(recreated)
            }
            Err(e) => {
                if will_recreate {
                    self.record_failed_swap(id, old_tag);
                }
                Err(e)
            }
        }
    }

    /// Requests a rebuild of `id`'s peer plus an action to run once the peer
    /// exists again; immediate outside brackets, queued behind an open init
    /// bracket. Returns whether a rebuild ran now.
    ///
    /// # Panics
    ///
    /// If `id` is stale.
    pub fn schedule_recreate(
        &mut self,
        tk: &mut T,
        id: ControlId,
        action: PostInitAction<T>,
    ) -> Result<bool, LifecycleError> {
        let surface = self.desired_surface(tk, id);
        let will_recreate = {
            let node = expect_node_mut(&mut self.slots, id);
            !node.lifecycle.init_active()
                && !node.lifecycle.is_suppressed()
                && node.lifecycle.is_live()
        };
        if will_recreate {
            self.destroy_child_peers(tk, id);
        }
        let old_tag = self.peer_tag(tk, id);
        let result = {
            let node = expect_node_mut(&mut self.slots, id);
            node.lifecycle.schedule_recreate(
                tk,
                node.widget.as_mut(),
                &surface,
                &mut node.props,
                &mut node.binder,
                action,
            )
        };
        match result {
            Ok(recreated) => {
                if recreated {
                    self.record_swap(tk, id, &surface, old_tag);
                }
                Ok(recreated)
            }
            Err(e) => {
                if will_recreate {
                    self.record_failed_swap(id, old_tag);
                }
                Err(e)
            }
        }
    }

    /// Removes a control, tearing it down exactly once.
    ///
    /// Children survive: each is detached (backref cleared, widget
    /// notified) and its live peer re-parked before this node's peer is
    /// destroyed in final mode (no state capture). The slot is freed, so
    /// `id` and any copies of it become stale. Stale ids are a no-op.
    pub fn remove(&mut self, tk: &mut T, id: ControlId) {
        if !self.is_alive(id) {
            return;
        }
        if let Some(pid) = node_in(&self.slots, id).and_then(|n| n.parent) {
            if let Some(pnode) = node_in_mut(&mut self.slots, pid) {
                pnode.children.retain(|&mut c| c != id);
            }
        }
        let children: SmallVec<[ControlId; 4]> =
            expect_node_mut(&mut self.slots, id).children.clone();
        for child in children {
            let cnode = expect_node_mut(&mut self.slots, child);
            cnode.parent = None;
            cnode.widget.parent_changed(tk);
            self.update_hosting_surface(tk, child);
        }
        let node = expect_node_mut(&mut self.slots, id);
        node.children.clear();
        let tag = node.lifecycle.peer().map(|p| tk.tag_of(p));
        node.lifecycle.destroy(
            tk,
            node.widget.as_mut(),
            &mut node.props,
            &mut node.binder,
            DestroyMode::Final,
        );
        if let Some(tag) = tag {
            self.by_peer.remove(&tag);
        }
        self.slots[id.idx()].node = None;
        self.free.push(id.0);
    }
}

impl<T: Toolkit> fmt::Debug for ControlTree<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlTree")
            .field("len", &self.len())
            .field("slots", &self.slots.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::rc::Rc;
    use alloc::string::{String, ToString};
    use alloc::vec::Vec;
    use core::cell::RefCell;
    use rootstock_deferred::DeferredCell;
    use rootstock_peer::PeerCreationError;

    #[derive(Clone, Debug, PartialEq, Eq)]
    enum Surface {
        Parking,
        Peer(u32),
    }

    struct TestPeer {
        id: u32,
        hosts: bool,
        text: String,
    }

    #[derive(Default)]
    struct TestToolkit {
        next_id: u32,
        destroyed: Vec<u32>,
        reparents: Vec<(u32, Surface)>,
    }

    impl Toolkit for TestToolkit {
        type Peer = TestPeer;
        type Surface = Surface;
        type PeerTag = u32;

        fn destroy_peer(&mut self, peer: TestPeer) {
            self.destroyed.push(peer.id);
        }

        fn reparent(&mut self, peer: &mut TestPeer, surface: &Surface) {
            self.reparents.push((peer.id, surface.clone()));
        }

        fn surface_of(&mut self, peer: &TestPeer) -> Option<Surface> {
            peer.hosts.then(|| Surface::Peer(peer.id))
        }

        fn tag_of(&self, peer: &TestPeer) -> u32 {
            peer.id
        }
    }

    #[derive(Default)]
    struct Probe {
        creates: u32,
        parent_changed: u32,
        ancestor_changed: u32,
        destroyed_recreating: Vec<bool>,
    }

    struct TestWidget {
        probe: Rc<RefCell<Probe>>,
        hosts: bool,
        /// Refuse the Nth construction attempt (1-based); 0 never fails.
        fail_on: u32,
    }

    impl Widget<TestToolkit> for TestWidget {
        fn create_peer(
            &mut self,
            tk: &mut TestToolkit,
            _surface: &Surface,
        ) -> Result<TestPeer, PeerCreationError> {
            let attempt = {
                let mut probe = self.probe.borrow_mut();
                probe.creates += 1;
                probe.creates
            };
            if self.fail_on != 0 && attempt == self.fail_on {
                return Err(PeerCreationError::new("creation refused"));
            }
            tk.next_id += 1;
            Ok(TestPeer {
                id: tk.next_id,
                hosts: self.hosts,
                text: String::new(),
            })
        }

        fn bind(&mut self, _tk: &mut TestToolkit, _peer: &mut TestPeer) {}

        fn unbind(&mut self, _tk: &mut TestToolkit, _peer: &mut TestPeer) {}

        fn parent_changed(&mut self, _tk: &mut TestToolkit) {
            self.probe.borrow_mut().parent_changed += 1;
        }

        fn ancestor_parent_changed(&mut self, _tk: &mut TestToolkit) {
            self.probe.borrow_mut().ancestor_changed += 1;
        }

        fn peer_destroyed(&mut self, _tk: &mut TestToolkit, recreating: bool) {
            self.probe.borrow_mut().destroyed_recreating.push(recreating);
        }
    }

    fn tree() -> ControlTree<TestToolkit> {
        ControlTree::new(HostContext::new(Surface::Parking))
    }

    fn widget(probe: &Rc<RefCell<Probe>>) -> Box<dyn Widget<TestToolkit>> {
        Box::new(TestWidget {
            probe: probe.clone(),
            hosts: true,
            fail_on: 0,
        })
    }

    fn text_props() -> (DeferredGroup<TestPeer>, CellKey<String>) {
        let mut props = DeferredGroup::new();
        let text = props.add_cell(DeferredCell::new(
            String::new(),
            |p: &TestPeer| p.text.clone(),
            |p: &mut TestPeer, v: &String| p.text = v.clone(),
        ));
        (props, text)
    }

    struct World {
        tk: TestToolkit,
        tree: ControlTree<TestToolkit>,
        text: CellKey<String>,
    }

    fn world() -> World {
        let (_, text) = text_props();
        World {
            tk: TestToolkit::default(),
            tree: tree(),
            text,
        }
    }

    impl World {
        fn control(&mut self, probe: &Rc<RefCell<Probe>>) -> ControlId {
            let (props, _) = text_props();
            self.tree.insert(widget(probe), props)
        }

        fn ensured(&mut self, probe: &Rc<RefCell<Probe>>) -> ControlId {
            let id = self.control(probe);
            self.tree.ensure_peer(&mut self.tk, id).unwrap();
            id
        }

        fn peer_id(&self, id: ControlId) -> u32 {
            self.tree.node(id).unwrap().peer().unwrap().id
        }
    }

    #[test]
    fn insert_is_lazy() {
        let mut w = world();
        let probe = Rc::default();
        let id = w.control(&probe);

        assert!(w.tree.is_alive(id));
        assert_eq!(w.tree.node(id).unwrap().state(), PeerState::NoPeer);
        assert_eq!(probe.borrow().creates, 0);
    }

    #[test]
    fn orphan_peer_parks() {
        let mut w = world();
        let probe = Rc::default();
        let id = w.ensured(&probe);

        let node = w.tree.node(id).unwrap();
        assert!(node.is_live());
        assert_eq!(node.hosted_on(), Some(&Surface::Parking));
        let tag = w.peer_id(id);
        assert_eq!(w.tree.control_by_peer(tag), Some(id));
    }

    #[test]
    fn child_under_live_parent_hosts_on_parent_surface() {
        let mut w = world();
        let (pp, cp) = (Rc::default(), Rc::default());
        let parent = w.ensured(&pp);
        let child = w.control(&cp);

        w.tree.add_child(&mut w.tk, parent, child);
        w.tree.ensure_peer(&mut w.tk, child).unwrap();

        let expected = Surface::Peer(w.peer_id(parent));
        assert_eq!(w.tree.node(child).unwrap().hosted_on(), Some(&expected));
        assert_eq!(cp.borrow().parent_changed, 1);
    }

    #[test]
    fn child_parks_until_parent_materializes() {
        let mut w = world();
        let (pp, cp) = (Rc::default(), Rc::default());
        let parent = w.control(&pp);
        let child = w.control(&cp);
        w.tree.add_child(&mut w.tk, parent, child);

        // Child first: the parent has no surface to offer, so it parks.
        w.tree.ensure_peer(&mut w.tk, child).unwrap();
        assert_eq!(w.tree.node(child).unwrap().hosted_on(), Some(&Surface::Parking));

        // Parent materializing re-hosts the parked child onto its surface.
        w.tree.ensure_peer(&mut w.tk, parent).unwrap();
        let expected = Surface::Peer(w.peer_id(parent));
        assert_eq!(w.tree.node(child).unwrap().hosted_on(), Some(&expected));
        let child_peer = w.peer_id(child);
        assert_eq!(w.tk.reparents, [(child_peer, expected)]);
    }

    #[test]
    fn deferred_round_trip_through_the_tree() {
        let mut w = world();
        let probe = Rc::default();
        let id = w.control(&probe);
        let text = w.text;

        w.tree.node_mut(id).unwrap().set(text, "hello".to_string());
        assert_eq!(w.tree.node(id).unwrap().get(text), "hello");

        w.tree.ensure_peer(&mut w.tk, id).unwrap();
        assert_eq!(w.tree.node(id).unwrap().peer().unwrap().text, "hello");
        assert_eq!(w.tree.node(id).unwrap().get(text), "hello");
    }

    #[test]
    fn recreate_tears_down_child_peers_and_preserves_state() {
        let mut w = world();
        let (pp, cp) = (Rc::default(), Rc::default());
        let parent = w.ensured(&pp);
        let child = w.control(&cp);
        w.tree.add_child(&mut w.tk, parent, child);
        w.tree.ensure_peer(&mut w.tk, child).unwrap();
        let text = w.text;
        w.tree.node_mut(child).unwrap().set(text, "kept".to_string());
        let old_parent_tag = w.peer_id(parent);
        let child_tag = w.peer_id(child);

        assert!(w.tree.recreate_if_needed(&mut w.tk, parent).unwrap());

        // Child peer went down first (its surface was about to die), with
        // its state captured; it re-materializes lazily.
        assert_eq!(w.tk.destroyed, [child_tag, old_parent_tag]);
        let cnode = w.tree.node(child).unwrap();
        assert_eq!(cnode.state(), PeerState::NoPeer);
        assert_eq!(cnode.get(text), "kept");

        // Lookup map follows the swap.
        assert_eq!(w.tree.control_by_peer(old_parent_tag), None);
        assert_eq!(w.tree.control_by_peer(w.peer_id(parent)), Some(parent));

        // The child comes back under the new surface with its state.
        w.tree.ensure_peer(&mut w.tk, child).unwrap();
        let expected = Surface::Peer(w.peer_id(parent));
        assert_eq!(w.tree.node(child).unwrap().hosted_on(), Some(&expected));
        assert_eq!(w.tree.node(child).unwrap().peer().unwrap().text, "kept");
    }

    #[test]
    fn removal_tears_down_exactly_once() {
        let mut w = world();
        let probe = Rc::default();
        let id = w.ensured(&probe);
        let tag = w.peer_id(id);

        w.tree.remove(&mut w.tk, id);

        assert!(!w.tree.is_alive(id));
        assert!(w.tree.node(id).is_none());
        assert_eq!(w.tree.control_by_peer(tag), None);
        assert_eq!(w.tk.destroyed, [tag]);
        assert_eq!(probe.borrow().destroyed_recreating, [false]);

        // Stale id: second removal is a no-op.
        w.tree.remove(&mut w.tk, id);
        assert_eq!(w.tk.destroyed, [tag]);
    }

    #[test]
    fn children_outlive_a_removed_parent() {
        let mut w = world();
        let (pp, cp) = (Rc::default(), Rc::default());
        let parent = w.ensured(&pp);
        let child = w.control(&cp);
        w.tree.add_child(&mut w.tk, parent, child);
        w.tree.ensure_peer(&mut w.tk, child).unwrap();
        let parent_tag = w.peer_id(parent);
        let child_tag = w.peer_id(child);

        w.tree.remove(&mut w.tk, parent);

        // The child was detached and re-parked before the parent peer died.
        assert!(w.tree.is_alive(child));
        let cnode = w.tree.node(child).unwrap();
        assert_eq!(cnode.parent(), None);
        assert!(cnode.is_live());
        assert_eq!(cnode.hosted_on(), Some(&Surface::Parking));
        assert_eq!(w.tk.destroyed, [parent_tag]);
        assert_eq!(w.tk.reparents.last(), Some(&(child_tag, Surface::Parking)));
        assert_eq!(cp.borrow().parent_changed, 2);
    }

    #[test]
    fn slot_reuse_yields_a_distinct_id() {
        let mut w = world();
        let probe = Rc::default();
        let old = w.control(&probe);
        w.tree.remove(&mut w.tk, old);

        let new = w.control(&probe);
        assert_ne!(old, new);
        assert!(!w.tree.is_alive(old));
        assert!(w.tree.is_alive(new));
        assert_eq!(w.tree.len(), 1);
    }

    #[test]
    fn ancestor_change_notifies_whole_subtree() {
        let mut w = world();
        let (rp, ap, bp, cp) = (Rc::default(), Rc::default(), Rc::default(), Rc::default());
        let root = w.ensured(&rp);
        let a = w.control(&ap);
        let b = w.control(&bp);
        let c = w.control(&cp);
        w.tree.add_child(&mut w.tk, root, a);
        w.tree.add_child(&mut w.tk, a, b);
        w.tree.add_child(&mut w.tk, b, c);
        for id in [a, b, c] {
            w.tree.ensure_peer(&mut w.tk, id).unwrap();
        }

        // Detaching `a` physically moves it; its descendants only hear
        // about the ancestry change, their own surfaces are unaffected.
        w.tree.remove_child(&mut w.tk, root, a);

        assert_eq!(ap.borrow().parent_changed, 2);
        assert_eq!(ap.borrow().ancestor_changed, 0);
        assert_eq!(bp.borrow().ancestor_changed, 1);
        assert_eq!(cp.borrow().ancestor_changed, 1);
        let a_surface = Surface::Peer(w.peer_id(a));
        assert_eq!(w.tree.node(b).unwrap().hosted_on(), Some(&a_surface));
    }

    #[test]
    fn init_bracket_coalesces_rebuilds_across_the_tree() {
        let mut w = world();
        let (pp, cp) = (Rc::default(), Rc::default());
        let parent = w.ensured(&pp);
        let child = w.control(&cp);
        w.tree.add_child(&mut w.tk, parent, child);
        w.tree.ensure_peer(&mut w.tk, child).unwrap();
        let child_tag = w.peer_id(child);

        w.tree.begin_init(parent).unwrap();
        assert!(!w.tree.recreate_if_needed(&mut w.tk, parent).unwrap());
        assert!(!w.tree.recreate_if_needed(&mut w.tk, parent).unwrap());
        assert_eq!(pp.borrow().creates, 1);

        assert!(w.tree.end_init(&mut w.tk, parent).unwrap());

        assert_eq!(pp.borrow().creates, 2);
        // The child peer came down exactly once, with the one real rebuild.
        assert_eq!(w.tk.destroyed.iter().filter(|&&t| t == child_tag).count(), 1);
        assert_eq!(w.tree.node(child).unwrap().state(), PeerState::NoPeer);
    }

    #[test]
    fn schedule_recreate_runs_action_against_fresh_peer() {
        let mut w = world();
        let probe = Rc::default();
        let id = w.ensured(&probe);

        let action: PostInitAction<TestToolkit> = Box::new(|_tk, peer| {
            peer.expect("peer exists after rebuild").text = "fresh".to_string();
        });
        assert!(w.tree.schedule_recreate(&mut w.tk, id, action).unwrap());

        assert_eq!(probe.borrow().creates, 2);
        assert_eq!(w.tree.node(id).unwrap().peer().unwrap().text, "fresh");
    }

    #[test]
    fn ignore_recreate_bracket_coalesces_on_the_tree() {
        let mut w = world();
        let probe = Rc::default();
        let id = w.ensured(&probe);

        w.tree.begin_ignore_recreate(id);
        assert!(!w.tree.recreate_if_needed(&mut w.tk, id).unwrap());
        assert!(!w.tree.recreate_if_needed(&mut w.tk, id).unwrap());
        assert_eq!(probe.borrow().creates, 1);

        assert!(w.tree.end_ignore_recreate(&mut w.tk, id).unwrap());
        assert_eq!(probe.borrow().creates, 2);
        assert_eq!(w.tree.control_by_peer(w.peer_id(id)), Some(id));
    }

    #[test]
    fn failed_recreate_clears_stale_bookkeeping() {
        let mut w = world();
        let probe: Rc<RefCell<Probe>> = Rc::default();
        let (props, _) = text_props();
        let id = w.tree.insert(
            Box::new(TestWidget {
                probe: probe.clone(),
                hosts: true,
                fail_on: 2,
            }),
            props,
        );
        w.tree.ensure_peer(&mut w.tk, id).unwrap();
        let old_tag = w.peer_id(id);

        let err = w.tree.recreate_if_needed(&mut w.tk, id).unwrap_err();
        assert!(matches!(err, LifecycleError::PeerCreation(_)));

        // The old peer is gone; its tag must not keep resolving and the
        // node must not claim a hosting surface it no longer sits on.
        assert_eq!(w.tk.destroyed, [old_tag]);
        let node = w.tree.node(id).unwrap();
        assert_eq!(node.state(), PeerState::NoPeer);
        assert_eq!(node.hosted_on(), None);
        assert_eq!(w.tree.control_by_peer(old_tag), None);

        // Creation failure is retryable; a later attempt registers cleanly.
        w.tree.ensure_peer(&mut w.tk, id).unwrap();
        assert_eq!(w.tree.control_by_peer(w.peer_id(id)), Some(id));
        assert_eq!(w.tree.node(id).unwrap().hosted_on(), Some(&Surface::Parking));
    }

    #[test]
    fn failed_coalesced_rebuild_clears_stale_bookkeeping() {
        let mut w = world();
        let probe: Rc<RefCell<Probe>> = Rc::default();
        let (props, _) = text_props();
        let id = w.tree.insert(
            Box::new(TestWidget {
                probe: probe.clone(),
                hosts: true,
                fail_on: 2,
            }),
            props,
        );
        w.tree.ensure_peer(&mut w.tk, id).unwrap();
        let old_tag = w.peer_id(id);

        w.tree.begin_init(id).unwrap();
        assert!(!w.tree.recreate_if_needed(&mut w.tk, id).unwrap());
        let err = w.tree.end_init(&mut w.tk, id).unwrap_err();
        assert!(matches!(err, LifecycleError::PeerCreation(_)));

        assert_eq!(w.tree.node(id).unwrap().state(), PeerState::NoPeer);
        assert_eq!(w.tree.node(id).unwrap().hosted_on(), None);
        assert_eq!(w.tree.control_by_peer(old_tag), None);
    }

    #[test]
    fn bracket_misuse_leaves_bookkeeping_untouched() {
        let mut w = world();
        let probe = Rc::default();
        let id = w.ensured(&probe);
        let tag = w.peer_id(id);

        // No bracket is open: the error must not disturb the live peer's
        // registration or hosting state.
        assert_eq!(
            w.tree.end_init(&mut w.tk, id),
            Err(LifecycleError::InitNotActive)
        );
        assert_eq!(w.tree.control_by_peer(tag), Some(id));
        assert_eq!(w.tree.node(id).unwrap().hosted_on(), Some(&Surface::Parking));
    }

    #[test]
    #[should_panic(expected = "cycle")]
    fn add_child_rejects_cycles() {
        let mut w = world();
        let (ap, bp) = (Rc::default(), Rc::default());
        let a = w.control(&ap);
        let b = w.control(&bp);
        w.tree.add_child(&mut w.tk, a, b);
        w.tree.add_child(&mut w.tk, b, a);
    }

    #[test]
    #[should_panic(expected = "already parented")]
    fn add_child_rejects_double_parenting() {
        let mut w = world();
        let (ap, bp, cp) = (Rc::default(), Rc::default(), Rc::default());
        let a = w.control(&ap);
        let b = w.control(&bp);
        let c = w.control(&cp);
        w.tree.add_child(&mut w.tk, a, c);
        w.tree.add_child(&mut w.tk, b, c);
    }

    #[test]
    fn non_hosting_parent_parks_children() {
        let mut w = world();
        let pp: Rc<RefCell<Probe>> = Rc::default();
        let cp = Rc::default();
        // A parent whose peer offers no child surface (e.g. a leaf-like
        // native widget).
        let (props, _) = text_props();
        let parent = w.tree.insert(
            Box::new(TestWidget {
                probe: pp.clone(),
                hosts: false,
                fail_on: 0,
            }),
            props,
        );
        let child = w.control(&cp);
        w.tree.add_child(&mut w.tk, parent, child);
        w.tree.ensure_peer(&mut w.tk, parent).unwrap();
        w.tree.ensure_peer(&mut w.tk, child).unwrap();

        assert_eq!(w.tree.node(child).unwrap().hosted_on(), Some(&Surface::Parking));
    }
}
