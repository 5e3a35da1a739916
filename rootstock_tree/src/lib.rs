// Copyright 2025 the Rootstock Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Rootstock Tree: the logical control tree and peer orchestration.
//!
//! [`ControlTree`] is a generational slot arena and the single owner of
//! every logical control. Each node bundles a widget capability
//! (`rootstock_peer::Widget`), a peer lifecycle, a deferred-property group,
//! and subscription bookkeeping. Handles are copyable [`ControlId`]s; a
//! stale id never aliases a reused slot.
//!
//! On top of the per-node state machines, the tree supplies the structural
//! semantics:
//!
//! - **Hosting-surface resolution.** A peer is hosted on its logical
//!   parent's surface when the parent is live and can host; otherwise it is
//!   *parked* on the [`HostContext`] parking surface and physically moved
//!   later. Logical structure and physical attachment are deliberately
//!   decoupled.
//! - **Reparenting.** Structure changes re-resolve hosting and move live
//!   peers with identity preserved; descendants are notified through
//!   `ancestor_parent_changed`.
//! - **Recreate orchestration.** When a node's peer must be rebuilt,
//!   descendant peers are torn down first (state captured) because their
//!   host surface is going away; they re-materialize lazily under the new
//!   surface.
//! - **Peer lookup.** A peer-tag → [`ControlId`] map, maintained across
//!   create/destroy/recreate, lets embedders route toolkit events back to
//!   logical controls.
//!
//! ## Example
//!
//! A minimal embedding with a toy toolkit:
//!
//! ```
//! use rootstock_deferred::{CellKey, DeferredCell, DeferredGroup};
//! use rootstock_peer::{PeerCreationError, Toolkit, Widget};
//! use rootstock_tree::{ControlTree, HostContext};
//!
//! struct Peer { id: u32, label: String }
//!
//! #[derive(Default)]
//! struct Toy { next_id: u32 }
//!
//! impl Toolkit for Toy {
//!     type Peer = Peer;
//!     type Surface = u32;
//!     type PeerTag = u32;
//!     fn destroy_peer(&mut self, _peer: Peer) {}
//!     fn reparent(&mut self, _peer: &mut Peer, _surface: &u32) {}
//!     fn surface_of(&mut self, peer: &Peer) -> Option<u32> { Some(peer.id) }
//!     fn tag_of(&self, peer: &Peer) -> u32 { peer.id }
//! }
//!
//! struct Label;
//!
//! impl Widget<Toy> for Label {
//!     fn create_peer(&mut self, tk: &mut Toy, _surface: &u32) -> Result<Peer, PeerCreationError> {
//!         tk.next_id += 1;
//!         Ok(Peer { id: tk.next_id, label: String::new() })
//!     }
//!     fn bind(&mut self, _tk: &mut Toy, _peer: &mut Peer) {}
//!     fn unbind(&mut self, _tk: &mut Toy, _peer: &mut Peer) {}
//! }
//!
//! fn label_props() -> (DeferredGroup<Peer>, CellKey<String>) {
//!     let mut props = DeferredGroup::new();
//!     let label = props.add_cell(DeferredCell::new(
//!         String::new(),
//!         |p: &Peer| p.label.clone(),
//!         |p: &mut Peer, v: &String| p.label = v.clone(),
//!     ));
//!     (props, label)
//! }
//!
//! let mut tk = Toy::default();
//! let mut tree = ControlTree::new(HostContext::new(0_u32));
//!
//! let (props, label) = label_props();
//! let id = tree.insert(Box::new(Label), props);
//!
//! // Set before any peer exists: buffered.
//! tree.node_mut(id).unwrap().set(label, "hello".to_string());
//!
//! // Materialize: the buffered value is replayed onto the fresh peer.
//! tree.ensure_peer(&mut tk, id)?;
//! assert_eq!(tree.node(id).unwrap().peer().unwrap().label, "hello");
//! # Ok::<(), rootstock_peer::LifecycleError>(())
//! ```
//!
//! Single-threaded by contract, like the rest of the stack: the arena is
//! plain data and every operation is a bounded synchronous transition.
//!
//! This crate is `no_std` and uses `alloc`. It does not depend on `std`.

#![no_std]

extern crate alloc;

mod host;
mod id;
mod tree;

pub use host::HostContext;
pub use id::ControlId;
pub use tree::{ControlNode, ControlTree};
