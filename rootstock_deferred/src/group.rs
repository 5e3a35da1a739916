// Copyright 2025 the Rootstock Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Ordered collections of deferred slots with typed access keys.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::any::Any;
use core::fmt;
use core::hash::{Hash, Hasher};
use core::marker::PhantomData;

use crate::cell::DeferredCell;
use crate::flags::{DeferredFlags, Flag};

/// A slot that can be bulk-flushed or bulk-refreshed without knowing its
/// concrete value type.
trait ErasedSlot<P: 'static>: 'static {
    fn flush(&mut self, peer: &mut P);
    fn refresh(&mut self, peer: &P);
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<P: 'static, T: Clone + 'static> ErasedSlot<P> for DeferredCell<P, T> {
    fn flush(&mut self, peer: &mut P) {
        Self::flush(self, peer);
    }

    fn refresh(&mut self, peer: &P) {
        Self::refresh(self, peer);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl<P: 'static> ErasedSlot<P> for DeferredFlags<P> {
    fn flush(&mut self, peer: &mut P) {
        self.flush_all(peer);
    }

    fn refresh(&mut self, peer: &P) {
        self.refresh_all(peer);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A typed key for a [`DeferredCell`] registered in a [`DeferredGroup`].
///
/// The phantom type records the cell's value type, so gets and sets are
/// checked at compile time. Keys are only meaningful for the group that
/// issued them.
pub struct CellKey<T> {
    index: u16,
    _marker: PhantomData<fn() -> T>,
}

impl<T> CellKey<T> {
    const fn new(index: u16) -> Self {
        Self {
            index,
            _marker: PhantomData,
        }
    }
}

// Manual trait implementations to avoid requiring T: Clone, etc.

impl<T> Copy for CellKey<T> {}

impl<T> Clone for CellKey<T> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> PartialEq for CellKey<T> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl<T> Eq for CellKey<T> {}

impl<T> Hash for CellKey<T> {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}

impl<T> fmt::Debug for CellKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CellKey")
            .field("index", &self.index)
            .field("type", &core::any::type_name::<T>())
            .finish()
    }
}

/// A key for a [`DeferredFlags`] set registered in a [`DeferredGroup`].
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct FlagsKey {
    index: u16,
}

/// An ordered collection of deferred cells and flag sets.
///
/// The group exists so that the peer lifecycle can replay every buffered
/// property onto a freshly created peer ([`apply_all`](Self::apply_all)) and
/// capture every live value just before a peer is destroyed
/// ([`receive_all`](Self::receive_all)), without knowing the concrete value
/// types involved.
///
/// Slots are visited in registration order. There is no partial-failure
/// handling: the per-slot callbacks are infallible function pointers, and a
/// panic inside one simply propagates.
///
/// # Example
///
/// ```rust
/// use rootstock_deferred::{DeferredCell, DeferredFlags, DeferredGroup, Flag};
///
/// const VISIBLE: Flag = Flag::new(0);
///
/// #[derive(Default)]
/// struct Peer { width: u32, shown: bool }
///
/// let mut group: DeferredGroup<Peer> = DeferredGroup::new();
/// let width = group.add_cell(DeferredCell::new(
///     0_u32,
///     |p: &Peer| p.width,
///     |p: &mut Peer, v: &u32| p.width = *v,
/// ));
/// let flags = group.add_flags(DeferredFlags::new().with_flag(
///     VISIBLE,
///     true,
///     |p: &Peer| p.shown,
///     |p, v| p.shown = v,
/// ));
///
/// group.set(width, None, 320);
/// group.set_flag(flags, None, VISIBLE, false);
///
/// let mut peer = Peer::default();
/// group.apply_all(&mut peer);
/// assert_eq!(peer.width, 320);
/// assert!(!peer.shown);
/// ```
pub struct DeferredGroup<P: 'static> {
    slots: Vec<Box<dyn ErasedSlot<P>>>,
}

impl<P: 'static> DeferredGroup<P> {
    /// Creates an empty group.
    #[must_use]
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// Registers a cell; later slots are flushed/refreshed after earlier
    /// ones.
    ///
    /// # Panics
    ///
    /// Panics if more than `u16::MAX` slots are registered.
    pub fn add_cell<T: Clone + 'static>(&mut self, cell: DeferredCell<P, T>) -> CellKey<T> {
        let index = u16::try_from(self.slots.len()).expect("too many deferred slots");
        self.slots.push(Box::new(cell));
        CellKey::new(index)
    }

    /// Registers a flag set; see [`add_cell`](Self::add_cell) for ordering.
    ///
    /// # Panics
    ///
    /// Panics if more than `u16::MAX` slots are registered.
    pub fn add_flags(&mut self, flags: DeferredFlags<P>) -> FlagsKey {
        let index = u16::try_from(self.slots.len()).expect("too many deferred slots");
        self.slots.push(Box::new(flags));
        FlagsKey { index }
    }

    /// Returns the number of registered slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns `true` if no slots are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Borrows the cell behind a key.
    ///
    /// # Panics
    ///
    /// Panics if the key belongs to a different group or names a slot of a
    /// different type; keys are not forgeable through the public API, so
    /// this is a programming error.
    #[must_use]
    pub fn cell<T: Clone + 'static>(&self, key: CellKey<T>) -> &DeferredCell<P, T> {
        self.slots[key.index as usize]
            .as_any()
            .downcast_ref()
            .expect("cell key does not match slot")
    }

    /// Mutably borrows the cell behind a key.
    ///
    /// # Panics
    ///
    /// As [`cell`](Self::cell).
    pub fn cell_mut<T: Clone + 'static>(&mut self, key: CellKey<T>) -> &mut DeferredCell<P, T> {
        self.slots[key.index as usize]
            .as_any_mut()
            .downcast_mut()
            .expect("cell key does not match slot")
    }

    /// Borrows the flag set behind a key.
    ///
    /// # Panics
    ///
    /// As [`cell`](Self::cell).
    #[must_use]
    pub fn flags(&self, key: FlagsKey) -> &DeferredFlags<P> {
        self.slots[key.index as usize]
            .as_any()
            .downcast_ref()
            .expect("flags key does not match slot")
    }

    /// Mutably borrows the flag set behind a key.
    ///
    /// # Panics
    ///
    /// As [`cell`](Self::cell).
    pub fn flags_mut(&mut self, key: FlagsKey) -> &mut DeferredFlags<P> {
        self.slots[key.index as usize]
            .as_any_mut()
            .downcast_mut()
            .expect("flags key does not match slot")
    }

    /// Reads a cell; see [`DeferredCell::get`].
    #[must_use]
    pub fn get<T: Clone + 'static>(&self, key: CellKey<T>, peer: Option<&P>) -> T {
        self.cell(key).get(peer)
    }

    /// Writes a cell; see [`DeferredCell::set`].
    pub fn set<T: Clone + 'static>(&mut self, key: CellKey<T>, peer: Option<&mut P>, value: T) {
        self.cell_mut(key).set(peer, value);
    }

    /// Reads a flag; see [`DeferredFlags::get`].
    #[must_use]
    pub fn get_flag(&self, key: FlagsKey, peer: Option<&P>, flag: Flag) -> bool {
        self.flags(key).get(peer, flag)
    }

    /// Writes a flag; see [`DeferredFlags::set`].
    pub fn set_flag(&mut self, key: FlagsKey, peer: Option<&mut P>, flag: Flag, value: bool) {
        self.flags_mut(key).set(peer, flag, value);
    }

    /// Flushes every slot onto the peer, in registration order.
    ///
    /// Called exactly once per peer lifetime, immediately after creation.
    pub fn apply_all(&mut self, peer: &mut P) {
        for slot in &mut self.slots {
            slot.flush(peer);
        }
    }

    /// Refreshes every slot from the peer, in registration order.
    ///
    /// Called exactly once per peer lifetime, immediately before
    /// destruction.
    pub fn receive_all(&mut self, peer: &P) {
        for slot in &mut self.slots {
            slot.refresh(peer);
        }
    }
}

impl<P: 'static> Default for DeferredGroup<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: 'static> fmt::Debug for DeferredGroup<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredGroup")
            .field("slots", &self.slots.len())
            .finish()
    }
}
