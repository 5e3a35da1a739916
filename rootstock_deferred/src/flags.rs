// Copyright 2025 the Rootstock Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Deferred boolean flags sharing one storage word.

use core::fmt;

use smallvec::SmallVec;

/// Inline capacity for flag entries; controls rarely track more than a
/// handful of deferred flags (the original tracked three).
const INLINE_FLAGS: usize = 4;

/// A single-bit flag key.
///
/// Callers define their flags as constants:
///
/// ```rust
/// use rootstock_deferred::Flag;
///
/// const VISIBLE: Flag = Flag::new(0);
/// const ENABLED: Flag = Flag::new(1);
/// assert_ne!(VISIBLE, ENABLED);
/// ```
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct Flag(u32);

impl Flag {
    /// Creates a flag from a bit index.
    ///
    /// # Panics
    ///
    /// Panics if `bit >= 32`.
    #[must_use]
    pub const fn new(bit: u32) -> Self {
        assert!(bit < 32, "flag bit index out of range");
        Self(1 << bit)
    }

    /// Returns the single-bit mask of this flag.
    #[must_use]
    #[inline]
    pub const fn mask(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Flag({})", self.0.trailing_zeros())
    }
}

struct FlagEntry<P> {
    flag: Flag,
    retrieve: fn(&P) -> bool,
    apply: fn(&mut P, bool),
}

/// A fixed set of independent deferred boolean flags backed by one `u32`.
///
/// Contract-wise this is [`DeferredCell`](crate::DeferredCell) specialized
/// over a mapping from [`Flag`] to `bool`: each registered flag has its own
/// `retrieve`/`apply` pair, while all cached values share one storage word.
/// The set of tracked flags is fixed at construction; adding or removing a
/// flag at runtime is not supported.
///
/// # Example
///
/// ```rust
/// use rootstock_deferred::{DeferredFlags, Flag};
///
/// const VISIBLE: Flag = Flag::new(0);
///
/// struct Peer { shown: bool }
///
/// let mut flags = DeferredFlags::new()
///     .with_flag(VISIBLE, true, |p: &Peer| p.shown, |p, v| p.shown = v);
///
/// // Cached while no peer exists.
/// flags.set(None, VISIBLE, false);
/// assert!(!flags.get(None, VISIBLE));
///
/// // Replayed onto a fresh peer in registration order.
/// let mut peer = Peer { shown: true };
/// flags.flush_all(&mut peer);
/// assert!(!peer.shown);
/// ```
pub struct DeferredFlags<P> {
    bits: u32,
    entries: SmallVec<[FlagEntry<P>; INLINE_FLAGS]>,
}

impl<P> DeferredFlags<P> {
    /// Creates an empty flag set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            bits: 0,
            entries: SmallVec::new(),
        }
    }

    /// Registers a flag with its initial cached value and peer accessors.
    ///
    /// # Panics
    ///
    /// Panics if the flag's bit is already registered.
    #[must_use]
    pub fn with_flag(
        mut self,
        flag: Flag,
        initial: bool,
        retrieve: fn(&P) -> bool,
        apply: fn(&mut P, bool),
    ) -> Self {
        assert!(
            !self.is_registered(flag),
            "flag bit registered twice in the same set"
        );
        if initial {
            self.bits |= flag.mask();
        }
        self.entries.push(FlagEntry {
            flag,
            retrieve,
            apply,
        });
        self
    }

    /// Returns `true` if the flag was registered at construction.
    #[must_use]
    pub fn is_registered(&self, flag: Flag) -> bool {
        self.entries.iter().any(|e| e.flag == flag)
    }

    fn entry(&self, flag: Flag) -> &FlagEntry<P> {
        self.entries
            .iter()
            .find(|e| e.flag == flag)
            .expect("flag not registered in this set")
    }

    /// Reads a flag from whichever storage is current.
    ///
    /// # Panics
    ///
    /// Panics if `flag` was not registered at construction; an unregistered
    /// flag is a programming error, not a recoverable condition.
    #[must_use]
    pub fn get(&self, peer: Option<&P>, flag: Flag) -> bool {
        let entry = self.entry(flag);
        match peer {
            Some(peer) => (entry.retrieve)(peer),
            None => self.bits & flag.mask() != 0,
        }
    }

    /// Writes a flag to whichever storage is current.
    ///
    /// # Panics
    ///
    /// Panics if `flag` was not registered at construction.
    pub fn set(&mut self, peer: Option<&mut P>, flag: Flag, value: bool) {
        let entry = self.entry(flag);
        match peer {
            Some(peer) => (entry.apply)(peer, value),
            None => {
                if value {
                    self.bits |= flag.mask();
                } else {
                    self.bits &= !flag.mask();
                }
            }
        }
    }

    /// Returns a flag's cached value, regardless of whether a peer is live.
    ///
    /// # Panics
    ///
    /// Panics if `flag` was not registered at construction.
    #[must_use]
    pub fn cached(&self, flag: Flag) -> bool {
        let _ = self.entry(flag);
        self.bits & flag.mask() != 0
    }

    /// Pushes every cached flag onto the peer, in registration order.
    pub fn flush_all(&mut self, peer: &mut P) {
        for entry in &self.entries {
            (entry.apply)(peer, self.bits & entry.flag.mask() != 0);
        }
    }

    /// Overwrites every cached flag from the peer, in registration order.
    pub fn refresh_all(&mut self, peer: &P) {
        for entry in &self.entries {
            if (entry.retrieve)(peer) {
                self.bits |= entry.flag.mask();
            } else {
                self.bits &= !entry.flag.mask();
            }
        }
    }
}

impl<P> Default for DeferredFlags<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> fmt::Debug for DeferredFlags<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredFlags")
            .field("bits", &self.bits)
            .field("tracked", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VISIBLE: Flag = Flag::new(0);
    const ENABLED: Flag = Flag::new(1);
    const FROZEN: Flag = Flag::new(2);

    #[derive(Default)]
    struct Peer {
        shown: bool,
        enabled: bool,
        frozen: bool,
    }

    fn flags() -> DeferredFlags<Peer> {
        DeferredFlags::new()
            .with_flag(VISIBLE, true, |p: &Peer| p.shown, |p, v| p.shown = v)
            .with_flag(ENABLED, true, |p: &Peer| p.enabled, |p, v| p.enabled = v)
            .with_flag(FROZEN, false, |p: &Peer| p.frozen, |p, v| p.frozen = v)
    }

    #[test]
    fn initial_values() {
        let flags = flags();
        assert!(flags.get(None, VISIBLE));
        assert!(flags.get(None, ENABLED));
        assert!(!flags.get(None, FROZEN));
    }

    #[test]
    fn cached_set_and_get() {
        let mut flags = flags();
        flags.set(None, VISIBLE, false);
        assert!(!flags.get(None, VISIBLE));
        // Other bits untouched.
        assert!(flags.get(None, ENABLED));
    }

    #[test]
    fn live_set_mutates_peer() {
        let mut flags = flags();
        let mut peer = Peer::default();
        flags.set(Some(&mut peer), FROZEN, true);
        assert!(peer.frozen);
        // Cache stays stale until refresh.
        assert!(!flags.cached(FROZEN));
    }

    #[test]
    fn flush_applies_every_flag() {
        let mut flags = flags();
        flags.set(None, VISIBLE, false);

        let mut peer = Peer {
            shown: true,
            enabled: false,
            frozen: true,
        };
        flags.flush_all(&mut peer);
        assert!(!peer.shown);
        assert!(peer.enabled);
        assert!(!peer.frozen);
    }

    #[test]
    fn refresh_captures_every_flag() {
        let mut flags = flags();
        let peer = Peer {
            shown: false,
            enabled: true,
            frozen: true,
        };
        flags.refresh_all(&peer);
        assert!(!flags.cached(VISIBLE));
        assert!(flags.cached(ENABLED));
        assert!(flags.cached(FROZEN));
    }

    #[test]
    #[should_panic(expected = "flag not registered")]
    fn unregistered_flag_is_fatal() {
        let flags = flags();
        let _ = flags.get(None, Flag::new(7));
    }

    #[test]
    #[should_panic(expected = "registered twice")]
    fn duplicate_registration_is_fatal() {
        let _ = flags().with_flag(VISIBLE, false, |p: &Peer| p.shown, |p, v| p.shown = v);
    }
}
