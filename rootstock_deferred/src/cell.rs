// Copyright 2025 the Rootstock Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! A single deferred property value.

use core::fmt;

/// One logical property whose storage is either the native peer or a local
/// cached slot.
///
/// The cell is parametrized by the peer type `P` and the value type `T`. It
/// carries two callbacks fixed at construction:
///
/// - `retrieve` reads the property from a live peer. Reads go through the
///   peer because its native state may change independently of this API
///   (e.g. by user interaction).
/// - `apply` writes the property onto a live peer.
///
/// Whether the peer or the cache is the current storage is decided by the
/// caller on every access, by passing `Some(peer)` or `None`. The owner of
/// the peer handle guarantees that [`flush`](Self::flush) and
/// [`refresh`](Self::refresh) are invoked at the two storage transition
/// points (peer birth and peer death); the cell itself performs no
/// validation and has no failure paths.
///
/// # Example
///
/// ```rust
/// use rootstock_deferred::DeferredCell;
///
/// struct Peer { width: u32 }
///
/// let mut cell = DeferredCell::new(
///     0_u32,
///     |p: &Peer| p.width,
///     |p: &mut Peer, v: &u32| p.width = *v,
/// );
///
/// // Cached while no peer exists.
/// cell.set(None, 640);
/// assert_eq!(cell.get(None), 640);
///
/// // Replayed onto a fresh peer.
/// let mut peer = Peer { width: 0 };
/// cell.flush(&mut peer);
/// assert_eq!(peer.width, 640);
///
/// // Live writes mutate the peer now.
/// cell.set(Some(&mut peer), 800);
/// assert_eq!(cell.get(Some(&peer)), 800);
///
/// // Captured back into the cache before the peer goes away.
/// cell.refresh(&peer);
/// assert_eq!(cell.get(None), 800);
/// ```
pub struct DeferredCell<P, T> {
    cached: T,
    retrieve: fn(&P) -> T,
    apply: fn(&mut P, &T),
}

impl<P, T: Clone> DeferredCell<P, T> {
    /// Creates a cell with an initial cached value and its peer accessors.
    #[must_use]
    pub fn new(initial: T, retrieve: fn(&P) -> T, apply: fn(&mut P, &T)) -> Self {
        Self {
            cached: initial,
            retrieve,
            apply,
        }
    }

    /// Reads the property from whichever storage is current.
    ///
    /// `Some(peer)` reads straight from the peer; `None` returns the cached
    /// value.
    #[must_use]
    pub fn get(&self, peer: Option<&P>) -> T {
        match peer {
            Some(peer) => (self.retrieve)(peer),
            None => self.cached.clone(),
        }
    }

    /// Writes the property to whichever storage is current.
    ///
    /// With `Some(peer)` the peer is the source of truth and is mutated now;
    /// the cached slot is left alone (it is overwritten by
    /// [`refresh`](Self::refresh) before the peer is destroyed). With `None`
    /// the value lands in the cached slot only.
    pub fn set(&mut self, peer: Option<&mut P>, value: T) {
        match peer {
            Some(peer) => (self.apply)(peer, &value),
            None => self.cached = value,
        }
    }

    /// Pushes the cached value onto the peer.
    ///
    /// Used exactly once, immediately after a peer is created, to replay the
    /// value accumulated while no peer existed.
    pub fn flush(&mut self, peer: &mut P) {
        (self.apply)(peer, &self.cached);
    }

    /// Overwrites the cached slot with the peer's current value.
    ///
    /// Used exactly once, immediately before a peer is destroyed, so that
    /// the next [`flush`](Self::flush) after recreation reproduces the same
    /// externally observable value.
    pub fn refresh(&mut self, peer: &P) {
        self.cached = (self.retrieve)(peer);
    }

    /// Returns the cached value, regardless of whether a peer is live.
    ///
    /// This bypasses the live peer on purpose; it is the escape hatch for
    /// retrieve callbacks that cannot trust the peer (the original system
    /// used it to work around toolkits reporting wrong colors during
    /// recreation).
    #[must_use]
    #[inline]
    pub fn cached(&self) -> &T {
        &self.cached
    }

    /// Overwrites the cached slot directly.
    #[inline]
    pub fn set_cached(&mut self, value: T) {
        self.cached = value;
    }
}

impl<P, T: fmt::Debug> fmt::Debug for DeferredCell<P, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredCell")
            .field("cached", &self.cached)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::{String, ToString};

    struct Peer {
        text: String,
    }

    fn text_cell() -> DeferredCell<Peer, String> {
        DeferredCell::new(
            String::new(),
            |p: &Peer| p.text.clone(),
            |p: &mut Peer, v: &String| p.text = v.clone(),
        )
    }

    #[test]
    fn cached_round_trip() {
        let mut cell = text_cell();
        cell.set(None, "A".to_string());
        assert_eq!(cell.get(None), "A");
    }

    #[test]
    fn live_set_mutates_peer_not_cache() {
        let mut cell = text_cell();
        let mut peer = Peer {
            text: String::new(),
        };

        cell.set(Some(&mut peer), "B".to_string());
        assert_eq!(peer.text, "B");
        // The cached slot is stale by design until `refresh`.
        assert_eq!(cell.cached(), "");
    }

    #[test]
    fn flush_replays_cache() {
        let mut cell = text_cell();
        cell.set(None, "A".to_string());

        let mut peer = Peer {
            text: String::new(),
        };
        cell.flush(&mut peer);
        assert_eq!(peer.text, "A");
        assert_eq!(cell.get(Some(&peer)), "A");
    }

    #[test]
    fn refresh_captures_peer_state() {
        let mut cell = text_cell();
        let peer = Peer {
            text: "external".to_string(),
        };

        cell.refresh(&peer);
        assert_eq!(cell.get(None), "external");
    }

    #[test]
    fn live_get_reads_peer() {
        let cell = text_cell();
        let peer = Peer {
            text: "toolkit".to_string(),
        };
        // The peer may change behind the cell's back; reads must see that.
        assert_eq!(cell.get(Some(&peer)), "toolkit");
    }

    #[test]
    fn set_cached_bypasses_peer() {
        let mut cell = text_cell();
        cell.set_cached("direct".to_string());
        assert_eq!(cell.cached(), "direct");
    }
}
