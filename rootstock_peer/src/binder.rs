// Copyright 2025 the Rootstock Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Subscription bookkeeping across peer swaps.

use crate::kit::{Toolkit, Widget};

/// Enforces the bind/unbind discipline over a widget's event subscriptions.
///
/// Every peer instance that reaches the live state gets exactly one
/// [`bind`](Self::bind) and, before it is destroyed, exactly one
/// [`unbind`](Self::unbind). The rebinder tracks whether the current peer is
/// bound and counts totals so tests can assert balance over a control's
/// whole history.
///
/// Double binds and unmatched unbinds indicate a broken driver, not a
/// recoverable condition; they trip debug assertions and are otherwise
/// ignored so release builds fail soft.
#[derive(Debug, Default)]
pub struct SubscriptionRebinder {
    bound: bool,
    binds: u64,
    unbinds: u64,
}

impl SubscriptionRebinder {
    /// Creates a rebinder with no bound peer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the widget's subscriptions against a freshly created peer.
    pub fn bind<T: Toolkit>(
        &mut self,
        widget: &mut dyn Widget<T>,
        tk: &mut T,
        peer: &mut T::Peer,
    ) {
        debug_assert!(!self.bound, "peer bound twice without an unbind");
        if self.bound {
            return;
        }
        widget.bind(tk, peer);
        self.bound = true;
        self.binds += 1;
    }

    /// Removes the subscriptions added by the matching [`bind`](Self::bind).
    pub fn unbind<T: Toolkit>(
        &mut self,
        widget: &mut dyn Widget<T>,
        tk: &mut T,
        peer: &mut T::Peer,
    ) {
        debug_assert!(self.bound, "unbind without a matching bind");
        if !self.bound {
            return;
        }
        widget.unbind(tk, peer);
        self.bound = false;
        self.unbinds += 1;
    }

    /// Returns `true` if the current peer has live subscriptions.
    #[must_use]
    #[inline]
    pub fn is_bound(&self) -> bool {
        self.bound
    }

    /// Total number of binds over this control's history.
    #[must_use]
    #[inline]
    pub fn bind_count(&self) -> u64 {
        self.binds
    }

    /// Total number of unbinds over this control's history.
    #[must_use]
    #[inline]
    pub fn unbind_count(&self) -> u64 {
        self.unbinds
    }
}
