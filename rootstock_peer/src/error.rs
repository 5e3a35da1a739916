// Copyright 2025 the Rootstock Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Error types for peer lifecycle operations.

use alloc::string::String;
use core::fmt;

/// The toolkit refused to materialize a native peer.
///
/// Surfaced to the immediate caller of
/// [`PeerLifecycle::ensure`](crate::PeerLifecycle::ensure); the control is
/// left with no peer and the caller may retry later. The lifecycle itself
/// never retries.
#[derive(Clone, PartialEq, Eq)]
pub struct PeerCreationError {
    message: String,
}

impl PeerCreationError {
    /// Creates an error carrying the toolkit's reason.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Returns the toolkit's reason.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Debug for PeerCreationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerCreationError {{ message: {:?} }}", self.message)
    }
}

impl fmt::Display for PeerCreationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer creation failed: {}", self.message)
    }
}

impl core::error::Error for PeerCreationError {}

/// Failures surfaced by [`PeerLifecycle`](crate::PeerLifecycle) operations.
///
/// The bracket variants are misuse of the init or recreate-suppression
/// brackets: programming errors, reported immediately, never recovered from
/// internally.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LifecycleError {
    /// Peer construction failed; see [`PeerCreationError`].
    PeerCreation(PeerCreationError),
    /// `begin_init` while an init bracket is already open (nesting is
    /// rejected).
    InitNested,
    /// `end_init` without a matching `begin_init`.
    InitNotActive,
    /// `end_ignore_recreate` without a matching `begin_ignore_recreate`.
    IgnoreRecreateNotActive,
}

impl fmt::Display for LifecycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerCreation(e) => write!(f, "{e}"),
            Self::InitNested => write!(f, "begin_init inside an open init bracket"),
            Self::InitNotActive => write!(f, "end_init without a matching begin_init"),
            Self::IgnoreRecreateNotActive => {
                write!(
                    f,
                    "end_ignore_recreate without a matching begin_ignore_recreate"
                )
            }
        }
    }
}

impl core::error::Error for LifecycleError {
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        match self {
            Self::PeerCreation(e) => Some(e),
            _ => None,
        }
    }
}

impl From<PeerCreationError> for LifecycleError {
    fn from(e: PeerCreationError) -> Self {
        Self::PeerCreation(e)
    }
}
