//! Application session base
//!
//! Sessions select an application on the card, learn its firmware version
//! and then gate their operations on [`Feature`]s.

pub mod feature;
pub mod version;

use derive_more::Display;
use tracing::trace;

pub use feature::{Feature, Requirement};
pub use version::{Version, decode_bcd};

use crate::{Error, Result};

/// Lifecycle of an application session
///
/// Variants are ordered: a session only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Display)]
pub enum SessionState {
    /// Nothing sent yet
    #[default]
    Uninitialized,
    /// Application selected, version not yet known
    Selected,
    /// Version known and format configured
    Ready,
    /// Session closed, no further commands
    Closed,
}

impl SessionState {
    /// Move to `next`; `Closed` is reachable from every state
    pub fn advance(&mut self, next: Self) {
        debug_assert!(*self < next || next == Self::Closed, "{self} -> {next}");
        trace!(from = %self, to = %next, "Session state change");
        *self = next;
    }
}

/// Common behaviour of application sessions
pub trait ApplicationSession {
    /// Firmware version of the application
    fn version(&self) -> Version;

    /// Whether a feature is available on this device
    fn is_supported(&self, feature: &Feature) -> bool {
        feature.is_supported_by(self.version())
    }

    /// Fail with [`Error::Unsupported`] unless the feature is available
    fn require(&self, feature: &Feature) -> Result<()> {
        if self.is_supported(feature) {
            Ok(())
        } else {
            Err(Error::unsupported(format!(
                "{} requires {} (device has {})",
                feature.name,
                feature.requirement,
                self.version()
            )))
        }
    }

    /// Close the session and the executor below it
    fn close(&mut self) -> Result<()>;
}
