//! Per-checkout usage flags.

use serde::Serialize;

/// What a single checkout has done with its connection so far.
///
/// `used_for_update` is sticky: once set it stays set until the wrapper is
/// recycled through [`ConnectionState::reset`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionState {
    pub used_as_read: bool,
    pub used_for_update: bool,
    /// The replication counter was already bumped inside the transaction.
    pub update_committed: bool,
    pub heartbeat_enabled: bool,
}

impl ConnectionState {
    pub fn new(used_as_read: bool) -> Self {
        Self {
            used_as_read,
            ..Self::default()
        }
    }

    pub fn mark_update_performed(&mut self) {
        self.used_for_update = true;
    }

    pub fn set_used_as_read(&mut self, used_as_read: bool) {
        self.used_as_read = used_as_read;
    }

    pub fn mark_update_committed(&mut self) {
        self.update_committed = true;
    }

    pub fn set_heartbeat_enabled(&mut self, enabled: bool) {
        self.heartbeat_enabled = enabled;
    }

    /// True if the hand-back still has to count this checkout's writes.
    pub fn needs_replication_increment(&self) -> bool {
        self.used_for_update && !self.update_committed
    }

    /// Start a new checkout.
    pub fn reset(&mut self, used_as_read: bool) {
        *self = Self::new(used_as_read);
    }
}
