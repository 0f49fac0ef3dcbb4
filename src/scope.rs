//! Scope channel management
//!
//! The scope channel is an auxiliary mailbox sub-protocol streaming
//! high-rate diagnostic samples from selected slaves. Each group owns at
//! most one channel context holding the insertion-ordered set of routed
//! slaves; enabling a slave switches its inbound mailbox to cyclic
//! servicing so samples drain every process-data cycle.

use thiserror::Error;
use tinyvec::ArrayVec;
use tracing::debug;

use crate::slave::{Bus, MbxHandler};

/// Capacity of a scope channel's slave set
pub const MAX_SCOPE_SLAVES: usize = 8;

/// Per-group scope channel context
///
/// Exclusively owned by its [`Group`](crate::Group); created and destroyed
/// only through [`Bus::scope_init`] / [`Bus::scope_close`].
#[derive(Debug, Default, Clone)]
pub struct ScopeChannel {
    slaves: ArrayVec<[u16; MAX_SCOPE_SLAVES]>,
}

impl ScopeChannel {
    /// Slaves routed through the channel, in enable order
    pub fn slaves(&self) -> &[u16] {
        &self.slaves
    }
}

/// Scope channel state conflicts and capacity failures
#[derive(Debug, Copy, Clone, Eq, PartialEq, Error)]
pub enum ScopeError {
    /// `scope_init` on a group that already owns a channel
    #[error("group {0} already has a scope channel")]
    AlreadyInitialized(u8),
    /// Operation requires a channel the group does not have
    #[error("group {0} has no scope channel")]
    NotInitialized(u8),
    /// The slave has no inbound mailbox to route
    #[error("slave {0} has no inbound mailbox")]
    NoInboundMailbox(u16),
    /// The channel's slave set is at capacity; the set is left unchanged
    #[error("scope channel slave set is full")]
    ChannelFull,
    /// `scope_disable_slave` on a slave that was never enabled
    #[error("slave {0} is not scope enabled")]
    NotEnabled(u16),
}

impl Bus {
    /// Allocate a scope channel for `group` with an empty slave set
    pub fn scope_init(&mut self, group: u8) -> Result<(), ScopeError> {
        let entry = self.group_mut(group);
        if entry.scope.is_some() {
            return Err(ScopeError::AlreadyInitialized(group));
        }
        entry.scope = Some(ScopeChannel::default());
        debug!(group, "scope channel initialized");
        Ok(())
    }

    /// Release `group`'s scope channel
    ///
    /// Enable/disable calls are only valid while the channel exists.
    pub fn scope_close(&mut self, group: u8) -> Result<(), ScopeError> {
        let entry = self.group_mut(group);
        if entry.scope.take().is_none() {
            return Err(ScopeError::NotInitialized(group));
        }
        debug!(group, "scope channel closed");
        Ok(())
    }

    /// Route `slave` through its group's scope channel
    ///
    /// Clears the slave's stale mailbox-full/overrun indications and switches
    /// its inbound mailbox to cyclic servicing. Fails without side effects if
    /// the group has no channel, the slave has no inbound mailbox, or the set
    /// is full.
    pub fn scope_enable_slave(&mut self, slave: u16) -> Result<(), ScopeError> {
        let group = self.slave(slave).group;
        if !self.slave(slave).mbx_in {
            return Err(ScopeError::NoInboundMailbox(slave));
        }
        let channel = self
            .group_mut(group)
            .scope
            .as_mut()
            .ok_or(ScopeError::NotInitialized(group))?;
        if channel.slaves.len() == MAX_SCOPE_SLAVES {
            return Err(ScopeError::ChannelFull);
        }
        channel.slaves.push(slave);
        let entry = self.slave_mut(slave);
        entry.scope_mbx_full = false;
        entry.scope_mbx_overrun = 0;
        entry.scope_enabled = true;
        entry.mbx_handler = MbxHandler::Cyclic;
        debug!(slave, group, "scope slave enabled");
        Ok(())
    }

    /// Stop routing `slave` through the scope channel
    ///
    /// Only the slave's routing flag is cleared; the slave stays in the
    /// channel's set until the channel is closed. Fails if the slave was not
    /// enabled.
    pub fn scope_disable_slave(&mut self, slave: u16) -> Result<(), ScopeError> {
        let entry = self.slave_mut(slave);
        if !entry.scope_enabled {
            return Err(ScopeError::NotEnabled(slave));
        }
        entry.scope_enabled = false;
        debug!(slave, "scope slave disabled");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn bus() -> Bus {
        let mut bus = Bus::new(12, 2);
        for slave in 1..=12 {
            bus.slave_mut(slave).mbx_in = true;
        }
        bus
    }

    #[test]
    fn init_close_lifecycle() {
        let mut bus = bus();
        bus.scope_init(0).unwrap();
        assert_matches!(bus.scope_init(0), Err(ScopeError::AlreadyInitialized(0)));
        // The failed re-init must not disturb the existing context
        bus.scope_enable_slave(1).unwrap();
        assert_matches!(bus.scope_init(0), Err(ScopeError::AlreadyInitialized(0)));
        assert_eq!(bus.group(0).scope.as_ref().unwrap().slaves(), &[1]);

        bus.scope_close(0).unwrap();
        assert_matches!(bus.scope_close(0), Err(ScopeError::NotInitialized(0)));
    }

    #[test]
    fn enable_requires_channel_and_mailbox() {
        let mut bus = bus();
        assert_matches!(bus.scope_enable_slave(1), Err(ScopeError::NotInitialized(0)));
        bus.scope_init(0).unwrap();
        bus.slave_mut(2).mbx_in = false;
        assert_matches!(bus.scope_enable_slave(2), Err(ScopeError::NoInboundMailbox(2)));
    }

    #[test]
    fn enable_sets_cyclic_servicing() {
        let mut bus = bus();
        bus.scope_init(0).unwrap();
        bus.slave_mut(3).scope_mbx_full = true;
        bus.slave_mut(3).scope_mbx_overrun = 5;
        bus.scope_enable_slave(3).unwrap();
        let slave = bus.slave(3);
        assert!(slave.scope_enabled);
        assert!(!slave.scope_mbx_full);
        assert_eq!(slave.scope_mbx_overrun, 0);
        assert_eq!(slave.mbx_handler, MbxHandler::Cyclic);
    }

    #[test]
    fn set_never_grows_past_capacity() {
        let mut bus = bus();
        bus.scope_init(0).unwrap();
        for slave in 1..=MAX_SCOPE_SLAVES as u16 {
            bus.scope_enable_slave(slave).unwrap();
        }
        assert_matches!(
            bus.scope_enable_slave(MAX_SCOPE_SLAVES as u16 + 1),
            Err(ScopeError::ChannelFull)
        );
        let channel = bus.group(0).scope.as_ref().unwrap();
        assert_eq!(channel.slaves().len(), MAX_SCOPE_SLAVES);
        // Rejected slave left untouched
        assert!(!bus.slave(MAX_SCOPE_SLAVES as u16 + 1).scope_enabled);
    }

    #[test]
    fn disable_keeps_set_membership() {
        let mut bus = bus();
        bus.scope_init(0).unwrap();
        bus.scope_enable_slave(4).unwrap();
        bus.scope_disable_slave(4).unwrap();
        assert!(!bus.slave(4).scope_enabled);
        assert_eq!(bus.group(0).scope.as_ref().unwrap().slaves(), &[4]);
        assert_matches!(bus.scope_disable_slave(4), Err(ScopeError::NotEnabled(4)));
    }

    #[test]
    fn disable_never_enabled_is_noop_failure() {
        let mut bus = bus();
        assert_matches!(bus.scope_disable_slave(5), Err(ScopeError::NotEnabled(5)));
    }
}
