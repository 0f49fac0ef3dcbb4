//! Slave and group tables
//!
//! Per-slave and per-group records live in flat arenas on [`Bus`], addressed
//! by small integer handles exactly like the classic `ec_slave[]` /
//! `ec_group[]` tables. Slot 0 of the slave arena is reserved as the
//! broadcast alias; real slaves are `1..=slave_count`. The tables carry no
//! internal lock: callers serialize access, typically by confining mutation
//! to one thread.

use std::fmt;
use std::ops::BitOr;

use crate::scope::ScopeChannel;

/// Mailbox sub-protocol bits advertised by a slave
pub mod mbx_prot {
    /// ADS over EtherCAT
    pub const AOE: u8 = 0x01;
    /// Ethernet over EtherCAT
    pub const EOE: u8 = 0x02;
    /// CAN application protocol over EtherCAT
    pub const COE: u8 = 0x04;
    /// File access over EtherCAT
    pub const FOE: u8 = 0x08;
    /// Servo drive profile over EtherCAT
    pub const SOE: u8 = 0x10;
    /// Vendor specific over EtherCAT
    pub const VOE: u8 = 0x20;
}

/// AL state of a slave: a base state plus the ERROR/ACK modifier bit
///
/// The error indicator and its acknowledge share bit 0x10; writing the bit
/// back acknowledges the error.
#[derive(Copy, Clone, Eq, PartialEq, Default)]
pub struct SlaveState(u16);

impl SlaveState {
    /// No response on the bus
    pub const NONE: Self = Self(0x00);
    /// Init state
    pub const INIT: Self = Self(0x01);
    /// Pre-operational
    pub const PRE_OP: Self = Self(0x02);
    /// Bootstrap
    pub const BOOT: Self = Self(0x03);
    /// Safe-operational: inputs valid, outputs ignored
    pub const SAFE_OP: Self = Self(0x04);
    /// Operational
    pub const OPERATIONAL: Self = Self(0x08);
    /// Error indicator flag
    pub const ERROR: Self = Self(0x10);
    /// Error acknowledge request flag; same bit as [`Self::ERROR`]
    pub const ACK: Self = Self(0x10);

    /// Reconstruct from an AL status register value
    pub const fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    /// Raw AL status register value
    pub const fn raw(self) -> u16 {
        self.0
    }

    /// Base state with the modifier bit stripped
    pub const fn base(self) -> Self {
        Self(self.0 & 0x0f)
    }

    /// Whether the error indicator is set
    pub const fn has_error(self) -> bool {
        self.0 & 0x10 != 0
    }
}

impl BitOr for SlaveState {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for SlaveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for SlaveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let base = match self.base() {
            Self::NONE => "NONE",
            Self::INIT => "INIT",
            Self::PRE_OP => "PRE_OP",
            Self::BOOT => "BOOT",
            Self::SAFE_OP => "SAFE_OP",
            Self::OPERATIONAL => "OPERATIONAL",
            other => return write!(f, "UNKNOWN({:#04x})", other.0),
        };
        if self.has_error() {
            write!(f, "{base} + ERROR")
        } else {
            f.write_str(base)
        }
    }
}

/// Human-readable rendering of the common AL status codes, for diagnostics
pub fn al_status_str(code: u16) -> &'static str {
    match code {
        0x0000 => "no error",
        0x0001 => "unspecified error",
        0x0011 => "invalid requested state change",
        0x0012 => "unknown requested state",
        0x0013 => "bootstrap not supported",
        0x0016 => "invalid mailbox configuration",
        0x001a => "synchronization error",
        0x001b => "sync manager watchdog",
        0x001e => "invalid input configuration",
        0x001f => "invalid output configuration",
        0x0024 => "invalid input mapping",
        0x0025 => "invalid output mapping",
        0x002d => "no sync error",
        _ => "unknown",
    }
}

/// How the cyclic loop services a slave's inbound mailbox
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum MbxHandler {
    /// Not serviced by the cyclic loop
    #[default]
    None,
    /// One mailbox datagram pumped every cycle
    Cyclic,
    /// Servicing suspended while the slave is lost
    Lost,
}

/// Per-slave record
#[derive(Debug, Default)]
pub struct Slave {
    /// Group this slave belongs to
    pub group: u8,
    /// Last observed (or requested) AL state
    pub state: SlaveState,
    /// AL status code reported with the last error indication
    pub al_status_code: u16,
    /// Set once the slave stopped responding, cleared on recovery
    pub islost: bool,
    /// Supported mailbox sub-protocols, [`mbx_prot`] bits
    pub mbx_proto: u8,
    /// Configured mailbox length in bytes; 0 when the slave has no mailbox
    pub mbx_len: u16,
    /// Whether an inbound (slave-to-master) mailbox is configured
    pub mbx_in: bool,
    /// Cyclic servicing mode of the inbound mailbox
    pub mbx_handler: MbxHandler,
    /// Scope channel routing is active for this slave
    pub scope_enabled: bool,
    /// Inbound scope mailbox reported full
    pub scope_mbx_full: bool,
    /// Count of scope datagrams dropped to overrun
    pub scope_mbx_overrun: u8,
}

/// Per-group record
#[derive(Debug, Default)]
pub struct Group {
    /// Expected work counter contribution of the group's outputs
    pub outputs_wkc: u16,
    /// Expected work counter contribution of the group's inputs
    pub inputs_wkc: u16,
    /// Set whenever a slave of the group needs (or needed) attention
    pub docheckstate: bool,
    /// Auxiliary diagnostic channel context, if initialized
    pub scope: Option<ScopeChannel>,
}

impl Group {
    /// Work counter value when every slave processes the cyclic datagram
    pub fn expected_wkc(&self) -> u16 {
        self.outputs_wkc * 2 + self.inputs_wkc
    }
}

/// Index-addressed slave and group arenas
///
/// Handles are plain integers; no component of this crate holds references
/// into the tables across calls.
#[derive(Debug)]
pub struct Bus {
    slaves: Vec<Slave>,
    groups: Vec<Group>,
}

impl Bus {
    /// Create tables for `slave_count` slaves and `group_count` groups
    ///
    /// Slave handles run `1..=slave_count`; slot 0 is the broadcast alias.
    pub fn new(slave_count: u16, group_count: u8) -> Self {
        let mut slaves = Vec::with_capacity(usize::from(slave_count) + 1);
        slaves.resize_with(usize::from(slave_count) + 1, Slave::default);
        let mut groups = Vec::with_capacity(usize::from(group_count));
        groups.resize_with(usize::from(group_count), Group::default);
        Self { slaves, groups }
    }

    /// Number of configured slaves, excluding the broadcast slot
    pub fn slave_count(&self) -> u16 {
        (self.slaves.len() - 1) as u16
    }

    /// Shared access to a slave record
    ///
    /// # Panics
    ///
    /// If `slave` is out of range; handles come from bus configuration and
    /// an invalid one is a programming error.
    pub fn slave(&self, slave: u16) -> &Slave {
        &self.slaves[usize::from(slave)]
    }

    /// Exclusive access to a slave record
    pub fn slave_mut(&mut self, slave: u16) -> &mut Slave {
        &mut self.slaves[usize::from(slave)]
    }

    /// Shared access to a group record
    pub fn group(&self, group: u8) -> &Group {
        &self.groups[usize::from(group)]
    }

    /// Exclusive access to a group record
    pub fn group_mut(&mut self, group: u8) -> &mut Group {
        &mut self.groups[usize::from(group)]
    }

    /// Handles of the slaves belonging to `group`, in index order
    pub fn slaves_in_group(&self, group: u8) -> impl Iterator<Item = u16> + '_ {
        (1..=self.slave_count()).filter(move |&s| self.slave(s).group == group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_display() {
        assert_eq!(SlaveState::SAFE_OP.to_string(), "SAFE_OP");
        assert_eq!(
            (SlaveState::SAFE_OP | SlaveState::ERROR).to_string(),
            "SAFE_OP + ERROR"
        );
        assert_eq!(SlaveState::from_raw(0x18).to_string(), "OPERATIONAL + ERROR");
    }

    #[test]
    fn state_bits() {
        let s = SlaveState::SAFE_OP | SlaveState::ACK;
        assert_eq!(s.raw(), 0x14);
        assert_eq!(s.base(), SlaveState::SAFE_OP);
        assert!(s.has_error());
        assert!(!SlaveState::OPERATIONAL.has_error());
    }

    #[test]
    fn expected_wkc() {
        let group = Group {
            outputs_wkc: 2,
            inputs_wkc: 3,
            ..Default::default()
        };
        assert_eq!(group.expected_wkc(), 7);
    }

    #[test]
    fn group_membership() {
        let mut bus = Bus::new(4, 2);
        bus.slave_mut(2).group = 1;
        bus.slave_mut(4).group = 1;
        let members: Vec<_> = bus.slaves_in_group(1).collect();
        assert_eq!(members, vec![2, 4]);
        assert_eq!(bus.slaves_in_group(0).count(), 2);
    }
}
