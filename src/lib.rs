//! Mailbox sub-protocol multiplexing and slave lifecycle logic for an EtherCAT
//! master
//!
//! This crate contains the deterministic, transport-free core of a master's
//! non-cyclic machinery: a bounded blocking [`MailboxQueue`] handing received
//! mailbox datagrams from the network path to protocol consumers, the EoE
//! (Ethernet over EtherCAT) [`Fragmenter`]/[`Reassembler`] pair, the
//! [`Supervisor`] that reconciles observed slave state against the desired
//! OPERATIONAL state, and the scope channel management routing slaves through
//! an auxiliary diagnostic mailbox sub-protocol.
//!
//! It contains no networking code. Frame transmit/receive, datagram
//! addressing, and slave auto-configuration live in the surrounding master;
//! they reach this crate through the [`MailboxTransport`] and [`BusOps`]
//! traits and through the index-addressed [`Bus`] tables. The cyclic
//! process-data loop, the supervision cadence, and any consumer threads are
//! driven by the host as well, which keeps everything here synchronous and
//! testable.

#![warn(missing_docs)]
#![cfg_attr(test, allow(dead_code))]

use std::time::{Duration, Instant};

#[doc(hidden)]
pub mod coding;

mod config;
pub use crate::config::{EoeConfig, SupervisorConfig};

mod queue;
pub use crate::queue::{FetchTimeout, MailboxMessage, MailboxQueue, PostTimeout};

mod eoe;
pub use crate::eoe::{
    FragmentHeader, Fragmenter, MailboxTransport, Reassembler, ReassemblyError, SendError,
    TransportError,
};

mod slave;
pub use crate::slave::{al_status_str, mbx_prot, Bus, Group, MbxHandler, Slave, SlaveState};

mod supervisor;
pub use crate::supervisor::{BusOps, Supervisor};

mod scope;
pub use crate::scope::{ScopeChannel, ScopeError, MAX_SCOPE_SLAVES};

/// Bound on a blocking operation
///
/// `After(Duration::ZERO)` degenerates to a non-blocking poll.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Timeout {
    /// Block until the operation can complete
    Forever,
    /// Give up once the given duration has elapsed
    After(Duration),
}

impl Timeout {
    /// Non-blocking poll
    pub const POLL: Self = Self::After(Duration::ZERO);

    /// Absolute deadline for an operation starting at `start`, if any
    pub(crate) fn deadline_from(self, start: Instant) -> Option<Instant> {
        match self {
            Self::Forever => None,
            Self::After(d) => Some(start + d),
        }
    }
}

impl From<Duration> for Timeout {
    fn from(d: Duration) -> Self {
        Self::After(d)
    }
}
