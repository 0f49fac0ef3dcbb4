//! Parameters governing mailbox sizing and supervision cadence

use std::time::Duration;

use crate::eoe::HEADER_SIZE_FIRST;

/// EoE mailbox and buffer sizing
///
/// Default values suit a 128-byte slave mailbox tunneling standard Ethernet
/// frames.
#[derive(Debug, Clone)]
pub struct EoeConfig {
    pub(crate) mailbox_len: u16,
    pub(crate) rx_buffer_size: usize,
}

impl EoeConfig {
    /// Mailbox length of the slave in bytes
    ///
    /// Each fragment occupies one mailbox; the per-fragment payload capacity
    /// is the mailbox length minus the largest fragment header.
    ///
    /// # Panics
    ///
    /// If `value` does not leave room for a header and at least one payload
    /// byte.
    pub fn mailbox_len(&mut self, value: u16) -> &mut Self {
        assert!(
            usize::from(value) > HEADER_SIZE_FIRST,
            "mailbox too small for a fragment header"
        );
        self.mailbox_len = value;
        self
    }

    /// Capacity of the per-slave frame reassembly buffer
    pub fn rx_buffer_size(&mut self, value: usize) -> &mut Self {
        self.rx_buffer_size = value;
        self
    }

    pub(crate) fn payload_capacity(&self) -> usize {
        usize::from(self.mailbox_len) - HEADER_SIZE_FIRST
    }
}

impl Default for EoeConfig {
    fn default() -> Self {
        Self {
            mailbox_len: 128,
            // One maximum-size untagged Ethernet frame
            rx_buffer_size: 1518,
        }
    }
}

/// Supervision cadence and per-operation timeouts
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub(crate) check_interval: Duration,
    pub(crate) monitor_timeout: Duration,
    pub(crate) recheck_timeout: Duration,
}

impl SupervisorConfig {
    /// Period of the reconciliation tick
    pub fn check_interval(&mut self, value: Duration) -> &mut Self {
        self.check_interval = value;
        self
    }

    /// Bound on reconfiguration and recovery of a single slave
    pub fn monitor_timeout(&mut self, value: Duration) -> &mut Self {
        self.monitor_timeout = value;
        self
    }

    /// Bound on the individual state re-check before a slave is declared lost
    pub fn recheck_timeout(&mut self, value: Duration) -> &mut Self {
        self.recheck_timeout = value;
        self
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_millis(10),
            monitor_timeout: Duration::from_micros(500),
            recheck_timeout: Duration::from_micros(2000),
        }
    }
}
