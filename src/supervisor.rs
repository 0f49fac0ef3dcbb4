//! Slave lifecycle supervision
//!
//! A level-triggered reconciliation loop over the slave table, run on a
//! coarse host-driven cadence while the master is operational. Every pass
//! re-observes actual slave state and issues at most one corrective request
//! per slave; nothing is assumed to have succeeded until the next read-back
//! shows it. Failed corrections are therefore retried by re-detection, with
//! no backoff and no escalation: a lost slave stays a retried condition, not
//! a terminal error.

use tracing::{error, info, warn};

use crate::config::SupervisorConfig;
use crate::slave::{al_status_str, Bus, MbxHandler, SlaveState};
use crate::Timeout;

/// Corrective bus operations supplied by the surrounding master
///
/// All methods work on table handles. State-write requests are
/// fire-and-forget within a pass; `reconfig_slave` and `recover_slave`
/// report success so the supervisor can clear `islost` immediately.
pub trait BusOps {
    /// Refresh `state` and `al_status_code` of every slave from the bus
    fn read_states(&mut self, bus: &mut Bus);
    /// Request the state currently stored in the slave's table entry
    fn write_state(&mut self, bus: &mut Bus, slave: u16);
    /// Run full reconfiguration of `slave`; true on success
    fn reconfig_slave(&mut self, bus: &mut Bus, slave: u16, timeout: Timeout) -> bool;
    /// Attempt recovery of a lost `slave`; true on success
    fn recover_slave(&mut self, bus: &mut Bus, slave: u16, timeout: Timeout) -> bool;
    /// Wait up to `timeout` for `slave` to reach `expected`; returns the
    /// state actually observed
    fn state_check(
        &mut self,
        bus: &mut Bus,
        slave: u16,
        expected: SlaveState,
        timeout: Timeout,
    ) -> SlaveState;
}

/// Reconciles one group's slaves toward OPERATIONAL
#[derive(Debug)]
pub struct Supervisor {
    group: u8,
    config: SupervisorConfig,
}

impl Supervisor {
    /// Supervise `group` with the given timeouts
    pub fn new(group: u8, config: SupervisorConfig) -> Self {
        Self { group, config }
    }

    /// Group under supervision
    pub fn group(&self) -> u8 {
        self.group
    }

    /// Cadence the host should call [`tick`](Self::tick) on
    pub fn interval(&self) -> std::time::Duration {
        self.config.check_interval
    }

    /// Run one reconciliation pass
    ///
    /// `in_op` is the master's operational flag and `wkc` the work counter
    /// returned by the latest process-data exchange. The pass runs only when
    /// operational and either the work counter shows a deficit or a previous
    /// pass left the group's `docheckstate` armed; otherwise it returns
    /// immediately and the host just sleeps until the next tick.
    pub fn tick(&mut self, bus: &mut Bus, ops: &mut impl BusOps, in_op: bool, wkc: u16) {
        let expected = bus.group(self.group).expected_wkc();
        if !in_op || (wkc >= expected && !bus.group(self.group).docheckstate) {
            return;
        }

        // One or more slaves are not responding
        bus.group_mut(self.group).docheckstate = false;
        ops.read_states(bus);
        for slave in 1..=bus.slave_count() {
            if bus.slave(slave).group == self.group
                && bus.slave(slave).state != SlaveState::OPERATIONAL
            {
                bus.group_mut(self.group).docheckstate = true;
                let state = bus.slave(slave).state;
                if state == (SlaveState::SAFE_OP | SlaveState::ERROR) {
                    error!(
                        slave,
                        status = al_status_str(bus.slave(slave).al_status_code),
                        "slave is in SAFE_OP + ERROR, attempting ack"
                    );
                    bus.slave_mut(slave).state = SlaveState::SAFE_OP | SlaveState::ACK;
                    ops.write_state(bus, slave);
                } else if state == SlaveState::SAFE_OP {
                    warn!(slave, "slave is in SAFE_OP, requesting OPERATIONAL");
                    bus.slave_mut(slave).state = SlaveState::OPERATIONAL;
                    ops.write_state(bus, slave);
                } else if state != SlaveState::NONE {
                    if ops.reconfig_slave(bus, slave, self.config.monitor_timeout.into()) {
                        bus.slave_mut(slave).islost = false;
                        info!(slave, "slave reconfigured");
                    }
                } else if !bus.slave(slave).islost {
                    // Unresponsive for the first time; give it one bounded
                    // individual re-check before declaring it lost
                    ops.state_check(
                        bus,
                        slave,
                        SlaveState::OPERATIONAL,
                        self.config.recheck_timeout.into(),
                    );
                    if bus.slave(slave).state == SlaveState::NONE {
                        let entry = bus.slave_mut(slave);
                        entry.islost = true;
                        // Suspend cyclic mailbox servicing until it returns
                        if entry.mbx_handler == MbxHandler::Cyclic {
                            entry.mbx_handler = MbxHandler::Lost;
                        }
                        error!(slave, "slave lost");
                    }
                }
            }
            if bus.slave(slave).islost {
                if bus.slave(slave).state == SlaveState::NONE {
                    if ops.recover_slave(bus, slave, self.config.monitor_timeout.into()) {
                        let entry = bus.slave_mut(slave);
                        entry.islost = false;
                        if entry.mbx_handler == MbxHandler::Lost {
                            entry.mbx_handler = MbxHandler::Cyclic;
                        }
                        info!(slave, "slave recovered");
                    }
                } else {
                    let entry = bus.slave_mut(slave);
                    entry.islost = false;
                    if entry.mbx_handler == MbxHandler::Lost {
                        entry.mbx_handler = MbxHandler::Cyclic;
                    }
                    info!(slave, "slave found");
                }
            }
        }
        if !bus.group(self.group).docheckstate {
            info!(group = self.group, "all slaves resumed OPERATIONAL");
        }
    }
}
