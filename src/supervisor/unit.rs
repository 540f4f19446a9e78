//! Per-unit facade the facility controller drives.
//!
//! A `ReactorUnit` mirrors one PLC: the last status and RPS reports it
//! sent, the burn setpoint the facility has committed to it, and a small
//! outbox of commands the supervisor flushes into that PLC's session.

use crate::protocol::{NodeId, PlcCommand, PlcStatus};
use crate::rps::{RpsStatus, TripReason};
use crate::utils::floatings::{mb_to_tenths, tenths_to_mb};
use std::time::{Duration, Instant};

/// Damage at which a unit is considered critically alarmed even before
/// its RPS latches the damage trip.
pub const CRIT_DAMAGE_PCT: f64 = 90.0;
/// A commanded ramp counts as complete within this margin.
pub const RAMP_DONE_EPSILON_MB: f64 = 0.05;
/// A status report older than this no longer counts for allocation.
pub const STATUS_STALE_MS: u64 = 1_000;

/// Control-facing view of one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlInf {
    pub br10: u32,
    pub lim_br10: u32,
    pub blade_count: u32,
    pub ready: bool,
    pub degraded: bool,
}

pub struct ReactorUnit {
    id: NodeId,
    /// Priority group 1..4; 0 = independent, never facility-controlled.
    group: u8,
    lim_br10: u32,
    br10: u32,
    blade_count: u32,
    auto_engaged: bool,
    /// Last committed (setpoint, ramp) pair; repeats are not re-sent.
    last_commit: Option<(u32, bool)>,
    scrammed_by_facility: bool,
    connected: bool,
    last_status: Option<PlcStatus>,
    last_status_at: Option<Instant>,
    stale: bool,
    last_rps: Option<RpsStatus>,
    outbox: Vec<PlcCommand>,
}

impl ReactorUnit {
    pub fn new(id: NodeId, group: u8, burn_limit_mb: f64) -> Self {
        Self {
            id,
            group: group.min(4),
            lim_br10: mb_to_tenths(burn_limit_mb),
            br10: 0,
            blade_count: 0,
            auto_engaged: false,
            last_commit: None,
            scrammed_by_facility: false,
            connected: false,
            last_status: None,
            last_status_at: None,
            stale: true,
            last_rps: None,
            outbox: Vec::new(),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn group(&self) -> u8 {
        self.group
    }

    /// Regrouping is only accepted while the facility is INACTIVE; the
    /// caller gates that.
    pub fn set_group(&mut self, group: u8) {
        self.group = group.min(4);
    }

    pub fn lim_br10(&self) -> u32 {
        self.lim_br10
    }

    pub fn br10(&self) -> u32 {
        self.br10
    }

    pub fn is_auto_engaged(&self) -> bool {
        self.auto_engaged
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn set_connected(&mut self, connected: bool) {
        if self.connected && !connected {
            tracing::warn!("[Unit {}] PLC session lost", self.id);
        }
        self.connected = connected;
    }

    /// Burn ceiling update from the operator. The caller rejects this
    /// outside INACTIVE; here it also reaches the PLC.
    pub fn set_burn_limit(&mut self, mb_per_tick: f64) {
        let mb = mb_per_tick.max(0.0);
        self.lim_br10 = mb_to_tenths(mb);
        self.outbox.push(PlcCommand::SetLimit { mb_per_tick: mb });
    }

    pub fn update_status(&mut self, status: PlcStatus) {
        self.blade_count = status.blade_count;
        self.last_status = Some(status);
        self.last_status_at = Some(Instant::now());
        self.stale = false;
    }

    /// Per-tick refresh: a unit whose status report has aged out stops
    /// counting toward allocation until the PLC reports again.
    pub fn update(&mut self, now: Instant) {
        self.stale = match self.last_status_at {
            Some(t) => now.duration_since(t) > Duration::from_millis(STATUS_STALE_MS),
            None => true,
        };
    }

    pub fn update_rps(&mut self, rps: RpsStatus) {
        self.last_rps = Some(rps);
    }

    pub fn blade_count(&self) -> u32 {
        self.blade_count
    }

    // Facility-side control surface.

    pub fn a_engage(&mut self) {
        self.auto_engaged = true;
        self.scrammed_by_facility = false;
        self.last_commit = None;
    }

    pub fn a_disengage(&mut self) {
        if self.auto_engaged {
            self.auto_engaged = false;
            self.br10 = 0;
            self.last_commit = None;
            self.outbox.push(PlcCommand::SetBurn {
                enable: false,
                mb_per_tick: 0.0,
                ramp: false,
            });
        }
    }

    /// Facility auto-SCRAM: trip the unit's RPS remotely.
    pub fn a_scram(&mut self) {
        self.br10 = 0;
        self.last_commit = None;
        self.scrammed_by_facility = true;
        self.outbox.push(PlcCommand::AutoScram);
    }

    /// Operator (manual) SCRAM through the supervisor.
    pub fn scram(&mut self) {
        self.br10 = 0;
        self.last_commit = None;
        self.outbox.push(PlcCommand::Scram);
    }

    /// True once the facility has issued `a_scram` since the last
    /// engage; used to prove every unit saw the auto-SCRAM edge.
    pub fn was_auto_scrammed(&self) -> bool {
        self.scrammed_by_facility
    }

    /// Set by the allocator; takes effect on the next commit.
    pub fn set_br10(&mut self, tenths: u32) {
        self.br10 = tenths.min(self.lim_br10);
    }

    /// Push the committed setpoint to the PLC. Repeat commits with the
    /// same value are absorbed here.
    pub fn a_commit_br10(&mut self, ramp: bool) {
        let commit = (self.br10, ramp);
        if self.last_commit == Some(commit) {
            return;
        }
        self.last_commit = Some(commit);
        self.outbox.push(PlcCommand::SetBurn {
            enable: self.auto_engaged && self.br10 > 0,
            mb_per_tick: tenths_to_mb(self.br10),
            ramp,
        });
    }

    /// Whether the PLC reports its last commanded ramp as finished.
    pub fn a_ramp_complete(&self) -> bool {
        match &self.last_status {
            None => false,
            Some(s) => {
                !s.ramping
                    && (s.burn_target_mb - tenths_to_mb(self.br10)).abs() < RAMP_DONE_EPSILON_MB
            }
        }
    }

    /// Limit the allocator may count on right now: zero for a unit that
    /// is disconnected, stale, degraded, or tripped.
    pub fn a_get_effective_limit(&self) -> u32 {
        if !self.connected || self.stale {
            return 0;
        }
        match (&self.last_status, &self.last_rps) {
            (Some(s), rps) => {
                if !s.ready || s.degraded {
                    0
                } else if rps.as_ref().map(|r| r.tripped).unwrap_or(false) {
                    0
                } else {
                    self.lim_br10
                }
            }
            (None, _) => 0,
        }
    }

    /// Conditional RPS reset after an auto-SCRAM clears: only units
    /// whose sole trip cause was the supervisor's own auto request are
    /// reset; anything physical stays latched for the operator.
    pub fn a_cond_rps_reset(&mut self) {
        if !self.scrammed_by_facility {
            return;
        }
        let auto_only = matches!(
            self.last_rps.as_ref().and_then(|r| r.first_trip),
            Some(TripReason::Automatic)
        );
        if auto_only {
            self.outbox.push(PlcCommand::RpsReset);
        }
        self.scrammed_by_facility = false;
    }

    pub fn ack_all(&mut self) {
        self.outbox.push(PlcCommand::AckAlarms);
    }

    pub fn has_critical_alarm(&self) -> bool {
        if let Some(rps) = &self.last_rps
            && rps.first_trip == Some(TripReason::DmgCrit)
        {
            return true;
        }
        if let Some(status) = &self.last_status
            && let Some(t) = &status.telemetry
            && t.damage_pct >= CRIT_DAMAGE_PCT
        {
            return true;
        }
        false
    }

    pub fn get_control_inf(&self) -> ControlInf {
        let (ready, degraded) = match &self.last_status {
            Some(s) => (self.connected && s.ready, s.degraded),
            None => (false, !self.connected),
        };
        ControlInf {
            br10: self.br10,
            lim_br10: self.lim_br10,
            blade_count: self.blade_count,
            ready,
            degraded,
        }
    }

    pub fn take_outbox(&mut self) -> Vec<PlcCommand> {
        std::mem::take(&mut self.outbox)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rps::TripFlags;

    fn ready_status(burn_target_mb: f64, ramping: bool) -> PlcStatus {
        PlcStatus {
            telemetry: None,
            ready: true,
            degraded: false,
            burn_target_mb,
            ramping,
            blade_count: 28,
            max_burn_mb: 10.0,
        }
    }

    fn tripped_rps(first: TripReason) -> RpsStatus {
        RpsStatus {
            flags: TripFlags::default(),
            tripped: true,
            first_trip: Some(first),
            manual: false,
        }
    }

    #[test]
    fn effective_limit_gates_on_liveness() {
        let mut u = ReactorUnit::new(10, 1, 5.0);
        assert_eq!(u.a_get_effective_limit(), 0);

        u.set_connected(true);
        u.update_status(ready_status(0.0, false));
        assert_eq!(u.a_get_effective_limit(), 50);

        u.update_rps(tripped_rps(TripReason::HighTemp));
        assert_eq!(u.a_get_effective_limit(), 0);
    }

    #[test]
    fn commit_dedupes_repeats() {
        let mut u = ReactorUnit::new(10, 1, 5.0);
        u.a_engage();
        u.set_br10(30);
        u.a_commit_br10(false);
        u.a_commit_br10(false);
        assert_eq!(u.take_outbox().len(), 1);

        // Same value, different ramp flag: re-sent.
        u.a_commit_br10(true);
        assert_eq!(u.take_outbox().len(), 1);
    }

    #[test]
    fn set_br10_clamps_to_limit() {
        let mut u = ReactorUnit::new(10, 1, 5.0);
        u.set_br10(500);
        assert_eq!(u.br10(), 50);
    }

    #[test]
    fn cond_reset_only_for_auto_trips() {
        let mut u = ReactorUnit::new(10, 1, 5.0);
        u.a_engage();
        u.a_scram();
        u.update_rps(tripped_rps(TripReason::Automatic));
        u.take_outbox();

        u.a_cond_rps_reset();
        assert!(matches!(
            u.take_outbox().as_slice(),
            [PlcCommand::RpsReset]
        ));

        // A physical trip stays latched.
        u.a_scram();
        u.update_rps(tripped_rps(TripReason::HighTemp));
        u.take_outbox();
        u.a_cond_rps_reset();
        assert!(u.take_outbox().is_empty());
    }

    #[test]
    fn critical_alarm_from_damage_or_rps() {
        let mut u = ReactorUnit::new(10, 1, 5.0);
        assert!(!u.has_critical_alarm());

        u.update_rps(tripped_rps(TripReason::DmgCrit));
        assert!(u.has_critical_alarm());
    }

    #[test]
    fn ramp_complete_tracks_reported_target() {
        let mut u = ReactorUnit::new(10, 1, 5.0);
        u.set_connected(true);
        u.a_engage();
        u.set_br10(40);
        assert!(!u.a_ramp_complete());

        u.update_status(ready_status(4.0, true));
        assert!(!u.a_ramp_complete());

        u.update_status(ready_status(4.0, false));
        assert!(u.a_ramp_complete());
    }
}
