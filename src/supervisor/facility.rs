//! Facility process controller.
//!
//! Drives every assigned reactor unit from one mode machine: direct
//! burn modes (SIMPLE, BURN_RATE), PID modes over the induction matrix
//! (CHARGE, GEN_RATE), and two safety holds (MATRIX_FAULT_IDLE,
//! UNIT_ALARM_IDLE). Burn is distributed across priority groups in
//! tenths of mB/t; the PID integrator freezes while the output is
//! clamped and re-arms only after every unit finishes its ramp.

use super::unit::ReactorUnit;
use crate::device::MatrixSnapshot;
use crate::protocol::{NodeId, PlcCommand};
use crate::utils::RollingMean;
use crate::utils::floatings::{round_f64, tenths_to_mb};
use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Charging power contributed per turbine blade per mB/t of burn.
pub const POWER_PER_BLADE: f64 = 2856.0;

/// PID gains for both matrix loops. Kd is reserved: kept in the output
/// expression but zero.
const PID_KP: f64 = 1.0;
const PID_KI: f64 = 1e-5;
const PID_KD: f64 = 0.0;

/// Samples in the matrix charge/flow moving averages.
pub const CHARGE_AVG_WINDOW: usize = 20;

/// Matrix fill latch and release points.
pub const MATRIX_FILL_TRIP: f64 = 1.0;
pub const MATRIX_FILL_CLEAR: f64 = 0.95;

/// Matrix telemetry older than this counts as disconnected.
pub const MATRIX_STALE_MS: u64 = 2_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FacilityMode {
    Inactive,
    Simple,
    BurnRate,
    Charge,
    GenRate,
    MatrixFaultIdle,
    UnitAlarmIdle,
}

impl FacilityMode {
    /// Modes the operator can stage directly.
    pub fn operator_settable(&self) -> bool {
        !matches!(
            self,
            FacilityMode::MatrixFaultIdle | FacilityMode::UnitAlarmIdle
        )
    }

    fn is_active(&self) -> bool {
        matches!(
            self,
            FacilityMode::Simple | FacilityMode::BurnRate | FacilityMode::Charge
                | FacilityMode::GenRate
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AutoScramReason {
    MatrixDc,
    MatrixFill,
    CritAlarm,
}

impl AutoScramReason {
    fn describe(&self) -> &'static str {
        match self {
            AutoScramReason::MatrixDc => "induction matrix disconnected",
            AutoScramReason::MatrixFill => "induction matrix full",
            AutoScramReason::CritAlarm => "critical unit alarm",
        }
    }
}

pub struct FacilityController {
    units: Vec<ReactorUnit>,
    unit_index: AHashMap<NodeId, usize>,

    mode: FacilityMode,
    last_mode: FacilityMode,
    return_mode: FacilityMode,
    mode_set: Option<FacilityMode>,

    /// Unit indices per priority group 1..4, sorted ascending by burn
    /// limit (stable on ties). Rebuilt on every engage.
    prio_groups: [Vec<usize>; 4],
    charge_conversion: f64,
    max_burn_tenths: u32,

    burn_target_mb: f64,
    charge_target: f64,
    gen_target: f64,

    accumulator: f64,
    time_start: Option<Instant>,
    last_time: Option<Instant>,
    last_error: f64,
    saturated: bool,
    initial_ramp: bool,
    waiting_on_ramp: bool,

    avg_charge: RollingMean,
    avg_inflow: RollingMean,
    avg_outflow: RollingMean,
    matrix: Option<MatrixSnapshot>,
    matrix_last_seen: Option<Instant>,

    ascram: bool,
    ascram_reason: Option<AutoScramReason>,
    status_text: String,
}

impl FacilityController {
    pub fn new(units: Vec<ReactorUnit>) -> Self {
        let unit_index = units
            .iter()
            .enumerate()
            .map(|(i, u)| (u.id(), i))
            .collect();
        Self {
            units,
            unit_index,
            mode: FacilityMode::Inactive,
            last_mode: FacilityMode::Inactive,
            return_mode: FacilityMode::Inactive,
            mode_set: None,
            prio_groups: Default::default(),
            charge_conversion: 0.0,
            max_burn_tenths: 0,
            burn_target_mb: 0.0,
            charge_target: 0.0,
            gen_target: 0.0,
            accumulator: 0.0,
            time_start: None,
            last_time: None,
            last_error: 0.0,
            saturated: false,
            initial_ramp: false,
            waiting_on_ramp: false,
            avg_charge: RollingMean::new(CHARGE_AVG_WINDOW),
            avg_inflow: RollingMean::new(CHARGE_AVG_WINDOW),
            avg_outflow: RollingMean::new(CHARGE_AVG_WINDOW),
            matrix: None,
            matrix_last_seen: None,
            ascram: false,
            ascram_reason: None,
            status_text: String::from("facility inactive"),
        }
    }

    // Accessors.

    pub fn mode(&self) -> FacilityMode {
        self.mode
    }

    pub fn last_mode(&self) -> FacilityMode {
        self.last_mode
    }

    pub fn is_ascram(&self) -> bool {
        self.ascram
    }

    pub fn ascram_reason(&self) -> Option<AutoScramReason> {
        self.ascram_reason
    }

    pub fn is_saturated(&self) -> bool {
        self.saturated
    }

    pub fn status_text(&self) -> &str {
        &self.status_text
    }

    pub fn charge_conversion(&self) -> f64 {
        self.charge_conversion
    }

    pub fn max_burn_mb(&self) -> f64 {
        tenths_to_mb(self.max_burn_tenths)
    }

    pub fn avg_charge(&self) -> f64 {
        self.avg_charge.mean()
    }

    pub fn avg_inflow(&self) -> f64 {
        self.avg_inflow.mean()
    }

    pub fn avg_outflow(&self) -> f64 {
        self.avg_outflow.mean()
    }

    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    pub fn units(&self) -> &[ReactorUnit] {
        &self.units
    }

    pub fn unit_mut(&mut self, id: NodeId) -> Option<&mut ReactorUnit> {
        let i = *self.unit_index.get(&id)?;
        self.units.get_mut(i)
    }

    pub fn get_group(&self, id: NodeId) -> Option<u8> {
        let i = *self.unit_index.get(&id)?;
        self.units.get(i).map(|u| u.group())
    }

    /// Members of one priority group, in allocation order. Empty until
    /// the first engage after a regroup.
    pub fn group_members(&self, group: u8) -> Vec<NodeId> {
        match group {
            1..=4 => self.prio_groups[(group - 1) as usize]
                .iter()
                .map(|&i| self.units[i].id())
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Drain one unit's command outbox; the caller routes it into that
    /// PLC's session.
    pub fn take_unit_outbox(&mut self, index: usize) -> Option<(NodeId, Vec<PlcCommand>)> {
        let unit = self.units.get_mut(index)?;
        let cmds = unit.take_outbox();
        Some((unit.id(), cmds))
    }

    // Operator surface.

    /// Stage a mode change; applied at the next update tick.
    pub fn stage_mode(&mut self, mode: FacilityMode) -> bool {
        if !mode.operator_settable() {
            return false;
        }
        self.mode_set = Some(mode);
        true
    }

    pub fn set_burn_target(&mut self, mb_per_tick: f64) {
        self.burn_target_mb = mb_per_tick.max(0.0);
    }

    pub fn set_charge_target(&mut self, energy: f64) {
        self.charge_target = energy.max(0.0);
    }

    pub fn set_gen_target(&mut self, energy_per_tick: f64) {
        self.gen_target = energy_per_tick.max(0.0);
    }

    /// Regroup a unit. Only accepted while INACTIVE.
    pub fn set_group(&mut self, id: NodeId, group: u8) -> bool {
        if self.mode != FacilityMode::Inactive || group > 4 {
            return false;
        }
        match self.unit_mut(id) {
            Some(u) => {
                u.set_group(group);
                true
            }
            None => false,
        }
    }

    /// Update a unit's burn ceiling. Only accepted while INACTIVE.
    pub fn set_burn_limit(&mut self, id: NodeId, mb_per_tick: f64) -> bool {
        if self.mode != FacilityMode::Inactive {
            return false;
        }
        match self.unit_mut(id) {
            Some(u) => {
                u.set_burn_limit(mb_per_tick);
                true
            }
            None => false,
        }
    }

    /// Operator SCRAM: everything down, facility inactive.
    pub fn operator_scram(&mut self) {
        self.enter_inactive();
    }

    /// Operator reset out of a safety hold.
    pub fn operator_reset(&mut self) {
        if matches!(
            self.mode,
            FacilityMode::UnitAlarmIdle | FacilityMode::MatrixFaultIdle
        ) {
            self.ascram = false;
            self.ascram_reason = None;
            self.enter_inactive();
        }
    }

    pub fn ack_unit_alarms(&mut self, id: Option<NodeId>) {
        match id {
            Some(id) => {
                if let Some(u) = self.unit_mut(id) {
                    u.ack_all();
                }
            }
            None => {
                for u in self.units.iter_mut() {
                    u.ack_all();
                }
            }
        }
    }

    /// Matrix telemetry from the RTU path. Every received sample enters
    /// the moving averages.
    pub fn ingest_matrix(&mut self, snap: MatrixSnapshot, now: Instant) {
        self.avg_charge.push(snap.energy);
        self.avg_inflow.push(snap.last_input);
        self.avg_outflow.push(snap.last_output);
        self.matrix = Some(snap);
        self.matrix_last_seen = Some(now);
    }

    // The per-tick control pass.

    pub fn update(&mut self, now: Instant) {
        for u in self.units.iter_mut() {
            u.update(now);
        }

        if let Some(m) = self.mode_set.take() {
            self.apply_operator_mode(m, now);
        }

        self.eval_auto_scram(now);

        match self.mode {
            FacilityMode::Inactive
            | FacilityMode::MatrixFaultIdle
            | FacilityMode::UnitAlarmIdle => {}
            FacilityMode::Simple => {
                let b = tenths_to_mb(self.max_burn_tenths);
                self.run_direct(b);
            }
            FacilityMode::BurnRate => {
                let b = self.burn_target_mb;
                self.run_direct(b);
            }
            FacilityMode::Charge => {
                let measured = self.avg_charge.mean();
                let target = self.charge_target;
                self.run_pid(now, measured, target);
            }
            FacilityMode::GenRate => {
                let measured = self.avg_inflow.mean();
                let target = self.gen_target;
                self.run_pid(now, measured, target);
            }
        }
    }

    fn apply_operator_mode(&mut self, m: FacilityMode, now: Instant) {
        if m == self.mode {
            return;
        }
        match m {
            FacilityMode::Inactive => self.enter_inactive(),
            _ if m.is_active() => {
                if !self.mode.operator_settable() {
                    tracing::warn!(
                        "[Facility] mode change to {m:?} refused during safety hold"
                    );
                    return;
                }
                if self.mode == FacilityMode::Inactive {
                    self.engage_units(m, now);
                } else {
                    // Active-to-active switch: same engagement, new loop.
                    self.last_mode = self.mode;
                    self.mode = m;
                    self.reset_pid(now);
                    self.initial_ramp = true;
                    self.waiting_on_ramp = false;
                }
            }
            _ => {}
        }
    }

    /// Entry into INACTIVE from anywhere: manual SCRAM to every
    /// assigned unit and auto control disengaged.
    fn enter_inactive(&mut self) {
        if self.mode == FacilityMode::Inactive {
            return;
        }
        tracing::info!("[Facility] entering INACTIVE");
        for u in self.units.iter_mut().filter(|u| u.group() > 0) {
            u.scram();
            u.a_disengage();
        }
        self.ascram = false;
        self.ascram_reason = None;
        self.last_mode = self.mode;
        self.mode = FacilityMode::Inactive;
        self.status_text = String::from("facility inactive");
    }

    /// Leaving INACTIVE: rebuild priority order, recompute the charge
    /// conversion from the blade totals, engage every assigned unit.
    fn engage_units(&mut self, m: FacilityMode, now: Instant) {
        for g in 0..4 {
            let mut members: Vec<usize> = self
                .units
                .iter()
                .enumerate()
                .filter(|(_, u)| u.group() as usize == g + 1)
                .map(|(i, _)| i)
                .collect();
            // Stable: declaration order breaks limit ties.
            members.sort_by_key(|&i| self.units[i].lim_br10());
            self.prio_groups[g] = members;
        }

        let assigned = || self.units.iter().filter(|u| u.group() > 0);
        let blade_total: u32 = assigned().map(|u| u.blade_count()).sum();
        self.charge_conversion = blade_total as f64 * POWER_PER_BLADE;
        self.max_burn_tenths = assigned().map(|u| u.lim_br10()).sum();

        for u in self.units.iter_mut().filter(|u| u.group() > 0) {
            u.a_engage();
        }

        self.reset_pid(now);
        self.initial_ramp = true;
        self.waiting_on_ramp = false;
        self.ascram = false;
        self.ascram_reason = None;

        self.last_mode = self.mode;
        self.mode = m;
        self.status_text = format!("engaged, mode {m:?}");
        tracing::info!(
            "[Facility] engaged {:?}: {} tenths max, conversion {}",
            m,
            self.max_burn_tenths,
            self.charge_conversion
        );
    }

    fn reset_pid(&mut self, now: Instant) {
        self.accumulator = 0.0;
        self.last_time = None;
        self.last_error = 0.0;
        self.saturated = false;
        self.time_start = Some(now);
    }

    // Automatic SCRAM.

    fn eval_auto_scram(&mut self, now: Instant) {
        if matches!(
            self.mode,
            FacilityMode::Inactive | FacilityMode::UnitAlarmIdle
        ) {
            return;
        }

        let crit = self
            .units
            .iter()
            .any(|u| u.group() > 0 && u.has_critical_alarm());

        // A critical alarm during a matrix hold abandons the hold
        // entirely; the operator starts over.
        if self.mode == FacilityMode::MatrixFaultIdle && crit {
            tracing::error!("[Facility] critical alarm during matrix hold");
            self.enter_inactive();
            return;
        }

        let fresh = self
            .matrix_last_seen
            .map(|t| now.duration_since(t) <= Duration::from_millis(MATRIX_STALE_MS))
            .unwrap_or(false);
        let formed = self.matrix.map(|m| m.formed).unwrap_or(false);

        if !fresh || !formed {
            self.trip(AutoScramReason::MatrixDc);
            return;
        }

        let fill = self.matrix.map(|m| m.fill()).unwrap_or(0.0);
        if fill >= MATRIX_FILL_TRIP
            || (self.ascram_reason == Some(AutoScramReason::MatrixFill)
                && fill > MATRIX_FILL_CLEAR)
        {
            self.trip(AutoScramReason::MatrixFill);
            return;
        }

        if crit {
            self.trip(AutoScramReason::CritAlarm);
            return;
        }

        if self.ascram
            && matches!(
                self.ascram_reason,
                Some(AutoScramReason::MatrixDc) | Some(AutoScramReason::MatrixFill)
            )
        {
            self.clear_ascram(now);
        }
    }

    fn trip(&mut self, cause: AutoScramReason) {
        if self.ascram {
            // Latched; a changed cause just updates the annunciator.
            if self.ascram_reason != Some(cause) {
                self.ascram_reason = Some(cause);
                self.status_text = format!("auto-SCRAM: {}", cause.describe());
            }
            return;
        }

        tracing::error!("[Facility] auto-SCRAM: {}", cause.describe());
        self.ascram = true;
        self.ascram_reason = Some(cause);
        self.status_text = format!("auto-SCRAM: {}", cause.describe());

        for u in self.units.iter_mut().filter(|u| u.group() > 0) {
            u.a_scram();
        }

        self.last_mode = self.mode;
        match cause {
            AutoScramReason::MatrixDc | AutoScramReason::MatrixFill => {
                if self.mode != FacilityMode::MatrixFaultIdle {
                    self.return_mode = self.mode;
                    self.mode = FacilityMode::MatrixFaultIdle;
                }
            }
            AutoScramReason::CritAlarm => {
                self.mode = FacilityMode::UnitAlarmIdle;
            }
        }
    }

    fn clear_ascram(&mut self, now: Instant) {
        tracing::info!("[Facility] auto-SCRAM cleared");
        self.ascram = false;
        self.ascram_reason = None;
        self.status_text = String::from("auto-SCRAM cleared");

        for u in self.units.iter_mut().filter(|u| u.group() > 0) {
            u.a_cond_rps_reset();
        }

        if self.mode == FacilityMode::MatrixFaultIdle {
            self.last_mode = self.mode;
            self.mode = self.return_mode;
            self.reset_pid(now);
            self.initial_ramp = true;
            self.waiting_on_ramp = false;
        }
    }

    // Control loops.

    fn run_direct(&mut self, b_mb: f64) {
        // Hold while the engage ramp is still in flight; re-committing
        // every tick would cancel it with a direct set.
        if self.waiting_on_ramp {
            if !self.all_ramps_complete() {
                return;
            }
            self.waiting_on_ramp = false;
        }

        let ramp = self.initial_ramp;
        let residual = self.allocate_burn(b_mb, ramp);
        if ramp {
            self.initial_ramp = false;
            self.waiting_on_ramp = true;
        }
        self.saturated = residual > 0 || b_mb >= tenths_to_mb(self.max_burn_tenths);
    }

    fn all_ramps_complete(&self) -> bool {
        self.units
            .iter()
            .filter(|u| u.group() > 0 && u.a_get_effective_limit() > 0)
            .all(|u| u.a_ramp_complete())
    }

    fn run_pid(&mut self, now: Instant, measured: f64, target: f64) {
        if self.charge_conversion <= 0.0 {
            return;
        }

        if self.waiting_on_ramp {
            if !self.all_ramps_complete() {
                return;
            }
            // Ramp done everywhere: integration re-arms from zero.
            if let Some(started) = self.time_start {
                tracing::debug!(
                    "[Facility] ramp complete after {:?}, integrator armed",
                    now.duration_since(started)
                );
            }
            self.waiting_on_ramp = false;
            self.accumulator = 0.0;
            self.last_time = None;
            self.time_start = Some(now);
        }

        let cc = self.charge_conversion;
        let dt = self
            .last_time
            .map(|t| now.duration_since(t).as_secs_f64())
            .unwrap_or(0.0);

        let error = (target - measured) / cc;
        if !self.saturated {
            self.accumulator += (measured / cc) * dt;
        }
        let derivative = if dt > 0.0 {
            (error - self.last_error) / dt
        } else {
            0.0
        };

        let setpoint = PID_KP * error + PID_KI * self.accumulator + PID_KD * derivative;
        self.last_error = error;
        self.last_time = Some(now);

        let sp_r = round_f64(setpoint, 1);
        let max_mb = tenths_to_mb(self.max_burn_tenths);
        let sp_c = sp_r.clamp(0.0, max_mb);
        self.saturated = sp_r != sp_c;

        let ramp = self.initial_ramp;
        let residual = self.allocate_burn(sp_c, ramp);
        if residual > 0 {
            self.saturated = true;
        }
        if ramp {
            self.initial_ramp = false;
            self.waiting_on_ramp = true;
        }
    }

    /// Distribute `b_mb` across priority groups in tenths. Within a
    /// group the share is recomputed over the remaining units whenever a
    /// unit caps at its limit; the last unit absorbs the remainder.
    /// Returns the undistributable residual in tenths.
    fn allocate_burn(&mut self, b_mb: f64, ramp: bool) -> u32 {
        let mut unallocated = (b_mb.max(0.0) * 10.0).floor() as u32;

        let groups = self.prio_groups.clone();
        for members in groups.iter() {
            let n = members.len();
            if n == 0 {
                continue;
            }
            let mut remaining = n as u32;
            for (pos, &i) in members.iter().enumerate() {
                let unit = &mut self.units[i];
                let lim = unit.a_get_effective_limit();
                let share = if pos == n - 1 {
                    unallocated
                } else {
                    unallocated / remaining
                };
                let assign = share.min(lim);
                unit.set_br10(assign);
                unit.a_commit_br10(ramp);
                unallocated -= assign;
                remaining -= 1;
            }
        }

        unallocated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PlcStatus;
    use crate::rps::{RpsStatus, TripFlags, TripReason};

    fn status(burn_target_mb: f64, ramping: bool, blades: u32) -> PlcStatus {
        PlcStatus {
            telemetry: None,
            ready: true,
            degraded: false,
            burn_target_mb,
            ramping,
            blade_count: blades,
            max_burn_mb: 100.0,
        }
    }

    fn controller(defs: &[(NodeId, u8, f64)]) -> FacilityController {
        let units = defs
            .iter()
            .map(|&(id, group, lim)| ReactorUnit::new(id, group, lim))
            .collect();
        let mut fc = FacilityController::new(units);
        for &(id, _, _) in defs {
            let u = fc.unit_mut(id).unwrap();
            u.set_connected(true);
            u.update_status(status(0.0, false, 28));
        }
        fc
    }

    fn matrix(fill: f64) -> MatrixSnapshot {
        MatrixSnapshot {
            formed: true,
            energy: fill * 4.0e9,
            max_energy: 4.0e9,
            last_input: 1.0e6,
            last_output: 5.0e5,
        }
    }

    fn engage(fc: &mut FacilityController, mode: FacilityMode, now: Instant) {
        fc.ingest_matrix(matrix(0.5), now);
        assert!(fc.stage_mode(mode));
        fc.update(now);
        assert_eq!(fc.mode(), mode);
    }

    fn br10s(fc: &FacilityController) -> Vec<u32> {
        fc.units().iter().map(|u| u.br10()).collect()
    }

    #[test]
    fn simple_mode_saturates_at_limits() {
        let now = Instant::now();
        let mut fc = controller(&[(1, 1, 5.0), (2, 1, 10.0)]);
        engage(&mut fc, FacilityMode::Simple, now);

        assert_eq!(br10s(&fc), vec![50, 100]);
        assert!(fc.is_saturated());

        // Allocation never exceeds limits.
        let total: u32 = fc.units().iter().map(|u| u.br10()).sum();
        let cap: u32 = fc.units().iter().map(|u| u.lim_br10()).sum();
        assert!(total <= cap);
    }

    #[test]
    fn burn_allocation_rebalances_on_clamp() {
        let now = Instant::now();
        let mut fc = controller(&[(1, 1, 2.0), (2, 1, 4.0), (3, 1, 8.0)]);
        fc.set_burn_target(10.0);
        engage(&mut fc, FacilityMode::BurnRate, now);

        // 100 tenths: first unit caps at 20, the rest rebalances 40/40.
        assert_eq!(br10s(&fc), vec![20, 40, 40]);
        assert!(!fc.is_saturated());
    }

    #[test]
    fn residual_when_target_exceeds_capacity() {
        let now = Instant::now();
        let mut fc = controller(&[(1, 1, 2.0), (2, 1, 4.0)]);
        fc.set_burn_target(10.0);
        engage(&mut fc, FacilityMode::BurnRate, now);

        assert_eq!(br10s(&fc), vec![20, 40]);
        assert!(fc.is_saturated());
    }

    #[test]
    fn allocation_residual_matches_floor_law() {
        let now = Instant::now();
        let mut fc = controller(&[(1, 1, 2.0), (2, 1, 4.0)]);
        engage(&mut fc, FacilityMode::Simple, now);

        // floor(B * 10) minus what fit; zero whenever B fits entirely.
        assert_eq!(fc.allocate_burn(10.0, false), 100 - 60);
        assert_eq!(fc.allocate_burn(3.3, false), 0);
        assert_eq!(fc.allocate_burn(6.0, false), 0);
    }

    #[test]
    fn priority_groups_fill_in_order() {
        let now = Instant::now();
        let mut fc = controller(&[(1, 2, 10.0), (2, 1, 5.0)]);
        fc.set_burn_target(8.0);
        engage(&mut fc, FacilityMode::BurnRate, now);

        // Group 1 (unit 2) takes its full 50 first; group 2 gets 30.
        assert_eq!(fc.unit_mut(2).unwrap().br10(), 50);
        assert_eq!(fc.unit_mut(1).unwrap().br10(), 30);
    }

    #[test]
    fn group_map_roundtrip_and_membership() {
        let now = Instant::now();
        let mut fc = controller(&[(1, 1, 5.0), (2, 1, 2.0)]);

        assert!(fc.set_group(1, 3));
        assert_eq!(fc.get_group(1), Some(3));

        engage(&mut fc, FacilityMode::Simple, now);
        assert_eq!(fc.group_members(3), vec![1]);
        // Sorted ascending by limit: unit 2 (20) alone in group 1.
        assert_eq!(fc.group_members(1), vec![2]);

        // Regrouping refused outside INACTIVE.
        assert!(!fc.set_group(1, 2));
    }

    #[test]
    fn inactive_disengages_everything() {
        let now = Instant::now();
        let mut fc = controller(&[(1, 1, 5.0), (2, 1, 10.0)]);
        engage(&mut fc, FacilityMode::Simple, now);

        fc.stage_mode(FacilityMode::Inactive);
        fc.update(now + Duration::from_millis(50));

        assert_eq!(fc.mode(), FacilityMode::Inactive);
        for u in fc.units() {
            assert!(!u.is_auto_engaged());
            assert_eq!(u.br10(), 0);
        }
    }

    #[test]
    fn matrix_fill_hysteresis() {
        let mut now = Instant::now();
        let mut fc = controller(&[(1, 1, 5.0)]);
        engage(&mut fc, FacilityMode::Charge, now);

        // Fill crosses 1.0: trip, hold, remember the return mode.
        now += Duration::from_millis(50);
        fc.ingest_matrix(matrix(1.0), now);
        fc.update(now);
        assert!(fc.is_ascram());
        assert_eq!(fc.ascram_reason(), Some(AutoScramReason::MatrixFill));
        assert_eq!(fc.mode(), FacilityMode::MatrixFaultIdle);
        assert!(fc.units()[0].was_auto_scrammed());

        // 0.97 is inside the hysteresis band: latch persists.
        now += Duration::from_millis(50);
        fc.ingest_matrix(matrix(0.97), now);
        fc.update(now);
        assert!(fc.is_ascram());
        assert_eq!(fc.mode(), FacilityMode::MatrixFaultIdle);

        // 0.94 clears the latch and restores the previous mode.
        now += Duration::from_millis(50);
        fc.ingest_matrix(matrix(0.94), now);
        fc.update(now);
        assert!(!fc.is_ascram());
        assert_eq!(fc.ascram_reason(), None);
        assert_eq!(fc.mode(), FacilityMode::Charge);
    }

    #[test]
    fn matrix_absent_trips_dc() {
        let now = Instant::now();
        let mut fc = controller(&[(1, 1, 5.0)]);
        engage(&mut fc, FacilityMode::BurnRate, now);

        // Telemetry goes stale.
        let later = now + Duration::from_millis(MATRIX_STALE_MS + 100);
        fc.update(later);
        assert!(fc.is_ascram());
        assert_eq!(fc.ascram_reason(), Some(AutoScramReason::MatrixDc));
        assert_eq!(fc.mode(), FacilityMode::MatrixFaultIdle);

        // Telemetry returns below the fill band: hold releases.
        let back = later + Duration::from_millis(50);
        fc.ingest_matrix(matrix(0.5), back);
        fc.update(back);
        assert!(!fc.is_ascram());
        assert_eq!(fc.mode(), FacilityMode::BurnRate);
    }

    #[test]
    fn critical_alarm_holds_until_operator_reset() {
        let mut now = Instant::now();
        let mut fc = controller(&[(1, 1, 5.0), (2, 1, 5.0)]);
        engage(&mut fc, FacilityMode::Charge, now);

        now += Duration::from_millis(50);
        fc.ingest_matrix(matrix(0.5), now);
        fc.unit_mut(1).unwrap().update_rps(RpsStatus {
            flags: TripFlags::default(),
            tripped: true,
            first_trip: Some(TripReason::DmgCrit),
            manual: false,
        });
        fc.update(now);

        assert!(fc.is_ascram());
        assert_eq!(fc.ascram_reason(), Some(AutoScramReason::CritAlarm));
        assert_eq!(fc.mode(), FacilityMode::UnitAlarmIdle);
        assert!(fc.units().iter().all(|u| u.was_auto_scrammed()));

        // No automatic exit, whatever the matrix does.
        now += Duration::from_millis(50);
        fc.ingest_matrix(matrix(0.4), now);
        fc.update(now);
        assert_eq!(fc.mode(), FacilityMode::UnitAlarmIdle);

        fc.operator_reset();
        assert_eq!(fc.mode(), FacilityMode::Inactive);
        assert!(!fc.is_ascram());
    }

    #[test]
    fn pid_clamps_and_freezes_integrator() {
        let mut now = Instant::now();
        let mut fc = controller(&[(1, 1, 10.0)]);
        fc.set_charge_target(1.0e9);
        fc.ingest_matrix(
            MatrixSnapshot {
                formed: true,
                energy: 0.0,
                max_energy: 4.0e9,
                last_input: 0.0,
                last_output: 0.0,
            },
            now,
        );
        fc.stage_mode(FacilityMode::Charge);
        fc.update(now);

        // Far below target: output rails at the combined maximum.
        assert_eq!(fc.units()[0].br10(), 100);
        assert!(fc.is_saturated());

        // Report the ramp finished so integration re-arms, then hold the
        // error: the clamped output must stay railed, not wind up.
        fc.unit_mut(1).unwrap().update_status(status(10.0, false, 28));
        for _ in 0..5 {
            now += Duration::from_millis(50);
            fc.ingest_matrix(
                MatrixSnapshot {
                    formed: true,
                    energy: 0.0,
                    max_energy: 4.0e9,
                    last_input: 0.0,
                    last_output: 0.0,
                },
                now,
            );
            fc.update(now);
        }
        assert!(fc.is_saturated());
        assert_eq!(fc.units()[0].br10(), 100);
    }

    #[test]
    fn operator_cannot_stage_safety_holds() {
        let mut fc = controller(&[(1, 1, 5.0)]);
        assert!(!fc.stage_mode(FacilityMode::MatrixFaultIdle));
        assert!(!fc.stage_mode(FacilityMode::UnitAlarmIdle));
    }

    #[test]
    fn burn_limit_gated_on_inactive() {
        let now = Instant::now();
        let mut fc = controller(&[(1, 1, 5.0)]);
        assert!(fc.set_burn_limit(1, 8.0));
        assert_eq!(fc.unit_mut(1).unwrap().lim_br10(), 80);

        engage(&mut fc, FacilityMode::Simple, now);
        assert!(!fc.set_burn_limit(1, 2.0));
    }
}
