//! Reactor Protection System: the per-reactor safety interlock.
//!
//! A fixed set of trip predicates is evaluated against every reactor
//! read; any true predicate latches a SCRAM. The latch survives until an
//! explicit reset with all predicates clear. Trip evaluation is pure
//! over the snapshot plus a handful of externally latched conditions
//! (operator SCRAM, supervisor auto-SCRAM, comms timeout, degraded
//! init) that the PLC raises through dedicated methods.

use crate::device::ReactorDevice;
use serde::{Deserialize, Serialize};

/// Trip thresholds. These are protection limits, not tuning knobs; the
/// defaults match the reactor's published safe envelope.
pub const DEFAULT_HIGH_TEMP_K: f64 = 1200.0;
pub const DEFAULT_LOW_COOLANT_FILL: f64 = 0.10;
pub const DEFAULT_HIGH_WASTE_FILL: f64 = 0.80;
pub const DEFAULT_HIGH_HEATED_COOLANT_FILL: f64 = 0.80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TripReason {
    DmgCrit,
    HighTemp,
    NoCoolant,
    FullWaste,
    HeatedCoolantBackup,
    NoFuel,
    Fault,
    Timeout,
    Manual,
    Automatic,
    SysFail,
    ForceDisabled,
}

impl TripReason {
    pub fn describe(&self) -> &'static str {
        match self {
            TripReason::DmgCrit => "reactor damage critical",
            TripReason::HighTemp => "core temperature high",
            TripReason::NoCoolant => "coolant level low-low",
            TripReason::FullWaste => "waste tank high",
            TripReason::HeatedCoolantBackup => "heated coolant backed up",
            TripReason::NoFuel => "fuel exhausted",
            TripReason::Fault => "reactor peripheral fault",
            TripReason::Timeout => "supervisor connection timeout",
            TripReason::Manual => "manual SCRAM",
            TripReason::Automatic => "automatic SCRAM",
            TripReason::SysFail => "PLC init degraded",
            TripReason::ForceDisabled => "reactor force disabled",
        }
    }
}

/// The full trip vector, exported verbatim in RPS status frames.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TripFlags {
    pub dmg_crit: bool,
    pub high_temp: bool,
    pub no_coolant: bool,
    pub full_waste: bool,
    pub heated_coolant_backup: bool,
    pub no_fuel: bool,
    pub fault: bool,
    pub timeout: bool,
    pub manual: bool,
    pub automatic: bool,
    pub sys_fail: bool,
    pub force_disabled: bool,
}

impl TripFlags {
    pub fn any(&self) -> bool {
        self.first().is_some()
    }

    /// Highest-priority active trip. Damage outranks everything; the
    /// external latches come after the physical predicates.
    pub fn first(&self) -> Option<TripReason> {
        if self.dmg_crit {
            Some(TripReason::DmgCrit)
        } else if self.high_temp {
            Some(TripReason::HighTemp)
        } else if self.no_coolant {
            Some(TripReason::NoCoolant)
        } else if self.full_waste {
            Some(TripReason::FullWaste)
        } else if self.heated_coolant_backup {
            Some(TripReason::HeatedCoolantBackup)
        } else if self.no_fuel {
            Some(TripReason::NoFuel)
        } else if self.fault {
            Some(TripReason::Fault)
        } else if self.timeout {
            Some(TripReason::Timeout)
        } else if self.manual {
            Some(TripReason::Manual)
        } else if self.automatic {
            Some(TripReason::Automatic)
        } else if self.sys_fail {
            Some(TripReason::SysFail)
        } else if self.force_disabled {
            Some(TripReason::ForceDisabled)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpsLimits {
    pub high_temp_k: f64,
    pub low_coolant_fill: f64,
    pub high_waste_fill: f64,
    pub high_heated_coolant_fill: f64,
}

impl Default for RpsLimits {
    fn default() -> Self {
        Self {
            high_temp_k: DEFAULT_HIGH_TEMP_K,
            low_coolant_fill: DEFAULT_LOW_COOLANT_FILL,
            high_waste_fill: DEFAULT_HIGH_WASTE_FILL,
            high_heated_coolant_fill: DEFAULT_HIGH_HEATED_COOLANT_FILL,
        }
    }
}

/// Status export, stable until reset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpsStatus {
    pub flags: TripFlags,
    pub tripped: bool,
    pub first_trip: Option<TripReason>,
    pub manual: bool,
}

pub struct Rps {
    limits: RpsLimits,
    flags: TripFlags,
    tripped: bool,
    first_trip: Option<TripReason>,
}

impl Rps {
    pub fn new(limits: RpsLimits) -> Self {
        Self {
            limits,
            flags: TripFlags::default(),
            tripped: false,
            first_trip: None,
        }
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped
    }

    pub fn first_trip(&self) -> Option<TripReason> {
        self.first_trip
    }

    /// Operator SCRAM. Latches on the next `scan`.
    pub fn trip_manual(&mut self) {
        self.flags.manual = true;
    }

    /// Supervisor-requested SCRAM.
    pub fn trip_automatic(&mut self) {
        self.flags.automatic = true;
    }

    /// Comms watchdog expired.
    pub fn trip_timeout(&mut self) {
        self.flags.timeout = true;
    }

    /// Degraded-init marker. Persists across resets until the PLC
    /// clears it after a successful re-init.
    pub fn set_sys_fail(&mut self, failed: bool) {
        self.flags.sys_fail = failed;
    }

    /// Evaluate all trip predicates against a fresh device read and
    /// latch on any true predicate. Invokes the device `scram()`
    /// primitive exactly once, on the untripped-to-tripped transition.
    /// Idempotent with respect to call frequency.
    ///
    /// `should_be_active` is the PLC's enable intent; a reactor that
    /// reports itself off while commanded hot trips `force_disabled`.
    pub fn scan(
        &mut self,
        reactor: Option<&mut dyn ReactorDevice>,
        should_be_active: bool,
    ) -> (bool, Option<TripReason>) {
        let mut dev = reactor;

        match dev.as_deref_mut() {
            None => {
                self.flags.fault = true;
            }
            Some(r) => match r.snapshot() {
                Ok(snap) => {
                    self.flags.fault = false;
                    self.flags.dmg_crit = snap.damage_pct >= 100.0;
                    self.flags.high_temp = snap.temp_k >= self.limits.high_temp_k;
                    self.flags.no_coolant = snap.coolant_fill < self.limits.low_coolant_fill;
                    self.flags.full_waste = snap.waste_fill >= self.limits.high_waste_fill;
                    self.flags.heated_coolant_backup =
                        snap.heated_coolant_fill >= self.limits.high_heated_coolant_fill;
                    self.flags.no_fuel = snap.fuel_fill <= 0.0;
                    self.flags.force_disabled = should_be_active && !snap.active;
                }
                Err(e) => {
                    // Keep the last known flag vector; only fault flips.
                    crate::warn_throttled!(
                        std::time::Duration::from_secs(5),
                        "RPS: reactor unreadable: {e}"
                    );
                    self.flags.fault = true;
                }
            },
        }

        if !self.tripped && self.flags.any() {
            self.tripped = true;
            self.first_trip = self.flags.first();
            if let Some(reason) = self.first_trip {
                tracing::error!("RPS: SCRAM latched: {}", reason.describe());
            }
            if let Some(r) = dev.as_deref_mut()
                && let Err(e) = r.scram()
            {
                tracing::error!("RPS: device scram failed: {e}");
            }
        }

        (self.tripped, self.first_trip)
    }

    /// Clear the latch if every predicate is currently false.
    ///
    /// The one-shot external latches (manual, automatic, timeout) are
    /// consumed by the reset request itself; the physical predicates are
    /// re-read from the device. A reset against an unreadable device
    /// fails on `fault`.
    pub fn reset(&mut self, reactor: Option<&dyn ReactorDevice>) -> bool {
        self.flags.manual = false;
        self.flags.automatic = false;
        self.flags.timeout = false;
        self.flags.force_disabled = false;

        match reactor {
            None => self.flags.fault = true,
            Some(r) => match r.snapshot() {
                Ok(snap) => {
                    self.flags.fault = false;
                    self.flags.dmg_crit = snap.damage_pct >= 100.0;
                    self.flags.high_temp = snap.temp_k >= self.limits.high_temp_k;
                    self.flags.no_coolant = snap.coolant_fill < self.limits.low_coolant_fill;
                    self.flags.full_waste = snap.waste_fill >= self.limits.high_waste_fill;
                    self.flags.heated_coolant_backup =
                        snap.heated_coolant_fill >= self.limits.high_heated_coolant_fill;
                    self.flags.no_fuel = snap.fuel_fill <= 0.0;
                }
                Err(_) => self.flags.fault = true,
            },
        }

        if self.flags.any() {
            tracing::warn!(
                "RPS: reset refused, active trip: {:?}",
                self.flags.first().map(|r| r.describe())
            );
            return false;
        }

        self.tripped = false;
        self.first_trip = None;
        tracing::info!("RPS: latch cleared");
        true
    }

    pub fn status(&self) -> RpsStatus {
        RpsStatus {
            flags: self.flags,
            tripped: self.tripped,
            first_trip: self.first_trip,
            manual: self.flags.manual,
        }
    }
}
