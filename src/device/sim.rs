//! In-memory peripherals for tests and the demo facility.
//!
//! These are not physics models: every quantity is a settable field, and
//! the burn rate simply follows the commanded setpoint while active. The
//! handles are cheap clones over shared state so a test can inject a
//! condition while the node owns the device.

use super::{DeviceError, DeviceResult, InductionMatrix, ReactorDevice, RedstoneIo};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug)]
struct SimReactorInner {
    active: bool,
    burn_setpoint: f64,
    temp_k: f64,
    fuel_fill: f64,
    coolant_fill: f64,
    waste_fill: f64,
    heated_coolant_fill: f64,
    damage_pct: f64,
    boil_rate: f64,
    env_loss: f64,
    fail: bool,
    scram_count: u32,
}

impl Default for SimReactorInner {
    fn default() -> Self {
        Self {
            active: false,
            burn_setpoint: 0.0,
            temp_k: 300.0,
            fuel_fill: 1.0,
            coolant_fill: 1.0,
            waste_fill: 0.0,
            heated_coolant_fill: 0.0,
            damage_pct: 0.0,
            boil_rate: 0.0,
            env_loss: 0.0,
            fail: false,
            scram_count: 0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SimReactor {
    inner: Arc<Mutex<SimReactorInner>>,
}

impl SimReactor {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SimReactorInner> {
        match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn read<T>(&self, f: impl FnOnce(&SimReactorInner) -> T) -> DeviceResult<T> {
        let inner = self.lock();
        if inner.fail {
            return Err(DeviceError::Unreadable("sim fault injected".into()));
        }
        Ok(f(&inner))
    }

    // Inspection / injection handles for tests.

    pub fn observed_burn_rate(&self) -> f64 {
        let inner = self.lock();
        if inner.active && !inner.fail {
            inner.burn_setpoint
        } else {
            0.0
        }
    }

    pub fn observed_setpoint(&self) -> f64 {
        self.lock().burn_setpoint
    }

    pub fn is_active(&self) -> bool {
        self.lock().active
    }

    pub fn scram_count(&self) -> u32 {
        self.lock().scram_count
    }

    pub fn set_temperature(&self, temp_k: f64) {
        self.lock().temp_k = temp_k;
    }

    pub fn set_fuel_fill(&self, fill: f64) {
        self.lock().fuel_fill = fill;
    }

    pub fn set_coolant_fill(&self, fill: f64) {
        self.lock().coolant_fill = fill;
    }

    pub fn set_waste_fill(&self, fill: f64) {
        self.lock().waste_fill = fill;
    }

    pub fn set_heated_coolant_fill(&self, fill: f64) {
        self.lock().heated_coolant_fill = fill;
    }

    pub fn set_damage_percent(&self, pct: f64) {
        self.lock().damage_pct = pct;
    }

    pub fn set_fail(&self, fail: bool) {
        self.lock().fail = fail;
    }
}

impl ReactorDevice for SimReactor {
    fn scram(&mut self) -> DeviceResult<()> {
        let mut inner = self.lock();
        inner.active = false;
        inner.scram_count += 1;
        Ok(())
    }

    fn activate(&mut self) -> DeviceResult<()> {
        let mut inner = self.lock();
        if inner.fail {
            return Err(DeviceError::Faulted("sim fault injected".into()));
        }
        inner.active = true;
        Ok(())
    }

    fn set_burn_rate(&mut self, mb_per_tick: f64) -> DeviceResult<()> {
        let mut inner = self.lock();
        if inner.fail {
            return Err(DeviceError::Faulted("sim fault injected".into()));
        }
        inner.burn_setpoint = mb_per_tick.max(0.0);
        Ok(())
    }

    fn status(&self) -> DeviceResult<bool> {
        self.read(|i| i.active)
    }

    fn temperature(&self) -> DeviceResult<f64> {
        self.read(|i| i.temp_k)
    }

    fn fuel_fill(&self) -> DeviceResult<f64> {
        self.read(|i| i.fuel_fill)
    }

    fn coolant_fill(&self) -> DeviceResult<f64> {
        self.read(|i| i.coolant_fill)
    }

    fn waste_fill(&self) -> DeviceResult<f64> {
        self.read(|i| i.waste_fill)
    }

    fn heated_coolant_fill(&self) -> DeviceResult<f64> {
        self.read(|i| i.heated_coolant_fill)
    }

    fn damage_percent(&self) -> DeviceResult<f64> {
        self.read(|i| i.damage_pct)
    }

    fn burn_rate(&self) -> DeviceResult<f64> {
        self.read(|i| if i.active { i.burn_setpoint } else { 0.0 })
    }

    fn boil_rate(&self) -> DeviceResult<f64> {
        self.read(|i| i.boil_rate)
    }

    fn environmental_loss(&self) -> DeviceResult<f64> {
        self.read(|i| i.env_loss)
    }
}

#[derive(Debug)]
struct SimMatrixInner {
    formed: bool,
    energy: f64,
    max_energy: f64,
    last_input: f64,
    last_output: f64,
}

#[derive(Debug, Clone)]
pub struct SimMatrix {
    inner: Arc<Mutex<SimMatrixInner>>,
}

impl SimMatrix {
    pub fn new(max_energy: f64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SimMatrixInner {
                formed: true,
                energy: 0.0,
                max_energy,
                last_input: 0.0,
                last_output: 0.0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimMatrixInner> {
        match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn set_energy(&self, energy: f64) {
        self.lock().energy = energy;
    }

    pub fn set_flows(&self, input: f64, output: f64) {
        let mut inner = self.lock();
        inner.last_input = input;
        inner.last_output = output;
    }

    pub fn set_formed(&self, formed: bool) {
        self.lock().formed = formed;
    }
}

impl InductionMatrix for SimMatrix {
    fn formed(&self) -> DeviceResult<bool> {
        Ok(self.lock().formed)
    }

    fn energy(&self) -> DeviceResult<f64> {
        Ok(self.lock().energy)
    }

    fn max_energy(&self) -> DeviceResult<f64> {
        Ok(self.lock().max_energy)
    }

    fn last_input(&self) -> DeviceResult<f64> {
        Ok(self.lock().last_input)
    }

    fn last_output(&self) -> DeviceResult<f64> {
        Ok(self.lock().last_output)
    }
}

/// Sixteen channels of settable redstone.
#[derive(Debug, Clone, Default)]
pub struct SimRedstone {
    bits: Arc<Mutex<[bool; 16]>>,
}

impl SimRedstone {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RedstoneIo for SimRedstone {
    fn get(&self, channel: u8) -> DeviceResult<bool> {
        let bits = match self.bits.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        bits.get(channel as usize)
            .copied()
            .ok_or(DeviceError::Unreadable(format!("channel {channel}")))
    }

    fn set(&mut self, channel: u8, value: bool) -> DeviceResult<()> {
        let mut bits = match self.bits.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        match bits.get_mut(channel as usize) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(DeviceError::Unreadable(format!("channel {channel}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sim_reactor_follows_setpoint_when_active() {
        let mut r = SimReactor::new();
        r.set_burn_rate(4.2).unwrap();
        assert_eq!(r.observed_burn_rate(), 0.0);

        r.activate().unwrap();
        assert!((r.observed_burn_rate() - 4.2).abs() < 1e-12);
    }

    #[test]
    fn sim_reactor_scram_zeroes_burn() {
        let mut r = SimReactor::new();
        r.activate().unwrap();
        r.set_burn_rate(2.0).unwrap();
        r.scram().unwrap();
        assert_eq!(r.observed_burn_rate(), 0.0);
        assert_eq!(r.scram_count(), 1);
    }

    #[test]
    fn sim_reactor_fail_makes_reads_err() {
        let r = SimReactor::new();
        r.set_fail(true);
        assert!(r.snapshot().is_err());
    }

    #[test]
    fn sim_matrix_fill() {
        let m = SimMatrix::new(1000.0);
        m.set_energy(250.0);
        let snap = m.snapshot().unwrap();
        assert!((snap.fill() - 0.25).abs() < 1e-12);

        m.set_formed(false);
        assert_eq!(m.snapshot().unwrap().fill(), 0.0);
    }
}
