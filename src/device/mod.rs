use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::{error::Error, fmt};

pub mod sim;

/// One full read of the fission reactor, taken at a tick boundary.
/// Fills are fractions in `[0, 1]`, temperature in kelvin, damage in
/// percent, burn/boil rates in mB/t.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReactorSnapshot {
    pub active: bool,
    pub fuel_fill: f64,
    pub coolant_fill: f64,
    pub waste_fill: f64,
    pub heated_coolant_fill: f64,
    pub temp_k: f64,
    pub damage_pct: f64,
    pub boil_rate: f64,
    pub burn_rate: f64,
    pub env_loss: f64,
}

/// One full read of the induction matrix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatrixSnapshot {
    pub formed: bool,
    pub energy: f64,
    pub max_energy: f64,
    pub last_input: f64,
    pub last_output: f64,
}

impl MatrixSnapshot {
    /// Fill fraction; zero for an unformed or zero-capacity matrix.
    pub fn fill(&self) -> f64 {
        if !self.formed || self.max_energy <= 0.0 {
            return 0.0;
        }
        self.energy / self.max_energy
    }
}

#[derive(Debug)]
pub enum DeviceError {
    /// The peripheral did not answer or answered garbage.
    Unreadable(String),
    /// The peripheral answered but reported an internal fault.
    Faulted(String),
    /// No device is mounted in this slot.
    NotMounted,
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceError::Unreadable(s) => write!(f, "device unreadable: {s}"),
            DeviceError::Faulted(s) => write!(f, "device faulted: {s}"),
            DeviceError::NotMounted => write!(f, "device not mounted"),
        }
    }
}

impl Error for DeviceError {}

pub type DeviceResult<T> = Result<T, DeviceError>;

/// The fission reactor peripheral as the PLC sees it.
pub trait ReactorDevice: Send {
    /// Drop the control rods. Must be safe to call repeatedly.
    fn scram(&mut self) -> DeviceResult<()>;
    fn activate(&mut self) -> DeviceResult<()>;
    fn set_burn_rate(&mut self, mb_per_tick: f64) -> DeviceResult<()>;

    fn status(&self) -> DeviceResult<bool>;
    fn temperature(&self) -> DeviceResult<f64>;
    fn fuel_fill(&self) -> DeviceResult<f64>;
    fn coolant_fill(&self) -> DeviceResult<f64>;
    fn waste_fill(&self) -> DeviceResult<f64>;
    fn heated_coolant_fill(&self) -> DeviceResult<f64>;
    fn damage_percent(&self) -> DeviceResult<f64>;
    fn burn_rate(&self) -> DeviceResult<f64>;
    fn boil_rate(&self) -> DeviceResult<f64>;
    fn environmental_loss(&self) -> DeviceResult<f64>;

    /// One coherent read of everything the RPS and status reports need.
    fn snapshot(&self) -> DeviceResult<ReactorSnapshot> {
        Ok(ReactorSnapshot {
            active: self.status()?,
            fuel_fill: self.fuel_fill()?,
            coolant_fill: self.coolant_fill()?,
            waste_fill: self.waste_fill()?,
            heated_coolant_fill: self.heated_coolant_fill()?,
            temp_k: self.temperature()?,
            damage_pct: self.damage_percent()?,
            boil_rate: self.boil_rate()?,
            burn_rate: self.burn_rate()?,
            env_loss: self.environmental_loss()?,
        })
    }
}

/// The induction matrix peripheral as an RTU gateway sees it.
pub trait InductionMatrix: Send {
    fn formed(&self) -> DeviceResult<bool>;
    fn energy(&self) -> DeviceResult<f64>;
    fn max_energy(&self) -> DeviceResult<f64>;
    fn last_input(&self) -> DeviceResult<f64>;
    fn last_output(&self) -> DeviceResult<f64>;

    fn snapshot(&self) -> DeviceResult<MatrixSnapshot> {
        Ok(MatrixSnapshot {
            formed: self.formed()?,
            energy: self.energy()?,
            max_energy: self.max_energy()?,
            last_input: self.last_input()?,
            last_output: self.last_output()?,
        })
    }
}

/// Bit-level redstone I/O per configured channel.
pub trait RedstoneIo: Send {
    fn get(&self, channel: u8) -> DeviceResult<bool>;
    fn set(&mut self, channel: u8, value: bool) -> DeviceResult<()>;
}

/// Hand-off slot between the host and a node's event loop.
///
/// The host deposits a device before (or after) spawning the node; the
/// loop `take`s it at a loop boundary and becomes the single owner.
/// Re-mount is a fresh deposit plus a mount event.
pub struct DeviceSlot<T: ?Sized> {
    inner: Arc<Mutex<Option<Box<T>>>>,
}

impl<T: ?Sized> Clone for DeviceSlot<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: ?Sized> Default for DeviceSlot<T> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(None)),
        }
    }
}

impl<T: ?Sized> DeviceSlot<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deposit(&self, device: Box<T>) {
        let mut slot = match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        *slot = Some(device);
    }

    pub fn take(&self) -> Option<Box<T>> {
        let mut slot = match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        slot.take()
    }

    pub fn is_loaded(&self) -> bool {
        match self.inner.lock() {
            Ok(g) => g.is_some(),
            Err(poisoned) => poisoned.into_inner().is_some(),
        }
    }
}

/// Explicit owner of a node's peripherals. Replaces any ambient device
/// registry: mount and unmount happen only here, at loop boundaries.
#[derive(Default)]
pub struct DeviceManager {
    reactor: Option<Box<dyn ReactorDevice>>,
}

impl DeviceManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mount_reactor(&mut self, device: Box<dyn ReactorDevice>) {
        tracing::info!("[Devices] reactor mounted");
        self.reactor = Some(device);
    }

    pub fn unmount_reactor(&mut self) -> Option<Box<dyn ReactorDevice>> {
        if self.reactor.is_some() {
            tracing::warn!("[Devices] reactor unmounted");
        }
        self.reactor.take()
    }

    pub fn reactor(&self) -> Option<&dyn ReactorDevice> {
        self.reactor.as_deref()
    }

    pub fn reactor_mut(&mut self) -> Option<&mut (dyn ReactorDevice + '_)> {
        self.reactor.as_mut().map(|b| b.as_mut() as &mut dyn ReactorDevice)
    }

    pub fn reactor_mounted(&self) -> bool {
        self.reactor.is_some()
    }
}
