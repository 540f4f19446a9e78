//! Reactor-PLC node.
//!
//! One PLC owns one reactor peripheral and one modem. Its loop applies
//! burn setpoints from the supervisor (ramped or direct), scans the RPS
//! every tick, reports telemetry on a fixed cadence, and latches a
//! timeout SCRAM when the supervisor link goes silent. No fission
//! happens while the RPS is tripped: the effective burn target is zero
//! and the device stays scrammed.

use crate::device::{DeviceManager, DeviceSlot, ReactorDevice};
use crate::model::{BaseNode, ExecutionResult, NodeContext, NodeEvent, StopKind, StopState};
use crate::protocol::medium::{MediumProvider, Modem};
use crate::protocol::{
    ChannelId, LINK_VERSION, MgmtFrame, NodeId, Packet, Payload, PeerRole, PlcCommand, PlcStatus,
    SeqNum,
};
use crate::rps::{Rps, RpsLimits, RpsStatus, TripReason};
use crate::utils::{CancelToken, TickClock, Watchdog, epoch_ms};
use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Nominal controller tick.
pub const TICK_MS: u64 = 50;
/// Telemetry broadcast cadence, in ticks.
pub const STATUS_EVERY_TICKS: u64 = 4;
/// Inbound-silence window before the timeout trip.
pub const DEFAULT_COMMS_WATCHDOG_MS: u64 = 3_000;
/// Re-announce period while unlinked.
pub const ESTABLISH_RETRY_MS: u64 = 2_000;
/// Ramp step per tick, as a fraction of the burn limit.
pub const RAMP_FRACTION_PER_TICK: f64 = 0.10;
/// A ramp is complete when the setpoint is this close to the target.
pub const RAMP_EPSILON_MB: f64 = 0.05;

fn default_comms_watchdog_ms() -> u64 {
    DEFAULT_COMMS_WATCHDOG_MS
}

fn default_tick_ms() -> u64 {
    TICK_MS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlcConfig {
    /// This PLC's node id on the wire; also the facility unit id.
    pub id: NodeId,
    /// Whether this PLC talks to a supervisor at all. Read explicitly
    /// from configuration; a non-networked PLC only enforces the RPS.
    pub networked: bool,
    /// Channel this PLC listens on. One PLC per channel.
    pub listen_channel: ChannelId,
    /// Channel the supervisor listens on.
    pub supervisor_channel: ChannelId,
    /// Operator-configured burn ceiling, mB/t.
    pub burn_limit_mb: f64,
    /// Turbine blades behind this reactor; defines power-per-burn.
    pub blade_count: u32,
    #[serde(default)]
    pub rps: RpsLimits,
    #[serde(default = "default_comms_watchdog_ms")]
    pub comms_watchdog_ms: u64,
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
}

/// Host events for the PLC loop. Devices travel through the context's
/// hand-off slot; the event only signals that the slot changed.
#[derive(Debug)]
pub enum PlcEvent {
    ReactorMounted,
    ReactorUnmounted,
    /// Local operator SCRAM (front panel).
    Scram,
    /// Local operator RPS reset.
    RpsReset,
}

impl NodeEvent for PlcEvent {}

#[derive(Clone)]
pub struct PlcCtx<P: MediumProvider> {
    pub medium: P,
    pub reactor: DeviceSlot<dyn ReactorDevice>,
}

impl<P: MediumProvider> NodeContext for PlcCtx<P> {}

/// Initiator side of the supervisor link.
struct Uplink {
    established: bool,
    next_seq_out: SeqNum,
    last_seq_in: Option<SeqNum>,
    watchdog: Watchdog,
    keepalive_every: Duration,
    last_keepalive_tx: Instant,
    last_establish_tx: Option<Instant>,
}

impl Uplink {
    fn new(watchdog_ms: u64, now: Instant) -> Self {
        let mut watchdog = Watchdog::new(0, Duration::from_millis(watchdog_ms));
        watchdog.disarm();
        Self {
            established: false,
            next_seq_out: 0,
            last_seq_in: None,
            watchdog,
            // Cadence stays at or under half the watchdog window.
            keepalive_every: Duration::from_millis(watchdog_ms / 2),
            last_keepalive_tx: now,
            last_establish_tx: None,
        }
    }

    fn accept_seq(&mut self, seq: SeqNum) -> bool {
        if let Some(last) = self.last_seq_in
            && seq <= last
        {
            return false;
        }
        self.last_seq_in = Some(seq);
        true
    }

    fn drop_link(&mut self) {
        self.established = false;
        self.last_seq_in = None;
        self.watchdog.disarm();
    }
}

pub struct PlcNode<P: MediumProvider> {
    cfg: PlcConfig,
    ctx: PlcCtx<P>,
    devices: DeviceManager,
    rps: Rps,
    modem: Option<P::ModemT>,
    uplink: Uplink,
    clock: TickClock,
    /// Supervisor-commanded enable.
    enable: bool,
    /// Commanded burn target, mB/t (already clamped).
    target_mb: f64,
    /// Setpoint currently written to the device.
    setpoint_mb: f64,
    /// Ramp in progress toward `target_mb`.
    ramping: bool,
    degraded: bool,
    /// Rising-edge memory for final-frame transmission.
    was_tripped: bool,
    last_rps_sent: Option<RpsStatus>,
    cancel: CancelToken,
}

impl<P: MediumProvider> PlcNode<P> {
    fn send(&mut self, payload: Payload) {
        let Some(modem) = self.modem.as_mut() else {
            return;
        };
        let pkt = Packet::new(self.cfg.id, self.uplink.next_seq_out, payload);
        self.uplink.next_seq_out = self.uplink.next_seq_out.wrapping_add(1);
        if let Err(e) = modem.transmit(self.cfg.supervisor_channel, self.cfg.listen_channel, &pkt)
        {
            crate::warn_throttled!(Duration::from_secs(5), "[PLC] transmit failed: {e}");
        }
    }

    fn send_status(&mut self) {
        let telemetry = self
            .devices
            .reactor()
            .and_then(|r| r.snapshot().ok());
        let status = PlcStatus {
            telemetry,
            ready: self.devices.reactor_mounted() && !self.degraded,
            degraded: self.degraded,
            burn_target_mb: self.effective_target(),
            ramping: self.ramping,
            blade_count: self.cfg.blade_count,
            max_burn_mb: self.cfg.burn_limit_mb,
        };
        self.send(Payload::PlcStatus(status));
    }

    fn send_rps_status(&mut self) {
        let status = self.rps.status();
        self.last_rps_sent = Some(status.clone());
        self.send(Payload::PlcRpsStatus(status));
    }

    /// Burn target after the safety gates: zero when disabled or tripped.
    fn effective_target(&self) -> f64 {
        if !self.enable || self.rps.is_tripped() {
            0.0
        } else {
            self.target_mb.clamp(0.0, self.cfg.burn_limit_mb)
        }
    }

    fn apply_command(&mut self, cmd: PlcCommand) {
        match cmd {
            PlcCommand::SetBurn {
                enable,
                mb_per_tick,
                ramp,
            } => {
                // Out-of-range values clamp silently; the next status
                // report shows what was actually applied.
                self.enable = enable;
                self.target_mb = mb_per_tick.clamp(0.0, self.cfg.burn_limit_mb);
                self.ramping = ramp;
            }
            PlcCommand::SetLimit { mb_per_tick } => {
                if mb_per_tick >= 0.0 {
                    self.cfg.burn_limit_mb = mb_per_tick;
                    self.target_mb = self.target_mb.min(mb_per_tick);
                }
            }
            PlcCommand::Scram => self.rps.trip_manual(),
            PlcCommand::AutoScram => self.rps.trip_automatic(),
            PlcCommand::RpsReset => {
                if self.rps.reset(self.devices.reactor()) {
                    self.send_rps_status();
                }
            }
            PlcCommand::AckAlarms => {
                tracing::debug!("[PLC] alarms acknowledged by supervisor");
            }
        }
    }

    fn drain_modem(&mut self, now: Instant) -> bool {
        let mut worked = false;
        loop {
            let Some(modem) = self.modem.as_mut() else {
                return worked;
            };
            let Some(delivery) = modem.poll() else {
                break;
            };
            worked = true;

            let pkt = match delivery.packet() {
                Ok(p) => p,
                Err(e) => {
                    crate::warn_throttled!(
                        Duration::from_secs(5),
                        "[PLC] malformed frame dropped: {e}"
                    );
                    continue;
                }
            };

            if !self.uplink.accept_seq(pkt.seq) {
                continue;
            }
            self.uplink.watchdog.feed(now);

            match pkt.payload {
                Payload::Mgmt(frame) => match frame {
                    MgmtFrame::EstablishAck => {
                        if !self.uplink.established {
                            tracing::info!("[PLC] supervisor link established");
                        }
                        self.uplink.established = true;
                    }
                    MgmtFrame::EstablishDeny { reason } => {
                        tracing::error!("[PLC] supervisor denied link: {reason}");
                        self.uplink.drop_link();
                    }
                    MgmtFrame::KeepAlive { sent_ms } => {
                        self.send(Payload::Mgmt(MgmtFrame::KeepAliveReply { sent_ms }));
                    }
                    MgmtFrame::KeepAliveReply { .. } => {}
                    MgmtFrame::Close => {
                        tracing::warn!("[PLC] supervisor closed the link");
                        self.uplink.drop_link();
                    }
                    MgmtFrame::Establish { .. } => {
                        // We are the announcer on this link.
                    }
                },
                Payload::PlcCmd(cmd) => self.apply_command(cmd),
                other => {
                    tracing::debug!("[PLC] ignoring {:?} frame", other.kind());
                }
            }
        }
        worked
    }

    /// Move the device setpoint one tick toward the effective target.
    fn apply_setpoint(&mut self) {
        let target = self.effective_target();

        let next = if self.ramping {
            let step = (self.cfg.burn_limit_mb * RAMP_FRACTION_PER_TICK).max(RAMP_EPSILON_MB);
            let delta = target - self.setpoint_mb;
            if delta.abs() < RAMP_EPSILON_MB {
                self.ramping = false;
                target
            } else {
                self.setpoint_mb + delta.clamp(-step, step)
            }
        } else {
            target
        };

        let should_burn = target > 0.0;

        if let Some(reactor) = self.devices.reactor_mut() {
            if should_burn {
                if let Err(e) = reactor.set_burn_rate(next) {
                    crate::warn_throttled!(
                        Duration::from_secs(5),
                        "[PLC] set_burn_rate failed: {e}"
                    );
                }
                if let Err(e) = reactor.activate() {
                    crate::warn_throttled!(Duration::from_secs(5), "[PLC] activate failed: {e}");
                }
            } else {
                // Disabled or tripped: rods in, once.
                let _ = reactor.set_burn_rate(0.0);
                if matches!(reactor.status(), Ok(true))
                    && let Err(e) = reactor.scram()
                {
                    crate::warn_throttled!(Duration::from_secs(5), "[PLC] scram failed: {e}");
                }
            }
        }

        self.setpoint_mb = next;
        if (self.setpoint_mb - target).abs() < RAMP_EPSILON_MB {
            self.ramping = false;
        }
    }

    fn tick(&mut self, now: Instant) {
        // Safety first: scan before any setpoint work.
        let should_be_active = self.enable && !self.rps.is_tripped() && self.target_mb > 0.0;
        let (tripped, _) = self.rps.scan(self.devices.reactor_mut(), should_be_active);

        self.degraded = !self.devices.reactor_mounted()
            || self
                .devices
                .reactor()
                .map(|r| r.snapshot().is_err())
                .unwrap_or(true);

        self.apply_setpoint();

        if self.cfg.networked {
            // Rising trip edge: one final status plus RPS status.
            if tripped && !self.was_tripped {
                self.send_status();
                self.send_rps_status();
                if self.rps.first_trip() == Some(TripReason::Timeout) {
                    self.send(Payload::Mgmt(MgmtFrame::Close));
                    self.uplink.drop_link();
                }
            } else if self.uplink.established {
                if self.clock.count() % STATUS_EVERY_TICKS == 0 {
                    self.send_status();
                }
                let rps_now = self.rps.status();
                if self.last_rps_sent.as_ref() != Some(&rps_now) {
                    self.send_rps_status();
                }
                if now.duration_since(self.uplink.last_keepalive_tx)
                    >= self.uplink.keepalive_every
                {
                    self.uplink.last_keepalive_tx = now;
                    self.send(Payload::Mgmt(MgmtFrame::KeepAlive {
                        sent_ms: epoch_ms(),
                    }));
                }
            } else {
                // Unlinked: re-announce on a slow cadence.
                let due = match self.uplink.last_establish_tx {
                    None => true,
                    Some(at) => {
                        now.duration_since(at) >= Duration::from_millis(ESTABLISH_RETRY_MS)
                    }
                };
                if due {
                    self.uplink.last_establish_tx = Some(now);
                    self.send(Payload::Mgmt(MgmtFrame::Establish {
                        role: PeerRole::Plc,
                        version: LINK_VERSION,
                    }));
                }
            }
        }

        self.was_tripped = tripped;
    }
}

impl<P: MediumProvider> BaseNode for PlcNode<P> {
    type Config = PlcConfig;
    type OutputTx = crate::io::base::NullTx;
    type Event = PlcEvent;
    type Ctx = PlcCtx<P>;

    fn initialize(
        ctx: Self::Ctx,
        config: Self::Config,
        _reserved_core_id: Option<usize>,
        _output_tx: Self::OutputTx,
        cancel_token: CancelToken,
    ) -> Result<Self> {
        let now = Instant::now();

        let modem = if config.networked {
            // A networked PLC without a modem cannot run at all.
            Some(ctx.medium.open(config.listen_channel)?)
        } else {
            None
        };

        let mut devices = DeviceManager::new();
        let mut rps = Rps::new(config.rps.clone());

        match ctx.reactor.take() {
            Some(reactor) => devices.mount_reactor(reactor),
            None => {
                if !config.networked {
                    // Nothing to protect and nobody to report to.
                    return Err(anyhow!("no reactor mounted and networking disabled"));
                }
                tracing::error!("[PLC] no reactor at boot; starting degraded");
                rps.set_sys_fail(true);
            }
        }

        let uplink = Uplink::new(config.comms_watchdog_ms, now);
        let clock = TickClock::new(Duration::from_millis(config.tick_ms));

        tracing::info!(
            "[PLC {}] up (networked: {}, burn limit {} mB/t)",
            config.id,
            config.networked,
            config.burn_limit_mb
        );

        Ok(Self {
            degraded: !devices.reactor_mounted(),
            cfg: config,
            ctx,
            devices,
            rps,
            modem,
            uplink,
            clock,
            enable: false,
            target_mb: 0.0,
            setpoint_mb: 0.0,
            ramping: false,
            was_tripped: false,
            last_rps_sent: None,
            cancel: cancel_token,
        })
    }

    fn execute(&mut self) -> ExecutionResult {
        if self.cancel.is_cancelled() {
            return ExecutionResult::Shutdown;
        }

        let now = Instant::now();
        let mut worked = self.drain_modem(now);

        if self.cfg.networked
            && self.uplink.established
            && self.uplink.watchdog.expired(now)
        {
            tracing::error!("[PLC] comms watchdog expired, latching timeout trip");
            self.rps.trip_timeout();
            // The trip itself (final frames, link close) lands in tick().
            self.uplink.watchdog.disarm();
            worked = true;
        }

        if self.clock.due(now) {
            self.tick(now);
            worked = true;
        }

        if worked {
            ExecutionResult::Continue
        } else {
            ExecutionResult::Relax
        }
    }

    fn on_event(&mut self, event: PlcEvent) {
        match event {
            PlcEvent::ReactorMounted => {
                if let Some(reactor) = self.ctx.reactor.take() {
                    self.devices.mount_reactor(reactor);
                    // Fresh RPS over the new device; degraded-init clears.
                    self.rps = Rps::new(self.cfg.rps.clone());
                    self.degraded = false;
                }
            }
            PlcEvent::ReactorUnmounted => {
                self.devices.unmount_reactor();
                self.degraded = true;
            }
            PlcEvent::Scram => self.rps.trip_manual(),
            PlcEvent::RpsReset => {
                self.rps.reset(self.devices.reactor());
            }
        }
    }

    fn stop(&mut self, kind: StopKind) -> StopState {
        tracing::info!("[PLC {}] stopping ({kind:?})", self.cfg.id);

        if let Some(reactor) = self.devices.reactor_mut() {
            let _ = reactor.scram();
        }
        if self.cfg.networked && self.uplink.established {
            self.send_status();
            self.send(Payload::Mgmt(MgmtFrame::Close));
            self.uplink.drop_link();
        }

        StopState::Done
    }

    fn hot_reload(&mut self, config: &Self::Config) -> Result<()> {
        if config.id != self.cfg.id
            || config.listen_channel != self.cfg.listen_channel
            || config.networked != self.cfg.networked
        {
            return Err(anyhow!("id/channel/networked cannot change at runtime"));
        }
        self.cfg.burn_limit_mb = config.burn_limit_mb;
        self.cfg.comms_watchdog_ms = config.comms_watchdog_ms;
        self.uplink
            .watchdog
            .set_window(Duration::from_millis(config.comms_watchdog_ms));
        Ok(())
    }
}
