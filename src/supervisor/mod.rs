//! Supervisor node: session aggregation plus the facility controller.
//!
//! One pass of the loop: drain the modem into sessions, service fired
//! watchdogs, then on each 50 ms tick iterate every session (inbound
//! before outbound), run the facility controller, flush the unit
//! command outboxes into their PLC sessions, and reap closed sessions.

pub mod facility;
pub mod unit;

use crate::model::{BaseNode, ExecutionResult, NodeContext, NodeEvent, StopKind, StopState};
use crate::protocol::medium::{MediumProvider, Modem};
use crate::protocol::{ChannelId, CoordCommand, NodeId, Payload, PeerRole, RtuData};
use crate::session::{SessionConfig, SessionEvent, SessionRegistry};
use crate::utils::{CancelToken, TickClock};
use anyhow::Result;
use facility::FacilityController;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use unit::ReactorUnit;

/// Nominal controller tick.
pub const TICK_MS: u64 = 50;

fn default_tick_ms() -> u64 {
    TICK_MS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitConfig {
    /// PLC node id of this unit.
    pub id: NodeId,
    /// Priority group 1..4; 0 leaves the unit independent.
    pub group: u8,
    /// Operator burn ceiling, mB/t.
    pub burn_limit_mb: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    pub id: NodeId,
    pub listen_channel: ChannelId,
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    #[serde(default)]
    pub session: SessionConfig,
    pub units: Vec<UnitConfig>,
}

/// Host events: locally injected operator commands (front panel or
/// test driver) take the same path as coordinator packets.
#[derive(Debug)]
pub enum SupervisorEvent {
    Coord(CoordCommand),
}

impl NodeEvent for SupervisorEvent {}

#[derive(Clone)]
pub struct SupervisorCtx<P: MediumProvider> {
    pub medium: P,
}

impl<P: MediumProvider> NodeContext for SupervisorCtx<P> {}

pub struct SupervisorNode<P: MediumProvider> {
    cfg: SupervisorConfig,
    modem: P::ModemT,
    registry: SessionRegistry,
    facility: FacilityController,
    clock: TickClock,
    cancel: CancelToken,
}

impl<P: MediumProvider> SupervisorNode<P> {
    fn handle_event(&mut self, event: SessionEvent, now: Instant) {
        match event {
            SessionEvent::Established { peer, role } => {
                if role == PeerRole::Plc {
                    match self.facility.unit_mut(peer) {
                        Some(u) => u.set_connected(true),
                        None => tracing::warn!(
                            "[Supervisor] PLC {peer} connected but no unit is configured for it"
                        ),
                    }
                }
            }
            SessionEvent::Data {
                peer,
                role,
                payload,
            } => match payload {
                Payload::PlcStatus(status) => {
                    if let Some(u) = self.facility.unit_mut(peer) {
                        u.update_status(status);
                    }
                }
                Payload::PlcRpsStatus(rps) => {
                    if let Some(u) = self.facility.unit_mut(peer) {
                        u.update_rps(rps);
                    }
                }
                Payload::RtuData(RtuData::Matrix(snap)) => {
                    self.facility.ingest_matrix(snap, now);
                }
                Payload::RtuData(RtuData::Redstone { channel, value }) => {
                    tracing::debug!(
                        "[Supervisor] redstone ch {channel} = {value} from RTU {peer}"
                    );
                }
                Payload::CoordCmd(cmd) => {
                    if role == PeerRole::Coordinator {
                        self.apply_coord(cmd);
                    } else {
                        tracing::warn!(
                            "[Supervisor] coordinator command from non-coordinator {peer}, dropped"
                        );
                    }
                }
                other => {
                    tracing::debug!("[Supervisor] ignoring {:?} from {peer}", other.kind());
                }
            },
            SessionEvent::Closed { peer, reason } => {
                tracing::warn!("[Supervisor] session {peer} closed: {reason}");
                if let Some(u) = self.facility.unit_mut(peer) {
                    u.set_connected(false);
                }
            }
        }
    }

    fn apply_coord(&mut self, cmd: CoordCommand) {
        match cmd {
            CoordCommand::SetMode(mode) => {
                if !self.facility.stage_mode(mode) {
                    tracing::warn!("[Supervisor] operator staged non-settable mode {mode:?}");
                }
            }
            CoordCommand::SetBurnTarget { mb_per_tick } => {
                self.facility.set_burn_target(mb_per_tick);
            }
            CoordCommand::SetChargeTarget { energy } => {
                self.facility.set_charge_target(energy);
            }
            CoordCommand::SetGenTarget { energy_per_tick } => {
                self.facility.set_gen_target(energy_per_tick);
            }
            CoordCommand::SetGroup { unit, group } => {
                if !self.facility.set_group(unit, group) {
                    tracing::warn!("[Supervisor] regroup of unit {unit} rejected");
                }
            }
            CoordCommand::SetBurnLimit { unit, mb_per_tick } => {
                if !self.facility.set_burn_limit(unit, mb_per_tick) {
                    // Rejected silently toward the peer; the next status
                    // report carries the unchanged configuration.
                    tracing::warn!("[Supervisor] burn-limit change for unit {unit} rejected");
                }
            }
            CoordCommand::Scram => self.facility.operator_scram(),
            CoordCommand::Reset => self.facility.operator_reset(),
            CoordCommand::AckAlarms { unit } => self.facility.ack_unit_alarms(unit),
        }
    }

    fn flush_unit_outboxes(&mut self) {
        for i in 0..self.facility.unit_count() {
            let Some((id, cmds)) = self.facility.take_unit_outbox(i) else {
                continue;
            };
            if cmds.is_empty() {
                continue;
            }
            match self.registry.session_mut(id) {
                Some(session) => {
                    for cmd in cmds {
                        session.enqueue(Payload::PlcCmd(cmd));
                    }
                }
                None => {
                    crate::debug_throttled!(
                        Duration::from_secs(5),
                        "[Supervisor] unit {} offline, {} command(s) dropped",
                        id,
                        cmds.len()
                    );
                }
            }
        }
    }
}

impl<P: MediumProvider> BaseNode for SupervisorNode<P> {
    type Config = SupervisorConfig;
    type OutputTx = crate::io::base::NullTx;
    type Event = SupervisorEvent;
    type Ctx = SupervisorCtx<P>;

    fn initialize(
        ctx: Self::Ctx,
        config: Self::Config,
        _reserved_core_id: Option<usize>,
        _output_tx: Self::OutputTx,
        cancel_token: CancelToken,
    ) -> Result<Self> {
        // No modem means no facility; fatal by design.
        let modem = ctx.medium.open(config.listen_channel)?;

        let registry = SessionRegistry::new(
            config.id,
            config.listen_channel,
            config.session.clone(),
        );

        let units: Vec<ReactorUnit> = config
            .units
            .iter()
            .map(|u| ReactorUnit::new(u.id, u.group, u.burn_limit_mb))
            .collect();
        let facility = FacilityController::new(units);

        let clock = TickClock::new(Duration::from_millis(config.tick_ms));

        tracing::info!(
            "[Supervisor {}] up with {} configured unit(s)",
            config.id,
            config.units.len()
        );

        Ok(Self {
            cfg: config,
            modem,
            registry,
            facility,
            clock,
            cancel: cancel_token,
        })
    }

    fn execute(&mut self) -> ExecutionResult {
        if self.cancel.is_cancelled() {
            return ExecutionResult::Shutdown;
        }

        let now = Instant::now();
        let mut worked = false;

        // Inbound dispatch comes before any session drain.
        while let Some(delivery) = self.modem.poll() {
            worked = true;
            match delivery.packet() {
                Ok(pkt) => self.registry.on_packet(pkt, delivery.reply, now),
                Err(e) => {
                    crate::warn_throttled!(
                        Duration::from_secs(5),
                        "[Supervisor] malformed frame dropped: {e}"
                    );
                }
            }
        }

        // Watchdog expirations are timer events of their own.
        for timer_id in self.registry.expired_watchdogs(now) {
            worked = true;
            let events = self.registry.check_all_watchdogs(timer_id, now);
            for ev in events {
                self.handle_event(ev, now);
            }
        }

        if self.clock.due(now) {
            worked = true;

            let events = self.registry.iterate_all(now, &mut self.modem);
            for ev in events {
                self.handle_event(ev, now);
            }

            self.facility.update(now);
            self.flush_unit_outboxes();
            self.registry.flush_all(&mut self.modem);

            // Reaping happens last, once per tick.
            self.registry.free_all_closed();
        }

        if worked {
            ExecutionResult::Continue
        } else {
            ExecutionResult::Relax
        }
    }

    fn on_event(&mut self, event: SupervisorEvent) {
        match event {
            SupervisorEvent::Coord(cmd) => self.apply_coord(cmd),
        }
    }

    fn stop(&mut self, kind: StopKind) -> StopState {
        tracing::info!("[Supervisor {}] stopping ({kind:?})", self.cfg.id);

        self.facility.operator_scram();
        self.flush_unit_outboxes();
        self.registry.flush_all(&mut self.modem);
        self.registry.close_all(&mut self.modem);

        StopState::Done
    }

    fn hot_reload(&mut self, config: &Self::Config) -> Result<()> {
        if config.id != self.cfg.id || config.listen_channel != self.cfg.listen_channel {
            return Err(anyhow::anyhow!("id/channel cannot change at runtime"));
        }
        self.cfg.tick_ms = config.tick_ms;
        Ok(())
    }
}
