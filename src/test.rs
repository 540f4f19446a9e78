#[cfg(test)]
mod tests {
    use crate::config::RuntimeConfig;
    use crate::control::inputs::{CommandInput, Input};
    use crate::device::DeviceSlot;
    use crate::device::sim::SimReactor;
    use crate::io::base::{BaseRx, BaseTx};
    use crate::io::mpmc::{MpmcChannel, MpmcReceiver, MpmcSender};
    use crate::model::{
        BaseNode, ExecutionResult, NodeEvent, NullNodeCtx, StopKind, StopState,
    };
    use crate::plc::{PlcConfig, PlcCtx, PlcNode};
    use crate::protocol::medium::{LoopbackHub, Modem};
    use crate::protocol::{
        CoordCommand, LINK_VERSION, MgmtFrame, Packet, PacketKind, Payload, PeerRole, RtuData,
    };
    use crate::rps::RpsLimits;
    use crate::runtime::Runtime;
    use crate::supervisor::facility::FacilityMode;
    use crate::supervisor::{
        SupervisorConfig, SupervisorCtx, SupervisorEvent, SupervisorNode, UnitConfig,
    };
    use crate::utils::CancelToken;
    use serde::{Deserialize, Serialize};
    use std::thread;
    use std::time::{Duration, Instant};

    // ---- Runtime plumbing, exercised with a minimal tick node.

    #[derive(Debug, Clone)]
    enum TestOut {
        Tick(usize),
        Done,
    }

    #[derive(Debug)]
    enum TestEvent {
        Ping(u32),
    }

    impl NodeEvent for TestEvent {}

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct TickCfg {
        ticks: usize,
        relax_every: usize,
    }

    struct TickNode {
        remain: usize,
        relax_every: usize,
        out_tx: MpmcSender<TestOut>,
        _cancel: CancelToken,
    }

    impl BaseNode for TickNode {
        type Config = TickCfg;
        type OutputTx = MpmcSender<TestOut>;
        type Event = TestEvent;
        type Ctx = NullNodeCtx;

        fn initialize(
            _ctx: Self::Ctx,
            cfg: Self::Config,
            _reserved_core_id: Option<usize>,
            output_tx: Self::OutputTx,
            cancel_token: CancelToken,
        ) -> anyhow::Result<Self> {
            Ok(Self {
                remain: cfg.ticks,
                relax_every: cfg.relax_every.max(1),
                out_tx: output_tx,
                _cancel: cancel_token,
            })
        }

        fn execute(&mut self) -> ExecutionResult {
            if self.remain == 0 {
                let _ = self.out_tx.try_send(TestOut::Done);
                return ExecutionResult::Shutdown;
            }

            let cur = self.remain;
            self.remain = self.remain.saturating_sub(1);
            let _ = self.out_tx.try_send(TestOut::Tick(cur));

            if cur % self.relax_every == 0 {
                ExecutionResult::Relax
            } else {
                ExecutionResult::Continue
            }
        }

        fn on_event(&mut self, event: TestEvent) {
            match event {
                TestEvent::Ping(v) => {
                    let _ = self.out_tx.try_send(TestOut::Tick(900 + v as usize));
                }
            }
        }

        fn stop(&mut self, _kind: StopKind) -> StopState {
            StopState::Done
        }
    }

    fn recv_done_within(rx: &mut MpmcReceiver<TestOut>, dur: Duration) -> bool {
        let start = Instant::now();
        loop {
            if start.elapsed() > dur {
                return false;
            }
            match rx.try_recv() {
                Ok(TestOut::Done) => return true,
                Ok(TestOut::Tick(_)) => continue,
                Err(_) => thread::sleep(Duration::from_micros(100)),
            }
        }
    }

    fn recv_tick_within(rx: &mut MpmcReceiver<TestOut>, expect: usize, dur: Duration) -> bool {
        let start = Instant::now();
        loop {
            if start.elapsed() > dur {
                return false;
            }
            match rx.try_recv() {
                Ok(TestOut::Tick(v)) if v == expect => return true,
                Ok(_) => continue,
                Err(_) => thread::sleep(Duration::from_micros(100)),
            }
        }
    }

    fn rt_cfg() -> RuntimeConfig {
        RuntimeConfig {
            init_node_on_start: true,
            core_id: None,
            max_inputs_pending: Some(128),
            max_inputs_drain: None,
            stop_node_timeout: Some(5),
        }
    }

    #[test]
    fn runtime_autostarts_and_stops() {
        let (out_tx, mut out_rx) = MpmcChannel::bounded::<TestOut>(64);

        let node_cfg = TickCfg {
            ticks: 8,
            relax_every: 3,
        };

        Runtime::<TickNode>::spawn_blocking(rt_cfg(), NullNodeCtx, node_cfg, out_tx)
            .expect("spawn_blocking failed");

        assert!(recv_done_within(&mut out_rx, Duration::from_secs(1)));
    }

    #[test]
    fn runtime_manual_init_then_stops() {
        let (out_tx, mut out_rx) = MpmcChannel::bounded::<TestOut>(64);

        let mut cfg = rt_cfg();
        cfg.init_node_on_start = false;

        let node_cfg = TickCfg {
            ticks: 5,
            relax_every: 2,
        };

        let mut rt =
            Runtime::<TickNode>::spawn(cfg, NullNodeCtx, node_cfg, out_tx).expect("spawn failed");

        rt.control_tx()
            .try_send(Input::Command(CommandInput::Start))
            .expect("control try_send failed");

        rt.run_blocking().expect("join failed");
        assert!(recv_done_within(&mut out_rx, Duration::from_secs(1)));
    }

    #[test]
    fn runtime_delivers_events_to_node() {
        let (out_tx, mut out_rx) = MpmcChannel::bounded::<TestOut>(64);

        let node_cfg = TickCfg {
            ticks: 2000,
            relax_every: 10,
        };

        let mut rt = Runtime::<TickNode>::spawn(rt_cfg(), NullNodeCtx, node_cfg, out_tx)
            .expect("spawn failed");

        rt.control_tx()
            .try_send(Input::Event(TestEvent::Ping(1)))
            .expect("event send failed");

        assert!(recv_tick_within(&mut out_rx, 901, Duration::from_secs(1)));
        rt.shutdown();
    }

    // ---- Facility end-to-end over the loopback medium.

    const SUP_ID: u16 = 1;
    const SUP_CHAN: u16 = 100;

    fn plc_cfg(id: u16, listen: u16, limit_mb: f64) -> PlcConfig {
        PlcConfig {
            id,
            networked: true,
            listen_channel: listen,
            supervisor_channel: SUP_CHAN,
            burn_limit_mb: limit_mb,
            blade_count: 28,
            rps: RpsLimits::default(),
            comms_watchdog_ms: 3_000,
            tick_ms: 10,
        }
    }

    fn sup_cfg(units: Vec<UnitConfig>) -> SupervisorConfig {
        SupervisorConfig {
            id: SUP_ID,
            listen_channel: SUP_CHAN,
            tick_ms: 10,
            session: Default::default(),
            units,
        }
    }

    fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    /// Background RTU gateway: establishes a session, then streams
    /// matrix telemetry at ~20 Hz until the stop flag flips.
    fn spawn_rtu(
        hub: &LoopbackHub,
        stop: crate::utils::HealthFlag,
        fill: f64,
    ) -> thread::JoinHandle<()> {
        let mut modem = hub.endpoint(300);
        thread::spawn(move || {
            let mut seq: u32 = 0;
            let mut send = |modem: &mut crate::protocol::medium::LoopbackModem,
                            seq: &mut u32,
                            payload: Payload| {
                let pkt = Packet::new(40, *seq, payload);
                *seq = seq.wrapping_add(1);
                let _ = modem.transmit(SUP_CHAN, 300, &pkt);
            };

            let mut established = false;
            while !stop.get() {
                // Re-announce until the supervisor acks; frames sent to
                // an unknown peer are dropped on the other side.
                if !established {
                    send(
                        &mut modem,
                        &mut seq,
                        Payload::Mgmt(MgmtFrame::Establish {
                            role: PeerRole::Rtu,
                            version: LINK_VERSION,
                        }),
                    );
                }
                send(
                    &mut modem,
                    &mut seq,
                    Payload::RtuData(RtuData::Matrix(crate::device::MatrixSnapshot {
                        formed: true,
                        energy: fill * 4.0e9,
                        max_energy: 4.0e9,
                        last_input: 1.0e6,
                        last_output: 5.0e5,
                    })),
                );
                while let Some(d) = modem.poll() {
                    if let Ok(pkt) = d.packet()
                        && matches!(pkt.payload, Payload::Mgmt(MgmtFrame::EstablishAck))
                    {
                        established = true;
                    }
                }
                thread::sleep(Duration::from_millis(50));
            }
        })
    }

    #[test]
    fn facility_simple_mode_drives_reactors() {
        let hub = LoopbackHub::new();

        let r10 = SimReactor::new();
        let r11 = SimReactor::new();

        let slot10: DeviceSlot<dyn crate::device::ReactorDevice> = DeviceSlot::new();
        slot10.deposit(Box::new(r10.clone()));
        let slot11: DeviceSlot<dyn crate::device::ReactorDevice> = DeviceSlot::new();
        slot11.deposit(Box::new(r11.clone()));

        let mut sup = Runtime::<SupervisorNode<LoopbackHub>>::spawn(
            rt_cfg(),
            SupervisorCtx {
                medium: hub.clone(),
            },
            sup_cfg(vec![
                UnitConfig {
                    id: 10,
                    group: 1,
                    burn_limit_mb: 5.0,
                },
                UnitConfig {
                    id: 11,
                    group: 1,
                    burn_limit_mb: 10.0,
                },
            ]),
            crate::io::base::NullTx,
        )
        .expect("supervisor spawn failed");

        let plc10 = Runtime::<PlcNode<LoopbackHub>>::spawn(
            rt_cfg(),
            PlcCtx {
                medium: hub.clone(),
                reactor: slot10,
            },
            plc_cfg(10, 210, 5.0),
            crate::io::base::NullTx,
        )
        .expect("plc 10 spawn failed");

        let plc11 = Runtime::<PlcNode<LoopbackHub>>::spawn(
            rt_cfg(),
            PlcCtx {
                medium: hub.clone(),
                reactor: slot11,
            },
            plc_cfg(11, 211, 10.0),
            crate::io::base::NullTx,
        )
        .expect("plc 11 spawn failed");

        let rtu_stop = crate::utils::HealthFlag::new(false);
        let rtu = spawn_rtu(&hub, rtu_stop.clone(), 0.5);

        // Let the links establish and status flow, then go SIMPLE.
        thread::sleep(Duration::from_millis(300));
        sup.control_tx()
            .try_send(Input::Event(SupervisorEvent::Coord(CoordCommand::SetMode(
                FacilityMode::Simple,
            ))))
            .expect("mode send failed");

        // Both reactors ramp up to their configured limits.
        assert!(
            wait_until(Duration::from_secs(3), || {
                (r10.observed_burn_rate() - 5.0).abs() < 0.01
                    && (r11.observed_burn_rate() - 10.0).abs() < 0.01
            }),
            "burn rates never reached limits: {} / {}",
            r10.observed_burn_rate(),
            r11.observed_burn_rate()
        );

        // Back to INACTIVE: everything shuts down.
        sup.control_tx()
            .try_send(Input::Event(SupervisorEvent::Coord(CoordCommand::SetMode(
                FacilityMode::Inactive,
            ))))
            .expect("mode send failed");

        assert!(
            wait_until(Duration::from_secs(3), || {
                !r10.is_active() && !r11.is_active()
            }),
            "reactors still active after INACTIVE"
        );

        rtu_stop.up();
        sup.shutdown();
        plc10.shutdown();
        plc11.shutdown();
        let _ = rtu.join();
    }

    #[test]
    fn plc_timeout_trips_and_sends_final_frames() {
        let hub = LoopbackHub::new();

        let reactor = SimReactor::new();
        let slot: DeviceSlot<dyn crate::device::ReactorDevice> = DeviceSlot::new();
        slot.deposit(Box::new(reactor.clone()));

        let mut cfg = plc_cfg(10, 210, 5.0);
        cfg.comms_watchdog_ms = 300;

        // Act as the supervisor: listen before the PLC announces, ack,
        // command a burn, then go silent past the watchdog window.
        let mut sup_modem = hub.endpoint(SUP_CHAN);
        let mut seq: u32 = 0;

        let plc = Runtime::<PlcNode<LoopbackHub>>::spawn(
            rt_cfg(),
            PlcCtx {
                medium: hub.clone(),
                reactor: slot,
            },
            cfg,
            crate::io::base::NullTx,
        )
        .expect("plc spawn failed");

        assert!(
            wait_until(Duration::from_secs(2), || {
                while let Some(d) = sup_modem.poll() {
                    if let Ok(pkt) = d.packet()
                        && matches!(pkt.payload, Payload::Mgmt(MgmtFrame::Establish { .. }))
                    {
                        return true;
                    }
                }
                false
            }),
            "no establish announce from PLC"
        );

        let ack = Packet::new(SUP_ID, seq, Payload::Mgmt(MgmtFrame::EstablishAck));
        seq += 1;
        sup_modem.transmit(210, SUP_CHAN, &ack).unwrap();

        let burn = Packet::new(
            SUP_ID,
            seq,
            Payload::PlcCmd(crate::protocol::PlcCommand::SetBurn {
                enable: true,
                mb_per_tick: 3.0,
                ramp: false,
            }),
        );
        sup_modem.transmit(210, SUP_CHAN, &burn).unwrap();

        assert!(
            wait_until(Duration::from_secs(2), || {
                (reactor.observed_burn_rate() - 3.0).abs() < 0.01
            }),
            "reactor never reached commanded burn"
        );

        // Silence. The comms watchdog fires, the RPS latches a timeout
        // trip, and the device is scrammed.
        assert!(
            wait_until(Duration::from_secs(2), || !reactor.is_active()),
            "reactor still hot after comms loss"
        );
        assert!(reactor.scram_count() >= 1);

        // The PLC sent one final status, one RPS status, and a close.
        let mut saw_status = false;
        let mut saw_rps = false;
        let mut saw_close = false;
        let deadline = Instant::now() + Duration::from_secs(1);
        while Instant::now() < deadline && !(saw_status && saw_rps && saw_close) {
            while let Some(d) = sup_modem.poll() {
                if let Ok(pkt) = d.packet() {
                    match pkt.kind {
                        PacketKind::PlcStatus => saw_status = true,
                        PacketKind::PlcRpsStatus => {
                            if let Payload::PlcRpsStatus(rps) = &pkt.payload
                                && rps.tripped
                            {
                                saw_rps = true;
                            }
                        }
                        PacketKind::Mgmt => {
                            if matches!(pkt.payload, Payload::Mgmt(MgmtFrame::Close)) {
                                saw_close = true;
                            }
                        }
                        _ => {}
                    }
                }
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert!(saw_status, "no final status frame");
        assert!(saw_rps, "no tripped RPS status frame");
        assert!(saw_close, "no close frame");

        plc.shutdown();
    }
}
