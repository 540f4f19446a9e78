//! Demo facility over the in-process loopback medium.
//!
//! Startup commands:
//!   facility-demo facility [seconds]      all-in-one simulated facility
//!   facility-demo supervisor <cfg.toml>   lone supervisor node
//!   facility-demo plc <cfg.toml>          lone PLC with a simulated reactor

use fissionrt::config::RuntimeConfig;
use fissionrt::device::sim::SimReactor;
use fissionrt::device::{DeviceSlot, MatrixSnapshot, ReactorDevice};
use fissionrt::plc::{PlcConfig, PlcCtx, PlcNode};
use fissionrt::prelude::*;
use fissionrt::protocol::medium::{LoopbackHub, LoopbackModem, Modem};
use fissionrt::protocol::{
    CoordCommand, LINK_VERSION, MgmtFrame, Packet, Payload, PeerRole, RtuData,
};
use fissionrt::supervisor::facility::FacilityMode;
use fissionrt::supervisor::{SupervisorConfig, SupervisorCtx, SupervisorEvent, SupervisorNode, UnitConfig};
use fissionrt::utils::config_io::load_cfg;
use fissionrt::utils::logger::LoggerConfig;
use std::thread;
use std::time::Duration;

const SUP_ID: u16 = 1;
const SUP_CHAN: u16 = 100;
const RTU_ID: u16 = 40;
const RTU_CHAN: u16 = 300;

fn rt_cfg() -> RuntimeConfig {
    RuntimeConfig {
        init_node_on_start: true,
        core_id: None,
        max_inputs_pending: Some(256),
        max_inputs_drain: None,
        stop_node_timeout: Some(5),
    }
}

fn plc_cfg(id: u16, listen: u16, limit_mb: f64) -> PlcConfig {
    PlcConfig {
        id,
        networked: true,
        listen_channel: listen,
        supervisor_channel: SUP_CHAN,
        burn_limit_mb: limit_mb,
        blade_count: 28,
        rps: Default::default(),
        comms_watchdog_ms: 3_000,
        tick_ms: 50,
    }
}

/// Simulated induction matrix gateway: announces until acked, then
/// streams matrix frames at 20 Hz. Charge follows the reactors' burn.
fn run_rtu(mut modem: LoopbackModem, reactors: Vec<SimReactor>) {
    let mut seq: u32 = 0;
    let mut energy: f64 = 1.0e9;
    let max_energy: f64 = 4.0e9;

    let mut send = |modem: &mut LoopbackModem, seq: &mut u32, payload: Payload| {
        let pkt = Packet::new(RTU_ID, *seq, payload);
        *seq = seq.wrapping_add(1);
        let _ = modem.transmit(SUP_CHAN, RTU_CHAN, &pkt);
    };

    let mut established = false;
    loop {
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

        let burn: f64 = reactors.iter().map(|r| r.observed_burn_rate()).sum();
        let input = burn * 28.0 * 2856.0;
        let output = 1.5e6;
        energy = (energy + (input - output) * 0.05).clamp(0.0, max_energy);

        send(
            &mut modem,
            &mut seq,
            Payload::RtuData(RtuData::Matrix(MatrixSnapshot {
                formed: true,
                energy,
                max_energy,
                last_input: input,
                last_output: output,
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
}

fn run_facility(seconds: u64) -> anyhow::Result<()> {
    let hub = LoopbackHub::new();

    let r10 = SimReactor::new();
    let r11 = SimReactor::new();

    let slot10: DeviceSlot<dyn ReactorDevice> = DeviceSlot::new();
    slot10.deposit(Box::new(r10.clone()));
    let slot11: DeviceSlot<dyn ReactorDevice> = DeviceSlot::new();
    slot11.deposit(Box::new(r11.clone()));

    let mut sup = Runtime::<SupervisorNode<LoopbackHub>>::spawn(
        rt_cfg(),
        SupervisorCtx {
            medium: hub.clone(),
        },
        SupervisorConfig {
            id: SUP_ID,
            listen_channel: SUP_CHAN,
            tick_ms: 50,
            session: Default::default(),
            units: vec![
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
            ],
        },
        NullTx,
    )?;

    let plc10 = Runtime::<PlcNode<LoopbackHub>>::spawn(
        rt_cfg(),
        PlcCtx {
            medium: hub.clone(),
            reactor: slot10,
        },
        plc_cfg(10, 210, 5.0),
        NullTx,
    )?;

    let plc11 = Runtime::<PlcNode<LoopbackHub>>::spawn(
        rt_cfg(),
        PlcCtx {
            medium: hub.clone(),
            reactor: slot11,
        },
        plc_cfg(11, 211, 10.0),
        NullTx,
    )?;

    let rtu_modem = hub.endpoint(RTU_CHAN);
    let rtu_reactors = vec![r10.clone(), r11.clone()];
    thread::spawn(move || run_rtu(rtu_modem, rtu_reactors));

    // Let links establish, then run a short operating sequence.
    let sup_health = sup.health();
    thread::sleep(Duration::from_secs(1));
    tracing::info!(
        "[Demo] node health: supervisor {}, plc10 {}, plc11 {}",
        sup_health.get(),
        plc10.health().get(),
        plc11.health().get()
    );

    tracing::info!("[Demo] staging SIMPLE");
    sup.control_tx()
        .try_send(Input::Event(SupervisorEvent::Coord(CoordCommand::SetMode(
            FacilityMode::Simple,
        ))))
        .ok();

    thread::sleep(Duration::from_secs(2));
    tracing::info!(
        "[Demo] burn rates: unit 10 = {:.1} mB/t, unit 11 = {:.1} mB/t",
        r10.observed_burn_rate(),
        r11.observed_burn_rate()
    );

    tracing::info!("[Demo] staging CHARGE toward 3 GJ");
    sup.control_tx()
        .try_send(Input::Event(SupervisorEvent::Coord(
            CoordCommand::SetChargeTarget { energy: 3.0e9 },
        )))
        .ok();
    sup.control_tx()
        .try_send(Input::Event(SupervisorEvent::Coord(CoordCommand::SetMode(
            FacilityMode::Charge,
        ))))
        .ok();

    thread::sleep(Duration::from_secs(seconds.saturating_sub(3).max(1)));
    tracing::info!(
        "[Demo] final burn rates: unit 10 = {:.1} mB/t, unit 11 = {:.1} mB/t",
        r10.observed_burn_rate(),
        r11.observed_burn_rate()
    );

    tracing::info!("[Demo] staging INACTIVE and shutting down");
    sup.control_tx()
        .try_send(Input::Event(SupervisorEvent::Coord(CoordCommand::SetMode(
            FacilityMode::Inactive,
        ))))
        .ok();
    thread::sleep(Duration::from_millis(500));

    sup.shutdown();
    plc10.shutdown();
    plc11.shutdown();
    tracing::info!("[Demo] node health after shutdown: supervisor {}", sup_health.get());
    Ok(())
}

fn run_supervisor(cfg_path: &str) -> anyhow::Result<()> {
    let cfg: SupervisorConfig = load_cfg(cfg_path)?;
    let hub = LoopbackHub::new();
    tracing::warn!("[Demo] lone supervisor on a loopback medium; peers must share the process");
    Runtime::<SupervisorNode<LoopbackHub>>::spawn_blocking(
        rt_cfg(),
        SupervisorCtx { medium: hub },
        cfg,
        NullTx,
    )
}

fn run_plc(cfg_path: &str) -> anyhow::Result<()> {
    let cfg: PlcConfig = load_cfg(cfg_path)?;
    let hub = LoopbackHub::new();
    let slot: DeviceSlot<dyn ReactorDevice> = DeviceSlot::new();
    slot.deposit(Box::new(SimReactor::new()));
    Runtime::<PlcNode<LoopbackHub>>::spawn_blocking(
        rt_cfg(),
        PlcCtx {
            medium: hub,
            reactor: slot,
        },
        cfg,
        NullTx,
    )
}

fn main() -> anyhow::Result<()> {
    let _guard = LoggerConfig::from_env().init()?;

    let args: Vec<String> = std::env::args().collect();
    match args.get(1).map(String::as_str) {
        Some("facility") | None => {
            let seconds = args
                .get(2)
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(10);
            run_facility(seconds)
        }
        Some("supervisor") => {
            let path = args.get(2).map(String::as_str).unwrap_or("supervisor.toml");
            run_supervisor(path)
        }
        Some("plc") => {
            let path = args.get(2).map(String::as_str).unwrap_or("plc.toml");
            run_plc(path)
        }
        Some(other) => {
            eprintln!("unknown role: {other}");
            eprintln!("usage: facility-demo [facility [seconds] | supervisor <cfg> | plc <cfg>]");
            std::process::exit(2);
        }
    }
}
