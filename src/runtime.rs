use crate::config::RuntimeConfig;
use crate::control::controller::{Controller, ControllerResult};
use crate::control::inputs::{CommandInput, Input};
use crate::io::base::BaseTx;
use crate::io::ringbuffer::{RingBuffer, RingSender};
use crate::model::{BaseNode, ExecutionResult, StopKind};
use crate::utils::{CancelToken, HealthFlag};
use crate::utils::try_pin_core;
use anyhow::{Result, anyhow};

use signal_hook::consts::TERM_SIGNALS;
use signal_hook::flag;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::{hint::spin_loop, thread, time::Duration};

/// Per-node event loop. Spawns one OS thread that multiplexes control
/// inputs, the node's own tick work, and OS termination signals; the
/// node inside never sees another thread.
pub struct Runtime<Node: BaseNode> {
    control_tx: RingSender<Input<Node::Event>>,
    health: HealthFlag,
    join: Option<thread::JoinHandle<()>>,
    _phantom_data: PhantomData<Node>,
}

impl<Node: BaseNode> Runtime<Node> {
    pub fn control_tx(&mut self) -> &mut RingSender<Input<Node::Event>> {
        &mut self.control_tx
    }

    /// Liveness of the node inside: raised after a successful init,
    /// lowered when the node stops or the loop exits.
    pub fn health(&self) -> HealthFlag {
        self.health.clone()
    }

    pub fn run_blocking(mut self) -> Result<()> {
        if let Some(node_loop) = self.join.take() {
            let _ = node_loop.join();
        } else {
            return Err(anyhow!("node loop is None"));
        }

        Ok(())
    }

    pub fn shutdown(mut self) {
        if let Some(join) = self.join.take() {
            self.control_tx
                .try_send(Input::Command(CommandInput::Shutdown))
                .ok();
            let _ = join.join();
        }
    }

    pub fn into_guard(self) -> RuntimeGuard<Node> {
        RuntimeGuard(Some(self))
    }

    pub fn spawn_blocking(
        cfg: RuntimeConfig,
        node_ctx: Node::Ctx,
        node_cfg: Node::Config,
        output_tx: Node::OutputTx,
    ) -> Result<()> {
        let mut rt = Self::spawn(cfg, node_ctx, node_cfg, output_tx)?;

        if let Some(join) = rt.join.take() {
            let _ = join.join();
        }

        Ok(())
    }

    pub fn spawn(
        cfg: RuntimeConfig,
        ctx: Node::Ctx,
        mut node_cfg: Node::Config,
        output_tx: Node::OutputTx,
    ) -> Result<Self> {
        let max_inputs_pending = cfg.max_inputs_pending.unwrap_or(1024);
        let max_inputs_drain = cfg.max_inputs_drain.unwrap_or(max_inputs_pending);
        let stop_node_timeout = cfg.stop_node_timeout.unwrap_or(300);

        let (control_tx, control_rx) = RingBuffer::bounded(max_inputs_pending);
        let health = HealthFlag::new(false);
        let node_health = health.clone();

        let join = thread::spawn(move || {
            let term_flag = Arc::new(AtomicBool::new(false));

            for sig in TERM_SIGNALS {
                let _ = flag::register(*sig, term_flag.clone());
            }

            let core_id = if let Some(core_id) = cfg.core_id {
                match try_pin_core(core_id) {
                    Ok(core_id) => {
                        tracing::info!("[Runtime] pinned to core: {}", core_id);
                        Some(core_id)
                    }
                    Err(e) => {
                        tracing::warn!("[Runtime] cannot pin core: {}", e);
                        None
                    }
                }
            } else {
                None
            };

            let mut controller = Controller::new(control_rx);

            let cancel_token = CancelToken::new_root();

            let mut maybe_node: Option<Node> = if cfg.init_node_on_start {
                let node_cfg_clone = node_cfg.clone();

                match Node::initialize(
                    ctx.clone(),
                    node_cfg_clone,
                    core_id,
                    output_tx.clone(),
                    cancel_token.new_child(),
                ) {
                    Ok(node) => {
                        node_health.up();
                        Some(node)
                    }
                    Err(e) => {
                        tracing::error!("[Runtime] node init error: {}", e);
                        return;
                    }
                }
            } else {
                None
            };

            let mut idle: u32 = 0;

            loop {
                if term_flag.load(Ordering::Relaxed) {
                    tracing::warn!("[Runtime] termination signal received");

                    if let Some(ref mut node) = maybe_node {
                        Controller::stop_node(node, StopKind::Shutdown, stop_node_timeout);
                    }

                    cancel_token.cancel();

                    break;
                }

                match controller.drain_inputs(
                    max_inputs_drain,
                    maybe_node.as_mut(),
                    &mut node_cfg,
                    &cancel_token,
                    stop_node_timeout,
                ) {
                    ControllerResult::Empty => {}
                    ControllerResult::Processed => {
                        idle = 0;
                    }
                    ControllerResult::Disconnected => {
                        break;
                    }
                    ControllerResult::InitNode => {
                        tracing::info!("[Runtime] node init");

                        maybe_node = match Node::initialize(
                            ctx.clone(),
                            node_cfg.clone(),
                            core_id,
                            output_tx.clone(),
                            cancel_token.new_child(),
                        ) {
                            Ok(node) => {
                                node_health.up();
                                Some(node)
                            }
                            Err(e) => {
                                tracing::error!("[Runtime] node init error: {}", e);
                                None
                            }
                        };

                        idle = 0;
                    }
                }

                match maybe_node {
                    None => thread::sleep(Duration::from_micros(100)),
                    Some(ref mut node) => match node.execute() {
                        ExecutionResult::Continue => {
                            idle = 0;
                        }
                        ExecutionResult::Relax => {
                            idle = idle.saturating_add(1);
                            if idle < 64 {
                                spin_loop();
                            } else if idle < 256 {
                                thread::yield_now();
                            } else {
                                thread::sleep(Duration::from_micros(500));
                            }
                        }
                        ExecutionResult::Stop => {
                            tracing::info!("[Runtime] node.execute stopped by itself");
                            Controller::stop_node(node, StopKind::Stop, stop_node_timeout);
                            node_health.down();
                            maybe_node = None;
                        }
                        ExecutionResult::Shutdown => {
                            tracing::info!("[Runtime] node.execute shutdown by itself");
                            Controller::stop_node(node, StopKind::Shutdown, stop_node_timeout);
                            break;
                        }
                    },
                }
            }

            node_health.down();
        });

        Ok(Self {
            control_tx,
            health,
            join: Some(join),
            _phantom_data: PhantomData,
        })
    }
}

pub struct RuntimeGuard<N: BaseNode>(Option<Runtime<N>>);

impl<N: BaseNode> Drop for RuntimeGuard<N> {
    fn drop(&mut self) {
        if let Some(mut rt) = self.0.take() {
            rt.control_tx
                .try_send(Input::Command(CommandInput::Shutdown))
                .ok();
        }
    }
}

impl<N: BaseNode> Drop for Runtime<N> {
    fn drop(&mut self) {
        self.control_tx
            .try_send(Input::Command(CommandInput::Shutdown))
            .ok();
    }
}
