use crate::control::inputs::{CommandInput, Input};
use crate::control::policy::{NoNode, Policy, WithNode};
use crate::error::TryRecvError;
use crate::io::base::BaseRx;
use crate::io::ringbuffer::RingReceiver;
use crate::model::{BaseNode, StopKind, StopState};
use crate::utils::CancelToken;
use serde_json::Value;
use std::ops::ControlFlow;
use std::thread;
use std::time::Duration;

/// Outcome of a single control-plane drain cycle.
#[derive(Debug, Hash, Eq, PartialEq, Clone, Copy)]
pub enum ControllerResult {
    /// No inputs were available.
    Empty,
    /// Inputs were processed successfully.
    Processed,
    /// A new node should be initialized.
    InitNode,
    /// Control channel is disconnected or runtime should exit.
    Disconnected,
}

/// Control-plane driver that consumes [`Input`]s and applies them
/// to a node (if running) or a config (if not).
pub struct Controller<N: BaseNode> {
    control_rx: RingReceiver<Input<N::Event>>,
}

impl<N: BaseNode> Controller<N> {
    /// Create a new controller over a control channel receiver.
    pub fn new(control_rx: RingReceiver<Input<N::Event>>) -> Self {
        Self { control_rx }
    }

    /// Drain up to `max` inputs and apply them according to whether
    /// a node is present or not. Returns a [`ControllerResult`] hint.
    #[inline(always)]
    pub fn drain_inputs(
        &mut self,
        max: usize,
        maybe_node: Option<&mut N>,
        node_cfg: &mut N::Config,
        cancel: &CancelToken,
        stop_timeout_secs: u64,
    ) -> ControllerResult {
        let inp = match self.control_rx.try_recv() {
            Ok(inp) => inp,
            Err(TryRecvError::Empty) => return ControllerResult::Empty,
            Err(TryRecvError::Disconnected) => return ControllerResult::Disconnected,
        };

        match maybe_node {
            Some(node) => {
                let mut with = WithNode {
                    node,
                    cfg: node_cfg,
                    cancel,
                    stop_timeout_secs,
                };
                match Self::handle_with_node(inp, &mut with) {
                    ControlFlow::Continue(()) => (),
                    ControlFlow::Break(r) => return r,
                }
                self.drain_loop(max, with)
            }
            None => {
                match Self::handle_no_node(inp, node_cfg) {
                    ControlFlow::Continue(()) => (),
                    ControlFlow::Break(r) => return r,
                };
                self.drain_loop(max, NoNode::<N> { cfg: node_cfg })
            }
        }
    }

    /// Internal loop to process additional inputs via a [`Policy`].
    #[inline(always)]
    fn drain_loop<P: Policy<N::Event>>(&mut self, max: usize, mut policy: P) -> ControllerResult {
        for _ in 1..max {
            match self.control_rx.try_recv() {
                Ok(inp) => {
                    if let ControlFlow::Break(r) = policy.handle(inp) {
                        return r;
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return ControllerResult::Disconnected,
            }
        }

        ControllerResult::Processed
    }

    /// Handle a control input when no node is running.
    #[inline(always)]
    pub(super) fn handle_no_node(
        input: Input<N::Event>,
        node_cfg: &mut N::Config,
    ) -> ControlFlow<ControllerResult> {
        match input {
            Input::Command(cmd) => {
                match cmd {
                    // With no node, Start/Restart means "init node".
                    CommandInput::Start | CommandInput::Restart => {
                        ControlFlow::Break(ControllerResult::InitNode)
                    }

                    // Hard signals exit the runtime.
                    CommandInput::Shutdown | CommandInput::Kill => {
                        ControlFlow::Break(ControllerResult::Disconnected)
                    }

                    // Stop is ignored if no node is running.
                    CommandInput::Stop => ControlFlow::Continue(()),

                    // Apply config updates only to the cfg.
                    CommandInput::HotReload(v) => {
                        Self::hot_reload(None, node_cfg, v);
                        ControlFlow::Continue(())
                    }
                }
            }
            Input::Event(_) => ControlFlow::Continue(()),
        }
    }

    /// Handle a control input when a node is running.
    #[inline(always)]
    pub(super) fn handle_with_node(
        input: Input<N::Event>,
        with: &mut WithNode<N>,
    ) -> ControlFlow<ControllerResult> {
        match input {
            Input::Command(cmd) => match cmd {
                CommandInput::Start => ControlFlow::Continue(()),
                CommandInput::Stop => {
                    tracing::info!("[Runtime] stop signal received");
                    Self::stop_node(with.node, StopKind::Stop, with.stop_timeout_secs);
                    ControlFlow::Continue(())
                }
                CommandInput::Restart => {
                    tracing::info!("[Runtime] restart signal received");
                    Self::stop_node(with.node, StopKind::Restart, with.stop_timeout_secs);
                    ControlFlow::Break(ControllerResult::InitNode)
                }
                CommandInput::Shutdown => {
                    tracing::info!("[Runtime] shutdown signal received");
                    Self::stop_node(with.node, StopKind::Shutdown, with.stop_timeout_secs);
                    ControlFlow::Break(ControllerResult::Disconnected)
                }
                CommandInput::Kill => {
                    tracing::info!("[Runtime] kill signal received");
                    with.cancel.cancel();
                    ControlFlow::Break(ControllerResult::Disconnected)
                }
                CommandInput::HotReload(v) => {
                    Self::hot_reload(Some(with.node), with.cfg, v);
                    ControlFlow::Continue(())
                }
            },
            Input::Event(e) => {
                with.node.on_event(e);
                ControlFlow::Continue(())
            }
        }
    }

    /// Apply a config update, optionally calling the node's `hot_reload`.
    pub(crate) fn hot_reload(node: Option<&mut N>, node_cfg: &mut N::Config, raw_value: Value) {
        match serde_json::from_value::<N::Config>(raw_value) {
            Ok(new_config) => {
                if let Some(node) = node {
                    match node.hot_reload(&new_config) {
                        Ok(()) => *node_cfg = new_config,
                        Err(e) => tracing::warn!("[Runtime] config update rejected: {e}"),
                    }
                } else {
                    *node_cfg = new_config;
                }
            }
            Err(e) => tracing::warn!("[Runtime] config update failed to parse: {e}"),
        }
    }

    /// Drive the node's `stop` method until done or timeout.
    pub(crate) fn stop_node(node: &mut N, stop_kind: StopKind, timeout_sec: u64) {
        let start = std::time::Instant::now();

        while node.stop(stop_kind) == StopState::InProgress {
            thread::sleep(Duration::from_millis(100));
            if start.elapsed().as_secs() > timeout_sec {
                tracing::warn!("[Runtime] node stop timed out after {timeout_sec}s");
                break;
            }
        }
    }
}
