use crate::io::base::BaseTx;
use crate::utils::CancelToken;
use anyhow::Result;
use serde::Deserialize;

/// Context handed to a node at initialization: the seams the host owns
/// (radio medium, device hand-off slots). Cloneable so a restarted node
/// can reattach to the same environment.
pub trait NodeContext: Send + 'static + Clone {}

/// Host-injected event delivered through the control plane: device
/// (un)mount notices, local operator actions. Packets do NOT travel this
/// way; nodes poll their modem inside `execute`.
pub trait NodeEvent: Send + 'static {}

#[derive(Clone, Debug)]
pub struct NullNodeCtx;

impl NodeContext for NullNodeCtx {}

#[derive(Clone, Debug)]
pub struct NullEvent;

impl NodeEvent for NullEvent {}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StopKind {
    Stop,
    Shutdown,
    Restart,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ExecutionResult {
    Stop,
    Shutdown,
    Continue,
    Relax,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StopState {
    InProgress,
    Done,
}

/// A cooperative node (PLC, supervisor) driven by [`crate::runtime::Runtime`].
///
/// `execute` is one pass of the node's event loop: poll the modem, run
/// due ticks, drain queues. It must not block; return `Relax` when there
/// was nothing to do so the runtime can back off.
pub trait BaseNode: Sized {
    type Config: Send + Clone + for<'a> Deserialize<'a> + 'static;
    type OutputTx: BaseTx + Clone;
    type Event: NodeEvent;
    type Ctx: NodeContext;

    fn initialize(
        ctx: Self::Ctx,
        config: Self::Config,
        reserved_core_id: Option<usize>,
        output_tx: Self::OutputTx,
        cancel_token: CancelToken,
    ) -> Result<Self>;

    fn execute(&mut self) -> ExecutionResult;

    fn on_event(&mut self, event: Self::Event);

    fn stop(&mut self, kind: StopKind) -> StopState;

    fn hot_reload(&mut self, config: &Self::Config) -> Result<()> {
        let _ = config;
        Ok(())
    }
}
