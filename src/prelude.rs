pub use crate::config::RuntimeConfig;
pub use crate::control::inputs::{CommandInput, Input};
pub use crate::io::base::{BaseRx, BaseTx, NullTx};
pub use crate::model::{
    BaseNode, ExecutionResult, NodeContext, NodeEvent, NullEvent, NullNodeCtx, StopKind,
    StopState,
};
pub use crate::runtime::{Runtime, RuntimeGuard};
pub use crate::utils::{CancelToken, HealthFlag, TickClock, Watchdog};
