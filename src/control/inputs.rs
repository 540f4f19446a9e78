use crate::model::NodeEvent;
use serde_json::Value;

/// Control-plane input for the runtime: either a typed host event
/// or a command that drives the node lifecycle.
#[derive(Debug)]
pub enum Input<E: NodeEvent> {
    /// Host/operator event forwarded to the node.
    Event(E),
    /// Lifecycle or config command.
    Command(CommandInput),
}

/// Commands accepted by the runtime control plane.
///
/// These drive node lifecycle, reconfiguration, and termination.
#[derive(Debug, Clone)]
pub enum CommandInput {
    /// Initialize the node if not running.
    Start,
    /// Request cooperative stop of the node (runtime stays alive).
    Stop,
    /// Stop and re-initialize the node.
    Restart,
    /// Apply new config via `BaseNode::hot_reload`.
    HotReload(Value),
    /// Stop the node and end the runtime thread.
    Shutdown,
    /// Immediate termination intent (cancel everything).
    Kill,
}
