use serde::{Deserialize, Serialize};

/// Runtime configuration for a node control thread.
/// Keeps lifecycle and back-pressure knobs small and explicit.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RuntimeConfig {
    /// Initialize the node immediately on runtime start.
    /// If `false`, a `Start` command must be sent later.
    pub init_node_on_start: bool,

    /// Logical CPU core to pin the node thread to (`None` = no pinning).
    pub core_id: Option<usize>,

    /// Max number of pending control-plane inputs (`None` = 1024).
    pub max_inputs_pending: Option<usize>,

    /// Max inputs drained per iteration (`None` = max_inputs_pending).
    pub max_inputs_drain: Option<usize>,

    /// Cooperative stop timeout **in seconds** (`None` = 300 seconds).
    pub stop_node_timeout: Option<u64>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            init_node_on_start: true,
            core_id: None,
            max_inputs_pending: None,
            max_inputs_drain: None,
            stop_node_timeout: Some(5),
        }
    }
}
