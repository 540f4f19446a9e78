use anyhow::{Context, anyhow};
use core_affinity::{CoreId, get_core_ids};

/// Pin the current thread to a logical core.
///
/// Control loops that must hold a 50 ms tick benefit from staying off
/// the scheduler's migration path; pinning is opt-in via
/// `RuntimeConfig::core_id`.
pub fn try_pin_core(core_id: usize) -> anyhow::Result<usize> {
    let cores = get_core_ids().context("cannot enumerate CPU cores")?;

    let target = CoreId { id: core_id };
    if !cores.iter().any(|c| c.id == core_id) {
        return Err(anyhow!(
            "core {} not present (host has {} cores)",
            core_id,
            cores.len()
        ));
    }

    if core_affinity::set_for_current(target) {
        Ok(core_id)
    } else {
        Err(anyhow!("failed to pin current thread to core {}", core_id))
    }
}
