//! priority.rs
//! Scheduling setup for sensor worker threads: priority class + optional core pinning.
//! Failure to raise priority (missing privileges) is logged and acquisition continues.

use core_affinity::{get_core_ids, set_for_current};
use log::{info, warn};
use thread_priority::{ThreadPriority, ThreadPriorityValue, set_current_thread_priority};

use crate::config::PollingPriority;

const HIGH_PRIORITY_VALUE: u8 = 75;

fn thread_priority_for(priority: PollingPriority) -> Option<ThreadPriority> {
    match priority {
        PollingPriority::Normal => None,
        PollingPriority::High => ThreadPriorityValue::try_from(HIGH_PRIORITY_VALUE)
            .ok()
            .map(ThreadPriority::Crossplatform),
        PollingPriority::RealTime => Some(ThreadPriority::Max),
    }
}

/// Applies `priority` and optional pinning to the calling thread.
/// Returns true if everything requested was applied.
pub fn apply_to_current_thread(label: &str, priority: PollingPriority, cpu_core: Option<usize>) -> bool {
    let mut ok = true;

    if let Some(p) = thread_priority_for(priority) {
        match set_current_thread_priority(p) {
            Ok(()) => info!("[{}] thread priority set to {:?}", label, priority),
            Err(e) => {
                warn!("[{}] can't set thread priority {:?}: {:?}", label, priority, e);
                ok = false;
            }
        }
    }

    if let Some(core) = cpu_core {
        let cores = get_core_ids().unwrap_or_default();
        match cores.get(core) {
            Some(id) if set_for_current(*id) => info!("[{}] pinned to core {}", label, core),
            Some(_) => {
                warn!("[{}] failed to pin to core {}", label, core);
                ok = false;
            }
            None => {
                warn!("[{}] core {} not available ({} cores)", label, core, cores.len());
                ok = false;
            }
        }
    }

    ok
}
