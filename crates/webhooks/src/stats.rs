//! Per-session delivery statistics, derived from live task records.

use serde::Serialize;

use crate::task::{DeliveryStatus, DeliveryTask};

/// Aggregate counts for one session. `total == success + failed + pending`
/// by construction; retrying tasks count as pending.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeliveryStats {
    pub total: u64,
    pub success: u64,
    pub failed: u64,
    pub pending: u64,
    #[serde(rename = "avgResponseTimeMs")]
    pub avg_response_time_ms: f64,
    #[serde(rename = "successRate")]
    pub success_rate: f64,
}

impl DeliveryStats {
    pub fn from_tasks<'a>(tasks: impl Iterator<Item = &'a DeliveryTask>) -> Self {
        let mut stats = Self::default();
        let mut timed = 0u64;
        let mut time_sum = 0u64;

        for task in tasks {
            stats.total += 1;
            match task.status {
                DeliveryStatus::Success => stats.success += 1,
                DeliveryStatus::Failed => stats.failed += 1,
                DeliveryStatus::Pending | DeliveryStatus::Retrying => stats.pending += 1,
            }
            if let Some(ms) = task.response_time_ms {
                timed += 1;
                time_sum += ms;
            }
        }

        if timed > 0 {
            stats.avg_response_time_ms = time_sum as f64 / timed as f64;
        }
        if stats.total > 0 {
            stats.success_rate = stats.success as f64 / stats.total as f64;
        }
        stats
    }
}
