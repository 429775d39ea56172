use std::collections::HashMap;

use serde::Serialize;

use crate::types::InstanceStats;

/// Cross-instance totals for the whole relay.
#[derive(Debug, Clone, Serialize)]
pub struct GlobalStats {
    pub total_instances: usize,
    pub total_events: u64,
    pub successful_forwards: u64,
    pub failed_forwards: u64,
    /// `successful_forwards / total_events`, formatted as a percentage with
    /// two decimals. `"0%"` when no events were ever ingested.
    pub success_rate: String,
    pub by_event_type: HashMap<String, u64>,
}

/// Element-wise sum of per-instance stats.
pub(crate) fn aggregate<'a, I>(per_instance: I, total_instances: usize) -> GlobalStats
where
    I: IntoIterator<Item = &'a InstanceStats>,
{
    let mut total_events = 0u64;
    let mut successful = 0u64;
    let mut failed = 0u64;
    let mut by_event_type: HashMap<String, u64> = HashMap::new();

    for stats in per_instance {
        total_events += stats.total_events;
        successful += stats.successful_forwards;
        failed += stats.failed_forwards;
        for (event_type, count) in &stats.by_event_type {
            *by_event_type.entry(event_type.clone()).or_insert(0) += count;
        }
    }

    GlobalStats {
        total_instances,
        total_events,
        successful_forwards: successful,
        failed_forwards: failed,
        success_rate: format_success_rate(successful, total_events),
        by_event_type,
    }
}

fn format_success_rate(successful: u64, total_events: u64) -> String {
    if total_events == 0 {
        "0%".to_string()
    } else {
        format!("{:.2}%", successful as f64 / total_events as f64 * 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(total: u64, ok: u64, failed: u64, by_type: &[(&str, u64)]) -> InstanceStats {
        InstanceStats {
            total_events: total,
            successful_forwards: ok,
            failed_forwards: failed,
            by_event_type: by_type
                .iter()
                .map(|(t, n)| (t.to_string(), *n))
                .collect(),
        }
    }

    #[test]
    fn sums_element_wise_and_merges_types() {
        let a = stats(4, 3, 1, &[("messages.upsert", 3), ("qrcode.updated", 1)]);
        let b = stats(2, 1, 0, &[("messages.upsert", 2)]);

        let global = aggregate([&a, &b], 2);

        assert_eq!(global.total_instances, 2);
        assert_eq!(global.total_events, 6);
        assert_eq!(global.successful_forwards, 4);
        assert_eq!(global.failed_forwards, 1);
        assert_eq!(global.by_event_type["messages.upsert"], 5);
        assert_eq!(global.by_event_type["qrcode.updated"], 1);
        assert_eq!(global.success_rate, "66.67%");
    }

    #[test]
    fn success_rate_is_zero_percent_without_events() {
        let global = aggregate(std::iter::empty::<&InstanceStats>(), 0);
        assert_eq!(global.success_rate, "0%");
    }

    #[test]
    fn success_rate_formats_two_decimals() {
        let a = stats(3, 3, 0, &[]);
        let global = aggregate([&a], 1);
        assert_eq!(global.success_rate, "100.00%");
    }
}
