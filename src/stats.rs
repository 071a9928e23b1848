//! Request statistics, exposed through `$node.stats`.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Default, Clone)]
struct ActionStats {
    count: u64,
    errors: u64,
    total_ms: f64,
    min_ms: f64,
    max_ms: f64,
}

impl ActionStats {
    fn record(&mut self, elapsed_ms: f64, error: bool) {
        if self.count == 0 || elapsed_ms < self.min_ms {
            self.min_ms = elapsed_ms;
        }
        if elapsed_ms > self.max_ms {
            self.max_ms = elapsed_ms;
        }
        self.count += 1;
        self.total_ms += elapsed_ms;
        if error {
            self.errors += 1;
        }
    }

    fn snapshot(&self) -> Value {
        let mean = if self.count > 0 { self.total_ms / self.count as f64 } else { 0.0 };
        json!({
            "count": self.count,
            "errors": self.errors,
            "latency": { "mean": mean, "min": self.min_ms, "max": self.max_ms },
        })
    }
}

#[derive(Debug, Default)]
pub struct StatisticsCollector {
    total: Mutex<ActionStats>,
    actions: Mutex<HashMap<String, ActionStats>>,
}

impl StatisticsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, action: &str, elapsed: Duration, error: bool) {
        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
        self.total
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .record(elapsed_ms, error);
        self.actions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(action.to_string())
            .or_default()
            .record(elapsed_ms, error);
    }

    pub fn snapshot(&self) -> Value {
        let total = self
            .total
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .snapshot();
        let actions: serde_json::Map<String, Value> = self
            .actions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|(name, stats)| (name.clone(), stats.snapshot()))
            .collect();
        json!({ "requests": { "total": total, "actions": actions } })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_counts_errors_and_latency_bounds() {
        let stats = StatisticsCollector::new();
        stats.record("posts.find", Duration::from_millis(10), false);
        stats.record("posts.find", Duration::from_millis(30), true);
        stats.record("users.get", Duration::from_millis(5), false);

        let snapshot = stats.snapshot();
        let total = &snapshot["requests"]["total"];
        assert_eq!(total["count"], 3);
        assert_eq!(total["errors"], 1);

        let find = &snapshot["requests"]["actions"]["posts.find"];
        assert_eq!(find["count"], 2);
        assert_eq!(find["latency"]["min"], 10.0);
        assert_eq!(find["latency"]["max"], 30.0);
        assert_eq!(find["latency"]["mean"], 20.0);
    }

    #[test]
    fn empty_collector_snapshots_cleanly() {
        let stats = StatisticsCollector::new();
        let snapshot = stats.snapshot();
        assert_eq!(snapshot["requests"]["total"]["count"], 0);
    }
}
