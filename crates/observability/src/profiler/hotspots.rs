//! Per-operation timing ledger.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Hotspot {
    pub name: String,
    pub count: u64,
    pub total_time_ms: f64,
    pub avg_time_ms: f64,
}

#[derive(Debug, Default)]
pub(crate) struct HotspotLedger {
    entries: Mutex<HashMap<String, Hotspot>>,
}

impl HotspotLedger {
    pub(crate) fn record(&self, name: &str, duration_ms: f64) {
        let mut entries = self.entries.lock();
        let entry = entries.entry(name.to_string()).or_insert_with(|| Hotspot {
            name: name.to_string(),
            count: 0,
            total_time_ms: 0.0,
            avg_time_ms: 0.0,
        });
        entry.count += 1;
        entry.total_time_ms += duration_ms;
        entry.avg_time_ms = entry.total_time_ms / entry.count as f64;
    }

    /// All entries, heaviest total time first.
    pub(crate) fn sorted(&self) -> Vec<Hotspot> {
        let mut all: Vec<Hotspot> = self.entries.lock().values().cloned().collect();
        all.sort_by(|a, b| {
            b.total_time_ms
                .total_cmp(&a.total_time_ms)
                .then_with(|| a.name.cmp(&b.name))
        });
        all
    }

    pub(crate) fn clear(&self) {
        self.entries.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_and_sorts_by_total_time() {
        let ledger = HotspotLedger::default();
        ledger.record("render", 10.0);
        ledger.record("render", 30.0);
        ledger.record("export", 100.0);
        ledger.record("email", 5.0);

        let sorted = ledger.sorted();
        let names: Vec<&str> = sorted.iter().map(|h| h.name.as_str()).collect();
        assert_eq!(names, vec!["export", "render", "email"]);
        assert_eq!(sorted[1].count, 2);
        assert_eq!(sorted[1].avg_time_ms, 20.0);
    }
}
