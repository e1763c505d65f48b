//! Per-provider token accounting.
//!
//! [`UsageTracker`] accumulates the `usage` block of every completed LLM
//! call. It is observability only; nothing reads it to make decisions.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use serde::Serialize;

use super::Usage;

/// Accumulated token counts for one provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProviderUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    /// Calls recorded, including ones whose response carried no usage.
    pub requests: u64,
}

impl ProviderUsage {
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }

    fn add(&mut self, other: &ProviderUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.requests += other.requests;
    }
}

/// Thread-safe usage counters keyed by provider name.
///
/// Share it with `Arc<UsageTracker>`; every method takes `&self`.
#[derive(Debug, Default)]
pub struct UsageTracker {
    by_provider: Mutex<HashMap<String, ProviderUsage>>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one completed call against `provider`.
    pub fn record(&self, provider: &str, usage: Option<Usage>) {
        let mut map = self
            .by_provider
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let entry = map.entry(provider.to_string()).or_default();
        entry.requests += 1;
        if let Some(usage) = usage {
            entry.prompt_tokens += u64::from(usage.prompt_tokens);
            entry.completion_tokens += u64::from(usage.completion_tokens);
        }
    }

    pub fn get(&self, provider: &str) -> Option<ProviderUsage> {
        self.by_provider
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(provider)
            .copied()
    }

    /// A sorted copy of all counters.
    pub fn snapshot(&self) -> BTreeMap<String, ProviderUsage> {
        self.by_provider
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }

    /// Sum across all providers.
    pub fn totals(&self) -> ProviderUsage {
        let map = self
            .by_provider
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut total = ProviderUsage::default();
        for usage in map.values() {
            total.add(usage);
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_record_accumulates() {
        let tracker = UsageTracker::new();
        tracker.record("openai", Some(Usage::new(10, 5)));
        tracker.record("openai", Some(Usage::new(3, 2)));
        let usage = tracker.get("openai").unwrap();
        assert_eq!(usage.prompt_tokens, 13);
        assert_eq!(usage.completion_tokens, 7);
        assert_eq!(usage.requests, 2);
        assert_eq!(usage.total_tokens(), 20);
    }

    #[test]
    fn test_missing_usage_still_counts_request() {
        let tracker = UsageTracker::new();
        tracker.record("local", None);
        let usage = tracker.get("local").unwrap();
        assert_eq!(usage.requests, 1);
        assert_eq!(usage.total_tokens(), 0);
        assert!(tracker.get("other").is_none());
    }

    #[test]
    fn test_snapshot_and_totals() {
        let tracker = UsageTracker::new();
        tracker.record("b", Some(Usage::new(1, 1)));
        tracker.record("a", Some(Usage::new(2, 2)));
        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.keys().collect::<Vec<_>>(), vec!["a", "b"]);
        let totals = tracker.totals();
        assert_eq!(totals.requests, 2);
        assert_eq!(totals.total_tokens(), 6);
    }

    #[tokio::test]
    async fn test_concurrent_records() {
        let tracker = Arc::new(UsageTracker::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let t = Arc::clone(&tracker);
            handles.push(tokio::spawn(async move {
                for _ in 0..25 {
                    t.record("openai", Some(Usage::new(1, 0)));
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(tracker.get("openai").unwrap().requests, 200);
        assert_eq!(tracker.totals().prompt_tokens, 200);
    }
}
