//! Token usage accounting.
//!
//! One [`CostTracker`] is shared by every in-flight call of a run. Increments
//! for the same provider may race; none of them is lost.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

/// Accumulated token counts per provider id.
#[derive(Debug, Default)]
pub struct CostTracker {
    totals: RwLock<HashMap<String, AtomicU64>>,
}

impl CostTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `tokens` to the running total for `provider`.
    pub fn add(&self, provider: &str, tokens: u64) {
        {
            let totals = self.totals.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(counter) = totals.get(provider) {
                counter.fetch_add(tokens, Ordering::Relaxed);
                return;
            }
        }

        let mut totals = self.totals.write().unwrap_or_else(PoisonError::into_inner);
        totals
            .entry(provider.to_string())
            .or_default()
            .fetch_add(tokens, Ordering::Relaxed);
    }

    /// Total for one provider; zero if it never reported usage.
    pub fn get(&self, provider: &str) -> u64 {
        let totals = self.totals.read().unwrap_or_else(PoisonError::into_inner);
        totals
            .get(provider)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Point-in-time copy of all totals, sorted by provider id.
    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        let totals = self.totals.read().unwrap_or_else(PoisonError::into_inner);
        totals
            .iter()
            .map(|(k, v)| (k.clone(), v.load(Ordering::Relaxed)))
            .collect()
    }

    pub fn total(&self) -> u64 {
        self.snapshot().values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn accumulates_per_provider() {
        let tracker = CostTracker::new();
        tracker.add("OpenAI", 100);
        tracker.add("OpenAI", 50);
        tracker.add("Claude", 7);

        assert_eq!(tracker.get("OpenAI"), 150);
        assert_eq!(tracker.get("Claude"), 7);
        assert_eq!(tracker.get("Grok"), 0);
        assert_eq!(tracker.total(), 157);

        let snap = tracker.snapshot();
        assert_eq!(snap.keys().collect::<Vec<_>>(), vec!["Claude", "OpenAI"]);
    }

    #[test]
    fn concurrent_adds_are_not_lost() {
        let tracker = Arc::new(CostTracker::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        tracker.add("Llama", 1);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(tracker.get("Llama"), 8000);
    }
}
