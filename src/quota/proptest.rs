//! Property-Based Tests for Eviction Planning
//!
//! # Test Properties
//!
//! 1. **Quota Invariant**: a sufficient plan leaves `used + incoming <= quota`
//! 2. **Oldest First**: no kept candidate is older than an evicted one
//! 3. **Minimality**: dropping the newest victim would no longer fit

#![cfg(test)]

use chrono::{TimeZone, Utc};
use proptest::prelude::*;

use super::policy::{plan_eviction, EvictionCandidate};

// =============================================================================
// Property Strategies
// =============================================================================

/// Candidates with distinct timestamps and sizes that sum to `used`.
fn candidates_strategy() -> impl Strategy<Value = Vec<EvictionCandidate<usize>>> {
    prop::collection::vec((1u64..500, 0i64..1_000_000), 0..12).prop_map(|items| {
        items
            .into_iter()
            .enumerate()
            .map(|(index, (size, secs))| EvictionCandidate {
                key: index,
                size,
                // Distinct by construction.
                modified: Utc.timestamp_opt(secs * 16 + index as i64, 0).unwrap(),
            })
            .collect()
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Property: when every stored byte is evictable and the incoming item
    /// fits the quota on its own, the plan always succeeds and the invariant
    /// holds afterwards.
    #[test]
    fn prop_quota_invariant(
        candidates in candidates_strategy(),
        incoming in 0u64..1000,
        quota in 1u64..3000,
    ) {
        prop_assume!(incoming <= quota);
        let used: u64 = candidates.iter().map(|c| c.size).sum();

        let plan = plan_eviction(used, incoming, quota, &candidates);

        prop_assert!(plan.sufficient);
        prop_assert!(used - plan.freed + incoming <= quota);
        prop_assert_eq!(plan.freed, plan.victims.iter().map(|v| v.size).sum::<u64>());
    }

    /// Property: victims are exactly the oldest candidates.
    #[test]
    fn prop_oldest_first(
        candidates in candidates_strategy(),
        incoming in 0u64..1000,
        quota in 1u64..3000,
    ) {
        let used: u64 = candidates.iter().map(|c| c.size).sum();
        let plan = plan_eviction(used, incoming, quota, &candidates);

        if let Some(newest_victim) = plan.victims.iter().map(|v| v.modified).max() {
            for kept in candidates.iter().filter(|c| !plan.victims.iter().any(|v| v.key == c.key)) {
                prop_assert!(kept.modified > newest_victim);
            }
        }
    }

    /// Property: a sufficient plan evicts nothing it did not need.
    #[test]
    fn prop_minimal(
        candidates in candidates_strategy(),
        incoming in 0u64..1000,
        quota in 1u64..3000,
    ) {
        let used: u64 = candidates.iter().map(|c| c.size).sum();
        let plan = plan_eviction(used, incoming, quota, &candidates);

        if plan.sufficient {
            if let Some(last) = plan.victims.last() {
                let without_last = plan.freed - last.size;
                prop_assert!(used - without_last + incoming > quota);
            }
        }
    }
}
