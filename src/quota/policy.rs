//! Oldest-first eviction planning
//!
//! Pure function over sizes and timestamps; the manager supplies them from
//! disk and performs the removals.

use chrono::{DateTime, Utc};

/// Something that can be evicted as a whole.
#[derive(Debug, Clone, PartialEq)]
pub struct EvictionCandidate<T> {
    pub key: T,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EvictionPlan<T> {
    /// Oldest first. When not `sufficient`, every candidate.
    pub victims: Vec<EvictionCandidate<T>>,
    pub freed: u64,
    /// Removing `victims` brings `used + incoming` within the quota
    pub sufficient: bool,
}

impl<T> EvictionPlan<T> {
    pub fn is_noop(&self) -> bool {
        self.sufficient && self.victims.is_empty()
    }
}

/// Choose the shortest oldest-first prefix of `candidates` whose removal
/// makes room for `incoming` bytes. Ties on modification time keep the
/// candidates' given order.
pub fn plan_eviction<T: Clone>(
    used: u64,
    incoming: u64,
    quota: u64,
    candidates: &[EvictionCandidate<T>],
) -> EvictionPlan<T> {
    let fits = |freed: u64| used.saturating_sub(freed).saturating_add(incoming) <= quota;

    let mut ordered: Vec<&EvictionCandidate<T>> = candidates.iter().collect();
    ordered.sort_by_key(|c| c.modified);

    let mut victims = Vec::new();
    let mut freed = 0u64;
    for candidate in ordered {
        if fits(freed) {
            break;
        }
        freed = freed.saturating_add(candidate.size);
        victims.push(candidate.clone());
    }

    EvictionPlan {
        sufficient: fits(freed),
        victims,
        freed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64, name: &'static str, size: u64) -> EvictionCandidate<&'static str> {
        EvictionCandidate {
            key: name,
            size,
            modified: Utc.timestamp_opt(secs, 0).unwrap(),
        }
    }

    #[test]
    fn test_no_eviction_when_it_fits() {
        let plan = plan_eviction(100, 50, 200, &[at(1, "a", 100)]);
        assert!(plan.is_noop());
    }

    #[test]
    fn test_evicts_oldest_first() {
        let candidates = [at(3, "f3", 300), at(1, "f1", 300), at(2, "f2", 300)];
        let plan = plan_eviction(900, 200, 1000, &candidates);

        assert!(plan.sufficient);
        let keys: Vec<_> = plan.victims.iter().map(|v| v.key).collect();
        assert_eq!(keys, vec!["f1"]);
        assert_eq!(plan.freed, 300);
    }

    #[test]
    fn test_evicts_until_enough() {
        let candidates = [at(1, "a", 100), at(2, "b", 100), at(3, "c", 100)];
        let plan = plan_eviction(300, 250, 300, &candidates);

        let keys: Vec<_> = plan.victims.iter().map(|v| v.key).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
        assert!(plan.sufficient);
    }

    #[test]
    fn test_insufficient_takes_everything() {
        let plan = plan_eviction(200, 2000, 1000, &[at(1, "a", 100), at(2, "b", 100)]);
        assert!(!plan.sufficient);
        assert_eq!(plan.victims.len(), 2);
    }
}
