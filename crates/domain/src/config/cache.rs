use serde::{Deserialize, Serialize};

/// Admission and staleness policy for the plan cache.
///
/// Entries below `min_confidence` are rejected at store time. Entries older
/// than `stale_after_ms` are reported as misses but still returned with a
/// `stale` diagnostic so callers can decide whether to reuse them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanCachePolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stale_after_ms: Option<u64>,
}

impl PlanCachePolicy {
    pub fn admits(&self, confidence: f64) -> bool {
        match self.min_confidence {
            Some(floor) => confidence >= floor,
            None => true,
        }
    }

    pub fn is_stale(&self, age_ms: u64) -> bool {
        match self.stale_after_ms {
            Some(window) => age_ms > window,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_floor_admits_everything() {
        let policy = PlanCachePolicy::default();
        assert!(policy.admits(0.0));
        assert!(!policy.is_stale(u64::MAX));
    }

    #[test]
    fn floor_and_window_apply() {
        let policy = PlanCachePolicy {
            min_confidence: Some(0.5),
            stale_after_ms: Some(1_000),
        };
        assert!(!policy.admits(0.49));
        assert!(policy.admits(0.5));
        assert!(!policy.is_stale(1_000));
        assert!(policy.is_stale(1_001));
    }
}
