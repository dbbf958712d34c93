//! Reverse scoring of finalized results.

use std::collections::BTreeMap;

use crate::scale::ScaleRange;
use crate::task::TaskResult;

/// Per-scale reflection table. A reversed item on a scale with item range
/// `[min, max]` scores `(min + max) - score`.
#[derive(Debug, Clone, PartialEq)]
pub struct ReverseScorer {
    reflections: BTreeMap<String, ScaleRange>,
}

impl Default for ReverseScorer {
    /// MFQ `[1, 5]`, RWA and LWA `[1, 7]`.
    fn default() -> Self {
        let mut reflections = BTreeMap::new();
        for (name, min, max) in [("MFQ", 1, 5), ("RWA", 1, 7), ("LWA", 1, 7)] {
            if let Ok(range) = ScaleRange::new(min, max) {
                reflections.insert(name.to_string(), range);
            }
        }
        Self { reflections }
    }
}

impl ReverseScorer {
    pub fn empty() -> Self {
        Self {
            reflections: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, scale_name: impl Into<String>, range: ScaleRange) {
        self.reflections.insert(scale_name.into(), range);
    }

    pub fn with(mut self, scale_name: impl Into<String>, range: ScaleRange) -> Self {
        self.insert(scale_name, range);
        self
    }

    pub fn reflection(&self, scale_name: &str) -> Option<ScaleRange> {
        self.reflections.get(scale_name).copied()
    }

    /// NaN passes through, as does any scale without a reflection entry.
    pub fn score(&self, numeric_score: f64, reverse: bool, scale_name: &str) -> f64 {
        if numeric_score.is_nan() || !reverse {
            return numeric_score;
        }
        match self.reflections.get(scale_name) {
            Some(range) => range.reflect(numeric_score),
            None => numeric_score,
        }
    }

    pub fn score_result(&self, result: &TaskResult) -> f64 {
        self.score(
            result.numeric_score,
            result.task.reverse_flag,
            &result.task.scale_name,
        )
    }

    /// Fill `scored_value` on every result.
    pub fn apply(&self, results: &mut [TaskResult]) {
        for result in results.iter_mut() {
            result.scored_value = Some(self.score_result(result));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_scales_keep_their_formulas() {
        let scorer = ReverseScorer::default();
        for s in [1.0, 2.5, 5.0] {
            assert_eq!(scorer.score(s, true, "MFQ"), 6.0 - s);
        }
        for s in [1.0, 4.0, 7.0] {
            assert_eq!(scorer.score(s, true, "RWA"), 8.0 - s);
            assert_eq!(scorer.score(s, true, "LWA"), 8.0 - s);
        }
    }

    #[test]
    fn reversing_twice_round_trips() {
        let scorer = ReverseScorer::default();
        let once = scorer.score(5.0, true, "RWA");
        assert_eq!(once, 3.0);
        assert_eq!(scorer.score(once, true, "RWA"), 5.0);
    }

    #[test]
    fn pass_through_cases() {
        let scorer = ReverseScorer::default();
        assert_eq!(scorer.score(5.0, false, "RWA"), 5.0);
        assert_eq!(scorer.score(2.0, true, "NFC"), 2.0);
        assert!(scorer.score(f64::NAN, true, "RWA").is_nan());
    }

    #[test]
    fn configured_reflection_for_signed_scale() {
        let scorer = ReverseScorer::default().with("NFC", ScaleRange::new(-4, 4).unwrap());
        assert_eq!(scorer.score(3.0, true, "NFC"), -3.0);
        assert_eq!(scorer.score(0.0, true, "NFC"), 0.0);
    }
}
