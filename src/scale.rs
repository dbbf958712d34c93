//! Numeric response scales.
//!
//! A [`ScaleRange`] can only be obtained through validation, so every value of
//! the type satisfies `min < max`. Anything that reaches a provider call has
//! already passed through here.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Raised when a range descriptor is not exactly two integers with `min < max`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid scale range: {raw}")]
pub struct InvalidScaleError {
    pub raw: String,
}

impl InvalidScaleError {
    fn new(raw: impl Into<String>) -> Self {
        Self { raw: raw.into() }
    }
}

/// Inclusive integer response range of a survey item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "[i64; 2]")]
pub struct ScaleRange {
    min: i64,
    max: i64,
}

impl ScaleRange {
    pub fn new(min: i64, max: i64) -> Result<Self, InvalidScaleError> {
        if min < max {
            Ok(Self { min, max })
        } else {
            Err(InvalidScaleError::new(format!("[{min}, {max}]")))
        }
    }

    pub fn min(&self) -> i64 {
        self.min
    }

    pub fn max(&self) -> i64 {
        self.max
    }

    /// `(min + max) / 2`, the substitute value for unrecoverable answers.
    pub fn midpoint(&self) -> f64 {
        (self.min as f64 + self.max as f64) / 2.0
    }

    /// Inclusive on both ends. NaN is never contained.
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min as f64 && value <= self.max as f64
    }

    /// Mirror a value around the range centre: `(min + max) - value`.
    pub fn reflect(&self, value: f64) -> f64 {
        self.min as f64 + self.max as f64 - value
    }

    /// Human-readable form used inside prompts.
    pub fn describe(&self) -> String {
        format!("(Scale from {} to {})", self.min, self.max)
    }
}

impl fmt::Display for ScaleRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.min, self.max)
    }
}

impl From<ScaleRange> for [i64; 2] {
    fn from(range: ScaleRange) -> Self {
        [range.min, range.max]
    }
}

impl TryFrom<Value> for ScaleRange {
    type Error = InvalidScaleError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        validate(&value)
    }
}

/// Check a raw range descriptor and turn it into a [`ScaleRange`].
///
/// Accepts only a two-element array of integers with `min < max`. Floats
/// (even integral ones like `1.0`), strings and booleans are rejected.
pub fn validate(raw: &Value) -> Result<ScaleRange, InvalidScaleError> {
    let items = match raw.as_array() {
        Some(items) if items.len() == 2 => items,
        _ => return Err(InvalidScaleError::new(raw.to_string())),
    };

    let bound = |v: &Value| match v {
        Value::Number(n) => n.as_i64(),
        _ => None,
    };

    match (bound(&items[0]), bound(&items[1])) {
        (Some(min), Some(max)) if min < max => Ok(ScaleRange { min, max }),
        _ => Err(InvalidScaleError::new(raw.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn validate_accepts_ordered_integer_pairs() {
        for (lo, hi) in [(1, 7), (1, 5), (-4, 4), (0, 1), (-10, -3)] {
            let range = validate(&json!([lo, hi])).unwrap();
            assert_eq!(range.min(), lo);
            assert_eq!(range.max(), hi);
        }
    }

    #[test]
    fn validate_rejects_malformed_shapes() {
        let bad = [
            json!([7, 1]),
            json!([3, 3]),
            json!([1]),
            json!([1, 4, 7]),
            json!([]),
            json!([1.0, 7]),
            json!([1, 7.5]),
            json!(["1", "7"]),
            json!([true, 7]),
            json!({"min": 1, "max": 7}),
            json!(null),
            json!(5),
        ];
        for raw in bad {
            assert!(validate(&raw).is_err(), "expected rejection of {raw}");
        }
    }

    #[test]
    fn midpoint_and_containment() {
        let range = ScaleRange::new(1, 7).unwrap();
        assert_eq!(range.midpoint(), 4.0);
        assert!(range.contains(1.0));
        assert!(range.contains(7.0));
        assert!(range.contains(3.5));
        assert!(!range.contains(0.99));
        assert!(!range.contains(7.01));
        assert!(!range.contains(f64::NAN));

        let mfq = ScaleRange::new(1, 5).unwrap();
        assert_eq!(mfq.midpoint(), 3.0);
        let nfc = ScaleRange::new(-4, 4).unwrap();
        assert_eq!(nfc.midpoint(), 0.0);
        let even = ScaleRange::new(1, 6).unwrap();
        assert_eq!(even.midpoint(), 3.5);
    }

    #[test]
    fn reflect_mirrors_and_survives_extreme_bounds() {
        let range = ScaleRange::new(1, 7).unwrap();
        assert_eq!(range.reflect(2.0), 6.0);
        assert_eq!(range.reflect(4.0), 4.0);
        let nfc = ScaleRange::new(-4, 4).unwrap();
        assert_eq!(nfc.reflect(-3.0), 3.0);

        let top = ScaleRange::new(i64::MAX - 1, i64::MAX).unwrap();
        let reflected = top.reflect(i64::MAX as f64);
        assert!(reflected.is_finite());
        assert_eq!(reflected, (i64::MAX - 1) as f64);

        let bottom = ScaleRange::new(i64::MIN, i64::MIN + 1).unwrap();
        assert!(bottom.reflect(i64::MIN as f64).is_finite());
    }

    #[test]
    fn serde_goes_through_validation() {
        let range: ScaleRange = serde_json::from_value(json!([1, 7])).unwrap();
        assert_eq!(range, ScaleRange::new(1, 7).unwrap());
        assert_eq!(serde_json::to_value(range).unwrap(), json!([1, 7]));

        let err = serde_json::from_value::<ScaleRange>(json!([7, 1])).unwrap_err();
        assert!(err.to_string().contains("invalid scale range"));
    }

    #[test]
    fn describe_matches_prompt_wording() {
        let range = ScaleRange::new(1, 7).unwrap();
        assert_eq!(range.describe(), "(Scale from 1 to 7)");
    }
}
