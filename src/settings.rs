use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::EngineError;

/// Key under which the academic settings live in the workspace settings table.
pub const SETTINGS_KEY: &str = "settings.academic";

/// Academic settings passed explicitly into every engine call that needs them.
///
/// A fresh workspace has no promotion threshold. Operations that need one
/// reject with a validation error instead of guessing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default)]
    pub promotion_threshold: Option<f64>,
    #[serde(default)]
    pub current_session: String,
    #[serde(default)]
    pub current_term: String,
    /// Terms of a session, in calendar order.
    #[serde(default)]
    pub terms: Vec<String>,
}

pub fn validate_threshold(t: f64) -> Result<f64, EngineError> {
    if !t.is_finite() || !(0.0..=100.0).contains(&t) {
        return Err(EngineError::validation(format!(
            "promotionThreshold must be between 0 and 100 (got {})",
            t
        )));
    }
    Ok(t)
}

impl Settings {
    pub fn require_threshold(&self) -> Result<f64, EngineError> {
        match self.promotion_threshold {
            Some(t) => validate_threshold(t),
            None => Err(EngineError::validation("promotionThreshold is not configured")),
        }
    }

    pub fn term_index(&self, term: &str) -> Option<usize> {
        self.terms.iter().position(|t| t == term)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if let Some(t) = self.promotion_threshold {
            validate_threshold(t)?;
        }
        for (i, t) in self.terms.iter().enumerate() {
            if t.trim().is_empty() {
                return Err(EngineError::validation("terms must not contain blank names"));
            }
            if self.terms[..i].contains(t) {
                return Err(EngineError::validation(format!("duplicate term: {}", t)));
            }
        }
        if !self.terms.is_empty()
            && !self.current_term.is_empty()
            && self.term_index(&self.current_term).is_none()
        {
            return Err(EngineError::validation(format!(
                "currentTerm {} is not in terms",
                self.current_term
            )));
        }
        Ok(())
    }
}

fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, EngineError> {
    let Some(s) = v.as_str() else {
        return Err(EngineError::validation(format!("{} must be a string", key)));
    };
    let t = s.trim();
    if t.chars().count() > max_len {
        return Err(EngineError::validation(format!(
            "{} must be at most {} characters",
            key, max_len
        )));
    }
    Ok(t.to_string())
}

/// Applies a partial update. Unknown keys are rejected; the merged result is
/// validated as a whole before it replaces `current`.
pub fn merge_patch(current: &mut Settings, patch: &Map<String, Value>) -> Result<(), EngineError> {
    let mut next = current.clone();
    for (k, v) in patch {
        match k.as_str() {
            "promotionThreshold" => {
                next.promotion_threshold = if v.is_null() {
                    None
                } else {
                    let Some(n) = v.as_f64() else {
                        return Err(EngineError::validation(
                            "promotionThreshold must be a number or null",
                        ));
                    };
                    Some(validate_threshold(n)?)
                };
            }
            "currentSession" => next.current_session = parse_string_max(v, k, 40)?,
            "currentTerm" => next.current_term = parse_string_max(v, k, 40)?,
            "terms" => {
                let Some(items) = v.as_array() else {
                    return Err(EngineError::validation("terms must be an array of strings"));
                };
                next.terms = items
                    .iter()
                    .map(|t| parse_string_max(t, "terms[]", 40))
                    .collect::<Result<Vec<_>, _>>()?;
            }
            _ => return Err(EngineError::validation(format!("unknown settings field: {}", k))),
        }
    }
    next.validate()?;
    *current = next;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn patch(v: Value) -> Map<String, Value> {
        v.as_object().cloned().expect("object")
    }

    #[test]
    fn missing_threshold_is_rejected_not_defaulted() {
        let s = Settings::default();
        let e = s.require_threshold().expect_err("no threshold");
        assert_eq!(e.code(), "validation_failed");
    }

    #[test]
    fn threshold_range_is_enforced() {
        assert!(validate_threshold(0.0).is_ok());
        assert!(validate_threshold(100.0).is_ok());
        assert!(validate_threshold(100.5).is_err());
        assert!(validate_threshold(-1.0).is_err());
        assert!(validate_threshold(f64::NAN).is_err());
    }

    #[test]
    fn patch_merges_and_validates() {
        let mut s = Settings::default();
        merge_patch(
            &mut s,
            &patch(json!({
                "promotionThreshold": 50,
                "currentSession": "2024/2025",
                "terms": ["First Term", "Second Term", "Third Term"],
                "currentTerm": "Second Term"
            })),
        )
        .expect("merge");
        assert_eq!(s.require_threshold().expect("threshold"), 50.0);
        assert_eq!(s.term_index("Third Term"), Some(2));
        assert_eq!(s.current_session, "2024/2025");
        assert_eq!(s.current_term, "Second Term");
    }

    #[test]
    fn failed_patch_leaves_settings_untouched() {
        let mut s = Settings {
            promotion_threshold: Some(45.0),
            current_session: "2024/2025".into(),
            current_term: "First Term".into(),
            terms: vec!["First Term".into(), "Second Term".into()],
        };
        let before = s.clone();
        assert!(merge_patch(&mut s, &patch(json!({ "promotionThreshold": 120 }))).is_err());
        assert!(merge_patch(&mut s, &patch(json!({ "currentTerm": "Fourth Term" }))).is_err());
        assert!(merge_patch(&mut s, &patch(json!({ "terms": ["A", "A"] }))).is_err());
        assert!(merge_patch(&mut s, &patch(json!({ "colour": "blue" }))).is_err());
        assert_eq!(s, before);
    }

    #[test]
    fn threshold_can_be_cleared() {
        let mut s = Settings {
            promotion_threshold: Some(45.0),
            ..Settings::default()
        };
        merge_patch(&mut s, &patch(json!({ "promotionThreshold": null }))).expect("clear");
        assert_eq!(s.promotion_threshold, None);
    }
}
