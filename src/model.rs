use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;

use crate::aggregate;

/// Non-finite amounts (NaN, ±inf) count as 0.
pub fn coerce_amount(v: f64) -> f64 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}

/// Reads a money/score figure from loosely typed JSON. Numbers pass through,
/// numeric strings are parsed, everything else (null, absent, garbage) is 0.
pub fn amount_from_json(v: Option<&serde_json::Value>) -> f64 {
    match v {
        Some(serde_json::Value::Number(n)) => n.as_f64().map(coerce_amount).unwrap_or(0.0),
        Some(serde_json::Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map(coerce_amount)
            .unwrap_or(0.0),
        _ => 0.0,
    }
}

pub(crate) fn lenient_amount<'de, D>(d: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(d)?;
    Ok(amount_from_json(raw.as_ref()))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Class {
    pub id: String,
    pub name: String,
    /// Position in the promotion sequence.
    #[serde(default)]
    pub sort_order: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountCategory {
    Discount,
    Scholarship,
}

impl DiscountCategory {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "discount" => Some(Self::Discount),
            "scholarship" => Some(Self::Scholarship),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Discount => "discount",
            Self::Scholarship => "scholarship",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Discount {
    pub id: String,
    #[serde(default, deserialize_with = "lenient_amount")]
    pub amount: f64,
    #[serde(default)]
    pub reason: String,
    pub category: DiscountCategory,
    pub session: String,
    pub term: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub class_id: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub admission_no: Option<String>,
    /// Roster order within the class. Ranking ties keep this order.
    #[serde(default)]
    pub sort_order: i64,
    /// Optional fee ids this student has opted into.
    #[serde(default)]
    pub assigned_fees: BTreeSet<String>,
    #[serde(default)]
    pub discounts: Vec<Discount>,
}

impl Student {
    pub fn display_name(&self) -> String {
        match (self.last_name.trim(), self.first_name.trim()) {
            ("", "") => self.id.clone(),
            (last, "") => last.to_string(),
            ("", first) => first.to_string(),
            (last, first) => format!("{}, {}", last, first),
        }
    }

    pub fn has_optional_fee(&self, fee_id: &str) -> bool {
        self.assigned_fees.contains(fee_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreRow {
    pub subject: String,
    #[serde(default, deserialize_with = "lenient_amount")]
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreRecord {
    pub id: String,
    pub student_id: String,
    /// Class the student was in when the record was graded. Never rewritten.
    pub class_id: String,
    pub session: String,
    pub term: String,
    #[serde(default)]
    pub rows: Vec<ScoreRow>,
    #[serde(default, deserialize_with = "lenient_amount")]
    pub average: f64,
    #[serde(default)]
    pub promoted_to: Option<String>,
}

impl ScoreRecord {
    /// Builds a record whose `average` is derived from `rows`.
    pub fn new(
        id: impl Into<String>,
        student_id: impl Into<String>,
        class_id: impl Into<String>,
        session: impl Into<String>,
        term: impl Into<String>,
        rows: Vec<ScoreRow>,
    ) -> Self {
        let mut rec = Self {
            id: id.into(),
            student_id: student_id.into(),
            class_id: class_id.into(),
            session: session.into(),
            term: term.into(),
            rows,
            average: 0.0,
            promoted_to: None,
        };
        rec.recompute_average();
        rec
    }

    pub fn recompute_average(&mut self) {
        self.average = aggregate::mean_of_positive(self.rows.iter().map(|r| r.total));
    }

    pub fn total(&self) -> f64 {
        aggregate::sum_score_rows(&self.rows)
    }

    pub fn matches(&self, student_id: &str, session: &str, term: &str) -> bool {
        self.student_id == student_id && self.session == session && self.term == term
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeStructure {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "lenient_amount")]
    pub amount: f64,
    /// `None` applies to every class.
    #[serde(default)]
    pub class_id: Option<String>,
    pub session: String,
    pub term: String,
    #[serde(default)]
    pub is_optional: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: String,
    pub student_id: String,
    #[serde(default, deserialize_with = "lenient_amount")]
    pub amount: f64,
    pub session: String,
    pub term: String,
    #[serde(default)]
    pub paid_at: Option<String>,
    #[serde(default)]
    pub reference: Option<String>,
}
