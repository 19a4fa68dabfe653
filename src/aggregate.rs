//! Aggregation primitives shared by ranking, ledger, promotion and payroll.

use crate::model::{coerce_amount, ScoreRow};

/// Mean of the strictly positive entries. Empty, all-zero, or all-negative
/// input yields exactly 0. Non-finite entries are ignored.
pub fn mean_of_positive<I>(values: I) -> f64
where
    I: IntoIterator<Item = f64>,
{
    let mut sum = 0.0_f64;
    let mut count: usize = 0;
    for v in values {
        if v.is_finite() && v > 0.0 {
            sum += v;
            count += 1;
        }
    }
    if count > 0 {
        sum / (count as f64)
    } else {
        0.0
    }
}

/// Sum of row totals; 0 for an empty list.
pub fn sum_score_rows(rows: &[ScoreRow]) -> f64 {
    sum_amounts(rows.iter().map(|r| r.total))
}

/// Sum with non-finite entries valued at 0.
pub fn sum_amounts<I>(values: I) -> f64
where
    I: IntoIterator<Item = f64>,
{
    values.into_iter().fold(0.0, |acc, v| acc + coerce_amount(v))
}

/// Sorts by `key` descending. Equal keys keep their input order; there is
/// deliberately no secondary key.
pub fn rank_descending<T, F>(items: &mut [T], key: F)
where
    F: Fn(&T) -> f64,
{
    items.sort_by(|a, b| rank_key(key(b)).total_cmp(&rank_key(key(a))));
}

// -0.0 and 0.0 must compare equal under total_cmp.
fn rank_key(v: f64) -> f64 {
    coerce_amount(v) + 0.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(subject: &str, total: f64) -> ScoreRow {
        ScoreRow {
            subject: subject.to_string(),
            total,
        }
    }

    #[test]
    fn mean_of_positive_empty_is_zero() {
        assert_eq!(mean_of_positive(Vec::<f64>::new()), 0.0);
        assert_eq!(mean_of_positive([0.0, 0.0, 0.0]), 0.0);
        assert_eq!(mean_of_positive([-5.0, 0.0]), 0.0);
    }

    #[test]
    fn mean_of_positive_skips_zeroes() {
        assert_eq!(mean_of_positive([60.0, 0.0, 40.0]), 50.0);
        assert_eq!(mean_of_positive([f64::NAN, 30.0]), 30.0);
    }

    #[test]
    fn sum_rows_handles_empty_and_nan() {
        assert_eq!(sum_score_rows(&[]), 0.0);
        assert_eq!(
            sum_score_rows(&[row("Maths", 70.0), row("English", f64::NAN), row("Art", 5.0)]),
            75.0
        );
    }

    #[test]
    fn rank_descending_is_stable_on_ties() {
        let mut items = vec![("a", 300.0), ("b", 250.0), ("c", 300.0), ("d", 310.0)];
        rank_descending(&mut items, |x| x.1);
        let order: Vec<&str> = items.iter().map(|x| x.0).collect();
        assert_eq!(order, vec!["d", "a", "c", "b"]);
    }

    #[test]
    fn signed_zeroes_tie() {
        assert!(sum_amounts(Vec::<f64>::new()).is_sign_positive());
        let mut items = vec![("neg", -0.0), ("pos", 0.0)];
        rank_descending(&mut items, |x| x.1);
        assert_eq!(items[0].0, "neg");
        let mut items = vec![("pos", 0.0), ("neg", -0.0)];
        rank_descending(&mut items, |x| x.1);
        assert_eq!(items[0].0, "pos");
    }
}
