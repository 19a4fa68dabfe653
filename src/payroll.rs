use serde::{Deserialize, Serialize};

use crate::aggregate::sum_amounts;
use crate::model::coerce_amount;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayItem {
    pub label: String,
    #[serde(default, deserialize_with = "crate::model::lenient_amount")]
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Payslip {
    pub base: f64,
    pub total_allowances: f64,
    pub total_deductions: f64,
    pub gross: f64,
    /// Signed, like a ledger balance.
    pub net: f64,
}

/// Structural allowance/deduction summation. No tax rules are applied.
pub fn payslip(base: f64, allowances: &[PayItem], deductions: &[PayItem]) -> Payslip {
    let base = coerce_amount(base);
    let total_allowances = sum_amounts(allowances.iter().map(|a| a.amount));
    let total_deductions = sum_amounts(deductions.iter().map(|d| d.amount));
    let gross = base + total_allowances;
    Payslip {
        base,
        total_allowances,
        total_deductions,
        gross,
        net: gross - total_deductions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(label: &str, amount: f64) -> PayItem {
        PayItem {
            label: label.to_string(),
            amount,
        }
    }

    #[test]
    fn sums_allowances_and_deductions() {
        let p = payslip(
            120_000.0,
            &[item("housing", 30_000.0), item("transport", 10_000.0)],
            &[item("pension", 9_600.0), item("loan", f64::NAN)],
        );
        assert_eq!(p.gross, 160_000.0);
        assert_eq!(p.total_deductions, 9_600.0);
        assert_eq!(p.net, 150_400.0);
    }

    #[test]
    fn net_is_not_clamped() {
        let p = payslip(1_000.0, &[], &[item("advance", 4_000.0)]);
        assert_eq!(p.net, -3_000.0);
    }
}
