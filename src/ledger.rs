use serde::Serialize;

use crate::aggregate::sum_amounts;
use crate::model::{Discount, DiscountCategory, FeeStructure, Payment, Student};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Ledger {
    pub student_id: String,
    pub session: String,
    pub term: String,
    /// Applicable fees before discounts.
    pub raw_bill: f64,
    /// `max(0, raw_bill - total_discount)`.
    pub total_bill: f64,
    pub total_discount: f64,
    pub total_scholarship: f64,
    pub total_paid: f64,
    /// Signed. Negative means the student is in credit.
    pub balance: f64,
    pub applicable_fees: Vec<FeeStructure>,
    pub active_discounts: Vec<Discount>,
    pub payments: Vec<Payment>,
}

fn fee_applies(fee: &FeeStructure, student: &Student, session: &str, term: &str) -> bool {
    if fee.session != session || fee.term != term {
        return false;
    }
    let class_ok = match fee.class_id.as_deref() {
        None => true,
        Some(cid) => cid == student.class_id,
    };
    if !class_ok {
        return false;
    }
    !fee.is_optional || student.has_optional_fee(&fee.id)
}

pub fn ledger(
    student: &Student,
    fees: &[FeeStructure],
    payments: &[Payment],
    session: &str,
    term: &str,
) -> Ledger {
    let applicable_fees: Vec<FeeStructure> = fees
        .iter()
        .filter(|f| fee_applies(f, student, session, term))
        .cloned()
        .collect();
    let raw_bill = sum_amounts(applicable_fees.iter().map(|f| f.amount));

    let active_discounts: Vec<Discount> = student
        .discounts
        .iter()
        .filter(|d| d.session == session && d.term == term)
        .cloned()
        .collect();
    let total_discount = sum_amounts(active_discounts.iter().map(|d| d.amount));
    let total_scholarship = sum_amounts(
        active_discounts
            .iter()
            .filter(|d| d.category == DiscountCategory::Scholarship)
            .map(|d| d.amount),
    );

    let total_bill = (raw_bill - total_discount).max(0.0);

    let student_payments: Vec<Payment> = payments
        .iter()
        .filter(|p| p.student_id == student.id && p.session == session && p.term == term)
        .cloned()
        .collect();
    let total_paid = sum_amounts(student_payments.iter().map(|p| p.amount));

    Ledger {
        student_id: student.id.clone(),
        session: session.to_string(),
        term: term.to_string(),
        raw_bill,
        total_bill,
        total_discount,
        total_scholarship,
        total_paid,
        balance: total_bill - total_paid,
        applicable_fees,
        active_discounts,
        payments: student_payments,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassLedgerRow {
    pub student_id: String,
    pub display_name: String,
    pub total_bill: f64,
    pub total_discount: f64,
    pub total_paid: f64,
    pub balance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassLedger {
    pub class_id: String,
    pub session: String,
    pub term: String,
    pub rows: Vec<ClassLedgerRow>,
    pub total_billed: f64,
    pub total_discount: f64,
    pub total_paid: f64,
    /// Sum of positive balances.
    pub outstanding: f64,
    /// Sum of negative balances, reported as a positive figure.
    pub credit: f64,
}

/// Ledger for every student currently in `class_id`, in roster order.
pub fn class_ledger(
    class_id: &str,
    students: &[Student],
    fees: &[FeeStructure],
    payments: &[Payment],
    session: &str,
    term: &str,
) -> ClassLedger {
    let rows: Vec<ClassLedgerRow> = students
        .iter()
        .filter(|s| s.class_id == class_id)
        .map(|s| {
            let l = ledger(s, fees, payments, session, term);
            ClassLedgerRow {
                student_id: s.id.clone(),
                display_name: s.display_name(),
                total_bill: l.total_bill,
                total_discount: l.total_discount,
                total_paid: l.total_paid,
                balance: l.balance,
            }
        })
        .collect();

    ClassLedger {
        class_id: class_id.to_string(),
        session: session.to_string(),
        term: term.to_string(),
        total_billed: sum_amounts(rows.iter().map(|r| r.total_bill)),
        total_discount: sum_amounts(rows.iter().map(|r| r.total_discount)),
        total_paid: sum_amounts(rows.iter().map(|r| r.total_paid)),
        outstanding: sum_amounts(rows.iter().map(|r| r.balance.max(0.0))),
        credit: sum_amounts(rows.iter().map(|r| (-r.balance).max(0.0))),
        rows,
    }
}
