use serde::Serialize;

use crate::aggregate;
use crate::model::{ScoreRecord, Student};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedStudent {
    pub student_id: String,
    pub display_name: String,
    pub position: usize,
    pub total: f64,
    pub average: f64,
    pub has_record: bool,
}

fn find_record<'a>(
    records: &'a [ScoreRecord],
    student_id: &str,
    session: &str,
    term: &str,
) -> Option<&'a ScoreRecord> {
    records.iter().find(|r| r.matches(student_id, session, term))
}

/// Ranks every student currently in `class_id` for (session, term) by the sum
/// of their row totals. Students without a record rank on 0. Ties keep the
/// order of `students`.
pub fn rank_class(
    class_id: &str,
    students: &[Student],
    records: &[ScoreRecord],
    session: &str,
    term: &str,
) -> Vec<RankedStudent> {
    let mut rows: Vec<RankedStudent> = students
        .iter()
        .filter(|s| s.class_id == class_id)
        .map(|s| {
            let rec = find_record(records, &s.id, session, term);
            RankedStudent {
                student_id: s.id.clone(),
                display_name: s.display_name(),
                position: 0,
                total: rec.map(|r| r.total()).unwrap_or(0.0),
                average: rec.map(|r| r.average).unwrap_or(0.0),
                has_record: rec.is_some(),
            }
        })
        .collect();

    aggregate::rank_descending(&mut rows, |r| r.total);
    for (i, r) in rows.iter_mut().enumerate() {
        r.position = i + 1;
    }
    rows
}

/// 1-based position of `student_id` within their current class, or `None` when
/// the student is not on the roster passed in (e.g. already promoted out).
///
/// `students` may be the whole school; it is filtered to the subject's class.
pub fn position(
    student_id: &str,
    students: &[Student],
    records: &[ScoreRecord],
    session: &str,
    term: &str,
) -> Option<usize> {
    let subject = students.iter().find(|s| s.id == student_id)?;
    rank_class(&subject.class_id, students, records, session, term)
        .into_iter()
        .find(|r| r.student_id == student_id)
        .map(|r| r.position)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ScoreRow;
    use std::collections::BTreeSet;

    const SESSION: &str = "2024/2025";
    const TERM: &str = "First Term";

    fn student(id: &str, class_id: &str) -> Student {
        Student {
            id: id.to_string(),
            class_id: class_id.to_string(),
            first_name: String::new(),
            last_name: String::new(),
            admission_no: None,
            sort_order: 0,
            assigned_fees: BTreeSet::new(),
            discounts: Vec::new(),
        }
    }

    fn record(student_id: &str, class_id: &str, totals: &[f64]) -> ScoreRecord {
        let rows = totals
            .iter()
            .enumerate()
            .map(|(i, t)| ScoreRow {
                subject: format!("S{}", i),
                total: *t,
            })
            .collect();
        ScoreRecord::new(
            format!("rec-{}", student_id),
            student_id,
            class_id,
            SESSION,
            TERM,
            rows,
        )
    }

    #[test]
    fn tied_students_keep_input_order() {
        let students = vec![student("a", "jss1"), student("b", "jss1"), student("c", "jss1")];
        let records = vec![
            record("a", "jss1", &[100.0, 100.0, 100.0]),
            record("b", "jss1", &[150.0, 150.0]),
            record("c", "jss1", &[125.0, 125.0]),
        ];
        let got: Vec<Option<usize>> = ["a", "b", "c"]
            .iter()
            .map(|id| position(id, &students, &records, SESSION, TERM))
            .collect();
        assert_eq!(got, vec![Some(1), Some(2), Some(3)]);

        let swapped = vec![student("b", "jss1"), student("a", "jss1"), student("c", "jss1")];
        assert_eq!(position("b", &swapped, &records, SESSION, TERM), Some(1));
        assert_eq!(position("a", &swapped, &records, SESSION, TERM), Some(2));
    }

    #[test]
    fn ranks_on_sum_not_average() {
        let students = vec![student("few", "jss1"), student("many", "jss1")];
        let records = vec![
            record("few", "jss1", &[90.0]),
            record("many", "jss1", &[60.0, 60.0]),
        ];
        assert_eq!(position("many", &students, &records, SESSION, TERM), Some(1));
        assert_eq!(position("few", &students, &records, SESSION, TERM), Some(2));
    }

    #[test]
    fn other_classes_and_missing_students_are_excluded() {
        let students = vec![student("a", "jss1"), student("x", "jss2"), student("b", "jss1")];
        let records = vec![
            record("x", "jss2", &[99.0, 99.0, 99.0]),
            record("b", "jss1", &[10.0]),
        ];
        let ranked = rank_class("jss1", &students, &records, SESSION, TERM);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].student_id, "b");
        assert!(!ranked[1].has_record);
        assert_eq!(ranked[1].total, 0.0);

        assert_eq!(position("ghost", &students, &records, SESSION, TERM), None);
    }

    #[test]
    fn records_from_other_terms_are_ignored() {
        let students = vec![student("a", "jss1"), student("b", "jss1")];
        let mut other_term = record("b", "jss1", &[99.0]);
        other_term.term = "Second Term".to_string();
        let records = vec![record("a", "jss1", &[10.0]), other_term];
        assert_eq!(position("a", &students, &records, SESSION, TERM), Some(1));
        assert_eq!(position("b", &students, &records, SESSION, TERM), Some(2));
    }

    #[test]
    fn empty_record_ties_with_missing_record_in_roster_order() {
        let students = vec![student("with_empty_record", "jss1"), student("no_record", "jss1")];
        let records = vec![record("with_empty_record", "jss1", &[])];

        let ranked = rank_class("jss1", &students, &records, SESSION, TERM);
        let order: Vec<&str> = ranked.iter().map(|r| r.student_id.as_str()).collect();
        assert_eq!(order, vec!["with_empty_record", "no_record"]);
        assert!(ranked[0].total.is_sign_positive());
        assert_eq!(
            position("with_empty_record", &students, &records, SESSION, TERM),
            Some(1)
        );
    }
}
