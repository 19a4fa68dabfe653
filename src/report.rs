use serde::Serialize;

use crate::grade::{self, Letter};
use crate::model::{ScoreRecord, Student};
use crate::ranking;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectResult {
    pub subject: String,
    pub total: f64,
    pub grade: Letter,
    pub comment: &'static str,
}

/// Data behind a term report for one student. Layout is the caller's concern.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentReport {
    pub student_id: String,
    pub display_name: String,
    pub class_id: String,
    pub session: String,
    pub term: String,
    pub subjects: Vec<SubjectResult>,
    pub total: f64,
    pub average: f64,
    pub position: Option<usize>,
    pub class_size: usize,
}

pub fn student_report(
    student_id: &str,
    students: &[Student],
    records: &[ScoreRecord],
    session: &str,
    term: &str,
) -> Option<StudentReport> {
    let student = students.iter().find(|s| s.id == student_id)?;
    let record = records
        .iter()
        .find(|r| r.matches(student_id, session, term));

    let subjects = record
        .map(|r| {
            r.rows
                .iter()
                .map(|row| {
                    let g = grade::grade(row.total);
                    SubjectResult {
                        subject: row.subject.clone(),
                        total: row.total,
                        grade: g.grade,
                        comment: g.comment,
                    }
                })
                .collect()
        })
        .unwrap_or_default();

    let class_size = students
        .iter()
        .filter(|s| s.class_id == student.class_id)
        .count();

    Some(StudentReport {
        student_id: student.id.clone(),
        display_name: student.display_name(),
        class_id: student.class_id.clone(),
        session: session.to_string(),
        term: term.to_string(),
        subjects,
        total: record.map(|r| r.total()).unwrap_or(0.0),
        average: record.map(|r| r.average).unwrap_or(0.0),
        position: ranking::position(student_id, students, records, session, term),
        class_size,
    })
}
