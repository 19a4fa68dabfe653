use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    get_required_str, load_students, require_class, require_student, resolve_period, respond,
    to_json, with_conn,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Value};
use termledger::db::{self, RecordFilter};
use termledger::grade;
use termledger::model::ScoreRecord;
use termledger::{ranking, report, EngineError};

fn term_records(
    conn: &Connection,
    session: &str,
    term: &str,
) -> Result<Vec<ScoreRecord>, HandlerErr> {
    db::load_score_records(
        conn,
        &RecordFilter {
            student_id: None,
            session: Some(session),
            term: Some(term),
        },
    )
    .map_err(HandlerErr::db_query)
}

fn grade_json(total: &Value, key: &str) -> Result<Value, HandlerErr> {
    let total = total
        .as_f64()
        .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a number", key)))?;
    let g = grade::grade(total);
    Ok(json!({ "grade": g.grade, "comment": g.comment }))
}

fn handle_grades_compute(req: &Request) -> Value {
    let result = match (req.params.get("total"), req.params.get("totals")) {
        (Some(total), _) => grade_json(total, "total"),
        (None, Some(Value::Array(totals))) => totals
            .iter()
            .map(|t| grade_json(t, "totals"))
            .collect::<Result<Vec<Value>, HandlerErr>>()
            .map(|results| json!({ "results": results })),
        _ => Err(HandlerErr::bad_params("missing total")),
    };
    respond(req, result)
}

fn ranking_position(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let (session, term) = resolve_period(conn, params)?;

    // An unknown student simply has no position.
    let Some(student) = db::load_student(conn, &student_id).map_err(HandlerErr::db_query)? else {
        return Ok(json!({ "studentId": student_id, "position": null, "classSize": 0 }));
    };
    let students = load_students(conn, Some(&student.class_id))?;
    let records = term_records(conn, &session, &term)?;
    let position = ranking::position(&student_id, &students, &records, &session, &term);
    Ok(json!({
        "studentId": student_id,
        "classId": student.class_id,
        "session": session,
        "term": term,
        "position": position,
        "classSize": students.len()
    }))
}

fn ranking_class(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    require_class(conn, &class_id)?;
    let (session, term) = resolve_period(conn, params)?;

    let students = load_students(conn, Some(&class_id))?;
    let records = term_records(conn, &session, &term)?;
    let rows = ranking::rank_class(&class_id, &students, &records, &session, &term);
    Ok(json!({
        "classId": class_id,
        "session": session,
        "term": term,
        "rows": to_json(&rows)?
    }))
}

fn reports_student(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let student = require_student(conn, &student_id)?;
    let (session, term) = resolve_period(conn, params)?;

    let students = load_students(conn, Some(&student.class_id))?;
    let records = term_records(conn, &session, &term)?;
    let report = report::student_report(&student_id, &students, &records, &session, &term)
        .ok_or_else(|| HandlerErr::from(EngineError::not_found("student", student_id.as_str())))?;
    to_json(&report)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "grades.compute" => Some(handle_grades_compute(req)),
        "ranking.position" => Some(with_conn(state, req, ranking_position)),
        "ranking.class" => Some(with_conn(state, req, ranking_class)),
        "reports.student" => Some(with_conn(state, req, reports_student)),
        _ => None,
    }
}
