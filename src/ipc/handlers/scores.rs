use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    get_opt_str, get_required_str, load_settings, require_student, resolve_period,
    resolve_session, to_json, with_conn,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Value};
use termledger::db::{self, RecordFilter};
use termledger::model::ScoreRow;
use termledger::promotion::session_summary;

fn parse_rows(params: &Value) -> Result<Vec<ScoreRow>, HandlerErr> {
    let Some(raw) = params.get("rows").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("rows must be an array"));
    };
    raw.iter()
        .enumerate()
        .map(|(i, v)| -> Result<ScoreRow, HandlerErr> {
            let row: ScoreRow = serde_json::from_value(v.clone()).map_err(|e| {
                HandlerErr::bad_params(format!("rows[{}]: {}", i, e))
                    .with_details(json!({ "index": i }))
            })?;
            if row.subject.trim().is_empty() {
                return Err(HandlerErr::bad_params(format!("rows[{}]: subject must not be empty", i))
                    .with_details(json!({ "index": i })));
            }
            Ok(row)
        })
        .collect()
}

fn scores_upsert(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let student = require_student(conn, &student_id)?;
    let (session, term) = resolve_period(conn, params)?;
    let rows = parse_rows(params)?;

    // Records are graded in the class the student sits in right now.
    let record = db::upsert_score_record(
        conn,
        &student.id,
        &student.class_id,
        &session,
        &term,
        rows,
    )
    .map_err(|e| HandlerErr::db_insert(e).with_details(json!({ "table": "score_records" })))?;
    Ok(json!({ "recordId": record.id, "record": to_json(&record)? }))
}

fn scores_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_opt_str(params, "studentId");
    let class_id = get_opt_str(params, "classId");
    let session = get_opt_str(params, "session");
    let term = get_opt_str(params, "term");

    let mut records = db::load_score_records(
        conn,
        &RecordFilter {
            student_id: student_id.as_deref(),
            session: session.as_deref(),
            term: term.as_deref(),
        },
    )
    .map_err(HandlerErr::db_query)?;
    if let Some(cid) = class_id.as_deref() {
        records.retain(|r| r.class_id == cid);
    }
    Ok(json!({ "records": to_json(&records)? }))
}

fn scores_session_summary(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    require_student(conn, &student_id)?;
    let session = resolve_session(conn, params)?;
    let settings = load_settings(conn)?;

    let records = db::load_score_records(
        conn,
        &RecordFilter {
            student_id: Some(&student_id),
            session: Some(&session),
            term: None,
        },
    )
    .map_err(HandlerErr::db_query)?;
    let summary = session_summary(&student_id, &records, &session, &settings.terms);
    to_json(&summary)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "scores.upsert" => Some(with_conn(state, req, scores_upsert)),
        "scores.list" => Some(with_conn(state, req, scores_list)),
        "scores.sessionSummary" => Some(with_conn(state, req, scores_session_summary)),
        _ => None,
    }
}
