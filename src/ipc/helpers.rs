use rusqlite::Connection;
use serde_json::Value;
use termledger::db;
use termledger::model::{Class, Student};
use termledger::settings::Settings;
use termledger::EngineError;

use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::types::{AppState, Request};

/// Runs `f` against the open workspace and wraps the outcome as a response.
pub fn with_conn<F>(state: &AppState, req: &Request, f: F) -> Value
where
    F: FnOnce(&Connection, &Value) -> Result<Value, HandlerErr>,
{
    let result = match state.db.as_ref() {
        Some(conn) => f(conn, &req.params),
        None => Err(HandlerErr::no_workspace()),
    };
    respond(req, result)
}

pub fn respond(req: &Request, result: Result<Value, HandlerErr>) -> Value {
    match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

pub fn get_required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    match params.get(key).and_then(|v| v.as_str()) {
        Some(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Some(_) => Err(HandlerErr::bad_params(format!("{} must not be empty", key))),
        None => Err(HandlerErr::bad_params(format!("missing {}", key))),
    }
}

pub fn get_opt_str(params: &Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

pub fn get_opt_f64(params: &Value, key: &str) -> Result<Option<f64>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_f64()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a number", key))),
    }
}

pub fn load_settings(conn: &Connection) -> Result<Settings, HandlerErr> {
    db::load_settings(conn).map_err(HandlerErr::db_query)
}

fn period_field(explicit: Option<String>, current: &str, name: &str) -> Result<String, HandlerErr> {
    if let Some(v) = explicit {
        return Ok(v);
    }
    if current.trim().is_empty() {
        return Err(EngineError::validation(format!(
            "{} not given and no current {} is configured",
            name, name
        ))
        .into());
    }
    Ok(current.to_string())
}

/// `session` from params, falling back to the configured current session.
pub fn resolve_session(conn: &Connection, params: &Value) -> Result<String, HandlerErr> {
    if let Some(s) = get_opt_str(params, "session") {
        return Ok(s);
    }
    let settings = load_settings(conn)?;
    period_field(None, &settings.current_session, "session")
}

/// (`session`, `term`) from params, each falling back to the configured
/// current period.
pub fn resolve_period(conn: &Connection, params: &Value) -> Result<(String, String), HandlerErr> {
    let session = get_opt_str(params, "session");
    let term = get_opt_str(params, "term");
    if let (Some(s), Some(t)) = (&session, &term) {
        return Ok((s.clone(), t.clone()));
    }
    let settings = load_settings(conn)?;
    Ok((
        period_field(session, &settings.current_session, "session")?,
        period_field(term, &settings.current_term, "term")?,
    ))
}

pub fn require_class(conn: &Connection, class_id: &str) -> Result<(), HandlerErr> {
    if db::class_exists(conn, class_id).map_err(HandlerErr::db_query)? {
        Ok(())
    } else {
        Err(EngineError::not_found("class", class_id).into())
    }
}

pub fn require_student(conn: &Connection, student_id: &str) -> Result<Student, HandlerErr> {
    db::load_student(conn, student_id)
        .map_err(HandlerErr::db_query)?
        .ok_or_else(|| EngineError::not_found("student", student_id).into())
}

pub fn load_classes(conn: &Connection) -> Result<Vec<Class>, HandlerErr> {
    db::load_classes(conn).map_err(HandlerErr::db_query)
}

pub fn load_students(
    conn: &Connection,
    class_id: Option<&str>,
) -> Result<Vec<Student>, HandlerErr> {
    db::load_students(conn, class_id).map_err(HandlerErr::db_query)
}

pub fn to_json<T: serde::Serialize>(v: &T) -> Result<Value, HandlerErr> {
    serde_json::to_value(v).map_err(|e| HandlerErr::new("serialize_failed", e.to_string()))
}
