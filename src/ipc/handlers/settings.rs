use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{load_settings, to_json, with_conn};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Value};
use termledger::db;
use termledger::settings::merge_patch;

fn settings_get(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    let settings = load_settings(conn)?;
    Ok(json!({ "settings": to_json(&settings)? }))
}

fn settings_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let Some(patch) = params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("patch must be an object"));
    };
    let mut settings = load_settings(conn)?;
    merge_patch(&mut settings, patch)?;
    db::save_settings(conn, &settings).map_err(HandlerErr::db_update)?;
    tracing::info!(
        threshold = ?settings.promotion_threshold,
        session = %settings.current_session,
        term = %settings.current_term,
        "academic settings updated"
    );
    Ok(json!({ "settings": to_json(&settings)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "settings.get" => Some(with_conn(state, req, settings_get)),
        "settings.update" => Some(with_conn(state, req, settings_update)),
        _ => None,
    }
}
