use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{get_required_str, load_classes, to_json, with_conn};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use termledger::db;

fn classes_list(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    let classes = load_classes(conn)?;

    let mut stmt = conn
        .prepare("SELECT class_id, COUNT(*) FROM students GROUP BY class_id")
        .map_err(HandlerErr::db_query)?;
    let counts: HashMap<String, i64> = stmt
        .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))
        .and_then(|it| it.collect::<Result<HashMap<_, _>, _>>())
        .map_err(HandlerErr::db_query)?;

    let rows: Vec<Value> = classes
        .iter()
        .enumerate()
        .map(|(i, c)| {
            json!({
                "id": c.id,
                "name": c.name,
                "sortOrder": c.sort_order,
                "studentCount": counts.get(&c.id).copied().unwrap_or(0),
                "isFinal": i + 1 == classes.len()
            })
        })
        .collect();
    Ok(json!({ "classes": rows }))
}

fn classes_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let sort_order = match params.get("sortOrder") {
        None | Some(Value::Null) => None,
        Some(v) => Some(
            v.as_i64()
                .ok_or_else(|| HandlerErr::bad_params("sortOrder must be an integer"))?,
        ),
    };
    let class = db::insert_class(conn, &name, sort_order).map_err(|e| {
        HandlerErr::db_insert(e).with_details(json!({ "table": "classes" }))
    })?;
    Ok(json!({ "classId": class.id, "class": to_json(&class)? }))
}

fn classes_reorder(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let Some(raw) = params.get("classIds").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("classIds must be an array"));
    };
    let ordered: Vec<String> = raw
        .iter()
        .map(|v| {
            v.as_str()
                .map(str::to_string)
                .ok_or_else(|| HandlerErr::bad_params("classIds must contain strings"))
        })
        .collect::<Result<_, _>>()?;

    let existing: HashSet<String> = load_classes(conn)?.into_iter().map(|c| c.id).collect();
    let given: HashSet<String> = ordered.iter().cloned().collect();
    if given.len() != ordered.len() || given != existing {
        return Err(HandlerErr::bad_params(
            "classIds must list every class exactly once",
        )
        .with_details(json!({ "expected": existing.len(), "got": ordered.len() })));
    }

    db::reorder_classes(conn, &ordered).map_err(HandlerErr::db_update)?;
    let classes = load_classes(conn)?;
    Ok(json!({ "classes": to_json(&classes)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "classes.list" => Some(with_conn(state, req, classes_list)),
        "classes.create" => Some(with_conn(state, req, classes_create)),
        "classes.reorder" => Some(with_conn(state, req, classes_reorder)),
        _ => None,
    }
}
