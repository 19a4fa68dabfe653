use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    get_opt_str, get_required_str, load_students, require_class, require_student,
    resolve_period, to_json, with_conn,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use termledger::db::{self, NewStudent};
use termledger::model::{amount_from_json, Discount, DiscountCategory};
use termledger::EngineError;

fn students_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = get_opt_str(params, "classId");
    if let Some(cid) = class_id.as_deref() {
        require_class(conn, cid)?;
    }
    let students = load_students(conn, class_id.as_deref())?;
    let rows: Vec<Value> = students
        .iter()
        .map(|s| -> Result<Value, HandlerErr> {
            let mut v = to_json(s)?;
            v["displayName"] = json!(s.display_name());
            Ok(v)
        })
        .collect::<Result<_, _>>()?;
    Ok(json!({ "students": rows }))
}

fn students_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    require_class(conn, &class_id)?;
    let first_name = get_opt_str(params, "firstName").unwrap_or_default();
    let last_name = get_opt_str(params, "lastName").unwrap_or_default();
    if first_name.is_empty() && last_name.is_empty() {
        return Err(HandlerErr::bad_params("firstName or lastName is required"));
    }
    let admission_no = get_opt_str(params, "admissionNo");

    let student = db::insert_student(
        conn,
        &NewStudent {
            class_id: &class_id,
            first_name: &first_name,
            last_name: &last_name,
            admission_no: admission_no.as_deref(),
        },
    )
    .map_err(|e| HandlerErr::db_insert(e).with_details(json!({ "table": "students" })))?;
    Ok(json!({ "studentId": student.id, "student": to_json(&student)? }))
}

fn students_assign_fees(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    require_student(conn, &student_id)?;
    let Some(raw) = params.get("feeIds").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("feeIds must be an array"));
    };

    let mut fee_ids = BTreeSet::new();
    for v in raw {
        let Some(id) = v.as_str() else {
            return Err(HandlerErr::bad_params("feeIds must contain strings"));
        };
        if !db::fee_exists(conn, id).map_err(HandlerErr::db_query)? {
            return Err(EngineError::not_found("fee", id).into());
        }
        fee_ids.insert(id.to_string());
    }

    db::set_assigned_fees(conn, &student_id, &fee_ids).map_err(HandlerErr::db_update)?;
    Ok(json!({ "studentId": student_id, "assignedFees": fee_ids }))
}

fn discounts_add(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    require_student(conn, &student_id)?;
    let category_raw = get_required_str(params, "category")?;
    let Some(category) = DiscountCategory::parse(&category_raw) else {
        return Err(HandlerErr::bad_params("category must be one of: discount, scholarship")
            .with_details(json!({ "category": category_raw })));
    };
    let (session, term) = resolve_period(conn, params)?;

    let discount = Discount {
        id: db::new_id(),
        amount: amount_from_json(params.get("amount")),
        reason: get_opt_str(params, "reason").unwrap_or_default(),
        category,
        session,
        term,
    };
    db::insert_discount(conn, &student_id, &discount)
        .map_err(|e| HandlerErr::db_insert(e).with_details(json!({ "table": "discounts" })))?;
    Ok(json!({ "discountId": discount.id, "discount": to_json(&discount)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "students.list" => Some(with_conn(state, req, students_list)),
        "students.create" => Some(with_conn(state, req, students_create)),
        "students.assignFees" => Some(with_conn(state, req, students_assign_fees)),
        "discounts.add" => Some(with_conn(state, req, discounts_add)),
        _ => None,
    }
}
