use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    get_opt_str, get_required_str, load_students, require_class, require_student,
    resolve_period, to_json, with_conn,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Value};
use termledger::db;
use termledger::ledger;
use termledger::model::{amount_from_json, FeeStructure, Payment};

fn fees_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let class_id = get_opt_str(params, "classId");
    if let Some(cid) = class_id.as_deref() {
        require_class(conn, cid)?;
    }
    let (session, term) = resolve_period(conn, params)?;
    let is_optional = match params.get("isOptional") {
        None | Some(Value::Null) => false,
        Some(v) => v
            .as_bool()
            .ok_or_else(|| HandlerErr::bad_params("isOptional must be a boolean"))?,
    };

    let fee = FeeStructure {
        id: db::new_id(),
        name,
        amount: amount_from_json(params.get("amount")),
        class_id,
        session,
        term,
        is_optional,
    };
    db::insert_fee(conn, &fee)
        .map_err(|e| HandlerErr::db_insert(e).with_details(json!({ "table": "fee_structures" })))?;
    Ok(json!({ "feeId": fee.id, "fee": to_json(&fee)? }))
}

fn fees_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let (session, term) = resolve_period(conn, params)?;
    let fees = db::load_fees(conn, &session, &term).map_err(HandlerErr::db_query)?;
    Ok(json!({ "session": session, "term": term, "fees": to_json(&fees)? }))
}

fn payments_record(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    require_student(conn, &student_id)?;
    let (session, term) = resolve_period(conn, params)?;

    let payment = Payment {
        id: db::new_id(),
        student_id,
        amount: amount_from_json(params.get("amount")),
        session,
        term,
        paid_at: get_opt_str(params, "paidAt").or_else(|| Some(db::now_rfc3339())),
        reference: get_opt_str(params, "reference"),
    };
    db::insert_payment(conn, &payment)
        .map_err(|e| HandlerErr::db_insert(e).with_details(json!({ "table": "payments" })))?;
    tracing::info!(
        student_id = %payment.student_id,
        amount = payment.amount,
        session = %payment.session,
        term = %payment.term,
        "payment recorded"
    );
    Ok(json!({ "paymentId": payment.id, "payment": to_json(&payment)? }))
}

fn payments_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_opt_str(params, "studentId");
    let (session, term) = resolve_period(conn, params)?;
    let payments = db::load_payments(conn, student_id.as_deref(), &session, &term)
        .map_err(HandlerErr::db_query)?;
    Ok(json!({ "session": session, "term": term, "payments": to_json(&payments)? }))
}

fn ledger_student(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let student = require_student(conn, &student_id)?;
    let (session, term) = resolve_period(conn, params)?;

    let fees = db::load_fees(conn, &session, &term).map_err(HandlerErr::db_query)?;
    let payments = db::load_payments(conn, Some(&student_id), &session, &term)
        .map_err(HandlerErr::db_query)?;
    to_json(&ledger::ledger(&student, &fees, &payments, &session, &term))
}

fn ledger_class(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    require_class(conn, &class_id)?;
    let (session, term) = resolve_period(conn, params)?;

    let students = load_students(conn, Some(&class_id))?;
    let fees = db::load_fees(conn, &session, &term).map_err(HandlerErr::db_query)?;
    let payments = db::load_payments(conn, None, &session, &term).map_err(HandlerErr::db_query)?;
    to_json(&ledger::class_ledger(
        &class_id, &students, &fees, &payments, &session, &term,
    ))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "fees.create" => Some(with_conn(state, req, fees_create)),
        "fees.list" => Some(with_conn(state, req, fees_list)),
        "payments.record" => Some(with_conn(state, req, payments_record)),
        "payments.list" => Some(with_conn(state, req, payments_list)),
        "ledger.student" => Some(with_conn(state, req, ledger_student)),
        "ledger.class" => Some(with_conn(state, req, ledger_class)),
        _ => None,
    }
}
