use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{respond, to_json};
use crate::ipc::types::{AppState, Request};
use serde_json::Value;
use termledger::model::amount_from_json;
use termledger::payroll::{self, PayItem};

fn parse_items(params: &Value, key: &str) -> Result<Vec<PayItem>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(v @ Value::Array(_)) => serde_json::from_value(v.clone())
            .map_err(|e| HandlerErr::bad_params(format!("{}: {}", key, e))),
        Some(_) => Err(HandlerErr::bad_params(format!("{} must be an array", key))),
    }
}

fn payroll_payslip(params: &Value) -> Result<Value, HandlerErr> {
    let base = amount_from_json(params.get("base"));
    let allowances = parse_items(params, "allowances")?;
    let deductions = parse_items(params, "deductions")?;
    to_json(&payroll::payslip(base, &allowances, &deductions))
}

// Pure computation; no workspace needed.
pub fn try_handle(_state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "payroll.payslip" => Some(respond(req, payroll_payslip(&req.params))),
        _ => None,
    }
}
