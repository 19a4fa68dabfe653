use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    get_opt_f64, get_opt_str, get_required_str, load_classes, load_settings, load_students,
    require_class, resolve_session, respond, to_json,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Value};
use termledger::db::{self, RecordFilter, SqlitePromotionStore};
use termledger::promotion::{self, Decision, Roster};
use termledger::settings::validate_threshold;
use termledger::EngineError;

/// Error for a proposal id that is not open: either it was committed (the
/// commit log remembers it) or it never existed / was discarded.
fn proposal_gone(conn: &Connection, proposal_id: &str) -> HandlerErr {
    match db::promotion_committed(conn, proposal_id) {
        Ok(true) => EngineError::AlreadyCommitted {
            proposal_id: proposal_id.to_string(),
        }
        .into(),
        Ok(false) => EngineError::not_found("proposal", proposal_id).into(),
        Err(e) => HandlerErr::db_query(e),
    }
}

fn promotion_propose(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = state.db.as_ref().ok_or_else(HandlerErr::no_workspace)?;
    let class_id = get_required_str(params, "classId")?;
    require_class(conn, &class_id)?;
    let session = resolve_session(conn, params)?;
    let settings = load_settings(conn)?;
    let threshold = match get_opt_f64(params, "threshold")? {
        Some(t) => validate_threshold(t)?,
        None => settings.require_threshold()?,
    };

    let classes = load_classes(conn)?;
    let students = load_students(conn, Some(&class_id))?;
    let records = db::load_score_records(
        conn,
        &RecordFilter {
            student_id: None,
            session: Some(&session),
            term: None,
        },
    )
    .map_err(HandlerErr::db_query)?;

    let roster = Roster {
        classes: &classes,
        students: &students,
        records: &records,
        terms: &settings.terms,
    };
    let proposal = promotion::propose(&roster, &class_id, &session, threshold)?;
    let out = to_json(&proposal)?;
    state.proposals.insert(proposal.id.clone(), proposal);
    Ok(out)
}

fn promotion_get(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = state.db.as_ref().ok_or_else(HandlerErr::no_workspace)?;
    let proposal_id = get_required_str(params, "proposalId")?;
    match state.proposals.get(&proposal_id) {
        Some(p) => to_json(p),
        None => Err(proposal_gone(conn, &proposal_id)),
    }
}

fn promotion_override(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = state.db.as_ref().ok_or_else(HandlerErr::no_workspace)?;
    let proposal_id = get_required_str(params, "proposalId")?;
    let student_id = get_required_str(params, "studentId")?;
    let decision = match get_opt_str(params, "decision") {
        None => None,
        Some(raw) => Some(Decision::parse(&raw).ok_or_else(|| {
            HandlerErr::bad_params("decision must be one of: promote, repeat")
                .with_details(json!({ "decision": raw }))
        })?),
    };

    let Some(proposal) = state.proposals.get_mut(&proposal_id) else {
        return Err(proposal_gone(conn, &proposal_id));
    };
    let applied = proposal.set_decision(&student_id, decision)?;
    tracing::info!(
        proposal_id = %proposal_id,
        student_id = %student_id,
        decision = ?applied,
        "promotion decision overridden"
    );
    to_json(&*proposal)
}

fn promotion_discard(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = state.db.as_ref().ok_or_else(HandlerErr::no_workspace)?;
    let proposal_id = get_required_str(params, "proposalId")?;
    if state.proposals.remove(&proposal_id).is_none() {
        return Err(proposal_gone(conn, &proposal_id));
    }
    tracing::info!(proposal_id = %proposal_id, "promotion proposal discarded");
    Ok(json!({ "proposalId": proposal_id, "discarded": true }))
}

fn promotion_commit(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = state.db.as_ref().ok_or_else(HandlerErr::no_workspace)?;
    let proposal_id = get_required_str(params, "proposalId")?;
    let Some(proposal) = state.proposals.get_mut(&proposal_id) else {
        return Err(proposal_gone(conn, &proposal_id));
    };

    let mut store = SqlitePromotionStore::new(conn);
    let result = promotion::commit(proposal, &mut store)?;
    state.proposals.remove(&proposal_id);
    to_json(&result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    type Handler = fn(&mut AppState, &Value) -> Result<Value, HandlerErr>;
    let handler: Handler = match req.method.as_str() {
        "promotion.propose" => promotion_propose,
        "promotion.get" => promotion_get,
        "promotion.override" => promotion_override,
        "promotion.discard" => promotion_discard,
        "promotion.commit" => promotion_commit,
        _ => return None,
    };
    Some(respond(req, handler(state, &req.params)))
}
