use std::collections::HashMap;
use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;
use termledger::promotion::ProposalSet;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Default)]
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    /// Open promotion proposals, keyed by proposal id. Dropped on commit,
    /// discard, or when the workspace changes.
    pub proposals: HashMap<String, ProposalSet>,
}

impl AppState {
    pub fn close_workspace(&mut self) {
        self.db = None;
        self.proposals.clear();
    }
}
