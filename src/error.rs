use serde_json::json;

/// Typed failures surfaced by the engine. Pure computations never produce
/// these for business reasons (an empty class averages to 0, an absent
/// student has no position); only structurally invalid input does.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("validation failed: {message}")]
    Validation { message: String },

    #[error("class {class_id} is the final class in the sequence; nothing to promote into")]
    NoNextClass { class_id: String },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("promotion could not be applied atomically: {reason}")]
    PartialCommit {
        reason: String,
        student_id: Option<String>,
    },

    #[error("proposal {proposal_id} has already been committed")]
    AlreadyCommitted { proposal_id: String },
}

impl EngineError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn partial_commit(reason: impl Into<String>, student_id: Option<&str>) -> Self {
        Self::PartialCommit {
            reason: reason.into(),
            student_id: student_id.map(str::to_string),
        }
    }

    /// Stable code used in IPC error payloads.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation_failed",
            Self::NoNextClass { .. } => "no_next_class",
            Self::NotFound { .. } => "not_found",
            Self::PartialCommit { .. } => "partial_commit",
            Self::AlreadyCommitted { .. } => "already_committed",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::Validation { .. } => None,
            Self::NoNextClass { class_id } => Some(json!({ "classId": class_id })),
            Self::NotFound { entity, id } => Some(json!({ "entity": entity, "id": id })),
            Self::PartialCommit { student_id, .. } => {
                student_id.as_ref().map(|s| json!({ "studentId": s }))
            }
            Self::AlreadyCommitted { proposal_id } => Some(json!({ "proposalId": proposal_id })),
        }
    }
}
