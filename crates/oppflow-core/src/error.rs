use thiserror::Error;

#[derive(Debug, Error)]
pub enum OppflowError {
    #[error("not initialized: run 'oppflow init'")]
    NotInitialized,

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("invalid configuration: {0}")]
    Validation(String),

    #[error("cannot start stage '{stage}': earlier stage(s) not finished: {}", blocking.join(", "))]
    Sequence { stage: String, blocking: Vec<String> },

    #[error("stage '{0}' cannot be skipped")]
    NotSkippable(String),

    #[error("stage '{stage}' has incomplete deliverables: {}", missing.join("; "))]
    IncompleteDeliverables { stage: String, missing: Vec<String> },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid state: {0}")]
    State(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl OppflowError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        OppflowError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Business-rule violations the caller can fix by supplying what is missing.
    pub fn is_rule_violation(&self) -> bool {
        matches!(
            self,
            OppflowError::Sequence { .. }
                | OppflowError::NotSkippable(_)
                | OppflowError::IncompleteDeliverables { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, OppflowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incomplete_deliverables_lists_every_item() {
        let err = OppflowError::IncompleteDeliverables {
            stage: "Qualification".into(),
            missing: vec![
                "document 'Engagement Letter' not provided".into(),
                "action MEETING has no successful record".into(),
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("Engagement Letter"));
        assert!(msg.contains("MEETING"));
        assert!(err.is_rule_violation());
    }

    #[test]
    fn not_found_names_kind() {
        let err = OppflowError::not_found("opportunity type", "audit");
        assert_eq!(err.to_string(), "opportunity type not found: audit");
        assert!(!err.is_rule_violation());
    }
}
