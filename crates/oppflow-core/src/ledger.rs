//! Actions and documents recorded against a stage instance.
//!
//! Actions are immutable once appended. Documents are patched in place
//! (provided, approved, rejected) under optimistic versioning.

use crate::error::{OppflowError, Result};
use crate::template::{RequiredDocument, StageTemplate};
use crate::types::{ActionOutcome, ActionType, DocumentSource, StageStatus, ValidationStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// StageAction
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub from: StageStatus,
    pub to: StageStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageAction {
    pub id: Uuid,
    pub stage_instance_id: Uuid,
    pub action_type: ActionType,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub performed_at: DateTime<Utc>,
    /// `None` means the engine wrote it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub performed_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_minutes: Option<u32>,
    pub outcome: ActionOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_change: Option<StatusChange>,
}

impl StageAction {
    /// Implicit record written atomically with every status change.
    pub fn transition(
        stage_instance_id: Uuid,
        change: StatusChange,
        actor: Option<&str>,
        at: DateTime<Utc>,
        notes: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            stage_instance_id,
            action_type: ActionType::StageTransition,
            title: format!("{} -> {}", change.from, change.to),
            description: None,
            performed_at: at,
            performed_by: actor.map(str::to_string),
            duration_minutes: None,
            outcome: ActionOutcome::Success,
            notes,
            status_change: Some(change),
        }
    }

    /// Engine-authored record with no actor.
    pub fn system(
        stage_instance_id: Uuid,
        action_type: ActionType,
        title: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            stage_instance_id,
            action_type,
            title: title.into(),
            description: None,
            performed_at: at,
            performed_by: None,
            duration_minutes: None,
            outcome: ActionOutcome::Success,
            notes: None,
            status_change: None,
        }
    }

    pub fn is_system(&self) -> bool {
        self.performed_by.is_none() || self.action_type.is_system()
    }
}

/// Caller-supplied fields of a new action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAction {
    pub action_type: ActionType,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub performed_at: Option<DateTime<Utc>>,
    pub performed_by: String,
    #[serde(default)]
    pub duration_minutes: Option<u32>,
    #[serde(default)]
    pub outcome: ActionOutcome,
    #[serde(default)]
    pub notes: Option<String>,
}

impl NewAction {
    pub fn new(
        action_type: ActionType,
        title: impl Into<String>,
        performed_by: impl Into<String>,
    ) -> Self {
        Self {
            action_type,
            title: title.into(),
            description: None,
            performed_at: None,
            performed_by: performed_by.into(),
            duration_minutes: None,
            outcome: ActionOutcome::Success,
            notes: None,
        }
    }

    pub fn with_outcome(mut self, outcome: ActionOutcome) -> Self {
        self.outcome = outcome;
        self
    }

    pub fn at(mut self, performed_at: DateTime<Utc>) -> Self {
        self.performed_at = Some(performed_at);
        self
    }

    pub(crate) fn into_action(self, stage_instance_id: Uuid, now: DateTime<Utc>) -> Result<StageAction> {
        if self.action_type.is_system() {
            return Err(OppflowError::InvalidInput(format!(
                "{} actions are recorded by the engine",
                self.action_type
            )));
        }
        if self.title.trim().is_empty() {
            return Err(OppflowError::InvalidInput("action title is empty".into()));
        }
        if self.performed_by.trim().is_empty() {
            return Err(OppflowError::InvalidInput("performed_by is empty".into()));
        }
        Ok(StageAction {
            id: Uuid::new_v4(),
            stage_instance_id,
            action_type: self.action_type,
            title: self.title,
            description: self.description,
            performed_at: self.performed_at.unwrap_or(now),
            performed_by: Some(self.performed_by),
            duration_minutes: self.duration_minutes,
            outcome: self.outcome,
            notes: self.notes,
            status_change: None,
        })
    }
}

// ---------------------------------------------------------------------------
// StageDocument
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageDocument {
    pub id: Uuid,
    pub stage_instance_id: Uuid,
    pub name: String,
    pub document_type: String,
    pub is_required: bool,
    pub source: DocumentSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_order: Option<u32>,
    pub is_provided: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provided_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provided_by: Option<String>,
    pub validation_status: ValidationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validated_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
}

impl StageDocument {
    pub fn from_requirement(
        stage_instance_id: Uuid,
        requirement: &RequiredDocument,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            stage_instance_id,
            name: requirement.name.clone(),
            document_type: requirement.effective_type().to_string(),
            is_required: requirement.is_mandatory,
            source: DocumentSource::Template,
            validation_order: requirement.validation_order,
            is_provided: false,
            provided_at: None,
            provided_by: None,
            validation_status: ValidationStatus::Pending,
            validated_by: None,
            validated_at: None,
            rejection_reason: None,
            version: 1,
            created_at: now,
        }
    }

    /// Counts toward completion: provided and not rejected.
    pub fn is_satisfied(&self) -> bool {
        self.is_provided && self.validation_status != ValidationStatus::Rejected
    }

    /// Re-providing a rejected document puts it back in the review queue.
    pub fn mark_provided(&mut self, actor: &str, at: DateTime<Utc>) {
        self.is_provided = true;
        self.provided_at = Some(at);
        self.provided_by = Some(actor.to_string());
        if self.validation_status == ValidationStatus::Rejected {
            self.validation_status = ValidationStatus::Pending;
            self.validated_by = None;
            self.validated_at = None;
            self.rejection_reason = None;
        }
    }

    pub fn record_verdict(
        &mut self,
        actor: &str,
        verdict: ValidationStatus,
        reason: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        if verdict == ValidationStatus::Pending {
            return Err(OppflowError::InvalidInput(
                "verdict must be APPROVED or REJECTED".into(),
            ));
        }
        if !self.is_provided {
            return Err(OppflowError::State(format!(
                "document '{}' has not been provided",
                self.name
            )));
        }
        self.validation_status = verdict;
        self.validated_by = Some(actor.to_string());
        self.validated_at = Some(at);
        self.rejection_reason = match verdict {
            ValidationStatus::Rejected => reason,
            _ => None,
        };
        Ok(())
    }
}

/// Caller-supplied fields of an ad-hoc document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDocument {
    pub name: String,
    #[serde(default)]
    pub document_type: Option<String>,
    #[serde(default)]
    pub is_required: bool,
}

impl NewDocument {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            document_type: None,
            is_required: false,
        }
    }

    pub(crate) fn into_document(
        self,
        stage_instance_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<StageDocument> {
        if self.name.trim().is_empty() {
            return Err(OppflowError::InvalidInput("document name is empty".into()));
        }
        let document_type = self.document_type.unwrap_or_else(|| self.name.clone());
        Ok(StageDocument {
            id: Uuid::new_v4(),
            stage_instance_id,
            name: self.name,
            document_type,
            is_required: self.is_required,
            source: DocumentSource::AdHoc,
            validation_order: None,
            is_provided: false,
            provided_at: None,
            provided_by: None,
            validation_status: ValidationStatus::Pending,
            validated_by: None,
            validated_at: None,
            rejection_reason: None,
            version: 1,
            created_at: now,
        })
    }
}

// ---------------------------------------------------------------------------
// Deliverable checks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MissingDeliverable {
    DocumentNotProvided { name: String },
    DocumentRejected { name: String, reason: Option<String> },
    Action { action_type: ActionType },
}

impl fmt::Display for MissingDeliverable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MissingDeliverable::DocumentNotProvided { name } => {
                write!(f, "document '{name}' not provided")
            }
            MissingDeliverable::DocumentRejected { name, reason: Some(r) } => {
                write!(f, "document '{name}' rejected: {r}")
            }
            MissingDeliverable::DocumentRejected { name, reason: None } => {
                write!(f, "document '{name}' rejected")
            }
            MissingDeliverable::Action { action_type } => {
                write!(f, "action {action_type} has no successful record")
            }
        }
    }
}

/// Everything still standing between a stage and completion. Documents come
/// first in ledger order, then action types in template order.
pub fn missing_deliverables(
    template: &StageTemplate,
    actions: &[StageAction],
    documents: &[StageDocument],
) -> Vec<MissingDeliverable> {
    let mut missing = Vec::new();

    for doc in documents.iter().filter(|d| d.is_required) {
        if !doc.is_provided {
            missing.push(MissingDeliverable::DocumentNotProvided {
                name: doc.name.clone(),
            });
        } else if doc.validation_status == ValidationStatus::Rejected {
            missing.push(MissingDeliverable::DocumentRejected {
                name: doc.name.clone(),
                reason: doc.rejection_reason.clone(),
            });
        }
    }

    for required in template.mandatory_action_types() {
        let done = actions
            .iter()
            .any(|a| &a.action_type == required && a.outcome == ActionOutcome::Success);
        if !done {
            missing.push(MissingDeliverable::Action {
                action_type: required.clone(),
            });
        }
    }

    missing
}

pub fn is_stage_complete(
    template: &StageTemplate,
    actions: &[StageAction],
    documents: &[StageDocument],
) -> bool {
    missing_deliverables(template, actions, documents).is_empty()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
