use crate::error::{OppflowError, Result};
use crate::ledger::{missing_deliverables, StageAction, StageDocument, StatusChange};
use crate::template::StageTemplate;
use crate::types::StageStatus;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// StageInstance
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageInstance {
    pub id: Uuid,
    pub opportunity_id: Uuid,
    pub template_id: String,
    pub template_revision: u32,
    pub name: String,
    pub order: u32,
    pub status: StageStatus,
    /// Planned start, derived from the cumulative template durations.
    pub start_date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    pub due_date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default)]
    pub pending_validation: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validated_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validated_at: Option<DateTime<Utc>>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StageInstance {
    /// A PENDING instance whose due date is `start_date + max_duration_days`.
    pub fn from_template(
        opportunity_id: Uuid,
        template: &StageTemplate,
        start_date: DateTime<Utc>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            opportunity_id,
            template_id: template.id.clone(),
            template_revision: template.revision,
            name: template.name.clone(),
            order: template.order,
            status: StageStatus::Pending,
            start_date,
            started_at: None,
            due_date: start_date + Duration::days(i64::from(template.max_duration_days)),
            completed_date: None,
            notes: None,
            pending_validation: false,
            validated_by: None,
            validated_at: None,
            version: 1,
            created_at,
            updated_at: created_at,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        !self.is_finished() && self.due_date < now
    }
}

// ---------------------------------------------------------------------------
// Edges
// ---------------------------------------------------------------------------

/// Permitted status edges. Same-state moves are never permitted.
pub fn is_allowed_edge(from: StageStatus, to: StageStatus) -> bool {
    use StageStatus::*;
    matches!(
        (from, to),
        (Pending, InProgress)
            | (Pending, Skipped)
            | (Pending, Blocked)
            | (InProgress, Completed)
            | (InProgress, Skipped)
            | (InProgress, Blocked)
            | (Blocked, InProgress)
    )
}

// ---------------------------------------------------------------------------
// Transition checks
// ---------------------------------------------------------------------------

/// Everything the rules need, read fresh by the caller.
pub struct TransitionContext<'a> {
    pub template: &'a StageTemplate,
    /// Every stage of the same opportunity, including the one moving.
    pub siblings: &'a [StageInstance],
    pub actions: &'a [StageAction],
    pub documents: &'a [StageDocument],
}

/// What a permitted request turns into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionPlan {
    Move(StatusChange),
    /// Completion requested on a stage that needs a countersign nobody gave.
    AwaitValidation,
}

pub fn check_transition(
    stage: &StageInstance,
    target: StageStatus,
    validated_by: Option<&str>,
    ctx: &TransitionContext<'_>,
) -> Result<TransitionPlan> {
    let from = stage.status;
    if !is_allowed_edge(from, target) {
        return Err(OppflowError::State(format!(
            "stage '{}' cannot move from {from} to {target}",
            stage.name
        )));
    }

    match target {
        StageStatus::InProgress => {
            let blocking: Vec<String> = ctx
                .siblings
                .iter()
                .filter(|s| s.order < stage.order && !s.is_finished())
                .map(|s| format!("{} ({})", s.name, s.status))
                .collect();
            if !blocking.is_empty() {
                return Err(OppflowError::Sequence {
                    stage: stage.name.clone(),
                    blocking,
                });
            }
        }
        StageStatus::Completed => {
            let missing = missing_deliverables(ctx.template, ctx.actions, ctx.documents);
            if !missing.is_empty() {
                return Err(OppflowError::IncompleteDeliverables {
                    stage: stage.name.clone(),
                    missing: missing.iter().map(ToString::to_string).collect(),
                });
            }
            let countersigned = validated_by.is_some_and(|v| !v.trim().is_empty());
            if ctx.template.validation_required && !countersigned {
                return Ok(TransitionPlan::AwaitValidation);
            }
        }
        StageStatus::Skipped => {
            if !ctx.template.can_skip {
                return Err(OppflowError::NotSkippable(stage.name.clone()));
            }
        }
        StageStatus::Blocked | StageStatus::Pending => {}
    }

    Ok(TransitionPlan::Move(StatusChange { from, to: target }))
}

/// Mutate `stage` according to a checked plan and build the audit record.
pub fn apply_transition(
    stage: &mut StageInstance,
    plan: TransitionPlan,
    actor: &str,
    validated_by: Option<&str>,
    notes: Option<String>,
    at: DateTime<Utc>,
) -> StageAction {
    let change = match plan {
        TransitionPlan::AwaitValidation => {
            stage.pending_validation = true;
            StatusChange {
                from: stage.status,
                to: stage.status,
            }
        }
        TransitionPlan::Move(change) => {
            stage.status = change.to;
            match change.to {
                StageStatus::InProgress => {
                    stage.started_at.get_or_insert(at);
                }
                StageStatus::Completed => {
                    stage.completed_date = Some(at);
                    stage.pending_validation = false;
                    if let Some(v) = validated_by {
                        stage.validated_by = Some(v.to_string());
                        stage.validated_at = Some(at);
                    }
                }
                StageStatus::Skipped => {
                    stage.pending_validation = false;
                }
                StageStatus::Blocked | StageStatus::Pending => {}
            }
            change
        }
    };

    let record_notes = match plan {
        TransitionPlan::AwaitValidation => Some(match &notes {
            Some(n) => format!("awaiting validation: {n}"),
            None => "awaiting validation".to_string(),
        }),
        TransitionPlan::Move(_) => notes.clone(),
    };
    if notes.is_some() {
        stage.notes = notes;
    }
    stage.version += 1;
    stage.updated_at = at;

    StageAction::transition(stage.id, change, Some(actor), at, record_notes)
}

/// Every mandatory stage finished; optional stages may remain open.
pub fn is_pipeline_complete(stages: &[StageInstance], templates: &[&StageTemplate]) -> bool {
    !stages.is_empty()
        && stages.iter().all(|s| {
            let mandatory = templates
                .iter()
                .find(|t| t.id == s.template_id)
                .map(|t| t.is_mandatory)
                .unwrap_or(true);
            !mandatory || s.is_finished()
        })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
