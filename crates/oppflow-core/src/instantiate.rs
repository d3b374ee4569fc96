//! Materialize an opportunity's stage pipeline from its type's templates.

use crate::error::{OppflowError, Result};
use crate::ledger::StageDocument;
use crate::opportunity::Opportunity;
use crate::stage::StageInstance;
use crate::template::OpportunityType;
use crate::types::StageStatus;
use chrono::{DateTime, Utc};

/// Stages and template-declared documents, ready for one atomic insert.
#[derive(Debug, Clone)]
pub struct PipelinePlan {
    pub stages: Vec<StageInstance>,
    pub documents: Vec<StageDocument>,
}

/// Due dates chain: each stage starts when the previous one is due, and is due
/// `max_duration_days` later. The first stage starts immediately.
pub fn plan_pipeline(
    opportunity: &Opportunity,
    ty: &OpportunityType,
    start: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<PipelinePlan> {
    if !ty.is_active {
        return Err(OppflowError::Validation(format!(
            "opportunity type '{}' is inactive",
            ty.id
        )));
    }
    if ty.stages.is_empty() {
        return Err(OppflowError::Validation(format!(
            "opportunity type '{}' has no stage templates",
            ty.id
        )));
    }

    let start = start.unwrap_or(opportunity.created_at);
    let mut templates: Vec<_> = ty.stages.iter().collect();
    templates.sort_by_key(|t| t.order);

    let mut cursor = start;
    let mut stages = Vec::with_capacity(templates.len());
    let mut documents = Vec::new();
    for (idx, template) in templates.into_iter().enumerate() {
        let mut stage = StageInstance::from_template(opportunity.id, template, cursor, now);
        if idx == 0 {
            stage.status = StageStatus::InProgress;
            stage.started_at = Some(start);
        }
        cursor = stage.due_date;
        documents.extend(
            template
                .required_documents
                .iter()
                .map(|req| StageDocument::from_requirement(stage.id, req, now)),
        );
        stages.push(stage);
    }

    Ok(PipelinePlan { stages, documents })
}
