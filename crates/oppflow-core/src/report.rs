//! Read models built on demand: annotated pipeline, counters, timeline.

use crate::engine::Engine;
use crate::error::Result;
use crate::ledger::{self, MissingDeliverable};
use crate::risk::{self, RiskAssessment};
use crate::stage::StageInstance;
use crate::types::{
    ActionOutcome, ActionType, PriorityLevel, RiskLevel, StageStatus, ValidationStatus,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Pipeline view
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct DeliverableSummary {
    pub documents_required: usize,
    pub documents_satisfied: usize,
    pub actions_logged: usize,
    pub missing: Vec<MissingDeliverable>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineStage {
    #[serde(flatten)]
    pub stage: StageInstance,
    #[serde(flatten)]
    pub risk: RiskAssessment,
    pub is_overdue: bool,
    pub deliverables: DeliverableSummary,
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineStats {
    pub opportunity_id: Uuid,
    pub total_stages: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub skipped: usize,
    pub blocked: usize,
    pub awaiting_validation: usize,
    pub critical_risk: usize,
    pub high_risk: usize,
    pub urgent_priority: usize,
    pub overdue: usize,
    /// Finished (completed or skipped) stages as a share of all stages.
    pub completion_percent: u8,
}

// ---------------------------------------------------------------------------
// Timeline
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TimelineEvent {
    Action {
        action_type: ActionType,
        title: String,
        outcome: ActionOutcome,
        #[serde(skip_serializing_if = "Option::is_none")]
        performed_by: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        notes: Option<String>,
    },
    DocumentAdded {
        document_id: Uuid,
        name: String,
    },
    DocumentProvided {
        document_id: Uuid,
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        by: Option<String>,
    },
    DocumentReviewed {
        document_id: Uuid,
        name: String,
        status: ValidationStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        by: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineEntry {
    pub at: DateTime<Utc>,
    pub stage_instance_id: Uuid,
    pub stage_name: String,
    #[serde(flatten)]
    pub event: TimelineEvent,
}

impl Engine {
    /// Stages in order, each with a fresh risk assessment and deliverable summary.
    pub fn list_pipeline(&self, opportunity_id: Uuid) -> Result<Vec<PipelineStage>> {
        let opp = self.store().opportunity(opportunity_id)?;
        let now = self.now();
        let mut out = Vec::new();
        for stage in self.store().list_stages(opportunity_id)? {
            let template = self.template_for(&opp, &stage)?;
            let actions = self.store().list_actions(stage.id)?;
            let documents = self.store().list_documents(stage.id)?;
            let required: Vec<_> = documents.iter().filter(|d| d.is_required).collect();
            let deliverables = DeliverableSummary {
                documents_required: required.len(),
                documents_satisfied: required.iter().filter(|d| d.is_satisfied()).count(),
                actions_logged: actions.iter().filter(|a| !a.is_system()).count(),
                missing: ledger::missing_deliverables(template, &actions, &documents),
            };
            out.push(PipelineStage {
                risk: risk::evaluate(&stage, now, self.thresholds()),
                is_overdue: stage.is_overdue(now),
                stage,
                deliverables,
            });
        }
        Ok(out)
    }

    pub fn pipeline_stats(&self, opportunity_id: Uuid) -> Result<PipelineStats> {
        self.store().opportunity(opportunity_id)?;
        let now = self.now();
        let stages = self.store().list_stages(opportunity_id)?;
        let mut stats = PipelineStats {
            opportunity_id,
            total_stages: stages.len(),
            ..PipelineStats::default()
        };
        for stage in &stages {
            match stage.status {
                StageStatus::Pending => stats.pending += 1,
                StageStatus::InProgress => stats.in_progress += 1,
                StageStatus::Completed => stats.completed += 1,
                StageStatus::Skipped => stats.skipped += 1,
                StageStatus::Blocked => stats.blocked += 1,
            }
            if stage.pending_validation {
                stats.awaiting_validation += 1;
            }
            let assessment = risk::evaluate(stage, now, self.thresholds());
            match assessment.risk_level {
                RiskLevel::Critical => stats.critical_risk += 1,
                RiskLevel::High => stats.high_risk += 1,
                RiskLevel::Medium | RiskLevel::Low => {}
            }
            if assessment.priority_level == PriorityLevel::Urgent {
                stats.urgent_priority += 1;
            }
            if stage.is_overdue(now) {
                stats.overdue += 1;
            }
        }
        if !stages.is_empty() {
            let finished = stats.completed + stats.skipped;
            stats.completion_percent = (finished * 100 / stages.len()) as u8;
        }
        Ok(stats)
    }

    /// Actions and document events of every stage, oldest first.
    pub fn history(&self, opportunity_id: Uuid) -> Result<Vec<TimelineEntry>> {
        self.store().opportunity(opportunity_id)?;
        let mut entries = Vec::new();
        for stage in self.store().list_stages(opportunity_id)? {
            let entry = |at: DateTime<Utc>, event: TimelineEvent| TimelineEntry {
                at,
                stage_instance_id: stage.id,
                stage_name: stage.name.clone(),
                event,
            };

            for a in self.store().list_actions(stage.id)? {
                entries.push(entry(
                    a.performed_at,
                    TimelineEvent::Action {
                        action_type: a.action_type,
                        title: a.title,
                        outcome: a.outcome,
                        performed_by: a.performed_by,
                        notes: a.notes,
                    },
                ));
            }

            for d in self.store().list_documents(stage.id)? {
                if d.source == crate::types::DocumentSource::AdHoc {
                    entries.push(entry(
                        d.created_at,
                        TimelineEvent::DocumentAdded {
                            document_id: d.id,
                            name: d.name.clone(),
                        },
                    ));
                }
                if let Some(at) = d.provided_at {
                    entries.push(entry(
                        at,
                        TimelineEvent::DocumentProvided {
                            document_id: d.id,
                            name: d.name.clone(),
                            by: d.provided_by.clone(),
                        },
                    ));
                }
                if let Some(at) = d.validated_at {
                    entries.push(entry(
                        at,
                        TimelineEvent::DocumentReviewed {
                            document_id: d.id,
                            name: d.name.clone(),
                            status: d.validation_status,
                            by: d.validated_by.clone(),
                            reason: d.rejection_reason.clone(),
                        },
                    ));
                }
            }
        }
        entries.sort_by_key(|e| e.at);
        Ok(entries)
    }
}
