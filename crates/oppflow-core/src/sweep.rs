//! Periodic risk sweep.
//!
//! The sweep only appends actions and overwrites cached snapshots, so it can
//! run alongside transitions without ever producing a version conflict.

use crate::engine::Engine;
use crate::error::Result;
use crate::event::EventKind;
use crate::ledger::StageAction;
use crate::risk::{self, RiskSnapshot};
use crate::stage::StageInstance;
use crate::types::{ActionType, PriorityLevel, RiskLevel};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepReport {
    pub evaluated_at: DateTime<Utc>,
    pub opportunities: usize,
    pub stages_evaluated: usize,
    /// Stages that crossed into CRITICAL risk during this sweep.
    pub critical_crossings: Vec<Uuid>,
    /// Stages that crossed into URGENT priority during this sweep.
    pub urgent_crossings: Vec<Uuid>,
    /// Stages that received their OVERDUE_ALERT during this sweep.
    pub overdue_alerts: Vec<Uuid>,
    /// Opportunities whose finished pipeline was still open and got closed as WON.
    #[serde(default)]
    pub pipelines_closed: Vec<Uuid>,
}

impl SweepReport {
    fn new(evaluated_at: DateTime<Utc>) -> Self {
        Self {
            evaluated_at,
            opportunities: 0,
            stages_evaluated: 0,
            critical_crossings: Vec::new(),
            urgent_crossings: Vec::new(),
            overdue_alerts: Vec::new(),
            pipelines_closed: Vec::new(),
        }
    }

    pub fn is_quiet(&self) -> bool {
        self.critical_crossings.is_empty()
            && self.urgent_crossings.is_empty()
            && self.overdue_alerts.is_empty()
            && self.pipelines_closed.is_empty()
    }
}

impl Engine {
    /// Re-evaluate every unfinished stage of every open opportunity.
    pub fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let mut report = SweepReport::new(now);
        let thresholds = *self.thresholds();

        for opp in self.store().list_opportunities()? {
            if !opp.is_open() {
                continue;
            }
            report.opportunities += 1;

            let stages = self.store().list_stages(opp.id)?;
            let last_finished = stages
                .iter()
                .filter(|s| s.is_finished())
                .max_by_key(|s| s.order);
            if let Some(last) = last_finished {
                if self.pipeline_complete(&opp, &stages)?
                    && self.finish_pipeline(opp.id, last, now)?
                {
                    report.pipelines_closed.push(opp.id);
                    continue;
                }
            }

            for stage in stages {
                if stage.is_finished() {
                    continue;
                }
                report.stages_evaluated += 1;

                let assessment = risk::evaluate(&stage, now, &thresholds);
                let previous = self
                    .store()
                    .risk_snapshot(stage.id)?
                    .map(|s| s.assessment);
                let was_critical =
                    previous.is_some_and(|p| p.risk_level == RiskLevel::Critical);
                let was_urgent =
                    previous.is_some_and(|p| p.priority_level == PriorityLevel::Urgent);

                if assessment.risk_level == RiskLevel::Critical && !was_critical {
                    self.emit(
                        &stage,
                        EventKind::CriticalRisk {
                            days_remaining: assessment.days_remaining,
                        },
                        now,
                    );
                    report.critical_crossings.push(stage.id);
                }
                if assessment.priority_level == PriorityLevel::Urgent && !was_urgent {
                    self.emit(
                        &stage,
                        EventKind::UrgentPriority {
                            days_remaining: assessment.days_remaining,
                        },
                        now,
                    );
                    report.urgent_crossings.push(stage.id);
                }

                if stage.is_overdue(now) && self.raise_overdue_alert(&stage, now)? {
                    report.overdue_alerts.push(stage.id);
                }

                self.store().put_risk_snapshot(&RiskSnapshot {
                    stage_instance_id: stage.id,
                    opportunity_id: opp.id,
                    assessment,
                    evaluated_at: now,
                })?;
            }
        }

        tracing::info!(
            opportunities = report.opportunities,
            stages = report.stages_evaluated,
            critical = report.critical_crossings.len(),
            urgent = report.urgent_crossings.len(),
            overdue = report.overdue_alerts.len(),
            "sweep finished"
        );
        Ok(report)
    }

    /// Append the stage's one OVERDUE_ALERT unless the ledger already has it.
    fn raise_overdue_alert(&self, stage: &StageInstance, now: DateTime<Utc>) -> Result<bool> {
        let already = self
            .store()
            .list_actions(stage.id)?
            .iter()
            .any(|a| a.action_type == ActionType::OverdueAlert);
        if already {
            return Ok(false);
        }
        let mut alert = StageAction::system(
            stage.id,
            ActionType::OverdueAlert,
            format!("Stage '{}' passed its due date", stage.name),
            now,
        );
        alert.notes = Some(format!("due {}", stage.due_date.format("%Y-%m-%d")));
        self.store().append_action(&alert)?;
        tracing::warn!(stage = %stage.id, name = %stage.name, "stage overdue");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use crate::engine::tests::{harness, t0};
    use crate::engine::TransitionRequest;
    use crate::event::EventKind;
    use crate::opportunity::NewOpportunity;
    use crate::types::{ActionType, OpportunityStatus, StageStatus};
    use chrono::Duration;

    #[test]
    fn crossings_fire_once() {
        let h = harness();
        let (_, stages) = h
            .engine
            .create_opportunity(NewOpportunity::new("Acme", "sale", "alice"))
            .unwrap();

        // Qualify is due at t0 + 5 days: two days out it is CRITICAL and URGENT.
        let first = h.engine.sweep(t0() + Duration::days(3)).unwrap();
        assert_eq!(first.critical_crossings, vec![stages[0].id]);
        assert_eq!(first.urgent_crossings, vec![stages[0].id]);
        assert_eq!(first.stages_evaluated, 3);

        let second = h.engine.sweep(t0() + Duration::days(3) + Duration::hours(1)).unwrap();
        assert!(second.is_quiet());
        let critical_events = h
            .events
            .events()
            .iter()
            .filter(|e| matches!(e.kind, EventKind::CriticalRisk { .. }))
            .count();
        assert_eq!(critical_events, 1);
    }

    #[test]
    fn snapshot_cached_after_sweep() {
        let h = harness();
        let (_, stages) = h
            .engine
            .create_opportunity(NewOpportunity::new("Acme", "sale", "alice"))
            .unwrap();
        let report = h.engine.sweep(t0()).unwrap();
        // Qualify has 5 days left: HIGH risk and HIGH priority.
        assert!(report.critical_crossings.is_empty());
        let snap = h.engine.store().risk_snapshot(stages[0].id).unwrap().unwrap();
        assert_eq!(snap.assessment.days_remaining, 5);
    }

    #[test]
    fn overdue_alert_appended_exactly_once() {
        let h = harness();
        let (_, stages) = h
            .engine
            .create_opportunity(NewOpportunity::new("Acme", "sale", "alice"))
            .unwrap();
        let late = t0() + Duration::days(6);
        let report = h.engine.sweep(late).unwrap();
        assert_eq!(report.overdue_alerts, vec![stages[0].id]);
        h.engine.sweep(late + Duration::days(1)).unwrap();

        let alerts: Vec<_> = h
            .engine
            .list_actions(stages[0].id)
            .unwrap()
            .into_iter()
            .filter(|a| a.action_type == ActionType::OverdueAlert)
            .collect();
        assert_eq!(alerts.len(), 1);
        assert!(alerts[0].performed_by.is_none());
    }

    #[test]
    fn closed_and_finished_work_is_ignored() {
        let h = harness();
        let (opp, stages) = h
            .engine
            .create_opportunity(NewOpportunity::new("Acme", "sale", "alice"))
            .unwrap();
        h.engine
            .transition(stages[1].id, TransitionRequest::new(StageStatus::Skipped, "alice"))
            .unwrap();
        let report = h.engine.sweep(t0()).unwrap();
        assert_eq!(report.stages_evaluated, 2);

        h.engine
            .close_opportunity(opp.id, OpportunityStatus::Lost, "alice", None)
            .unwrap();
        let report = h.engine.sweep(t0() + Duration::days(60)).unwrap();
        assert_eq!(report.opportunities, 0);
        assert!(report.is_quiet());
    }
}
