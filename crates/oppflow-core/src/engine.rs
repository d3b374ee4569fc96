//! The single entry point for every pipeline operation.
//!
//! [`Engine`] is synchronous and `Send + Sync`. It never retries: a
//! [`OppflowError::Conflict`] goes back to the caller, who re-reads and decides.

use crate::clock::{Clock, SystemClock};
use crate::config::{Config, WorkflowConfig};
use crate::error::{OppflowError, Result};
use crate::event::{EventKind, EventSink, PipelineEvent, TracingSink};
use crate::instantiate;
use crate::ledger::{self, MissingDeliverable, NewAction, NewDocument, StageAction, StageDocument};
use crate::opportunity::{NewOpportunity, Opportunity};
use crate::paths;
use crate::risk::{self, RiskAssessment, RiskThresholds};
use crate::stage::{self, StageInstance, TransitionContext, TransitionPlan};
use crate::store::{version_conflict, RedbStore, Store};
use crate::template::{StageTemplate, TemplateStore};
use crate::types::{ActionType, OpportunityStatus, StageStatus, ValidationStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

/// Actor recorded for engine-initiated moves such as auto-start.
pub const SYSTEM_ACTOR: &str = "system";

const CLOSE_ATTEMPTS: usize = 8;

// ---------------------------------------------------------------------------
// TransitionRequest
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRequest {
    pub target: StageStatus,
    pub actor: String,
    #[serde(default)]
    pub notes: Option<String>,
    /// Version the caller last saw; defaults to the version read at call time.
    #[serde(default)]
    pub expected_version: Option<u64>,
    #[serde(default)]
    pub validated_by: Option<String>,
}

impl TransitionRequest {
    pub fn new(target: StageStatus, actor: impl Into<String>) -> Self {
        Self {
            target,
            actor: actor.into(),
            notes: None,
            expected_version: None,
            validated_by: None,
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn expecting(mut self, version: u64) -> Self {
        self.expected_version = Some(version);
        self
    }

    pub fn validated_by(mut self, validator: impl Into<String>) -> Self {
        self.validated_by = Some(validator.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct Engine {
    store: Arc<dyn Store>,
    templates: TemplateStore,
    thresholds: RiskThresholds,
    workflow: WorkflowConfig,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
}

impl Engine {
    pub fn new(store: Arc<dyn Store>, templates: TemplateStore) -> Self {
        Self {
            store,
            templates,
            thresholds: RiskThresholds::default(),
            workflow: WorkflowConfig::default(),
            clock: Arc::new(SystemClock),
            events: Arc::new(TracingSink),
        }
    }

    /// Load config and templates from `root` and open the pipeline database.
    pub fn open(root: &Path) -> Result<Self> {
        let config = Config::load(root)?;
        let templates = TemplateStore::load(root)?;
        let store = RedbStore::open(&paths::database_path(root))?;
        Ok(Self::new(Arc::new(store), templates).with_config(&config))
    }

    pub fn with_config(mut self, config: &Config) -> Self {
        self.thresholds = config.thresholds();
        self.workflow = config.workflow.clone();
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn templates(&self) -> &TemplateStore {
        &self.templates
    }

    pub fn thresholds(&self) -> &RiskThresholds {
        &self.thresholds
    }

    pub fn workflow(&self) -> &WorkflowConfig {
        &self.workflow
    }

    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub(crate) fn emit(&self, stage: &StageInstance, kind: EventKind, at: DateTime<Utc>) {
        self.events.emit(PipelineEvent {
            stage_instance_id: stage.id,
            opportunity_id: stage.opportunity_id,
            kind,
            at,
        });
    }

    /// The exact template revision a stage was created from.
    pub(crate) fn template_for(
        &self,
        opportunity: &Opportunity,
        stage: &StageInstance,
    ) -> Result<&StageTemplate> {
        self.templates.stage_template(
            &opportunity.type_id,
            &stage.template_id,
            stage.template_revision,
        )
    }

    // -----------------------------------------------------------------------
    // Opportunities
    // -----------------------------------------------------------------------

    /// Create the opportunity and materialize its whole pipeline.
    pub fn create_opportunity(
        &self,
        new: NewOpportunity,
    ) -> Result<(Opportunity, Vec<StageInstance>)> {
        let ty = self.templates.get_type(&new.type_id)?;
        let start = new.start_date;
        let now = self.now();
        let mut opp = new.into_opportunity(ty, now)?;
        let plan = instantiate::plan_pipeline(&opp, ty, start, now)?;
        opp.current_stage_id = plan.stages.first().map(|s| s.id);

        self.store
            .create_opportunity(&opp, &plan.stages, &plan.documents)?;
        tracing::info!(
            opportunity = %opp.id,
            type_id = %opp.type_id,
            stages = plan.stages.len(),
            "opportunity created"
        );
        Ok((opp, plan.stages))
    }

    /// Materialize the pipeline of an opportunity that has none yet.
    /// A second call is a Conflict and creates nothing.
    pub fn instantiate(
        &self,
        opportunity_id: Uuid,
        start: Option<DateTime<Utc>>,
    ) -> Result<Vec<StageInstance>> {
        let opp = self.store.opportunity(opportunity_id)?;
        opp.ensure_open()?;
        let ty = self.templates.get_type(&opp.type_id)?;
        let now = self.now();
        let plan = instantiate::plan_pipeline(&opp, ty, start, now)?;
        self.store
            .insert_pipeline(opp.id, &plan.stages, &plan.documents)?;
        self.store
            .record_activity(opp.id, plan.stages.first().map(|s| s.id), now)?;
        Ok(plan.stages)
    }

    pub fn opportunity(&self, id: Uuid) -> Result<Opportunity> {
        self.store.opportunity(id)
    }

    pub fn list_opportunities(&self, status: Option<OpportunityStatus>) -> Result<Vec<Opportunity>> {
        let all = self.store.list_opportunities()?;
        Ok(match status {
            Some(status) => all.into_iter().filter(|o| o.status == status).collect(),
            None => all,
        })
    }

    pub fn close_opportunity(
        &self,
        id: Uuid,
        status: OpportunityStatus,
        actor: &str,
        reason: Option<String>,
    ) -> Result<Opportunity> {
        require_actor(actor)?;
        let mut opp = self.store.opportunity(id)?;
        let expected = opp.version;
        let now = self.now();
        opp.close(status, reason.clone(), now)?;
        self.store.update_opportunity(&opp, expected)?;

        if let Some(stage_id) = opp.current_stage_id {
            let mut record = StageAction::system(
                stage_id,
                ActionType::PipelineClosed,
                format!("Opportunity closed as {status}"),
                now,
            );
            record.performed_by = Some(actor.to_string());
            record.notes = reason;
            self.store.append_action(&record)?;
        }
        tracing::info!(opportunity = %id, %status, actor, "opportunity closed");
        Ok(opp)
    }

    pub fn delete_opportunity(&self, id: Uuid) -> Result<()> {
        self.store.delete_opportunity(id)?;
        tracing::info!(opportunity = %id, "opportunity deleted");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Stages
    // -----------------------------------------------------------------------

    pub fn stage(&self, id: Uuid) -> Result<StageInstance> {
        self.store.stage(id)
    }

    pub fn list_stages(&self, opportunity_id: Uuid) -> Result<Vec<StageInstance>> {
        self.store.opportunity(opportunity_id)?;
        self.store.list_stages(opportunity_id)
    }

    pub fn transition(&self, stage_id: Uuid, req: TransitionRequest) -> Result<StageInstance> {
        let actor = req.actor.trim();
        require_actor(actor)?;

        let stage = self.store.stage(stage_id)?;
        let opp = self.store.opportunity(stage.opportunity_id)?;
        opp.ensure_open()?;

        let expected = req.expected_version.unwrap_or(stage.version);
        if expected != stage.version {
            return Err(version_conflict("stage", stage.id, expected, stage.version));
        }

        let template = self.template_for(&opp, &stage)?;
        let siblings = if req.target == StageStatus::InProgress {
            self.store.list_stages(opp.id)?
        } else {
            Vec::new()
        };
        let (actions, documents) = if req.target == StageStatus::Completed {
            (
                self.store.list_actions(stage.id)?,
                self.store.list_documents(stage.id)?,
            )
        } else {
            (Vec::new(), Vec::new())
        };
        let ctx = TransitionContext {
            template,
            siblings: &siblings,
            actions: &actions,
            documents: &documents,
        };

        let validated_by = req.validated_by.as_deref().map(str::trim);
        let plan = stage::check_transition(&stage, req.target, validated_by, &ctx).inspect_err(|e| {
            tracing::debug!(stage = %stage.id, target = %req.target, error = %e, "transition refused");
        })?;

        let now = self.now();
        let mut next = stage.clone();
        let audit = stage::apply_transition(&mut next, plan, actor, validated_by, req.notes, now);
        self.store.update_stage(&next, expected, &audit)?;

        // The stage write has landed. Anything after it is bookkeeping and
        // must not turn a committed transition into an error for the caller.
        if let Err(e) = self.after_commit(&opp, &next, plan, actor, now) {
            tracing::error!(stage = %next.id, error = %e, "post-transition bookkeeping failed");
        }
        Ok(next)
    }

    fn after_commit(
        &self,
        opp: &Opportunity,
        next: &StageInstance,
        plan: TransitionPlan,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let change = match plan {
            TransitionPlan::AwaitValidation => {
                self.emit(
                    next,
                    EventKind::Transitioned {
                        from: StageStatus::InProgress,
                        to: StageStatus::InProgress,
                    },
                    now,
                );
                tracing::info!(stage = %next.id, actor, "stage awaiting validation");
                return self.store.record_activity(opp.id, None, now);
            }
            TransitionPlan::Move(change) => change,
        };
        self.emit(
            next,
            EventKind::Transitioned {
                from: change.from,
                to: change.to,
            },
            now,
        );

        let stages = self.store.list_stages(opp.id)?;
        let current = stages
            .iter()
            .find(|s| !s.is_finished())
            .map(|s| s.id)
            .unwrap_or(next.id);
        self.store.record_activity(opp.id, Some(current), now)?;

        if change.to.is_terminal() {
            self.after_stage_closed(opp, next, &stages, now)?;
        }
        Ok(())
    }

    /// Countersign a stage that requires validation, completing it.
    pub fn validate_stage(&self, stage_id: Uuid, validator: &str) -> Result<StageInstance> {
        self.transition(
            stage_id,
            TransitionRequest::new(StageStatus::Completed, validator).validated_by(validator),
        )
    }

    /// True when every mandatory stage of `stages` is COMPLETED or SKIPPED.
    pub(crate) fn pipeline_complete(
        &self,
        opp: &Opportunity,
        stages: &[StageInstance],
    ) -> Result<bool> {
        let templates = stages
            .iter()
            .map(|s| self.template_for(opp, s))
            .collect::<Result<Vec<_>>>()?;
        Ok(stage::is_pipeline_complete(stages, &templates))
    }

    fn after_stage_closed(
        &self,
        opp: &Opportunity,
        closed: &StageInstance,
        stages: &[StageInstance],
        now: DateTime<Utc>,
    ) -> Result<()> {
        if self.pipeline_complete(opp, stages)? {
            self.finish_pipeline(opp.id, closed, now)?;
            return Ok(());
        }

        if !self.workflow.auto_start_next {
            return Ok(());
        }
        let Some(next) = stages
            .iter()
            .find(|s| s.order > closed.order && s.status == StageStatus::Pending)
        else {
            return Ok(());
        };
        match self.transition(
            next.id,
            TransitionRequest::new(StageStatus::InProgress, SYSTEM_ACTOR),
        ) {
            Ok(_) => Ok(()),
            Err(e) if e.is_rule_violation() => {
                tracing::debug!(stage = %next.id, error = %e, "auto-start skipped");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Close the opportunity as WON. Ledger activity bumps the opportunity
    /// version without a check, so a Conflict here is re-read and retried.
    /// Returns false when someone else already closed it.
    pub(crate) fn finish_pipeline(
        &self,
        opportunity_id: Uuid,
        last: &StageInstance,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        for _ in 0..CLOSE_ATTEMPTS {
            let mut opp = self.store.opportunity(opportunity_id)?;
            if !opp.is_open() {
                return Ok(false);
            }
            let expected = opp.version;
            opp.close(
                OpportunityStatus::Won,
                Some("all mandatory stages finished".into()),
                now,
            )?;
            match self.store.update_opportunity(&opp, expected) {
                Ok(()) => {}
                Err(OppflowError::Conflict(msg)) => {
                    tracing::debug!(opportunity = %opportunity_id, %msg, "retrying WON close");
                    continue;
                }
                Err(e) => return Err(e),
            }

            let record = StageAction::system(
                last.id,
                ActionType::PipelineClosed,
                "Pipeline completed: opportunity WON",
                now,
            );
            self.store.append_action(&record)?;
            self.emit(last, EventKind::PipelineCompleted, now);
            tracing::info!(opportunity = %opportunity_id, "pipeline completed, opportunity WON");
            return Ok(true);
        }
        Err(OppflowError::Conflict(format!(
            "opportunity {opportunity_id} kept changing; WON close gave up after {CLOSE_ATTEMPTS} attempts"
        )))
    }

    // -----------------------------------------------------------------------
    // Ledger
    // -----------------------------------------------------------------------

    pub fn log_action(&self, stage_id: Uuid, new: NewAction) -> Result<StageAction> {
        let stage = self.store.stage(stage_id)?;
        let now = self.now();
        let action = new.into_action(stage_id, now)?;
        self.store.append_action(&action)?;
        self.store.record_activity(stage.opportunity_id, None, now)?;
        tracing::debug!(stage = %stage_id, action_type = %action.action_type, "action logged");
        Ok(action)
    }

    pub fn list_actions(&self, stage_id: Uuid) -> Result<Vec<StageAction>> {
        self.store.stage(stage_id)?;
        self.store.list_actions(stage_id)
    }

    pub fn record_document(&self, stage_id: Uuid, new: NewDocument) -> Result<StageDocument> {
        let stage = self.store.stage(stage_id)?;
        if stage.is_finished() {
            return Err(OppflowError::State(format!(
                "stage '{}' is {}; documents can no longer be added",
                stage.name, stage.status
            )));
        }
        let now = self.now();
        let doc = new.into_document(stage_id, now)?;
        self.store.insert_document(&doc)?;
        self.store.record_activity(stage.opportunity_id, None, now)?;
        Ok(doc)
    }

    pub fn document(&self, id: Uuid) -> Result<StageDocument> {
        self.store.document(id)
    }

    pub fn list_documents(&self, stage_id: Uuid) -> Result<Vec<StageDocument>> {
        self.store.stage(stage_id)?;
        self.store.list_documents(stage_id)
    }

    pub fn mark_provided(
        &self,
        document_id: Uuid,
        actor: &str,
        at: Option<DateTime<Utc>>,
    ) -> Result<StageDocument> {
        require_actor(actor)?;
        self.patch_document(document_id, |doc, now| {
            doc.mark_provided(actor, at.unwrap_or(now));
            Ok(())
        })
    }

    pub fn validate_document(
        &self,
        document_id: Uuid,
        actor: &str,
        verdict: ValidationStatus,
        reason: Option<String>,
        at: Option<DateTime<Utc>>,
    ) -> Result<StageDocument> {
        require_actor(actor)?;
        self.patch_document(document_id, |doc, now| {
            doc.record_verdict(actor, verdict, reason, at.unwrap_or(now))
        })
    }

    fn patch_document(
        &self,
        document_id: Uuid,
        patch: impl FnOnce(&mut StageDocument, DateTime<Utc>) -> Result<()>,
    ) -> Result<StageDocument> {
        let mut doc = self.store.document(document_id)?;
        let stage = self.store.stage(doc.stage_instance_id)?;
        if stage.status == StageStatus::Skipped {
            return Err(OppflowError::State(format!(
                "stage '{}' was skipped; its documents are frozen",
                stage.name
            )));
        }
        let expected = doc.version;
        let now = self.now();
        patch(&mut doc, now)?;
        doc.version += 1;
        self.store.update_document(&doc, expected)?;
        self.store.record_activity(stage.opportunity_id, None, now)?;
        Ok(doc)
    }

    pub fn missing_deliverables(&self, stage_id: Uuid) -> Result<Vec<MissingDeliverable>> {
        let stage = self.store.stage(stage_id)?;
        let opp = self.store.opportunity(stage.opportunity_id)?;
        let template = self.template_for(&opp, &stage)?;
        Ok(ledger::missing_deliverables(
            template,
            &self.store.list_actions(stage_id)?,
            &self.store.list_documents(stage_id)?,
        ))
    }

    pub fn is_stage_complete(&self, stage_id: Uuid) -> Result<bool> {
        let stage = self.store.stage(stage_id)?;
        let opp = self.store.opportunity(stage.opportunity_id)?;
        let template = self.template_for(&opp, &stage)?;
        Ok(ledger::is_stage_complete(
            template,
            &self.store.list_actions(stage_id)?,
            &self.store.list_documents(stage_id)?,
        ))
    }

    // -----------------------------------------------------------------------
    // Risk
    // -----------------------------------------------------------------------

    pub fn evaluate_stage(&self, stage_id: Uuid) -> Result<RiskAssessment> {
        let stage = self.store.stage(stage_id)?;
        Ok(risk::evaluate(&stage, self.now(), &self.thresholds))
    }
}

fn require_actor(actor: &str) -> Result<()> {
    if actor.trim().is_empty() {
        return Err(OppflowError::InvalidInput("actor is required".into()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::event::RecordingSink;
    use crate::store::MemoryStore;
    use crate::template::{OpportunityType, RequiredAction, RequiredDocument};
    use chrono::{Duration, TimeZone};

    pub(crate) struct Harness {
        pub engine: Engine,
        pub clock: Arc<FixedClock>,
        pub events: Arc<RecordingSink>,
    }

    pub(crate) fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 1, 9, 0, 0).unwrap()
    }

    /// Qualify (NDA doc + MEETING) -> Demo (optional, skippable) -> Contract (validated).
    pub(crate) fn sales_templates() -> TemplateStore {
        let mut qualify = StageTemplate::new("qualify", "Qualify", 1, 5);
        qualify.required_documents.push(RequiredDocument::mandatory("NDA"));
        qualify.required_actions.push(RequiredAction {
            action_type: ActionType::Meeting,
            is_mandatory: true,
            validation_order: None,
        });
        let mut demo = StageTemplate::new("demo", "Demo", 2, 7);
        demo.can_skip = true;
        demo.is_mandatory = false;
        let mut contract = StageTemplate::new("contract", "Contract", 3, 10);
        contract.validation_required = true;

        let mut store = TemplateStore::new();
        store
            .create_type(
                OpportunityType::new("sale", "Sale").with_stages(vec![qualify, demo, contract]),
            )
            .unwrap();
        store
    }

    pub(crate) fn harness_with(templates: TemplateStore, config: Config) -> Harness {
        let clock = Arc::new(FixedClock::new(t0()));
        let events = Arc::new(RecordingSink::new());
        let engine = Engine::new(Arc::new(MemoryStore::new()), templates)
            .with_config(&config)
            .with_clock(clock.clone())
            .with_events(events.clone());
        Harness {
            engine,
            clock,
            events,
        }
    }

    pub(crate) fn harness() -> Harness {
        harness_with(sales_templates(), Config::new("test"))
    }

    fn finish_qualify(h: &Harness, stage: &StageInstance) {
        let docs = h.engine.list_documents(stage.id).unwrap();
        h.engine.mark_provided(docs[0].id, "alice", None).unwrap();
        h.engine
            .log_action(stage.id, NewAction::new(ActionType::Meeting, "Discovery", "alice"))
            .unwrap();
        h.engine
            .transition(stage.id, TransitionRequest::new(StageStatus::Completed, "alice"))
            .unwrap();
    }

    #[test]
    fn create_materializes_pipeline() {
        let h = harness();
        let (opp, stages) = h
            .engine
            .create_opportunity(NewOpportunity::new("Acme", "sale", "alice"))
            .unwrap();
        assert_eq!(stages.len(), 3);
        assert_eq!(opp.current_stage_id, Some(stages[0].id));
        assert_eq!(h.engine.list_stages(opp.id).unwrap(), stages);
        assert_eq!(h.engine.list_documents(stages[0].id).unwrap().len(), 1);
    }

    #[test]
    fn second_instantiation_conflicts() {
        let h = harness();
        let (opp, _) = h
            .engine
            .create_opportunity(NewOpportunity::new("Acme", "sale", "alice"))
            .unwrap();
        let err = h.engine.instantiate(opp.id, None).unwrap_err();
        assert!(matches!(err, OppflowError::Conflict(_)));
        assert_eq!(h.engine.list_stages(opp.id).unwrap().len(), 3);
    }

    #[test]
    fn unknown_or_inactive_type_rejected() {
        let mut templates = sales_templates();
        templates.set_type_active("sale", false).unwrap();
        let h = harness_with(templates, Config::new("test"));
        assert!(matches!(
            h.engine
                .create_opportunity(NewOpportunity::new("Acme", "sale", "alice")),
            Err(OppflowError::Validation(_))
        ));
        assert!(matches!(
            h.engine
                .create_opportunity(NewOpportunity::new("Acme", "lease", "alice")),
            Err(OppflowError::NotFound { .. })
        ));
        assert!(h.engine.list_opportunities(None).unwrap().is_empty());
    }

    #[test]
    fn completion_requires_deliverables() {
        let h = harness();
        let (_, stages) = h
            .engine
            .create_opportunity(NewOpportunity::new("Acme", "sale", "alice"))
            .unwrap();
        let err = h
            .engine
            .transition(stages[0].id, TransitionRequest::new(StageStatus::Completed, "alice"))
            .unwrap_err();
        match err {
            OppflowError::IncompleteDeliverables { missing, .. } => {
                assert_eq!(missing.len(), 2);
            }
            other => panic!("unexpected {other}"),
        }
        assert!(!h.engine.is_stage_complete(stages[0].id).unwrap());
        finish_qualify(&h, &stages[0]);
        assert_eq!(
            h.engine.stage(stages[0].id).unwrap().status,
            StageStatus::Completed
        );
        assert!(h.engine.is_stage_complete(stages[0].id).unwrap());
    }

    #[test]
    fn transition_writes_audit_and_event() {
        let h = harness();
        let (opp, stages) = h
            .engine
            .create_opportunity(NewOpportunity::new("Acme", "sale", "alice"))
            .unwrap();
        h.clock.advance(Duration::hours(2));
        let blocked = h
            .engine
            .transition(
                stages[0].id,
                TransitionRequest::new(StageStatus::Blocked, "bob").with_notes("waiting on legal"),
            )
            .unwrap();
        assert_eq!(blocked.version, 2);
        assert_eq!(blocked.notes.as_deref(), Some("waiting on legal"));

        let actions = h.engine.list_actions(stages[0].id).unwrap();
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].performed_by.as_deref(), Some("bob"));
        assert_eq!(actions[0].performed_at, t0() + Duration::hours(2));

        let events = h.events.events();
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].kind,
            EventKind::Transitioned {
                from: StageStatus::InProgress,
                to: StageStatus::Blocked
            }
        );
        let opp = h.engine.opportunity(opp.id).unwrap();
        assert_eq!(opp.last_activity_at, t0() + Duration::hours(2));
    }

    #[test]
    fn stale_expected_version_conflicts() {
        let h = harness();
        let (_, stages) = h
            .engine
            .create_opportunity(NewOpportunity::new("Acme", "sale", "alice"))
            .unwrap();
        h.engine
            .transition(stages[1].id, TransitionRequest::new(StageStatus::Blocked, "alice"))
            .unwrap();
        let err = h
            .engine
            .transition(
                stages[1].id,
                TransitionRequest::new(StageStatus::InProgress, "bob").expecting(1),
            )
            .unwrap_err();
        assert!(matches!(err, OppflowError::Conflict(_)));
    }

    #[test]
    fn invalid_edges_are_state_errors() {
        let h = harness();
        let (_, stages) = h
            .engine
            .create_opportunity(NewOpportunity::new("Acme", "sale", "alice"))
            .unwrap();
        let err = h
            .engine
            .transition(stages[0].id, TransitionRequest::new(StageStatus::InProgress, "alice"))
            .unwrap_err();
        assert!(matches!(err, OppflowError::State(_)));
        let err = h
            .engine
            .transition(stages[1].id, TransitionRequest::new(StageStatus::Pending, "alice"))
            .unwrap_err();
        assert!(matches!(err, OppflowError::State(_)));
    }

    #[test]
    fn validation_required_stage_completes_on_countersign() {
        let h = harness();
        let (opp, stages) = h
            .engine
            .create_opportunity(NewOpportunity::new("Acme", "sale", "alice"))
            .unwrap();
        finish_qualify(&h, &stages[0]);
        h.engine
            .transition(stages[1].id, TransitionRequest::new(StageStatus::Skipped, "alice"))
            .unwrap();
        h.engine
            .transition(stages[2].id, TransitionRequest::new(StageStatus::InProgress, "alice"))
            .unwrap();
        let waiting = h
            .engine
            .transition(stages[2].id, TransitionRequest::new(StageStatus::Completed, "alice"))
            .unwrap();
        assert_eq!(waiting.status, StageStatus::InProgress);
        assert!(waiting.pending_validation);
        assert!(h.engine.opportunity(opp.id).unwrap().is_open());
        assert!(h.events.events().iter().any(|e| e.stage_instance_id == stages[2].id
            && e.kind
                == EventKind::Transitioned {
                    from: StageStatus::InProgress,
                    to: StageStatus::InProgress,
                }));

        let done = h.engine.validate_stage(stages[2].id, "partner").unwrap();
        assert_eq!(done.status, StageStatus::Completed);
        assert_eq!(done.validated_by.as_deref(), Some("partner"));

        let opp = h.engine.opportunity(opp.id).unwrap();
        assert_eq!(opp.status, OpportunityStatus::Won);
        assert!(h
            .events
            .events()
            .iter()
            .any(|e| e.kind == EventKind::PipelineCompleted));
        let closing = h.engine.list_actions(stages[2].id).unwrap();
        assert_eq!(
            closing.last().map(|a| &a.action_type),
            Some(&ActionType::PipelineClosed)
        );
    }

    #[test]
    fn closed_opportunities_reject_transitions() {
        let h = harness();
        let (opp, stages) = h
            .engine
            .create_opportunity(NewOpportunity::new("Acme", "sale", "alice"))
            .unwrap();
        let closed = h
            .engine
            .close_opportunity(opp.id, OpportunityStatus::Lost, "alice", Some("no budget".into()))
            .unwrap();
        assert_eq!(closed.status, OpportunityStatus::Lost);
        let err = h
            .engine
            .transition(stages[0].id, TransitionRequest::new(StageStatus::Blocked, "alice"))
            .unwrap_err();
        assert!(matches!(err, OppflowError::State(_)));
        let actions = h.engine.list_actions(stages[0].id).unwrap();
        assert_eq!(actions[0].action_type, ActionType::PipelineClosed);
        assert_eq!(actions[0].notes.as_deref(), Some("no budget"));
    }

    #[test]
    fn auto_start_next_when_enabled() {
        let mut config = Config::new("test");
        config.workflow.auto_start_next = true;
        let h = harness_with(sales_templates(), config);
        let (_, stages) = h
            .engine
            .create_opportunity(NewOpportunity::new("Acme", "sale", "alice"))
            .unwrap();
        finish_qualify(&h, &stages[0]);
        let demo = h.engine.stage(stages[1].id).unwrap();
        assert_eq!(demo.status, StageStatus::InProgress);
        let start = h.engine.list_actions(demo.id).unwrap();
        assert_eq!(start[0].performed_by.as_deref(), Some(SYSTEM_ACTOR));
    }

    #[test]
    fn skipped_stage_freezes_documents() {
        let h = harness();
        let (_, stages) = h
            .engine
            .create_opportunity(NewOpportunity::new("Acme", "sale", "alice"))
            .unwrap();
        let doc = h
            .engine
            .record_document(stages[1].id, NewDocument::new("Demo Script"))
            .unwrap();
        h.engine
            .transition(stages[1].id, TransitionRequest::new(StageStatus::Skipped, "alice"))
            .unwrap();
        assert!(matches!(
            h.engine.mark_provided(doc.id, "alice", None),
            Err(OppflowError::State(_))
        ));
        assert!(h
            .engine
            .record_document(stages[1].id, NewDocument::new("Late"))
            .is_err());
    }

    #[test]
    fn document_review_cycle() {
        let h = harness();
        let (_, stages) = h
            .engine
            .create_opportunity(NewOpportunity::new("Acme", "sale", "alice"))
            .unwrap();
        let nda = h.engine.list_documents(stages[0].id).unwrap().remove(0);
        assert!(matches!(
            h.engine
                .validate_document(nda.id, "bob", ValidationStatus::Approved, None, None),
            Err(OppflowError::State(_))
        ));
        h.engine.mark_provided(nda.id, "alice", None).unwrap();
        let rejected = h
            .engine
            .validate_document(
                nda.id,
                "bob",
                ValidationStatus::Rejected,
                Some("wrong entity".into()),
                None,
            )
            .unwrap();
        assert_eq!(rejected.version, 3);
        let missing = h.engine.missing_deliverables(stages[0].id).unwrap();
        assert!(missing
            .iter()
            .any(|m| matches!(m, MissingDeliverable::DocumentRejected { .. })));
    }

    /// Slips a `record_activity` in front of the first opportunity CAS, the way
    /// a `log_action` on another stage would between read and write.
    struct ActivityBeforeFirstUpdate {
        inner: MemoryStore,
        tripped: std::sync::atomic::AtomicBool,
    }

    impl Store for ActivityBeforeFirstUpdate {
        fn insert_opportunity(&self, o: &Opportunity) -> Result<()> {
            self.inner.insert_opportunity(o)
        }
        fn create_opportunity(
            &self,
            o: &Opportunity,
            s: &[StageInstance],
            d: &[StageDocument],
        ) -> Result<()> {
            self.inner.create_opportunity(o, s, d)
        }
        fn opportunity(&self, id: Uuid) -> Result<Opportunity> {
            self.inner.opportunity(id)
        }
        fn list_opportunities(&self) -> Result<Vec<Opportunity>> {
            self.inner.list_opportunities()
        }
        fn update_opportunity(&self, o: &Opportunity, expected: u64) -> Result<()> {
            if !self.tripped.swap(true, std::sync::atomic::Ordering::SeqCst) {
                self.inner.record_activity(o.id, None, t0())?;
            }
            self.inner.update_opportunity(o, expected)
        }
        fn record_activity(&self, id: Uuid, current: Option<Uuid>, at: DateTime<Utc>) -> Result<()> {
            self.inner.record_activity(id, current, at)
        }
        fn delete_opportunity(&self, id: Uuid) -> Result<()> {
            self.inner.delete_opportunity(id)
        }
        fn insert_pipeline(&self, id: Uuid, s: &[StageInstance], d: &[StageDocument]) -> Result<()> {
            self.inner.insert_pipeline(id, s, d)
        }
        fn stage(&self, id: Uuid) -> Result<StageInstance> {
            self.inner.stage(id)
        }
        fn list_stages(&self, id: Uuid) -> Result<Vec<StageInstance>> {
            self.inner.list_stages(id)
        }
        fn update_stage(&self, s: &StageInstance, expected: u64, audit: &StageAction) -> Result<()> {
            self.inner.update_stage(s, expected, audit)
        }
        fn append_action(&self, a: &StageAction) -> Result<()> {
            self.inner.append_action(a)
        }
        fn list_actions(&self, id: Uuid) -> Result<Vec<StageAction>> {
            self.inner.list_actions(id)
        }
        fn insert_document(&self, d: &StageDocument) -> Result<()> {
            self.inner.insert_document(d)
        }
        fn document(&self, id: Uuid) -> Result<StageDocument> {
            self.inner.document(id)
        }
        fn list_documents(&self, id: Uuid) -> Result<Vec<StageDocument>> {
            self.inner.list_documents(id)
        }
        fn update_document(&self, d: &StageDocument, expected: u64) -> Result<()> {
            self.inner.update_document(d, expected)
        }
        fn put_risk_snapshot(&self, s: &crate::risk::RiskSnapshot) -> Result<()> {
            self.inner.put_risk_snapshot(s)
        }
        fn risk_snapshot(&self, id: Uuid) -> Result<Option<crate::risk::RiskSnapshot>> {
            self.inner.risk_snapshot(id)
        }
    }

    fn single_stage_templates() -> TemplateStore {
        let mut store = TemplateStore::new();
        store
            .create_type(
                OpportunityType::new("quick", "Quick")
                    .with_stages(vec![StageTemplate::new("only", "Only", 1, 5)]),
            )
            .unwrap();
        store
    }

    #[test]
    fn concurrent_activity_does_not_strand_the_won_close() {
        let events = Arc::new(RecordingSink::new());
        let store = ActivityBeforeFirstUpdate {
            inner: MemoryStore::new(),
            tripped: Default::default(),
        };
        let engine = Engine::new(Arc::new(store), single_stage_templates())
            .with_clock(Arc::new(FixedClock::new(t0())))
            .with_events(events.clone());
        let (opp, stages) = engine
            .create_opportunity(NewOpportunity::new("Acme", "quick", "alice"))
            .unwrap();

        let done = engine
            .transition(stages[0].id, TransitionRequest::new(StageStatus::Completed, "alice"))
            .unwrap();
        assert_eq!(done.status, StageStatus::Completed);

        let opp = engine.opportunity(opp.id).unwrap();
        assert_eq!(opp.status, OpportunityStatus::Won);
        let closing: Vec<_> = engine
            .list_actions(stages[0].id)
            .unwrap()
            .into_iter()
            .filter(|a| a.action_type == ActionType::PipelineClosed)
            .collect();
        assert_eq!(closing.len(), 1);
        assert!(events
            .events()
            .iter()
            .any(|e| e.kind == EventKind::PipelineCompleted));
    }

    #[test]
    fn sweep_closes_a_finished_pipeline_left_open() {
        let h = harness_with(single_stage_templates(), Config::new("test"));
        let (opp, stages) = h
            .engine
            .create_opportunity(NewOpportunity::new("Acme", "quick", "alice"))
            .unwrap();

        // Finish the stage behind the engine's back so nothing closes the opportunity.
        let mut finished = stages[0].clone();
        let audit = stage::apply_transition(
            &mut finished,
            TransitionPlan::Move(crate::ledger::StatusChange {
                from: StageStatus::InProgress,
                to: StageStatus::Completed,
            }),
            "alice",
            None,
            None,
            t0(),
        );
        h.engine
            .store()
            .update_stage(&finished, stages[0].version, &audit)
            .unwrap();
        assert!(h.engine.opportunity(opp.id).unwrap().is_open());

        let report = h.engine.sweep(t0() + Duration::hours(1)).unwrap();
        assert_eq!(report.pipelines_closed, vec![opp.id]);
        assert_eq!(report.stages_evaluated, 0);
        assert_eq!(
            h.engine.opportunity(opp.id).unwrap().status,
            OpportunityStatus::Won
        );

        let again = h.engine.sweep(t0() + Duration::hours(2)).unwrap();
        assert!(again.pipelines_closed.is_empty());
        assert_eq!(again.opportunities, 0);
    }
}
