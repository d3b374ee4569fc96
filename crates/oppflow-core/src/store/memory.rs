use super::{version_conflict, Store};
use crate::error::{OppflowError, Result};
use crate::ledger::{StageAction, StageDocument};
use crate::opportunity::Opportunity;
use crate::risk::RiskSnapshot;
use crate::stage::StageInstance;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Debug, Default)]
struct Inner {
    opportunities: HashMap<Uuid, Opportunity>,
    stages: HashMap<Uuid, StageInstance>,
    actions: HashMap<Uuid, Vec<StageAction>>,
    documents: HashMap<Uuid, StageDocument>,
    /// Document ids per stage, in insertion order.
    stage_documents: HashMap<Uuid, Vec<Uuid>>,
    snapshots: HashMap<Uuid, RiskSnapshot>,
}

impl Inner {
    fn check_pipeline(
        &self,
        opportunity_id: Uuid,
        stages: &[StageInstance],
        documents: &[StageDocument],
    ) -> Result<()> {
        super::check_pipeline(opportunity_id, stages, documents)?;
        if self.stages.values().any(|s| s.opportunity_id == opportunity_id) {
            return Err(OppflowError::Conflict(format!(
                "opportunity {opportunity_id} already has a pipeline"
            )));
        }
        Ok(())
    }

    fn put_pipeline(&mut self, stages: &[StageInstance], documents: &[StageDocument]) {
        for stage in stages {
            self.stages.insert(stage.id, stage.clone());
        }
        for doc in documents {
            self.documents.insert(doc.id, doc.clone());
            self.stage_documents
                .entry(doc.stage_instance_id)
                .or_default()
                .push(doc.id);
        }
    }
}

/// Everything behind one mutex; each call is one critical section.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Store for MemoryStore {
    fn insert_opportunity(&self, opportunity: &Opportunity) -> Result<()> {
        let mut inner = self.lock();
        if inner.opportunities.contains_key(&opportunity.id) {
            return Err(OppflowError::Conflict(format!(
                "opportunity {} already exists",
                opportunity.id
            )));
        }
        inner
            .opportunities
            .insert(opportunity.id, opportunity.clone());
        Ok(())
    }

    fn create_opportunity(
        &self,
        opportunity: &Opportunity,
        stages: &[StageInstance],
        documents: &[StageDocument],
    ) -> Result<()> {
        let mut inner = self.lock();
        if inner.opportunities.contains_key(&opportunity.id) {
            return Err(OppflowError::Conflict(format!(
                "opportunity {} already exists",
                opportunity.id
            )));
        }
        inner.check_pipeline(opportunity.id, stages, documents)?;
        inner
            .opportunities
            .insert(opportunity.id, opportunity.clone());
        inner.put_pipeline(stages, documents);
        Ok(())
    }

    fn opportunity(&self, id: Uuid) -> Result<Opportunity> {
        self.lock()
            .opportunities
            .get(&id)
            .cloned()
            .ok_or_else(|| OppflowError::not_found("opportunity", id))
    }

    fn list_opportunities(&self) -> Result<Vec<Opportunity>> {
        let mut all: Vec<Opportunity> = self.lock().opportunities.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(all)
    }

    fn update_opportunity(&self, opportunity: &Opportunity, expected_version: u64) -> Result<()> {
        let mut inner = self.lock();
        let current = inner
            .opportunities
            .get_mut(&opportunity.id)
            .ok_or_else(|| OppflowError::not_found("opportunity", opportunity.id))?;
        if current.version != expected_version {
            return Err(version_conflict(
                "opportunity",
                opportunity.id,
                expected_version,
                current.version,
            ));
        }
        *current = opportunity.clone();
        Ok(())
    }

    fn record_activity(
        &self,
        opportunity_id: Uuid,
        current_stage_id: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut inner = self.lock();
        let opp = inner
            .opportunities
            .get_mut(&opportunity_id)
            .ok_or_else(|| OppflowError::not_found("opportunity", opportunity_id))?;
        if let Some(stage_id) = current_stage_id {
            opp.current_stage_id = Some(stage_id);
        }
        opp.last_activity_at = opp.last_activity_at.max(at);
        opp.version += 1;
        Ok(())
    }

    fn delete_opportunity(&self, id: Uuid) -> Result<()> {
        let mut inner = self.lock();
        if inner.opportunities.remove(&id).is_none() {
            return Err(OppflowError::not_found("opportunity", id));
        }
        let stage_ids: Vec<Uuid> = inner
            .stages
            .values()
            .filter(|s| s.opportunity_id == id)
            .map(|s| s.id)
            .collect();
        for stage_id in stage_ids {
            inner.stages.remove(&stage_id);
            inner.actions.remove(&stage_id);
            inner.snapshots.remove(&stage_id);
            for doc_id in inner.stage_documents.remove(&stage_id).unwrap_or_default() {
                inner.documents.remove(&doc_id);
            }
        }
        Ok(())
    }

    fn insert_pipeline(
        &self,
        opportunity_id: Uuid,
        stages: &[StageInstance],
        documents: &[StageDocument],
    ) -> Result<()> {
        let mut inner = self.lock();
        if !inner.opportunities.contains_key(&opportunity_id) {
            return Err(OppflowError::not_found("opportunity", opportunity_id));
        }
        inner.check_pipeline(opportunity_id, stages, documents)?;
        inner.put_pipeline(stages, documents);
        Ok(())
    }

    fn stage(&self, id: Uuid) -> Result<StageInstance> {
        self.lock()
            .stages
            .get(&id)
            .cloned()
            .ok_or_else(|| OppflowError::not_found("stage", id))
    }

    fn list_stages(&self, opportunity_id: Uuid) -> Result<Vec<StageInstance>> {
        let mut stages: Vec<StageInstance> = self
            .lock()
            .stages
            .values()
            .filter(|s| s.opportunity_id == opportunity_id)
            .cloned()
            .collect();
        stages.sort_by_key(|s| s.order);
        Ok(stages)
    }

    fn update_stage(
        &self,
        stage: &StageInstance,
        expected_version: u64,
        audit: &StageAction,
    ) -> Result<()> {
        let mut inner = self.lock();
        let current = inner
            .stages
            .get_mut(&stage.id)
            .ok_or_else(|| OppflowError::not_found("stage", stage.id))?;
        if current.version != expected_version {
            return Err(version_conflict(
                "stage",
                stage.id,
                expected_version,
                current.version,
            ));
        }
        *current = stage.clone();
        inner
            .actions
            .entry(audit.stage_instance_id)
            .or_default()
            .push(audit.clone());
        Ok(())
    }

    fn append_action(&self, action: &StageAction) -> Result<()> {
        let mut inner = self.lock();
        if !inner.stages.contains_key(&action.stage_instance_id) {
            return Err(OppflowError::not_found("stage", action.stage_instance_id));
        }
        inner
            .actions
            .entry(action.stage_instance_id)
            .or_default()
            .push(action.clone());
        Ok(())
    }

    fn list_actions(&self, stage_id: Uuid) -> Result<Vec<StageAction>> {
        let mut actions = self
            .lock()
            .actions
            .get(&stage_id)
            .cloned()
            .unwrap_or_default();
        actions.sort_by_key(|a| a.performed_at);
        Ok(actions)
    }

    fn insert_document(&self, document: &StageDocument) -> Result<()> {
        let mut inner = self.lock();
        if !inner.stages.contains_key(&document.stage_instance_id) {
            return Err(OppflowError::not_found("stage", document.stage_instance_id));
        }
        inner.documents.insert(document.id, document.clone());
        inner
            .stage_documents
            .entry(document.stage_instance_id)
            .or_default()
            .push(document.id);
        Ok(())
    }

    fn document(&self, id: Uuid) -> Result<StageDocument> {
        self.lock()
            .documents
            .get(&id)
            .cloned()
            .ok_or_else(|| OppflowError::not_found("document", id))
    }

    fn list_documents(&self, stage_id: Uuid) -> Result<Vec<StageDocument>> {
        let inner = self.lock();
        Ok(inner
            .stage_documents
            .get(&stage_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.documents.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    fn update_document(&self, document: &StageDocument, expected_version: u64) -> Result<()> {
        let mut inner = self.lock();
        let current = inner
            .documents
            .get_mut(&document.id)
            .ok_or_else(|| OppflowError::not_found("document", document.id))?;
        if current.version != expected_version {
            return Err(version_conflict(
                "document",
                document.id,
                expected_version,
                current.version,
            ));
        }
        *current = document.clone();
        Ok(())
    }

    fn put_risk_snapshot(&self, snapshot: &RiskSnapshot) -> Result<()> {
        self.lock()
            .snapshots
            .insert(snapshot.stage_instance_id, snapshot.clone());
        Ok(())
    }

    fn risk_snapshot(&self, stage_id: Uuid) -> Result<Option<RiskSnapshot>> {
        Ok(self.lock().snapshots.get(&stage_id).cloned())
    }
}
