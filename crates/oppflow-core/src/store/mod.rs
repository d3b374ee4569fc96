//! Persistence seam for opportunities, stages and their ledgers.
//!
//! Versioned records (`Opportunity`, `StageInstance`, `StageDocument`) are
//! written with compare-and-swap: the caller passes the record with its
//! version already bumped, together with the version it observed. A mismatch
//! is a [`OppflowError::Conflict`](crate::error::OppflowError::Conflict) and
//! nothing is written.

mod memory;
mod redb_store;

pub use self::memory::MemoryStore;
pub use self::redb_store::RedbStore;

use crate::error::{OppflowError, Result};
use crate::ledger::{StageAction, StageDocument};
use crate::opportunity::Opportunity;
use crate::risk::RiskSnapshot;
use crate::stage::StageInstance;
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub trait Store: Send + Sync {
    // -- opportunities ------------------------------------------------------

    fn insert_opportunity(&self, opportunity: &Opportunity) -> Result<()>;
    /// `insert_opportunity` and `insert_pipeline` in one write: either the
    /// opportunity lands with all its stages and documents or nothing does.
    fn create_opportunity(
        &self,
        opportunity: &Opportunity,
        stages: &[StageInstance],
        documents: &[StageDocument],
    ) -> Result<()>;
    fn opportunity(&self, id: Uuid) -> Result<Opportunity>;
    /// Oldest first.
    fn list_opportunities(&self) -> Result<Vec<Opportunity>>;
    fn update_opportunity(&self, opportunity: &Opportunity, expected_version: u64) -> Result<()>;
    /// Bookkeeping after ledger activity; not version-checked but bumps the version.
    fn record_activity(
        &self,
        opportunity_id: Uuid,
        current_stage_id: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> Result<()>;
    /// Removes the opportunity with its stages, actions, documents and snapshots.
    fn delete_opportunity(&self, id: Uuid) -> Result<()>;

    // -- stages -------------------------------------------------------------

    /// All-or-nothing. Fails with Conflict if the opportunity already has stages.
    fn insert_pipeline(
        &self,
        opportunity_id: Uuid,
        stages: &[StageInstance],
        documents: &[StageDocument],
    ) -> Result<()>;
    fn stage(&self, id: Uuid) -> Result<StageInstance>;
    /// Ascending by `order`.
    fn list_stages(&self, opportunity_id: Uuid) -> Result<Vec<StageInstance>>;
    /// Status change and its audit record land together or not at all.
    fn update_stage(
        &self,
        stage: &StageInstance,
        expected_version: u64,
        audit: &StageAction,
    ) -> Result<()>;

    // -- actions ------------------------------------------------------------

    fn append_action(&self, action: &StageAction) -> Result<()>;
    /// Chronological by `performed_at`.
    fn list_actions(&self, stage_id: Uuid) -> Result<Vec<StageAction>>;

    // -- documents ----------------------------------------------------------

    fn insert_document(&self, document: &StageDocument) -> Result<()>;
    fn document(&self, id: Uuid) -> Result<StageDocument>;
    /// Insertion order.
    fn list_documents(&self, stage_id: Uuid) -> Result<Vec<StageDocument>>;
    fn update_document(&self, document: &StageDocument, expected_version: u64) -> Result<()>;

    // -- risk cache ---------------------------------------------------------

    fn put_risk_snapshot(&self, snapshot: &RiskSnapshot) -> Result<()>;
    fn risk_snapshot(&self, stage_id: Uuid) -> Result<Option<RiskSnapshot>>;
}

/// Every stage must belong to `opportunity_id` and every document to one of those stages.
pub(crate) fn check_pipeline(
    opportunity_id: Uuid,
    stages: &[StageInstance],
    documents: &[StageDocument],
) -> Result<()> {
    if let Some(stray) = stages.iter().find(|s| s.opportunity_id != opportunity_id) {
        return Err(OppflowError::InvalidInput(format!(
            "stage {} belongs to opportunity {}, not {opportunity_id}",
            stray.id, stray.opportunity_id
        )));
    }
    if let Some(stray) = documents
        .iter()
        .find(|d| !stages.iter().any(|s| s.id == d.stage_instance_id))
    {
        return Err(OppflowError::InvalidInput(format!(
            "document '{}' points at stage {} outside the pipeline",
            stray.name, stray.stage_instance_id
        )));
    }
    Ok(())
}

pub(crate) fn version_conflict(kind: &str, id: Uuid, expected: u64, found: u64) -> OppflowError {
    OppflowError::Conflict(format!(
        "{kind} {id} was modified concurrently (expected version {expected}, found {found})"
    ))
}

// ---------------------------------------------------------------------------
// Shared contract tests
// ---------------------------------------------------------------------------
