//! Durable storage in a single redb file (`.oppflow/pipeline.db`).
//!
//! # Table design
//!
//! Records are JSON values keyed by their 16 UUID bytes. Parent/child
//! relationships live in index tables with composite big-endian keys so that a
//! prefix range scan returns children already in the right order:
//!
//! ```text
//! stage_index    [ opportunity: 16 | order: u32 BE ]               -> stage id
//! actions        [ stage: 16 | performed_at_ms: u64 BE | id: 16 ]  -> action JSON
//! document_index [ stage: 16 | seq: u32 BE ]                        -> document id
//! ```
//!
//! Every compare-and-swap reads and writes inside one write transaction, so
//! redb's single-writer lock makes it atomic.

use super::{version_conflict, Store};
use crate::error::{OppflowError, Result};
use crate::ledger::{StageAction, StageDocument};
use crate::opportunity::Opportunity;
use crate::risk::RiskSnapshot;
use crate::stage::StageInstance;
use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, TableDefinition, WriteTransaction};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Table definitions
// ---------------------------------------------------------------------------

const OPPORTUNITIES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("opportunities");
const STAGES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("stages");
const STAGE_INDEX: TableDefinition<&[u8], &[u8]> = TableDefinition::new("stage_index");
const ACTIONS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("actions");
const DOCUMENTS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("documents");
const DOCUMENT_INDEX: TableDefinition<&[u8], &[u8]> = TableDefinition::new("document_index");
const RISK_CACHE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("risk_cache");

// ---------------------------------------------------------------------------
// Key helpers
// ---------------------------------------------------------------------------

fn stage_index_key(opportunity_id: Uuid, order: u32) -> [u8; 20] {
    let mut key = [0u8; 20];
    key[..16].copy_from_slice(opportunity_id.as_bytes());
    key[16..].copy_from_slice(&order.to_be_bytes());
    key
}

fn action_key(stage_id: Uuid, at: DateTime<Utc>, id: Uuid) -> [u8; 40] {
    let mut key = [0u8; 40];
    let ms = at.timestamp_millis().max(0) as u64;
    key[..16].copy_from_slice(stage_id.as_bytes());
    key[16..24].copy_from_slice(&ms.to_be_bytes());
    key[24..].copy_from_slice(id.as_bytes());
    key
}

fn document_index_key(stage_id: Uuid, seq: u32) -> [u8; 20] {
    let mut key = [0u8; 20];
    key[..16].copy_from_slice(stage_id.as_bytes());
    key[16..].copy_from_slice(&seq.to_be_bytes());
    key
}

fn uuid_from(bytes: &[u8]) -> Result<Uuid> {
    Uuid::from_slice(bytes).map_err(db_err)
}

fn db_err(e: impl std::fmt::Display) -> OppflowError {
    OppflowError::Storage(e.to_string())
}

// ---------------------------------------------------------------------------
// Table helpers
// ---------------------------------------------------------------------------

type Bytes = &'static [u8];

fn get_json<T: DeserializeOwned>(
    table: &impl ReadableTable<Bytes, Bytes>,
    key: &[u8],
) -> Result<Option<T>> {
    match table.get(key).map_err(db_err)? {
        Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
        None => Ok(None),
    }
}

fn put_json<T: Serialize>(
    table: &mut redb::Table<'_, Bytes, Bytes>,
    key: &[u8],
    value: &T,
) -> Result<()> {
    let data = serde_json::to_vec(value)?;
    table.insert(key, data.as_slice()).map_err(db_err)?;
    Ok(())
}

/// All `(key, value)` pairs whose key starts with `prefix`, in key order.
/// `suffix_len` is the fixed number of key bytes after the prefix.
fn scan_prefix(
    table: &impl ReadableTable<Bytes, Bytes>,
    prefix: &[u8],
    suffix_len: usize,
) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
    let mut lo = prefix.to_vec();
    lo.resize(prefix.len() + suffix_len, 0x00);
    let mut hi = prefix.to_vec();
    hi.resize(prefix.len() + suffix_len, 0xff);

    let mut out = Vec::new();
    for entry in table.range(lo.as_slice()..=hi.as_slice()).map_err(db_err)? {
        let (k, v) = entry.map_err(db_err)?;
        out.push((k.value().to_vec(), v.value().to_vec()));
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Write-transaction helpers
// ---------------------------------------------------------------------------

fn put_new_opportunity(wt: &WriteTransaction, opportunity: &Opportunity) -> Result<()> {
    let mut table = wt.open_table(OPPORTUNITIES).map_err(db_err)?;
    let key = opportunity.id.as_bytes().as_slice();
    if table.get(key).map_err(db_err)?.is_some() {
        return Err(OppflowError::Conflict(format!(
            "opportunity {} already exists",
            opportunity.id
        )));
    }
    put_json(&mut table, key, opportunity)
}

fn put_pipeline(
    wt: &WriteTransaction,
    opportunity_id: Uuid,
    new_stages: &[StageInstance],
    new_documents: &[StageDocument],
) -> Result<()> {
    super::check_pipeline(opportunity_id, new_stages, new_documents)?;
    {
        let opportunities = wt.open_table(OPPORTUNITIES).map_err(db_err)?;
        if opportunities
            .get(opportunity_id.as_bytes().as_slice())
            .map_err(db_err)?
            .is_none()
        {
            return Err(OppflowError::not_found("opportunity", opportunity_id));
        }
    }

    let mut stages = wt.open_table(STAGES).map_err(db_err)?;
    let mut stage_index = wt.open_table(STAGE_INDEX).map_err(db_err)?;
    if !scan_prefix(&stage_index, opportunity_id.as_bytes(), 4)?.is_empty() {
        return Err(OppflowError::Conflict(format!(
            "opportunity {opportunity_id} already has a pipeline"
        )));
    }
    for stage in new_stages {
        put_json(&mut stages, stage.id.as_bytes(), stage)?;
        stage_index
            .insert(
                stage_index_key(opportunity_id, stage.order).as_slice(),
                stage.id.as_bytes().as_slice(),
            )
            .map_err(db_err)?;
    }

    let mut documents = wt.open_table(DOCUMENTS).map_err(db_err)?;
    let mut document_index = wt.open_table(DOCUMENT_INDEX).map_err(db_err)?;
    let mut seq: HashMap<Uuid, u32> = HashMap::new();
    for doc in new_documents {
        let n = seq.entry(doc.stage_instance_id).or_insert(0);
        put_json(&mut documents, doc.id.as_bytes(), doc)?;
        document_index
            .insert(
                document_index_key(doc.stage_instance_id, *n).as_slice(),
                doc.id.as_bytes().as_slice(),
            )
            .map_err(db_err)?;
        *n += 1;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// RedbStore
// ---------------------------------------------------------------------------

pub struct RedbStore {
    db: Database,
}

impl RedbStore {
    /// Open or create the database at `path`, creating every table up front
    /// so read transactions never see a missing table.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            crate::io::ensure_dir(parent)?;
        }
        let db = Database::create(path).map_err(db_err)?;
        let wt = db.begin_write().map_err(db_err)?;
        for def in [
            OPPORTUNITIES,
            STAGES,
            STAGE_INDEX,
            ACTIONS,
            DOCUMENTS,
            DOCUMENT_INDEX,
            RISK_CACHE,
        ] {
            wt.open_table(def).map_err(db_err)?;
        }
        wt.commit().map_err(db_err)?;
        tracing::debug!(path = %path.display(), "opened pipeline database");
        Ok(Self { db })
    }

    /// Run `f` in one write transaction; an error drops (aborts) it.
    fn write<T>(&self, f: impl FnOnce(&WriteTransaction) -> Result<T>) -> Result<T> {
        let wt = self.db.begin_write().map_err(db_err)?;
        let out = f(&wt)?;
        wt.commit().map_err(db_err)?;
        Ok(out)
    }

    fn get<T: DeserializeOwned>(
        &self,
        def: TableDefinition<Bytes, Bytes>,
        key: &[u8],
    ) -> Result<Option<T>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(def).map_err(db_err)?;
        get_json(&table, key)
    }
}

impl Store for RedbStore {
    fn insert_opportunity(&self, opportunity: &Opportunity) -> Result<()> {
        self.write(|wt| put_new_opportunity(wt, opportunity))
    }

    fn create_opportunity(
        &self,
        opportunity: &Opportunity,
        stages: &[StageInstance],
        documents: &[StageDocument],
    ) -> Result<()> {
        self.write(|wt| {
            put_new_opportunity(wt, opportunity)?;
            put_pipeline(wt, opportunity.id, stages, documents)
        })
    }

    fn opportunity(&self, id: Uuid) -> Result<Opportunity> {
        self.get(OPPORTUNITIES, id.as_bytes())?
            .ok_or_else(|| OppflowError::not_found("opportunity", id))
    }

    fn list_opportunities(&self) -> Result<Vec<Opportunity>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(OPPORTUNITIES).map_err(db_err)?;
        let mut result = Vec::new();
        for entry in table.iter().map_err(db_err)? {
            let (_, v) = entry.map_err(db_err)?;
            let opp: Opportunity = serde_json::from_slice(v.value())?;
            result.push(opp);
        }
        result.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(result)
    }

    fn update_opportunity(&self, opportunity: &Opportunity, expected_version: u64) -> Result<()> {
        self.write(|wt| {
            let mut table = wt.open_table(OPPORTUNITIES).map_err(db_err)?;
            let key = opportunity.id.as_bytes().as_slice();
            let current: Opportunity = get_json(&table, key)?
                .ok_or_else(|| OppflowError::not_found("opportunity", opportunity.id))?;
            if current.version != expected_version {
                return Err(version_conflict(
                    "opportunity",
                    opportunity.id,
                    expected_version,
                    current.version,
                ));
            }
            put_json(&mut table, key, opportunity)
        })
    }

    fn record_activity(
        &self,
        opportunity_id: Uuid,
        current_stage_id: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.write(|wt| {
            let mut table = wt.open_table(OPPORTUNITIES).map_err(db_err)?;
            let key = opportunity_id.as_bytes().as_slice();
            let mut opp: Opportunity = get_json(&table, key)?
                .ok_or_else(|| OppflowError::not_found("opportunity", opportunity_id))?;
            if let Some(stage_id) = current_stage_id {
                opp.current_stage_id = Some(stage_id);
            }
            opp.last_activity_at = opp.last_activity_at.max(at);
            opp.version += 1;
            put_json(&mut table, key, &opp)
        })
    }

    fn delete_opportunity(&self, id: Uuid) -> Result<()> {
        self.write(|wt| {
            let mut opportunities = wt.open_table(OPPORTUNITIES).map_err(db_err)?;
            if opportunities
                .remove(id.as_bytes().as_slice())
                .map_err(db_err)?
                .is_none()
            {
                return Err(OppflowError::not_found("opportunity", id));
            }

            let mut stages = wt.open_table(STAGES).map_err(db_err)?;
            let mut stage_index = wt.open_table(STAGE_INDEX).map_err(db_err)?;
            let mut actions = wt.open_table(ACTIONS).map_err(db_err)?;
            let mut documents = wt.open_table(DOCUMENTS).map_err(db_err)?;
            let mut document_index = wt.open_table(DOCUMENT_INDEX).map_err(db_err)?;
            let mut risk = wt.open_table(RISK_CACHE).map_err(db_err)?;

            for (index_key, stage_bytes) in scan_prefix(&stage_index, id.as_bytes(), 4)? {
                stages.remove(stage_bytes.as_slice()).map_err(db_err)?;
                risk.remove(stage_bytes.as_slice()).map_err(db_err)?;
                for (key, _) in scan_prefix(&actions, &stage_bytes, 24)? {
                    actions.remove(key.as_slice()).map_err(db_err)?;
                }
                for (key, doc_bytes) in scan_prefix(&document_index, &stage_bytes, 4)? {
                    documents.remove(doc_bytes.as_slice()).map_err(db_err)?;
                    document_index.remove(key.as_slice()).map_err(db_err)?;
                }
                stage_index.remove(index_key.as_slice()).map_err(db_err)?;
            }
            Ok(())
        })
    }

    fn insert_pipeline(
        &self,
        opportunity_id: Uuid,
        stages: &[StageInstance],
        documents: &[StageDocument],
    ) -> Result<()> {
        self.write(|wt| put_pipeline(wt, opportunity_id, stages, documents))
    }

    fn stage(&self, id: Uuid) -> Result<StageInstance> {
        self.get(STAGES, id.as_bytes())?
            .ok_or_else(|| OppflowError::not_found("stage", id))
    }

    fn list_stages(&self, opportunity_id: Uuid) -> Result<Vec<StageInstance>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let index = rt.open_table(STAGE_INDEX).map_err(db_err)?;
        let stages = rt.open_table(STAGES).map_err(db_err)?;
        let mut result = Vec::new();
        for (_, stage_bytes) in scan_prefix(&index, opportunity_id.as_bytes(), 4)? {
            let stage: StageInstance = get_json(&stages, &stage_bytes)?.ok_or_else(|| {
                OppflowError::Storage(format!(
                    "stage index points at missing stage {}",
                    Uuid::from_slice(&stage_bytes).unwrap_or_default()
                ))
            })?;
            result.push(stage);
        }
        Ok(result)
    }

    fn update_stage(
        &self,
        stage: &StageInstance,
        expected_version: u64,
        audit: &StageAction,
    ) -> Result<()> {
        self.write(|wt| {
            let mut stages = wt.open_table(STAGES).map_err(db_err)?;
            let key = stage.id.as_bytes().as_slice();
            let current: StageInstance =
                get_json(&stages, key)?.ok_or_else(|| OppflowError::not_found("stage", stage.id))?;
            if current.version != expected_version {
                return Err(version_conflict(
                    "stage",
                    stage.id,
                    expected_version,
                    current.version,
                ));
            }
            put_json(&mut stages, key, stage)?;

            let mut actions = wt.open_table(ACTIONS).map_err(db_err)?;
            let akey = action_key(audit.stage_instance_id, audit.performed_at, audit.id);
            put_json(&mut actions, &akey, audit)
        })
    }

    fn append_action(&self, action: &StageAction) -> Result<()> {
        self.write(|wt| {
            let stages = wt.open_table(STAGES).map_err(db_err)?;
            if stages
                .get(action.stage_instance_id.as_bytes().as_slice())
                .map_err(db_err)?
                .is_none()
            {
                return Err(OppflowError::not_found("stage", action.stage_instance_id));
            }
            let mut actions = wt.open_table(ACTIONS).map_err(db_err)?;
            let key = action_key(action.stage_instance_id, action.performed_at, action.id);
            put_json(&mut actions, &key, action)
        })
    }

    fn list_actions(&self, stage_id: Uuid) -> Result<Vec<StageAction>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(ACTIONS).map_err(db_err)?;
        let mut result = Vec::new();
        for (_, v) in scan_prefix(&table, stage_id.as_bytes(), 24)? {
            let action: StageAction = serde_json::from_slice(&v)?;
            result.push(action);
        }
        // Keys only carry millisecond precision.
        result.sort_by_key(|a| a.performed_at);
        Ok(result)
    }

    fn insert_document(&self, document: &StageDocument) -> Result<()> {
        self.write(|wt| {
            let stages = wt.open_table(STAGES).map_err(db_err)?;
            let stage_key = document.stage_instance_id.as_bytes().as_slice();
            if stages.get(stage_key).map_err(db_err)?.is_none() {
                return Err(OppflowError::not_found("stage", document.stage_instance_id));
            }
            let mut documents = wt.open_table(DOCUMENTS).map_err(db_err)?;
            let mut index = wt.open_table(DOCUMENT_INDEX).map_err(db_err)?;
            let seq = scan_prefix(&index, stage_key, 4)?.len() as u32;
            put_json(&mut documents, document.id.as_bytes(), document)?;
            index
                .insert(
                    document_index_key(document.stage_instance_id, seq).as_slice(),
                    document.id.as_bytes().as_slice(),
                )
                .map_err(db_err)?;
            Ok(())
        })
    }

    fn document(&self, id: Uuid) -> Result<StageDocument> {
        self.get(DOCUMENTS, id.as_bytes())?
            .ok_or_else(|| OppflowError::not_found("document", id))
    }

    fn list_documents(&self, stage_id: Uuid) -> Result<Vec<StageDocument>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let index = rt.open_table(DOCUMENT_INDEX).map_err(db_err)?;
        let documents = rt.open_table(DOCUMENTS).map_err(db_err)?;
        let mut result = Vec::new();
        for (_, doc_bytes) in scan_prefix(&index, stage_id.as_bytes(), 4)? {
            let id = uuid_from(&doc_bytes)?;
            let doc: StageDocument = get_json(&documents, &doc_bytes)?
                .ok_or_else(|| OppflowError::Storage(format!("missing document {id}")))?;
            result.push(doc);
        }
        Ok(result)
    }

    fn update_document(&self, document: &StageDocument, expected_version: u64) -> Result<()> {
        self.write(|wt| {
            let mut table = wt.open_table(DOCUMENTS).map_err(db_err)?;
            let key = document.id.as_bytes().as_slice();
            let current: StageDocument = get_json(&table, key)?
                .ok_or_else(|| OppflowError::not_found("document", document.id))?;
            if current.version != expected_version {
                return Err(version_conflict(
                    "document",
                    document.id,
                    expected_version,
                    current.version,
                ));
            }
            put_json(&mut table, key, document)
        })
    }

    fn put_risk_snapshot(&self, snapshot: &RiskSnapshot) -> Result<()> {
        self.write(|wt| {
            let mut table = wt.open_table(RISK_CACHE).map_err(db_err)?;
            put_json(&mut table, snapshot.stage_instance_id.as_bytes(), snapshot)
        })
    }

    fn risk_snapshot(&self, stage_id: Uuid) -> Result<Option<RiskSnapshot>> {
        self.get(RISK_CACHE, stage_id.as_bytes())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::contract::{self, contract_tests};
    use tempfile::TempDir;

    fn open_tmp() -> (TempDir, RedbStore) {
        let dir = TempDir::new().unwrap();
        let store = RedbStore::open(&dir.path().join(".oppflow/pipeline.db")).unwrap();
        (dir, store)
    }

    contract_tests!(open_tmp());

    #[test]
    fn survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pipeline.db");
        let (opp, stages, _) = {
            let store = RedbStore::open(&path).unwrap();
            contract::fixture(&store)
        };
        let store = RedbStore::open(&path).unwrap();
        assert_eq!(store.opportunity(opp.id).unwrap().name, "Acme");
        assert_eq!(store.list_stages(opp.id).unwrap().len(), stages.len());
        assert_eq!(store.list_documents(stages[0].id).unwrap().len(), 2);
    }

    #[test]
    fn keys_sort_by_order_and_time() {
        let opp = Uuid::new_v4();
        assert!(stage_index_key(opp, 2) < stage_index_key(opp, 10));
        let stage = Uuid::new_v4();
        let t = Utc::now();
        assert!(
            action_key(stage, t, Uuid::max())
                < action_key(stage, t + chrono::Duration::milliseconds(1), Uuid::nil())
        );
    }
}
