//! Opportunity types and their ordered stage templates.
//!
//! The [`TemplateStore`] is read-mostly configuration persisted as
//! `.oppflow/templates.yaml`. Every write is validated before it lands, and
//! updating a stage template archives the previous revision so that stage
//! instances keep resolving the exact revision they were created from.

use crate::error::{OppflowError, Result};
use crate::paths;
use crate::types::ActionType;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

// ---------------------------------------------------------------------------
// Requirement declarations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequiredAction {
    pub action_type: ActionType,
    #[serde(default = "default_true")]
    pub is_mandatory: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_order: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequiredDocument {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub document_type: String,
    #[serde(default = "default_true")]
    pub is_mandatory: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_order: Option<u32>,
}

impl RequiredDocument {
    pub fn mandatory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            document_type: String::new(),
            is_mandatory: true,
            validation_order: None,
        }
    }

    /// Falls back to the document name when no explicit type was configured.
    pub fn effective_type(&self) -> &str {
        if self.document_type.is_empty() {
            &self.name
        } else {
            &self.document_type
        }
    }
}

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// StageTemplate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageTemplate {
    pub id: String,
    pub name: String,
    pub order: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub min_duration_days: u32,
    pub max_duration_days: u32,
    #[serde(default = "default_true")]
    pub is_mandatory: bool,
    #[serde(default)]
    pub can_skip: bool,
    #[serde(default)]
    pub validation_required: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_actions: Vec<RequiredAction>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_documents: Vec<RequiredDocument>,
    #[serde(default = "default_revision")]
    pub revision: u32,
}

fn default_revision() -> u32 {
    1
}

impl StageTemplate {
    pub fn new(id: impl Into<String>, name: impl Into<String>, order: u32, max_days: u32) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            order,
            description: None,
            min_duration_days: 0,
            max_duration_days: max_days,
            is_mandatory: true,
            can_skip: false,
            validation_required: false,
            required_actions: Vec::new(),
            required_documents: Vec::new(),
            revision: 1,
        }
    }

    /// Action types that must have at least one successful record before completion.
    pub fn mandatory_action_types(&self) -> impl Iterator<Item = &ActionType> {
        self.required_actions
            .iter()
            .filter(|a| a.is_mandatory)
            .map(|a| &a.action_type)
    }

    /// Checks that only concern this template in isolation.
    pub fn validate(&self) -> Result<()> {
        paths::validate_slug(&self.id)?;
        if self.name.trim().is_empty() {
            return Err(invalid(format!("stage '{}' has an empty name", self.id)));
        }
        if self.order == 0 {
            return Err(invalid(format!("stage '{}': order must be >= 1", self.id)));
        }
        if self.max_duration_days == 0 {
            return Err(invalid(format!(
                "stage '{}': max_duration_days must be >= 1",
                self.id
            )));
        }
        if self.min_duration_days > self.max_duration_days {
            return Err(invalid(format!(
                "stage '{}': min_duration_days ({}) exceeds max_duration_days ({})",
                self.id, self.min_duration_days, self.max_duration_days
            )));
        }

        let mut seen_actions = HashSet::new();
        for action in &self.required_actions {
            if action.action_type.is_system() {
                return Err(invalid(format!(
                    "stage '{}': {} is written by the engine and cannot be required",
                    self.id, action.action_type
                )));
            }
            if !seen_actions.insert(&action.action_type) {
                return Err(invalid(format!(
                    "stage '{}': action {} declared twice",
                    self.id, action.action_type
                )));
            }
        }

        let mut seen_docs = HashSet::new();
        for doc in &self.required_documents {
            if doc.name.trim().is_empty() {
                return Err(invalid(format!(
                    "stage '{}': required document with empty name",
                    self.id
                )));
            }
            if !seen_docs.insert(doc.name.as_str()) {
                return Err(invalid(format!(
                    "stage '{}': document '{}' declared twice",
                    self.id, doc.name
                )));
            }
        }
        Ok(())
    }
}

fn invalid(msg: String) -> OppflowError {
    OppflowError::Validation(msg)
}

// ---------------------------------------------------------------------------
// OpportunityType
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpportunityType {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_probability")]
    pub default_probability: u8,
    #[serde(default = "default_duration")]
    pub default_duration_days: u32,
    #[serde(default = "default_true")]
    pub is_active: bool,
    /// Current revisions, kept sorted by `order`.
    #[serde(default)]
    pub stages: Vec<StageTemplate>,
    /// Superseded revisions still referenced by existing stage instances.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub archived_stages: Vec<StageTemplate>,
}

fn default_probability() -> u8 {
    50
}

fn default_duration() -> u32 {
    30
}

impl OpportunityType {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            default_probability: default_probability(),
            default_duration_days: default_duration(),
            is_active: true,
            stages: Vec::new(),
            archived_stages: Vec::new(),
        }
    }

    pub fn with_stages(mut self, stages: Vec<StageTemplate>) -> Self {
        self.stages = stages;
        self.stages.sort_by_key(|s| s.order);
        self
    }

    pub fn stage(&self, template_id: &str) -> Option<&StageTemplate> {
        self.stages.iter().find(|s| s.id == template_id)
    }

    /// Sum of the maximum bounds: the planned length of a fresh pipeline.
    pub fn planned_duration_days(&self) -> u32 {
        self.stages.iter().map(|s| s.max_duration_days).sum()
    }

    fn validate(&self) -> Result<()> {
        paths::validate_slug(&self.id)?;
        if self.name.trim().is_empty() {
            return Err(invalid(format!("type '{}' has an empty name", self.id)));
        }
        if self.default_probability > 100 {
            return Err(invalid(format!(
                "type '{}': default_probability {} exceeds 100",
                self.id, self.default_probability
            )));
        }
        let mut ids = HashSet::new();
        let mut orders = HashSet::new();
        for stage in &self.stages {
            stage.validate()?;
            if !ids.insert(stage.id.as_str()) {
                return Err(invalid(format!(
                    "type '{}': stage id '{}' is used twice",
                    self.id, stage.id
                )));
            }
            if !orders.insert(stage.order) {
                return Err(invalid(format!(
                    "type '{}': order {} is used by more than one stage",
                    self.id, stage.order
                )));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// TemplateStore
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateStore {
    #[serde(default)]
    pub types: Vec<OpportunityType>,
}

impl TemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::templates_path(root);
        if !path.exists() {
            return Err(OppflowError::NotInitialized);
        }
        let data = std::fs::read_to_string(&path)?;
        Self::from_yaml(&data)
    }

    /// Parse and validate; a hand-edited file with duplicate orders is rejected here.
    pub fn from_yaml(data: &str) -> Result<Self> {
        let mut store: TemplateStore = serde_yaml::from_str(data)?;
        let mut ids = HashSet::new();
        for ty in &mut store.types {
            ty.validate()?;
            if !ids.insert(ty.id.clone()) {
                return Err(invalid(format!("type '{}' is defined twice", ty.id)));
            }
            ty.stages.sort_by_key(|s| s.order);
        }
        Ok(store)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::templates_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    /// Write the store only when no templates file exists yet. Returns true if written.
    pub fn save_if_missing(&self, root: &Path) -> Result<bool> {
        let data = serde_yaml::to_string(self)?;
        crate::io::write_if_missing(&paths::templates_path(root), data.as_bytes())
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub fn get_type(&self, type_id: &str) -> Result<&OpportunityType> {
        self.types
            .iter()
            .find(|t| t.id == type_id)
            .ok_or_else(|| OppflowError::not_found("opportunity type", type_id))
    }

    pub fn list_types(&self) -> &[OpportunityType] {
        &self.types
    }

    /// Current templates of a type, strictly ascending by `order`.
    pub fn list_stage_templates(&self, type_id: &str) -> Result<Vec<&StageTemplate>> {
        let ty = self.get_type(type_id)?;
        let mut stages: Vec<&StageTemplate> = ty.stages.iter().collect();
        stages.sort_by_key(|s| s.order);
        Ok(stages)
    }

    /// Resolve the exact revision a stage instance was created from.
    pub fn stage_template(
        &self,
        type_id: &str,
        template_id: &str,
        revision: u32,
    ) -> Result<&StageTemplate> {
        let ty = self.get_type(type_id)?;
        ty.stages
            .iter()
            .chain(ty.archived_stages.iter())
            .find(|s| s.id == template_id && s.revision == revision)
            .ok_or_else(|| {
                OppflowError::not_found(
                    "stage template",
                    format!("{type_id}/{template_id}@{revision}"),
                )
            })
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    pub fn create_type(&mut self, ty: OpportunityType) -> Result<()> {
        if self.types.iter().any(|t| t.id == ty.id) {
            return Err(invalid(format!("type '{}' already exists", ty.id)));
        }
        let mut ty = ty;
        ty.stages.sort_by_key(|s| s.order);
        ty.validate()?;
        self.types.push(ty);
        Ok(())
    }

    pub fn set_type_active(&mut self, type_id: &str, active: bool) -> Result<()> {
        let ty = self.type_mut(type_id)?;
        ty.is_active = active;
        Ok(())
    }

    pub fn add_stage_template(&mut self, type_id: &str, mut template: StageTemplate) -> Result<()> {
        template.revision = 1;
        template.validate()?;
        let ty = self.type_mut(type_id)?;
        if ty.stages.iter().any(|s| s.id == template.id) {
            return Err(invalid(format!(
                "type '{type_id}': stage '{}' already exists",
                template.id
            )));
        }
        if let Some(clash) = ty.stages.iter().find(|s| s.order == template.order) {
            return Err(invalid(format!(
                "type '{type_id}': order {} is already used by stage '{}'",
                template.order, clash.id
            )));
        }
        if ty.archived_stages.iter().any(|s| s.id == template.id) {
            return Err(invalid(format!(
                "type '{type_id}': stage id '{}' was used before and is still referenced",
                template.id
            )));
        }
        ty.stages.push(template);
        ty.stages.sort_by_key(|s| s.order);
        Ok(())
    }

    /// Replace a template with a new revision; the old one is archived.
    /// Returns the new revision number.
    pub fn update_stage_template(&mut self, type_id: &str, mut template: StageTemplate) -> Result<u32> {
        template.validate()?;
        let ty = self.type_mut(type_id)?;
        let idx = ty
            .stages
            .iter()
            .position(|s| s.id == template.id)
            .ok_or_else(|| {
                OppflowError::not_found("stage template", format!("{type_id}/{}", template.id))
            })?;
        if let Some(clash) = ty
            .stages
            .iter()
            .find(|s| s.order == template.order && s.id != template.id)
        {
            return Err(invalid(format!(
                "type '{type_id}': order {} is already used by stage '{}'",
                template.order, clash.id
            )));
        }
        let previous = ty.stages.remove(idx);
        template.revision = previous.revision + 1;
        let revision = template.revision;
        ty.archived_stages.push(previous);
        ty.stages.push(template);
        ty.stages.sort_by_key(|s| s.order);
        Ok(revision)
    }

    pub fn add_required_action(
        &mut self,
        type_id: &str,
        template_id: &str,
        action: RequiredAction,
    ) -> Result<u32> {
        let mut template = self.current_template(type_id, template_id)?;
        template.required_actions.push(action);
        self.update_stage_template(type_id, template)
    }

    pub fn add_required_document(
        &mut self,
        type_id: &str,
        template_id: &str,
        document: RequiredDocument,
    ) -> Result<u32> {
        let mut template = self.current_template(type_id, template_id)?;
        template.required_documents.push(document);
        self.update_stage_template(type_id, template)
    }

    fn current_template(&self, type_id: &str, template_id: &str) -> Result<StageTemplate> {
        self.get_type(type_id)?
            .stage(template_id)
            .cloned()
            .ok_or_else(|| {
                OppflowError::not_found("stage template", format!("{type_id}/{template_id}"))
            })
    }

    fn type_mut(&mut self, type_id: &str) -> Result<&mut OpportunityType> {
        self.types
            .iter_mut()
            .find(|t| t.id == type_id)
            .ok_or_else(|| OppflowError::not_found("opportunity type", type_id))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn audit_store() -> TemplateStore {
        let mut store = TemplateStore::new();
        store.create_type(OpportunityType::new("audit", "Audit")).unwrap();
        let mut engagement = StageTemplate::new("engagement", "Engagement", 1, 10);
        engagement
            .required_documents
            .push(RequiredDocument::mandatory("Engagement Letter"));
        store.add_stage_template("audit", engagement).unwrap();
        store
            .add_stage_template("audit", StageTemplate::new("fieldwork", "Fieldwork", 2, 15))
            .unwrap();
        store
    }

    #[test]
    fn list_is_ordered_by_order() {
        let mut store = audit_store();
        store
            .add_stage_template("audit", StageTemplate::new("kickoff", "Kick-off", 5, 3))
            .unwrap();
        let ids: Vec<_> = store
            .list_stage_templates("audit")
            .unwrap()
            .iter()
            .map(|s| s.id.as_str())
            .collect();
        assert_eq!(ids, vec!["engagement", "fieldwork", "kickoff"]);
    }

    #[test]
    fn duplicate_order_rejected_at_write_time() {
        let mut store = audit_store();
        let err = store
            .add_stage_template("audit", StageTemplate::new("report", "Report", 2, 5))
            .unwrap_err();
        assert!(matches!(err, OppflowError::Validation(_)), "{err}");
        assert_eq!(store.list_stage_templates("audit").unwrap().len(), 2);
    }

    #[test]
    fn invalid_durations_rejected() {
        let mut store = audit_store();
        let zero = StageTemplate::new("zero", "Zero", 3, 0);
        assert!(store.add_stage_template("audit", zero).is_err());

        let mut inverted = StageTemplate::new("inverted", "Inverted", 3, 5);
        inverted.min_duration_days = 9;
        assert!(store.add_stage_template("audit", inverted).is_err());
    }

    #[test]
    fn system_actions_cannot_be_required() {
        let mut store = audit_store();
        let err = store
            .add_required_action(
                "audit",
                "fieldwork",
                RequiredAction {
                    action_type: ActionType::StageTransition,
                    is_mandatory: true,
                    validation_order: None,
                },
            )
            .unwrap_err();
        assert!(matches!(err, OppflowError::Validation(_)));
    }

    #[test]
    fn missing_type_is_not_found() {
        let store = audit_store();
        assert!(matches!(
            store.get_type("consulting"),
            Err(OppflowError::NotFound { .. })
        ));
        assert!(store.list_stage_templates("consulting").is_err());
    }

    #[test]
    fn update_archives_previous_revision() {
        let mut store = audit_store();
        let rev = store
            .add_required_action(
                "audit",
                "fieldwork",
                RequiredAction {
                    action_type: ActionType::SiteVisit,
                    is_mandatory: true,
                    validation_order: Some(1),
                },
            )
            .unwrap();
        assert_eq!(rev, 2);

        let old = store.stage_template("audit", "fieldwork", 1).unwrap();
        assert!(old.required_actions.is_empty());
        let new = store.stage_template("audit", "fieldwork", 2).unwrap();
        assert_eq!(new.required_actions.len(), 1);
        assert_eq!(store.list_stage_templates("audit").unwrap().len(), 2);
        assert!(store.stage_template("audit", "fieldwork", 3).is_err());
    }

    #[test]
    fn update_cannot_steal_an_order() {
        let mut store = audit_store();
        let mut moved = store.get_type("audit").unwrap().stage("fieldwork").unwrap().clone();
        moved.order = 1;
        assert!(store.update_stage_template("audit", moved).is_err());
    }

    #[test]
    fn duplicate_type_rejected() {
        let mut store = audit_store();
        assert!(store.create_type(OpportunityType::new("audit", "Again")).is_err());
        let mut bad = OpportunityType::new("tax", "Tax");
        bad.default_probability = 120;
        assert!(store.create_type(bad).is_err());
    }

    #[test]
    fn save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = audit_store();
        store.save(dir.path()).unwrap();
        let loaded = TemplateStore::load(dir.path()).unwrap();
        assert_eq!(loaded, store);
        assert_eq!(loaded.get_type("audit").unwrap().planned_duration_days(), 25);
    }

    #[test]
    fn load_without_file_is_not_initialized() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            TemplateStore::load(dir.path()),
            Err(OppflowError::NotInitialized)
        ));
    }

    #[test]
    fn hand_edited_duplicate_order_fails_on_load() {
        let yaml = r#"
types:
  - id: audit
    name: Audit
    stages:
      - { id: a, name: A, order: 1, max_duration_days: 5 }
      - { id: b, name: B, order: 1, max_duration_days: 5 }
"#;
        assert!(matches!(
            TemplateStore::from_yaml(yaml),
            Err(OppflowError::Validation(_))
        ));
    }

    #[test]
    fn yaml_defaults_apply() {
        let yaml = r#"
types:
  - id: audit
    name: Audit
    stages:
      - id: engagement
        name: Engagement
        order: 1
        max_duration_days: 10
        required_documents:
          - name: Engagement Letter
        required_actions:
          - action_type: meeting
"#;
        let store = TemplateStore::from_yaml(yaml).unwrap();
        let ty = store.get_type("audit").unwrap();
        assert_eq!(ty.default_probability, 50);
        let stage = &ty.stages[0];
        assert!(stage.is_mandatory);
        assert!(!stage.can_skip);
        assert_eq!(stage.revision, 1);
        assert!(stage.required_documents[0].is_mandatory);
        assert_eq!(stage.required_documents[0].effective_type(), "Engagement Letter");
        assert_eq!(
            stage.mandatory_action_types().collect::<Vec<_>>(),
            vec![&ActionType::Meeting]
        );
    }
}
