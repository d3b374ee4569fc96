use crate::error::OppflowError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Upper-snake normalization shared by every enum parser: `in-progress` and
/// `in_progress` both read as `IN_PROGRESS`.
fn normalize(s: &str) -> String {
    s.trim()
        .chars()
        .map(|c| match c {
            '-' | ' ' => '_',
            c => c.to_ascii_uppercase(),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// StageStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageStatus {
    Pending,
    InProgress,
    Completed,
    Skipped,
    Blocked,
}

impl StageStatus {
    pub fn all() -> &'static [StageStatus] {
        &[
            StageStatus::Pending,
            StageStatus::InProgress,
            StageStatus::Completed,
            StageStatus::Skipped,
            StageStatus::Blocked,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StageStatus::Pending => "PENDING",
            StageStatus::InProgress => "IN_PROGRESS",
            StageStatus::Completed => "COMPLETED",
            StageStatus::Skipped => "SKIPPED",
            StageStatus::Blocked => "BLOCKED",
        }
    }

    /// COMPLETED and SKIPPED never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, StageStatus::Completed | StageStatus::Skipped)
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageStatus {
    type Err = OppflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "PENDING" => Ok(StageStatus::Pending),
            "IN_PROGRESS" | "STARTED" => Ok(StageStatus::InProgress),
            "COMPLETED" | "DONE" => Ok(StageStatus::Completed),
            "SKIPPED" => Ok(StageStatus::Skipped),
            "BLOCKED" => Ok(StageStatus::Blocked),
            _ => Err(OppflowError::InvalidInput(format!("unknown stage status '{s}'"))),
        }
    }
}

// ---------------------------------------------------------------------------
// ActionOutcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionOutcome {
    #[default]
    Success,
    Failure,
    Pending,
    Cancelled,
}

impl ActionOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionOutcome::Success => "SUCCESS",
            ActionOutcome::Failure => "FAILURE",
            ActionOutcome::Pending => "PENDING",
            ActionOutcome::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for ActionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionOutcome {
    type Err = OppflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "SUCCESS" => Ok(ActionOutcome::Success),
            "FAILURE" | "FAILED" => Ok(ActionOutcome::Failure),
            "PENDING" => Ok(ActionOutcome::Pending),
            "CANCELLED" | "CANCELED" => Ok(ActionOutcome::Cancelled),
            _ => Err(OppflowError::InvalidInput(format!("unknown action outcome '{s}'"))),
        }
    }
}

// ---------------------------------------------------------------------------
// ValidationStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

impl ValidationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ValidationStatus::Pending => "PENDING",
            ValidationStatus::Approved => "APPROVED",
            ValidationStatus::Rejected => "REJECTED",
        }
    }
}

impl fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValidationStatus {
    type Err = OppflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "PENDING" => Ok(ValidationStatus::Pending),
            "APPROVED" | "VALIDATED" => Ok(ValidationStatus::Approved),
            "REJECTED" => Ok(ValidationStatus::Rejected),
            _ => Err(OppflowError::InvalidInput(format!(
                "unknown validation status '{s}'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// RiskLevel / PriorityLevel
// ---------------------------------------------------------------------------

/// Ordered from calmest to most severe, so `Critical > Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
            RiskLevel::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PriorityLevel {
    Normal,
    High,
    Urgent,
}

impl PriorityLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            PriorityLevel::Normal => "NORMAL",
            PriorityLevel::High => "HIGH",
            PriorityLevel::Urgent => "URGENT",
        }
    }
}

impl fmt::Display for PriorityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// OpportunityStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OpportunityStatus {
    #[default]
    Open,
    Won,
    Lost,
}

impl OpportunityStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OpportunityStatus::Open => "OPEN",
            OpportunityStatus::Won => "WON",
            OpportunityStatus::Lost => "LOST",
        }
    }

    pub fn is_closed(self) -> bool {
        !matches!(self, OpportunityStatus::Open)
    }
}

impl fmt::Display for OpportunityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OpportunityStatus {
    type Err = OppflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "OPEN" => Ok(OpportunityStatus::Open),
            "WON" => Ok(OpportunityStatus::Won),
            "LOST" => Ok(OpportunityStatus::Lost),
            _ => Err(OppflowError::InvalidInput(format!(
                "unknown opportunity status '{s}'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// DocumentSource
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentSource {
    /// Materialized from a template declaration at instantiation.
    Template,
    AdHoc,
}

// ---------------------------------------------------------------------------
// ActionType
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ActionType {
    Call,
    Meeting,
    Email,
    Proposal,
    Presentation,
    SiteVisit,
    FollowUp,
    Note,
    /// Written by the engine on every status change.
    StageTransition,
    /// Written by the sweep when a stage first goes past its due date.
    OverdueAlert,
    /// Written when the opportunity is won or lost.
    PipelineClosed,
    /// Business-specific kind; always stored upper snake case.
    Custom(String),
}

impl ActionType {
    pub fn builtin() -> &'static [ActionType] {
        &[
            ActionType::Call,
            ActionType::Meeting,
            ActionType::Email,
            ActionType::Proposal,
            ActionType::Presentation,
            ActionType::SiteVisit,
            ActionType::FollowUp,
            ActionType::Note,
            ActionType::StageTransition,
            ActionType::OverdueAlert,
            ActionType::PipelineClosed,
        ]
    }

    pub fn as_str(&self) -> &str {
        match self {
            ActionType::Call => "CALL",
            ActionType::Meeting => "MEETING",
            ActionType::Email => "EMAIL",
            ActionType::Proposal => "PROPOSAL",
            ActionType::Presentation => "PRESENTATION",
            ActionType::SiteVisit => "SITE_VISIT",
            ActionType::FollowUp => "FOLLOW_UP",
            ActionType::Note => "NOTE",
            ActionType::StageTransition => "STAGE_TRANSITION",
            ActionType::OverdueAlert => "OVERDUE_ALERT",
            ActionType::PipelineClosed => "PIPELINE_CLOSED",
            ActionType::Custom(s) => s,
        }
    }

    /// Engine-written kinds; callers cannot log these by hand.
    pub fn is_system(&self) -> bool {
        matches!(
            self,
            ActionType::StageTransition | ActionType::OverdueAlert | ActionType::PipelineClosed
        )
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = OppflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = normalize(s);
        if key.is_empty() {
            return Err(OppflowError::InvalidInput("empty action type".to_string()));
        }
        if let Some(known) = Self::builtin().iter().find(|a| a.as_str() == key) {
            return Ok(known.clone());
        }
        if !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(OppflowError::InvalidInput(format!("invalid action type '{s}'")));
        }
        Ok(ActionType::Custom(key))
    }
}

impl TryFrom<String> for ActionType {
    type Error = OppflowError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ActionType> for String {
    fn from(value: ActionType) -> Self {
        value.as_str().to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
