use crate::error::{OppflowError, Result};
use crate::template::OpportunityType;
use crate::types::OpportunityStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Opportunity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: Uuid,
    pub name: String,
    /// Fixed at creation; the pipeline is materialized from this type.
    pub type_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ref: Option<String>,
    /// Minor currency units.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_amount: Option<i64>,
    pub probability: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    pub created_by: String,
    pub status: OpportunityStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_stage_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub close_reason: Option<String>,
    pub version: u64,
}

impl Opportunity {
    pub fn is_open(&self) -> bool {
        !self.status.is_closed()
    }

    pub fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(OppflowError::State(format!(
                "opportunity '{}' is {}",
                self.name, self.status
            )))
        }
    }

    /// Mark WON or LOST. Bumps the version; the caller persists with the old one.
    pub fn close(
        &mut self,
        status: OpportunityStatus,
        reason: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        if status == OpportunityStatus::Open {
            return Err(OppflowError::InvalidInput(
                "an opportunity can only be closed as WON or LOST".into(),
            ));
        }
        self.ensure_open()?;
        self.status = status;
        self.closed_at = Some(at);
        self.close_reason = reason;
        self.last_activity_at = at;
        if status == OpportunityStatus::Won {
            self.probability = 100;
        } else {
            self.probability = 0;
        }
        self.version += 1;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// NewOpportunity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOpportunity {
    pub name: String,
    pub type_id: String,
    pub created_by: String,
    #[serde(default)]
    pub client_ref: Option<String>,
    #[serde(default)]
    pub estimated_amount: Option<i64>,
    /// Falls back to the type's default probability.
    #[serde(default)]
    pub probability: Option<u8>,
    #[serde(default)]
    pub owner: Option<String>,
    /// Planned start of the first stage; defaults to the creation time.
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
}

impl NewOpportunity {
    pub fn new(
        name: impl Into<String>,
        type_id: impl Into<String>,
        created_by: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            type_id: type_id.into(),
            created_by: created_by.into(),
            client_ref: None,
            estimated_amount: None,
            probability: None,
            owner: None,
            start_date: None,
        }
    }

    pub(crate) fn into_opportunity(
        self,
        ty: &OpportunityType,
        now: DateTime<Utc>,
    ) -> Result<Opportunity> {
        if self.name.trim().is_empty() {
            return Err(OppflowError::InvalidInput("opportunity name is empty".into()));
        }
        if self.created_by.trim().is_empty() {
            return Err(OppflowError::InvalidInput("created_by is empty".into()));
        }
        let probability = self.probability.unwrap_or(ty.default_probability);
        if probability > 100 {
            return Err(OppflowError::InvalidInput(format!(
                "probability {probability} exceeds 100"
            )));
        }
        if matches!(self.estimated_amount, Some(a) if a < 0) {
            return Err(OppflowError::InvalidInput("estimated amount is negative".into()));
        }
        Ok(Opportunity {
            id: Uuid::new_v4(),
            name: self.name,
            type_id: ty.id.clone(),
            client_ref: self.client_ref,
            estimated_amount: self.estimated_amount,
            probability,
            owner: self.owner,
            created_by: self.created_by,
            status: OpportunityStatus::Open,
            current_stage_id: None,
            created_at: now,
            last_activity_at: now,
            closed_at: None,
            close_reason: None,
            version: 1,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probability_defaults_from_type() {
        let mut ty = OpportunityType::new("audit", "Audit");
        ty.default_probability = 35;
        let opp = NewOpportunity::new("Acme FY26 audit", "audit", "alice")
            .into_opportunity(&ty, Utc::now())
            .unwrap();
        assert_eq!(opp.probability, 35);
        assert_eq!(opp.status, OpportunityStatus::Open);
        assert_eq!(opp.version, 1);
    }

    #[test]
    fn rejects_bad_input() {
        let ty = OpportunityType::new("audit", "Audit");
        let blank = NewOpportunity::new("  ", "audit", "alice");
        assert!(blank.into_opportunity(&ty, Utc::now()).is_err());

        let mut over = NewOpportunity::new("Acme", "audit", "alice");
        over.probability = Some(101);
        assert!(over.into_opportunity(&ty, Utc::now()).is_err());
    }

    #[test]
    fn close_only_once() {
        let ty = OpportunityType::new("audit", "Audit");
        let mut opp = NewOpportunity::new("Acme", "audit", "alice")
            .into_opportunity(&ty, Utc::now())
            .unwrap();
        assert!(opp
            .close(OpportunityStatus::Open, None, Utc::now())
            .is_err());
        opp.close(OpportunityStatus::Lost, Some("budget cut".into()), Utc::now())
            .unwrap();
        assert_eq!(opp.probability, 0);
        assert_eq!(opp.version, 2);
        let err = opp
            .close(OpportunityStatus::Won, None, Utc::now())
            .unwrap_err();
        assert!(matches!(err, OppflowError::State(_)));
    }
}
