//! Time-based risk and priority classification.
//!
//! Everything here is a pure function of the stage, "now" and the configured
//! thresholds. Persisted [`RiskSnapshot`]s written by the sweep are a cache for
//! fast listing; [`evaluate`] is always the source of truth.

use crate::stage::StageInstance;
use crate::types::{PriorityLevel, RiskLevel};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Parameter names
// ---------------------------------------------------------------------------

pub const CRITICAL_RISK_DAYS: &str = "CRITICAL_RISK_DAYS";
pub const HIGH_RISK_DAYS: &str = "HIGH_RISK_DAYS";
pub const MEDIUM_RISK_DAYS: &str = "MEDIUM_RISK_DAYS";
pub const URGENT_PRIORITY_DAYS: &str = "URGENT_PRIORITY_DAYS";
pub const HIGH_PRIORITY_DAYS: &str = "HIGH_PRIORITY_DAYS";

pub fn known_parameter_names() -> &'static [&'static str] {
    &[
        CRITICAL_RISK_DAYS,
        HIGH_RISK_DAYS,
        MEDIUM_RISK_DAYS,
        URGENT_PRIORITY_DAYS,
        HIGH_PRIORITY_DAYS,
    ]
}

const SECONDS_PER_DAY: i64 = 86_400;

// ---------------------------------------------------------------------------
// RiskParameter
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskParameter {
    pub name: String,
    /// Threshold in whole days.
    pub value: i64,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_active() -> bool {
    true
}

impl RiskParameter {
    pub fn new(name: impl Into<String>, value: i64) -> Self {
        Self {
            name: name.into(),
            value,
            is_active: true,
            description: None,
        }
    }
}

/// The parameter set written by `oppflow init`.
pub fn default_parameters() -> Vec<RiskParameter> {
    let t = RiskThresholds::default();
    vec![
        RiskParameter {
            description: Some("days remaining at or below which a stage is CRITICAL".into()),
            ..RiskParameter::new(CRITICAL_RISK_DAYS, t.critical_risk_days)
        },
        RiskParameter {
            description: Some("days remaining at or below which a stage is HIGH risk".into()),
            ..RiskParameter::new(HIGH_RISK_DAYS, t.high_risk_days)
        },
        RiskParameter {
            description: Some("days remaining at or below which a stage is MEDIUM risk".into()),
            ..RiskParameter::new(MEDIUM_RISK_DAYS, t.medium_risk_days)
        },
        RiskParameter {
            description: Some("days remaining at or below which a stage is URGENT".into()),
            ..RiskParameter::new(URGENT_PRIORITY_DAYS, t.urgent_priority_days)
        },
        RiskParameter {
            description: Some("days remaining at or below which a stage is HIGH priority".into()),
            ..RiskParameter::new(HIGH_PRIORITY_DAYS, t.high_priority_days)
        },
    ]
}

/// Insert or replace a parameter by name.
pub fn set_parameter(params: &mut Vec<RiskParameter>, name: &str, value: i64, is_active: bool) {
    match params.iter_mut().find(|p| p.name == name) {
        Some(p) => {
            p.value = value;
            p.is_active = is_active;
        }
        None => params.push(RiskParameter {
            is_active,
            ..RiskParameter::new(name, value)
        }),
    }
}

// ---------------------------------------------------------------------------
// RiskThresholds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskThresholds {
    pub critical_risk_days: i64,
    pub high_risk_days: i64,
    pub medium_risk_days: i64,
    pub urgent_priority_days: i64,
    pub high_priority_days: i64,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            critical_risk_days: 3,
            high_risk_days: 7,
            medium_risk_days: 14,
            urgent_priority_days: 2,
            high_priority_days: 5,
        }
    }
}

impl RiskThresholds {
    /// Read thresholds by name. Missing or inactive parameters fall back to
    /// the defaults; this never fails.
    pub fn resolve(params: &[RiskParameter]) -> Self {
        let defaults = Self::default();
        let lookup = |name: &str, fallback: i64| {
            params
                .iter()
                .rev()
                .find(|p| p.is_active && p.name == name)
                .map(|p| p.value)
                .unwrap_or(fallback)
        };
        Self {
            critical_risk_days: lookup(CRITICAL_RISK_DAYS, defaults.critical_risk_days),
            high_risk_days: lookup(HIGH_RISK_DAYS, defaults.high_risk_days),
            medium_risk_days: lookup(MEDIUM_RISK_DAYS, defaults.medium_risk_days),
            urgent_priority_days: lookup(URGENT_PRIORITY_DAYS, defaults.urgent_priority_days),
            high_priority_days: lookup(HIGH_PRIORITY_DAYS, defaults.high_priority_days),
        }
    }

    pub fn classify_risk(&self, days_remaining: i64) -> RiskLevel {
        if days_remaining <= self.critical_risk_days {
            RiskLevel::Critical
        } else if days_remaining <= self.high_risk_days {
            RiskLevel::High
        } else if days_remaining <= self.medium_risk_days {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    pub fn classify_priority(&self, days_remaining: i64) -> PriorityLevel {
        if days_remaining <= self.urgent_priority_days {
            PriorityLevel::Urgent
        } else if days_remaining <= self.high_priority_days {
            PriorityLevel::High
        } else {
            PriorityLevel::Normal
        }
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Whole days until `due`, rounded up; negative once overdue.
pub fn days_remaining(due: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let secs = (due - now).num_seconds();
    let days = secs / SECONDS_PER_DAY;
    if secs % SECONDS_PER_DAY > 0 {
        days + 1
    } else {
        days
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub risk_level: RiskLevel,
    pub priority_level: PriorityLevel,
    pub days_remaining: i64,
}

pub fn evaluate(
    stage: &StageInstance,
    now: DateTime<Utc>,
    thresholds: &RiskThresholds,
) -> RiskAssessment {
    let days = days_remaining(stage.due_date, now);
    if stage.status.is_terminal() {
        return RiskAssessment {
            risk_level: RiskLevel::Low,
            priority_level: PriorityLevel::Normal,
            days_remaining: days,
        };
    }
    RiskAssessment {
        risk_level: thresholds.classify_risk(days),
        priority_level: thresholds.classify_priority(days),
        days_remaining: days,
    }
}

// ---------------------------------------------------------------------------
// RiskSnapshot (sweep cache)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskSnapshot {
    pub stage_instance_id: Uuid,
    pub opportunity_id: Uuid,
    #[serde(flatten)]
    pub assessment: RiskAssessment,
    pub evaluated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::StageTemplate;
    use crate::types::StageStatus;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
    }

    fn stage_due_in(days: i64, status: StageStatus) -> StageInstance {
        let tmpl = StageTemplate::new("qualification", "Qualification", 1, 30);
        let mut s =
            StageInstance::from_template(Uuid::new_v4(), &tmpl, now() - Duration::days(30), now());
        s.due_date = now() + Duration::days(days);
        s.status = status;
        s
    }

    #[test]
    fn risk_is_monotonic_in_days_remaining() {
        let t = RiskThresholds::resolve(&default_parameters());
        assert_eq!(t.classify_risk(2), RiskLevel::Critical);
        assert_eq!(t.classify_risk(5), RiskLevel::High);
        assert_eq!(t.classify_risk(10), RiskLevel::Medium);
        assert_eq!(t.classify_risk(30), RiskLevel::Low);

        let mut last = RiskLevel::Critical;
        for days in -5..40 {
            let level = t.classify_risk(days);
            assert!(level <= last, "risk rose from {last} to {level} at {days} days");
            last = level;
        }
    }

    #[test]
    fn priority_thresholds() {
        let t = RiskThresholds::default();
        assert_eq!(t.classify_priority(-1), PriorityLevel::Urgent);
        assert_eq!(t.classify_priority(2), PriorityLevel::Urgent);
        assert_eq!(t.classify_priority(4), PriorityLevel::High);
        assert_eq!(t.classify_priority(6), PriorityLevel::Normal);
    }

    #[test]
    fn missing_or_inactive_parameters_fall_back() {
        let mut params = vec![RiskParameter {
            is_active: false,
            ..RiskParameter::new(CRITICAL_RISK_DAYS, 0)
        }];
        let t = RiskThresholds::resolve(&params);
        assert_eq!(t.critical_risk_days, 3);
        assert_eq!(t.classify_risk(1), RiskLevel::Critical);

        params.clear();
        let t = RiskThresholds::resolve(&params);
        assert_eq!(t, RiskThresholds::default());
    }

    #[test]
    fn active_parameters_override_defaults() {
        let params = vec![
            RiskParameter::new(CRITICAL_RISK_DAYS, 1),
            RiskParameter::new(URGENT_PRIORITY_DAYS, 0),
        ];
        let t = RiskThresholds::resolve(&params);
        assert_eq!(t.classify_risk(2), RiskLevel::High);
        assert_eq!(t.classify_priority(1), PriorityLevel::High);
    }

    #[test]
    fn set_parameter_replaces_by_name() {
        let mut params = default_parameters();
        set_parameter(&mut params, HIGH_RISK_DAYS, 10, true);
        set_parameter(&mut params, "CUSTOM_DAYS", 4, false);
        assert_eq!(params.len(), 6);
        assert_eq!(RiskThresholds::resolve(&params).high_risk_days, 10);
    }

    #[test]
    fn days_remaining_rounds_up() {
        let n = now();
        assert_eq!(days_remaining(n + Duration::days(2), n), 2);
        assert_eq!(days_remaining(n + Duration::hours(25), n), 2);
        assert_eq!(days_remaining(n + Duration::hours(1), n), 1);
        assert_eq!(days_remaining(n, n), 0);
        assert_eq!(days_remaining(n - Duration::hours(12), n), 0);
        assert_eq!(days_remaining(n - Duration::hours(36), n), -1);
    }

    #[test]
    fn terminal_stages_are_calm() {
        let t = RiskThresholds::default();
        let done = stage_due_in(-10, StageStatus::Completed);
        let a = evaluate(&done, now(), &t);
        assert_eq!(a.risk_level, RiskLevel::Low);
        assert_eq!(a.priority_level, PriorityLevel::Normal);

        let late = stage_due_in(-10, StageStatus::InProgress);
        let a = evaluate(&late, now(), &t);
        assert_eq!(a.risk_level, RiskLevel::Critical);
        assert_eq!(a.priority_level, PriorityLevel::Urgent);
        assert_eq!(a.days_remaining, -10);
    }

    #[test]
    fn snapshot_serializes_flat() {
        let snap = RiskSnapshot {
            stage_instance_id: Uuid::nil(),
            opportunity_id: Uuid::nil(),
            assessment: RiskAssessment {
                risk_level: RiskLevel::High,
                priority_level: PriorityLevel::Normal,
                days_remaining: 6,
            },
            evaluated_at: now(),
        };
        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["risk_level"], "HIGH");
        assert_eq!(json["days_remaining"], 6);
    }
}
