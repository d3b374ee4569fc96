use crate::error::{OppflowError, Result};
use crate::paths;
use crate::risk::{self, RiskParameter, RiskThresholds};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// WorkflowConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Start the next PENDING stage once one is completed or skipped.
    #[serde(default)]
    pub auto_start_next: bool,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

fn default_sweep_interval() -> u64 {
    300
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            auto_start_next: false,
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

// ---------------------------------------------------------------------------
// ProjectConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    pub project: ProjectConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default = "risk::default_parameters")]
    pub risk_parameters: Vec<RiskParameter>,
}

fn default_version() -> u32 {
    1
}

impl Config {
    pub fn new(project_name: impl Into<String>) -> Self {
        Self {
            version: 1,
            project: ProjectConfig {
                name: project_name.into(),
                description: None,
            },
            workflow: WorkflowConfig::default(),
            risk_parameters: risk::default_parameters(),
        }
    }

    pub fn thresholds(&self) -> RiskThresholds {
        RiskThresholds::resolve(&self.risk_parameters)
    }

    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Err(OppflowError::NotInitialized);
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    /// Write the config only when none exists yet. Returns true if written.
    pub fn save_if_missing(&self, root: &Path) -> Result<bool> {
        let data = serde_yaml::to_string(self)?;
        crate::io::write_if_missing(&paths::config_path(root), data.as_bytes())
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        let warn = |message: String| ConfigWarning {
            level: WarnLevel::Warning,
            message,
        };

        let mut seen = HashSet::new();
        for p in &self.risk_parameters {
            if !risk::known_parameter_names().contains(&p.name.as_str()) {
                warnings.push(warn(format!(
                    "unknown risk parameter '{}' is ignored by the evaluator",
                    p.name
                )));
            }
            if p.is_active && !seen.insert(p.name.as_str()) {
                warnings.push(warn(format!(
                    "risk parameter '{}' is defined more than once; the last active entry wins",
                    p.name
                )));
            }
        }

        let t = self.thresholds();
        if !(t.critical_risk_days <= t.high_risk_days && t.high_risk_days <= t.medium_risk_days) {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: format!(
                    "risk thresholds are not ascending (critical={}, high={}, medium={}); \
                     some levels can never be reached",
                    t.critical_risk_days, t.high_risk_days, t.medium_risk_days
                ),
            });
        }
        if t.urgent_priority_days > t.high_priority_days {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: format!(
                    "URGENT_PRIORITY_DAYS ({}) exceeds HIGH_PRIORITY_DAYS ({})",
                    t.urgent_priority_days, t.high_priority_days
                ),
            });
        }

        if self.workflow.sweep_interval_secs < 10 {
            warnings.push(warn(format!(
                "workflow.sweep_interval_secs={} is very short",
                self.workflow.sweep_interval_secs
            )));
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_roundtrip() {
        let cfg = Config::new("acme-bd");
        let yaml = serde_yaml::to_string(&cfg).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.project.name, "acme-bd");
        assert_eq!(parsed.version, 1);
        assert_eq!(parsed.risk_parameters.len(), 5);
        assert!(!parsed.workflow.auto_start_next);
    }

    #[test]
    fn minimal_yaml_gets_defaults() {
        let cfg: Config = serde_yaml::from_str("project:\n  name: acme\n").unwrap();
        assert_eq!(cfg.workflow.sweep_interval_secs, 300);
        assert_eq!(cfg.thresholds(), RiskThresholds::default());
        assert!(cfg.validate().is_empty());
    }

    #[test]
    fn load_missing_is_not_initialized() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            Config::load(dir.path()),
            Err(OppflowError::NotInitialized)
        ));
    }

    #[test]
    fn save_then_load() {
        let dir = TempDir::new().unwrap();
        let mut cfg = Config::new("acme");
        cfg.workflow.auto_start_next = true;
        cfg.save(dir.path()).unwrap();
        let loaded = Config::load(dir.path()).unwrap();
        assert!(loaded.workflow.auto_start_next);
    }

    #[test]
    fn save_if_missing_keeps_existing_config() {
        let dir = TempDir::new().unwrap();
        let mut cfg = Config::new("acme");
        cfg.workflow.sweep_interval_secs = 60;
        assert!(cfg.save_if_missing(dir.path()).unwrap());

        assert!(!Config::new("other").save_if_missing(dir.path()).unwrap());
        let loaded = Config::load(dir.path()).unwrap();
        assert_eq!(loaded.project.name, "acme");
        assert_eq!(loaded.workflow.sweep_interval_secs, 60);
    }

    #[test]
    fn validate_flags_inverted_thresholds() {
        let mut cfg = Config::new("acme");
        risk::set_parameter(&mut cfg.risk_parameters, risk::CRITICAL_RISK_DAYS, 20, true);
        let warnings = cfg.validate();
        assert!(warnings.iter().any(|w| w.level == WarnLevel::Error));
    }

    #[test]
    fn validate_flags_unknown_and_duplicate_names() {
        let mut cfg = Config::new("acme");
        cfg.risk_parameters.push(RiskParameter::new("LOW_RISK_DAYS", 30));
        cfg.risk_parameters.push(RiskParameter::new(risk::HIGH_RISK_DAYS, 8));
        let warnings = cfg.validate();
        assert_eq!(warnings.len(), 2);
        assert!(warnings.iter().all(|w| w.level == WarnLevel::Warning));
    }
}
