use crate::output::print_json;
use anyhow::Context;
use clap::Subcommand;
use oppflow_core::config::{Config, ConfigWarning, WarnLevel};
use oppflow_core::template::TemplateStore;
use std::path::Path;

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Check config.yaml and templates.yaml for common mistakes
    Validate,
}

pub fn run(root: &Path, subcmd: ConfigSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        ConfigSubcommand::Validate => validate(root, json),
    }
}

fn validate(root: &Path, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;
    let mut warnings = config.validate();

    // Loading re-validates every stage template, so a broken file surfaces here
    // rather than on the next `opportunity create`.
    match TemplateStore::load(root) {
        Ok(store) => {
            for ty in store.list_types().iter().filter(|t| t.is_active) {
                if ty.stages.is_empty() {
                    warnings.push(ConfigWarning {
                        level: WarnLevel::Warning,
                        message: format!(
                            "opportunity type '{}' has no stages; creating one will fail",
                            ty.id
                        ),
                    });
                }
            }
        }
        Err(e) => warnings.push(ConfigWarning {
            level: WarnLevel::Error,
            message: format!("templates: {e}"),
        }),
    }

    if json {
        print_json(&serde_json::json!({ "warnings": warnings }))?;
    } else if warnings.is_empty() {
        println!("Config is valid. No warnings.");
    } else {
        for w in &warnings {
            let prefix = match w.level {
                WarnLevel::Warning => "warning",
                WarnLevel::Error => "error",
            };
            println!("[{prefix}] {}", w.message);
        }
    }

    if warnings.iter().any(|w| w.level == WarnLevel::Error) {
        anyhow::bail!("config validation found errors");
    }
    Ok(())
}
