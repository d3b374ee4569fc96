use crate::output::{print_json, print_table};
use anyhow::Context;
use clap::Subcommand;
use oppflow_core::config::Config;
use oppflow_core::risk;
use std::path::Path;

#[derive(Subcommand)]
pub enum RiskSubcommand {
    /// Show risk parameters and the thresholds they resolve to
    List,
    /// Set a risk parameter (days)
    Set {
        /// e.g. CRITICAL_RISK_DAYS
        name: String,
        value: i64,
        /// Store the value but let the evaluator fall back to the default
        #[arg(long)]
        inactive: bool,
    },
}

pub fn run(root: &Path, subcmd: RiskSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        RiskSubcommand::List => list(root, json),
        RiskSubcommand::Set {
            name,
            value,
            inactive,
        } => set(root, &name, value, !inactive, json),
    }
}

fn list(root: &Path, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;
    let thresholds = config.thresholds();
    if json {
        return print_json(&serde_json::json!({
            "parameters": config.risk_parameters,
            "thresholds": thresholds,
        }));
    }
    let rows = config
        .risk_parameters
        .iter()
        .map(|p| {
            vec![
                p.name.clone(),
                p.value.to_string(),
                if p.is_active { "yes" } else { "no" }.to_string(),
                p.description.clone().unwrap_or_default(),
            ]
        })
        .collect();
    print_table(&["NAME", "VALUE", "ACTIVE", "DESCRIPTION"], rows);
    println!(
        "\nIn effect: risk critical<={} high<={} medium<={}  priority urgent<={} high<={}",
        thresholds.critical_risk_days,
        thresholds.high_risk_days,
        thresholds.medium_risk_days,
        thresholds.urgent_priority_days,
        thresholds.high_priority_days,
    );
    Ok(())
}

fn set(root: &Path, name: &str, value: i64, active: bool, json: bool) -> anyhow::Result<()> {
    let name = name.trim().to_ascii_uppercase();
    if !risk::known_parameter_names().contains(&name.as_str()) {
        anyhow::bail!(
            "unknown risk parameter '{name}' (expected one of: {})",
            risk::known_parameter_names().join(", ")
        );
    }
    let mut config = Config::load(root).context("failed to load config")?;
    risk::set_parameter(&mut config.risk_parameters, &name, value, active);
    config.save(root).context("failed to save config")?;

    if json {
        print_json(&serde_json::json!({ "name": name, "value": value, "is_active": active }))?;
    } else {
        println!("{name} = {value}{}", if active { "" } else { " (inactive)" });
    }
    for w in config.validate() {
        eprintln!("warning: {}", w.message);
    }
    Ok(())
}
