use crate::cmd::{open_engine, parse_when};
use crate::output::{minute, or_dash, print_json, print_table};
use chrono::{DateTime, Utc};
use clap::Subcommand;
use oppflow_core::ledger::NewAction;
use oppflow_core::types::{ActionOutcome, ActionType};
use std::path::Path;
use uuid::Uuid;

#[derive(Subcommand)]
pub enum ActionSubcommand {
    /// Append an action to a stage's ledger
    Log {
        stage_id: Uuid,
        /// CALL, MEETING, EMAIL, ... or any custom kind
        action_type: ActionType,
        #[arg(required = true)]
        title: Vec<String>,
        #[arg(long, env = "OPPFLOW_ACTOR")]
        by: String,
        #[arg(long, default_value = "SUCCESS")]
        outcome: ActionOutcome,
        /// When it happened (default: now)
        #[arg(long, value_parser = parse_when)]
        at: Option<DateTime<Utc>>,
        #[arg(long)]
        minutes: Option<u32>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        notes: Option<String>,
    },
    /// List a stage's actions, oldest first
    List { stage_id: Uuid },
}

pub fn run(root: &Path, subcmd: ActionSubcommand, json: bool) -> anyhow::Result<()> {
    let engine = open_engine(root)?;
    match subcmd {
        ActionSubcommand::Log {
            stage_id,
            action_type,
            title,
            by,
            outcome,
            at,
            minutes,
            description,
            notes,
        } => {
            let new = NewAction {
                performed_at: at,
                duration_minutes: minutes,
                description,
                notes,
                ..NewAction::new(action_type, title.join(" "), by).with_outcome(outcome)
            };
            let action = engine.log_action(stage_id, new)?;
            if json {
                print_json(&action)?;
            } else {
                println!(
                    "Logged {} '{}' ({})",
                    action.action_type, action.title, action.outcome
                );
            }
        }
        ActionSubcommand::List { stage_id } => {
            let actions = engine.list_actions(stage_id)?;
            if json {
                return print_json(&actions);
            }
            if actions.is_empty() {
                println!("No actions.");
                return Ok(());
            }
            let rows = actions
                .iter()
                .map(|a| {
                    vec![
                        minute(a.performed_at),
                        a.action_type.to_string(),
                        a.title.clone(),
                        a.outcome.to_string(),
                        or_dash(a.performed_by.as_deref()),
                    ]
                })
                .collect();
            print_table(&["WHEN", "TYPE", "TITLE", "OUTCOME", "BY"], rows);
        }
    }
    Ok(())
}
