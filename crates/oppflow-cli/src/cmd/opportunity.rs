use crate::cmd::{open_engine, parse_when};
use crate::output::{day, or_dash, print_json, print_table};
use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::Subcommand;
use oppflow_core::opportunity::NewOpportunity;
use oppflow_core::types::OpportunityStatus;
use std::path::Path;
use uuid::Uuid;

#[derive(Subcommand)]
pub enum OpportunitySubcommand {
    /// Create an opportunity and materialize its pipeline
    Create {
        #[arg(required = true)]
        name: Vec<String>,
        /// Opportunity type id
        #[arg(long = "type", value_name = "TYPE")]
        type_id: String,
        #[arg(long, env = "OPPFLOW_ACTOR")]
        by: String,
        #[arg(long)]
        client: Option<String>,
        /// Estimated amount in minor units (cents)
        #[arg(long)]
        amount: Option<i64>,
        #[arg(long)]
        probability: Option<u8>,
        #[arg(long)]
        owner: Option<String>,
        /// Planned start of the first stage (default: now)
        #[arg(long, value_parser = parse_when)]
        start: Option<DateTime<Utc>>,
    },
    /// List opportunities
    List {
        #[arg(long)]
        status: Option<OpportunityStatus>,
    },
    /// Show one opportunity with its stages
    Show { id: Uuid },
    /// Close an opportunity as WON or LOST
    Close {
        id: Uuid,
        #[arg(long)]
        status: OpportunityStatus,
        #[arg(long, env = "OPPFLOW_ACTOR")]
        by: String,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Delete an opportunity with all its stages, actions, and documents
    Delete { id: Uuid },
}

pub fn run(root: &Path, subcmd: OpportunitySubcommand, json: bool) -> anyhow::Result<()> {
    let engine = open_engine(root)?;
    match subcmd {
        OpportunitySubcommand::Create {
            name,
            type_id,
            by,
            client,
            amount,
            probability,
            owner,
            start,
        } => {
            let new = NewOpportunity {
                client_ref: client,
                estimated_amount: amount,
                probability,
                owner,
                start_date: start,
                ..NewOpportunity::new(name.join(" "), type_id, by)
            };
            let (opp, stages) = engine.create_opportunity(new)?;
            if json {
                print_json(&serde_json::json!({ "opportunity": opp, "stages": stages }))?;
            } else {
                println!("Created opportunity {} ({} stages)", opp.id, stages.len());
                if let Some(first) = stages.first() {
                    println!("Current stage: {} (due {})", first.name, day(first.due_date));
                }
            }
        }
        OpportunitySubcommand::List { status } => {
            let list = engine.list_opportunities(status)?;
            if json {
                return print_json(&list);
            }
            if list.is_empty() {
                println!("No opportunities.");
                return Ok(());
            }
            let rows = list
                .iter()
                .map(|o| {
                    vec![
                        o.id.to_string(),
                        o.name.clone(),
                        o.type_id.clone(),
                        o.status.to_string(),
                        format!("{}%", o.probability),
                        or_dash(o.owner.as_deref()),
                        day(o.last_activity_at),
                    ]
                })
                .collect();
            print_table(
                &["ID", "NAME", "TYPE", "STATUS", "PROB", "OWNER", "ACTIVITY"],
                rows,
            );
        }
        OpportunitySubcommand::Show { id } => {
            let opp = engine.opportunity(id)?;
            let stages = engine.list_stages(id)?;
            if json {
                return print_json(&serde_json::json!({ "opportunity": opp, "stages": stages }));
            }
            println!("{}  [{}]", opp.name, opp.status);
            println!("id:       {}", opp.id);
            println!("type:     {}", opp.type_id);
            println!("client:   {}", or_dash(opp.client_ref.as_deref()));
            println!("owner:    {}", or_dash(opp.owner.as_deref()));
            if let Some(amount) = opp.estimated_amount {
                println!("amount:   {}.{:02}", amount / 100, amount % 100);
            }
            println!("created:  {} by {}", day(opp.created_at), opp.created_by);
            if let Some(reason) = &opp.close_reason {
                println!("closed:   {reason}");
            }
            println!();
            let rows = stages
                .iter()
                .map(|s| {
                    let marker = if Some(s.id) == opp.current_stage_id { "*" } else { "" };
                    vec![
                        format!("{}{}", s.order, marker),
                        s.name.clone(),
                        s.status.to_string(),
                        day(s.due_date),
                        s.id.to_string(),
                    ]
                })
                .collect();
            print_table(&["#", "STAGE", "STATUS", "DUE", "ID"], rows);
        }
        OpportunitySubcommand::Close {
            id,
            status,
            by,
            reason,
        } => {
            let opp = engine.close_opportunity(id, status, &by, reason)?;
            if json {
                print_json(&opp)?;
            } else {
                println!("Opportunity {} closed as {}", opp.id, opp.status);
            }
        }
        OpportunitySubcommand::Delete { id } => {
            engine
                .delete_opportunity(id)
                .with_context(|| format!("failed to delete opportunity {id}"))?;
            if json {
                print_json(&serde_json::json!({ "id": id, "deleted": true }))?;
            } else {
                println!("Deleted opportunity {id}");
            }
        }
    }
    Ok(())
}
