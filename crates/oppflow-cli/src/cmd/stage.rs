use crate::cmd::open_engine;
use crate::output::{day, or_dash, print_json};
use clap::{Args, Subcommand};
use oppflow_core::types::StageStatus;
use oppflow_core::{Engine, TransitionRequest};
use std::path::Path;
use uuid::Uuid;

/// Fields shared by every transition command.
#[derive(Args)]
pub struct TransitionArgs {
    pub stage_id: Uuid,
    #[arg(long, env = "OPPFLOW_ACTOR")]
    pub by: String,
    #[arg(long)]
    pub notes: Option<String>,
    /// Fail with a conflict unless the stage is still at this version
    #[arg(long)]
    pub expect_version: Option<u64>,
}

#[derive(Subcommand)]
pub enum StageSubcommand {
    /// Show a stage with its risk and outstanding deliverables
    Show { stage_id: Uuid },
    /// PENDING -> IN_PROGRESS
    Start(TransitionArgs),
    /// IN_PROGRESS -> COMPLETED (or awaiting validation)
    Complete {
        #[command(flatten)]
        args: TransitionArgs,
        /// Countersign in the same step
        #[arg(long)]
        validated_by: Option<String>,
    },
    /// Skip a skippable stage
    Skip(TransitionArgs),
    /// Block a stage; --notes carries the reason
    Block(TransitionArgs),
    /// BLOCKED -> IN_PROGRESS
    Unblock(TransitionArgs),
    /// Countersign a stage awaiting validation
    Validate {
        stage_id: Uuid,
        #[arg(long, env = "OPPFLOW_ACTOR")]
        by: String,
    },
}

pub fn run(root: &Path, subcmd: StageSubcommand, json: bool) -> anyhow::Result<()> {
    let engine = open_engine(root)?;
    let stage = match subcmd {
        StageSubcommand::Show { stage_id } => return show(&engine, stage_id, json),
        StageSubcommand::Start(args) | StageSubcommand::Unblock(args) => {
            transition(&engine, args, StageStatus::InProgress, None)?
        }
        StageSubcommand::Complete { args, validated_by } => {
            transition(&engine, args, StageStatus::Completed, validated_by)?
        }
        StageSubcommand::Skip(args) => transition(&engine, args, StageStatus::Skipped, None)?,
        StageSubcommand::Block(args) => transition(&engine, args, StageStatus::Blocked, None)?,
        StageSubcommand::Validate { stage_id, by } => engine.validate_stage(stage_id, &by)?,
    };

    if json {
        return print_json(&stage);
    }
    if stage.pending_validation {
        println!("Stage '{}' is awaiting validation", stage.name);
    } else {
        println!("Stage '{}' is now {}", stage.name, stage.status);
    }
    let opp = engine.opportunity(stage.opportunity_id)?;
    if opp.is_open() {
        if let Some(current) = opp.current_stage_id.filter(|id| *id != stage.id) {
            let next = engine.stage(current)?;
            println!("Current stage: {} ({})", next.name, next.status);
        }
    } else {
        println!("Opportunity closed as {}", opp.status);
    }
    Ok(())
}

fn transition(
    engine: &Engine,
    args: TransitionArgs,
    target: StageStatus,
    validated_by: Option<String>,
) -> anyhow::Result<oppflow_core::stage::StageInstance> {
    let mut req = TransitionRequest::new(target, args.by);
    req.notes = args.notes;
    req.expected_version = args.expect_version;
    req.validated_by = validated_by;
    Ok(engine.transition(args.stage_id, req)?)
}

fn show(engine: &Engine, stage_id: Uuid, json: bool) -> anyhow::Result<()> {
    let stage = engine.stage(stage_id)?;
    let risk = engine.evaluate_stage(stage_id)?;
    let missing = engine.missing_deliverables(stage_id)?;
    if json {
        return print_json(&serde_json::json!({
            "stage": stage,
            "risk": risk,
            "missing": missing,
        }));
    }
    println!("{} (#{})  [{}]", stage.name, stage.order, stage.status);
    println!("id:        {}", stage.id);
    println!("version:   {}", stage.version);
    println!("planned:   {} -> {}", day(stage.start_date), day(stage.due_date));
    if let Some(at) = stage.started_at {
        println!("started:   {}", day(at));
    }
    if let Some(at) = stage.completed_date {
        println!("completed: {}", day(at));
    }
    if stage.pending_validation {
        println!("validation: pending");
    } else if let Some(by) = &stage.validated_by {
        println!("validated: by {by}");
    }
    println!("notes:     {}", or_dash(stage.notes.as_deref()));
    println!(
        "risk:      {} / priority {} ({} days remaining)",
        risk.risk_level, risk.priority_level, risk.days_remaining
    );
    if missing.is_empty() {
        println!("deliverables: complete");
    } else {
        println!("deliverables missing:");
        for m in &missing {
            println!("  - {m}");
        }
    }
    Ok(())
}
