use crate::cmd::{open_engine, parse_when};
use crate::output::{day, or_dash, print_json, print_table};
use chrono::{DateTime, Utc};
use clap::Subcommand;
use oppflow_core::ledger::{NewDocument, StageDocument};
use oppflow_core::types::ValidationStatus;
use std::path::Path;
use uuid::Uuid;

#[derive(Subcommand)]
pub enum DocSubcommand {
    /// Add an ad-hoc document to a stage
    Add {
        stage_id: Uuid,
        #[arg(required = true)]
        name: Vec<String>,
        #[arg(long = "type", value_name = "TYPE")]
        document_type: Option<String>,
        /// Gate stage completion on this document
        #[arg(long)]
        required: bool,
    },
    /// Mark a document as provided
    Provide {
        document_id: Uuid,
        #[arg(long, env = "OPPFLOW_ACTOR")]
        by: String,
        #[arg(long, value_parser = parse_when)]
        at: Option<DateTime<Utc>>,
    },
    /// Approve a provided document
    Approve {
        document_id: Uuid,
        #[arg(long, env = "OPPFLOW_ACTOR")]
        by: String,
        #[arg(long, value_parser = parse_when)]
        at: Option<DateTime<Utc>>,
    },
    /// Reject a provided document
    Reject {
        document_id: Uuid,
        #[arg(long, env = "OPPFLOW_ACTOR")]
        by: String,
        #[arg(long)]
        reason: Option<String>,
        #[arg(long, value_parser = parse_when)]
        at: Option<DateTime<Utc>>,
    },
    /// List a stage's documents
    List { stage_id: Uuid },
}

pub fn run(root: &Path, subcmd: DocSubcommand, json: bool) -> anyhow::Result<()> {
    let engine = open_engine(root)?;
    let doc = match subcmd {
        DocSubcommand::List { stage_id } => {
            return list(&engine.list_documents(stage_id)?, json);
        }
        DocSubcommand::Add {
            stage_id,
            name,
            document_type,
            required,
        } => {
            let new = NewDocument {
                document_type,
                is_required: required,
                ..NewDocument::new(name.join(" "))
            };
            engine.record_document(stage_id, new)?
        }
        DocSubcommand::Provide { document_id, by, at } => {
            engine.mark_provided(document_id, &by, at)?
        }
        DocSubcommand::Approve { document_id, by, at } => {
            engine.validate_document(document_id, &by, ValidationStatus::Approved, None, at)?
        }
        DocSubcommand::Reject {
            document_id,
            by,
            reason,
            at,
        } => engine.validate_document(document_id, &by, ValidationStatus::Rejected, reason, at)?,
    };

    if json {
        print_json(&doc)?;
    } else {
        println!("{} '{}' ({})", state_label(&doc), doc.name, doc.id);
    }
    Ok(())
}

fn state_label(doc: &StageDocument) -> &'static str {
    match (doc.is_provided, doc.validation_status) {
        (false, _) => "Expecting",
        (true, ValidationStatus::Pending) => "Provided",
        (true, ValidationStatus::Approved) => "Approved",
        (true, ValidationStatus::Rejected) => "Rejected",
    }
}

fn list(docs: &[StageDocument], json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(&docs);
    }
    if docs.is_empty() {
        println!("No documents.");
        return Ok(());
    }
    let rows = docs
        .iter()
        .map(|d| {
            vec![
                d.name.clone(),
                if d.is_required { "yes" } else { "no" }.to_string(),
                state_label(d).to_lowercase(),
                d.provided_at.map(day).unwrap_or_else(|| "-".into()),
                or_dash(d.rejection_reason.as_deref()),
                d.id.to_string(),
            ]
        })
        .collect();
    print_table(&["NAME", "REQUIRED", "STATE", "PROVIDED", "REASON", "ID"], rows);
    Ok(())
}
