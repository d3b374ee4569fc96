use crate::output::{print_json, print_table};
use anyhow::Context;
use clap::Subcommand;
use oppflow_core::template::{
    OpportunityType, RequiredAction, RequiredDocument, StageTemplate, TemplateStore,
};
use oppflow_core::types::ActionType;
use std::path::Path;

// ---------------------------------------------------------------------------
// Subcommand types
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum TypeSubcommand {
    /// Create an opportunity type
    Create {
        id: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        description: Option<String>,
        /// Default win probability (0-100) for new opportunities
        #[arg(long, default_value = "50")]
        probability: u8,
        #[arg(long, default_value = "30")]
        duration_days: u32,
    },
    /// Append a stage template to a type
    AddStage {
        type_id: String,
        stage_id: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        order: u32,
        #[arg(long)]
        max_days: u32,
        #[arg(long, default_value = "0")]
        min_days: u32,
        #[arg(long)]
        description: Option<String>,
        /// Not required for the pipeline to finish
        #[arg(long)]
        optional: bool,
        #[arg(long)]
        skippable: bool,
        /// Completion needs a countersigning validator
        #[arg(long)]
        validation: bool,
    },
    /// Publish a new revision of a stage template
    UpdateStage {
        type_id: String,
        stage_id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        order: Option<u32>,
        #[arg(long)]
        max_days: Option<u32>,
        #[arg(long)]
        min_days: Option<u32>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        mandatory: Option<bool>,
        #[arg(long)]
        can_skip: Option<bool>,
        #[arg(long)]
        validation: Option<bool>,
    },
    /// Require an action type on a stage template
    RequireAction {
        type_id: String,
        stage_id: String,
        action_type: ActionType,
        #[arg(long)]
        optional: bool,
        #[arg(long)]
        validation_order: Option<u32>,
    },
    /// Require a document on a stage template
    RequireDocument {
        type_id: String,
        stage_id: String,
        name: String,
        #[arg(long = "type", value_name = "TYPE")]
        document_type: Option<String>,
        #[arg(long)]
        optional: bool,
        #[arg(long)]
        validation_order: Option<u32>,
    },
    /// Stop offering a type for new opportunities
    Deactivate {
        type_id: String,
        /// Re-activate instead
        #[arg(long)]
        undo: bool,
    },
    /// List opportunity types
    List,
    /// Show a type with its stage templates
    Show { type_id: String },
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(root: &Path, subcmd: TypeSubcommand, json: bool) -> anyhow::Result<()> {
    let mut store = TemplateStore::load(root).context("failed to load templates")?;
    match subcmd {
        TypeSubcommand::List => return list(&store, json),
        TypeSubcommand::Show { type_id } => return show(&store, &type_id, json),
        TypeSubcommand::Create {
            id,
            name,
            description,
            probability,
            duration_days,
        } => {
            let mut ty = OpportunityType::new(&id, name);
            ty.description = description;
            ty.default_probability = probability;
            ty.default_duration_days = duration_days;
            store.create_type(ty)?;
            println!("Created type '{id}'");
        }
        TypeSubcommand::AddStage {
            type_id,
            stage_id,
            name,
            order,
            max_days,
            min_days,
            description,
            optional,
            skippable,
            validation,
        } => {
            let mut tmpl = StageTemplate::new(&stage_id, name, order, max_days);
            tmpl.min_duration_days = min_days;
            tmpl.description = description;
            tmpl.is_mandatory = !optional;
            tmpl.can_skip = skippable;
            tmpl.validation_required = validation;
            store.add_stage_template(&type_id, tmpl)?;
            println!("Added stage '{stage_id}' to '{type_id}' at order {order}");
        }
        TypeSubcommand::UpdateStage {
            type_id,
            stage_id,
            name,
            order,
            max_days,
            min_days,
            description,
            mandatory,
            can_skip,
            validation,
        } => {
            let mut tmpl = store
                .get_type(&type_id)?
                .stage(&stage_id)
                .cloned()
                .with_context(|| format!("stage '{stage_id}' not found in '{type_id}'"))?;
            if let Some(v) = name {
                tmpl.name = v;
            }
            if let Some(v) = order {
                tmpl.order = v;
            }
            if let Some(v) = max_days {
                tmpl.max_duration_days = v;
            }
            if let Some(v) = min_days {
                tmpl.min_duration_days = v;
            }
            if description.is_some() {
                tmpl.description = description;
            }
            if let Some(v) = mandatory {
                tmpl.is_mandatory = v;
            }
            if let Some(v) = can_skip {
                tmpl.can_skip = v;
            }
            if let Some(v) = validation {
                tmpl.validation_required = v;
            }
            let revision = store.update_stage_template(&type_id, tmpl)?;
            println!("Stage '{stage_id}' is now at revision {revision}");
        }
        TypeSubcommand::RequireAction {
            type_id,
            stage_id,
            action_type,
            optional,
            validation_order,
        } => {
            let label = action_type.to_string();
            let revision = store.add_required_action(
                &type_id,
                &stage_id,
                RequiredAction {
                    action_type,
                    is_mandatory: !optional,
                    validation_order,
                },
            )?;
            println!("Stage '{stage_id}' now requires {label} (revision {revision})");
        }
        TypeSubcommand::RequireDocument {
            type_id,
            stage_id,
            name,
            document_type,
            optional,
            validation_order,
        } => {
            let doc = RequiredDocument {
                document_type: document_type.unwrap_or_default(),
                is_mandatory: !optional,
                validation_order,
                ..RequiredDocument::mandatory(&name)
            };
            let revision = store.add_required_document(&type_id, &stage_id, doc)?;
            println!("Stage '{stage_id}' now requires document '{name}' (revision {revision})");
        }
        TypeSubcommand::Deactivate { type_id, undo } => {
            store.set_type_active(&type_id, undo)?;
            let state = if undo { "active" } else { "inactive" };
            println!("Type '{type_id}' is now {state}");
        }
    }
    store.save(root).context("failed to save templates")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

fn list(store: &TemplateStore, json: bool) -> anyhow::Result<()> {
    let types = store.list_types();
    if json {
        return print_json(&types);
    }
    if types.is_empty() {
        println!("No opportunity types. Create one with `oppflow type create`.");
        return Ok(());
    }
    let rows = types
        .iter()
        .map(|t| {
            vec![
                t.id.clone(),
                t.name.clone(),
                t.stages.len().to_string(),
                format!("{}d", t.planned_duration_days()),
                if t.is_active { "yes" } else { "no" }.to_string(),
            ]
        })
        .collect();
    print_table(&["ID", "NAME", "STAGES", "PLANNED", "ACTIVE"], rows);
    Ok(())
}

fn show(store: &TemplateStore, type_id: &str, json: bool) -> anyhow::Result<()> {
    let ty = store.get_type(type_id)?;
    if json {
        return print_json(ty);
    }
    println!("{} ({})", ty.name, ty.id);
    if let Some(desc) = &ty.description {
        println!("{desc}");
    }
    println!(
        "probability {}%  planned {}d  {}\n",
        ty.default_probability,
        ty.planned_duration_days(),
        if ty.is_active { "active" } else { "inactive" }
    );
    let rows = ty
        .stages
        .iter()
        .map(|s| {
            let mut flags = Vec::new();
            if !s.is_mandatory {
                flags.push("optional");
            }
            if s.can_skip {
                flags.push("skippable");
            }
            if s.validation_required {
                flags.push("validation");
            }
            let needs: Vec<String> = s
                .required_actions
                .iter()
                .map(|a| a.action_type.to_string())
                .chain(s.required_documents.iter().map(|d| d.name.clone()))
                .collect();
            vec![
                s.order.to_string(),
                s.id.clone(),
                s.name.clone(),
                format!("{}-{}d", s.min_duration_days, s.max_duration_days),
                s.revision.to_string(),
                flags.join(","),
                needs.join(", "),
            ]
        })
        .collect();
    print_table(
        &["#", "ID", "NAME", "DAYS", "REV", "FLAGS", "REQUIRES"],
        rows,
    );
    Ok(())
}
