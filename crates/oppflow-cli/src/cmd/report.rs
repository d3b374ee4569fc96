use crate::cmd::open_engine;
use crate::output::{day, minute, print_json, print_table};
use oppflow_core::report::TimelineEvent;
use std::path::Path;
use uuid::Uuid;

/// `oppflow pipeline <id>`
pub fn pipeline(root: &Path, opportunity_id: Uuid, json: bool) -> anyhow::Result<()> {
    let engine = open_engine(root)?;
    let stages = engine.list_pipeline(opportunity_id)?;
    if json {
        return print_json(&stages);
    }
    let rows = stages
        .iter()
        .map(|p| {
            let status = if p.stage.pending_validation {
                "AWAITING_VALIDATION".to_string()
            } else {
                p.stage.status.to_string()
            };
            let due = if p.is_overdue {
                format!("{} (overdue)", day(p.stage.due_date))
            } else {
                day(p.stage.due_date)
            };
            let d = &p.deliverables;
            vec![
                p.stage.order.to_string(),
                p.stage.name.clone(),
                status,
                due,
                p.risk.days_remaining.to_string(),
                p.risk.risk_level.to_string(),
                p.risk.priority_level.to_string(),
                format!("{}/{}", d.documents_satisfied, d.documents_required),
                d.missing.len().to_string(),
            ]
        })
        .collect();
    print_table(
        &["#", "STAGE", "STATUS", "DUE", "DAYS", "RISK", "PRIORITY", "DOCS", "MISSING"],
        rows,
    );
    Ok(())
}

/// `oppflow stats <id>`
pub fn stats(root: &Path, opportunity_id: Uuid, json: bool) -> anyhow::Result<()> {
    let engine = open_engine(root)?;
    let s = engine.pipeline_stats(opportunity_id)?;
    if json {
        return print_json(&s);
    }
    println!("stages:       {}", s.total_stages);
    println!(
        "by status:    {} pending, {} in progress, {} completed, {} skipped, {} blocked",
        s.pending, s.in_progress, s.completed, s.skipped, s.blocked
    );
    println!("awaiting validation: {}", s.awaiting_validation);
    println!(
        "risk:         {} critical, {} high; {} urgent",
        s.critical_risk, s.high_risk, s.urgent_priority
    );
    println!("overdue:      {}", s.overdue);
    println!("completion:   {}%", s.completion_percent);
    Ok(())
}

/// `oppflow history <id>`
pub fn history(root: &Path, opportunity_id: Uuid, json: bool) -> anyhow::Result<()> {
    let engine = open_engine(root)?;
    let entries = engine.history(opportunity_id)?;
    if json {
        return print_json(&entries);
    }
    if entries.is_empty() {
        println!("No history yet.");
        return Ok(());
    }
    let rows = entries
        .iter()
        .map(|e| {
            let (what, who) = match &e.event {
                TimelineEvent::Action {
                    action_type,
                    title,
                    outcome,
                    performed_by,
                    ..
                } => (
                    format!("{action_type}: {title} [{outcome}]"),
                    Some(performed_by.clone().unwrap_or_else(|| "system".into())),
                ),
                TimelineEvent::DocumentAdded { name, .. } => {
                    (format!("document '{name}' added"), None)
                }
                TimelineEvent::DocumentProvided { name, by, .. } => {
                    (format!("document '{name}' provided"), by.clone())
                }
                TimelineEvent::DocumentReviewed {
                    name,
                    status,
                    by,
                    reason,
                    ..
                } => {
                    let mut text = format!("document '{name}' {}", status.as_str().to_lowercase());
                    if let Some(r) = reason {
                        text.push_str(&format!(": {r}"));
                    }
                    (text, by.clone())
                }
            };
            vec![
                minute(e.at),
                e.stage_name.clone(),
                what,
                who.unwrap_or_else(|| "-".into()),
            ]
        })
        .collect();
    print_table(&["WHEN", "STAGE", "EVENT", "BY"], rows);
    Ok(())
}
