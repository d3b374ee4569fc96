use crate::cmd::open_engine;
use crate::output::{print_json, print_table};
use oppflow_core::sweep::SweepReport;
use oppflow_core::Engine;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// `oppflow sweep [--watch] [--interval SECS]`
pub fn run(root: &Path, watch: bool, interval: Option<u64>, json: bool) -> anyhow::Result<()> {
    let engine = open_engine(root)?;
    if watch {
        let secs = interval.unwrap_or(engine.workflow().sweep_interval_secs).max(1);
        return watch_forever(engine, Duration::from_secs(secs));
    }

    let report = engine.sweep(engine.now())?;
    if json {
        return print_json(&report);
    }
    print_report(&engine, &report)
}

fn watch_forever(engine: Engine, every: Duration) -> anyhow::Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        println!("Sweeping every {}s (Ctrl-C to stop)", every.as_secs());
        tokio::select! {
            _ = oppflow_server::sweep_loop(Arc::new(engine), every) => {}
            _ = tokio::signal::ctrl_c() => {}
        }
        Ok(())
    })
}

fn print_report(engine: &Engine, report: &SweepReport) -> anyhow::Result<()> {
    println!(
        "Evaluated {} stages across {} open opportunities",
        report.stages_evaluated, report.opportunities
    );
    if report.is_quiet() {
        println!("No new alerts.");
        return Ok(());
    }
    for id in &report.pipelines_closed {
        println!("Closed finished pipeline {id} as WON");
    }

    let mut rows = Vec::new();
    let groups: [(&str, &[Uuid]); 3] = [
        ("CRITICAL", &report.critical_crossings),
        ("URGENT", &report.urgent_crossings),
        ("OVERDUE", &report.overdue_alerts),
    ];
    for (alert, ids) in groups {
        for id in ids {
            let stage = engine.stage(*id)?;
            rows.push(vec![
                alert.to_string(),
                stage.name,
                stage.opportunity_id.to_string(),
                id.to_string(),
            ]);
        }
    }
    if !rows.is_empty() {
        print_table(&["ALERT", "STAGE", "OPPORTUNITY", "STAGE ID"], rows);
    }
    Ok(())
}
