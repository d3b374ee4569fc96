use anyhow::Context;
use oppflow_core::{config::Config, io, paths, store::RedbStore, template::TemplateStore};
use std::path::Path;

pub fn run(root: &Path) -> anyhow::Result<()> {
    let project_name = root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "project".to_string());

    println!("Initializing oppflow in: {}", root.display());

    // 1. Create .oppflow
    let dir = paths::oppflow_dir(root);
    io::ensure_dir(&dir).with_context(|| format!("failed to create {}", dir.display()))?;

    // 2. Write config.yaml if missing
    let written = Config::new(&project_name)
        .save_if_missing(root)
        .context("failed to write config.yaml")?;
    println!("  {} .oppflow/config.yaml", created_or_exists(written));

    // 3. Write an empty template store if missing
    let written = TemplateStore::new()
        .save_if_missing(root)
        .context("failed to write templates.yaml")?;
    println!("  {} .oppflow/templates.yaml", created_or_exists(written));

    // 4. Create the pipeline database and its tables
    let db_path = paths::database_path(root);
    let existed = db_path.exists();
    RedbStore::open(&db_path).context("failed to create pipeline.db")?;
    println!("  {} .oppflow/pipeline.db", created_or_exists(!existed));

    println!("\noppflow initialized successfully.");
    println!("Next: oppflow type create <id> --name \"...\"");
    Ok(())
}

fn created_or_exists(created: bool) -> &'static str {
    if created {
        "created:"
    } else {
        "exists: "
    }
}
