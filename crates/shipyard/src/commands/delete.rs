use crate::runtime;
use colored::Colorize;
use shipyard_deploy::Teardown;
use std::path::Path;

pub async fn handle(config_path: &Path, branch: Option<&str>, strict: bool) -> anyhow::Result<()> {
    let config = runtime::load_config(config_path, branch)?;
    let app = config.application.name.clone();
    println!("{}", format!("Deleting {}...", app).blue());

    let env = runtime::build_env(config, Path::new("."), runtime::cancel_on_ctrl_c()).await?;
    let report = Teardown::new(&env).run().await;

    if report.is_clean() {
        println!("{}", format!("✓ {} deleted", app).green().bold());
        return Ok(());
    }

    let failures = report.failures();
    eprintln!(
        "{}",
        format!("⚠ {} deleted with {} failure(s):", app, failures.len())
            .yellow()
            .bold()
    );
    for failure in failures {
        eprintln!("  - {}", failure);
    }
    if strict {
        std::process::exit(1);
    }
    Ok(())
}
