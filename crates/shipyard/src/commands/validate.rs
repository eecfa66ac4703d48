use crate::progress::ConsoleProgress;
use crate::runtime;
use colored::Colorize;
use shipyard_deploy::steps::ValidateProvider;
use shipyard_deploy::{Pipeline, RunContext};
use std::path::Path;

pub async fn handle(config_path: &Path, branch: Option<&str>, offline: bool) -> anyhow::Result<()> {
    println!("{}", "Validating configuration...".blue());

    let config = match runtime::load_config(config_path, branch) {
        Ok(config) => config,
        Err(e) => {
            eprintln!();
            eprintln!("{}", "✗ Invalid configuration".red().bold());
            eprintln!("  {}", e.to_string().red());
            std::process::exit(1);
        }
    };

    let app = &config.application;
    println!();
    println!("{}", "✓ Configuration is valid".green().bold());
    println!("  application: {}", app.name.cyan());
    for (name, group) in &app.servers {
        let role = if config.master_group() == Some(name.as_str()) {
            " (master)"
        } else {
            ""
        };
        println!(
            "  servers.{}: {} × {} in {}{}",
            name,
            group.count,
            config.server_type_for(group),
            config.location_for(group),
            role
        );
    }
    for (name, svc) in &app.app {
        match svc.hostname() {
            Some(host) => println!("  app.{}: https://{}", name, host),
            None => println!("  app.{}", name),
        }
    }

    if offline {
        return Ok(());
    }

    println!();
    println!("{}", "Checking provider access...".blue());
    let env = runtime::build_env(config, Path::new("."), runtime::cancel_on_ctrl_c()).await?;
    let mut ctx = RunContext::new();
    let outcome = Pipeline::new()
        .step(ValidateProvider)
        .run(&env, &mut ctx, &ConsoleProgress::new())
        .await;

    if let Err(e) = outcome {
        eprintln!();
        eprintln!("{}", "✗ Provider rejected the configuration".red().bold());
        eprintln!("  {}", e.message.red());
        std::process::exit(1);
    }
    println!("{}", format!("✓ {} accepts the configuration", env.provider.name()).green().bold());
    Ok(())
}
