use crate::progress::ConsoleProgress;
use crate::runtime;
use colored::Colorize;
use shipyard_deploy::{RunContext, deploy_pipeline};
use std::path::Path;

/// Exit status after Ctrl-C
const EXIT_INTERRUPTED: i32 = 130;

pub async fn handle(config_path: &Path, branch: Option<&str>, build_dir: &Path) -> anyhow::Result<()> {
    let config = runtime::load_config(config_path, branch)?;
    let app = config.application.name.clone();
    println!("{}", format!("Deploying {}...", app).blue());

    let cancel = runtime::cancel_on_ctrl_c();
    let env = runtime::build_env(config, build_dir, cancel).await?;
    println!("  provider: {}", env.provider.name().cyan());

    let progress = ConsoleProgress::new();
    let mut ctx = RunContext::new();
    let outcome = deploy_pipeline().run(&env, &mut ctx, &progress).await;

    if let Err(e) = outcome {
        eprintln!();
        if e.is_cancelled() {
            eprintln!("{}", format!("✗ Deploy interrupted during {}", e.step).yellow().bold());
            std::process::exit(EXIT_INTERRUPTED);
        }
        eprintln!("{}", "✗ Deploy failed".red().bold());
        eprintln!("  {}", e.to_string().red());
        eprintln!("  Fix the cause and run the deploy again; finished steps are skipped.");
        std::process::exit(1);
    }

    progress.print_summary(&format!("Deployed {}", app));
    for worker in &ctx.skipped_workers {
        println!(
            "  {} {} never joined the cluster and runs nothing",
            "⚠".yellow(),
            worker
        );
    }
    for tunnel in &ctx.tunnels {
        println!(
            "  {} {} → https://{}",
            "✓".green(),
            tunnel.service_name,
            tunnel.hostname.cyan()
        );
    }
    if let Ok(ip) = ctx.main_server_ip() {
        println!("  master: {}", ip);
    }
    Ok(())
}
