mod cli;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use colored::Colorize;
use std::io::Write;
use std::path::{Path, PathBuf};

use cli::{BackupServiceArgs, Cli, Commands, CoreUpdateArgs, LogsArgs, NodeCommands};
use panelctl::core::installer::{NodeInstallOptions, PanelInstallOptions};
use panelctl::core::schedule;
use panelctl::core::{
    BackupManager, CoreInstaller, CoreKind, DockerExec, DockerManager, EnvFile, Installer,
    ReleaseClient, TelegramClient,
};
use panelctl::utils::logger::init_cli_logger;
use panelctl::utils::{
    format_bytes, is_valid_bot_token, is_valid_chat_id, mask_sensitive, resolve_editor, AppConfig,
    TargetConfig, TargetKind, BACKUP_BOT_TOKEN_KEY, BACKUP_CHAT_ID_KEY, BACKUP_ENABLED_KEY,
    BACKUP_SCHEDULE_KEY, APP_DIR_ENV, NODE_APP_DIR_ENV, NODE_CORE_KEY,
};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_cli_logger(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("{} {:#}", "✗".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = AppConfig::load(cli.config.as_deref())?;
    let panel = config.target(TargetKind::Panel);
    let node = config.target(TargetKind::Node);

    match cli.command {
        Commands::Install { database, tag } => {
            handle_install_panel(panel, PanelInstallOptions { database, tag }).await?;
        }
        Commands::Uninstall { yes } => {
            handle_uninstall(panel, TargetKind::Panel, yes).await?;
        }
        Commands::Up => handle_up(panel).await?,
        Commands::Down => handle_down(panel).await?,
        Commands::Restart => handle_restart(panel).await?,
        Commands::Status => handle_status(panel).await?,
        Commands::Logs(args) => handle_logs(panel, args).await?,
        Commands::Update => handle_update(panel).await?,
        Commands::Backup { send, output, keep } => {
            handle_backup(panel, send, output, keep).await?;
        }
        Commands::Restore { archive, yes } => {
            handle_restore(panel, &archive, yes).await?;
        }
        Commands::BackupService(args) => {
            handle_backup_service(panel, args, cli.config.as_deref()).await?;
        }
        Commands::CoreUpdate(args) => {
            handle_core_update(panel, TargetKind::Panel, args).await?;
        }
        Commands::Edit => handle_edit(&panel.compose_file()).await?,
        Commands::EditEnv => handle_edit(&panel.env_file()).await?,
        Commands::Node { command } => handle_node(node, command).await?,
    }

    Ok(())
}

async fn handle_node(node: &TargetConfig, command: NodeCommands) -> Result<()> {
    match command {
        NodeCommands::Install { port, core, tag } => {
            let core = CoreKind::from_name(&core)?;
            handle_install_node(node, NodeInstallOptions { port, core, tag }).await
        }
        NodeCommands::Uninstall { yes } => handle_uninstall(node, TargetKind::Node, yes).await,
        NodeCommands::Up => handle_up(node).await,
        NodeCommands::Down => handle_down(node).await,
        NodeCommands::Restart => handle_restart(node).await,
        NodeCommands::Status => handle_status(node).await,
        NodeCommands::Logs(args) => handle_logs(node, args).await,
        NodeCommands::Update => handle_update(node).await,
        NodeCommands::CoreUpdate(args) => handle_core_update(node, TargetKind::Node, args).await,
        NodeCommands::Edit => handle_edit(&node.compose_file()).await,
        NodeCommands::EditEnv => handle_edit(&node.env_file()).await,
    }
}

async fn require_docker(target: &TargetConfig) -> Result<()> {
    let docker = DockerManager::new_unchecked(target)?;
    if !docker.check_docker().await {
        bail!("Docker daemon is not reachable. Install Docker and make sure it is running.");
    }
    Ok(())
}

async fn handle_install_panel(target: &TargetConfig, options: PanelInstallOptions) -> Result<()> {
    require_docker(target).await?;

    println!("Installing {} into {}", target.name.bold(), target.app_dir.display());
    let engine = Installer::new(target)?.prepare_panel(&options).await?;
    println!("{} Wrote docker-compose.yml and .env ({} database)", "✓".green(), engine);

    let docker = DockerManager::new(target)?;
    println!("Pulling images...");
    docker.pull_images().await?;
    docker.up(&[]).await?;

    println!("{} {} is up", "✓".green(), target.name);
    println!("\nEdit settings with: panelctl edit-env");
    Ok(())
}

async fn handle_install_node(target: &TargetConfig, options: NodeInstallOptions) -> Result<()> {
    require_docker(target).await?;

    println!("Installing {} into {}", target.name.bold(), target.app_dir.display());
    Installer::new(target)?.prepare_node(&options).await?;
    println!(
        "{} Wrote docker-compose.yml and .env (port {}, core {})",
        "✓".green(),
        options.port,
        options.core
    );

    let docker = DockerManager::new(target)?;
    println!("Pulling images...");
    docker.pull_images().await?;
    docker.up(&[]).await?;

    println!("{} {} is up", "✓".green(), target.name);
    Ok(())
}

async fn handle_uninstall(target: &TargetConfig, kind: TargetKind, yes: bool) -> Result<()> {
    if !yes {
        println!(
            "{} This removes {} and {}, including the database.",
            "⚠".yellow(),
            target.app_dir.display(),
            target.data_dir.display()
        );
        bail!("Refusing to uninstall without --yes");
    }

    if target.compose_file().exists() {
        println!("Stopping {}...", target.name);
        DockerManager::new(target)?.down().await?;
    }

    if kind == TargetKind::Panel {
        let crontab = schedule::read_crontab().await?;
        if schedule::find_entry(&crontab).is_some() {
            schedule::write_crontab(&schedule::remove_entry(&crontab)).await?;
            println!("{} Removed scheduled backup", "✓".green());
        }
    }

    Installer::new(target)?.remove_files()?;
    println!("{} {} uninstalled", "✓".green(), target.name);
    Ok(())
}

async fn handle_up(target: &TargetConfig) -> Result<()> {
    let docker = DockerManager::new(target)?;
    println!("Starting {}...", target.name);
    docker.up(&[]).await?;
    println!("{} {} started", "✓".green(), target.name);
    Ok(())
}

async fn handle_down(target: &TargetConfig) -> Result<()> {
    let docker = DockerManager::new(target)?;
    println!("Stopping {}...", target.name);
    docker.down().await?;
    println!("{} {} stopped", "✓".green(), target.name);
    Ok(())
}

async fn handle_restart(target: &TargetConfig) -> Result<()> {
    let docker = DockerManager::new(target)?;
    println!("Restarting {}...", target.name);
    docker.restart().await?;
    println!("{} {} restarted", "✓".green(), target.name);
    Ok(())
}

async fn handle_status(target: &TargetConfig) -> Result<()> {
    let docker = DockerManager::new(target)?;
    let containers = docker.list_containers().await?;

    println!("{} Status\n", target.name.bold());
    if containers.is_empty() {
        println!("{} No containers. Start with: panelctl up", "⚠".yellow());
        return Ok(());
    }

    println!("{:<30} {:<12} {:<30} {:<12}", "Container", "State", "Status", "Health");
    println!("{}", "-".repeat(86));

    for container in containers {
        let state = if container.state.is_running() {
            container.state.as_str().green()
        } else {
            container.state.as_str().red()
        };
        let health = container.health.as_deref().unwrap_or("N/A");
        println!(
            "{:<30} {:<12} {:<30} {:<12}",
            container.name, state, container.status, health
        );
    }

    Ok(())
}

async fn handle_logs(target: &TargetConfig, args: LogsArgs) -> Result<()> {
    let docker = DockerManager::new(target)?;

    if args.follow {
        docker.follow_logs(args.tail).await
    } else {
        let logs = docker.get_logs(args.tail).await?;
        print!("{}", logs);
        Ok(())
    }
}

async fn handle_update(target: &TargetConfig) -> Result<()> {
    let docker = DockerManager::new(target)?;
    println!("Pulling images for {}...", target.name);
    docker.pull_images().await?;
    docker.up(&[]).await?;
    println!("{} {} updated", "✓".green(), target.name);
    Ok(())
}

/// Telegram client from the backup keys in `.env`
fn telegram_from_env(env: &EnvFile) -> Result<TelegramClient> {
    let token = env
        .get_non_empty(BACKUP_BOT_TOKEN_KEY)
        .ok_or_else(|| anyhow!("{} is not set. Run: panelctl backup-service", BACKUP_BOT_TOKEN_KEY))?;
    let chat_id = env
        .get_non_empty(BACKUP_CHAT_ID_KEY)
        .ok_or_else(|| anyhow!("{} is not set. Run: panelctl backup-service", BACKUP_CHAT_ID_KEY))?;
    TelegramClient::new(token, chat_id)
}

async fn handle_backup(
    target: &TargetConfig,
    send: bool,
    output: Option<PathBuf>,
    keep: usize,
) -> Result<()> {
    let docker = DockerManager::new(target)?;
    let exec = DockerExec;
    let manager = BackupManager::new(target, &exec, &docker);

    // fail before the (possibly long) backup when delivery can't work
    let telegram = if send {
        Some(telegram_from_env(&EnvFile::load(target.env_file())?)?)
    } else {
        None
    };

    let output_dir = output.unwrap_or_else(|| manager.default_output_dir());
    println!("Backing up {}...", target.name);
    let outcome = manager.create(&output_dir).await?;
    println!(
        "{} Backup created: {} ({}, {} database)",
        "✓".green(),
        outcome.archive.display(),
        format_bytes(outcome.size),
        outcome.engine
    );

    if let Some(telegram) = telegram {
        println!("Sending to Telegram...");
        manager.send(&outcome, &telegram).await?;
        println!("{} Backup sent", "✓".green());
    }

    if keep > 0 {
        let removed = manager.prune(&output_dir, keep)?;
        if !removed.is_empty() {
            println!("Removed {} old backup(s), keeping {}", removed.len(), keep);
        }
    }

    Ok(())
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{} [y/N] ", prompt);
    std::io::stdout().flush()?;

    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

async fn handle_restore(target: &TargetConfig, archive: &Path, yes: bool) -> Result<()> {
    if !archive.exists() {
        bail!("{} not found", archive.display());
    }

    if !yes {
        println!(
            "{} Restoring replaces the current .env, compose file, data and database of {}.",
            "⚠".yellow(),
            target.name
        );
        if !confirm("Continue?")? {
            println!("Restore cancelled");
            return Ok(());
        }
    }

    // restore may run on a fresh host with no compose file yet
    let docker = DockerManager::new_unchecked(target)?;
    let exec = DockerExec;
    let manager = BackupManager::new(target, &exec, &docker);

    println!("Restoring {} from {}...", target.name, archive.display());
    let manifest = manager.restore(archive).await?;
    println!(
        "{} Restored backup of {} taken {} ({} database)",
        "✓".green(),
        manifest.app,
        manifest.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
        manifest.engine
    );
    Ok(())
}

async fn handle_backup_service(
    target: &TargetConfig,
    args: BackupServiceArgs,
    config_path: Option<&Path>,
) -> Result<()> {
    let mut env = EnvFile::load(target.env_file())?;

    if args.status {
        return print_backup_service_status(&env).await;
    }

    if args.remove {
        let crontab = schedule::read_crontab().await?;
        schedule::write_crontab(&schedule::remove_entry(&crontab)).await?;
        env.set(BACKUP_ENABLED_KEY, "false");
        env.remove(BACKUP_SCHEDULE_KEY);
        env.save()?;
        println!("{} Scheduled backups removed", "✓".green());
        return Ok(());
    }

    let (Some(token), Some(chat_id), Some(hours)) = (args.bot_token, args.chat_id, args.interval_hours)
    else {
        return print_backup_service_status(&env).await;
    };

    if !is_valid_bot_token(&token) {
        bail!("Invalid bot token. Expected <digits>:<secret> as issued by @BotFather");
    }
    if !is_valid_chat_id(&chat_id) {
        bail!("Invalid chat ID '{}'", chat_id);
    }
    let expression = schedule::cron_expression(hours)?;

    let telegram = TelegramClient::new(&token, &chat_id)?;
    telegram
        .send_message(&format!("{} backup service configured: every {} hour(s)", target.name, hours))
        .await
        .context("Test message failed. Check the bot token and chat ID")?;
    println!("{} Test message delivered", "✓".green());

    env.set(BACKUP_ENABLED_KEY, "true");
    env.set(BACKUP_BOT_TOKEN_KEY, token);
    env.set(BACKUP_CHAT_ID_KEY, chat_id);
    env.set(BACKUP_SCHEDULE_KEY, expression.clone());
    env.save()?;

    let exe = std::env::current_exe().context("Failed to locate the panelctl executable")?;
    let config_path = config_path.map(|path| path.canonicalize().unwrap_or_else(|_| path.to_path_buf()));
    let overrides: Vec<(&str, String)> = [APP_DIR_ENV, NODE_APP_DIR_ENV]
        .into_iter()
        .filter_map(|key| {
            std::env::var(key)
                .ok()
                .filter(|dir| !dir.trim().is_empty())
                .map(|dir| (key, dir))
        })
        .collect();
    let command = schedule::backup_command(&exe, config_path.as_deref(), &overrides);

    let crontab = schedule::read_crontab().await?;
    let line = schedule::cron_line(&expression, &command);
    schedule::write_crontab(&schedule::install_entry(&crontab, &line)).await?;

    println!("{} Backups scheduled: {}", "✓".green(), expression);
    Ok(())
}

async fn print_backup_service_status(env: &EnvFile) -> Result<()> {
    let crontab = schedule::read_crontab().await?;

    println!("Backup service\n");
    match schedule::find_entry(&crontab) {
        Some(line) => println!("  Schedule: {}", line.green()),
        None => println!("  Schedule: {}", "not installed".yellow()),
    }
    println!(
        "  Enabled:  {}",
        env.get(BACKUP_ENABLED_KEY).unwrap_or("false")
    );
    println!(
        "  Bot:      {}",
        env.get_non_empty(BACKUP_BOT_TOKEN_KEY)
            .map(|t| mask_sensitive(t, 4))
            .unwrap_or_else(|| "<not set>".to_string())
    );
    println!(
        "  Chat:     {}",
        env.get_non_empty(BACKUP_CHAT_ID_KEY).unwrap_or("<not set>")
    );
    println!("\nConfigure with: panelctl backup-service --bot-token T --chat-id C --interval-hours H");
    Ok(())
}

async fn handle_core_update(target: &TargetConfig, kind: TargetKind, args: CoreUpdateArgs) -> Result<()> {
    let mut env = EnvFile::load(target.env_file())?;

    let core = match (&args.core, kind) {
        (Some(name), _) => CoreKind::from_name(name)?,
        (None, TargetKind::Node) => match env.get_non_empty(NODE_CORE_KEY) {
            Some(name) => CoreKind::from_name(name)?,
            None => CoreKind::Xray,
        },
        (None, TargetKind::Panel) => CoreKind::Xray,
    };

    let client = ReleaseClient::new()?;
    let installer = CoreInstaller::new(&client, &target.data_dir);
    let installed = installer.install(core, args.core_version.as_deref()).await?;
    println!(
        "{} Installed {} {} at {}",
        "✓".green(),
        installed.kind,
        installed.version,
        installed.binary.display()
    );

    env.set(core.env_key(), installed.binary.display().to_string());
    env.save()?;

    if target.compose_file().exists() {
        println!("Restarting {}...", target.name);
        DockerManager::new(target)?.restart().await?;
        println!("{} {} restarted", "✓".green(), target.name);
    }
    Ok(())
}

async fn handle_edit(path: &Path) -> Result<()> {
    if !path.exists() {
        bail!("{} not found. Is it installed?", path.display());
    }

    let editor = resolve_editor();
    let status = tokio::process::Command::new(&editor)
        .arg(path)
        .status()
        .await
        .with_context(|| format!("Failed to launch editor '{}'", editor))?;

    if !status.success() {
        bail!("{} exited with {}", editor, status);
    }
    Ok(())
}
