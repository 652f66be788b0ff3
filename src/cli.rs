/// CLI argument parsing

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use panelctl::utils::{DEFAULT_BACKUP_KEEP, DEFAULT_NODE_PORT};

// Build timestamp injected at compile time
pub const VERSION_WITH_BUILD: &str = concat!(env!("CARGO_PKG_VERSION"), " (built: ", env!("BUILD_TIMESTAMP"), ")");

#[derive(Parser)]
#[command(name = "panelctl")]
#[command(author, version = VERSION_WITH_BUILD, about, long_about = None)]
pub struct Cli {
    /// Tool config file (default: ~/.config/panelctl/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Debug logging on stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Install the panel
    Install {
        /// Database engine (sqlite, mysql, mariadb, postgresql, timescaledb)
        #[arg(short, long, default_value = "sqlite")]
        database: String,

        /// Panel image tag
        #[arg(short, long)]
        tag: Option<String>,
    },

    /// Stop the panel and remove its files
    Uninstall {
        /// Confirm removal of all panel data
        #[arg(long)]
        yes: bool,
    },

    /// Start the panel
    Up,

    /// Stop the panel
    Down,

    /// Restart the panel
    Restart,

    /// Show panel containers
    Status,

    /// View panel logs
    Logs(LogsArgs),

    /// Pull new images and recreate containers
    Update,

    /// Create a backup, optionally sending it to Telegram
    Backup {
        /// Send the backup to the configured Telegram chat
        #[arg(short, long)]
        send: bool,

        /// Directory to write the archive to (default: <data_dir>/backups)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Archives to keep in the output directory, oldest are deleted (0 keeps all)
        #[arg(short, long, default_value_t = DEFAULT_BACKUP_KEEP)]
        keep: usize,
    },

    /// Restore a backup archive (or the first .partNN of a split one)
    Restore {
        archive: PathBuf,

        /// Skip the confirmation check
        #[arg(long)]
        yes: bool,
    },

    /// Configure scheduled Telegram backups
    BackupService(BackupServiceArgs),

    /// Download a proxy core and point the panel at it
    CoreUpdate(CoreUpdateArgs),

    /// Edit docker-compose.yml
    Edit,

    /// Edit .env
    EditEnv,

    /// Node management commands
    Node {
        #[command(subcommand)]
        command: NodeCommands,
    },
}

#[derive(Subcommand)]
pub enum NodeCommands {
    /// Install the node
    Install {
        /// Node API port
        #[arg(short, long, default_value_t = DEFAULT_NODE_PORT)]
        port: u16,

        /// Proxy core to run (xray, sing-box)
        #[arg(short, long, default_value = "xray")]
        core: String,

        /// Node image tag
        #[arg(short, long)]
        tag: Option<String>,
    },

    /// Stop the node and remove its files
    Uninstall {
        #[arg(long)]
        yes: bool,
    },

    /// Start the node
    Up,

    /// Stop the node
    Down,

    /// Restart the node
    Restart,

    /// Show node containers
    Status,

    /// View node logs
    Logs(LogsArgs),

    /// Pull new images and recreate containers
    Update,

    /// Download a proxy core and point the node at it
    CoreUpdate(CoreUpdateArgs),

    /// Edit docker-compose.yml
    Edit,

    /// Edit .env
    EditEnv,
}

#[derive(Args)]
pub struct LogsArgs {
    /// Number of lines to show
    #[arg(short = 'n', long, default_value = "100")]
    pub tail: usize,

    /// Follow log output
    #[arg(short, long)]
    pub follow: bool,
}

#[derive(Args)]
pub struct CoreUpdateArgs {
    /// Core to install (xray, sing-box); the node defaults to its CORE_TYPE
    #[arg(short, long)]
    pub core: Option<String>,

    /// Release tag, e.g. v1.8.24 (default: latest stable)
    #[arg(long = "version")]
    pub core_version: Option<String>,
}

#[derive(Args)]
pub struct BackupServiceArgs {
    /// Telegram bot token
    #[arg(long, requires_all = ["chat_id", "interval_hours"], conflicts_with_all = ["remove", "status"])]
    pub bot_token: Option<String>,

    /// Telegram chat ID
    #[arg(long, requires = "bot_token")]
    pub chat_id: Option<String>,

    /// Hours between backups (1-24)
    #[arg(long, requires = "bot_token")]
    pub interval_hours: Option<u32>,

    /// Remove the scheduled backup
    #[arg(long, conflicts_with = "status")]
    pub remove: bool,

    /// Show the current schedule
    #[arg(long)]
    pub status: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_backup_service() {
        let cli = Cli::try_parse_from([
            "panelctl",
            "backup-service",
            "--bot-token",
            "123:abc",
            "--chat-id",
            "-100",
            "--interval-hours",
            "6",
        ])
        .unwrap();

        match cli.command {
            Commands::BackupService(args) => {
                assert_eq!(args.bot_token.as_deref(), Some("123:abc"));
                assert_eq!(args.chat_id.as_deref(), Some("-100"));
                assert_eq!(args.interval_hours, Some(6));
            }
            _ => panic!("expected backup-service"),
        }
    }

    #[test]
    fn test_bot_token_requires_chat_id() {
        assert!(Cli::try_parse_from(["panelctl", "backup-service", "--bot-token", "1:a"]).is_err());
    }

    #[test]
    fn test_node_defaults() {
        let cli = Cli::try_parse_from(["panelctl", "-v", "node", "install"]).unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Node { command: NodeCommands::Install { port, core, tag } } => {
                assert_eq!(port, DEFAULT_NODE_PORT);
                assert_eq!(core, "xray");
                assert!(tag.is_none());
            }
            _ => panic!("expected node install"),
        }
    }

    #[test]
    fn test_core_update_version_flag() {
        let cli = Cli::try_parse_from(["panelctl", "core-update", "--version", "v1.8.24"]).unwrap();
        match cli.command {
            Commands::CoreUpdate(args) => {
                assert_eq!(args.core_version.as_deref(), Some("v1.8.24"));
                assert!(args.core.is_none());
            }
            _ => panic!("expected core-update"),
        }
    }
}
