pub mod archive;
pub mod backup;
pub mod config;
pub mod cores;
pub mod database;
pub mod docker;
pub mod installer;
pub mod locator;
pub mod schedule;
pub mod telegram;

pub use backup::{BackupManager, BackupOutcome};
pub use config::EnvFile;
pub use cores::{CoreInstaller, CoreKind, ReleaseClient};
pub use database::{DatabaseUrl, DbEngine};
pub use docker::{DockerExec, DockerManager};
pub use installer::Installer;
pub use telegram::TelegramClient;
