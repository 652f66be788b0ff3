/// Backup and restore of a panel deployment
///
/// A backup captures `.env`, `docker-compose.yml`, the data directory
/// (minus database engine storage and downloaded cores) and a database
/// dump, then packs everything into one zip. Delivery to Telegram splits the
/// zip into parts under the Bot API upload limit.
///
/// Restore reverses the process: stop the stack, put files back, start only
/// the database service, load the dump, then bring the whole stack up.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{Local, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::archive::{self, BackupManifest};
use crate::core::config::EnvFile;
use crate::core::database::{DatabaseUrl, DbEngine, DumpPlan};
use crate::core::docker::{ContainerInfo, DockerManager, ExecRunner};
use crate::core::locator::{locate_database_container, refine_engine};
use crate::core::telegram::TelegramClient;
use crate::utils::{
    backup_timestamp, generate_password, which, OpsError, TargetConfig, ARCHIVE_DATA_DIR,
    BACKUP_EXCLUDES, COMPOSE_FILE_NAME, DATABASE_URL_KEY, ENV_FILE_NAME, SQLITE_FILE_NAME,
    SQL_DUMP_NAME, TELEGRAM_PART_SIZE,
};

/// Compose lifecycle operations the restore flow needs
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Stack: Send + Sync {
    async fn down(&self) -> Result<()>;
    /// Start the given services, or everything when empty
    async fn up(&self, services: Vec<String>) -> Result<()>;
    /// Every container on the host
    async fn containers(&self) -> Result<Vec<ContainerInfo>>;
}

#[async_trait]
impl Stack for DockerManager {
    async fn down(&self) -> Result<()> {
        DockerManager::down(self).await
    }

    async fn up(&self, services: Vec<String>) -> Result<()> {
        let services: Vec<&str> = services.iter().map(String::as_str).collect();
        DockerManager::up(self, &services).await
    }

    async fn containers(&self) -> Result<Vec<ContainerInfo>> {
        self.list_all_containers().await
    }
}

#[derive(Debug, Clone)]
pub struct BackupOutcome {
    pub archive: PathBuf,
    pub size: u64,
    pub engine: DbEngine,
}

pub struct BackupManager<'a> {
    target: &'a TargetConfig,
    exec: &'a dyn ExecRunner,
    stack: &'a dyn Stack,
    /// Attempts while waiting for a freshly started database container
    wait_attempts: u32,
    wait_interval: Duration,
    part_size: u64,
}

impl<'a> BackupManager<'a> {
    pub fn new(target: &'a TargetConfig, exec: &'a dyn ExecRunner, stack: &'a dyn Stack) -> Self {
        Self {
            target,
            exec,
            stack,
            wait_attempts: 30,
            wait_interval: Duration::from_secs(2),
            part_size: TELEGRAM_PART_SIZE,
        }
    }

    /// Upload part size used by `send`
    pub fn with_part_size(mut self, bytes: u64) -> Self {
        self.part_size = bytes.max(1);
        self
    }

    /// Tune how long restore waits for the database container
    pub fn with_wait(mut self, attempts: u32, interval: Duration) -> Self {
        self.wait_attempts = attempts.max(1);
        self.wait_interval = interval;
        self
    }

    /// Default place backups are written to
    pub fn default_output_dir(&self) -> PathBuf {
        self.target.data_dir.join("backups")
    }

    /// The deployment's database, falling back to SQLite in the data directory
    pub fn database_url(&self, env: &EnvFile) -> Result<DatabaseUrl> {
        match env.get_non_empty(DATABASE_URL_KEY) {
            Some(raw) => Ok(DatabaseUrl::parse(raw)?),
            None => Ok(DatabaseUrl::Sqlite {
                path: self.target.data_dir.join(SQLITE_FILE_NAME),
            }),
        }
    }

    /// Create a backup archive in `output_dir`
    pub async fn create(&self, output_dir: &Path) -> Result<BackupOutcome> {
        let env = EnvFile::load(self.target.env_file())?;
        let url = self.database_url(&env)?;

        fs::create_dir_all(output_dir)
            .with_context(|| format!("Failed to create {}", output_dir.display()))?;

        let stem = format!("{}_backup_{}", self.target.name, backup_timestamp(Local::now()));
        let staging = output_dir.join(format!(".{}.staging", stem));
        let archive_path = output_dir.join(format!("{}.zip", stem));

        let result = self.stage_and_pack(&url, output_dir, &staging, &archive_path).await;
        if staging.exists() {
            if let Err(e) = fs::remove_dir_all(&staging) {
                tracing::warn!("Failed to clean up {}: {}", staging.display(), e);
            }
        }

        let (size, engine) = result?;
        tracing::info!(archive = %archive_path.display(), size, "backup created");

        Ok(BackupOutcome {
            archive: archive_path,
            size,
            engine,
        })
    }

    async fn stage_and_pack(
        &self,
        url: &DatabaseUrl,
        output_dir: &Path,
        staging: &Path,
        archive_path: &Path,
    ) -> Result<(u64, DbEngine)> {
        fs::create_dir_all(staging)?;

        for name in [ENV_FILE_NAME, COMPOSE_FILE_NAME] {
            let source = self.target.app_dir.join(name);
            if source.exists() {
                fs::copy(&source, staging.join(name))
                    .with_context(|| format!("Failed to copy {}", source.display()))?;
            }
        }

        let mut skip_files = match url {
            DatabaseUrl::Sqlite { path } => sqlite_files(&self.resolve(path)),
            DatabaseUrl::Server { .. } => Vec::new(),
        };
        // an output directory inside the data tree holds the staging dir
        for dir in [output_dir, staging] {
            if let Some(inside) = path_within(&self.target.data_dir, dir) {
                skip_files.push(inside);
            }
        }
        if self.target.data_dir.exists() {
            copy_tree(
                &self.target.data_dir,
                &staging.join(ARCHIVE_DATA_DIR),
                BACKUP_EXCLUDES,
                &skip_files,
            )?;
        }

        let (engine, database_file, database_service) = match url {
            DatabaseUrl::Sqlite { path } => {
                let source = self.resolve(path);
                let file = self.dump_sqlite(&source, &staging.join(SQLITE_FILE_NAME)).await?;
                (DbEngine::Sqlite, file.then(|| SQLITE_FILE_NAME.to_string()), None)
            }
            DatabaseUrl::Server { .. } => {
                let containers = self.stack.containers().await?;
                let (container, _) = locate_database_container(&containers, url, &self.target.name)?;
                let engine = refine_engine(url.engine(), container);
                let plan = DumpPlan::for_url(url, engine)?;

                tracing::info!(container = %container.name, %engine, "dumping database");
                self.exec
                    .exec_to_file(&container.name, &plan.dump, &staging.join(SQL_DUMP_NAME))
                    .await
                    .context("Database dump failed")?;

                let service = container
                    .service
                    .clone()
                    .filter(|_| container.project.as_deref() == Some(self.target.name.as_str()));
                (engine, Some(SQL_DUMP_NAME.to_string()), service)
            }
        };

        BackupManifest {
            app: self.target.name.clone(),
            created_at: Utc::now(),
            engine: engine.to_string(),
            database_file,
            database_service,
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
        }
        .write_to(staging)?;

        let staging_owned = staging.to_path_buf();
        let archive_owned = archive_path.to_path_buf();
        let size = tokio::task::spawn_blocking(move || archive::pack(&staging_owned, &archive_owned))
            .await
            .context("Archive task panicked")??;

        Ok((size, engine))
    }

    /// Relative SQLite paths are relative to the application directory
    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.target.app_dir.join(path)
        }
    }

    /// Copy a live SQLite database. Returns false when there is no database yet.
    async fn dump_sqlite(&self, source: &Path, dest: &Path) -> Result<bool> {
        if !source.exists() {
            tracing::warn!("SQLite database {} does not exist, skipping", source.display());
            return Ok(false);
        }

        if which("sqlite3") {
            let status = tokio::process::Command::new("sqlite3")
                .arg(source)
                .arg(format!(".backup '{}'", dest.display()))
                .stdin(std::process::Stdio::null())
                .stdout(std::process::Stdio::null())
                .stderr(std::process::Stdio::null())
                .status()
                .await;

            match status {
                Ok(s) if s.success() && dest.exists() => return Ok(true),
                _ => tracing::debug!("sqlite3 .backup failed, copying the file instead"),
            }
        }

        fs::copy(source, dest)
            .with_context(|| format!("Failed to copy {}", source.display()))?;
        Ok(true)
    }

    /// Split and upload an archive. Temporary parts are removed afterwards.
    pub async fn send(&self, outcome: &BackupOutcome, telegram: &TelegramClient) -> Result<()> {
        let archive = outcome.archive.clone();
        let part_size = self.part_size;
        let parts = tokio::task::spawn_blocking(move || archive::split(&archive, part_size))
            .await
            .context("Split task panicked")??;

        let caption = format!(
            "{} backup ({}) {}",
            self.target.name,
            outcome.engine,
            Local::now().format("%Y-%m-%d %H:%M:%S")
        );
        let result = telegram.deliver_parts(&parts, &caption).await;

        for part in parts.iter().filter(|p| **p != outcome.archive) {
            let _ = fs::remove_file(part);
        }
        result
    }

    /// Delete all but the newest `keep` archives of this deployment in
    /// `dir`. Returns the removed paths.
    pub fn prune(&self, dir: &Path, keep: usize) -> Result<Vec<PathBuf>> {
        let prefix = format!("{}_backup_", self.target.name);
        let mut archives: Vec<PathBuf> = fs::read_dir(dir)
            .with_context(|| format!("Failed to read {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.is_file()
                    && path.file_name().and_then(|n| n.to_str()).is_some_and(|name| {
                        name.starts_with(&prefix) && name.ends_with(".zip")
                    })
            })
            .collect();
        // timestamped names sort chronologically
        archives.sort();

        let excess = archives.len().saturating_sub(keep);
        let removed: Vec<PathBuf> = archives.into_iter().take(excess).collect();
        for path in &removed {
            fs::remove_file(path)
                .with_context(|| format!("Failed to remove {}", path.display()))?;
            tracing::info!(archive = %path.display(), "removed old backup");
        }
        Ok(removed)
    }

    /// Restore from an archive or the first part of a split archive
    pub async fn restore(&self, archive_path: &Path) -> Result<BackupManifest> {
        let parts = archive::collect_parts(archive_path)?;
        let work = std::env::temp_dir().join(format!(
            "panelctl-restore-{}-{}",
            backup_timestamp(Local::now()),
            generate_password(6)
        ));
        fs::create_dir_all(&work)?;

        let result = self.restore_from(&parts, &work).await;
        if let Err(e) = fs::remove_dir_all(&work) {
            tracing::warn!("Failed to clean up {}: {}", work.display(), e);
        }
        result
    }

    async fn restore_from(&self, parts: &[PathBuf], work: &Path) -> Result<BackupManifest> {
        let zip_path = if parts.len() == 1 {
            parts[0].clone()
        } else {
            let joined = work.join("joined.zip");
            archive::join(parts, &joined)?;
            joined
        };

        let extracted = work.join("extracted");
        archive::unpack(&zip_path, &extracted)?;
        let manifest = BackupManifest::read_from(&extracted)?;
        if manifest.app != self.target.name {
            tracing::warn!(
                "Backup was taken from '{}', restoring into '{}'",
                manifest.app,
                self.target.name
            );
        }

        // refuse before touching the deployment; the archived .env is the one restored
        let archived_env = extracted.join(ENV_FILE_NAME);
        let env_path = if archived_env.exists() { archived_env } else { self.target.env_file() };
        let url = self.database_url(&EnvFile::load(&env_path)?)?;
        let engine = DbEngine::from_name(&manifest.engine)?;
        if engine.is_server() != url.engine().is_server() {
            return Err(anyhow!(
                "Backup holds a {} database but {} points to {}",
                engine,
                DATABASE_URL_KEY,
                url.engine()
            ));
        }

        if self.target.compose_file().exists() {
            tracing::info!("stopping {}", self.target.name);
            self.stack.down().await?;
        } else {
            tracing::info!("no existing deployment at {}", self.target.app_dir.display());
        }

        fs::create_dir_all(&self.target.app_dir)?;
        for name in [ENV_FILE_NAME, COMPOSE_FILE_NAME] {
            let source = extracted.join(name);
            if source.exists() {
                fs::copy(&source, self.target.app_dir.join(name))
                    .with_context(|| format!("Failed to restore {}", name))?;
            }
        }

        let data = extracted.join(ARCHIVE_DATA_DIR);
        if data.exists() {
            copy_tree(&data, &self.target.data_dir, &[], &[])?;
        }

        match (&url, manifest.database_file.as_deref()) {
            (_, None) => tracing::warn!("Backup contains no database, skipping database restore"),
            (DatabaseUrl::Sqlite { path }, Some(member)) => {
                let source = extracted.join(member);
                if !source.exists() {
                    return Err(OpsError::MissingBackupMember(member.to_string()).into());
                }
                let dest = self.resolve(path);
                if let Some(parent) = dest.parent() {
                    fs::create_dir_all(parent)?;
                }
                for stale in sqlite_files(&dest).iter().skip(1) {
                    let _ = fs::remove_file(stale);
                }
                fs::copy(&source, &dest)
                    .with_context(|| format!("Failed to restore {}", dest.display()))?;
            }
            (DatabaseUrl::Server { .. }, Some(member)) => {
                let dump = extracted.join(member);
                if !dump.exists() {
                    return Err(OpsError::MissingBackupMember(member.to_string()).into());
                }

                if let Some(service) = &manifest.database_service {
                    tracing::info!(%service, "starting database service");
                    self.stack.up(vec![service.clone()]).await?;
                }

                let container = self.wait_for_database(&url).await?;
                let engine = refine_engine(url.engine(), &container);
                let plan = DumpPlan::for_url(&url, engine)?;

                tracing::info!(container = %container.name, %engine, "loading database dump");
                self.exec
                    .exec_from_file(&container.name, &plan.restore, &dump)
                    .await
                    .context("Database restore failed")?;
            }
        }

        tracing::info!("starting {}", self.target.name);
        self.stack.up(Vec::new()).await?;

        Ok(manifest)
    }

    async fn wait_for_database(&self, url: &DatabaseUrl) -> Result<ContainerInfo> {
        let mut last_error = None;
        for attempt in 0..self.wait_attempts {
            if attempt > 0 {
                tokio::time::sleep(self.wait_interval).await;
            }

            let containers = self.stack.containers().await?;
            match locate_database_container(&containers, url, &self.target.name) {
                Ok((container, _)) if container.health.as_deref() != Some("starting") => {
                    return Ok(container.clone());
                }
                Ok(_) => tracing::debug!("database container is still starting"),
                Err(e) => last_error = Some(e),
            }
        }

        Err(last_error
            .map(anyhow::Error::from)
            .unwrap_or_else(|| anyhow!("Database container did not become healthy in time")))
    }
}

/// `path` re-expressed under `root` when it lies inside it
fn path_within(root: &Path, path: &Path) -> Option<PathBuf> {
    let root_canon = root.canonicalize().ok()?;
    let path_canon = path.canonicalize().ok()?;
    path_canon
        .strip_prefix(&root_canon)
        .ok()
        .filter(|rel| !rel.as_os_str().is_empty())
        .map(|rel| root.join(rel))
}

/// The database file and its journal side files
fn sqlite_files(db: &Path) -> Vec<PathBuf> {
    let mut files = vec![db.to_path_buf()];
    for suffix in ["-wal", "-shm", "-journal"] {
        let mut name = db.as_os_str().to_os_string();
        name.push(suffix);
        files.push(PathBuf::from(name));
    }
    files
}

/// Recursively copy `src` into `dst`. `excludes` names top-level entries to
/// leave out, `skip_files` absolute paths anywhere in the tree.
fn copy_tree(src: &Path, dst: &Path, excludes: &[&str], skip_files: &[PathBuf]) -> Result<()> {
    fs::create_dir_all(dst).with_context(|| format!("Failed to create {}", dst.display()))?;

    for entry in fs::read_dir(src).with_context(|| format!("Failed to read {}", src.display()))? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name();

        if excludes.iter().any(|e| name.as_os_str() == *e) || skip_files.contains(&path) {
            continue;
        }

        let file_type = entry.file_type()?;
        let target = dst.join(&name);
        if file_type.is_dir() {
            copy_tree(&path, &target, &[], skip_files)?;
        } else if file_type.is_file() {
            fs::copy(&path, &target)
                .with_context(|| format!("Failed to copy {}", path.display()))?;
        }
    }

    Ok(())
}
