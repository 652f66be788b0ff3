/// Docker and Docker Compose integration
///
/// Lists containers through the Docker API and drives the compose lifecycle
/// (`up`, `down`, `restart`, `pull`, `logs`) through the `docker compose` CLI.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use bollard::container::ListContainersOptions;
use bollard::models::ContainerSummary;
use bollard::Docker;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

use crate::core::database::ExecCommand;
use crate::utils::{
    ContainerState, OpsError, TargetConfig, COMPOSE_PROJECT_LABEL, COMPOSE_SERVICE_LABEL,
};

#[derive(Debug, Clone, PartialEq)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub image: String,
    /// Compose service name, when the container belongs to a compose project
    pub service: Option<String>,
    /// Compose project name
    pub project: Option<String>,
    pub state: ContainerState,
    pub status: String,
    pub health: Option<String>,
}

#[derive(Clone)]
pub struct DockerManager {
    docker: Docker,
    project_root: PathBuf,
    compose_file: PathBuf,
    project: String,
}

impl DockerManager {
    /// Connect to Docker for an installed deployment
    pub fn new(target: &TargetConfig) -> Result<Self> {
        let manager = Self::new_unchecked(target)?;

        if !manager.compose_file.exists() {
            return Err(anyhow!(
                "{} not found. Is {} installed?",
                manager.compose_file.display(),
                target.name
            ));
        }

        Ok(manager)
    }

    /// Connect without requiring the compose file (used by install)
    pub fn new_unchecked(target: &TargetConfig) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .context("Failed to connect to Docker daemon. Is Docker running?")?;

        Ok(Self {
            docker,
            project_root: target.app_dir.clone(),
            compose_file: target.compose_file(),
            project: target.name.clone(),
        })
    }

    /// List the containers of this compose project
    pub async fn list_containers(&self) -> Result<Vec<ContainerInfo>> {
        let mut filters = HashMap::new();
        filters.insert(
            "label".to_string(),
            vec![format!("{}={}", COMPOSE_PROJECT_LABEL, self.project)],
        );

        self.list_with_filters(filters).await
    }

    /// List every container on the host
    pub async fn list_all_containers(&self) -> Result<Vec<ContainerInfo>> {
        self.list_with_filters(HashMap::new()).await
    }

    async fn list_with_filters(
        &self,
        filters: HashMap<String, Vec<String>>,
    ) -> Result<Vec<ContainerInfo>> {
        let options = Some(ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        });

        let containers = self
            .docker
            .list_containers(options)
            .await
            .context("Failed to list containers")?;

        Ok(containers.into_iter().map(container_summary_to_info).collect())
    }

    /// Check if Docker daemon is accessible
    pub async fn check_docker(&self) -> bool {
        self.docker.ping().await.is_ok()
    }

    fn compose(&self) -> Command {
        let mut cmd = Command::new("docker");
        cmd.arg("compose")
            .arg("-f")
            .arg(&self.compose_file)
            .arg("-p")
            .arg(&self.project)
            .current_dir(&self.project_root);
        cmd
    }

    /// Execute docker compose command and capture its output
    pub async fn compose_command(&self, args: &[&str]) -> Result<String> {
        tracing::debug!(project = %self.project, ?args, "docker compose");

        let output = self
            .compose()
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .context("Failed to execute docker compose command")?;

        if !output.status.success() {
            return Err(OpsError::CommandFailed {
                command: format!("docker compose {}", args.join(" ")),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }
            .into());
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Start the stack, or only the given services
    pub async fn up(&self, services: &[&str]) -> Result<()> {
        let mut args = vec!["up", "-d", "--remove-orphans"];
        args.extend_from_slice(services);
        self.compose_command(&args).await?;
        Ok(())
    }

    /// Stop and remove the stack
    pub async fn down(&self) -> Result<()> {
        self.compose_command(&["down"]).await?;
        Ok(())
    }

    /// Restart the whole stack
    pub async fn restart(&self) -> Result<()> {
        self.down().await?;
        self.up(&[]).await
    }

    /// Pull latest images
    pub async fn pull_images(&self) -> Result<()> {
        self.compose_command(&["pull"]).await?;
        Ok(())
    }

    /// Get logs for the stack
    pub async fn get_logs(&self, tail: usize) -> Result<String> {
        let tail = tail.to_string();
        self.compose_command(&["logs", "--no-color", "--tail", &tail]).await
    }

    /// Stream logs to the terminal until the user interrupts
    pub async fn follow_logs(&self, tail: usize) -> Result<()> {
        let status = self
            .compose()
            .args(["logs", "-f", "--tail", &tail.to_string()])
            .stdin(Stdio::null())
            .status()
            .await
            .context("Failed to spawn docker compose logs")?;

        if !status.success() {
            return Err(anyhow!("docker compose logs exited with {}", status));
        }
        Ok(())
    }
}

/// Extract the service names from compose YAML
pub fn parse_compose_services(content: &str) -> Result<Vec<String>> {
    use serde_yaml::Value;

    let yaml: Value = serde_yaml::from_str(content).context("Failed to parse docker-compose.yml")?;

    let mut services: Vec<String> = yaml
        .get("services")
        .and_then(|s| s.as_mapping())
        .map(|map| {
            map.keys()
                .filter_map(|k| k.as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default();
    services.sort();

    Ok(services)
}

/// Convert ContainerSummary to ContainerInfo
fn container_summary_to_info(summary: ContainerSummary) -> ContainerInfo {
    let name = summary
        .names
        .as_ref()
        .and_then(|names| names.first())
        .map(|n| n.trim_start_matches('/').to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let labels = summary.labels.unwrap_or_default();
    let status = summary.status.clone().unwrap_or_else(|| "unknown".to_string());
    let state = summary.state.as_deref().unwrap_or("unknown").into();

    let health = summary.status.as_ref().and_then(|s| {
        // Check unhealthy BEFORE healthy (unhealthy contains "healthy" as substring)
        if s.contains("unhealthy") {
            Some("unhealthy".to_string())
        } else if s.contains("starting") {
            Some("starting".to_string())
        } else if s.contains("healthy") {
            Some("healthy".to_string())
        } else {
            None
        }
    });

    ContainerInfo {
        id: summary.id.unwrap_or_default(),
        name,
        image: summary.image.unwrap_or_else(|| "unknown".to_string()),
        service: labels.get(COMPOSE_SERVICE_LABEL).cloned(),
        project: labels.get(COMPOSE_PROJECT_LABEL).cloned(),
        state,
        status,
        health,
    }
}

/// Runs commands inside a container with a file on the host side
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExecRunner: Send + Sync {
    /// Run `command` in `container`, writing its stdout to `output`
    async fn exec_to_file(&self, container: &str, command: &ExecCommand, output: &Path)
        -> Result<()>;

    /// Run `command` in `container`, feeding `input` to its stdin
    async fn exec_from_file(&self, container: &str, command: &ExecCommand, input: &Path)
        -> Result<()>;
}

/// `docker exec` based runner.
/// Secrets are passed as `-e NAME` so their values never appear in argv.
pub struct DockerExec;

impl DockerExec {
    fn command(container: &str, command: &ExecCommand) -> Command {
        let mut cmd = Command::new("docker");
        cmd.arg("exec").arg("-i");
        for (key, value) in &command.env {
            cmd.arg("-e").arg(key).env(key, value);
        }
        cmd.arg(container).args(&command.argv);
        cmd
    }

    fn check(command: &ExecCommand, output: std::process::Output) -> Result<()> {
        if output.status.success() {
            return Ok(());
        }
        Err(OpsError::CommandFailed {
            command: command.argv.join(" "),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }
        .into())
    }
}

#[async_trait]
impl ExecRunner for DockerExec {
    async fn exec_to_file(
        &self,
        container: &str,
        command: &ExecCommand,
        output: &Path,
    ) -> Result<()> {
        let file = std::fs::File::create(output)
            .with_context(|| format!("Failed to create {}", output.display()))?;

        tracing::debug!(container, argv = ?command.argv, "docker exec (dump)");
        let result = Self::command(container, command)
            .stdin(Stdio::null())
            .stdout(Stdio::from(file))
            .stderr(Stdio::piped())
            .output()
            .await
            .context("Failed to run docker exec")?;

        Self::check(command, result)
    }

    async fn exec_from_file(
        &self,
        container: &str,
        command: &ExecCommand,
        input: &Path,
    ) -> Result<()> {
        let file = std::fs::File::open(input)
            .with_context(|| format!("Failed to open {}", input.display()))?;

        tracing::debug!(container, argv = ?command.argv, "docker exec (restore)");
        let result = Self::command(container, command)
            .stdin(Stdio::from(file))
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .context("Failed to run docker exec")?;

        Self::check(command, result)
    }
}
