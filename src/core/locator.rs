/// Finding the container that serves the panel database
///
/// Deployments differ: the database may be a service of the panel's own
/// compose project, a separately managed container addressed by name, or a
/// container on the host network reached through `127.0.0.1`. The lookup
/// walks from the most to the least specific match.

use crate::core::database::{DatabaseUrl, DbEngine};
use crate::core::docker::ContainerInfo;
use crate::utils::OpsError;

/// Which rule matched, for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchRule {
    ProjectHost,
    ProjectEngine,
    HostName,
    AnyEngineImage,
}

impl MatchRule {
    fn describe(&self) -> &'static str {
        match self {
            MatchRule::ProjectHost => "project service named after the URL host",
            MatchRule::ProjectEngine => "project service matching the engine",
            MatchRule::HostName => "container named after the URL host",
            MatchRule::AnyEngineImage => "container running an engine image",
        }
    }
}

const RULES: [MatchRule; 4] = [
    MatchRule::ProjectHost,
    MatchRule::ProjectEngine,
    MatchRule::HostName,
    MatchRule::AnyEngineImage,
];

/// Locate the running database container for `url`.
pub fn locate_database_container<'a>(
    containers: &'a [ContainerInfo],
    url: &DatabaseUrl,
    project: &str,
) -> Result<(&'a ContainerInfo, MatchRule), OpsError> {
    let engine = url.engine();
    let host = url.host().unwrap_or_default();
    let running: Vec<&ContainerInfo> = containers.iter().filter(|c| c.state.is_running()).collect();

    for rule in RULES {
        let found = running.iter().copied().find(|c| matches_rule(c, rule, engine, host, project));
        if let Some(container) = found {
            tracing::debug!(container = %container.name, rule = rule.describe(), "located database container");
            return Ok((container, rule));
        }
    }

    Err(OpsError::ContainerNotFound {
        engine: engine.to_string(),
        tried: RULES
            .iter()
            .map(|r| r.describe())
            .collect::<Vec<_>>()
            .join(", "),
    })
}

fn matches_rule(
    container: &ContainerInfo,
    rule: MatchRule,
    engine: DbEngine,
    host: &str,
    project: &str,
) -> bool {
    let in_project = container.project.as_deref() == Some(project);
    let is_loopback = matches!(host, "" | "localhost" | "127.0.0.1" | "::1" | "0.0.0.0");

    match rule {
        MatchRule::ProjectHost => {
            in_project
                && !is_loopback
                && (container.service.as_deref() == Some(host) || container.name == host)
        }
        MatchRule::ProjectEngine => {
            in_project
                && (mentions_engine(container.service.as_deref().unwrap_or(""), engine)
                    || mentions_engine(&container.image, engine))
        }
        MatchRule::HostName => !is_loopback && container.name == host,
        MatchRule::AnyEngineImage => mentions_engine(&image_name(&container.image), engine),
    }
}

fn mentions_engine(value: &str, engine: DbEngine) -> bool {
    let value = value.to_ascii_lowercase();
    engine.keywords().iter().any(|k| value.contains(k))
}

/// Repository part of an image reference, without registry or tag
fn image_name(image: &str) -> String {
    let without_digest = image.split('@').next().unwrap_or(image);
    let last = without_digest.rsplit('/').next().unwrap_or(without_digest);
    last.split(':').next().unwrap_or(last).to_string()
}

/// MySQL URLs are also used for MariaDB servers; the image decides which
/// client binaries exist inside the container.
pub fn refine_engine(engine: DbEngine, container: &ContainerInfo) -> DbEngine {
    let image = image_name(&container.image).to_ascii_lowercase();
    match engine {
        DbEngine::MySql if image.contains("mariadb") => DbEngine::MariaDb,
        DbEngine::MariaDb if image.contains("mysql") && !image.contains("mariadb") => DbEngine::MySql,
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::ContainerState;

    fn container(name: &str, image: &str, service: Option<&str>, project: Option<&str>, running: bool) -> ContainerInfo {
        ContainerInfo {
            id: format!("id-{}", name),
            name: name.to_string(),
            image: image.to_string(),
            service: service.map(str::to_string),
            project: project.map(str::to_string),
            state: if running { ContainerState::Running } else { ContainerState::Stopped },
            status: String::new(),
            health: None,
        }
    }

    #[test]
    fn test_project_service_named_after_host() {
        let containers = vec![
            container("other-mysql", "mysql:8", Some("mysql"), Some("other"), true),
            container("proxy-panel-db-1", "mariadb:lts", Some("db"), Some("proxy-panel"), true),
        ];
        let url = DatabaseUrl::parse("mysql://u:p@db:3306/panel").unwrap();

        let (found, rule) = locate_database_container(&containers, &url, "proxy-panel").unwrap();
        assert_eq!(found.name, "proxy-panel-db-1");
        assert_eq!(rule, MatchRule::ProjectHost);
        assert_eq!(refine_engine(url.engine(), found), DbEngine::MariaDb);
    }

    #[test]
    fn test_loopback_host_falls_back_to_engine_match() {
        let containers = vec![
            container("proxy-panel-panel-1", "proxy/panel:latest", Some("panel"), Some("proxy-panel"), true),
            container("proxy-panel-postgresql-1", "timescale/timescaledb:latest-pg16", Some("postgresql"), Some("proxy-panel"), true),
        ];
        let url = DatabaseUrl::parse("postgresql+asyncpg://u:p@127.0.0.1/panel").unwrap();

        let (found, rule) = locate_database_container(&containers, &url, "proxy-panel").unwrap();
        assert_eq!(found.name, "proxy-panel-postgresql-1");
        assert_eq!(rule, MatchRule::ProjectEngine);
    }

    #[test]
    fn test_external_container_by_name() {
        let containers = vec![
            container("shared-db", "bitnami/mysql:8.0", None, None, true),
        ];
        let url = DatabaseUrl::parse("mysql://u:p@shared-db/panel").unwrap();

        let (_, rule) = locate_database_container(&containers, &url, "proxy-panel").unwrap();
        assert_eq!(rule, MatchRule::HostName);
    }

    #[test]
    fn test_any_engine_image_ignores_stopped() {
        let containers = vec![
            container("old", "mysql:5.7", None, None, false),
            container("live", "registry.example.com/library/mysql:8.4", None, None, true),
        ];
        let url = DatabaseUrl::parse("mysql://u:p@localhost/panel").unwrap();

        let (found, rule) = locate_database_container(&containers, &url, "proxy-panel").unwrap();
        assert_eq!(found.name, "live");
        assert_eq!(rule, MatchRule::AnyEngineImage);
    }

    #[test]
    fn test_not_found() {
        let containers = vec![container("web", "nginx:latest", None, None, true)];
        let url = DatabaseUrl::parse("postgresql://u:p@localhost/panel").unwrap();

        let err = locate_database_container(&containers, &url, "proxy-panel").unwrap_err();
        assert!(matches!(err, OpsError::ContainerNotFound { .. }));
    }

    #[test]
    fn test_image_name() {
        assert_eq!(image_name("docker.io/library/mariadb:11@sha256:abc"), "mariadb");
        assert_eq!(image_name("mysql"), "mysql");
    }
}
