/// Tool configuration management
/// Stores deployment locations in ~/.config/panelctl/config.toml

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use super::constants::{
    APP_DIR_ENV, COMPOSE_FILE_NAME, DEFAULT_NODE_FILES_URL, DEFAULT_NODE_NAME, DEFAULT_PANEL_FILES_URL,
    DEFAULT_PANEL_NAME, ENV_FILE_NAME, NODE_APP_DIR_ENV,
};

/// Which deployment a command acts on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Panel,
    Node,
}

/// Location and source of one deployment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Compose project name, also used for backup file names
    pub name: String,
    /// Directory holding docker-compose.yml and .env
    pub app_dir: PathBuf,
    /// Persistent data directory bind-mounted into the containers
    pub data_dir: PathBuf,
    /// Base URL for docker-compose and .env templates
    pub files_url: String,
}

impl TargetConfig {
    fn default_for(kind: TargetKind) -> Self {
        let (name, files_url) = match kind {
            TargetKind::Panel => (DEFAULT_PANEL_NAME, DEFAULT_PANEL_FILES_URL),
            TargetKind::Node => (DEFAULT_NODE_NAME, DEFAULT_NODE_FILES_URL),
        };

        Self {
            name: name.to_string(),
            app_dir: PathBuf::from("/opt").join(name),
            data_dir: PathBuf::from("/var/lib").join(name),
            files_url: files_url.to_string(),
        }
    }

    pub fn compose_file(&self) -> PathBuf {
        self.app_dir.join(COMPOSE_FILE_NAME)
    }

    pub fn env_file(&self) -> PathBuf {
        self.app_dir.join(ENV_FILE_NAME)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_panel")]
    pub panel: TargetConfig,
    #[serde(default = "default_node")]
    pub node: TargetConfig,
}

fn default_panel() -> TargetConfig {
    TargetConfig::default_for(TargetKind::Panel)
}

fn default_node() -> TargetConfig {
    TargetConfig::default_for(TargetKind::Node)
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            panel: default_panel(),
            node: default_node(),
        }
    }
}

impl AppConfig {
    /// Get default config file path
    pub fn config_path() -> Result<PathBuf> {
        let base = dirs::config_dir().context("Could not determine the user config directory")?;
        Ok(base.join("panelctl").join("config.toml"))
    }

    /// Load configuration from an explicit path, or the default location.
    /// A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };

        let mut config = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            Self::from_toml(&contents)?
        } else {
            Self::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("Failed to parse config file")
    }

    /// Apply `PANELCTL_APP_DIR` / `PANELCTL_NODE_APP_DIR`; blank values are ignored
    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        for (key, target) in [
            (APP_DIR_ENV, &mut self.panel),
            (NODE_APP_DIR_ENV, &mut self.node),
        ] {
            if let Some(dir) = lookup(key).filter(|dir| !dir.trim().is_empty()) {
                target.app_dir = PathBuf::from(dir);
            }
        }
    }

    pub fn target(&self, kind: TargetKind) -> &TargetConfig {
        match kind {
            TargetKind::Panel => &self.panel,
            TargetKind::Node => &self.node,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.panel.name, "proxy-panel");
        assert_eq!(config.panel.app_dir, PathBuf::from("/opt/proxy-panel"));
        assert_eq!(config.node.data_dir, PathBuf::from("/var/lib/proxy-node"));
        assert_eq!(
            config.panel.compose_file(),
            PathBuf::from("/opt/proxy-panel/docker-compose.yml")
        );
    }

    #[test]
    fn test_partial_toml_keeps_node_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [panel]
            name = "edge"
            app_dir = "/srv/edge"
            data_dir = "/srv/edge-data"
            files_url = "https://example.com/files"
            "#,
        )
        .unwrap();

        assert_eq!(config.target(TargetKind::Panel).name, "edge");
        assert_eq!(config.panel.env_file(), PathBuf::from("/srv/edge/.env"));
        assert_eq!(config.target(TargetKind::Node).name, "proxy-node");
    }

    #[test]
    fn test_app_dir_overrides() {
        let mut config = AppConfig::default();
        config.apply_overrides(|key| match key {
            "PANELCTL_APP_DIR" => Some("/srv/panel".to_string()),
            "PANELCTL_NODE_APP_DIR" => Some("  ".to_string()),
            _ => None,
        });

        assert_eq!(config.panel.app_dir, PathBuf::from("/srv/panel"));
        assert_eq!(config.panel.env_file(), PathBuf::from("/srv/panel/.env"));
        // data_dir is not tied to app_dir
        assert_eq!(config.panel.data_dir, PathBuf::from("/var/lib/proxy-panel"));
        assert_eq!(config.node.app_dir, PathBuf::from("/opt/proxy-node"));
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config.node.name, "proxy-node");
    }

}
