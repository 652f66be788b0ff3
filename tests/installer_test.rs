use anyhow::Result;
use httpmock::prelude::*;
use panelctl::core::installer::{Installer, NodeInstallOptions, PanelInstallOptions};
use panelctl::core::{CoreKind, DatabaseUrl, DbEngine, EnvFile};
use panelctl::utils::{
    TargetConfig, DATABASE_URL_KEY, DB_PASSWORD_KEY, MYSQL_ROOT_PASSWORD_KEY, NODE_CORE_KEY,
    NODE_PORT_KEY, PANEL_TAG_KEY,
};
use std::fs;
use tempfile::TempDir;

const ENV_TEMPLATE: &str = "# Panel settings\nUVICORN_PORT=8000\nSQLALCHEMY_DATABASE_URL=\n";

fn target(temp_dir: &TempDir, files_url: String) -> TargetConfig {
    TargetConfig {
        name: "proxy-panel".to_string(),
        app_dir: temp_dir.path().join("opt"),
        data_dir: temp_dir.path().join("data"),
        files_url,
    }
}

#[tokio::test]
async fn test_prepare_panel_with_mariadb() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let server = MockServer::start_async().await;
    let compose = server
        .mock_async(|when, then| {
            when.method(GET).path("/docker-compose.mariadb.yml");
            then.status(200)
                .body("services:\n  panel:\n    image: panel\n  mariadb:\n    image: mariadb:lts\n");
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/.env.example");
            then.status(200).body(ENV_TEMPLATE);
        })
        .await;

    let target = target(&temp_dir, server.base_url());
    let installer = Installer::new(&target)?;
    let engine = installer
        .prepare_panel(&PanelInstallOptions {
            database: "mariadb".to_string(),
            tag: Some("v1.2.0".to_string()),
        })
        .await?;

    compose.assert_async().await;
    assert_eq!(engine, DbEngine::MariaDb);
    assert!(target.compose_file().is_file());
    assert!(target.data_dir.is_dir());

    let env = EnvFile::load(target.env_file())?;
    assert_eq!(env.get("UVICORN_PORT"), Some("8000"));
    assert_eq!(env.get(PANEL_TAG_KEY), Some("v1.2.0"));
    assert!(env.get_non_empty(MYSQL_ROOT_PASSWORD_KEY).is_some());

    let password = env.get(DB_PASSWORD_KEY).unwrap_or_default().to_string();
    assert_eq!(password.len(), 24);
    match DatabaseUrl::parse(env.get(DATABASE_URL_KEY).unwrap_or_default())? {
        DatabaseUrl::Server { engine, password: Some(url_password), .. } => {
            assert_eq!(engine, DbEngine::MariaDb);
            assert_eq!(url_password, password);
        }
        other => panic!("unexpected url: {:?}", other),
    }

    // the template's comment survives
    assert!(fs::read_to_string(target.env_file())?.starts_with("# Panel settings\n"));
    Ok(())
}

#[tokio::test]
async fn test_prepare_panel_refuses_existing_install() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let server = MockServer::start_async().await;
    let target = target(&temp_dir, server.base_url());
    fs::create_dir_all(&target.app_dir)?;
    fs::write(target.compose_file(), "services: {}\n")?;

    let err = Installer::new(&target)?
        .prepare_panel(&PanelInstallOptions {
            database: "sqlite".to_string(),
            tag: None,
        })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("already installed"));
    Ok(())
}

#[tokio::test]
async fn test_prepare_panel_rejects_missing_template() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/docker-compose.postgresql.yml");
            then.status(404);
        })
        .await;

    let target = target(&temp_dir, server.base_url());
    let err = Installer::new(&target)?
        .prepare_panel(&PanelInstallOptions {
            database: "postgresql".to_string(),
            tag: None,
        })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("404"));
    assert!(!target.compose_file().exists());
    Ok(())
}

#[tokio::test]
async fn test_failed_env_template_allows_reinstall() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/docker-compose.sqlite.yml");
            then.status(200).body("services:\n  panel:\n    image: panel\n");
        })
        .await;
    let mut missing_env = server
        .mock_async(|when, then| {
            when.method(GET).path("/.env.example");
            then.status(404);
        })
        .await;

    let target = target(&temp_dir, server.base_url());
    let options = PanelInstallOptions {
        database: "sqlite".to_string(),
        tag: None,
    };
    let err = Installer::new(&target)?
        .prepare_panel(&options)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("404"));
    assert!(!target.compose_file().exists());

    missing_env.delete_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/.env.example");
            then.status(200).body(ENV_TEMPLATE);
        })
        .await;

    let engine = Installer::new(&target)?.prepare_panel(&options).await?;
    assert_eq!(engine, DbEngine::Sqlite);
    assert!(target.compose_file().is_file());
    Ok(())
}

#[tokio::test]
async fn test_prepare_node() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/docker-compose.yml");
            then.status(200).body("services:\n  node:\n    image: node\n");
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/.env.example");
            then.status(200).body("SERVICE_PORT=62050\n");
        })
        .await;

    let mut target = target(&temp_dir, server.base_url());
    target.name = "proxy-node".to_string();
    let installer = Installer::new(&target)?;
    installer
        .prepare_node(&NodeInstallOptions {
            port: 7000,
            core: CoreKind::SingBox,
            tag: None,
        })
        .await?;

    let env = EnvFile::load(target.env_file())?;
    assert_eq!(env.get(NODE_PORT_KEY), Some("7000"));
    assert_eq!(env.get(NODE_CORE_KEY), Some("sing-box"));

    installer.remove_files()?;
    assert!(!target.app_dir.exists());
    assert!(!target.data_dir.exists());
    Ok(())
}
