/// Deployment defaults and well-known names

/// Compose file name inside an application directory
pub const COMPOSE_FILE_NAME: &str = "docker-compose.yml";

/// Environment file name inside an application directory
pub const ENV_FILE_NAME: &str = ".env";

/// Label Docker Compose puts on every container of a project
pub const COMPOSE_PROJECT_LABEL: &str = "com.docker.compose.project";

/// Label Docker Compose puts on every container with its service name
pub const COMPOSE_SERVICE_LABEL: &str = "com.docker.compose.service";

/// Environment variables that relocate the application directories
pub const APP_DIR_ENV: &str = "PANELCTL_APP_DIR";
pub const NODE_APP_DIR_ENV: &str = "PANELCTL_NODE_APP_DIR";

pub const DEFAULT_PANEL_NAME: &str = "proxy-panel";
pub const DEFAULT_NODE_NAME: &str = "proxy-node";

/// Base URL the compose and env templates are fetched from
pub const DEFAULT_PANEL_FILES_URL: &str =
    "https://raw.githubusercontent.com/proxy-panel/panel/main/deploy";
pub const DEFAULT_NODE_FILES_URL: &str =
    "https://raw.githubusercontent.com/proxy-panel/node/main/deploy";

/// `.env` keys shared with the panel and node images
pub const DATABASE_URL_KEY: &str = "SQLALCHEMY_DATABASE_URL";
pub const DB_PASSWORD_KEY: &str = "DB_PASSWORD";
pub const MYSQL_ROOT_PASSWORD_KEY: &str = "MYSQL_ROOT_PASSWORD";
pub const PANEL_TAG_KEY: &str = "PANEL_TAG";
pub const NODE_TAG_KEY: &str = "NODE_TAG";
pub const NODE_PORT_KEY: &str = "SERVICE_PORT";
pub const NODE_CORE_KEY: &str = "CORE_TYPE";

pub const BACKUP_ENABLED_KEY: &str = "BACKUP_SERVICE_ENABLED";
pub const BACKUP_BOT_TOKEN_KEY: &str = "BACKUP_TELEGRAM_BOT_KEY";
pub const BACKUP_CHAT_ID_KEY: &str = "BACKUP_TELEGRAM_CHAT_ID";
pub const BACKUP_SCHEDULE_KEY: &str = "BACKUP_CRON_SCHEDULE";

/// Database name the install flow creates for server engines
pub const DEFAULT_DATABASE_NAME: &str = "panel";
pub const DEFAULT_DATABASE_USER: &str = "panel";

/// SQLite file name inside the data directory
pub const SQLITE_FILE_NAME: &str = "db.sqlite3";

/// Default node API port
pub const DEFAULT_NODE_PORT: u16 = 62050;

/// Telegram bots may upload documents up to 50 MB; keep a margin
pub const TELEGRAM_PART_SIZE: u64 = 49 * 1024 * 1024;

pub const TELEGRAM_API_URL: &str = "https://api.telegram.org";
pub const GITHUB_API_URL: &str = "https://api.github.com";

/// Data-directory entries that never go into a backup archive
pub const BACKUP_EXCLUDES: &[&str] = &[
    "mysql",
    "mariadb",
    "postgres",
    "postgresql",
    "xray-core",
    "sing-box-core",
    "logs",
    "backups",
];

/// Archives kept in the output directory after each backup
pub const DEFAULT_BACKUP_KEEP: usize = 7;

/// Archive member names
pub const MANIFEST_NAME: &str = "manifest.json";
pub const ARCHIVE_DATA_DIR: &str = "data";
pub const SQL_DUMP_NAME: &str = "db_backup.sql";

/// Marker comment identifying our crontab line
pub const CRON_MARKER: &str = "# panelctl-backup";
