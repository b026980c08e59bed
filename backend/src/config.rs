//! Configuration management.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

/// Environment variables set by the hosting platform, mapped to config keys.
const PLATFORM_ENV: &[(&str, &str)] = &[
    ("APIFY_TOKEN", "access.api_token"),
    ("ALLOWED_USER_IDS", "access.allowed_user_ids"),
    ("APIFY_USER_ID", "access.user_id"),
    ("ACTOR_RUN_ID", "run.run_id"),
    ("ACTOR_ID", "run.actor_id"),
    ("ACTOR_MEMORY_MBYTES", "run.memory_mbytes"),
    ("ACTOR_STANDBY_PORT", "server.port"),
    ("ACTOR_STANDBY_URL", "server.public_url"),
];

/// Configuration structure that matches the TOML file format.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    server: ServerConfig,
    #[serde(default)]
    access: AccessConfig,
    #[serde(default)]
    run: RunConfig,
    #[serde(default)]
    audit: AuditConfig,
    #[serde(default)]
    logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ServerConfig {
    #[serde(default = "default_port")]
    port: u16,
    /// Public base URL shown in the help message
    #[serde(default, deserialize_with = "optional_scalar")]
    public_url: Option<String>,
    #[serde(default = "default_grace_secs")]
    shutdown_grace_secs: u64,
    /// Treat end of stdin as a stop request
    #[serde(default)]
    exit_on_stdin_close: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            public_url: None,
            shutdown_grace_secs: default_grace_secs(),
            exit_on_stdin_close: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct AccessConfig {
    #[serde(default, deserialize_with = "optional_scalar")]
    api_token: Option<String>,
    #[serde(default, deserialize_with = "string_list")]
    allowed_user_ids: Vec<String>,
    #[serde(default, deserialize_with = "optional_scalar")]
    user_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct RunConfig {
    #[serde(default, deserialize_with = "optional_scalar")]
    run_id: Option<String>,
    #[serde(default, deserialize_with = "optional_scalar")]
    actor_id: Option<String>,
    #[serde(default)]
    memory_mbytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct AuditConfig {
    /// JSON Lines file receiving every outbound message
    path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct LoggingConfig {
    /// Path to log file (if set, logs will be written to file in addition to stdout)
    log_file: Option<PathBuf>,
    /// Log level (trace, debug, info, warn, error)
    /// If not set, uses RUST_LOG environment variable or defaults to "info"
    log_level: Option<String>,
}

fn default_port() -> u16 {
    relay_types::DEFAULT_PORT
}

fn default_grace_secs() -> u64 {
    15
}

/// A scalar that environment parsing may have turned into a number.
#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Text(String),
    Int(i64),
    UInt(u64),
}

impl Scalar {
    fn into_string(self) -> String {
        match self {
            Scalar::Text(s) => s,
            Scalar::Int(n) => n.to_string(),
            Scalar::UInt(n) => n.to_string(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ScalarList {
    List(Vec<Scalar>),
    Single(Scalar),
}

fn optional_scalar<'de, D: Deserializer<'de>>(de: D) -> Result<Option<String>, D::Error> {
    Ok(Option::<Scalar>::deserialize(de)?
        .map(Scalar::into_string)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty()))
}

/// Accept either a list or a comma separated string.
fn string_list<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<String>, D::Error> {
    let items = match Option::<ScalarList>::deserialize(de)? {
        None => Vec::new(),
        Some(ScalarList::List(items)) => items.into_iter().map(Scalar::into_string).collect(),
        Some(ScalarList::Single(single)) => single
            .into_string()
            .split(',')
            .map(str::to_string)
            .collect(),
    };
    Ok(items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect())
}

/// Application configuration.
#[derive(Clone)]
pub struct Config {
    /// Port to listen on
    pub port: u16,
    /// Base URL clients use to reach this server
    pub public_url: String,
    /// Upper bound for draining sessions on shutdown
    pub shutdown_grace: Duration,
    /// Treat end of stdin as a stop request
    pub exit_on_stdin_close: bool,
    /// Credential for the hosting platform (required)
    pub api_token: String,
    /// User IDs allowed to use the server; empty means everyone
    pub allowed_user_ids: Vec<String>,
    /// User this process was started for
    pub user_id: Option<String>,
    /// Identifier of this run
    pub run_id: String,
    /// Identifier of the deployed server, if known
    pub actor_id: Option<String>,
    /// Memory granted by the host, used for the startup charge
    pub memory_mbytes: u64,
    /// JSONL audit file (if set, every outbound message is recorded)
    pub audit_path: Option<PathBuf>,
    /// Path to log file (if set, logs will be written to file in addition to stdout)
    pub log_file: Option<PathBuf>,
    /// Log level (if set, overrides the default of "info")
    pub log_level: Option<String>,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("port", &self.port)
            .field("public_url", &self.public_url)
            .field("shutdown_grace", &self.shutdown_grace)
            .field("exit_on_stdin_close", &self.exit_on_stdin_close)
            .field("api_token", &"<redacted>")
            .field("allowed_user_ids", &self.allowed_user_ids)
            .field("user_id", &self.user_id)
            .field("run_id", &self.run_id)
            .field("actor_id", &self.actor_id)
            .field("memory_mbytes", &self.memory_mbytes)
            .field("audit_path", &self.audit_path)
            .field("log_file", &self.log_file)
            .field("log_level", &self.log_level)
            .finish()
    }
}

impl Config {
    /// Load configuration with full priority chain: CLI args > env vars > config files > defaults.
    ///
    /// Config files are searched in this order:
    /// 1. `config.toml` in user config directory (~/.config/relay/ on Linux)
    /// 2. `.relay.toml` in current directory
    ///
    /// Environment variables are read from the hosting platform's names
    /// (`APIFY_TOKEN`, `ALLOWED_USER_IDS`, ...) and from `RELAY_*`, with `__`
    /// separating sections, e.g. `RELAY_SERVER__PORT`. The `RELAY_*` form wins.
    pub fn from_figment(
        port: Option<u16>,
        public_url: Option<String>,
        audit_path: Option<PathBuf>,
    ) -> anyhow::Result<Self> {
        let local_config = std::env::current_dir().ok().map(|d| d.join(".relay.toml"));
        let user_config = directories::ProjectDirs::from("", "", "relay")
            .map(|dirs| dirs.config_dir().join("config.toml"));

        // Build figment with priority: defaults < user config < local config < env vars < CLI args
        let mut figment = Figment::new();

        // 1. Start with defaults
        figment = figment.merge(Serialized::defaults(ConfigFile::default()));

        // 2. Merge user config file if it exists
        if let Some(ref path) = user_config {
            if path.exists() {
                figment = figment.merge(Toml::file(path));
            }
        }

        // 3. Merge local config file if it exists
        if let Some(ref path) = local_config {
            if path.exists() {
                figment = figment.merge(Toml::file(path));
            }
        }

        // 4. Merge environment variables (platform names, then RELAY_* prefix)
        figment = figment
            .merge(Env::raw().filter_map(|key| {
                PLATFORM_ENV
                    .iter()
                    .find(|(name, _)| key.as_str().eq_ignore_ascii_case(name))
                    .map(|(_, path)| (*path).into())
            }))
            .merge(Env::prefixed("RELAY_").split("__"));

        // 5. Merge CLI arguments (highest priority)
        if let Some(p) = port {
            figment = figment.merge(Serialized::default("server.port", p));
        }
        if let Some(ref url) = public_url {
            figment = figment.merge(Serialized::default("server.public_url", url));
        }
        if let Some(ref path) = audit_path {
            figment = figment.merge(Serialized::default("audit.path", path));
        }

        Self::extract(figment)
    }

    /// Extract and validate configuration from an assembled figment.
    pub fn extract(figment: Figment) -> anyhow::Result<Self> {
        let config_file: ConfigFile = figment.extract()?;

        let api_token = config_file.access.api_token.ok_or_else(|| {
            anyhow::anyhow!(
                "API token is required but not set (APIFY_TOKEN or RELAY_ACCESS__API_TOKEN)"
            )
        })?;

        let port = config_file.server.port;
        let public_url = config_file
            .server
            .public_url
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|| format!("http://localhost:{}", port));

        Ok(Self {
            port,
            public_url,
            shutdown_grace: Duration::from_secs(config_file.server.shutdown_grace_secs),
            exit_on_stdin_close: config_file.server.exit_on_stdin_close,
            api_token,
            allowed_user_ids: config_file.access.allowed_user_ids,
            user_id: config_file.access.user_id,
            run_id: config_file
                .run
                .run_id
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            actor_id: config_file.run.actor_id,
            memory_mbytes: config_file.run.memory_mbytes,
            audit_path: config_file.audit.path,
            log_file: config_file.logging.log_file,
            log_level: config_file.logging.log_level,
        })
    }
}
