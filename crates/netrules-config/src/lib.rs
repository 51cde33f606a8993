//! Configuration for the netrules tools.
//!
//! TOML file + `NETRULES_*` environment, credential resolution for the
//! router-agent token (env + keyring + plaintext), and translation to
//! `netrules_core::ManagerConfig` and `netrules_api::TransportConfig`.
//! The CLI layers its flag overrides on top.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use netrules_api::{TlsMode, TransportConfig};
use netrules_core::ManagerConfig;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const KEYRING_SERVICE: &str = "netrules";
const KEYRING_TOKEN_ENTRY: &str = "agent-token";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    /// Rule manager tunables.
    #[serde(default)]
    pub manager: ManagerConfig,

    /// How the router agents are reached.
    #[serde(default)]
    pub transport: TransportSection,

    /// CLI output defaults.
    #[serde(default)]
    pub output: OutputSection,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TransportSection {
    #[serde(default = "default_agent_port")]
    pub agent_port: u16,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// "http" or "https".
    #[serde(default = "default_scheme")]
    pub scheme: String,

    /// Accept any agent certificate.
    #[serde(default)]
    pub insecure: bool,

    /// Path to a custom CA certificate.
    pub ca_cert: Option<PathBuf>,

    /// Agent token (plaintext; prefer keyring or env var).
    pub token: Option<String>,

    /// Environment variable name containing the agent token.
    pub token_env: Option<String>,
}

impl Default for TransportSection {
    fn default() -> Self {
        Self {
            agent_port: default_agent_port(),
            timeout: default_timeout(),
            scheme: default_scheme(),
            insecure: false,
            ca_cert: None,
            token: None,
            token_env: None,
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct OutputSection {
    #[serde(default = "default_output")]
    pub format: String,

    #[serde(default = "default_color")]
    pub color: String,
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            format: default_output(),
            color: default_color(),
        }
    }
}

fn default_agent_port() -> u16 {
    3922
}
fn default_timeout() -> u64 {
    30
}
fn default_scheme() -> String {
    "http".into()
}
fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("org", "netrules", "netrules").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("netrules");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load the Config from `path` + environment. A missing file yields the
/// defaults. Nested keys use a double underscore in the environment, e.g.
/// `NETRULES_MANAGER__FAIL_WHEN_DISCONNECTED=true`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("NETRULES_").split("__"));

    let config: Config = figment.extract()?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    let transport = &config.transport;
    if transport.agent_port == 0 {
        return Err(ConfigError::Validation {
            field: "transport.agent_port".into(),
            reason: "must be non-zero".into(),
        });
    }
    if transport.timeout == 0 {
        return Err(ConfigError::Validation {
            field: "transport.timeout".into(),
            reason: "must be at least one second".into(),
        });
    }
    if !matches!(transport.scheme.as_str(), "http" | "https") {
        return Err(ConfigError::Validation {
            field: "transport.scheme".into(),
            reason: format!("expected 'http' or 'https', got '{}'", transport.scheme),
        });
    }
    Ok(())
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write it to `path`.
pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

// ── Credential resolution ───────────────────────────────────────────

/// Resolve the agent token: `token_env` variable, then the system
/// keyring, then the plaintext `token`. Agents without authentication
/// need none.
pub fn resolve_token(transport: &TransportSection) -> Option<SecretString> {
    // 1. Configured env var
    if let Some(ref env_name) = transport.token_env {
        if let Ok(val) = std::env::var(env_name) {
            return Some(SecretString::from(val));
        }
    }

    // 2. System keyring
    if let Ok(entry) = keyring::Entry::new(KEYRING_SERVICE, KEYRING_TOKEN_ENTRY) {
        if let Ok(secret) = entry.get_password() {
            return Some(SecretString::from(secret));
        }
    }

    // 3. Plaintext in config
    transport.token.clone().map(SecretString::from)
}

// ── Translation ─────────────────────────────────────────────────────

/// Build a `TransportConfig` from the `[transport]` section.
pub fn transport_config(transport: &TransportSection) -> TransportConfig {
    let tls = if transport.insecure {
        TlsMode::DangerAcceptInvalid
    } else if let Some(ref ca_path) = transport.ca_cert {
        TlsMode::CustomCa(ca_path.clone())
    } else {
        TlsMode::System
    };

    TransportConfig {
        scheme: transport.scheme.clone(),
        agent_port: transport.agent_port,
        tls,
        timeout: Duration::from_secs(transport.timeout),
        token: resolve_token(transport),
    }
}

/// The `[manager]` section as the core consumes it.
pub fn manager_config(config: &Config) -> ManagerConfig {
    config.manager.clone()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use figment::Jail;
    use netrules_core::RedundantOrder;
    use netrules_core::model::LbAlgorithm;
    use secrecy::ExposeSecret;

    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        Jail::expect_with(|_jail| {
            let config = load_config_from(Path::new("absent.toml")).unwrap();
            assert_eq!(config.manager, ManagerConfig::default());
            assert_eq!(config.transport.agent_port, 3922);
            assert_eq!(config.output.format, "table");
            Ok(())
        });
    }

    #[test]
    fn file_then_environment() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.toml",
                r#"
                [manager]
                fail_when_disconnected = true
                lb_default_algorithm = "leastconn"

                [transport]
                scheme = "https"
                timeout = 5
                "#,
            )?;
            jail.set_env("NETRULES_MANAGER__REDUNDANT_ORDER", "primary-first");
            jail.set_env("NETRULES_TRANSPORT__AGENT_PORT", "8443");

            let config = load_config_from(Path::new("config.toml")).unwrap();
            assert!(config.manager.fail_when_disconnected);
            assert_eq!(config.manager.lb_default_algorithm, LbAlgorithm::LeastConn);
            assert_eq!(config.manager.redundant_order, RedundantOrder::PrimaryFirst);

            let transport = transport_config(&config.transport);
            assert_eq!(transport.agent_port, 8443);
            assert_eq!(transport.scheme, "https");
            assert_eq!(transport.timeout, Duration::from_secs(5));
            assert!(matches!(transport.tls, TlsMode::System));
            Ok(())
        });
    }

    #[test]
    fn bad_scheme_is_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file("config.toml", "[transport]\nscheme = \"ftp\"\n")?;
            let err = load_config_from(Path::new("config.toml")).unwrap_err();
            assert!(err.to_string().contains("transport.scheme"));
            Ok(())
        });
    }

    #[test]
    fn token_env_wins_over_plaintext() {
        Jail::expect_with(|jail| {
            jail.set_env("NETRULES_TEST_AGENT_TOKEN", "from-env");
            let transport = TransportSection {
                token: Some("from-file".into()),
                token_env: Some("NETRULES_TEST_AGENT_TOKEN".into()),
                ..TransportSection::default()
            };
            let token = resolve_token(&transport).unwrap();
            assert_eq!(token.expose_secret(), "from-env");
            Ok(())
        });
    }

    #[test]
    fn save_round_trips_through_load() {
        Jail::expect_with(|jail| {
            let mut config = Config::default();
            config.manager.redundant_order = RedundantOrder::PrimaryFirst;
            config.output.format = "json".into();
            let path = jail.directory().join("nested/config.toml");
            save_config_to(&config, &path).unwrap();

            let loaded = load_config_from(&path).unwrap();
            assert_eq!(loaded.manager.redundant_order, RedundantOrder::PrimaryFirst);
            assert_eq!(loaded.output.format, "json");
            Ok(())
        });
    }
}
