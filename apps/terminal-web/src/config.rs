use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

const ENV_PREFIX: &str = "TERMINAL_WEB_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Service configuration. Layered as defaults, then an optional TOML file,
/// then `TERMINAL_WEB_*` environment variables, then CLI flags.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub security: SecurityConfig,
    pub logging: LoggingConfig,
    pub documents: DocumentConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub host_key: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 22,
            host_key: PathBuf::from("keys/ssh_host_ed25519_key"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct SecurityConfig {
    pub max_connections: usize,
    pub rate_limit_per_minute: usize,
    pub idle_timeout_secs: u64,
    pub max_session_secs: u64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_connections: 30,
            rate_limit_per_minute: 10,
            idle_timeout_secs: 5 * 60,
            max_session_secs: 10 * 60,
        }
    }
}

impl SecurityConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn max_session(&self) -> Duration {
        Duration::from_secs(self.max_session_secs)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub audit_log: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            audit_log: PathBuf::from("logs/terminal-web.log"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct DocumentConfig {
    pub root: PathBuf,
    pub home: String,
    /// Lua script registering extra key bindings.
    pub bindings: Option<PathBuf>,
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("resume"),
            home: "index.toml".to_string(),
            bindings: None,
        }
    }
}

impl DocumentConfig {
    /// The configured script, or `bindings.lua` under the document root when present.
    pub fn bindings_script(&self) -> Option<PathBuf> {
        if let Some(path) = &self.bindings {
            return Some(path.clone());
        }
        let candidate = self.root.join("bindings.lua");
        candidate.is_file().then_some(candidate)
    }
}

impl Config {
    /// Defaults plus the optional file plus the environment.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match file {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    pub fn apply_env(&mut self) {
        if let Some(host) = env_string("HOST") {
            self.server.host = host;
        }
        env_parse("PORT", &mut self.server.port);
        if let Some(path) = env_string("HOST_KEY") {
            self.server.host_key = PathBuf::from(path);
        }
        env_parse("MAX_CONNECTIONS", &mut self.security.max_connections);
        env_parse("RATE_LIMIT", &mut self.security.rate_limit_per_minute);
        env_parse("IDLE_TIMEOUT_SECS", &mut self.security.idle_timeout_secs);
        env_parse("MAX_SESSION_SECS", &mut self.security.max_session_secs);
        if let Some(path) = env_string("AUDIT_LOG") {
            self.logging.audit_log = PathBuf::from(path);
        }
        if let Some(path) = env_string("DOCS") {
            self.documents.root = PathBuf::from(path);
        }
        if let Some(path) = env_string("BINDINGS") {
            self.documents.bindings = Some(PathBuf::from(path));
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn env_string(key: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}{key}"))
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_parse<T: FromStr>(key: &str, slot: &mut T) {
    let Some(raw) = env_string(key) else {
        return;
    };
    match raw.parse::<T>() {
        Ok(value) => *slot = value,
        Err(_) => warn!(
            target: "terminal_web::config",
            variable = %format!("{ENV_PREFIX}{key}"),
            value = %raw,
            "ignoring unparseable environment override"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{LazyLock, Mutex};

    static ENV_MUTEX: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

    fn with_env<F: FnOnce()>(vars: &[(&str, &str)], body: F) {
        let _lock = ENV_MUTEX.lock().unwrap();
        for (key, value) in vars {
            unsafe { env::set_var(format!("{ENV_PREFIX}{key}"), value) };
        }
        body();
        for (key, _) in vars {
            unsafe { env::remove_var(format!("{ENV_PREFIX}{key}")) };
        }
    }

    #[test]
    fn defaults_match_deployment() {
        let config = Config::default();
        assert_eq!(config.listen_addr(), "0.0.0.0:22");
        assert_eq!(config.security.max_connections, 30);
        assert_eq!(config.security.rate_limit_per_minute, 10);
        assert_eq!(config.security.idle_timeout(), Duration::from_secs(300));
        assert_eq!(config.security.max_session(), Duration::from_secs(600));
        assert_eq!(config.logging.audit_log, PathBuf::from("logs/terminal-web.log"));
        assert_eq!(config.documents.home, "index.toml");
    }

    #[test]
    fn file_overrides_only_named_fields() {
        let config = Config::from_toml_str(
            r#"
            [server]
            port = 2222

            [security]
            max_session_secs = 30
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 2222);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.security.max_session_secs, 30);
        assert_eq!(config.security.rate_limit_per_minute, 10);
    }

    #[test]
    fn invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "[server\nport = ").unwrap();
        let err = Config::from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn env_overrides_file_values() {
        with_env(&[("PORT", "2022"), ("RATE_LIMIT", "3")], || {
            let mut config = Config::from_toml_str("[server]\nport = 2222\n").unwrap();
            config.apply_env();
            assert_eq!(config.server.port, 2022);
            assert_eq!(config.security.rate_limit_per_minute, 3);
        });
    }

    #[test]
    fn unparseable_env_is_ignored() {
        with_env(&[("MAX_CONNECTIONS", "lots")], || {
            let mut config = Config::default();
            config.apply_env();
            assert_eq!(config.security.max_connections, 30);
        });
    }

    #[test]
    fn bindings_script_defaults_to_root_file() {
        let dir = tempfile::tempdir().unwrap();
        let docs = DocumentConfig {
            root: dir.path().to_path_buf(),
            ..DocumentConfig::default()
        };
        assert_eq!(docs.bindings_script(), None);
        fs::write(dir.path().join("bindings.lua"), "").unwrap();
        assert_eq!(docs.bindings_script(), Some(dir.path().join("bindings.lua")));
    }
}
