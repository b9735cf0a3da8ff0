//! Layered configuration for taskboard.
//!
//! Values come from `.taskmaster/taskboard.toml` in the watched directory,
//! then environment variables, then CLI flags (applied by the caller).
//!
//! ```toml
//! [server]
//! port = 5000
//! host = "127.0.0.1"
//! open = true
//! bind_attempts = 5
//! shutdown_grace_ms = 3000
//! ping_interval_secs = 30
//! viewer_buffer = 64
//!
//! [watch]
//! tasks_file = ".taskmaster/tasks/tasks.json"
//! debounce_ms = 150
//!
//! [viewer]
//! reconnect_delay_ms = 3000
//!
//! [logging]
//! level = "info"
//! json = false
//! ```

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

/// Config file location relative to the watched directory.
pub const CONFIG_FILE: &str = ".taskmaster/taskboard.toml";

/// Default tasks file location relative to the watched directory.
pub const DEFAULT_TASKS_FILE: &str = ".taskmaster/tasks/tasks.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Preferred port; the allocator walks forward from here when busy.
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: IpAddr,
    /// Open the dashboard in a browser once listening
    #[serde(default = "default_true")]
    pub open: bool,
    /// Allocate-then-bind attempts before giving up
    #[serde(default = "default_bind_attempts")]
    pub bind_attempts: u32,
    /// Grace period for each shutdown step
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
    /// Updates queued per viewer before it is considered unreachable
    #[serde(default = "default_viewer_buffer")]
    pub viewer_buffer: usize,
}

fn default_port() -> u16 {
    crate::port::MIN_PORT
}

fn default_host() -> IpAddr {
    IpAddr::from([127, 0, 0, 1])
}

fn default_true() -> bool {
    true
}

fn default_bind_attempts() -> u32 {
    5
}

fn default_shutdown_grace_ms() -> u64 {
    3000
}

fn default_ping_interval_secs() -> u64 {
    30
}

fn default_viewer_buffer() -> usize {
    64
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            open: default_true(),
            bind_attempts: default_bind_attempts(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            ping_interval_secs: default_ping_interval_secs(),
            viewer_buffer: default_viewer_buffer(),
        }
    }
}

impl ServerSettings {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchSettings {
    #[serde(default = "default_tasks_file")]
    pub tasks_file: PathBuf,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

fn default_tasks_file() -> PathBuf {
    PathBuf::from(DEFAULT_TASKS_FILE)
}

fn default_debounce_ms() -> u64 {
    150
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            tasks_file: default_tasks_file(),
            debounce_ms: default_debounce_ms(),
        }
    }
}

impl WatchSettings {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewerSettings {
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
}

fn default_reconnect_delay_ms() -> u64 {
    3000
}

impl Default for ViewerSettings {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: default_reconnect_delay_ms(),
        }
    }
}

impl ViewerSettings {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Root of `taskboard.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskboardConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub watch: WatchSettings,
    #[serde(default)]
    pub viewer: ViewerSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl TaskboardConfig {
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse taskboard.toml")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Load `<watch_dir>/.taskmaster/taskboard.toml`, or defaults when absent.
    pub fn load_or_default(watch_dir: &Path) -> Result<Self> {
        let config_path = watch_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Apply `TASKBOARD_PORT`, `TASKBOARD_HOST` and `TASKBOARD_LOG`.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(port) = lookup("TASKBOARD_PORT") {
            self.server.port = port
                .trim()
                .parse()
                .with_context(|| format!("Invalid TASKBOARD_PORT '{}'", port))?;
        }
        if let Some(host) = lookup("TASKBOARD_HOST") {
            self.server.host = host
                .trim()
                .parse()
                .with_context(|| format!("Invalid TASKBOARD_HOST '{}'", host))?;
        }
        if let Some(level) = lookup("TASKBOARD_LOG") {
            self.logging.level = level;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.bind_attempts == 0 {
            bail!("server.bind_attempts must be at least 1");
        }
        if self.server.viewer_buffer == 0 {
            bail!("server.viewer_buffer must be at least 1");
        }
        if self.server.ping_interval_secs == 0 {
            bail!("server.ping_interval_secs must be at least 1");
        }
        if self.watch.tasks_file.as_os_str().is_empty() {
            bail!("watch.tasks_file must not be empty");
        }
        Ok(())
    }

    /// Absolute or watch-relative path of the tasks file.
    pub fn tasks_path(&self, watch_dir: &Path) -> PathBuf {
        watch_dir.join(&self.watch.tasks_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = TaskboardConfig::default();
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.server.host.to_string(), "127.0.0.1");
        assert!(config.server.open);
        assert_eq!(config.server.bind_attempts, 5);
        assert_eq!(config.watch.tasks_file, PathBuf::from(DEFAULT_TASKS_FILE));
        assert_eq!(config.viewer.reconnect_delay(), Duration::from_secs(3));
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_file_keeps_defaults() {
        let config = TaskboardConfig::parse(
            r#"
            [server]
            port = 5100
            open = false

            [watch]
            debounce_ms = 50
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 5100);
        assert!(!config.server.open);
        assert_eq!(config.server.ping_interval(), Duration::from_secs(30));
        assert_eq!(config.watch.debounce(), Duration::from_millis(50));
        assert_eq!(config.watch.tasks_file, PathBuf::from(DEFAULT_TASKS_FILE));
    }

    #[test]
    fn test_parse_rejects_bad_toml() {
        let err = TaskboardConfig::parse("[server\nport = 1").unwrap_err();
        assert!(err.to_string().contains("taskboard.toml"));
    }

    #[test]
    fn test_load_or_default() {
        let dir = tempfile::TempDir::new().unwrap();
        assert_eq!(
            TaskboardConfig::load_or_default(dir.path()).unwrap(),
            TaskboardConfig::default()
        );

        std::fs::create_dir_all(dir.path().join(".taskmaster")).unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "[logging]\nlevel = \"debug\"\njson = true\n",
        )
        .unwrap();
        let config = TaskboardConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("TASKBOARD_PORT", "5123"),
            ("TASKBOARD_HOST", "0.0.0.0"),
            ("TASKBOARD_LOG", "taskboard=trace"),
        ]);
        let mut config = TaskboardConfig::default();
        config
            .apply_env_from(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.server.port, 5123);
        assert_eq!(config.server.host.to_string(), "0.0.0.0");
        assert_eq!(config.logging.level, "taskboard=trace");
    }

    #[test]
    fn test_invalid_env_port_is_an_error() {
        let mut config = TaskboardConfig::default();
        let err = config
            .apply_env_from(|key| (key == "TASKBOARD_PORT").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("TASKBOARD_PORT"));
    }

    #[test]
    fn test_validate_rejects_zero_bounds() {
        let mut config = TaskboardConfig::default();
        config.server.bind_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = TaskboardConfig::default();
        config.server.viewer_buffer = 0;
        assert!(config.validate().is_err());

        let mut config = TaskboardConfig::default();
        config.server.ping_interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = TaskboardConfig::default();
        config.watch.tasks_file = PathBuf::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_tasks_path_joins_watch_dir() {
        let config = TaskboardConfig::default();
        assert_eq!(
            config.tasks_path(Path::new("/project")),
            PathBuf::from("/project/.taskmaster/tasks/tasks.json")
        );
    }
}
