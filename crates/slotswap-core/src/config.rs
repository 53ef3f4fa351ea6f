//! slotswap.toml configuration parser.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::duration::parse_duration;
use crate::error::{ConfigError, ConfigResult};
use crate::types::{Endpoint, Slot, WeightPair};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SlotswapConfig {
    pub app: AppConfig,
    pub environments: EnvironmentsConfig,
    pub health: HealthConfig,
    pub traffic: TrafficConfig,
    pub proxy: ProxyConfig,
    pub runtime: RuntimeConfig,
    pub lock: LockConfig,
    pub hooks: HooksConfig,
    /// `[plugins.<namespace>]` option values, keyed by namespace then KEY.
    pub plugins: BTreeMap<String, BTreeMap<String, toml::Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub name: String,
    /// Directory holding the state database, lock files and plugin files.
    pub state_dir: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: "app".to_string(),
            state_dir: PathBuf::from(".slotswap"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentsConfig {
    pub blue: SlotConfig,
    pub green: SlotConfig,
}

impl Default for EnvironmentsConfig {
    fn default() -> Self {
        Self {
            blue: SlotConfig {
                host: "127.0.0.1".to_string(),
                port: 8081,
            },
            green: SlotConfig {
                host: "127.0.0.1".to_string(),
                port: 8082,
            },
        }
    }
}

impl EnvironmentsConfig {
    pub fn endpoint(&self, slot: Slot) -> Endpoint {
        let cfg = match slot {
            Slot::Blue => &self.blue,
            Slot::Green => &self.green,
        };
        Endpoint::new(cfg.host.clone(), cfg.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub path: String,
    pub max_attempts: u32,
    pub interval: String,
    pub connect_timeout: String,
    /// Probe the target again after every traffic step.
    pub verify_each_step: bool,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            path: "/health".to_string(),
            max_attempts: 10,
            interval: "5s".to_string(),
            connect_timeout: "2s".to_string(),
            verify_each_step: true,
        }
    }
}

impl HealthConfig {
    pub fn interval(&self) -> ConfigResult<Duration> {
        parse_duration(&self.interval)
    }

    pub fn connect_timeout(&self) -> ConfigResult<Duration> {
        parse_duration(&self.connect_timeout)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrafficConfig {
    /// `(active, target)` percentage pairs applied in order.
    pub schedule: Vec<WeightPair>,
    /// Pause after each step before the next one.
    pub observation_window: String,
}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            schedule: vec![
                WeightPair::new(90, 10),
                WeightPair::new(50, 50),
                WeightPair::new(0, 100),
            ],
            observation_window: "0s".to_string(),
        }
    }
}

impl TrafficConfig {
    pub fn observation_window(&self) -> ConfigResult<Duration> {
        parse_duration(&self.observation_window)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Where the rendered proxy configuration is written.
    pub config_path: PathBuf,
    /// argv run after writing the configuration, e.g. `["nginx", "-s", "reload"]`.
    pub reload_command: Vec<String>,
    pub reload_timeout: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("nginx/conf.d/upstream.conf"),
            reload_command: vec!["nginx".to_string(), "-s".to_string(), "reload".to_string()],
            reload_timeout: "30s".to_string(),
        }
    }
}

impl ProxyConfig {
    pub fn reload_timeout(&self) -> ConfigResult<Duration> {
        parse_duration(&self.reload_timeout)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub compose_file: PathBuf,
    /// Compose project name prefix; the slot name is appended.
    pub project_prefix: Option<String>,
    pub command_timeout: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            compose_file: PathBuf::from("docker-compose.yml"),
            project_prefix: None,
            command_timeout: "300s".to_string(),
        }
    }
}

impl RuntimeConfig {
    pub fn command_timeout(&self) -> ConfigResult<Duration> {
        parse_duration(&self.command_timeout)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// How long to wait for a held lock. "0s" fails immediately.
    pub timeout: String,
    /// Age after which a lock is considered abandoned.
    pub stale_after: String,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            timeout: "0s".to_string(),
            stale_after: "3600s".to_string(),
        }
    }
}

impl LockConfig {
    pub fn timeout(&self) -> ConfigResult<Duration> {
        parse_duration(&self.timeout)
    }

    pub fn stale_after(&self) -> ConfigResult<Duration> {
        parse_duration(&self.stale_after)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HooksConfig {
    /// Upper bound for a single hook invocation.
    pub timeout: String,
}

impl Default for HooksConfig {
    fn default() -> Self {
        Self {
            timeout: "60s".to_string(),
        }
    }
}

impl HooksConfig {
    pub fn timeout(&self) -> ConfigResult<Duration> {
        parse_duration(&self.timeout)
    }
}

impl SlotswapConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> ConfigResult<Self> {
        let config: SlotswapConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every field that would otherwise fail halfway through a run.
    pub fn validate(&self) -> ConfigResult<()> {
        validate_app_name(&self.app.name)?;
        self.health.interval()?;
        self.health.connect_timeout()?;
        self.traffic.observation_window()?;
        self.proxy.reload_timeout()?;
        self.runtime.command_timeout()?;
        self.lock.timeout()?;
        self.lock.stale_after()?;
        self.hooks.timeout()?;

        if self.health.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "health.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.environments.blue.host == self.environments.green.host
            && self.environments.blue.port == self.environments.green.port
        {
            return Err(ConfigError::Invalid(
                "blue and green environments share an address".to_string(),
            ));
        }
        Ok(())
    }

    /// Per-application state directory.
    pub fn app_state_dir(&self) -> PathBuf {
        self.app.state_dir.join(&self.app.name)
    }
}

/// Application names end up in file names and proxy upstream names.
pub fn validate_app_name(name: &str) -> ConfigResult<()> {
    static NAME: OnceLock<Regex> = OnceLock::new();
    let re = NAME.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]{0,62}$").expect("static regex")
    });
    if re.is_match(name) && !name.contains("..") {
        Ok(())
    } else {
        Err(ConfigError::InvalidAppName(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = SlotswapConfig::parse("").unwrap();
        assert_eq!(config.app.name, "app");
        assert_eq!(config.health.max_attempts, 10);
        assert_eq!(config.traffic.schedule.len(), 3);
        assert_eq!(config.environments.endpoint(Slot::Green).address(), "127.0.0.1:8082");
    }

    #[test]
    fn parses_full_document() {
        let toml_str = r#"
[app]
name = "shop"
state_dir = "/var/lib/slotswap"

[environments.blue]
host = "10.0.0.5"
port = 3001

[environments.green]
host = "10.0.0.5"
port = 3002

[health]
path = "/healthz"
max_attempts = 3
interval = "1s"
connect_timeout = "500ms"

[traffic]
schedule = [[75, 25], [0, 100]]
observation_window = "10s"

[proxy]
config_path = "/etc/nginx/conf.d/shop.conf"
reload_command = ["docker", "exec", "proxy", "nginx", "-s", "reload"]

[plugins.ssl]
SSL_ENABLED = true
DOMAIN = "shop.example.com"
"#;
        let config = SlotswapConfig::parse(toml_str).unwrap();
        assert_eq!(config.app.name, "shop");
        assert_eq!(config.app_state_dir(), PathBuf::from("/var/lib/slotswap/shop"));
        assert_eq!(config.health.connect_timeout().unwrap(), Duration::from_millis(500));
        assert_eq!(
            config.traffic.schedule,
            vec![WeightPair::new(75, 25), WeightPair::new(0, 100)]
        );
        assert_eq!(config.proxy.reload_command[0], "docker");
        assert_eq!(
            config.plugins["ssl"]["SSL_ENABLED"],
            toml::Value::Boolean(true)
        );
    }

    #[test]
    fn rejects_bad_duration() {
        let err = SlotswapConfig::parse("[health]\ninterval = \"often\"").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDuration(_)));
    }

    #[test]
    fn rejects_shared_address() {
        let toml_str = r#"
[environments.blue]
host = "localhost"
port = 9000
[environments.green]
host = "localhost"
port = 9000
"#;
        assert!(matches!(
            SlotswapConfig::parse(toml_str),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn app_name_validation() {
        assert!(validate_app_name("shop-api_2.v1").is_ok());
        assert!(validate_app_name("../etc").is_err());
        assert!(validate_app_name("has space").is_err());
        assert!(validate_app_name("").is_err());
    }
}
