use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct ControllerConfig {
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub demand: DemandConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LifecycleConfig {
    /// Minutes after launch during which idle shutdown is suppressed
    #[serde(default = "default_startup_grace_minutes")]
    pub startup_grace_minutes: u64,

    /// Minutes of continuous inactivity before shutdown
    #[serde(default = "default_idle_timeout_minutes")]
    pub idle_timeout_minutes: u64,

    /// Seconds between activity probes
    #[serde(default = "default_poll_interval_seconds")]
    pub poll_interval_seconds: u64,

    /// Probe failures tolerated before they count as idle evidence
    #[serde(default = "default_max_consecutive_probe_failures")]
    pub max_consecutive_probe_failures: u32,

    /// Seconds between running-count checks while converging
    #[serde(default = "default_cluster_poll_interval_seconds")]
    pub cluster_poll_interval_seconds: u64,

    /// Upper bound on waiting for the task count to reach zero
    #[serde(default = "default_shutdown_deadline_seconds")]
    pub shutdown_deadline_seconds: u64,

    /// Slack added to grace and deadline before a transitional state is considered stale
    #[serde(default = "default_recovery_margin_seconds")]
    pub recovery_margin_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ClusterBackend {
    Aws,
    Command,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ClusterConfig {
    #[serde(default = "default_cluster_backend")]
    pub backend: ClusterBackend,

    #[serde(default = "default_cluster_name")]
    pub name: String,

    #[serde(default = "default_service_name")]
    pub service: String,

    #[serde(default = "default_region")]
    pub region: String,

    /// Shell template for the command backend, `{count}` is 0 or 1
    pub scale_command: Option<String>,

    /// Shell template printing the running task count
    pub count_command: Option<String>,

    #[serde(default = "default_command_timeout_seconds")]
    pub command_timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProbeConfig {
    #[serde(default = "default_probe_host")]
    pub host: String,

    #[serde(default = "default_rcon_port")]
    pub port: u16,

    /// RCON admin password
    #[serde(default)]
    pub password: String,

    #[serde(default = "default_probe_command")]
    pub command: String,

    #[serde(default = "default_probe_timeout_seconds")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    File,
    Dynamodb,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StateConfig {
    #[serde(default = "default_state_backend")]
    pub backend: StateBackend,

    /// State file for the file backend
    #[serde(default = "default_state_path")]
    pub path: String,

    #[serde(default = "default_state_table")]
    pub table: String,

    /// Partition key of the record, one per managed workload
    #[serde(default = "default_state_key")]
    pub key: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    pub from: String,
    pub to: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct NotifyConfig {
    /// Name used in notification text
    #[serde(default = "default_display_name")]
    pub display_name: String,

    /// IANA zone used to render timestamps
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Emit every event through the log as well
    #[serde(default = "default_log_events")]
    pub log_events: bool,

    pub sns_topic_arn: Option<String>,
    pub slack_webhook_url: Option<String>,
    pub webhook_url: Option<String>,
    pub twilio: Option<TwilioConfig>,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DemandConfig {
    /// Serve the unauthenticated launch endpoint
    #[serde(default = "default_http_enabled")]
    pub http_enabled: bool,

    #[serde(default = "default_http_address")]
    pub http_address: String,

    /// DNS query log to follow for lookups of `hostname`
    pub query_log_path: Option<String>,

    pub hostname: Option<String>,

    #[serde(default = "default_query_log_poll_millis")]
    pub query_log_poll_millis: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct LoggingConfig {
    /// Directory for daily rolling log files; stdout only when unset
    pub directory: Option<String>,
}

impl ControllerConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("ondemand.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("lifecycle.startup_grace_minutes", default_startup_grace_minutes())?
            .set_default("lifecycle.idle_timeout_minutes", default_idle_timeout_minutes())?
            .set_default("lifecycle.poll_interval_seconds", default_poll_interval_seconds())?
            .set_default(
                "lifecycle.max_consecutive_probe_failures",
                default_max_consecutive_probe_failures(),
            )?
            .set_default(
                "lifecycle.cluster_poll_interval_seconds",
                default_cluster_poll_interval_seconds(),
            )?
            .set_default(
                "lifecycle.shutdown_deadline_seconds",
                default_shutdown_deadline_seconds(),
            )?
            .set_default("lifecycle.recovery_margin_seconds", default_recovery_margin_seconds())?
            .set_default("cluster.name", default_cluster_name())?
            .set_default("cluster.service", default_service_name())?
            .set_default("cluster.region", default_region())?
            .set_default("probe.port", default_rcon_port() as u32)?
            .set_default("state.path", default_state_path())?
            .set_default("notify.timezone", default_timezone())?
            .set_default("demand.http_address", default_http_address())?
            .add_source(File::with_name(&path_str).required(false))
            // ONDEMAND_LIFECYCLE__IDLE_TIMEOUT_MINUTES=30
            .add_source(
                Environment::with_prefix("ONDEMAND")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let config: ControllerConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config.redacted());

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        let lifecycle = &self.lifecycle;

        if lifecycle.idle_timeout_minutes == 0 {
            return Err(ConfigError::Message(
                "Idle timeout must be greater than 0".to_string(),
            ));
        }

        if lifecycle.poll_interval_seconds == 0 {
            return Err(ConfigError::Message(
                "Poll interval must be greater than 0".to_string(),
            ));
        }

        if lifecycle.poll_interval() >= lifecycle.idle_timeout() {
            return Err(ConfigError::Message(
                "Poll interval must be shorter than the idle timeout".to_string(),
            ));
        }

        if lifecycle.max_consecutive_probe_failures == 0 {
            return Err(ConfigError::Message(
                "max_consecutive_probe_failures must be greater than 0".to_string(),
            ));
        }

        if lifecycle.cluster_poll_interval_seconds == 0
            || lifecycle.shutdown_deadline_seconds == 0
        {
            return Err(ConfigError::Message(
                "Cluster poll interval and shutdown deadline must be greater than 0".to_string(),
            ));
        }

        if self.cluster.backend == ClusterBackend::Command
            && (self.cluster.scale_command.is_none() || self.cluster.count_command.is_none())
        {
            return Err(ConfigError::Message(
                "Command cluster backend requires scale_command and count_command".to_string(),
            ));
        }

        if self.probe.timeout_seconds == 0
            || self.probe.timeout() >= lifecycle.poll_interval()
        {
            return Err(ConfigError::Message(
                "Probe timeout must be nonzero and shorter than the poll interval".to_string(),
            ));
        }

        if self.notify.timezone.parse::<chrono_tz::Tz>().is_err() {
            return Err(ConfigError::Message(format!(
                "Unknown notification timezone: {}",
                self.notify.timezone
            )));
        }

        if let Some(twilio) = &self.notify.twilio {
            if twilio.account_sid.is_empty()
                || twilio.auth_token.is_empty()
                || twilio.from.is_empty()
                || twilio.to.is_empty()
            {
                return Err(ConfigError::Message(
                    "Twilio settings require account_sid, auth_token, from and to".to_string(),
                ));
            }
        }

        if self.demand.query_log_path.is_some() && self.demand.hostname.is_none() {
            return Err(ConfigError::Message(
                "A query log demand source requires a hostname".to_string(),
            ));
        }

        Ok(())
    }

    /// Copy with credentials masked, for logging and printing
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.probe.password.is_empty() {
            copy.probe.password = "***".to_string();
        }
        if let Some(twilio) = copy.notify.twilio.as_mut() {
            twilio.auth_token = "***".to_string();
        }
        copy
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

impl LifecycleConfig {
    pub fn startup_grace(&self) -> Duration {
        Duration::from_secs(self.startup_grace_minutes * 60)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_minutes * 60)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    pub fn cluster_poll_interval(&self) -> Duration {
        Duration::from_secs(self.cluster_poll_interval_seconds)
    }

    pub fn shutdown_deadline(&self) -> Duration {
        Duration::from_secs(self.shutdown_deadline_seconds)
    }

    pub fn recovery_margin(&self) -> Duration {
        Duration::from_secs(self.recovery_margin_seconds)
    }

    /// Locks must outlive the longest operation performed under them
    pub fn lock_ttl(&self) -> Duration {
        self.shutdown_deadline().max(self.startup_grace()) + self.recovery_margin()
    }
}

impl ProbeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            startup_grace_minutes: default_startup_grace_minutes(),
            idle_timeout_minutes: default_idle_timeout_minutes(),
            poll_interval_seconds: default_poll_interval_seconds(),
            max_consecutive_probe_failures: default_max_consecutive_probe_failures(),
            cluster_poll_interval_seconds: default_cluster_poll_interval_seconds(),
            shutdown_deadline_seconds: default_shutdown_deadline_seconds(),
            recovery_margin_seconds: default_recovery_margin_seconds(),
        }
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            backend: default_cluster_backend(),
            name: default_cluster_name(),
            service: default_service_name(),
            region: default_region(),
            scale_command: None,
            count_command: None,
            command_timeout_seconds: default_command_timeout_seconds(),
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            host: default_probe_host(),
            port: default_rcon_port(),
            password: String::new(),
            command: default_probe_command(),
            timeout_seconds: default_probe_timeout_seconds(),
        }
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            backend: default_state_backend(),
            path: default_state_path(),
            table: default_state_table(),
            key: default_state_key(),
        }
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            display_name: default_display_name(),
            timezone: default_timezone(),
            log_events: default_log_events(),
            sns_topic_arn: None,
            slack_webhook_url: None,
            webhook_url: None,
            twilio: None,
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            request_timeout_seconds: default_request_timeout_seconds(),
        }
    }
}

impl Default for DemandConfig {
    fn default() -> Self {
        Self {
            http_enabled: default_http_enabled(),
            http_address: default_http_address(),
            query_log_path: None,
            hostname: None,
            query_log_poll_millis: default_query_log_poll_millis(),
        }
    }
}

// Default value functions
fn default_startup_grace_minutes() -> u64 {
    10
}
fn default_idle_timeout_minutes() -> u64 {
    20
}
fn default_poll_interval_seconds() -> u64 {
    60
}
fn default_max_consecutive_probe_failures() -> u32 {
    5
}
fn default_cluster_poll_interval_seconds() -> u64 {
    10
}
fn default_shutdown_deadline_seconds() -> u64 {
    300
}
fn default_recovery_margin_seconds() -> u64 {
    120
}

fn default_cluster_backend() -> ClusterBackend {
    ClusterBackend::Aws
}
fn default_cluster_name() -> String {
    "palworld".to_string()
}
fn default_service_name() -> String {
    "palworld-server".to_string()
}
fn default_region() -> String {
    "us-east-1".to_string()
}
fn default_command_timeout_seconds() -> u64 {
    30
}

fn default_probe_host() -> String {
    "127.0.0.1".to_string()
}
fn default_rcon_port() -> u16 {
    25575
}
fn default_probe_command() -> String {
    "ShowPlayers".to_string()
}
fn default_probe_timeout_seconds() -> u64 {
    5
}

fn default_state_backend() -> StateBackend {
    StateBackend::File
}
fn default_state_path() -> String {
    "./ondemand-state.json".to_string()
}
fn default_state_table() -> String {
    "ondemand-state".to_string()
}
fn default_state_key() -> String {
    "palworld".to_string()
}

fn default_display_name() -> String {
    "Palworld server".to_string()
}
fn default_timezone() -> String {
    "UTC".to_string()
}
fn default_log_events() -> bool {
    true
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_base_delay_ms() -> u64 {
    500
}
fn default_request_timeout_seconds() -> u64 {
    10
}

fn default_http_enabled() -> bool {
    true
}
fn default_http_address() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_query_log_poll_millis() -> u64 {
    1000
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn valid_config() -> ControllerConfig {
        let mut config = ControllerConfig::default();
        config.probe.password = "admin".to_string();
        config
    }

    #[test]
    fn test_default_config() {
        let config = valid_config();
        assert!(config.validate().is_ok());
        assert_eq!(config.lifecycle.startup_grace(), Duration::from_secs(600));
        assert_eq!(config.lifecycle.idle_timeout(), Duration::from_secs(1200));
        assert!(config.lifecycle.lock_ttl() > config.lifecycle.shutdown_deadline());
    }

    #[test]
    fn test_config_validation() {
        let mut config = valid_config();

        config.lifecycle.poll_interval_seconds = 20 * 60;
        assert!(config.validate().is_err());
        config.lifecycle.poll_interval_seconds = 60;

        config.lifecycle.max_consecutive_probe_failures = 0;
        assert!(config.validate().is_err());
        config.lifecycle.max_consecutive_probe_failures = 5;

        config.cluster.backend = ClusterBackend::Command;
        assert!(config.validate().is_err());
        config.cluster.scale_command = Some("true".to_string());
        config.cluster.count_command = Some("echo 0".to_string());
        assert!(config.validate().is_ok());

        config.notify.timezone = "Mars/Olympus".to_string();
        assert!(config.validate().is_err());
        config.notify.timezone = "Asia/Tokyo".to_string();

        config.demand.query_log_path = Some("/var/log/query.log".to_string());
        assert!(config.validate().is_err());
        config.demand.hostname = Some("palworld.example.com".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[lifecycle]
idle_timeout_minutes = 30

[cluster]
backend = "command"
scale_command = "scale {{count}}"
count_command = "echo 1"

[notify]
slack_webhook_url = "https://hooks.slack.com/services/T/B/X"

[notify.twilio]
account_sid = "AC123"
auth_token = "token"
from = "+15550000000"
to = "+15551111111"
"#
        )
        .unwrap();

        let config = ControllerConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.lifecycle.idle_timeout_minutes, 30);
        assert_eq!(config.lifecycle.startup_grace_minutes, 10);
        assert_eq!(config.cluster.backend, ClusterBackend::Command);
        assert_eq!(config.cluster.service, "palworld-server");
        assert_eq!(config.probe.port, 25575);
        assert!(config.notify.slack_webhook_url.is_some());
        assert_eq!(config.notify.twilio.as_ref().unwrap().account_sid, "AC123");
        assert_eq!(config.redacted().notify.twilio.unwrap().auth_token, "***");
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ControllerConfig::load_from_file(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.lifecycle.poll_interval_seconds, 60);
        assert_eq!(config.state.backend, StateBackend::File);
    }

    #[test]
    fn test_default_serializes_to_toml() {
        let rendered = valid_config().to_toml().unwrap();
        assert!(rendered.contains("[lifecycle]"));
        assert!(rendered.contains("idle_timeout_minutes = 20"));
    }
}
