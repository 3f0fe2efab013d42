//! Fleet configuration parser.
//!
//! The controller reads one TOML file at startup. Per-component settings
//! live in a table keyed by [`Component`], so lookups are a `match` rather
//! than a formatted string key.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::error::{ConfigError, ConfigResult};
use crate::types::Component;

#[derive(Debug, Clone, Deserialize)]
pub struct FleetConfig {
    /// Deployment environment, attached to every metric point.
    pub environment: String,
    /// Name of the instance-state-change notification rule.
    pub notifier_rule_name: String,
    /// Prefix of the `Name` tag applied to launched instances.
    #[serde(default = "default_worker_name_prefix")]
    pub worker_name_prefix: String,
    #[serde(default = "default_metrics_namespace")]
    pub metrics_namespace: String,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    pub components: ComponentTable,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

/// Cadence of every periodic activity.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Lifetime of an instance before a forced recycle.
    #[serde(deserialize_with = "de_duration")]
    pub reboot: Duration,
    #[serde(deserialize_with = "de_duration")]
    pub reconcile: Duration,
    #[serde(deserialize_with = "de_duration")]
    pub refresh: Duration,
    #[serde(deserialize_with = "de_duration")]
    pub collect: Duration,
    #[serde(deserialize_with = "de_duration")]
    pub report: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            reboot: Duration::from_secs(5 * 60),
            reconcile: Duration::from_secs(15),
            refresh: Duration::from_secs(5 * 60),
            collect: Duration::from_secs(1),
            report: Duration::from_secs(60),
        }
    }
}

/// Per-component settings, one field per [`Component`].
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ComponentTable {
    pub spider: ComponentConfig,
    pub scraper: ComponentConfig,
}

impl ComponentTable {
    pub fn get(&self, component: Component) -> &ComponentConfig {
        match component {
            Component::Spider => &self.spider,
            Component::Scraper => &self.scraper,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ComponentConfig {
    /// Parameter holding the desired instance count.
    pub count_parameter_name: String,
    pub launch_template_id: String,
    /// Alarm that fires while the component's queue has items.
    pub queue_alarm_name: String,
}

impl FleetConfig {
    /// Load and validate a config file.
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate config text.
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: FleetConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject empty required settings and zero durations.
    pub fn validate(&self) -> ConfigResult<()> {
        require("environment", &self.environment)?;
        require("notifier_rule_name", &self.notifier_rule_name)?;
        for component in Component::ALL {
            let c = self.components.get(component);
            require(
                &format!("components.{component}.count_parameter_name"),
                &c.count_parameter_name,
            )?;
            require(
                &format!("components.{component}.launch_template_id"),
                &c.launch_template_id,
            )?;
            require(
                &format!("components.{component}.queue_alarm_name"),
                &c.queue_alarm_name,
            )?;
        }

        let timing = &self.timing;
        for (name, value) in [
            ("reboot", timing.reboot),
            ("reconcile", timing.reconcile),
            ("refresh", timing.refresh),
            ("collect", timing.collect),
            ("report", timing.report),
        ] {
            if value.is_zero() {
                return Err(ConfigError::InvalidDuration {
                    value: format!("timing.{name}"),
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn component(&self, component: Component) -> &ComponentConfig {
        self.components.get(component)
    }

    /// `Name` tag value for instances launched for `component`.
    pub fn worker_name(&self, component: Component) -> String {
        format!("{} {} worker", self.worker_name_prefix, component)
    }

    /// A minimal development config with placeholder resource names.
    pub fn scaffold(environment: &str) -> Self {
        let component = |c: Component| ComponentConfig {
            count_parameter_name: format!("/{environment}/{c}/count"),
            launch_template_id: format!("lt-{c}"),
            queue_alarm_name: format!("{environment}-{c}-queue-not-empty"),
        };
        FleetConfig {
            environment: environment.to_string(),
            notifier_rule_name: format!("{environment}-instance-state-change"),
            worker_name_prefix: default_worker_name_prefix(),
            metrics_namespace: default_metrics_namespace(),
            webhook: WebhookConfig::default(),
            timing: TimingConfig::default(),
            components: ComponentTable {
                spider: component(Component::Spider),
                scraper: component(Component::Scraper),
            },
        }
    }
}

fn require(name: &str, value: &str) -> ConfigResult<()> {
    if value.trim().is_empty() {
        return Err(ConfigError::Missing(name.to_string()));
    }
    Ok(())
}

/// Parse a duration string like "500ms", "30s", "5m", "1h".
pub fn parse_duration(s: &str) -> ConfigResult<Duration> {
    let s = s.trim();
    let invalid = |reason: &str| ConfigError::InvalidDuration {
        value: s.to_string(),
        reason: reason.to_string(),
    };

    let (digits, unit): (&str, fn(u64) -> Duration) = if let Some(ms) = s.strip_suffix("ms") {
        (ms, Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        (secs, Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        (mins, |n: u64| Duration::from_secs(n.saturating_mul(60)))
    } else if let Some(hours) = s.strip_suffix('h') {
        (hours, |n: u64| Duration::from_secs(n.saturating_mul(3600)))
    } else {
        return Err(invalid("expected a unit suffix (ms, s, m, h)"));
    };

    digits
        .parse::<u64>()
        .map(unit)
        .map_err(|e| invalid(&e.to_string()))
}

fn de_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_duration(&s).map_err(serde::de::Error::custom)
}

fn default_worker_name_prefix() -> String {
    "Case Harvester".to_string()
}

fn default_metrics_namespace() -> String {
    "CaseHarvester".to_string()
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 80))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
environment = "development"
notifier_rule_name = "dev-instance-state-change"

[components.spider]
count_parameter_name = "/dev/spider/count"
launch_template_id = "lt-0spider"
queue_alarm_name = "dev-spider-queue-not-empty"

[components.scraper]
count_parameter_name = "/dev/scraper/count"
launch_template_id = "lt-0scraper"
queue_alarm_name = "dev-scraper-queue-not-empty"
"#;

    #[test]
    fn parse_minimal_uses_defaults() {
        let config = FleetConfig::from_toml_str(MINIMAL).unwrap();
        assert_eq!(config.environment, "development");
        assert_eq!(config.timing, TimingConfig::default());
        assert_eq!(config.webhook.bind, SocketAddr::from(([0, 0, 0, 0], 80)));
        assert_eq!(
            config.component(Component::Scraper).launch_template_id,
            "lt-0scraper"
        );
        assert_eq!(
            config.worker_name(Component::Spider),
            "Case Harvester spider worker"
        );
    }

    #[test]
    fn parse_timing_overrides() {
        let text = format!(
            "{MINIMAL}\n[timing]\nreboot = \"10m\"\ncollect = \"500ms\"\n"
        );
        let config = FleetConfig::from_toml_str(&text).unwrap();
        assert_eq!(config.timing.reboot, Duration::from_secs(600));
        assert_eq!(config.timing.collect, Duration::from_millis(500));
        assert_eq!(config.timing.reconcile, Duration::from_secs(15));
    }

    #[test]
    fn missing_component_section_is_rejected() {
        let text = MINIMAL.replace("[components.scraper]", "[other]");
        assert!(matches!(
            FleetConfig::from_toml_str(&text),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn empty_setting_is_rejected() {
        let text = MINIMAL.replace(
            "notifier_rule_name = \"dev-instance-state-change\"",
            "notifier_rule_name = \"\"",
        );
        match FleetConfig::from_toml_str(&text) {
            Err(ConfigError::Missing(name)) => assert_eq!(name, "notifier_rule_name"),
            other => panic!("expected Missing, got {other:?}"),
        }
    }

    #[test]
    fn zero_duration_is_rejected() {
        let text = format!("{MINIMAL}\n[timing]\nreconcile = \"0s\"\n");
        assert!(matches!(
            FleetConfig::from_toml_str(&text),
            Err(ConfigError::InvalidDuration { .. })
        ));
    }

    #[test]
    fn parse_duration_values() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert!(parse_duration("soon").is_err());
        assert!(parse_duration("10").is_err());
    }

    #[test]
    fn from_file_reads_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("development.toml");
        std::fs::write(&path, MINIMAL).unwrap();
        let config = FleetConfig::from_file(&path).unwrap();
        assert_eq!(config.notifier_rule_name, "dev-instance-state-change");

        let missing = FleetConfig::from_file(&dir.path().join("nope.toml"));
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn scaffold_is_valid() {
        let config = FleetConfig::scaffold("development");
        config.validate().unwrap();
    }
}
