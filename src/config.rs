use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

const MIN_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_interval", with = "humantime_duration")]
    pub poll_interval: Duration,
    #[serde(default = "default_interval", with = "humantime_duration")]
    pub refresh_interval: Duration,
    #[serde(default = "default_log_every_cycles")]
    pub log_every_cycles: u64,
    #[serde(default = "default_disk_target")]
    pub disk_target: String,
    #[serde(default)]
    pub log_file: Option<String>,
    #[serde(default)]
    pub output: OutputFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_interval: default_interval(),
            refresh_interval: default_interval(),
            log_every_cycles: default_log_every_cycles(),
            disk_target: default_disk_target(),
            log_file: None,
            output: OutputFormat::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse YAML in {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("invalid config: {0}")]
    Validation(String),
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        Self::from_yaml(&text).map_err(|err| match err {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path_display,
                source,
            },
            other => other,
        })
    }

    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let cfg: Config = serde_yaml::from_str(text).map_err(|source| ConfigError::Parse {
            path: "<inline>".to_string(),
            source,
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval < MIN_INTERVAL {
            return Err(ConfigError::Validation(
                "poll_interval must be at least 100ms".to_string(),
            ));
        }
        if self.refresh_interval < MIN_INTERVAL {
            return Err(ConfigError::Validation(
                "refresh_interval must be at least 100ms".to_string(),
            ));
        }
        if self.log_every_cycles < 1 {
            return Err(ConfigError::Validation(
                "log_every_cycles must be >= 1".to_string(),
            ));
        }
        if self.disk_target.is_empty() {
            return Err(ConfigError::Validation(
                "disk_target must not be empty".to_string(),
            ));
        }
        if self
            .log_file
            .as_ref()
            .is_some_and(|path| path.trim().is_empty())
        {
            return Err(ConfigError::Validation(
                "log_file must not be blank when set".to_string(),
            ));
        }
        Ok(())
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../config.yaml.example")
    }
}

const fn default_interval() -> Duration {
    Duration::from_millis(500)
}

const fn default_log_every_cycles() -> u64 {
    10
}

fn default_disk_target() -> String {
    "0".to_string()
}

mod humantime_duration {
    use super::*;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&humantime::format_duration(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(text.trim()).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_example_parses_to_defaults() {
        let cfg = Config::from_yaml(Config::example_yaml()).expect("example config is valid");
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn empty_document_uses_defaults() {
        let cfg = Config::from_yaml("{}").expect("defaults are valid");
        assert_eq!(cfg.poll_interval, Duration::from_millis(500));
        assert_eq!(cfg.log_every_cycles, 10);
        assert_eq!(cfg.disk_target, "0");
        assert_eq!(cfg.output, OutputFormat::Text);
    }

    #[test]
    fn humantime_intervals_and_output() {
        let cfg = Config::from_yaml("poll_interval: 1s 250ms\nrefresh_interval: 2s\noutput: json\n")
            .expect("valid");
        assert_eq!(cfg.poll_interval, Duration::from_millis(1250));
        assert_eq!(cfg.refresh_interval, Duration::from_secs(2));
        assert_eq!(cfg.output, OutputFormat::Json);
    }

    #[test]
    fn rejects_too_fast_cadence() {
        let err = Config::from_yaml("poll_interval: 50ms").expect_err("too fast");
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn rejects_empty_disk_target_and_zero_log_interval() {
        assert!(matches!(
            Config::from_yaml("disk_target: \"\""),
            Err(ConfigError::Validation(_))
        ));
        assert!(matches!(
            Config::from_yaml("log_every_cycles: 0"),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn unparseable_duration_is_a_parse_error() {
        assert!(matches!(
            Config::from_yaml("poll_interval: soon"),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = Config::load_from_file("/nonexistent/tempgauge.yaml").expect_err("missing");
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
