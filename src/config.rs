//! `silo.toml` configuration.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use silo_reconciler::{
    ControllerSettings, DeletionSettings, KindSettings, PolicyBinding, Profile, ProfileResolver,
};

pub const MAX_CONCURRENCY_ENV: &str = "SILO_MAX_CONCURRENCY";
pub const POLL_INTERVAL_ENV: &str = "SILO_POLL_INTERVAL_SECS";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: String, reason: String },
}

impl ConfigError {
    pub fn invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SiloConfig {
    #[serde(default)]
    pub controller: ControllerConfig,

    #[serde(default)]
    pub deletion: DeletionConfig,

    #[serde(default)]
    pub user: UserConfig,

    /// Profile used by records without a `credentialsRef`.
    #[serde(default)]
    pub default_profile: Option<String>,

    #[serde(default)]
    pub profiles: BTreeMap<String, Profile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    #[serde(with = "duration_secs", default = "default_poll_interval")]
    pub poll_interval: Duration,

    /// Zero disables the per-pass timeout.
    #[serde(with = "duration_secs", default = "default_pass_timeout")]
    pub pass_timeout: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            poll_interval: default_poll_interval(),
            pass_timeout: default_pass_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletionConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for DeletionConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            batch_size: default_batch_size(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserConfig {
    #[serde(default)]
    pub policy_binding: PolicyBinding,
}

const fn default_max_concurrency() -> usize {
    silo_reconciler::controller::DEFAULT_MAX_CONCURRENCY
}

const fn default_poll_interval() -> Duration {
    silo_reconciler::controller::DEFAULT_POLL_INTERVAL
}

const fn default_pass_timeout() -> Duration {
    silo_reconciler::controller::DEFAULT_PASS_TIMEOUT
}

const fn default_queue_capacity() -> usize {
    silo_reconciler::deletion::DEFAULT_QUEUE_CAPACITY
}

const fn default_batch_size() -> usize {
    silo_reconciler::deletion::DEFAULT_BATCH_SIZE
}

impl SiloConfig {
    /// Load from a TOML file, apply environment overrides and validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&text)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Override controller settings from `SILO_*` variables.
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(raw) = lookup(MAX_CONCURRENCY_ENV) {
            self.controller.max_concurrency = parse_env(MAX_CONCURRENCY_ENV, &raw)?;
        }
        if let Some(raw) = lookup(POLL_INTERVAL_ENV) {
            self.controller.poll_interval =
                Duration::from_secs(parse_env(POLL_INTERVAL_ENV, &raw)?);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.controller.max_concurrency == 0 {
            return Err(ConfigError::invalid(
                "controller.max_concurrency",
                "must be at least 1",
            ));
        }
        if self.controller.poll_interval.is_zero() {
            return Err(ConfigError::invalid(
                "controller.poll_interval",
                "must be at least one second",
            ));
        }
        if self.deletion.queue_capacity == 0 {
            return Err(ConfigError::invalid(
                "deletion.queue_capacity",
                "must be at least 1",
            ));
        }
        if self.deletion.batch_size == 0 {
            return Err(ConfigError::invalid("deletion.batch_size", "must be at least 1"));
        }
        if let Some(name) = self
            .default_profile
            .as_ref()
            .filter(|name| !self.profiles.contains_key(*name))
        {
            return Err(ConfigError::invalid(
                "default_profile",
                format!("no profile named {name:?}"),
            ));
        }
        self.profiles
            .iter()
            .try_for_each(|(name, profile)| validate_profile(name, profile))
    }

    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            max_concurrency: self.controller.max_concurrency,
            poll_interval: self.controller.poll_interval,
            pass_timeout: Some(self.controller.pass_timeout).filter(|t| !t.is_zero()),
        }
    }

    pub fn kind_settings(&self) -> KindSettings {
        KindSettings {
            deletion: DeletionSettings {
                queue_capacity: self.deletion.queue_capacity,
                batch_size: self.deletion.batch_size,
            },
            policy_binding: self.user.policy_binding,
        }
    }

    pub fn resolver(&self) -> ProfileResolver {
        ProfileResolver::new(self.profiles.clone(), self.default_profile.clone())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::invalid(key, format!("{raw:?}: {e}")))
}

fn validate_profile(name: &str, profile: &Profile) -> Result<(), ConfigError> {
    let key = format!("profiles.{name}.url");
    let url = Url::parse(profile.url.trim()).map_err(|e| ConfigError::invalid(&key, e.to_string()))?;
    if url.host_str().is_none() {
        return Err(ConfigError::invalid(key, "endpoint has no host"));
    }
    if profile.access_key.is_empty() {
        return Err(ConfigError::invalid(
            format!("profiles.{name}.access_key"),
            "must not be empty",
        ));
    }
    if profile.secret_key.is_none() && profile.secret_key_env.is_none() {
        return Err(ConfigError::invalid(
            format!("profiles.{name}"),
            "one of secret_key or secret_key_env is required",
        ));
    }
    Ok(())
}

/// Serialization helper for Duration as seconds.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]
    #![allow(clippy::panic)]

    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
default_profile = "local"

[controller]
max_concurrency = 8
poll_interval = 30

[user]
policy_binding = "attach"

[profiles.local]
url = "http://localhost:9000"
access_key = "minio"
secret_key = "minio123"

[profiles.prod]
url = "https://s3.example.com"
access_key = "prod-admin"
secret_key_env = "SILO_PROD_SECRET"
"#;

    #[test]
    fn test_default_config() {
        let config = SiloConfig::default();
        assert_eq!(config.controller.max_concurrency, 4);
        assert_eq!(config.controller.poll_interval, Duration::from_secs(60));
        assert_eq!(config.controller.pass_timeout, Duration::from_secs(120));
        assert_eq!(config.deletion.queue_capacity, 1000);
        assert_eq!(config.deletion.batch_size, 1000);
        assert_eq!(config.user.policy_binding, PolicyBinding::Replace);
        assert!(config.profiles.is_empty());
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = SiloConfig::from_toml_str("").unwrap();
        assert_eq!(config.controller.max_concurrency, 4);
        assert_eq!(config.deletion.batch_size, 1000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_sample() {
        let config = SiloConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.controller.max_concurrency, 8);
        assert_eq!(config.controller.poll_interval, Duration::from_secs(30));
        assert_eq!(config.controller.pass_timeout, Duration::from_secs(120));
        assert_eq!(config.user.policy_binding, PolicyBinding::Attach);
        assert_eq!(config.profiles.len(), 2);
        assert_eq!(
            config.profiles["prod"].secret_key_env.as_deref(),
            Some("SILO_PROD_SECRET")
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_settings_conversion() {
        let mut config = SiloConfig::from_toml_str(SAMPLE).unwrap();
        let settings = config.controller_settings();
        assert_eq!(settings.max_concurrency, 8);
        assert_eq!(settings.pass_timeout, Some(Duration::from_secs(120)));

        config.controller.pass_timeout = Duration::ZERO;
        assert_eq!(config.controller_settings().pass_timeout, None);
        assert_eq!(config.kind_settings().policy_binding, PolicyBinding::Attach);
        assert_eq!(config.kind_settings().deletion.batch_size, 1000);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = SiloConfig::default();
        config
            .apply_env(|key| match key {
                MAX_CONCURRENCY_ENV => Some("16".to_owned()),
                POLL_INTERVAL_ENV => Some(" 5 ".to_owned()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.controller.max_concurrency, 16);
        assert_eq!(config.controller.poll_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_env_override_rejects_garbage() {
        let mut config = SiloConfig::default();
        let result = config.apply_env(|key| (key == MAX_CONCURRENCY_ENV).then(|| "many".to_owned()));
        assert!(matches!(result, Err(ConfigError::Invalid { key, .. }) if key == MAX_CONCURRENCY_ENV));
    }

    #[test]
    fn test_unknown_default_profile_is_invalid() {
        let config = SiloConfig::from_toml_str(r#"default_profile = "missing""#).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { key, .. }) if key == "default_profile"
        ));
    }

    #[test]
    fn test_profile_without_secret_is_invalid() {
        let config = SiloConfig::from_toml_str(
            r#"
[profiles.bare]
url = "http://localhost:9000"
access_key = "minio"
"#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_profile_with_bad_url_is_invalid() {
        let config = SiloConfig::from_toml_str(
            r#"
[profiles.broken]
url = "not a url"
access_key = "minio"
secret_key = "minio123"
"#,
        )
        .unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { key, .. }) if key == "profiles.broken.url"
        ));
    }

    #[test]
    fn test_zero_concurrency_is_invalid() {
        let config = SiloConfig::from_toml_str("[controller]\nmax_concurrency = 0\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = SiloConfig::load(file.path()).unwrap();
        assert_eq!(config.default_profile.as_deref(), Some("local"));
        assert!(config.profiles.contains_key("local"));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = SiloConfig::load(&dir.path().join("silo.toml"));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_malformed_toml() {
        let result = SiloConfig::from_toml_str("[controller\nmax_concurrency = 1");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }
}
