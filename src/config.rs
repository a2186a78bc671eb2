//! Configuration for GPU job coordination.
//!
//! [`GpuConfig`] is loaded from a TOML document or from the environment.
//! Every field has a default, so an empty document or environment yields
//! a working configuration.
//!
//! # Example Configuration File
//!
//! ```toml
//! redis_url = "redis://gpu-broker:6379"
//! offline = false
//!
//! [timeouts]
//! esmfold_secs = 600
//! poll_interval_secs = 2.5
//!
//! [lock]
//! max_retries = 20
//! ```
//!
//! # Environment
//!
//! | Variable | Field | Default |
//! |----------|-------|---------|
//! | `MOCK_GPU` | `offline` (`true`/`1`/`yes`) | `false` |
//! | `REDIS_URL`, or `REDIS_HOST` + `REDIS_PORT` | `redis_url` | `redis://localhost:6379` |
//! | `TIMEOUT_ESMFOLD`, `TIMEOUT_CLEAN_EC`, `TIMEOUT_DEEPENZYME`, `TIMEOUT_TEMBERTURE`, `TIMEOUT_FLAN`, `TIMEOUT_FPOCKET` | `timeouts.*_secs` | 180 |
//! | `GPU_POLL_INTERVAL` | `timeouts.poll_interval_secs` | 5 |
//! | `CHECKPOINT_INTERVAL` | `timeouts.checkpoint_interval_secs` | 30 |
//! | `LOCK_TIMEOUT` | `lock.timeout_secs` | 30 |
//! | `LOCK_RETRY_INTERVAL` | `lock.retry_interval_secs` | 0.5 |
//! | `LOCK_MAX_RETRIES` | `lock.max_retries` | 10 |
//!
//! Each name may also carry a `SYNDE_` prefix; the prefixed form wins when
//! both are set.
//!
//! # Limits
//!
//! Both loaders reject a lock timeout outside 1 s to 24 h and a poll
//! interval below 10 ms with [`ConfigError::OutOfRange`].

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::ENV_PREFIX;
use crate::error::ConfigError;
use crate::lock::LockOptions;
use crate::types::JobKind;

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpuConfig {
    /// Shared store for locks and job state.
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Route every submission to deterministic same-process stand-ins.
    #[serde(default)]
    pub offline: bool,

    #[serde(default)]
    pub timeouts: TimeoutSettings,

    #[serde(default)]
    pub lock: LockSettings,
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_job_timeout() -> u64 {
    180
}

fn default_poll_interval() -> f64 {
    5.0
}

fn default_checkpoint_interval() -> f64 {
    30.0
}

fn default_lock_timeout() -> u64 {
    30
}

fn default_retry_interval() -> f64 {
    0.5
}

fn default_max_retries() -> u32 {
    10
}

/// Per-kind job timeouts and polling cadence, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeoutSettings {
    #[serde(default = "default_job_timeout")]
    pub esmfold_secs: u64,
    #[serde(default = "default_job_timeout")]
    pub clean_ec_secs: u64,
    #[serde(default = "default_job_timeout")]
    pub deepenzyme_secs: u64,
    #[serde(default = "default_job_timeout")]
    pub temberture_secs: u64,
    #[serde(default = "default_job_timeout")]
    pub flan_secs: u64,
    #[serde(default = "default_job_timeout")]
    pub fpocket_secs: u64,

    /// Seconds between readiness checks.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: f64,

    /// Minimum seconds between progress callbacks.
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval_secs: f64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            esmfold_secs: default_job_timeout(),
            clean_ec_secs: default_job_timeout(),
            deepenzyme_secs: default_job_timeout(),
            temberture_secs: default_job_timeout(),
            flan_secs: default_job_timeout(),
            fpocket_secs: default_job_timeout(),
            poll_interval_secs: default_poll_interval(),
            checkpoint_interval_secs: default_checkpoint_interval(),
        }
    }
}

/// Distributed lock defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockSettings {
    #[serde(default = "default_lock_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_retry_interval")]
    pub retry_interval_secs: f64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_lock_timeout(),
            retry_interval_secs: default_retry_interval(),
            max_retries: default_max_retries(),
        }
    }
}

impl Default for GpuConfig {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            offline: false,
            timeouts: TimeoutSettings::default(),
            lock: LockSettings::default(),
        }
    }
}

/// Longest lock expiry a configuration may ask for.
pub const MAX_LOCK_TIMEOUT_SECS: u64 = 24 * 60 * 60;

/// Shortest poll interval; anything faster spins on the handle.
pub const MIN_POLL_INTERVAL_SECS: f64 = 0.01;

/// Seconds as a [`Duration`]; negative or non-finite values become zero.
fn secs_f64(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO)
}

impl GpuConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the configuration to TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(Into::into)
    }

    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidEnv`] if a recognised variable holds a value
    /// that does not parse. Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(std::env::vars())
    }

    /// Load configuration from `(name, value)` pairs shaped like the
    /// environment.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    /// use synde_gpu::{GpuConfig, JobKind};
    ///
    /// let config = GpuConfig::from_vars([
    ///     ("MOCK_GPU", "yes"),
    ///     ("SYNDE_TIMEOUT_ESMFOLD", "600"),
    /// ])
    /// .unwrap();
    /// assert!(config.offline);
    /// assert_eq!(config.timeout_for(JobKind::Esmfold), Duration::from_secs(600));
    /// ```
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let env = EnvVars::collect(vars);
        let mut config = Self::default();

        if let Some((_, value)) = env.get("MOCK_GPU") {
            config.offline = matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "true" | "1" | "yes"
            );
        }

        if let Some((_, url)) = env.get("REDIS_URL") {
            config.redis_url = url.clone();
        } else if let Some((_, host)) = env.get("REDIS_HOST") {
            let port: u16 = env.parse("REDIS_PORT")?.unwrap_or(6379);
            config.redis_url = format!("redis://{host}:{port}");
        }

        let t = &mut config.timeouts;
        for (name, slot) in [
            ("TIMEOUT_ESMFOLD", &mut t.esmfold_secs),
            ("TIMEOUT_CLEAN_EC", &mut t.clean_ec_secs),
            ("TIMEOUT_DEEPENZYME", &mut t.deepenzyme_secs),
            ("TIMEOUT_TEMBERTURE", &mut t.temberture_secs),
            ("TIMEOUT_FLAN", &mut t.flan_secs),
            ("TIMEOUT_FPOCKET", &mut t.fpocket_secs),
        ] {
            if let Some(secs) = env.parse(name)? {
                *slot = secs;
            }
        }
        if let Some(secs) = env.parse_secs("GPU_POLL_INTERVAL")? {
            t.poll_interval_secs = secs;
        }
        if let Some(secs) = env.parse_secs("CHECKPOINT_INTERVAL")? {
            t.checkpoint_interval_secs = secs;
        }

        if let Some(secs) = env.parse("LOCK_TIMEOUT")? {
            config.lock.timeout_secs = secs;
        }
        if let Some(secs) = env.parse_secs("LOCK_RETRY_INTERVAL")? {
            config.lock.retry_interval_secs = secs;
        }
        if let Some(retries) = env.parse("LOCK_MAX_RETRIES")? {
            config.lock.max_retries = retries;
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks the settings the loaders cannot express as types.
    ///
    /// # Errors
    ///
    /// [`ConfigError::OutOfRange`] naming the first offending setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_LOCK_TIMEOUT_SECS).contains(&self.lock.timeout_secs) {
            return Err(ConfigError::OutOfRange {
                field: "lock.timeout_secs",
                value: self.lock.timeout_secs.to_string(),
                reason: "must be between 1 and 86400 seconds",
            });
        }
        let poll = self.timeouts.poll_interval_secs;
        if !poll.is_finite() || poll < MIN_POLL_INTERVAL_SECS {
            return Err(ConfigError::OutOfRange {
                field: "timeouts.poll_interval_secs",
                value: poll.to_string(),
                reason: "must be at least 0.01 seconds",
            });
        }
        for (field, secs) in [
            (
                "timeouts.checkpoint_interval_secs",
                self.timeouts.checkpoint_interval_secs,
            ),
            ("lock.retry_interval_secs", self.lock.retry_interval_secs),
        ] {
            if !secs.is_finite() || secs < 0.0 {
                return Err(ConfigError::OutOfRange {
                    field,
                    value: secs.to_string(),
                    reason: "must be a non-negative number of seconds",
                });
            }
        }
        Ok(())
    }

    /// Timeout for one job kind.
    pub fn timeout_for(&self, kind: JobKind) -> Duration {
        let t = &self.timeouts;
        let secs = match kind {
            JobKind::Esmfold => t.esmfold_secs,
            JobKind::CleanEc => t.clean_ec_secs,
            JobKind::DeepEnzyme => t.deepenzyme_secs,
            JobKind::Temberture => t.temberture_secs,
            JobKind::FlanExtractor => t.flan_secs,
            JobKind::Fpocket => t.fpocket_secs,
        };
        Duration::from_secs(secs)
    }

    pub fn poll_interval(&self) -> Duration {
        secs_f64(self.timeouts.poll_interval_secs)
    }

    pub fn checkpoint_interval(&self) -> Duration {
        secs_f64(self.timeouts.checkpoint_interval_secs)
    }

    /// Blocking lock options built from the `lock` settings.
    pub fn lock_options(&self) -> LockOptions {
        LockOptions::default()
            .with_timeout(Duration::from_secs(self.lock.timeout_secs))
            .with_retries(
                self.lock.max_retries,
                secs_f64(self.lock.retry_interval_secs),
            )
    }
}

/// Environment snapshot keyed by unprefixed name.
///
/// Values keep the name they were found under, for error reporting.
struct EnvVars(HashMap<String, (String, String)>);

impl EnvVars {
    fn collect<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut plain = HashMap::new();
        let mut prefixed = HashMap::new();
        for (name, value) in vars {
            let name = name.as_ref();
            match name.strip_prefix(ENV_PREFIX) {
                Some(bare) => prefixed.insert(bare.to_string(), (name.to_string(), value.into())),
                None => plain.insert(name.to_string(), (name.to_string(), value.into())),
            };
        }
        plain.extend(prefixed);
        Self(plain)
    }

    fn get(&self, name: &str) -> Option<&(String, String)> {
        self.0.get(name)
    }

    fn parse<T: FromStr>(&self, name: &str) -> Result<Option<T>, ConfigError> {
        let Some((var, value)) = self.get(name) else {
            return Ok(None);
        };
        value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv {
                var: var.clone(),
                value: value.clone(),
            })
    }

    /// Parses a non-negative, finite number of seconds.
    fn parse_secs(&self, name: &str) -> Result<Option<f64>, ConfigError> {
        match self.parse::<f64>(name)? {
            Some(secs) if !secs.is_finite() || secs < 0.0 => {
                let (var, value) = self.get(name).cloned().unwrap_or_default();
                Err(ConfigError::InvalidEnv { var, value })
            }
            other => Ok(other),
        }
    }
}
