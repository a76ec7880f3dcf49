use anyhow::{Context, Result, bail};
use fleet_state::{LivenessThresholds, TrackingSettings};
use push_channel::BackoffPolicy;
use push_channel::backoff::MAX_EXACT_EXPONENT;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// =============================================================================
// File config (figment-deserialized from defaults / fleet.toml / env vars)
// =============================================================================
//
//   fleet.toml:   [reconnect]
//                 max_retries = 3
//
//   env var:      FLEET_RECONNECT__MAX_RETRIES=3   (double underscore = nesting)

pub const CONFIG_FILE: &str = "fleet.toml";

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub auth: AuthFileConfig,
    #[serde(default)]
    pub reconnect: ReconnectFileConfig,
    #[serde(default)]
    pub tracking: TrackingFileConfig,
}

/// Backend location (lives under `[server]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Timeout for request/response calls; push streams are unbounded
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Bearer credential (lives under `[auth]`).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AuthFileConfig {
    #[serde(default)]
    pub token: Option<String>,
    /// Read on every connection attempt, so an external refresher can rotate it
    #[serde(default)]
    pub token_file: Option<PathBuf>,
}

/// Reconnect backoff (lives under `[reconnect]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReconnectFileConfig {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_cap_exponent")]
    pub cap_exponent: u32,
    /// 0 = retry forever
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for ReconnectFileConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            cap_exponent: default_cap_exponent(),
            max_retries: default_max_retries(),
        }
    }
}

impl ReconnectFileConfig {
    pub fn policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_millis(self.base_delay_ms),
            self.cap_exponent,
            (self.max_retries > 0).then_some(self.max_retries),
        )
    }
}

/// Stream processor tunables (lives under `[tracking]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrackingFileConfig {
    #[serde(default = "default_max_buffer_size")]
    pub max_buffer_size: usize,
    #[serde(default = "default_liveness_interval_secs")]
    pub liveness_interval_secs: u64,
    #[serde(default = "default_fresh_secs")]
    pub fresh_secs: u64,
    #[serde(default = "default_stale_secs")]
    pub stale_secs: u64,
    #[serde(default = "default_notification_capacity")]
    pub notification_capacity: usize,
}

impl Default for TrackingFileConfig {
    fn default() -> Self {
        Self {
            max_buffer_size: default_max_buffer_size(),
            liveness_interval_secs: default_liveness_interval_secs(),
            fresh_secs: default_fresh_secs(),
            stale_secs: default_stale_secs(),
            notification_capacity: default_notification_capacity(),
        }
    }
}

fn default_base_url() -> String {
    "http://127.0.0.1:8000".to_string()
}
fn default_request_timeout_secs() -> u64 {
    30
}
fn default_base_delay_ms() -> u64 {
    1000
}
fn default_cap_exponent() -> u32 {
    5
}
fn default_max_retries() -> u32 {
    10
}
fn default_max_buffer_size() -> usize {
    100
}
fn default_liveness_interval_secs() -> u64 {
    10
}
fn default_fresh_secs() -> u64 {
    60
}
fn default_stale_secs() -> u64 {
    120
}
fn default_notification_capacity() -> usize {
    50
}

/// Build a figment that layers: defaults → fleet.toml → FLEET_* env vars.
pub fn load_config(config_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(config_dir.join(CONFIG_FILE)))
        .merge(Env::prefixed("FLEET_").split("__"))
}

// =============================================================================
// Resolved config
// =============================================================================

#[derive(Clone, Debug)]
pub struct FleetConfig {
    pub config_dir: PathBuf,
    pub file: FileConfig,
}

impl FleetConfig {
    pub fn new(config_dir: Option<PathBuf>) -> Result<Self> {
        let config_dir = match config_dir {
            Some(dir) => dir,
            None => dirs::config_dir()
                .context("Could not determine config directory")?
                .join("fleet-console"),
        };

        let file: FileConfig = load_config(&config_dir)
            .extract()
            .with_context(|| format!("Invalid configuration in {}", config_dir.display()))?;
        file.validate()?;

        Ok(Self { config_dir, file })
    }

    pub fn config_path(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.file.server.request_timeout_secs)
    }

    pub fn tracking_settings(&self) -> TrackingSettings {
        let t = &self.file.tracking;
        TrackingSettings {
            backoff: self.file.reconnect.policy(),
            max_buffer_size: t.max_buffer_size,
            liveness: LivenessThresholds {
                fresh: Duration::from_secs(t.fresh_secs),
                stale: Duration::from_secs(t.stale_secs),
            },
            liveness_interval: Duration::from_secs(t.liveness_interval_secs),
            notification_capacity: t.notification_capacity,
        }
    }
}

impl FileConfig {
    pub fn validate(&self) -> Result<()> {
        let url = &self.server.base_url;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            bail!("server.base_url must be an http(s) URL, got {:?}", url);
        }
        if self.reconnect.base_delay_ms == 0 {
            bail!("reconnect.base_delay_ms must be positive");
        }
        if self.reconnect.cap_exponent > MAX_EXACT_EXPONENT {
            bail!(
                "reconnect.cap_exponent must be at most {}, got {}",
                MAX_EXACT_EXPONENT,
                self.reconnect.cap_exponent
            );
        }
        if self.tracking.max_buffer_size == 0 {
            bail!("tracking.max_buffer_size must be at least 1");
        }
        if self.tracking.notification_capacity == 0 {
            bail!("tracking.notification_capacity must be at least 1");
        }
        if self.tracking.liveness_interval_secs == 0 {
            bail!("tracking.liveness_interval_secs must be positive");
        }
        if self.tracking.fresh_secs >= self.tracking.stale_secs {
            bail!(
                "tracking.fresh_secs ({}) must be below tracking.stale_secs ({})",
                self.tracking.fresh_secs,
                self.tracking.stale_secs
            );
        }
        Ok(())
    }
}
