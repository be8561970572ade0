//! # Sync Configuration
//!
//! Configuration management for the sync engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     TILL_REMOTE_URL=https://api.example.com/rest/v1                    │
//! │     TILL_SYNC_FREQUENCY=hourly                                         │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/till-pos/sync.toml (Linux)                               │
//! │     ~/Library/Application Support/com.till.pos/sync.toml (macOS)       │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     batch of 5, 500ms cooldown, realtime frequency                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # sync.toml
//! [device]
//! id = "550e8400-e29b-41d4-a716-446655440000"
//! name = "Register 1"
//!
//! [remote]
//! base_url = "https://api.example.com/rest/v1"
//! api_key = "public-anon-key"
//! request_timeout_secs = 15
//!
//! [sync]
//! batch_size = 5
//! batch_cooldown_ms = 500
//! frequency = "realtime"  # realtime | hourly | daily | manual
//! sync_on_reconnect = true
//!
//! [tenant]
//! resolution_order = ["session", "cached_setting"]
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};
use crate::tenant::TenantSource;

// =============================================================================
// Sync Frequency
// =============================================================================

/// How often the background trigger runs a pass on its own.
///
/// ```text
/// REALTIME (default)   every 60 seconds
/// HOURLY               every hour
/// DAILY                every 24 hours
/// MANUAL               never; only explicit sync_now() and reconnects
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncFrequency {
    #[default]
    Realtime,
    Hourly,
    Daily,
    Manual,
}

impl SyncFrequency {
    /// Returns the timer period, or `None` when no timer should run.
    pub fn interval(&self) -> Option<Duration> {
        match self {
            SyncFrequency::Realtime => Some(Duration::from_secs(60)),
            SyncFrequency::Hourly => Some(Duration::from_secs(60 * 60)),
            SyncFrequency::Daily => Some(Duration::from_secs(24 * 60 * 60)),
            SyncFrequency::Manual => None,
        }
    }
}

impl std::fmt::Display for SyncFrequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncFrequency::Realtime => write!(f, "realtime"),
            SyncFrequency::Hourly => write!(f, "hourly"),
            SyncFrequency::Daily => write!(f, "daily"),
            SyncFrequency::Manual => write!(f, "manual"),
        }
    }
}

impl std::str::FromStr for SyncFrequency {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "realtime" | "real_time" | "minute" => Ok(SyncFrequency::Realtime),
            "hourly" => Ok(SyncFrequency::Hourly),
            "daily" => Ok(SyncFrequency::Daily),
            "manual" | "off" => Ok(SyncFrequency::Manual),
            other => Err(SyncError::InvalidConfig(format!(
                "Unknown sync frequency: '{}'. Valid options: realtime, hourly, daily, manual",
                other
            ))),
        }
    }
}

// =============================================================================
// Device Configuration
// =============================================================================

/// Configuration for this device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Unique device identifier (UUID v4).
    /// Auto-generated on first run if not provided.
    pub id: String,

    /// Human-readable device name (e.g., "Register 1").
    #[serde(default = "default_device_name")]
    pub name: String,
}

fn default_device_name() -> String {
    "POS Terminal".to_string()
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            id: Uuid::new_v4().to_string(),
            name: default_device_name(),
        }
    }
}

// =============================================================================
// Remote Settings
// =============================================================================

/// Where the remote store lives and how to talk to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSettings {
    /// REST base URL, e.g. `https://api.example.com/rest/v1`.
    /// When absent the device runs queue-only.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Project API key sent as the `apikey` header.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Per-request timeout (seconds).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Path probed by the health check, relative to `base_url`.
    #[serde(default = "default_health_path")]
    pub health_path: String,

    /// Interval between health probes (seconds).
    #[serde(default = "default_health_interval")]
    pub health_interval_secs: u64,
}

fn default_request_timeout() -> u64 {
    15
}

fn default_health_path() -> String {
    "health".to_string()
}

fn default_health_interval() -> u64 {
    30
}

impl Default for RemoteSettings {
    fn default() -> Self {
        RemoteSettings {
            base_url: None,
            api_key: None,
            request_timeout_secs: default_request_timeout(),
            health_path: default_health_path(),
            health_interval_secs: default_health_interval(),
        }
    }
}

impl RemoteSettings {
    /// Parses `base_url`, if set.
    pub fn parsed_base_url(&self) -> SyncResult<Option<Url>> {
        let Some(raw) = self.base_url.as_deref() else {
            return Ok(None);
        };

        let url = Url::parse(raw)?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(SyncError::InvalidUrl(format!(
                "Remote URL must start with http:// or https://, got: {}",
                raw
            )));
        }
        Ok(Some(url))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs)
    }
}

// =============================================================================
// Sync Settings
// =============================================================================

/// Sync behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Number of queued sales submitted concurrently per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Pause between batches (milliseconds).
    #[serde(default = "default_batch_cooldown")]
    pub batch_cooldown_ms: u64,

    /// Background timer frequency.
    #[serde(default)]
    pub frequency: SyncFrequency,

    /// Run a pass as soon as connectivity returns.
    #[serde(default = "default_true")]
    pub sync_on_reconnect: bool,

    /// Refresh the product cache after a completed automatic pass.
    #[serde(default = "default_true")]
    pub refresh_catalog: bool,

    /// Upper bound for one sale's submission (seconds).
    #[serde(default = "default_submit_timeout")]
    pub submit_timeout_secs: u64,

    /// Tag registered with the OS background scheduler.
    #[serde(default = "default_background_tag")]
    pub background_tag: String,
}

fn default_batch_size() -> usize {
    5
}
fn default_batch_cooldown() -> u64 {
    500
}
fn default_true() -> bool {
    true
}
fn default_submit_timeout() -> u64 {
    30
}
fn default_background_tag() -> String {
    "till-sync".to_string()
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            batch_size: default_batch_size(),
            batch_cooldown_ms: default_batch_cooldown(),
            frequency: SyncFrequency::default(),
            sync_on_reconnect: true,
            refresh_catalog: true,
            submit_timeout_secs: default_submit_timeout(),
            background_tag: default_background_tag(),
        }
    }
}

// =============================================================================
// Tenant Settings
// =============================================================================

/// Tenant source kinds as written in the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantSourceKind {
    Session,
    CachedSetting,
    Configured,
}

/// How the tenant for a sale is determined.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantSettings {
    /// Sources tried in order; first hit wins.
    #[serde(default = "default_resolution_order")]
    pub resolution_order: Vec<TenantSourceKind>,

    /// Tenant used by the `configured` source (single-tenant installs).
    #[serde(default)]
    pub configured_tenant_id: Option<String>,

    /// HS256 secret for decoding session access tokens.
    #[serde(default)]
    pub jwt_secret: Option<String>,
}

fn default_resolution_order() -> Vec<TenantSourceKind> {
    vec![TenantSourceKind::Session, TenantSourceKind::CachedSetting]
}

impl Default for TenantSettings {
    fn default() -> Self {
        TenantSettings {
            resolution_order: default_resolution_order(),
            configured_tenant_id: None,
            jwt_secret: None,
        }
    }
}

impl TenantSettings {
    /// Builds the resolver's source list.
    pub fn sources(&self) -> SyncResult<Vec<TenantSource>> {
        self.resolution_order
            .iter()
            .map(|kind| match kind {
                TenantSourceKind::Session => Ok(TenantSource::Session),
                TenantSourceKind::CachedSetting => Ok(TenantSource::CachedSetting),
                TenantSourceKind::Configured => self
                    .configured_tenant_id
                    .clone()
                    .filter(|id| !id.trim().is_empty())
                    .map(TenantSource::Configured)
                    .ok_or_else(|| {
                        SyncError::InvalidConfig(
                            "resolution_order contains 'configured' but configured_tenant_id is not set"
                                .into(),
                        )
                    }),
            })
            .collect()
    }
}

// =============================================================================
// Main Sync Configuration
// =============================================================================

/// Complete sync configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Device-specific configuration.
    #[serde(default)]
    pub device: DeviceConfig,

    /// Remote store settings.
    #[serde(default)]
    pub remote: RemoteSettings,

    /// Sync behavior settings.
    #[serde(default)]
    pub sync: SyncSettings,

    /// Tenant resolution settings.
    #[serde(default)]
    pub tenant: TenantSettings,
}

impl SyncConfig {
    /// Creates a new config with defaults and a generated device ID.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (sync.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading sync config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load sync config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents).map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;

        info!(?path, "Sync config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.device.id.trim().is_empty() {
            return Err(SyncError::MissingDeviceId);
        }

        self.remote.parsed_base_url()?;

        if self.remote.request_timeout_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "request_timeout_secs must be greater than 0".into(),
            ));
        }

        if self.sync.batch_size == 0 {
            return Err(SyncError::InvalidConfig(
                "batch_size must be greater than 0".into(),
            ));
        }

        if self.sync.submit_timeout_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "submit_timeout_secs must be greater than 0".into(),
            ));
        }

        if self.tenant.resolution_order.is_empty() {
            return Err(SyncError::InvalidConfig(
                "tenant resolution_order must name at least one source".into(),
            ));
        }

        self.tenant.sources()?;

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(id) = std::env::var("TILL_DEVICE_ID") {
            debug!(device_id = %id, "Overriding device ID from environment");
            self.device.id = id;
        }

        if let Ok(name) = std::env::var("TILL_DEVICE_NAME") {
            self.device.name = name;
        }

        if let Ok(url) = std::env::var("TILL_REMOTE_URL") {
            debug!(url = %url, "Overriding remote URL from environment");
            self.remote.base_url = Some(url);
        }

        if let Ok(key) = std::env::var("TILL_API_KEY") {
            self.remote.api_key = Some(key);
        }

        if let Ok(frequency) = std::env::var("TILL_SYNC_FREQUENCY") {
            match frequency.parse() {
                Ok(parsed) => {
                    debug!(frequency = %frequency, "Overriding sync frequency from environment");
                    self.sync.frequency = parsed;
                }
                Err(_) => warn!(frequency = %frequency, "Unknown sync frequency in environment"),
            }
        }

        if let Ok(size) = std::env::var("TILL_BATCH_SIZE") {
            if let Ok(n) = size.parse::<usize>() {
                self.sync.batch_size = n;
            }
        }

        if let Ok(tenant) = std::env::var("TILL_TENANT_ID") {
            debug!(tenant_id = %tenant, "Configured tenant from environment");
            self.tenant.configured_tenant_id = Some(tenant);
            if !self
                .tenant
                .resolution_order
                .contains(&TenantSourceKind::Configured)
            {
                self.tenant
                    .resolution_order
                    .push(TenantSourceKind::Configured);
            }
        }

        if let Ok(secret) = std::env::var("TILL_JWT_SECRET") {
            self.tenant.jwt_secret = Some(secret);
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "till", "pos")
            .map(|dirs| dirs.config_dir().join("sync.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Returns the device ID.
    pub fn device_id(&self) -> &str {
        &self.device.id
    }

    /// Returns the remote base URL if configured.
    pub fn remote_url(&self) -> Option<&str> {
        self.remote.base_url.as_deref()
    }

    /// Returns the timer frequency.
    pub fn frequency(&self) -> SyncFrequency {
        self.sync.frequency
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frequency_parsing() {
        assert_eq!("realtime".parse::<SyncFrequency>().unwrap(), SyncFrequency::Realtime);
        assert_eq!("HOURLY".parse::<SyncFrequency>().unwrap(), SyncFrequency::Hourly);
        assert_eq!("daily".parse::<SyncFrequency>().unwrap(), SyncFrequency::Daily);
        assert_eq!("off".parse::<SyncFrequency>().unwrap(), SyncFrequency::Manual);
        assert!("weekly".parse::<SyncFrequency>().is_err());
    }

    #[test]
    fn test_frequency_intervals() {
        assert_eq!(SyncFrequency::Realtime.interval(), Some(Duration::from_secs(60)));
        assert_eq!(SyncFrequency::Daily.interval(), Some(Duration::from_secs(86_400)));
        assert_eq!(SyncFrequency::Manual.interval(), None);
    }

    #[test]
    fn test_default_config() {
        let config = SyncConfig::default();
        assert!(!config.device.id.is_empty());
        assert_eq!(config.sync.batch_size, 5);
        assert_eq!(config.sync.batch_cooldown_ms, 500);
        assert_eq!(config.frequency(), SyncFrequency::Realtime);
        assert!(config.sync.sync_on_reconnect);
        assert_eq!(
            config.tenant.resolution_order,
            vec![TenantSourceKind::Session, TenantSourceKind::CachedSetting]
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = SyncConfig::default();

        config.device.id = String::new();
        assert!(matches!(config.validate(), Err(SyncError::MissingDeviceId)));

        config.device.id = "register-1".to_string();
        config.remote.base_url = Some("ftp://example.com".to_string());
        assert!(matches!(config.validate(), Err(SyncError::InvalidUrl(_))));

        config.remote.base_url = Some("not a url".to_string());
        assert!(matches!(config.validate(), Err(SyncError::InvalidUrl(_))));

        config.remote.base_url = Some("https://api.example.com/rest/v1".to_string());
        assert!(config.validate().is_ok());

        config.sync.batch_size = 0;
        assert!(config.validate().unwrap_err().is_config_error());
    }

    #[test]
    fn test_configured_source_requires_tenant() {
        let mut tenant = TenantSettings::default();
        tenant.resolution_order.push(TenantSourceKind::Configured);
        assert!(tenant.sources().is_err());

        tenant.configured_tenant_id = Some("tenant-9".to_string());
        let sources = tenant.sources().unwrap();
        assert_eq!(sources.len(), 3);
        assert_eq!(sources[2], TenantSource::Configured("tenant-9".to_string()));
    }

    #[test]
    fn test_toml_round_trip_keeps_sections() {
        let toml_str = r#"
            [device]
            id = "register-7"

            [remote]
            base_url = "https://api.example.com/rest/v1"

            [sync]
            frequency = "hourly"
            batch_size = 10

            [tenant]
            resolution_order = ["cached_setting", "configured"]
            configured_tenant_id = "shop-1"
        "#;

        let config: SyncConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.device_id(), "register-7");
        assert_eq!(config.device.name, "POS Terminal");
        assert_eq!(config.frequency(), SyncFrequency::Hourly);
        assert_eq!(config.sync.batch_size, 10);
        assert_eq!(config.sync.batch_cooldown_ms, 500);
        assert!(config.validate().is_ok());

        let written = toml::to_string_pretty(&config).unwrap();
        assert!(written.contains("[remote]"));
        assert!(written.contains("[tenant]"));
    }

    #[test]
    fn test_save_and_load_from_path() {
        let dir = std::env::temp_dir().join(format!("till-sync-config-{}", Uuid::new_v4()));
        let path = dir.join("sync.toml");

        let mut config = SyncConfig::default();
        config.device.name = "Register 2".to_string();
        config.sync.frequency = SyncFrequency::Daily;
        config.save(Some(path.clone())).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let loaded: SyncConfig = toml::from_str(&contents).unwrap();
        assert_eq!(loaded.device.id, config.device.id);
        assert_eq!(loaded.device.name, "Register 2");
        assert_eq!(loaded.frequency(), SyncFrequency::Daily);

        let _ = std::fs::remove_dir_all(dir);
    }
}
