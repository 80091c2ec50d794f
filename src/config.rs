//! Server configuration loaded via Figment.
//!
//! Configuration is loaded from (in order of precedence):
//! 1. Environment variables prefixed with `AOI_`
//! 2. TOML configuration file (default: `aoi.toml`)
//!
//! # Environment Variable Overrides
//!
//! Any configuration value can be overridden via environment variables with
//! the `AOI_` prefix:
//!
//! ```text
//! AOI_SHARED_ROOT=/srv/aoi/shared
//! AOI_PRODUCTS_ROOT=/srv/aoi/config/products
//! AOI_BARCODE_LINK_URL=http://mes.local/api/link
//! AOI_BARCODE_LINK_TIMEOUT=3s
//! AOI_SESSION_TTL=7d
//! ```
//!
//! Durations are humantime-encoded (`3s`, `500ms`, `7d`).

use crate::error::{AoiError, AppResult};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_client_mount_prefix() -> String {
    "/mnt/visual-aoi-shared".to_string()
}

fn default_link_timeout() -> Duration {
    Duration::from_secs(3)
}

fn default_link_enabled() -> bool {
    true
}

fn default_session_ttl() -> Duration {
    // 7 days
    Duration::from_secs(7 * 24 * 60 * 60)
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

/// Top-level server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Absolute path to the shared session tree (`<shared_root>/sessions/...`).
    pub shared_root: PathBuf,

    /// Absolute path to the product/golden tree
    /// (`<products_root>/<product>/golden_rois/roi_<idx>/...`).
    pub products_root: PathBuf,

    /// Prefix substituted for `shared_root` in every path returned to clients.
    #[serde(default = "default_client_mount_prefix")]
    pub client_mount_prefix: String,

    /// URL of the external barcode linking service. Empty = linking skipped.
    #[serde(default)]
    pub barcode_link_url: String,

    /// Timeout for a single linking RPC.
    #[serde(default = "default_link_timeout", with = "humantime_serde")]
    pub barcode_link_timeout: Duration,

    /// Master switch for barcode linking.
    #[serde(default = "default_link_enabled")]
    pub barcode_link_enabled: bool,

    /// Per-inspection deadline. Absent = no deadline.
    #[serde(default, with = "humantime_serde::option")]
    pub inspection_deadline: Option<Duration>,

    /// Upper bound on per-inspection ROI parallelism.
    /// Absent = hardware parallelism.
    #[serde(default)]
    pub worker_pool_max: Option<usize>,

    /// Age after which an idle session directory is reaped.
    #[serde(default = "default_session_ttl", with = "humantime_serde")]
    pub session_ttl: Duration,

    /// Listen address for the HTTP adapter.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Settings {
    /// Loads settings from `aoi.toml` (if present) and `AOI_`-prefixed
    /// environment variables, then validates them.
    pub fn load() -> AppResult<Self> {
        Self::load_from("aoi.toml")
    }

    /// Loads settings from a specific TOML file plus the environment.
    pub fn load_from(path: impl AsRef<Path>) -> AppResult<Self> {
        let settings: Settings = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("AOI_"))
            .extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validates semantic constraints that parsing alone cannot catch.
    pub fn validate(&self) -> AppResult<()> {
        if !self.shared_root.is_absolute() {
            return Err(AoiError::Configuration(format!(
                "shared_root must be an absolute path, got '{}'",
                self.shared_root.display()
            )));
        }
        if !self.products_root.is_absolute() {
            return Err(AoiError::Configuration(format!(
                "products_root must be an absolute path, got '{}'",
                self.products_root.display()
            )));
        }
        if self.client_mount_prefix.is_empty() {
            return Err(AoiError::Configuration(
                "client_mount_prefix must not be empty".to_string(),
            ));
        }
        if let Some(max) = self.worker_pool_max {
            if max == 0 {
                return Err(AoiError::Configuration(
                    "worker_pool_max must be at least 1".to_string(),
                ));
            }
        }
        if self.barcode_link_enabled
            && !self.barcode_link_url.is_empty()
            && self.barcode_link_timeout < Duration::from_secs(1)
        {
            tracing::warn!(
                timeout = ?self.barcode_link_timeout,
                "barcode_link_timeout below the recommended 1s minimum"
            );
        }
        Ok(())
    }

    /// Root of the per-session directory tree.
    pub fn sessions_root(&self) -> PathBuf {
        self.shared_root.join("sessions")
    }

    /// Effective per-inspection worker pool bound.
    pub fn worker_pool(&self) -> usize {
        self.worker_pool_max.unwrap_or_else(num_cpus::get).max(1)
    }

    /// Builds a settings value for tests rooted at the given directories.
    pub fn for_roots(shared_root: impl Into<PathBuf>, products_root: impl Into<PathBuf>) -> Self {
        Self {
            shared_root: shared_root.into(),
            products_root: products_root.into(),
            client_mount_prefix: default_client_mount_prefix(),
            barcode_link_url: String::new(),
            barcode_link_timeout: default_link_timeout(),
            barcode_link_enabled: true,
            inspection_deadline: None,
            worker_pool_max: None,
            session_ttl: default_session_ttl(),
            bind_addr: default_bind_addr(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn load_from_env_overrides() {
        std::env::set_var("AOI_SHARED_ROOT", "/srv/aoi/shared");
        std::env::set_var("AOI_PRODUCTS_ROOT", "/srv/aoi/products");
        std::env::set_var("AOI_BARCODE_LINK_TIMEOUT", "5s");
        std::env::set_var("AOI_SESSION_TTL", "1d");

        let settings = Settings::load_from("/nonexistent/aoi.toml").unwrap();
        assert_eq!(settings.shared_root, PathBuf::from("/srv/aoi/shared"));
        assert_eq!(settings.barcode_link_timeout, Duration::from_secs(5));
        assert_eq!(settings.session_ttl, Duration::from_secs(24 * 60 * 60));
        assert_eq!(settings.client_mount_prefix, "/mnt/visual-aoi-shared");
        assert!(settings.barcode_link_enabled);
        assert!(settings.inspection_deadline.is_none());

        std::env::remove_var("AOI_SHARED_ROOT");
        std::env::remove_var("AOI_PRODUCTS_ROOT");
        std::env::remove_var("AOI_BARCODE_LINK_TIMEOUT");
        std::env::remove_var("AOI_SESSION_TTL");
    }

    #[test]
    #[serial]
    fn relative_root_is_rejected() {
        let mut settings = Settings::for_roots("/srv/shared", "/srv/products");
        settings.shared_root = PathBuf::from("relative/shared");
        assert!(matches!(
            settings.validate(),
            Err(AoiError::Configuration(_))
        ));
    }

    #[test]
    #[serial]
    fn zero_worker_pool_is_rejected() {
        let mut settings = Settings::for_roots("/srv/shared", "/srv/products");
        settings.worker_pool_max = Some(0);
        assert!(settings.validate().is_err());
        settings.worker_pool_max = Some(4);
        assert_eq!(settings.worker_pool(), 4);
    }
}
