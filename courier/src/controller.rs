use std::path::{Path, PathBuf};

use courier_common::internal;
use courier_dispatch::{Dispatcher, DispatcherConfig, backends::BackendConfig};
use serde::Deserialize;

/// Environment variable naming the configuration file
pub const CONFIG_ENV: &str = "COURIER_CONFIG";

/// Configuration files tried when neither a flag nor [`CONFIG_ENV`] names one
pub const DEFAULT_CONFIG_PATHS: [&str; 2] =
    ["./courier.config.ron", "/etc/courier/courier.config.ron"];

/// Top-level application configuration
///
/// # Examples
///
/// ```ron
/// Courier (
///     dispatcher: (
///         rate_limit: (max_requests: 10, window_ms: 60000),
///     ),
///     backends: [
///         Simulated(name: "MockProviderA", failure_rate: 0.3),
///         Simulated(name: "MockProviderB", failure_rate: 0.2),
///     ],
/// )
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct Courier {
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    /// Backends in routing order
    #[serde(alias = "backend", default = "BackendConfig::defaults")]
    pub backends: Vec<BackendConfig>,
}

impl Default for Courier {
    fn default() -> Self {
        Self {
            dispatcher: DispatcherConfig::default(),
            backends: BackendConfig::defaults(),
        }
    }
}

impl Courier {
    /// Parse a RON configuration.
    ///
    /// `Some` may be omitted around optional values, and so may the inner
    /// parentheses of backend variants.
    pub fn from_ron(content: &str) -> anyhow::Result<Self> {
        let courier = ron::Options::default()
            .with_default_extension(
                ron::extensions::Extensions::IMPLICIT_SOME
                    | ron::extensions::Extensions::UNWRAP_VARIANT_NEWTYPES,
            )
            .from_str::<Self>(content)?;

        for backend in &courier.backends {
            backend.validate()?;
        }
        Ok(courier)
    }

    /// Load the configuration file located by [`find_config_file`], falling
    /// back to the defaults when there is none.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        let env_path = std::env::var(CONFIG_ENV).ok();
        let Some(config_path) = find_config_file(explicit, env_path.as_deref())? else {
            internal!(level = INFO, "No configuration file found, using defaults");
            return Ok(Self::default());
        };

        let config_content = std::fs::read_to_string(&config_path).map_err(|e| {
            anyhow::anyhow!(
                "Failed to read config from {}: {}",
                config_path.display(),
                e
            )
        })?;

        internal!(level = INFO, path = %config_path.display(), "Loaded configuration");
        Self::from_ron(&config_content)
            .map_err(|e| anyhow::anyhow!("Invalid config in {}: {e}", config_path.display()))
    }

    /// Build a dispatcher over the configured backends
    pub fn dispatcher(&self) -> anyhow::Result<Dispatcher> {
        let backends = self.backends.iter().map(BackendConfig::build).collect();
        Ok(Dispatcher::new(&self.dispatcher, backends)?)
    }
}

/// Find the configuration file using the following precedence:
/// 1. `explicit` (the `--config` flag), which must exist
/// 2. `env_path` (the `COURIER_CONFIG` environment variable), which must exist
/// 3. ./courier.config.ron (current working directory)
/// 4. /etc/courier/courier.config.ron (system-wide config)
///
/// Returns `None` when none of the default paths exist.
pub fn find_config_file(
    explicit: Option<&Path>,
    env_path: Option<&str>,
) -> anyhow::Result<Option<PathBuf>> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(Some(path.to_path_buf()));
        }
        anyhow::bail!("Config file does not exist: {}", path.display());
    }

    if let Some(env_path) = env_path {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(Some(path));
        }
        anyhow::bail!(
            "{CONFIG_ENV} points to non-existent file: {}",
            path.display()
        );
    }

    Ok(DEFAULT_CONFIG_PATHS
        .iter()
        .map(PathBuf::from)
        .find(|path| path.exists()))
}
