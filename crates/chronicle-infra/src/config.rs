//! Global configuration loader for Chronicle.
//!
//! Reads `config.toml` from the data directory (`~/.chronicle/` in production)
//! and deserializes it into [`GlobalConfig`]. Falls back to defaults when the
//! file is missing, malformed, or describes an invalid segmentation config.

use std::path::Path;

use chronicle_types::config::GlobalConfig;

use crate::filesystem::config_path;

/// Load global configuration from `{data_dir}/config.toml`.
///
/// - If the file does not exist, returns [`GlobalConfig::default()`].
/// - If the file exists but fails to parse or validate, logs a warning and
///   returns the default.
/// - Otherwise returns the parsed config.
pub async fn load_global_config(data_dir: &Path) -> GlobalConfig {
    let config_path = config_path(data_dir);

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return GlobalConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return GlobalConfig::default();
        }
    };

    let config = match toml::from_str::<GlobalConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            return GlobalConfig::default();
        }
    };

    if let Err(reason) = config.segmentation.validate() {
        tracing::warn!(
            "Invalid [segmentation] in {}: {reason}, using defaults",
            config_path.display()
        );
        return GlobalConfig::default();
    }

    config
}
