/// `load_config` module: reads the YAML run configuration and applies environment overrides.
///
/// This is the only place where user-supplied YAML is parsed. The `mirror` section maps
/// directly onto [`MirrorConfig`]; every key in it is optional and falls back to the
/// engine's defaults.
///
/// # Environment overrides
/// - `RIS_MIRROR_OUTPUT_DIR`: replaces `output_dir`
/// - `RIS_MIRROR_BASE_URL`: replaces `mirror.portal.base_url`
/// - `RIS_MIRROR_DEBUG`: `true`/`1`/`yes` forces inline fan-out
///
/// # Errors
/// All errors are `anyhow::Error` with the config path in context and are surfaced at the
/// CLI boundary.
use anyhow::{anyhow, Context, Result};
use ris_mirror_core::config::MirrorConfig;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

pub const ENV_OUTPUT_DIR: &str = "RIS_MIRROR_OUTPUT_DIR";
pub const ENV_BASE_URL: &str = "RIS_MIRROR_BASE_URL";
pub const ENV_DEBUG: &str = "RIS_MIRROR_DEBUG";

#[derive(Debug, Deserialize)]
pub struct CliConfig {
    /// Root directory of the mirror on disk.
    pub output_dir: PathBuf,
    #[serde(default)]
    pub mirror: MirrorConfig,
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<CliConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = fs::read_to_string(path_ref).map_err(|e| {
        error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
        anyhow!("Failed to read config file {:?}: {}", path_ref, e)
    })?;

    let mut config: CliConfig = serde_yaml::from_str(&config_content).map_err(|e| {
        error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
        anyhow!("Failed to parse config YAML: {e}")
    })?;
    info!(config_path = ?path_ref, "Parsed config YAML successfully");

    apply_env_overrides(&mut config)?;
    config
        .mirror
        .validate()
        .with_context(|| format!("Invalid configuration in {:?}", path_ref))?;
    config.mirror.trace_loaded();
    Ok(config)
}

fn apply_env_overrides(config: &mut CliConfig) -> Result<()> {
    if let Ok(output_dir) = std::env::var(ENV_OUTPUT_DIR) {
        info!(output_dir = %output_dir, "Output directory overridden from environment");
        config.output_dir = PathBuf::from(output_dir);
    }
    if let Ok(base_url) = std::env::var(ENV_BASE_URL) {
        info!(base_url = %base_url, "Portal base URL overridden from environment");
        config.mirror.portal.base_url = base_url;
    }
    if let Ok(debug) = std::env::var(ENV_DEBUG) {
        config.mirror.debug = match debug.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => true,
            "0" | "false" | "no" | "" => false,
            other => {
                warn!(value = other, "Unrecognised {ENV_DEBUG} value");
                return Err(anyhow!("{ENV_DEBUG} must be a boolean, got {other:?}"));
            }
        };
    }
    Ok(())
}
