//! Config resolution shared by the commands

use crate::cli::error::HelpfulError;
use std::path::{Path, PathBuf};
use sunat_ingest::config::default_home;
use sunat_ingest::PipelineConfig;

/// Default config location: `$SUNAT_HOME/config.toml`
pub fn default_config_path() -> PathBuf {
    default_home().join("config.toml")
}

/// Load the config named on the command line, or the default one.
///
/// An explicit path must exist. The default path is optional and falls back
/// to built-in defaults.
pub fn load_config(explicit: Option<&Path>) -> anyhow::Result<PipelineConfig> {
    match explicit {
        Some(path) => {
            if !path.exists() {
                return Err(HelpfulError::config_not_found(path).into());
            }
            Ok(PipelineConfig::load(path)?)
        }
        None => Ok(PipelineConfig::load_or_default(&default_config_path())?),
    }
}
