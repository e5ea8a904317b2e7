//! # Configuration Management
//!
//! Every KubeBao process reads its settings either from a YAML file passed
//! with `--config` or, when no file is given, from environment variables.
//! The component-specific structs live next to their components
//! ([`crate::backend::BackendConfig`], [`crate::kms::KmsConfig`],
//! [`crate::csi::CsiConfig`]); this module holds the shared plumbing.

mod env;

pub use env::{env_bool, env_duration, env_first, env_or};

use std::path::Path;

use serde::de::DeserializeOwned;

use crate::{Error, Result};

/// Load a `.env` file from the working directory when one exists.
///
/// Runs before logging is up, so problems go to stderr.
pub fn load_dotenv() {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Warning: Error loading .env file: {}", e);
        }
    }
}

/// Read and deserialize a YAML configuration file.
pub fn load_yaml_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|e| {
        Error::config(format!("failed to read config file {}: {}", path.display(), e))
    })?;
    serde_yaml::from_str(&raw).map_err(|e| {
        Error::config(format!("failed to parse config file {}: {}", path.display(), e))
    })
}
