//! Configuration error types.
//!
//! Structural errors carry the `serde_yaml` location so startup failures
//! point at the offending line.

use thiserror::Error;

/// Errors raised while loading or validating the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("client {0:?} is defined more than once")]
    DuplicateClient(String),

    #[error("system {system:?} is defined more than once under client {client:?}")]
    DuplicateSystem { client: String, system: String },

    #[error("virtual name {name:?} appears more than once under system {system:?}")]
    DuplicateVirtualName { system: String, name: String },

    #[error("map entry {name:?} under system {system:?} has an unrecognised shape")]
    UnknownMapShape { system: String, name: String },

    #[error("extension alias chain via {ext:?} in folder {folder:?}; aliases are single-level")]
    AliasChain { folder: String, ext: String },

    #[error("path {0:?} must be relative and must not contain '..'")]
    UnsafePath(String),

    #[error("filetype spec {0:?} is empty or malformed")]
    BadExtensionSpec(String),
}
