//! TransFS core - configuration model and virtual path parsing
//!
//! This crate holds everything the rest of the workspace shares:
//! - the typed configuration model (clients, systems, map entries),
//! - filetype maps with extension aliasing,
//! - the virtual path parser,
//! - keyed single-flight locks used by the caches.
//!
//! Everything here is immutable after load and freely shareable; no
//! component in this crate performs filesystem I/O beyond reading the
//! configuration documents at startup.

pub mod config;
pub mod error;
pub mod filetypes;
pub mod paths;
pub mod sync;

pub use config::{Client, Config, DynamicMap, MapEntry, System, ZipMode};
pub use error::ConfigError;
pub use filetypes::{ExtensionSpec, FileTypeEntry};
pub use paths::{MapTarget, Parsed};
