//! Error types for the Enco monitor service.
//!
//! This module defines all error types that can occur during the operation
//! of the service, including Bluetooth, D-Bus, I/O, configuration and
//! persistence errors.

use thiserror::Error;

/// Main error type for the Enco monitor service.
#[derive(Error, Debug)]
pub enum EncoError {
   #[error("Bluetooth error: {0}")]
   Bluetooth(#[from] bluer::Error),

   #[error("D-Bus error: {0}")]
   DBus(#[from] zbus::Error),

   #[error("I/O error: {0}")]
   Io(#[from] std::io::Error),

   #[error("Could not determine config directory")]
   ConfigDirNotFound,

   #[error("TOML parsing error: {0}")]
   TomlParse(#[from] toml::de::Error),

   #[error("TOML serialization error: {0}")]
   TomlSerialize(#[from] toml::ser::Error),

   #[error("Manager has been shut down")]
   ManagerShutdown,

   #[error("Services not resolved in time")]
   ServicesNotResolved,
}

/// Convenience type alias for Results with `EncoError`.
pub type Result<T> = std::result::Result<T, EncoError>;
