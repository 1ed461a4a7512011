//! Configuration management for the Enco monitor service.
//!
//! This module handles loading and saving configuration from disk,
//! including the device-name filter and the adapter selection.

use std::{env, fs, path::PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{EncoError, Result};

/// Main configuration structure for the service.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Config {
   /// Case-insensitive substring the advertised name must contain.
   #[serde(default = "default_name_pattern")]
   pub device_name_pattern: String,

   /// Adapter to use, e.g. `hci1`. The default adapter when unset.
   #[serde(default)]
   pub adapter: Option<String>,

   /// Write the status probe to control characteristics after discovery.
   #[serde(default = "default_true")]
   pub probe_on_connect: bool,

   /// Keep last-known values on disk between runs.
   #[serde(default = "default_true")]
   pub persist: bool,
}

fn default_name_pattern() -> String {
   "Enco".to_string()
}

const fn default_true() -> bool {
   true
}

impl Default for Config {
   fn default() -> Self {
      Self {
         device_name_pattern: default_name_pattern(),
         adapter: None,
         probe_on_connect: default_true(),
         persist: default_true(),
      }
   }
}

impl Config {
   /// Loads configuration from disk or creates default if not exists.
   pub fn load() -> Result<Self> {
      let config_path = Self::config_path()?;

      if config_path.exists() {
         let contents = fs::read_to_string(&config_path)?;
         Ok(toml::from_str(&contents)?)
      } else {
         // Create default config
         let config = Self::default();
         config.save()?;
         Ok(config)
      }
   }

   /// Saves the current configuration to disk.
   pub fn save(&self) -> Result<()> {
      let config_path = Self::config_path()?;

      if let Some(parent) = config_path.parent() {
         fs::create_dir_all(parent)?;
      }

      let contents = toml::to_string_pretty(self)?;
      fs::write(&config_path, contents)?;

      Ok(())
   }

   fn config_path() -> Result<PathBuf> {
      let config_dir = if let Ok(encod_home) = env::var("ENCOD_HOME") {
         PathBuf::from(encod_home)
      } else if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
         PathBuf::from(config_home)
      } else if let Ok(home) = env::var("HOME") {
         PathBuf::from(home).join(".config")
      } else {
         return Err(EncoError::ConfigDirNotFound);
      };

      Ok(config_dir.join("encod").join("config.toml"))
   }
}
