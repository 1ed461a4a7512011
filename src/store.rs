//! Persistent last-known state using heed (LMDB).
//!
//! Holds a single record with the most recent battery levels, charging
//! flags and swap preference, so values are available immediately on the
//! next start, before the buds report anything.

use std::{
   path::{Path, PathBuf},
   sync::Arc,
};

use heed::{
   Database, Env, EnvOpenOptions,
   types::{SerdeBincode, Str},
};
use log::debug;
use thiserror::Error;

use crate::enco::reconciler::Telemetry;

/// Errors that can occur in store operations.
#[derive(Error, Debug)]
pub enum Error {
   #[error("Failed to create store directory: {0}")]
   CreateDirectory(#[from] std::io::Error),

   #[error("Failed to open heed environment: {0}")]
   OpenEnvironment(heed::Error),

   #[error("Database transaction error: {0}")]
   Transaction(heed::Error),

   #[error("Database operation error: {0}")]
   DatabaseOperation(heed::Error),

   #[error("Could not find local data directory")]
   DataDirectoryNotFound,
}

pub type Result<T> = std::result::Result<T, Error>;

const LAST_KNOWN_KEY: &str = "last_known";

/// Key-value persistence of the last known state.
pub trait SnapshotStore: Send + Sync {
   /// Loads the last saved state, if any.
   fn load(&self) -> Result<Option<Telemetry>>;

   /// Replaces the saved state.
   fn save(&self, telemetry: &Telemetry) -> Result<()>;
}

/// Database layout for the last known state
#[derive(Debug)]
struct Db {
   env: Env,
   /// Record name -> state
   state: Database<Str, SerdeBincode<Telemetry>>,
}

/// LMDB-backed [`SnapshotStore`].
#[derive(Clone, Debug)]
pub struct LastKnownStore {
   db: Arc<Db>,
}

impl LastKnownStore {
   /// Opens or creates the store at the default location.
   pub fn open() -> Result<Self> {
      Self::open_at(&Self::db_path()?)
   }

   /// Opens or creates the store in `path`.
   pub fn open_at(path: &Path) -> Result<Self> {
      std::fs::create_dir_all(path)?;

      let env = unsafe {
         EnvOpenOptions::new()
            .map_size(1024 * 1024)
            .max_dbs(1)
            .open(path)
            .map_err(Error::OpenEnvironment)?
      };

      let mut wtxn = env.write_txn().map_err(Error::Transaction)?;

      let state = env
         .create_database(&mut wtxn, Some("state"))
         .map_err(Error::DatabaseOperation)?;

      wtxn.commit().map_err(Error::Transaction)?;

      debug!("Opened state store at {}", path.display());
      Ok(Self {
         db: Arc::new(Db { env, state }),
      })
   }

   fn db_path() -> Result<PathBuf> {
      if let Ok(path) = std::env::var("ENCOD_DB_PATH") {
         return Ok(PathBuf::from(path));
      }

      // ~/.local/share/encod/state.db
      let base = dirs::data_local_dir().ok_or(Error::DataDirectoryNotFound)?;
      Ok(base.join("encod").join("state.db"))
   }
}

impl SnapshotStore for LastKnownStore {
   fn load(&self) -> Result<Option<Telemetry>> {
      let rtxn = self.db.env.read_txn().map_err(Error::Transaction)?;
      self
         .db
         .state
         .get(&rtxn, LAST_KNOWN_KEY)
         .map_err(Error::DatabaseOperation)
   }

   fn save(&self, telemetry: &Telemetry) -> Result<()> {
      let mut wtxn = self.db.env.write_txn().map_err(Error::Transaction)?;
      self
         .db
         .state
         .put(&mut wtxn, LAST_KNOWN_KEY, telemetry)
         .map_err(Error::DatabaseOperation)?;
      wtxn.commit().map_err(Error::Transaction)
   }
}

#[cfg(test)]
pub mod testing {
   use parking_lot::Mutex;

   use super::*;

   /// In-memory [`SnapshotStore`].
   #[derive(Default)]
   pub struct MemoryStore {
      state: Mutex<Option<Telemetry>>,
      saves: Mutex<usize>,
   }

   impl MemoryStore {
      pub fn with(telemetry: Telemetry) -> Arc<Self> {
         Arc::new(Self {
            state: Mutex::new(Some(telemetry)),
            saves: Mutex::new(0),
         })
      }

      pub fn saved(&self) -> Option<Telemetry> {
         *self.state.lock()
      }

      pub fn save_count(&self) -> usize {
         *self.saves.lock()
      }
   }

   impl SnapshotStore for MemoryStore {
      fn load(&self) -> Result<Option<Telemetry>> {
         Ok(*self.state.lock())
      }

      fn save(&self, telemetry: &Telemetry) -> Result<()> {
         *self.state.lock() = Some(*telemetry);
         *self.saves.lock() += 1;
         Ok(())
      }
   }
}

#[cfg(test)]
mod tests {
   use super::*;
   use crate::enco::protocol::{BatterySnapshot, ChargingSnapshot};

   use tempfile::TempDir;

   fn create_test_store() -> Result<(LastKnownStore, TempDir)> {
      let temp_dir = TempDir::new().unwrap();
      let store = LastKnownStore::open_at(&temp_dir.path().join("state.db"))?;
      Ok((store, temp_dir))
   }

   #[test]
   fn test_empty_store_loads_nothing() -> Result<()> {
      let (store, _dir) = create_test_store()?;
      assert_eq!(store.load()?, None);
      Ok(())
   }

   #[test]
   fn test_save_and_reload() -> Result<()> {
      let (store, _dir) = create_test_store()?;
      let telemetry = Telemetry {
         battery: BatterySnapshot {
            left: Some(55),
            right: Some(100),
            case: None,
            last_updated: Some(1_700_000_000),
         },
         charging: ChargingSnapshot {
            left: false,
            right: true,
            case: false,
         },
         swapped: true,
      };
      store.save(&telemetry)?;
      assert_eq!(store.load()?, Some(telemetry));
      Ok(())
   }

   #[test]
   fn test_save_overwrites() -> Result<()> {
      let (store, _dir) = create_test_store()?;
      let mut telemetry = Telemetry::default();
      store.save(&telemetry)?;
      telemetry.swapped = true;
      store.save(&telemetry)?;
      assert_eq!(store.load()?.map(|t| t.swapped), Some(true));
      Ok(())
   }
}
