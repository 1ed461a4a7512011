//! Shared state of the tracked Enco earbuds.
//!
//! [`EncoDevice`] owns the reconciled telemetry, the connection state and
//! the connectivity flag. Every mutation emits the matching
//! [`MonitorEvent`] and, for telemetry, writes the new state through the
//! configured [`SnapshotStore`].

use core::fmt;
use std::{
   sync::{
      Arc,
      atomic::{AtomicBool, Ordering},
   },
   time::{SystemTime, UNIX_EPOCH},
};

use bluer::Address;
use crossbeam::atomic::AtomicCell;
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use smol_str::SmolStr;

use crate::{
   bluetooth::machine::ConnectionState,
   enco::{
      protocol::{BatterySnapshot, ChargingSnapshot, TelemetryRecord},
      reconciler::Telemetry,
   },
   event::{EventSender, MonitorEvent},
   store::SnapshotStore,
};

struct EncoInner {
   address: AtomicCell<Option<Address>>,
   name: Mutex<Option<SmolStr>>,
   telemetry: RwLock<Telemetry>,
   state: AtomicCell<ConnectionState>,
   connected: AtomicBool,
   last_seen: AtomicCell<Option<u64>>,
   store: Option<Arc<dyn SnapshotStore>>,
   event_tx: EventSender,
}

/// Handle to the earbud state.
///
/// This type is cheaply cloneable and thread-safe.
#[derive(Clone)]
pub struct EncoDevice(Arc<EncoInner>);

impl fmt::Debug for EncoDevice {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_struct("EncoDevice")
         .field("address", &self.address())
         .field("state", &self.connection_state())
         .field("connected", &self.is_connected())
         .field("battery", &self.battery())
         .field("charging", &self.charging())
         .field("swapped", &self.is_swapped())
         .finish()
   }
}

fn unix_now() -> u64 {
   SystemTime::now()
      .duration_since(UNIX_EPOCH)
      .map_or(0, |d| d.as_secs())
}

impl EncoDevice {
   /// Creates the device state, seeded from `store` when it holds a
   /// previous state.
   pub fn new(event_tx: EventSender, store: Option<Arc<dyn SnapshotStore>>) -> Self {
      let telemetry = match store.as_deref().map(|s| s.load()) {
         Some(Ok(Some(telemetry))) => {
            info!(
               "Restored last known state (swapped: {}, updated: {:?})",
               telemetry.swapped, telemetry.battery.last_updated
            );
            telemetry
         },
         Some(Err(e)) => {
            warn!("Failed to load last known state: {e}");
            Telemetry::default()
         },
         _ => Telemetry::default(),
      };

      Self(Arc::new(EncoInner {
         address: AtomicCell::new(None),
         name: Mutex::new(None),
         telemetry: RwLock::new(telemetry),
         state: AtomicCell::new(ConnectionState::Disconnected),
         connected: AtomicBool::new(false),
         last_seen: AtomicCell::new(None),
         store,
         event_tx,
      }))
   }

   /// Address of the last matching device seen.
   pub fn address(&self) -> Option<Address> {
      self.0.address.load()
   }

   pub fn name(&self) -> Option<SmolStr> {
      self.0.name.lock().clone()
   }

   /// Unix time of the last matching advertisement.
   pub fn last_seen(&self) -> Option<u64> {
      self.0.last_seen.load()
   }

   pub fn telemetry(&self) -> Telemetry {
      *self.0.telemetry.read()
   }

   pub fn battery(&self) -> BatterySnapshot {
      self.0.telemetry.read().battery
   }

   pub fn charging(&self) -> ChargingSnapshot {
      self.0.telemetry.read().charging
   }

   pub fn is_swapped(&self) -> bool {
      self.0.telemetry.read().swapped
   }

   pub fn is_connected(&self) -> bool {
      self.0.connected.load(Ordering::Relaxed)
   }

   pub fn connection_state(&self) -> ConnectionState {
      self.0.state.load()
   }

   /// Merges one decode batch and notifies about what changed.
   pub fn apply(&self, records: &[TelemetryRecord]) {
      let (merged, telemetry) = {
         let mut lock = self.0.telemetry.write();
         let merged = lock.merge(records, unix_now());
         (merged, *lock)
      };
      if !merged.any() {
         return;
      }

      if merged.battery {
         debug!("Battery: {:?}", telemetry.battery);
         self.emit(MonitorEvent::BatteryUpdated(telemetry.battery));
      }
      if merged.charging {
         debug!("Charging: {:?}", telemetry.charging);
         self.emit(MonitorEvent::ChargingUpdated(telemetry.charging));
      }
      self.persist(&telemetry);
   }

   /// Flips the left/right preference. Returns the new preference.
   pub fn toggle_swap(&self) -> bool {
      let telemetry = {
         let mut lock = self.0.telemetry.write();
         lock.toggle_swap();
         *lock
      };
      info!("Left/right swap {}", if telemetry.swapped { "enabled" } else { "disabled" });

      self.emit(MonitorEvent::SwapChanged(telemetry.swapped));
      self.emit(MonitorEvent::BatteryUpdated(telemetry.battery));
      self.emit(MonitorEvent::ChargingUpdated(telemetry.charging));
      self.persist(&telemetry);
      telemetry.swapped
   }

   /// Forgets all readings. The swap preference is kept.
   pub fn clear_cache(&self) {
      let telemetry = {
         let mut lock = self.0.telemetry.write();
         lock.clear();
         *lock
      };
      info!("Cleared cached battery state");

      self.emit(MonitorEvent::BatteryUpdated(telemetry.battery));
      self.emit(MonitorEvent::ChargingUpdated(telemetry.charging));
      self.persist(&telemetry);
   }

   pub fn set_connection_state(&self, state: ConnectionState) {
      if self.0.state.swap(state) != state {
         self.emit(MonitorEvent::StateChanged(state));
      }
   }

   pub fn set_connected(&self, connected: bool) {
      if self.0.connected.swap(connected, Ordering::Relaxed) != connected {
         self.emit(MonitorEvent::ConnectionChanged(connected));
      }
   }

   /// Records a matching advertisement.
   pub fn mark_seen(&self, address: Address, name: Option<SmolStr>) {
      self.0.address.store(Some(address));
      if let Some(name) = name {
         *self.0.name.lock() = Some(name);
      }
      self.0.last_seen.store(Some(unix_now()));
   }

   /// Converts the device state to a JSON representation.
   pub fn to_json(&self) -> serde_json::Value {
      let telemetry = self.telemetry();
      json!({
         "address": self.address().map(|a| a.to_string()),
         "name": self.name().as_deref(),
         "connected": self.is_connected(),
         "state": self.connection_state().to_str(),
         "swapped": telemetry.swapped,
         "last_seen": self.last_seen(),
         "battery": telemetry.battery.to_json(),
         "charging": telemetry.charging.to_json(),
      })
   }

   fn emit(&self, event: MonitorEvent) {
      self.0.event_tx.emit(event);
   }

   fn persist(&self, telemetry: &Telemetry) {
      if let Some(store) = &self.0.store
         && let Err(e) = store.save(telemetry)
      {
         warn!("Failed to save last known state: {e}");
      }
   }
}
