use log::info;
use zbus::{interface, object_server::SignalEmitter};

use crate::{bluetooth::manager::BluetoothManager, enco::device::EncoDevice};

pub struct MonitorService {
   device: EncoDevice,
   manager: BluetoothManager,
}

impl MonitorService {
   pub const fn new(device: EncoDevice, manager: BluetoothManager) -> Self {
      Self { device, manager }
   }
}

#[interface(name = "org.encod.Monitor")]
impl MonitorService {
   async fn get_state(&self) -> String {
      self.device.to_json().to_string()
   }

   async fn toggle_swap(&self) -> zbus::fdo::Result<bool> {
      let swapped = self
         .manager
         .toggle_swap()
         .await
         .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
      info!("Swap toggled over D-Bus, now {swapped}");
      Ok(swapped)
   }

   async fn clear_cache(&self) -> zbus::fdo::Result<bool> {
      self
         .manager
         .clear_cache()
         .await
         .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
      Ok(true)
   }

   // Signals
   #[zbus(signal)]
   pub async fn connection_changed(emitter: &SignalEmitter<'_>, connected: bool)
   -> zbus::Result<()>;

   #[zbus(signal)]
   pub async fn state_changed(emitter: &SignalEmitter<'_>, state: &str) -> zbus::Result<()>;

   #[zbus(signal)]
   pub async fn battery_updated(emitter: &SignalEmitter<'_>, battery: &str) -> zbus::Result<()>;

   #[zbus(signal)]
   pub async fn charging_updated(emitter: &SignalEmitter<'_>, charging: &str)
   -> zbus::Result<()>;

   #[zbus(signal)]
   pub async fn swap_changed(emitter: &SignalEmitter<'_>, swapped: bool) -> zbus::Result<()>;

   // Properties for polling-free updates
   #[zbus(property)]
   async fn connected(&self) -> bool {
      self.device.is_connected()
   }

   #[zbus(property)]
   async fn connection_state(&self) -> String {
      self.device.connection_state().to_string()
   }
}
