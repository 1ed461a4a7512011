//! Enco D-Bus Service
//!
//! This service tracks battery and charging state of OPPO Enco earbuds
//! over Bluetooth LE and publishes it on the session bus.

use std::{sync::Arc, time::Duration};

use crossbeam::queue::SegQueue;
use log::{info, warn};
use tokio::{signal, sync::Notify, time};
use zbus::{Connection, connection, object_server::InterfaceRef};

use bluetooth::manager::BluetoothManager;
use dbus::MonitorService;
use event::{EventBus, MonitorEvent};

mod bluetooth;
mod config;
mod dbus;
mod enco;
mod error;
mod event;
mod store;

use crate::{
   dbus::MonitorServiceSignals,
   enco::device::EncoDevice,
   error::Result,
   store::{LastKnownStore, SnapshotStore},
};

const BUS_NAME: &str = "org.encod";
const OBJECT_PATH: &str = "/org/encod/monitor";

#[tokio::main]
async fn main() -> Result<()> {
   env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

   info!("Starting encod D-Bus service...");

   // Load configuration
   let config = config::Config::load()?;
   info!(
      "Loaded configuration, tracking devices named '{}'",
      config.device_name_pattern
   );

   let store: Option<Arc<dyn SnapshotStore>> = if config.persist {
      match LastKnownStore::open() {
         Ok(store) => Some(Arc::new(store)),
         Err(e) => {
            warn!("Failed to open state store, running without persistence: {e}");
            None
         },
      }
   } else {
      None
   };

   // Create event channel
   let event_bus = EventProcessor::new();
   let device = EncoDevice::new(event_bus.clone(), store);

   // Create Bluetooth manager owning the connection lifecycle
   let bluetooth_manager = BluetoothManager::new(device.clone(), &config).await?;

   // Create D-Bus service
   let service = MonitorService::new(device, bluetooth_manager);

   // Build D-Bus connection
   let connection = connection::Builder::session()?
      .name(BUS_NAME)?
      .serve_at(OBJECT_PATH, service)?
      .build()
      .await?;

   info!("encod D-Bus service started at {BUS_NAME}");

   // Start event processor
   event_bus.spawn_dispatcher(connection).await?;

   // Wait for shutdown signal
   signal::ctrl_c().await?;
   info!("Shutting down encod service...");

   Ok(())
}

struct EventProcessor {
   queue: SegQueue<MonitorEvent>,
   notifier: Notify,
}

impl EventProcessor {
   fn new() -> Arc<Self> {
      Arc::new(Self {
         queue: SegQueue::new(),
         notifier: Notify::new(),
      })
   }
}

impl EventProcessor {
   async fn recv(self: &Arc<Self>) -> Option<MonitorEvent> {
      loop {
         if let Some(event) = self.queue.pop() {
            return Some(event);
         }
         let notify = self.notifier.notified();
         if let Some(event) = self.queue.pop() {
            return Some(event);
         }
         if Arc::strong_count(self) == 1 {
            return None;
         }
         let _ = time::timeout(Duration::from_secs(1), notify).await;
      }
   }

   async fn dispatch(&self, iface: &InterfaceRef<MonitorService>, event: MonitorEvent) -> Result<()> {
      match event {
         MonitorEvent::ConnectionChanged(connected) => {
            iface.connection_changed(connected).await?;
            iface
               .get()
               .await
               .connected_changed(iface.signal_emitter())
               .await?;
         },
         MonitorEvent::StateChanged(state) => {
            iface.state_changed(state.to_str()).await?;
            iface
               .get()
               .await
               .connection_state_changed(iface.signal_emitter())
               .await?;
         },
         MonitorEvent::BatteryUpdated(battery) => {
            iface
               .battery_updated(&battery.to_json().to_string())
               .await?;
         },
         MonitorEvent::ChargingUpdated(charging) => {
            iface
               .charging_updated(&charging.to_json().to_string())
               .await?;
         },
         MonitorEvent::SwapChanged(swapped) => {
            iface.swap_changed(swapped).await?;
         },
      }
      Ok(())
   }

   async fn spawn_dispatcher(self: Arc<Self>, connection: Connection) -> Result<()> {
      let iface = connection
         .object_server()
         .interface::<_, MonitorService>(OBJECT_PATH)
         .await?;
      tokio::spawn(async move {
         while let Some(event) = self.recv().await {
            if let Err(e) = self.dispatch(&iface, event).await {
               warn!("Error dispatching event: {e}");
            }
         }
      });

      Ok(())
   }
}

impl EventBus for EventProcessor {
   fn emit(&self, event: MonitorEvent) {
      self.queue.push(event);
      self.notifier.notify_waiters();
   }
}
