//! Bluetooth manager for the tracked Enco device.
//!
//! A single actor task owns the [`ConnectionMachine`]. BlueZ work runs in
//! spawned tasks that post their results back as [`RadioEvent`]s, so the
//! machine and the device state are only ever touched from the actor.

use std::{future::Future, time::Duration};

use bluer::{
   Adapter, AdapterEvent, AdapterProperty, Address, DeviceEvent, DeviceProperty, DiscoveryFilter,
   DiscoveryTransport, Session,
   gatt::{
      WriteOp,
      remote::{Characteristic, CharacteristicWriteRequest},
   },
};
use futures::{pin_mut, stream::StreamExt};
use log::{debug, error, info, warn};
use smol_str::{SmolStr, ToSmolStr};
use tokio::{
   select,
   sync::{mpsc, oneshot},
   task::{JoinHandle, JoinSet},
   time,
};

use crate::{
   bluetooth::{
      machine::{ConnectionMachine, ConnectionState},
      radio::{
         Advertisement, CharacteristicId, CharacteristicInfo, DeviceId, Radio, RadioEvent,
         ServiceId, ServiceInfo,
      },
   },
   config::Config,
   enco::{device::EncoDevice, protocol::Frame, recognition::BATTERY_SERVICE},
   error::{EncoError, Result},
};

/// Channel buffer size
const CHANNEL_BUFFER_SIZE: usize = 1000;
/// Pending probe and command writes per link
const WRITE_QUEUE_SIZE: usize = 128;
/// Maximum time to wait for a connection attempt
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// Maximum time to wait for BlueZ to resolve services
const SERVICES_TIMEOUT: Duration = Duration::from_secs(15);
/// Poll interval while waiting for services
const SERVICES_POLL_INTERVAL: Duration = Duration::from_millis(250);

// === Commands ===

#[derive(Debug)]
enum ManagerCommand {
   ToggleSwap(oneshot::Sender<bool>),
   ClearCache(oneshot::Sender<()>),
}

// === Main Manager ===

/// Handle to the Bluetooth manager actor.
///
/// State changes requested by consumers go through the actor so they are
/// serialized with radio events.
pub struct BluetoothManager {
   inbox: mpsc::Sender<ManagerCommand>,
}

impl BluetoothManager {
   pub async fn new(device: EncoDevice, config: &Config) -> Result<Self> {
      let session = Session::new().await?;
      let adapter = match &config.adapter {
         Some(name) => session.adapter(name)?,
         None => session.default_adapter().await?,
      };
      info!("Using adapter {}", adapter.name());

      let (command_tx, command_rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
      let (radio_tx, radio_rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);

      let power_monitor = start_power_monitor(adapter.clone(), radio_tx.clone());
      let radio = BluezRadio::new(adapter, radio_tx);
      let actor = ManagerActor {
         _session: session,
         machine: ConnectionMachine::new(radio, device, config),
         command_rx,
         radio_rx,
         power_monitor,
      };
      tokio::spawn(actor.run());

      Ok(Self { inbox: command_tx })
   }

   /// Flips the left/right preference. Returns the new preference.
   pub async fn toggle_swap(&self) -> Result<bool> {
      let (tx, rx) = oneshot::channel();
      self
         .inbox
         .send(ManagerCommand::ToggleSwap(tx))
         .await
         .map_err(|_| EncoError::ManagerShutdown)?;
      rx.await.map_err(|_| EncoError::ManagerShutdown)
   }

   /// Forgets all cached readings.
   pub async fn clear_cache(&self) -> Result<()> {
      let (tx, rx) = oneshot::channel();
      self
         .inbox
         .send(ManagerCommand::ClearCache(tx))
         .await
         .map_err(|_| EncoError::ManagerShutdown)?;
      rx.await.map_err(|_| EncoError::ManagerShutdown)
   }
}

// === Manager Actor ===

struct ManagerActor {
   _session: Session,
   machine: ConnectionMachine<BluezRadio>,
   command_rx: mpsc::Receiver<ManagerCommand>,
   radio_rx: mpsc::Receiver<RadioEvent>,
   power_monitor: JoinHandle<()>,
}

impl ManagerActor {
   async fn run(mut self) {
      info!("Bluetooth manager starting up");

      loop {
         select! {
             cmd = self.command_rx.recv() => {
                 let Some(cmd) = cmd else {
                     info!("Bluetooth manager shutting down");
                     break;
                 };
                 self.handle_command(cmd);
             }
             Some(event) = self.radio_rx.recv() => {
                 self.handle_event(event);
             }
         }
      }

      self.power_monitor.abort();
      self.machine.radio_mut().stop_scan();
      self.machine.radio_mut().reset_link();
   }

   fn handle_command(&mut self, cmd: ManagerCommand) {
      let device = self.machine.device();
      match cmd {
         ManagerCommand::ToggleSwap(tx) => {
            let _ = tx.send(device.toggle_swap());
         },
         ManagerCommand::ClearCache(tx) => {
            device.clear_cache();
            let _ = tx.send(());
         },
      }
   }

   fn handle_event(&mut self, event: RadioEvent) {
      let ends_link = event.ends_link();
      let powered_off = matches!(event, RadioEvent::PowerStateChanged(false));

      event.deliver(&mut self.machine);

      // Stale events for other devices leave the machine linked
      let unlinked = matches!(
         self.machine.state(),
         ConnectionState::Scanning | ConnectionState::Disconnected
      );
      if ends_link && unlinked {
         self.machine.radio_mut().reset_link();
      }
      if powered_off {
         self.machine.radio_mut().stop_scan();
      }
   }
}

fn start_power_monitor(adapter: Adapter, tx: mpsc::Sender<RadioEvent>) -> JoinHandle<()> {
   tokio::spawn(async move {
      let events = match adapter.events().await {
         Ok(events) => events,
         Err(e) => {
            error!("Failed to monitor adapter {}: {e}", adapter.name());
            return;
         },
      };
      pin_mut!(events);

      let powered = adapter.is_powered().await.unwrap_or_else(|e| {
         warn!("Failed to query adapter power state: {e}");
         false
      });
      if tx.send(RadioEvent::PowerStateChanged(powered)).await.is_err() {
         return;
      }

      while let Some(event) = events.next().await {
         if let AdapterEvent::PropertyChanged(AdapterProperty::Powered(powered)) = event {
            debug!("Adapter {} powered: {powered}", adapter.name());
            if tx.send(RadioEvent::PowerStateChanged(powered)).await.is_err() {
               return;
            }
         }
      }

      // The adapter went away
      let _ = tx.send(RadioEvent::PowerStateChanged(false)).await;
   })
}

// === BlueZ Radio ===

/// What a scan request runs, given whether discovery is already active.
/// Starting discovery also sweeps connected devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanRequest {
   StartDiscovery,
   SweepConnected,
}

impl ScanRequest {
   const fn new(discovery_running: bool) -> Self {
      if discovery_running {
         Self::SweepConnected
      } else {
         Self::StartDiscovery
      }
   }
}

#[derive(Debug)]
struct WriteRequest {
   characteristic: CharacteristicId,
   data: Frame,
   ack_required: bool,
}

/// [`Radio`] backed by BlueZ.
///
/// Scanning runs in its own task. Everything tied to the current link
/// lives in `link` and is dropped by [`BluezRadio::reset_link`].
struct BluezRadio {
   adapter: Adapter,
   tx: mpsc::Sender<RadioEvent>,
   scan: Option<JoinHandle<()>>,
   link: JoinSet<()>,
   watched: Option<DeviceId>,
   writer: Option<mpsc::Sender<WriteRequest>>,
}

impl BluezRadio {
   fn new(adapter: Adapter, tx: mpsc::Sender<RadioEvent>) -> Self {
      Self {
         adapter,
         tx,
         scan: None,
         link: JoinSet::new(),
         watched: None,
         writer: None,
      }
   }

   fn stop_scan(&mut self) {
      if let Some(scan) = self.scan.take() {
         debug!("Stopping discovery");
         scan.abort();
      }
   }

   /// Aborts every task of the current link.
   fn reset_link(&mut self) {
      self.link = JoinSet::new();
      self.watched = None;
      self.writer = None;
   }

   fn spawn_link<F>(&mut self, what: &'static str, task: F)
   where
      F: Future<Output = Result<()>> + Send + 'static,
   {
      while self.link.try_join_next().is_some() {}
      self.link.spawn(async move {
         if let Err(e) = task.await {
            warn!("Failed to {what}: {e}");
         }
      });
   }

   /// Reports the end of the link to `device` once.
   fn watch(&mut self, device: DeviceId) {
      if self.watched == Some(device) {
         return;
      }
      self.watched = Some(device);

      let adapter = self.adapter.clone();
      let tx = self.tx.clone();
      self.spawn_link("watch link", async move {
         let handle = adapter.device(device)?;
         let events = handle.events().await?;
         pin_mut!(events);

         while let Some(event) = events.next().await {
            if let DeviceEvent::PropertyChanged(DeviceProperty::Connected(false)) = event {
               let _ = tx.send(RadioEvent::Disconnected(device, None)).await;
               return Ok(());
            }
         }

         let reason = SmolStr::new_static("device removed");
         let _ = tx.send(RadioEvent::Disconnected(device, Some(reason))).await;
         Ok(())
      });
   }

   fn writer(&mut self) -> mpsc::Sender<WriteRequest> {
      if let Some(writer) = &self.writer {
         return writer.clone();
      }

      let (tx, rx) = mpsc::channel(WRITE_QUEUE_SIZE);
      self.spawn_link("run write queue", write_queue(self.adapter.clone(), rx));
      self.writer = Some(tx.clone());
      tx
   }
}

impl Drop for BluezRadio {
   fn drop(&mut self) {
      self.stop_scan();
   }
}

impl Radio for BluezRadio {
   fn request_scan(&mut self) {
      let running = self.scan.as_ref().is_some_and(|scan| !scan.is_finished());
      let adapter = self.adapter.clone();
      let tx = self.tx.clone();

      match ScanRequest::new(running) {
         ScanRequest::StartDiscovery => {
            debug!("Starting discovery on {}", adapter.name());
            self.scan = Some(tokio::spawn(async move {
               if let Err(e) = scan(&adapter, &tx).await {
                  warn!("Discovery stopped: {e}");
               }
            }));
         },
         ScanRequest::SweepConnected => {
            debug!("Discovery running, checking connected devices");
            tokio::spawn(async move {
               if let Err(e) = sweep_connected(&adapter, &tx).await {
                  warn!("Failed to check connected devices: {e}");
               }
            });
         },
      }
   }

   fn request_connect(&mut self, device: DeviceId) {
      self.watch(device);

      let adapter = self.adapter.clone();
      let tx = self.tx.clone();
      self.spawn_link("connect", async move {
         let result = match adapter.device(device) {
            Ok(handle) => match time::timeout(CONNECT_TIMEOUT, handle.connect()).await {
               Ok(Ok(())) => Ok(()),
               Ok(Err(e)) => Err(e.to_smolstr()),
               Err(_) => Err(SmolStr::new_static("connection timed out")),
            },
            Err(e) => Err(e.to_smolstr()),
         };
         let _ = tx.send(RadioEvent::ConnectResult(device, result)).await;
         Ok(())
      });
   }

   fn request_discover_services(&mut self, device: DeviceId) {
      self.watch(device);

      let adapter = self.adapter.clone();
      let tx = self.tx.clone();
      self.spawn_link("discover services", async move {
         match resolve_services(&adapter, device).await {
            Ok(services) => {
               let _ = tx.send(RadioEvent::ServicesDiscovered(device, services)).await;
            },
            Err(e) => {
               // Treat the link as lost so the next advertisement retries
               let _ = tx
                  .send(RadioEvent::Disconnected(device, Some(e.to_smolstr())))
                  .await;
            },
         }
         Ok(())
      });
   }

   fn request_discover_characteristics(&mut self, service: ServiceId) {
      let adapter = self.adapter.clone();
      let tx = self.tx.clone();
      self.spawn_link("discover characteristics", async move {
         let remote = adapter
            .device(service.device)?
            .service(service.id)
            .await?;

         let mut found = Vec::new();
         for c in remote.characteristics().await? {
            let flags = c.flags().await?;
            found.push(CharacteristicInfo {
               id: CharacteristicId {
                  service,
                  id: c.id(),
               },
               uuid: c.uuid().await?,
               can_read: flags.read,
               can_notify: flags.notify || flags.indicate,
               can_write: flags.write || flags.write_without_response,
               write_without_response: flags.write_without_response,
            });
         }

         let _ = tx
            .send(RadioEvent::CharacteristicsDiscovered(service, found))
            .await;
         Ok(())
      });
   }

   fn request_read(&mut self, characteristic: CharacteristicId) {
      let adapter = self.adapter.clone();
      let tx = self.tx.clone();
      self.spawn_link("read characteristic", async move {
         let c = remote_characteristic(&adapter, characteristic).await?;
         let uuid = c.uuid().await?;
         let value = c.read().await?;
         let _ = tx
            .send(RadioEvent::ValueUpdated(characteristic, uuid, Frame::from_slice(&value)))
            .await;
         Ok(())
      });
   }

   fn request_subscribe(&mut self, characteristic: CharacteristicId) {
      let adapter = self.adapter.clone();
      let tx = self.tx.clone();
      self.spawn_link("subscribe", async move {
         let c = remote_characteristic(&adapter, characteristic).await?;
         let uuid = c.uuid().await?;
         let values = c.notify().await?;
         pin_mut!(values);
         debug!("Subscribed to {uuid}");

         while let Some(value) = values.next().await {
            let event = RadioEvent::ValueUpdated(characteristic, uuid, Frame::from_slice(&value));
            if tx.send(event).await.is_err() {
               break;
            }
         }
         Ok(())
      });
   }

   fn request_write(&mut self, characteristic: CharacteristicId, data: &[u8], ack_required: bool) {
      let request = WriteRequest {
         characteristic,
         data: Frame::from_slice(data),
         ack_required,
      };
      if let Err(e) = self.writer().try_send(request) {
         warn!("Dropping write to {}: {e}", characteristic.id);
      }
   }
}

async fn scan(adapter: &Adapter, tx: &mpsc::Sender<RadioEvent>) -> Result<()> {
   adapter
      .set_discovery_filter(DiscoveryFilter {
         transport: DiscoveryTransport::Le,
         duplicate_data: true,
         ..Default::default()
      })
      .await?;

   if let Err(e) = sweep_connected(adapter, tx).await {
      warn!("Failed to check connected devices: {e}");
   }

   let events = adapter.discover_devices_with_changes().await?;
   pin_mut!(events);

   while let Some(event) = events.next().await {
      let AdapterEvent::DeviceAdded(address) = event else {
         continue;
      };
      let Ok(advertisement) = advertisement(adapter, address).await else {
         continue;
      };
      if tx.send(RadioEvent::Advertisement(advertisement)).await.is_err() {
         break;
      }
   }
   Ok(())
}

/// Reports devices the OS already holds a link to that expose the battery
/// service, since those may not advertise.
async fn sweep_connected(adapter: &Adapter, tx: &mpsc::Sender<RadioEvent>) -> Result<()> {
   for address in adapter.device_addresses().await? {
      let device = adapter.device(address)?;
      if !device.is_connected().await? {
         continue;
      }
      let lists_battery = device
         .uuids()
         .await?
         .is_some_and(|uuids| uuids.contains(&BATTERY_SERVICE));
      if !lists_battery {
         continue;
      }

      let advertisement = advertisement(adapter, address).await?;
      let _ = tx.send(RadioEvent::Advertisement(advertisement)).await;
   }
   Ok(())
}

async fn advertisement(adapter: &Adapter, address: Address) -> Result<Advertisement> {
   let device = adapter.device(address)?;
   Ok(Advertisement {
      device: address,
      name: device.name().await?.map(SmolStr::from),
      connected: device.is_connected().await?,
   })
}

async fn resolve_services(adapter: &Adapter, address: Address) -> Result<Vec<ServiceInfo>> {
   let device = adapter.device(address)?;

   time::timeout(SERVICES_TIMEOUT, async {
      while !device.is_services_resolved().await? {
         time::sleep(SERVICES_POLL_INTERVAL).await;
      }
      Ok::<_, EncoError>(())
   })
   .await
   .map_err(|_| EncoError::ServicesNotResolved)??;

   let mut services = Vec::new();
   for service in device.services().await? {
      services.push(ServiceInfo {
         id: ServiceId {
            device: address,
            id: service.id(),
         },
         uuid: service.uuid().await?,
      });
   }
   Ok(services)
}

async fn remote_characteristic(adapter: &Adapter, id: CharacteristicId) -> Result<Characteristic> {
   let c = adapter
      .device(id.service.device)?
      .service(id.service.id)
      .await?
      .characteristic(id.id)
      .await?;
   Ok(c)
}

/// Performs writes one at a time, in submission order.
async fn write_queue(adapter: Adapter, mut rx: mpsc::Receiver<WriteRequest>) -> Result<()> {
   while let Some(request) = rx.recv().await {
      let c = match remote_characteristic(&adapter, request.characteristic).await {
         Ok(c) => c,
         Err(e) => {
            warn!("Write target {} unavailable: {e}", request.characteristic.id);
            continue;
         },
      };

      debug!(
         "Write {} to {} (ack: {})",
         hex::encode(&request.data),
         request.characteristic.id,
         request.ack_required
      );
      let result = if request.ack_required {
         c.write(&request.data).await
      } else {
         c.write_ext(&request.data, &CharacteristicWriteRequest {
            op_type: WriteOp::Command,
            ..Default::default()
         })
         .await
      };
      if let Err(e) = result {
         warn!("Write to {} failed: {e}", request.characteristic.id);
      }
   }
   Ok(())
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_scan_request_starts_discovery_when_idle() {
      assert_eq!(ScanRequest::new(false), ScanRequest::StartDiscovery);
   }

   #[test]
   fn test_scan_request_sweeps_while_discovering() {
      assert_eq!(ScanRequest::new(true), ScanRequest::SweepConnected);
   }
}
