//! Connection lifecycle for the tracked device.
//!
//! The machine is radio-agnostic: it reacts to [`CentralEvents`] and
//! [`PeripheralEvents`] and issues requests through a [`Radio`]. It
//! reconnects forever and without backoff; the only throttles are the
//! state checks and the pending-discovery flag, which make duplicate
//! advertisements harmless.

use log::{debug, error, info, warn};
use smol_str::SmolStr;
use uuid::Uuid;

use crate::{
   bluetooth::radio::{
      Advertisement, CentralEvents, CharacteristicId, CharacteristicInfo, DeviceId,
      PeripheralEvents, Radio, ServiceId, ServiceInfo,
   },
   config::Config,
   enco::{device::EncoDevice, parser, protocol::PKT_PROBE, recognition},
};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, strum::Display, strum::IntoStaticStr)]
pub enum ConnectionState {
   #[default]
   Disconnected,
   Scanning,
   Connecting,
   DiscoveringServices,
   Ready,
}

impl ConnectionState {
   pub fn to_str(self) -> &'static str {
      self.into()
   }
}

pub struct ConnectionMachine<R> {
   radio: R,
   device: EncoDevice,
   name_pattern: SmolStr,
   probe_on_connect: bool,

   powered: bool,
   state: ConnectionState,
   target: Option<DeviceId>,
   /// Discovery has not run for the current link yet.
   discovery_pending: bool,
}

impl<R: Radio> ConnectionMachine<R> {
   pub fn new(radio: R, device: EncoDevice, config: &Config) -> Self {
      Self {
         radio,
         device,
         name_pattern: config.device_name_pattern.as_str().into(),
         probe_on_connect: config.probe_on_connect,
         powered: false,
         state: ConnectionState::Disconnected,
         target: None,
         discovery_pending: true,
      }
   }

   pub const fn state(&self) -> ConnectionState {
      self.state
   }

   pub const fn radio_mut(&mut self) -> &mut R {
      &mut self.radio
   }

   pub const fn device(&self) -> &EncoDevice {
      &self.device
   }

   fn transition(&mut self, next: ConnectionState) {
      if self.state != next {
         debug!("Connection state: {} -> {next}", self.state);
         self.state = next;
      }
      self.device.set_connection_state(next);
   }

   fn is_target(&self, device: DeviceId) -> bool {
      self.target == Some(device)
   }

   fn discover(&mut self, device: DeviceId) {
      self.discovery_pending = false;
      self.radio.request_discover_services(device);
      self.transition(ConnectionState::DiscoveringServices);
   }
}

impl<R: Radio> CentralEvents for ConnectionMachine<R> {
   fn power_state_changed(&mut self, powered: bool) {
      if powered == self.powered {
         debug!("Adapter power unchanged ({powered})");
         return;
      }
      self.powered = powered;
      if powered {
         info!("Bluetooth powered on, scanning for '{}'", self.name_pattern);
         self.transition(ConnectionState::Scanning);
         self.radio.request_scan();
      } else {
         error!("Bluetooth is not available");
         self.target = None;
         self.discovery_pending = true;
         self.device.set_connected(false);
         self.transition(ConnectionState::Disconnected);
      }
   }

   fn advertisement_observed(&mut self, adv: Advertisement) {
      if !self.powered {
         return;
      }
      let Some(name) = adv.name.as_deref() else {
         return;
      };
      if !recognition::is_target_name(name, &self.name_pattern) {
         return;
      }
      self.device.mark_seen(adv.device, adv.name.clone());

      match self.state {
         ConnectionState::Scanning | ConnectionState::Disconnected => {
            self.target = Some(adv.device);
            if !adv.connected {
               info!("Found {name} ({}), connecting", adv.device);
               self.radio.request_connect(adv.device);
               self.transition(ConnectionState::Connecting);
            } else if self.discovery_pending {
               info!("Found {name} ({}) already connected", adv.device);
               self.device.set_connected(true);
               self.discover(adv.device);
            }
         },
         state => {
            debug!("Ignoring advertisement from {name} while {state}");
         },
      }
   }

   fn connect_result(&mut self, device: DeviceId, result: Result<(), SmolStr>) {
      if !self.is_target(device) || self.state != ConnectionState::Connecting {
         debug!("Ignoring stale connect result for {device}");
         return;
      }
      match result {
         Ok(()) => {
            info!("Connected to {device}");
            self.device.set_connected(true);
            self.discover(device);
         },
         Err(reason) => {
            warn!("Failed to connect to {device}: {reason}");
            self.target = None;
            self.device.set_connected(false);
            self.transition(ConnectionState::Scanning);
         },
      }
   }

   fn disconnected(&mut self, device: DeviceId, reason: Option<SmolStr>) {
      if !self.is_target(device) {
         return;
      }
      match reason {
         Some(reason) => warn!("Disconnected from {device}: {reason}"),
         None => info!("Disconnected from {device}"),
      }
      self.target = None;
      self.discovery_pending = true;
      self.device.set_connected(false);

      if self.powered {
         self.transition(ConnectionState::Scanning);
         self.radio.request_scan();
      } else {
         self.transition(ConnectionState::Disconnected);
      }
   }
}

impl<R: Radio> PeripheralEvents for ConnectionMachine<R> {
   fn services_discovered(&mut self, device: DeviceId, services: &[ServiceInfo]) {
      if !self.is_target(device) {
         return;
      }

      let mut requested = 0;
      for service in services {
         if recognition::is_monitored_service(&service.uuid) {
            debug!(
               "Discovering characteristics of {} ({})",
               recognition::uuid_string(&service.uuid),
               service.id.id
            );
            self.radio.request_discover_characteristics(service.id);
            requested += 1;
         }
      }

      if requested == 0 {
         warn!("{device} exposes none of the status services");
      } else if self.state == ConnectionState::DiscoveringServices {
         info!("{device} ready, {requested} service(s) monitored");
         self.transition(ConnectionState::Ready);
      }
   }

   fn characteristics_discovered(&mut self, service: ServiceId, characteristics: &[CharacteristicInfo]) {
      if !self.is_target(service.device) {
         return;
      }

      for c in characteristics {
         if c.can_read {
            self.radio.request_read(c.id);
         }
         if c.can_notify {
            self.radio.request_subscribe(c.id);
         }
         if c.can_write && self.probe_on_connect && recognition::is_control_characteristic(&c.uuid) {
            debug!("Probing {}", recognition::uuid_string(&c.uuid));
            for cmd in PKT_PROBE {
               self.radio.request_write(c.id, &[cmd], !c.write_without_response);
            }
         }
      }
   }

   fn value_updated(&mut self, characteristic: CharacteristicId, uuid: Uuid, value: &[u8]) {
      debug!(
         "Value from {} ({}): {}",
         recognition::uuid_string(&uuid),
         characteristic.id,
         hex::encode(value)
      );

      if parser::is_status_frame(value) {
         let records = parser::decode(value, self.device.is_swapped());
         if !records.is_empty() {
            self.device.apply(&records);
         }
      } else if recognition::is_battery_level(&uuid)
         && let Some(level) = value.first()
      {
         // Vendor frames are authoritative
         debug!("Standard battery level {level}% not applied");
      }
   }
}
