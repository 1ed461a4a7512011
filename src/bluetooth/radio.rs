//! Capability interfaces between the state machine and the radio.
//!
//! [`Radio`] carries fire-and-forget requests out of the state machine;
//! results come back later through [`CentralEvents`] and
//! [`PeripheralEvents`], usually by way of a queued [`RadioEvent`].

use bluer::Address;
use smol_str::SmolStr;
use uuid::Uuid;

use crate::enco::protocol::Frame;

pub type DeviceId = Address;

/// A GATT service on a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceId {
   pub device: DeviceId,
   pub id: u16,
}

/// A GATT characteristic within a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CharacteristicId {
   pub service: ServiceId,
   pub id: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
   pub id: ServiceId,
   pub uuid: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicInfo {
   pub id: CharacteristicId,
   pub uuid: Uuid,
   pub can_read: bool,
   /// Notify or indicate.
   pub can_notify: bool,
   /// Write with or without response.
   pub can_write: bool,
   pub write_without_response: bool,
}

/// A device seen by the scanner or found already connected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
   pub device: DeviceId,
   pub name: Option<SmolStr>,
   /// The OS already holds a link to the device.
   pub connected: bool,
}

/// Requests issued by the state machine. None of them block; each result
/// arrives later as a separate event.
pub trait Radio {
   fn request_scan(&mut self);
   fn request_connect(&mut self, device: DeviceId);
   fn request_discover_services(&mut self, device: DeviceId);
   fn request_discover_characteristics(&mut self, service: ServiceId);
   fn request_read(&mut self, characteristic: CharacteristicId);
   fn request_subscribe(&mut self, characteristic: CharacteristicId);
   fn request_write(&mut self, characteristic: CharacteristicId, data: &[u8], ack_required: bool);
}

/// Adapter-level events.
pub trait CentralEvents {
   fn power_state_changed(&mut self, powered: bool);
   fn advertisement_observed(&mut self, advertisement: Advertisement);
   fn connect_result(&mut self, device: DeviceId, result: Result<(), SmolStr>);
   fn disconnected(&mut self, device: DeviceId, reason: Option<SmolStr>);
}

/// Connection-level events.
pub trait PeripheralEvents {
   fn services_discovered(&mut self, device: DeviceId, services: &[ServiceInfo]);
   fn characteristics_discovered(&mut self, service: ServiceId, characteristics: &[CharacteristicInfo]);
   fn value_updated(&mut self, characteristic: CharacteristicId, uuid: Uuid, value: &[u8]);
}

/// A radio event queued for the state-owning task.
#[derive(Debug, Clone)]
pub enum RadioEvent {
   PowerStateChanged(bool),
   Advertisement(Advertisement),
   ConnectResult(DeviceId, Result<(), SmolStr>),
   Disconnected(DeviceId, Option<SmolStr>),
   ServicesDiscovered(DeviceId, Vec<ServiceInfo>),
   CharacteristicsDiscovered(ServiceId, Vec<CharacteristicInfo>),
   ValueUpdated(CharacteristicId, Uuid, Frame),
}

impl RadioEvent {
   /// Whether the event ends the current link.
   pub fn ends_link(&self) -> bool {
      matches!(
         self,
         Self::Disconnected(..) | Self::PowerStateChanged(false) | Self::ConnectResult(_, Err(_))
      )
   }

   pub fn deliver<S: CentralEvents + PeripheralEvents>(self, sink: &mut S) {
      match self {
         Self::PowerStateChanged(powered) => sink.power_state_changed(powered),
         Self::Advertisement(adv) => sink.advertisement_observed(adv),
         Self::ConnectResult(device, result) => sink.connect_result(device, result),
         Self::Disconnected(device, reason) => sink.disconnected(device, reason),
         Self::ServicesDiscovered(device, services) => sink.services_discovered(device, &services),
         Self::CharacteristicsDiscovered(service, chars) => {
            sink.characteristics_discovered(service, &chars);
         },
         Self::ValueUpdated(characteristic, uuid, value) => {
            sink.value_updated(characteristic, uuid, &value);
         },
      }
   }
}
