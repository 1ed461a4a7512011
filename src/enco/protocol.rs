//! Enco status protocol definitions and data structures.
//!
//! This module contains the wire constants of the proprietary status frame
//! and the data structures decoded from it.

use serde::{Deserialize, Serialize};
use serde_json::json;
use smallvec::SmallVec;

/// One notification or read payload.
pub type Frame = SmallVec<[u8; 32]>;

/// First byte of every proprietary status frame.
pub const FRAME_MAGIC: u8 = 0xAA;
/// A status frame is longer than this many bytes.
pub const FRAME_HEADER_LEN: usize = 12;
/// Offset of the record-type selector.
pub const OFFSET_RECORD_TYPE: usize = 9;
/// Offset of the entry count.
pub const OFFSET_ENTRY_COUNT: usize = 10;
/// Offset of the first `[slot, value]` entry.
pub const OFFSET_ENTRIES: usize = 11;

/// Highest battery percentage. The buds report status codes above it
/// (e.g. 228) when full.
pub const MAX_PERCENT: u8 = 100;

/// Written one byte at a time to a control characteristic to make the
/// buds push a status frame.
pub const PKT_PROBE: [u8; 4] = [0x00, 0x01, 0xAA, 0x55];

/// Record type carried by a status frame.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::FromRepr, strum::Display)]
pub enum RecordType {
   Battery = 0x01,
   Charging = 0x02,
}

/// Physical unit addressed by an entry, before the left/right remap.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::FromRepr)]
pub enum Slot {
   First = 0x01,
   Second = 0x02,
   Case = 0x03,
}

/// Logical unit after the left/right remap.
#[derive(
   Debug,
   Clone,
   Copy,
   PartialEq,
   Eq,
   Hash,
   Serialize,
   Deserialize,
   strum::Display,
)]
#[strum(serialize_all = "lowercase")]
pub enum Channel {
   Left,
   Right,
   Case,
}

/// A single decoded reading. Lives only between decode and merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryRecord {
   Battery { channel: Channel, percent: u8 },
   Charging { channel: Channel, charging: bool },
}

impl TelemetryRecord {
   pub const fn channel(&self) -> Channel {
      match *self {
         Self::Battery { channel, .. } | Self::Charging { channel, .. } => channel,
      }
   }

   const fn same_kind(&self, other: &Self) -> bool {
      matches!(
         (self, other),
         (Self::Battery { .. }, Self::Battery { .. }) | (Self::Charging { .. }, Self::Charging { .. })
      )
   }

   /// Whether `other` targets the same channel with the same record kind.
   pub fn supersedes(&self, other: &Self) -> bool {
      self.same_kind(other) && self.channel() == other.channel()
   }
}

/// Last known battery levels. `None` means never reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BatterySnapshot {
   pub left: Option<u8>,
   pub right: Option<u8>,
   pub case: Option<u8>,
   /// Unix time of the last accepted battery reading.
   pub last_updated: Option<u64>,
}

impl BatterySnapshot {
   pub fn get_mut(&mut self, channel: Channel) -> &mut Option<u8> {
      match channel {
         Channel::Left => &mut self.left,
         Channel::Right => &mut self.right,
         Channel::Case => &mut self.case,
      }
   }

   pub fn swap_sides(&mut self) {
      std::mem::swap(&mut self.left, &mut self.right);
   }

   pub fn to_json(self) -> serde_json::Value {
      json!({
          "left": self.left,
          "right": self.right,
          "case": self.case,
          "last_updated": self.last_updated,
      })
   }
}

/// Last known charging flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChargingSnapshot {
   pub left: bool,
   pub right: bool,
   pub case: bool,
}

impl ChargingSnapshot {
   pub fn get_mut(&mut self, channel: Channel) -> &mut bool {
      match channel {
         Channel::Left => &mut self.left,
         Channel::Right => &mut self.right,
         Channel::Case => &mut self.case,
      }
   }

   pub fn swap_sides(&mut self) {
      std::mem::swap(&mut self.left, &mut self.right);
   }

   pub fn to_json(self) -> serde_json::Value {
      json!({
          "left": self.left,
          "right": self.right,
          "case": self.case,
      })
   }
}
