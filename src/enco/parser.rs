//! Status frame decoding for the Enco protocol.
//!
//! Frames look like `AA [len] [7 reserved] [type] [count] ([slot] [value])*`.
//! Decoding never fails outward: anything that is not a well-formed status
//! frame decodes to no records.

use log::{debug, warn};
use thiserror::Error;

use crate::enco::{
   channel,
   protocol::{
      FRAME_HEADER_LEN, FRAME_MAGIC, MAX_PERCENT, OFFSET_ENTRIES, OFFSET_ENTRY_COUNT,
      OFFSET_RECORD_TYPE, RecordType, TelemetryRecord,
   },
};

/// Records decoded from one frame. At most one per channel.
pub type Records = heapless::Vec<TelemetryRecord, 3>;

/// Error type for status frame parsing.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ProtoError {
   /// Frame does not start with the status magic
   #[error("Not a status frame (first byte 0x{first:02x})")]
   WrongPacketType { first: u8 },

   /// Frame is too short to carry a header
   #[error("Frame too short: expected more than {expected} bytes, got {actual}")]
   PacketTooShort { expected: usize, actual: usize },

   /// Record type byte is neither battery nor charging
   #[error("Unknown record type: 0x{record_type:02x}")]
   UnknownRecordType { record_type: u8 },
}

/// Whether `data` is a proprietary status frame.
pub fn is_status_frame(data: &[u8]) -> bool {
   data.first() == Some(&FRAME_MAGIC) && data.len() > FRAME_HEADER_LEN
}

/// Decodes a status frame into telemetry records, mapping slots with the
/// given swap preference.
pub fn decode(data: &[u8], swapped: bool) -> Records {
   match parse_status_frame(data, swapped) {
      Ok(records) => records,
      Err(e) => {
         debug!("Dropping frame {}: {e}", hex::encode(data));
         Records::new()
      },
   }
}

fn parse_status_frame(data: &[u8], swapped: bool) -> Result<Records, ProtoError> {
   let Some(&first) = data.first() else {
      return Err(ProtoError::PacketTooShort {
         expected: FRAME_HEADER_LEN,
         actual: 0,
      });
   };
   if first != FRAME_MAGIC {
      return Err(ProtoError::WrongPacketType { first });
   }
   if data.len() <= FRAME_HEADER_LEN {
      return Err(ProtoError::PacketTooShort {
         expected: FRAME_HEADER_LEN,
         actual: data.len(),
      });
   }

   let record_type = data[OFFSET_RECORD_TYPE];
   let Some(record_type) = RecordType::from_repr(record_type) else {
      return Err(ProtoError::UnknownRecordType { record_type });
   };
   let count = data[OFFSET_ENTRY_COUNT] as usize;

   debug!("Status frame: {}", hex::encode(data));
   debug!("Record type: {record_type}, entries: {count}, length: {}", data.len());

   let mut records = Records::new();
   let entries = data[OFFSET_ENTRIES..].chunks_exact(2).take(count);
   if entries.len() < count {
      debug!("Frame truncated: {count} entries declared, {} present", entries.len());
   }

   for entry in entries {
      let (slot, value) = (entry[0], entry[1]);

      let Some(channel) = channel::map(slot, swapped) else {
         debug!("Unknown slot 0x{slot:02x}, skipping entry");
         continue;
      };

      let record = match record_type {
         RecordType::Battery => TelemetryRecord::Battery {
            channel,
            percent: value.min(MAX_PERCENT),
         },
         RecordType::Charging => TelemetryRecord::Charging {
            channel,
            charging: value != 0,
         },
      };
      debug!("Parsed entry: slot {slot} => {record:?}");

      if let Some(prev) = records.iter_mut().find(|r| r.supersedes(&record)) {
         *prev = record;
      } else if records.push(record).is_err() {
         warn!("Record buffer full, dropping {record:?}");
      }
   }

   Ok(records)
}

#[cfg(test)]
mod tests {
   use super::*;
   use crate::enco::protocol::Channel;

   fn frame(record_type: u8, entries: &[(u8, u8)]) -> Vec<u8> {
      let mut data = vec![FRAME_MAGIC, 0x00, 0, 0, 0, 0, 0, 0, 0, record_type];
      data.push(entries.len() as u8);
      for &(slot, value) in entries {
         data.extend([slot, value]);
      }
      // Pad short frames past the header boundary
      while data.len() <= FRAME_HEADER_LEN {
         data.push(0);
      }
      data
   }

   fn battery(channel: Channel, percent: u8) -> TelemetryRecord {
      TelemetryRecord::Battery { channel, percent }
   }

   fn charging(channel: Channel, charging: bool) -> TelemetryRecord {
      TelemetryRecord::Charging { channel, charging }
   }

   #[test]
   fn test_battery_frame() {
      let data = frame(0x01, &[(1, 55), (2, 228)]);
      let records = decode(&data, false);
      assert_eq!(
         records.as_slice(),
         &[battery(Channel::Left, 55), battery(Channel::Right, 100)]
      );
   }

   #[test]
   fn test_battery_frame_swapped() {
      let data = frame(0x01, &[(1, 55), (2, 228)]);
      let records = decode(&data, true);
      assert_eq!(
         records.as_slice(),
         &[battery(Channel::Right, 55), battery(Channel::Left, 100)]
      );
   }

   #[test]
   fn test_battery_values_clamp() {
      for value in 0..=u8::MAX {
         let data = frame(0x01, &[(3, value)]);
         let records = decode(&data, false);
         assert_eq!(records.as_slice(), &[battery(Channel::Case, value.min(100))]);
      }
   }

   #[test]
   fn test_charging_frame() {
      let data = frame(0x02, &[(1, 0), (2, 1), (3, 4)]);
      let records = decode(&data, false);
      assert_eq!(
         records.as_slice(),
         &[
            charging(Channel::Left, false),
            charging(Channel::Right, true),
            charging(Channel::Case, true),
         ]
      );
   }

   #[test]
   fn test_unknown_slot_is_skipped() {
      let data = frame(0x01, &[(7, 40), (2, 60)]);
      let records = decode(&data, false);
      assert_eq!(records.as_slice(), &[battery(Channel::Right, 60)]);
   }

   #[test]
   fn test_duplicate_channel_last_wins() {
      let data = frame(0x01, &[(1, 10), (3, 90), (1, 20)]);
      let records = decode(&data, false);
      assert_eq!(
         records.as_slice(),
         &[battery(Channel::Left, 20), battery(Channel::Case, 90)]
      );
   }

   #[test]
   fn test_truncated_entry_is_dropped() {
      // Declares three entries, carries two and a half
      let mut data = vec![FRAME_MAGIC, 0x00, 0, 0, 0, 0, 0, 0, 0, 0x01, 3];
      data.extend([1, 30, 2, 40, 3]);
      let records = decode(&data, false);
      assert_eq!(
         records.as_slice(),
         &[battery(Channel::Left, 30), battery(Channel::Right, 40)]
      );
   }

   #[test]
   fn test_rejects_non_status_frames() {
      assert!(decode(&[], false).is_empty());

      let mut data = frame(0x01, &[(1, 50), (2, 50)]);
      data[0] = 0xAB;
      assert!(decode(&data, false).is_empty());
      assert!(!is_status_frame(&data));

      // Exactly header length is still too short
      let short = [FRAME_MAGIC, 0, 0, 0, 0, 0, 0, 0, 0, 0x01, 1, 1];
      assert_eq!(short.len(), FRAME_HEADER_LEN);
      assert!(decode(&short, false).is_empty());
      assert!(!is_status_frame(&short));
   }

   #[test]
   fn test_unknown_record_type() {
      let data = frame(0x05, &[(1, 50)]);
      assert!(is_status_frame(&data));
      assert!(decode(&data, false).is_empty());
      assert_eq!(
         parse_status_frame(&data, false),
         Err(ProtoError::UnknownRecordType { record_type: 0x05 })
      );
   }
}
