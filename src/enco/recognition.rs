//! Device recognition logic for Enco earbuds.
//!
//! Matches advertised names against the configured pattern and classifies
//! GATT services and characteristics by UUID.

use smol_str::{SmolStr, format_smolstr};
use uuid::Uuid;

/// Standard Battery Service.
pub const BATTERY_SERVICE: Uuid = Uuid::from_u128(0x0000180f_0000_1000_8000_00805f9b34fb);

/// Standard Battery Level characteristic.
pub const BATTERY_LEVEL: Uuid = Uuid::from_u128(0x00002a19_0000_1000_8000_00805f9b34fb);

/// Substrings identifying the vendor services.
const VENDOR_SERVICE_PATTERNS: &[&str] = &["790", "79C", "79A"];

/// Substrings identifying the vendor control characteristics.
const CONTROL_CHARACTERISTIC_PATTERNS: &[&str] = &["79A", "79C"];

const BASE_UUID_LOW: u128 = 0x0000_0000_0000_1000_8000_00805f9b34fb;
const BASE_UUID_MASK: u128 = (1 << 96) - 1;

/// Renders a UUID the way it is matched: `180F` for 16-bit and `0000180F`
/// style for 32-bit Bluetooth-base ids, full uppercase form otherwise.
pub fn uuid_string(uuid: &Uuid) -> SmolStr {
   let raw = uuid.as_u128();
   if raw & BASE_UUID_MASK == BASE_UUID_LOW {
      let short = (raw >> 96) as u32;
      if short <= 0xffff {
         format_smolstr!("{short:04X}")
      } else {
         format_smolstr!("{short:08X}")
      }
   } else {
      let mut buf = Uuid::encode_buffer();
      SmolStr::new(uuid.hyphenated().encode_upper(&mut buf))
   }
}

/// Case-insensitive substring match of an advertised name.
pub fn is_target_name(name: &str, pattern: &str) -> bool {
   name.to_lowercase().contains(&pattern.to_lowercase())
}

/// Services whose characteristics carry status data.
pub fn is_monitored_service(uuid: &Uuid) -> bool {
   let s = uuid_string(uuid);
   s == "180F" || VENDOR_SERVICE_PATTERNS.iter().any(|p| s.contains(p))
}

/// Writable characteristics that accept the status probe.
pub fn is_control_characteristic(uuid: &Uuid) -> bool {
   let s = uuid_string(uuid);
   CONTROL_CHARACTERISTIC_PATTERNS.iter().any(|p| s.contains(p))
}

/// The standard battery level characteristic.
pub fn is_battery_level(uuid: &Uuid) -> bool {
   *uuid == BATTERY_LEVEL
}

#[cfg(test)]
mod tests {
   use super::*;

   const VENDOR_WRITE: Uuid = Uuid::from_u128(0x0000079a_d102_11e1_9b23_00025b00a5a5);
   const VENDOR_NOTIFY: Uuid = Uuid::from_u128(0x0000079b_d102_11e1_9b23_00025b00a5a5);
   const VENDOR_SERVICE: Uuid = Uuid::from_u128(0x00000790_d102_11e1_9b23_00025b00a5a5);

   #[test]
   fn test_uuid_string_short_forms() {
      assert_eq!(uuid_string(&BATTERY_SERVICE), "180F");
      assert_eq!(uuid_string(&BATTERY_LEVEL), "2A19");
      let wide = Uuid::from_u128(0x1234_5678_0000_1000_8000_00805f9b34fb);
      assert_eq!(uuid_string(&wide), "12345678");
   }

   #[test]
   fn test_uuid_string_full_form() {
      assert_eq!(
         uuid_string(&VENDOR_WRITE),
         "0000079A-D102-11E1-9B23-00025B00A5A5"
      );
   }

   #[test]
   fn test_name_match_is_case_insensitive() {
      assert!(is_target_name("OPPO Enco Air3 Pro", "Enco"));
      assert!(is_target_name("ENCO X2", "enco"));
      assert!(!is_target_name("AirPods Pro", "Enco"));
   }

   #[test]
   fn test_service_filter() {
      assert!(is_monitored_service(&BATTERY_SERVICE));
      assert!(is_monitored_service(&VENDOR_SERVICE));
      assert!(is_monitored_service(&VENDOR_WRITE));
      // Generic Access
      assert!(!is_monitored_service(&Uuid::from_u128(
         0x00001800_0000_1000_8000_00805f9b34fb
      )));
   }

   #[test]
   fn test_control_characteristic_filter() {
      assert!(is_control_characteristic(&VENDOR_WRITE));
      assert!(!is_control_characteristic(&VENDOR_NOTIFY));
      assert!(!is_control_characteristic(&BATTERY_LEVEL));
   }

   #[test]
   fn test_battery_level_filter() {
      assert!(is_battery_level(&BATTERY_LEVEL));
      assert!(!is_battery_level(&VENDOR_NOTIFY));
   }
}
