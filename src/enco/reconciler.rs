//! Merging decoded records into the last known state.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::enco::protocol::{BatterySnapshot, ChargingSnapshot, MAX_PERCENT, TelemetryRecord};

/// Everything known about the buds, and the left/right preference used to
/// interpret them. This is also the persisted record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Telemetry {
   pub battery: BatterySnapshot,
   pub charging: ChargingSnapshot,
   pub swapped: bool,
}

/// What a merge changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Merged {
   /// At least one battery reading was accepted.
   pub battery: bool,
   /// At least one charging flag changed.
   pub charging: bool,
}

impl Merged {
   pub const fn any(&self) -> bool {
      self.battery || self.charging
   }
}

impl Telemetry {
   /// Applies one decode batch.
   ///
   /// A battery reading of zero carries no information and never replaces a
   /// stored level. Charging readings always overwrite. Any accepted battery
   /// reading stamps `now` as the last update time.
   pub fn merge(&mut self, records: &[TelemetryRecord], now: u64) -> Merged {
      let mut merged = Merged::default();

      for record in records {
         match *record {
            TelemetryRecord::Battery { channel, percent } => {
               if percent == 0 {
                  debug!("Ignoring zero battery reading for {channel}");
                  continue;
               }
               *self.battery.get_mut(channel) = Some(percent.min(MAX_PERCENT));
               merged.battery = true;
            },
            TelemetryRecord::Charging { channel, charging } => {
               let slot = self.charging.get_mut(channel);
               if *slot != charging {
                  *slot = charging;
                  merged.charging = true;
               }
            },
         }
      }

      if merged.battery {
         self.battery.last_updated = Some(now);
      }
      merged
   }

   /// Flips the swap preference and exchanges the stored left/right values
   /// so the change is visible before the next frame. Returns the new
   /// preference.
   pub fn toggle_swap(&mut self) -> bool {
      self.swapped = !self.swapped;
      self.battery.swap_sides();
      self.charging.swap_sides();
      self.swapped
   }

   /// Forgets all readings, keeping the swap preference.
   pub fn clear(&mut self) {
      self.battery = BatterySnapshot::default();
      self.charging = ChargingSnapshot::default();
   }
}
