//! Slot to channel mapping.

use crate::enco::protocol::{Channel, Slot};

impl Slot {
   /// Resolves the logical channel for this slot. The case never swaps.
   pub const fn channel(self, swapped: bool) -> Channel {
      match (self, swapped) {
         (Self::First, false) | (Self::Second, true) => Channel::Left,
         (Self::Second, false) | (Self::First, true) => Channel::Right,
         (Self::Case, _) => Channel::Case,
      }
   }
}

/// Maps a raw slot id to a channel. Unknown ids map to `None` and the
/// entry is to be dropped.
pub fn map(slot_id: u8, swapped: bool) -> Option<Channel> {
   Slot::from_repr(slot_id).map(|slot| slot.channel(swapped))
}
