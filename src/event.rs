//! Event handling system for Enco status updates.
//!
//! This module provides the event infrastructure for notifying consumers
//! about state changes such as battery updates, charging changes and
//! connection status.

use std::sync::Arc;

use crate::{
   bluetooth::machine::ConnectionState,
   enco::protocol::{BatterySnapshot, ChargingSnapshot},
};

/// Events that can be emitted by the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorEvent {
   ConnectionChanged(bool),
   StateChanged(ConnectionState),
   BatteryUpdated(BatterySnapshot),
   ChargingUpdated(ChargingSnapshot),
   SwapChanged(bool),
}

/// Trait for implementing event emission.
pub trait EventBus: Send + Sync {
   /// Emits an event to all registered listeners.
   fn emit(&self, event: MonitorEvent);
}

/// Type alias for a thread-safe event sender.
pub type EventSender = Arc<dyn EventBus>;
