//! Bluetooth LE side of the service.
//!
//! This module provides the radio capability interfaces, the connection
//! state machine and the BlueZ-backed manager that drives it.

pub mod machine;
pub mod manager;
pub mod radio;
