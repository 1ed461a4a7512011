//! Enco telemetry model and protocol implementation.
//!
//! This module contains the status frame decoder, the channel mapping,
//! device recognition, state reconciliation and the shared device state.

pub mod channel;
pub mod device;
pub mod parser;
pub mod protocol;
pub mod recognition;
pub mod reconciler;
