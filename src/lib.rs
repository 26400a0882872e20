//! vipflow - SDN controller
//!
//! Learns MAC bindings per forwarding device, drops traffic between
//! blocked host pairs, and load-balances a virtual IP across a small set of
//! backends by answering ARP for it and installing rewrite rules on the
//! device.

pub mod config;
pub mod controller;
pub mod dataplane;
pub mod error;
pub mod flow;
pub mod protocol;
pub mod southbound;
pub mod telemetry;

pub use error::{Error, Result};
