//! Matrix Modem Bridge - Rust chat/telephony daemon
//!
//! This daemon bridges Matrix rooms and a ModemManager modem: the owner sends
//! SMS, places calls and queries the location by typing commands in chat, and
//! inbound SMS, ringing calls and low battery warnings are posted back into
//! the rooms bound to each phone number.

pub mod chat;
pub mod modem;
pub mod routing;
pub mod command;
pub mod executor;
pub mod translator;
pub mod delivery;
pub mod power;
pub mod bridge;
pub mod config;
pub mod error;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use error::{Error, Result};
