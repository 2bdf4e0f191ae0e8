//! Core domain + application logic for the voice channel helper bot.
//!
//! This crate is framework-agnostic. Discord and the SQLite binding table live
//! behind ports (traits) implemented in adapter crates.

pub mod config;
pub mod domain;
pub mod errors;
pub mod logging;
pub mod ports;
pub mod purge;
pub mod reactor;

#[cfg(test)]
mod testing;

pub use errors::{Error, Result};
