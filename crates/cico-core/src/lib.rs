//! Core domain + application logic for the CICO attendance bot.
//!
//! This crate is framework-agnostic. Telegram, the attendance portal, and image
//! processing live behind ports (traits) implemented in adapter crates.

pub mod config;
pub mod domain;
pub mod errors;
pub mod export;
pub mod formatting;
pub mod logging;
pub mod login;
pub mod messaging;
pub mod ports;
pub mod progress;
pub mod records;
pub mod report;
pub mod sender;
pub mod store;

pub use errors::{Error, Result};
