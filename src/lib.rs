//! Offline-first client for a restaurant reviews server.
//!
//! Reads go through a durable local cache, writes made while offline are
//! queued and replayed once the server accepts them again.

pub mod cache;
pub mod config;
pub mod error;
pub mod restaurants;

pub use error::{Error, Result};
