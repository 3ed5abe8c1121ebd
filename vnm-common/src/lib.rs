//! # VNM Common Library
//!
//! Shared code for the VPN node manager services including:
//! - Error type shared by every crate
//! - Configuration loading and root folder resolution
//! - Event types (NodeEvent enum) and the broadcast bus
//! - Database schema initialization
//! - Timestamp utilities

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod time;

pub use error::{Error, Result};
