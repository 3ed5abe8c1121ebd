//! Database schema

pub mod init;

pub use init::*;
