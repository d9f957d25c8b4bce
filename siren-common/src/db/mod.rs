//! Warehouse schema and database access

pub mod init;

pub use init::*;
