//! CLI command implementations.

pub mod common;
pub mod init;
pub mod policy;
pub mod refresh;
pub mod reset;
pub mod status;
