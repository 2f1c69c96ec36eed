//! # phoneboot-common
//!
//! Shared types for the phoneboot workspace.
//!
//! This crate provides functionality used across all phoneboot crates:
//! - The bootstrap error taxonomy
//! - The immutable bootstrap configuration
//! - Address families
//! - Standard runtime paths

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod family;
pub mod paths;

pub use config::{BootstrapConfig, parse_yes_no};
pub use error::{BootError, BootResult};
pub use family::AddressFamily;
pub use paths::BootPaths;
