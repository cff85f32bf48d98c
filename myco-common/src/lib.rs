//! # Myco Common Library
//!
//! Shared code for the Myco nowcast service:
//! - Error taxonomy (`Error` enum, `Result` alias)
//! - Configuration loading (TOML file + `MYCO_*` environment overrides)

pub mod config;
pub mod error;

pub use error::{Error, Result};
