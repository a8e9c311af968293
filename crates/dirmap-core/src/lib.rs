//! # dirmap-core
//!
//! Core types shared by the directory mapping crates.
//!
//! ## Modules
//!
//! - [`error`] - Error taxonomy for DN handling, entry lifecycle and directory access
//! - [`config`] - Deserializable settings describing the directories to connect to

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;

// Re-export commonly used types
pub use config::{DirectorySettings, MapperSettings};
pub use error::{Error, Result};
