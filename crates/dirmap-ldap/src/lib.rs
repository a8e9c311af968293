//! Maps application objects onto LDAP directory entries.
//!
//! This crate provides the distinguished-name algebra, the [`Directory`] handle contract with
//! an `ldap3`-backed implementation, a registry of named directories and the [`Entry`]
//! lifecycle (create, update, move, replace, delete, authenticate, load) for any [`Schema`]
//! type.

#![deny(missing_docs)]

mod client;
mod config;
mod directory;
mod dn;
mod entry;
mod registry;
mod schema;

pub use client::LdapDirectory;
pub use config::{DirectoryConfig, DEFAULT_CONNECTION_TIMEOUT_SECS, DEFAULT_OPERATION_TIMEOUT_SECS};
pub use directory::{Attributes, Directory, DirectoryModification, WriteMode};
pub use dn::{
    coerce_to_dn, DistinguishedName, DistinguishedNameError, DnLike, RelativeDistinguishedName,
};
pub use entry::{Entry, OBJECT_CLASS_ATTRIBUTE};
pub use registry::{DirectoryRef, DirectoryRegistry};
pub use schema::{naming_attribute_of, Schema};

pub use dirmap_core::{DirectorySettings, Error, MapperSettings};

/// Convenient result alias that reuses the core error type.
pub type Result<T> = dirmap_core::Result<T>;
