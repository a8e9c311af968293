//! Settings for bootstrapping directory connections.
//!
//! This module provides the deserializable settings model that describes every directory an
//! application maps schema objects onto, plus which of them is the default.

use crate::Error;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;
use validator::Validate;

/// Settings for every directory known to the application.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct MapperSettings {
    /// Name of the directory used when no directory is given explicitly
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_directory: Option<String>,

    /// Directory definitions
    #[validate(nested)]
    #[serde(default)]
    pub directories: Vec<DirectorySettings>,
}

impl MapperSettings {
    /// Create empty settings.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            default_directory: None,
            directories: Vec::new(),
        }
    }

    /// Parse settings from a JSON document and validate them.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] if the document is not valid JSON, a field fails
    /// validation, two directories share a name, or the default names no directory.
    pub fn from_json(input: &str) -> Result<Self, Error> {
        let settings: Self = serde_json::from_str(input)?;
        settings.check()?;
        Ok(settings)
    }

    /// Add a directory definition.
    #[must_use]
    pub fn with_directory(mut self, directory: DirectorySettings) -> Self {
        self.directories.push(directory);
        self
    }

    /// Set the default directory name.
    #[must_use]
    pub fn with_default_directory(mut self, name: impl Into<String>) -> Self {
        self.default_directory = Some(name.into());
        self
    }

    /// Validate field constraints and cross-directory consistency.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] describing the first problem found.
    pub fn check(&self) -> Result<(), Error> {
        self.validate()?;

        let mut seen = HashSet::new();
        for directory in &self.directories {
            if !seen.insert(directory.name.as_str()) {
                return Err(Error::ConfigError(format!(
                    "directory `{}` is defined more than once",
                    directory.name
                )));
            }
        }

        if let Some(default) = &self.default_directory {
            if !seen.contains(default.as_str()) {
                return Err(Error::ConfigError(format!(
                    "default directory `{default}` is not defined"
                )));
            }
        }

        Ok(())
    }
}

/// Settings for a single directory connection.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DirectorySettings {
    /// Name the directory is registered under
    #[validate(length(min = 1))]
    pub name: String,

    /// Directory server URL (e.g. `ldaps://ldap.example.com`)
    #[validate(url)]
    pub url: String,

    /// Base DN prepended to every entry location, empty for the server root
    #[serde(default)]
    pub base: String,

    /// DN used for the service bind, anonymous when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_dn: Option<String>,

    /// Password used for the service bind
    #[serde(default, skip_serializing)]
    pub bind_password: Option<String>,

    /// Whether to verify TLS certificates
    #[serde(default = "default_tls_verify")]
    pub tls_verify: bool,

    /// Optional path to custom CA certificate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_ca_cert: Option<PathBuf>,

    /// Connection timeout in seconds
    #[validate(range(min = 1, max = 300))]
    #[serde(default = "default_timeout_secs")]
    pub connection_timeout_secs: u64,

    /// Operation timeout in seconds
    #[validate(range(min = 1, max = 300))]
    #[serde(default = "default_timeout_secs")]
    pub operation_timeout_secs: u64,
}

const fn default_tls_verify() -> bool {
    true
}

const fn default_timeout_secs() -> u64 {
    10
}

impl DirectorySettings {
    /// Create directory settings with required parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty or the URL is invalid.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Result<Self, Error> {
        let settings = Self {
            name: name.into(),
            url: url.into(),
            base: String::new(),
            bind_dn: None,
            bind_password: None,
            tls_verify: default_tls_verify(),
            tls_ca_cert: None,
            connection_timeout_secs: default_timeout_secs(),
            operation_timeout_secs: default_timeout_secs(),
        };

        settings
            .validate()
            .map_err(|e| Error::ConfigError(format!("Invalid directory settings: {e}")))?;

        Ok(settings)
    }

    /// Set the base DN.
    #[must_use]
    pub fn with_base(mut self, base: impl Into<String>) -> Self {
        self.base = base.into();
        self
    }

    /// Set the service bind credentials.
    #[must_use]
    pub fn with_credentials(
        mut self,
        bind_dn: impl Into<String>,
        bind_password: impl Into<String>,
    ) -> Self {
        self.bind_dn = Some(bind_dn.into());
        self.bind_password = Some(bind_password.into());
        self
    }

    /// Set whether to verify TLS certificates.
    #[must_use]
    pub const fn with_tls_verify(mut self, verify: bool) -> Self {
        self.tls_verify = verify;
        self
    }

    /// Set the operation timeout in seconds.
    #[must_use]
    pub const fn with_operation_timeout(mut self, seconds: u64) -> Self {
        self.operation_timeout_secs = seconds;
        self
    }

    /// Get the connection timeout as a Duration.
    #[must_use]
    pub const fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    /// Get the operation timeout as a Duration.
    #[must_use]
    pub const fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    /// Parse and validate the directory URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL cannot be parsed.
    pub fn parse_url(&self) -> Result<Url, Error> {
        Url::parse(&self.url)
            .map_err(|e| Error::ConfigError(format!("Invalid directory URL: {e}")))
    }
}
