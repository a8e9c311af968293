//! Connection configuration for one LDAP directory.

use crate::{dn::DistinguishedName, Result};
use dirmap_core::config::DirectorySettings;
use secrecy::SecretString;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Default connection timeout (seconds).
pub const DEFAULT_CONNECTION_TIMEOUT_SECS: u64 = 10;
/// Default operation timeout (seconds).
pub const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 10;

/// Configuration for connecting to an LDAP directory.
#[derive(Debug)]
pub struct DirectoryConfig {
    url: String,
    base_dn: DistinguishedName,
    bind_dn: Option<String>,
    bind_password: Option<SecretString>,
    tls_verify: bool,
    tls_ca_cert: Option<PathBuf>,
    connection_timeout_secs: u64,
    operation_timeout_secs: u64,
}

impl DirectoryConfig {
    /// Creates a new directory configuration with anonymous service access.
    ///
    /// # Errors
    ///
    /// Returns an error if the provided URL is invalid.
    pub fn new(url: impl Into<String>, base_dn: DistinguishedName) -> Result<Self> {
        let url_string = url.into();
        Url::parse(&url_string)?;

        Ok(Self {
            url: url_string,
            base_dn,
            bind_dn: None,
            bind_password: None,
            tls_verify: true,
            tls_ca_cert: None,
            connection_timeout_secs: DEFAULT_CONNECTION_TIMEOUT_SECS,
            operation_timeout_secs: DEFAULT_OPERATION_TIMEOUT_SECS,
        })
    }

    /// Builds a configuration from deserialized settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the base is not a valid DN.
    pub fn from_settings(settings: &DirectorySettings) -> Result<Self> {
        let url = settings.parse_url()?;
        let base_dn = DistinguishedName::parse(&settings.base)?;
        let mut config = Self::new(url.as_str(), base_dn)?
            .with_tls_verification(settings.tls_verify)
            .with_connection_timeout_secs(settings.connection_timeout_secs)
            .with_operation_timeout_secs(settings.operation_timeout_secs);

        if let Some(bind_dn) = &settings.bind_dn {
            let password = settings.bind_password.clone().unwrap_or_default();
            config = config.with_credentials(bind_dn.clone(), SecretString::from(password));
        }
        if let Some(path) = &settings.tls_ca_cert {
            config = config.with_tls_ca_cert(path.clone());
        }

        Ok(config)
    }

    /// Returns the directory endpoint URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns the base distinguished name.
    #[must_use]
    pub const fn base_dn(&self) -> &DistinguishedName {
        &self.base_dn
    }

    /// Returns the service bind DN and password, if configured.
    #[must_use]
    pub fn credentials(&self) -> Option<(&str, &SecretString)> {
        self.bind_dn.as_deref().zip(self.bind_password.as_ref())
    }

    /// Returns the connection timeout duration.
    #[must_use]
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    /// Returns the operation timeout duration.
    #[must_use]
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    /// Returns whether TLS certificate verification is enabled.
    #[must_use]
    pub const fn tls_verify(&self) -> bool {
        self.tls_verify
    }

    /// Optional custom CA certificate path.
    #[must_use]
    pub fn tls_ca_cert(&self) -> Option<&PathBuf> {
        self.tls_ca_cert.as_ref()
    }

    /// Sets the service bind credentials.
    #[must_use]
    pub fn with_credentials(mut self, bind_dn: impl Into<String>, password: SecretString) -> Self {
        self.bind_dn = Some(bind_dn.into());
        self.bind_password = Some(password);
        self
    }

    /// Enables or disables TLS certificate verification.
    #[must_use]
    pub const fn with_tls_verification(mut self, verify: bool) -> Self {
        self.tls_verify = verify;
        self
    }

    /// Sets the custom CA certificate path for TLS verification.
    #[must_use]
    pub fn with_tls_ca_cert(mut self, path: PathBuf) -> Self {
        self.tls_ca_cert = Some(path);
        self
    }

    /// Overrides the connection timeout in seconds.
    #[must_use]
    pub const fn with_connection_timeout_secs(mut self, seconds: u64) -> Self {
        self.connection_timeout_secs = seconds;
        self
    }

    /// Overrides the operation timeout in seconds.
    #[must_use]
    pub const fn with_operation_timeout_secs(mut self, seconds: u64) -> Self {
        self.operation_timeout_secs = seconds;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dirmap_core::Error;
    use secrecy::ExposeSecret;

    #[test]
    fn builder_overrides() {
        let base_dn = DistinguishedName::parse("dc=example,dc=com").unwrap();

        let config = DirectoryConfig::new("ldaps://ldap.example.com", base_dn.clone())
            .unwrap()
            .with_credentials(
                "cn=admin,dc=example,dc=com",
                SecretString::from("secret".to_string()),
            )
            .with_connection_timeout_secs(20)
            .with_operation_timeout_secs(30)
            .with_tls_verification(false);

        let (bind_dn, password) = config.credentials().unwrap();
        assert_eq!(bind_dn, "cn=admin,dc=example,dc=com");
        assert_eq!(password.expose_secret(), "secret");
        assert_eq!(config.connection_timeout(), Duration::from_secs(20));
        assert_eq!(config.operation_timeout(), Duration::from_secs(30));
        assert!(!config.tls_verify());
        assert_eq!(config.base_dn(), &base_dn);
    }

    #[test]
    fn password_is_redacted_in_debug() {
        let config = DirectoryConfig::new("ldap://ldap.example.com", DistinguishedName::empty())
            .unwrap()
            .with_credentials("cn=admin", SecretString::from("hunter2".to_string()));
        assert!(!format!("{config:?}").contains("hunter2"));
    }

    #[test]
    fn from_settings_parses_base_and_credentials() {
        let settings = DirectorySettings::new("main", "ldap://ldap.example.com")
            .unwrap()
            .with_base("dc=example,dc=com")
            .with_credentials("cn=admin,dc=example,dc=com", "secret")
            .with_operation_timeout(42);

        let config = DirectoryConfig::from_settings(&settings).unwrap();
        assert_eq!(config.base_dn().as_str(), "dc=example,dc=com");
        assert_eq!(config.operation_timeout(), Duration::from_secs(42));
        assert!(config.credentials().is_some());
    }

    #[test]
    fn from_settings_rejects_malformed_base() {
        let settings = DirectorySettings::new("main", "ldap://ldap.example.com")
            .unwrap()
            .with_base("dc=example,,dc=com");
        let err = DirectoryConfig::from_settings(&settings).unwrap_err();
        assert!(matches!(err, Error::MalformedDn(_)));
    }

    #[test]
    fn from_settings_reports_invalid_url() {
        let mut settings = DirectorySettings::new("main", "ldap://ldap.example.com").unwrap();
        settings.url = "not a url".to_string();
        let err = DirectoryConfig::from_settings(&settings).unwrap_err();
        assert!(matches!(err, Error::ConfigError(message) if message.contains("directory URL")));
    }

    #[test]
    fn invalid_url_is_rejected() {
        let err = DirectoryConfig::new("not a url", DistinguishedName::empty()).unwrap_err();
        assert!(matches!(err, Error::ConfigError(_)));
    }
}
