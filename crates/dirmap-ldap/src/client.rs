//! LDAP-backed directory handle.

use crate::{
    config::DirectoryConfig,
    directory::{Attributes, Directory, DirectoryModification, WriteMode},
    dn::DistinguishedName,
    Result,
};
use async_trait::async_trait;
use dirmap_core::error::Error;
use ldap3::{LdapConnAsync, LdapConnSettings, Mod, Scope, SearchEntry};
use native_tls::{Certificate, TlsConnector};
use secrecy::ExposeSecret;
use std::collections::HashSet;
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

/// LDAP result code for rejected credentials.
const INVALID_CREDENTIALS: u32 = 49;

const ALL_USER_ATTRIBUTES: &[&str] = &["*"];
const NO_ATTRIBUTES: &[&str] = &["1.1"];
const ANY_ENTRY_FILTER: &str = "(objectClass=*)";

/// Represents the search scope for LDAP queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SearchScope {
    /// Base object only.
    Base,
    /// Entire subtree.
    Subtree,
}

impl From<SearchScope> for Scope {
    fn from(scope: SearchScope) -> Self {
        match scope {
            SearchScope::Base => Scope::Base,
            SearchScope::Subtree => Scope::Subtree,
        }
    }
}

/// LDAP entry representation returned by searches.
#[derive(Debug, Clone)]
pub(crate) struct LdapEntry {
    /// Distinguished name of the entry.
    pub(crate) dn: String,
    /// Attribute map.
    pub(crate) attributes: Attributes,
}

/// One LDAP connection. Every call is bounded by the operation timeout.
///
/// Error paths skip `unbind`; dropping the session closes the connection.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub(crate) trait LdapSession: Send {
    /// Returns `Ok(false)` when the server rejects the credentials.
    async fn simple_bind(&mut self, dn: &str, password: &str) -> Result<bool>;
    async fn search(
        &mut self,
        base_dn: &str,
        scope: SearchScope,
        filter: &str,
        attributes: &[&'static str],
    ) -> Result<Vec<LdapEntry>>;
    async fn add(&mut self, dn: &str, attributes: &Attributes) -> Result<()>;
    async fn modify(&mut self, dn: &str, modifications: &[DirectoryModification]) -> Result<()>;
    async fn modify_dn(&mut self, dn: &str, new_rdn: &str, new_superior: &str) -> Result<()>;
    async fn delete(&mut self, dn: &str) -> Result<()>;
    async fn unbind(&mut self) -> Result<()>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub(crate) trait LdapConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn LdapSession>>;
}

/// Directory handle that talks to an LDAP server through `ldap3`.
///
/// Every operation opens its own session, binds with the configured service credentials
/// (anonymously when none are configured), runs under the operation timeout and unbinds.
pub struct LdapDirectory {
    config: Arc<DirectoryConfig>,
    connector: Box<dyn LdapConnector>,
}

impl LdapDirectory {
    /// Creates a directory handle that uses the real LDAP connector.
    #[must_use]
    pub fn new(config: DirectoryConfig) -> Self {
        let config = Arc::new(config);
        let connector: Box<dyn LdapConnector> = Box::new(RealLdapConnector::new(config.clone()));
        Self { config, connector }
    }

    #[cfg(test)]
    #[must_use]
    pub(crate) fn with_connector(config: DirectoryConfig, connector: Box<dyn LdapConnector>) -> Self {
        Self {
            config: Arc::new(config),
            connector,
        }
    }

    /// Returns the connection configuration.
    #[must_use]
    pub fn config(&self) -> &DirectoryConfig {
        &self.config
    }

    async fn service_session(&self) -> Result<Box<dyn LdapSession>> {
        let mut session = self.connector.connect().await?;
        if let Some((bind_dn, password)) = self.config.credentials() {
            let accepted = session
                .simple_bind(bind_dn, password.expose_secret())
                .await?;
            if !accepted {
                return Err(Error::DirectoryOperation {
                    operation: "bind".to_string(),
                    result_code: Some(INVALID_CREDENTIALS),
                    message: format!("service bind as `{bind_dn}` was rejected"),
                });
            }
        }
        Ok(session)
    }
}

#[async_trait]
impl Directory for LdapDirectory {
    fn base(&self) -> DistinguishedName {
        self.config.base_dn().clone()
    }

    async fn write_entry(
        &self,
        dn: &DistinguishedName,
        attributes: &Attributes,
        mode: WriteMode,
    ) -> Result<()> {
        let mut session = self.service_session().await?;
        if mode == WriteMode::Replace {
            match session.delete(dn.as_str()).await {
                Ok(()) => debug!("removed existing entry {dn} before replacing it"),
                Err(err) if err.is_no_such_object() => debug!("no entry at {dn} to replace"),
                Err(err) => return Err(err),
            }
        }
        session.add(dn.as_str(), attributes).await?;
        session.unbind().await?;
        Ok(())
    }

    async fn apply_delta(
        &self,
        dn: &DistinguishedName,
        modifications: &[DirectoryModification],
    ) -> Result<()> {
        let mut session = self.service_session().await?;
        session.modify(dn.as_str(), modifications).await?;
        session.unbind().await?;
        Ok(())
    }

    async fn rename(&self, old_dn: &DistinguishedName, new_dn: &DistinguishedName) -> Result<()> {
        let new_rdn = new_dn.first_rdn()?.to_string();
        let new_superior = new_dn.without_first_rdn()?;
        let mut session = self.service_session().await?;
        session
            .modify_dn(old_dn.as_str(), &new_rdn, new_superior.as_str())
            .await?;
        session.unbind().await?;
        Ok(())
    }

    async fn delete_leaf(&self, dn: &DistinguishedName) -> Result<()> {
        let mut session = self.service_session().await?;
        session.delete(dn.as_str()).await?;
        session.unbind().await?;
        Ok(())
    }

    async fn delete_subtree(&self, dn: &DistinguishedName) -> Result<()> {
        let mut session = self.service_session().await?;
        let entries = session
            .search(dn.as_str(), SearchScope::Subtree, ANY_ENTRY_FILTER, NO_ATTRIBUTES)
            .await?;

        // Server DNs are used verbatim; they may hold multi-valued RDNs the strict parser
        // refuses. Deepest entries first so every delete hits a leaf.
        let mut targets = entries.into_iter().map(|entry| entry.dn).collect::<Vec<_>>();
        targets.sort_by_key(|target| std::cmp::Reverse(component_count(target)));

        for target in &targets {
            debug!("deleting subtree member {target}");
            session.delete(target).await?;
        }
        session.unbind().await?;
        Ok(())
    }

    async fn fetch(&self, dn: &DistinguishedName) -> Result<Option<Attributes>> {
        let mut session = self.service_session().await?;
        let result = session
            .search(dn.as_str(), SearchScope::Base, ANY_ENTRY_FILTER, ALL_USER_ATTRIBUTES)
            .await;
        let entries = match result {
            Ok(entries) => entries,
            Err(err) if err.is_no_such_object() => Vec::new(),
            Err(err) => return Err(err),
        };
        session.unbind().await?;
        Ok(entries.into_iter().next().map(|entry| entry.attributes))
    }

    async fn bind(&self, dn: &DistinguishedName, credential: &str) -> Result<bool> {
        // An empty password would be an unauthenticated bind, which servers accept.
        if credential.is_empty() {
            return Ok(false);
        }
        let mut session = self.connector.connect().await?;
        let accepted = session.simple_bind(dn.as_str(), credential).await?;
        session.unbind().await?;
        Ok(accepted)
    }
}

/// Real LDAP connector backed by `ldap3`.
pub(crate) struct RealLdapConnector {
    config: Arc<DirectoryConfig>,
}

impl RealLdapConnector {
    pub(crate) fn new(config: Arc<DirectoryConfig>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl LdapConnector for RealLdapConnector {
    async fn connect(&self) -> Result<Box<dyn LdapSession>> {
        let settings = build_ldap_settings(&self.config)?;
        let (conn, ldap) = LdapConnAsync::with_settings(settings, self.config.url())
            .await
            .map_err(|err| map_ldap_error("connect", err))?;
        ldap3::drive!(conn);
        Ok(Box::new(RealLdapSession {
            inner: ldap,
            operation_timeout: self.config.operation_timeout(),
        }))
    }
}

struct RealLdapSession {
    inner: ldap3::Ldap,
    operation_timeout: Duration,
}

async fn run_checked<F>(limit: Duration, operation: &str, fut: F) -> Result<ldap3::LdapResult>
where
    F: std::future::Future<Output = ldap3::result::Result<ldap3::LdapResult>>,
{
    let result = timeout(limit, fut)
        .await
        .map_err(|_| Error::directory(operation, "operation timed out"))?
        .map_err(|err| map_ldap_error(operation, err))?;
    result.success().map_err(|err| map_ldap_error(operation, err))
}

#[async_trait]
impl LdapSession for RealLdapSession {
    async fn simple_bind(&mut self, dn: &str, password: &str) -> Result<bool> {
        let result = timeout(self.operation_timeout, self.inner.simple_bind(dn, password))
            .await
            .map_err(|_| Error::directory("bind", "operation timed out"))?
            .map_err(|err| map_ldap_error("bind", err))?;
        bind_outcome(result)
    }

    async fn search(
        &mut self,
        base_dn: &str,
        scope: SearchScope,
        filter: &str,
        attributes: &[&'static str],
    ) -> Result<Vec<LdapEntry>> {
        let result = timeout(
            self.operation_timeout,
            self.inner
                .search(base_dn, scope.into(), filter, attributes.to_vec()),
        )
        .await
        .map_err(|_| Error::directory("search", "operation timed out"))?
        .map_err(|err| map_ldap_error("search", err))?;
        let (entries, _) = result
            .success()
            .map_err(|err| map_ldap_error("search", err))?;
        Ok(entries
            .into_iter()
            .map(SearchEntry::construct)
            .map(|entry| LdapEntry {
                dn: entry.dn,
                attributes: entry.attrs.into_iter().collect(),
            })
            .collect())
    }

    async fn add(&mut self, dn: &str, attributes: &Attributes) -> Result<()> {
        let attrs = attributes
            .iter()
            .map(|(name, values)| {
                (
                    name.to_string(),
                    values.iter().cloned().collect::<HashSet<_>>(),
                )
            })
            .collect::<Vec<_>>();
        run_checked(self.operation_timeout, "add", self.inner.add(dn, attrs)).await?;
        Ok(())
    }

    async fn modify(&mut self, dn: &str, modifications: &[DirectoryModification]) -> Result<()> {
        let mods = modifications
            .iter()
            .map(|m| match m {
                DirectoryModification::Add { attribute, values } => Mod::Add(
                    attribute.clone(),
                    values.iter().cloned().collect::<HashSet<_>>(),
                ),
                DirectoryModification::Delete { attribute, values } => Mod::Delete(
                    attribute.clone(),
                    values.iter().cloned().collect::<HashSet<_>>(),
                ),
                DirectoryModification::Replace { attribute, values } => Mod::Replace(
                    attribute.clone(),
                    values.iter().cloned().collect::<HashSet<_>>(),
                ),
            })
            .collect::<Vec<_>>();

        run_checked(self.operation_timeout, "modify", self.inner.modify(dn, mods)).await?;
        Ok(())
    }

    async fn modify_dn(&mut self, dn: &str, new_rdn: &str, new_superior: &str) -> Result<()> {
        let superior = (!new_superior.is_empty()).then_some(new_superior);
        run_checked(
            self.operation_timeout,
            "modify_dn",
            self.inner.modifydn(dn, new_rdn, true, superior),
        )
        .await?;
        Ok(())
    }

    async fn delete(&mut self, dn: &str) -> Result<()> {
        run_checked(self.operation_timeout, "delete", self.inner.delete(dn)).await?;
        Ok(())
    }

    async fn unbind(&mut self) -> Result<()> {
        timeout(self.operation_timeout, self.inner.unbind())
            .await
            .map_err(|_| Error::directory("unbind", "operation timed out"))?
            .map_err(|err| map_ldap_error("unbind", err))?;
        Ok(())
    }
}

/// Only invalidCredentials counts as a rejected bind; any other failure is an error.
fn bind_outcome(result: ldap3::LdapResult) -> Result<bool> {
    match result.rc {
        0 => Ok(true),
        INVALID_CREDENTIALS => Ok(false),
        _ => result
            .success()
            .map(|_| true)
            .map_err(|err| map_ldap_error("bind", err)),
    }
}

/// Number of RDNs in a DN string, counting unescaped commas outside quotes.
fn component_count(dn: &str) -> usize {
    if dn.trim().is_empty() {
        return 0;
    }
    let mut count = 1;
    let mut escaped = false;
    let mut quoted = false;
    for ch in dn.chars() {
        match ch {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            '"' => quoted = !quoted,
            ',' | ';' if !quoted => count += 1,
            _ => {}
        }
    }
    count
}

fn build_ldap_settings(config: &DirectoryConfig) -> Result<LdapConnSettings> {
    let mut settings = LdapConnSettings::new().set_conn_timeout(config.connection_timeout());

    if !config.tls_verify() {
        let connector = TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|err| {
                Error::ConfigError(format!("failed to construct TLS connector: {err}"))
            })?;
        settings = settings.set_connector(connector).set_no_tls_verify(true);
    } else if let Some(cert_path) = config.tls_ca_cert() {
        let pem = fs::read(cert_path).map_err(|err| {
            Error::ConfigError(format!(
                "failed to read directory CA certificate {}: {err}",
                cert_path.display()
            ))
        })?;
        let certificate = Certificate::from_pem(&pem).map_err(|err| {
            Error::ConfigError(format!("invalid directory CA certificate: {err}"))
        })?;
        let connector = TlsConnector::builder()
            .add_root_certificate(certificate)
            .build()
            .map_err(|err| {
                Error::ConfigError(format!("failed to load directory CA certificate: {err}"))
            })?;
        settings = settings.set_connector(connector);
    }

    Ok(settings)
}

fn map_ldap_error(operation: &str, err: ldap3::LdapError) -> Error {
    let result_code = match &err {
        ldap3::LdapError::LdapResult { result } => Some(result.rc),
        _ => None,
    };
    Error::DirectoryOperation {
        operation: operation.to_string(),
        result_code,
        message: err.to_string(),
    }
}
