//! Process-wide lookup from directory names to directory handles.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use dirmap_core::{config::MapperSettings, error::Error};
use tracing::info;

use crate::{client::LdapDirectory, config::DirectoryConfig, directory::Directory, Result};

/// A directory argument given either as a handle or as a registered name.
#[derive(Clone)]
pub enum DirectoryRef {
    /// Already-resolved directory handle.
    Handle(Arc<dyn Directory>),
    /// Name to look up in the [`DirectoryRegistry`].
    Name(String),
}

impl fmt::Debug for DirectoryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Handle(_) => f.write_str("Handle(..)"),
            Self::Name(name) => f.debug_tuple("Name").field(name).finish(),
        }
    }
}

impl From<Arc<dyn Directory>> for DirectoryRef {
    fn from(handle: Arc<dyn Directory>) -> Self {
        Self::Handle(handle)
    }
}

impl From<&str> for DirectoryRef {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for DirectoryRef {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

#[derive(Default)]
struct RegistryState {
    directories: HashMap<String, Arc<dyn Directory>>,
    default: Option<String>,
}

/// Shared registry of named directories.
///
/// Cloning is cheap and every clone sees the same registrations. Entries only ever read from
/// the registry.
#[derive(Clone, Default)]
pub struct DirectoryRegistry {
    state: Arc<RwLock<RegistryState>>,
}

impl DirectoryRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry holding an LDAP-backed handle for every configured directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings are inconsistent or a directory's URL or base is
    /// invalid.
    pub fn from_settings(settings: &MapperSettings) -> Result<Self> {
        settings.check()?;
        let registry = Self::new();
        for directory in &settings.directories {
            let config = DirectoryConfig::from_settings(directory)?;
            registry.register(directory.name.clone(), Arc::new(LdapDirectory::new(config)));
        }
        if let Some(default) = &settings.default_directory {
            registry.set_default(default)?;
        }
        Ok(registry)
    }

    /// Registers a directory under `name`, replacing any previous registration.
    ///
    /// The first directory registered becomes the default.
    pub fn register(&self, name: impl Into<String>, directory: Arc<dyn Directory>) {
        let name = name.into();
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        info!("registering directory `{name}` with base `{}`", directory.base());
        if state.default.is_none() {
            state.default = Some(name.clone());
        }
        state.directories.insert(name, directory);
    }

    /// Makes a registered directory the default.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DirectoryNotFound`] if nothing is registered under `name`.
    pub fn set_default(&self, name: &str) -> Result<()> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if !state.directories.contains_key(name) {
            return Err(Error::DirectoryNotFound(name.to_string()));
        }
        info!("default directory is now `{name}`");
        state.default = Some(name.to_string());
        Ok(())
    }

    /// Looks up a directory by name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DirectoryNotFound`] if nothing is registered under `name`.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Directory>> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state
            .directories
            .get(name)
            .cloned()
            .ok_or_else(|| Error::DirectoryNotFound(name.to_string()))
    }

    /// Returns the default directory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DirectoryNotFound`] if no directory is registered.
    pub fn default_directory(&self) -> Result<Arc<dyn Directory>> {
        let name = {
            let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
            state.default.clone()
        };
        match name {
            Some(name) => self.resolve(&name),
            None => Err(Error::DirectoryNotFound(
                "no default directory registered".to_string(),
            )),
        }
    }

    /// Resolves a handle or name; handles are returned as-is.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DirectoryNotFound`] if a name is not registered.
    pub fn resolve_ref(&self, directory: DirectoryRef) -> Result<Arc<dyn Directory>> {
        match directory {
            DirectoryRef::Handle(handle) => Ok(handle),
            DirectoryRef::Name(name) => self.resolve(&name),
        }
    }

    /// Registered directory names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let mut names = state.directories.keys().cloned().collect::<Vec<_>>();
        names.sort();
        names
    }
}

impl fmt::Debug for DirectoryRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectoryRegistry")
            .field("names", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::MockDirectory;
    use crate::dn::DistinguishedName;
    use dirmap_core::config::DirectorySettings;

    fn directory_with_base(base: &str) -> Arc<dyn Directory> {
        let mut mock = MockDirectory::new();
        mock.expect_base()
            .return_const(DistinguishedName::parse(base).unwrap());
        Arc::new(mock)
    }

    #[test]
    fn first_registration_becomes_default() {
        let registry = DirectoryRegistry::new();
        registry.register("people", directory_with_base("dc=people"));
        registry.register("groups", directory_with_base("dc=groups"));

        let default = registry.default_directory().unwrap();
        assert_eq!(default.base().as_str(), "dc=people");
        assert_eq!(registry.names(), vec!["groups", "people"]);
    }

    #[test]
    fn set_default_requires_registration() {
        let registry = DirectoryRegistry::new();
        registry.register("people", directory_with_base("dc=people"));
        registry.register("groups", directory_with_base("dc=groups"));

        registry.set_default("groups").unwrap();
        assert_eq!(
            registry.default_directory().unwrap().base().as_str(),
            "dc=groups"
        );
        assert_eq!(
            registry.set_default("missing").unwrap_err(),
            Error::DirectoryNotFound("missing".to_string())
        );
    }

    #[test]
    fn resolve_unknown_name_fails() {
        let registry = DirectoryRegistry::new();
        assert!(matches!(
            registry.resolve("nope"),
            Err(Error::DirectoryNotFound(_))
        ));
        assert!(matches!(
            registry.default_directory(),
            Err(Error::DirectoryNotFound(_))
        ));
    }

    #[test]
    fn resolve_ref_passes_handles_through() {
        let registry = DirectoryRegistry::new();
        let handle = directory_with_base("dc=example,dc=com");
        let resolved = registry
            .resolve_ref(DirectoryRef::from(handle.clone()))
            .unwrap();
        assert!(Arc::ptr_eq(&resolved, &handle));
    }

    #[test]
    fn clones_share_registrations() {
        let registry = DirectoryRegistry::new();
        let clone = registry.clone();
        registry.register("people", directory_with_base("dc=people"));
        assert!(clone.resolve("people").is_ok());
    }

    #[test]
    fn from_settings_builds_ldap_directories() {
        let settings = MapperSettings::new()
            .with_directory(
                DirectorySettings::new("people", "ldap://ldap.example.com")
                    .unwrap()
                    .with_base("ou=people,dc=example,dc=com"),
            )
            .with_directory(
                DirectorySettings::new("groups", "ldap://ldap.example.com")
                    .unwrap()
                    .with_base("ou=groups,dc=example,dc=com"),
            )
            .with_default_directory("groups");

        let registry = DirectoryRegistry::from_settings(&settings).unwrap();
        assert_eq!(registry.names(), vec!["groups", "people"]);
        assert_eq!(
            registry.default_directory().unwrap().base().as_str(),
            "ou=groups,dc=example,dc=com"
        );
    }
}
