//! Directory-backed schema objects and their persistence lifecycle.
//!
//! An [`Entry`] couples an application object with its location in a directory: the naming
//! value (write-once), the parent DN relative to the directory base and the directory handle
//! itself. All location validation happens before any directory I/O, so a call that fails
//! validation leaves the directory untouched.

use std::fmt;
use std::sync::Arc;

use dirmap_core::error::Error;
use tracing::{debug, warn};

use crate::{
    directory::{Attributes, Directory, WriteMode},
    dn::{coerce_to_dn, DistinguishedName, DnLike, RelativeDistinguishedName},
    registry::{DirectoryRef, DirectoryRegistry},
    schema::{naming_attribute_of, Schema},
    Result,
};

/// Attribute carrying an entry's object classes.
pub const OBJECT_CLASS_ATTRIBUTE: &str = "objectClass";

#[derive(Debug, Clone, PartialEq, Eq)]
enum NamingValue {
    Unset,
    Set(String),
}

#[derive(Debug, Clone)]
enum Lifecycle {
    New,
    Persisted { snapshot: Attributes },
}

/// A schema object bound to a location in a directory.
pub struct Entry<S: Schema> {
    object: S,
    registry: DirectoryRegistry,
    directory: Option<Arc<dyn Directory>>,
    naming_value: NamingValue,
    parent: DistinguishedName,
    lifecycle: Lifecycle,
}

impl<S: Schema> Entry<S> {
    /// Wraps a new, not yet persisted object.
    ///
    /// The registry is used to resolve directory names passed to [`Entry::set_directory`].
    pub fn new(registry: &DirectoryRegistry, object: S) -> Self {
        Self {
            object,
            registry: registry.clone(),
            directory: None,
            naming_value: NamingValue::Unset,
            parent: DistinguishedName::empty(),
            lifecycle: Lifecycle::New,
        }
    }

    /// The wrapped object.
    pub const fn object(&self) -> &S {
        &self.object
    }

    /// Mutable access to the wrapped object. Changes are written by the next save.
    pub fn object_mut(&mut self) -> &mut S {
        &mut self.object
    }

    /// Unwraps the object, dropping its location.
    pub fn into_object(self) -> S {
        self.object
    }

    /// The schema type's naming attribute.
    #[must_use]
    pub fn naming_attribute(&self) -> &'static str {
        naming_attribute_of::<S>()
    }

    /// The naming value, if set.
    #[must_use]
    pub fn naming_value(&self) -> Option<&str> {
        match &self.naming_value {
            NamingValue::Unset => None,
            NamingValue::Set(value) => Some(value),
        }
    }

    /// Sets the naming value. It can only be set once.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NamingValueAlreadySet`] if a value is already set, or
    /// [`Error::InvalidLocation`] for an empty value.
    pub fn set_naming_value(&mut self, value: impl Into<String>) -> Result<()> {
        if let NamingValue::Set(current) = &self.naming_value {
            return Err(Error::NamingValueAlreadySet(current.clone()));
        }
        let value = value.into();
        check_naming_value::<S>(&value)?;
        self.naming_value = NamingValue::Set(value);
        Ok(())
    }

    /// Parent location relative to the directory base; empty means the base itself.
    #[must_use]
    pub const fn parent(&self) -> &DistinguishedName {
        &self.parent
    }

    /// Sets the parent location.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedDn`] if text does not parse.
    pub fn set_parent(&mut self, parent: impl Into<DnLike>) -> Result<()> {
        self.parent = coerce_to_dn(parent)?;
        Ok(())
    }

    /// Base-relative DN: the naming RDN followed by the parent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NamingValueMissing`] if no naming value is set.
    pub fn brdn(&self) -> Result<DistinguishedName> {
        match &self.naming_value {
            NamingValue::Unset => Err(Error::NamingValueMissing(S::NAMING_ATTRIBUTE.to_string())),
            NamingValue::Set(value) => Ok(self
                .parent
                .clone()
                .with_prefix(RelativeDistinguishedName::new(S::NAMING_ATTRIBUTE, value))),
        }
    }

    /// Sets naming value and parent from a base-relative DN.
    ///
    /// Nothing changes unless the whole location is acceptable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedDn`] for unparsable text, [`Error::InvalidLocation`] for an
    /// empty DN, [`Error::NamingAttributeMismatch`] if the leading component names another
    /// attribute and [`Error::NamingValueAlreadySet`] if the naming value is already set.
    pub fn set_brdn(&mut self, brdn: impl Into<DnLike>) -> Result<()> {
        let brdn = coerce_to_dn(brdn)?;
        let (rdn, parent) = split_location(&brdn)?;
        check_naming_attribute::<S>(rdn)?;
        self.set_naming_value(rdn.value())?;
        self.parent = parent;
        Ok(())
    }

    /// The directory handle, if set.
    #[must_use]
    pub fn directory(&self) -> Option<&Arc<dyn Directory>> {
        self.directory.as_ref()
    }

    /// Sets the directory from a handle or a registered name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DirectoryNotFound`] if a name is not registered.
    pub fn set_directory(&mut self, directory: impl Into<DirectoryRef>) -> Result<()> {
        self.directory = Some(self.registry.resolve_ref(directory.into())?);
        Ok(())
    }

    /// Absolute DN: the base-relative DN followed by the directory base.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoDirectory`] if no directory is set, otherwise the errors of
    /// [`Entry::brdn`].
    pub fn dn(&self) -> Result<DistinguishedName> {
        let directory = self.directory.as_ref().ok_or(Error::NoDirectory)?;
        Ok(self.brdn()?.join(&directory.base()))
    }

    pub(crate) const fn is_persisted(&self) -> bool {
        matches!(self.lifecycle, Lifecycle::Persisted { .. })
    }

    /// Writes the entry as a new directory record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if the entry has no valid DN, or
    /// [`Error::DirectoryOperation`] if the directory rejects the write.
    pub async fn create(&mut self) -> Result<()> {
        let (directory, dn) = self.located("create")?;
        let attributes = self.full_attributes();
        debug!("creating entry {dn}");
        directory
            .write_entry(&dn, &attributes, WriteMode::Create)
            .await
            .map_err(surface)?;
        self.lifecycle = Lifecycle::Persisted {
            snapshot: attributes,
        };
        Ok(())
    }

    /// Writes attribute changes made since the entry was last persisted.
    ///
    /// Does nothing when nothing changed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if the entry was never persisted or has no valid DN, or
    /// [`Error::DirectoryOperation`] if the directory rejects the change.
    pub async fn update(&mut self) -> Result<()> {
        let (directory, dn) = self.persisted_location("update")?;
        self.flush(directory.as_ref(), &dn).await?;
        Ok(())
    }

    /// Creates a new entry or updates a persisted one.
    ///
    /// # Errors
    ///
    /// See [`Entry::create`] and [`Entry::update`].
    pub async fn save(&mut self) -> Result<()> {
        if self.is_persisted() {
            self.update().await
        } else {
            self.create().await
        }
    }

    /// Flushes pending changes, then moves the entry to a new base-relative DN.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if the entry was never persisted or has no valid DN,
    /// [`Error::MalformedDn`] or [`Error::InvalidLocation`] for an unusable target, and
    /// [`Error::DirectoryOperation`] on directory failures. If pending changes were written
    /// but the rename failed, the error is [`Error::PartialMove`].
    pub async fn move_to(&mut self, brdn: impl Into<DnLike>) -> Result<()> {
        let (directory, old_dn) = self.persisted_location("move")?;
        let target = coerce_to_dn(brdn)?;
        let (rdn, parent) = target_location::<S>(&target)?;
        let naming_value = rdn.value().to_string();

        let flushed = self.flush(directory.as_ref(), &old_dn).await?;

        let new_dn = DistinguishedName::concat(&target, &directory.base());
        debug!("moving entry {old_dn} to {new_dn}");
        if let Err(err) = directory.rename(&old_dn, &new_dn).await {
            let err = if flushed {
                Error::PartialMove(err.to_string())
            } else {
                err
            };
            return Err(surface(err));
        }

        self.naming_value = NamingValue::Set(naming_value);
        self.parent = parent;
        self.lifecycle = Lifecycle::Persisted {
            snapshot: self.full_attributes(),
        };
        Ok(())
    }

    /// [`Entry::move_to`] with the target built from parts.
    ///
    /// `None` keeps the current naming value or parent; an empty parent means the directory
    /// base.
    ///
    /// # Errors
    ///
    /// See [`Entry::move_to`].
    pub async fn move_parts(
        &mut self,
        naming_value: Option<&str>,
        parent: Option<DnLike>,
    ) -> Result<()> {
        self.persisted_location("move")?;
        let target = self.location_from_parts(naming_value, parent)?;
        self.move_to(target).await
    }

    /// Overwrites whatever is stored at the entry's own location.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoDirectory`] if no directory is set, [`Error::NamingValueMissing`] if
    /// no naming value is set, or [`Error::DirectoryOperation`] if the write fails.
    pub async fn replace(&mut self) -> Result<()> {
        let directory = self.directory.clone().ok_or(Error::NoDirectory)?;
        let brdn = self.brdn()?;
        self.write_replacement(directory, brdn).await
    }

    /// Writes the entry's full state at `brdn`, overwriting any existing record there.
    ///
    /// The entry's own location is left unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoDirectory`] if no directory is set, [`Error::MalformedDn`] or
    /// [`Error::InvalidLocation`] for an unusable target, or [`Error::DirectoryOperation`] if
    /// the write fails.
    pub async fn replace_at(&mut self, brdn: impl Into<DnLike>) -> Result<()> {
        let directory = self.directory.clone().ok_or(Error::NoDirectory)?;
        let target = coerce_to_dn(brdn)?;
        self.write_replacement(directory, target).await
    }

    /// [`Entry::replace_at`] with the target built from parts, as in [`Entry::move_parts`].
    ///
    /// # Errors
    ///
    /// See [`Entry::replace_at`].
    pub async fn replace_parts(
        &mut self,
        naming_value: Option<&str>,
        parent: Option<DnLike>,
    ) -> Result<()> {
        let directory = self.directory.clone().ok_or(Error::NoDirectory)?;
        let target = self.location_from_parts(naming_value, parent)?;
        self.write_replacement(directory, target).await
    }

    /// Deletes the entry. Fails if it has children.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`Entry::dn`], or [`Error::DirectoryOperation`] if the directory
    /// refuses the delete.
    pub async fn delete(&mut self) -> Result<()> {
        let (directory, dn) = self.location()?;
        debug!("deleting entry {dn}");
        directory.delete_leaf(&dn).await.map_err(surface)?;
        self.lifecycle = Lifecycle::New;
        Ok(())
    }

    /// Deletes the entry and everything beneath it.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`Entry::dn`], or [`Error::DirectoryOperation`] if any delete
    /// fails.
    pub async fn delete_recursively(&mut self) -> Result<()> {
        let (directory, dn) = self.location()?;
        debug!("deleting subtree {dn}");
        directory.delete_subtree(&dn).await.map_err(surface)?;
        self.lifecycle = Lifecycle::New;
        Ok(())
    }

    /// Binds as this entry with `password`.
    ///
    /// Returns whether the directory accepted the credential.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DirectoryOperation`] for any failure other than a rejected
    /// credential, including an entry without a valid DN.
    pub async fn authenticate(&self, password: &str) -> Result<bool> {
        let (directory, dn) = self
            .location()
            .map_err(|err| Error::directory("bind", err.to_string()))?;
        directory.bind(&dn, password).await.map_err(surface)
    }

    /// Loads the entry stored at a base-relative DN.
    ///
    /// Without a directory argument the registry's default directory is used. Returns
    /// `Ok(None)` if there is no entry at that location.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DirectoryNotFound`] if the directory cannot be resolved,
    /// [`Error::MalformedDn`], [`Error::InvalidLocation`] or
    /// [`Error::NamingAttributeMismatch`] for an unusable DN, [`Error::Mapping`] if the record
    /// does not fit the schema, or [`Error::DirectoryOperation`] if the read fails.
    pub async fn get_by_dn(
        registry: &DirectoryRegistry,
        brdn: impl Into<DnLike>,
        directory: Option<DirectoryRef>,
    ) -> Result<Option<Self>> {
        let directory = match directory {
            Some(directory) => registry.resolve_ref(directory)?,
            None => registry.default_directory()?,
        };
        let brdn = coerce_to_dn(brdn)?;
        let (rdn, parent) = split_location(&brdn)?;
        check_naming_attribute::<S>(rdn)?;

        let dn = DistinguishedName::concat(&brdn, &directory.base());
        debug!("fetching entry {dn}");
        let Some(attributes) = directory.fetch(&dn).await.map_err(surface)? else {
            return Ok(None);
        };

        let mut entry = Self {
            object: S::from_attributes(&attributes)?,
            registry: registry.clone(),
            directory: Some(directory),
            naming_value: NamingValue::Set(rdn.value().to_string()),
            parent,
            lifecycle: Lifecycle::New,
        };
        entry.lifecycle = Lifecycle::Persisted {
            snapshot: entry.full_attributes(),
        };
        Ok(Some(entry))
    }

    fn full_attributes(&self) -> Attributes {
        self.attributes_named(self.naming_value())
    }

    fn attributes_named(&self, naming_value: Option<&str>) -> Attributes {
        let mut attributes = self.object.to_attributes();
        if !S::OBJECT_CLASSES.is_empty() {
            attributes.insert(OBJECT_CLASS_ATTRIBUTE, S::OBJECT_CLASSES.iter().copied());
        }
        if let Some(value) = naming_value {
            attributes.insert(S::NAMING_ATTRIBUTE, [value]);
        }
        attributes
    }

    fn location(&self) -> Result<(Arc<dyn Directory>, DistinguishedName)> {
        let dn = self.dn()?;
        let directory = self.directory.clone().ok_or(Error::NoDirectory)?;
        Ok((directory, dn))
    }

    fn located(&self, operation: &str) -> Result<(Arc<dyn Directory>, DistinguishedName)> {
        self.location()
            .map_err(|err| Error::InvalidState(format!("cannot {operation} entry: {err}")))
    }

    fn persisted_location(
        &self,
        operation: &str,
    ) -> Result<(Arc<dyn Directory>, DistinguishedName)> {
        if !self.is_persisted() {
            return Err(Error::InvalidState(format!(
                "cannot {operation} an entry that was never persisted"
            )));
        }
        self.located(operation)
    }

    fn location_from_parts(
        &self,
        naming_value: Option<&str>,
        parent: Option<DnLike>,
    ) -> Result<DistinguishedName> {
        let naming_value = match naming_value {
            Some(value) => {
                check_naming_value::<S>(value)?;
                value.to_string()
            }
            None => self
                .naming_value()
                .map(str::to_string)
                .ok_or_else(|| Error::NamingValueMissing(S::NAMING_ATTRIBUTE.to_string()))?,
        };
        let parent = match parent {
            Some(parent) => coerce_to_dn(parent)?,
            None => self.parent.clone(),
        };
        Ok(parent.with_prefix(RelativeDistinguishedName::new(
            S::NAMING_ATTRIBUTE,
            naming_value,
        )))
    }

    /// Sends the attribute delta against the snapshot. Returns whether anything was sent.
    async fn flush(&mut self, directory: &dyn Directory, dn: &DistinguishedName) -> Result<bool> {
        let current = self.full_attributes();
        let modifications = match &self.lifecycle {
            Lifecycle::Persisted { snapshot } => current.diff(snapshot),
            Lifecycle::New => current.diff(&Attributes::new()),
        };
        if modifications.is_empty() {
            return Ok(false);
        }

        debug!("updating {} attribute(s) of {dn}", modifications.len());
        directory
            .apply_delta(dn, &modifications)
            .await
            .map_err(surface)?;
        self.lifecycle = Lifecycle::Persisted { snapshot: current };
        Ok(true)
    }

    async fn write_replacement(
        &mut self,
        directory: Arc<dyn Directory>,
        target: DistinguishedName,
    ) -> Result<()> {
        let (rdn, _) = target_location::<S>(&target)?;
        let attributes = self.attributes_named(Some(rdn.value()));
        let dn = DistinguishedName::concat(&target, &directory.base());

        debug!("replacing entry {dn}");
        directory
            .write_entry(&dn, &attributes, WriteMode::Replace)
            .await
            .map_err(surface)?;

        if self.brdn().is_ok_and(|brdn| brdn == target) {
            self.lifecycle = Lifecycle::Persisted {
                snapshot: attributes,
            };
        }
        Ok(())
    }
}

impl<S: Schema> fmt::Debug for Entry<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("naming_attribute", &S::NAMING_ATTRIBUTE)
            .field("naming_value", &self.naming_value())
            .field("parent", &self.parent.as_str())
            .field("has_directory", &self.directory.is_some())
            .field("persisted", &self.is_persisted())
            .finish_non_exhaustive()
    }
}

fn split_location(
    brdn: &DistinguishedName,
) -> Result<(&RelativeDistinguishedName, DistinguishedName)> {
    let Ok(rdn) = brdn.first_rdn() else {
        return Err(Error::InvalidLocation("location is empty".to_string()));
    };
    if rdn.value().is_empty() {
        return Err(Error::InvalidLocation(format!(
            "`{}` has an empty value",
            rdn.attribute()
        )));
    }
    Ok((rdn, brdn.without_first_rdn()?))
}

fn check_naming_value<S: Schema>(value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::InvalidLocation(format!(
            "empty value for naming attribute `{}`",
            S::NAMING_ATTRIBUTE
        )));
    }
    Ok(())
}

fn check_naming_attribute<S: Schema>(rdn: &RelativeDistinguishedName) -> Result<()> {
    if rdn.matches_attribute(S::NAMING_ATTRIBUTE) {
        Ok(())
    } else {
        Err(Error::NamingAttributeMismatch {
            expected: S::NAMING_ATTRIBUTE.to_string(),
            found: rdn.attribute().to_string(),
        })
    }
}

/// Validates a move or replace target.
fn target_location<S: Schema>(
    target: &DistinguishedName,
) -> Result<(&RelativeDistinguishedName, DistinguishedName)> {
    let (rdn, parent) = split_location(target)?;
    check_naming_attribute::<S>(rdn)
        .map_err(|err| Error::InvalidLocation(format!("{target}: {err}")))?;
    Ok((rdn, parent))
}

fn surface(err: Error) -> Error {
    if err.should_log() {
        warn!("directory entry operation failed: {err}");
    }
    err
}
