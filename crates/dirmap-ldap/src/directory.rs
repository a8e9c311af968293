//! Directory handle contract and the attribute types exchanged with it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{dn::DistinguishedName, Result};

/// Multi-valued attribute map for one directory entry.
///
/// Attribute names compare case-insensitively; the spelling of the first insertion is kept
/// for writes. Attributes never hold an empty value list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attributes {
    entries: BTreeMap<String, Attribute>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Attribute {
    name: String,
    values: Vec<String>,
}

impl Attributes {
    /// Creates an empty attribute map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets all values of an attribute; an empty value list removes it.
    pub fn insert<I, V>(&mut self, name: impl Into<String>, values: I)
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        let name = name.into();
        let values = values.into_iter().map(Into::into).collect::<Vec<String>>();
        let key = name.to_ascii_lowercase();
        if values.is_empty() {
            self.entries.remove(&key);
            return;
        }

        match self.entries.get_mut(&key) {
            Some(existing) => existing.values = values,
            None => {
                self.entries.insert(key, Attribute { name, values });
            }
        }
    }

    /// Builder form of [`Attributes::insert`].
    #[must_use]
    pub fn with<I, V>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        self.insert(name, values);
        self
    }

    /// Removes an attribute, returning its values.
    pub fn remove(&mut self, name: &str) -> Option<Vec<String>> {
        self.entries
            .remove(&name.to_ascii_lowercase())
            .map(|attribute| attribute.values)
    }

    /// Returns the first value of the attribute if present.
    #[must_use]
    pub fn first(&self, name: &str) -> Option<&str> {
        self.values(name)
            .and_then(|values| values.first().map(String::as_str))
    }

    /// Returns all values for the attribute.
    #[must_use]
    pub fn values(&self, name: &str) -> Option<&[String]> {
        self.entries
            .get(&name.to_ascii_lowercase())
            .map(|attribute| attribute.values.as_slice())
    }

    /// Returns true if the attribute is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_ascii_lowercase())
    }

    /// Number of attributes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no attribute is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over `(name, values)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> + '_ {
        self.entries
            .values()
            .map(|attribute| (attribute.name.as_str(), attribute.values.as_slice()))
    }

    /// Modifications that turn `previous` into `self`.
    ///
    /// New attributes become [`DirectoryModification::Add`], attributes whose value set changed
    /// become [`DirectoryModification::Replace`] and vanished attributes become
    /// [`DirectoryModification::Delete`] with no values (remove the whole attribute). Value order
    /// is ignored.
    #[must_use]
    pub fn diff(&self, previous: &Attributes) -> Vec<DirectoryModification> {
        let mut modifications = Vec::new();

        for (key, current) in &self.entries {
            match previous.entries.get(key) {
                None => modifications.push(DirectoryModification::Add {
                    attribute: current.name.clone(),
                    values: current.values.clone(),
                }),
                Some(old) if !same_values(&old.values, &current.values) => {
                    modifications.push(DirectoryModification::Replace {
                        attribute: current.name.clone(),
                        values: current.values.clone(),
                    });
                }
                Some(_) => {}
            }
        }

        for (key, old) in &previous.entries {
            if !self.entries.contains_key(key) {
                modifications.push(DirectoryModification::Delete {
                    attribute: old.name.clone(),
                    values: Vec::new(),
                });
            }
        }

        modifications
    }
}

fn same_values(left: &[String], right: &[String]) -> bool {
    let mut left = left.to_vec();
    let mut right = right.to_vec();
    left.sort_unstable();
    right.sort_unstable();
    left == right
}

impl<N, I, V> FromIterator<(N, I)> for Attributes
where
    N: Into<String>,
    I: IntoIterator<Item = V>,
    V: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (N, I)>>(iter: T) -> Self {
        let mut attributes = Self::new();
        for (name, values) in iter {
            attributes.insert(name, values);
        }
        attributes
    }
}

/// LDAP modification request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryModification {
    /// Add attribute values.
    Add {
        /// Attribute to modify.
        attribute: String,
        /// Values to add.
        values: Vec<String>,
    },
    /// Delete attribute values.
    Delete {
        /// Attribute to modify.
        attribute: String,
        /// Values to delete (empty removes attribute).
        values: Vec<String>,
    },
    /// Replace attribute values.
    Replace {
        /// Attribute to modify.
        attribute: String,
        /// Replacement values.
        values: Vec<String>,
    },
}

/// How [`Directory::write_entry`] treats an existing entry at the target DN.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Add a new entry; fails if one already exists.
    Create,
    /// Create the entry or overwrite whatever exists there.
    Replace,
}

/// A resolved connection to one directory instance.
///
/// All DNs passed to a handle are absolute (they already include [`Directory::base`]). Every
/// failure is reported as [`dirmap_core::Error::DirectoryOperation`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Directory: Send + Sync {
    /// Base DN appended to every base-relative location.
    fn base(&self) -> DistinguishedName;

    /// Writes a complete entry.
    async fn write_entry(
        &self,
        dn: &DistinguishedName,
        attributes: &Attributes,
        mode: WriteMode,
    ) -> Result<()>;

    /// Applies attribute modifications to an existing entry.
    async fn apply_delta(
        &self,
        dn: &DistinguishedName,
        modifications: &[DirectoryModification],
    ) -> Result<()>;

    /// Moves or renames an existing entry.
    async fn rename(&self, old_dn: &DistinguishedName, new_dn: &DistinguishedName) -> Result<()>;

    /// Deletes an entry that has no children.
    async fn delete_leaf(&self, dn: &DistinguishedName) -> Result<()>;

    /// Deletes an entry and its whole subtree.
    async fn delete_subtree(&self, dn: &DistinguishedName) -> Result<()>;

    /// Reads an entry's attributes, `None` if there is no entry at `dn`.
    async fn fetch(&self, dn: &DistinguishedName) -> Result<Option<Attributes>>;

    /// Attempts a simple bind; `Ok(false)` means the credential was rejected.
    async fn bind(&self, dn: &DistinguishedName, credential: &str) -> Result<bool>;
}
