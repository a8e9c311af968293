//! Schema metadata for types that map onto directory entries.

use crate::{directory::Attributes, Result};

/// An application type whose instances are stored as directory entries.
///
/// The naming attribute is fixed per type; its value for a given instance lives on the
/// [`Entry`](crate::Entry) wrapping the object, not on the object itself.
pub trait Schema: Sized + Send + Sync {
    /// Attribute whose value forms the leading RDN of every entry of this type.
    const NAMING_ATTRIBUTE: &'static str;

    /// Object classes written with every full entry.
    const OBJECT_CLASSES: &'static [&'static str] = &[];

    /// The object's attributes, excluding the naming attribute and object classes.
    fn to_attributes(&self) -> Attributes;

    /// Rebuilds an object from a fetched entry's attributes.
    ///
    /// # Errors
    ///
    /// Returns [`dirmap_core::Error::Mapping`] when a required attribute is missing or
    /// unusable.
    fn from_attributes(attributes: &Attributes) -> Result<Self>;
}

/// Naming attribute declared by a schema type.
#[must_use]
pub fn naming_attribute_of<S: Schema>() -> &'static str {
    S::NAMING_ATTRIBUTE
}
