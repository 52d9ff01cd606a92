//! Domain record seam
//!
//! Domain types implement [`Record`] to describe how they persist: their
//! two-part key, their payload attributes, and any unique-field
//! declarations. Unique fields are declared by an explicit method rather
//! than discovered from the type at runtime, so a missing or misdeclared
//! field is a compile-time or first-write error, never a reflection
//! surprise.

use crate::store::Item;

/// Declaration of one unique field on a domain type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniqueFieldSpec {
    /// Stored attribute name carrying the value
    pub attribute: String,
    /// Logical field name spliced into the index value (usually the
    /// attribute name; kept separate so renames don't break old indexes)
    pub field: String,
    /// How many leading `#`-segments of the owning partition key scope
    /// the uniqueness domain; must be positive
    pub prefix_segments: u32,
}

impl UniqueFieldSpec {
    /// Declare a unique field whose logical name equals its attribute name
    pub fn new(attribute: impl Into<String>, prefix_segments: u32) -> Self {
        let attribute = attribute.into();
        Self {
            field: attribute.clone(),
            attribute,
            prefix_segments,
        }
    }

    /// Override the logical field name
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = field.into();
        self
    }
}

/// A domain object the CRUD layer can persist
pub trait Record: Send + Sync {
    /// Partition key of the owning record
    fn partition_key(&self) -> String;

    /// Sort key of the owning record
    fn sort_key(&self) -> String;

    /// Payload attributes, excluding the key pair and the attributes this
    /// layer manages (audit set, unique manifest)
    fn attributes(&self) -> Item;

    /// Unique-field declarations; default none
    fn unique_fields(&self) -> Vec<UniqueFieldSpec> {
        Vec::new()
    }
}
