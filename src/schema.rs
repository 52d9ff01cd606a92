//! Table layout constants
//!
//! Defines the fixed attribute names and sentinel values used by the CRUD
//! layer on top of an otherwise schemaless table.
//!
//! ## Table Schema
//!
//! ```text
//! Primary Key:
//!   - PK (String, Partition Key)
//!   - SK (String, Sort Key)
//!
//! Attributes (managed by this layer):
//!   - created_at: Number (Unix epoch seconds, stamped on create)
//!   - updated_at: Number (Unix epoch seconds, stamped on every write)
//!   - updated_by: String - actor recorded for the last write
//!   - origin: String - originating system recorded for the last write
//!   - unique_fields: List<String> - unique-field manifest, one
//!     "attr;;;field;;;indexValue" triple per entry
//!
//! Unique index sentinel records:
//!   - PK: "<pkPrefix>#UniqueKey#<FIELD>#<VALUE>" (uppercased)
//!   - SK: "UniqueKey"
//!   - no payload; existence under a conditional put enforces uniqueness
//! ```

/// Partition key attribute
pub const ATTR_PK: &str = "PK";

/// Sort key attribute
pub const ATTR_SK: &str = "SK";

/// Creation timestamp (Unix epoch seconds), stamped once
pub const ATTR_CREATED_AT: &str = "created_at";

/// Last update timestamp (Unix epoch seconds)
pub const ATTR_UPDATED_AT: &str = "updated_at";

/// Actor recorded for the last write
pub const ATTR_UPDATED_BY: &str = "updated_by";

/// Originating system recorded for the last write
pub const ATTR_ORIGIN: &str = "origin";

/// Unique-field manifest attribute on owning records
pub const ATTR_UNIQUE_FIELDS: &str = "unique_fields";

/// Audit attributes auto-appended to explicit read projections
pub const AUDIT_ATTRIBUTES: [&str; 4] = [
    ATTR_CREATED_AT,
    ATTR_UPDATED_AT,
    ATTR_UPDATED_BY,
    ATTR_ORIGIN,
];

/// Sort key of every unique index sentinel record
pub const UNIQUE_SK: &str = "UniqueKey";

/// Tag segment spliced into unique index partition keys
pub const UNIQUE_TAG: &str = "UniqueKey";

/// Separator inside manifest triples
pub const MANIFEST_SEPARATOR: &str = ";;;";

/// Segment separator inside partition keys
pub const KEY_SEGMENT_SEPARATOR: char = '#';

/// Maximum operations in one transactional write
pub const MAX_TRANSACT_WRITE_ITEMS: usize = 25;

/// Maximum keys in one transactional get
pub const MAX_TRANSACT_GET_ITEMS: usize = 25;

/// Maximum puts + deletes in one non-transactional batch write
pub const MAX_BATCH_WRITE_ITEMS: usize = 25;

/// Maximum keys in one batch get
pub const MAX_BATCH_GET_ITEMS: usize = 100;
