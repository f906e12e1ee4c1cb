//! Core type definitions for Posy.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum length of a record identifier, in bytes.
pub const MAX_ID_LEN: usize = 256;

/// A named group of records of one kind.
///
/// The set is fixed. Each collection persists to its own file in the data
/// directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    /// Flower varieties.
    Flowers,
    /// Colors flowers come in.
    Colors,
    /// Bouquet definitions.
    Bouquets,
    /// Price list entries.
    Pricing,
    /// Customer orders.
    Orders,
}

impl Collection {
    /// All collections, in lock order.
    pub const ALL: [Collection; 5] = [
        Collection::Flowers,
        Collection::Colors,
        Collection::Bouquets,
        Collection::Pricing,
        Collection::Orders,
    ];

    /// Returns the collection name used in keys and on the command line.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Flowers => "flowers",
            Self::Colors => "colors",
            Self::Bouquets => "bouquets",
            Self::Pricing => "pricing",
            Self::Orders => "orders",
        }
    }

    /// Returns the file the collection is stored in.
    #[must_use]
    pub const fn file_name(self) -> &'static str {
        match self {
            Self::Flowers => "flowers.json",
            Self::Colors => "colors.json",
            Self::Bouquets => "bouquets.json",
            Self::Pricing => "pricing.json",
            Self::Orders => "orders.json",
        }
    }

    /// Returns true for collections holding catalog records.
    #[must_use]
    pub const fn is_catalog(self) -> bool {
        !matches!(self, Self::Orders)
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Collection {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| CoreError::invalid_operation(format!("unknown collection '{s}'")))
    }
}

/// Identifier of a record, unique within its collection.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RecordId(String);

impl RecordId {
    /// Creates a record ID, rejecting empty, oversized or control-character ids.
    pub fn new(id: impl Into<String>) -> CoreResult<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(CoreError::invalid_record("record id must not be empty"));
        }
        if id.len() > MAX_ID_LEN {
            return Err(CoreError::invalid_record(format!(
                "record id longer than {MAX_ID_LEN} bytes"
            )));
        }
        if id.chars().any(char::is_control) {
            return Err(CoreError::invalid_record(
                "record id contains control characters",
            ));
        }
        Ok(Self(id))
    }

    /// Generates a fresh random identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RecordId {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RecordId> for String {
    fn from(id: RecordId) -> Self {
        id.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-record version counter.
///
/// Starts at 1 on creation and increases by one on every local write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(pub u64);

impl Version {
    /// Version of a newly created record.
    pub const INITIAL: Version = Version(1);

    /// Creates a version.
    #[must_use]
    pub const fn new(v: u64) -> Self {
        Self(v)
    }

    /// Returns the raw version value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next version.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Milliseconds since the Unix epoch.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Creates a timestamp from milliseconds since the epoch.
    #[must_use]
    pub const fn from_millis(ms: u64) -> Self {
        Self(ms)
    }

    /// Returns milliseconds since the epoch.
    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0
    }

    /// Milliseconds elapsed from `earlier` to `self`, zero if `earlier` is later.
    #[must_use]
    pub const fn millis_since(self, earlier: Timestamp) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// A collection plus an id: the global address of a record.
///
/// Serialized as `collection/id` so it can key JSON maps.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RecordKey {
    /// Owning collection.
    pub collection: Collection,
    /// Record id within the collection.
    pub id: RecordId,
}

impl RecordKey {
    /// Creates a record key.
    #[must_use]
    pub fn new(collection: Collection, id: RecordId) -> Self {
        Self { collection, id }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

impl FromStr for RecordKey {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (collection, id) = s
            .split_once('/')
            .ok_or_else(|| CoreError::invalid_record(format!("malformed record key '{s}'")))?;
        Ok(Self::new(collection.parse()?, RecordId::new(id)?))
    }
}

impl TryFrom<String> for RecordKey {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RecordKey> for String {
    fn from(key: RecordKey) -> Self {
        key.to_string()
    }
}
