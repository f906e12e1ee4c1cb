//! Record types.
//!
//! Catalog collections (flowers, colors, bouquets, pricing) hold
//! [`CatalogRecord`]s with an open attribute map. The orders collection holds
//! [`OrderRecord`]s with a status lifecycle and line items. Deletion leaves a
//! tombstone so that a delete can win against an older remote copy.

use crate::error::{CoreError, CoreResult};
use crate::types::{Collection, RecordId, Timestamp, Version};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Free-form attributes of a record.
pub type Attributes = BTreeMap<String, serde_json::Value>;

fn is_false(b: &bool) -> bool {
    !*b
}

/// A catalog entry: flower, color, bouquet or price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogRecord {
    /// Identifier, unique within the collection.
    pub id: RecordId,
    /// Schemaless attributes.
    #[serde(default)]
    pub attributes: Attributes,
    /// Current version.
    pub version: Version,
    /// Time of the last write.
    pub modified_at: Timestamp,
    /// Tombstone flag.
    #[serde(default, skip_serializing_if = "is_false")]
    pub deleted: bool,
}

impl CatalogRecord {
    /// Creates a live record with no attributes. Version and time are
    /// assigned by the store on write.
    #[must_use]
    pub fn new(id: RecordId) -> Self {
        Self {
            id,
            attributes: Attributes::new(),
            version: Version::INITIAL,
            modified_at: Timestamp::default(),
            deleted: false,
        }
    }

    /// Sets an attribute.
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }
}

/// Lifecycle state of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Being assembled; line items may change.
    Draft,
    /// Accepted by the shop.
    Confirmed,
    /// Delivered. Terminal.
    Fulfilled,
    /// Abandoned. Terminal.
    Cancelled,
}

impl OrderStatus {
    /// Returns true for states that admit no further changes.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Fulfilled | Self::Cancelled)
    }

    /// Returns true if an order may move from `self` to `to`.
    #[must_use]
    pub const fn can_transition_to(self, to: OrderStatus) -> bool {
        matches!(
            (self, to),
            (Self::Draft, Self::Confirmed)
                | (Self::Draft, Self::Cancelled)
                | (Self::Confirmed, Self::Fulfilled)
                | (Self::Confirmed, Self::Cancelled)
        )
    }

    /// Lowercase name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Confirmed => "confirmed",
            Self::Fulfilled => "fulfilled",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            Self::Draft,
            Self::Confirmed,
            Self::Fulfilled,
            Self::Cancelled,
        ]
        .into_iter()
        .find(|st| st.name().eq_ignore_ascii_case(s))
        .ok_or_else(|| CoreError::invalid_operation(format!("unknown order status '{s}'")))
    }
}

/// One line of an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    /// The catalog entry ordered (usually a bouquet).
    pub catalog_id: RecordId,
    /// Quantity, always positive.
    pub quantity: u32,
    /// Unit price in minor currency units.
    #[serde(default)]
    pub unit_price: u64,
}

impl LineItem {
    /// Line total in minor units.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.unit_price.saturating_mul(u64::from(self.quantity))
    }
}

/// A customer order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    /// Order identifier.
    pub id: RecordId,
    /// Lifecycle state.
    pub status: OrderStatus,
    /// Ordered items, one per catalog id.
    #[serde(default)]
    pub line_items: Vec<LineItem>,
    /// Customer name, notes, dates and the like.
    #[serde(default)]
    pub attributes: Attributes,
    /// Time the order was created.
    pub created_at: Timestamp,
    /// Current version.
    pub version: Version,
    /// Time of the last write.
    pub modified_at: Timestamp,
    /// Tombstone flag.
    #[serde(default, skip_serializing_if = "is_false")]
    pub deleted: bool,
}

impl OrderRecord {
    /// Creates an empty draft order.
    #[must_use]
    pub fn draft(id: RecordId, created_at: Timestamp) -> Self {
        Self {
            id,
            status: OrderStatus::Draft,
            line_items: Vec::new(),
            attributes: Attributes::new(),
            created_at,
            version: Version::INITIAL,
            modified_at: created_at,
            deleted: false,
        }
    }

    /// Finds the line for `catalog_id`.
    #[must_use]
    pub fn line(&self, catalog_id: &RecordId) -> Option<&LineItem> {
        self.line_items.iter().find(|l| &l.catalog_id == catalog_id)
    }

    /// Sum of all line totals in minor units.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.line_items
            .iter()
            .fold(0u64, |acc, l| acc.saturating_add(l.total()))
    }

    /// Rejects line items with zero quantity or duplicate catalog ids.
    pub fn validate(&self) -> CoreResult<()> {
        for (i, line) in self.line_items.iter().enumerate() {
            if line.quantity == 0 {
                return Err(CoreError::invalid_record(format!(
                    "order {}: quantity for {} must be positive",
                    self.id, line.catalog_id
                )));
            }
            if self.line_items[..i]
                .iter()
                .any(|l| l.catalog_id == line.catalog_id)
            {
                return Err(CoreError::invalid_record(format!(
                    "order {}: duplicate line for {}",
                    self.id, line.catalog_id
                )));
            }
        }
        Ok(())
    }
}

/// A record of any kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Record {
    /// Entry in a catalog collection.
    Catalog(CatalogRecord),
    /// Entry in the orders collection.
    Order(OrderRecord),
}

impl Record {
    /// Record identifier.
    #[must_use]
    pub fn id(&self) -> &RecordId {
        match self {
            Self::Catalog(r) => &r.id,
            Self::Order(r) => &r.id,
        }
    }

    /// Current version.
    #[must_use]
    pub fn version(&self) -> Version {
        match self {
            Self::Catalog(r) => r.version,
            Self::Order(r) => r.version,
        }
    }

    /// Time of the last write.
    #[must_use]
    pub fn modified_at(&self) -> Timestamp {
        match self {
            Self::Catalog(r) => r.modified_at,
            Self::Order(r) => r.modified_at,
        }
    }

    /// Returns true for tombstones.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        match self {
            Self::Catalog(r) => r.deleted,
            Self::Order(r) => r.deleted,
        }
    }

    /// Stamps version and modification time.
    pub fn stamp(&mut self, version: Version, at: Timestamp) {
        match self {
            Self::Catalog(r) => {
                r.version = version;
                r.modified_at = at;
            }
            Self::Order(r) => {
                r.version = version;
                r.modified_at = at;
            }
        }
    }

    /// Sets or clears the tombstone flag.
    pub fn set_deleted(&mut self, deleted: bool) {
        match self {
            Self::Catalog(r) => r.deleted = deleted,
            Self::Order(r) => r.deleted = deleted,
        }
    }

    /// Returns the order, if this is one.
    #[must_use]
    pub fn as_order(&self) -> Option<&OrderRecord> {
        match self {
            Self::Order(r) => Some(r),
            Self::Catalog(_) => None,
        }
    }

    /// Returns the catalog entry, if this is one.
    #[must_use]
    pub fn as_catalog(&self) -> Option<&CatalogRecord> {
        match self {
            Self::Catalog(r) => Some(r),
            Self::Order(_) => None,
        }
    }

    /// Checks the record kind matches `collection` and the content is valid.
    pub fn validate_for(&self, collection: Collection) -> CoreResult<()> {
        match self {
            Self::Catalog(_) if collection.is_catalog() => Ok(()),
            Self::Order(order) if !collection.is_catalog() => order.validate(),
            _ => Err(CoreError::invalid_record(format!(
                "record {} does not belong in {collection}",
                self.id()
            ))),
        }
    }

    /// Digest of the record's content, ignoring version and modification time.
    #[must_use]
    pub fn fingerprint(&self) -> Fingerprint {
        #[derive(Serialize)]
        struct Content<'a> {
            id: &'a RecordId,
            deleted: bool,
            attributes: &'a Attributes,
            status: Option<OrderStatus>,
            line_items: Option<&'a [LineItem]>,
            created_at: Option<Timestamp>,
        }

        let content = match self {
            Self::Catalog(r) => Content {
                id: &r.id,
                deleted: r.deleted,
                attributes: &r.attributes,
                status: None,
                line_items: None,
                created_at: None,
            },
            Self::Order(r) => Content {
                id: &r.id,
                deleted: r.deleted,
                attributes: &r.attributes,
                status: Some(r.status),
                line_items: Some(&r.line_items),
                created_at: Some(r.created_at),
            },
        };
        // Serializing borrowed plain data into a Vec cannot fail.
        let bytes = serde_json::to_vec(&content).unwrap_or_default();
        let mut out = [0u8; 32];
        out.copy_from_slice(&Sha256::digest(&bytes));
        Fingerprint(out)
    }

    /// Version, fingerprint and tombstone flag of the record.
    #[must_use]
    pub fn mark(&self) -> RecordMark {
        RecordMark {
            version: self.version(),
            fingerprint: self.fingerprint(),
            deleted: self.is_deleted(),
        }
    }
}

/// SHA-256 digest of a record's content.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint(pub [u8; 32]);

impl Fingerprint {
    /// Lowercase hex encoding.
    #[must_use]
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Parses a 64-character hex string.
    pub fn from_hex(s: &str) -> CoreResult<Self> {
        if s.len() != 64 || !s.is_ascii() {
            return Err(CoreError::invalid_format(format!("bad fingerprint '{s}'")));
        }
        let mut out = [0u8; 32];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16)
                .map_err(|_| CoreError::invalid_format(format!("bad fingerprint '{s}'")))?;
        }
        Ok(Self(out))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", &self.to_hex()[..12])
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex()[..12])
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value)
    }
}

impl From<Fingerprint> for String {
    fn from(fp: Fingerprint) -> Self {
        fp.to_hex()
    }
}

/// What sync remembers about a record: enough to tell whether it changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMark {
    /// Version at the time.
    pub version: Version,
    /// Content digest at the time.
    pub fingerprint: Fingerprint,
    /// Whether it was a tombstone.
    #[serde(default)]
    pub deleted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rose() -> Record {
        Record::Catalog(
            CatalogRecord::new(RecordId::new("rose-red").unwrap())
                .with_attribute("colors", json!(["red"])),
        )
    }

    #[test]
    fn order_transitions() {
        use OrderStatus::*;
        assert!(Draft.can_transition_to(Confirmed));
        assert!(Draft.can_transition_to(Cancelled));
        assert!(Confirmed.can_transition_to(Fulfilled));
        assert!(Confirmed.can_transition_to(Cancelled));
        assert!(!Draft.can_transition_to(Fulfilled));
        assert!(!Fulfilled.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Draft));
        assert!(Fulfilled.is_terminal() && Cancelled.is_terminal());
    }

    #[test]
    fn fingerprint_ignores_version_and_time() {
        let a = rose();
        let mut b = rose();
        b.stamp(Version::new(9), Timestamp::from_millis(123));
        assert_eq!(a.fingerprint(), b.fingerprint());

        b.set_deleted(true);
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fingerprint_tracks_attributes() {
        let a = rose();
        let b = Record::Catalog(
            CatalogRecord::new(RecordId::new("rose-red").unwrap())
                .with_attribute("colors", json!(["red", "white"])),
        );
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fingerprint_hex_round_trip() {
        let fp = rose().fingerprint();
        assert_eq!(Fingerprint::from_hex(&fp.to_hex()).unwrap(), fp);
        assert!(Fingerprint::from_hex("zz").is_err());
    }

    #[test]
    fn validate_rejects_wrong_collection() {
        assert!(rose().validate_for(Collection::Flowers).is_ok());
        assert!(rose().validate_for(Collection::Orders).is_err());

        let order = Record::Order(OrderRecord::draft(
            RecordId::generate(),
            Timestamp::from_millis(1),
        ));
        assert!(order.validate_for(Collection::Orders).is_ok());
        assert!(order.validate_for(Collection::Bouquets).is_err());
    }

    #[test]
    fn order_validation_and_totals() {
        let mut order = OrderRecord::draft(RecordId::new("o1").unwrap(), Timestamp::default());
        order.line_items.push(LineItem {
            catalog_id: RecordId::new("spring").unwrap(),
            quantity: 3,
            unit_price: 1_250,
        });
        assert_eq!(order.total(), 3_750);
        assert!(order.validate().is_ok());

        order.line_items.push(LineItem {
            catalog_id: RecordId::new("spring").unwrap(),
            quantity: 1,
            unit_price: 0,
        });
        assert!(order.validate().is_err());
    }

    #[test]
    fn tombstone_flag_omitted_when_false() {
        let json = serde_json::to_string(&rose()).unwrap();
        assert!(!json.contains("deleted"));
    }
}
