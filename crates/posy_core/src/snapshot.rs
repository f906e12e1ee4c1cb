//! Snapshot bundles.
//!
//! A snapshot is an immutable, self-validating copy of the whole store.
//! The same bundle is kept locally as a backup and uploaded as the remote
//! copy.
//!
//! ## Format
//!
//! ```text
//! | magic "PSNP" (4) | format (2) | created_at ms (8) | payload_len (4) | CBOR(StoreState) | sha256(payload) (32) |
//! ```
//!
//! Integers are little-endian. The id is derived from the creation time and
//! the payload digest, so equal ids mean equal content.

use crate::error::{CoreError, CoreResult};
use crate::store::StoreState;
use crate::types::Timestamp;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Magic bytes of a snapshot bundle.
pub const SNAPSHOT_MAGIC: [u8; 4] = *b"PSNP";
/// Current snapshot format version.
pub const SNAPSHOT_FORMAT: u16 = 1;
/// Header size (magic + format + created_at + payload_len).
pub const HEADER_SIZE: usize = 4 + 2 + 8 + 4;
/// Footer size (sha256 of the payload).
pub const FOOTER_SIZE: usize = 32;
/// File extension of snapshot files.
pub const SNAPSHOT_EXTENSION: &str = ".posy";

const ID_PREFIX: &str = "snap-";
const ID_DIGEST_HEX: usize = 12;

#[inline]
fn le_u64(slice: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&slice[..8]);
    u64::from_le_bytes(buf)
}

#[inline]
fn le_u32(slice: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&slice[..4]);
    u32::from_le_bytes(buf)
}

/// Identifier of a snapshot: `snap-<13-digit ms>-<12 hex digits of digest>`.
///
/// Ids sort by creation time.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SnapshotId(String);

impl SnapshotId {
    fn from_parts(created_at: Timestamp, digest: &[u8]) -> Self {
        let hex: String = digest
            .iter()
            .take(ID_DIGEST_HEX / 2)
            .map(|b| format!("{b:02x}"))
            .collect();
        Self(format!("{ID_PREFIX}{:013}-{hex}", created_at.as_millis()))
    }

    /// Parses and validates an id.
    pub fn parse(s: &str) -> CoreResult<Self> {
        let bad = || CoreError::invalid_format(format!("malformed snapshot id '{s}'"));
        let rest = s.strip_prefix(ID_PREFIX).ok_or_else(bad)?;
        let (millis, digest) = rest.split_once('-').ok_or_else(bad)?;
        if millis.len() != 13 || !millis.bytes().all(|b| b.is_ascii_digit()) {
            return Err(bad());
        }
        if digest.len() != ID_DIGEST_HEX
            || !digest.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
        {
            return Err(bad());
        }
        Ok(Self(s.to_string()))
    }

    /// Reads the id of an encoded bundle from its header and footer without
    /// decoding or verifying the payload.
    pub fn of_bundle(data: &[u8]) -> CoreResult<Self> {
        let header = SnapshotHeader::read(data)?;
        Ok(Self::from_parts(
            header.created_at,
            &data[data.len() - FOOTER_SIZE..],
        ))
    }

    /// Recognizes a snapshot file name.
    #[must_use]
    pub fn from_file_name(name: &str) -> Option<Self> {
        Self::parse(name.strip_suffix(SNAPSHOT_EXTENSION)?).ok()
    }

    /// File name of the snapshot.
    #[must_use]
    pub fn file_name(&self) -> String {
        format!("{}{SNAPSHOT_EXTENSION}", self.0)
    }

    /// Creation time encoded in the id.
    #[must_use]
    pub fn created_at(&self) -> Timestamp {
        let millis = &self.0[ID_PREFIX.len()..ID_PREFIX.len() + 13];
        Timestamp::from_millis(millis.parse().unwrap_or(0))
    }

    /// The id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for SnapshotId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SnapshotId {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SnapshotId> for String {
    fn from(id: SnapshotId) -> Self {
        id.0
    }
}

/// Fixed-size header of a bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotHeader {
    /// Format version.
    pub format: u16,
    /// Creation time.
    pub created_at: Timestamp,
    /// Length of the CBOR payload.
    pub payload_len: u32,
}

impl SnapshotHeader {
    /// Parses and checks the header of `data`.
    pub fn read(data: &[u8]) -> CoreResult<Self> {
        if data.len() < HEADER_SIZE + FOOTER_SIZE {
            return Err(CoreError::invalid_format("snapshot too small"));
        }
        if data[0..4] != SNAPSHOT_MAGIC {
            return Err(CoreError::invalid_format("invalid snapshot magic"));
        }
        let format = u16::from_le_bytes([data[4], data[5]]);
        if format != SNAPSHOT_FORMAT {
            return Err(CoreError::invalid_format(format!(
                "unsupported snapshot format: {format}"
            )));
        }
        let header = Self {
            format,
            created_at: Timestamp::from_millis(le_u64(&data[6..14])),
            payload_len: le_u32(&data[14..18]),
        };
        if data.len() != HEADER_SIZE + header.payload_len as usize + FOOTER_SIZE {
            return Err(CoreError::invalid_format(format!(
                "snapshot length {} does not match payload length {}",
                data.len(),
                header.payload_len
            )));
        }
        Ok(header)
    }
}

/// An immutable copy of the whole store.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Content-derived identifier.
    pub id: SnapshotId,
    /// Creation time.
    pub created_at: Timestamp,
    /// The captured state.
    pub state: StoreState,
}

impl Snapshot {
    /// Captures `state` at `created_at`.
    pub fn new(state: StoreState, created_at: Timestamp) -> CoreResult<Self> {
        let payload = encode_payload(&state)?;
        let id = SnapshotId::from_parts(created_at, &Sha256::digest(&payload));
        Ok(Self {
            id,
            created_at,
            state,
        })
    }

    /// Encodes the bundle.
    pub fn to_bytes(&self) -> CoreResult<Vec<u8>> {
        let payload = encode_payload(&self.state)?;
        let payload_len = u32::try_from(payload.len())
            .map_err(|_| CoreError::invalid_operation("snapshot payload exceeds 4 GiB"))?;

        let mut data = Vec::with_capacity(HEADER_SIZE + payload.len() + FOOTER_SIZE);
        data.extend_from_slice(&SNAPSHOT_MAGIC);
        data.extend_from_slice(&SNAPSHOT_FORMAT.to_le_bytes());
        data.extend_from_slice(&self.created_at.as_millis().to_le_bytes());
        data.extend_from_slice(&payload_len.to_le_bytes());
        data.extend_from_slice(&payload);
        data.extend_from_slice(&Sha256::digest(&payload));
        Ok(data)
    }

    /// Decodes and verifies a bundle.
    pub fn from_bytes(data: &[u8]) -> CoreResult<Self> {
        let header = SnapshotHeader::read(data)?;
        let footer = data.len() - FOOTER_SIZE;
        let payload = &data[HEADER_SIZE..footer];
        let stored = &data[footer..];

        let id = SnapshotId::from_parts(header.created_at, stored);
        if Sha256::digest(payload).as_slice() != stored {
            return Err(CoreError::ChecksumMismatch { id: id.0 });
        }

        let state: StoreState = ciborium::from_reader(payload)
            .map_err(|e| CoreError::invalid_format(format!("snapshot payload: {e}")))?;
        state.validate()?;
        Ok(Self {
            id,
            created_at: header.created_at,
            state,
        })
    }
}

fn encode_payload(state: &StoreState) -> CoreResult<Vec<u8>> {
    let mut payload = Vec::new();
    ciborium::into_writer(state, &mut payload)
        .map_err(|e| CoreError::invalid_format(format!("snapshot encoding: {e}")))?;
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{CatalogRecord, OrderRecord, Record};
    use crate::types::{Collection, RecordId};
    use serde_json::json;

    fn sample_state() -> StoreState {
        let mut state = StoreState::new();
        state.insert(
            Collection::Flowers,
            Record::Catalog(
                CatalogRecord::new(RecordId::new("rose").unwrap())
                    .with_attribute("sizes", json!({"S": 1.5, "L": 3})),
            ),
        );
        state.insert(
            Collection::Orders,
            Record::Order(OrderRecord::draft(
                RecordId::new("o-1").unwrap(),
                Timestamp::from_millis(7),
            )),
        );
        state
    }

    #[test]
    fn bundle_round_trip() {
        let snapshot = Snapshot::new(sample_state(), Timestamp::from_millis(1_700_000_000_000))
            .unwrap();
        let bytes = snapshot.to_bytes().unwrap();
        assert_eq!(&bytes[..4], b"PSNP");

        let decoded = Snapshot::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, snapshot);
        assert!(decoded.id.as_str().starts_with("snap-1700000000000-"));
    }

    #[test]
    fn id_depends_on_content() {
        let at = Timestamp::from_millis(42);
        let a = Snapshot::new(sample_state(), at).unwrap();
        let b = Snapshot::new(StoreState::new(), at).unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(a.id, Snapshot::new(sample_state(), at).unwrap().id);
        assert_eq!(a.id.created_at(), at);
        assert_eq!(SnapshotId::of_bundle(&a.to_bytes().unwrap()).unwrap(), a.id);
    }

    #[test]
    fn corrupted_payload_fails_checksum() {
        let snapshot = Snapshot::new(sample_state(), Timestamp::from_millis(1)).unwrap();
        let mut bytes = snapshot.to_bytes().unwrap();
        bytes[HEADER_SIZE + 2] ^= 0xff;
        assert!(matches!(
            Snapshot::from_bytes(&bytes),
            Err(CoreError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn truncated_or_foreign_data_is_rejected() {
        let bytes = Snapshot::new(sample_state(), Timestamp::from_millis(1))
            .unwrap()
            .to_bytes()
            .unwrap();
        assert!(Snapshot::from_bytes(&bytes[..bytes.len() - 1]).is_err());
        assert!(Snapshot::from_bytes(b"not a snapshot at all, just text").is_err());

        let mut wrong_version = bytes.clone();
        wrong_version[4] = 9;
        assert!(matches!(
            Snapshot::from_bytes(&wrong_version),
            Err(CoreError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn id_parsing() {
        assert!(SnapshotId::parse("snap-0000000000042-0123456789ab").is_ok());
        assert!(SnapshotId::parse("snap-42-0123456789ab").is_err());
        assert!(SnapshotId::parse("snap-0000000000042-0123456789AB").is_err());
        assert!(SnapshotId::from_file_name("snap-0000000000042-0123456789ab.posy").is_some());
        assert!(SnapshotId::from_file_name("snap-0000000000042-0123456789ab.tmp").is_none());
    }
}
