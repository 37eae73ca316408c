//! # Record Codec
//!
//! Deterministic byte encodings for everything the store persists.
//!
//! Component values use a self-describing JSON encoding keyed by the Rust
//! type registered for the component ID, so payloads stay readable and
//! stable across releases of this crate. Structural records (locations,
//! archetype definitions, the registry, counters, the pending-transaction
//! frame) use fixed little-endian layouts.
//!
//! ## Layouts
//!
//! ```text
//! location:   [arch: u32][row: u64]
//! entity id:  [id: u64]
//! counter:    [value: u64]
//! archetype:  [count: u16][component id: u32] * count
//! registry:   [count: u32] ([id: u32][name_len: u16][name]
//!                           [exemplar_len: u32][exemplar]) * count
//! tx pool:    [count: u32] ([message_id: u64][payload_len: u32][payload]) * count
//!             [crc32 of all bytes before it]
//! ```

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::archetype::{ArchetypeId, ArchetypeSignature};
use crate::component::{ComponentInfo, ComponentTypeId};
use crate::entity::EntityId;
use crate::location::Location;
use crate::txpool::{StagedTransaction, TxPool};

/// Errors from encoding or decoding persisted records.
#[derive(Error, Debug)]
pub enum CodecError {
    /// A structural record ended before its declared contents.
    #[error("record truncated: needed {needed} more bytes")]
    Truncated {
        /// How many bytes past the end the read reached for.
        needed: usize,
    },

    /// A record carried bytes past its declared contents.
    #[error("record has {0} trailing bytes")]
    TrailingBytes(usize),

    /// The pending-transaction frame failed its integrity check.
    #[error("checksum mismatch in pending transaction frame")]
    Checksum,

    /// A component payload failed to encode or decode.
    #[error("malformed component payload: {0}")]
    Payload(#[from] serde_json::Error),

    /// A record field held text that was not valid UTF-8.
    #[error("record field is not valid utf-8")]
    BadText,
}

/// Result alias for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Encodes a component value.
///
/// # Errors
///
/// `Payload` when the value cannot be serialized.
pub fn encode_value<T: Serialize>(value: &T) -> CodecResult<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

/// Decodes a component value.
///
/// # Errors
///
/// `Payload` when the bytes do not match the type's schema.
pub fn decode_value<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<T> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Encodes a location record.
#[must_use]
pub fn encode_location(location: &Location) -> Vec<u8> {
    let mut buf = Vec::with_capacity(12);
    buf.extend_from_slice(&location.arch.raw().to_le_bytes());
    buf.extend_from_slice(&location.row.to_le_bytes());
    buf
}

/// Decodes a location record.
///
/// # Errors
///
/// `Truncated` or `TrailingBytes` when the record is not exactly one
/// location.
pub fn decode_location(bytes: &[u8]) -> CodecResult<Location> {
    let mut reader = ByteReader::new(bytes);
    let arch = ArchetypeId::new(reader.read_u32()?);
    let row = reader.read_u64()?;
    reader.finish()?;
    Ok(Location::new(arch, row))
}

/// Encodes an entity ID as a membership-list element.
#[must_use]
pub fn encode_entity_id(entity: EntityId) -> Vec<u8> {
    entity.raw().to_le_bytes().to_vec()
}

/// Decodes a membership-list element.
///
/// # Errors
///
/// `Truncated` or `TrailingBytes` when the element is not exactly one ID.
pub fn decode_entity_id(bytes: &[u8]) -> CodecResult<EntityId> {
    let mut reader = ByteReader::new(bytes);
    let id = reader.read_u64()?;
    reader.finish()?;
    Ok(EntityId::new(id))
}

/// Encodes a counter value.
#[must_use]
pub fn encode_counter(value: u64) -> Vec<u8> {
    value.to_le_bytes().to_vec()
}

/// Decodes a counter value.
///
/// # Errors
///
/// `Truncated` or `TrailingBytes` when the record is not exactly one
/// counter.
pub fn decode_counter(bytes: &[u8]) -> CodecResult<u64> {
    let mut reader = ByteReader::new(bytes);
    let value = reader.read_u64()?;
    reader.finish()?;
    Ok(value)
}

/// Encodes an archetype definition.
#[must_use]
pub fn encode_archetype(signature: &ArchetypeSignature) -> Vec<u8> {
    let components = signature.components();
    let mut buf = Vec::with_capacity(2 + components.len() * 4);
    buf.extend_from_slice(&(components.len() as u16).to_le_bytes());
    for component in components {
        buf.extend_from_slice(&component.raw().to_le_bytes());
    }
    buf
}

/// Decodes an archetype definition.
///
/// # Errors
///
/// `Truncated` or `TrailingBytes` when the record does not hold exactly the
/// declared component count.
pub fn decode_archetype(bytes: &[u8]) -> CodecResult<ArchetypeSignature> {
    let mut reader = ByteReader::new(bytes);
    let count = reader.read_u16()?;
    let mut components = Vec::with_capacity(count as usize);
    for _ in 0..count {
        components.push(ComponentTypeId::new(reader.read_u32()?));
    }
    reader.finish()?;
    Ok(ArchetypeSignature::new(components))
}

/// Encodes the full component registry.
#[must_use]
pub fn encode_registry(entries: &[ComponentInfo]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&(entries.len() as u32).to_le_bytes());
    for entry in entries {
        buf.extend_from_slice(&entry.id.raw().to_le_bytes());
        buf.extend_from_slice(&(entry.name.len() as u16).to_le_bytes());
        buf.extend_from_slice(entry.name.as_bytes());
        buf.extend_from_slice(&(entry.exemplar.len() as u32).to_le_bytes());
        buf.extend_from_slice(&entry.exemplar);
    }
    buf
}

/// Decodes the full component registry.
///
/// # Errors
///
/// `Truncated`, `TrailingBytes`, or `BadText` when the record does not hold
/// exactly the declared entries.
pub fn decode_registry(bytes: &[u8]) -> CodecResult<Vec<ComponentInfo>> {
    let mut reader = ByteReader::new(bytes);
    let count = reader.read_u32()?;
    let mut entries = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let id = ComponentTypeId::new(reader.read_u32()?);
        let name_len = reader.read_u16()? as usize;
        let name = String::from_utf8(reader.read_bytes(name_len)?.to_vec())
            .map_err(|_| CodecError::BadText)?;
        let exemplar_len = reader.read_u32()? as usize;
        let exemplar = reader.read_bytes(exemplar_len)?.to_vec();
        entries.push(ComponentInfo { id, name, exemplar });
    }
    reader.finish()?;
    Ok(entries)
}

/// Encodes the pending-transaction frame, checksummed so a torn write is
/// detected at recovery instead of being replayed.
#[must_use]
pub fn encode_tx_pool(pool: &TxPool) -> Vec<u8> {
    let transactions = pool.transactions();
    let mut buf = Vec::new();
    buf.extend_from_slice(&(transactions.len() as u32).to_le_bytes());
    for tx in transactions {
        buf.extend_from_slice(&tx.message_id.to_le_bytes());
        buf.extend_from_slice(&(tx.payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&tx.payload);
    }
    let crc = crc32fast::hash(&buf);
    buf.extend_from_slice(&crc.to_le_bytes());
    buf
}

/// Decodes the pending-transaction frame.
///
/// # Errors
///
/// `Checksum` when the frame fails its integrity check, `Truncated` or
/// `TrailingBytes` when the frame does not hold exactly the declared
/// transactions.
pub fn decode_tx_pool(bytes: &[u8]) -> CodecResult<TxPool> {
    if bytes.len() < 4 {
        return Err(CodecError::Truncated {
            needed: 4 - bytes.len(),
        });
    }
    let (body, crc_bytes) = bytes.split_at(bytes.len() - 4);
    let stored = u32::from_le_bytes(crc_bytes.try_into().unwrap_or([0; 4]));
    if crc32fast::hash(body) != stored {
        return Err(CodecError::Checksum);
    }

    let mut reader = ByteReader::new(body);
    let count = reader.read_u32()?;
    let mut pool = TxPool::new();
    for _ in 0..count {
        let message_id = reader.read_u64()?;
        let payload_len = reader.read_u32()? as usize;
        let payload = reader.read_bytes(payload_len)?.to_vec();
        pool.push(StagedTransaction {
            message_id,
            payload,
        });
    }
    reader.finish()?;
    Ok(pool)
}

/// Cursor over a structural record.
struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    const fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn read_bytes(&mut self, len: usize) -> CodecResult<&'a [u8]> {
        let end = self.pos + len;
        if end > self.buf.len() {
            return Err(CodecError::Truncated {
                needed: end - self.buf.len(),
            });
        }
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_u16(&mut self) -> CodecResult<u16> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn read_u32(&mut self) -> CodecResult<u32> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_u64(&mut self) -> CodecResult<u64> {
        let bytes = self.read_bytes(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(raw))
    }

    fn finish(self) -> CodecResult<()> {
        if self.pos != self.buf.len() {
            return Err(CodecError::TrailingBytes(self.buf.len() - self.pos));
        }
        Ok(())
    }
}
