//! Raw scattering-vector events.

use crate::config::ByteOrder;

/// Size of one event record in bytes: three IEEE-754 `f32` values.
pub const RECORD_SIZE: usize = 12;

/// One event's scattering vector (Å⁻¹, including the 2π factor).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EventRecord {
    pub qx: f32,
    pub qy: f32,
    pub qz: f32,
}

impl EventRecord {
    /// Creates a new event.
    #[inline]
    #[must_use]
    pub fn new(qx: f32, qy: f32, qz: f32) -> Self {
        Self { qx, qy, qz }
    }

    /// Decodes one record.
    #[inline]
    #[must_use]
    pub fn from_bytes(bytes: &[u8; RECORD_SIZE], order: ByteOrder) -> Self {
        let word = |i: usize| [bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]];
        let decode = match order {
            ByteOrder::Little => f32::from_le_bytes,
            ByteOrder::Big => f32::from_be_bytes,
        };
        Self {
            qx: decode(word(0)),
            qy: decode(word(4)),
            qz: decode(word(8)),
        }
    }

    /// Encodes the record.
    #[inline]
    #[must_use]
    pub fn to_bytes(&self, order: ByteOrder) -> [u8; RECORD_SIZE] {
        let encode = match order {
            ByteOrder::Little => f32::to_le_bytes,
            ByteOrder::Big => f32::to_be_bytes,
        };
        let mut out = [0u8; RECORD_SIZE];
        out[0..4].copy_from_slice(&encode(self.qx));
        out[4..8].copy_from_slice(&encode(self.qy));
        out[8..12].copy_from_slice(&encode(self.qz));
        out
    }

    /// Returns true if all components are finite.
    #[inline]
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.qx.is_finite() && self.qy.is_finite() && self.qz.is_finite()
    }
}

/// Iterates the complete records in `bytes`; a trailing partial record is
/// ignored.
pub fn decode_records(bytes: &[u8], order: ByteOrder) -> impl Iterator<Item = EventRecord> + '_ {
    bytes.chunks_exact(RECORD_SIZE).map(move |chunk| {
        let mut record = [0u8; RECORD_SIZE];
        record.copy_from_slice(chunk);
        EventRecord::from_bytes(&record, order)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_orders_differ() {
        let event = EventRecord::new(1.5, -2.25, 3.0);
        let le = event.to_bytes(ByteOrder::Little);
        let be = event.to_bytes(ByteOrder::Big);
        assert_ne!(le, be);
        assert_eq!(EventRecord::from_bytes(&be, ByteOrder::Big), event);
        assert_eq!(&le[0..4], &1.5f32.to_le_bytes());
    }

    #[test]
    fn test_trailing_partial_record_ignored() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&EventRecord::new(1.0, 2.0, 3.0).to_bytes(ByteOrder::Little));
        bytes.extend_from_slice(&EventRecord::new(4.0, 5.0, 6.0).to_bytes(ByteOrder::Little));
        bytes.extend_from_slice(&[0u8; 7]);
        let events: Vec<_> = decode_records(&bytes, ByteOrder::Little).collect();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1], EventRecord::new(4.0, 5.0, 6.0));
    }

    #[test]
    fn test_non_finite() {
        assert!(!EventRecord::new(f32::NAN, 0.0, 0.0).is_finite());
        assert!(EventRecord::new(0.0, 0.0, 0.0).is_finite());
    }
}
