use crc16::{State, MODBUS};
use serde::{Deserialize, Serialize};

/// Bytes occupied by one record.
///
/// Start Byte | End Byte | Meaning
/// 0          | 1        | Sequence number, 0xFFFF when the slot is erased
/// 2          | 5        | Learned capacity of battery 1 (Ah)
/// 6          | 9        | Learned capacity of battery 2 (Ah)
/// 10         | 13       | SoC of battery 1 (%)
/// 14         | 17       | SoC of battery 2 (%)
/// 18         | 21       | SoH of battery 1 (%)
/// 22         | 25       | SoH of battery 2 (%)
/// 26         | 27       | Checksum over bytes 0-25
///
/// All fields are little endian.
pub const SLOT_SIZE: usize = 28;

/// Sequence value of a slot that has never been written
pub const ERASED_SEQUENCE: u16 = 0xFFFF;

const PAYLOAD_SIZE: usize = SLOT_SIZE - 2;

/// How a slot's checksum is computed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChecksumKind {
    /// CRC-16/MODBUS
    #[default]
    Crc16Modbus,
    /// Plain sum of the bytes modulo 2^16, as written by older firmware
    ByteSum,
}

impl ChecksumKind {
    pub fn compute(self, data: &[u8]) -> u16 {
        match self {
            ChecksumKind::Crc16Modbus => State::<MODBUS>::calculate(data),
            ChecksumKind::ByteSum => data.iter().fold(0u16, |sum, &b| sum.wrapping_add(b as u16)),
        }
    }
}

/// The persisted part of one battery's state.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BatterySnapshot {
    pub learned_capacity_ah: f32,
    pub soc_percent: f32,
    pub soh_percent: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PersistedRecord {
    pub sequence: u16,
    pub batteries: [BatterySnapshot; 2],
}

#[derive(Debug, PartialEq)]
pub enum DecodedSlot {
    Valid(PersistedRecord),
    Erased,
    Corrupt(&'static str),
}

impl PersistedRecord {
    pub fn encode(&self, checksum: ChecksumKind) -> [u8; SLOT_SIZE] {
        let [b1, b2] = &self.batteries;
        let fields = [
            b1.learned_capacity_ah,
            b2.learned_capacity_ah,
            b1.soc_percent,
            b2.soc_percent,
            b1.soh_percent,
            b2.soh_percent,
        ];

        let mut slot = [0u8; SLOT_SIZE];
        slot[0..2].copy_from_slice(&self.sequence.to_le_bytes());
        for (chunk, value) in slot[2..PAYLOAD_SIZE].chunks_exact_mut(4).zip(fields) {
            chunk.copy_from_slice(&value.to_le_bytes());
        }
        let crc = checksum.compute(&slot[..PAYLOAD_SIZE]);
        slot[PAYLOAD_SIZE..].copy_from_slice(&crc.to_le_bytes());
        slot
    }

    pub fn decode(slot: &[u8; SLOT_SIZE], checksum: ChecksumKind) -> DecodedSlot {
        let sequence = u16::from_le_bytes([slot[0], slot[1]]);
        if sequence == ERASED_SEQUENCE {
            return DecodedSlot::Erased;
        }

        let stored = u16::from_le_bytes([slot[PAYLOAD_SIZE], slot[PAYLOAD_SIZE + 1]]);
        if stored != checksum.compute(&slot[..PAYLOAD_SIZE]) {
            return DecodedSlot::Corrupt("Checksum mismatch");
        }

        let mut fields = [0f32; 6];
        for (value, chunk) in fields.iter_mut().zip(slot[2..PAYLOAD_SIZE].chunks_exact(4)) {
            *value = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        let [cap1, cap2, soc1, soc2, soh1, soh2] = fields;

        DecodedSlot::Valid(PersistedRecord {
            sequence,
            batteries: [
                BatterySnapshot {
                    learned_capacity_ah: cap1,
                    soc_percent: soc1,
                    soh_percent: soh1,
                },
                BatterySnapshot {
                    learned_capacity_ah: cap2,
                    soc_percent: soc2,
                    soh_percent: soh2,
                },
            ],
        })
    }
}

/// True when `a` was written after `b`, allowing for the counter wrapping.
pub fn sequence_is_newer(a: u16, b: u16) -> bool {
    (a.wrapping_sub(b) as i16) > 0
}

/// The sequence number to write after `sequence`, never the erased marker.
pub fn next_sequence(sequence: u16) -> u16 {
    match sequence.wrapping_add(1) {
        ERASED_SEQUENCE => 0,
        next => next,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> PersistedRecord {
        PersistedRecord {
            sequence: 0x0102,
            batteries: [
                BatterySnapshot {
                    learned_capacity_ah: 100.0,
                    soc_percent: 62.0,
                    soh_percent: 100.0,
                },
                BatterySnapshot {
                    learned_capacity_ah: 95.5,
                    soc_percent: 40.25,
                    soh_percent: 95.5,
                },
            ],
        }
    }

    #[test]
    fn test_slot_layout() {
        let slot = record().encode(ChecksumKind::ByteSum);
        // sequence, then 100.0, 95.5, 62.0, 40.25, 100.0, 95.5 as little endian f32
        let expected_payload =
            hex::decode("02010000c8420000bf4200007842000021420000c8420000bf42").unwrap();
        assert_eq!(&slot[..26], &expected_payload[..]);
        let sum: u16 = expected_payload.iter().map(|&b| b as u16).sum();
        assert_eq!(u16::from_le_bytes([slot[26], slot[27]]), sum);
    }

    #[test]
    fn test_decode_valid_slot() {
        for checksum in [ChecksumKind::Crc16Modbus, ChecksumKind::ByteSum] {
            let slot = record().encode(checksum);
            assert_eq!(PersistedRecord::decode(&slot, checksum), DecodedSlot::Valid(record()));
        }
    }

    #[test]
    fn test_erased_slot() {
        let slot = [0xFF; SLOT_SIZE];
        assert_eq!(PersistedRecord::decode(&slot, ChecksumKind::Crc16Modbus), DecodedSlot::Erased);
    }

    #[test]
    fn test_flipped_bit_is_corrupt() {
        let mut slot = record().encode(ChecksumKind::Crc16Modbus);
        slot[11] ^= 0x04;
        assert_eq!(
            PersistedRecord::decode(&slot, ChecksumKind::Crc16Modbus),
            DecodedSlot::Corrupt("Checksum mismatch")
        );
    }

    #[test]
    fn test_swapped_bytes_fool_byte_sum_but_not_crc() {
        let original = record();
        let mut slot = original.encode(ChecksumKind::ByteSum);
        slot.swap(4, 5);
        assert!(matches!(PersistedRecord::decode(&slot, ChecksumKind::ByteSum), DecodedSlot::Valid(_)));

        let mut slot = original.encode(ChecksumKind::Crc16Modbus);
        slot.swap(4, 5);
        assert!(matches!(PersistedRecord::decode(&slot, ChecksumKind::Crc16Modbus), DecodedSlot::Corrupt(_)));
    }

    #[test]
    fn test_checksum_kinds_disagree() {
        let slot = record().encode(ChecksumKind::Crc16Modbus);
        assert!(matches!(PersistedRecord::decode(&slot, ChecksumKind::ByteSum), DecodedSlot::Corrupt(_)));
    }

    #[test]
    fn test_modbus_check_value() {
        assert_eq!(ChecksumKind::Crc16Modbus.compute(b"123456789"), 0x4B37);
    }

    #[test]
    fn test_sequence_ordering_wraps() {
        assert!(sequence_is_newer(2, 1));
        assert!(!sequence_is_newer(1, 2));
        assert!(!sequence_is_newer(7, 7));
        assert!(sequence_is_newer(0, 0xFFFE));
        assert!(sequence_is_newer(3, 0xFFF0));
        assert!(!sequence_is_newer(0xFFF0, 3));
    }

    #[test]
    fn test_next_sequence_skips_erased_marker() {
        assert_eq!(next_sequence(0), 1);
        assert_eq!(next_sequence(0xFFFD), 0xFFFE);
        assert_eq!(next_sequence(0xFFFE), 0);
        assert_eq!(next_sequence(0xFFFF), 0);
    }
}
