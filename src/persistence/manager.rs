//! Wear-leveled ring of record slots.
//!
//! Saves go round-robin through `num_slots` fixed-size slots so that no single
//! slot takes every erase/write cycle. Each write carries a sequence number one
//! past the previous one; at boot the slot with the newest valid sequence is
//! the state to resume from and the next save goes to the slot after it.

use tracing::{debug, info};

use super::record::{
    next_sequence, sequence_is_newer, BatterySnapshot, ChecksumKind, DecodedSlot, PersistedRecord, SLOT_SIZE,
};
use super::store::{Eeprom, StorageError};
use crate::config::StorageConfig;

/// Where and with what sequence a save landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveReceipt {
    pub slot: u16,
    pub sequence: u16,
}

pub struct PersistenceManager<E: Eeprom> {
    store: E,
    base_address: usize,
    num_slots: u16,
    checksum: ChecksumKind,
    /// Slot and sequence of the newest record, `None` until one is known
    cursor: Option<SaveReceipt>,
}

impl<E: Eeprom> PersistenceManager<E> {
    pub fn new(store: E, config: &StorageConfig) -> Result<Self, StorageError> {
        let needed = config.required_bytes().ok_or(StorageError::AddressOverflow {
            base_address: config.base_address,
            num_slots: config.num_slots,
        })?;
        if needed > store.len() {
            return Err(StorageError::TooSmall {
                needed,
                available: store.len(),
            });
        }

        Ok(Self {
            store,
            base_address: config.base_address,
            num_slots: config.num_slots,
            checksum: config.checksum,
            cursor: None,
        })
    }

    pub fn slot_address(&self, slot: u16) -> usize {
        self.base_address + slot as usize * SLOT_SIZE
    }

    /// Scan every slot and return the newest valid record, if any. Erased and
    /// corrupt slots are skipped. The next save goes to the slot after the
    /// record returned here.
    pub fn load(&mut self) -> Result<Option<PersistedRecord>, StorageError> {
        let mut newest: Option<(u16, PersistedRecord)> = None;

        for slot in 0..self.num_slots {
            let mut bytes = [0u8; SLOT_SIZE];
            self.store.read(self.slot_address(slot), &mut bytes)?;

            let record = match PersistedRecord::decode(&bytes, self.checksum) {
                DecodedSlot::Valid(record) => record,
                DecodedSlot::Erased => continue,
                DecodedSlot::Corrupt(reason) => {
                    debug!(slot, reason, bytes = %hex::encode(bytes), "skipping unreadable slot");
                    continue;
                }
            };

            // On a tie the later slot wins
            let is_newest = match &newest {
                None => true,
                Some((_, best)) => !sequence_is_newer(best.sequence, record.sequence),
            };
            if is_newest {
                newest = Some((slot, record));
            }
        }

        self.cursor = newest.map(|(slot, record)| SaveReceipt {
            slot,
            sequence: record.sequence,
        });

        match &newest {
            Some((slot, record)) => {
                info!(slot, sequence = record.sequence, "loaded persisted state");
            }
            None => info!("no persisted state found"),
        }

        Ok(newest.map(|(_, record)| record))
    }

    /// Write a record to the slot after the newest one and commit it. The
    /// cursor only moves once the commit has succeeded.
    pub fn save(&mut self, batteries: [BatterySnapshot; 2]) -> Result<SaveReceipt, StorageError> {
        let receipt = match self.cursor {
            None => SaveReceipt { slot: 0, sequence: 1 },
            Some(cursor) => SaveReceipt {
                slot: (cursor.slot + 1) % self.num_slots,
                sequence: next_sequence(cursor.sequence),
            },
        };

        let record = PersistedRecord {
            sequence: receipt.sequence,
            batteries,
        };
        let bytes = record.encode(self.checksum);
        debug!(slot = receipt.slot, sequence = receipt.sequence, bytes = %hex::encode(bytes), "writing slot");

        self.store.write(self.slot_address(receipt.slot), &bytes)?;
        self.store.commit()?;

        self.cursor = Some(receipt);
        Ok(receipt)
    }

    /// The most recent successful save or load, if any.
    pub fn cursor(&self) -> Option<SaveReceipt> {
        self.cursor
    }

    pub fn store(&self) -> &E {
        &self.store
    }

    pub fn into_inner(self) -> E {
        self.store
    }
}
