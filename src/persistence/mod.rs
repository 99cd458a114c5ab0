//! Persisting learned capacity, SoC and SoH across restarts.

mod manager;
mod record;
mod store;

pub use manager::{PersistenceManager, SaveReceipt};
pub use record::{
    next_sequence, sequence_is_newer, BatterySnapshot, ChecksumKind, DecodedSlot, PersistedRecord, ERASED_SEQUENCE,
    SLOT_SIZE,
};
pub use store::{Eeprom, FileEeprom, MemoryEeprom, StorageError, ERASED_BYTE};
