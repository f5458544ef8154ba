//! Over-the-air update slot management.
//!
//! The otadata partition holds two 32-byte boot-selection records at fixed
//! offsets (0x0000 and 0x1000). Each record carries a sequence number guarded
//! by a CRC32; the record with the highest valid sequence number selects the
//! app partition the bootloader will run, by mapping the sequence number onto
//! the ring of `ota_N` slots. If rollback is enabled in the bootloader, new
//! firmware must validate itself on first boot or the device reverts to the
//! previous slot.

use crate::crc::crc32;
use crate::error::Error;
use crate::flash::Flash;
use crate::firmware::Firmware;
use crate::partition::read_u32;
use crate::partition::PartitionEntry;

/// Size of one OTA boot-selection record.
pub const OTA_RECORD_SIZE: usize = 32;

/// Offsets of the two record slots inside the otadata partition.
pub const OTA_SLOT_OFFSETS: [usize; 2] = [0x0000, 0x1000];

/// Size of one otadata slot (one erase block per record).
pub const OTA_SLOT_SIZE: usize = 0x1000;

// Initial CRC32 value for sequence-number checksums (ESP-IDF crc32_le form).
const OTA_CRC_INIT: u32 = 0xFFFF_FFFF;

/// Allowed values for the `state` field in an OTA record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum OtaState {
    /// Slot was just written and has not attempted to boot.
    New = 0,
    /// Slot is booting for the first time; rollback candidate.
    Pending = 1,
    /// Slot has validated itself.
    Valid = 2,
    /// Slot failed validation.
    Invalid = 3,
    /// Update into this slot was aborted.
    Aborted = 4,
    /// Rollback protection disabled; slot boots unconditionally.
    Undefined = 0xFFFF_FFFF,
}

/// CRC32 checksum of an OTA sequence number, as stored in the record. A
/// corruption/tamper guard, not a security mechanism.
pub fn ota_crc(seq: u32) -> u32 {
    crc32(OTA_CRC_INIT, &seq.to_le_bytes())
}

/// Check validity of an OTA record's fields: only a `Valid` state with a
/// matching sequence checksum selects a boot slot.
pub fn record_is_valid(seq: u32, state: u32, crc: u32) -> bool {
    state == OtaState::Valid as u32 && crc == ota_crc(seq)
}

/// Decode the sequence number from one 32-byte OTA record, or 0 if the
/// record does not hold a valid sequence.
pub fn sequence_from_record(data: &[u8]) -> u32 {
    let seq = read_u32(data, 0);
    let state = read_u32(data, 24);
    let crc = read_u32(data, 28);
    let valid = record_is_valid(seq, state, crc);
    log::debug!("OTA record: seq={seq}, state={state:#x}, crc={crc:#010x}, valid={valid}");
    if valid {
        seq
    } else {
        0
    }
}

/// Encode one 32-byte OTA record for `seq` with the given state. Sequence 0
/// means "no record" and encodes as an erased (all-`0xFF`) record.
pub fn ota_record(seq: u32, state: OtaState) -> [u8; OTA_RECORD_SIZE] {
    let mut data = [0xFF_u8; OTA_RECORD_SIZE];
    if seq == 0 {
        return data;
    }
    data[0..4].copy_from_slice(&seq.to_le_bytes());
    // Bytes 4..24 are the unused label field, left erased.
    data[24..28].copy_from_slice(&(state as u32).to_le_bytes());
    data[28..32].copy_from_slice(&ota_crc(seq).to_le_bytes());
    data
}

/// Boot-slot sequencer over the OTA partitions of an open firmware.
///
/// Construction reads both otadata records and the table's `ota_N` app
/// partitions; all selection logic after that is pure. Only
/// [`OtaUpdater::set_boot`] writes back to storage.
#[derive(Debug)]
pub struct OtaUpdater {
    otadata: PartitionEntry,
    ota_parts: Vec<PartitionEntry>,
    sequence: u32,
    no_rollback: bool,
}

impl OtaUpdater {
    /// Read the otadata partition of `firmware` and collect its OTA app
    /// slots.
    ///
    /// Fails if the table has no otadata partition, fewer than two `ota_N`
    /// app partitions, or slot numbers that are not sequential from 0. With
    /// `no_rollback` set, records written by [`OtaUpdater::set_boot`] use the
    /// `Undefined` state so the bootloader skips self-validation.
    pub fn new<F: Flash>(firmware: &mut Firmware<F>, no_rollback: bool) -> Result<Self, Error> {
        let otadata = firmware.table.by_subtype("ota")?.clone();
        if (otadata.size as usize) < 2 * OTA_SLOT_SIZE {
            return Err(Error::Inconsistent {
                msg: format!(
                    "otadata partition is too small ({:#x} bytes, require {:#x})",
                    otadata.size,
                    2 * OTA_SLOT_SIZE
                ),
                table: firmware.table.render(),
            });
        }
        let ota_parts = ota_app_partitions(&firmware.table)?;

        let data = firmware.read_part(&otadata)?;
        let sequence = OTA_SLOT_OFFSETS
            .iter()
            .map(|&i| sequence_from_record(&data[i..i + OTA_RECORD_SIZE]))
            .max()
            .unwrap_or(0);

        Ok(Self {
            otadata,
            ota_parts,
            sequence,
            no_rollback,
        })
    }

    /// The current boot sequence number (0 if neither record is valid).
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// The `ota` app partition that boots for sequence number `seq`.
    ///
    /// Sequence numbers are one-indexed onto the ring of slots: slot
    /// `(seq - 1) % N` for `seq > 0`, and slot 0 before any update has been
    /// recorded.
    pub fn part_for_sequence(&self, seq: u32) -> &PartitionEntry {
        let slot = if seq > 0 {
            (seq as usize - 1) % self.ota_parts.len()
        } else {
            0
        };
        &self.ota_parts[slot]
    }

    /// The app partition the device will boot now.
    pub fn current(&self) -> &PartitionEntry {
        self.part_for_sequence(self.sequence)
    }

    /// The app partition the next update should be written to.
    pub fn next_update(&self) -> &PartitionEntry {
        self.part_for_sequence(self.sequence + 1)
    }

    /// Set `part` as the next boot partition. `part` must be one of the
    /// table's `ota` app partitions.
    ///
    /// Both otadata slots are rewritten in a single whole-block write: the
    /// first slot holds the new sequence record (`New`, or `Undefined` with
    /// rollback disabled) and the second holds the previous sequence record
    /// re-marked `Valid`, so an interruption after the write still leaves a
    /// self-consistent record to boot from.
    pub fn set_boot<F: Flash>(
        &mut self,
        firmware: &mut Firmware<F>,
        part: &PartitionEntry,
    ) -> Result<(), Error> {
        let start = self.sequence;
        let mut seq = start;
        while self.part_for_sequence(seq) != part {
            seq += 1;
            if seq - start > self.ota_parts.len() as u32 {
                return Err(Error::NotOtaPartition(part.name()));
            }
        }
        if seq == start {
            log::warn!("'{}' is already set for booting.", part.name());
            return Ok(());
        }

        let new_state = if self.no_rollback {
            OtaState::Undefined
        } else {
            OtaState::New
        };
        let mut data = vec![0xFF_u8; 2 * OTA_SLOT_SIZE];
        data[..OTA_RECORD_SIZE].copy_from_slice(&ota_record(seq, new_state));
        data[OTA_SLOT_SIZE..OTA_SLOT_SIZE + OTA_RECORD_SIZE]
            .copy_from_slice(&ota_record(start, OtaState::Valid));
        firmware.write_part(&self.otadata, &data)?;
        self.sequence = seq;
        Ok(())
    }
}

/// All `ota_N` app partitions of `table`, sorted by slot number.
///
/// OTA booting requires at least two slots, numbered sequentially from 0.
fn ota_app_partitions(
    table: &crate::partition::PartitionTable,
) -> Result<Vec<PartitionEntry>, Error> {
    let mut parts: Vec<PartitionEntry> = table
        .iter()
        .filter(|p| p.ota_slot().is_some())
        .cloned()
        .collect();
    parts.sort_by_key(|p| p.subtype);
    if parts.len() < 2 {
        return Err(Error::TooFewOtaParts);
    }
    for (i, p) in parts.iter().enumerate() {
        if p.ota_slot() != Some(i as u8) {
            return Err(Error::NonSequentialOtaParts);
        }
    }
    Ok(parts)
}

/// Write `image` into the next available OTA slot of `firmware` and set that
/// slot as the next boot partition. Returns the partition that was updated.
///
/// With rollback enabled in the bootloader, the new firmware must validate
/// itself on first boot (eg. `esp32.Partition.mark_app_valid_cancel_rollback`
/// in MicroPython) or the device reverts to the previous slot.
pub fn ota_update<F: Flash>(
    firmware: &mut Firmware<F>,
    image: &[u8],
    no_rollback: bool,
) -> Result<PartitionEntry, Error> {
    let mut ota = OtaUpdater::new(firmware, no_rollback)?;

    let part = ota.next_update().clone();
    log::info!("Writing firmware to OTA partition {}...", part.name());
    firmware.write_part(&part, image)?;

    log::info!("Updating otadata partition...");
    ota.set_boot(firmware, &part)?;
    Ok(part)
}
