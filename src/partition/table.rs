use std::collections::HashSet;
use std::fmt;

use crate::error::Error;
use crate::partition::consts::*;
use crate::partition::PartitionEntry;

/// An ordered collection of [`PartitionEntry`] values plus the table-level
/// metadata needed to validate them against the flash they describe.
///
/// Entries are kept sorted by offset. All mutating operations replace entries
/// wholesale (entries themselves are immutable values) and leave the table
/// sorted; only [`PartitionTable::check`] enforces the consistency
/// invariants, so callers batching several mutations run it once at the end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionTable {
    entries: Vec<PartitionEntry>,
    /// Declared flash size in bytes. Inferred from the last entry when a
    /// table is parsed without an externally supplied size.
    pub max_size: u32,
    /// Required minimum size of the first app partition (0 = unknown).
    pub app_size: u32,
    /// Fixed flash regions this table is checked against.
    pub layout: FlashLayout,
}

impl PartitionTable {
    /// Create an empty table for a flash of `max_size` bytes.
    pub fn new(max_size: u32) -> Self {
        Self {
            entries: Vec::new(),
            max_size,
            app_size: 0,
            layout: FlashLayout::default(),
        }
    }

    /// Parse a partition table from the raw bytes of its flash block.
    ///
    /// Reads 32-byte entries until one fails the magic check, verifies the
    /// MD5 checksum trailer if one is present, and requires an empty
    /// (all-`0xFF`) terminator row after the entries. If `max_size` is zero
    /// the flash size is inferred from the end of the last partition.
    ///
    /// The returned table has passed [`PartitionTable::check`]; a table that
    /// parses but fails the check is reported as an error carrying a rendered
    /// snapshot for diagnostics.
    pub fn from_bytes(data: &[u8], max_size: u32) -> Result<Self, Error> {
        let mut table = Self::new(max_size);

        let limit = data
            .len()
            .min(table.layout.table_size as usize)
            .saturating_sub(PART_LEN);
        let mut n = 0;
        while n < limit {
            match PartitionEntry::from_bytes(&data[n..n + PART_LEN]) {
                Some(part) => {
                    table.entries.push(part);
                    n += PART_LEN;
                }
                None => break,
            }
        }
        if table.entries.is_empty() {
            return Err(Error::NoTable);
        }

        // An optional trailer record carries an MD5 digest of the entries.
        if data[n..n + 2] == PART_CHKSUM_MAGIC {
            let stored = &data[n + 16..n + PART_LEN];
            let computed = md5::compute(&data[..n]).0;
            if computed[..] != *stored {
                return Err(Error::ChecksumMismatch {
                    expected: hex::encode(stored),
                    computed: hex::encode(computed),
                });
            }
            n += PART_LEN;
        }

        // At least one empty row must follow the entries.
        if data.len() < n + PART_LEN || data[n..n + PART_LEN].iter().any(|&b| b != 0xFF) {
            return Err(Error::NoEndMarker);
        }

        table.entries.sort_by_key(|p| p.offset);
        if table.max_size == 0 {
            let last = table.entries.last().unwrap();
            table.max_size = last.end();
        }
        // Record where this table actually puts the boot partition, so the
        // check only flags later mutations that move it.
        if let Ok(app) = table.app_part() {
            table.layout.app_part_offset = app.offset;
        }
        table.check()?;
        Ok(table)
    }

    /// Serialize the table to exactly one partition-table block: the entries,
    /// the MD5 checksum trailer, and `0xFF` fill.
    ///
    /// # Panics
    /// Panics if the entries do not fit in the block; table construction
    /// never allows that many entries, so this is a contract violation.
    pub fn to_bytes(&self) -> Vec<u8> {
        let block = self.layout.table_size as usize;
        let mut data = Vec::with_capacity(block);
        for part in &self.entries {
            data.extend_from_slice(&part.to_bytes());
        }
        let digest = md5::compute(&data).0;
        assert!(
            data.len() + 2 * PART_LEN <= block,
            "partition table overflows its {block:#x}-byte block"
        );
        data.extend_from_slice(&PART_CHKSUM_MAGIC);
        data.resize(data.len() + 14, 0xFF);
        data.extend_from_slice(&digest);
        data.resize(block, 0xFF);
        data
    }

    /// Parse a partition table from CSV content (see
    /// [`parse_size`](crate::parse_size) for the accepted offset/size forms).
    pub fn from_csv(content: &str, max_size: u32) -> Result<Self, Error> {
        super::csv::parse_csv(content, max_size)
    }

    /// Serialize the table to CSV in the canonical
    /// `name, type, subtype, offset, size, flags` form.
    pub fn to_csv(&self) -> Result<String, Error> {
        super::csv::write_csv(self)
    }

    /// The entries, sorted by offset.
    pub fn entries(&self) -> &[PartitionEntry] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PartitionEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The first free address past the last partition, or the first-partition
    /// offset for an empty table.
    pub fn next_free_offset(&self) -> u32 {
        self.entries
            .last()
            .map_or(self.layout.first_part_offset, PartitionEntry::end)
    }

    /// Find a partition by label.
    pub fn by_name(&self, name: &str) -> Result<&PartitionEntry, Error> {
        self.entries
            .iter()
            .find(|p| p.name() == name)
            .ok_or_else(|| Error::PartitionNotFound {
                name: name.to_string(),
                table: self.render(),
            })
    }

    /// Find the first partition with the given subtype name (eg. "ota" for
    /// the otadata partition, "fat" for a filesystem partition).
    pub fn by_subtype(&self, subtype_name: &str) -> Result<&PartitionEntry, Error> {
        self.entries
            .iter()
            .find(|p| p.subtype_name() == subtype_name)
            .ok_or_else(|| Error::PartitionNotFound {
                name: subtype_name.to_string(),
                table: self.render(),
            })
    }

    /// The first application partition ("factory" or "ota_0"): the partition
    /// the bootloader boots from.
    pub fn app_part(&self) -> Result<&PartitionEntry, Error> {
        self.entries
            .iter()
            .find(|p| matches!(p.subtype_name().as_str(), "factory" | "ota_0"))
            .ok_or_else(|| self.inconsistent("no \"factory\" or \"ota_0\" partition found"))
    }

    /// Add a partition to the table.
    ///
    /// An `offset` of 0 places the partition at the first free address past
    /// the current last entry; a `size` of 0 fills the remaining flash. Fails
    /// if the name is already taken or the partition does not fit. Does not
    /// run [`PartitionTable::check`]; callers validate once they are done.
    pub fn add_part(
        &mut self,
        name: &str,
        subtype_name: &str,
        size: u32,
        offset: u32,
        flags: u32,
    ) -> Result<(), Error> {
        if self.entries.iter().any(|p| p.name() == name) {
            return Err(self.inconsistent(&format!("partition name \"{name}\" is repeated")));
        }
        let (ty, subtype) = subtype_by_name(subtype_name)
            .ok_or_else(|| Error::UnknownSubtype(subtype_name.to_string()))?;
        let offset = if offset != 0 {
            offset
        } else {
            self.next_free_offset()
        };
        let size = if size != 0 {
            size
        } else {
            self.max_size.saturating_sub(offset)
        };
        let no_room = Error::NoRoom {
            name: name.to_string(),
            size,
        };
        if size == 0 {
            return Err(no_room);
        }
        match offset.checked_add(size) {
            Some(end) if end <= self.max_size => {}
            _ => return Err(no_room),
        }
        self.entries
            .push(PartitionEntry::new(name, ty, subtype, offset, size, flags));
        self.entries.sort_by_key(|p| p.offset);
        Ok(())
    }

    /// Remove the partition named `name` and return it.
    pub fn remove(&mut self, name: &str) -> Result<PartitionEntry, Error> {
        match self.entries.iter().position(|p| p.name() == name) {
            Some(i) => Ok(self.entries.remove(i)),
            None => Err(Error::PartitionNotFound {
                name: name.to_string(),
                table: self.render(),
            }),
        }
    }

    /// Resize the partition named `name`, shifting any following partitions
    /// forward to make room. Returns the actual new size.
    ///
    /// A `new_size` of 0 expands the partition to fill the space up to the
    /// next partition (or the end of flash). The adjustment is a one-pass
    /// forward cascade: partitions after the resized one are shifted up when
    /// the previous entry now ends past their offset, and a shifted partition
    /// that would run past the end of flash is shrunk to end exactly at
    /// `max_size`. Partitions before the resized one are never moved, and no
    /// consistency check is run here; call [`PartitionTable::check`] after.
    pub fn resize_part(&mut self, name: &str, new_size: u32) -> Result<u32, Error> {
        let i = self
            .entries
            .iter()
            .position(|p| p.name() == name)
            .ok_or_else(|| Error::PartitionNotFound {
                name: name.to_string(),
                table: self.render(),
            })?;
        let new_size = if new_size != 0 {
            new_size
        } else {
            // Expand to fill the available space.
            let upper = self
                .entries
                .get(i + 1)
                .map_or(self.max_size, |p| p.offset);
            upper.saturating_sub(self.entries[i].offset)
        };
        self.entries[i] = self.entries[i].with_size(new_size);
        log::info!("Resizing {name} partition to {new_size:#x} bytes.");
        for j in i + 1..self.entries.len() {
            let prev_end = self.entries[j - 1].end();
            if prev_end > self.entries[j].offset {
                // Shift this partition up to make room.
                self.entries[j] = self.entries[j].with_offset(prev_end);
            }
            if self.entries[j].end() > self.max_size {
                // Shrink it if it would overflow the flash storage.
                let fitted = self.max_size.saturating_sub(self.entries[j].offset);
                self.entries[j] = self.entries[j].with_size(fitted);
            }
        }
        Ok(new_size)
    }

    /// Re-declare the flash size, stretching or shrinking the last partition
    /// so the table ends exactly at the new size.
    pub fn resize_flash(&mut self, new_size: u32) -> Result<(), Error> {
        self.max_size = new_size;
        self.entries.sort_by_key(|p| p.offset);
        if let Some(last) = self.entries.last() {
            let size = new_size
                .checked_sub(last.offset)
                .filter(|&s| s != 0)
                .ok_or_else(|| Error::NoRoom {
                    name: last.name(),
                    size: last.size,
                })?;
            let i = self.entries.len() - 1;
            self.entries[i] = self.entries[i].with_size(size);
            self.check()?;
        }
        Ok(())
    }

    /// Check the table for consistency. Returns the first hard violation;
    /// soft conditions (gaps, flash shortfall, a relocated boot partition)
    /// are logged as warnings and do not abort.
    pub fn check(&self) -> Result<(), Error> {
        let mut names: HashSet<String> = HashSet::new();
        let mut prev_end = self.layout.first_part_offset;
        for p in &self.entries {
            let name = p.name();
            if !names.insert(name.clone()) {
                return Err(self.inconsistent(&format!("partition name \"{name}\" is repeated")));
            }
            if p.offset < prev_end {
                return Err(self.inconsistent(&format!(
                    "partition \"{name}\" overlaps with previous partition"
                )));
            }
            if p.offset > prev_end {
                log::warn!("Gap before partition \"{name}\".");
            }
            if p.offset % BLOCK_SIZE != 0 {
                return Err(self.inconsistent(&format!(
                    "partition offset {:#x} is not a multiple of 0x1000",
                    p.offset
                )));
            }
            if p.size % BLOCK_SIZE != 0 {
                return Err(self.inconsistent(&format!(
                    "partition size {:#x} is not a multiple of 0x1000",
                    p.size
                )));
            }
            if p.is_app() && p.offset % 0x10000 != 0 {
                return Err(self.inconsistent(&format!(
                    "app partition offset {:#x} is not a multiple of 0x10000",
                    p.offset
                )));
            }
            prev_end = p.end();
        }
        if prev_end > self.max_size {
            return Err(self.inconsistent(&format!(
                "end of last partition ({prev_end:#x}) is greater than flash size ({:#x})",
                self.max_size
            )));
        }
        if prev_end < self.max_size {
            log::warn!(
                "End of last partition ({prev_end:#x}) < flash size ({:#x}).",
                self.max_size
            );
        }
        let app = self.app_part()?;
        if app.offset != self.layout.app_part_offset {
            log::warn!(
                "App partition at offset {:#x} (expected {:#x}).",
                app.offset,
                self.layout.app_part_offset
            );
        }
        if self.app_size != 0 && app.size < self.app_size {
            return Err(self.inconsistent(&format!(
                "app partition \"{}\" is too small for app image ({:#x} bytes)",
                app.name(),
                self.app_size
            )));
        }
        Ok(())
    }

    /// Render the table in the canonical human-readable form, used for
    /// printing and for the snapshot attached to table errors.
    pub fn render(&self) -> String {
        let mut out = String::from(
            "# Name             Type     SubType      Offset       Size      (End)  Flags\n",
        );
        for p in &self.entries {
            let size_str = if p.size < MB / 2 {
                format!("({:.1} kB)", p.size as f64 / KB as f64)
            } else {
                format!("({:.1} MB)", p.size as f64 / MB as f64)
            };
            out.push_str(&format!(
                "  {:16} {:8} {:8} {:#10x} {:#10x} {:#10x} {:#4x} {:>10}\n",
                p.name(),
                p.type_name(),
                p.subtype_name(),
                p.offset,
                p.size,
                p.end(),
                p.flags,
                size_str
            ));
        }
        out
    }

    fn inconsistent(&self, msg: &str) -> Error {
        Error::Inconsistent {
            msg: msg.to_string(),
            table: self.render(),
        }
    }
}

impl fmt::Display for PartitionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl<'a> IntoIterator for &'a PartitionTable {
    type Item = &'a PartitionEntry;
    type IntoIter = std::slice::Iter<'a, PartitionEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
