use std::fs;
use std::path::Path;

use crate::error::Error;
use crate::flash::{
    FileFlash,
    Flash,
};
use crate::image::{
    ImageHeader,
    IMAGE_HEADER_SIZE,
};
use crate::partition::consts::BLOCK_SIZE;
use crate::partition::{
    FlashLayout,
    PartitionEntry,
    PartitionTable,
};

/// An open firmware image: the storage handle plus the bootloader header and
/// partition table parsed from it.
///
/// All partition I/O goes through the [`Flash`] handle with absolute flash
/// offsets; the header and table are in-memory models that are only written
/// back explicitly ([`Firmware::update_bootloader`],
/// [`Firmware::write_table`]).
#[derive(Debug)]
pub struct Firmware<F: Flash> {
    pub flash: F,
    pub header: ImageHeader,
    pub table: PartitionTable,
}

impl Firmware<FileFlash> {
    /// Open a firmware image file. The file is expected to start at the
    /// bootloader offset, as images produced by esptool do.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let layout = FlashLayout::default();
        Self::from_flash(FileFlash::open(path, layout.bootloader_offset)?, layout)
    }
}

impl<F: Flash> Firmware<F> {
    /// Read the bootloader header and partition table from `flash`.
    ///
    /// The header's declared flash size becomes the table's `max_size`, so
    /// the table is checked against the flash the bootloader believes it is
    /// running from.
    pub fn from_flash(mut flash: F, layout: FlashLayout) -> Result<Self, Error> {
        let data = flash.read(layout.bootloader_offset, IMAGE_HEADER_SIZE)?;
        let header = ImageHeader::from_bytes(&data)?;

        let data = flash.read(layout.table_offset, layout.table_size as usize)?;
        let mut table = PartitionTable::from_bytes(&data, header.flash_size())?;
        table.layout = FlashLayout {
            app_part_offset: table.layout.app_part_offset,
            ..layout
        };

        Ok(Self {
            flash,
            header,
            table,
        })
    }

    /// Read the whole contents of a partition.
    pub fn read_part(&mut self, part: &PartitionEntry) -> Result<Vec<u8>, Error> {
        self.flash.read(part.offset, part.size as usize)
    }

    /// Write `data` at the start of a partition. The data must fit.
    pub fn write_part(&mut self, part: &PartitionEntry, data: &[u8]) -> Result<usize, Error> {
        if data.len() > part.size as usize {
            return Err(Error::NoRoom {
                name: part.name(),
                size: data.len() as u32,
            });
        }
        let written = self.flash.write(part.offset, data)?;
        if written != data.len() {
            return Err(Error::ShortWrite {
                offset: part.offset,
                expected: data.len(),
                written,
            });
        }
        Ok(written)
    }

    /// Erase the leading `len` bytes of a partition (the whole partition if
    /// `len` is `None`).
    pub fn erase_part(&mut self, part: &PartitionEntry, len: Option<usize>) -> Result<(), Error> {
        let len = len
            .unwrap_or(part.size as usize)
            .min(part.size as usize);
        self.flash.erase(part.offset, len)
    }

    /// Write `table` to the partition-table block and adopt it as this
    /// firmware's table.
    pub fn write_table(&mut self, table: PartitionTable) -> Result<(), Error> {
        let data = table.to_bytes();
        self.flash.write(table.layout.table_offset, &data)?;
        self.table = table;
        Ok(())
    }

    /// Write the current header fields into the bootloader and refresh its
    /// appended hash if it carries one.
    pub fn update_bootloader(&mut self) -> Result<(), Error> {
        let layout = self.table.layout;
        let mut data = self
            .flash
            .read(layout.bootloader_offset, layout.bootloader_size as usize)?;
        self.header.update_image(&mut data)?;
        self.flash.write(layout.bootloader_offset, &data)?;
        Ok(())
    }

    /// Check that `data` starts with a valid app image for this firmware's
    /// chip. Mismatches are logged as warnings; the caller decides whether a
    /// `false` result aborts.
    pub fn check_app_image(&self, data: &[u8], name: &str) -> bool {
        let header = match ImageHeader::from_bytes(data) {
            Ok(header) => header,
            Err(_) => return false,
        };
        if header.chip_name() == "none" {
            return false;
        }
        if header.chip_name() != self.header.chip_name() {
            log::warn!(
                "'{name}': App image chip type ({}) does not match bootloader ({}).",
                header.chip_name(),
                self.header.chip_name()
            );
            return false;
        }
        true
    }

    /// Read the first app image from the firmware and write it to `output`,
    /// trimmed of trailing erased blocks. Returns the number of bytes
    /// written.
    pub fn save_app_image<P: AsRef<Path>>(&mut self, output: P) -> Result<usize, Error> {
        let part = self.table.app_part()?.clone();
        let data = self.read_part(&part)?;
        let image = trim_blocks(&data, 16);
        fs::write(output, image)?;
        Ok(image.len())
    }
}

/// Trim trailing `0xFF` bytes from `data`, rounded up to the nearest
/// `blocksize` boundary (so partial trailing blocks survive).
pub fn trim_blocks(data: &[u8], blocksize: usize) -> &[u8] {
    let blocksize = if blocksize == 0 {
        BLOCK_SIZE as usize
    } else {
        blocksize
    };
    let n = data
        .iter()
        .rposition(|&b| b != 0xFF)
        .map_or(0, |i| i + 1);
    let end = n.div_ceil(blocksize) * blocksize;
    &data[..end.min(data.len())]
}
