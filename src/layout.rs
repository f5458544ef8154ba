//! Builders for standard partition table layouts.

use crate::error::Error;
use crate::partition::consts::MB;
use crate::partition::PartitionTable;

// Recommended size for OTA app partitions (depends on flash size). These
// match the OTA partition sizes in MicroPython's partition-*-ota.csv files.
const OTA_PART_SIZES: [(u32, u32); 3] = [
    (8 * MB, 0x270_000), // if flash size > 8MB
    (4 * MB, 0x200_000), // else if flash size > 4MB
    (0, 0x180_000),      // else
];

/// The recommended OTA app partition size (in bytes) for a flash of
/// `flash_size` bytes.
pub fn ota_part_size(flash_size: u32) -> u32 {
    OTA_PART_SIZES
        .iter()
        .find(|&&(fsize, _)| flash_size > fsize)
        .map(|&(_, part_size)| part_size)
        .unwrap_or(0x180_000)
}

/// Build the default (non-OTA) partition table for a flash of `max_size`
/// bytes: nvs, phy_init, a factory app partition and a filesystem partition
/// filling the remaining flash.
pub fn default_table(max_size: u32) -> Result<PartitionTable, Error> {
    let mut table = PartitionTable::new(max_size);
    table.add_part("nvs", "nvs", 0x6000, 0, 0)?;
    table.add_part("phy_init", "phy", 0x1000, 0, 0)?;
    table.add_part("factory", "factory", 0x1F0000, 0, 0)?;
    table.add_part("vfs", "fat", 0, 0, 0)?;
    table.check()?;
    Ok(table)
}

/// Build an OTA-enabled partition table with the same flash size and layout
/// as `template`: nvs, otadata, two OTA app slots of `app_part_size` bytes
/// (the recommended size for the flash when 0), and a filesystem partition
/// filling the remaining flash.
pub fn ota_table(template: &PartitionTable, app_part_size: u32) -> Result<PartitionTable, Error> {
    let mut table = PartitionTable::new(template.max_size);
    table.layout = template.layout;
    table.app_size = template.app_size;

    let app_part_size = if app_part_size != 0 {
        app_part_size
    } else {
        ota_part_size(table.max_size)
    };
    // The nvs partition fills the gap between the first-partition offset and
    // the otadata partition, which backs onto the first app slot.
    let nvs_size = table.layout.app_part_offset
        - table.layout.first_part_offset
        - table.layout.otadata_size;

    table.add_part("nvs", "nvs", nvs_size, 0, 0)?;
    table.add_part("otadata", "ota", table.layout.otadata_size, 0, 0)?;
    table.add_part("ota_0", "ota_0", app_part_size, 0, 0)?;
    table.add_part("ota_1", "ota_1", app_part_size, 0, 0)?;
    table.add_part("vfs", "fat", 0, 0, 0)?;
    table.check()?;
    Ok(table)
}
