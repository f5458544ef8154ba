#![allow(dead_code)]

use std::io::{
    Seek,
    SeekFrom,
    Write,
};

use esp_image_tool::PartitionTable;
use sha2::{
    Digest,
    Sha256,
};
use tempfile::NamedTempFile;

pub const MB: u32 = 0x100_000;

/// The worked example table: nvs, phy, factory app and a filesystem
/// partition on a 4MB flash.
pub fn sample_table() -> PartitionTable {
    let mut table = PartitionTable::new(4 * MB);
    table.add_part("nvs", "nvs", 0x6000, 0, 0).unwrap();
    table.add_part("phy_init", "phy", 0x1000, 0, 0).unwrap();
    table.add_part("factory", "factory", 0x1F0000, 0, 0).unwrap();
    table.add_part("vfs", "fat", 0, 0, 0).unwrap();
    table.check().unwrap();
    table
}

/// A two-slot OTA table on a 4MB flash.
pub fn ota_table() -> PartitionTable {
    let mut table = PartitionTable::new(4 * MB);
    table.add_part("nvs", "nvs", 0x5000, 0, 0).unwrap();
    table.add_part("otadata", "ota", 0x2000, 0, 0).unwrap();
    table.add_part("ota_0", "ota_0", 0x180000, 0, 0).unwrap();
    table.add_part("ota_1", "ota_1", 0x180000, 0, 0).unwrap();
    table.add_part("vfs", "fat", 0, 0, 0).unwrap();
    table.check().unwrap();
    table
}

/// Build a minimal valid app/bootloader image: a 24-byte header, one
/// 16-byte segment, the checksum byte, padding to a 16-byte boundary and
/// (optionally) the appended SHA-256 digest.
pub fn app_image(chip_id: u16, flash_size_id: u8, hash_appended: bool) -> Vec<u8> {
    let mut data = Vec::new();

    // Header
    data.push(0xE9); // magic
    data.push(1); // num_segments
    data.push(0x02); // flash_mode
    data.push((flash_size_id << 4) | 0x0F); // size/freq nibbles
    data.extend_from_slice(&0x4008_0000_u32.to_le_bytes()); // entry point
    data.extend_from_slice(&[0u8; 4]); // spi_rom_pins
    data.extend_from_slice(&chip_id.to_le_bytes());
    data.push(0); // deprecated
    data.extend_from_slice(&0u16.to_le_bytes()); // min_chip_revision
    data.extend_from_slice(&0u16.to_le_bytes()); // max_chip_revision
    data.extend_from_slice(&[0u8; 4]); // reserved
    data.push(hash_appended as u8);
    assert_eq!(data.len(), 24);

    // One segment: 8-byte descriptor + 16 bytes of payload
    data.extend_from_slice(&0x3FF0_0000_u32.to_le_bytes()); // load address
    data.extend_from_slice(&16u32.to_le_bytes()); // segment length
    data.extend_from_slice(&[0xA5; 16]);

    // Checksum byte, then pad to a 16-byte boundary (24 + 24 + 1 -> 64)
    data.push(0xEF);
    data.resize(64, 0);

    if hash_appended {
        let digest: [u8; 32] = Sha256::digest(&data).into();
        data.extend_from_slice(&digest);
    }
    data
}

/// Write a firmware image file: the bootloader image at the start (flash
/// offset 0x1000), the partition table block at flash offset 0x8000, and any
/// extra `(flash_offset, bytes)` regions. Gaps read as erased flash.
pub fn firmware_file(
    bootloader: &[u8],
    table: &PartitionTable,
    extra: &[(u32, Vec<u8>)],
) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();

    let mut write_at = |file: &mut NamedTempFile, flash_offset: u32, data: &[u8]| {
        file.as_file_mut()
            .seek(SeekFrom::Start(u64::from(flash_offset - 0x1000)))
            .unwrap();
        file.as_file_mut().write_all(data).unwrap();
    };

    // Erased-flash fill up to the end of the table block, so the regions in
    // between parse as empty rather than as zeroed garbage.
    write_at(&mut file, 0x1000, &vec![0xFF_u8; 0x8000]);
    write_at(&mut file, 0x1000, bootloader);
    write_at(&mut file, 0x8000, &table.to_bytes());
    for (offset, data) in extra {
        write_at(&mut file, *offset, data);
    }
    file.as_file_mut().flush().unwrap();
    file
}
