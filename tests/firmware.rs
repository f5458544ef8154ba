mod common;

use common::{
    app_image,
    firmware_file,
    sample_table,
    MB,
};
use esp_image_tool::{
    trim_blocks,
    Error,
    Firmware,
    Flash,
};
use pretty_assertions::assert_eq;

#[test]
fn test_open_firmware_file() {
    let file = firmware_file(&app_image(0x00, 2, true), &sample_table(), &[]);
    let fw = Firmware::open(file.path()).unwrap();

    assert_eq!(fw.header.chip_name(), "esp32");
    assert_eq!(fw.header.flash_size(), 4 * MB);
    assert_eq!(fw.table.max_size, 4 * MB);
    assert_eq!(fw.table.len(), 4);
    assert_eq!(fw.table.app_part().unwrap().name(), "factory");
}

#[test]
fn test_read_write_partition() {
    let file = firmware_file(&app_image(0x00, 2, true), &sample_table(), &[]);
    let mut fw = Firmware::open(file.path()).unwrap();

    let nvs = fw.table.by_name("nvs").unwrap().clone();
    let payload = vec![0x5A_u8; 0x2000];
    assert_eq!(fw.write_part(&nvs, &payload).unwrap(), payload.len());

    let data = fw.read_part(&nvs).unwrap();
    assert_eq!(data.len(), nvs.size as usize);
    assert_eq!(&data[..payload.len()], &payload[..]);
    // The unwritten remainder reads as erased flash.
    assert!(data[payload.len()..].iter().all(|&b| b == 0xFF));
}

#[test]
fn test_write_part_rejects_oversized_data() {
    let file = firmware_file(&app_image(0x00, 2, true), &sample_table(), &[]);
    let mut fw = Firmware::open(file.path()).unwrap();

    let phy = fw.table.by_name("phy_init").unwrap().clone();
    let too_big = vec![0u8; phy.size as usize + 1];
    let err = fw.write_part(&phy, &too_big).unwrap_err();
    assert!(matches!(err, Error::NoRoom { .. }));
}

#[test]
fn test_erase_partition() {
    let file = firmware_file(&app_image(0x00, 2, true), &sample_table(), &[]);
    let mut fw = Firmware::open(file.path()).unwrap();

    let nvs = fw.table.by_name("nvs").unwrap().clone();
    fw.write_part(&nvs, &[0x11; 0x1000]).unwrap();
    fw.erase_part(&nvs, None).unwrap();
    assert!(fw.read_part(&nvs).unwrap().iter().all(|&b| b == 0xFF));
}

#[test]
fn test_resize_and_write_table_persists() {
    let file = firmware_file(&app_image(0x00, 2, true), &sample_table(), &[]);
    let mut fw = Firmware::open(file.path()).unwrap();

    let mut table = fw.table.clone();
    table.resize_part("vfs", 0x100000).unwrap();
    table.check().unwrap();
    fw.write_table(table).unwrap();
    drop(fw);

    let fw = Firmware::open(file.path()).unwrap();
    assert_eq!(fw.table.by_name("vfs").unwrap().size, 0x100000);
}

#[test]
fn test_update_bootloader_after_flash_resize() {
    let file = firmware_file(&app_image(0x00, 2, true), &sample_table(), &[]);
    let mut fw = Firmware::open(file.path()).unwrap();

    fw.header.set_flash_size(8 * MB).unwrap();
    assert!(fw.header.is_modified());
    let mut table = fw.table.clone();
    table.resize_flash(8 * MB).unwrap();
    fw.update_bootloader().unwrap();
    fw.write_table(table).unwrap();
    drop(fw);

    // The reopened image reflects the new flash size, and the bootloader's
    // appended hash was refreshed to match the edited header.
    let mut fw = Firmware::open(file.path()).unwrap();
    assert_eq!(fw.header.flash_size(), 8 * MB);
    assert_eq!(fw.table.max_size, 8 * MB);
    assert_eq!(fw.table.by_name("vfs").unwrap().end(), 8 * MB);

    let bootloader = fw
        .flash
        .read(0x1000, fw.table.layout.bootloader_size as usize)
        .unwrap();
    let (_, computed, stored) = fw.header.check_image_hash(&bootloader).unwrap();
    assert_eq!(computed, stored);
}

#[test]
fn test_save_app_image() {
    let app = app_image(0x00, 2, true);
    let table = sample_table();
    let factory_offset = table.by_name("factory").unwrap().offset;
    let file = firmware_file(
        &app_image(0x00, 2, true),
        &table,
        &[(factory_offset, app.clone())],
    );
    let mut fw = Firmware::open(file.path()).unwrap();

    let out = tempfile::NamedTempFile::new().unwrap();
    let n = fw.save_app_image(out.path()).unwrap();
    assert_eq!(n, app.len());
    assert_eq!(std::fs::read(out.path()).unwrap(), app);
}

#[test]
fn test_check_app_image() {
    let file = firmware_file(&app_image(0x00, 2, true), &sample_table(), &[]);
    let fw = Firmware::open(file.path()).unwrap();

    assert!(fw.check_app_image(&app_image(0x00, 2, true), "app"));
    // Wrong chip type for this bootloader.
    assert!(!fw.check_app_image(&app_image(0x09, 2, true), "app"));
    // Not an image at all.
    assert!(!fw.check_app_image(&[0u8; 64], "app"));
}

#[test]
fn test_trim_blocks() {
    let mut data = vec![0x42_u8; 20];
    data.extend_from_slice(&[0xFF; 44]);

    // 20 bytes of payload round up to the next 16-byte boundary.
    assert_eq!(trim_blocks(&data, 16).len(), 32);
    // All-erased data trims to nothing.
    assert_eq!(trim_blocks(&[0xFF; 64], 16).len(), 0);
    // Data ending mid-block keeps its partial block.
    assert_eq!(trim_blocks(&[0x01; 10], 16), &[0x01; 10][..]);
}
