mod common;

use common::app_image;
use esp_image_tool::{
    Error,
    ImageHeader,
};
use pretty_assertions::assert_eq;

const MB: u32 = 0x100_000;

#[test]
fn test_parse_header() {
    let image = app_image(0x00, 2, true);
    let header = ImageHeader::from_bytes(&image).unwrap();
    assert_eq!(header.chip_name(), "esp32");
    assert_eq!(header.num_segments, 1);
    assert_eq!(header.flash_size(), 4 * MB);
    assert_eq!(header.flash_freq_id, 0x0F);
    assert_eq!(header.entry_point, 0x4008_0000);
    assert_eq!(header.hash_appended, 1);
    assert!(!header.is_modified());
}

#[test]
fn test_header_roundtrip() {
    let image = app_image(0x09, 3, false);
    let header = ImageHeader::from_bytes(&image).unwrap();
    assert_eq!(header.chip_name(), "esp32s3");
    assert_eq!(header.to_bytes()[..], image[..24]);
}

#[test]
fn test_rejects_bad_magic() {
    let mut image = app_image(0x00, 2, false);
    image[0] = 0xFF;
    let err = ImageHeader::from_bytes(&image).unwrap_err();
    assert!(matches!(err, Error::InvalidImageMagic(0xFF)));
}

#[test]
fn test_rejects_unknown_chip_id() {
    let mut image = app_image(0x00, 2, false);
    image[12..14].copy_from_slice(&0x7777_u16.to_le_bytes());
    let err = ImageHeader::from_bytes(&image).unwrap_err();
    assert!(matches!(err, Error::UnknownChipId(0x7777)));
}

#[test]
fn test_set_flash_size() {
    let image = app_image(0x00, 2, false);
    let mut header = ImageHeader::from_bytes(&image).unwrap();

    header.set_flash_size(8 * MB).unwrap();
    assert_eq!(header.flash_size(), 8 * MB);
    assert_eq!(header.flash_size_id, 3);
    assert!(header.is_modified());

    // The frequency nibble is untouched.
    assert_eq!(header.flash_freq_id, 0x0F);
}

#[test]
fn test_set_flash_size_rejects_unrepresentable() {
    let image = app_image(0x00, 2, false);
    let mut header = ImageHeader::from_bytes(&image).unwrap();

    assert!(header.set_flash_size(0).is_err());
    assert!(header.set_flash_size(3 * MB).is_err()); // not a power of two
    assert!(header.set_flash_size(256 * MB).is_err()); // above the 4-bit range
    assert!(header.set_flash_size(MB / 2).is_err());

    // The header is unchanged after a rejected set.
    assert_eq!(header.flash_size(), 4 * MB);
    assert!(!header.is_modified());
}

#[test]
fn test_image_size_walks_segments() {
    let image = app_image(0x00, 2, true);
    let header = ImageHeader::from_bytes(&image).unwrap();
    // 24-byte header + 8-byte descriptor + 16-byte payload + checksum byte,
    // rounded up to 16 bytes.
    assert_eq!(header.image_size(&image).unwrap(), 64);
}

#[test]
fn test_image_size_rejects_truncated_image() {
    let image = app_image(0x00, 2, false);
    let header = ImageHeader::from_bytes(&image).unwrap();
    let err = header.image_size(&image[..30]).unwrap_err();
    assert!(matches!(err, Error::InvalidImage(_)));
}

#[test]
fn test_check_image_hash_matches() {
    let image = app_image(0x00, 2, true);
    let header = ImageHeader::from_bytes(&image).unwrap();
    let (size, computed, stored) = header.check_image_hash(&image).unwrap();
    assert_eq!(size, 64);
    assert_eq!(computed, stored);
}

#[test]
fn test_check_image_hash_detects_corruption() {
    let mut image = app_image(0x00, 2, true);
    image[40] ^= 0x01; // Flip a payload byte
    let header = ImageHeader::from_bytes(&image).unwrap();
    let (_, computed, stored) = header.check_image_hash(&image).unwrap();
    assert_ne!(computed, stored);
}

#[test]
fn test_update_image_refreshes_hash() {
    let mut image = app_image(0x00, 2, true);
    let mut header = ImageHeader::from_bytes(&image).unwrap();
    let original_digest: Vec<u8> = image[64..96].to_vec();

    header.set_flash_size(16 * MB).unwrap();
    assert!(header.is_modified());

    let hash_offset = header.update_image(&mut image).unwrap();
    assert_eq!(hash_offset, 64);

    // The header bytes were rewritten and the digest changed with them.
    assert_eq!(image[3] >> 4, 4);
    assert_ne!(&image[64..96], &original_digest[..]);

    // The refreshed image verifies again.
    let reparsed = ImageHeader::from_bytes(&image).unwrap();
    let (_, computed, stored) = reparsed.check_image_hash(&image).unwrap();
    assert_eq!(computed, stored);
    assert_eq!(reparsed.flash_size(), 16 * MB);
}

#[test]
fn test_update_image_without_hash() {
    let mut image = app_image(0x00, 2, false);
    let header = ImageHeader::from_bytes(&image).unwrap();
    // No appended hash: only the header is rewritten.
    assert_eq!(header.update_image(&mut image).unwrap(), 0);
}
