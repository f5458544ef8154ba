use sha2::{
    Digest,
    Sha256,
};

use crate::crc::crc32;
use crate::error::Error;
use crate::partition::read_u16;
use crate::partition::read_u32;

/// Size of the fixed image header at the start of every app or bootloader
/// image.
pub const IMAGE_HEADER_SIZE: usize = 24;

/// Magic byte at the start of every image header.
pub const IMAGE_MAGIC: u8 = 0xE9;

/// Length of the SHA-256 digest optionally appended to an image.
pub const IMAGE_HASH_SIZE: usize = 32;

const MB: u64 = 1024 * 1024;

// Map from chip ids in the image header to chip names.
const CHIP_IDS: &[(u16, &str)] = &[
    (0x00, "esp32"),
    (0x02, "esp32s2"),
    (0x05, "esp32c3"),
    (0x09, "esp32s3"),
    (0x0C, "esp32c2"),
    (0x0D, "esp32c6"),
    (0x10, "esp32h2"),
    (0x12, "esp32p4"),
    (0xFFFF, "none"),
];

/// The fixed 24-byte header of a firmware or bootloader image.
///
/// See the esptool "firmware image format" documentation for the field
/// layout. The flash frequency and size class share one byte: frequency in
/// the low nibble, `log2(size in MB)` in the high nibble.
///
/// A CRC32 snapshot of the header bytes is taken at parse time so that later
/// mutation (eg. [`ImageHeader::set_flash_size`]) can be detected with
/// [`ImageHeader::is_modified`] and the stored image hash refreshed with
/// [`ImageHeader::update_image`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageHeader {
    /// Number of segments following the header.
    pub num_segments: u8,
    /// SPI flash mode (qio/qout/dio/dout).
    pub flash_mode: u8,
    /// Flash frequency id (low nibble of the shared byte).
    pub flash_freq_id: u8,
    /// Flash size class: `log2(size in MB)` (high nibble of the shared byte).
    pub flash_size_id: u8,
    /// Entry point address.
    pub entry_point: u32,
    /// SPI pin drive settings.
    pub spi_rom_pins: [u8; 4],
    /// Chip id identifying the target microcontroller.
    pub chip_id: u16,
    /// Deprecated minimum chip revision (old single-byte encoding).
    pub deprecated: u8,
    /// Minimum supported chip revision (major * 100 + minor).
    pub min_chip_revision: u16,
    /// Maximum supported chip revision (major * 100 + minor).
    pub max_chip_revision: u16,
    reserved: [u8; 4],
    /// 1 if a SHA-256 digest of the whole image follows the checksum byte.
    pub hash_appended: u8,
    initial_crc: u32,
}

impl ImageHeader {
    /// Parse an image header from the first 24 bytes of `data` and record the
    /// baseline checksum used by [`ImageHeader::is_modified`].
    pub fn from_bytes(data: &[u8]) -> Result<Self, Error> {
        if data.len() < IMAGE_HEADER_SIZE {
            return Err(Error::InvalidImage(format!(
                "image header requires {IMAGE_HEADER_SIZE} bytes, got {}",
                data.len()
            )));
        }
        if data[0] != IMAGE_MAGIC {
            return Err(Error::InvalidImageMagic(data[0]));
        }
        let chip_id = read_u16(data, 12);
        if chip_name_of(chip_id).is_none() {
            return Err(Error::UnknownChipId(chip_id));
        }
        Ok(Self {
            num_segments: data[1],
            flash_mode: data[2],
            flash_freq_id: data[3] & 0x0F,
            flash_size_id: data[3] >> 4,
            entry_point: read_u32(data, 4),
            spi_rom_pins: data[8..12].try_into().unwrap(),
            chip_id,
            deprecated: data[14],
            min_chip_revision: read_u16(data, 15),
            max_chip_revision: read_u16(data, 17),
            reserved: data[19..23].try_into().unwrap(),
            hash_appended: data[23],
            initial_crc: crc32(0, &data[..IMAGE_HEADER_SIZE]),
        })
    }

    /// Encode the header as its 24-byte wire form.
    pub fn to_bytes(&self) -> [u8; IMAGE_HEADER_SIZE] {
        let mut data = [0u8; IMAGE_HEADER_SIZE];
        data[0] = IMAGE_MAGIC;
        data[1] = self.num_segments;
        data[2] = self.flash_mode;
        data[3] = (self.flash_size_id << 4) | (self.flash_freq_id & 0x0F);
        data[4..8].copy_from_slice(&self.entry_point.to_le_bytes());
        data[8..12].copy_from_slice(&self.spi_rom_pins);
        data[12..14].copy_from_slice(&self.chip_id.to_le_bytes());
        data[14] = self.deprecated;
        data[15..17].copy_from_slice(&self.min_chip_revision.to_le_bytes());
        data[17..19].copy_from_slice(&self.max_chip_revision.to_le_bytes());
        data[19..23].copy_from_slice(&self.reserved);
        data[23] = self.hash_appended;
        data
    }

    /// The chip name for this header's chip id.
    pub fn chip_name(&self) -> &'static str {
        chip_name_of(self.chip_id).expect("chip id validated at parse")
    }

    /// The flash size in bytes, decoded from the size class nibble.
    pub fn flash_size(&self) -> u32 {
        u32::try_from(MB << self.flash_size_id).unwrap_or(u32::MAX)
    }

    /// Set the flash size field. `flash_size` must be a power-of-two number
    /// of megabytes between 1MB and 128MB (the range the 4-bit `log2`
    /// encoding can represent).
    pub fn set_flash_size(&mut self, flash_size: u32) -> Result<(), Error> {
        let size = flash_size as u64;
        if size < MB || size > 128 * MB || !size.is_power_of_two() {
            return Err(Error::InvalidFlashSize(size));
        }
        self.flash_size_id = (size / MB).trailing_zeros() as u8;
        Ok(())
    }

    /// True if the header fields no longer match the bytes parsed.
    pub fn is_modified(&self) -> bool {
        crc32(0, &self.to_bytes()) != self.initial_crc
    }

    /// Return the byte length of the image in `data` covered by the integrity
    /// hash: the header, every segment, the checksum byte, rounded up to a
    /// 16-byte boundary.
    ///
    /// Each segment is an 8-byte descriptor (load address, then length at
    /// offset 4) followed by `length` bytes of payload.
    pub fn image_size(&self, data: &[u8]) -> Result<usize, Error> {
        let mut n = IMAGE_HEADER_SIZE;
        for _ in 0..self.num_segments {
            if n + 8 > data.len() {
                return Err(Error::InvalidImage(format!(
                    "segment descriptor at {n:#x} exceeds image size ({} bytes)",
                    data.len()
                )));
            }
            let segment_size = read_u32(data, n + 4) as usize;
            n += segment_size + 8;
            if n >= data.len() {
                return Err(Error::InvalidImage(format!(
                    "segment size ({segment_size} bytes) exceeds image size ({} bytes)",
                    data.len()
                )));
            }
        }
        n += 1; // Allow for the checksum byte
        n = (n + 0xF) & !0xF; // Round up to a multiple of 16 bytes
        Ok(n)
    }

    /// Compute the hashed image length and the SHA-256 digest over it.
    pub fn image_size_and_hash(&self, data: &[u8]) -> Result<(usize, [u8; IMAGE_HASH_SIZE]), Error> {
        let n = self.image_size(data)?;
        if n > data.len() {
            return Err(Error::InvalidImage(format!(
                "hashed image length ({n:#x}) exceeds image size ({} bytes)",
                data.len()
            )));
        }
        Ok((n, Sha256::digest(&data[..n]).into()))
    }

    /// Compute the image hash and read the digest stored after the hashed
    /// region. Returns `(hashed_length, computed, stored)`; comparing the two
    /// digests is left to the caller.
    pub fn check_image_hash(
        &self,
        data: &[u8],
    ) -> Result<(usize, [u8; IMAGE_HASH_SIZE], [u8; IMAGE_HASH_SIZE]), Error> {
        let (n, computed) = self.image_size_and_hash(data)?;
        if n + IMAGE_HASH_SIZE > data.len() {
            return Err(Error::InvalidImage(format!(
                "image too short for stored hash at {n:#x}"
            )));
        }
        let stored: [u8; IMAGE_HASH_SIZE] = data[n..n + IMAGE_HASH_SIZE].try_into().unwrap();
        Ok((n, computed, stored))
    }

    /// Write the current header fields into the start of `data` and, if the
    /// image carries an appended hash, recompute and store the digest.
    ///
    /// Returns the offset the digest was written at (0 if the image has no
    /// appended hash), so callers can write back just the header and digest
    /// blocks instead of the whole image.
    pub fn update_image(&self, data: &mut [u8]) -> Result<usize, Error> {
        if data.len() < IMAGE_HEADER_SIZE {
            return Err(Error::InvalidImage(format!(
                "image is shorter than its header ({} bytes)",
                data.len()
            )));
        }
        data[..IMAGE_HEADER_SIZE].copy_from_slice(&self.to_bytes());
        if self.hash_appended != 1 {
            return Ok(0);
        }
        let (n, digest) = self.image_size_and_hash(data)?;
        if n + IMAGE_HASH_SIZE > data.len() {
            return Err(Error::InvalidImage(format!(
                "image too short for stored hash at {n:#x}"
            )));
        }
        data[n..n + IMAGE_HASH_SIZE].copy_from_slice(&digest);
        Ok(n)
    }
}

fn chip_name_of(chip_id: u16) -> Option<&'static str> {
    CHIP_IDS
        .iter()
        .find(|(id, _)| *id == chip_id)
        .map(|(_, name)| *name)
}
