//! Tools for manipulating the on-flash layout of ESP32 firmware images:
//! parse, check, rewrite and resize the binary partition table, patch the
//! bootloader header (flash size and appended SHA-256 hash), and manage the
//! OTA boot-slot rotation.
//!
//! The format models ([`PartitionTable`], [`ImageHeader`], the OTA record
//! codec in [`ota`]) are pure transformations over byte buffers; all storage
//! I/O goes through the [`Flash`] trait, with [`FileFlash`] as the firmware
//! image file backend and [`Firmware`] composing the pieces.

pub mod error;
pub mod firmware;
pub mod flash;
pub mod image;
pub mod layout;
pub mod ota;
pub mod partition;

pub(crate) mod crc;

pub use error::Error;
pub use firmware::{
    trim_blocks,
    Firmware,
};
pub use flash::{
    FileFlash,
    Flash,
};
pub use image::ImageHeader;
pub use ota::{
    ota_update,
    OtaState,
    OtaUpdater,
};
pub use partition::csv::parse_size;
pub use partition::{
    FlashLayout,
    PartitionEntry,
    PartitionTable,
};
