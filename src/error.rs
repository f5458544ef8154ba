use thiserror::Error;

/// Errors that can occur while parsing, checking or rewriting firmware
/// images, partition tables and OTA records.
///
/// Partition-table errors that are raised against a concrete table carry a
/// rendered snapshot of that table so callers can show the offending layout
/// without holding a reference to it.
#[derive(Error, Debug)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("no partition table found")]
    NoTable,

    #[error("partition table checksum mismatch: expected {expected}, computed {computed}")]
    ChecksumMismatch { expected: String, computed: String },

    #[error("partition table does not end with an empty row")]
    NoEndMarker,

    #[error("invalid partition table: {msg}\n{table}")]
    Inconsistent { msg: String, table: String },

    #[error("partition '{name}' not found\n{table}")]
    PartitionNotFound { name: String, table: String },

    #[error("no room on flash for partition '{name}' ({size:#x} bytes)")]
    NoRoom { name: String, size: u32 },

    #[error("unknown partition subtype '{0}'")]
    UnknownSubtype(String),

    #[error("invalid size '{0}'")]
    InvalidSizeArg(String),

    #[error("invalid image file: expected magic 0xe9, found {0:#04x}")]
    InvalidImageMagic(u8),

    #[error("unknown chip id {0:#06x} in image header")]
    UnknownChipId(u16),

    #[error("invalid flash size {0:#x}: must be a power of two between 1MB and 128MB")]
    InvalidFlashSize(u64),

    #[error("invalid image: {0}")]
    InvalidImage(String),

    #[error("require at least 2 OTA app partitions: 'ota_0' and 'ota_1'")]
    TooFewOtaParts,

    #[error("OTA app partition subtypes must be sequential, starting from 'ota_0'")]
    NonSequentialOtaParts,

    #[error("partition '{0}' is not one of the OTA app partitions")]
    NotOtaPartition(String),

    #[error("short write at {offset:#x}: wrote {written} of {expected} bytes")]
    ShortWrite {
        offset: u32,
        expected: usize,
        written: usize,
    },

    #[error("read below the start of the firmware file ({offset:#x} < {base:#x})")]
    OffsetBeforeImage { offset: u32, base: u32 },
}
