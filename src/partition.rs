pub mod consts;

pub(crate) mod csv;
pub(crate) mod table;

pub use consts::FlashLayout;
pub use table::PartitionTable;

use consts::{
    subtype_name,
    type_name,
    LABEL_LEN,
    PART_LEN,
    PART_MAGIC,
};

/// One entry of the partition table: a named region of the flash address
/// space with a fixed 32-byte binary encoding.
///
/// Entries are immutable values. Table operations that "modify" an entry
/// (resizing, shifting) replace it with a copy built by [`with_offset`] or
/// [`with_size`], so entries can be shared by value freely.
///
/// [`with_offset`]: PartitionEntry::with_offset
/// [`with_size`]: PartitionEntry::with_size
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionEntry {
    /// Partition type: 0 = app, 1 = data. Other values are preserved as-is.
    pub ty: u8,
    /// Partition subtype; meaning depends on `ty`.
    pub subtype: u8,
    /// Byte offset of the partition in flash. Multiple of 0x1000.
    pub offset: u32,
    /// Byte length of the partition. Multiple of 0x1000.
    pub size: u32,
    /// Raw 16-byte NUL-padded label. Kept verbatim for byte-exact round trips.
    label: [u8; LABEL_LEN],
    /// Partition flags bitfield; opaque to this tool.
    pub flags: u32,
}

impl PartitionEntry {
    /// Create a new entry. The label is truncated to 16 bytes and NUL-padded.
    pub fn new(name: &str, ty: u8, subtype: u8, offset: u32, size: u32, flags: u32) -> Self {
        let mut label = [0u8; LABEL_LEN];
        let bytes = name.as_bytes();
        let n = bytes.len().min(LABEL_LEN);
        label[..n].copy_from_slice(&bytes[..n]);
        Self {
            ty,
            subtype,
            offset,
            size,
            label,
            flags,
        }
    }

    /// Decode one 32-byte partition record, or `None` if the magic bytes do
    /// not match (which marks the end of the entries in a table).
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < PART_LEN || data[0..2] != PART_MAGIC {
            return None;
        }
        let mut label = [0u8; LABEL_LEN];
        label.copy_from_slice(&data[12..28]);
        Some(Self {
            ty: data[2],
            subtype: data[3],
            offset: read_u32(data, 4),
            size: read_u32(data, 8),
            label,
            flags: read_u32(data, 28),
        })
    }

    /// Encode this entry as a 32-byte partition record. Exact inverse of
    /// [`PartitionEntry::from_bytes`].
    pub fn to_bytes(&self) -> [u8; PART_LEN] {
        let mut data = [0u8; PART_LEN];
        data[0..2].copy_from_slice(&PART_MAGIC);
        data[2] = self.ty;
        data[3] = self.subtype;
        data[4..8].copy_from_slice(&self.offset.to_le_bytes());
        data[8..12].copy_from_slice(&self.size.to_le_bytes());
        data[12..28].copy_from_slice(&self.label);
        data[28..32].copy_from_slice(&self.flags.to_le_bytes());
        data
    }

    /// The partition label with trailing NUL padding removed.
    pub fn name(&self) -> String {
        let end = self
            .label
            .iter()
            .rposition(|&b| b != 0)
            .map_or(0, |i| i + 1);
        String::from_utf8_lossy(&self.label[..end]).into_owned()
    }

    /// The partition type name, or the numeric value for unknown types.
    pub fn type_name(&self) -> String {
        type_name(self.ty).map_or_else(|| self.ty.to_string(), str::to_string)
    }

    /// The partition subtype name, or the numeric value for unknown subtypes.
    pub fn subtype_name(&self) -> String {
        subtype_name(self.ty, self.subtype).map_or_else(|| self.subtype.to_string(), str::to_string)
    }

    /// First byte past the end of the partition.
    pub fn end(&self) -> u32 {
        self.offset + self.size
    }

    /// Copy of this entry at a different offset.
    pub fn with_offset(&self, offset: u32) -> Self {
        Self {
            offset,
            ..self.clone()
        }
    }

    /// Copy of this entry with a different size.
    pub fn with_size(&self, size: u32) -> Self {
        Self {
            size,
            ..self.clone()
        }
    }

    /// True for application partitions ("factory" or an "ota_N" slot).
    pub fn is_app(&self) -> bool {
        self.ty == consts::TYPE_APP
    }

    /// The OTA slot index for "ota_N" app partitions, `None` otherwise.
    pub fn ota_slot(&self) -> Option<u8> {
        let range = consts::SUBTYPE_OTA_BASE..consts::SUBTYPE_OTA_BASE + consts::NUM_OTA_SLOTS;
        (self.is_app() && range.contains(&self.subtype))
            .then(|| self.subtype - consts::SUBTYPE_OTA_BASE)
    }
}

pub(crate) fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(data[offset..offset + 4].try_into().unwrap())
}

pub(crate) fn read_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes(data[offset..offset + 2].try_into().unwrap())
}
