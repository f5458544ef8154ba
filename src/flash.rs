use std::fs::{
    File,
    OpenOptions,
};
use std::io::{
    Read,
    Seek,
    SeekFrom,
    Write,
};
use std::path::Path;

use crate::error::Error;

/// Byte-addressable flash storage.
///
/// Offsets are absolute byte offsets into the flash address space. Every
/// operation is a single blocking call with a definite result: a short write
/// is an error, never a partial success to be retried by the caller.
pub trait Flash {
    /// Read `len` bytes starting at `offset`.
    fn read(&mut self, offset: u32, len: usize) -> Result<Vec<u8>, Error>;

    /// Write `data` at `offset`, returning the number of bytes written
    /// (always `data.len()`; anything less is reported as an error).
    fn write(&mut self, offset: u32, data: &[u8]) -> Result<usize, Error>;

    /// Erase `len` bytes starting at `offset` (reset to `0xFF`).
    fn erase(&mut self, offset: u32, len: usize) -> Result<(), Error>;
}

/// Flash storage backed by a firmware image file.
///
/// Firmware files start at the bootloader, so flash offset `base` maps to
/// file position 0. Reads past the end of the file fill with `0xFF`: a
/// truncated image reads the same as flash that was never written.
#[derive(Debug)]
pub struct FileFlash {
    file: File,
    base: u32,
}

impl FileFlash {
    /// Open a firmware image file for reading and writing. `base` is the
    /// flash offset of the start of the file (the bootloader offset).
    pub fn open<P: AsRef<Path>>(path: P, base: u32) -> Result<Self, Error> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self { file, base })
    }

    fn position(&self, offset: u32) -> Result<u64, Error> {
        offset
            .checked_sub(self.base)
            .map(u64::from)
            .ok_or(Error::OffsetBeforeImage {
                offset,
                base: self.base,
            })
    }
}

impl Flash for FileFlash {
    fn read(&mut self, offset: u32, len: usize) -> Result<Vec<u8>, Error> {
        self.file.seek(SeekFrom::Start(self.position(offset)?))?;
        let mut data = vec![0xFF_u8; len];
        let mut filled = 0;
        while filled < len {
            let n = self.file.read(&mut data[filled..])?;
            if n == 0 {
                break; // Past EOF: the rest reads as erased flash
            }
            filled += n;
        }
        Ok(data)
    }

    fn write(&mut self, offset: u32, data: &[u8]) -> Result<usize, Error> {
        self.file.seek(SeekFrom::Start(self.position(offset)?))?;
        self.file.write_all(data)?;
        Ok(data.len())
    }

    fn erase(&mut self, offset: u32, len: usize) -> Result<(), Error> {
        let blank = vec![0xFF_u8; len];
        self.write(offset, &blank)?;
        Ok(())
    }
}
