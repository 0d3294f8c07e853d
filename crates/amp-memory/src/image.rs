//! Flat guest memory image
//!
//! The image owns its backing buffer outright. Every access is validated
//! against the buffer length and returns a recoverable error on violation;
//! there is no path to out-of-bounds reads or writes.

use amp_core::error::MemoryError;
use tracing::debug;

mod sealed {
    pub trait Sealed {}
    impl Sealed for u8 {}
    impl Sealed for u16 {}
    impl Sealed for u32 {}
    impl Sealed for u64 {}
}

/// Fixed-width unsigned values that cross the guest boundary in
/// big-endian byte order.
pub trait BeValue: sealed::Sealed + Copy {
    const SIZE: usize;

    fn from_be_slice(bytes: &[u8]) -> Self;
    fn write_be_slice(self, out: &mut [u8]);
}

impl BeValue for u8 {
    const SIZE: usize = 1;

    fn from_be_slice(bytes: &[u8]) -> Self {
        bytes[0]
    }

    fn write_be_slice(self, out: &mut [u8]) {
        out[0] = self;
    }
}

impl BeValue for u16 {
    const SIZE: usize = 2;

    fn from_be_slice(bytes: &[u8]) -> Self {
        u16::from_be_bytes([bytes[0], bytes[1]])
    }

    fn write_be_slice(self, out: &mut [u8]) {
        out.copy_from_slice(&self.to_be_bytes());
    }
}

impl BeValue for u32 {
    const SIZE: usize = 4;

    fn from_be_slice(bytes: &[u8]) -> Self {
        u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    fn write_be_slice(self, out: &mut [u8]) {
        out.copy_from_slice(&self.to_be_bytes());
    }
}

impl BeValue for u64 {
    const SIZE: usize = 8;

    fn from_be_slice(bytes: &[u8]) -> Self {
        u64::from_be_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
        ])
    }

    fn write_be_slice(self, out: &mut [u8]) {
        out.copy_from_slice(&self.to_be_bytes());
    }
}

/// Owned guest address space
pub struct MemoryImage {
    data: Vec<u8>,
}

impl MemoryImage {
    /// Create a zero-filled image of the given size
    pub fn new(size: usize) -> Self {
        debug!(size = format_args!("{size:#x}"), "allocated guest image");
        Self {
            data: vec![0u8; size],
        }
    }

    /// Image size in bytes
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Validate that `len` bytes at `addr` fall inside the image
    fn check_range(&self, addr: u32, len: usize) -> Result<usize, MemoryError> {
        let start = addr as usize;
        let end = start.checked_add(len).ok_or(MemoryError::OutOfBounds {
            addr,
            len,
            size: self.data.len(),
        })?;
        if end > self.data.len() {
            return Err(MemoryError::OutOfBounds {
                addr,
                len,
                size: self.data.len(),
            });
        }
        Ok(start)
    }

    /// Read a fixed-width value at `addr`
    pub fn read<T: BeValue>(&self, addr: u32) -> Result<T, MemoryError> {
        let start = self.check_range(addr, T::SIZE)?;
        Ok(T::from_be_slice(&self.data[start..start + T::SIZE]))
    }

    /// Write a fixed-width value at `addr`
    pub fn write<T: BeValue>(&mut self, addr: u32, value: T) -> Result<(), MemoryError> {
        let start = self.check_range(addr, T::SIZE)?;
        value.write_be_slice(&mut self.data[start..start + T::SIZE]);
        Ok(())
    }

    /// Read a big-endian u16
    pub fn read_be16(&self, addr: u32) -> Result<u16, MemoryError> {
        self.read::<u16>(addr)
    }

    /// Read a big-endian u32
    pub fn read_be32(&self, addr: u32) -> Result<u32, MemoryError> {
        self.read::<u32>(addr)
    }

    /// Read a big-endian u64
    pub fn read_be64(&self, addr: u32) -> Result<u64, MemoryError> {
        self.read::<u64>(addr)
    }

    /// Write a big-endian u16
    pub fn write_be16(&mut self, addr: u32, value: u16) -> Result<(), MemoryError> {
        self.write::<u16>(addr, value)
    }

    /// Write a big-endian u32
    pub fn write_be32(&mut self, addr: u32, value: u32) -> Result<(), MemoryError> {
        self.write::<u32>(addr, value)
    }

    /// Write a big-endian u64
    pub fn write_be64(&mut self, addr: u32, value: u64) -> Result<(), MemoryError> {
        self.write::<u64>(addr, value)
    }

    /// Borrow `len` bytes starting at `addr`
    pub fn read_bytes(&self, addr: u32, len: usize) -> Result<&[u8], MemoryError> {
        let start = self.check_range(addr, len)?;
        Ok(&self.data[start..start + len])
    }

    /// Copy `bytes` into the image starting at `addr`
    pub fn write_bytes(&mut self, addr: u32, bytes: &[u8]) -> Result<(), MemoryError> {
        let start = self.check_range(addr, bytes.len())?;
        self.data[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Zero `len` bytes starting at `addr`
    pub fn fill_zero(&mut self, addr: u32, len: usize) -> Result<(), MemoryError> {
        let start = self.check_range(addr, len)?;
        self.data[start..start + len].fill(0);
        Ok(())
    }
}

impl std::fmt::Debug for MemoryImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryImage")
            .field("size", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_creation() {
        let image = MemoryImage::new(0x1000);
        assert_eq!(image.size(), 0x1000);
        assert_eq!(image.read_be32(0).unwrap(), 0);
    }

    #[test]
    fn test_read_write_widths() {
        let mut image = MemoryImage::new(0x100);

        image.write::<u8>(0x10, 0xAB).unwrap();
        assert_eq!(image.read::<u8>(0x10).unwrap(), 0xAB);

        image.write::<u16>(0x20, 0x1234).unwrap();
        assert_eq!(image.read::<u16>(0x20).unwrap(), 0x1234);

        image.write::<u32>(0x30, 0xDEADBEEF).unwrap();
        assert_eq!(image.read::<u32>(0x30).unwrap(), 0xDEADBEEF);

        image.write::<u64>(0x40, 0x0123_4567_89AB_CDEF).unwrap();
        assert_eq!(image.read::<u64>(0x40).unwrap(), 0x0123_4567_89AB_CDEF);
    }

    #[test]
    fn test_big_endian_layout() {
        let mut image = MemoryImage::new(0x100);
        image.write_be32(0, 0x11223344).unwrap();
        assert_eq!(image.read_bytes(0, 4).unwrap(), &[0x11, 0x22, 0x33, 0x44]);
        assert_eq!(image.read_be16(0).unwrap(), 0x1122);
        assert_eq!(image.read_be16(2).unwrap(), 0x3344);
    }

    #[test]
    fn test_out_of_bounds() {
        let mut image = MemoryImage::new(0x100);

        assert!(matches!(
            image.read_be32(0x100),
            Err(MemoryError::OutOfBounds { .. })
        ));
        assert!(matches!(
            image.write_be32(0xFFFF_FFFF, 0),
            Err(MemoryError::OutOfBounds { .. })
        ));

        // Last valid u32 slot is size - 4
        assert!(image.read_be32(0xFC).is_ok());
        assert!(image.read_be32(0xFD).is_err());
        assert!(image.read::<u8>(0xFF).is_ok());
        assert!(image.read::<u8>(0x100).is_err());
    }

    #[test]
    fn test_byte_slices() {
        let mut image = MemoryImage::new(0x100);
        image.write_bytes(0x50, &[1, 2, 3, 4, 5]).unwrap();
        assert_eq!(image.read_bytes(0x50, 5).unwrap(), &[1, 2, 3, 4, 5]);

        image.fill_zero(0x50, 2).unwrap();
        assert_eq!(image.read_bytes(0x50, 5).unwrap(), &[0, 0, 3, 4, 5]);

        assert!(image.write_bytes(0xFE, &[0; 4]).is_err());
    }

    #[test]
    fn test_error_reports_context() {
        let image = MemoryImage::new(0x10);
        let err = image.read_be64(0x0C).unwrap_err();
        match err {
            MemoryError::OutOfBounds { addr, len, size } => {
                assert_eq!(addr, 0x0C);
                assert_eq!(len, 8);
                assert_eq!(size, 0x10);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
