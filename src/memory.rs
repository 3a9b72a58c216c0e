use log::debug;

use crate::error::{Access, Fault, LoadError};

/// Full 16-bit address space.
pub const ADDRESS_SPACE: usize = 0x10000;

/// Flat, fixed-capacity RAM addressed from zero.
///
/// Out-of-range policy: [`Memory::read`] returns `0` for any address at or
/// above the capacity and [`Memory::write`] drops the byte. Regions not
/// backed by RAM read as zero so memory-mapped devices can be added later
/// without changing programs that probe them. Callers that need to see the
/// fault use [`Memory::try_read`] / [`Memory::try_write`].
#[derive(Debug, Clone)]
pub struct Memory {
    data: Vec<u8>,
}

impl Memory {
    /// Memory covering the whole address space.
    pub fn new() -> Self {
        Self::with_capacity(ADDRESS_SPACE)
    }

    /// Memory of `capacity` bytes, clamped to the 16-bit address space.
    pub fn with_capacity(capacity: usize) -> Self {
        Memory {
            data: vec![0; capacity.min(ADDRESS_SPACE)],
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn contains(&self, address: u16) -> bool {
        (address as usize) < self.data.len()
    }

    pub fn read(&self, address: u16) -> u8 {
        self.try_read(address).unwrap_or(0)
    }

    pub fn write(&mut self, address: u16, value: u8) {
        let _ = self.try_write(address, value);
    }

    pub fn try_read(&self, address: u16) -> Result<u8, Fault> {
        self.data
            .get(address as usize)
            .copied()
            .ok_or(Fault::AddressOutOfRange {
                address,
                capacity: self.data.len(),
                access: Access::Read,
            })
    }

    pub fn try_write(&mut self, address: u16, value: u8) -> Result<(), Fault> {
        let capacity = self.data.len();
        match self.data.get_mut(address as usize) {
            Some(cell) => {
                *cell = value;
                Ok(())
            }
            None => Err(Fault::AddressOutOfRange {
                address,
                capacity,
                access: Access::Write,
            }),
        }
    }

    /// Copy a raw image into memory starting at `base`. The whole image must
    /// fit; nothing is written otherwise.
    pub fn load(&mut self, image: &[u8], base: u16) -> Result<(), LoadError> {
        if image.is_empty() {
            return Err(LoadError::EmptyImage);
        }
        let start = base as usize;
        let end = start + image.len();
        if end > self.data.len() {
            return Err(LoadError::ImageTooLarge {
                base,
                len: image.len(),
                capacity: self.data.len(),
            });
        }
        self.data[start..end].copy_from_slice(image);
        debug!("loaded {} bytes at ${:04X}", image.len(), base);
        Ok(())
    }

    // Read a 16-bit value in little-endian format
    pub fn read_u16(&self, address: u16) -> u16 {
        let low = self.read(address) as u16;
        let high = self.read(address.wrapping_add(1)) as u16;
        (high << 8) | low
    }

    /// Copy of `length` bytes starting at `address`, wrapping at the top of
    /// the address space. Unbacked addresses read as zero.
    pub fn dump(&self, address: u16, length: usize) -> Vec<u8> {
        (0..length)
            .map(|i| self.read(address.wrapping_add(i as u16)))
            .collect()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}
