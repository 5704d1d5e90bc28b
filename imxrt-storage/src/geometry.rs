use crate::FlashStorageError;

/// Layout of the memory-mapped NOR flash.
///
/// All addresses handled by [Geometry] are absolute, i.e. they point into the
/// memory-mapped window starting at [start](Self::start).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Geometry {
    base: u32,
    size: u32,
    sector_size: u32,
    write_align: u32,
    bank: u32,
}

impl Geometry {
    /// Describes a flash region.
    ///
    /// # Panics
    ///
    /// Panics (at compile time when used in a constant) if the sector size is
    /// not a power of two, if the region is not a whole number of sectors, if
    /// the write alignment does not divide the sector size, or if the region
    /// wraps the address space.
    pub const fn new(base: u32, size: u32, sector_size: u32, write_align: u32, bank: u32) -> Self {
        assert!(sector_size.is_power_of_two());
        assert!(write_align.is_power_of_two());
        assert!(size > 0 && size % sector_size == 0);
        assert!(sector_size % write_align == 0);
        assert!(base % sector_size == 0);
        assert!(size <= u32::MAX - base);

        Self {
            base,
            size,
            sector_size,
            write_align,
            bank,
        }
    }

    /// First address of the memory-mapped flash.
    pub const fn start(&self) -> u32 {
        self.base
    }

    /// One past the last address of the memory-mapped flash.
    pub const fn end(&self) -> u32 {
        self.base + self.size
    }

    /// Flash size in bytes.
    pub const fn size(&self) -> u32 {
        self.size
    }

    /// Smallest erasable unit in bytes.
    pub const fn sector_size(&self) -> u32 {
        self.sector_size
    }

    /// Smallest programmable unit in bytes.
    pub const fn write_align(&self) -> u32 {
        self.write_align
    }

    /// Index of the bank the firmware runs from.
    pub const fn bank(&self) -> u32 {
        self.bank
    }

    /// Whether `addr` lies inside the flash region.
    pub const fn contains(&self, addr: u32) -> bool {
        addr >= self.base && addr - self.base < self.size
    }

    /// Whether `[addr, addr + len)` lies inside the flash region.
    pub const fn contains_range(&self, addr: u32, len: usize) -> bool {
        if addr < self.base || addr > self.end() {
            return false;
        }
        len <= (self.end() - addr) as usize
    }

    /// Validates `addr` against the region.
    pub fn address(&self, addr: u32) -> Result<FlashAddress, FlashStorageError> {
        if !self.contains(addr) {
            return Err(FlashStorageError::OutOfBounds);
        }
        Ok(FlashAddress {
            offset: addr - self.base,
            geometry: *self,
        })
    }

    /// Validates `[addr, addr + len)` against the region and returns its first
    /// address. An empty range may also start at [end](Self::end).
    pub fn range(&self, addr: u32, len: usize) -> Result<FlashAddress, FlashStorageError> {
        if !self.contains_range(addr, len) {
            return Err(FlashStorageError::OutOfBounds);
        }
        Ok(FlashAddress {
            offset: addr - self.base,
            geometry: *self,
        })
    }
}

/// An address validated against a [Geometry].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FlashAddress {
    offset: u32,
    geometry: Geometry,
}

impl FlashAddress {
    /// Absolute, memory-mapped address.
    pub const fn get(&self) -> u32 {
        self.geometry.base + self.offset
    }

    /// Offset from the start of the flash, as expected by the boot ROM.
    pub const fn offset(&self) -> u32 {
        self.offset
    }

    /// Whether the address is a multiple of `align`.
    pub const fn is_aligned(&self, align: u32) -> bool {
        self.offset % align == 0
    }

    /// Whether the address is the first byte of a sector.
    pub const fn is_sector_start(&self) -> bool {
        self.is_aligned(self.geometry.sector_size)
    }

    /// First address of the sector holding this address.
    pub const fn sector_start(&self) -> FlashAddress {
        FlashAddress {
            offset: self.offset - self.offset % self.geometry.sector_size,
            geometry: self.geometry,
        }
    }
}
