use core::{fmt, slice};

use imxrt_rom_sys::rom::STATUS_SUCCESS;

use crate::{FlashAddress, FlashController, Geometry, InterruptMask, chip_specific};

/// Application interrupt and reset control register.
pub(crate) const AIRCR: u32 = 0xe000_ed0c;
/// `VECTKEY` and `SYSRESETREQ`.
pub(crate) const AIRCR_SYSRESETREQ: u32 = 0x05fa_0004;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// Flash storage error.
pub enum FlashStorageError {
    /// Address or length not aligned to the required boundary.
    NotAligned,
    /// Address or length out of bounds.
    OutOfBounds,
    /// A ROM flash routine failed with the given status.
    Rom(i32),
    /// The flash configuration block could not be obtained.
    Config(i32),
}

impl fmt::Display for FlashStorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAligned => write!(f, "address or length not aligned"),
            Self::OutOfBounds => write!(f, "address or length outside of the flash"),
            Self::Rom(status) => write!(f, "ROM flash routine failed with status {status}"),
            Self::Config(status) => {
                write!(f, "flash configuration unavailable, status {status}")
            }
        }
    }
}

impl core::error::Error for FlashStorageError {}

#[inline(always)]
/// Check return code from ROM flash routines.
pub fn check_rc(rc: i32) -> Result<(), FlashStorageError> {
    match rc {
        STATUS_SUCCESS => Ok(()),
        _ => Err(FlashStorageError::Rom(rc)),
    }
}

/// Runtime configuration of [FlashStorage].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    code_offset: u32,
    run_in_flash: bool,
    read_warmup: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            code_offset: 0x2000,
            run_in_flash: true,
            read_warmup: true,
        }
    }
}

impl Config {
    /// Offset of the vector table, and of the code following it, from the
    /// start of the flash.
    pub const fn code_offset(&self) -> u32 {
        self.code_offset
    }

    /// Sets the offset of the vector table from the start of the flash.
    pub const fn with_code_offset(mut self, code_offset: u32) -> Self {
        self.code_offset = code_offset;
        self
    }

    /// Whether the firmware executes from the flash it updates.
    pub const fn run_in_flash(&self) -> bool {
        self.run_in_flash
    }

    /// Sets whether the firmware executes from the flash it updates.
    ///
    /// When set, writes touching the sector holding the vector table keep
    /// interrupts masked for the whole write.
    pub const fn with_run_in_flash(mut self, run_in_flash: bool) -> Self {
        self.run_in_flash = run_in_flash;
        self
    }

    /// Whether reads past the code region are preceded by the read warmup.
    pub const fn read_warmup(&self) -> bool {
        self.read_warmup
    }

    /// Sets whether reads past the code region are preceded by the read
    /// warmup.
    pub const fn with_read_warmup(mut self, read_warmup: bool) -> Self {
        self.read_warmup = read_warmup;
        self
    }
}

#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// Flash storage abstraction.
pub struct FlashStorage<C: FlashController> {
    pub(crate) controller: C,
    pub(crate) config: Config,
}

impl<C: FlashController> FlashStorage<C> {
    /// Start of the memory-mapped flash.
    pub const BASE: u32 = C::GEOMETRY.start();
    /// Flash size in bytes.
    pub const SIZE: u32 = C::GEOMETRY.size();
    /// Flash sector size in bytes.
    pub const SECTOR_SIZE: u32 = C::GEOMETRY.sector_size();
    /// Flash write alignment in bytes.
    pub const WRITE_ALIGN: u32 = C::GEOMETRY.write_align();
    /// Bank the firmware runs from.
    pub const BANK: u32 = C::GEOMETRY.bank();

    /// Initializes the flash through the boot ROM.
    pub fn new(controller: C, config: Config) -> Result<Self, FlashStorageError> {
        if config.code_offset >= Self::SIZE {
            warn!(
                "Code offset {:#x} lies outside of the flash, vector table guard disabled",
                config.code_offset
            );
        }

        InterruptMask::with(|mask| controller.init(mask)).inspect_err(|e| {
            error!("Flash initialization failed: {:?}", e);
        })?;

        debug!("Flash ready, {} bytes at {:#x}", Self::SIZE, Self::BASE);

        Ok(Self { controller, config })
    }

    /// The device variant.
    pub fn controller(&self) -> &C {
        &self.controller
    }

    /// The runtime configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Layout of the flash.
    pub const fn geometry(&self) -> Geometry {
        C::GEOMETRY
    }

    /// Start of the memory-mapped flash.
    pub const fn start(&self) -> u32 {
        Self::BASE
    }

    /// Flash size in bytes.
    pub const fn size(&self) -> u32 {
        Self::SIZE
    }

    /// Smallest erasable unit in bytes.
    pub const fn sector_size(&self) -> u32 {
        Self::SECTOR_SIZE
    }

    /// Smallest programmable unit in bytes.
    pub const fn write_align(&self) -> u32 {
        Self::WRITE_ALIGN
    }

    /// Bank the firmware runs from.
    pub const fn bank(&self) -> u32 {
        Self::BANK
    }

    /// Erases the sector starting at `address`.
    pub fn erase(&mut self, address: u32) -> Result<(), FlashStorageError> {
        let sector = C::GEOMETRY.address(address)?;
        if !sector.is_sector_start() {
            error!("Erase address {:#x} is not sector aligned", address);
            return Err(FlashStorageError::NotAligned);
        }

        self.erase_sector(sector)
    }

    /// Erases every sector in `[from, to)`.
    pub fn erase_range(&mut self, from: u32, to: u32) -> Result<(), FlashStorageError> {
        if to < from {
            return Err(FlashStorageError::OutOfBounds);
        }

        let len = to - from;
        let start = C::GEOMETRY.range(from, len as usize)?;
        if !start.is_sector_start() || len % Self::SECTOR_SIZE != 0 {
            error!("Erase range {:#x}..{:#x} is not sector aligned", from, to);
            return Err(FlashStorageError::NotAligned);
        }

        for address in (from..to).step_by(Self::SECTOR_SIZE as usize) {
            self.erase_sector(C::GEOMETRY.address(address)?)?;
        }

        Ok(())
    }

    pub(crate) fn erase_sector(&mut self, sector: FlashAddress) -> Result<(), FlashStorageError> {
        let result = InterruptMask::with(|mask| {
            self.controller
                .erase(mask, sector.offset(), Self::SECTOR_SIZE)
        });

        match result {
            Ok(()) => debug!("Erased sector {:#x}", sector.get()),
            Err(e) => error!("Erasing sector {:#x} failed: {:?}", sector.get(), e),
        }

        result
    }

    /// Erases the whole flash.
    ///
    /// Only useful when the firmware executes from RAM.
    pub fn erase_all(&mut self) -> Result<(), FlashStorageError> {
        let result = InterruptMask::with(|mask| self.controller.erase_all(mask));

        match result {
            Ok(()) => debug!("Erased the whole flash"),
            Err(e) => error!("Erasing the whole flash failed: {:?}", e),
        }

        result
    }

    /// Switches the active bank.
    ///
    /// The supported devices boot from a single bank, so there is nothing to
    /// switch.
    pub fn bank_swap(&mut self) -> Result<(), FlashStorageError> {
        debug!("Single bank flash, bank {} stays active", Self::BANK);
        Ok(())
    }

    /// Reads `bytes.len()` bytes at `address` from the memory-mapped flash.
    pub fn read(&self, address: u32, bytes: &mut [u8]) -> Result<(), FlashStorageError> {
        let src = unsafe { self.mapped(address, bytes.len()) }?;

        let end = address as u64 + bytes.len() as u64;
        if !bytes.is_empty() && end > self.code_boundary() as u64 {
            self.read_warmup();
        }

        bytes.copy_from_slice(src);
        Ok(())
    }

    /// Returns the memory-mapped flash contents at `[address, address + len)`.
    ///
    /// # Safety
    ///
    /// The returned slice changes under the caller's feet when the range is
    /// erased or programmed.
    pub unsafe fn mapped(
        &self,
        address: u32,
        len: usize,
    ) -> Result<&'static [u8], FlashStorageError> {
        let start = C::GEOMETRY.range(address, len)?;
        let window = chip_specific::window(&C::GEOMETRY);

        Ok(unsafe { slice::from_raw_parts(window.add(start.offset() as usize), len) })
    }

    /// First address past the vector table offset. Mapped reads at or beyond
    /// it need the read warmup.
    pub(crate) fn code_boundary(&self) -> u32 {
        Self::BASE.saturating_add(self.config.code_offset)
    }

    pub(crate) fn read_warmup(&self) {
        if self.config.read_warmup {
            chip_specific::read_warmup();
        }
    }
}

/// Resets the whole system.
///
/// Called by update policies once a new image is in place.
pub fn reset() -> ! {
    warn!("Resetting the system");
    chip_specific::system_reset()
}
