//! # Low-level API
//!
//! ⚠️ This is a low-level API and should be used with caution. ⚠️
//!
//! Thin wrappers over the FlexSPI NOR driver of the boot ROM. They operate on
//! raw configuration blocks and offsets from the start of the flash, check no
//! preconditions and do not mask interrupts.

use imxrt_rom_sys::rom::flexspi_nor::{FlexspiNorConfig, SerialNorConfigOption};

use crate::chip_specific;

#[inline(always)]
fn status(rc: i32) -> Result<(), i32> {
    match rc {
        0 => Ok(()),
        value => Err(value),
    }
}

/// Configures FlexSPI instance `instance` and its flash from `config`.
///
/// # Safety
///
/// Interrupts must be masked and no code may execute from the flash while the
/// call is in progress.
pub unsafe fn init(instance: u32, config: &mut FlexspiNorConfig) -> Result<(), i32> {
    status(unsafe { (chip_specific::driver().init)(instance, config) })
}

/// Asks the ROM to probe the attached flash and fill `config`.
///
/// # Safety
///
/// Same as [init].
pub unsafe fn get_config(
    instance: u32,
    config: &mut FlexspiNorConfig,
    option: &mut SerialNorConfigOption,
) -> Result<(), i32> {
    status(unsafe { (chip_specific::driver().get_config)(instance, config, option) })
}

/// Erases `len` bytes starting `offset` bytes into the flash.
///
/// # Safety
///
/// Same as [init]. `offset` and `len` must be sector aligned and within the
/// flash.
pub unsafe fn erase(
    instance: u32,
    config: &mut FlexspiNorConfig,
    offset: u32,
    len: u32,
) -> Result<(), i32> {
    status(unsafe { (chip_specific::driver().erase)(instance, config, offset, len) })
}

/// Erases the whole flash.
///
/// # Safety
///
/// Same as [init]. The running firmware is erased as well unless it executes
/// from RAM.
pub unsafe fn erase_all(instance: u32, config: &mut FlexspiNorConfig) -> Result<(), i32> {
    status(unsafe { (chip_specific::driver().erase_all)(instance, config) })
}

/// Programs one page starting `offset` bytes into the flash.
///
/// # Safety
///
/// Same as [init]. `offset` must be page aligned and `data` must point to a
/// word-aligned buffer of at least one page.
pub unsafe fn program(
    instance: u32,
    config: &mut FlexspiNorConfig,
    offset: u32,
    data: *const u32,
) -> Result<(), i32> {
    status(unsafe { (chip_specific::driver().program)(instance, config, offset, data) })
}
