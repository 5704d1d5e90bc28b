//! # Boot ROM API tree
//!
//! ## Overview
//!
//! The boot ROM of the i.MX RT1020 and RT1060 publishes a pointer to its API
//! tree at a fixed address. The tree gives access to the ROM bootloader entry
//! and to the FlexSPI NOR driver, which is the only way to erase or program
//! the boot flash while executing from it.

use core::ffi::{c_char, c_void};

pub mod flexspi_nor;

/// Address holding the pointer to the [BootloaderApiTree].
pub const ROM_API_TREE_ADDR: usize = 0x0020_001c;

/// Generic success status.
pub const STATUS_SUCCESS: i32 = 0;
/// Generic failure status.
pub const STATUS_FAIL: i32 = 1;
/// Status returned for an invalid argument.
pub const STATUS_INVALID_ARGUMENT: i32 = 4;

/// Root of the ROM API.
#[repr(C)]
pub struct BootloaderApiTree {
    /// Bootloader version number.
    pub version: u32,
    /// Copyright string.
    pub copyright: *const c_char,
    /// Enter the ROM bootloader.
    pub run_bootloader: unsafe extern "C" fn(arg: *mut c_void),
    /// Reserved.
    pub reserved0: *const u32,
    /// FlexSPI NOR flash driver.
    pub flexspi_nor_driver: *const flexspi_nor::FlexspiNorDriverInterface,
}

/// Returns the ROM API tree.
///
/// # Safety
///
/// Only valid on an i.MX RT1020 / RT1060, where the ROM is mapped at its
/// documented location.
#[inline(always)]
pub unsafe fn api_tree() -> &'static BootloaderApiTree {
    unsafe { &**(ROM_API_TREE_ADDR as *const *const BootloaderApiTree) }
}

/// Returns the FlexSPI NOR driver of the ROM API tree.
///
/// # Safety
///
/// See [api_tree].
#[inline(always)]
pub unsafe fn flexspi_nor() -> &'static flexspi_nor::FlexspiNorDriverInterface {
    unsafe { &*api_tree().flexspi_nor_driver }
}
