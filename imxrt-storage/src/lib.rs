//! # In-place update driver for the i.MX RT FlexSPI NOR flash
//!
//! ## Overview
//!
//! The i.MX RT1020 and RT1060 execute their firmware directly from a serial
//! NOR flash mapped at `0x6000_0000`. Updating that flash from the running
//! firmware goes through the FlexSPI NOR driver of the boot ROM, which must
//! never be preempted by an interrupt handler: handlers live in flash, and so
//! does the vector table they are dispatched from.
//!
//! [FlashStorage] wraps the ROM driver and provides:
//!
//! - the flash geometry (base, size, sector size, write alignment, bank)
//! - sector erase and chip erase
//! - writes of any length multiple of the write alignment, erasing each sector
//!   as it is entered; sources may live in RAM or in the flash itself
//! - reads from the memory-mapped window
//! - [bank_swap](FlashStorage::bank_swap) and [reset] for the OTA layer
//!
//! All ROM calls run inside an [InterruptMask]. Masks nest: a mask taken
//! while interrupts are already disabled leaves them disabled when dropped.
//! Writes touching the sector that holds the live vector table keep
//! interrupts masked for the whole call.
//!
//! Failed writes are not rolled back. A write that fails halfway leaves the
//! destination partially erased and programmed; update policies should write
//! to a spare area and validate it before switching to it.
//!
//! ## Examples
//!
//! ```rust, no_run
//! use imxrt_storage::{Config, FlashStorage, Rt1060};
//!
//! # fn example(image: &[u8]) -> Result<(), imxrt_storage::FlashStorageError> {
//! let mut flash = FlashStorage::new(Rt1060, Config::default())?;
//! let spare = flash.start() + flash.size() / 2;
//! flash.write(spare, image)?;
//! imxrt_storage::reset();
//! # }
//! ```
//!
//! ## Feature Flags
#![doc = document_features::document_features!(feature_label = r#"<span class="stab portability"><code>{feature}</code></span>"#)]
#![cfg_attr(not(any(test, feature = "emulation")), no_std)]

// MUST be the first module
mod fmt;

#[cfg_attr(not(any(test, feature = "emulation")), path = "hardware.rs")]
#[cfg_attr(any(test, feature = "emulation"), path = "stub.rs")]
mod chip_specific;

mod buffer;
mod common;
mod controller;
mod geometry;
mod irq;
#[cfg(feature = "nor-flash")]
mod nor_flash;
mod rt1020;
mod rt1060;
mod write;

pub mod ll;
pub mod ramexec;
pub mod records;

pub use common::{Config, FlashStorage, FlashStorageError, check_rc, reset};
pub use controller::FlashController;
pub use geometry::{FlashAddress, Geometry};
pub use imxrt_rom_sys::rom::flexspi_nor::FlexspiNorConfig;
pub use irq::InterruptMask;
pub use rt1020::Rt1020;
pub use rt1060::Rt1060;

/// Host emulation of the boot ROM, the interrupt mask and the flash array.
///
/// Every thread owns its own emulated device, so tests running in parallel
/// do not observe each other.
#[cfg(any(test, feature = "emulation"))]
pub mod emulation {
    pub use crate::chip_specific::{
        Event,
        clear_journal,
        clear_program_failure,
        fail_program_after,
        interrupts_enabled,
        journal,
        reset_state,
        set_config_status,
        set_init_status,
        set_interrupts_enabled,
    };
}
