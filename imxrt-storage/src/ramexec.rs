//! # Executing from RAM
//!
//! Some updates rewrite the flash sectors the running code lives in, which
//! [FlashStorage::write](crate::FlashStorage::write) cannot do safely. The
//! alternative is to copy a position-independent routine into RAM and hand
//! control over to it for good.

use core::ptr;

use crate::{FlashStorageError, InterruptMask, chip_specific};

/// A routine copied into RAM, ready to be jumped to.
#[derive(Debug)]
pub struct RamCode {
    entry: usize,
}

impl RamCode {
    /// Thumb entry point of the routine.
    pub fn entry(&self) -> usize {
        self.entry
    }

    /// Masks interrupts and transfers control to the routine.
    ///
    /// # Safety
    ///
    /// The routine must be valid position-independent Thumb code that never
    /// returns and does not rely on anything located in the flash.
    pub unsafe fn jump(self) -> ! {
        let mask = InterruptMask::acquire();
        warn!("Jumping to RAM code at {:#x}", self.entry);

        // Control never comes back to restore interrupts.
        core::mem::forget(mask);
        unsafe { chip_specific::jump(self.entry) }
    }
}

/// Copies `code` to `dest` so it can be executed from RAM.
///
/// Fails with [FlashStorageError::OutOfBounds] if `dest` is too small and
/// with [FlashStorageError::NotAligned] if `dest` is not halfword aligned.
///
/// # Safety
///
/// `code` must be position independent and `dest` must lie in executable
/// RAM that stays untouched until the routine has finished.
pub unsafe fn load_to_ram(
    code: &[u8],
    dest: &'static mut [u8],
) -> Result<RamCode, FlashStorageError> {
    if code.len() > dest.len() {
        return Err(FlashStorageError::OutOfBounds);
    }
    if dest.as_ptr().align_offset(2) != 0 {
        return Err(FlashStorageError::NotAligned);
    }

    unsafe { ptr::copy_nonoverlapping(code.as_ptr(), dest.as_mut_ptr(), code.len()) };
    chip_specific::data_barrier();
    chip_specific::instruction_barrier();

    let entry = dest.as_ptr() as usize | 1;
    debug!("Loaded {} bytes of code to {:#x}", code.len(), entry & !1);

    Ok(RamCode { entry })
}

#[cfg(test)]
mod test {
    use std::panic;

    use super::*;
    use crate::emulation::*;

    fn ram(len: usize) -> &'static mut [u8] {
        let words: &'static mut [u16] = Box::leak(vec![0u16; len / 2].into_boxed_slice());
        unsafe { core::slice::from_raw_parts_mut(words.as_mut_ptr().cast(), len) }
    }

    #[test]
    fn loads_code_and_jumps_to_thumb_entry() {
        reset_state();
        let code = [0x70, 0x47, 0x00, 0xbf];
        let dest = ram(64);
        let base = dest.as_ptr() as usize;

        let routine = unsafe { load_to_ram(&code, dest) }.unwrap();
        assert_eq!(routine.entry(), base | 1);
        assert_eq!(unsafe { core::slice::from_raw_parts(base as *const u8, 4) }, code);

        let result = panic::catch_unwind(move || unsafe {
            routine.jump();
        });
        assert!(result.is_err());
        assert_eq!(journal().last(), Some(&Event::Jump { entry: base | 1 }));
        assert!(!interrupts_enabled());
    }

    #[test]
    fn destination_must_fit() {
        let code = [0u8; 32];
        assert!(matches!(
            unsafe { load_to_ram(&code, ram(16)) },
            Err(FlashStorageError::OutOfBounds)
        ));
    }
}
