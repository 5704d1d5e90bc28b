use core::marker::PhantomData;

use crate::chip_specific;

/// Scope in which interrupts are masked.
///
/// Acquiring a mask disables interrupts if they are enabled. Dropping it
/// enables them again only if this mask was the one that disabled them, so
/// masks nest freely and never unmask what an outer scope masked.
///
/// Functions calling into the boot ROM take a `&InterruptMask` to prove they
/// run masked.
#[derive(Debug)]
#[must_use = "interrupts are restored as soon as the mask is dropped"]
pub struct InterruptMask {
    restore: bool,
    _not_send: PhantomData<*mut ()>,
}

impl InterruptMask {
    /// Masks interrupts until the returned value is dropped.
    pub fn acquire() -> Self {
        let enabled = chip_specific::interrupts_enabled();
        if enabled {
            chip_specific::disable_interrupts();
        }

        Self {
            restore: enabled,
            _not_send: PhantomData,
        }
    }

    /// Runs `f` with interrupts masked.
    pub fn with<R>(f: impl FnOnce(&InterruptMask) -> R) -> R {
        let mask = Self::acquire();
        f(&mask)
    }

    /// Whether dropping this mask enables interrupts again.
    pub fn is_outermost(&self) -> bool {
        self.restore
    }
}

impl Drop for InterruptMask {
    fn drop(&mut self) {
        if self.restore {
            unsafe { chip_specific::enable_interrupts() };
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::emulation::*;

    #[test]
    fn nested_masks_restore_once() {
        reset_state();

        let outer = InterruptMask::acquire();
        assert!(outer.is_outermost());
        assert!(!interrupts_enabled());

        InterruptMask::with(|inner| {
            assert!(!inner.is_outermost());
            assert!(!interrupts_enabled());
        });
        assert!(!interrupts_enabled());

        drop(outer);
        assert!(interrupts_enabled());
    }

    #[test]
    fn caller_masked_interrupts_stay_masked() {
        reset_state();
        set_interrupts_enabled(false);

        let mask = InterruptMask::acquire();
        assert!(!mask.is_outermost());
        drop(mask);

        assert!(!interrupts_enabled());
    }
}
