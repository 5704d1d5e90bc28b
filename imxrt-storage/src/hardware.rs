use core::ptr;

use cortex_m::{asm, interrupt, register::primask};
use imxrt_rom_sys::rom::{self, flexspi_nor::FlexspiNorDriverInterface};

use crate::{
    Geometry,
    common::{AIRCR, AIRCR_SYSRESETREQ},
};

const LPUART2_BASE: usize = 0x4018_8000;
const LPUART_STAT: usize = 0x14;
const LPUART_CTRL: usize = 0x1c;
const LPUART_STAT_TDRE: u32 = 1 << 23;

#[inline(always)]
pub(crate) fn interrupts_enabled() -> bool {
    primask::read().is_inactive()
}

#[inline(always)]
pub(crate) fn disable_interrupts() {
    interrupt::disable();
}

#[inline(always)]
pub(crate) unsafe fn enable_interrupts() {
    unsafe { interrupt::enable() };
}

#[inline(always)]
pub(crate) fn window(geometry: &Geometry) -> *mut u8 {
    geometry.start() as usize as *mut u8
}

#[inline(always)]
pub(crate) unsafe fn driver() -> &'static FlexspiNorDriverInterface {
    unsafe { rom::flexspi_nor() }
}

/// Memory-mapped reads past the code region can return stale data unless a
/// transmit on LPUART2 is started and drained first.
#[inline(never)]
pub(crate) fn read_warmup() {
    unsafe {
        ptr::write_volatile((LPUART2_BASE + LPUART_CTRL) as *mut u32, 0);
        while ptr::read_volatile((LPUART2_BASE + LPUART_STAT) as *const u32) & LPUART_STAT_TDRE
            == 0
        {}
    }
}

#[inline(always)]
pub(crate) fn data_barrier() {
    asm::dsb();
}

#[inline(always)]
pub(crate) fn instruction_barrier() {
    asm::dsb();
    asm::isb();
}

pub(crate) fn system_reset() -> ! {
    asm::dsb();
    unsafe { ptr::write_volatile(AIRCR as usize as *mut u32, AIRCR_SYSRESETREQ) };
    asm::dsb();

    loop {
        asm::nop();
    }
}

pub(crate) unsafe fn jump(entry: usize) -> ! {
    let entry: extern "C" fn() -> ! = unsafe { core::mem::transmute(entry) };
    entry()
}
