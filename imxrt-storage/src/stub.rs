use std::{
    cell::{Cell, RefCell},
    ptr,
    sync::atomic::{Ordering, fence},
};

use imxrt_rom_sys::rom::{
    STATUS_INVALID_ARGUMENT,
    STATUS_SUCCESS,
    flexspi_nor::*,
};

use crate::{
    Geometry,
    common::{AIRCR, AIRCR_SYSRESETREQ},
};

const ERASE_BYTE: u8 = 0xff;
const PAGE_SIZE: u32 = 256;
const SECTOR_SIZE: u32 = 4 << 10;
const FLASH_SIZE: u32 = 8 << 20;

macro_rules! print_error {
    ($($tt:tt)*) => {
        #[cfg(test)]
        eprintln!($($tt)*)
    };
}

/// Something the emulated device observed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    /// Interrupts were masked (`enabled: false`) or unmasked.
    Mask { enabled: bool },
    /// ROM `init`.
    Init,
    /// ROM `get_config`.
    GetConfig,
    /// ROM `erase`, `offset` from the start of the flash.
    Erase { offset: u32, len: u32, masked: bool },
    /// ROM `erase_all`.
    EraseAll { masked: bool },
    /// ROM `program` of one page, `offset` from the start of the flash.
    Program { offset: u32, masked: bool },
    /// The read warmup sequence.
    ReadWarmup,
    /// A write to the reset control register.
    Reset { register: u32, value: u32 },
    /// A jump to code copied into RAM.
    Jump { entry: usize },
}

struct State {
    journal: Vec<Event>,
    program_budget: Option<usize>,
    config_status: i32,
    init_status: i32,
}

impl State {
    const fn new() -> Self {
        Self {
            journal: Vec::new(),
            program_budget: None,
            config_status: STATUS_SUCCESS,
            init_status: STATUS_SUCCESS,
        }
    }
}

thread_local! {
    // Leaked so that mapped slices stay valid for the lifetime of the thread.
    static IMAGE: *mut u8 =
        Box::leak(vec![ERASE_BYTE; FLASH_SIZE as usize].into_boxed_slice()).as_mut_ptr();
    static INTERRUPTS: Cell<bool> = const { Cell::new(true) };
    static STATE: RefCell<State> = const { RefCell::new(State::new()) };
}

fn image() -> *mut u8 {
    IMAGE.with(|image| *image)
}

fn record(event: Event) {
    STATE.with_borrow_mut(|state| state.journal.push(event));
}

fn masked() -> bool {
    !INTERRUPTS.get()
}

/// Erases the emulated flash, enables interrupts and forgets all events and
/// injected failures.
pub fn reset_state() {
    unsafe { ptr::write_bytes(image(), ERASE_BYTE, FLASH_SIZE as usize) };
    INTERRUPTS.set(true);
    STATE.with_borrow_mut(|state| *state = State::new());
}

/// Events recorded since the last [reset_state] or [clear_journal].
pub fn journal() -> Vec<Event> {
    STATE.with_borrow(|state| state.journal.clone())
}

/// Forgets the recorded events.
pub fn clear_journal() {
    STATE.with_borrow_mut(|state| state.journal.clear());
}

/// Whether interrupts are enabled.
pub fn interrupts_enabled() -> bool {
    INTERRUPTS.get()
}

/// Enables or disables interrupts, as application code would.
pub fn set_interrupts_enabled(enabled: bool) {
    INTERRUPTS.set(enabled);
}

/// Makes every ROM `program` call after the next `count` ones fail.
pub fn fail_program_after(count: usize) {
    STATE.with_borrow_mut(|state| state.program_budget = Some(count));
}

/// Lets ROM `program` calls succeed again.
pub fn clear_program_failure() {
    STATE.with_borrow_mut(|state| state.program_budget = None);
}

/// Status returned by ROM `get_config`.
pub fn set_config_status(status: i32) {
    STATE.with_borrow_mut(|state| state.config_status = status);
}

/// Status returned by ROM `init`.
pub fn set_init_status(status: i32) {
    STATE.with_borrow_mut(|state| state.init_status = status);
}

pub(crate) fn disable_interrupts() {
    if INTERRUPTS.replace(false) {
        record(Event::Mask { enabled: false });
    }
}

pub(crate) unsafe fn enable_interrupts() {
    if !INTERRUPTS.replace(true) {
        record(Event::Mask { enabled: true });
    }
}

pub(crate) fn window(geometry: &Geometry) -> *mut u8 {
    debug_assert!(geometry.size() <= FLASH_SIZE);
    image()
}

pub(crate) fn read_warmup() {
    record(Event::ReadWarmup);
}

pub(crate) fn data_barrier() {
    fence(Ordering::SeqCst);
}

pub(crate) fn instruction_barrier() {
    fence(Ordering::SeqCst);
}

pub(crate) fn system_reset() -> ! {
    record(Event::Reset {
        register: AIRCR,
        value: AIRCR_SYSRESETREQ,
    });
    panic!("system reset");
}

pub(crate) unsafe fn jump(entry: usize) -> ! {
    record(Event::Jump { entry });
    panic!("jump to RAM code at {entry:#x}");
}

pub(crate) fn driver() -> &'static FlexspiNorDriverInterface {
    &DRIVER
}

static DRIVER: FlexspiNorDriverInterface = FlexspiNorDriverInterface {
    version: 0x0001_0000,
    init: rom_init,
    program: rom_program,
    erase_all: rom_erase_all,
    erase: rom_erase,
    read: rom_read,
    clear_cache: rom_clear_cache,
    xfer: rom_xfer,
    update_lut: rom_update_lut,
    get_config: rom_get_config,
};

fn check(
    instance: u32,
    config: *mut FlexspiNorConfig,
    offset: u32,
    length: u32,
    align: u32,
) -> bool {
    if instance != 0 {
        print_error!("Unknown FlexSPI instance: {instance}");
        return false;
    }
    if config.is_null() || !unsafe { (*config).is_tagged() } {
        print_error!("Configuration block not tagged");
        return false;
    }
    if offset % align > 0 {
        print_error!("Not aligned offset: {offset}");
        return false;
    }
    if length % align > 0 {
        print_error!("Not aligned length: {length}");
        return false;
    }
    if offset > FLASH_SIZE || length > FLASH_SIZE - offset {
        print_error!("Out of range: {offset} + {length} > {FLASH_SIZE}");
        return false;
    }
    true
}

unsafe extern "C" fn rom_init(_instance: u32, _config: *mut FlexspiNorConfig) -> i32 {
    record(Event::Init);
    STATE.with_borrow(|state| state.init_status)
}

unsafe extern "C" fn rom_get_config(
    instance: u32,
    config: *mut FlexspiNorConfig,
    _option: *mut SerialNorConfigOption,
) -> i32 {
    record(Event::GetConfig);

    let status = STATE.with_borrow(|state| state.config_status);
    if status != STATUS_SUCCESS {
        return status;
    }
    if instance != 0 || config.is_null() {
        return STATUS_INVALID_ARGUMENT;
    }

    let mut probed = FlexspiNorConfig::EMPTY;
    probed.mem_config.tag = FLEXSPI_CFG_BLK_TAG;
    probed.mem_config.version = FLEXSPI_CFG_BLK_VERSION;
    probed.mem_config.device_type = DEVICE_TYPE_SERIAL_NOR;
    probed.mem_config.sflash_a1_size = FLASH_SIZE;
    probed.page_size = PAGE_SIZE;
    probed.sector_size = SECTOR_SIZE;
    unsafe { config.write(probed) };

    STATUS_SUCCESS
}

unsafe extern "C" fn rom_erase(
    instance: u32,
    config: *mut FlexspiNorConfig,
    start: u32,
    length: u32,
) -> i32 {
    if !check(instance, config, start, length, SECTOR_SIZE) {
        return STATUS_INVALID_ARGUMENT;
    }

    record(Event::Erase {
        offset: start,
        len: length,
        masked: masked(),
    });
    unsafe { ptr::write_bytes(image().add(start as usize), ERASE_BYTE, length as usize) };
    STATUS_SUCCESS
}

unsafe extern "C" fn rom_erase_all(instance: u32, config: *mut FlexspiNorConfig) -> i32 {
    if !check(instance, config, 0, FLASH_SIZE, SECTOR_SIZE) {
        return STATUS_INVALID_ARGUMENT;
    }

    record(Event::EraseAll { masked: masked() });
    unsafe { ptr::write_bytes(image(), ERASE_BYTE, FLASH_SIZE as usize) };
    STATUS_SUCCESS
}

unsafe extern "C" fn rom_program(
    instance: u32,
    config: *mut FlexspiNorConfig,
    dst_addr: u32,
    src: *const u32,
) -> i32 {
    if !check(instance, config, dst_addr, PAGE_SIZE, PAGE_SIZE) {
        return STATUS_INVALID_ARGUMENT;
    }
    if src.is_null() || !src.is_aligned() {
        print_error!("Not aligned data: {src:p}");
        return STATUS_INVALID_ARGUMENT;
    }

    record(Event::Program {
        offset: dst_addr,
        masked: masked(),
    });

    let exhausted = STATE.with_borrow_mut(|state| match &mut state.program_budget {
        Some(0) => true,
        Some(budget) => {
            *budget -= 1;
            false
        }
        None => false,
    });
    if exhausted {
        return STATUS_FLEXSPINOR_PROGRAM_FAIL;
    }

    // Programming only clears bits.
    let src = src as *const u8;
    let dst = unsafe { image().add(dst_addr as usize) };
    for index in 0..PAGE_SIZE as usize {
        unsafe { *dst.add(index) &= *src.add(index) };
    }
    STATUS_SUCCESS
}

unsafe extern "C" fn rom_read(
    instance: u32,
    config: *mut FlexspiNorConfig,
    dst: *mut u32,
    start: u32,
    bytes: u32,
) -> i32 {
    if !check(instance, config, start, bytes, 1) {
        return STATUS_INVALID_ARGUMENT;
    }

    unsafe {
        ptr::copy_nonoverlapping(image().add(start as usize), dst as *mut u8, bytes as usize)
    };
    STATUS_SUCCESS
}

unsafe extern "C" fn rom_clear_cache(_instance: u32) {}

unsafe extern "C" fn rom_xfer(_instance: u32, _xfer: *mut FlexspiXfer) -> i32 {
    STATUS_FLEXSPINOR_NOT_SUPPORTED
}

unsafe extern "C" fn rom_update_lut(
    _instance: u32,
    _seq_index: u32,
    _lut_base: *const u32,
    _seq_number: u32,
) -> i32 {
    STATUS_SUCCESS
}
