//! Definitions of the ROM FlexSPI NOR driver.
//!
//! All routines take a FlexSPI instance index and a [FlexspiNorConfig]
//! describing the attached flash. Addresses passed to `erase` and `program`
//! are offsets into the flash device, not addresses of the memory-mapped
//! window.

/// `FCFB`, tag of a valid FlexSPI configuration block.
pub const FLEXSPI_CFG_BLK_TAG: u32 = 0x4246_4346;
/// Version 1.4.0 of the configuration block layout.
pub const FLEXSPI_CFG_BLK_VERSION: u32 = 0x5601_0400;

/// Status group of the FlexSPI NOR driver.
pub const STATUS_GROUP_FLEXSPINOR: i32 = 201;
/// Page program failed.
pub const STATUS_FLEXSPINOR_PROGRAM_FAIL: i32 = STATUS_GROUP_FLEXSPINOR * 100;
/// Sector erase failed.
pub const STATUS_FLEXSPINOR_ERASE_SECTOR_FAIL: i32 = STATUS_GROUP_FLEXSPINOR * 100 + 1;
/// Chip erase failed.
pub const STATUS_FLEXSPINOR_ERASE_ALL_FAIL: i32 = STATUS_GROUP_FLEXSPINOR * 100 + 2;
/// The device did not become idle in time.
pub const STATUS_FLEXSPINOR_WAIT_TIMEOUT: i32 = STATUS_GROUP_FLEXSPINOR * 100 + 3;
/// Operation not supported by the device.
pub const STATUS_FLEXSPINOR_NOT_SUPPORTED: i32 = STATUS_GROUP_FLEXSPINOR * 100 + 4;
/// Address or length not aligned to the page size.
pub const STATUS_FLEXSPINOR_WRITE_ALIGNMENT_ERROR: i32 = STATUS_GROUP_FLEXSPINOR * 100 + 5;

/// Serial NOR device type in [FlexspiMemConfig::device_type].
pub const DEVICE_TYPE_SERIAL_NOR: u8 = 1;
/// Four data pads, [FlexspiMemConfig::sflash_pad_type].
pub const SFLASH_PAD_TYPE_QUAD: u8 = 4;
/// Read sample clock looped back from the DQS pad.
pub const READ_SAMPLE_CLK_LOOPBACK_FROM_DQS_PAD: u8 = 1;
/// 133 MHz serial clock, [FlexspiMemConfig::serial_clk_freq].
pub const SERIAL_CLK_FREQ_133MHZ: u8 = 7;
/// 30 MHz serial clock for IP commands.
pub const IPCMD_SERIAL_CLK_FREQ_30MHZ: u8 = 1;

/// LUT instruction opcodes.
pub mod lut {
    /// Stop execution of the sequence.
    pub const STOP: u8 = 0x00;
    /// Transmit a command code.
    pub const CMD_SDR: u8 = 0x01;
    /// Transmit a row address.
    pub const RADDR_SDR: u8 = 0x02;
    /// Transmit data to the device.
    pub const WRITE_SDR: u8 = 0x08;
    /// Receive data from the device.
    pub const READ_SDR: u8 = 0x09;
    /// Dummy cycles.
    pub const DUMMY_SDR: u8 = 0x0c;

    /// One data pad.
    pub const PAD_1: u8 = 0;
    /// Two data pads.
    pub const PAD_2: u8 = 1;
    /// Four data pads.
    pub const PAD_4: u8 = 2;

    /// Encodes two LUT instructions into one LUT word.
    pub const fn seq(cmd0: u8, pad0: u8, op0: u8, cmd1: u8, pad1: u8, op1: u8) -> u32 {
        let low = (op0 as u32) | ((pad0 as u32 & 0x3) << 8) | ((cmd0 as u32 & 0x3f) << 10);
        let high = (op1 as u32) | ((pad1 as u32 & 0x3) << 8) | ((cmd1 as u32 & 0x3f) << 10);
        low | (high << 16)
    }
}

/// LUT sequence index used by the ROM for reads.
pub const SEQ_READ: usize = 0;
/// LUT sequence index used by the ROM to poll the status register.
pub const SEQ_READ_STATUS: usize = 1;
/// LUT sequence index used by the ROM for write enable.
pub const SEQ_WRITE_ENABLE: usize = 3;
/// LUT sequence index used by the ROM for sector erase.
pub const SEQ_ERASE_SECTOR: usize = 5;
/// LUT sequence index used by the ROM for page program.
pub const SEQ_PAGE_PROGRAM: usize = 9;
/// LUT sequence index used by the ROM for chip erase.
pub const SEQ_CHIP_ERASE: usize = 11;

/// Lookup table for a generic 24-bit address QSPI NOR flash.
pub const QSPI_LUT: [u32; 64] = {
    use lut::*;

    let mut table = [0u32; 64];
    // Fast read quad I/O
    table[4 * SEQ_READ] = seq(CMD_SDR, PAD_1, 0xeb, RADDR_SDR, PAD_4, 0x18);
    table[4 * SEQ_READ + 1] = seq(DUMMY_SDR, PAD_4, 0x06, READ_SDR, PAD_4, 0x04);
    table[4 * SEQ_READ_STATUS] = seq(CMD_SDR, PAD_1, 0x05, READ_SDR, PAD_1, 0x04);
    table[4 * SEQ_WRITE_ENABLE] = seq(CMD_SDR, PAD_1, 0x06, STOP, PAD_1, 0x00);
    table[4 * SEQ_ERASE_SECTOR] = seq(CMD_SDR, PAD_1, 0x20, RADDR_SDR, PAD_1, 0x18);
    table[4 * SEQ_PAGE_PROGRAM] = seq(CMD_SDR, PAD_1, 0x02, RADDR_SDR, PAD_1, 0x18);
    table[4 * SEQ_PAGE_PROGRAM + 1] = seq(WRITE_SDR, PAD_1, 0x04, STOP, PAD_1, 0x00);
    table[4 * SEQ_CHIP_ERASE] = seq(CMD_SDR, PAD_1, 0x60, STOP, PAD_1, 0x00);
    table
};

/// Reference to a LUT sequence.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(C)]
pub struct FlexspiLutSeq {
    /// Number of sequences.
    pub seq_num: u8,
    /// Index of the first sequence.
    pub seq_id: u8,
    /// Reserved.
    pub reserved: u16,
}

impl FlexspiLutSeq {
    /// An unused sequence reference.
    pub const EMPTY: Self = Self {
        seq_num: 0,
        seq_id: 0,
        reserved: 0,
    };
}

/// FlexSPI memory configuration, the first 448 bytes of the FCB.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct FlexspiMemConfig {
    pub tag: u32,
    pub version: u32,
    pub reserved0: u32,
    pub read_sample_clk_src: u8,
    pub cs_hold_time: u8,
    pub cs_setup_time: u8,
    pub column_address_width: u8,
    pub device_mode_cfg_enable: u8,
    pub device_mode_type: u8,
    pub wait_time_cfg_commands: u16,
    pub device_mode_seq: FlexspiLutSeq,
    pub device_mode_arg: u32,
    pub config_cmd_enable: u8,
    pub config_mode_type: [u8; 3],
    pub config_cmd_seqs: [FlexspiLutSeq; 3],
    pub reserved1: u32,
    pub config_cmd_args: [u32; 3],
    pub reserved2: u32,
    pub controller_misc_option: u32,
    pub device_type: u8,
    pub sflash_pad_type: u8,
    pub serial_clk_freq: u8,
    pub lut_custom_seq_enable: u8,
    pub reserved3: [u32; 2],
    pub sflash_a1_size: u32,
    pub sflash_a2_size: u32,
    pub sflash_b1_size: u32,
    pub sflash_b2_size: u32,
    pub cs_pad_setting_override: u32,
    pub sclk_pad_setting_override: u32,
    pub data_pad_setting_override: u32,
    pub dqs_pad_setting_override: u32,
    pub timeout_in_ms: u32,
    pub command_interval: u32,
    pub data_valid_time: [u16; 2],
    pub busy_offset: u16,
    pub busy_bit_polarity: u16,
    pub lookup_table: [u32; 64],
    pub lut_custom_seq: [FlexspiLutSeq; 12],
    pub reserved4: [u32; 4],
}

impl FlexspiMemConfig {
    /// An all-zero memory configuration.
    pub const EMPTY: Self = Self {
        tag: 0,
        version: 0,
        reserved0: 0,
        read_sample_clk_src: 0,
        cs_hold_time: 0,
        cs_setup_time: 0,
        column_address_width: 0,
        device_mode_cfg_enable: 0,
        device_mode_type: 0,
        wait_time_cfg_commands: 0,
        device_mode_seq: FlexspiLutSeq::EMPTY,
        device_mode_arg: 0,
        config_cmd_enable: 0,
        config_mode_type: [0; 3],
        config_cmd_seqs: [FlexspiLutSeq::EMPTY; 3],
        reserved1: 0,
        config_cmd_args: [0; 3],
        reserved2: 0,
        controller_misc_option: 0,
        device_type: 0,
        sflash_pad_type: 0,
        serial_clk_freq: 0,
        lut_custom_seq_enable: 0,
        reserved3: [0; 2],
        sflash_a1_size: 0,
        sflash_a2_size: 0,
        sflash_b1_size: 0,
        sflash_b2_size: 0,
        cs_pad_setting_override: 0,
        sclk_pad_setting_override: 0,
        data_pad_setting_override: 0,
        dqs_pad_setting_override: 0,
        timeout_in_ms: 0,
        command_interval: 0,
        data_valid_time: [0; 2],
        busy_offset: 0,
        busy_bit_polarity: 0,
        lookup_table: [0; 64],
        lut_custom_seq: [FlexspiLutSeq::EMPTY; 12],
        reserved4: [0; 4],
    };
}

/// Serial NOR configuration block (FCB), 512 bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct FlexspiNorConfig {
    pub mem_config: FlexspiMemConfig,
    pub page_size: u32,
    pub sector_size: u32,
    pub ipcmd_serial_clk_freq: u8,
    pub is_uniform_block_size: u8,
    pub reserved0: [u8; 2],
    pub serial_nor_type: u8,
    pub need_exit_no_cmd_mode: u8,
    pub half_clk_for_non_read_cmd: u8,
    pub need_restore_no_cmd_mode: u8,
    pub block_size: u32,
    pub reserved2: [u32; 11],
}

impl FlexspiNorConfig {
    /// An all-zero configuration block, to be filled by `get_config` or by hand.
    pub const EMPTY: Self = Self {
        mem_config: FlexspiMemConfig::EMPTY,
        page_size: 0,
        sector_size: 0,
        ipcmd_serial_clk_freq: 0,
        is_uniform_block_size: 0,
        reserved0: [0; 2],
        serial_nor_type: 0,
        need_exit_no_cmd_mode: 0,
        half_clk_for_non_read_cmd: 0,
        need_restore_no_cmd_mode: 0,
        block_size: 0,
        reserved2: [0; 11],
    };

    /// Whether the block carries the `FCFB` tag.
    pub const fn is_tagged(&self) -> bool {
        self.mem_config.tag == FLEXSPI_CFG_BLK_TAG
    }
}

const _: () = core::assert!(core::mem::size_of::<FlexspiMemConfig>() == 448);
const _: () = core::assert!(core::mem::size_of::<FlexspiNorConfig>() == 512);

/// Option words for `get_config`, describing how the ROM should probe the
/// attached flash.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(C)]
pub struct SerialNorConfigOption {
    pub option0: u32,
    pub option1: u32,
}

impl SerialNorConfigOption {
    /// QuadSPI NOR, SDR, probed through SFDP at 133 MHz.
    pub const QUAD_SPI_133MHZ: Self = Self {
        option0: 0xc000_0008,
        option1: 0,
    };
}

/// Kind of a raw FlexSPI transfer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u32)]
pub enum FlexspiOperation {
    /// Command only.
    Command = 0,
    /// Configure the device.
    Config  = 1,
    /// Write data.
    Write   = 2,
    /// Read data.
    Read    = 3,
}

/// A raw FlexSPI transfer descriptor.
#[repr(C)]
pub struct FlexspiXfer {
    pub operation: FlexspiOperation,
    pub base_address: u32,
    pub seq_id: u32,
    pub seq_num: u32,
    pub is_parallel_mode_enable: bool,
    pub tx_buffer: *mut u32,
    pub tx_size: u32,
    pub rx_buffer: *mut u32,
    pub rx_size: u32,
}

/// Function table of the ROM FlexSPI NOR driver.
///
/// Every routine returns `0` on success and a status code otherwise. None of
/// them may be preempted by code that executes from or reads the flash they
/// operate on.
#[repr(C)]
pub struct FlexspiNorDriverInterface {
    /// Driver version.
    pub version: u32,
    /// Configure FlexSPI and the flash device from `config`.
    pub init: unsafe extern "C" fn(instance: u32, config: *mut FlexspiNorConfig) -> i32,
    /// Program one page at `dst_addr` from the word-aligned buffer `src`.
    pub program: unsafe extern "C" fn(
        instance: u32,
        config: *mut FlexspiNorConfig,
        dst_addr: u32,
        src: *const u32,
    ) -> i32,
    /// Erase the whole device.
    pub erase_all: unsafe extern "C" fn(instance: u32, config: *mut FlexspiNorConfig) -> i32,
    /// Erase `length` bytes starting at `start`, both sector aligned.
    pub erase: unsafe extern "C" fn(
        instance: u32,
        config: *mut FlexspiNorConfig,
        start: u32,
        length: u32,
    ) -> i32,
    /// Read `bytes` bytes at `start` through IP commands.
    pub read: unsafe extern "C" fn(
        instance: u32,
        config: *mut FlexspiNorConfig,
        dst: *mut u32,
        start: u32,
        bytes: u32,
    ) -> i32,
    /// Invalidate the AHB read cache.
    pub clear_cache: unsafe extern "C" fn(instance: u32),
    /// Execute a raw transfer.
    pub xfer: unsafe extern "C" fn(instance: u32, xfer: *mut FlexspiXfer) -> i32,
    /// Replace `seq_number` LUT sequences starting at `seq_index`.
    pub update_lut: unsafe extern "C" fn(
        instance: u32,
        seq_index: u32,
        lut_base: *const u32,
        seq_number: u32,
    ) -> i32,
    /// Probe the attached flash and fill `config` accordingly.
    pub get_config: unsafe extern "C" fn(
        instance: u32,
        config: *mut FlexspiNorConfig,
        option: *mut SerialNorConfigOption,
    ) -> i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lut_words_match_reference_encoding() {
        // FLEXSPI_LUT_SEQ(CMD_SDR, PAD1, 0x06, STOP, PAD1, 0) from the SDK
        assert_eq!(QSPI_LUT[4 * SEQ_WRITE_ENABLE], 0x0000_0406);
        // FLEXSPI_LUT_SEQ(CMD_SDR, PAD1, 0xEB, RADDR_SDR, PAD4, 0x18)
        assert_eq!(QSPI_LUT[4 * SEQ_READ], 0x0a18_04eb);
    }

    #[test]
    fn empty_config_is_not_tagged() {
        let mut config = FlexspiNorConfig::EMPTY;
        assert!(!config.is_tagged());
        config.mem_config.tag = FLEXSPI_CFG_BLK_TAG;
        assert!(config.is_tagged());
    }

    #[test]
    fn fcb_field_offsets() {
        assert_eq!(core::mem::offset_of!(FlexspiMemConfig, controller_misc_option), 0x40);
        assert_eq!(core::mem::offset_of!(FlexspiMemConfig, sflash_a1_size), 0x50);
        assert_eq!(core::mem::offset_of!(FlexspiMemConfig, lookup_table), 0x80);
        assert_eq!(core::mem::offset_of!(FlexspiNorConfig, page_size), 0x1c0);
        assert_eq!(core::mem::offset_of!(FlexspiNorConfig, block_size), 0x1d0);
    }
}
