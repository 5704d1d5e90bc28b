use imxrt_rom_sys::rom::flexspi_nor::*;

use crate::{FlashController, FlashStorageError, Geometry, InterruptMask};

const FLASH_SIZE: u32 = 8 * 1024 * 1024;
const PAGE_SIZE: u32 = 256;
const SECTOR_SIZE: u32 = 4 * 1024;
const BLOCK_SIZE: u32 = 64 * 1024;

/// Configuration block of the QSPI NOR flash fitted to RT1020 boards.
pub(crate) const RT1020_NOR_CONFIG: FlexspiNorConfig = {
    let mut config = FlexspiNorConfig::EMPTY;

    config.mem_config.tag = FLEXSPI_CFG_BLK_TAG;
    config.mem_config.version = FLEXSPI_CFG_BLK_VERSION;
    config.mem_config.read_sample_clk_src = READ_SAMPLE_CLK_LOOPBACK_FROM_DQS_PAD;
    config.mem_config.cs_hold_time = 3;
    config.mem_config.cs_setup_time = 3;
    // Safe configuration frequency enable
    config.mem_config.controller_misc_option = 1 << 4;
    config.mem_config.device_type = DEVICE_TYPE_SERIAL_NOR;
    config.mem_config.sflash_pad_type = SFLASH_PAD_TYPE_QUAD;
    config.mem_config.serial_clk_freq = SERIAL_CLK_FREQ_133MHZ;
    config.mem_config.sflash_a1_size = FLASH_SIZE;
    config.mem_config.lookup_table = QSPI_LUT;

    config.page_size = PAGE_SIZE;
    config.sector_size = SECTOR_SIZE;
    config.ipcmd_serial_clk_freq = IPCMD_SERIAL_CLK_FREQ_30MHZ;
    config.block_size = BLOCK_SIZE;
    config
};

/// i.MX RT1020, whose flash is described by a static configuration block.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Rt1020;

impl FlashController for Rt1020 {
    const GEOMETRY: Geometry = Geometry::new(0x6000_0000, FLASH_SIZE, SECTOR_SIZE, PAGE_SIZE, 0);

    fn config(&self, _mask: &InterruptMask) -> Result<FlexspiNorConfig, FlashStorageError> {
        Ok(RT1020_NOR_CONFIG)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn static_config_matches_geometry() {
        let config = InterruptMask::with(|mask| Rt1020.config(mask)).unwrap();

        assert!(config.is_tagged());
        assert_eq!(config.page_size, Rt1020::GEOMETRY.write_align());
        assert_eq!(config.sector_size, Rt1020::GEOMETRY.sector_size());
        assert_eq!(config.mem_config.sflash_a1_size, Rt1020::GEOMETRY.size());
        assert_eq!(config.mem_config.lookup_table[4 * SEQ_READ], 0x0a18_04eb);
    }
}
