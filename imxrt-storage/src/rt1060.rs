use imxrt_rom_sys::rom::flexspi_nor::{FlexspiNorConfig, SerialNorConfigOption};

use crate::{FlashController, FlashStorageError, Geometry, InterruptMask, ll};

/// i.MX RT1060, whose flash configuration block is probed by the boot ROM
/// before every operation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Rt1060;

impl FlashController for Rt1060 {
    const GEOMETRY: Geometry = Geometry::new(0x6000_0000, 8 * 1024 * 1024, 4096, 256, 0);

    fn config(&self, _mask: &InterruptMask) -> Result<FlexspiNorConfig, FlashStorageError> {
        let mut config = FlexspiNorConfig::EMPTY;
        let mut option = SerialNorConfigOption::QUAD_SPI_133MHZ;

        match unsafe { ll::get_config(Self::INSTANCE, &mut config, &mut option) } {
            Ok(()) => Ok(config),
            Err(status) => {
                error!("Querying the flash configuration failed: {}", status);
                Err(FlashStorageError::Config(status))
            }
        }
    }
}
