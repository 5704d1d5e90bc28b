use imxrt_rom_sys::rom::flexspi_nor::FlexspiNorConfig;

use crate::{FlashStorageError, Geometry, InterruptMask, check_rc, ll};

/// A device variant driving its boot flash through the ROM FlexSPI NOR
/// driver.
///
/// Implementors only describe the flash and how to obtain its configuration
/// block. The provided methods are the only code calling into the ROM; each of
/// them derives a fresh configuration block for the call.
pub trait FlashController {
    /// Layout of the flash.
    const GEOMETRY: Geometry;

    /// FlexSPI instance the flash is attached to.
    const INSTANCE: u32 = 0;

    /// Returns the configuration block describing the attached flash.
    fn config(&self, mask: &InterruptMask) -> Result<FlexspiNorConfig, FlashStorageError>;

    /// Configures FlexSPI and the flash device.
    fn init(&self, mask: &InterruptMask) -> Result<(), FlashStorageError> {
        let mut config = self.config(mask)?;
        unsafe { ll::init(Self::INSTANCE, &mut config) }.or_else(check_rc)
    }

    /// Erases `len` bytes at `offset` from the start of the flash. Both must
    /// be sector aligned.
    fn erase(&self, mask: &InterruptMask, offset: u32, len: u32) -> Result<(), FlashStorageError> {
        let mut config = self.config(mask)?;
        unsafe { ll::erase(Self::INSTANCE, &mut config, offset, len) }.or_else(check_rc)
    }

    /// Erases the whole flash.
    fn erase_all(&self, mask: &InterruptMask) -> Result<(), FlashStorageError> {
        let mut config = self.config(mask)?;
        unsafe { ll::erase_all(Self::INSTANCE, &mut config) }.or_else(check_rc)
    }

    /// Programs one page at `offset` from the start of the flash.
    fn program(
        &self,
        mask: &InterruptMask,
        offset: u32,
        page: &[u32],
    ) -> Result<(), FlashStorageError> {
        debug_assert_eq!(page.len() * 4, Self::GEOMETRY.write_align() as usize);

        let mut config = self.config(mask)?;
        unsafe { ll::program(Self::INSTANCE, &mut config, offset, page.as_ptr()) }
            .or_else(check_rc)
    }
}
