use embedded_storage::nor_flash::{
    ErrorType,
    NorFlash,
    NorFlashError,
    NorFlashErrorKind,
    ReadNorFlash,
};

use crate::{FlashController, FlashStorage, FlashStorageError};

impl<C: FlashController> FlashStorage<C> {
    /// Maps an offset from the start of the flash to its memory-mapped
    /// address.
    #[inline(always)]
    fn absolute(offset: u32) -> Result<u32, FlashStorageError> {
        Self::BASE
            .checked_add(offset)
            .ok_or(FlashStorageError::OutOfBounds)
    }
}

impl NorFlashError for FlashStorageError {
    fn kind(&self) -> NorFlashErrorKind {
        match self {
            Self::NotAligned => NorFlashErrorKind::NotAligned,
            Self::OutOfBounds => NorFlashErrorKind::OutOfBounds,
            _ => NorFlashErrorKind::Other,
        }
    }
}

impl<C: FlashController> ErrorType for FlashStorage<C> {
    type Error = FlashStorageError;
}

/// Offsets are relative to the start of the flash.
impl<C: FlashController> ReadNorFlash for FlashStorage<C> {
    const READ_SIZE: usize = 1;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        FlashStorage::read(self, Self::absolute(offset)?, bytes)
    }

    fn capacity(&self) -> usize {
        Self::SIZE as usize
    }
}

/// Writes only program, sectors have to be erased beforehand.
impl<C: FlashController> NorFlash for FlashStorage<C> {
    const WRITE_SIZE: usize = C::GEOMETRY.write_align() as usize;
    const ERASE_SIZE: usize = C::GEOMETRY.sector_size() as usize;

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        self.program(Self::absolute(offset)?, bytes)
    }

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        self.erase_range(Self::absolute(from)?, Self::absolute(to)?)
    }
}

#[cfg(test)]
mod test {
    use embedded_storage::nor_flash::check_erase;

    use super::*;
    use crate::{Config, Rt1020, emulation::*};

    const SECTOR_SIZE: u32 = 4 << 10;

    fn storage() -> FlashStorage<Rt1020> {
        reset_state();
        FlashStorage::new(Rt1020, Config::default()).unwrap()
    }

    #[test]
    fn sizes_follow_geometry() {
        let flash = storage();
        assert_eq!(<FlashStorage<Rt1020> as NorFlash>::WRITE_SIZE, 256);
        assert_eq!(<FlashStorage<Rt1020> as NorFlash>::ERASE_SIZE, 4096);
        assert_eq!(<FlashStorage<Rt1020> as ReadNorFlash>::READ_SIZE, 1);
        assert_eq!(ReadNorFlash::capacity(&flash), 8 * 1024 * 1024);
    }

    #[test]
    fn erase_write_read() {
        let mut flash = storage();
        let data: Vec<u8> = (0..768u32).map(|i| (i % 251) as u8).collect();

        NorFlash::erase(&mut flash, SECTOR_SIZE, 3 * SECTOR_SIZE).unwrap();
        NorFlash::write(&mut flash, SECTOR_SIZE + 256, &data).unwrap();

        let mut read = [0u8; 768];
        ReadNorFlash::read(&mut flash, SECTOR_SIZE + 256, &mut read).unwrap();
        assert_eq!(read[..], data[..]);

        // Bytewise reads at any alignment
        let mut read = [0u8; 7];
        ReadNorFlash::read(&mut flash, SECTOR_SIZE + 256 + 3, &mut read).unwrap();
        assert_eq!(read[..], data[3..10]);
    }

    #[test]
    fn write_does_not_erase() {
        let mut flash = storage();
        clear_journal();

        NorFlash::write(&mut flash, 2 * SECTOR_SIZE, &[0xa5; 256]).unwrap();
        assert!(
            !journal()
                .iter()
                .any(|e| matches!(e, Event::Erase { .. }))
        );
    }

    #[test]
    fn errors_map_to_kinds() {
        let mut flash = storage();

        let err = NorFlash::write(&mut flash, 100, &[0; 256]).unwrap_err();
        assert_eq!(err.kind(), NorFlashErrorKind::NotAligned);

        let err = NorFlash::erase(&mut flash, 0, 100).unwrap_err();
        assert_eq!(err.kind(), NorFlashErrorKind::NotAligned);

        let mut data = [0u8; 16];
        let err = ReadNorFlash::read(&mut flash, 8 * 1024 * 1024, &mut data).unwrap_err();
        assert_eq!(err.kind(), NorFlashErrorKind::OutOfBounds);

        let err = ReadNorFlash::read(&mut flash, u32::MAX, &mut data).unwrap_err();
        assert_eq!(err.kind(), NorFlashErrorKind::OutOfBounds);

        assert_eq!(FlashStorageError::Rom(1).kind(), NorFlashErrorKind::Other);
    }

    #[test]
    fn empty_accesses_at_the_end_are_accepted() {
        let mut flash = storage();
        let capacity = ReadNorFlash::capacity(&flash) as u32;
        clear_journal();

        ReadNorFlash::read(&mut flash, capacity, &mut []).unwrap();
        NorFlash::erase(&mut flash, capacity, capacity).unwrap();
        NorFlash::write(&mut flash, capacity, &[]).unwrap();
        assert!(journal().is_empty());

        let err = ReadNorFlash::read(&mut flash, capacity, &mut [0u8; 1]).unwrap_err();
        assert_eq!(err.kind(), NorFlashErrorKind::OutOfBounds);
    }

    #[test]
    fn erase_arguments_are_checked_like_the_trait_helper() {
        let flash = storage();

        assert!(check_erase(&flash, 0, SECTOR_SIZE).is_ok());
        assert_eq!(
            check_erase(&flash, 0, 100).unwrap_err(),
            NorFlashErrorKind::NotAligned
        );
    }
}
