use core::slice;

use crate::{
    FlashController,
    FlashStorage,
    FlashStorageError,
    InterruptMask,
    buffer::FlashSectorBuffer,
    chip_specific,
};

/// Part of a write that falls into a single sector.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Segment {
    /// Offset of the first byte from the start of the flash.
    pub offset: u32,
    /// Length in bytes.
    pub len: u32,
    /// Position of the first byte in the written data.
    pub position: usize,
}

/// Splits `[offset, offset + len)` at sector boundaries.
#[derive(Clone, Debug)]
pub(crate) struct Segments {
    sector_size: u32,
    origin: u32,
    front: u32,
    back: u32,
}

impl Segments {
    pub fn new(sector_size: u32, offset: u32, len: u32) -> Self {
        Self {
            sector_size,
            origin: offset,
            front: offset,
            back: offset + len,
        }
    }

    fn segment(&self, start: u32, end: u32) -> Segment {
        Segment {
            offset: start,
            len: end - start,
            position: (start - self.origin) as usize,
        }
    }
}

impl Iterator for Segments {
    type Item = Segment;

    fn next(&mut self) -> Option<Segment> {
        if self.front >= self.back {
            return None;
        }

        let sector_end = self.front - self.front % self.sector_size + self.sector_size;
        let end = sector_end.min(self.back);
        let segment = self.segment(self.front, end);
        self.front = end;
        Some(segment)
    }
}

impl DoubleEndedIterator for Segments {
    fn next_back(&mut self) -> Option<Segment> {
        if self.front >= self.back {
            return None;
        }

        let last = self.back - 1;
        let start = (last - last % self.sector_size).max(self.front);
        let segment = self.segment(start, self.back);
        self.back = start;
        Some(segment)
    }
}

impl<C: FlashController> FlashStorage<C> {
    /// Writes `bytes` at `address`.
    ///
    /// Every sector is erased when the write enters it at its first byte, so
    /// a write starting in the middle of a sector keeps the bytes in front of
    /// it and relies on the rest of that sector being erased. `bytes` may
    /// point into the flash itself, even into the range being written.
    ///
    /// `address` and the length of `bytes` must be multiples of
    /// [write_align](Self::write_align). A failing ROM call aborts the write,
    /// leaving the already erased and programmed part in place.
    pub fn write(&mut self, address: u32, bytes: &[u8]) -> Result<(), FlashStorageError> {
        self.write_segments(address, bytes, true)
    }

    /// Programs `bytes` at `address` into previously erased flash.
    ///
    /// Same as [write](Self::write) without erasing any sector.
    pub fn program(&mut self, address: u32, bytes: &[u8]) -> Result<(), FlashStorageError> {
        self.write_segments(address, bytes, false)
    }

    fn write_segments(
        &mut self,
        address: u32,
        bytes: &[u8],
        erase: bool,
    ) -> Result<(), FlashStorageError> {
        const { assert!(C::GEOMETRY.sector_size() as usize <= FlashSectorBuffer::SIZE) };

        if bytes.len() % Self::WRITE_ALIGN as usize != 0 {
            error!("Write length {} is not a multiple of {}", bytes.len(), Self::WRITE_ALIGN);
            return Err(FlashStorageError::NotAligned);
        }

        let destination = C::GEOMETRY.range(address, bytes.len())?;
        if !destination.is_aligned(Self::WRITE_ALIGN) {
            error!("Write address {:#x} is not aligned to {}", address, Self::WRITE_ALIGN);
            return Err(FlashStorageError::NotAligned);
        }

        if bytes.is_empty() {
            return Ok(());
        }

        let offset = destination.offset();
        let len = bytes.len() as u32;
        let source = self.flash_source(bytes);

        // Held across the whole write, making the per-page masks no-ops.
        let _vector_table_mask = if self.touches_vector_table(offset, len) {
            debug!("Write at {:#x} rewrites the vector table sector", address);
            Some(InterruptMask::acquire())
        } else {
            None
        };

        let mut stage = FlashSectorBuffer::uninit();
        let segments = Segments::new(Self::SECTOR_SIZE, offset, len);

        match source {
            Some(src) if src < offset && src + len > offset => {
                for segment in segments.rev() {
                    self.write_segment(segment, bytes, source, erase, &mut stage)?;
                }
            }
            _ => {
                for segment in segments {
                    self.write_segment(segment, bytes, source, erase, &mut stage)?;
                }
            }
        }

        debug!("Wrote {} bytes at {:#x}", len, address);
        Ok(())
    }

    fn write_segment(
        &mut self,
        segment: Segment,
        bytes: &[u8],
        source: Option<u32>,
        erase: bool,
        stage: &mut FlashSectorBuffer,
    ) -> Result<(), FlashStorageError> {
        let data = &bytes[segment.position..][..segment.len as usize];
        let page_size = Self::WRITE_ALIGN as usize;

        // The source is captured before the sector is erased.
        let words = match source {
            Some(src) => {
                let src = src + segment.position as u32;
                for (index, page) in data.chunks(page_size).enumerate() {
                    if src + (index * page_size) as u32 > self.config.code_offset() {
                        self.read_warmup();
                    }
                    stage.fill(index * page_size, page);
                }
                unsafe { stage.assume_init_words(data.len()) }
            }
            None if data.as_ptr().align_offset(4) == 0 => unsafe {
                slice::from_raw_parts(data.as_ptr() as *const u32, data.len() / 4)
            },
            None => {
                stage.fill(0, data);
                unsafe { stage.assume_init_words(data.len()) }
            }
        };

        let destination = C::GEOMETRY.address(Self::BASE + segment.offset)?;
        if erase && destination.is_sector_start() {
            self.erase_sector(destination)?;
        }

        for (index, page) in words.chunks(page_size / 4).enumerate() {
            let offset = segment.offset + (index * page_size) as u32;
            InterruptMask::with(|mask| self.controller.program(mask, offset, page)).inspect_err(
                |e| error!("Programming {:#x} failed: {:?}", Self::BASE + offset, e),
            )?;
        }

        trace!("Programmed {} bytes at {:#x}", segment.len, destination.get());
        Ok(())
    }

    /// Offset from the start of the flash of `bytes`, if they live in the
    /// memory-mapped flash.
    fn flash_source(&self, bytes: &[u8]) -> Option<u32> {
        let window = chip_specific::window(&C::GEOMETRY) as usize;
        let ptr = bytes.as_ptr() as usize;

        (ptr >= window && ptr - window < Self::SIZE as usize).then(|| (ptr - window) as u32)
    }

    fn touches_vector_table(&self, offset: u32, len: u32) -> bool {
        let code_offset = self.config.code_offset();
        if !self.config.run_in_flash() || code_offset >= Self::SIZE {
            return false;
        }

        let sector = code_offset - code_offset % Self::SECTOR_SIZE;
        offset < sector + Self::SECTOR_SIZE && sector < offset + len
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{Config, Rt1020, Rt1060, emulation::*};

    const SECTOR: u32 = 4096;

    #[repr(C, align(4))]
    struct Data<const N: usize>([u8; N]);

    impl<const N: usize> Data<N> {
        fn seq(seed: u8) -> Self {
            let mut data = [0u8; N];
            for (index, byte) in data.iter_mut().enumerate() {
                *byte = (index as u8).wrapping_mul(7).wrapping_add(seed);
            }
            Self(data)
        }
    }

    fn storage(config: Config) -> FlashStorage<Rt1020> {
        reset_state();
        let flash = FlashStorage::new(Rt1020, config).unwrap();
        clear_journal();
        flash
    }

    fn read_back<C: FlashController>(flash: &FlashStorage<C>, address: u32, len: usize) -> Vec<u8> {
        let mut data = vec![0u8; len];
        flash.read(address, &mut data).unwrap();
        data
    }

    fn rom_calls() -> Vec<Event> {
        journal()
            .into_iter()
            .filter(|e| matches!(e, Event::Erase { .. } | Event::Program { .. }))
            .collect()
    }

    #[test]
    fn segments_split_at_sector_boundaries() {
        let segments: Vec<_> = Segments::new(SECTOR, 3 * 1024, 6 * 1024).collect();
        assert_eq!(segments, [
            Segment {
                offset: 3 * 1024,
                len: 1024,
                position: 0,
            },
            Segment {
                offset: 4 * 1024,
                len: 4096,
                position: 1024,
            },
            Segment {
                offset: 8 * 1024,
                len: 1024,
                position: 5 * 1024,
            },
        ]);

        let reversed: Vec<_> = Segments::new(SECTOR, 3 * 1024, 6 * 1024).rev().collect();
        assert_eq!(reversed, segments.iter().rev().copied().collect::<Vec<_>>());

        assert_eq!(Segments::new(SECTOR, 4096, 0).next(), None);
    }

    #[test]
    fn one_sector_is_one_erase_and_sixteen_programs() {
        let mut flash = storage(Config::default());
        let src = Data::<4096>::seq(1);

        flash.write(flash.start(), &src.0).unwrap();

        let mut expected = vec![Event::Erase {
            offset: 0,
            len: SECTOR,
            masked: true,
        }];
        expected.extend((0..16).map(|page| Event::Program {
            offset: page * 256,
            masked: true,
        }));
        assert_eq!(rom_calls(), expected);
        assert_eq!(read_back(&flash, flash.start(), 4096), src.0);
    }

    #[test]
    fn erases_precede_the_pages_of_their_sector() {
        let mut flash = storage(Config::default().with_run_in_flash(false));
        let src = Data::<8192>::seq(2);

        flash.write(flash.start() + 4096, &src.0).unwrap();

        let calls = rom_calls();
        assert_eq!(calls.len(), 2 + 32);
        assert_eq!(calls[0], Event::Erase {
            offset: 4096,
            len: SECTOR,
            masked: true,
        });
        assert_eq!(calls[17], Event::Erase {
            offset: 8192,
            len: SECTOR,
            masked: true,
        });
        for (index, call) in calls.iter().enumerate().filter(|(i, _)| *i != 0 && *i != 17) {
            let page = if index < 17 { index - 1 } else { index - 2 };
            assert_eq!(*call, Event::Program {
                offset: 4096 + page as u32 * 256,
                masked: true,
            });
        }
        assert_eq!(read_back(&flash, flash.start() + 4096, 8192), src.0);
    }

    #[test]
    fn write_within_a_sector_does_not_erase() {
        let mut flash = storage(Config::default());
        let address = flash.start() + 0x10_0000 + 512;

        flash.write(address, &Data::<512>::seq(3).0).unwrap();
        assert!(rom_calls().iter().all(|e| matches!(e, Event::Program { .. })));
        assert_eq!(rom_calls().len(), 2);
    }

    #[test]
    fn misaligned_writes_touch_nothing() {
        let mut flash = storage(Config::default());
        let src = Data::<512>::seq(4);

        assert_eq!(
            flash.write(flash.start(), &src.0[..300]),
            Err(FlashStorageError::NotAligned)
        );
        assert_eq!(
            flash.write(flash.start() + 128, &src.0[..256]),
            Err(FlashStorageError::NotAligned)
        );
        assert_eq!(
            flash.write(flash.start() + flash.size() - 256, &src.0),
            Err(FlashStorageError::OutOfBounds)
        );
        assert_eq!(
            flash.write(0x2000_0000, &src.0),
            Err(FlashStorageError::OutOfBounds)
        );
        assert!(journal().is_empty());
    }

    #[test]
    fn empty_write_succeeds_without_rom_calls() {
        let mut flash = storage(Config::default());
        flash.write(flash.start(), &[]).unwrap();
        assert!(journal().is_empty());
    }

    #[test]
    fn unaligned_ram_source_is_staged() {
        let mut flash = storage(Config::default());
        let src = Data::<1025>::seq(5);
        let unaligned = &src.0[1..];

        flash.write(flash.start() + 0x2_0000, unaligned).unwrap();
        assert_eq!(read_back(&flash, flash.start() + 0x2_0000, 1024), unaligned);
    }

    #[test]
    fn interrupts_are_restored_after_write() {
        let mut flash = storage(Config::default());
        let address = flash.start() + 0x3_0000;

        flash.write(address, &Data::<512>::seq(6).0).unwrap();
        assert!(interrupts_enabled());

        set_interrupts_enabled(false);
        flash.write(address, &Data::<512>::seq(7).0).unwrap();
        assert!(!interrupts_enabled());
        assert!(journal().iter().all(|e| match e {
            Event::Erase { masked, .. } | Event::Program { masked, .. } => *masked,
            _ => true,
        }));
    }

    #[test]
    fn pages_are_masked_one_by_one() {
        let mut flash = storage(Config::default());

        flash.write(flash.start() + 0x4_0000, &Data::<1024>::seq(8).0).unwrap();

        let unmasks = journal()
            .into_iter()
            .filter(|e| *e == Event::Mask { enabled: true })
            .count();
        // One for the erase, one per page
        assert_eq!(unmasks, 1 + 4);
    }

    #[test]
    fn vector_table_write_stays_masked() {
        let mut flash = storage(Config::default());
        let src = Data::<8192>::seq(9);

        flash.write(flash.start() + 0x1000, &src.0).unwrap();

        let journal = journal();
        assert_eq!(journal.first(), Some(&Event::Mask { enabled: false }));
        assert_eq!(journal.last(), Some(&Event::Mask { enabled: true }));
        let toggles = journal
            .iter()
            .filter(|e| matches!(e, Event::Mask { .. }))
            .count();
        assert_eq!(toggles, 2);
        assert!(interrupts_enabled());
        assert_eq!(read_back(&flash, flash.start() + 0x1000, 8192), src.0);
    }

    #[test]
    fn vector_table_guard_follows_code_offset() {
        let mut flash = storage(Config::default().with_code_offset(0x1_0000));

        flash.write(flash.start() + 0x2000, &Data::<256>::seq(10).0).unwrap();
        assert!(journal().iter().filter(|e| matches!(e, Event::Mask { .. })).count() > 2);
        clear_journal();

        flash.write(flash.start() + 0x1_0000, &Data::<256>::seq(10).0).unwrap();
        assert_eq!(journal().iter().filter(|e| matches!(e, Event::Mask { .. })).count(), 2);
    }

    #[test]
    fn vector_table_guard_disabled_when_running_from_ram() {
        let mut flash = storage(Config::default().with_run_in_flash(false));

        flash.write(flash.start() + 0x2000, &Data::<512>::seq(11).0).unwrap();
        assert!(journal().iter().filter(|e| matches!(e, Event::Mask { .. })).count() > 2);
    }

    #[test]
    fn flash_to_flash_copy() {
        let mut flash = storage(Config::default());
        let src = Data::<4096>::seq(12);
        let from = flash.start() + 0x10_0000;
        let to = flash.start() + 0x20_0000;

        flash.write(from, &src.0).unwrap();
        clear_journal();

        let source = unsafe { flash.mapped(from, 4096) }.unwrap();
        flash.write(to, source).unwrap();

        assert_eq!(read_back(&flash, to, 4096), src.0);
        let warmups = journal()
            .into_iter()
            .filter(|e| *e == Event::ReadWarmup)
            .count();
        assert!(warmups >= 16);
    }

    #[test]
    fn flash_to_flash_copy_within_code_region_needs_no_warmup() {
        let mut flash = storage(Config::default().with_run_in_flash(false));
        let src = Data::<1024>::seq(13);

        flash.write(flash.start(), &src.0).unwrap();
        clear_journal();

        let source = unsafe { flash.mapped(flash.start(), 1024) }.unwrap();
        flash.write(flash.start() + 0x10_0000, source).unwrap();

        assert!(!journal().contains(&Event::ReadWarmup));
        assert_eq!(read_back(&flash, flash.start() + 0x10_0000, 1024), src.0);
    }

    #[test]
    fn overlapping_copy_to_higher_address() {
        let mut flash = storage(Config::default());
        let src = Data::<12288>::seq(14);
        let from = flash.start() + 0x10_0000;
        let to = from + 4096;

        flash.write(from, &src.0).unwrap();

        let source = unsafe { flash.mapped(from, 12288) }.unwrap();
        flash.write(to, source).unwrap();

        assert_eq!(read_back(&flash, to, 12288), src.0);
    }

    #[test]
    fn overlapping_copy_to_lower_address() {
        let mut flash = storage(Config::default());
        let src = Data::<8192>::seq(15);
        let to = flash.start() + 0x10_0000;
        let from = to + 1024;

        flash.write(from, &src.0).unwrap();

        let source = unsafe { flash.mapped(from, 8192) }.unwrap();
        flash.write(to, source).unwrap();

        assert_eq!(read_back(&flash, to, 8192), src.0);
    }

    #[test]
    fn failing_page_stops_the_write() {
        let mut flash = storage(Config::default());
        let address = flash.start() + 0x5_0000;
        fail_program_after(3);

        assert!(matches!(
            flash.write(address, &Data::<4096>::seq(16).0),
            Err(FlashStorageError::Rom(_))
        ));

        let programs = rom_calls()
            .into_iter()
            .filter(|e| matches!(e, Event::Program { .. }))
            .count();
        assert_eq!(programs, 4);
        assert!(interrupts_enabled());

        let written = read_back(&flash, address, 4096);
        assert_eq!(written[..768], Data::<4096>::seq(16).0[..768]);
        assert!(written[768..].iter().all(|b| *b == 0xff));
    }

    #[test]
    fn program_does_not_erase() {
        let mut flash = storage(Config::default());
        let address = flash.start() + 0x6_0000;

        flash.program(address, &[0x0f; 256]).unwrap();
        flash.program(address, &[0xf3; 256]).unwrap();

        assert!(!rom_calls().iter().any(|e| matches!(e, Event::Erase { .. })));
        assert_eq!(read_back(&flash, address, 256), [0x03; 256]);
    }

    #[test]
    fn configuration_is_derived_for_every_rom_call() {
        reset_state();
        let mut flash = FlashStorage::new(Rt1060, Config::default()).unwrap();
        clear_journal();

        flash.write(flash.start() + 0x7_0000, &Data::<4096>::seq(17).0).unwrap();

        let queries = journal()
            .into_iter()
            .filter(|e| *e == Event::GetConfig)
            .count();
        assert_eq!(queries, 1 + 16);
    }
}
