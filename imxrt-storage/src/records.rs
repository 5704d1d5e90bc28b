//! # Key/value records
//!
//! Update policies persist small settings (which image is current, network
//! configuration, boot counters) in a record area of two adjacent sectors.
//! Records are appended to the active sector; once it is full the newest copy
//! of every key is compacted into the other sector.
//!
//! Sector layout, one write unit per line:
//!
//! ```text
//! | magic | generation | 0xff ...              |  header
//! | key   | len        | data ...              |  record, padded to write units
//! | ...                                        |
//! | 0xff ...                                   |  free
//! ```
//!
//! A sector is valid once its header is written, which happens after all
//! records were copied into it. If both sectors are valid the higher
//! generation wins.

use core::fmt;

use crate::{FlashController, FlashStorage, FlashStorageError};

const MAGIC: u32 = 0x4b56_5331;
const ERASED: u32 = 0xffff_ffff;
const RECORD_HEADER_SIZE: u32 = 8;
const MAX_WRITE_ALIGN: usize = 256;

/// Record area error.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RecordError {
    /// No record with the requested key.
    NotFound,
    /// The record does not fit the provided buffer; holds the record length.
    BufferTooSmall(usize),
    /// The record payload exceeds the maximum record size.
    RecordTooLarge,
    /// The key is reserved.
    InvalidKey,
    /// The latest copies of all records do not fit a sector.
    AreaFull,
    /// Flash access failed.
    Storage(FlashStorageError),
}

impl From<FlashStorageError> for RecordError {
    fn from(e: FlashStorageError) -> Self {
        Self::Storage(e)
    }
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "record not found"),
            Self::BufferTooSmall(len) => write!(f, "record of {len} bytes does not fit"),
            Self::RecordTooLarge => write!(f, "record too large"),
            Self::InvalidKey => write!(f, "reserved record key"),
            Self::AreaFull => write!(f, "record area full"),
            Self::Storage(e) => write!(f, "{e}"),
        }
    }
}

impl core::error::Error for RecordError {}

#[derive(Clone, Copy, Debug)]
struct Record {
    key: u32,
    len: u32,
    /// Absolute address of the record header.
    address: u32,
}

impl Record {
    fn data_address(&self) -> u32 {
        self.address + RECORD_HEADER_SIZE
    }
}

/// Key/value store over two sectors of a [FlashStorage].
pub struct RecordStore<'a, C: FlashController> {
    storage: &'a mut FlashStorage<C>,
    start: u32,
    active: u32,
    generation: u32,
    cursor: u32,
}

impl<'a, C: FlashController> RecordStore<'a, C> {
    /// Largest payload of a single record.
    pub const MAX_RECORD_DATA: usize =
        (C::GEOMETRY.sector_size() - C::GEOMETRY.write_align() - RECORD_HEADER_SIZE) as usize;

    /// Opens the record area occupying the two sectors at `start`, formatting
    /// it if neither sector holds a valid header.
    pub fn new(storage: &'a mut FlashStorage<C>, start: u32) -> Result<Self, RecordError> {
        const { assert!(C::GEOMETRY.write_align() as usize <= MAX_WRITE_ALIGN) };

        let sector_size = C::GEOMETRY.sector_size();
        let first = C::GEOMETRY.range(start, 2 * sector_size as usize)?;
        if !first.is_sector_start() {
            return Err(FlashStorageError::NotAligned.into());
        }

        let headers = [
            read_header(storage, start)?,
            read_header(storage, start + sector_size)?,
        ];

        let mut store = Self {
            storage,
            start,
            active: start,
            generation: 0,
            cursor: 0,
        };

        match headers {
            [None, None] => {
                debug!("Formatting record area at {:#x}", start);
                store.storage.erase(start)?;
                store.write_header(start, 1)?;
                store.generation = 1;
            }
            [Some(generation), None] => store.generation = generation,
            [None, Some(generation)] => {
                store.active = start + sector_size;
                store.generation = generation;
            }
            [Some(first), Some(second)] => {
                // Interrupted compaction, the older sector still has to go.
                let (keep, stale, generation) = if second > first {
                    (start + sector_size, start, second)
                } else {
                    (start, start + sector_size, first)
                };
                store.storage.erase(stale)?;
                store.active = keep;
                store.generation = generation;
            }
        }

        store.cursor = store.scan(|_| {})?;
        debug!(
            "Record area at {:#x}: generation {}, {} bytes used",
            store.active,
            store.generation,
            store.cursor - store.active
        );

        Ok(store)
    }

    /// Reads the newest record for `key` into `buf`, returning its length.
    pub fn load(&self, key: u32, buf: &mut [u8]) -> Result<usize, RecordError> {
        let record = self.find(key)?.ok_or(RecordError::NotFound)?;
        let len = record.len as usize;
        if buf.len() < len {
            return Err(RecordError::BufferTooSmall(len));
        }

        self.storage.read(record.data_address(), &mut buf[..len])?;
        Ok(len)
    }

    /// Stores `data` under `key`, replacing any previous value.
    pub fn save(&mut self, key: u32, data: &[u8]) -> Result<(), RecordError> {
        if key == ERASED {
            return Err(RecordError::InvalidKey);
        }
        if data.len() > Self::MAX_RECORD_DATA {
            return Err(RecordError::RecordTooLarge);
        }

        let size = Self::padded(RECORD_HEADER_SIZE + data.len() as u32);
        if self.cursor + size > self.active_end() {
            // Nothing is erased unless the new record fits after compaction.
            let capacity = C::GEOMETRY.sector_size() - C::GEOMETRY.write_align();
            if self.retained(key)? + size > capacity {
                return Err(RecordError::AreaFull);
            }
            self.compact(key)?;
        }

        self.append(key, data)?;
        trace!("Saved record {} of {} bytes", key, data.len());
        Ok(())
    }

    /// Number of bytes left for records in the active sector.
    pub fn free(&self) -> usize {
        (self.active_end() - self.cursor) as usize
    }

    /// Generation of the active sector, increased by every compaction.
    pub fn generation(&self) -> u32 {
        self.generation
    }

    fn padded(len: u32) -> u32 {
        len.next_multiple_of(C::GEOMETRY.write_align())
    }

    fn active_end(&self) -> u32 {
        self.active + C::GEOMETRY.sector_size()
    }

    fn other(&self) -> u32 {
        if self.active == self.start {
            self.start + C::GEOMETRY.sector_size()
        } else {
            self.start
        }
    }

    /// Walks the records of the active sector, returning the first free
    /// address.
    fn scan(&self, mut f: impl FnMut(Record)) -> Result<u32, RecordError> {
        let end = self.active_end();
        let mut address = self.active + C::GEOMETRY.write_align();

        while address + RECORD_HEADER_SIZE <= end {
            let mut header = [0u8; RECORD_HEADER_SIZE as usize];
            self.storage.read(address, &mut header)?;

            let key = word(&header[..4]);
            let len = word(&header[4..]);
            if key == ERASED {
                return Ok(address);
            }
            let fits = len as usize <= Self::MAX_RECORD_DATA
                && address + Self::padded(RECORD_HEADER_SIZE + len) <= end;
            if !fits {
                warn!("Corrupt record at {:#x}, treating the area as full", address);
                return Ok(end);
            }

            f(Record { key, len, address });
            address += Self::padded(RECORD_HEADER_SIZE + len);
        }

        Ok(end)
    }

    /// Space taken by the newest record of every key but `skip`.
    fn retained(&self, skip: u32) -> Result<u32, RecordError> {
        let mut size = 0;
        let mut error = None;
        self.scan(|record| {
            if record.key == skip || error.is_some() {
                return;
            }
            match self.is_newest(record) {
                Ok(true) => size += Self::padded(RECORD_HEADER_SIZE + record.len),
                Ok(false) => {}
                Err(e) => error = Some(e),
            }
        })?;

        error.map_or(Ok(size), Err)
    }

    fn find(&self, key: u32) -> Result<Option<Record>, RecordError> {
        let mut found = None;
        self.scan(|record| {
            if record.key == key {
                found = Some(record);
            }
        })?;
        Ok(found)
    }

    /// Programs a record at the cursor. On failure the rest of the active
    /// sector is given up, so the next save compacts.
    fn append(&mut self, key: u32, data: &[u8]) -> Result<(), RecordError> {
        let size = Self::padded(RECORD_HEADER_SIZE + data.len() as u32);
        match self.program_record(self.cursor, key, data) {
            Ok(()) => {
                self.cursor += size;
                Ok(())
            }
            Err(e) => {
                warn!("Appending record {} failed, closing the sector", key);
                self.cursor = self.active_end();
                Err(e)
            }
        }
    }

    fn program_record(&mut self, address: u32, key: u32, data: &[u8]) -> Result<(), RecordError> {
        let align = C::GEOMETRY.write_align() as usize;
        let mut page = [0xffu8; MAX_WRITE_ALIGN];
        let page = &mut page[..align];

        // The header and the start of the data share the first unit, which is
        // programmed last so a torn record stays invisible.
        let head = data.len().min(align - RECORD_HEADER_SIZE as usize);
        let mut next = address + align as u32;
        for chunk in data[head..].chunks(align) {
            page.fill(0xff);
            page[..chunk.len()].copy_from_slice(chunk);
            self.storage.program(next, page)?;
            next += align as u32;
        }

        page.fill(0xff);
        page[..4].copy_from_slice(&key.to_ne_bytes());
        page[4..8].copy_from_slice(&(data.len() as u32).to_ne_bytes());
        page[8..][..head].copy_from_slice(&data[..head]);
        self.storage.program(address, page)?;

        Ok(())
    }

    /// Copies the newest record of every key but `skip` into the other
    /// sector and makes it the active one.
    fn compact(&mut self, skip: u32) -> Result<(), RecordError> {
        let target = self.other();
        let end = target + C::GEOMETRY.sector_size();
        debug!("Compacting record area into {:#x}", target);

        self.storage.erase(target)?;

        let mut cursor = target + C::GEOMETRY.write_align();
        let mut address = self.active + C::GEOMETRY.write_align();
        while address < self.cursor {
            let mut header = [0u8; RECORD_HEADER_SIZE as usize];
            self.storage.read(address, &mut header)?;
            let record = Record {
                key: word(&header[..4]),
                len: word(&header[4..]),
                address,
            };
            if record.key == ERASED || record.len as usize > Self::MAX_RECORD_DATA {
                break;
            }
            let size = Self::padded(RECORD_HEADER_SIZE + record.len);
            address += size;

            if record.key == skip || !self.is_newest(record)? {
                continue;
            }
            if cursor + size > end {
                return Err(RecordError::AreaFull);
            }

            // Flash to flash, staged by the write engine.
            let source = unsafe { self.storage.mapped(record.address, size as usize) }?;
            self.storage.write(cursor, source)?;
            cursor += size;
        }

        let generation = self.generation.wrapping_add(1);
        self.write_header(target, generation)?;
        self.storage.erase(self.active)?;

        self.active = target;
        self.generation = generation;
        self.cursor = cursor;
        Ok(())
    }

    fn is_newest(&self, record: Record) -> Result<bool, RecordError> {
        Ok(self
            .find(record.key)?
            .is_some_and(|newest| newest.address == record.address))
    }

    fn write_header(&mut self, sector: u32, generation: u32) -> Result<(), RecordError> {
        let align = C::GEOMETRY.write_align() as usize;
        let mut page = [0xffu8; MAX_WRITE_ALIGN];
        page[..4].copy_from_slice(&MAGIC.to_ne_bytes());
        page[4..8].copy_from_slice(&generation.to_ne_bytes());

        self.storage.program(sector, &page[..align])?;
        Ok(())
    }
}

fn read_header<C: FlashController>(
    storage: &FlashStorage<C>,
    sector: u32,
) -> Result<Option<u32>, RecordError> {
    let mut header = [0u8; 8];
    storage.read(sector, &mut header)?;

    Ok((word(&header[..4]) == MAGIC).then(|| word(&header[4..])))
}

fn word(bytes: &[u8]) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(bytes);
    u32::from_ne_bytes(word)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{Config, Rt1020, emulation::*};

    const AREA: u32 = 0x6070_0000;

    fn storage() -> FlashStorage<Rt1020> {
        reset_state();
        FlashStorage::new(Rt1020, Config::default()).unwrap()
    }

    #[test]
    fn formats_an_erased_area() {
        let mut flash = storage();
        let store = RecordStore::new(&mut flash, AREA).unwrap();

        assert_eq!(store.generation(), 1);
        assert_eq!(store.free(), 4096 - 256);
        assert_eq!(store.load(1, &mut [0u8; 4]), Err(RecordError::NotFound));
    }

    #[test]
    fn save_and_load() {
        let mut flash = storage();
        let mut store = RecordStore::new(&mut flash, AREA).unwrap();

        store.save(1, b"current=a").unwrap();
        store.save(2, &[7u8; 600]).unwrap();
        store.save(1, b"current=b").unwrap();

        let mut buf = [0u8; 16];
        let len = store.load(1, &mut buf).unwrap();
        assert_eq!(&buf[..len], b"current=b");

        let mut buf = [0u8; 600];
        assert_eq!(store.load(2, &mut buf).unwrap(), 600);
        assert_eq!(buf, [7u8; 600]);

        assert_eq!(
            store.load(2, &mut [0u8; 10]),
            Err(RecordError::BufferTooSmall(600))
        );
    }

    #[test]
    fn records_survive_reopening() {
        let mut flash = storage();
        RecordStore::new(&mut flash, AREA)
            .unwrap()
            .save(9, b"persisted")
            .unwrap();

        let store = RecordStore::new(&mut flash, AREA).unwrap();
        let mut buf = [0u8; 9];
        assert_eq!(store.load(9, &mut buf).unwrap(), 9);
        assert_eq!(&buf, b"persisted");
    }

    #[test]
    fn compaction_keeps_newest_records() {
        let mut flash = storage();
        let mut store = RecordStore::new(&mut flash, AREA).unwrap();

        store.save(1, b"kept").unwrap();
        // 15 units of room, each save of key 2 takes one
        for round in 0..40u8 {
            store.save(2, &[round; 100]).unwrap();
        }

        assert!(store.generation() > 1);

        let mut buf = [0u8; 100];
        assert_eq!(store.load(1, &mut buf).unwrap(), 4);
        assert_eq!(&buf[..4], b"kept");
        assert_eq!(store.load(2, &mut buf).unwrap(), 100);
        assert_eq!(buf, [39u8; 100]);

        drop(store);
        let store = RecordStore::new(&mut flash, AREA).unwrap();
        assert_eq!(store.load(2, &mut buf).unwrap(), 100);
        assert_eq!(buf, [39u8; 100]);
    }

    #[test]
    fn interrupted_compaction_keeps_the_newer_sector() {
        let mut flash = storage();
        {
            let mut store = RecordStore::new(&mut flash, AREA).unwrap();
            store.save(5, b"old").unwrap();
        }

        // A second valid sector with a higher generation and no records
        flash.erase(AREA + 4096).unwrap();
        let mut header = [0xffu8; 256];
        header[..4].copy_from_slice(&MAGIC.to_ne_bytes());
        header[4..8].copy_from_slice(&2u32.to_ne_bytes());
        flash.program(AREA + 4096, &header).unwrap();

        let store = RecordStore::new(&mut flash, AREA).unwrap();
        assert_eq!(store.generation(), 2);
        assert_eq!(store.load(5, &mut [0u8; 8]), Err(RecordError::NotFound));
        drop(store);

        let mut magic = [0u8; 4];
        flash.read(AREA, &mut magic).unwrap();
        assert_eq!(magic, [0xff; 4]);
    }

    #[test]
    fn rejects_invalid_records() {
        let mut flash = storage();
        let mut store = RecordStore::new(&mut flash, AREA).unwrap();

        assert_eq!(store.save(ERASED, b"x"), Err(RecordError::InvalidKey));
        assert_eq!(
            store.save(1, &[0u8; 4096]),
            Err(RecordError::RecordTooLarge)
        );
        store
            .save(1, &vec![1u8; RecordStore::<Rt1020>::MAX_RECORD_DATA])
            .unwrap();
    }

    #[test]
    fn full_area_keeps_the_previous_value() {
        let mut flash = storage();
        let mut store = RecordStore::new(&mut flash, AREA).unwrap();

        store.save(1, &[1u8; 2000]).unwrap();
        store.save(2, &[2u8; 1500]).unwrap();
        let generation = store.generation();
        clear_journal();

        assert_eq!(store.save(2, &[3u8; 2000]), Err(RecordError::AreaFull));
        assert!(
            !journal()
                .iter()
                .any(|e| matches!(e, Event::Erase { .. } | Event::Program { .. }))
        );
        assert_eq!(store.generation(), generation);

        let mut buf = [0u8; 2000];
        assert_eq!(store.load(2, &mut buf).unwrap(), 1500);
        assert_eq!(buf[..1500], [2u8; 1500]);
        assert_eq!(store.load(1, &mut buf).unwrap(), 2000);
        assert_eq!(buf, [1u8; 2000]);

        // Still room once the old value of key 2 is compacted away
        store.save(2, &[4u8; 1000]).unwrap();
        assert_eq!(store.generation(), generation + 1);
        assert_eq!(store.load(2, &mut buf).unwrap(), 1000);
        assert_eq!(buf[..1000], [4u8; 1000]);
        assert_eq!(store.load(1, &mut buf).unwrap(), 2000);
    }

    #[test]
    fn failed_append_leaves_no_partial_record() {
        let mut flash = storage();
        let mut store = RecordStore::new(&mut flash, AREA).unwrap();
        store.save(1, b"old").unwrap();

        fail_program_after(1);
        assert!(matches!(
            store.save(1, &[5u8; 600]),
            Err(RecordError::Storage(FlashStorageError::Rom(_)))
        ));
        assert_eq!(store.free(), 0);

        let mut buf = [0u8; 600];
        assert_eq!(store.load(1, &mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], b"old");

        // The next save starts over in the other sector
        clear_program_failure();
        store.save(1, b"new").unwrap();
        assert_eq!(store.generation(), 2);
        assert_eq!(store.load(1, &mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], b"new");
    }

    #[test]
    fn area_must_be_sector_aligned_and_in_range() {
        let mut flash = storage();

        assert!(matches!(
            RecordStore::new(&mut flash, AREA + 256),
            Err(RecordError::Storage(FlashStorageError::NotAligned))
        ));
        assert!(matches!(
            RecordStore::new(&mut flash, 0x607f_f000),
            Err(RecordError::Storage(FlashStorageError::OutOfBounds))
        ));
    }
}
