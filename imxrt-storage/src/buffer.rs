use core::{mem::MaybeUninit, slice};

pub type FlashSectorBuffer = FlashBuffer<4096, 1024>;

/// Word-aligned RAM buffer that stages data handed to the ROM.
#[repr(C)]
pub union FlashBuffer<const N: usize, const M: usize> {
    bytes: [MaybeUninit<u8>; N],
    words: [MaybeUninit<u32>; M],
}

impl<const N: usize, const M: usize> FlashBuffer<N, M> {
    pub const SIZE: usize = N;

    pub const fn uninit() -> Self {
        assert!(N == M * 4);
        Self {
            words: [MaybeUninit::uninit(); M],
        }
    }

    /// Copies `bytes` into the buffer starting at byte `at`.
    ///
    /// # Panics
    ///
    /// Panics if `bytes` does not fit.
    pub fn fill(&mut self, at: usize, bytes: &[u8]) {
        let dst = unsafe { &mut self.bytes[at..][..bytes.len()] };
        for (d, s) in dst.iter_mut().zip(bytes) {
            d.write(*s);
        }
    }

    /// Returns the first `len` bytes as words.
    ///
    /// # Safety
    ///
    /// The first `len` bytes must have been filled and `len` must be a
    /// multiple of 4.
    pub unsafe fn assume_init_words(&self, len: usize) -> &[u32] {
        debug_assert!(len <= N && len % 4 == 0);
        unsafe { slice::from_raw_parts(self.words.as_ptr() as *const u32, len / 4) }
    }
}
