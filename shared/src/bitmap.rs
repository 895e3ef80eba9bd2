use alloc::{boxed::Box, vec};

const WORD_BITS: usize = u64::BITS as usize;

/// A fixed-length array of bits stored in 64-bit words.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bitmap {
    words: Box<[u64]>,
    len: usize,
}

impl Bitmap {
    /// A bitmap of `len` bits, all cleared.
    pub fn new(len: usize) -> Self {
        Self {
            words: vec![0; len.div_ceil(WORD_BITS)].into_boxed_slice(),
            len,
        }
    }

    pub const fn len(&self) -> usize {
        self.len
    }

    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Panics if `idx` is out of range.
    pub fn test(&self, idx: usize) -> bool {
        assert!(idx < self.len, "bit {idx} out of range ({})", self.len);
        (self.words[idx / WORD_BITS] >> (idx % WORD_BITS) & 1) != 0
    }

    /// Panics if `idx` is out of range.
    pub fn set(&mut self, idx: usize, value: bool) {
        assert!(idx < self.len, "bit {idx} out of range ({})", self.len);
        let mask = 1 << (idx % WORD_BITS);
        let word = &mut self.words[idx / WORD_BITS];
        if value {
            *word |= mask;
        } else {
            *word &= !mask;
        }
    }

    pub fn set_all(&mut self, value: bool) {
        let fill = if value { u64::MAX } else { 0 };
        self.words.iter_mut().for_each(|word| *word = fill);
        self.clear_tail();
    }

    /// Number of bits set to `value`.
    pub fn count(&self, value: bool) -> usize {
        let ones = self.words.iter().map(|w| w.count_ones() as usize).sum();
        if value {
            ones
        } else {
            self.len - ones
        }
    }

    /// Index of the first bit equal to `value`.
    pub fn scan(&self, value: bool) -> Option<usize> {
        self.words.iter().enumerate().find_map(|(i, &word)| {
            let candidates = if value { word } else { !word };
            if candidates == 0 {
                return None;
            }
            let idx = i * WORD_BITS + candidates.trailing_zeros() as usize;
            (idx < self.len).then_some(idx)
        })
    }

    /// Finds the first bit equal to `value` and flips it.
    pub fn scan_and_flip(&mut self, value: bool) -> Option<usize> {
        let idx = self.scan(value)?;
        self.set(idx, !value);
        Some(idx)
    }

    // Bits past `len` in the last word stay zero so counts and scans never
    // see them.
    fn clear_tail(&mut self) {
        let used = self.len % WORD_BITS;
        if used != 0 {
            if let Some(last) = self.words.last_mut() {
                *last &= (1 << used) - 1;
            }
        }
    }
}
