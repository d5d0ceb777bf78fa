use zerocopy::{AsBytes, FromBytes};

#[derive(Debug, PartialEq)]
pub enum State {
    Free,
    Used,
}

/// Tracks one bit per allocatable slot (an inode or a data block). Bits past
/// `len` are padding and never handed out.
#[derive(Debug, Clone, PartialEq)]
pub struct Bitmap {
    bitmap: Vec<u64>,
    len: usize,
}

impl Bitmap {
    pub fn new(len: usize) -> Self {
        Self {
            bitmap: vec![0; Self::words_for(len)],
            len,
        }
    }

    fn words_for(len: usize) -> usize {
        (len + 63) / 64
    }

    /// Number of bytes `serialize` produces for a map of `len` bits.
    pub fn byte_len(len: usize) -> usize {
        Self::words_for(len) * 8
    }

    /// Rebuilds a map of `len` bits from bytes produced by `serialize`. Returns
    /// `None` if the buffer is too short.
    pub fn parse(buf: &[u8], len: usize) -> Option<Self> {
        let words = Self::words_for(len);
        if buf.len() < words * 8 {
            return None;
        }
        let bitmap = buf[..words * 8]
            .chunks_exact(8)
            .map(u64::read_from)
            .collect::<Option<Vec<u64>>>()?;
        Some(Self { bitmap, len })
    }

    pub fn serialize(&self) -> &[u8] {
        self.bitmap.as_bytes()
    }

    pub fn get(&self, nr: usize) -> State {
        assert!(nr < self.len, "bit {} out of range", nr);
        // Grab the u64 containing the significant bit.
        let outer = self.bitmap[nr / 64];
        let inner = nr % 64;
        match (outer >> inner) & 0b01 {
            0 => State::Free,
            _ => State::Used,
        }
    }

    pub fn set_reserved(&mut self, nr: usize) {
        assert!(nr < self.len, "bit {} out of range", nr);
        self.bitmap[nr / 64] |= 0b01_u64 << (nr % 64);
    }

    pub fn set_free(&mut self, nr: usize) {
        assert!(nr < self.len, "bit {} out of range", nr);
        self.bitmap[nr / 64] &= !(0b01_u64 << (nr % 64));
    }

    /// Reserves the lowest free slot and returns it, or `None` once every slot
    /// is in use.
    pub fn alloc(&mut self) -> Option<usize> {
        let word_nr = self.bitmap.iter().position(|word| *word != u64::MAX)?;
        let nr = word_nr * 64 + self.bitmap[word_nr].trailing_ones() as usize;
        if nr >= self.len {
            return None;
        }
        self.set_reserved(nr);
        Some(nr)
    }

    pub fn count_free(&self) -> usize {
        (0..self.len).filter(|&nr| self.get(nr) == State::Free).count()
    }
}
