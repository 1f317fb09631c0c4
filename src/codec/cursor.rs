// Sequential big-endian reader over a patch slice.
//
// Reads that run past the end return 0 instead of failing and latch the
// `overrun` flag. Callers decide afterwards whether a short read is fatal.

/// Index-based reader over an immutable byte slice.
#[derive(Debug, Clone)]
pub struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
    overrun: bool,
}

impl<'a> Cursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            overrun: false,
        }
    }

    /// Current read offset.
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// `true` once every byte has been consumed.
    #[inline]
    pub fn at_end(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Number of unread bytes.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    /// Whether any read has gone past the end of the slice.
    #[inline]
    pub fn overrun(&self) -> bool {
        self.overrun
    }

    /// The unread tail.
    #[inline]
    pub fn rest(&self) -> &'a [u8] {
        &self.data[self.pos.min(self.data.len())..]
    }

    /// Advance by `n` bytes, clamping at the end.
    pub fn skip(&mut self, n: usize) {
        if n > self.remaining() {
            self.overrun = true;
            self.pos = self.data.len();
        } else {
            self.pos += n;
        }
    }

    /// Take the next `n` bytes. A short tail is returned as-is and marks
    /// the cursor overrun.
    pub fn take(&mut self, n: usize) -> &'a [u8] {
        let start = self.pos.min(self.data.len());
        let end = start.saturating_add(n).min(self.data.len());
        if end - start < n {
            self.overrun = true;
        }
        self.pos = end;
        &self.data[start..end]
    }

    #[inline]
    fn read_array<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        match self.data.get(self.pos..self.pos + N) {
            Some(bytes) => {
                out.copy_from_slice(bytes);
                self.pos += N;
            }
            None => {
                self.overrun = true;
                self.pos = self.data.len();
            }
        }
        out
    }

    #[inline]
    pub fn read_u8(&mut self) -> u8 {
        self.read_array::<1>()[0]
    }

    #[inline]
    pub fn read_u16_be(&mut self) -> u16 {
        u16::from_be_bytes(self.read_array())
    }

    #[inline]
    pub fn read_u24_be(&mut self) -> u32 {
        let [a, b, c] = self.read_array();
        u32::from_be_bytes([0, a, b, c])
    }

    #[inline]
    pub fn read_u32_be(&mut self) -> u32 {
        u32::from_be_bytes(self.read_array())
    }
}

/// Read a little-endian `u32` at `offset`, if in bounds.
#[inline]
pub fn read_u32_le_at(data: &[u8], offset: usize) -> Option<u32> {
    let bytes = data.get(offset..offset.checked_add(4)?)?;
    Some(u32::from_le_bytes(bytes.try_into().ok()?))
}
