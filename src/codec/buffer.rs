// Append-only byte accumulator for patch creation.
//
// Capacity starts at 10 and doubles whenever a push would overflow it.

use super::vlq;

const INITIAL_CAPACITY: usize = 10;

/// Growable output buffer used by the create engines.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ByteBuffer {
    data: Vec<u8>,
}

impl ByteBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    /// Make room for `additional` bytes, doubling from the initial capacity.
    fn grow_for(&mut self, additional: usize) {
        let needed = self.data.len() + additional;
        if needed <= self.data.capacity() {
            return;
        }
        let mut target = self.data.capacity().max(INITIAL_CAPACITY);
        while target < needed {
            target *= 2;
        }
        self.data.reserve_exact(target - self.data.len());
    }

    #[inline]
    pub fn push(&mut self, byte: u8) {
        self.grow_for(1);
        self.data.push(byte);
    }

    pub fn push_slice(&mut self, bytes: &[u8]) {
        self.grow_for(bytes.len());
        self.data.extend_from_slice(bytes);
    }

    pub fn push_str(&mut self, text: &str) {
        self.push_slice(text.as_bytes());
    }

    pub fn push_vlq(&mut self, value: u64) {
        let mut buf = [0u8; vlq::MAX_VLQ_LEN];
        let len = vlq::encode_u64(value, &mut buf);
        self.push_slice(&buf[..len]);
    }

    pub fn push_u16_be(&mut self, value: u16) {
        self.push_slice(&value.to_be_bytes());
    }

    /// Low 24 bits of `value`, big-endian.
    pub fn push_u24_be(&mut self, value: u32) {
        self.push_slice(&value.to_be_bytes()[1..]);
    }

    pub fn push_u32_be(&mut self, value: u32) {
        self.push_slice(&value.to_be_bytes());
    }

    pub fn push_u32_le(&mut self, value: u32) {
        self.push_slice(&value.to_le_bytes());
    }
}

impl AsRef<[u8]> for ByteBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl From<ByteBuffer> for Vec<u8> {
    fn from(buf: ByteBuffer) -> Self {
        buf.data
    }
}
