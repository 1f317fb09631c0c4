// Byte-level primitives shared by every patch format.
//
// # Modules
//
// - `cursor`: Lenient big-endian reader over a patch slice
// - `vlq`: Variable-length integers (UPS/BPS flavour, not LEB128)
// - `crc32`: Nibble-table CRC-32 with chaining
// - `buffer`: Growable output buffer for patch creation

pub mod buffer;
pub mod crc32;
pub mod cursor;
pub mod vlq;

pub use buffer::ByteBuffer;
pub use crc32::crc32;
pub use cursor::Cursor;
pub use vlq::VlqError;
