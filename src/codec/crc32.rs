// CRC-32 (zlib polynomial, reflected) with a 16-entry nibble table.
//
// `prev` lets callers chain: crc32(b, crc32(a, 0)) == crc32(a ++ b, 0).

const NIBBLE_TABLE: [u32; 16] = [
    0x00000000, 0x1DB71064, 0x3B6E20C8, 0x26D930AC, 0x76DC4190, 0x6B6B51F4, 0x4DB26158, 0x5005713C,
    0xEDB88320, 0xF00F9344, 0xD6D6A3E8, 0xCB61B38C, 0x9B64C2B0, 0x86D3D2D4, 0xA00AE278, 0xBDBDF21C,
];

/// CRC-32 of `data`, continuing from a previous checksum (0 to start).
pub fn crc32(data: &[u8], prev: u32) -> u32 {
    let mut crc = !prev;
    for &byte in data {
        crc = NIBBLE_TABLE[((crc ^ u32::from(byte)) & 0x0F) as usize] ^ (crc >> 4);
        crc = NIBBLE_TABLE[((crc ^ u32::from(byte >> 4)) & 0x0F) as usize] ^ (crc >> 4);
    }
    !crc
}
