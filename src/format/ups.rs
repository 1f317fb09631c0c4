// UPS: "UPS1", VLQ input size, VLQ output size, XOR hunks, CRC trailer.
//
// Each hunk is a VLQ count of bytes copied unchanged from the input,
// followed by XOR bytes applied to the input until a 0x00 terminator.
// The terminator itself XORs one more input byte through.

use super::{
    ApplyOptions, ApplyReport, ChecksumGate, Checksums, CrcRole, Format, FormatError,
    OutputTarget, OutputWriter, PatchInfo, TRAILER_LEN, check_truncation,
};
use crate::codec::{ByteBuffer, Cursor, crc32, vlq};

pub const MAGIC: &[u8] = b"UPS1";

/// Magic, two one-byte sizes, one-byte hunk and the trailer.
pub const MIN_PATCH_LEN: usize = 18;

struct Header<'p> {
    input_size: u64,
    output_size: u64,
    /// Hunk stream, positioned after the sizes and ending at the trailer.
    body: Cursor<'p>,
    checksums: Checksums,
}

fn read_header(patch: &[u8]) -> Result<Header<'_>, FormatError> {
    if !patch.starts_with(MAGIC) {
        return Err(FormatError::BadMagic);
    }
    let checksums = Checksums::read(patch).ok_or(FormatError::TooSmall {
        len: patch.len(),
        min: MIN_PATCH_LEN,
    })?;
    let mut body = Cursor::new(&patch[..patch.len() - TRAILER_LEN]);
    body.skip(MAGIC.len());
    let input_size = vlq::read_from(&mut body)?;
    let output_size = vlq::read_from(&mut body)?;
    Ok(Header {
        input_size,
        output_size,
        body,
        checksums,
    })
}

/// Input bytes past the end read as zero.
struct InputReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl InputReader<'_> {
    #[inline]
    fn next(&mut self) -> u8 {
        match self.data.get(self.pos) {
            Some(&b) => {
                self.pos += 1;
                b
            }
            None => 0,
        }
    }

    fn rest(&self) -> &[u8] {
        &self.data[self.pos.min(self.data.len())..]
    }
}

pub(crate) fn apply<O: OutputTarget + ?Sized>(
    patch: &[u8],
    input: &[u8],
    output: &mut O,
    opts: &ApplyOptions,
) -> Result<ApplyReport, FormatError> {
    let mut gate = ChecksumGate::new(opts);
    let Header {
        input_size,
        output_size,
        mut body,
        checksums,
    } = read_header(patch)?;

    gate.check(CrcRole::Patch, checksums.patch, || {
        crc32(&patch[..patch.len() - 4], 0)
    })?;

    if input.len() as u64 != input_size {
        log::info!(
            "input size {} does not match the {} bytes recorded in the patch",
            input.len(),
            input_size
        );
    }
    gate.check(CrcRole::Input, checksums.input, || {
        let covered = usize::try_from(input_size).map_or(input.len(), |n| n.min(input.len()));
        crc32(&input[..covered], 0)
    })?;

    let out_len = usize::try_from(output_size).map_err(|_| FormatError::TargetTooLarge {
        len: output_size,
        max: usize::MAX as u64,
    })?;
    let out = output.allocate(out_len).map_err(FormatError::Output)?;
    let mut w = OutputWriter::new(out);
    let mut src = InputReader { data: input, pos: 0 };

    let mut hunks = 0usize;
    while !body.at_end() {
        let skip = vlq::read_from(&mut body)?;
        for _ in 0..skip {
            w.put(src.next())?;
        }
        loop {
            let xor = body.read_u8();
            let byte = src.next() ^ xor;
            if xor == 0 {
                if !w.is_full() {
                    w.put(byte)?;
                }
                break;
            }
            w.put(byte)?;
        }
        hunks += 1;
    }
    check_truncation(body.overrun(), opts, "UPS hunk")?;

    let tail = src.rest();
    let room = out_len - w.position();
    w.put_slice(&tail[..tail.len().min(room)])?;

    gate.check(CrcRole::Output, checksums.output, || crc32(w.as_slice(), 0))?;

    log::info!(
        "applied UPS patch: {hunks} hunks, {} -> {out_len} bytes",
        input.len()
    );
    Ok(ApplyReport {
        format: Format::Ups,
        output_len: out_len,
        warnings: gate.into_warnings(),
    })
}

pub(crate) fn describe(patch: &[u8]) -> Result<PatchInfo, FormatError> {
    let mut header = read_header(patch)?;
    let body = &mut header.body;
    let mut hunks = 0usize;
    while !body.at_end() {
        vlq::read_from(body)?;
        while body.read_u8() != 0 {}
        hunks += 1;
    }
    if body.overrun() {
        return Err(FormatError::Truncated);
    }
    Ok(PatchInfo {
        format: Format::Ups,
        patch_len: patch.len(),
        source_size: Some(header.input_size),
        target_size: Some(header.output_size),
        records: hunks,
        metadata: None,
        checksums: Some(header.checksums),
    })
}

pub(crate) fn create(base: &[u8], target: &[u8]) -> Vec<u8> {
    let base_at = |i: usize| base.get(i).copied().unwrap_or(0);

    let mut buf = ByteBuffer::new();
    buf.push_slice(MAGIC);
    buf.push_vlq(base.len() as u64);
    buf.push_vlq(target.len() as u64);

    let mut hunks = 0usize;
    // First position not yet covered by a hunk.
    let mut covered = 0;
    let mut offset = 0;
    while offset < target.len() {
        if target[offset] == base_at(offset) {
            offset += 1;
            continue;
        }
        buf.push_vlq((offset - covered) as u64);
        while offset < target.len() && target[offset] != base_at(offset) {
            buf.push(target[offset] ^ base_at(offset));
            offset += 1;
        }
        buf.push(0);
        // The terminator passes the byte at `offset` through unchanged.
        offset += 1;
        covered = offset;
        hunks += 1;
    }

    buf.push_u32_le(crc32(base, 0));
    buf.push_u32_le(crc32(target, 0));
    let patch_crc = crc32(buf.as_slice(), 0);
    buf.push_u32_le(patch_crc);

    log::info!("created UPS patch: {hunks} hunks, {} bytes", buf.len());
    buf.into_vec()
}
