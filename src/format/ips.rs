// IPS and IPS32: header, fixed-width records, footer. No checksums.
//
// Record layout (big-endian):
//   address (3 bytes IPS, 4 bytes IPS32) | length u16 | payload
// A zero length marks an RLE record: run length u16, then one fill byte.
//
// Both variants share one implementation parameterized by `Layout`.

use super::{
    ApplyOptions, ApplyReport, Format, FormatError, OutputTarget, PatchInfo, check_truncation,
};
use crate::codec::{ByteBuffer, Cursor};

/// Smallest IPS/IPS32 patch accepted by apply.
pub const MIN_PATCH_LEN: usize = 8;

/// Longest payload a single record can carry.
const MAX_RECORD_LEN: usize = 0xFFFF;

/// A constant run longer than this is worth its own RLE record.
const RLE_THRESHOLD: usize = 8;

/// A span that is constant throughout is RLE-encoded above this length.
const RLE_WHOLE_SPAN_THRESHOLD: usize = 3;

/// Consecutive matching bytes that end a differing block.
const MATCH_BREAK: usize = 5;

/// Per-variant wire parameters.
#[derive(Debug)]
pub struct Layout {
    pub format: Format,
    pub magic: &'static [u8],
    pub footer: &'static [u8],
    /// Width of a record address in bytes.
    pub addr_width: usize,
    /// The footer read as an address. A record may not start here.
    pub marker: u64,
    /// Largest target size the format can address.
    pub max_target: u64,
}

pub const IPS: Layout = Layout {
    format: Format::Ips,
    magic: b"PATCH",
    footer: b"EOF",
    addr_width: 3,
    marker: 0x454F46,
    max_target: 0x100_0000,
};

pub const IPS32: Layout = Layout {
    format: Format::Ips32,
    magic: b"IPS32",
    footer: b"EEOF",
    addr_width: 4,
    marker: 0x4545_4F46,
    max_target: 0x1_0000_0000,
};

impl Layout {
    fn read_addr(&self, cur: &mut Cursor<'_>) -> u64 {
        match self.addr_width {
            3 => u64::from(cur.read_u24_be()),
            _ => u64::from(cur.read_u32_be()),
        }
    }

    fn push_addr(&self, buf: &mut ByteBuffer, addr: u64) {
        // Callers keep `addr` below `max_target`, which fits the field.
        let addr = addr as u32;
        match self.addr_width {
            3 => buf.push_u24_be(addr),
            _ => buf.push_u32_be(addr),
        }
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Payload<'p> {
    /// Literal bytes. May be shorter than the record length when the patch
    /// is truncated.
    Literal(&'p [u8]),
    Run(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Record<'p> {
    offset: u64,
    len: usize,
    payload: Payload<'p>,
}

impl Record<'_> {
    fn end(&self) -> u64 {
        self.offset + self.len as u64
    }
}

struct Parsed<'p> {
    records: Vec<Record<'p>>,
    /// Furthest byte any record writes.
    extent: u64,
    overrun: bool,
}

fn parse<'p>(layout: &Layout, patch: &'p [u8]) -> Result<Parsed<'p>, FormatError> {
    if !patch.starts_with(layout.magic) {
        return Err(FormatError::BadMagic);
    }
    if !patch.ends_with(layout.footer) {
        return Err(FormatError::MissingFooter);
    }
    let body = patch
        .get(layout.magic.len()..patch.len() - layout.footer.len())
        .unwrap_or_default();

    let mut cur = Cursor::new(body);
    let mut records = Vec::new();
    let mut extent = 0u64;
    while !cur.at_end() {
        let offset = layout.read_addr(&mut cur);
        let len = usize::from(cur.read_u16_be());
        let record = if len > 0 {
            Record {
                offset,
                len,
                payload: Payload::Literal(cur.take(len)),
            }
        } else {
            let len = usize::from(cur.read_u16_be());
            Record {
                offset,
                len,
                payload: Payload::Run(cur.read_u8()),
            }
        };
        log::debug!(
            "{} record at {:#x}: {} bytes{}",
            layout.format,
            record.offset,
            record.len,
            if matches!(record.payload, Payload::Run(_)) {
                " (RLE)"
            } else {
                ""
            }
        );
        extent = extent.max(record.end());
        records.push(record);
    }

    Ok(Parsed {
        records,
        extent,
        overrun: cur.overrun(),
    })
}

// ---------------------------------------------------------------------------
// Apply
// ---------------------------------------------------------------------------

pub(crate) fn apply<O: OutputTarget + ?Sized>(
    layout: &Layout,
    patch: &[u8],
    input: &[u8],
    output: &mut O,
    opts: &ApplyOptions,
) -> Result<ApplyReport, FormatError> {
    let parsed = parse(layout, patch)?;
    check_truncation(parsed.overrun, opts, "IPS record")?;

    let out_len = parsed.extent.max(input.len() as u64);
    if parsed.extent > input.len() as u64 {
        log::info!(
            "{} records reach {:#x}; growing output from {} to {} bytes",
            layout.format,
            parsed.extent,
            input.len(),
            parsed.extent
        );
    }
    let out_len = usize::try_from(out_len).map_err(|_| FormatError::TargetTooLarge {
        len: out_len,
        max: usize::MAX as u64,
    })?;

    let out = output.allocate(out_len).map_err(FormatError::Output)?;
    out[..input.len()].copy_from_slice(input);

    for record in &parsed.records {
        let start = record.offset as usize;
        let dst = out
            .get_mut(start..start + record.len)
            .ok_or_else(|| FormatError::out_of_range("output", start + record.len, out_len))?;
        match record.payload {
            Payload::Literal(bytes) => {
                let (head, tail) = dst.split_at_mut(bytes.len());
                head.copy_from_slice(bytes);
                tail.fill(0);
            }
            Payload::Run(byte) => dst.fill(byte),
        }
    }

    log::info!(
        "applied {} patch: {} records, {} -> {} bytes",
        layout.format,
        parsed.records.len(),
        input.len(),
        out_len
    );

    Ok(ApplyReport {
        format: layout.format,
        output_len: out_len,
        warnings: Vec::new(),
    })
}

pub(crate) fn describe(layout: &Layout, patch: &[u8]) -> Result<PatchInfo, FormatError> {
    let parsed = parse(layout, patch)?;
    if parsed.overrun {
        return Err(FormatError::Truncated);
    }
    Ok(PatchInfo {
        format: layout.format,
        patch_len: patch.len(),
        source_size: None,
        target_size: Some(parsed.extent),
        records: parsed.records.len(),
        metadata: None,
        checksums: None,
    })
}

// ---------------------------------------------------------------------------
// Create
// ---------------------------------------------------------------------------

/// One differing block, as far as a single forward scan could tell.
#[derive(Debug, PartialEq, Eq)]
struct Block {
    /// Where the block ends. When the scan stopped early this is only a
    /// lower bound, but one past the head run and past `cut + RLE_THRESHOLD`.
    end: usize,
    /// Length of the constant run at the block start, clipped to `end`.
    head_run: usize,
    /// First position after the divergence where a run longer than
    /// `RLE_THRESHOLD` starts inside the block.
    cut: Option<usize>,
}

/// Scan forward from the differing byte at `offset` until the block is
/// known well enough to emit its first record.
///
/// A record is either the head run or a literal ending at the first long
/// run, so the scan stops once both are settled. Each target byte is then
/// visited a bounded number of times over the whole of `create`.
fn scan_block(
    target: &[u8],
    base_at: impl Fn(usize) -> u8,
    start: usize,
    offset: usize,
    limit: usize,
) -> Block {
    let head = target[start];
    let mut head_run = offset - start;
    let mut head_open = true;
    let mut run_from = offset + 1;
    let mut cut = None;
    let mut matches = 0;
    let mut pos = offset;

    while pos < limit {
        let byte = target[pos];
        if byte == base_at(pos) {
            matches += 1;
            if matches == MATCH_BREAK {
                let end = pos + 1 - MATCH_BREAK;
                return Block {
                    end,
                    head_run: head_run.min(end - start),
                    cut: cut.filter(|&p| p + RLE_THRESHOLD < end),
                };
            }
        } else {
            matches = 0;
        }
        if head_open && byte == head {
            head_run += 1;
        } else {
            head_open = false;
        }
        if pos > offset + 1 && byte != target[pos - 1] {
            run_from = pos;
        }
        pos += 1;

        if cut.is_none() && pos > run_from && pos - run_from > RLE_THRESHOLD {
            cut = Some(run_from);
        }
        // A later break can pull the end back no further than the current
        // streak of matches.
        let settled = pos - matches;
        if let Some(p) = cut {
            if !head_open && p + RLE_THRESHOLD < settled && start + head_run < settled {
                return Block {
                    end: settled,
                    head_run,
                    cut,
                };
            }
        }
    }

    Block {
        end: limit,
        head_run,
        cut: cut.filter(|&p| p + RLE_THRESHOLD < limit),
    }
}

/// Writes records for one target, tracking how far they reach.
struct RecordWriter<'a> {
    layout: &'a Layout,
    buf: ByteBuffer,
    extent: usize,
    records: usize,
}

impl RecordWriter<'_> {
    fn literal(&mut self, target: &[u8], start: usize, end: usize) {
        self.layout.push_addr(&mut self.buf, start as u64);
        self.buf.push_u16_be((end - start) as u16);
        self.buf.push_slice(&target[start..end]);
        self.extent = self.extent.max(end);
        self.records += 1;
    }

    fn run(&mut self, start: usize, len: usize, byte: u8) {
        self.layout.push_addr(&mut self.buf, start as u64);
        self.buf.push_u16_be(0);
        self.buf.push_u16_be(len as u16);
        self.buf.push(byte);
        self.extent = self.extent.max(start + len);
        self.records += 1;
    }
}

pub(crate) fn create(layout: &Layout, base: &[u8], target: &[u8]) -> Result<Vec<u8>, FormatError> {
    let n = target.len();
    if n as u64 > layout.max_target {
        return Err(FormatError::TargetTooLarge {
            len: n as u64,
            max: layout.max_target,
        });
    }
    if n < base.len() {
        log::warn!(
            "{} cannot shrink files; output will keep the last {} bytes of the base",
            layout.format,
            base.len() - n
        );
    }

    let base_at = |i: usize| base.get(i).copied().unwrap_or(0);
    let marker = layout.marker as usize;

    let mut w = RecordWriter {
        layout,
        buf: ByteBuffer::new(),
        extent: 0,
        records: 0,
    };
    w.buf.push_slice(layout.magic);

    let mut offset = 0;
    while offset < n {
        if target[offset] == base_at(offset) {
            offset += 1;
            continue;
        }

        let start = if offset == marker { offset - 1 } else { offset };
        let limit = (start + MAX_RECORD_LEN).min(n);
        let block = scan_block(target, base_at, start, offset, limit);

        let run = block.head_run;
        if run > RLE_THRESHOLD || (run == block.end - start && run > RLE_WHOLE_SPAN_THRESHOLD) {
            w.run(start, run, target[start]);
            offset = start + run;
            continue;
        }

        let mut lit_end = block.cut.unwrap_or(block.end);
        while lit_end > offset + 1 && target[lit_end - 1] == base_at(lit_end - 1) {
            lit_end -= 1;
        }
        w.literal(target, start, lit_end);
        offset = lit_end;
    }

    // The output length comes from the furthest record, so a growing target
    // whose tail already reads as zero still needs its last byte written.
    if n > base.len() && w.extent < n {
        let start = if n - 1 == marker { n - 2 } else { n - 1 };
        w.literal(target, start, n);
    }

    w.buf.push_slice(layout.footer);
    log::info!(
        "created {} patch: {} records, {} bytes",
        layout.format,
        w.records,
        w.buf.len()
    );
    Ok(w.buf.into_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply_vec(layout: &Layout, patch: &[u8], input: &[u8]) -> Result<Vec<u8>, FormatError> {
        let mut out = Vec::new();
        apply(layout, patch, input, &mut out, &ApplyOptions::default())?;
        Ok(out)
    }

    #[test]
    fn single_byte_change() {
        let patch = create(&IPS, &[0, 0, 0, 0], &[1, 0, 0, 0]).unwrap();
        assert_eq!(patch, b"PATCH\x00\x00\x00\x00\x01\x01EOF");
        assert_eq!(apply_vec(&IPS, &patch, &[0, 0, 0, 0]).unwrap(), [1, 0, 0, 0]);
    }

    #[test]
    fn identical_files_produce_empty_patch() {
        let data = b"no changes here";
        assert_eq!(create(&IPS, data, data).unwrap(), b"PATCHEOF");
        assert_eq!(create(&IPS32, data, data).unwrap(), b"IPS32EEOF");
    }

    #[test]
    fn long_constant_run_uses_rle() {
        let base = vec![0u8; 64];
        let mut target = base.clone();
        target[10..30].fill(0xAA);
        let patch = create(&IPS, &base, &target).unwrap();
        // address 10, RLE marker, 20 bytes of 0xAA
        assert_eq!(
            &patch[5..patch.len() - 3],
            &[0x00, 0x00, 0x0A, 0x00, 0x00, 0x00, 0x14, 0xAA]
        );
        assert_eq!(apply_vec(&IPS, &patch, &base).unwrap(), target);
    }

    #[test]
    fn short_constant_span_uses_rle() {
        let base = vec![0u8; 16];
        let mut target = base.clone();
        target[4..8].fill(7);
        let patch = create(&IPS, &base, &target).unwrap();
        assert_eq!(
            &patch[5..patch.len() - 3],
            &[0x00, 0x00, 0x04, 0x00, 0x00, 0x00, 0x04, 0x07]
        );
    }

    #[test]
    fn literal_stops_before_internal_run() {
        let base = vec![0u8; 32];
        let mut target = base.clone();
        target[0..3].copy_from_slice(&[1, 2, 3]);
        target[3..15].fill(9);
        let patch = create(&IPS, &base, &target).unwrap();
        let body = &patch[5..patch.len() - 3];
        // literal [1, 2, 3] at 0, then RLE of twelve 9s at 3
        assert_eq!(
            body,
            &[
                0x00, 0x00, 0x00, 0x00, 0x03, 1, 2, 3, //
                0x00, 0x00, 0x03, 0x00, 0x00, 0x00, 0x0C, 9
            ]
        );
        assert_eq!(apply_vec(&IPS, &patch, &base).unwrap(), target);
    }

    #[test]
    fn five_matches_split_records() {
        let base = vec![0u8; 32];
        let mut target = base.clone();
        target[0] = 1;
        target[6] = 2;
        let patch = create(&IPS, &base, &target).unwrap();
        let body = &patch[5..patch.len() - 3];
        assert_eq!(
            body,
            &[0x00, 0x00, 0x00, 0x00, 0x01, 1, 0x00, 0x00, 0x06, 0x00, 0x01, 2]
        );
    }

    #[test]
    fn short_runs_alternate_literal_and_rle() {
        let target: Vec<u8> = (1..=3u8)
            .flat_map(|tag| std::iter::once(tag).chain([0xFF; 9]))
            .collect();
        let patch = create(&IPS, &[], &target).unwrap();
        let body = &patch[5..patch.len() - 3];
        assert_eq!(
            &body[..14],
            &[
                0x00, 0x00, 0x00, 0x00, 0x01, 1, //
                0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x09, 0xFF
            ]
        );
        assert_eq!(describe(&IPS, &patch).unwrap().records, 6);
        assert_eq!(apply_vec(&IPS, &patch, &[]).unwrap(), target);
    }

    #[test]
    fn scan_stops_once_block_is_settled() {
        let mut target = vec![7u8];
        target.extend([0xFF; 9]);
        target.extend((0..200u8).map(|i| i | 1));
        let block = scan_block(&target, |_| 0, 0, 0, target.len());
        assert_eq!(
            block,
            Block {
                end: 10,
                head_run: 1,
                cut: Some(1)
            }
        );
    }

    #[test]
    fn record_never_starts_at_footer_marker() {
        let marker = IPS.marker as usize;
        let base = vec![0u8; marker + 4];
        let mut target = base.clone();
        target[marker] = 0x55;
        let patch = create(&IPS, &base, &target).unwrap();
        let body = &patch[5..patch.len() - 3];
        assert_eq!(&body[..3], &[0x45, 0x4F, 0x45]);
        assert_eq!(&body[3..5], &[0x00, 0x02]);
        assert_eq!(&body[5..], &[0x00, 0x55]);
        assert_eq!(apply_vec(&IPS, &patch, &base).unwrap(), target);
    }

    #[test]
    fn growing_target_with_zero_tail() {
        let base = [1u8, 2, 3];
        let target = [1u8, 2, 3, 0, 0];
        let patch = create(&IPS, &base, &target).unwrap();
        assert_eq!(apply_vec(&IPS, &patch, &base).unwrap(), target);
    }

    #[test]
    fn target_ceiling() {
        let err = create(&IPS, &[], &vec![0u8; 0x100_0001]).unwrap_err();
        assert!(matches!(err, FormatError::TargetTooLarge { .. }));
    }

    #[test]
    fn ips32_uses_four_byte_addresses() {
        let patch = create(&IPS32, &[0; 4], &[0, 0, 0, 7]).unwrap();
        assert_eq!(patch, b"IPS32\x00\x00\x00\x03\x00\x01\x07EEOF");
        assert_eq!(apply_vec(&IPS32, &patch, &[0; 4]).unwrap(), [0, 0, 0, 7]);
    }

    #[test]
    fn output_grows_to_furthest_record() {
        let patch = b"PATCH\x00\x00\x06\x00\x02\xAB\xCD\x00\x00\x00\x00\x00\x00\x02\xEEEOF";
        let out = apply_vec(&IPS, patch, &[1, 2, 3]).unwrap();
        assert_eq!(out, [0xEE, 0xEE, 3, 0, 0, 0, 0xAB, 0xCD]);
    }

    #[test]
    fn describe_exposes_far_record_extent() {
        // one RLE record of 16 bytes at the top of the IPS32 address space
        let patch = b"IPS32\xFF\xFF\xFF\xFF\x00\x00\x00\x10\xABEEOF";
        let info = describe(&IPS32, patch).unwrap();
        assert_eq!(info.target_size, Some(0xFFFF_FFFF + 0x10));
        assert_eq!(info.records, 1);
    }

    #[test]
    fn header_and_footer_checks() {
        assert!(matches!(
            apply_vec(&IPS, b"PATCHXXX", &[]),
            Err(FormatError::MissingFooter)
        ));
        assert!(matches!(
            apply_vec(&IPS, b"PATCXEOF", &[]),
            Err(FormatError::BadMagic)
        ));
        assert_eq!(apply_vec(&IPS, b"PATCHEOF", &[4, 5]).unwrap(), [4, 5]);
    }

    #[test]
    fn truncated_record() {
        // literal claims 4 bytes, only 2 present
        let patch = b"PATCH\x00\x00\x01\x00\x04\xAA\xBBEOF";
        assert!(matches!(
            apply_vec(&IPS, patch, &[9; 8]),
            Err(FormatError::Truncated)
        ));

        let opts = ApplyOptions {
            allow_truncated: true,
            ..Default::default()
        };
        let mut out = Vec::new();
        apply(&IPS, patch, &[9; 8], &mut out, &opts).unwrap();
        assert_eq!(out, [9, 0xAA, 0xBB, 0, 0, 9, 9, 9]);
    }

    #[test]
    fn describe_counts_records() {
        let base = vec![0u8; 40];
        let mut target = base.clone();
        target[0] = 1;
        target[20..40].fill(3);
        let patch = create(&IPS, &base, &target).unwrap();
        let info = describe(&IPS, &patch).unwrap();
        assert_eq!(info.records, 2);
        assert_eq!(info.target_size, Some(40));
        assert_eq!(info.checksums, None);
    }
}
