// BPS: "BPS1", VLQ source/target/metadata sizes, metadata, action stream,
// CRC trailer.
//
// Each action is one VLQ: the low two bits pick the action, the rest hold
// `length - 1`. Copy actions carry a signed VLQ delta applied to a
// persistent cursor (one for the source, one for the target).

use super::{
    ApplyOptions, ApplyReport, ChecksumGate, Checksums, CrcRole, Format, FormatError,
    OutputTarget, OutputWriter, PatchInfo, TRAILER_LEN, check_truncation,
};
use crate::codec::{Cursor, crc32, vlq};

pub const MAGIC: &[u8] = b"BPS1";

/// Magic, three one-byte sizes, one action and the trailer.
pub const MIN_PATCH_LEN: usize = 19;

const SOURCE_READ: u64 = 0;
const TARGET_READ: u64 = 1;
const SOURCE_COPY: u64 = 2;
const TARGET_COPY: u64 = 3;

struct Header<'p> {
    source_size: u64,
    target_size: u64,
    metadata: &'p [u8],
    actions: Cursor<'p>,
    checksums: Checksums,
    /// Metadata ran past the action stream.
    overrun: bool,
}

fn read_header(patch: &[u8]) -> Result<Header<'_>, FormatError> {
    if !patch.starts_with(MAGIC) {
        return Err(FormatError::BadMagic);
    }
    let checksums = Checksums::read(patch).ok_or(FormatError::TooSmall {
        len: patch.len(),
        min: MIN_PATCH_LEN,
    })?;
    let mut actions = Cursor::new(&patch[..patch.len() - TRAILER_LEN]);
    actions.skip(MAGIC.len());
    let source_size = vlq::read_from(&mut actions)?;
    let target_size = vlq::read_from(&mut actions)?;
    let metadata_size = vlq::read_from(&mut actions)?;
    let metadata = actions.take(usize::try_from(metadata_size).unwrap_or(usize::MAX));
    let overrun = actions.overrun();
    Ok(Header {
        source_size,
        target_size,
        metadata,
        actions,
        checksums,
        overrun,
    })
}

fn to_len(length: u64, limit: usize) -> Result<usize, FormatError> {
    usize::try_from(length).map_err(|_| FormatError::OutOfRange {
        buffer: "output",
        offset: length,
        limit: limit as u64,
    })
}

/// Move a relative copy cursor, rejecting positions before the start.
fn seek(cursor: usize, delta: i64, buffer: &'static str, limit: usize) -> Result<usize, FormatError> {
    cursor
        .checked_add_signed(delta as isize)
        .ok_or(FormatError::OutOfRange {
            buffer,
            offset: delta.unsigned_abs(),
            limit: limit as u64,
        })
}

pub(crate) fn apply<O: OutputTarget + ?Sized>(
    patch: &[u8],
    input: &[u8],
    output: &mut O,
    opts: &ApplyOptions,
) -> Result<ApplyReport, FormatError> {
    let mut gate = ChecksumGate::new(opts);
    if let Some(checksums) = Checksums::read(patch) {
        gate.check(CrcRole::Patch, checksums.patch, || {
            crc32(&patch[..patch.len() - 4], 0)
        })?;
    }

    let Header {
        source_size,
        target_size,
        mut actions,
        checksums,
        overrun,
        ..
    } = read_header(patch)?;
    check_truncation(overrun, opts, "BPS metadata")?;

    if input.len() as u64 != source_size {
        log::info!(
            "input size {} does not match the {} bytes recorded in the patch",
            input.len(),
            source_size
        );
    }
    gate.check(CrcRole::Input, checksums.input, || {
        let covered = usize::try_from(source_size).map_or(input.len(), |n| n.min(input.len()));
        crc32(&input[..covered], 0)
    })?;

    let out_len = usize::try_from(target_size).map_err(|_| FormatError::TargetTooLarge {
        len: target_size,
        max: usize::MAX as u64,
    })?;
    let out = output.allocate(out_len).map_err(FormatError::Output)?;
    let mut w = OutputWriter::new(out);

    let mut source_rel = 0usize;
    let mut target_rel = 0usize;
    let mut count = 0usize;
    while !actions.at_end() {
        let data = vlq::read_from(&mut actions)?;
        let length = to_len((data >> 2) + 1, out_len)?;
        match data & 3 {
            SOURCE_READ => {
                let start = w.position();
                let src = input
                    .get(start..start.saturating_add(length))
                    .ok_or_else(|| FormatError::out_of_range("input", start, input.len()))?;
                w.put_slice(src)?;
            }
            TARGET_READ => {
                let bytes = actions.take(length);
                w.put_slice(bytes)?;
                for _ in bytes.len()..length {
                    w.put(0)?;
                }
            }
            SOURCE_COPY => {
                let delta = vlq::read_signed_from(&mut actions)?;
                source_rel = seek(source_rel, delta, "input", input.len())?;
                let src = input
                    .get(source_rel..source_rel.saturating_add(length))
                    .ok_or_else(|| FormatError::out_of_range("input", source_rel, input.len()))?;
                w.put_slice(src)?;
                source_rel += length;
            }
            TARGET_COPY => {
                let delta = vlq::read_signed_from(&mut actions)?;
                target_rel = seek(target_rel, delta, "written output", w.position())?;
                // Byte by byte: the source range may overlap what this
                // action is writing.
                for _ in 0..length {
                    let byte = w.written(target_rel)?;
                    w.put(byte)?;
                    target_rel += 1;
                }
            }
            other => return Err(FormatError::InvalidAction(other)),
        }
        count += 1;
    }
    check_truncation(actions.overrun(), opts, "BPS action")?;

    gate.check(CrcRole::Output, checksums.output, || crc32(w.as_slice(), 0))?;

    log::info!(
        "applied BPS patch: {count} actions, {} -> {out_len} bytes",
        input.len()
    );
    Ok(ApplyReport {
        format: Format::Bps,
        output_len: out_len,
        warnings: gate.into_warnings(),
    })
}

pub(crate) fn describe(patch: &[u8]) -> Result<PatchInfo, FormatError> {
    let mut header = read_header(patch)?;
    let actions = &mut header.actions;
    let mut count = 0usize;
    while !actions.at_end() {
        let data = vlq::read_from(actions)?;
        let length = usize::try_from((data >> 2) + 1).unwrap_or(usize::MAX);
        match data & 3 {
            TARGET_READ => actions.skip(length),
            SOURCE_COPY | TARGET_COPY => {
                vlq::read_signed_from(actions)?;
            }
            _ => {}
        }
        count += 1;
    }
    if header.overrun || actions.overrun() {
        return Err(FormatError::Truncated);
    }
    Ok(PatchInfo {
        format: Format::Bps,
        patch_len: patch.len(),
        source_size: Some(header.source_size),
        target_size: Some(header.target_size),
        records: count,
        metadata: Some(header.metadata.to_vec()),
        checksums: Some(header.checksums),
    })
}

pub(crate) fn create(_base: &[u8], _target: &[u8]) -> Result<Vec<u8>, FormatError> {
    Err(FormatError::Unimplemented("BPS patch creation"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ByteBuffer;
    use crate::format::{ChecksumMismatch, CrcFlags};

    /// Assemble a patch from an action stream, with correct checksums.
    fn build(source: &[u8], target: &[u8], metadata: &[u8], actions: &[u8]) -> Vec<u8> {
        let mut buf = ByteBuffer::new();
        buf.push_slice(MAGIC);
        buf.push_vlq(source.len() as u64);
        buf.push_vlq(target.len() as u64);
        buf.push_vlq(metadata.len() as u64);
        buf.push_slice(metadata);
        buf.push_slice(actions);
        buf.push_u32_le(crc32(source, 0));
        buf.push_u32_le(crc32(target, 0));
        let crc = crc32(buf.as_slice(), 0);
        buf.push_u32_le(crc);
        buf.into_vec()
    }

    fn action(kind: u64, length: u64) -> u64 {
        ((length - 1) << 2) | kind
    }

    fn apply_vec(patch: &[u8], input: &[u8]) -> Result<Vec<u8>, FormatError> {
        let mut out = Vec::new();
        let opts = ApplyOptions {
            strict: CrcFlags::all(),
            ..Default::default()
        };
        apply(patch, input, &mut out, &opts)?;
        Ok(out)
    }

    #[test]
    fn overlapping_target_copy_repeats_pattern() {
        let target = b"ABABABABABAB";
        let mut actions = Vec::new();
        vlq::write_u64(&mut actions, action(TARGET_READ, 2));
        actions.extend_from_slice(b"AB");
        vlq::write_u64(&mut actions, action(TARGET_COPY, 10));
        vlq::write_u64(&mut actions, vlq::zigzag(0));
        let patch = build(b"", target, b"", &actions);
        assert_eq!(apply_vec(&patch, b"").unwrap(), target);
    }

    #[test]
    fn all_four_actions() {
        let source = b"0123456789";
        let target = b"0123xyz789xy3456";
        let mut actions = Vec::new();
        vlq::write_u64(&mut actions, action(SOURCE_READ, 4)); // 0123
        vlq::write_u64(&mut actions, action(TARGET_READ, 3)); // xyz
        actions.extend_from_slice(b"xyz");
        vlq::write_u64(&mut actions, action(SOURCE_COPY, 3)); // 789
        vlq::write_u64(&mut actions, vlq::zigzag(7));
        vlq::write_u64(&mut actions, action(TARGET_COPY, 2)); // xy
        vlq::write_u64(&mut actions, vlq::zigzag(4));
        vlq::write_u64(&mut actions, action(SOURCE_COPY, 4)); // 3456, cursor 10 -> 3
        vlq::write_u64(&mut actions, vlq::zigzag(-7));
        let patch = build(source, target, b"", &actions);
        assert_eq!(apply_vec(&patch, source).unwrap(), target);
    }

    #[test]
    fn metadata_is_skipped_and_described() {
        let source = b"abc";
        let mut actions = Vec::new();
        vlq::write_u64(&mut actions, action(SOURCE_READ, 3));
        let patch = build(source, source, b"<xml/>", &actions);
        assert_eq!(apply_vec(&patch, source).unwrap(), source);

        let info = describe(&patch).unwrap();
        assert_eq!(info.metadata.as_deref(), Some(&b"<xml/>"[..]));
        assert_eq!(info.records, 1);
        assert_eq!(info.source_size, Some(3));
        assert_eq!(info.target_size, Some(3));
    }

    #[test]
    fn target_copy_cannot_read_ahead() {
        let mut actions = Vec::new();
        vlq::write_u64(&mut actions, action(TARGET_READ, 1));
        actions.push(b'A');
        vlq::write_u64(&mut actions, action(TARGET_COPY, 2));
        vlq::write_u64(&mut actions, vlq::zigzag(1));
        let patch = build(b"", b"AAA", b"", &actions);
        assert!(matches!(
            apply_vec(&patch, b""),
            Err(FormatError::OutOfRange { .. })
        ));
    }

    #[test]
    fn negative_source_cursor_is_out_of_range() {
        let mut actions = Vec::new();
        vlq::write_u64(&mut actions, action(SOURCE_COPY, 1));
        vlq::write_u64(&mut actions, vlq::zigzag(-1));
        let patch = build(b"abc", b"a", b"", &actions);
        assert!(matches!(
            apply_vec(&patch, b"abc"),
            Err(FormatError::OutOfRange { .. })
        ));
    }

    #[test]
    fn source_read_past_input_is_out_of_range() {
        let mut actions = Vec::new();
        vlq::write_u64(&mut actions, action(SOURCE_READ, 5));
        let patch = build(b"abc", b"abcde", b"", &actions);
        assert!(matches!(
            apply_vec(&patch, b"abc"),
            Err(FormatError::OutOfRange { .. })
        ));
    }

    #[test]
    fn write_past_target_is_out_of_range() {
        let mut actions = Vec::new();
        vlq::write_u64(&mut actions, action(TARGET_READ, 4));
        actions.extend_from_slice(b"abcd");
        let patch = build(b"", b"ab", b"", &actions);
        assert!(matches!(
            apply_vec(&patch, b""),
            Err(FormatError::OutOfRange { .. })
        ));
    }

    fn lenient() -> ApplyOptions {
        ApplyOptions {
            strict: CrcFlags::all(),
            allow_truncated: true,
            ..Default::default()
        }
    }

    #[test]
    fn target_read_past_action_stream() {
        let mut actions = Vec::new();
        vlq::write_u64(&mut actions, action(TARGET_READ, 4));
        actions.extend_from_slice(b"AB");
        let patch = build(b"", b"AB\0\0", b"", &actions);

        assert!(matches!(apply_vec(&patch, b""), Err(FormatError::Truncated)));
        assert!(matches!(describe(&patch), Err(FormatError::Truncated)));

        let mut out = Vec::new();
        let report = apply(&patch, b"", &mut out, &lenient()).unwrap();
        assert_eq!(out, b"AB\0\0");
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn metadata_longer_than_patch() {
        let mut buf = ByteBuffer::new();
        buf.push_slice(MAGIC);
        buf.push_vlq(0);
        buf.push_vlq(0);
        buf.push_vlq(50);
        buf.push_slice(b"<x");
        buf.push_u32_le(crc32(b"", 0));
        buf.push_u32_le(crc32(b"", 0));
        let crc = crc32(buf.as_slice(), 0);
        buf.push_u32_le(crc);
        let patch = buf.into_vec();

        assert!(matches!(apply_vec(&patch, b""), Err(FormatError::Truncated)));
        assert!(matches!(describe(&patch), Err(FormatError::Truncated)));

        let mut out = Vec::new();
        apply(&patch, b"", &mut out, &lenient()).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn corrupted_patch_crc() {
        let mut actions = Vec::new();
        vlq::write_u64(&mut actions, action(SOURCE_READ, 3));
        let mut patch = build(b"abc", b"abc", b"", &actions);
        let last = patch.len() - 1;
        patch[last] ^= 0xFF;
        assert!(matches!(
            apply_vec(&patch, b"abc"),
            Err(FormatError::Checksum(ChecksumMismatch {
                role: CrcRole::Patch,
                ..
            }))
        ));

        let mut out = Vec::new();
        let report = apply(&patch, b"abc", &mut out, &ApplyOptions::default()).unwrap();
        assert_eq!(out, b"abc");
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn create_is_unimplemented() {
        assert!(matches!(
            create(b"a", b"b"),
            Err(FormatError::Unimplemented(_))
        ));
    }
}
