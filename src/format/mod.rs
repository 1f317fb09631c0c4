// Patch format registry and the plumbing shared by every engine.
//
// # Modules
//
// - `ips`: IPS and IPS32, fixed-width records, literal or RLE payloads
// - `ups`: UPS, XOR hunks separated by VLQ skips, CRC-32 trailer
// - `bps`: BPS, source/target read and copy actions, CRC-32 trailer
//
// Formats are a closed enum. Registration order (`Format::ALL`) is the
// order used for detection and for extension lookup.

pub mod bps;
pub mod ips;
pub mod ups;

use std::fmt;
use std::io;
use std::path::Path;

use bitflags::bitflags;
use thiserror::Error;

use crate::codec::VlqError;
use crate::codec::cursor::read_u32_le_at;

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// A supported patch format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Ips,
    Ips32,
    Ups,
    Bps,
}

impl Format {
    /// Every format, in detection order.
    pub const ALL: [Format; 4] = [Format::Ips, Format::Ips32, Format::Ups, Format::Bps];

    pub fn name(self) -> &'static str {
        match self {
            Format::Ips => "IPS",
            Format::Ips32 => "IPS32",
            Format::Ups => "UPS",
            Format::Bps => "BPS",
        }
    }

    /// Leading bytes that identify a patch of this format.
    pub fn magic(self) -> &'static [u8] {
        match self {
            Format::Ips => ips::IPS.magic,
            Format::Ips32 => ips::IPS32.magic,
            Format::Ups => ups::MAGIC,
            Format::Bps => bps::MAGIC,
        }
    }

    /// File extension (without the dot) used to pick a format on create.
    pub fn extension(self) -> &'static str {
        match self {
            Format::Ips | Format::Ips32 => "ips",
            Format::Ups => "ups",
            Format::Bps => "bps",
        }
    }

    /// Smallest well-formed patch, in bytes.
    pub fn min_patch_len(self) -> usize {
        match self {
            Format::Ips | Format::Ips32 => ips::MIN_PATCH_LEN,
            Format::Ups => ups::MIN_PATCH_LEN,
            Format::Bps => bps::MIN_PATCH_LEN,
        }
    }

    /// Whether a patch starts with this format's magic header.
    pub fn matches_patch(self, patch: &[u8]) -> bool {
        patch.starts_with(self.magic())
    }

    /// Size predicate for creation: can this format describe a target of
    /// `target_len` bytes?
    pub fn accepts_target(self, target_len: u64) -> bool {
        match self {
            Format::Ips => target_len <= ips::IPS.max_target,
            Format::Ips32 => target_len > ips::IPS.max_target && target_len <= ips::IPS32.max_target,
            Format::Ups | Format::Bps => true,
        }
    }

    /// First format whose magic header matches `patch`.
    pub fn detect(patch: &[u8]) -> Option<Format> {
        Format::ALL.into_iter().find(|f| f.matches_patch(patch))
    }

    /// First format whose extension matches `destination` and whose size
    /// predicate accepts the target length.
    pub fn for_destination(destination: &Path, target_len: u64) -> Option<Format> {
        let ext = destination.extension()?.to_str()?;
        Format::ALL
            .into_iter()
            .find(|f| f.extension().eq_ignore_ascii_case(ext) && f.accepts_target(target_len))
    }

    /// Apply `patch` to `input`, writing the result into `output`.
    pub fn apply<O: OutputTarget + ?Sized>(
        self,
        patch: &[u8],
        input: &[u8],
        output: &mut O,
        opts: &ApplyOptions,
    ) -> Result<ApplyReport, FormatError> {
        if patch.len() < self.min_patch_len() {
            return Err(FormatError::TooSmall {
                len: patch.len(),
                min: self.min_patch_len(),
            });
        }
        match self {
            Format::Ips => ips::apply(&ips::IPS, patch, input, output, opts),
            Format::Ips32 => ips::apply(&ips::IPS32, patch, input, output, opts),
            Format::Ups => ups::apply(patch, input, output, opts),
            Format::Bps => bps::apply(patch, input, output, opts),
        }
    }

    /// Build a patch that turns `base` into `target`.
    pub fn create(self, base: &[u8], target: &[u8]) -> Result<Vec<u8>, FormatError> {
        match self {
            Format::Ips => ips::create(&ips::IPS, base, target),
            Format::Ips32 => ips::create(&ips::IPS32, base, target),
            Format::Ups => Ok(ups::create(base, target)),
            Format::Bps => bps::create(base, target),
        }
    }

    /// Parse the header and structure of `patch` without applying it.
    pub fn describe(self, patch: &[u8]) -> Result<PatchInfo, FormatError> {
        if patch.len() < self.min_patch_len() {
            return Err(FormatError::TooSmall {
                len: patch.len(),
                min: self.min_patch_len(),
            });
        }
        match self {
            Format::Ips => ips::describe(&ips::IPS, patch),
            Format::Ips32 => ips::describe(&ips::IPS32, patch),
            Format::Ups => ups::describe(patch),
            Format::Bps => bps::describe(patch),
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Checksum options
// ---------------------------------------------------------------------------

bitflags! {
    /// One bit per checksummed role in a UPS/BPS trailer.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CrcFlags: u8 {
        const PATCH = 0b001;
        const INPUT = 0b010;
        const OUTPUT = 0b100;
    }
}

/// Which buffer a checksum covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrcRole {
    Patch,
    Input,
    Output,
}

impl CrcRole {
    pub fn flag(self) -> CrcFlags {
        match self {
            CrcRole::Patch => CrcFlags::PATCH,
            CrcRole::Input => CrcFlags::INPUT,
            CrcRole::Output => CrcFlags::OUTPUT,
        }
    }
}

impl fmt::Display for CrcRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CrcRole::Patch => "patch",
            CrcRole::Input => "input",
            CrcRole::Output => "output",
        })
    }
}

/// Options for applying a patch.
///
/// The default verifies every checksum, downgrades mismatches to warnings
/// and rejects patches whose records run past the end of the data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyOptions {
    /// Checksums that are not computed at all.
    pub ignore: CrcFlags,
    /// Checksums whose mismatch aborts the apply.
    pub strict: CrcFlags,
    /// Read missing patch bytes as zero instead of failing with
    /// [`FormatError::Truncated`].
    pub allow_truncated: bool,
}

/// A checksum that did not match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChecksumMismatch {
    pub role: CrcRole,
    pub expected: u32,
    pub actual: u32,
}

impl fmt::Display for ChecksumMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} checksum mismatch: expected {:#010X}, got {:#010X}",
            self.role, self.expected, self.actual
        )
    }
}

/// Applies the ignore/strict policy and collects non-fatal mismatches.
pub(crate) struct ChecksumGate<'a> {
    opts: &'a ApplyOptions,
    warnings: Vec<ChecksumMismatch>,
}

impl<'a> ChecksumGate<'a> {
    pub(crate) fn new(opts: &'a ApplyOptions) -> Self {
        Self {
            opts,
            warnings: Vec::new(),
        }
    }

    /// Compare `expected` against the lazily computed `actual` checksum.
    pub(crate) fn check(
        &mut self,
        role: CrcRole,
        expected: u32,
        actual: impl FnOnce() -> u32,
    ) -> Result<(), FormatError> {
        if self.opts.ignore.contains(role.flag()) {
            return Ok(());
        }
        let actual = actual();
        if actual == expected {
            return Ok(());
        }
        let mismatch = ChecksumMismatch {
            role,
            expected,
            actual,
        };
        if self.opts.strict.contains(role.flag()) {
            return Err(FormatError::Checksum(mismatch));
        }
        log::warn!("{mismatch}");
        self.warnings.push(mismatch);
        Ok(())
    }

    pub(crate) fn into_warnings(self) -> Vec<ChecksumMismatch> {
        self.warnings
    }
}

/// Fail with `Truncated` unless the options tolerate short patches.
pub(crate) fn check_truncation(
    overrun: bool,
    opts: &ApplyOptions,
    what: &str,
) -> Result<(), FormatError> {
    if !overrun {
        return Ok(());
    }
    if opts.allow_truncated {
        log::warn!("{what} runs past the end of the patch data; missing bytes read as zero");
        Ok(())
    } else {
        Err(FormatError::Truncated)
    }
}

// ---------------------------------------------------------------------------
// CRC trailer (UPS, BPS)
// ---------------------------------------------------------------------------

/// Length of the UPS/BPS checksum trailer.
pub const TRAILER_LEN: usize = 12;

/// The three little-endian CRC-32 values closing a UPS/BPS patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checksums {
    pub input: u32,
    pub output: u32,
    pub patch: u32,
}

impl Checksums {
    /// Read the trailer from the last 12 bytes of `patch`.
    pub(crate) fn read(patch: &[u8]) -> Option<Self> {
        let base = patch.len().checked_sub(TRAILER_LEN)?;
        Some(Self {
            input: read_u32_le_at(patch, base)?,
            output: read_u32_le_at(patch, base + 4)?,
            patch: read_u32_le_at(patch, base + 8)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Destination for an applied patch, allocated once the target size is known.
pub trait OutputTarget {
    /// Allocate `len` zeroed bytes and return them for writing.
    fn allocate(&mut self, len: usize) -> io::Result<&mut [u8]>;
}

impl OutputTarget for Vec<u8> {
    fn allocate(&mut self, len: usize) -> io::Result<&mut [u8]> {
        self.clear();
        self.try_reserve_exact(len)
            .map_err(|e| io::Error::new(io::ErrorKind::OutOfMemory, e))?;
        self.resize(len, 0);
        Ok(&mut self[..])
    }
}

/// Bounds-checked sequential writer over an allocated output.
pub(crate) struct OutputWriter<'o> {
    buf: &'o mut [u8],
    pos: usize,
}

impl<'o> OutputWriter<'o> {
    pub(crate) fn new(buf: &'o mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes written so far.
    #[inline]
    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    #[inline]
    pub(crate) fn is_full(&self) -> bool {
        self.pos >= self.buf.len()
    }

    #[inline]
    pub(crate) fn put(&mut self, byte: u8) -> Result<(), FormatError> {
        let limit = self.buf.len();
        let slot = self
            .buf
            .get_mut(self.pos)
            .ok_or_else(|| FormatError::out_of_range("output", self.pos, limit))?;
        *slot = byte;
        self.pos += 1;
        Ok(())
    }

    pub(crate) fn put_slice(&mut self, bytes: &[u8]) -> Result<(), FormatError> {
        let end = self.pos + bytes.len();
        if end > self.buf.len() {
            return Err(FormatError::out_of_range("output", end, self.buf.len()));
        }
        self.buf[self.pos..end].copy_from_slice(bytes);
        self.pos = end;
        Ok(())
    }

    /// Read back a byte this writer has already produced.
    #[inline]
    pub(crate) fn written(&self, offset: usize) -> Result<u8, FormatError> {
        if offset >= self.pos {
            return Err(FormatError::out_of_range("written output", offset, self.pos));
        }
        Ok(self.buf[offset])
    }

    pub(crate) fn as_slice(&self) -> &[u8] {
        &self.buf[..]
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Outcome of a successful apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyReport {
    pub format: Format,
    /// Length of the produced output.
    pub output_len: usize,
    /// Checksum mismatches that were downgraded to warnings.
    pub warnings: Vec<ChecksumMismatch>,
}

/// Header and structure of a patch, as reported by [`Format::describe`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchInfo {
    pub format: Format,
    pub patch_len: usize,
    /// Input size recorded in the header (UPS, BPS).
    pub source_size: Option<u64>,
    /// Output size recorded in the header (UPS, BPS) or implied by the
    /// furthest record (IPS, IPS32).
    pub target_size: Option<u64>,
    /// IPS records, UPS hunks or BPS actions.
    pub records: usize,
    /// BPS metadata block.
    pub metadata: Option<Vec<u8>>,
    pub checksums: Option<Checksums>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A failure inside one format engine.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("patch is too small ({len} bytes, need at least {min})")]
    TooSmall { len: usize, min: usize },
    #[error("invalid header")]
    BadMagic,
    #[error("footer not found")]
    MissingFooter,
    #[error("patch data is truncated")]
    Truncated,
    #[error("invalid patching action {0}")]
    InvalidAction(u64),
    #[error("{0}")]
    Checksum(ChecksumMismatch),
    #[error("{buffer} access at offset {offset} is out of range (length {limit})")]
    OutOfRange {
        buffer: &'static str,
        offset: u64,
        limit: u64,
    },
    #[error("target is too large ({len} bytes, limit {max})")]
    TargetTooLarge { len: u64, max: u64 },
    #[error(transparent)]
    Vlq(#[from] VlqError),
    #[error("{0} is not implemented")]
    Unimplemented(&'static str),
    #[error("cannot allocate output: {0}")]
    Output(#[source] io::Error),
}

impl FormatError {
    pub(crate) fn out_of_range(buffer: &'static str, offset: usize, limit: usize) -> Self {
        FormatError::OutOfRange {
            buffer,
            offset: offset as u64,
            limit: limit as u64,
        }
    }
}
