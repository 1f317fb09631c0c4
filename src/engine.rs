// Dispatch: pick a format and run its engine over in-memory buffers.
//
// Apply picks the format from the patch's magic header. Create picks it
// from the destination's extension and the target size. Either way, a
// miss is `Error::Unsupported`, never a per-format error.

use std::path::Path;

use crate::error::{Error, Result};
use crate::format::{ApplyOptions, ApplyReport, Format, OutputTarget, PatchInfo};

/// Identify the format of `patch` by its magic header.
pub fn detect(patch: &[u8]) -> Result<Format> {
    Format::detect(patch).ok_or(Error::Unsupported)
}

/// Apply `patch` to `input` and return the patched bytes.
pub fn apply(patch: &[u8], input: &[u8], opts: &ApplyOptions) -> Result<(Vec<u8>, ApplyReport)> {
    let mut output = Vec::new();
    let report = apply_into(patch, input, &mut output, opts)?;
    Ok((output, report))
}

/// Apply `patch` to `input`, writing into a caller-provided output target.
pub fn apply_into<O: OutputTarget + ?Sized>(
    patch: &[u8],
    input: &[u8],
    output: &mut O,
    opts: &ApplyOptions,
) -> Result<ApplyReport> {
    let format = detect(patch)?;
    log::debug!("detected {format} patch ({} bytes)", patch.len());
    format
        .apply(patch, input, output, opts)
        .map_err(Error::format(format))
}

/// Build a patch in an explicit format.
pub fn create(format: Format, base: &[u8], target: &[u8]) -> Result<Vec<u8>> {
    format.create(base, target).map_err(Error::format(format))
}

/// Build a patch in the format implied by `destination`.
pub fn create_for_path(destination: &Path, base: &[u8], target: &[u8]) -> Result<(Format, Vec<u8>)> {
    let format =
        Format::for_destination(destination, target.len() as u64).ok_or(Error::Unsupported)?;
    log::debug!(
        "selected {format} for {} ({} byte target)",
        destination.display(),
        target.len()
    );
    Ok((format, create(format, base, target)?))
}

/// Parse a patch's header and structure without applying it.
pub fn describe(patch: &[u8]) -> Result<PatchInfo> {
    let format = detect(patch)?;
    format.describe(patch).map_err(Error::format(format))
}
