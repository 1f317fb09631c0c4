// File layer: memory-mapped buffers per role, plus apply/create wrappers.
//
// Every role (patch, input, output, target, base) is a `MappedBuffer`.
// Outputs are created lazily, once the engine knows how large they are.
// With the `file-io` feature a SHA-256 of the written file is reported.

use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};

use memmap2::{Mmap, MmapMut, MmapOptions};
#[cfg(feature = "file-io")]
use sha2::{Digest, Sha256};

use crate::engine;
use crate::error::{Error, FileRole, Result};
use crate::format::{ApplyOptions, ChecksumMismatch, Format, OutputTarget};

// ---------------------------------------------------------------------------
// Mapped buffer
// ---------------------------------------------------------------------------

/// How a [`MappedBuffer`] is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapMode {
    /// Existing file, read-only.
    Read,
    /// New or truncated file, written once.
    Write,
    /// Existing file, modified in place.
    ReadWrite,
    /// New or truncated file that is written and then read back.
    WriteRead,
}

impl MapMode {
    fn writable(self) -> bool {
        !matches!(self, MapMode::Read)
    }

    fn creates(self) -> bool {
        matches!(self, MapMode::Write | MapMode::WriteRead)
    }
}

#[derive(Debug)]
enum Mapping {
    /// Zero-length files are never mapped.
    Empty,
    ReadOnly(Mmap),
    Writable(MmapMut),
}

/// A file mapped into memory. Dropping it unmaps the file.
#[derive(Debug)]
pub struct MappedBuffer {
    path: PathBuf,
    mode: MapMode,
    mapping: Mapping,
}

impl MappedBuffer {
    /// Map an existing file in `Read` or `ReadWrite` mode.
    pub fn open(path: impl AsRef<Path>, mode: MapMode) -> io::Result<Self> {
        let path = path.as_ref();
        if mode.creates() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "open() maps existing files; use create() for new ones",
            ));
        }
        let file = OpenOptions::new()
            .read(true)
            .write(mode.writable())
            .open(path)?;
        let len = file.metadata()?.len();

        let mapping = if len == 0 {
            Mapping::Empty
        } else if mode.writable() {
            // SAFETY: the file stays open for the mapping's lifetime and is
            // not truncated by this process while mapped.
            Mapping::Writable(unsafe { MmapMut::map_mut(&file)? })
        } else {
            // SAFETY: as above.
            Mapping::ReadOnly(unsafe { MmapOptions::new().map(&file)? })
        };
        log::debug!("mapped {} ({len} bytes, {mode:?})", path.display());

        Ok(Self {
            path: path.to_path_buf(),
            mode,
            mapping,
        })
    }

    /// Create (or truncate) `path` at `len` zeroed bytes in `Write` or
    /// `WriteRead` mode.
    pub fn create(path: impl AsRef<Path>, len: u64, mode: MapMode) -> io::Result<Self> {
        let path = path.as_ref();
        if !mode.creates() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "create() makes new files; use open() for existing ones",
            ));
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        let mapping = if len == 0 {
            Mapping::Empty
        } else {
            file.set_len(len)?;
            // SAFETY: the file was just created by this process.
            Mapping::Writable(unsafe { MmapMut::map_mut(&file)? })
        };
        log::debug!("created {} ({len} bytes, {mode:?})", path.display());

        Ok(Self {
            path: path.to_path_buf(),
            mode,
            mapping,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> MapMode {
        self.mode
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        match &self.mapping {
            Mapping::Empty => &[],
            Mapping::ReadOnly(m) => &m[..],
            Mapping::Writable(m) => &m[..],
        }
    }

    /// Writable view, or `None` for read-only buffers.
    pub fn as_mut_slice(&mut self) -> Option<&mut [u8]> {
        match &mut self.mapping {
            Mapping::Empty if self.mode.writable() => Some(Default::default()),
            Mapping::Writable(m) => Some(&mut m[..]),
            _ => None,
        }
    }

    /// Write dirty pages back to the file.
    pub fn flush(&self) -> io::Result<()> {
        match &self.mapping {
            Mapping::Writable(m) => m.flush(),
            _ => Ok(()),
        }
    }

    /// Flush and unmap.
    pub fn close(self) -> io::Result<()> {
        self.flush()
    }
}

// ---------------------------------------------------------------------------
// Lazily created output
// ---------------------------------------------------------------------------

/// Output file that is created when the engine allocates it.
#[derive(Debug)]
pub struct OutputFile {
    path: PathBuf,
    buffer: Option<MappedBuffer>,
}

impl OutputFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            buffer: None,
        }
    }

    /// The mapped file, if the engine has allocated it.
    pub fn buffer(&self) -> Option<&MappedBuffer> {
        self.buffer.as_ref()
    }

    pub fn into_buffer(self) -> Option<MappedBuffer> {
        self.buffer
    }
}

impl OutputTarget for OutputFile {
    fn allocate(&mut self, len: usize) -> io::Result<&mut [u8]> {
        let buffer = self
            .buffer
            .insert(MappedBuffer::create(&self.path, len as u64, MapMode::Write)?);
        buffer
            .as_mut_slice()
            .ok_or_else(|| io::Error::other("output mapping is not writable"))
    }
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Statistics returned by [`apply_file`].
#[derive(Debug, Clone)]
pub struct ApplyStats {
    pub format: Format,
    pub patch_size: u64,
    pub input_size: u64,
    pub output_size: u64,
    /// Checksum mismatches downgraded to warnings.
    pub warnings: Vec<ChecksumMismatch>,
    /// SHA-256 of the written output (if `file-io` feature is enabled).
    pub output_sha256: Option<[u8; 32]>,
}

/// Statistics returned by [`create_file`].
#[derive(Debug, Clone)]
pub struct CreateStats {
    pub format: Format,
    pub base_size: u64,
    pub target_size: u64,
    pub patch_size: u64,
    /// SHA-256 of the written patch (if `file-io` feature is enabled).
    pub patch_sha256: Option<[u8; 32]>,
}

#[cfg(feature = "file-io")]
fn sha256(data: &[u8]) -> Option<[u8; 32]> {
    Some(Sha256::digest(data).into())
}

#[cfg(not(feature = "file-io"))]
fn sha256(_data: &[u8]) -> Option<[u8; 32]> {
    None
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn same_path(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Reject any two roles that name the same file.
pub fn check_distinct(files: &[(FileRole, &Path)]) -> Result<()> {
    for (i, &(first, a)) in files.iter().enumerate() {
        for &(second, b) in &files[i + 1..] {
            if same_path(a, b) {
                return Err(Error::SameFile { first, second });
            }
        }
    }
    Ok(())
}

/// Reject a required input that does not exist.
pub fn check_exists(role: FileRole, path: &Path) -> Result<()> {
    if path.exists() {
        Ok(())
    } else {
        Err(Error::Missing {
            role,
            path: path.to_path_buf(),
        })
    }
}

fn open_role(role: FileRole, path: &Path) -> Result<MappedBuffer> {
    check_exists(role, path)?;
    MappedBuffer::open(path, MapMode::Read).map_err(Error::resource(role, path))
}

// ---------------------------------------------------------------------------
// apply_file / create_file
// ---------------------------------------------------------------------------

/// Apply the patch at `patch_path` to `input_path`, writing `output_path`.
pub fn apply_file(
    patch_path: &Path,
    input_path: &Path,
    output_path: &Path,
    opts: &ApplyOptions,
) -> Result<ApplyStats> {
    check_distinct(&[
        (FileRole::Patch, patch_path),
        (FileRole::Input, input_path),
        (FileRole::Output, output_path),
    ])?;
    let patch = open_role(FileRole::Patch, patch_path)?;
    let input = open_role(FileRole::Input, input_path)?;

    let mut output = OutputFile::new(output_path);
    let report = engine::apply_into(patch.as_slice(), input.as_slice(), &mut output, opts)?;

    // Engines always allocate before succeeding; map an empty file otherwise.
    let output = match output.into_buffer() {
        Some(buffer) => buffer,
        None => MappedBuffer::create(output_path, 0, MapMode::Write)
            .map_err(Error::resource(FileRole::Output, output_path))?,
    };
    let output_sha256 = sha256(output.as_slice());
    let output_size = output.len() as u64;
    output
        .close()
        .map_err(Error::resource(FileRole::Output, output_path))?;

    Ok(ApplyStats {
        format: report.format,
        patch_size: patch.len() as u64,
        input_size: input.len() as u64,
        output_size,
        warnings: report.warnings,
        output_sha256,
    })
}

/// Create a patch from `base_path` to `target_path` at `output_path`.
///
/// The format comes from `output_path`'s extension and the target size.
pub fn create_file(target_path: &Path, base_path: &Path, output_path: &Path) -> Result<CreateStats> {
    check_distinct(&[
        (FileRole::Target, target_path),
        (FileRole::Base, base_path),
        (FileRole::Output, output_path),
    ])?;
    let target = open_role(FileRole::Target, target_path)?;
    let base = open_role(FileRole::Base, base_path)?;

    let (format, patch) = engine::create_for_path(output_path, base.as_slice(), target.as_slice())?;

    let mut output = MappedBuffer::create(output_path, patch.len() as u64, MapMode::Write)
        .map_err(Error::resource(FileRole::Output, output_path))?;
    if let Some(dst) = output.as_mut_slice() {
        dst.copy_from_slice(&patch);
    }
    output
        .close()
        .map_err(Error::resource(FileRole::Output, output_path))?;

    Ok(CreateStats {
        format,
        base_size: base.len() as u64,
        target_size: target.len() as u64,
        patch_size: patch.len() as u64,
        patch_sha256: sha256(&patch),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
