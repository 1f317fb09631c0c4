//! rompatch: IPS, IPS32, UPS and BPS binary patches in Rust.
//!
//! The crate provides:
//! - Byte-level primitives: cursor, VLQ, CRC-32, growable buffer (`codec`)
//! - The format registry and per-format engines (`format`)
//! - In-memory apply/create with format selection (`engine`)
//! - Memory-mapped, file-oriented helpers (`io`)
//! - An optional CLI (`cli` feature)
//!
//! # Quick Start
//!
//! ```no_run
//! use rompatch::engine;
//! use rompatch::format::{ApplyOptions, Format};
//!
//! let base = b"hello old world";
//! let target = b"hello new world";
//!
//! let patch = engine::create(Format::Ups, base, target).unwrap();
//! let (patched, report) = engine::apply(&patch, base, &ApplyOptions::default()).unwrap();
//! assert_eq!(patched, target);
//! assert!(report.warnings.is_empty());
//! ```

pub mod codec;
pub mod engine;
pub mod error;
pub mod format;
pub mod io;

#[cfg(feature = "cli")]
pub mod cli;

pub use error::{Error, FileRole, Result};
pub use format::{ApplyOptions, ApplyReport, CrcFlags, Format, FormatError, PatchInfo};
