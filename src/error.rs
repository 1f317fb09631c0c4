// Crate-level errors: dispatch and file handling around the format engines.

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::format::{Format, FormatError};

/// The part a file plays in an apply or create operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileRole {
    Patch,
    Input,
    Output,
    Target,
    Base,
}

impl fmt::Display for FileRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FileRole::Patch => "patch",
            FileRole::Input => "input",
            FileRole::Output => "output",
            FileRole::Target => "target",
            FileRole::Base => "base",
        })
    }
}

#[derive(Debug, Error)]
pub enum Error {
    /// A file could not be opened, created or mapped.
    #[error("{role} file {}: {source}", path.display())]
    Resource {
        role: FileRole,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// No registered format recognizes the patch or destination.
    #[error("unsupported patch format")]
    Unsupported,
    #[error("{format}: {source}")]
    Format {
        format: Format,
        #[source]
        source: FormatError,
    },
    #[error("{first} and {second} files are the same")]
    SameFile { first: FileRole, second: FileRole },
    #[error("{role} file {} does not exist", path.display())]
    Missing { role: FileRole, path: PathBuf },
}

impl Error {
    pub(crate) fn format(format: Format) -> impl FnOnce(FormatError) -> Error {
        move |source| Error::Format { format, source }
    }

    pub(crate) fn resource(role: FileRole, path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Error {
        let path = path.into();
        move |source| Error::Resource { role, path, source }
    }

    /// The engine failure underneath, if any.
    pub fn format_error(&self) -> Option<&FormatError> {
        match self {
            Error::Format { source, .. } => Some(source),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
