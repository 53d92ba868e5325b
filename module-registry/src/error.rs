//! Registry error types.
//!
//! Every variant is fatal to the registrar run. Symlinks and rows committed
//! before the failure are left in place.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read module archive {}: {source}", path.display())]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("module archive {} has no `{entry}` entry", path.display())]
    MissingEntry { path: PathBuf, entry: String },

    #[error("invalid certificate bundle in {}: {message}", path.display())]
    Certificate { path: PathBuf, message: String },

    #[error("invalid module descriptor in {}: {message}", path.display())]
    Descriptor { path: PathBuf, message: String },

    #[error("config store not found at {}", path.display())]
    StoreMissing { path: PathBuf },

    #[error("config store error: {0}")]
    Sql(#[from] rusqlite::Error),
}

impl RegistryError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, RegistryError>;
