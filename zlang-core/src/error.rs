use std::path::PathBuf;

use thiserror::Error;

use crate::diagnostic::DiagnosticBag;
use crate::modules::MAX_SOURCE_BYTES;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("failed to read source {}: {source}", path.display())]
    SourceIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("source file {} exceeds the {MAX_SOURCE_BYTES} byte limit", path.display())]
    SourceTooLarge { path: PathBuf },
    #[error("source file {} is not valid UTF-8", path.display())]
    InvalidEncoding { path: PathBuf },
    #[error("{0}")]
    Rejected(DiagnosticBag),
}

impl CoreError {
    /// The diagnostics of a rejected compilation, if any.
    pub fn diagnostics(&self) -> Option<&DiagnosticBag> {
        match self {
            CoreError::Rejected(bag) => Some(bag),
            _ => None,
        }
    }
}
