//! # Error Types Module
//!
//! Questo modulo definisce tutti i tipi di errore custom della libreria.
//!
//! ## Responsabilità:
//! - Definisce `OptimizeError` per categorizzare gli esiti negativi della pipeline immagini
//! - Definisce `ServiceError` per le operazioni CRUD sui prodotti
//! - Integra con `thiserror` per automatic error conversion
//! - Classifica gli errori in `ErrorKind` così il chiamante decide se riprovare
//!
//! ## Categorie di errori (pipeline):
//! - `Decode`: I byte non sono un'immagine riconoscibile
//! - `Encode`: Il codec non riesce a ricodificare l'immagine
//! - `Write`: Il file di destinazione non può essere creato o scritto
//! - `Timeout`: La deadline è scaduta prima di un risultato
//! - `Cancelled`: Il worker ha osservato un segnale di stop
//! - `TooLarge`: L'upload supera il limite di ingestione
//! - `Read`: Lo stream dell'upload è fallito durante la lettura
//! - `Worker`: Il task di elaborazione è andato in panic
//!
//! ## Esempio:
//! ```rust,ignore
//! match orchestrator.run(upload, &dest, timeout).await {
//!     Err(e) if e.kind() == ErrorKind::Timeout => retry_later(),
//!     Err(e) => return Err(ServiceError::Image(e)),
//!     Ok(image) => image.path,
//! }
//! ```

use std::io;
use std::path::PathBuf;
use std::time::Duration;

/// Errors produced by the image ingestion and optimization pipeline
#[derive(thiserror::Error, Debug)]
pub enum OptimizeError {
    #[error("Image decode error: {0}")]
    Decode(#[source] image::ImageError),

    #[error("Image encode error: {0}")]
    Encode(#[source] image::ImageError),

    #[error("Failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Image processing timed out after {0:?}")]
    Timeout(Duration),

    #[error("Image processing cancelled")]
    Cancelled,

    #[error("Upload exceeds the {limit} byte limit")]
    TooLarge { limit: usize },

    #[error("Failed to read upload: {0}")]
    Read(#[source] io::Error),

    #[error("Image worker failed: {0}")]
    Worker(String),
}

/// Coarse classification used by callers to pick a response or a retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The input itself is the problem; retrying the same bytes will not help
    Unprocessable,
    /// Processing failed on our side (codec, filesystem, worker)
    ProcessingFailed,
    /// The deadline elapsed; a larger deadline or a smaller image may succeed
    Timeout,
}

impl OptimizeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OptimizeError::Decode(_) | OptimizeError::TooLarge { .. } => ErrorKind::Unprocessable,
            OptimizeError::Timeout(_) => ErrorKind::Timeout,
            OptimizeError::Encode(_)
            | OptimizeError::Write { .. }
            | OptimizeError::Cancelled
            | OptimizeError::Read(_)
            | OptimizeError::Worker(_) => ErrorKind::ProcessingFailed,
        }
    }

    pub(crate) fn write(path: impl Into<PathBuf>, source: io::Error) -> Self {
        OptimizeError::Write {
            path: path.into(),
            source,
        }
    }
}

/// Errors returned by the product service
#[derive(thiserror::Error, Debug)]
pub enum ServiceError {
    #[error("Product {0} not found")]
    NotFound(u64),

    #[error("Invalid product: {0}")]
    Validation(String),

    #[error("Image processing failed: {0}")]
    Image(#[from] OptimizeError),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let decode = OptimizeError::Decode(image::ImageError::IoError(io::Error::new(
            io::ErrorKind::InvalidData,
            "bad",
        )));
        assert_eq!(decode.kind(), ErrorKind::Unprocessable);

        let write = OptimizeError::write("/nope/out.jpg", io::Error::from(io::ErrorKind::NotFound));
        assert_eq!(write.kind(), ErrorKind::ProcessingFailed);
        assert!(write.to_string().contains("/nope/out.jpg"));

        assert_eq!(
            OptimizeError::Timeout(Duration::from_secs(10)).kind(),
            ErrorKind::Timeout
        );
        assert_eq!(OptimizeError::Cancelled.kind(), ErrorKind::ProcessingFailed);
    }

    #[test]
    fn test_service_error_from_optimize_error() {
        let err: ServiceError = OptimizeError::Timeout(Duration::from_millis(5)).into();
        assert!(matches!(err, ServiceError::Image(OptimizeError::Timeout(_))));
    }
}
