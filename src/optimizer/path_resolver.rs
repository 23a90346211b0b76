//! # Path Resolution Module
//!
//! Centralizza il calcolo dei path di destinazione per le immagini caricate.
//! Ogni upload riceve un nome UUID v4 nuovo, così due ottimizzazioni concorrenti
//! non scrivono mai sullo stesso file.

use anyhow::Result;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

/// Utility per calcolare i path di output in modo centralizzato
pub struct PathResolver;

impl PathResolver {
    /// Calcola un path univoco `upload_dir/<uuid><ext>` per un file caricato.
    ///
    /// L'estensione originale viene mantenuta così com'è (anche se non riconosciuta).
    pub fn unique_image_path(upload_dir: &Path, original_file_name: &str) -> PathBuf {
        let extension = Self::extension_of(original_file_name);
        let path = upload_dir.join(format!("{}{}", Uuid::new_v4(), extension));
        debug!("Resolved upload path: {} -> {}", original_file_name, path.display());
        path
    }

    /// Estensione del nome file comprensiva del punto, o stringa vuota
    pub fn extension_of(file_name: &str) -> String {
        Path::new(file_name)
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default()
    }

    /// Crea la directory di upload se necessario
    pub async fn ensure_upload_dir(upload_dir: &Path) -> Result<()> {
        tokio::fs::create_dir_all(upload_dir).await.map_err(|e| {
            anyhow::anyhow!(
                "Failed to create upload directory {}: {}",
                upload_dir.display(),
                e
            )
        })
    }
}
