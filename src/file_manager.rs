//! # File Management Module
//!
//! Questo modulo gestisce le operazioni sui file delle immagini caricate.
//!
//! ## Responsabilità:
//! - Cancellazione fire-and-forget delle immagini sostituite o orfane
//! - Discovery ricorsiva delle immagini non più referenziate da alcun prodotto
//! - Determinazione formato file immagine dall'estensione
//! - Formattazione human-readable delle dimensioni
//!
//! ## Cancellazione best-effort:
//! La rimozione di un vecchio file non blocca mai la risposta e i fallimenti non
//! vengono propagati al chiamante: vengono solo loggati. Un file orfano può restare
//! su disco; `find_orphaned_images()` permette di ritrovarlo in seguito.
//!
//! ## Esempio:
//! ```rust,ignore
//! FileManager::remove_detached(old_image_path);
//! let orphans = FileManager::find_orphaned_images(&upload_dir, &referenced)?;
//! ```

use anyhow::Result;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Manages file operations and discovery
pub struct FileManager;

impl FileManager {
    /// Deletes `path` on a background task without waiting for it.
    ///
    /// Failures are logged and swallowed. The handle is returned for callers
    /// (mostly tests) that want to observe completion; dropping it is fine.
    pub fn remove_detached(path: PathBuf) -> JoinHandle<()> {
        tokio::spawn(async move {
            match fs::remove_file(&path).await {
                Ok(()) => debug!("Removed image file: {}", path.display()),
                Err(e) => warn!("Failed to remove image file {}: {}", path.display(), e),
            }
        })
    }

    /// Find image files under `upload_dir` not contained in `referenced`.
    ///
    /// Paths are compared canonicalized when possible, so relative and
    /// absolute references to the same file match.
    pub fn find_orphaned_images(upload_dir: &Path, referenced: &[PathBuf]) -> Result<Vec<PathBuf>> {
        if !upload_dir.exists() {
            return Ok(Vec::new());
        }

        let referenced: HashSet<PathBuf> = referenced.iter().map(|p| Self::normalize(p)).collect();
        let mut orphans = Vec::new();

        for entry in WalkDir::new(upload_dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let path = entry.path();
            if Self::is_image(path) && !referenced.contains(&Self::normalize(path)) {
                orphans.push(path.to_path_buf());
            }
        }

        Ok(orphans)
    }

    fn normalize(path: &Path) -> PathBuf {
        path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
    }

    /// Check if a file is an image
    pub fn is_image(path: &Path) -> bool {
        if let Some(ext) = path.extension() {
            let ext_lower = ext.to_string_lossy().to_lowercase();
            matches!(ext_lower.as_str(), "jpg" | "jpeg" | "png" | "webp" | "gif" | "bmp")
        } else {
            false
        }
    }

    /// Get human-readable file size
    pub fn format_size(size: u64) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
        let mut size = size as f64;
        let mut unit_index = 0;

        while size >= 1024.0 && unit_index < UNITS.len() - 1 {
            size /= 1024.0;
            unit_index += 1;
        }

        if unit_index == 0 {
            format!("{} {}", size as u64, UNITS[unit_index])
        } else {
            format!("{:.2} {}", size, UNITS[unit_index])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_format_size() {
        assert_eq!(FileManager::format_size(512), "512 B");
        assert_eq!(FileManager::format_size(2048), "2.00 KB");
        assert_eq!(FileManager::format_size(5 * 1024 * 1024), "5.00 MB");
    }

    #[test]
    fn test_is_image() {
        assert!(FileManager::is_image(Path::new("a/b/photo.JPG")));
        assert!(FileManager::is_image(Path::new("photo.png")));
        assert!(!FileManager::is_image(Path::new("notes.txt")));
        assert!(!FileManager::is_image(Path::new("no_extension")));
    }

    #[tokio::test]
    async fn test_remove_detached() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("old.jpg");
        std::fs::write(&path, b"x").unwrap();

        FileManager::remove_detached(path.clone()).await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_remove_detached_missing_file_is_silent() {
        let temp_dir = TempDir::new().unwrap();
        let handle = FileManager::remove_detached(temp_dir.path().join("never-existed.jpg"));
        assert!(handle.await.is_ok());
    }

    #[test]
    fn test_find_orphaned_images() {
        let temp_dir = TempDir::new().unwrap();
        let kept = temp_dir.path().join("kept.jpg");
        let orphan = temp_dir.path().join("nested").join("orphan.png");
        std::fs::create_dir_all(orphan.parent().unwrap()).unwrap();
        std::fs::write(&kept, b"k").unwrap();
        std::fs::write(&orphan, b"o").unwrap();
        std::fs::write(temp_dir.path().join("readme.txt"), b"t").unwrap();

        let orphans = FileManager::find_orphaned_images(temp_dir.path(), &[kept]).unwrap();
        assert_eq!(orphans, vec![orphan]);
    }

    #[test]
    fn test_find_orphaned_images_missing_dir() {
        let temp_dir = TempDir::new().unwrap();
        let orphans =
            FileManager::find_orphaned_images(&temp_dir.path().join("absent"), &[]).unwrap();
        assert!(orphans.is_empty());
    }
}
