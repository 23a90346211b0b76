//! # Configuration Management Module
//!
//! Questo modulo gestisce tutta la configurazione della pipeline immagini e del catalogo.
//!
//! ## Responsabilità:
//! - Definisce la struct `Config` con tutti i parametri di ottimizzazione
//! - Fornisce validazione robusta dei parametri
//! - Supporta caricamento/salvataggio configurazione da/verso file JSON
//! - Fornisce valori di default sensati per tutti i parametri
//!
//! ## Parametri di configurazione:
//! - `upload_dir`: Directory dove vengono scritte le immagini ottimizzate (default: "uploads")
//! - `max_width` / `max_height`: Limite dimensioni output (default: 800x800)
//! - `jpeg_quality`: Qualità JPEG (1-100, default: 80)
//! - `processing_timeout_secs`: Deadline per singola ottimizzazione (default: 10)
//! - `max_upload_bytes`: Dimensione massima di un upload letto in memoria (default: 8 MiB, max 1 GiB)
//! - `pool_max_idle`: Buffer inattivi trattenuti dal pool (default: 16)
//! - `pool_buffer_capacity`: Capacità iniziale di un buffer nuovo (default: 512 KiB)
//!
//! I limiti di resize e la qualità sono fissati a livello di processo, mai per singola richiesta.
//!
//! ## Esempio:
//! ```rust
//! use catalog_image_optimizer::Config;
//!
//! let config = Config {
//!     jpeg_quality: 85,
//!     processing_timeout_secs: 5,
//!     ..Default::default()
//! };
//! config.validate().unwrap();
//! ```

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Upper bound for `max_upload_bytes`: uploads are held fully in memory
pub const MAX_UPLOAD_BYTES_LIMIT: usize = 1 << 30;

/// Configuration for image ingestion and the product catalog
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory receiving optimized images
    pub upload_dir: PathBuf,
    /// Maximum output width in pixels
    pub max_width: u32,
    /// Maximum output height in pixels
    pub max_height: u32,
    /// JPEG quality (1-100)
    pub jpeg_quality: u8,
    /// Deadline for a single optimization, in seconds
    pub processing_timeout_secs: u64,
    /// Largest upload accepted into memory
    pub max_upload_bytes: usize,
    /// Number of idle buffers the pool keeps around
    pub pool_max_idle: usize,
    /// Initial capacity of freshly allocated buffers
    pub pool_buffer_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("uploads"),
            max_width: 800,
            max_height: 800,
            jpeg_quality: 80,
            processing_timeout_secs: 10,
            max_upload_bytes: 8 << 20,
            pool_max_idle: 16,
            pool_buffer_capacity: 512 * 1024,
        }
    }
}

impl Config {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<()> {
        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return Err(anyhow::anyhow!("JPEG quality must be between 1 and 100"));
        }

        if self.max_width == 0 || self.max_height == 0 {
            return Err(anyhow::anyhow!("Maximum image dimensions must be greater than 0"));
        }

        if self.processing_timeout_secs == 0 {
            return Err(anyhow::anyhow!("Processing timeout must be greater than 0"));
        }

        if self.max_upload_bytes == 0 || self.max_upload_bytes > MAX_UPLOAD_BYTES_LIMIT {
            return Err(anyhow::anyhow!(
                "Maximum upload size must be between 1 and {} bytes",
                MAX_UPLOAD_BYTES_LIMIT
            ));
        }

        if self.upload_dir.as_os_str().is_empty() {
            return Err(anyhow::anyhow!("Upload directory must not be empty"));
        }

        Ok(())
    }

    pub fn processing_timeout(&self) -> Duration {
        Duration::from_secs(self.processing_timeout_secs)
    }

    /// Load configuration from file
    pub async fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path).await?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.jpeg_quality = 0;
        assert!(config.validate().is_err());

        config.jpeg_quality = 80;
        config.max_width = 0;
        assert!(config.validate().is_err());

        config.max_width = 800;
        config.processing_timeout_secs = 0;
        assert!(config.validate().is_err());

        config.processing_timeout_secs = 10;
        config.upload_dir = PathBuf::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_upload_limit_bounds() {
        let mut config = Config::default();

        config.max_upload_bytes = 0;
        assert!(config.validate().is_err());

        config.max_upload_bytes = usize::MAX;
        assert!(config.validate().is_err());

        config.max_upload_bytes = MAX_UPLOAD_BYTES_LIMIT;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.max_width, 800);
        assert_eq!(config.max_height, 800);
        assert_eq!(config.jpeg_quality, 80);
        assert_eq!(config.processing_timeout(), Duration::from_secs(10));
        assert_eq!(config.max_upload_bytes, 8 * 1024 * 1024);
    }

    #[tokio::test]
    async fn test_config_save_load() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.json");

        let original_config = Config {
            upload_dir: temp_dir.path().join("images"),
            jpeg_quality: 70,
            processing_timeout_secs: 3,
            ..Default::default()
        };

        original_config.save_to_file(&config_path).await.unwrap();
        let loaded_config = Config::from_file(&config_path).await.unwrap();

        assert_eq!(loaded_config.upload_dir, temp_dir.path().join("images"));
        assert_eq!(loaded_config.jpeg_quality, 70);
        assert_eq!(loaded_config.processing_timeout_secs, 3);
        assert_eq!(loaded_config.max_width, 800);
    }

    #[tokio::test]
    async fn test_config_missing_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::from_file(&temp_dir.path().join("absent.json")).await.unwrap();
        assert_eq!(config.jpeg_quality, 80);
    }

    #[tokio::test]
    async fn test_config_partial_file_fills_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("partial.json");
        tokio::fs::write(&config_path, r#"{ "jpeg_quality": 60 }"#).await.unwrap();

        let config = Config::from_file(&config_path).await.unwrap();
        assert_eq!(config.jpeg_quality, 60);
        assert_eq!(config.max_height, 800);
    }

    #[tokio::test]
    async fn test_config_invalid_file_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("bad.json");
        tokio::fs::write(&config_path, r#"{ "jpeg_quality": 0 }"#).await.unwrap();

        assert!(Config::from_file(&config_path).await.is_err());
    }
}
