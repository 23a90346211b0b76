//! # Product Service Module
//!
//! Operazioni CRUD sul catalogo prodotti con immagine associata opzionale.
//!
//! ## Responsabilità:
//! - Validazione dei campi prodotto (nome obbligatorio, prezzo finito e non negativo)
//! - Ingestione e ottimizzazione dell'immagine tramite `UploadOrchestrator`
//! - Paginazione della lista prodotti
//! - Pulizia fire-and-forget delle immagini sostituite o eliminate
//!
//! ## Ordine delle operazioni in update:
//! 1. La nuova immagine viene ottimizzata su un path nuovo
//! 2. La riga viene modificata e salvata sotto il lock dello store
//! 3. Solo ora viene cancellata (in background) l'immagine che la riga
//!    referenziava al momento del salvataggio, non quella letta all'inizio
//!
//! Se l'ottimizzazione fallisce la vecchia immagine resta intatta e referenziata.
//! Se il salvataggio fallisce viene rimossa la nuova.
//!
//! ## Paginazione:
//! - `page < 1` diventa 1
//! - `page_size < 1` o `> 100` diventa 10
//! - `total_pages = ceil(total / page_size)`

use crate::buffer_pool::BufferPool;
use crate::config::Config;
use crate::error::ServiceError;
use crate::file_manager::FileManager;
use crate::optimizer::{PathResolver, UploadOrchestrator};
use crate::stats::UploadStats;
use crate::store::{NewProduct, Product, ProductStore};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::AsyncRead;
use tracing::{info, warn};

const DEFAULT_PAGE_SIZE: usize = 10;
const MAX_PAGE_SIZE: usize = 100;

/// Image file attached to a create or update request
pub struct ImageUpload {
    pub file_name: String,
    reader: Pin<Box<dyn AsyncRead + Send>>,
}

impl ImageUpload {
    pub fn new(file_name: impl Into<String>, reader: impl AsyncRead + Send + 'static) -> Self {
        Self {
            file_name: file_name.into(),
            reader: Box::pin(reader),
        }
    }

    pub fn from_bytes(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self::new(file_name, std::io::Cursor::new(bytes))
    }
}

impl std::fmt::Debug for ImageUpload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageUpload")
            .field("file_name", &self.file_name)
            .finish_non_exhaustive()
    }
}

/// Partial update; `None` leaves the field untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<f64>,
}

/// One page of products with pagination metadata
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductPage {
    pub data: Vec<Product>,
    pub total: u64,
    pub page: usize,
    pub page_size: usize,
    pub total_pages: u64,
}

/// Catalog operations over a store and an upload orchestrator
pub struct ProductService {
    store: ProductStore,
    orchestrator: UploadOrchestrator,
    upload_dir: PathBuf,
}

impl ProductService {
    /// Validates `config`, creates the upload directory and wires an orchestrator
    pub async fn open(
        config: &Config,
        store: ProductStore,
        pool: Arc<dyn BufferPool>,
    ) -> Result<Self, ServiceError> {
        let orchestrator = UploadOrchestrator::new(config, pool);
        Self::with_orchestrator(config, store, orchestrator).await
    }

    pub async fn with_orchestrator(
        config: &Config,
        store: ProductStore,
        orchestrator: UploadOrchestrator,
    ) -> Result<Self, ServiceError> {
        config.validate()?;
        PathResolver::ensure_upload_dir(&config.upload_dir).await?;

        Ok(Self {
            store,
            orchestrator,
            upload_dir: config.upload_dir.clone(),
        })
    }

    pub async fn create(
        &self,
        new: NewProduct,
        image: Option<ImageUpload>,
    ) -> Result<Product, ServiceError> {
        let started = Instant::now();
        validate_fields(&new.name, new.price)?;

        let image_path = match image {
            Some(upload) => Some(self.process_image(upload).await?),
            None => None,
        };

        let product = match self.store.insert(new, image_path.clone()).await {
            Ok(product) => product,
            Err(e) => {
                if let Some(path) = image_path {
                    FileManager::remove_detached(path);
                }
                return Err(e.into());
            }
        };

        info!("Product {} created in {}ms", product.id, started.elapsed().as_millis());
        Ok(product)
    }

    pub async fn get(&self, id: u64) -> Result<Product, ServiceError> {
        self.store.get(id).await.ok_or(ServiceError::NotFound(id))
    }

    /// Lists products; out-of-range `page` / `page_size` fall back to defaults
    pub async fn list(&self, page: i64, page_size: i64) -> ProductPage {
        let page = if page < 1 { 1 } else { page as usize };
        let page_size = if page_size < 1 || page_size > MAX_PAGE_SIZE as i64 {
            DEFAULT_PAGE_SIZE
        } else {
            page_size as usize
        };

        let total = self.store.count().await;
        let offset = (page - 1).saturating_mul(page_size);
        let data = self.store.list(offset, page_size).await;

        ProductPage {
            data,
            total,
            page,
            page_size,
            total_pages: (total + page_size as u64 - 1) / page_size as u64,
        }
    }

    /// Applies `changes` and optionally replaces the image.
    ///
    /// The image to delete is whatever the row held at the moment of the save,
    /// so overlapping updates never leave a replaced file behind.
    pub async fn update(
        &self,
        id: u64,
        changes: ProductUpdate,
        image: Option<ImageUpload>,
    ) -> Result<Product, ServiceError> {
        let started = Instant::now();
        self.get(id).await?;
        validate_changes(&changes)?;

        let new_image = match image {
            Some(upload) => Some(self.process_image(upload).await?),
            None => None,
        };

        let modified = self
            .store
            .modify(id, |product| {
                if let Some(name) = changes.name {
                    product.name = name;
                }
                if let Some(description) = changes.description {
                    product.description = description;
                }
                if let Some(price) = changes.price {
                    product.price = price;
                }
                if let Some(ref path) = new_image {
                    product.image_path = Some(path.clone());
                }
            })
            .await;

        let modified = match modified {
            Ok(Some(modified)) => modified,
            Ok(None) => {
                // Eliminato nel frattempo: la nuova immagine non ha più un proprietario
                if let Some(path) = new_image {
                    FileManager::remove_detached(path);
                }
                return Err(ServiceError::NotFound(id));
            }
            Err(e) => {
                if let Some(path) = new_image {
                    FileManager::remove_detached(path);
                }
                return Err(e.into());
            }
        };

        if new_image.is_some() {
            if let Some(old) = modified.previous.image_path {
                if modified.current.image_path.as_ref() != Some(&old) {
                    FileManager::remove_detached(old);
                }
            }
        }

        info!("Product {} updated in {}ms", id, started.elapsed().as_millis());
        Ok(modified.current)
    }

    pub async fn delete(&self, id: u64) -> Result<(), ServiceError> {
        let removed = self.store.remove(id).await?.ok_or(ServiceError::NotFound(id))?;

        if let Some(path) = removed.image_path {
            FileManager::remove_detached(path);
        }

        info!("Product {} deleted", id);
        Ok(())
    }

    /// Deletes image files in the upload directory that no product references.
    ///
    /// An upload still between optimization and insert looks orphaned too, so
    /// run this while no writes are in flight (e.g. at startup).
    pub async fn sweep_orphans(&self) -> Result<usize, ServiceError> {
        let referenced = self.store.image_paths().await;
        let orphans = FileManager::find_orphaned_images(&self.upload_dir, &referenced)?;

        let mut removed = 0;
        for path in orphans {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to remove orphaned image {}: {}", path.display(), e),
            }
        }

        if removed > 0 {
            info!("Removed {} orphaned images from {}", removed, self.upload_dir.display());
        }
        Ok(removed)
    }

    pub fn upload_stats(&self) -> UploadStats {
        self.orchestrator.stats()
    }

    async fn process_image(&self, upload: ImageUpload) -> Result<PathBuf, ServiceError> {
        let extension = PathResolver::extension_of(&upload.file_name);
        let destination = PathResolver::unique_image_path(&self.upload_dir, &upload.file_name);

        let raw = self.orchestrator.ingest(upload.reader, &extension).await?;
        let image = self.orchestrator.run_default(raw, &destination).await?;
        Ok(image.path)
    }
}

fn validate_fields(name: &str, price: f64) -> Result<(), ServiceError> {
    validate_name(name)?;
    validate_price(price)
}

/// Stored rows are always valid, so checking the supplied fields is enough
fn validate_changes(changes: &ProductUpdate) -> Result<(), ServiceError> {
    if let Some(ref name) = changes.name {
        validate_name(name)?;
    }
    if let Some(price) = changes.price {
        validate_price(price)?;
    }
    Ok(())
}

fn validate_name(name: &str) -> Result<(), ServiceError> {
    if name.trim().is_empty() {
        return Err(ServiceError::Validation("name is required".to_string()));
    }
    Ok(())
}

fn validate_price(price: f64) -> Result<(), ServiceError> {
    if !price.is_finite() || price < 0.0 {
        return Err(ServiceError::Validation(format!("invalid price: {}", price)));
    }
    Ok(())
}
