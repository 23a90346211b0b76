//! # Catalog Image Optimizer Library
//!
//! Pipeline di ottimizzazione immagini per un catalogo prodotti.
//!
//! ## Responsabilità:
//! - Ingestione degli upload in buffer riciclati da un pool iniettato
//! - Decodifica, ridimensionamento e ricodifica con deadline e cancellazione cooperativa
//! - Scrittura atomica dei file ottimizzati con nomi univoci
//! - CRUD prodotti con pulizia delle immagini sostituite o orfane
//!
//! ## Architettura dei moduli:
//! - `config`: Gestione configurazione e validazione parametri
//! - `error`: Tipi di errore della pipeline e del servizio
//! - `buffer_pool`: Pool di buffer condiviso tra i worker
//! - `image_processor`: Decode/resize/encode/write di una singola immagine
//! - `optimizer`: Orchestratore degli upload e calcolo dei path
//! - `stats`: Contatori aggregati degli upload
//! - `file_manager`: Operazioni sui file e ricerca orfani
//! - `store`: Persistenza delle righe prodotto
//! - `product_service`: Operazioni sul catalogo
//! - `telemetry`: Setup del logging
//!
//! ## Utilizzo:
//! ```rust,ignore
//! use catalog_image_optimizer::{Config, ProductService, ProductStore, SharedBufferPool};
//!
//! let config = Config::default();
//! let pool = Arc::new(SharedBufferPool::from_config(&config));
//! let service = ProductService::open(&config, ProductStore::in_memory(), pool).await?;
//! let product = service.create(new_product, Some(ImageUpload::from_bytes("lamp.jpg", bytes))).await?;
//! ```

pub mod buffer_pool;
pub mod config;
pub mod error;
pub mod file_manager;
pub mod image_processor;
pub mod optimizer;
pub mod product_service;
pub mod stats;
pub mod store;
pub mod telemetry;

pub use buffer_pool::{BufferPool, NoopBufferPool, PooledBuffer, SharedBufferPool};
pub use config::Config;
pub use error::{ErrorKind, OptimizeError, ServiceError};
pub use image_processor::{
    ImageOptimizer, ImageProcessor, OptimizationResult, OptimizedImage, OutputFormat, StopSignal,
};
pub use optimizer::{PathResolver, RawUpload, UploadOrchestrator};
pub use product_service::{ImageUpload, ProductPage, ProductService, ProductUpdate};
pub use stats::UploadStats;
pub use store::{NewProduct, Product, ProductStore};
