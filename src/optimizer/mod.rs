//! # Optimizer Module
//!
//! Orchestrazione delle ottimizzazioni degli upload, separata in sottomoduli:
//! - `upload_orchestrator`: Deadline, isolamento su blocking pool, ingestione
//! - `path_resolver`: Logica di calcolo path centralizzata

pub mod path_resolver;
pub mod upload_orchestrator;

pub use path_resolver::PathResolver;
pub use upload_orchestrator::{RawUpload, UploadOrchestrator};
