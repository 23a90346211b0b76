//! # Upload Orchestrator
//!
//! Esegue l'ottimizzazione di un upload fuori dal path della richiesta, con una
//! deadline rigida.
//!
//! ## Flusso:
//! 1. `ingest()` legge lo stream dell'upload in un buffer del pool (con limite di dimensione)
//! 2. `run()` lancia l'ottimizzazione su `spawn_blocking`
//! 3. Il `JoinHandle` viene messo in gara con `tokio::time::timeout`
//! 4. Se vince il worker, il risultato viene propagato invariato
//! 5. Se vince la deadline, ritorna subito `Timeout`, invia lo stop al worker e
//!    affida il `JoinHandle` a un task che cancella un eventuale file scritto in ritardo
//!
//! Ogni chiamata produce esattamente un risultato: quello di un worker abbandonato
//! non viene mai consegnato.

use crate::buffer_pool::{BufferPool, PooledBuffer};
use crate::config::Config;
use crate::error::OptimizeError;
use crate::image_processor::{ImageOptimizer, ImageProcessor, OptimizationResult, StopSignal};
use crate::stats::UploadStats;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, error, info, warn};

/// Fully-read upload waiting to be optimized
#[derive(Debug)]
pub struct RawUpload {
    data: PooledBuffer,
    extension: String,
}

impl RawUpload {
    /// Copies `bytes` into a pooled buffer
    pub fn from_bytes(pool: &Arc<dyn BufferPool>, bytes: &[u8], extension: &str) -> Self {
        let mut data = PooledBuffer::acquire(pool);
        data.extend_from_slice(bytes);
        Self {
            data,
            extension: extension.to_string(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }
}

/// Runs image optimizations with a bounded wait
pub struct UploadOrchestrator {
    optimizer: Arc<dyn ImageOptimizer>,
    pool: Arc<dyn BufferPool>,
    timeout: Duration,
    max_upload_bytes: usize,
    stats: Mutex<UploadStats>,
}

impl UploadOrchestrator {
    /// Orchestrator backed by an `ImageProcessor` built from `config`
    pub fn new(config: &Config, pool: Arc<dyn BufferPool>) -> Self {
        let processor = ImageProcessor::new(config, Arc::clone(&pool));
        Self::with_optimizer(config, Arc::new(processor), pool)
    }

    pub fn with_optimizer(
        config: &Config,
        optimizer: Arc<dyn ImageOptimizer>,
        pool: Arc<dyn BufferPool>,
    ) -> Self {
        Self {
            optimizer,
            pool,
            timeout: config.processing_timeout(),
            max_upload_bytes: config.max_upload_bytes,
            stats: Mutex::new(UploadStats::new()),
        }
    }

    pub fn pool(&self) -> &Arc<dyn BufferPool> {
        &self.pool
    }

    /// Reads `reader` to the end into a pooled buffer.
    ///
    /// Fails with `TooLarge` as soon as more than `max_upload_bytes` arrive;
    /// the partial data goes straight back to the pool.
    pub async fn ingest<R>(&self, reader: R, extension: &str) -> Result<RawUpload, OptimizeError>
    where
        R: AsyncRead + Unpin,
    {
        let limit = self.max_upload_bytes;
        let mut data = PooledBuffer::acquire(&self.pool);

        reader
            .take((limit as u64).saturating_add(1))
            .read_to_end(&mut data)
            .await
            .map_err(OptimizeError::Read)?;

        if data.len() > limit {
            warn!("Rejected upload larger than {} bytes", limit);
            return Err(OptimizeError::TooLarge { limit });
        }

        Ok(RawUpload {
            data,
            extension: extension.to_string(),
        })
    }

    /// Optimizes `upload` into `destination` using the configured deadline
    pub async fn run_default(&self, upload: RawUpload, destination: &Path) -> OptimizationResult {
        self.run(upload, destination, self.timeout).await
    }

    /// Optimizes `upload` into `destination`, waiting at most `timeout`.
    ///
    /// On timeout the worker is told to stop and detached. If it still writes
    /// its file, that file is deleted once the worker returns.
    pub async fn run(
        &self,
        upload: RawUpload,
        destination: &Path,
        timeout: Duration,
    ) -> OptimizationResult {
        let started = Instant::now();
        let input_size = upload.len() as u64;
        let (stop_sender, mut stop) = StopSignal::channel();

        let optimizer = Arc::clone(&self.optimizer);
        let dest = destination.to_path_buf();
        let mut worker = tokio::task::spawn_blocking(move || {
            let RawUpload { data, extension } = upload;
            optimizer.optimize(&data, &dest, &extension, &mut stop)
        });

        let result = match tokio::time::timeout(timeout, &mut worker).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => {
                error!("Image worker failed for {}: {}", destination.display(), join_error);
                Err(OptimizeError::Worker(join_error.to_string()))
            }
            Err(_) => {
                error!(
                    "Image processing timed out after {:?}: {}",
                    timeout,
                    destination.display()
                );
                let _ = stop_sender.send(());
                Self::reap_abandoned(worker);
                Err(OptimizeError::Timeout(timeout))
            }
        };

        match &result {
            Ok(image) => info!(
                path = %image.path.display(),
                width = image.width,
                height = image.height,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Image optimized"
            ),
            Err(e) => debug!(
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Image optimization failed: {}",
                e
            ),
        }

        self.lock_stats().record(input_size, &result);
        result
    }

    /// Snapshot of the outcomes recorded so far
    pub fn stats(&self) -> UploadStats {
        self.lock_stats().clone()
    }

    fn lock_stats(&self) -> std::sync::MutexGuard<'_, UploadStats> {
        self.stats.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Gestisce un worker abbandonato dopo il timeout
    fn reap_abandoned(worker: tokio::task::JoinHandle<OptimizationResult>) {
        tokio::spawn(async move {
            match worker.await {
                Ok(Ok(late)) => {
                    warn!(
                        "Abandoned image worker finished late, removing {}",
                        late.path.display()
                    );
                    if let Err(e) = tokio::fs::remove_file(&late.path).await {
                        warn!("Failed to remove late output {}: {}", late.path.display(), e);
                    }
                }
                Ok(Err(e)) => debug!("Abandoned image worker stopped: {}", e),
                Err(e) => warn!("Abandoned image worker failed: {}", e),
            }
        });
    }
}
