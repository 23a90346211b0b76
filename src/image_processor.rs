//! # Image Processing Module
//!
//! Questo modulo trasforma i byte grezzi di un upload in un'immagine ridimensionata e
//! ricodificata su disco, interamente in memoria con il crate `image`.
//!
//! ## Pipeline di Ottimizzazione
//!
//! 1. **Decode**: Formato rilevato automaticamente dai magic bytes (JPEG, PNG, WebP)
//! 2. **Resize**: Fit dentro `max_width x max_height` preservando l'aspect ratio,
//!    mai upscaling. Filtro `Triangle`: è il filtro più economico del crate che
//!    media i pixel sorgente come un box filter; `Nearest` costa meno ma produce
//!    aliasing sulle riduzioni forti. Si privilegia la velocità sulla fedeltà
//! 3. **Encode**: In base all'estensione richiesta (case-insensitive)
//! 4. **Scrittura atomica**: File temporaneo nella stessa directory, poi rename
//!
//! ## Formati di Output
//!
//! | Estensione        | Output | Parametri                          |
//! |-------------------|--------|------------------------------------|
//! | `.jpg` / `.jpeg`  | JPEG   | qualità fissa (default: 80)        |
//! | `.png`            | PNG    | compressione default, filtro adaptive |
//! | altre / vuota     | JPEG   | fallback, il path non viene rinominato |
//!
//! ## Cancellazione
//!
//! Lo `StopSignal` viene controllato prima del decode, dopo il decode, dopo il resize e
//! dopo l'encode. Le singole chiamate al codec non sono interrompibili: un decode lungo
//! termina comunque prima che lo stop venga osservato.
//!
//! ## Garanzie sul filesystem
//!
//! - Un successo corrisponde sempre a un file completo in `destination`
//! - Un errore non lascia mai un file in `destination` (il temporaneo viene rimosso)

use crate::buffer_pool::{BufferPool, PooledBuffer};
use crate::config::Config;
use crate::error::OptimizeError;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::imageops::FilterType;
use image::{ColorType, DynamicImage, GenericImageView, ImageEncoder};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Outcome of a single optimization
pub type OptimizationResult = Result<OptimizedImage, OptimizeError>;

/// Encoded format written to disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputFormat {
    Jpeg,
    Png,
}

impl OutputFormat {
    /// Picks the output format for a declared extension.
    ///
    /// Accepts the extension with or without its leading dot. Unrecognized or
    /// empty extensions fall back to JPEG.
    pub fn from_extension(extension: &str) -> Self {
        match Self::recognize(extension) {
            Some(format) => format,
            None => {
                debug!(extension, "Unrecognized extension, encoding as JPEG");
                OutputFormat::Jpeg
            }
        }
    }

    fn recognize(extension: &str) -> Option<Self> {
        let ext = extension.trim_start_matches('.').to_lowercase();
        match ext.as_str() {
            "jpg" | "jpeg" => Some(OutputFormat::Jpeg),
            "png" => Some(OutputFormat::Png),
            _ => None,
        }
    }
}

/// Image written by a successful optimization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimizedImage {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub format: OutputFormat,
    pub size_bytes: u64,
}

/// Cooperative stop flag observed between pipeline stages.
///
/// Wraps the receiving side of a broadcast channel; a message or a lagged
/// receiver means stop, a closed channel means keep going.
#[derive(Debug, Default)]
pub struct StopSignal {
    receiver: Option<broadcast::Receiver<()>>,
}

impl StopSignal {
    /// Signal that never fires
    pub fn never() -> Self {
        Self { receiver: None }
    }

    pub fn new(receiver: broadcast::Receiver<()>) -> Self {
        Self {
            receiver: Some(receiver),
        }
    }

    /// Creates a connected sender / signal pair
    pub fn channel() -> (broadcast::Sender<()>, Self) {
        let (sender, receiver) = broadcast::channel(1);
        (sender, Self::new(receiver))
    }

    /// Checks if a stop signal has been received.
    pub fn should_stop(&mut self) -> bool {
        if let Some(ref mut receiver) = self.receiver {
            match receiver.try_recv() {
                Ok(_) => {
                    debug!("Stop signal received, cancelling image processing");
                    return true;
                }
                Err(broadcast::error::TryRecvError::Empty) => return false,
                Err(broadcast::error::TryRecvError::Lagged(_)) => {
                    debug!("Stop signal was lagged, cancelling image processing");
                    return true;
                }
                // Sender was dropped, continue processing
                Err(broadcast::error::TryRecvError::Closed) => return false,
            }
        }
        false
    }

    fn checkpoint(&mut self) -> Result<(), OptimizeError> {
        if self.should_stop() {
            Err(OptimizeError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Anything able to turn raw upload bytes into an optimized file.
///
/// Implementations are synchronous and CPU bound; the upload orchestrator runs
/// them on the blocking pool.
pub trait ImageOptimizer: Send + Sync + 'static {
    fn optimize(
        &self,
        raw: &[u8],
        destination: &Path,
        extension: &str,
        stop: &mut StopSignal,
    ) -> OptimizationResult;
}

/// # Image Processor
///
/// Decodes, resizes and re-encodes uploads with fixed, process-wide limits.
///
/// ## Features
/// - Format auto-detection on decode
/// - Aspect-preserving fit, never upscaling
/// - JPEG at a fixed quality, PNG at default compression, JPEG fallback
/// - Encoding into pooled buffers
/// - Atomic write: temp file in the destination directory, then rename
/// - **Cancellation support**: stop signal checked between stages
pub struct ImageProcessor {
    max_width: u32,
    max_height: u32,
    jpeg_quality: u8,
    pool: Arc<dyn BufferPool>,
}

impl ImageProcessor {
    /// Creates a processor using the limits from `config`.
    ///
    /// # Arguments
    /// * `config` - Source of `max_width`, `max_height` and `jpeg_quality`
    /// * `pool` - Buffer pool used for encoded output
    pub fn new(config: &Config, pool: Arc<dyn BufferPool>) -> Self {
        Self {
            max_width: config.max_width,
            max_height: config.max_height,
            jpeg_quality: config.jpeg_quality,
            pool,
        }
    }

    fn resize(&self, img: DynamicImage) -> DynamicImage {
        let (width, height) = img.dimensions();
        let (target_width, target_height) =
            fit_dimensions(width, height, self.max_width, self.max_height);

        if (target_width, target_height) == (width, height) {
            return img;
        }

        debug!(
            "Resizing {}x{} -> {}x{}",
            width, height, target_width, target_height
        );
        img.resize_exact(target_width, target_height, FilterType::Triangle)
    }

    fn encode(
        &self,
        img: &DynamicImage,
        format: OutputFormat,
        out: &mut Vec<u8>,
    ) -> Result<(), OptimizeError> {
        let (width, height) = img.dimensions();

        match format {
            OutputFormat::Jpeg => {
                // JPEG non supporta alpha: appiattisce a RGB
                let rgb = img.to_rgb8();
                JpegEncoder::new_with_quality(out, self.jpeg_quality)
                    .write_image(rgb.as_raw(), width, height, ColorType::Rgb8)
                    .map_err(OptimizeError::Encode)
            }
            OutputFormat::Png => {
                let encoder =
                    PngEncoder::new_with_quality(out, CompressionType::Default, PngFilter::Adaptive);
                match img.color() {
                    ColorType::L8 | ColorType::La8 | ColorType::Rgb8 | ColorType::Rgba8 => encoder
                        .write_image(img.as_bytes(), width, height, img.color())
                        .map_err(OptimizeError::Encode),
                    color if color.has_alpha() => {
                        let rgba = img.to_rgba8();
                        encoder
                            .write_image(rgba.as_raw(), width, height, ColorType::Rgba8)
                            .map_err(OptimizeError::Encode)
                    }
                    _ => {
                        let rgb = img.to_rgb8();
                        encoder
                            .write_image(rgb.as_raw(), width, height, ColorType::Rgb8)
                            .map_err(OptimizeError::Encode)
                    }
                }
            }
        }
    }
}

impl ImageOptimizer for ImageProcessor {
    /// Optimizes one upload into `destination`.
    ///
    /// # Errors
    /// - `Decode` if the bytes are not a recognizable image
    /// - `Encode` if the codec rejects the resized image
    /// - `Write` if the destination cannot be created, written or renamed onto
    /// - `Cancelled` if `stop` fired between stages
    fn optimize(
        &self,
        raw: &[u8],
        destination: &Path,
        extension: &str,
        stop: &mut StopSignal,
    ) -> OptimizationResult {
        stop.checkpoint()?;

        let img = image::load_from_memory(raw).map_err(OptimizeError::Decode)?;
        stop.checkpoint()?;

        let img = self.resize(img);
        stop.checkpoint()?;

        let format = OutputFormat::from_extension(extension);
        let mut encoded = PooledBuffer::acquire(&self.pool);
        self.encode(&img, format, &mut encoded)?;
        stop.checkpoint()?;

        write_atomically(destination, &encoded)?;

        let (width, height) = img.dimensions();
        debug!(
            path = %destination.display(),
            width,
            height,
            bytes = encoded.len(),
            "Optimized image written"
        );

        Ok(OptimizedImage {
            path: destination.to_path_buf(),
            width,
            height,
            format,
            size_bytes: encoded.len() as u64,
        })
    }
}

/// Computes the largest size fitting inside `max_width x max_height` with the
/// same aspect ratio. Sizes already inside the bounds are returned unchanged.
/// Zero bounds are treated as 1.
pub fn fit_dimensions(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    // Un limite a 0 non ha senso (validate lo rifiuta): vale come 1 pixel
    let (max_width, max_height) = (max_width.max(1), max_height.max(1));

    if width <= max_width && height <= max_height {
        return (width, height);
    }

    let (w, h) = (u64::from(width), u64::from(height));
    let (max_w, max_h) = (u64::from(max_width), u64::from(max_height));

    // Confronta max_w/w con max_h/h senza divisioni in virgola mobile
    if max_w * h <= max_h * w {
        let scaled = ((h * max_w + w / 2) / w).clamp(1, max_h);
        (max_width, scaled as u32)
    } else {
        let scaled = ((w * max_h + h / 2) / h).clamp(1, max_w);
        (scaled as u32, max_height)
    }
}

fn write_atomically(destination: &Path, bytes: &[u8]) -> Result<(), OptimizeError> {
    let dir = match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut temp = tempfile::NamedTempFile::new_in(dir)
        .map_err(|e| OptimizeError::write(destination, e))?;
    temp.write_all(bytes)
        .and_then(|_| temp.as_file().sync_all())
        .map_err(|e| OptimizeError::write(destination, e))?;

    temp.persist(destination).map_err(|e| {
        warn!("Failed to persist {}: {}", destination.display(), e.error);
        OptimizeError::write(destination, e.error)
    })?;

    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::buffer_pool::{NoopBufferPool, SharedBufferPool};
    use image::{ImageOutputFormat, Rgb, RgbImage, Rgba, RgbaImage};
    use std::io::Cursor;
    use tempfile::TempDir;

    /// Solid-color test image encoded in memory
    pub(crate) fn encoded_image(width: u32, height: u32, color: [u8; 3], png: bool) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb(color)));
        let mut bytes = Vec::new();
        let format = if png {
            ImageOutputFormat::Png
        } else {
            ImageOutputFormat::Jpeg(95)
        };
        img.write_to(&mut Cursor::new(&mut bytes), format).unwrap();
        bytes
    }

    pub(crate) fn processor() -> ImageProcessor {
        ImageProcessor::new(&Config::default(), Arc::new(SharedBufferPool::new(4, 1024)))
    }

    fn optimize(processor: &ImageProcessor, raw: &[u8], dest: &Path, ext: &str) -> OptimizationResult {
        processor.optimize(raw, dest, ext, &mut StopSignal::never())
    }

    #[test]
    fn test_fit_dimensions() {
        assert_eq!(fit_dimensions(400, 300, 800, 800), (400, 300));
        assert_eq!(fit_dimensions(800, 800, 800, 800), (800, 800));
        assert_eq!(fit_dimensions(1600, 1200, 800, 800), (800, 600));
        assert_eq!(fit_dimensions(1200, 1600, 800, 800), (600, 800));
        assert_eq!(fit_dimensions(1000, 333, 800, 800), (800, 266));
        assert_eq!(fit_dimensions(10_000, 1, 800, 800), (800, 1));
        assert_eq!(fit_dimensions(900, 500, 800, 600), (800, 444));
    }

    #[test]
    fn test_fit_dimensions_zero_bounds() {
        assert_eq!(fit_dimensions(100, 50, 0, 0), (1, 1));
        assert_eq!(fit_dimensions(100, 50, 0, 800), (1, 1));
        assert_eq!(fit_dimensions(100, 50, 40, 0), (2, 1));
    }

    #[test]
    fn test_unvalidated_zero_limits_do_not_panic() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("tiny.png");
        let config = Config {
            max_width: 0,
            max_height: 0,
            ..Default::default()
        };
        let processor = ImageProcessor::new(&config, Arc::new(NoopBufferPool));

        let result = optimize(&processor, &encoded_image(30, 20, [7, 7, 7], true), &dest, ".png").unwrap();
        assert_eq!((result.width, result.height), (1, 1));
    }

    #[test]
    fn test_output_format_from_extension() {
        assert_eq!(OutputFormat::from_extension(".jpg"), OutputFormat::Jpeg);
        assert_eq!(OutputFormat::from_extension(".JPEG"), OutputFormat::Jpeg);
        assert_eq!(OutputFormat::from_extension(".PnG"), OutputFormat::Png);
        assert_eq!(OutputFormat::from_extension("png"), OutputFormat::Png);
        assert_eq!(OutputFormat::from_extension(".bmp"), OutputFormat::Jpeg);
        assert_eq!(OutputFormat::from_extension(""), OutputFormat::Jpeg);
    }

    #[test]
    fn test_large_jpeg_is_downscaled() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("large.jpg");
        let raw = encoded_image(1600, 1000, [200, 30, 30], false);

        let result = optimize(&processor(), &raw, &dest, ".jpg").unwrap();
        assert_eq!((result.width, result.height), (800, 500));
        assert_eq!(result.path, dest);

        let written = std::fs::read(&dest).unwrap();
        assert_eq!(result.size_bytes, written.len() as u64);
        let decoded = image::load_from_memory(&written).unwrap();
        assert_eq!(decoded.dimensions(), (800, 500));
    }

    #[test]
    fn test_small_png_is_not_upscaled() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("small.png");
        let raw = encoded_image(120, 80, [10, 200, 10], true);

        let result = optimize(&processor(), &raw, &dest, ".png").unwrap();
        assert_eq!((result.width, result.height), (120, 80));
        assert_eq!(result.format, OutputFormat::Png);

        let written = std::fs::read(&dest).unwrap();
        assert_eq!(&written[..8], b"\x89PNG\r\n\x1a\n");
        let decoded = image::load_from_memory(&written).unwrap();
        assert_eq!(decoded.to_rgb8().get_pixel(60, 40), &Rgb([10, 200, 10]));
    }

    #[test]
    fn test_tall_png_keeps_aspect_ratio() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("tall.png");
        let raw = encoded_image(500, 2000, [0, 0, 255], true);

        let result = optimize(&processor(), &raw, &dest, ".png").unwrap();
        assert_eq!((result.width, result.height), (200, 800));
    }

    #[test]
    fn test_png_with_alpha_encoded_as_jpeg() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("alpha.jpeg");
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(50, 50, Rgba([255, 0, 0, 128])));
        let mut raw = Vec::new();
        img.write_to(&mut Cursor::new(&mut raw), ImageOutputFormat::Png).unwrap();

        let result = optimize(&processor(), &raw, &dest, ".JPEG").unwrap();
        assert_eq!(result.format, OutputFormat::Jpeg);
        assert_eq!(&std::fs::read(&dest).unwrap()[..3], &[0xFF, 0xD8, 0xFF]);
    }

    #[test]
    fn test_unrecognized_extension_falls_back_to_jpeg() {
        let temp_dir = TempDir::new().unwrap();
        let raw = encoded_image(64, 64, [1, 2, 3], true);

        for ext in [".bmp", ""] {
            let dest = temp_dir.path().join(format!("fallback{}", ext));
            let result = optimize(&processor(), &raw, &dest, ext).unwrap();
            assert_eq!(result.format, OutputFormat::Jpeg);

            let written = std::fs::read(&dest).unwrap();
            assert_eq!(&written[..3], &[0xFF, 0xD8, 0xFF]);
        }
    }

    #[test]
    fn test_malformed_input_is_decode_error_and_writes_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("broken.jpg");

        let result = optimize(&processor(), b"definitely not an image", &dest, ".jpg");
        assert!(matches!(result, Err(OptimizeError::Decode(_))));
        assert!(!dest.exists());

        let mut truncated = encoded_image(300, 300, [9, 9, 9], true);
        truncated.truncate(truncated.len() / 2);
        let result = optimize(&processor(), &truncated, &dest, ".jpg");
        assert!(matches!(result, Err(OptimizeError::Decode(_))));
        assert!(!dest.exists());
        assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_missing_directory_is_write_error() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("missing").join("out.jpg");
        let raw = encoded_image(10, 10, [0, 0, 0], false);

        let result = optimize(&processor(), &raw, &dest, ".jpg");
        assert!(matches!(result, Err(OptimizeError::Write { .. })));
        assert!(!dest.exists());
    }

    #[test]
    fn test_existing_destination_is_replaced() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("replace.png");
        std::fs::write(&dest, b"old contents that are much longer than nothing").unwrap();

        let raw = encoded_image(20, 20, [5, 5, 5], true);
        optimize(&processor(), &raw, &dest, ".png").unwrap();
        assert!(image::load_from_memory(&std::fs::read(&dest).unwrap()).is_ok());
    }

    #[test]
    fn test_stop_signal_cancels_before_writing() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("stopped.jpg");
        let raw = encoded_image(100, 100, [0, 0, 0], false);

        let (sender, mut stop) = StopSignal::channel();
        sender.send(()).unwrap();

        let result = processor().optimize(&raw, &dest, ".jpg", &mut stop);
        assert!(matches!(result, Err(OptimizeError::Cancelled)));
        assert!(!dest.exists());
    }

    #[test]
    fn test_closed_stop_channel_keeps_working() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("closed.jpg");
        let raw = encoded_image(100, 100, [0, 0, 0], false);

        let (sender, mut stop) = StopSignal::channel();
        drop(sender);

        assert!(processor().optimize(&raw, &dest, ".jpg", &mut stop).is_ok());
    }

    #[test]
    fn test_noop_pool_produces_identical_output() {
        let temp_dir = TempDir::new().unwrap();
        let raw = encoded_image(1024, 768, [120, 60, 30], false);

        let pooled = processor();
        let unpooled = ImageProcessor::new(&Config::default(), Arc::new(NoopBufferPool));

        // Due giri col pool condiviso per forzare il riuso di un buffer sporco
        let warmup = temp_dir.path().join("warmup.png");
        optimize(&pooled, &encoded_image(700, 700, [1, 1, 1], true), &warmup, ".png").unwrap();

        let a = temp_dir.path().join("pooled.jpg");
        let b = temp_dir.path().join("unpooled.jpg");
        optimize(&pooled, &raw, &a, ".jpg").unwrap();
        optimize(&unpooled, &raw, &b, ".jpg").unwrap();

        assert_eq!(std::fs::read(&a).unwrap(), std::fs::read(&b).unwrap());
    }
}
