//! # Upload Statistics Module
//!
//! Contatori cumulativi degli esiti della pipeline immagini.
//!
//! ## Statistiche tracciate:
//! - **uploads_processed**: Totale ottimizzazioni tentate
//! - **uploads_optimized**: Ottimizzazioni riuscite
//! - **uploads_rejected**: Input non decodificabili o troppo grandi
//! - **timeouts**: Deadline scadute
//! - **errors**: Altri fallimenti (encode, scrittura, worker)
//! - **total_input_size** / **total_output_size**: Byte in ingresso e scritti su disco
//!
//! Il report finale usa `FileManager::format_size` per i byte leggibili.

use crate::error::{ErrorKind, OptimizeError};
use crate::file_manager::FileManager;
use crate::image_processor::OptimizationResult;
use serde::Serialize;

/// Statistics tracker for upload optimization results
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct UploadStats {
    pub uploads_processed: usize,
    pub uploads_optimized: usize,
    pub uploads_rejected: usize,
    pub timeouts: usize,
    pub errors: usize,
    pub total_input_size: u64,
    pub total_output_size: u64,
}

impl UploadStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_optimized(&mut self, input_size: u64, output_size: u64) {
        self.uploads_processed += 1;
        self.uploads_optimized += 1;
        self.total_input_size += input_size;
        self.total_output_size += output_size;
    }

    pub fn add_failure(&mut self, error: &OptimizeError) {
        self.uploads_processed += 1;
        match error.kind() {
            ErrorKind::Unprocessable => self.uploads_rejected += 1,
            ErrorKind::Timeout => self.timeouts += 1,
            ErrorKind::ProcessingFailed => self.errors += 1,
        }
    }

    /// Records the outcome of one orchestrated run
    pub fn record(&mut self, input_size: u64, result: &OptimizationResult) {
        match result {
            Ok(image) => self.add_optimized(input_size, image.size_bytes),
            Err(e) => self.add_failure(e),
        }
    }

    /// Bytes saved by optimized uploads, relative to their input size
    pub fn overall_reduction_percent(&self) -> f64 {
        if self.total_input_size > 0 {
            let saved = self.total_input_size.saturating_sub(self.total_output_size);
            (saved as f64 / self.total_input_size as f64) * 100.0
        } else {
            0.0
        }
    }

    pub fn format_summary(&self) -> String {
        format!(
            "Processed: {} uploads | Optimized: {} | Rejected: {} | Timeouts: {} | Errors: {} | Written: {} ({:.2}% saved)",
            self.uploads_processed,
            self.uploads_optimized,
            self.uploads_rejected,
            self.timeouts,
            self.errors,
            FileManager::format_size(self.total_output_size),
            self.overall_reduction_percent()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_stats_accumulate() {
        let mut stats = UploadStats::new();
        stats.add_optimized(1000, 250);
        stats.add_optimized(1000, 750);
        stats.add_failure(&OptimizeError::Timeout(Duration::from_secs(1)));
        stats.add_failure(&OptimizeError::TooLarge { limit: 10 });
        stats.add_failure(&OptimizeError::Cancelled);

        assert_eq!(stats.uploads_processed, 5);
        assert_eq!(stats.uploads_optimized, 2);
        assert_eq!(stats.timeouts, 1);
        assert_eq!(stats.uploads_rejected, 1);
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.overall_reduction_percent(), 50.0);
        assert!(stats.format_summary().contains("Timeouts: 1"));
    }

    #[test]
    fn test_reduction_without_input() {
        assert_eq!(UploadStats::new().overall_reduction_percent(), 0.0);
    }
}
