//! Instantaneous audio level metering
//!
//! Computes RMS energy per captured block for UI visualization. The latest
//! value is published through an atomic cell so an unrelated observer can
//! read it without synchronizing with the session.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

/// Calculate RMS energy of audio samples
///
/// Returns a value in roughly [0, 1] for samples in [-1.0, 1.0].
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn rms_level(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Latest-value audio level cell
///
/// Written by the session on every captured block, readable from any
/// thread. Stores the f32 as its bit pattern in an `AtomicU32`.
#[derive(Debug, Clone, Default)]
pub struct LevelCell {
    bits: Arc<AtomicU32>,
}

impl LevelCell {
    /// Create a new cell holding 0.0
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a new level value
    pub fn set(&self, level: f32) {
        self.bits.store(level.to_bits(), Ordering::Relaxed);
    }

    /// Read the most recently published level
    #[must_use]
    pub fn get(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }

    /// Reset to silence
    pub fn reset(&self) {
        self.set(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silence_is_zero() {
        let silence = vec![0.0f32; 256];
        assert!(rms_level(&silence) < f32::EPSILON);
        assert!(rms_level(&[]) < f32::EPSILON);
    }

    #[test]
    fn test_constant_signal_level() {
        let signal = vec![0.5f32; 256];
        let level = rms_level(&signal);
        assert!((level - 0.5).abs() < 0.001);
    }

    #[test]
    fn test_sine_wave_level() {
        // RMS of a full-scale sine is 1/sqrt(2)
        let signal: Vec<f32> = (0..16000)
            .map(|i| (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 16000.0).sin())
            .collect();
        let level = rms_level(&signal);
        assert!((level - std::f32::consts::FRAC_1_SQRT_2).abs() < 0.01);
    }

    #[test]
    fn test_cell_roundtrip() {
        let cell = LevelCell::new();
        assert!(cell.get() < f32::EPSILON);

        cell.set(0.42);
        assert!((cell.get() - 0.42).abs() < f32::EPSILON);

        cell.reset();
        assert!(cell.get() < f32::EPSILON);
    }
}
