//! Goertzel tone analysis
//!
//! The detection band is covered by every DFT bin whose centre lies within
//! `target ± tolerance`. Each chunk is run through one Goertzel filter per bin
//! and the strongest bin wins. Power is normalized by `(N/2)²`, so a full-bin
//! sine of amplitude `A` (relative to full scale) scores about `A²`.

use std::f64::consts::PI;

use crate::config::PresenceConfig;

/// Result of analysing one chunk
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkAnalysis {
    /// Normalized power of the strongest in-band bin
    pub energy: f64,
    /// Centre frequency of that bin (Hz)
    pub frequency: f64,
    /// In-band power as a share of the chunk's total power (1.0 for a pure tone)
    pub tone_ratio: f64,
}

#[derive(Debug, Clone, Copy)]
struct Bin {
    frequency: f64,
    coefficient: f64,
}

/// Multi-bin Goertzel detector for a single frequency band
#[derive(Debug, Clone)]
pub struct ToneAnalyzer {
    bins: Vec<Bin>,
    chunk_size: usize,
    energy_threshold: f64,
    min_tone_ratio: f64,
}

impl ToneAnalyzer {
    pub fn new(config: &PresenceConfig) -> Self {
        let resolution = config.sample_rate as f64 / config.chunk_size as f64;
        let low = ((config.target_frequency - config.tolerance) / resolution).ceil() as usize;
        let high = ((config.target_frequency + config.tolerance) / resolution).floor() as usize;

        let mut bins: Vec<Bin> = (low..=high)
            .map(|k| Self::bin(k as f64 * resolution, config.sample_rate))
            .collect();

        // Band narrower than one bin: fall back to the target itself
        if bins.is_empty() {
            bins.push(Self::bin(config.target_frequency, config.sample_rate));
        }

        Self {
            bins,
            chunk_size: config.chunk_size,
            energy_threshold: config.energy_threshold,
            min_tone_ratio: config.min_tone_ratio,
        }
    }

    fn bin(frequency: f64, sample_rate: u32) -> Bin {
        let omega = 2.0 * PI * frequency / sample_rate as f64;
        Bin {
            frequency,
            coefficient: 2.0 * omega.cos(),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn bin_count(&self) -> usize {
        self.bins.len()
    }

    /// Analyse one chunk of signed 16-bit samples
    pub fn analyze(&self, samples: &[i16]) -> ChunkAnalysis {
        if samples.is_empty() {
            return ChunkAnalysis {
                energy: 0.0,
                frequency: self.bins[0].frequency,
                tone_ratio: 0.0,
            };
        }

        let normalized: Vec<f64> = samples
            .iter()
            .map(|&s| s as f64 / i16::MAX as f64)
            .collect();
        let n = normalized.len() as f64;
        let scale = (n / 2.0) * (n / 2.0);

        let mut best = ChunkAnalysis {
            energy: 0.0,
            frequency: self.bins[0].frequency,
            tone_ratio: 0.0,
        };
        for bin in &self.bins {
            let energy = goertzel_power(&normalized, bin.coefficient) / scale;
            if energy > best.energy {
                best.energy = energy;
                best.frequency = bin.frequency;
            }
        }

        let mean_square = normalized.iter().map(|x| x * x).sum::<f64>() / n;
        if mean_square > 0.0 {
            best.tone_ratio = best.energy / (2.0 * mean_square);
        }
        best
    }

    /// Whether an analysed chunk counts as a tone hit
    pub fn is_hit(&self, analysis: &ChunkAnalysis) -> bool {
        analysis.energy >= self.energy_threshold && analysis.tone_ratio >= self.min_tone_ratio
    }
}

/// Squared magnitude of one DFT bin via the Goertzel recurrence
pub fn goertzel_power(samples: &[f64], coefficient: f64) -> f64 {
    let (mut s1, mut s2) = (0.0f64, 0.0f64);
    for &x in samples {
        let s0 = x + coefficient * s1 - s2;
        s2 = s1;
        s1 = s0;
    }
    s1 * s1 + s2 * s2 - coefficient * s1 * s2
}

/// Consecutive-hit counter
#[derive(Debug, Clone)]
pub struct Debounce {
    required: u32,
    consecutive: u32,
}

impl Debounce {
    pub fn new(required: u32) -> Self {
        Self {
            required: required.max(1),
            consecutive: 0,
        }
    }

    /// Feed one chunk result; returns the current run length
    pub fn observe(&mut self, hit: bool) -> u32 {
        self.consecutive = if hit { self.consecutive + 1 } else { 0 };
        self.consecutive
    }

    pub fn satisfied(&self) -> bool {
        self.consecutive >= self.required
    }

    pub fn reset(&mut self) {
        self.consecutive = 0;
    }
}
