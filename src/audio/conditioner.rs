//! Per-sample signal conditioning
//!
//! Raw hardware samples pass through bit-depth reduction, an optional
//! high-pass biquad, gain, and clip-safe saturation into 16-bit signed
//! output, with peak/clip metering updated once per block.

use std::time::{Duration, Instant};

use biquad::{Biquad, Coefficients, DirectForm1, ToHertz, Type, Q_BUTTERWORTH_F32};

use crate::config::AudioConfig;
use crate::constants::PEAK_HOLD_MS;
use crate::error::AudioError;

/// Peak and clip metering, updated once per conditioned block.
#[derive(Debug, Default)]
pub struct MeteringState {
    /// Absolute peak of the most recent block
    pub last_peak: u16,
    /// Held peak, decaying to zero after the hold window
    pub peak_hold: u16,
    hold_deadline: Option<Instant>,
    /// Whether the most recent block clipped
    pub clipped_last_block: bool,
    /// Monotonic count of clipped blocks
    pub clip_count: u32,
}

impl MeteringState {
    fn update(&mut self, block_peak: u16, block_clipped: bool, now: Instant) {
        self.last_peak = block_peak;
        if block_clipped {
            self.clipped_last_block = true;
            self.clip_count += 1;
        } else {
            self.clipped_last_block = false;
        }

        if let Some(deadline) = self.hold_deadline {
            if now >= deadline {
                self.peak_hold = 0;
                self.hold_deadline = None;
            }
        }
        if block_peak > self.peak_hold {
            self.peak_hold = block_peak;
            self.hold_deadline = Some(now + Duration::from_millis(PEAK_HOLD_MS));
        }
    }

    /// Displayed peak: the held value while it lasts, else the last block.
    pub fn display_peak(&self) -> u16 {
        if self.peak_hold > 0 {
            self.peak_hold
        } else {
            self.last_peak
        }
    }

    pub fn peak_pct(&self) -> f32 {
        100.0 * self.display_peak() as f32 / 32767.0
    }

    pub fn peak_dbfs(&self) -> f32 {
        let peak = self.display_peak();
        if peak == 0 {
            -90.0
        } else {
            20.0 * (peak as f32 / 32767.0).log10()
        }
    }
}

/// Per-block conditioning pipeline. Owns the filter state and metering.
pub struct SignalConditioner {
    filter: Option<DirectForm1<f32>>,
    /// (sample_rate, cutoff_hz) the current coefficients were derived from
    designed_for: Option<(u32, u16)>,
    metering: MeteringState,
    out: Vec<i16>,
}

impl SignalConditioner {
    pub fn new() -> Self {
        Self {
            filter: None,
            designed_for: None,
            metering: MeteringState::default(),
            out: Vec::new(),
        }
    }

    pub fn metering(&self) -> &MeteringState {
        &self.metering
    }

    /// Drop filter state (not metering). Called on pipeline restart so a
    /// fresh stream never sees stale filter history.
    pub fn reset_filter(&mut self) {
        self.filter = None;
        self.designed_for = None;
    }

    /// Redesign coefficients only when the config they were derived from
    /// has changed.
    fn ensure_filter(&mut self, cfg: &AudioConfig) -> Result<(), AudioError> {
        let key = (cfg.sample_rate, cfg.highpass_cutoff_hz);
        if self.designed_for == Some(key) && self.filter.is_some() {
            return Ok(());
        }

        let coeffs = Coefficients::<f32>::from_params(
            Type::HighPass,
            (cfg.sample_rate as f32).hz(),
            cfg.effective_cutoff_hz().hz(),
            Q_BUTTERWORTH_F32,
        )
        .map_err(|e| AudioError::UnsupportedFormat(format!("high-pass design: {:?}", e)))?;

        self.filter = Some(DirectForm1::<f32>::new(coeffs));
        self.designed_for = Some(key);
        tracing::debug!(
            "High-pass redesigned: {} Hz at {} Hz sample rate",
            cfg.effective_cutoff_hz(),
            cfg.sample_rate
        );
        Ok(())
    }

    /// Condition one block of raw samples into 16-bit output.
    ///
    /// `apply_shift` is false for sources that emit native 16-bit samples.
    pub fn process_block(
        &mut self,
        raw: &[i32],
        cfg: &AudioConfig,
        apply_shift: bool,
        now: Instant,
    ) -> Result<&[i16], AudioError> {
        if cfg.highpass_enabled {
            self.ensure_filter(cfg)?;
        }

        self.out.clear();
        self.out
            .try_reserve(raw.len())
            .map_err(|_| AudioError::BufferAlloc(raw.len()))?;

        let shift = if apply_shift { cfg.bit_shift } else { 0 };
        let mut block_peak: u16 = 0;
        let mut block_clipped = false;

        for &sample in raw {
            let mut value = (sample >> shift) as f32;

            if cfg.highpass_enabled {
                if let Some(filter) = self.filter.as_mut() {
                    value = filter.run(value);
                }
            }

            value *= cfg.gain;

            let clipped = value > i16::MAX as f32 || value < i16::MIN as f32;
            block_clipped |= clipped;
            let out = value.clamp(i16::MIN as f32, i16::MAX as f32) as i16;

            block_peak = block_peak.max(out.unsigned_abs());
            self.out.push(out);
        }

        self.metering.update(block_peak, block_clipped, now);
        Ok(&self.out)
    }
}

impl Default for SignalConditioner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> AudioConfig {
        AudioConfig {
            highpass_enabled: false,
            gain: 1.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_passthrough_at_unity_gain() {
        let mut cond = SignalConditioner::new();
        let out = cond
            .process_block(&[0, 100, -100, 32767, -32768], &cfg(), false, Instant::now())
            .unwrap();
        assert_eq!(out, &[0, 100, -100, 32767, -32768]);
        assert!(!cond.metering().clipped_last_block);
    }

    #[test]
    fn test_bit_shift_reduces_depth() {
        let mut cond = SignalConditioner::new();
        let mut cfg = cfg();
        cfg.bit_shift = 8;

        // 24-bit-style raw values shifted down to 16-bit
        let out = cond
            .process_block(&[1 << 20, -(1 << 20)], &cfg, true, Instant::now())
            .unwrap();
        assert_eq!(out, &[1 << 12, -(1 << 12)]);

        // Shift ignored for native 16-bit sources
        let out = cond
            .process_block(&[1 << 12], &cfg, false, Instant::now())
            .unwrap();
        assert_eq!(out, &[1 << 12]);
    }

    #[test]
    fn test_clipping_saturates_and_counts_once_per_block() {
        let mut cond = SignalConditioner::new();
        let mut cfg = cfg();
        cfg.gain = 10.0;

        // Several samples exceed the representable range; the counter
        // moves once for the whole block.
        let out = cond
            .process_block(&[20000, -20000, 100, 30000], &cfg, false, Instant::now())
            .unwrap();
        assert_eq!(out[0], 32767);
        assert_eq!(out[1], -32768);
        assert_eq!(out[2], 1000);
        assert_eq!(out[3], 32767);
        assert!(cond.metering().clipped_last_block);
        assert_eq!(cond.metering().clip_count, 1);

        // A clean block clears the flag but not the counter
        cond.process_block(&[10], &cfg, false, Instant::now()).unwrap();
        assert!(!cond.metering().clipped_last_block);
        assert_eq!(cond.metering().clip_count, 1);
    }

    #[test]
    fn test_peak_hold_decays_after_window() {
        let mut cond = SignalConditioner::new();
        let t0 = Instant::now();

        cond.process_block(&[20000], &cfg(), false, t0).unwrap();
        assert_eq!(cond.metering().peak_hold, 20000);

        // Quieter block within the window keeps the held peak
        cond.process_block(&[100], &cfg(), false, t0 + Duration::from_secs(1))
            .unwrap();
        assert_eq!(cond.metering().peak_hold, 20000);
        assert_eq!(cond.metering().display_peak(), 20000);

        // Past the deadline the hold decays to zero
        cond.process_block(&[100], &cfg(), false, t0 + Duration::from_secs(4))
            .unwrap();
        assert_eq!(cond.metering().peak_hold, 100);
        assert_eq!(cond.metering().last_peak, 100);
    }

    #[test]
    fn test_highpass_attenuates_dc() {
        let mut cond = SignalConditioner::new();
        let mut cfg = cfg();
        cfg.highpass_enabled = true;
        cfg.highpass_cutoff_hz = 200;

        // A constant (DC) signal should decay toward zero through the
        // high-pass section.
        let dc = vec![10000i32; 4096];
        let out = cond
            .process_block(&dc, &cfg, false, Instant::now())
            .unwrap();
        let tail_avg: f32 =
            out[out.len() - 256..].iter().map(|&s| s as f32).sum::<f32>() / 256.0;
        assert!(tail_avg.abs() < 200.0, "DC not attenuated: {}", tail_avg);
    }

    #[test]
    fn test_coefficients_recomputed_only_on_divergence() {
        let mut cond = SignalConditioner::new();
        let mut cfg = cfg();
        cfg.highpass_enabled = true;

        cond.process_block(&[0; 8], &cfg, false, Instant::now()).unwrap();
        assert_eq!(cond.designed_for, Some((cfg.sample_rate, cfg.highpass_cutoff_hz)));

        cfg.highpass_cutoff_hz = 500;
        cond.process_block(&[0; 8], &cfg, false, Instant::now()).unwrap();
        assert_eq!(cond.designed_for, Some((cfg.sample_rate, 500)));
    }

    #[test]
    fn test_metering_dbfs() {
        let mut metering = MeteringState::default();
        metering.update(32767, false, Instant::now());
        assert!(metering.peak_dbfs().abs() < 0.01);
        assert!((metering.peak_pct() - 100.0).abs() < 0.01);

        let silent = MeteringState::default();
        assert_eq!(silent.peak_dbfs(), -90.0);
    }
}
