//! Runtime configuration types
//!
//! Every parameter the firmware exposes lives in one of the structs below,
//! grouped the way the dashboard presents them. All mutation goes through
//! [`crate::store::ConfigStore`] setters; the types here only carry the
//! values, their named defaults, and the range rules.

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_BUFFER_SIZE, DEFAULT_SAMPLE_RATE};
use crate::error::ConfigError;

/// Capture block sizes the hardware interface supports, in samples.
pub const BUFFER_SIZES: [u16; 6] = [256, 512, 1024, 2048, 4096, 8192];

/// Supported CPU clock frequencies in MHz.
pub const CPU_FREQS_MHZ: [u16; 3] = [80, 120, 160];

/// Thermal shutdown limit bounds and quantization step, in °C.
pub const SHUTDOWN_LIMIT_MIN_C: f32 = 30.0;
pub const SHUTDOWN_LIMIT_MAX_C: f32 = 95.0;
pub const SHUTDOWN_LIMIT_STEP_C: f32 = 5.0;

/// Root of everything the device persists.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub audio: AudioConfig,
    pub reliability: ReliabilityConfig,
    pub thermal: ThermalConfig,
    pub power: PowerConfig,
    /// Whether the RTSP listener accepts clients. Forced off by a
    /// persisted thermal latch.
    pub serving_enabled: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            audio: AudioConfig::default(),
            reliability: ReliabilityConfig::default(),
            thermal: ThermalConfig::default(),
            power: PowerConfig::default(),
            serving_enabled: true,
        }
    }
}

/// Audio capture and conditioning parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    /// Sample rate in Hz (8000-96000)
    pub sample_rate: u32,
    /// Linear gain applied after filtering (0.1-100.0)
    pub gain: f32,
    /// Capture block size in samples, one of [`BUFFER_SIZES`]
    pub buffer_size: u16,
    /// Right-shift applied to raw samples (0-24); ignored for sources
    /// that emit native 16-bit samples
    pub bit_shift: u8,
    /// High-pass filter on/off
    pub highpass_enabled: bool,
    /// High-pass cutoff in Hz (10-10000, clamped below 0.45×sample_rate)
    pub highpass_cutoff_hz: u16,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            gain: 1.0,
            buffer_size: DEFAULT_BUFFER_SIZE,
            bit_shift: 0,
            highpass_enabled: false,
            highpass_cutoff_hz: 120,
        }
    }
}

impl AudioConfig {
    /// Cutoff actually fed to the filter design: configured value clamped
    /// to [10 Hz, 0.45×sample_rate].
    pub fn effective_cutoff_hz(&self) -> f32 {
        let nyquist_guard = 0.45 * self.sample_rate as f32;
        (self.highpass_cutoff_hz as f32).clamp(10.0, nyquist_guard)
    }

    /// Block duration at the current rate, in milliseconds.
    pub fn latency_ms(&self) -> f32 {
        self.buffer_size as f32 / self.sample_rate as f32 * 1000.0
    }

    /// Human-readable name for the current buffer size trade-off.
    pub fn profile_name(&self) -> &'static str {
        match self.buffer_size {
            0..=256 => "Ultra-Low Latency",
            257..=512 => "Balanced",
            513..=1024 => "Stable Streaming",
            _ => "High Stability",
        }
    }

    pub fn validate_sample_rate(rate: u32) -> Result<u32, ConfigError> {
        if (8000..=96000).contains(&rate) {
            Ok(rate)
        } else {
            Err(ConfigError::out_of_range("sample_rate", rate))
        }
    }

    pub fn validate_gain(gain: f32) -> Result<f32, ConfigError> {
        if gain.is_finite() && (0.1..=100.0).contains(&gain) {
            Ok(gain)
        } else {
            Err(ConfigError::out_of_range("gain", gain))
        }
    }

    pub fn validate_buffer_size(size: u16) -> Result<u16, ConfigError> {
        if BUFFER_SIZES.contains(&size) {
            Ok(size)
        } else {
            Err(ConfigError::out_of_range("buffer_size", size))
        }
    }

    pub fn validate_bit_shift(shift: u8) -> Result<u8, ConfigError> {
        if shift <= 24 {
            Ok(shift)
        } else {
            Err(ConfigError::out_of_range("bit_shift", shift))
        }
    }

    pub fn validate_cutoff(cutoff: u16) -> Result<u16, ConfigError> {
        if (10..=10000).contains(&cutoff) {
            Ok(cutoff)
        } else {
            Err(ConfigError::out_of_range("highpass_cutoff_hz", cutoff))
        }
    }
}

/// Throughput supervision parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReliabilityConfig {
    /// Packet rate below which the stream counts as degraded (pkt/s)
    pub min_acceptable_rate: u32,
    /// When set, `min_acceptable_rate` is derived from the audio config
    /// and manual writes to it are ignored
    pub auto_threshold_enabled: bool,
    /// Minutes between throughput checks (1-60)
    pub check_interval_min: u32,
    /// Restart the capture pipeline automatically on degradation
    pub auto_recovery_enabled: bool,
    /// Reboot the whole device on a fixed schedule
    pub scheduled_reset_enabled: bool,
    /// Hours of uptime before a scheduled reboot (1-168)
    pub reset_interval_hours: u32,
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        Self {
            min_acceptable_rate: recommended_min_rate(
                DEFAULT_SAMPLE_RATE,
                DEFAULT_BUFFER_SIZE,
            ),
            auto_threshold_enabled: true,
            check_interval_min: 5,
            auto_recovery_enabled: true,
            scheduled_reset_enabled: false,
            reset_interval_hours: 24,
        }
    }
}

impl ReliabilityConfig {
    pub fn validate_min_rate(rate: u32) -> Result<u32, ConfigError> {
        if (5..=200).contains(&rate) {
            Ok(rate)
        } else {
            Err(ConfigError::out_of_range("min_acceptable_rate", rate))
        }
    }

    pub fn validate_check_interval(minutes: u32) -> Result<u32, ConfigError> {
        if (1..=60).contains(&minutes) {
            Ok(minutes)
        } else {
            Err(ConfigError::out_of_range("check_interval_min", minutes))
        }
    }

    pub fn validate_reset_hours(hours: u32) -> Result<u32, ConfigError> {
        if (1..=168).contains(&hours) {
            Ok(hours)
        } else {
            Err(ConfigError::out_of_range("reset_interval_hours", hours))
        }
    }
}

/// 70% of the nominal block emission rate, floored at 5 pkt/s.
pub fn recommended_min_rate(sample_rate: u32, buffer_size: u16) -> u32 {
    let nominal = sample_rate as f64 / buffer_size as f64;
    (0.7 * nominal).round().max(5.0) as u32
}

/// Thermal protection parameters and the persisted latch.
///
/// The transient (re-armable) lockout lives in the guard itself; only the
/// sticky state that must survive a power cycle is stored here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ThermalConfig {
    pub protection_enabled: bool,
    /// Shutdown limit in °C, quantized to 5° steps within [30, 95]
    pub shutdown_limit_c: f32,
    /// Sticky latch: survives restart, cleared only by acknowledgement
    pub latched_persist: bool,
    pub last_trip_temp_c: Option<f32>,
    pub last_trip_at: Option<chrono::DateTime<chrono::Utc>>,
    pub last_trip_reason: Option<String>,
}

impl Default for ThermalConfig {
    fn default() -> Self {
        Self {
            protection_enabled: true,
            shutdown_limit_c: 80.0,
            latched_persist: false,
            last_trip_temp_c: None,
            last_trip_at: None,
            last_trip_reason: None,
        }
    }
}

/// Snap a requested shutdown limit to the 5° grid within [30, 95].
pub fn quantize_shutdown_limit(limit_c: f32) -> f32 {
    let clamped = limit_c.clamp(SHUTDOWN_LIMIT_MIN_C, SHUTDOWN_LIMIT_MAX_C);
    (clamped / SHUTDOWN_LIMIT_STEP_C).round() * SHUTDOWN_LIMIT_STEP_C
}

/// Radio and clock parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PowerConfig {
    /// Requested Wi-Fi transmit power in dBm; applied value snaps to the
    /// nearest hardware step
    pub tx_dbm: f32,
    /// CPU clock in MHz, one of [`CPU_FREQS_MHZ`]
    pub cpu_mhz: u16,
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            tx_dbm: 15.0,
            cpu_mhz: 160,
        }
    }
}

impl PowerConfig {
    pub fn validate_cpu_mhz(mhz: u16) -> Result<u16, ConfigError> {
        if CPU_FREQS_MHZ.contains(&mhz) {
            Ok(mhz)
        } else {
            Err(ConfigError::out_of_range("cpu_mhz", mhz))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.audio.sample_rate, 48000);
        assert_eq!(settings.audio.buffer_size, 1024);
        assert!(settings.reliability.auto_threshold_enabled);
        assert_eq!(settings.thermal.shutdown_limit_c, 80.0);
        assert_eq!(settings.power.cpu_mhz, 160);
    }

    #[test]
    fn test_parse_partial_toml() {
        let toml_str = r#"
            serving_enabled = false

            [audio]
            sample_rate = 16000
            gain = 4.0

            [thermal]
            shutdown_limit_c = 70.0
        "#;

        let settings: Settings = toml::from_str(toml_str).unwrap();
        assert_eq!(settings.audio.sample_rate, 16000);
        assert_eq!(settings.audio.gain, 4.0);
        // Missing fields take named defaults
        assert_eq!(settings.audio.buffer_size, 1024);
        assert_eq!(settings.thermal.shutdown_limit_c, 70.0);
        assert!(settings.thermal.protection_enabled);
        assert!(!settings.serving_enabled);
    }

    #[test]
    fn test_sample_rate_bounds() {
        assert!(AudioConfig::validate_sample_rate(8000).is_ok());
        assert!(AudioConfig::validate_sample_rate(96000).is_ok());
        assert!(AudioConfig::validate_sample_rate(7999).is_err());
        assert!(AudioConfig::validate_sample_rate(96001).is_err());
    }

    #[test]
    fn test_buffer_size_discrete_set() {
        for size in BUFFER_SIZES {
            assert!(AudioConfig::validate_buffer_size(size).is_ok());
        }
        assert!(AudioConfig::validate_buffer_size(1000).is_err());
        assert!(AudioConfig::validate_buffer_size(0).is_err());
    }

    #[test]
    fn test_gain_rejects_nonsense() {
        assert!(AudioConfig::validate_gain(0.1).is_ok());
        assert!(AudioConfig::validate_gain(100.0).is_ok());
        assert!(AudioConfig::validate_gain(0.05).is_err());
        assert!(AudioConfig::validate_gain(f32::NAN).is_err());
    }

    #[test]
    fn test_cutoff_clamped_below_nyquist_guard() {
        let cfg = AudioConfig {
            sample_rate: 8000,
            highpass_cutoff_hz: 10000,
            ..Default::default()
        };
        assert_eq!(cfg.effective_cutoff_hz(), 0.45 * 8000.0);

        let cfg = AudioConfig {
            highpass_cutoff_hz: 120,
            ..Default::default()
        };
        assert_eq!(cfg.effective_cutoff_hz(), 120.0);
    }

    #[test]
    fn test_recommended_min_rate() {
        // round(0.7 × 48000 / 1024) = round(32.8) = 33
        assert_eq!(recommended_min_rate(48000, 1024), 33);
        // Floored at 5
        assert_eq!(recommended_min_rate(8000, 8192), 5);
    }

    #[test]
    fn test_quantize_shutdown_limit() {
        assert_eq!(quantize_shutdown_limit(82.4), 80.0);
        assert_eq!(quantize_shutdown_limit(82.6), 85.0);
        assert_eq!(quantize_shutdown_limit(10.0), 30.0);
        assert_eq!(quantize_shutdown_limit(200.0), 95.0);
    }

    #[test]
    fn test_profile_names_track_buffer_size() {
        let mut cfg = AudioConfig::default();
        cfg.buffer_size = 256;
        assert_eq!(cfg.profile_name(), "Ultra-Low Latency");
        cfg.buffer_size = 1024;
        assert_eq!(cfg.profile_name(), "Stable Streaming");
        cfg.buffer_size = 8192;
        assert_eq!(cfg.profile_name(), "High Stability");
    }

    #[test]
    fn test_latency_ms() {
        let cfg = AudioConfig {
            sample_rate: 48000,
            buffer_size: 1024,
            ..Default::default()
        };
        assert!((cfg.latency_ms() - 21.33).abs() < 0.01);
    }
}
