//! Persistent configuration store
//!
//! The single writable copy of every runtime parameter. All other
//! components hold read access and request mutation through the setters
//! here, which validate, clamp, persist on acceptance, and report the side
//! effect the caller must carry out (tearing down the capture pipeline
//! before the next read).

use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;

use crate::config::{
    quantize_shutdown_limit, recommended_min_rate, AudioConfig, PowerConfig,
    ReliabilityConfig, Settings, ThermalConfig,
};
use crate::error::ConfigError;

/// What the caller must do after an accepted change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SideEffect {
    /// Nothing beyond the persisted value
    None,
    /// The change affects capture framing: the pipeline must be fully
    /// torn down and reinitialized before the next read
    RestartPipeline,
}

/// Owns [`Settings`] and its persistence.
pub struct ConfigStore {
    settings: Settings,
    path: PathBuf,
}

impl ConfigStore {
    /// Default settings file location for this host.
    pub fn default_path() -> PathBuf {
        ProjectDirs::from("", "", "rtsp-mic")
            .map(|dirs| dirs.config_dir().join("settings.toml"))
            .unwrap_or_else(|| PathBuf::from("settings.toml"))
    }

    /// Load settings from `path`, falling back to named defaults for a
    /// missing file or any missing field.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let settings = match fs::read_to_string(&path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(settings) => settings,
                Err(e) => {
                    tracing::warn!(
                        "Using defaults: {}",
                        ConfigError::Parse(e.to_string())
                    );
                    Settings::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Settings::default(),
            Err(e) => {
                tracing::warn!("Using defaults: {}", ConfigError::Load(e.to_string()));
                Settings::default()
            }
        };
        Self { settings, path }
    }

    /// Persist the current settings.
    pub fn save(&self) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(&self.settings)
            .map_err(|e| ConfigError::Save(e.to_string()))?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| ConfigError::Save(e.to_string()))?;
            }
        }
        fs::write(&self.path, content).map_err(|e| ConfigError::Save(e.to_string()))
    }

    /// Factory reset: delete the settings file. Intended to be followed by
    /// a device restart, which comes back up on defaults.
    pub fn wipe(path: &Path) {
        if let Err(e) = fs::remove_file(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Factory reset could not remove settings: {}", e);
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn audio(&self) -> &AudioConfig {
        &self.settings.audio
    }

    pub fn reliability(&self) -> &ReliabilityConfig {
        &self.settings.reliability
    }

    pub fn thermal(&self) -> &ThermalConfig {
        &self.settings.thermal
    }

    pub fn power(&self) -> &PowerConfig {
        &self.settings.power
    }

    pub fn serving_enabled(&self) -> bool {
        self.settings.serving_enabled
    }

    fn accept(&mut self, effect: SideEffect) -> Result<SideEffect, ConfigError> {
        self.save()?;
        Ok(effect)
    }

    /// Re-derive the adaptive threshold after a rate or buffer change.
    fn refresh_auto_threshold(&mut self) {
        if self.settings.reliability.auto_threshold_enabled {
            let rate = recommended_min_rate(
                self.settings.audio.sample_rate,
                self.settings.audio.buffer_size,
            );
            self.settings.reliability.min_acceptable_rate = rate;
        }
    }

    // --- audio ---

    pub fn set_sample_rate(&mut self, rate: u32) -> Result<SideEffect, ConfigError> {
        let rate = AudioConfig::validate_sample_rate(rate)?;
        self.settings.audio.sample_rate = rate;
        self.refresh_auto_threshold();
        self.accept(SideEffect::RestartPipeline)
    }

    pub fn set_gain(&mut self, gain: f32) -> Result<SideEffect, ConfigError> {
        let gain = AudioConfig::validate_gain(gain)?;
        self.settings.audio.gain = gain;
        self.accept(SideEffect::None)
    }

    pub fn set_buffer_size(&mut self, size: u16) -> Result<SideEffect, ConfigError> {
        let size = AudioConfig::validate_buffer_size(size)?;
        self.settings.audio.buffer_size = size;
        self.refresh_auto_threshold();
        self.accept(SideEffect::RestartPipeline)
    }

    pub fn set_bit_shift(&mut self, shift: u8) -> Result<SideEffect, ConfigError> {
        let shift = AudioConfig::validate_bit_shift(shift)?;
        self.settings.audio.bit_shift = shift;
        self.accept(SideEffect::RestartPipeline)
    }

    pub fn set_highpass_enabled(&mut self, enabled: bool) -> Result<SideEffect, ConfigError> {
        self.settings.audio.highpass_enabled = enabled;
        self.accept(SideEffect::None)
    }

    pub fn set_highpass_cutoff(&mut self, cutoff_hz: u16) -> Result<SideEffect, ConfigError> {
        let cutoff_hz = AudioConfig::validate_cutoff(cutoff_hz)?;
        self.settings.audio.highpass_cutoff_hz = cutoff_hz;
        self.accept(SideEffect::None)
    }

    // --- reliability ---

    /// Manual threshold write. Ignored (but still range-checked) while the
    /// adaptive threshold owns the value.
    pub fn set_min_acceptable_rate(&mut self, rate: u32) -> Result<SideEffect, ConfigError> {
        let rate = ReliabilityConfig::validate_min_rate(rate)?;
        if self.settings.reliability.auto_threshold_enabled {
            tracing::debug!("Ignoring manual threshold {} pkt/s: auto mode owns it", rate);
            return Ok(SideEffect::None);
        }
        self.settings.reliability.min_acceptable_rate = rate;
        self.accept(SideEffect::None)
    }

    pub fn set_auto_threshold_enabled(&mut self, enabled: bool) -> Result<SideEffect, ConfigError> {
        self.settings.reliability.auto_threshold_enabled = enabled;
        self.refresh_auto_threshold();
        self.accept(SideEffect::None)
    }

    pub fn set_check_interval_min(&mut self, minutes: u32) -> Result<SideEffect, ConfigError> {
        let minutes = ReliabilityConfig::validate_check_interval(minutes)?;
        self.settings.reliability.check_interval_min = minutes;
        self.accept(SideEffect::None)
    }

    pub fn set_auto_recovery_enabled(&mut self, enabled: bool) -> Result<SideEffect, ConfigError> {
        self.settings.reliability.auto_recovery_enabled = enabled;
        self.accept(SideEffect::None)
    }

    pub fn set_scheduled_reset_enabled(&mut self, enabled: bool) -> Result<SideEffect, ConfigError> {
        self.settings.reliability.scheduled_reset_enabled = enabled;
        self.accept(SideEffect::None)
    }

    pub fn set_reset_interval_hours(&mut self, hours: u32) -> Result<SideEffect, ConfigError> {
        let hours = ReliabilityConfig::validate_reset_hours(hours)?;
        self.settings.reliability.reset_interval_hours = hours;
        self.accept(SideEffect::None)
    }

    // --- thermal ---

    pub fn set_protection_enabled(&mut self, enabled: bool) -> Result<SideEffect, ConfigError> {
        self.settings.thermal.protection_enabled = enabled;
        self.accept(SideEffect::None)
    }

    /// Requested limit is quantized to the 5° grid rather than rejected.
    pub fn set_shutdown_limit(&mut self, limit_c: f32) -> Result<SideEffect, ConfigError> {
        if !limit_c.is_finite() {
            return Err(ConfigError::out_of_range("shutdown_limit_c", limit_c));
        }
        self.settings.thermal.shutdown_limit_c = quantize_shutdown_limit(limit_c);
        self.accept(SideEffect::None)
    }

    /// Record an overheat trip and force serving off. Persisted
    /// immediately so the lockout survives a power cycle.
    pub fn record_thermal_trip(
        &mut self,
        temp_c: f32,
        at: chrono::DateTime<chrono::Utc>,
        reason: String,
    ) -> Result<(), ConfigError> {
        self.settings.thermal.latched_persist = true;
        self.settings.thermal.last_trip_temp_c = Some(temp_c);
        self.settings.thermal.last_trip_at = Some(at);
        self.settings.thermal.last_trip_reason = Some(reason);
        self.settings.serving_enabled = false;
        self.save()
    }

    /// Explicit operator acknowledgement: clears the sticky latch and the
    /// stored trip, and re-enables serving.
    pub fn acknowledge_thermal_latch(&mut self) -> Result<bool, ConfigError> {
        if !self.settings.thermal.latched_persist {
            return Ok(false);
        }
        self.settings.thermal.latched_persist = false;
        self.settings.thermal.last_trip_temp_c = None;
        self.settings.thermal.last_trip_at = None;
        self.settings.thermal.last_trip_reason = Some("Thermal latch cleared manually".into());
        self.settings.serving_enabled = true;
        self.save()?;
        Ok(true)
    }

    // --- serving ---

    /// Enable or disable the RTSP listener. Enabling is refused while a
    /// persisted thermal latch is pending acknowledgement.
    pub fn set_serving_enabled(&mut self, enabled: bool) -> Result<SideEffect, ConfigError> {
        if enabled && self.settings.thermal.latched_persist {
            return Err(ConfigError::out_of_range("serving_enabled", "thermal latch pending"));
        }
        self.settings.serving_enabled = enabled;
        self.accept(SideEffect::None)
    }

    // --- power ---

    pub fn set_tx_dbm(&mut self, dbm: f32) -> Result<SideEffect, ConfigError> {
        if !dbm.is_finite() {
            return Err(ConfigError::out_of_range("tx_dbm", dbm));
        }
        self.settings.power.tx_dbm = dbm;
        self.accept(SideEffect::None)
    }

    pub fn set_cpu_mhz(&mut self, mhz: u16) -> Result<SideEffect, ConfigError> {
        let mhz = PowerConfig::validate_cpu_mhz(mhz)?;
        self.settings.power.cpu_mhz = mhz;
        self.accept(SideEffect::None)
    }
}
