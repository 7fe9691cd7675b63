//! Read-only status surface and event log
//!
//! Snapshots consumed by the dashboard process. Everything here is a plain
//! serializable copy of core state; nothing external mutates through this
//! module.

use std::collections::VecDeque;

use serde::Serialize;

use crate::audio::conditioner::MeteringState;
use crate::config::{recommended_min_rate, AudioConfig, ReliabilityConfig, ThermalConfig};
use crate::constants::EVENT_LOG_CAP;
use crate::thermal::ThermalGuard;

/// Bounded in-memory log of recent human-readable events. The core appends
/// a line on every state transition and recovery action.
#[derive(Debug, Default)]
pub struct EventLog {
    lines: VecDeque<String>,
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            lines: VecDeque::with_capacity(EVENT_LOG_CAP),
        }
    }

    pub fn push(&mut self, line: impl Into<String>) {
        if self.lines.len() == EVENT_LOG_CAP {
            self.lines.pop_front();
        }
        self.lines.push_back(line.into());
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Oldest-first copy of the retained lines.
    pub fn snapshot(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }
}

/// Device-level status
#[derive(Debug, Clone, Serialize)]
pub struct DeviceStatus {
    pub uptime_secs: u64,
    pub serving_enabled: bool,
    /// Remote address of the connected client, if any
    pub client: Option<String>,
    pub streaming: bool,
    pub current_rate_pkt_s: u32,
    pub last_connect_secs_ago: Option<u64>,
    pub last_play_secs_ago: Option<u64>,
    pub play_count: u32,
    pub min_free_mem_kb: Option<u64>,
    pub reboot_pending: bool,
}

/// Audio pipeline status
#[derive(Debug, Clone, Serialize)]
pub struct AudioStatus {
    pub sample_rate: u32,
    pub gain: f32,
    pub buffer_size: u16,
    pub bit_shift: u8,
    pub latency_ms: f32,
    pub profile: &'static str,
    pub highpass_enabled: bool,
    pub highpass_cutoff_hz: u16,
    pub peak_pct: f32,
    pub peak_dbfs: f32,
    pub clipped: bool,
    pub clip_count: u32,
}

impl AudioStatus {
    pub fn collect(cfg: &AudioConfig, metering: &MeteringState) -> Self {
        Self {
            sample_rate: cfg.sample_rate,
            gain: cfg.gain,
            buffer_size: cfg.buffer_size,
            bit_shift: cfg.bit_shift,
            latency_ms: cfg.latency_ms(),
            profile: cfg.profile_name(),
            highpass_enabled: cfg.highpass_enabled,
            highpass_cutoff_hz: cfg.highpass_cutoff_hz,
            peak_pct: metering.peak_pct(),
            peak_dbfs: metering.peak_dbfs(),
            clipped: metering.clipped_last_block,
            clip_count: metering.clip_count,
        }
    }
}

/// Throughput supervision status
#[derive(Debug, Clone, Serialize)]
pub struct ReliabilityStatus {
    pub min_acceptable_rate: u32,
    pub recommended_min_rate: u32,
    pub auto_threshold: bool,
    pub check_interval_min: u32,
    pub auto_recovery: bool,
    pub scheduled_reset: bool,
    pub reset_interval_hours: u32,
}

impl ReliabilityStatus {
    pub fn collect(cfg: &ReliabilityConfig, audio: &AudioConfig) -> Self {
        Self {
            min_acceptable_rate: cfg.min_acceptable_rate,
            recommended_min_rate: recommended_min_rate(audio.sample_rate, audio.buffer_size),
            auto_threshold: cfg.auto_threshold_enabled,
            check_interval_min: cfg.check_interval_min,
            auto_recovery: cfg.auto_recovery_enabled,
            scheduled_reset: cfg.scheduled_reset_enabled,
            reset_interval_hours: cfg.reset_interval_hours,
        }
    }
}

/// Thermal guard status
#[derive(Debug, Clone, Serialize)]
pub struct ThermalStatus {
    pub current_c: Option<f32>,
    pub max_c: Option<f32>,
    pub protection_enabled: bool,
    pub shutdown_limit_c: f32,
    pub latched: bool,
    pub latched_persist: bool,
    pub sensor_fault: bool,
    pub last_trip_c: Option<f32>,
    pub last_trip_at: Option<chrono::DateTime<chrono::Utc>>,
    pub last_trip_reason: Option<String>,
}

impl ThermalStatus {
    pub fn collect(cfg: &ThermalConfig, guard: &ThermalGuard) -> Self {
        Self {
            current_c: guard.last_temp(),
            max_c: guard.max_temp(),
            protection_enabled: cfg.protection_enabled,
            shutdown_limit_c: cfg.shutdown_limit_c,
            latched: guard.latched(),
            latched_persist: cfg.latched_persist,
            sensor_fault: guard.sensor_fault(),
            last_trip_c: cfg.last_trip_temp_c,
            last_trip_at: cfg.last_trip_at,
            last_trip_reason: cfg.last_trip_reason.clone(),
        }
    }
}

/// Radio/clock status
#[derive(Debug, Clone, Serialize)]
pub struct PowerStatus {
    pub requested_tx_dbm: f32,
    pub applied_tx_dbm: Option<f32>,
    pub cpu_mhz: u16,
}
