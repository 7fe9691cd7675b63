//! Reliability supervision
//!
//! Periodically samples streaming throughput and memory health. A
//! packet-rate collapse below the acceptable threshold is logged and,
//! when auto-recovery is on, answered with a full capture-pipeline
//! restart. Uptime past the scheduled-reset horizon requests a full
//! device reboot. The tick takes injected time so the logic tests
//! without real delays.

use std::time::{Duration, Instant};

use sysinfo::System;

use crate::config::ReliabilityConfig;
use crate::constants::MEASUREMENT_WINDOW_MS;
use crate::rtsp::server::StreamStats;
use crate::status::EventLog;

/// How often the memory watermark is refreshed
const MEMORY_SAMPLE_SECS: u64 = 10;

/// What the loop must do after a supervision tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorAction {
    None,
    /// Throughput degraded with auto-recovery on: rebuild the capture
    /// pipeline and reset the measurement window
    RestartPipeline,
    /// Scheduled-reset horizon reached: full device restart
    ScheduleReboot,
}

pub struct ReliabilitySupervisor {
    boot_time: Instant,
    last_check: Instant,
    last_mem_sample: Option<Instant>,
    min_free_mem_kb: Option<u64>,
    reboot_requested: bool,
    sys: System,
}

impl ReliabilitySupervisor {
    pub fn new(now: Instant) -> Self {
        Self {
            boot_time: now,
            last_check: now,
            last_mem_sample: None,
            min_free_mem_kb: None,
            reboot_requested: false,
            sys: System::new(),
        }
    }

    pub fn uptime(&self, now: Instant) -> Duration {
        now.duration_since(self.boot_time)
    }

    /// Lifetime minimum of observed free memory, for diagnostics only.
    pub fn min_free_mem_kb(&self) -> Option<u64> {
        self.min_free_mem_kb
    }

    pub fn tick(
        &mut self,
        now: Instant,
        cfg: &ReliabilityConfig,
        playing: bool,
        stats: Option<StreamStats>,
        events: &mut EventLog,
    ) -> SupervisorAction {
        self.sample_memory(now);

        if cfg.scheduled_reset_enabled && !self.reboot_requested {
            let horizon = Duration::from_secs(cfg.reset_interval_hours as u64 * 3600);
            if self.uptime(now) >= horizon {
                self.reboot_requested = true;
                tracing::warn!(
                    "Scheduled reset after {}h uptime",
                    cfg.reset_interval_hours
                );
                events.push(format!(
                    "Scheduled reset after {}h uptime",
                    cfg.reset_interval_hours
                ));
                return SupervisorAction::ScheduleReboot;
            }
        }

        let interval = Duration::from_secs(cfg.check_interval_min as u64 * 60);
        if now.duration_since(self.last_check) < interval {
            return SupervisorAction::None;
        }
        self.last_check = now;

        if !playing {
            return SupervisorAction::None;
        }
        let Some(stats) = stats else {
            return SupervisorAction::None;
        };

        let window = now.duration_since(stats.window_started);
        if window < Duration::from_millis(MEASUREMENT_WINDOW_MS) {
            return SupervisorAction::None;
        }

        let rate = stats.rate_pkt_s(now);
        if rate >= cfg.min_acceptable_rate {
            tracing::debug!(
                "Throughput ok: {} pkt/s (min {})",
                rate,
                cfg.min_acceptable_rate
            );
            return SupervisorAction::None;
        }

        tracing::warn!(
            "Throughput degraded: {} pkt/s below minimum {}",
            rate,
            cfg.min_acceptable_rate
        );
        events.push(format!(
            "Throughput degraded: {} pkt/s (min {})",
            rate, cfg.min_acceptable_rate
        ));

        if cfg.auto_recovery_enabled {
            events.push("Auto recovery: restarting capture pipeline".to_string());
            SupervisorAction::RestartPipeline
        } else {
            SupervisorAction::None
        }
    }

    fn sample_memory(&mut self, now: Instant) {
        let due = match self.last_mem_sample {
            None => true,
            Some(at) => now.duration_since(at) >= Duration::from_secs(MEMORY_SAMPLE_SECS),
        };
        if !due {
            return;
        }
        self.last_mem_sample = Some(now);
        self.sys.refresh_memory();
        let free_kb = self.sys.available_memory() / 1024;
        if free_kb > 0 {
            self.min_free_mem_kb = Some(match self.min_free_mem_kb {
                Some(min) => min.min(free_kb),
                None => free_kb,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> ReliabilityConfig {
        ReliabilityConfig {
            min_acceptable_rate: 33,
            auto_threshold_enabled: true,
            check_interval_min: 5,
            auto_recovery_enabled: true,
            scheduled_reset_enabled: false,
            reset_interval_hours: 24,
        }
    }

    fn stats_at(t0: Instant, packets: u32) -> StreamStats {
        StreamStats {
            packets_sent: packets,
            window_started: t0,
        }
    }

    #[test]
    fn test_degraded_rate_restarts_pipeline() {
        let t0 = Instant::now();
        let mut sup = ReliabilitySupervisor::new(t0);
        let mut events = EventLog::new();

        // 10 pkt/s over a 60 s window, threshold 33
        let now = t0 + Duration::from_secs(60 * 5);
        let stats = stats_at(now - Duration::from_secs(60), 600);
        let action = sup.tick(now, &cfg(), true, Some(stats), &mut events);
        assert_eq!(action, SupervisorAction::RestartPipeline);
        assert!(!events.is_empty());
    }

    #[test]
    fn test_healthy_rate_untouched() {
        let t0 = Instant::now();
        let mut sup = ReliabilitySupervisor::new(t0);
        let mut events = EventLog::new();

        let now = t0 + Duration::from_secs(60 * 5);
        // 40 pkt/s over 60 s, threshold 33
        let stats = stats_at(now - Duration::from_secs(60), 2400);
        let action = sup.tick(now, &cfg(), true, Some(stats), &mut events);
        assert_eq!(action, SupervisorAction::None);
    }

    #[test]
    fn test_no_check_before_interval_or_window() {
        let t0 = Instant::now();
        let mut sup = ReliabilitySupervisor::new(t0);
        let mut events = EventLog::new();

        // Interval not yet elapsed
        let now = t0 + Duration::from_secs(60);
        let stats = stats_at(t0, 1);
        assert_eq!(
            sup.tick(now, &cfg(), true, Some(stats), &mut events),
            SupervisorAction::None
        );

        // Interval elapsed but measurement window too fresh
        let now = t0 + Duration::from_secs(60 * 6);
        let stats = stats_at(now - Duration::from_secs(5), 1);
        assert_eq!(
            sup.tick(now, &cfg(), true, Some(stats), &mut events),
            SupervisorAction::None
        );
    }

    #[test]
    fn test_not_playing_skips_check() {
        let t0 = Instant::now();
        let mut sup = ReliabilitySupervisor::new(t0);
        let mut events = EventLog::new();

        let now = t0 + Duration::from_secs(60 * 10);
        assert_eq!(
            sup.tick(now, &cfg(), false, None, &mut events),
            SupervisorAction::None
        );
    }

    #[test]
    fn test_degradation_without_auto_recovery_only_logs() {
        let t0 = Instant::now();
        let mut sup = ReliabilitySupervisor::new(t0);
        let mut events = EventLog::new();
        let mut cfg = cfg();
        cfg.auto_recovery_enabled = false;

        let now = t0 + Duration::from_secs(60 * 5);
        let stats = stats_at(now - Duration::from_secs(60), 60);
        let action = sup.tick(now, &cfg, true, Some(stats), &mut events);
        assert_eq!(action, SupervisorAction::None);
        assert!(!events.is_empty());
    }

    #[test]
    fn test_scheduled_reset_fires_once_at_horizon() {
        let t0 = Instant::now();
        let mut sup = ReliabilitySupervisor::new(t0);
        let mut events = EventLog::new();
        let mut cfg = cfg();
        cfg.scheduled_reset_enabled = true;
        cfg.reset_interval_hours = 1;

        let before = t0 + Duration::from_secs(3599);
        assert_eq!(
            sup.tick(before, &cfg, false, None, &mut events),
            SupervisorAction::None
        );

        let after = t0 + Duration::from_secs(3600);
        assert_eq!(
            sup.tick(after, &cfg, false, None, &mut events),
            SupervisorAction::ScheduleReboot
        );
        // Latched: does not re-fire while the reboot is pending
        assert_eq!(
            sup.tick(after + Duration::from_secs(60), &cfg, false, None, &mut events),
            SupervisorAction::None
        );
    }
}
