//! Thermal protection
//!
//! Watches the die temperature and latches serving off when the
//! configured limit is exceeded. The trip is persisted immediately so the
//! lockout survives a power cycle; only an explicit acknowledgement
//! clears it. A transient (re-armable) lockout separately inhibits
//! re-tripping until the temperature has fallen one quantization step
//! below the limit. Implausible readings pause protection instead of
//! escalating.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::config::SHUTDOWN_LIMIT_STEP_C;
use crate::status::EventLog;
use crate::store::ConfigStore;

/// Readings outside this range mean the sensor, not the board, is wrong.
const PLAUSIBLE_RANGE_C: std::ops::RangeInclusive<f32> = -20.0..=120.0;

/// A die/board temperature source.
pub trait TemperatureSensor: Send {
    /// Current temperature in °C, or `None` when no reading is available.
    fn read_c(&mut self) -> Option<f32>;
}

/// Linux sysfs thermal zone reader (millidegrees).
pub struct SysfsSensor {
    path: PathBuf,
}

impl SysfsSensor {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn default_zone() -> Self {
        Self::new("/sys/class/thermal/thermal_zone0/temp")
    }
}

impl TemperatureSensor for SysfsSensor {
    fn read_c(&mut self) -> Option<f32> {
        let raw = std::fs::read_to_string(&self.path).ok()?;
        let millis: f32 = raw.trim().parse().ok()?;
        Some(millis / 1000.0)
    }
}

/// What the loop must do after a thermal tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThermalAction {
    None,
    /// The limit was exceeded: serving has been disabled and persisted;
    /// any active session must be stopped now
    Trip,
}

pub struct ThermalGuard {
    sensor: Box<dyn TemperatureSensor>,
    sample_interval: Duration,
    last_sample: Option<Instant>,
    /// Transient lockout; clears once temperature falls a full step
    /// below the limit
    latched: bool,
    sensor_fault: bool,
    last_temp: Option<f32>,
    max_temp: Option<f32>,
}

impl ThermalGuard {
    pub fn new(sensor: Box<dyn TemperatureSensor>, sample_interval: Duration) -> Self {
        Self {
            sensor,
            sample_interval,
            last_sample: None,
            latched: false,
            sensor_fault: false,
            last_temp: None,
            max_temp: None,
        }
    }

    pub fn latched(&self) -> bool {
        self.latched
    }

    pub fn sensor_fault(&self) -> bool {
        self.sensor_fault
    }

    pub fn last_temp(&self) -> Option<f32> {
        self.last_temp
    }

    pub fn max_temp(&self) -> Option<f32> {
        self.max_temp
    }

    pub fn tick(
        &mut self,
        now: Instant,
        store: &mut ConfigStore,
        events: &mut EventLog,
    ) -> ThermalAction {
        let due = match self.last_sample {
            None => true,
            Some(at) => now.duration_since(at) >= self.sample_interval,
        };
        if !due {
            return ThermalAction::None;
        }
        self.last_sample = Some(now);

        let reading = self.sensor.read_c();
        let temp = match reading {
            Some(t) if PLAUSIBLE_RANGE_C.contains(&t) => t,
            other => {
                if !self.sensor_fault {
                    self.sensor_fault = true;
                    tracing::warn!("Temperature sensor fault ({:?}), protection paused", other);
                    events.push("Temperature sensor fault, protection paused".to_string());
                }
                return ThermalAction::None;
            }
        };

        if self.sensor_fault {
            self.sensor_fault = false;
            tracing::info!("Temperature sensor restored: {:.1}C", temp);
            events.push("Temperature sensor restored".to_string());
        }

        self.last_temp = Some(temp);
        self.max_temp = Some(self.max_temp.map_or(temp, |m| m.max(temp)));

        let limit = store.thermal().shutdown_limit_c;

        // Transient re-arm: one full quantization step of cooling lifts
        // the local inhibition; the persisted latch is untouched.
        if self.latched && temp <= limit - SHUTDOWN_LIMIT_STEP_C {
            self.latched = false;
            tracing::info!("Thermal lockout re-armed at {:.1}C", temp);
            events.push(format!("Thermal lockout re-armed at {:.1}C", temp));
        }

        if !store.thermal().protection_enabled {
            self.latched = false;
            return ThermalAction::None;
        }

        if !self.latched && temp >= limit {
            self.latched = true;
            let reason = format!(
                "Overheat: {:.1}C reached shutdown limit {:.0}C",
                temp, limit
            );
            tracing::error!("{}; serving disabled until acknowledged", reason);
            events.push(reason.clone());
            if let Err(e) = store.record_thermal_trip(temp, chrono::Utc::now(), reason) {
                tracing::error!("Failed to persist thermal trip: {}", e);
            }
            return ThermalAction::Trip;
        }

        ThermalAction::None
    }

    /// Operator acknowledgement: clears the persisted latch through the
    /// store and the local transient one.
    pub fn acknowledge(
        &mut self,
        store: &mut ConfigStore,
        events: &mut EventLog,
    ) -> bool {
        match store.acknowledge_thermal_latch() {
            Ok(true) => {
                self.latched = false;
                tracing::info!("Thermal latch cleared manually");
                events.push("Thermal latch cleared manually".to_string());
                true
            }
            Ok(false) => false,
            Err(e) => {
                tracing::error!("Failed to persist latch clear: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct ScriptedSensor {
        readings: VecDeque<Option<f32>>,
    }

    impl ScriptedSensor {
        fn new(readings: Vec<Option<f32>>) -> Self {
            Self {
                readings: readings.into(),
            }
        }
    }

    impl TemperatureSensor for ScriptedSensor {
        fn read_c(&mut self) -> Option<f32> {
            self.readings.pop_front().flatten()
        }
    }

    fn guard_with(readings: Vec<Option<f32>>) -> ThermalGuard {
        ThermalGuard::new(Box::new(ScriptedSensor::new(readings)), Duration::ZERO)
    }

    fn store() -> (tempfile::TempDir, ConfigStore) {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ConfigStore::load(dir.path().join("settings.toml"));
        store.set_serving_enabled(true).unwrap();
        (dir, store)
    }

    #[test]
    fn test_trip_latches_and_requires_acknowledgement() {
        let (_dir, mut store) = store();
        let mut events = EventLog::new();
        let mut guard = guard_with(vec![Some(70.0), Some(82.0), Some(76.0)]);
        let t0 = Instant::now();

        // 70C: nothing
        assert_eq!(guard.tick(t0, &mut store, &mut events), ThermalAction::None);
        assert!(store.serving_enabled());

        // 82C: trip, persisted, serving forced off
        assert_eq!(guard.tick(t0, &mut store, &mut events), ThermalAction::Trip);
        assert!(guard.latched());
        assert!(store.thermal().latched_persist);
        assert!(!store.serving_enabled());
        assert_eq!(store.thermal().last_trip_temp_c, Some(82.0));
        assert!(store.thermal().last_trip_reason.is_some());

        // 76C: above limit - 5, both latches hold, serving stays off
        assert_eq!(guard.tick(t0, &mut store, &mut events), ThermalAction::None);
        assert!(guard.latched());
        assert!(store.thermal().latched_persist);
        assert!(!store.serving_enabled());

        // Only acknowledgement restores serving
        assert!(guard.acknowledge(&mut store, &mut events));
        assert!(!guard.latched());
        assert!(!store.thermal().latched_persist);
        assert!(store.serving_enabled());
    }

    #[test]
    fn test_transient_latch_rearms_below_step() {
        let (_dir, mut store) = store();
        let mut events = EventLog::new();
        let mut guard = guard_with(vec![Some(82.0), Some(76.0), Some(75.0)]);
        let t0 = Instant::now();

        assert_eq!(guard.tick(t0, &mut store, &mut events), ThermalAction::Trip);
        assert!(guard.latched());

        // 76C: not yet a full step below 80
        guard.tick(t0, &mut store, &mut events);
        assert!(guard.latched());

        // 75C: transient lockout lifts, persisted latch does not
        guard.tick(t0, &mut store, &mut events);
        assert!(!guard.latched());
        assert!(store.thermal().latched_persist);
        assert!(!store.serving_enabled());
    }

    #[test]
    fn test_sensor_fault_pauses_protection_and_restores() {
        let (_dir, mut store) = store();
        let mut events = EventLog::new();
        // 300C is implausible; then a valid hot reading
        let mut guard = guard_with(vec![Some(300.0), None, Some(85.0)]);
        let t0 = Instant::now();

        guard.tick(t0, &mut store, &mut events);
        assert!(guard.sensor_fault());
        assert!(store.serving_enabled()); // fault never trips

        guard.tick(t0, &mut store, &mut events);
        assert!(guard.sensor_fault());

        // Valid reading restores protection, and 85C >= 80C trips
        assert_eq!(guard.tick(t0, &mut store, &mut events), ThermalAction::Trip);
        assert!(!guard.sensor_fault());
    }

    #[test]
    fn test_disabled_protection_clears_transient_only() {
        let (_dir, mut store) = store();
        let mut events = EventLog::new();
        let mut guard = guard_with(vec![Some(82.0), Some(82.0)]);
        let t0 = Instant::now();

        assert_eq!(guard.tick(t0, &mut store, &mut events), ThermalAction::Trip);
        store.set_protection_enabled(false).unwrap();

        guard.tick(t0, &mut store, &mut events);
        assert!(!guard.latched());
        // The acknowledgement requirement survives
        assert!(store.thermal().latched_persist);
        assert!(!store.serving_enabled());
    }

    #[test]
    fn test_no_trip_while_protection_disabled() {
        let (_dir, mut store) = store();
        store.set_protection_enabled(false).unwrap();
        let mut events = EventLog::new();
        let mut guard = guard_with(vec![Some(90.0)]);

        let action = guard.tick(Instant::now(), &mut store, &mut events);
        assert_eq!(action, ThermalAction::None);
        assert!(store.serving_enabled());
    }

    #[test]
    fn test_watermarks_tracked() {
        let (_dir, mut store) = store();
        let mut events = EventLog::new();
        let mut guard = guard_with(vec![Some(40.0), Some(55.0), Some(40.0)]);
        let t0 = Instant::now();

        guard.tick(t0, &mut store, &mut events);
        guard.tick(t0, &mut store, &mut events);
        guard.tick(t0, &mut store, &mut events);
        assert_eq!(guard.last_temp(), Some(40.0));
        assert_eq!(guard.max_temp(), Some(55.0));
    }

    #[test]
    fn test_sample_interval_gates_reads() {
        let (_dir, mut store) = store();
        let mut events = EventLog::new();
        let mut guard = ThermalGuard::new(
            Box::new(ScriptedSensor::new(vec![Some(40.0), Some(41.0)])),
            Duration::from_secs(5),
        );
        let t0 = Instant::now();

        guard.tick(t0, &mut store, &mut events);
        assert_eq!(guard.last_temp(), Some(40.0));

        // Within the interval: no new reading consumed
        guard.tick(t0 + Duration::from_secs(1), &mut store, &mut events);
        assert_eq!(guard.last_temp(), Some(40.0));

        guard.tick(t0 + Duration::from_secs(5), &mut store, &mut events);
        assert_eq!(guard.last_temp(), Some(41.0));
    }
}
