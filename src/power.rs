//! Radio transmit power and CPU clock management
//!
//! The radio only supports a fixed ascending set of transmit power steps;
//! requested values snap to the nearest entry and are applied exactly once
//! per distinct level so repeated requests cause no redundant radio
//! reconfiguration.

use crate::config::PowerConfig;
use crate::error::ConfigError;
use crate::status::PowerStatus;

/// Hardware-supported transmit power steps in dBm, ascending.
pub const TX_POWER_STEPS_DBM: [f32; 12] = [
    -1.0, 2.0, 5.0, 7.0, 8.5, 11.0, 13.0, 15.0, 17.0, 18.5, 19.0, 19.5,
];

/// Applies power settings to the hardware.
pub trait RadioControl: Send {
    fn set_tx_dbm(&mut self, dbm: f32);
    fn set_cpu_mhz(&mut self, mhz: u16);
}

/// Host stand-in: the applied levels only reach the log.
pub struct LoggingRadio;

impl RadioControl for LoggingRadio {
    fn set_tx_dbm(&mut self, dbm: f32) {
        tracing::info!("Radio TX power set to {:.1} dBm", dbm);
    }

    fn set_cpu_mhz(&mut self, mhz: u16) {
        tracing::info!("CPU clock set to {} MHz", mhz);
    }
}

/// Snap a requested power to the nearest supported step. Ties resolve to
/// the earlier table entry.
pub fn snap_tx_dbm(requested: f32) -> f32 {
    let mut best = TX_POWER_STEPS_DBM[0];
    let mut best_dist = (requested - best).abs();
    for &step in &TX_POWER_STEPS_DBM[1..] {
        let dist = (requested - step).abs();
        if dist < best_dist {
            best_dist = dist;
            best = step;
        }
    }
    best
}

pub struct PowerManager {
    radio: Box<dyn RadioControl>,
    applied_tx_dbm: Option<f32>,
    applied_cpu_mhz: Option<u16>,
    /// Hardware reconfigurations performed (distinct applies)
    tx_applies: u32,
}

impl PowerManager {
    pub fn new(radio: Box<dyn RadioControl>) -> Self {
        Self {
            radio,
            applied_tx_dbm: None,
            applied_cpu_mhz: None,
            tx_applies: 0,
        }
    }

    pub fn applied_tx_dbm(&self) -> Option<f32> {
        self.applied_tx_dbm
    }

    pub fn tx_applies(&self) -> u32 {
        self.tx_applies
    }

    /// Bring the hardware in line with the configured power settings.
    /// Idempotent: nothing happens when the snapped level is already
    /// applied.
    pub fn apply(&mut self, cfg: &PowerConfig) -> Result<(), ConfigError> {
        let mhz = PowerConfig::validate_cpu_mhz(cfg.cpu_mhz)?;

        let level = snap_tx_dbm(cfg.tx_dbm);
        if self.applied_tx_dbm != Some(level) {
            self.radio.set_tx_dbm(level);
            self.applied_tx_dbm = Some(level);
            self.tx_applies += 1;
        }

        if self.applied_cpu_mhz != Some(mhz) {
            self.radio.set_cpu_mhz(mhz);
            self.applied_cpu_mhz = Some(mhz);
        }
        Ok(())
    }

    pub fn status(&self, cfg: &PowerConfig) -> PowerStatus {
        PowerStatus {
            requested_tx_dbm: cfg.tx_dbm,
            applied_tx_dbm: self.applied_tx_dbm,
            cpu_mhz: self.applied_cpu_mhz.unwrap_or(cfg.cpu_mhz),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct CountingRadio {
        tx_calls: Arc<AtomicU32>,
    }

    impl RadioControl for CountingRadio {
        fn set_tx_dbm(&mut self, _dbm: f32) {
            self.tx_calls.fetch_add(1, Ordering::SeqCst);
        }
        fn set_cpu_mhz(&mut self, _mhz: u16) {}
    }

    #[test]
    fn test_snap_nearest() {
        assert_eq!(snap_tx_dbm(15.0), 15.0);
        assert_eq!(snap_tx_dbm(0.0), -1.0);
        assert_eq!(snap_tx_dbm(16.2), 17.0);
        assert_eq!(snap_tx_dbm(25.0), 19.5);
        assert_eq!(snap_tx_dbm(-10.0), -1.0);
    }

    #[test]
    fn test_snap_tie_resolves_to_earlier_step() {
        // 0.5 is equidistant from -1.0 and 2.0
        assert_eq!(snap_tx_dbm(0.5), -1.0);
        // 6.0 is equidistant from 5.0 and 7.0
        assert_eq!(snap_tx_dbm(6.0), 5.0);
    }

    #[test]
    fn test_apply_is_idempotent() {
        let tx_calls = Arc::new(AtomicU32::new(0));
        let mut manager = PowerManager::new(Box::new(CountingRadio {
            tx_calls: tx_calls.clone(),
        }));

        let cfg = PowerConfig {
            tx_dbm: 15.0,
            cpu_mhz: 160,
        };
        manager.apply(&cfg).unwrap();
        manager.apply(&cfg).unwrap();
        assert_eq!(tx_calls.load(Ordering::SeqCst), 1);
        assert_eq!(manager.tx_applies(), 1);

        // Different request that snaps to the same step: still no reapply
        let cfg = PowerConfig {
            tx_dbm: 15.4,
            cpu_mhz: 160,
        };
        manager.apply(&cfg).unwrap();
        assert_eq!(tx_calls.load(Ordering::SeqCst), 1);

        // A genuinely different level reconfigures once
        let cfg = PowerConfig {
            tx_dbm: 19.5,
            cpu_mhz: 160,
        };
        manager.apply(&cfg).unwrap();
        assert_eq!(tx_calls.load(Ordering::SeqCst), 2);
        assert_eq!(manager.applied_tx_dbm(), Some(19.5));
    }

    #[test]
    fn test_cpu_clock_validated_not_snapped() {
        use crate::config::CPU_FREQS_MHZ;

        let mut manager = PowerManager::new(Box::new(LoggingRadio));
        let cfg = PowerConfig {
            tx_dbm: 15.0,
            cpu_mhz: 100,
        };
        assert!(manager.apply(&cfg).is_err());

        for mhz in CPU_FREQS_MHZ {
            let cfg = PowerConfig {
                tx_dbm: 15.0,
                cpu_mhz: mhz,
            };
            assert!(manager.apply(&cfg).is_ok());
        }
    }
}
