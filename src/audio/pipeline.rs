//! Capture pipeline lifecycle
//!
//! Ties a [`SampleSource`] to the [`SignalConditioner`] and owns the full
//! teardown/reinit semantics: any configuration change that affects capture
//! framing rebuilds the source from scratch, so a stale partially-filled
//! hardware buffer is never reused.

use std::time::{Duration, Instant};

use crate::audio::capture::{AudioCapture, SampleSource};
use crate::audio::conditioner::{MeteringState, SignalConditioner};
use crate::config::AudioConfig;
use crate::error::AudioError;

/// Builds a fresh hardware source for the given configuration.
pub type SourceFactory =
    Box<dyn FnMut(&AudioConfig) -> Result<Box<dyn SampleSource>, AudioError> + Send>;

pub struct CapturePipeline {
    factory: SourceFactory,
    capture: AudioCapture,
    conditioner: SignalConditioner,
}

impl CapturePipeline {
    pub fn new(mut factory: SourceFactory, cfg: &AudioConfig) -> Result<Self, AudioError> {
        let source = (factory)(cfg)?;
        let capture = AudioCapture::new(source, cfg.buffer_size)?;
        Ok(Self {
            factory,
            capture,
            conditioner: SignalConditioner::new(),
        })
    }

    /// Full teardown and reinit. The old source is dropped (discarding any
    /// staged samples) before the replacement is built; filter state is
    /// reset, metering carries across.
    pub fn restart(&mut self, cfg: &AudioConfig) -> Result<(), AudioError> {
        let source = (self.factory)(cfg)?;
        self.capture = AudioCapture::new(source, cfg.buffer_size)?;
        self.conditioner.reset_filter();
        tracing::info!(
            "Capture pipeline restarted: {} Hz, {} samples",
            cfg.sample_rate,
            cfg.buffer_size
        );
        Ok(())
    }

    /// Read and condition one block. `Ok(None)` means the hardware had
    /// nothing within the timeout.
    pub fn next_block(
        &mut self,
        cfg: &AudioConfig,
        timeout: Duration,
        now: Instant,
    ) -> Result<Option<&[i16]>, AudioError> {
        let native_16bit = self.capture.native_16bit();
        let raw = self.capture.read_block(timeout)?;
        if raw.is_empty() {
            return Ok(None);
        }
        let block = self
            .conditioner
            .process_block(raw, cfg, !native_16bit, now)?;
        Ok(Some(block))
    }

    pub fn metering(&self) -> &MeteringState {
        self.conditioner.metering()
    }
}
