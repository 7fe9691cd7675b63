//! Audio capture from the hardware sampling interface
//!
//! The hardware seam is the [`SampleSource`] trait: blocks of raw samples
//! on a bounded timeout, zero on timeout, fatal driver conditions as
//! [`AudioError::HardwareFault`]. The production source runs a cpal input
//! stream on a dedicated thread and bridges into the polling loop through
//! a lock-free ring buffer.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam::queue::ArrayQueue;
use crossbeam_channel::{bounded, Receiver};

use crate::config::AudioConfig;
use crate::constants::RING_BUFFER_CAPACITY;
use crate::error::AudioError;

/// A hardware sampling interface delivering raw fixed-point samples.
pub trait SampleSource: Send {
    /// Fill `dst` with up to `dst.len()` raw samples, waiting at most
    /// `timeout`. Returns the count actually read; zero on timeout is not
    /// an error. A fatal driver condition surfaces as
    /// [`AudioError::HardwareFault`] and the device must restart.
    fn read(&mut self, dst: &mut [i32], timeout: Duration) -> Result<usize, AudioError>;

    /// Whether samples already arrive as 16-bit values, making the
    /// configured bit shift a no-op.
    fn native_16bit(&self) -> bool {
        false
    }
}

/// Production source: cpal input stream on its own thread, bridged
/// through a lock-free ring buffer of hardware-sized chunks.
pub struct CpalSource {
    running: Arc<AtomicBool>,
    ring: Arc<ArrayQueue<Vec<i32>>>,
    overflow_count: Arc<AtomicUsize>,
    error_rx: Receiver<AudioError>,
    thread_handle: Option<JoinHandle<()>>,
    /// Samples popped from the ring but not yet handed out
    pending: Vec<i32>,
}

impl CpalSource {
    /// Open the default input device at the configured sample rate.
    pub fn open(config: &AudioConfig) -> Result<Self, AudioError> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| AudioError::DeviceNotFound("no default input device".into()))?;

        let stream_config = cpal::StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(config.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let running = Arc::new(AtomicBool::new(true));
        let ring = Arc::new(ArrayQueue::new(RING_BUFFER_CAPACITY));
        let overflow_count = Arc::new(AtomicUsize::new(0));
        let (error_tx, error_rx) = bounded::<AudioError>(16);

        let running_cb = running.clone();
        let running_loop = running.clone();
        let ring_cb = ring.clone();
        let overflow_cb = overflow_count.clone();
        let error_stream = error_tx.clone();

        let handle = thread::Builder::new()
            .name("mic-capture".into())
            .spawn(move || {
                let stream = device.build_input_stream(
                    &stream_config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        if !running_cb.load(Ordering::Relaxed) {
                            return;
                        }
                        let chunk: Vec<i32> = data
                            .iter()
                            .map(|s| (s * 32767.0).clamp(-32768.0, 32767.0) as i32)
                            .collect();
                        if ring_cb.push(chunk).is_err() {
                            overflow_cb.fetch_add(1, Ordering::Relaxed);
                        }
                    },
                    move |err| {
                        let fault = match err {
                            cpal::StreamError::DeviceNotAvailable => {
                                AudioError::HardwareFault("input device lost".into())
                            }
                            other => AudioError::StreamError(other.to_string()),
                        };
                        let _ = error_stream.try_send(fault);
                    },
                    None,
                );

                match stream {
                    Ok(stream) => {
                        if let Err(e) = stream.play() {
                            let _ = error_tx.try_send(AudioError::StreamError(e.to_string()));
                            return;
                        }
                        while running_loop.load(Ordering::Relaxed) {
                            thread::sleep(Duration::from_millis(10));
                        }
                        // Stream is dropped here, stopping capture
                    }
                    Err(e) => {
                        let _ = error_tx.try_send(AudioError::HardwareFault(e.to_string()));
                    }
                }
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        Ok(Self {
            running,
            ring,
            overflow_count,
            error_rx,
            thread_handle: Some(handle),
            pending: Vec::new(),
        })
    }

    /// Ring overflows since the stream started.
    pub fn overflow_count(&self) -> usize {
        self.overflow_count.load(Ordering::Relaxed)
    }
}

impl SampleSource for CpalSource {
    fn read(&mut self, dst: &mut [i32], timeout: Duration) -> Result<usize, AudioError> {
        if let Ok(fault) = self.error_rx.try_recv() {
            return Err(fault);
        }

        let deadline = Instant::now() + timeout;
        let mut filled = 0;

        while filled < dst.len() {
            if !self.pending.is_empty() {
                let take = (dst.len() - filled).min(self.pending.len());
                dst[filled..filled + take].copy_from_slice(&self.pending[..take]);
                self.pending.drain(..take);
                filled += take;
                continue;
            }
            match self.ring.pop() {
                Some(chunk) => self.pending = chunk,
                None => {
                    if Instant::now() >= deadline {
                        break;
                    }
                    thread::sleep(Duration::from_millis(1));
                }
            }
        }

        Ok(filled)
    }

    fn native_16bit(&self) -> bool {
        true
    }
}

impl Drop for CpalSource {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

/// Pulls fixed-size blocks from a [`SampleSource`].
pub struct AudioCapture {
    source: Box<dyn SampleSource>,
    block: Vec<i32>,
}

impl AudioCapture {
    pub fn new(source: Box<dyn SampleSource>, buffer_size: u16) -> Result<Self, AudioError> {
        let mut block = Vec::new();
        block
            .try_reserve_exact(buffer_size as usize)
            .map_err(|_| AudioError::BufferAlloc(buffer_size as usize))?;
        block.resize(buffer_size as usize, 0);
        Ok(Self { source, block })
    }

    /// Read up to one block. `Ok(empty)` means the timeout elapsed with no
    /// samples available, which is not an error.
    pub fn read_block(&mut self, timeout: Duration) -> Result<&[i32], AudioError> {
        let n = self.source.read(&mut self.block, timeout)?;
        Ok(&self.block[..n])
    }

    pub fn native_16bit(&self) -> bool {
        self.source.native_16bit()
    }
}
