//! # RTSP Mic
//!
//! Firmware-style network-attached microphone: captures audio from the
//! hardware sampling interface, conditions it, and serves it to a single
//! RTSP client as live big-endian PCM, while supervising its own health
//! (packet-rate collapse, overheating, degraded capture) without operator
//! intervention.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                      Cooperative loop (micd)                     │
//! │                                                                  │
//! │  ┌──────────┐   ┌───────────────┐   ┌────────────┐   ┌────────┐  │
//! │  │ Sample   │   │ Signal        │   │ Stream     │   │ RTSP   │  │
//! │  │ Source   ├──►│ Conditioner   ├──►│ Packetizer ├──►│ Client │  │
//! │  │ (hw/i2s) │   │ shift·hpf·gain│   │ $-framing  │   │ (TCP)  │  │
//! │  └──────────┘   └───────────────┘   └────────────┘   └────────┘  │
//! │        ▲                │                                  ▲     │
//! │        │ restart        │ metering                         │     │
//! │  ┌─────┴────────┐  ┌────▼──────┐   ┌──────────────┐  ┌─────┴───┐ │
//! │  │ Reliability  │  │  Status / │   │ ThermalGuard │  │ Session │ │
//! │  │ Supervisor   │  │  EventLog │   │ (latching)   │  │ Machine │ │
//! │  └──────────────┘  └───────────┘   └──────┬───────┘  └─────────┘ │
//! │                                           │ serving off          │
//! │  ┌─────────────┐   ┌──────────────┐       │                      │
//! │  │ ConfigStore ◄───┤ PowerManager │◄──────┘                      │
//! │  │ (persisted) │   └──────────────┘                              │
//! │  └─────────────┘                                                 │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! All runtime parameters live in a single [`store::ConfigStore`]; every
//! mutation goes through its validated setters, which persist accepted
//! values and report whether the capture pipeline must be rebuilt.

pub mod audio;
pub mod config;
pub mod error;
pub mod power;
pub mod reboot;
pub mod rtsp;
pub mod status;
pub mod store;
pub mod supervisor;
pub mod thermal;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Default RTSP listen port
    pub const RTSP_PORT: u16 = 8554;

    /// Stream path presented in the session description
    pub const RTSP_PATH: &str = "/audio";

    /// Default sample rate for capture (Hz)
    pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

    /// Default capture block size in samples
    pub const DEFAULT_BUFFER_SIZE: u16 = 1024;

    /// Capacity of the protocol parse buffer in bytes
    pub const PARSE_BUFFER_CAP: usize = 1024;

    /// Idle session teardown deadline in seconds
    pub const SESSION_TIMEOUT_SECS: u64 = 30;

    /// RTP packet header length (version/flags through SSRC)
    pub const RTP_HEADER_LEN: usize = 12;

    /// Interleaved frame marker byte (`$`)
    pub const FRAME_MARKER: u8 = 0x24;

    /// RTP dynamic payload type announced for L16 PCM
    pub const PCM_PAYLOAD_TYPE: u8 = 96;

    /// Peak-hold decay window in milliseconds
    pub const PEAK_HOLD_MS: u64 = 3000;

    /// Hardware read timeout per capture iteration in milliseconds
    pub const CAPTURE_TIMEOUT_MS: u64 = 50;

    /// Minimum elapsed measurement window before a throughput check (ms)
    pub const MEASUREMENT_WINDOW_MS: u64 = 30_000;

    /// Capacity of the in-memory event log
    pub const EVENT_LOG_CAP: usize = 80;

    /// Process exit code signalling "restart me" to the supervisor
    pub const RESTART_EXIT_CODE: i32 = 86;

    /// Capture ring buffer capacity (in hardware chunks)
    pub const RING_BUFFER_CAPACITY: usize = 64;
}
