//! RTSP session subsystem
//!
//! A single-client request/response state machine over TCP, plus the
//! binary packetizer that frames conditioned audio blocks onto the same
//! byte stream as interleaved RTP.

pub mod buffer;
pub mod packet;
pub mod server;
pub mod session;

pub use buffer::RequestBuffer;
pub use packet::StreamPacketizer;
pub use server::RtspServer;
pub use session::{SessionMachine, SessionPhase};
