//! RTSP server: listener, single client connection, streaming step
//!
//! The server is polled from the cooperative loop. Each poll accepts at
//! most one pending client, reads whatever request bytes are available
//! within a small bounded timeout, drives the session machine, and tears
//! down idle sessions. While the session is PLAYING the loop feeds
//! conditioned blocks through [`RtspServer::stream_block`].

use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::config::AudioConfig;
use crate::constants::PARSE_BUFFER_CAP;
use crate::error::SessionError;
use crate::rtsp::buffer::RequestBuffer;
use crate::rtsp::packet::StreamPacketizer;
use crate::rtsp::session::{SessionEvent, SessionMachine, SessionPhase};
use crate::status::EventLog;

/// How long a single poll waits for request bytes
const READ_SLICE_MS: u64 = 2;

/// Packets-sent counter over the current measurement window.
#[derive(Debug, Clone, Copy)]
pub struct StreamStats {
    pub packets_sent: u32,
    pub window_started: Instant,
}

impl StreamStats {
    fn new(now: Instant) -> Self {
        Self {
            packets_sent: 0,
            window_started: now,
        }
    }

    pub fn reset(&mut self, now: Instant) {
        self.packets_sent = 0;
        self.window_started = now;
    }

    /// Observed packets/sec over the window, zero while it is too fresh
    /// to be meaningful.
    pub fn rate_pkt_s(&self, now: Instant) -> u32 {
        let elapsed_ms = now.duration_since(self.window_started).as_millis() as u64;
        if elapsed_ms < 1000 {
            return 0;
        }
        (self.packets_sent as u64 * 1000 / elapsed_ms) as u32
    }
}

/// One connected client: transport, parse buffer, session machine.
pub struct ClientSession<S> {
    transport: S,
    peer: String,
    parse_buf: RequestBuffer,
    session: SessionMachine,
    stats: StreamStats,
}

impl<S: AsyncRead + AsyncWrite + Unpin> ClientSession<S> {
    pub fn new(transport: S, peer: String, local_addr: String, now: Instant) -> Self {
        Self {
            transport,
            peer,
            parse_buf: RequestBuffer::new(PARSE_BUFFER_CAP),
            session: SessionMachine::new(local_addr, now),
            stats: StreamStats::new(now),
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn is_playing(&self) -> bool {
        self.session.is_playing()
    }

    pub fn phase(&self) -> SessionPhase {
        self.session.phase()
    }

    pub fn stats(&self) -> &StreamStats {
        &self.stats
    }

    pub fn reset_window(&mut self, now: Instant) {
        self.stats.reset(now);
    }

    pub fn play_count(&self) -> u32 {
        self.session.play_count()
    }

    pub fn last_play(&self) -> Option<Instant> {
        self.session.last_play()
    }

    /// One accept/parse/drive step: pull available bytes, handle complete
    /// requests, enforce the idle timeout. `Err` means the connection is
    /// gone and must be dropped.
    pub async fn service(
        &mut self,
        cfg: &AudioConfig,
        packetizer: &mut StreamPacketizer,
        events: &mut EventLog,
        now: Instant,
    ) -> Result<(), SessionError> {
        let mut chunk = [0u8; 512];
        match tokio::time::timeout(
            Duration::from_millis(READ_SLICE_MS),
            self.transport.read(&mut chunk),
        )
        .await
        {
            Err(_) => {} // nothing to read this slice
            Ok(Ok(0)) => {
                self.session.on_disconnect();
                events.push(format!("Client {} disconnected", self.peer));
                return Err(SessionError::Disconnected);
            }
            Ok(Ok(n)) => {
                if !self.parse_buf.append(&chunk[..n]) {
                    let overflow = SessionError::ParseOverflow(self.parse_buf.capacity());
                    tracing::warn!("{} (total discards {})", overflow, self.parse_buf.discard_count());
                    events.push("Oversized request discarded".to_string());
                }
            }
            Ok(Err(_)) => {
                self.session.on_disconnect();
                events.push(format!("Client {} connection lost", self.peer));
                return Err(SessionError::Disconnected);
            }
        }

        while let Some(request) = self.parse_buf.take_request() {
            let before = self.session.phase();
            let (reply, event) = self.session.handle_request(&request, cfg, now);

            match event {
                SessionEvent::StartPlaying => {
                    packetizer.reset();
                    self.stats.reset(now);
                    events.push(format!(
                        "Streaming started for session {}",
                        self.session.session_id().unwrap_or("?")
                    ));
                }
                SessionEvent::Stopped => {
                    events.push("Streaming stopped by client".to_string());
                }
                SessionEvent::None => {
                    if before != self.session.phase() {
                        events.push(format!("Session state: {:?}", self.session.phase()));
                    }
                }
            }

            if let Some(reply) = reply {
                self.write_all(reply.as_bytes()).await?;
            }
        }

        if self.session.check_timeout(now) {
            events.push("Idle session timed out".to_string());
            return Err(SessionError::Disconnected);
        }

        Ok(())
    }

    /// Frame and send one conditioned block. Any short write or transport
    /// error stops streaming (not a device fault).
    pub async fn stream_block(
        &mut self,
        samples: &[i16],
        packetizer: &mut StreamPacketizer,
    ) -> Result<(), SessionError> {
        let frame = packetizer.packetize(samples);
        self.write_all(&frame).await?;
        self.stats.packets_sent = self.stats.packets_sent.wrapping_add(1);
        Ok(())
    }

    async fn write_all(&mut self, bytes: &[u8]) -> Result<(), SessionError> {
        match self.transport.write_all(bytes).await {
            Ok(()) => {
                self.transport
                    .flush()
                    .await
                    .map_err(|_| SessionError::Disconnected)?;
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::WriteZero => {
                Err(SessionError::ShortWrite {
                    written: 0,
                    expected: bytes.len(),
                })
            }
            Err(_) => Err(SessionError::Disconnected),
        }
    }
}

/// The TCP-facing server wrapper polled from the main loop.
pub struct RtspServer {
    port: u16,
    listener: Option<TcpListener>,
    client: Option<ClientSession<TcpStream>>,
    packetizer: StreamPacketizer,
    last_connect: Option<Instant>,
}

impl RtspServer {
    pub fn new(port: u16, ssrc: u32) -> Self {
        Self {
            port,
            listener: None,
            client: None,
            packetizer: StreamPacketizer::new(ssrc),
            last_connect: None,
        }
    }

    pub fn is_playing(&self) -> bool {
        self.client.as_ref().map_or(false, |c| c.is_playing())
    }

    pub fn client_peer(&self) -> Option<String> {
        self.client.as_ref().map(|c| c.peer().to_string())
    }

    pub fn last_connect(&self) -> Option<Instant> {
        self.last_connect
    }

    pub fn play_count(&self) -> u32 {
        self.client.as_ref().map_or(0, |c| c.play_count())
    }

    pub fn last_play(&self) -> Option<Instant> {
        self.client.as_ref().and_then(|c| c.last_play())
    }

    pub fn stream_stats(&self) -> Option<StreamStats> {
        self.client.as_ref().map(|c| *c.stats())
    }

    pub fn reset_window(&mut self, now: Instant) {
        if let Some(client) = self.client.as_mut() {
            client.reset_window(now);
        }
    }

    /// Drop the listener and any client; used when serving is disabled or
    /// a thermal latch forces the stream off.
    pub fn shut_down(&mut self, events: &mut EventLog) {
        if self.listener.take().is_some() {
            events.push("RTSP server stopped".to_string());
            tracing::info!("RTSP server stopped");
        }
        if self.client.take().is_some() {
            events.push("Active session closed".to_string());
        }
    }

    /// One cooperative poll: bind/accept as needed, then service the
    /// connected client.
    pub async fn poll(
        &mut self,
        serving_enabled: bool,
        cfg: &AudioConfig,
        events: &mut EventLog,
        now: Instant,
    ) {
        if !serving_enabled {
            self.shut_down(events);
            return;
        }

        if self.listener.is_none() {
            match TcpListener::bind(("0.0.0.0", self.port)).await {
                Ok(listener) => {
                    tracing::info!("RTSP server listening on port {}", self.port);
                    events.push(format!("RTSP server started on port {}", self.port));
                    self.listener = Some(listener);
                }
                Err(e) => {
                    tracing::warn!("{}", SessionError::BindFailed(e.to_string()));
                    return;
                }
            }
        }

        if self.client.is_none() {
            if let Some(listener) = self.listener.as_ref() {
                if let Ok(Ok((stream, peer))) =
                    tokio::time::timeout(Duration::from_millis(1), listener.accept()).await
                {
                    let _ = stream.set_nodelay(true);
                    let local_addr = stream
                        .local_addr()
                        .map(|a| a.to_string())
                        .unwrap_or_else(|_| format!("0.0.0.0:{}", self.port));
                    tracing::info!("Client connected from {}", peer);
                    events.push(format!("Client connected: {}", peer));
                    self.last_connect = Some(now);
                    self.client = Some(ClientSession::new(
                        stream,
                        peer.to_string(),
                        local_addr,
                        now,
                    ));
                }
            }
        }

        let gone = match self.client.as_mut() {
            Some(client) => client
                .service(cfg, &mut self.packetizer, events, now)
                .await
                .is_err(),
            None => false,
        };
        if gone {
            self.client = None;
        }
    }

    /// Send one conditioned block to the playing client. A transport fault
    /// closes the connection and stops streaming; it is not escalated.
    pub async fn stream_block(&mut self, samples: &[i16], events: &mut EventLog) {
        let faulted = match self.client.as_mut() {
            Some(client) if client.is_playing() => {
                match client.stream_block(samples, &mut self.packetizer).await {
                    Ok(()) => None,
                    Err(e) => Some(e),
                }
            }
            _ => None,
        };
        if let Some(e) = faulted {
            tracing::warn!("Transport fault while streaming: {}", e);
            events.push(format!("Streaming stopped: {}", e));
            self.client = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_computation() {
        let t0 = Instant::now();
        let mut stats = StreamStats::new(t0);
        stats.packets_sent = 100;

        // Window too fresh: no rate yet
        assert_eq!(stats.rate_pkt_s(t0 + Duration::from_millis(500)), 0);
        // 100 packets over 2 s
        assert_eq!(stats.rate_pkt_s(t0 + Duration::from_secs(2)), 50);

        stats.reset(t0 + Duration::from_secs(2));
        assert_eq!(stats.packets_sent, 0);
    }
}
