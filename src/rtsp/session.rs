//! RTSP session state machine
//!
//! One session at a time, negotiated over newline-terminated text requests
//! and driven through IDLE → READY → PLAYING. The machine is transport
//! agnostic: it consumes request text and produces reply text, leaving
//! socket handling to the server.

use std::time::{Duration, Instant};

use rand::Rng;

use crate::config::AudioConfig;
use crate::constants::{PCM_PAYLOAD_TYPE, SESSION_TIMEOUT_SECS};

/// Protocol phase of the (single) session slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No session
    Idle,
    /// Session created by SETUP, not yet streaming
    Ready,
    /// Actively streaming media frames
    Playing,
}

/// What a handled request asks the server to do beyond replying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    None,
    /// PLAY accepted: reset packetizer counters and the throughput window
    StartPlaying,
    /// TEARDOWN (or timeout/disconnect): stop streaming
    Stopped,
}

pub struct SessionMachine {
    phase: SessionPhase,
    session_id: Option<String>,
    last_activity: Instant,
    play_count: u32,
    last_play: Option<Instant>,
    /// Address advertised in the session description
    local_addr: String,
}

impl SessionMachine {
    pub fn new(local_addr: String, now: Instant) -> Self {
        Self {
            phase: SessionPhase::Idle,
            session_id: None,
            last_activity: now,
            play_count: 0,
            last_play: None,
            local_addr,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn is_playing(&self) -> bool {
        self.phase == SessionPhase::Playing
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn play_count(&self) -> u32 {
        self.play_count
    }

    pub fn last_play(&self) -> Option<Instant> {
        self.last_play
    }

    /// Handle one complete request header. Returns the reply (if any) and
    /// the action the server must take. Unknown verbs are ignored without
    /// reply or transition.
    pub fn handle_request(
        &mut self,
        text: &str,
        cfg: &AudioConfig,
        now: Instant,
    ) -> (Option<String>, SessionEvent) {
        self.last_activity = now;

        let verb = text.split_whitespace().next().unwrap_or("");
        let cseq = parse_cseq(text);

        match verb {
            "OPTIONS" => (
                Some(reply(
                    cseq,
                    &[(
                        "Public",
                        "OPTIONS, DESCRIBE, SETUP, PLAY, TEARDOWN, GET_PARAMETER",
                    )],
                    None,
                )),
                SessionEvent::None,
            ),
            "DESCRIBE" => {
                let sdp = self.describe_body(cfg);
                let content_base = format!("rtsp://{}/audio/", self.local_addr);
                (
                    Some(reply(
                        cseq,
                        &[
                            ("Content-Base", &content_base),
                            ("Content-Type", "application/sdp"),
                            ("Content-Length", &sdp.len().to_string()),
                        ],
                        Some(&sdp),
                    )),
                    SessionEvent::None,
                )
            }
            "SETUP" => {
                let id = format!("{:08X}", rand::thread_rng().gen::<u32>());
                tracing::info!("Session {} created", id);
                self.session_id = Some(id.clone());
                self.phase = SessionPhase::Ready;
                (
                    Some(reply(
                        cseq,
                        &[
                            ("Transport", "RTP/AVP/TCP;unicast;interleaved=0-1"),
                            ("Session", &id),
                        ],
                        None,
                    )),
                    SessionEvent::None,
                )
            }
            "PLAY" => {
                let Some(id) = self.session_id.clone() else {
                    // PLAY without a prior SETUP has nothing to start
                    return (None, SessionEvent::None);
                };
                self.phase = SessionPhase::Playing;
                self.play_count += 1;
                self.last_play = Some(now);
                tracing::info!("Session {} playing", id);
                (
                    Some(reply(cseq, &[("Session", &id)], None)),
                    SessionEvent::StartPlaying,
                )
            }
            "TEARDOWN" => {
                let id = self.session_id.take().unwrap_or_default();
                let was_active = self.phase != SessionPhase::Idle;
                self.phase = SessionPhase::Idle;
                if was_active {
                    tracing::info!("Session {} torn down", id);
                }
                let mut headers: Vec<(&str, &str)> = Vec::new();
                if !id.is_empty() {
                    headers.push(("Session", &id));
                }
                (
                    Some(reply(cseq, &headers, None)),
                    if was_active {
                        SessionEvent::Stopped
                    } else {
                        SessionEvent::None
                    },
                )
            }
            // Keep-alive: acknowledged only, refreshes last-activity
            "GET_PARAMETER" => (Some(reply(cseq, &[], None)), SessionEvent::None),
            _ => (None, SessionEvent::None),
        }
    }

    /// Tear down an idle session once no request has arrived for the
    /// timeout window. Returns true when a teardown happened.
    pub fn check_timeout(&mut self, now: Instant) -> bool {
        if self.phase == SessionPhase::Idle {
            return false;
        }
        if now.duration_since(self.last_activity) >= Duration::from_secs(SESSION_TIMEOUT_SECS) {
            tracing::warn!(
                "Session {} timed out after {}s of inactivity",
                self.session_id.as_deref().unwrap_or("?"),
                SESSION_TIMEOUT_SECS
            );
            self.session_id = None;
            self.phase = SessionPhase::Idle;
            return true;
        }
        false
    }

    /// The transport dropped: force IDLE regardless of protocol state.
    pub fn on_disconnect(&mut self) {
        if self.phase != SessionPhase::Idle {
            tracing::info!(
                "Client disconnected, session {} closed",
                self.session_id.as_deref().unwrap_or("?")
            );
        }
        self.session_id = None;
        self.phase = SessionPhase::Idle;
    }

    fn describe_body(&self, cfg: &AudioConfig) -> String {
        format!(
            "v=0\r\n\
             o=- 0 1 IN IP4 {addr}\r\n\
             s=RTSP Mic\r\n\
             c=IN IP4 0.0.0.0\r\n\
             t=0 0\r\n\
             m=audio 0 RTP/AVP/TCP {pt}\r\n\
             a=rtpmap:{pt} L16/{rate}/1\r\n\
             a=control:track0\r\n",
            addr = self.local_addr,
            pt = PCM_PAYLOAD_TYPE,
            rate = cfg.sample_rate,
        )
    }
}

/// Correlation token from the request header; absent → 0.
fn parse_cseq(text: &str) -> u32 {
    text.lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            if name.trim().eq_ignore_ascii_case("cseq") {
                value.trim().parse().ok()
            } else {
                None
            }
        })
        .unwrap_or(0)
}

fn reply(cseq: u32, headers: &[(&str, &str)], body: Option<&str>) -> String {
    let mut out = format!("RTSP/1.0 200 OK\r\nCSeq: {}\r\n", cseq);
    for (name, value) in headers {
        out.push_str(name);
        out.push_str(": ");
        out.push_str(value);
        out.push_str("\r\n");
    }
    out.push_str("\r\n");
    if let Some(body) = body {
        out.push_str(body);
    }
    out
}
