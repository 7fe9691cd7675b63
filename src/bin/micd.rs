//! Network microphone daemon
//!
//! Single cooperative scheduling loop: polls the RTSP server, streams
//! conditioned audio while a session is playing, and runs the thermal,
//! reliability and power ticks on their own timers. The only background
//! task is the deferred-restart executor.

use anyhow::Result;
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rtsp_mic::{
    audio::{capture::SampleSource, CapturePipeline, CpalSource},
    config::AudioConfig,
    constants::{CAPTURE_TIMEOUT_MS, RTSP_PATH, RTSP_PORT},
    error::{AudioError, Error},
    power::{LoggingRadio, PowerManager},
    reboot::{RebootKind, RebootScheduler},
    rtsp::RtspServer,
    status::{AudioStatus, DeviceStatus, EventLog, ReliabilityStatus, ThermalStatus},
    supervisor::{ReliabilitySupervisor, SupervisorAction},
    thermal::{SysfsSensor, ThermalAction, ThermalGuard},
};

/// Delay between a restart request and the actual restart
const REBOOT_DELAY: Duration = Duration::from_millis(600);

/// Temperature sampling cadence
const TEMP_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Cadence of the periodic status log line
const STATUS_LOG_INTERVAL: Duration = Duration::from_secs(60);

fn source_factory(cfg: &AudioConfig) -> Result<Box<dyn SampleSource>, AudioError> {
    CpalSource::open(cfg).map(|s| Box::new(s) as Box<dyn SampleSource>)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting RTSP Mic");

    let settings_path = settings_path();
    let mut store = rtsp_mic::store::ConfigStore::load(&settings_path);
    let mut events = EventLog::new();
    events.push("Device booted");

    if store.thermal().latched_persist {
        tracing::warn!(
            "Persisted thermal latch active (last trip: {}): serving disabled until acknowledged",
            store
                .thermal()
                .last_trip_reason
                .as_deref()
                .unwrap_or("unknown")
        );
        events.push("Thermal latch active: serving disabled until acknowledged");
    }

    // Deferred-restart executor: the one background task
    let scheduler = RebootScheduler::new(settings_path.clone());
    tokio::spawn(scheduler.clone().run());

    // Session-source identifier, chosen randomly at boot
    let ssrc: u32 = rand::random();
    let mut server = RtspServer::new(RTSP_PORT, ssrc);
    tracing::info!("Stream URL: rtsp://<device-ip>:{}{}", RTSP_PORT, RTSP_PATH);

    let mut pipeline = match CapturePipeline::new(Box::new(source_factory), store.audio()) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            tracing::error!("Capture pipeline failed to start: {}", e);
            return Err(Error::Audio(e).into());
        }
    };

    let mut supervisor = ReliabilitySupervisor::new(Instant::now());
    let mut guard = ThermalGuard::new(
        Box::new(SysfsSensor::default_zone()),
        TEMP_CHECK_INTERVAL,
    );
    let mut power = PowerManager::new(Box::new(LoggingRadio));

    let mut last_status_log = Instant::now();

    tracing::info!("Entering main loop");
    loop {
        let now = Instant::now();

        // Thermal first: a trip must stop serving before anything streams
        if guard.tick(now, &mut store, &mut events) == ThermalAction::Trip {
            server.shut_down(&mut events);
        }

        if let Err(e) = power.apply(store.power()) {
            tracing::warn!("Power settings not applied: {}", e);
        }

        match supervisor.tick(
            now,
            store.reliability(),
            server.is_playing(),
            server.stream_stats(),
            &mut events,
        ) {
            SupervisorAction::RestartPipeline => {
                if let Err(e) = pipeline.restart(store.audio()) {
                    tracing::error!("Pipeline restart failed: {}", e);
                    events.push(format!("Pipeline restart failed: {}", e));
                    scheduler.request(RebootKind::Restart, REBOOT_DELAY, now);
                }
                server.reset_window(now);
            }
            SupervisorAction::ScheduleReboot => {
                scheduler.request(RebootKind::Restart, REBOOT_DELAY, now);
            }
            SupervisorAction::None => {}
        }

        server
            .poll(store.serving_enabled(), store.audio(), &mut events, now)
            .await;

        if server.is_playing() {
            match pipeline.next_block(
                store.audio(),
                Duration::from_millis(CAPTURE_TIMEOUT_MS),
                now,
            ) {
                Ok(Some(block)) => {
                    server.stream_block(block, &mut events).await;
                }
                Ok(None) => {} // hardware had nothing this iteration
                Err(e) if e.is_fatal() => {
                    tracing::error!("Fatal capture fault: {}, restarting device", e);
                    events.push(format!("Fatal capture fault: {}", e));
                    scheduler.request(RebootKind::Restart, Duration::ZERO, now);
                }
                Err(e) => {
                    tracing::warn!("Capture error: {}", e);
                }
            }
        } else {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        if now.duration_since(last_status_log) >= STATUS_LOG_INTERVAL {
            last_status_log = now;
            let device = DeviceStatus {
                uptime_secs: supervisor.uptime(now).as_secs(),
                serving_enabled: store.serving_enabled(),
                client: server.client_peer(),
                streaming: server.is_playing(),
                current_rate_pkt_s: server.stream_stats().map_or(0, |s| s.rate_pkt_s(now)),
                last_connect_secs_ago: server
                    .last_connect()
                    .map(|t| now.duration_since(t).as_secs()),
                last_play_secs_ago: server.last_play().map(|t| now.duration_since(t).as_secs()),
                play_count: server.play_count(),
                min_free_mem_kb: supervisor.min_free_mem_kb(),
                reboot_pending: scheduler.is_pending(),
            };
            let audio = AudioStatus::collect(store.audio(), pipeline.metering());
            let reliability = ReliabilityStatus::collect(store.reliability(), store.audio());
            let thermal = ThermalStatus::collect(store.thermal(), &guard);
            let radio = power.status(store.power());
            tracing::info!(
                "Status: up={}s streaming={} rate={}pkt/s (min {}) peak={:.1}dBFS clips={} temp={:?}C tx={:?}dBm mem_min={:?}kB",
                device.uptime_secs,
                device.streaming,
                device.current_rate_pkt_s,
                reliability.min_acceptable_rate,
                audio.peak_dbfs,
                audio.clip_count,
                thermal.current_c,
                radio.applied_tx_dbm,
                device.min_free_mem_kb,
            );
        }
    }
}

/// Settings location: `RTSP_MIC_SETTINGS` env override, else the
/// per-user config dir.
fn settings_path() -> std::path::PathBuf {
    std::env::var_os("RTSP_MIC_SETTINGS")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(rtsp_mic::store::ConfigStore::default_path)
}
