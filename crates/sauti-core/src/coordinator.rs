//! Per-session streaming generation coordinator.
//!
//! Drives one session through its lifecycle: validate the request, pick a
//! device, hold the device's pending-work guard for the whole session, drain
//! the worker's chunk stream through the flush policy, and close delivery so
//! that every produced sample reaches the caller exactly once.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::DispatchConfig;
use crate::device::DeviceRegistry;
use crate::engine::EngineRequest;
use crate::error::{Error, Result};
use crate::health::HealthManager;
use crate::scheduler::Scheduler;
use crate::types::{
    AudioChunk, DeviceId, GenerationRequest, ProgressEvent, SessionState, MAX_SPEAKERS,
};
use crate::voice::VoiceResolver;
use crate::worker::Worker;

/// Coordinates one generation session from request to terminal state.
pub struct StreamingCoordinator {
    config: DispatchConfig,
    registry: Arc<DeviceRegistry>,
    scheduler: Scheduler,
    health: Arc<HealthManager>,
    workers: BTreeMap<DeviceId, Arc<Worker>>,
    voices: Arc<dyn VoiceResolver>,
}

impl StreamingCoordinator {
    pub fn new(
        config: DispatchConfig,
        registry: Arc<DeviceRegistry>,
        scheduler: Scheduler,
        health: Arc<HealthManager>,
        workers: BTreeMap<DeviceId, Arc<Worker>>,
        voices: Arc<dyn VoiceResolver>,
    ) -> Self {
        Self {
            config,
            registry,
            scheduler,
            health,
            workers,
            voices,
        }
    }

    /// Run one session to a terminal state, emitting progress events along
    /// the way. Cancelling `cancel` stops the session; a dropped event
    /// receiver is treated the same way.
    pub async fn run_session(
        &self,
        request: GenerationRequest,
        cancel: CancellationToken,
        events: mpsc::Sender<ProgressEvent>,
    ) -> SessionState {
        let session = request.id.clone();
        match self.drive(request, &cancel, &events).await {
            Ok(state) => {
                info!(session = %session, state = ?state, "session finished");
                state
            }
            Err(Error::Stopped) => {
                info!(session = %session, "session stopped");
                let _ = events
                    .send(ProgressEvent::status("generation stopped by caller"))
                    .await;
                SessionState::Stopped
            }
            Err(err) => {
                warn!(session = %session, error = %err, "session failed");
                let _ = events.send(ProgressEvent::from_error(&err)).await;
                SessionState::Failed
            }
        }
    }

    async fn drive(
        &self,
        request: GenerationRequest,
        cancel: &CancellationToken,
        events: &mpsc::Sender<ProgressEvent>,
    ) -> Result<SessionState> {
        // VALIDATING: reject before any device resource is touched.
        let engine_request = self.validate(&request)?;

        // QUEUED: pick a device and claim a pending-work slot. The guard
        // lives until this function returns, so the counter is restored on
        // every exit path.
        let device = self.scheduler.select_best().await?;
        let _work = self
            .registry
            .begin_work(device)
            .ok_or_else(|| Error::NoDeviceAvailable(format!("device {device} disappeared")))?;
        let worker = self
            .workers
            .get(&device)
            .ok_or_else(|| Error::NoDeviceAvailable(format!("no worker for device {device}")))?;

        info!(session = %request.id, device, "session dispatched");
        let _ = events
            .send(ProgressEvent::status(format!(
                "generating on device {device}"
            )))
            .await;

        // First cancellation check, before the engine is started.
        if cancel.is_cancelled() {
            return Err(Error::Stopped);
        }

        // STREAMING
        let (mut rx, handle) = worker.generate(engine_request, cancel.clone());

        // Brief grace so an immediate stop never races engine startup.
        tokio::time::sleep(self.config.startup_grace()).await;
        if cancel.is_cancelled() {
            return self.shutdown_stream(rx, handle, cancel).await;
        }

        let mut flusher = FlushPolicy::new(&self.config, Instant::now());
        let mut received_chunks = 0usize;
        let mut stopped = false;

        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => {
                    stopped = true;
                    break;
                }
                chunk = rx.recv() => chunk,
            };
            let Some(chunk) = chunk else {
                break;
            };
            if cancel.is_cancelled() {
                stopped = true;
                break;
            }

            received_chunks += 1;
            flusher.push(&chunk.samples);

            if let Some(flush) = flusher.take_ready(Instant::now()) {
                let event = ProgressEvent::PartialAudio {
                    samples: flush.samples,
                    sample_rate: self.config.sample_rate,
                    cumulative_secs: flush.cumulative_secs,
                };
                if events.send(event).await.is_err() {
                    // Caller went away; treat it as a stop.
                    cancel.cancel();
                    stopped = true;
                    break;
                }
            }
        }

        if stopped {
            return self.shutdown_stream(rx, handle, cancel).await;
        }

        // FINALIZING: the chunk stream ended naturally; wait for the decode
        // loop to release its buffers.
        drop(rx);
        if let Err(err) = self.join_generation(handle, cancel).await {
            let message = err.to_string();
            self.health.handle_fault(device, &message).await;
            return Err(Error::DeviceFault { device, message });
        }

        if received_chunks == 0 {
            return Err(Error::NoAudioProduced);
        }

        let total_secs = flusher.received_secs();
        let remainder = flusher.take_remainder();
        let _ = events
            .send(ProgressEvent::FinalAudio {
                samples: remainder,
                sample_rate: self.config.sample_rate,
            })
            .await;
        let _ = events
            .send(ProgressEvent::status(format!(
                "done: {total_secs:.1}s of audio in {received_chunks} chunks"
            )))
            .await;

        Ok(SessionState::Done)
    }

    /// Stop path: drop the chunk receiver to force-end the stream, then wait
    /// out the decode loop. Engine errors during a stop are logged, not
    /// surfaced; the stop outcome wins.
    async fn shutdown_stream(
        &self,
        rx: mpsc::Receiver<AudioChunk>,
        handle: JoinHandle<Result<()>>,
        cancel: &CancellationToken,
    ) -> Result<SessionState> {
        drop(rx);
        if let Err(err) = self.join_generation(handle, cancel).await {
            warn!(error = %err, "engine error during stop");
        }
        Err(Error::Stopped)
    }

    /// Join the decode task within the configured timeout. On timeout,
    /// force-end it via cancellation and wait once more; if it still will
    /// not finish, abandon it rather than wedging the session.
    async fn join_generation(
        &self,
        mut handle: JoinHandle<Result<()>>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let timeout = self.config.join_timeout();
        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(join) => flatten_join(join),
            Err(_) => {
                warn!("decode task slow to finish; forcing end");
                cancel.cancel();
                match tokio::time::timeout(timeout, &mut handle).await {
                    Ok(join) => flatten_join(join),
                    Err(_) => {
                        warn!("decode task unresponsive; abandoning join");
                        handle.abort();
                        Ok(())
                    }
                }
            }
        }
    }

    /// Resolve the request into an engine-ready form, or reject it.
    fn validate(&self, request: &GenerationRequest) -> Result<EngineRequest> {
        let script = request.script.trim();
        if script.is_empty() {
            return Err(Error::Validation("script is empty".to_string()));
        }
        if request.speaker_count == 0 || request.speaker_count > MAX_SPEAKERS {
            return Err(Error::Validation(format!(
                "speaker count must be between 1 and {MAX_SPEAKERS}, got {}",
                request.speaker_count
            )));
        }
        if request.voice_ids.len() < request.speaker_count {
            return Err(Error::Validation(format!(
                "{} speakers requested but only {} voices given",
                request.speaker_count,
                request.voice_ids.len()
            )));
        }

        let mut voices = Vec::with_capacity(request.speaker_count);
        for name in request.voice_ids.iter().take(request.speaker_count) {
            voices.push(self.voices.resolve(name)?);
        }

        Ok(EngineRequest {
            script: format_script(script, request.speaker_count),
            voices,
            guidance_scale: request.guidance_scale,
        })
    }
}

fn flatten_join(join: std::result::Result<Result<()>, tokio::task::JoinError>) -> Result<()> {
    match join {
        Ok(result) => result,
        Err(err) if err.is_cancelled() => Ok(()),
        Err(err) => Err(Error::Engine(format!("decode task panicked: {err}"))),
    }
}

/// Normalize a script for the engine: straighten curly apostrophes and give
/// every line a `Speaker N:` prefix, rotating across speaker slots for lines
/// that lack one.
pub fn format_script(script: &str, speaker_count: usize) -> String {
    let mut lines = Vec::new();
    let mut unprefixed = 0usize;
    for raw in script.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        let line = line.replace('\u{2019}', "'");
        if has_speaker_prefix(&line) {
            lines.push(line);
        } else {
            let speaker = unprefixed % speaker_count + 1;
            unprefixed += 1;
            lines.push(format!("Speaker {speaker}: {line}"));
        }
    }
    lines.join("\n")
}

fn has_speaker_prefix(line: &str) -> bool {
    let Some(rest) = line.strip_prefix("Speaker ") else {
        return false;
    };
    let Some((number, _)) = rest.split_once(':') else {
        return false;
    };
    let number = number.trim();
    !number.is_empty() && number.chars().all(|c| c.is_ascii_digit())
}

/// Buffers incoming samples and decides when to flush a partial-audio event.
///
/// The first flush waits for a minimum buffered duration so playback starts
/// with enough runway; after that, a flush goes out whenever the buffer
/// refills to the minimum or the flush interval has elapsed, whichever comes
/// first. Pure over the passed-in clock so the policy is testable directly.
pub struct FlushPolicy {
    min_samples: usize,
    interval: Duration,
    sample_rate: u32,
    pending: Vec<f32>,
    received_samples: usize,
    has_flushed: bool,
    last_flush: Instant,
}

/// One flush decided by [`FlushPolicy::take_ready`].
pub struct FlushReady {
    pub samples: Vec<f32>,
    /// Total audio received for the session so far, in seconds
    pub cumulative_secs: f32,
}

impl FlushPolicy {
    pub fn new(config: &DispatchConfig, now: Instant) -> Self {
        Self {
            min_samples: config.flush_min_samples(),
            interval: config.flush_interval(),
            sample_rate: config.sample_rate,
            pending: Vec::new(),
            received_samples: 0,
            has_flushed: false,
            last_flush: now,
        }
    }

    pub fn push(&mut self, samples: &[f32]) {
        self.pending.extend_from_slice(samples);
        self.received_samples += samples.len();
    }

    /// Take the buffered samples if the policy says it is time to flush.
    pub fn take_ready(&mut self, now: Instant) -> Option<FlushReady> {
        if self.pending.is_empty() {
            return None;
        }
        let size_ready = self.pending.len() >= self.min_samples;
        let time_ready =
            self.has_flushed && now.duration_since(self.last_flush) >= self.interval;
        if !size_ready && !time_ready {
            return None;
        }

        self.has_flushed = true;
        self.last_flush = now;
        Some(FlushReady {
            samples: std::mem::take(&mut self.pending),
            cumulative_secs: self.received_secs(),
        })
    }

    /// Take whatever is still buffered, flushed or not.
    pub fn take_remainder(&mut self) -> Vec<f32> {
        std::mem::take(&mut self.pending)
    }

    /// Total received audio duration in seconds.
    pub fn received_secs(&self) -> f32 {
        self.received_samples as f32 / self.sample_rate as f32
    }
}
