//! Shared fixtures for in-crate tests: mock device backends, scripted
//! engines, and pre-wired coordinator/dispatcher setups.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::DispatchConfig;
use crate::coordinator::StreamingCoordinator;
use crate::device::{DeviceRegistry, DeviceStatus};
use crate::dispatcher::{DeviceSetup, Dispatcher};
use crate::engine::{
    DecodeStream, DeviceBackend, EngineRequest, GenerationEngine, MemoryReading,
};
use crate::error::{Error, Result};
use crate::health::HealthManager;
use crate::scheduler::Scheduler;
use crate::types::{DeviceId, GenerationRequest, ProgressEvent, SessionState};
use crate::voice::{StaticVoiceResolver, VoiceResolver, VoiceSample};
use crate::worker::Worker;

/// Config with every timing knob shrunk so tests finish in milliseconds.
/// Sample rate 10 keeps flush thresholds tiny: one "second" is ten samples.
pub(crate) fn test_config() -> DispatchConfig {
    DispatchConfig {
        refresh_interval_secs: 0.05,
        error_backoff_secs: 0.05,
        probe_timeout_secs: 0.5,
        recovery_delay_secs: 0.05,
        startup_grace_secs: 0.01,
        join_timeout_secs: 0.5,
        sample_rate: 10,
        ..DispatchConfig::default()
    }
}

fn test_voices() -> Arc<dyn VoiceResolver> {
    Arc::new(StaticVoiceResolver::new(vec![VoiceSample {
        name: "alice".into(),
        samples: vec![0.0; 10],
        sample_rate: 10,
    }]))
}

/// Device backend with togglable health, optional hangs, and call counters.
pub(crate) struct MockBackend {
    used_gb: f64,
    total_gb: f64,
    utilization: f64,
    healthy: AtomicBool,
    memory_delay: Mutex<Duration>,
    liveness_calls: AtomicUsize,
    clear_cache_calls: AtomicUsize,
}

impl MockBackend {
    pub(crate) fn new(used_gb: f64, total_gb: f64, utilization: f64) -> Self {
        Self {
            used_gb,
            total_gb,
            utilization,
            healthy: AtomicBool::new(true),
            memory_delay: Mutex::new(Duration::ZERO),
            liveness_calls: AtomicUsize::new(0),
            clear_cache_calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Make every memory reading block for `delay` before returning.
    pub(crate) fn set_memory_delay(&self, delay: Duration) {
        *self.memory_delay.lock().unwrap() = delay;
    }

    pub(crate) fn liveness_calls(&self) -> usize {
        self.liveness_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn clear_cache_calls(&self) -> usize {
        self.clear_cache_calls.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::Probe("backend offline".to_string()))
        }
    }
}

impl DeviceBackend for MockBackend {
    fn memory_reading(&self) -> Result<MemoryReading> {
        let delay = *self.memory_delay.lock().unwrap();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        self.check()?;
        Ok(MemoryReading {
            used_gb: self.used_gb,
            total_gb: self.total_gb,
        })
    }

    fn utilization_probe(&self) -> Result<f64> {
        self.check()?;
        Ok(self.utilization)
    }

    fn liveness_probe(&self) -> Result<()> {
        self.liveness_calls.fetch_add(1, Ordering::SeqCst);
        self.check()
    }

    fn clear_cache(&self) {
        self.clear_cache_calls.fetch_add(1, Ordering::SeqCst);
    }
}

/// Engine that plays back a fixed number of silent chunks, optionally
/// slowly, optionally failing partway through.
pub(crate) struct ScriptedEngine {
    chunk_count: usize,
    chunk_samples: usize,
    delay: Option<Duration>,
    fail_after: Option<usize>,
    fail_message: String,
    emitted: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
}

impl ScriptedEngine {
    pub(crate) fn with_chunks(chunk_count: usize, chunk_samples: usize) -> Self {
        Self {
            chunk_count,
            chunk_samples,
            delay: None,
            fail_after: None,
            fail_message: String::new(),
            emitted: Arc::new(AtomicUsize::new(0)),
            released: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn slow(chunk_count: usize, chunk_samples: usize, delay_ms: u64) -> Self {
        Self {
            delay: Some(Duration::from_millis(delay_ms)),
            ..Self::with_chunks(chunk_count, chunk_samples)
        }
    }

    pub(crate) fn failing_after(chunks: usize, message: &str) -> Self {
        Self {
            fail_after: Some(chunks),
            fail_message: message.to_string(),
            ..Self::with_chunks(usize::MAX, 10)
        }
    }

    pub(crate) fn chunks_emitted(&self) -> usize {
        self.emitted.load(Ordering::SeqCst)
    }

    pub(crate) fn release_calls(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

impl GenerationEngine for ScriptedEngine {
    fn begin(&self, _request: EngineRequest) -> Result<Box<dyn DecodeStream>> {
        Ok(Box::new(ScriptedStream {
            remaining: self.chunk_count,
            chunk_samples: self.chunk_samples,
            delay: self.delay,
            fail_after: self.fail_after,
            fail_message: self.fail_message.clone(),
            produced: 0,
            emitted: Arc::clone(&self.emitted),
            released: Arc::clone(&self.released),
        }))
    }
}

struct ScriptedStream {
    remaining: usize,
    chunk_samples: usize,
    delay: Option<Duration>,
    fail_after: Option<usize>,
    fail_message: String,
    produced: usize,
    emitted: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
}

impl DecodeStream for ScriptedStream {
    fn next_chunk(&mut self) -> Result<Option<Vec<f32>>> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if let Some(limit) = self.fail_after {
            if self.produced >= limit {
                return Err(Error::Engine(self.fail_message.clone()));
            }
        }
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;
        self.produced += 1;
        self.emitted.fetch_add(1, Ordering::SeqCst);
        Ok(Some(vec![0.0; self.chunk_samples]))
    }

    fn release(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Knobs for the single-device coordinator harness.
pub(crate) struct HarnessOptions {
    pub(crate) chunk_count: usize,
    pub(crate) chunk_samples: usize,
    pub(crate) chunk_delay_ms: u64,
    pub(crate) fail_after: Option<usize>,
    pub(crate) fail_message: &'static str,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            chunk_count: 5,
            chunk_samples: 10,
            chunk_delay_ms: 0,
            fail_after: None,
            fail_message: "engine failure",
        }
    }
}

/// Coordinator wired over one mock device, with the backend and a scheduler
/// over the same pool exposed for assertions.
pub(crate) struct TestHarness {
    pub(crate) registry: Arc<DeviceRegistry>,
    pub(crate) backend: Arc<MockBackend>,
    pub(crate) scheduler: Scheduler,
    coordinator: StreamingCoordinator,
}

impl TestHarness {
    pub(crate) async fn run(
        &self,
        request: GenerationRequest,
    ) -> (SessionState, Vec<ProgressEvent>) {
        self.run_with_cancel(request, CancellationToken::new()).await
    }

    pub(crate) async fn run_with_cancel(
        &self,
        request: GenerationRequest,
        cancel: CancellationToken,
    ) -> (SessionState, Vec<ProgressEvent>) {
        let (tx, mut rx) = mpsc::channel(64);
        let collector = tokio::spawn(async move {
            let mut events = Vec::new();
            while let Some(event) = rx.recv().await {
                events.push(event);
            }
            events
        });

        let state = self.coordinator.run_session(request, cancel, tx).await;
        let events = collector.await.expect("event collector");
        (state, events)
    }
}

pub(crate) fn test_harness(options: HarnessOptions) -> TestHarness {
    let config = test_config();

    let engine = if let Some(after) = options.fail_after {
        ScriptedEngine::failing_after(after, options.fail_message)
    } else if options.chunk_delay_ms > 0 {
        ScriptedEngine::slow(
            options.chunk_count,
            options.chunk_samples,
            options.chunk_delay_ms,
        )
    } else {
        ScriptedEngine::with_chunks(options.chunk_count, options.chunk_samples)
    };

    let registry = Arc::new(DeviceRegistry::new(vec![DeviceStatus::new(0, "dev-0", 24.0)]));
    let backend = Arc::new(MockBackend::new(2.0, 24.0, 10.0));
    let mut backends: BTreeMap<DeviceId, Arc<dyn DeviceBackend>> = BTreeMap::new();
    backends.insert(0, backend.clone());

    let health = Arc::new(HealthManager::new(
        registry.clone(),
        backends,
        config.clone(),
        CancellationToken::new(),
    ));
    let scheduler = Scheduler::new(registry.clone(), health.clone(), config.clone());

    let mut workers: BTreeMap<DeviceId, Arc<Worker>> = BTreeMap::new();
    workers.insert(
        0,
        Arc::new(Worker::new(
            0,
            Arc::new(engine),
            config.sample_rate,
            config.chunk_channel_capacity,
        )),
    );

    let coordinator = StreamingCoordinator::new(
        config.clone(),
        registry.clone(),
        scheduler,
        health.clone(),
        workers,
        test_voices(),
    );

    TestHarness {
        registry: registry.clone(),
        backend,
        scheduler: Scheduler::new(registry, health, config),
        coordinator,
    }
}

/// Knobs for a full dispatcher over mock devices.
pub(crate) struct DispatcherOptions {
    pub(crate) backends: Vec<Arc<MockBackend>>,
    pub(crate) engine: Arc<ScriptedEngine>,
    pub(crate) voices: Option<Arc<dyn VoiceResolver>>,
}

impl Default for DispatcherOptions {
    fn default() -> Self {
        Self {
            backends: vec![Arc::new(MockBackend::new(2.0, 24.0, 10.0))],
            engine: Arc::new(ScriptedEngine::with_chunks(5, 10)),
            voices: None,
        }
    }
}

pub(crate) fn test_dispatcher(options: DispatcherOptions) -> Dispatcher {
    let voices = options.voices.unwrap_or_else(test_voices);
    let devices = options
        .backends
        .into_iter()
        .enumerate()
        .map(|(index, backend)| DeviceSetup {
            id: index as DeviceId,
            name: format!("dev-{index}"),
            backend,
            engine: options.engine.clone(),
        })
        .collect();

    Dispatcher::new(test_config(), devices, voices).expect("test dispatcher")
}
