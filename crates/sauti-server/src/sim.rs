//! Simulated devices and engine for running the server without accelerator
//! hardware. Real deployments plug their own `DeviceBackend` and
//! `GenerationEngine` implementations into the dispatcher instead.

use std::f32::consts::TAU;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use sauti_core::{
    DecodeStream, DeviceBackend, EngineRequest, GenerationEngine, MemoryReading, Result,
    VoiceSample,
};

/// Backend with plausible, slowly moving readings and probes that always
/// pass.
pub struct SimBackend {
    total_gb: f64,
    base_used_gb: f64,
    base_utilization: f64,
    ticks: AtomicUsize,
}

impl SimBackend {
    pub fn new(total_gb: f64, base_used_gb: f64, base_utilization: f64) -> Self {
        Self {
            total_gb,
            base_used_gb,
            base_utilization,
            ticks: AtomicUsize::new(0),
        }
    }

    fn wobble(&self) -> f64 {
        // Small deterministic drift so consecutive readings differ.
        let tick = self.ticks.fetch_add(1, Ordering::Relaxed);
        ((tick % 7) as f64 - 3.0) * 0.1
    }
}

impl DeviceBackend for SimBackend {
    fn memory_reading(&self) -> Result<MemoryReading> {
        Ok(MemoryReading {
            used_gb: (self.base_used_gb + self.wobble()).max(0.0),
            total_gb: self.total_gb,
        })
    }

    fn utilization_probe(&self) -> Result<f64> {
        Ok((self.base_utilization + self.wobble() * 10.0).clamp(0.0, 100.0))
    }

    fn liveness_probe(&self) -> Result<()> {
        Ok(())
    }

    fn clear_cache(&self) {}
}

/// Engine that synthesizes sine-wave chunks at a fixed pace.
///
/// The chunk count scales with script length so longer scripts stream
/// longer, and each speaker slot gets its own pitch.
pub struct SimEngine {
    sample_rate: u32,
    chunk_secs: f32,
    step_delay: Duration,
}

impl SimEngine {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            chunk_secs: 1.0,
            step_delay: Duration::from_millis(50),
        }
    }
}

impl GenerationEngine for SimEngine {
    fn begin(&self, request: EngineRequest) -> Result<Box<dyn DecodeStream>> {
        let chunks = (request.script.len() / 20).clamp(4, 120);
        let speakers = request.voices.len().max(1);
        Ok(Box::new(SimStream {
            sample_rate: self.sample_rate,
            chunk_samples: (self.chunk_secs * self.sample_rate as f32) as usize,
            step_delay: self.step_delay,
            speakers,
            remaining: chunks,
            position: 0,
        }))
    }
}

struct SimStream {
    sample_rate: u32,
    chunk_samples: usize,
    step_delay: Duration,
    speakers: usize,
    remaining: usize,
    position: usize,
}

impl DecodeStream for SimStream {
    fn next_chunk(&mut self) -> Result<Option<Vec<f32>>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        std::thread::sleep(self.step_delay);

        // Rotate pitch across speaker slots chunk by chunk.
        let speaker = self.position % self.speakers;
        let freq = 220.0 + speaker as f32 * 110.0;
        let mut samples = Vec::with_capacity(self.chunk_samples);
        for i in 0..self.chunk_samples {
            let t = (self.position * self.chunk_samples + i) as f32 / self.sample_rate as f32;
            samples.push(0.2 * (TAU * freq * t).sin());
        }

        self.remaining -= 1;
        self.position += 1;
        Ok(Some(samples))
    }

    fn release(&mut self) {}
}

/// Built-in reference voices for the simulated engine.
pub fn builtin_voices(sample_rate: u32) -> Vec<VoiceSample> {
    ["en-alice", "en-carter", "en-maya", "en-frank"]
        .iter()
        .enumerate()
        .map(|(index, name)| {
            let freq = 180.0 + index as f32 * 60.0;
            let samples = (0..sample_rate as usize)
                .map(|i| 0.2 * (TAU * freq * i as f32 / sample_rate as f32).sin())
                .collect();
            VoiceSample {
                name: (*name).to_string(),
                samples,
                sample_rate,
            }
        })
        .collect()
}
