//! Per-device generation worker.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::engine::{EngineRequest, GenerationEngine};
use crate::error::{Error, Result};
use crate::types::{AudioChunk, DeviceId};

/// Drives one engine's decode loop on one device and streams chunks out.
///
/// The decode loop is blocking and runs on the blocking pool; chunks cross
/// back over a bounded channel, so a slow consumer applies backpressure to
/// the engine rather than piling up audio in memory.
pub struct Worker {
    device_id: DeviceId,
    engine: Arc<dyn GenerationEngine>,
    sample_rate: u32,
    chunk_capacity: usize,
}

impl Worker {
    pub fn new(
        device_id: DeviceId,
        engine: Arc<dyn GenerationEngine>,
        sample_rate: u32,
        chunk_capacity: usize,
    ) -> Self {
        Self {
            device_id,
            engine,
            sample_rate,
            chunk_capacity,
        }
    }

    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    /// Start one generation. Chunks arrive on the returned receiver; the
    /// join handle resolves when the decode loop has ended and released its
    /// device-side buffers.
    ///
    /// Cancellation is observed between decode steps. Dropping the receiver
    /// force-ends the stream the same way: the next send fails and the loop
    /// releases and exits cleanly.
    pub fn generate(
        &self,
        request: EngineRequest,
        cancel: CancellationToken,
    ) -> (mpsc::Receiver<AudioChunk>, JoinHandle<Result<()>>) {
        let (tx, rx) = mpsc::channel(self.chunk_capacity);
        let engine = Arc::clone(&self.engine);
        let device_id = self.device_id;
        let sample_rate = self.sample_rate;

        let handle = tokio::task::spawn_blocking(move || {
            let mut stream = engine.begin(request)?;
            let mut sequence = 0usize;

            let outcome = loop {
                if cancel.is_cancelled() {
                    debug!(device = device_id, sequence, "generation cancelled");
                    break Ok(());
                }
                match stream.next_chunk() {
                    Ok(Some(samples)) => {
                        let chunk = AudioChunk::new(sequence, samples, sample_rate);
                        sequence += 1;
                        if tx.blocking_send(chunk).is_err() {
                            // Receiver gone: the session force-ended us.
                            debug!(device = device_id, sequence, "chunk receiver closed");
                            break Ok(());
                        }
                    }
                    Ok(None) => {
                        debug!(device = device_id, chunks = sequence, "generation complete");
                        break Ok(());
                    }
                    Err(err) => break Err(err),
                }
            };

            stream.release();
            outcome
        });

        let handle = flatten_panics(handle, self.device_id);
        (rx, handle)
    }
}

/// Convert a panicked decode task into an engine error so callers see one
/// failure shape.
fn flatten_panics(
    handle: JoinHandle<Result<()>>,
    device_id: DeviceId,
) -> JoinHandle<Result<()>> {
    tokio::spawn(async move {
        match handle.await {
            Ok(result) => result,
            Err(join) => Err(Error::Engine(format!(
                "decode task for device {device_id} panicked: {join}"
            ))),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedEngine;

    fn request() -> EngineRequest {
        EngineRequest {
            script: "Speaker 1: hello".into(),
            voices: vec![],
            guidance_scale: 1.3,
        }
    }

    #[tokio::test]
    async fn test_chunks_arrive_in_order_and_buffers_release() {
        let engine = Arc::new(ScriptedEngine::with_chunks(3, 100));
        let worker = Worker::new(0, engine.clone(), 24000, 8);

        let (mut rx, handle) = worker.generate(request(), CancellationToken::new());
        let mut sequences = Vec::new();
        while let Some(chunk) = rx.recv().await {
            assert_eq!(chunk.samples.len(), 100);
            sequences.push(chunk.sequence);
        }

        handle.await.expect("join").expect("generation");
        assert_eq!(sequences, vec![0, 1, 2]);
        assert_eq!(engine.release_calls(), 1);
    }

    #[tokio::test]
    async fn test_cancellation_stops_decode() {
        let engine = Arc::new(ScriptedEngine::with_chunks(1000, 100));
        let worker = Worker::new(0, engine.clone(), 24000, 2);

        let cancel = CancellationToken::new();
        let (mut rx, handle) = worker.generate(request(), cancel.clone());

        // Take a couple of chunks, then cancel.
        let first = rx.recv().await.expect("chunk");
        assert_eq!(first.sequence, 0);
        cancel.cancel();

        // Drain whatever was already queued; the loop stops shortly after.
        while rx.recv().await.is_some() {}
        handle.await.expect("join").expect("generation");

        assert!(engine.chunks_emitted() < 1000);
        assert_eq!(engine.release_calls(), 1);
    }

    #[tokio::test]
    async fn test_dropped_receiver_force_ends_stream() {
        let engine = Arc::new(ScriptedEngine::with_chunks(1000, 100));
        let worker = Worker::new(0, engine.clone(), 24000, 2);

        let (rx, handle) = worker.generate(request(), CancellationToken::new());
        drop(rx);

        handle.await.expect("join").expect("generation");
        assert_eq!(engine.release_calls(), 1);
    }

    #[tokio::test]
    async fn test_engine_error_propagates_after_release() {
        let engine = Arc::new(ScriptedEngine::failing_after(2, "out of memory"));
        let worker = Worker::new(0, engine.clone(), 24000, 8);

        let (mut rx, handle) = worker.generate(request(), CancellationToken::new());
        while rx.recv().await.is_some() {}

        let err = handle.await.expect("join").expect_err("engine failure");
        assert!(err.to_string().contains("out of memory"));
        assert_eq!(engine.release_calls(), 1);
    }
}
