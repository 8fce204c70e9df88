//! # Streaming Recorder
//!
//! Streams a live profiler to a writer from a background thread.
//!
//! ```text
//! groups ──► Profiler queue ──poll_batch──► recorder thread ──► TrackWriter<W>
//!                                               ▲
//!                          stop() ──channel─────┘
//! ```
//!
//! The thread wakes every `flush_interval_ms`, drains its observer in
//! batches of `batch_size`, and flushes the writer. The stream opens with
//! a snapshot of the group tree and its totals, so it replays from the
//! state the profiler was in when the recorder started.

use std::io::Write;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use memtrail_profile::{Observer, Profiler};

use crate::codec::TrackWriter;
use crate::config::RecorderConfig;
use crate::error::{TrackError, TrackResult};
use crate::track::seed_events;

/// Counters reported when a recorder stops.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RecorderStats {
    /// Events taken from the observer.
    pub events: u64,
    /// Records written, synthesized declarations included.
    pub records: u64,
    /// Bytes written, header included.
    pub bytes: u64,
    /// Writer flushes.
    pub flushes: u64,
    /// Events the observer lost to the retention limit.
    pub missed: u64,
}

type RecorderOutput<W> = TrackResult<(W, RecorderStats)>;

/// Handle to a running recorder thread.
pub struct StreamingRecorder<W: Write + Send + 'static> {
    stop: Sender<()>,
    handle: Option<JoinHandle<RecorderOutput<W>>>,
}

impl<W: Write + Send + 'static> StreamingRecorder<W> {
    /// Writes the stream header and a snapshot of `profiler`, then starts
    /// recording its changes.
    ///
    /// # Errors
    ///
    /// - [`TrackError::InvalidConfig`] for an unusable configuration.
    /// - [`TrackError::Io`] if the header cannot be written or the thread
    ///   cannot be spawned.
    pub fn spawn(profiler: &Profiler, writer: W, config: RecorderConfig) -> TrackResult<Self> {
        config.validate()?;
        let mut writer = TrackWriter::new(writer)?;
        let (snapshot, observer) = profiler.observe_with_snapshot();
        for event in seed_events(&snapshot) {
            writer.serialize_event(&event, profiler)?;
        }
        let (stop, stopped) = bounded::<()>(1);
        let (flush_interval_ms, batch_size) = (config.flush_interval_ms, config.batch_size);

        let handle = thread::Builder::new()
            .name("memtrail-recorder".to_string())
            .spawn(move || {
                let mut worker = Worker {
                    observer,
                    writer,
                    batch: Vec::with_capacity(config.batch_size),
                    stats: RecorderStats::default(),
                    batch_size: config.batch_size,
                };
                let interval = config.flush_interval();
                loop {
                    let stopping = match stopped.recv_timeout(interval) {
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
                        Err(RecvTimeoutError::Timeout) => false,
                    };
                    worker.drain()?;
                    if stopping {
                        break;
                    }
                }
                worker.finish()
            })?;

        tracing::debug!(flush_interval_ms, batch_size, "recorder started");
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Drains what is left, stops the thread and returns the writer.
    ///
    /// # Errors
    ///
    /// - Any write error the thread hit while recording.
    /// - [`TrackError::RecorderPanicked`] if the thread panicked.
    pub fn stop(mut self) -> RecorderOutput<W> {
        self.shutdown().unwrap_or(Err(TrackError::RecorderPanicked))
    }

    fn shutdown(&mut self) -> Option<RecorderOutput<W>> {
        let handle = self.handle.take()?;
        // A send error only means the thread has already exited.
        let _ = self.stop.send(());
        Some(handle.join().unwrap_or(Err(TrackError::RecorderPanicked)))
    }
}

impl<W: Write + Send + 'static> Drop for StreamingRecorder<W> {
    fn drop(&mut self) {
        if let Some(Err(error)) = self.shutdown() {
            tracing::warn!(%error, "recorder dropped with an error");
        }
    }
}

struct Worker<W: Write> {
    observer: Observer,
    writer: TrackWriter<W>,
    batch: Vec<memtrail_profile::Event>,
    stats: RecorderStats,
    batch_size: usize,
}

impl<W: Write> Worker<W> {
    fn drain(&mut self) -> TrackResult<()> {
        loop {
            self.batch.clear();
            let count = self.observer.poll_batch(&mut self.batch, self.batch_size);
            if count == 0 {
                break;
            }
            let profiler = self.observer.profiler();
            for event in &self.batch {
                self.writer.serialize_event(event, profiler)?;
            }
            self.stats.events += count as u64;
        }
        self.writer.flush()?;
        self.stats.flushes += 1;
        Ok(())
    }

    fn finish(self) -> RecorderOutput<W> {
        let mut stats = self.stats;
        stats.records = self.writer.records_written();
        stats.bytes = self.writer.bytes_written();
        stats.missed = self.observer.missed();
        let writer = self.writer.into_inner()?;
        tracing::info!(
            events = stats.events,
            records = stats.records,
            bytes = stats.bytes,
            missed = stats.missed,
            "recorder stopped"
        );
        Ok((writer, stats))
    }
}
