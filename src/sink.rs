//! Boundary between the protocol engine and its consumer
//!
//! The orchestrator reports everything through one [`AudioSink`]. Two
//! implementations ship with the crate: [`ChannelSink`] turns callbacks into
//! [`SinkEvent`]s on a channel, and [`PcmWriterSink`] writes raw PCM to any
//! `Write` from a dedicated thread.

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::audio::buffer::{create_shared_buffer, SharedPcmBuffer};
use crate::config::SinkConfig;
use crate::error::{Error, FailureKind, SinkError};
use crate::protocol::{AudioFormat, Encoding};

/// Consumer of a playback session
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Prepare output for `format`. The session does not ask for the stream
    /// to start until this returns; an error aborts the session.
    async fn on_format_ready(&self, format: &AudioFormat) -> Result<(), SinkError>;

    fn on_playback_started(&self);

    /// One call per received datagram. Must not block.
    fn on_audio_data(&self, data: Bytes);

    /// Called once, after both channels are closed
    fn on_error(&self, message: &str, cause: &Error);

    fn on_log(&self, _message: &str) {}
}

/// Callback recorded by [`ChannelSink`]
#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    FormatReady(AudioFormat),
    PlaybackStarted,
    AudioData(Bytes),
    Error { message: String, kind: FailureKind },
    Log(String),
}

/// Forwards every callback over an unbounded channel
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<SinkEvent>,
    reject_format: Option<String>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SinkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                reject_format: None,
            },
            rx,
        )
    }

    /// Make `on_format_ready` fail with `reason`
    pub fn rejecting(mut self, reason: impl Into<String>) -> Self {
        self.reject_format = Some(reason.into());
        self
    }

    fn emit(&self, event: SinkEvent) {
        // Receiver gone means nobody is listening any more
        let _ = self.tx.send(event);
    }
}

#[async_trait]
impl AudioSink for ChannelSink {
    async fn on_format_ready(&self, format: &AudioFormat) -> Result<(), SinkError> {
        self.emit(SinkEvent::FormatReady(*format));
        match &self.reject_format {
            Some(reason) => Err(SinkError::Rejected(reason.clone())),
            None => Ok(()),
        }
    }

    fn on_playback_started(&self) {
        self.emit(SinkEvent::PlaybackStarted);
    }

    fn on_audio_data(&self, data: Bytes) {
        self.emit(SinkEvent::AudioData(data));
    }

    fn on_error(&self, message: &str, cause: &Error) {
        self.emit(SinkEvent::Error {
            message: message.to_string(),
            kind: cause.kind(),
        });
    }

    fn on_log(&self, message: &str) {
        self.emit(SinkEvent::Log(message.to_string()));
    }
}

/// Writes received PCM to a `Write` on a dedicated thread
///
/// Datagrams go through a [`PcmRingBuffer`](crate::audio::PcmRingBuffer) so
/// the receive loop never waits on I/O; a full buffer drops audio.
pub struct PcmWriterSink {
    buffer: SharedPcmBuffer,
    running: Arc<AtomicBool>,
    bytes_written: Arc<AtomicU64>,
    writer_thread: Option<JoinHandle<()>>,
}

impl PcmWriterSink {
    pub fn spawn<W>(writer: W, config: &SinkConfig) -> std::io::Result<Self>
    where
        W: Write + Send + 'static,
    {
        let buffer = create_shared_buffer(config.buffer_chunks);
        let running = Arc::new(AtomicBool::new(true));
        let bytes_written = Arc::new(AtomicU64::new(0));

        let handle = {
            let buffer = buffer.clone();
            let running = running.clone();
            let bytes_written = bytes_written.clone();
            thread::Builder::new()
                .name("pcm-writer".to_string())
                .spawn(move || write_loop(writer, buffer, running, bytes_written))?
        };

        Ok(Self {
            buffer,
            running,
            bytes_written,
            writer_thread: Some(handle),
        })
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    pub fn dropped_chunks(&self) -> usize {
        self.buffer.overflow_count()
    }

    /// Writer wake-ups that found no audio once the stream had begun
    pub fn underruns(&self) -> usize {
        self.buffer.underrun_count()
    }

    /// Flush what is buffered, stop the writer thread and report the totals
    pub fn finish(mut self) -> WriterSummary {
        self.shutdown();
        WriterSummary {
            bytes_written: self.bytes_written(),
            dropped_chunks: self.dropped_chunks(),
            underruns: self.underruns(),
        }
    }

    fn shutdown(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.writer_thread.take() {
            handle.thread().unpark();
            if handle.join().is_err() {
                error!("pcm writer thread panicked");
            }
        }
    }
}

/// Final counters of a [`PcmWriterSink`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WriterSummary {
    pub bytes_written: u64,
    pub dropped_chunks: usize,
    pub underruns: usize,
}

impl Drop for PcmWriterSink {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn write_loop<W: Write>(
    mut writer: W,
    buffer: SharedPcmBuffer,
    running: Arc<AtomicBool>,
    bytes_written: Arc<AtomicU64>,
) {
    let mut started = false;
    loop {
        // Only the first pop of a wake-up counts as an underrun
        let first = if started && running.load(Ordering::Acquire) {
            buffer.pop()
        } else {
            buffer.try_pop()
        };
        let mut wrote = false;
        for chunk in first.into_iter().chain(std::iter::from_fn(|| buffer.try_pop())) {
            if let Err(e) = writer.write_all(&chunk) {
                error!("pcm write failed: {}", e);
                return;
            }
            bytes_written.fetch_add(chunk.len() as u64, Ordering::Relaxed);
            wrote = true;
        }
        started |= wrote;
        if wrote {
            if let Err(e) = writer.flush() {
                error!("pcm flush failed: {}", e);
                return;
            }
        }
        if !running.load(Ordering::Acquire) && buffer.is_empty() {
            break;
        }
        thread::park_timeout(Duration::from_millis(5));
    }
    debug!("pcm writer stopped");
}

#[async_trait]
impl AudioSink for PcmWriterSink {
    async fn on_format_ready(&self, format: &AudioFormat) -> Result<(), SinkError> {
        if format.encoding == Encoding::Invalid || format.block_align() == 0 {
            return Err(SinkError::UnsupportedFormat(format.to_string()));
        }
        info!(
            "writing raw PCM: {} ({} bytes/s)",
            format,
            format.bytes_per_second()
        );
        Ok(())
    }

    fn on_playback_started(&self) {
        info!("playback started");
    }

    fn on_audio_data(&self, data: Bytes) {
        self.buffer.push(data);
        if let Some(handle) = &self.writer_thread {
            handle.thread().unpark();
        }
    }

    fn on_error(&self, message: &str, cause: &Error) {
        error!(kind = ?cause.kind(), "session failed: {}", message);
    }

    fn on_log(&self, message: &str) {
        info!("{}", message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NetworkError;
    use parking_lot::Mutex;

    /// `Write` that appends into shared memory
    #[derive(Clone, Default)]
    struct SharedVec(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedVec {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_channel_sink_forwards_events() {
        let (sink, mut rx) = ChannelSink::new();
        let format = AudioFormat::new(44100, 1, Encoding::Pcm16);

        sink.on_format_ready(&format).await.unwrap();
        sink.on_playback_started();
        sink.on_audio_data(Bytes::from_static(&[1, 2]));
        sink.on_error("boom", &NetworkError::ConnectionClosed.into());

        assert_eq!(rx.recv().await, Some(SinkEvent::FormatReady(format)));
        assert_eq!(rx.recv().await, Some(SinkEvent::PlaybackStarted));
        assert_eq!(
            rx.recv().await,
            Some(SinkEvent::AudioData(Bytes::from_static(&[1, 2])))
        );
        assert_eq!(
            rx.recv().await,
            Some(SinkEvent::Error {
                message: "boom".to_string(),
                kind: FailureKind::NetworkFailure,
            })
        );
    }

    #[tokio::test]
    async fn test_rejecting_sink() {
        let (sink, _rx) = ChannelSink::new();
        let sink = sink.rejecting("no device");
        let format = AudioFormat::new(48000, 2, Encoding::PcmFloat);
        assert!(matches!(
            sink.on_format_ready(&format).await,
            Err(SinkError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn test_pcm_writer_sink_writes_in_order() {
        let out = SharedVec::default();
        let sink = PcmWriterSink::spawn(out.clone(), &SinkConfig::default()).unwrap();
        let format = AudioFormat::new(48000, 2, Encoding::Pcm16);
        sink.on_format_ready(&format).await.unwrap();

        for i in 0..10u8 {
            sink.on_audio_data(Bytes::from(vec![i; 4]));
        }
        let summary = sink.finish();

        let written = out.0.lock().clone();
        assert_eq!(written.len(), 40);
        assert_eq!(summary.bytes_written, 40);
        assert_eq!(summary.dropped_chunks, 0);
        assert_eq!(&written[..4], &[0, 0, 0, 0]);
        assert_eq!(&written[36..], &[9, 9, 9, 9]);
    }

    #[tokio::test]
    async fn test_pcm_writer_sink_counts_underruns_after_start() {
        let out = SharedVec::default();
        let sink = PcmWriterSink::spawn(out.clone(), &SinkConfig::default()).unwrap();

        // Idle before the first chunk is not an underrun
        thread::sleep(Duration::from_millis(30));
        assert_eq!(sink.underruns(), 0);

        sink.on_audio_data(Bytes::from_static(&[1, 2, 3, 4]));
        thread::sleep(Duration::from_millis(50));
        assert!(sink.underruns() > 0);

        let summary = sink.finish();
        assert_eq!(summary.bytes_written, 4);
        assert!(summary.underruns > 0);
        assert_eq!(out.0.lock().as_slice(), &[1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_pcm_writer_sink_rejects_invalid_format() {
        let sink = PcmWriterSink::spawn(std::io::sink(), &SinkConfig::default()).unwrap();
        let format = AudioFormat::new(48000, 2, Encoding::Invalid);
        assert!(sink.on_format_ready(&format).await.is_err());
    }
}
