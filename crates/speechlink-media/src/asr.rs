//! Streaming recognizer: one provider-side ASR stream per session activation.
//!
//! `write` never blocks the caller. Frames are converted to the provider's
//! input format and queued; a writer task forwards them in order. A separate
//! forwarder task relays recognition events to the session's [`EventSink`]
//! in the order the provider produced them.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use speechlink_core::config::PipelineConfig;
use speechlink_core::credentials::AsrCredentials;
use speechlink_core::error::{Result, SpeechError};
use speechlink_core::protocol::ServerEvent;
use speechlink_core::types::{AudioFormat, ProviderId, RecognitionEvent};
use speechlink_providers::{AsrProvider, AsrStream, RecognitionParams};

use crate::events::EventSink;
use crate::format::AudioConverter;

/// Lifecycle of a recognizer. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecognizerState {
    Idle,
    Connecting,
    Active,
    Stopped,
}

/// Result of offering a frame to the recognizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Accepted,
    /// Not active, queue full, or the frame could not be converted.
    Dropped,
}

struct Running {
    /// Taken on graceful stop so the writer drains and finishes.
    frames: Option<mpsc::Sender<Vec<u8>>>,
    abort: CancellationToken,
    writer: JoinHandle<()>,
    forwarder: JoinHandle<()>,
}

struct Inner {
    state: RecognizerState,
    running: Option<Running>,
}

pub struct StreamingRecognizer {
    provider: Arc<dyn AsrProvider>,
    credentials: AsrCredentials,
    params: RecognitionParams,
    sink: EventSink,
    converter: AudioConverter,
    queue_depth: usize,
    stop_timeout: Duration,
    inner: Arc<Mutex<Inner>>,
}

impl StreamingRecognizer {
    /// Client audio is canonical PCM; the converter targets whatever the
    /// provider consumes.
    pub fn new(
        provider: Arc<dyn AsrProvider>,
        credentials: AsrCredentials,
        params: RecognitionParams,
        sink: EventSink,
        settings: &PipelineConfig,
    ) -> Self {
        let converter = AudioConverter::new(AudioFormat::CANONICAL, provider.input_format());
        Self {
            provider,
            credentials,
            params,
            sink,
            converter,
            queue_depth: settings.audio_queue_depth.max(1),
            stop_timeout: settings.stop_timeout(),
            inner: Arc::new(Mutex::new(Inner {
                state: RecognizerState::Idle,
                running: None,
            })),
        }
    }

    pub fn provider_id(&self) -> ProviderId {
        self.provider.id()
    }

    pub fn state(&self) -> RecognizerState {
        lock(&self.inner).state
    }

    /// Establish the provider stream. Fails without side effects on the
    /// session; a recognizer that failed to connect returns to `Idle`.
    pub async fn connect(&self) -> Result<()> {
        {
            let mut inner = lock(&self.inner);
            match inner.state {
                RecognizerState::Idle => inner.state = RecognizerState::Connecting,
                RecognizerState::Stopped => {
                    return Err(SpeechError::Session("recognizer already stopped".into()));
                }
                _ => return Err(SpeechError::Session("recognizer already started".into())),
            }
        }

        let (events_tx, events_rx) = mpsc::channel(self.queue_depth);
        let opened = self
            .provider
            .open(&self.credentials, &self.params, events_tx.clone())
            .await;

        let mut inner = lock(&self.inner);
        let stream = match opened {
            Ok(stream) => stream,
            Err(e) => {
                if inner.state == RecognizerState::Connecting {
                    inner.state = RecognizerState::Idle;
                }
                return Err(e);
            }
        };
        if inner.state != RecognizerState::Connecting {
            drop(stream);
            return Err(SpeechError::Session(
                "recognizer stopped while connecting".into(),
            ));
        }

        let (frames_tx, frames_rx) = mpsc::channel(self.queue_depth);
        let abort = CancellationToken::new();
        let forwarder = tokio::spawn(forward_events(
            events_rx,
            self.sink.clone(),
            abort.clone(),
            Arc::clone(&self.inner),
        ));
        let writer = tokio::spawn(write_loop(
            stream,
            frames_rx,
            events_tx,
            abort.clone(),
            Arc::clone(&self.inner),
            self.sink.conn_id().to_string(),
        ));

        inner.running = Some(Running {
            frames: Some(frames_tx),
            abort,
            writer,
            forwarder,
        });
        inner.state = RecognizerState::Active;
        debug!(
            conn_id = %self.sink.conn_id(),
            provider = %self.provider.id(),
            "Recognizer active"
        );
        Ok(())
    }

    /// Offer one frame of canonical PCM. Never blocks.
    pub fn write(&self, audio: &[u8]) -> WriteOutcome {
        let frames = {
            let inner = lock(&self.inner);
            if inner.state != RecognizerState::Active {
                return WriteOutcome::Dropped;
            }
            match inner.running.as_ref().and_then(|r| r.frames.clone()) {
                Some(frames) => frames,
                None => return WriteOutcome::Dropped,
            }
        };

        let converted = match self.converter.convert(audio) {
            Ok(converted) => converted,
            Err(e) => {
                self.sink.send(ServerEvent::error(e.to_string()));
                return WriteOutcome::Dropped;
            }
        };

        match frames.try_send(converted) {
            Ok(()) => WriteOutcome::Accepted,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(conn_id = %self.sink.conn_id(), "Audio queue full, dropping frame");
                WriteOutcome::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(_)) => WriteOutcome::Dropped,
        }
    }

    /// Graceful stop: queued frames are flushed and the provider's final
    /// results delivered before this returns, bounded by the stop timeout.
    /// Calling it again is a no-op.
    pub async fn stop(&self) {
        let Some(Running {
            frames,
            abort,
            mut writer,
            mut forwarder,
        }) = self.halt()
        else {
            return;
        };
        drop(frames);

        let drained = tokio::time::timeout(self.stop_timeout, async {
            let _ = (&mut writer).await;
            let _ = (&mut forwarder).await;
        })
        .await;

        if drained.is_err() {
            warn!(
                conn_id = %self.sink.conn_id(),
                timeout_ms = self.stop_timeout.as_millis() as u64,
                "Recognizer did not finish in time, aborting"
            );
            abort.cancel();
            writer.abort();
            let _ = forwarder.await;
        }
    }

    /// Immediate stop that returns once no further events can reach the
    /// sink. Pending frames are discarded. Calling it again is a no-op.
    pub async fn cancel(&self) {
        let Some(running) = self.halt() else { return };
        running.abort.cancel();
        running.writer.abort();
        let _ = running.forwarder.await;
    }

    /// Synchronous variant of [`cancel`](Self::cancel) for teardown paths
    /// that cannot wait. Events already being relayed may still land.
    pub fn abort(&self) {
        if let Some(running) = self.halt() {
            running.abort.cancel();
            running.writer.abort();
            running.forwarder.abort();
        }
    }

    fn halt(&self) -> Option<Running> {
        let mut inner = lock(&self.inner);
        inner.state = RecognizerState::Stopped;
        inner.running.take()
    }
}

impl Drop for StreamingRecognizer {
    fn drop(&mut self) {
        self.abort();
    }
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Relay events in arrival order until the recognizer is aborted. An error
/// from the provider ends the recognition: the recognizer stops accepting
/// audio and the writer releases the provider stream.
async fn forward_events(
    mut events: mpsc::Receiver<RecognitionEvent>,
    sink: EventSink,
    abort: CancellationToken,
    inner: Arc<Mutex<Inner>>,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = abort.cancelled() => return,
            event = events.recv() => match event {
                Some(event) => event,
                None => return,
            },
        };
        if abort.is_cancelled() {
            return;
        }
        if let RecognitionEvent::Error { message } = &event {
            debug!(conn_id = %sink.conn_id(), %message, "Provider reported an error, stopping");
            lock(&inner).state = RecognizerState::Stopped;
            abort.cancel();
            sink.recognition(event);
            return;
        }
        sink.recognition(event);
    }
}

async fn write_loop(
    mut stream: Box<dyn AsrStream>,
    mut frames: mpsc::Receiver<Vec<u8>>,
    events: mpsc::Sender<RecognitionEvent>,
    abort: CancellationToken,
    inner: Arc<Mutex<Inner>>,
    conn_id: String,
) {
    loop {
        let audio = tokio::select! {
            biased;
            _ = abort.cancelled() => return,
            frame = frames.recv() => match frame {
                Some(audio) => audio,
                None => break,
            },
        };
        let sent = tokio::select! {
            biased;
            _ = abort.cancelled() => return,
            sent = stream.send_audio(&audio) => sent,
        };
        if let Err(e) = sent {
            warn!(%conn_id, error = %e, "Recognizer write failed");
            lock(&inner).state = RecognizerState::Stopped;
            let _ = events
                .send(RecognitionEvent::Error { message: e.to_string() })
                .await;
            return;
        }
    }

    tokio::select! {
        _ = abort.cancelled() => {}
        finished = stream.finish() => match finished {
            Ok(()) => info!(%conn_id, "Recognition finished"),
            Err(e) => {
                warn!(%conn_id, error = %e, "Recognizer finish failed");
                let _ = events
                    .send(RecognitionEvent::Error { message: e.to_string() })
                    .await;
            }
        }
    }
}
