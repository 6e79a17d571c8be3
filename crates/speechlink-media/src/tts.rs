//! Streaming synthesis adapter.
//!
//! Each synthesis call yields its audio units in provider order, converted
//! to canonical PCM, followed by exactly one terminal event.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use speechlink_core::config::PipelineConfig;
use speechlink_core::credentials::TtsCredentials;
use speechlink_core::error::{Result, SpeechError};
use speechlink_core::types::{AudioEncoding, AudioFormat, ProviderId, SynthesisEvent};
use speechlink_providers::{Synthesizer, VoiceParams};

use crate::format::{AudioConverter, extract_speech_text};

const DEFAULT_CODEC: &str = "pcm";
const DEFAULT_SAMPLE_RATE: u32 = 16_000;

/// A synthesizer bound to one provider and a credentials snapshot.
#[derive(Clone)]
pub struct SpeechSynthesizer {
    synthesizer: Arc<dyn Synthesizer>,
    credentials: TtsCredentials,
    chunk_queue_depth: usize,
}

/// Fully collected output of one synthesis call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesizedAudio {
    pub audio: Vec<u8>,
    pub chunks: usize,
    pub format: AudioFormat,
}

impl SpeechSynthesizer {
    pub fn new(
        synthesizer: Arc<dyn Synthesizer>,
        credentials: TtsCredentials,
        settings: &PipelineConfig,
    ) -> Self {
        Self {
            synthesizer,
            credentials,
            chunk_queue_depth: settings.chunk_queue_depth.max(1),
        }
    }

    pub fn provider_id(&self) -> ProviderId {
        self.synthesizer.id()
    }

    pub fn resolve_voice(&self, voice_gender: Option<&str>) -> VoiceParams {
        let codec = if self.credentials.codec.trim().is_empty() {
            DEFAULT_CODEC.to_string()
        } else {
            self.credentials.codec.clone()
        };
        let sample_rate = match self.credentials.sample_rate {
            0 => DEFAULT_SAMPLE_RATE,
            rate => rate,
        };
        VoiceParams {
            voice_type: self.credentials.voice_for(voice_gender),
            codec,
            sample_rate,
        }
    }

    /// Format of the units a [`SynthesisStream`] yields for this voice.
    /// Compressed provider output cannot be normalized and passes through.
    pub fn output_format(&self, voice: &VoiceParams) -> AudioFormat {
        let native = self.synthesizer.output_format(voice);
        if native.encoding == AudioEncoding::Mp3 {
            native
        } else {
            AudioFormat::CANONICAL
        }
    }

    /// Start synthesizing `text`. The provider call runs in the background;
    /// dropping the returned stream leaves the remaining events unobserved
    /// without aborting the call.
    pub fn synthesize_stream(&self, text: &str, voice_gender: Option<&str>) -> SynthesisStream {
        let (events_tx, events_rx) = mpsc::channel(self.chunk_queue_depth);
        let voice = self.resolve_voice(voice_gender);
        let format = self.output_format(&voice);
        tokio::spawn(run_synthesis(
            Arc::clone(&self.synthesizer),
            extract_speech_text(text),
            voice,
            self.chunk_queue_depth,
            events_tx,
        ));
        SynthesisStream {
            events: events_rx,
            format,
        }
    }

    /// Synthesize and collect all audio.
    pub async fn synthesize(
        &self,
        text: &str,
        voice_gender: Option<&str>,
    ) -> Result<SynthesizedAudio> {
        let mut stream = self.synthesize_stream(text, voice_gender);
        let mut audio = Vec::new();
        let mut chunks = 0;
        while let Some(event) = stream.next().await {
            match event {
                SynthesisEvent::Chunk(data) => {
                    audio.extend_from_slice(&data);
                    chunks += 1;
                }
                SynthesisEvent::Complete => break,
                SynthesisEvent::Error(message) => return Err(SpeechError::Provider(message)),
            }
        }
        Ok(SynthesizedAudio {
            audio,
            chunks,
            format: stream.format(),
        })
    }
}

/// Ordered events of one synthesis call.
pub struct SynthesisStream {
    events: mpsc::Receiver<SynthesisEvent>,
    format: AudioFormat,
}

impl SynthesisStream {
    /// `None` only after the terminal event has been yielded.
    pub async fn next(&mut self) -> Option<SynthesisEvent> {
        self.events.recv().await
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }
}

/// Emits the single terminal event of a call; consumed on use.
struct TerminalEmitter {
    events: mpsc::Sender<SynthesisEvent>,
}

impl TerminalEmitter {
    async fn complete(self) {
        let _ = self.events.send(SynthesisEvent::Complete).await;
    }

    async fn fail(self, message: String) {
        let _ = self.events.send(SynthesisEvent::Error(message)).await;
    }
}

async fn run_synthesis(
    synthesizer: Arc<dyn Synthesizer>,
    text: String,
    voice: VoiceParams,
    queue_depth: usize,
    events: mpsc::Sender<SynthesisEvent>,
) {
    let terminal = TerminalEmitter {
        events: events.clone(),
    };
    if text.trim().is_empty() {
        debug!("Nothing speakable, completing without audio");
        terminal.complete().await;
        return;
    }

    let native = synthesizer.output_format(&voice);
    let converter = if native.encoding == AudioEncoding::Mp3 {
        AudioConverter::identity(native)
    } else {
        AudioConverter::new(native, AudioFormat::CANONICAL)
    };

    let provider = synthesizer.id();
    let (chunk_tx, mut chunk_rx) = mpsc::channel::<Vec<u8>>(queue_depth);
    let call = tokio::spawn(async move { synthesizer.synthesize(&text, &voice, chunk_tx).await });

    let mut chunks = 0usize;
    while let Some(chunk) = chunk_rx.recv().await {
        let audio = match converter.convert(&chunk) {
            Ok(audio) => audio,
            Err(e) => {
                warn!(%provider, error = %e, "Chunk conversion failed, forwarding raw audio");
                chunk
            }
        };
        chunks += 1;
        // A departed consumer only makes the rest unobserved.
        let _ = events.send(SynthesisEvent::Chunk(audio)).await;
    }

    match call.await {
        Ok(Ok(())) => {
            debug!(%provider, chunks, "Synthesis complete");
            terminal.complete().await;
        }
        Ok(Err(e)) => {
            warn!(%provider, chunks, error = %e, "Synthesis failed");
            terminal.fail(e.to_string()).await;
        }
        Err(join) if join.is_panic() => {
            warn!(%provider, chunks, "Synthesis provider panicked");
            terminal.fail(format!("{provider} synthesis failed unexpectedly")).await;
        }
        Err(_) => terminal.fail("synthesis cancelled".into()).await,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use speechlink_providers::loopback::{LoopbackSynthesizer, SILENCE_BYTES_PER_WORD};

    use super::*;

    fn synth(inner: Arc<dyn Synthesizer>) -> SpeechSynthesizer {
        SpeechSynthesizer::new(inner, TtsCredentials::default(), &PipelineConfig::default())
    }

    async fn collect(mut stream: SynthesisStream) -> Vec<SynthesisEvent> {
        let mut events = Vec::new();
        while let Some(e) = stream.next().await {
            events.push(e);
        }
        events
    }

    #[tokio::test]
    async fn test_chunks_then_complete() {
        let events = collect(synth(Arc::new(LoopbackSynthesizer)).synthesize_stream("a b c", None)).await;
        assert_eq!(events.len(), 4);
        assert!(events[..3]
            .iter()
            .all(|e| matches!(e, SynthesisEvent::Chunk(c) if c.len() == SILENCE_BYTES_PER_WORD)));
        assert_eq!(events[3], SynthesisEvent::Complete);
    }

    #[tokio::test]
    async fn test_sse_text_is_extracted() {
        let text = "data: {\"choices\":[{\"delta\":{\"content\":\"hello \"}}]}\n\
                    data: {\"choices\":[{\"delta\":{\"content\":\"world\"}}]}\n\
                    data: [DONE]\n";
        let out = synth(Arc::new(LoopbackSynthesizer))
            .synthesize(text, None)
            .await
            .unwrap();
        assert_eq!(out.chunks, 2);
        assert_eq!(out.audio.len(), 2 * SILENCE_BYTES_PER_WORD);
        assert_eq!(out.format, AudioFormat::CANONICAL);
    }

    #[tokio::test]
    async fn test_empty_text_completes_without_audio() {
        let events =
            collect(synth(Arc::new(LoopbackSynthesizer)).synthesize_stream("data: [DONE]", None))
                .await;
        assert_eq!(events, vec![SynthesisEvent::Complete]);
    }

    /// Sends `ok_chunks` chunks, then fails or panics.
    struct Scripted {
        ok_chunks: usize,
        panic: bool,
    }

    #[async_trait]
    impl Synthesizer for Scripted {
        fn id(&self) -> ProviderId {
            ProviderId::Tencent
        }

        fn output_format(&self, _voice: &VoiceParams) -> AudioFormat {
            AudioFormat::CANONICAL
        }

        async fn synthesize(
            &self,
            _text: &str,
            _voice: &VoiceParams,
            chunks: mpsc::Sender<Vec<u8>>,
        ) -> Result<()> {
            for i in 0..self.ok_chunks {
                let _ = chunks.send(vec![i as u8; 2]).await;
            }
            if self.panic {
                panic!("provider bug");
            }
            Err(SpeechError::Provider("stream reset".into()))
        }
    }

    #[tokio::test]
    async fn test_failure_after_chunks() {
        let events = collect(
            synth(Arc::new(Scripted {
                ok_chunks: 2,
                panic: false,
            }))
            .synthesize_stream("hi", None),
        )
        .await;
        assert_eq!(
            events,
            vec![
                SynthesisEvent::Chunk(vec![0, 0]),
                SynthesisEvent::Chunk(vec![1, 1]),
                SynthesisEvent::Error("Provider error: stream reset".into()),
            ]
        );
    }

    #[tokio::test]
    async fn test_panic_becomes_error_event() {
        let events = collect(
            synth(Arc::new(Scripted {
                ok_chunks: 1,
                panic: true,
            }))
            .synthesize_stream("hi", None),
        )
        .await;
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], SynthesisEvent::Error(_)));
    }

    struct Tracking {
        finished: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Synthesizer for Tracking {
        fn id(&self) -> ProviderId {
            ProviderId::Loopback
        }

        fn output_format(&self, _voice: &VoiceParams) -> AudioFormat {
            AudioFormat::CANONICAL
        }

        async fn synthesize(
            &self,
            _text: &str,
            _voice: &VoiceParams,
            chunks: mpsc::Sender<Vec<u8>>,
        ) -> Result<()> {
            for _ in 0..8 {
                let _ = chunks.send(vec![0; 2]).await;
            }
            self.finished.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_dropped_consumer_does_not_abort_call() {
        let finished = Arc::new(AtomicBool::new(false));
        let stream = synth(Arc::new(Tracking {
            finished: Arc::clone(&finished),
        }))
        .synthesize_stream("go", None);
        drop(stream);

        tokio::time::timeout(Duration::from_secs(1), async {
            while !finished.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[test]
    fn test_voice_defaults() {
        let s = synth(Arc::new(LoopbackSynthesizer));
        let voice = s.resolve_voice(Some("female"));
        assert_eq!(voice.codec, "pcm");
        assert_eq!(voice.sample_rate, 16_000);
    }
}
