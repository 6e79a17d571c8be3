//! In-process echo provider for local development and tests.
//!
//! Recognition reports what audio it received instead of transcribing it;
//! synthesis produces canonical PCM silence, one unit per word.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use speechlink_core::credentials::{AsrCredentials, TtsCredentials};
use speechlink_core::error::{Result, SpeechError};
use speechlink_core::types::{AudioFormat, ProviderId, RecognitionEvent};

use crate::{
    AsrProvider, AsrStream, RecognitionParams, RecognitionSender, Synthesizer, TtsProvider,
    VoiceParams,
};

/// Bytes of silence emitted per synthesized word (100ms at 16kHz mono).
pub const SILENCE_BYTES_PER_WORD: usize = 3_200;

pub struct LoopbackAsr;

#[async_trait]
impl AsrProvider for LoopbackAsr {
    fn id(&self) -> ProviderId {
        ProviderId::Loopback
    }

    async fn open(
        &self,
        _credentials: &AsrCredentials,
        _params: &RecognitionParams,
        events: RecognitionSender,
    ) -> Result<Box<dyn AsrStream>> {
        Ok(Box::new(LoopbackStream {
            events,
            frames: 0,
            bytes: 0,
            finished: false,
        }))
    }
}

struct LoopbackStream {
    events: RecognitionSender,
    frames: usize,
    bytes: usize,
    finished: bool,
}

impl LoopbackStream {
    fn transcript(&self) -> String {
        format!("received {} frame(s), {} bytes", self.frames, self.bytes)
    }

    async fn emit(&self, event: RecognitionEvent) -> Result<()> {
        self.events
            .send(event)
            .await
            .map_err(|_| SpeechError::Provider("recognition event receiver closed".into()))
    }
}

#[async_trait]
impl AsrStream for LoopbackStream {
    async fn send_audio(&mut self, audio: &[u8]) -> Result<()> {
        if self.finished {
            return Err(SpeechError::Provider("stream already finished".into()));
        }
        if self.frames == 0 {
            self.emit(RecognitionEvent::SentenceBegin { index: 0 }).await?;
        }
        self.frames += 1;
        self.bytes += audio.len();
        self.emit(RecognitionEvent::Partial {
            index: 0,
            text: self.transcript(),
        })
        .await
    }

    async fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        if self.frames > 0 {
            self.emit(RecognitionEvent::Final {
                index: 0,
                text: self.transcript(),
            })
            .await?;
        }
        Ok(())
    }
}

pub struct LoopbackTts;

#[async_trait]
impl TtsProvider for LoopbackTts {
    fn id(&self) -> ProviderId {
        ProviderId::Loopback
    }

    async fn connect(&self, _credentials: &TtsCredentials) -> Result<Arc<dyn Synthesizer>> {
        Ok(Arc::new(LoopbackSynthesizer))
    }
}

pub struct LoopbackSynthesizer;

#[async_trait]
impl Synthesizer for LoopbackSynthesizer {
    fn id(&self) -> ProviderId {
        ProviderId::Loopback
    }

    fn output_format(&self, _voice: &VoiceParams) -> AudioFormat {
        AudioFormat::CANONICAL
    }

    async fn synthesize(
        &self,
        text: &str,
        _voice: &VoiceParams,
        chunks: mpsc::Sender<Vec<u8>>,
    ) -> Result<()> {
        for _word in text.split_whitespace() {
            if chunks.send(vec![0u8; SILENCE_BYTES_PER_WORD]).await.is_err() {
                break;
            }
        }
        Ok(())
    }
}
