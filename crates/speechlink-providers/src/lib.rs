//! Speech provider abstraction.
//!
//! Each direction has one capability interface: [`AsrProvider`] opens
//! streaming recognizers, [`TtsProvider`] hands out [`Synthesizer`]s. The set
//! of providers is closed: [`asr_provider`] and [`tts_provider`] map every
//! [`ProviderId`] to its implementation, so adding a provider means adding a
//! variant here rather than branching at call sites.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use speechlink_core::credentials::{AsrCredentials, TtsCredentials};
use speechlink_core::error::Result;
use speechlink_core::types::{AudioFormat, ProviderId, RecognitionEvent};

pub mod alibaba;
pub mod loopback;
pub mod tencent;

/// Ordered sink for recognition events of one recognizer.
pub type RecognitionSender = mpsc::Sender<RecognitionEvent>;

/// Per-activation recognition parameters.
#[derive(Debug, Clone, Default)]
pub struct RecognitionParams {
    /// Client-selected model; overrides the configured engine model when set.
    pub model: Option<String>,
    /// Identifier of this activation, forwarded to the provider for tracing.
    pub voice_id: String,
}

/// Resolved voice/codec parameters for one synthesis call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceParams {
    pub voice_type: i64,
    pub codec: String,
    pub sample_rate: u32,
}

/// A speech recognition provider.
#[async_trait]
pub trait AsrProvider: Send + Sync {
    fn id(&self) -> ProviderId;

    /// Providers that are only scaffolding report `false`.
    fn implemented(&self) -> bool {
        true
    }

    /// Audio format the provider consumes.
    fn input_format(&self) -> AudioFormat {
        AudioFormat::CANONICAL
    }

    /// Connect and handshake. Recognition results are sent to `events` in
    /// arrival order until the returned stream finishes or is dropped.
    async fn open(
        &self,
        credentials: &AsrCredentials,
        params: &RecognitionParams,
        events: RecognitionSender,
    ) -> Result<Box<dyn AsrStream>>;
}

/// An established provider-side recognition stream.
///
/// Dropping the stream releases the provider connection without waiting for
/// final results.
#[async_trait]
pub trait AsrStream: Send {
    /// Forward audio already converted to the provider's input format.
    async fn send_audio(&mut self, audio: &[u8]) -> Result<()>;

    /// Signal end of audio and wait for the provider's final results.
    async fn finish(&mut self) -> Result<()>;
}

/// A speech synthesis provider.
#[async_trait]
pub trait TtsProvider: Send + Sync {
    fn id(&self) -> ProviderId;

    fn implemented(&self) -> bool {
        true
    }

    /// Validate credentials and prepare a synthesizer.
    async fn connect(&self, credentials: &TtsCredentials) -> Result<Arc<dyn Synthesizer>>;
}

/// Turns text into audio units.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    fn id(&self) -> ProviderId;

    /// Encoding of the audio units this synthesizer produces for `voice`.
    fn output_format(&self, voice: &VoiceParams) -> AudioFormat;

    /// Synthesize `text`, sending each audio unit to `chunks` in the order the
    /// provider produces them. Returns once the provider signals completion.
    /// A closed `chunks` receiver ends the call early without error.
    async fn synthesize(
        &self,
        text: &str,
        voice: &VoiceParams,
        chunks: mpsc::Sender<Vec<u8>>,
    ) -> Result<()>;
}

/// The ASR implementation behind a provider identity.
pub fn asr_provider(id: ProviderId) -> Arc<dyn AsrProvider> {
    match id {
        ProviderId::Tencent => Arc::new(tencent::TencentAsr::new()),
        ProviderId::Alibaba => Arc::new(alibaba::AlibabaAsr),
        ProviderId::Loopback => Arc::new(loopback::LoopbackAsr),
    }
}

/// The TTS implementation behind a provider identity.
pub fn tts_provider(id: ProviderId) -> Arc<dyn TtsProvider> {
    match id {
        ProviderId::Tencent => Arc::new(tencent::TencentTts::new()),
        ProviderId::Alibaba => Arc::new(alibaba::AlibabaTts),
        ProviderId::Loopback => Arc::new(loopback::LoopbackTts),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_maps_every_id() {
        for id in [ProviderId::Tencent, ProviderId::Alibaba, ProviderId::Loopback] {
            assert_eq!(asr_provider(id).id(), id);
            assert_eq!(tts_provider(id).id(), id);
        }
    }

    #[test]
    fn test_only_alibaba_is_unimplemented() {
        assert!(!asr_provider(ProviderId::Alibaba).implemented());
        assert!(!tts_provider(ProviderId::Alibaba).implemented());
        assert!(asr_provider(ProviderId::Tencent).implemented());
        assert!(tts_provider(ProviderId::Loopback).implemented());
    }
}
