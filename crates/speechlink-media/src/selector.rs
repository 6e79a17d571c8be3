//! Provider selection with failover.
//!
//! Providers are tried strictly in configured priority order. The first one
//! that establishes wins. Credential problems are surfaced immediately since
//! no other provider would fix them; any other failure moves on to the next
//! provider.

use std::sync::Arc;

use tracing::{info, trace};

use speechlink_core::config::{Config, PipelineConfig};
use speechlink_core::credentials::{ConfigCredentialResolver, CredentialResolver};
use speechlink_core::error::{Result, SpeechError};
use speechlink_core::types::{Direction, ProviderId};
use speechlink_providers::{AsrProvider, RecognitionParams, TtsProvider, asr_provider, tts_provider};

use crate::asr::StreamingRecognizer;
use crate::events::EventSink;
use crate::tts::SpeechSynthesizer;

pub struct ProviderSelector {
    asr: Vec<Arc<dyn AsrProvider>>,
    tts: Vec<Arc<dyn TtsProvider>>,
    credentials: Arc<dyn CredentialResolver>,
    settings: PipelineConfig,
}

impl ProviderSelector {
    pub fn new(
        asr: Vec<Arc<dyn AsrProvider>>,
        tts: Vec<Arc<dyn TtsProvider>>,
        credentials: Arc<dyn CredentialResolver>,
        settings: PipelineConfig,
    ) -> Self {
        Self {
            asr,
            tts,
            credentials,
            settings,
        }
    }

    /// Build the priority lists and credential resolver from configuration.
    pub fn from_config(config: Arc<Config>) -> Result<Self> {
        let asr = config.asr_providers()?.into_iter().map(asr_provider).collect();
        let tts = config.tts_providers()?.into_iter().map(tts_provider).collect();
        let settings = config.pipeline.clone();
        Ok(Self::new(
            asr,
            tts,
            Arc::new(ConfigCredentialResolver::new(config)),
            settings,
        ))
    }

    pub fn settings(&self) -> &PipelineConfig {
        &self.settings
    }

    pub fn asr_priority(&self) -> Vec<ProviderId> {
        self.asr.iter().map(|p| p.id()).collect()
    }

    pub fn tts_priority(&self) -> Vec<ProviderId> {
        self.tts.iter().map(|p| p.id()).collect()
    }

    /// Connect a recognizer with the first provider that establishes.
    pub async fn select_asr(
        &self,
        params: RecognitionParams,
        sink: EventSink,
    ) -> Result<(Arc<StreamingRecognizer>, ProviderId)> {
        let credentials = self.credentials.asr_config()?;
        let mut attempts = 0;
        let mut last_error = None;

        for provider in &self.asr {
            if self.settings.skip_unimplemented_providers && !provider.implemented() {
                trace!(provider = %provider.id(), "Skipping unimplemented ASR provider");
                continue;
            }
            attempts += 1;

            let recognizer = StreamingRecognizer::new(
                Arc::clone(provider),
                credentials.clone(),
                params.clone(),
                sink.clone(),
                &self.settings,
            );
            match recognizer.connect().await {
                Ok(()) => {
                    if attempts > 1 {
                        info!(provider = %provider.id(), attempt = attempts, "ASR failover succeeded");
                    }
                    return Ok((Arc::new(recognizer), provider.id()));
                }
                Err(e @ SpeechError::Config(_)) => return Err(e),
                Err(e) => {
                    trace!(provider = %provider.id(), attempt = attempts, %e, "ASR provider failed, trying next");
                    last_error = Some(e);
                }
            }
        }

        Err(unavailable(Direction::Asr, attempts, last_error))
    }

    /// Prepare a synthesizer with the first provider that establishes.
    pub async fn select_tts(&self) -> Result<(SpeechSynthesizer, ProviderId)> {
        let (speech, provider, _) = self.select_tts_from(0).await?;
        Ok((speech, provider))
    }

    /// Like [`select_tts`](Self::select_tts), starting at position `start`
    /// of the priority list. Also returns the chosen provider's position so
    /// a caller whose synthesis fails early can continue after it.
    pub async fn select_tts_from(
        &self,
        start: usize,
    ) -> Result<(SpeechSynthesizer, ProviderId, usize)> {
        let credentials = self.credentials.tts_config()?;
        let mut attempts = 0;
        let mut last_error = None;

        for (position, provider) in self.tts.iter().enumerate().skip(start) {
            if self.settings.skip_unimplemented_providers && !provider.implemented() {
                trace!(provider = %provider.id(), "Skipping unimplemented TTS provider");
                continue;
            }
            attempts += 1;

            match provider.connect(&credentials).await {
                Ok(synthesizer) => {
                    if attempts > 1 || start > 0 {
                        info!(provider = %provider.id(), attempt = attempts, "TTS failover succeeded");
                    }
                    let speech =
                        SpeechSynthesizer::new(synthesizer, credentials, &self.settings);
                    return Ok((speech, provider.id(), position));
                }
                Err(e @ SpeechError::Config(_)) => return Err(e),
                Err(e) => {
                    trace!(provider = %provider.id(), attempt = attempts, %e, "TTS provider failed, trying next");
                    last_error = Some(e);
                }
            }
        }

        Err(unavailable(Direction::Tts, attempts, last_error))
    }
}

fn unavailable(direction: Direction, attempts: usize, last_error: Option<SpeechError>) -> SpeechError {
    SpeechError::ProvidersUnavailable {
        direction,
        attempts,
        last_error: last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no providers configured".into()),
    }
}
