use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use speechlink_core::credentials::TtsCredentials;
use speechlink_core::error::{Result, SpeechError};
use speechlink_core::types::{AudioEncoding, AudioFormat, ProviderId};

use super::sign::{canonical_query, sign, unix_now};
use crate::{Synthesizer, TtsProvider, VoiceParams};

const HOST: &str = "tts.cloud.tencent.com";
const PATH: &str = "/stream_ws";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const URL_TTL_SECS: i64 = 86_400;

/// JSON control frame interleaved with binary audio frames.
#[derive(Debug, Clone, Deserialize)]
pub struct TtsControlFrame {
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub session_id: String,
    #[serde(default, rename = "final")]
    pub final_flag: i32,
}

/// Tencent streaming TTS over WebSocket.
pub struct TencentTts {
    host: String,
}

impl TencentTts {
    pub fn new() -> Self {
        Self {
            host: HOST.to_string(),
        }
    }
}

impl Default for TencentTts {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TtsProvider for TencentTts {
    fn id(&self) -> ProviderId {
        ProviderId::Tencent
    }

    async fn connect(&self, credentials: &TtsCredentials) -> Result<Arc<dyn Synthesizer>> {
        credentials.require_complete()?;
        Ok(Arc::new(TencentSynthesizer {
            host: self.host.clone(),
            credentials: credentials.clone(),
        }))
    }
}

/// Synthesizer bound to one credentials snapshot.
pub struct TencentSynthesizer {
    host: String,
    credentials: TtsCredentials,
}

impl TencentSynthesizer {
    fn signed_url_at(
        &self,
        text: &str,
        voice: &VoiceParams,
        timestamp: i64,
        session_id: &str,
    ) -> Result<String> {
        let mut query = BTreeMap::new();
        query.insert("Action", "TextToStreamAudioWS".to_string());
        query.insert("AppId", self.credentials.app_id.clone());
        query.insert("SecretId", self.credentials.secret_id.clone());
        query.insert("Timestamp", timestamp.to_string());
        query.insert("Expired", (timestamp + URL_TTL_SECS).to_string());
        query.insert("SessionId", session_id.to_string());
        query.insert("VoiceType", voice.voice_type.to_string());
        query.insert("Codec", voice.codec.clone());
        query.insert("SampleRate", voice.sample_rate.to_string());
        query.insert("Text", text.to_string());

        let base = format!("{}{PATH}?", self.host);
        let signature = sign(
            &self.credentials.secret_key,
            &format!("GET{base}{}", canonical_query(&query, false)),
        )?;
        Ok(format!(
            "wss://{base}{}&Signature={}",
            canonical_query(&query, true),
            urlencoding::encode(&signature)
        ))
    }
}

#[async_trait]
impl Synthesizer for TencentSynthesizer {
    fn id(&self) -> ProviderId {
        ProviderId::Tencent
    }

    fn output_format(&self, voice: &VoiceParams) -> AudioFormat {
        AudioFormat {
            encoding: AudioEncoding::from_codec(&voice.codec).unwrap_or(AudioEncoding::Mp3),
            sample_rate: voice.sample_rate,
            channels: 1,
        }
    }

    async fn synthesize(
        &self,
        text: &str,
        voice: &VoiceParams,
        chunks: mpsc::Sender<Vec<u8>>,
    ) -> Result<()> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let url = self.signed_url_at(text, voice, unix_now(), &session_id)?;

        let (mut ws, _) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(url))
            .await
            .map_err(|_| SpeechError::Provider("tencent tts connect timed out".into()))?
            .map_err(|e| SpeechError::Provider(format!("tencent tts connect failed: {e}")))?;

        debug!(%session_id, text_len = text.len(), "Starting Tencent TTS stream");

        while let Some(msg) = ws.next().await {
            match msg {
                Ok(Message::Binary(data)) => {
                    if chunks.send(data.to_vec()).await.is_err() {
                        debug!(%session_id, "TTS chunk receiver dropped, stopping stream");
                        return Ok(());
                    }
                }
                Ok(Message::Text(raw)) => {
                    let frame: TtsControlFrame = serde_json::from_str(&raw)?;
                    if frame.code != 0 {
                        return Err(SpeechError::Provider(format!(
                            "tencent tts error {}: {}",
                            frame.code, frame.message
                        )));
                    }
                    if frame.final_flag == 1 {
                        return Ok(());
                    }
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    return Err(SpeechError::Provider(format!("tencent tts stream error: {e}")));
                }
            }
        }

        Err(SpeechError::Provider(
            "tencent tts closed before completion".into(),
        ))
    }
}
