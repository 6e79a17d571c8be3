use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, warn};

use speechlink_core::credentials::AsrCredentials;
use speechlink_core::error::{Result, SpeechError};
use speechlink_core::types::{ProviderId, RecognitionEvent};

use super::sign::{canonical_query, sign, unix_now};
use crate::{AsrProvider, AsrStream, RecognitionParams, RecognitionSender};

const HOST: &str = "asr.cloud.tencent.com";
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const FINISH_TIMEOUT: Duration = Duration::from_secs(5);
/// Signed URLs stay valid for a day.
const URL_TTL_SECS: i64 = 86_400;
const END_FRAME: &str = r#"{"type":"end"}"#;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// One JSON frame from the recognition endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct AsrResponse {
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub voice_id: String,
    #[serde(default)]
    pub result: Option<AsrResult>,
    #[serde(default, rename = "final")]
    pub final_flag: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AsrResult {
    /// 0 = sentence begin, 1 = partial, 2 = sentence end.
    pub slice_type: i32,
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub voice_text_str: String,
}

impl AsrResponse {
    fn is_last(&self) -> bool {
        self.final_flag == 1 || self.code != 0
    }
}

/// Translate a provider frame into the pipeline's event, 1:1.
pub fn map_asr_response(resp: &AsrResponse) -> Option<RecognitionEvent> {
    if resp.code != 0 {
        return Some(RecognitionEvent::Error {
            message: format!("tencent asr error {}: {}", resp.code, resp.message),
        });
    }
    let result = resp.result.as_ref()?;
    match result.slice_type {
        0 => Some(RecognitionEvent::SentenceBegin {
            index: result.index,
        }),
        1 => Some(RecognitionEvent::Partial {
            index: result.index,
            text: result.voice_text_str.clone(),
        }),
        2 => Some(RecognitionEvent::Final {
            index: result.index,
            text: result.voice_text_str.clone(),
        }),
        other => {
            debug!(slice_type = other, "Ignoring unknown slice type");
            None
        }
    }
}

/// Tencent real-time ASR over WebSocket (16kHz PCM in, JSON results out).
pub struct TencentAsr {
    host: String,
}

impl TencentAsr {
    pub fn new() -> Self {
        Self {
            host: HOST.to_string(),
        }
    }

    fn signed_url_at(
        &self,
        credentials: &AsrCredentials,
        params: &RecognitionParams,
        timestamp: i64,
        nonce: u32,
    ) -> Result<String> {
        let engine = params
            .model
            .clone()
            .unwrap_or_else(|| credentials.engine_model.clone());

        let mut query = BTreeMap::new();
        query.insert("secretid", credentials.secret_id.clone());
        query.insert("timestamp", timestamp.to_string());
        query.insert("expired", (timestamp + URL_TTL_SECS).to_string());
        query.insert("nonce", nonce.to_string());
        query.insert("engine_model_type", engine);
        query.insert("voice_id", params.voice_id.clone());
        query.insert("voice_format", "1".to_string());
        query.insert("needvad", "1".to_string());

        let base = format!("{}/asr/v2/{}?", self.host, credentials.app_id);
        let signature = sign(
            &credentials.secret_key,
            &format!("{base}{}", canonical_query(&query, false)),
        )?;
        Ok(format!(
            "wss://{base}{}&signature={}",
            canonical_query(&query, true),
            urlencoding::encode(&signature)
        ))
    }
}

impl Default for TencentAsr {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AsrProvider for TencentAsr {
    fn id(&self) -> ProviderId {
        ProviderId::Tencent
    }

    async fn open(
        &self,
        credentials: &AsrCredentials,
        params: &RecognitionParams,
        events: RecognitionSender,
    ) -> Result<Box<dyn AsrStream>> {
        credentials.require_complete()?;
        let url = self.signed_url_at(credentials, params, unix_now(), rand::random())?;

        let (ws, _) = tokio::time::timeout(HANDSHAKE_TIMEOUT, connect_async(url))
            .await
            .map_err(|_| SpeechError::Provider("tencent asr handshake timed out".into()))?
            .map_err(|e| SpeechError::Provider(format!("tencent asr connect failed: {e}")))?;
        let (sink, mut stream) = ws.split();

        // The first frame acknowledges the handshake.
        let ack = tokio::time::timeout(HANDSHAKE_TIMEOUT, next_response(&mut stream))
            .await
            .map_err(|_| SpeechError::Provider("tencent asr handshake timed out".into()))??;
        if ack.code != 0 {
            return Err(SpeechError::Provider(format!(
                "tencent asr rejected handshake {}: {}",
                ack.code, ack.message
            )));
        }
        debug!(voice_id = %ack.voice_id, "Tencent ASR stream established");

        let reader = tokio::spawn(read_loop(stream, events));
        Ok(Box::new(TencentAsrStream {
            sink,
            reader: Some(reader),
        }))
    }
}

async fn next_response(stream: &mut SplitStream<WsStream>) -> Result<AsrResponse> {
    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => return Ok(serde_json::from_str(&text)?),
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => return Err(SpeechError::Provider(format!("tencent asr read failed: {e}"))),
        }
    }
    Err(SpeechError::Provider("tencent asr closed during handshake".into()))
}

async fn read_loop(mut stream: SplitStream<WsStream>, events: RecognitionSender) {
    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                let resp: AsrResponse = match serde_json::from_str(&text) {
                    Ok(r) => r,
                    Err(e) => {
                        warn!(%e, "Unparsable Tencent ASR frame");
                        continue;
                    }
                };
                if let Some(event) = map_asr_response(&resp) {
                    if events.send(event).await.is_err() {
                        break;
                    }
                }
                if resp.is_last() {
                    break;
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                let _ = events
                    .send(RecognitionEvent::Error {
                        message: format!("tencent asr connection error: {e}"),
                    })
                    .await;
                break;
            }
        }
    }
}

struct TencentAsrStream {
    sink: SplitSink<WsStream, Message>,
    reader: Option<JoinHandle<()>>,
}

#[async_trait]
impl AsrStream for TencentAsrStream {
    async fn send_audio(&mut self, audio: &[u8]) -> Result<()> {
        self.sink
            .send(Message::Binary(audio.to_vec().into()))
            .await
            .map_err(|e| SpeechError::Provider(format!("tencent asr write failed: {e}")))
    }

    async fn finish(&mut self) -> Result<()> {
        let Some(reader) = self.reader.take() else {
            return Ok(());
        };
        self.sink
            .send(Message::Text(END_FRAME.to_string().into()))
            .await
            .map_err(|e| SpeechError::Provider(format!("tencent asr end failed: {e}")))?;
        if tokio::time::timeout(FINISH_TIMEOUT, reader).await.is_err() {
            warn!("Tencent ASR did not deliver final results in time");
        }
        let _ = self.sink.close().await;
        Ok(())
    }
}

impl Drop for TencentAsrStream {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> AsrCredentials {
        AsrCredentials {
            app_id: "1259228442".into(),
            secret_id: "AKIDtest".into(),
            secret_key: "secret".into(),
            engine_model: "16k_zh".into(),
        }
    }

    #[test]
    fn test_signed_url_shape() {
        let params = RecognitionParams {
            model: None,
            voice_id: "conn-1".into(),
        };
        let url = TencentAsr::new()
            .signed_url_at(&creds(), &params, 1_700_000_000, 42)
            .unwrap();
        assert!(url.starts_with("wss://asr.cloud.tencent.com/asr/v2/1259228442?engine_model_type=16k_zh&expired=1700086400"));
        assert!(url.contains("&nonce=42&"));
        assert!(url.contains("&voice_id=conn-1&"));
        assert!(url.contains("&signature="));
    }

    #[test]
    fn test_model_override() {
        let params = RecognitionParams {
            model: Some("8k_en".into()),
            voice_id: "v".into(),
        };
        let url = TencentAsr::new().signed_url_at(&creds(), &params, 1, 1).unwrap();
        assert!(url.contains("engine_model_type=8k_en"));
    }

    #[test]
    fn test_signature_is_deterministic() {
        let params = RecognitionParams::default();
        let asr = TencentAsr::new();
        let a = asr.signed_url_at(&creds(), &params, 5, 7).unwrap();
        let b = asr.signed_url_at(&creds(), &params, 5, 7).unwrap();
        let c = asr.signed_url_at(&creds(), &params, 5, 8).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_map_slices() {
        let parse = |s: &str| -> AsrResponse { serde_json::from_str(s).unwrap() };

        let begin = parse(r#"{"code":0,"result":{"slice_type":0,"index":3,"voice_text_str":""}}"#);
        assert_eq!(
            map_asr_response(&begin),
            Some(RecognitionEvent::SentenceBegin { index: 3 })
        );

        let partial = parse(r#"{"code":0,"result":{"slice_type":1,"index":3,"voice_text_str":"你好"}}"#);
        assert_eq!(
            map_asr_response(&partial),
            Some(RecognitionEvent::Partial {
                index: 3,
                text: "你好".into()
            })
        );

        let end = parse(r#"{"code":0,"final":0,"result":{"slice_type":2,"index":3,"voice_text_str":"你好。"}}"#);
        assert!(matches!(map_asr_response(&end), Some(RecognitionEvent::Final { .. })));

        let done = parse(r#"{"code":0,"message":"success","final":1}"#);
        assert_eq!(map_asr_response(&done), None);
        assert!(done.is_last());
    }

    #[test]
    fn test_map_error_code() {
        let resp: AsrResponse =
            serde_json::from_str(r#"{"code":4008,"message":"client timeout"}"#).unwrap();
        match map_asr_response(&resp) {
            Some(RecognitionEvent::Error { message }) => assert!(message.contains("4008")),
            other => panic!("unexpected {other:?}"),
        }
        assert!(resp.is_last());
    }

    #[tokio::test]
    async fn test_open_without_credentials_is_config_error() {
        let (tx, _rx) = tokio::sync::mpsc::channel(1);
        let result = TencentAsr::new()
            .open(&AsrCredentials::default(), &RecognitionParams::default(), tx)
            .await;
        assert!(matches!(result, Err(SpeechError::Config(_))));
    }
}
