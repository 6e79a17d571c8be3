//! Connection-facing operations of the speech pipeline.
//!
//! Every operation that changes a session acknowledges through the
//! connection's event sink after the change is complete, so an "ended"
//! acknowledgement is always the last event of its recognizer.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use speechlink_core::config::Config;
use speechlink_core::error::{Result, SpeechError};
use speechlink_core::protocol::ServerEvent;
use speechlink_core::types::{ProviderId, SynthesisEvent};
use speechlink_providers::RecognitionParams;

use crate::asr::WriteOutcome;
use crate::events::EventSink;
use crate::selector::ProviderSelector;
use crate::tts::SpeechSynthesizer;
use crate::session::{SessionInfo, SessionRegistry};

/// Result of pushing one audio frame.
pub type PushOutcome = WriteOutcome;

/// Outcome of ending or cancelling a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Ended,
    Cancelled,
    /// There was no active recognition to stop.
    NotActive,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ended => "ended",
            Self::Cancelled => "cancelled",
            Self::NotActive => "not_active",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One synthesis call waiting for its turn on a connection.
struct SynthesisJob {
    text: String,
    voice_gender: Option<String>,
    streaming: bool,
    request_id: String,
}

/// A registered connection: its outbound queue and its synthesis queue.
/// Synthesis calls on one connection are delivered one after another.
struct Connection {
    sink: EventSink,
    synthesis: mpsc::UnboundedSender<SynthesisJob>,
}

pub struct SpeechPipeline {
    registry: SessionRegistry,
    selector: Arc<ProviderSelector>,
    connections: RwLock<HashMap<String, Connection>>,
}

impl SpeechPipeline {
    pub fn new(selector: ProviderSelector) -> Self {
        Self {
            registry: SessionRegistry::new(),
            selector: Arc::new(selector),
            connections: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_config(config: Arc<Config>) -> Result<Self> {
        Ok(Self::new(ProviderSelector::from_config(config)?))
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn selector(&self) -> &ProviderSelector {
        &self.selector
    }

    /// Wire a connection's outbound queue. Must precede any other operation
    /// for that connection.
    pub async fn register_connection(&self, conn_id: &str, sink: EventSink) {
        let (synthesis, jobs) = mpsc::unbounded_channel();
        tokio::spawn(run_synthesis(Arc::clone(&self.selector), sink.clone(), jobs));
        self.connections
            .write()
            .await
            .insert(conn_id.to_string(), Connection { sink, synthesis });
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn sessions(&self) -> Vec<SessionInfo> {
        self.registry.list().await
    }

    async fn sink(&self, conn_id: &str) -> Result<EventSink> {
        self.connections
            .read()
            .await
            .get(conn_id)
            .map(|conn| conn.sink.clone())
            .ok_or_else(|| SpeechError::Session(format!("unknown connection '{conn_id}'")))
    }

    /// Begin recognition. Any recognizer already running on the session is
    /// stopped before the new one is established. The session becomes
    /// active only after the "started" acknowledgement has been queued.
    pub async fn start_session(
        &self,
        conn_id: &str,
        user_id: &str,
        model: Option<String>,
        voice_gender: Option<String>,
    ) -> Result<ProviderId> {
        let sink = self.sink(conn_id).await?;
        let session = self.registry.get_or_create(conn_id, user_id, &sink).await;
        let _activation = session.activation().await;

        if let Some(previous) = session.take_recognizer() {
            debug!(%conn_id, "Stopping previous recognizer before restart");
            previous.stop().await;
        }

        let current = session.info();
        let model = model.or(current.model);
        let voice_gender = voice_gender.or(current.voice_gender);
        let params = RecognitionParams {
            model: model.clone(),
            voice_id: Uuid::new_v4().to_string(),
        };

        let (recognizer, provider) = self
            .selector
            .select_asr(params, session.sink().clone())
            .await?;
        session.install(recognizer, provider, model, voice_gender);
        session
            .sink()
            .send(ServerEvent::system("started", "session started"));
        session.activate();

        info!(%conn_id, %user_id, %provider, "Session started");
        Ok(provider)
    }

    /// Feed one frame of canonical PCM. Frames for a connection without an
    /// active session are dropped without any other effect.
    pub async fn push_audio(&self, conn_id: &str, frame: &[u8]) -> Result<PushOutcome> {
        let Some(recognizer) = self
            .registry
            .get(conn_id)
            .await
            .and_then(|session| session.active_recognizer())
        else {
            trace!(%conn_id, bytes = frame.len(), "Dropping frame for inactive session");
            return Ok(PushOutcome::Dropped);
        };
        if frame.is_empty() {
            return Err(SpeechError::InvalidInput("empty audio frame".into()));
        }

        let outcome = recognizer.write(frame);
        if outcome == PushOutcome::Dropped {
            debug!(%conn_id, bytes = frame.len(), "Recognizer dropped frame");
        }
        Ok(outcome)
    }

    /// Flush pending audio, deliver final results, then acknowledge.
    pub async fn end_session(&self, conn_id: &str) -> (SessionStatus, String) {
        self.finish_session(conn_id, false).await
    }

    /// Abort recognition immediately, discarding pending audio.
    pub async fn cancel_session(&self, conn_id: &str) -> (SessionStatus, String) {
        self.finish_session(conn_id, true).await
    }

    async fn finish_session(&self, conn_id: &str, cancel: bool) -> (SessionStatus, String) {
        let Some(session) = self.registry.get(conn_id).await else {
            return self.not_active(conn_id).await;
        };
        let _activation = session.activation().await;
        let Some(recognizer) = session.take_recognizer() else {
            return self.not_active(conn_id).await;
        };

        let (status, message) = if cancel {
            recognizer.cancel().await;
            (SessionStatus::Cancelled, "session cancelled")
        } else {
            recognizer.stop().await;
            (SessionStatus::Ended, "session ended")
        };
        session
            .sink()
            .send(ServerEvent::system(status.as_str(), message));
        info!(%conn_id, %status, "Session finished");
        (status, message.to_string())
    }

    async fn not_active(&self, conn_id: &str) -> (SessionStatus, String) {
        let message = "no active session";
        if let Ok(sink) = self.sink(conn_id).await {
            sink.send(ServerEvent::system(SessionStatus::NotActive.as_str(), message));
        }
        (SessionStatus::NotActive, message.to_string())
    }

    /// Update model/voice parameters. They apply from the next start.
    pub async fn update_session(
        &self,
        conn_id: &str,
        user_id: &str,
        model: Option<String>,
        voice_gender: Option<String>,
    ) -> Result<()> {
        let sink = self.sink(conn_id).await?;
        let session = self.registry.get_or_create(conn_id, user_id, &sink).await;
        session.update_params(model, voice_gender);
        sink.send(ServerEvent::system("updated", "session parameters updated"));
        Ok(())
    }

    /// Validate and schedule a synthesis call; returns its request id.
    ///
    /// Audio is delivered as binary frames followed by one `tts_complete`
    /// event, or an `error` event carrying the request id. Calls on one
    /// connection are delivered in request order without interleaving.
    pub async fn request_synthesis(
        &self,
        conn_id: &str,
        text: &str,
        voice_gender: Option<String>,
        streaming: bool,
        request_id: Option<String>,
    ) -> Result<String> {
        if text.trim().is_empty() {
            return Err(SpeechError::InvalidInput("'text' must not be empty".into()));
        }
        let synthesis = self
            .connections
            .read()
            .await
            .get(conn_id)
            .map(|conn| conn.synthesis.clone())
            .ok_or_else(|| SpeechError::Session(format!("unknown connection '{conn_id}'")))?;
        let voice_gender = match voice_gender {
            Some(gender) => Some(gender),
            None => match self.registry.get(conn_id).await {
                Some(session) => session.voice_gender(),
                None => None,
            },
        };
        let request_id = request_id.unwrap_or_else(|| Uuid::new_v4().to_string());

        synthesis
            .send(SynthesisJob {
                text: text.to_string(),
                voice_gender,
                streaming,
                request_id: request_id.clone(),
            })
            .map_err(|_| SpeechError::Session(format!("connection '{conn_id}' is closing")))?;
        Ok(request_id)
    }

    /// Forget a connection and tear down its session.
    pub async fn disconnect(&self, conn_id: &str) {
        self.connections.write().await.remove(conn_id);
        if self.registry.remove(conn_id).await.is_some() {
            debug!(%conn_id, "Session torn down on disconnect");
        }
    }
}

/// Deliver a connection's synthesis calls in order until the connection
/// is forgotten or its outbound queue closes.
async fn run_synthesis(
    selector: Arc<ProviderSelector>,
    sink: EventSink,
    mut jobs: mpsc::UnboundedReceiver<SynthesisJob>,
) {
    while let Some(job) = jobs.recv().await {
        if sink.is_closed() {
            break;
        }
        deliver_synthesis(&selector, &sink, job).await;
    }
    trace!(conn_id = %sink.conn_id(), "Synthesis queue closed");
}

/// How one provider's attempt at a synthesis call ended.
enum Attempt {
    /// Completed, or the connection went away.
    Delivered,
    Failed {
        message: String,
        /// Whether any audio already reached the client.
        started: bool,
    },
}

/// Run one synthesis call. A provider that fails before producing any
/// audio is replaced by the next one in priority order; once audio has
/// been delivered a failure is reported as is.
async fn deliver_synthesis(selector: &ProviderSelector, sink: &EventSink, job: SynthesisJob) {
    let SynthesisJob {
        text,
        voice_gender,
        streaming,
        request_id,
    } = job;
    let fail = |message: String| {
        sink.send(ServerEvent::Error {
            message,
            request_id: Some(request_id.clone()),
        });
    };

    let mut start = 0;
    let mut early_failure: Option<String> = None;
    loop {
        let (synthesizer, provider, position) = match selector.select_tts_from(start).await {
            Ok(selected) => selected,
            Err(e) => {
                warn!(conn_id = %sink.conn_id(), %request_id, error = %e, "No synthesizer available");
                let message = match (e, early_failure) {
                    (SpeechError::ProvidersUnavailable { .. }, Some(message)) => message,
                    (e, _) => e.to_string(),
                };
                fail(message);
                return;
            }
        };
        debug!(conn_id = %sink.conn_id(), %request_id, %provider, streaming, "Synthesis started");

        let attempt = if streaming {
            stream_synthesis(&synthesizer, sink, &text, voice_gender.as_deref(), &request_id).await
        } else {
            synthesize_whole(&synthesizer, sink, &text, voice_gender.as_deref(), &request_id).await
        };
        match attempt {
            Attempt::Delivered => return,
            Attempt::Failed {
                message,
                started: true,
            } => {
                fail(message);
                return;
            }
            Attempt::Failed {
                message,
                started: false,
            } => {
                warn!(
                    conn_id = %sink.conn_id(),
                    %request_id,
                    %provider,
                    error = %message,
                    "Synthesis failed before any audio, trying next provider"
                );
                early_failure = Some(message);
                start = position + 1;
            }
        }
    }
}

async fn synthesize_whole(
    synthesizer: &SpeechSynthesizer,
    sink: &EventSink,
    text: &str,
    voice_gender: Option<&str>,
    request_id: &str,
) -> Attempt {
    match synthesizer.synthesize(text, voice_gender).await {
        Ok(out) => {
            let chunks = usize::from(!out.audio.is_empty());
            if chunks > 0 {
                sink.send_audio(out.audio);
            }
            sink.send(ServerEvent::TtsComplete {
                request_id: request_id.to_string(),
                chunks,
            });
            Attempt::Delivered
        }
        Err(e) => Attempt::Failed {
            message: e.to_string(),
            started: false,
        },
    }
}

async fn stream_synthesis(
    synthesizer: &SpeechSynthesizer,
    sink: &EventSink,
    text: &str,
    voice_gender: Option<&str>,
    request_id: &str,
) -> Attempt {
    let mut stream = synthesizer.synthesize_stream(text, voice_gender);
    let mut chunks = 0;
    while let Some(event) = stream.next().await {
        match event {
            SynthesisEvent::Chunk(audio) => {
                chunks += 1;
                if !sink.send_audio(audio) {
                    trace!(%request_id, "Connection gone, leaving synthesis unobserved");
                    return Attempt::Delivered;
                }
            }
            SynthesisEvent::Complete => {
                sink.send(ServerEvent::TtsComplete {
                    request_id: request_id.to_string(),
                    chunks,
                });
                return Attempt::Delivered;
            }
            SynthesisEvent::Error(message) => {
                return Attempt::Failed {
                    message,
                    started: chunks > 0,
                };
            }
        }
    }
    Attempt::Delivered
}

#[cfg(test)]
mod tests {
    use super::*;
    use speechlink_core::config::PipelineConfig;
    use speechlink_core::credentials::{AsrCredentials, CredentialResolver, TtsCredentials};
    use speechlink_providers::{asr_provider, tts_provider};

    use crate::events::Outbound;

    struct NoCredentials;

    impl CredentialResolver for NoCredentials {
        fn asr_config(&self) -> Result<AsrCredentials> {
            Ok(AsrCredentials::default())
        }

        fn tts_config(&self) -> Result<TtsCredentials> {
            Ok(TtsCredentials::default())
        }
    }

    fn loopback_pipeline() -> SpeechPipeline {
        SpeechPipeline::new(ProviderSelector::new(
            vec![asr_provider(ProviderId::Loopback)],
            vec![tts_provider(ProviderId::Loopback)],
            Arc::new(NoCredentials),
            PipelineConfig::default(),
        ))
    }

    #[tokio::test]
    async fn test_push_without_session_is_noop() {
        let pipeline = loopback_pipeline();
        let (sink, mut rx) = EventSink::channel("c1");
        pipeline.register_connection("c1", sink).await;

        let outcome = pipeline.push_audio("c1", &[0u8; 320]).await.unwrap();
        assert_eq!(outcome, PushOutcome::Dropped);
        assert!(pipeline.registry().is_empty().await);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_start_requires_registered_connection() {
        let pipeline = loopback_pipeline();
        let err = pipeline.start_session("ghost", "u1", None, None).await.unwrap_err();
        assert!(matches!(err, SpeechError::Session(_)));
    }

    #[tokio::test]
    async fn test_end_without_start() {
        let pipeline = loopback_pipeline();
        let (sink, mut rx) = EventSink::channel("c1");
        pipeline.register_connection("c1", sink).await;

        let (status, _) = pipeline.end_session("c1").await;
        assert_eq!(status, SessionStatus::NotActive);
        assert_eq!(
            rx.recv().await,
            Some(Outbound::Event(ServerEvent::system("not_active", "no active session")))
        );
    }

    #[tokio::test]
    async fn test_start_push_end() {
        let pipeline = loopback_pipeline();
        let (sink, mut rx) = EventSink::channel("c1");
        pipeline.register_connection("c1", sink).await;

        let provider = pipeline
            .start_session("c1", "u1", Some("m1".into()), None)
            .await
            .unwrap();
        assert_eq!(provider, ProviderId::Loopback);
        assert_eq!(
            rx.recv().await,
            Some(Outbound::Event(ServerEvent::system("started", "session started")))
        );

        assert_eq!(
            pipeline.push_audio("c1", &[0u8; 320]).await.unwrap(),
            PushOutcome::Accepted
        );
        let (status, _) = pipeline.end_session("c1").await;
        assert_eq!(status, SessionStatus::Ended);

        let mut events = Vec::new();
        while let Ok(Outbound::Event(e)) = rx.try_recv() {
            events.push(e);
        }
        assert_eq!(
            events.last(),
            Some(&ServerEvent::system("ended", "session ended"))
        );
        assert!(events.contains(&ServerEvent::Final {
            result: "received 1 frame(s), 320 bytes".into()
        }));

        let info = &pipeline.sessions().await[0];
        assert!(!info.active);
        assert_eq!(info.model.as_deref(), Some("m1"));
    }

    #[tokio::test]
    async fn test_synthesis_rejects_empty_text() {
        let pipeline = loopback_pipeline();
        let (sink, _rx) = EventSink::channel("c1");
        pipeline.register_connection("c1", sink).await;
        let err = pipeline
            .request_synthesis("c1", "   ", None, true, None)
            .await
            .unwrap_err();
        assert!(matches!(err, SpeechError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_non_streaming_synthesis_sends_one_frame() {
        let pipeline = loopback_pipeline();
        let (sink, mut rx) = EventSink::channel("c1");
        pipeline.register_connection("c1", sink).await;

        let id = pipeline
            .request_synthesis("c1", "one two", None, false, Some("r1".into()))
            .await
            .unwrap();
        assert_eq!(id, "r1");

        match rx.recv().await {
            Some(Outbound::Audio(audio)) => assert_eq!(audio.len(), 6_400),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            rx.recv().await,
            Some(Outbound::Event(ServerEvent::TtsComplete {
                request_id: "r1".into(),
                chunks: 1
            }))
        );
    }

    #[tokio::test]
    async fn test_disconnect_tears_down() {
        let pipeline = loopback_pipeline();
        let (sink, _rx) = EventSink::channel("c1");
        pipeline.register_connection("c1", sink).await;
        pipeline.start_session("c1", "u1", None, None).await.unwrap();
        assert_eq!(pipeline.connection_count().await, 1);

        pipeline.disconnect("c1").await;
        assert_eq!(pipeline.connection_count().await, 0);
        assert!(pipeline.registry().is_empty().await);
        assert_eq!(
            pipeline.push_audio("c1", &[0u8; 2]).await.unwrap(),
            PushOutcome::Dropped
        );
    }

    #[tokio::test]
    async fn test_synthesis_after_disconnect_is_rejected() {
        let pipeline = loopback_pipeline();
        let (sink, _rx) = EventSink::channel("c1");
        pipeline.register_connection("c1", sink).await;
        pipeline.disconnect("c1").await;

        let err = pipeline
            .request_synthesis("c1", "hello", None, true, None)
            .await
            .unwrap_err();
        assert!(matches!(err, SpeechError::Session(_)));
    }
}
