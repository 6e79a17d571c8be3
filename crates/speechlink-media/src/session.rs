//! Session registry: one session per live connection.
//!
//! The registry lock only guards the connection→session map. Each session
//! carries its own state lock, held for state transitions only and never
//! across a provider call, plus an activation lock that serializes
//! start/end/cancel on that one session.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::debug;

use speechlink_core::types::ProviderId;

use crate::asr::{RecognizerState, StreamingRecognizer};
use crate::events::EventSink;

#[derive(Default)]
struct SessionState {
    active: bool,
    model: Option<String>,
    voice_gender: Option<String>,
    recognizer: Option<Arc<StreamingRecognizer>>,
    provider: Option<ProviderId>,
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub conn_id: String,
    pub user_id: String,
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice_gender: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderId>,
}

pub struct Session {
    conn_id: String,
    user_id: String,
    sink: EventSink,
    state: Mutex<SessionState>,
    activation: tokio::sync::Mutex<()>,
}

impl Session {
    fn new(conn_id: &str, user_id: &str, sink: EventSink) -> Self {
        Self {
            conn_id: conn_id.to_string(),
            user_id: user_id.to_string(),
            sink,
            state: Mutex::new(SessionState::default()),
            activation: tokio::sync::Mutex::new(()),
        }
    }

    pub fn conn_id(&self) -> &str {
        &self.conn_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn sink(&self) -> &EventSink {
        &self.sink
    }

    pub fn is_active(&self) -> bool {
        self.state().active
    }

    pub fn info(&self) -> SessionInfo {
        let state = self.state();
        SessionInfo {
            conn_id: self.conn_id.clone(),
            user_id: self.user_id.clone(),
            active: state.active,
            model: state.model.clone(),
            voice_gender: state.voice_gender.clone(),
            provider: state.provider,
        }
    }

    /// Serializes activation changes on this session.
    pub async fn activation(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.activation.lock().await
    }

    /// The recognizer to feed, if the session is active. A recognizer that
    /// stopped on its own (provider failure) is cleared and the session
    /// deactivated.
    pub fn active_recognizer(&self) -> Option<Arc<StreamingRecognizer>> {
        let mut state = self.state();
        if !state.active {
            return None;
        }
        let recognizer = state.recognizer.clone()?;
        if recognizer.state() == RecognizerState::Stopped {
            debug!(conn_id = %self.conn_id, "Clearing stopped recognizer");
            state.active = false;
            state.recognizer = None;
            return None;
        }
        Some(recognizer)
    }

    /// Deactivate and detach the current recognizer, if any.
    pub fn take_recognizer(&self) -> Option<Arc<StreamingRecognizer>> {
        let mut state = self.state();
        state.active = false;
        state.recognizer.take()
    }

    /// Attach a connected recognizer. The session stays inactive until
    /// [`Session::activate`].
    pub fn install(
        &self,
        recognizer: Arc<StreamingRecognizer>,
        provider: ProviderId,
        model: Option<String>,
        voice_gender: Option<String>,
    ) {
        let mut state = self.state();
        state.recognizer = Some(recognizer);
        state.provider = Some(provider);
        state.model = model;
        state.voice_gender = voice_gender;
    }

    pub fn activate(&self) {
        self.state().active = true;
    }

    /// Merge new parameters; `None` keeps the current value.
    pub fn update_params(&self, model: Option<String>, voice_gender: Option<String>) {
        let mut state = self.state();
        if model.is_some() {
            state.model = model;
        }
        if voice_gender.is_some() {
            state.voice_gender = voice_gender;
        }
    }

    pub fn voice_gender(&self) -> Option<String> {
        self.state().voice_gender.clone()
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Owns every live session, keyed by connection id.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent for a still-open connection: the existing session is
    /// returned and `user_id`/`sink` are ignored.
    pub async fn get_or_create(&self, conn_id: &str, user_id: &str, sink: &EventSink) -> Arc<Session> {
        if let Some(session) = self.sessions.read().await.get(conn_id) {
            return Arc::clone(session);
        }
        let mut sessions = self.sessions.write().await;
        Arc::clone(sessions.entry(conn_id.to_string()).or_insert_with(|| {
            debug!(%conn_id, %user_id, "Session created");
            Arc::new(Session::new(conn_id, user_id, sink.clone()))
        }))
    }

    pub async fn get(&self, conn_id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(conn_id).cloned()
    }

    /// Remove and tear down a session. Outstanding recognition is aborted
    /// without waiting; safe when nothing is outstanding or the session is
    /// unknown.
    pub async fn remove(&self, conn_id: &str) -> Option<Arc<Session>> {
        let session = self.sessions.write().await.remove(conn_id)?;
        if let Some(recognizer) = session.take_recognizer() {
            recognizer.abort();
        }
        debug!(%conn_id, "Session removed");
        Some(session)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    pub async fn list(&self) -> Vec<SessionInfo> {
        self.sessions.read().await.values().map(|s| s.info()).collect()
    }
}
