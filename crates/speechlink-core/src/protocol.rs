//! Wire protocol between a connection and the speech pipeline.
//!
//! Inbound text frames are JSON control messages keyed by `action`; inbound
//! binary frames are raw audio. Outbound text frames are JSON events keyed by
//! `type`; synthesized audio goes out as binary frames.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SpeechError};

/// A control message sent by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum ControlMessage {
    /// Begin a recognition session.
    Start {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        voice_gender: Option<String>,
    },

    /// Adjust parameters of the running session.
    AudioControl {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        voice_gender: Option<String>,
    },

    /// Finish recognition, flushing pending audio.
    End,

    /// Abort recognition, discarding pending audio.
    Cancel,

    /// Synthesize speech for `text`.
    Synthesize {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        voice_gender: Option<String>,
        #[serde(default = "default_streaming")]
        streaming: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
}

fn default_streaming() -> bool {
    true
}

fn reject_blank(field: &str, value: &Option<String>) -> Result<()> {
    match value {
        Some(v) if v.trim().is_empty() => Err(SpeechError::InvalidInput(format!(
            "'{field}' must not be empty"
        ))),
        _ => Ok(()),
    }
}

impl ControlMessage {
    /// Parse and validate a control message. Rejections have no side effects.
    pub fn parse(text: &str) -> Result<Self> {
        let msg: ControlMessage = serde_json::from_str(text)
            .map_err(|e| SpeechError::InvalidInput(format!("invalid control message: {e}")))?;
        msg.validate()?;
        Ok(msg)
    }

    fn validate(&self) -> Result<()> {
        match self {
            Self::Start { model, voice_gender } | Self::AudioControl { model, voice_gender } => {
                reject_blank("model", model)?;
                reject_blank("voice_gender", voice_gender)
            }
            Self::Synthesize { text, .. } if text.trim().is_empty() => Err(
                SpeechError::InvalidInput("'text' must not be empty".into()),
            ),
            _ => Ok(()),
        }
    }
}

/// An event delivered to the client as a JSON text frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// `true` when a sentence begins, `false` when it ends.
    SentenceState { state: bool },

    Partial { result: String },

    Final { result: String },

    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },

    /// Acknowledgement of a control message.
    System { status: String, message: String },

    /// A synthesis call finished; all of its audio frames precede this event.
    TtsComplete { request_id: String, chunks: usize },
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            request_id: None,
        }
    }

    pub fn system(status: impl Into<String>, message: impl Into<String>) -> Self {
        Self::System {
            status: status.into(),
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_start() {
        let msg = ControlMessage::parse(r#"{"action":"start","model":"m1"}"#).unwrap();
        assert_eq!(
            msg,
            ControlMessage::Start {
                model: Some("m1".into()),
                voice_gender: None
            }
        );
    }

    #[test]
    fn test_parse_audio_control_and_end() {
        let msg =
            ControlMessage::parse(r#"{"action":"audio-control","voice_gender":"male"}"#).unwrap();
        assert!(matches!(msg, ControlMessage::AudioControl { voice_gender: Some(ref g), .. } if g == "male"));
        assert_eq!(ControlMessage::parse(r#"{"action":"end"}"#).unwrap(), ControlMessage::End);
        assert_eq!(ControlMessage::parse(r#"{"action":"cancel"}"#).unwrap(), ControlMessage::Cancel);
    }

    #[test]
    fn test_synthesize_defaults_to_streaming() {
        let msg = ControlMessage::parse(r#"{"action":"synthesize","text":"hello"}"#).unwrap();
        match msg {
            ControlMessage::Synthesize { streaming, request_id, .. } => {
                assert!(streaming);
                assert!(request_id.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_rejects_malformed_input() {
        for bad in [
            "not json",
            r#"{"model":"m1"}"#,
            r#"{"action":"dance"}"#,
            r#"{"action":"start","model":"  "}"#,
            r#"{"action":"synthesize","text":""}"#,
        ] {
            let err = ControlMessage::parse(bad).unwrap_err();
            assert!(matches!(err, SpeechError::InvalidInput(_)), "{bad}: {err}");
        }
    }

    #[test]
    fn test_event_shapes() {
        assert_eq!(
            ServerEvent::SentenceState { state: true }.to_json().unwrap(),
            r#"{"type":"sentence_state","state":true}"#
        );
        assert_eq!(
            ServerEvent::Partial { result: "he".into() }.to_json().unwrap(),
            r#"{"type":"partial","result":"he"}"#
        );
        assert_eq!(
            ServerEvent::error("boom").to_json().unwrap(),
            r#"{"type":"error","message":"boom"}"#
        );
    }
}
