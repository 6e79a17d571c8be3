//! Provider credential resolution.
//!
//! Adapters take a snapshot of the resolved credentials when they are
//! created and never re-read them mid-stream.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::Config;
use crate::error::{Result, SpeechError};

/// Credentials and engine settings for speech recognition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AsrCredentials {
    pub app_id: String,
    pub secret_id: String,
    pub secret_key: String,
    pub engine_model: String,
}

impl AsrCredentials {
    /// Fail with a config error when any signing field is empty.
    pub fn require_complete(&self) -> Result<()> {
        require_fields(&[
            ("app_id", &self.app_id),
            ("secret_id", &self.secret_id),
            ("secret_key", &self.secret_key),
        ])
    }
}

/// Credentials and voice/codec settings for speech synthesis.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TtsCredentials {
    pub app_id: String,
    pub secret_id: String,
    pub secret_key: String,
    pub voice_type_by_gender: HashMap<String, i64>,
    pub default_voice: i64,
    pub codec: String,
    pub sample_rate: u32,
}

impl TtsCredentials {
    pub fn require_complete(&self) -> Result<()> {
        require_fields(&[
            ("app_id", &self.app_id),
            ("secret_id", &self.secret_id),
            ("secret_key", &self.secret_key),
        ])
    }

    /// Voice type for a requested gender, falling back to the default voice.
    pub fn voice_for(&self, gender: Option<&str>) -> i64 {
        gender
            .map(|g| g.trim().to_ascii_lowercase())
            .and_then(|g| self.voice_type_by_gender.get(&g).copied())
            .unwrap_or(self.default_voice)
    }
}

fn require_fields(fields: &[(&str, &String)]) -> Result<()> {
    let missing: Vec<&str> = fields
        .iter()
        .filter(|(_, v)| v.is_empty())
        .map(|(k, _)| *k)
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(SpeechError::Config(format!(
            "missing provider credentials: {}",
            missing.join(", ")
        )))
    }
}

/// Source of provider credentials. Implementations may cache.
pub trait CredentialResolver: Send + Sync {
    fn asr_config(&self) -> Result<AsrCredentials>;
    fn tts_config(&self) -> Result<TtsCredentials>;
}

/// Resolves credentials from the loaded [`Config`], reading secrets from
/// direct fields or their `*_env` environment variables.
pub struct ConfigCredentialResolver {
    config: Arc<Config>,
}

impl ConfigCredentialResolver {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }
}

impl CredentialResolver for ConfigCredentialResolver {
    fn asr_config(&self) -> Result<AsrCredentials> {
        let asr = &self.config.asr;
        Ok(AsrCredentials {
            app_id: asr.app_id.clone().unwrap_or_default(),
            secret_id: asr.resolve_secret_id().unwrap_or_default(),
            secret_key: asr.resolve_secret_key().unwrap_or_default(),
            engine_model: asr.engine_model.clone(),
        })
    }

    fn tts_config(&self) -> Result<TtsCredentials> {
        let tts = &self.config.tts;
        Ok(TtsCredentials {
            app_id: tts.app_id.clone().unwrap_or_default(),
            secret_id: tts.resolve_secret_id().unwrap_or_default(),
            secret_key: tts.resolve_secret_key().unwrap_or_default(),
            voice_type_by_gender: tts.voices.clone(),
            default_voice: tts.default_voice,
            codec: tts.codec.clone(),
            sample_rate: tts.sample_rate,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolver_reads_config() {
        let config = Config::parse(
            r#"{
                asr: { app_id: "1300", secret_id: "AKID", secret_key: "sk", engine_model: "8k_zh" },
                tts: { codec: "mp3", voices: { female: 7 } },
            }"#,
        )
        .unwrap();
        let resolver = ConfigCredentialResolver::new(Arc::new(config));

        let asr = resolver.asr_config().unwrap();
        assert_eq!(asr.app_id, "1300");
        assert_eq!(asr.engine_model, "8k_zh");
        assert!(asr.require_complete().is_ok());

        let tts = resolver.tts_config().unwrap();
        assert_eq!(tts.codec, "mp3");
        assert_eq!(tts.voice_for(Some("Female")), 7);
    }

    #[test]
    fn test_incomplete_credentials_name_missing_fields() {
        let creds = AsrCredentials {
            app_id: "1300".into(),
            ..Default::default()
        };
        let err = creds.require_complete().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("secret_id"));
        assert!(msg.contains("secret_key"));
        assert!(!msg.contains("app_id"));
    }

    #[test]
    fn test_voice_falls_back_to_default() {
        let creds = TtsCredentials {
            default_voice: 42,
            voice_type_by_gender: HashMap::from([("male".to_string(), 9)]),
            ..Default::default()
        };
        assert_eq!(creds.voice_for(None), 42);
        assert_eq!(creds.voice_for(Some("robot")), 42);
        assert_eq!(creds.voice_for(Some("male")), 9);
    }
}
