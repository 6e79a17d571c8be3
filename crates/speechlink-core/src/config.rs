//! Configuration loading and validation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SpeechError};
use crate::types::ProviderId;

/// Top-level speechlink configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<GatewayConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,

    #[serde(default)]
    pub asr: AsrConfig,

    #[serde(default)]
    pub tts: TtsConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,

    /// Close a connection (and drop its session) after this many seconds
    /// without an inbound frame. 0 disables the timeout.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Largest inbound WebSocket frame accepted, in bytes.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

fn default_port() -> u16 {
    18790
}

fn default_idle_timeout() -> u64 {
    60
}

fn default_max_frame_bytes() -> usize {
    1_048_576
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: None,
            idle_timeout_secs: default_idle_timeout(),
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "speechlink_media=trace").
    #[serde(default)]
    pub filters: Vec<String>,

    /// Output target: "stderr" (default) or "stdout".
    #[serde(default = "default_log_output")]
    pub output: String,
}

fn default_log_format() -> String {
    "plain".into()
}

fn default_log_output() -> String {
    "stderr".into()
}

/// Speech recognition provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsrConfig {
    /// Providers in priority order.
    #[serde(default = "default_providers")]
    pub providers: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_id_env: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_key_env: Option<String>,

    /// Provider engine model (e.g. "16k_zh", "16k_en").
    #[serde(default = "default_engine_model")]
    pub engine_model: String,
}

fn default_providers() -> Vec<String> {
    vec!["tencent".into(), "alibaba".into()]
}

fn default_engine_model() -> String {
    "16k_zh".into()
}

impl Default for AsrConfig {
    fn default() -> Self {
        Self {
            providers: default_providers(),
            app_id: None,
            secret_id: None,
            secret_id_env: None,
            secret_key: None,
            secret_key_env: None,
            engine_model: default_engine_model(),
        }
    }
}

impl AsrConfig {
    pub fn resolve_secret_id(&self) -> Option<String> {
        resolve_secret_field(&self.secret_id, &self.secret_id_env)
    }

    pub fn resolve_secret_key(&self) -> Option<String> {
        resolve_secret_field(&self.secret_key, &self.secret_key_env)
    }
}

/// Speech synthesis provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    /// Providers in priority order.
    #[serde(default = "default_providers")]
    pub providers: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_id_env: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_key_env: Option<String>,

    /// Voice type per requested gender ("male", "female").
    #[serde(default = "default_voices")]
    pub voices: HashMap<String, i64>,

    /// Voice used when the requested gender has no mapping.
    #[serde(default = "default_voice")]
    pub default_voice: i64,

    /// Provider output codec ("pcm", "mp3").
    #[serde(default = "default_codec")]
    pub codec: String,

    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
}

fn default_voices() -> HashMap<String, i64> {
    HashMap::from([("female".to_string(), 101001), ("male".to_string(), 101004)])
}

fn default_voice() -> i64 {
    101001
}

fn default_codec() -> String {
    "pcm".into()
}

fn default_sample_rate() -> u32 {
    16_000
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            providers: default_providers(),
            app_id: None,
            secret_id: None,
            secret_id_env: None,
            secret_key: None,
            secret_key_env: None,
            voices: default_voices(),
            default_voice: default_voice(),
            codec: default_codec(),
            sample_rate: default_sample_rate(),
        }
    }
}

impl TtsConfig {
    pub fn resolve_secret_id(&self) -> Option<String> {
        resolve_secret_field(&self.secret_id, &self.secret_id_env)
    }

    pub fn resolve_secret_key(&self) -> Option<String> {
        resolve_secret_field(&self.secret_key, &self.secret_key_env)
    }
}

/// Tuning knobs for the streaming pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Skip providers that report themselves as not implemented instead of
    /// probing them on every selection.
    #[serde(default)]
    pub skip_unimplemented_providers: bool,

    /// Upper bound on how long stopping a recognizer may take.
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,

    /// Frames buffered between `PushAudio` and the provider writer.
    #[serde(default = "default_audio_queue_depth")]
    pub audio_queue_depth: usize,

    /// Chunks buffered per synthesis call.
    #[serde(default = "default_chunk_queue_depth")]
    pub chunk_queue_depth: usize,
}

fn default_stop_timeout_ms() -> u64 {
    2_000
}

fn default_audio_queue_depth() -> usize {
    64
}

fn default_chunk_queue_depth() -> usize {
    32
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            skip_unimplemented_providers: false,
            stop_timeout_ms: default_stop_timeout_ms(),
            audio_queue_depth: default_audio_queue_depth(),
            chunk_queue_depth: default_chunk_queue_depth(),
        }
    }
}

impl PipelineConfig {
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

/// Resolve a secret: direct value first, then the named environment variable.
pub fn resolve_secret_field(direct: &Option<String>, env_var: &Option<String>) -> Option<String> {
    if let Some(val) = direct {
        if !val.is_empty() {
            return Some(val.clone());
        }
    }
    if let Some(env) = env_var {
        if let Ok(val) = std::env::var(env) {
            if !val.is_empty() {
                return Some(val);
            }
        }
    }
    None
}

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> String {
    let Ok(re) = regex::Regex::new(r"\$\{([^}]+)\}") else {
        return input.to_string();
    };
    re.replace_all(input, |caps: &regex::Captures| {
        std::env::var(&caps[1]).unwrap_or_else(|_| {
            tracing::warn!(var = &caps[1], "Config references unset environment variable");
            String::new()
        })
    })
    .into_owned()
}

fn parse_providers(names: &[String]) -> Result<Vec<ProviderId>> {
    names
        .iter()
        .map(|n| {
            ProviderId::parse(n).ok_or_else(|| SpeechError::Config(format!("Unknown provider '{n}'")))
        })
        .collect()
}

impl Config {
    /// Load config from a JSON5 file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        Self::parse(&raw)
    }

    /// Parse config text, substituting `${ENV_VAR}` references first.
    pub fn parse(raw: &str) -> Result<Self> {
        let substituted = substitute_env_vars(raw);
        json5::from_str(&substituted).map_err(|e| SpeechError::Config(e.to_string()))
    }

    /// Default config file location.
    pub fn default_path() -> PathBuf {
        data_dir().join("config.json")
    }

    pub fn gateway_port(&self) -> u16 {
        self.gateway.as_ref().map(|g| g.port).unwrap_or_else(default_port)
    }

    pub fn bind_addr(&self) -> String {
        self.gateway
            .as_ref()
            .and_then(|g| g.bind.clone())
            .unwrap_or_else(|| "0.0.0.0".to_string())
    }

    /// Idle timeout for connections, `None` when disabled.
    pub fn idle_timeout(&self) -> Option<Duration> {
        let secs = self
            .gateway
            .as_ref()
            .map(|g| g.idle_timeout_secs)
            .unwrap_or_else(default_idle_timeout);
        (secs > 0).then(|| Duration::from_secs(secs))
    }

    pub fn max_frame_bytes(&self) -> usize {
        self.gateway
            .as_ref()
            .map(|g| g.max_frame_bytes)
            .unwrap_or_else(default_max_frame_bytes)
    }

    /// ASR providers in priority order.
    pub fn asr_providers(&self) -> Result<Vec<ProviderId>> {
        parse_providers(&self.asr.providers)
    }

    /// TTS providers in priority order.
    pub fn tts_providers(&self) -> Result<Vec<ProviderId>> {
        parse_providers(&self.tts.providers)
    }

    /// Validate config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        for (section, names) in [("asr", &self.asr.providers), ("tts", &self.tts.providers)] {
            if names.is_empty() {
                errors.push(format!("{section}.providers is empty"));
            }
            for name in names {
                if ProviderId::parse(name).is_none() {
                    errors.push(format!("{section}.providers: unknown provider '{name}'"));
                }
            }
        }

        let needs_tencent = |names: &[String]| {
            names.iter().any(|n| ProviderId::parse(n) == Some(ProviderId::Tencent))
        };
        if needs_tencent(&self.asr.providers)
            && (self.asr.app_id.is_none()
                || self.asr.resolve_secret_id().is_none()
                || self.asr.resolve_secret_key().is_none())
        {
            warnings.push("asr: tencent credentials (app_id/secret_id/secret_key) are incomplete".into());
        }
        if needs_tencent(&self.tts.providers)
            && (self.tts.app_id.is_none()
                || self.tts.resolve_secret_id().is_none()
                || self.tts.resolve_secret_key().is_none())
        {
            warnings.push("tts: tencent credentials (app_id/secret_id/secret_key) are incomplete".into());
        }

        if crate::types::AudioEncoding::from_codec(&self.tts.codec).is_none() {
            errors.push(format!("tts.codec: unsupported codec '{}'", self.tts.codec));
        }

        if let Some(gw) = &self.gateway {
            if gw.port == 0 {
                errors.push("Gateway port cannot be 0".to_string());
            }
        }

        if self.pipeline.audio_queue_depth == 0 {
            errors.push("pipeline.audio_queue_depth must be at least 1".to_string());
        }
        if self.pipeline.chunk_queue_depth == 0 {
            errors.push("pipeline.chunk_queue_depth must be at least 1".to_string());
        }

        (warnings, errors)
    }

    /// Save config to a file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Base directory for speechlink data: `~/.speechlink/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".speechlink")
}
