//! Shared identities, audio format descriptors, and pipeline event types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Which half of the pipeline a provider serves.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Asr,
    Tts,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Asr => "asr",
            Self::Tts => "tts",
        })
    }
}

/// Identity of a speech provider. Priority order comes from configuration.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderId {
    Tencent,
    Alibaba,
    /// In-process echo provider for local development.
    Loopback,
}

impl ProviderId {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tencent => "tencent",
            Self::Alibaba => "alibaba",
            Self::Loopback => "loopback",
        }
    }

    /// Parse a provider name as it appears in config files.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "tencent" => Some(Self::Tencent),
            "alibaba" | "aliyun" => Some(Self::Alibaba),
            "loopback" | "echo" => Some(Self::Loopback),
            _ => None,
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Byte-level audio encodings understood by the format conversion layer.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioEncoding {
    /// Signed 16-bit little-endian PCM.
    Pcm16Le,
    /// G.711 mu-law, one byte per sample.
    MuLaw,
    /// 16-bit PCM wrapped in a RIFF/WAVE container.
    Wav,
    /// Compressed; passed through opaquely.
    Mp3,
}

impl AudioEncoding {
    /// Map a provider codec name (`pcm`, `mp3`, ...) to an encoding.
    pub fn from_codec(codec: &str) -> Option<Self> {
        match codec.trim().to_ascii_lowercase().as_str() {
            "pcm" | "pcm16" | "s16le" => Some(Self::Pcm16Le),
            "mulaw" | "ulaw" | "pcmu" => Some(Self::MuLaw),
            "wav" => Some(Self::Wav),
            "mp3" => Some(Self::Mp3),
            _ => None,
        }
    }
}

/// Full description of an audio stream.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub encoding: AudioEncoding,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioFormat {
    /// The pipeline's canonical representation: 16-bit PCM, 16 kHz, mono.
    pub const CANONICAL: AudioFormat = AudioFormat::pcm16(16_000);

    pub const fn pcm16(sample_rate: u32) -> Self {
        Self {
            encoding: AudioEncoding::Pcm16Le,
            sample_rate,
            channels: 1,
        }
    }
}

/// A recognition notification produced by an ASR provider.
///
/// Events from one recognizer are delivered in the order produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionEvent {
    SentenceBegin { index: u32 },
    Partial { index: u32, text: String },
    /// Sentence end carrying the final transcript.
    Final { index: u32, text: String },
    Error { message: String },
}

/// A synthesis notification. Each synthesis call yields zero or more
/// `Chunk`s followed by exactly one terminal `Complete` or `Error`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynthesisEvent {
    Chunk(Vec<u8>),
    Complete,
    Error(String),
}

impl SynthesisEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Chunk(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_id_parse() {
        assert_eq!(ProviderId::parse("Tencent"), Some(ProviderId::Tencent));
        assert_eq!(ProviderId::parse("aliyun"), Some(ProviderId::Alibaba));
        assert_eq!(ProviderId::parse(" echo "), Some(ProviderId::Loopback));
        assert_eq!(ProviderId::parse("azure"), None);
    }

    #[test]
    fn test_provider_id_serde_roundtrip_name() {
        let json = serde_json::to_string(&ProviderId::Loopback).unwrap();
        assert_eq!(json, r#""loopback""#);
    }

    #[test]
    fn test_codec_mapping() {
        assert_eq!(AudioEncoding::from_codec("PCM"), Some(AudioEncoding::Pcm16Le));
        assert_eq!(AudioEncoding::from_codec("mp3"), Some(AudioEncoding::Mp3));
        assert_eq!(AudioEncoding::from_codec("opus"), None);
    }

    #[test]
    fn test_terminal_events() {
        assert!(!SynthesisEvent::Chunk(vec![1]).is_terminal());
        assert!(SynthesisEvent::Complete.is_terminal());
        assert!(SynthesisEvent::Error("x".into()).is_terminal());
    }
}
