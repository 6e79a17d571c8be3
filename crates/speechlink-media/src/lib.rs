//! Streaming speech pipeline: session registry, provider selection and
//! failover, ASR/TTS streaming adapters, format conversion, event delivery.

pub mod asr;
pub mod events;
pub mod format;
pub mod pipeline;
pub mod selector;
pub mod session;
pub mod tts;

pub use pipeline::{PushOutcome, SessionStatus, SpeechPipeline};
