//! Tencent Cloud real-time speech recognition and streaming synthesis.

mod asr;
mod sign;
mod tts;

pub use asr::{AsrResponse, AsrResult, TencentAsr, map_asr_response};
pub use tts::{TencentSynthesizer, TencentTts, TtsControlFrame};
