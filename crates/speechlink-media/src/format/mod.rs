//! Format conversion layer: audio normalization and speech-text extraction.

pub mod audio;
pub mod text;

pub use audio::AudioConverter;
pub use text::extract_speech_text;
