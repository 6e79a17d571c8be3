//! Audio normalization between provider encodings and canonical PCM.

use std::io::Cursor;

use rubato::{FftFixedIn, Resampler};

use speechlink_core::error::{Result, SpeechError};
use speechlink_core::types::{AudioEncoding, AudioFormat};

const WAV_HEADER_LEN: usize = 44;

/// Input frames per resampler cycle.
const RESAMPLE_CHUNK: usize = 1024;

/// Converts audio units from one format to another.
///
/// A converter between identical formats still exists as a step so that
/// call sites never depend on which provider is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioConverter {
    from: AudioFormat,
    to: AudioFormat,
}

impl AudioConverter {
    pub fn new(from: AudioFormat, to: AudioFormat) -> Self {
        Self { from, to }
    }

    pub fn identity(format: AudioFormat) -> Self {
        Self::new(format, format)
    }

    pub fn from_format(&self) -> AudioFormat {
        self.from
    }

    pub fn to_format(&self) -> AudioFormat {
        self.to
    }

    pub fn is_identity(&self) -> bool {
        self.from == self.to
    }

    /// Convert one unit of audio.
    pub fn convert(&self, input: &[u8]) -> Result<Vec<u8>> {
        if self.is_identity() {
            return Ok(input.to_vec());
        }

        let (mut samples, mut rate, channels) = decode(input, self.from)?;
        if channels > 1 && self.to.channels == 1 {
            samples = downmix(&samples, channels);
        } else if channels != self.to.channels {
            return Err(SpeechError::Conversion(format!(
                "cannot convert {channels} channel(s) to {}",
                self.to.channels
            )));
        }
        if rate != self.to.sample_rate {
            samples = resample(&samples, rate, self.to.sample_rate)?;
            rate = self.to.sample_rate;
        }
        encode(&samples, rate, self.to)
    }
}

fn decode(input: &[u8], format: AudioFormat) -> Result<(Vec<i16>, u32, u16)> {
    match format.encoding {
        AudioEncoding::Pcm16Le => Ok((
            pcm16_from_bytes(input)?,
            format.sample_rate,
            format.channels,
        )),
        AudioEncoding::MuLaw => Ok((
            input.iter().map(|&b| mulaw_decode(b)).collect(),
            format.sample_rate,
            format.channels,
        )),
        AudioEncoding::Wav => parse_wav(input),
        AudioEncoding::Mp3 => Err(SpeechError::Conversion(
            "mp3 decoding is not supported".into(),
        )),
    }
}

fn encode(samples: &[i16], rate: u32, format: AudioFormat) -> Result<Vec<u8>> {
    match format.encoding {
        AudioEncoding::Pcm16Le => Ok(pcm16_to_bytes(samples)),
        AudioEncoding::MuLaw => Ok(samples.iter().map(|&s| mulaw_encode(s)).collect()),
        AudioEncoding::Wav => Ok(pcm_to_wav(samples, rate, format.channels, 16)),
        AudioEncoding::Mp3 => Err(SpeechError::Conversion(
            "mp3 encoding is not supported".into(),
        )),
    }
}

/// Little-endian 16-bit samples from raw bytes. Odd lengths are rejected.
pub fn pcm16_from_bytes(bytes: &[u8]) -> Result<Vec<i16>> {
    if bytes.len() % 2 != 0 {
        return Err(SpeechError::Conversion(format!(
            "pcm16 payload has odd length {}",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
        .collect())
}

pub fn pcm16_to_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Wrap raw 16-bit PCM in a WAV container.
pub fn pcm_to_wav(pcm: &[i16], sample_rate: u32, channels: u16, bits_per_sample: u16) -> Vec<u8> {
    let data_len = pcm.len() * 2;
    let byte_rate = sample_rate * channels as u32 * bits_per_sample as u32 / 8;
    let block_align = channels * bits_per_sample / 8;
    let file_size = 36 + data_len as u32;

    let mut wav = Vec::with_capacity(WAV_HEADER_LEN + data_len);

    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&file_size.to_le_bytes());
    wav.extend_from_slice(b"WAVE");

    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes()); // PCM
    wav.extend_from_slice(&channels.to_le_bytes());
    wav.extend_from_slice(&sample_rate.to_le_bytes());
    wav.extend_from_slice(&byte_rate.to_le_bytes());
    wav.extend_from_slice(&block_align.to_le_bytes());
    wav.extend_from_slice(&bits_per_sample.to_le_bytes());

    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&(data_len as u32).to_le_bytes());
    wav.extend_from_slice(&pcm16_to_bytes(pcm));

    wav
}

/// Returns (samples, sample_rate, channels) of a 16-bit integer WAV.
fn parse_wav(bytes: &[u8]) -> Result<(Vec<i16>, u32, u16)> {
    let mut reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|e| SpeechError::Conversion(format!("invalid wav payload: {e}")))?;
    let spec = reader.spec();
    if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
        return Err(SpeechError::Conversion(format!(
            "unsupported wav format {:?} / {} bits",
            spec.sample_format, spec.bits_per_sample
        )));
    }
    let samples = reader
        .samples::<i16>()
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| SpeechError::Conversion(format!("failed to read wav samples: {e}")))?;
    Ok((samples, spec.sample_rate, spec.channels))
}

fn downmix(samples: &[i16], channels: u16) -> Vec<i16> {
    samples
        .chunks(channels as usize)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            (sum / frame.len() as i32) as i16
        })
        .collect()
}

/// FFT resampling of mono samples. The resampler's delay line is trimmed so
/// output lines up with input and has exactly `len * to / from` samples.
fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Result<Vec<i16>> {
    if samples.is_empty() {
        return Ok(Vec::new());
    }
    let mut resampler =
        FftFixedIn::<f32>::new(from_rate as usize, to_rate as usize, RESAMPLE_CHUNK, 2, 1)
            .map_err(|e| SpeechError::Conversion(format!("resampler setup failed: {e}")))?;

    let input: Vec<f32> = samples.iter().map(|&s| s as f32 / 32_768.0).collect();
    let expected = (samples.len() as u64 * to_rate as u64 / from_rate as u64) as usize;
    let delay = resampler.output_delay();

    let mut out = Vec::with_capacity(expected + delay + RESAMPLE_CHUNK);
    let mut pos = 0;
    while out.len() < expected + delay {
        // Past the end of the input the delay line is flushed with silence.
        let mut chunk = vec![0.0f32; resampler.input_frames_next()];
        if pos < input.len() {
            let end = (pos + chunk.len()).min(input.len());
            chunk[..end - pos].copy_from_slice(&input[pos..end]);
            pos = end;
        }
        let frames = resampler
            .process(&[chunk], None)
            .map_err(|e| SpeechError::Conversion(format!("resampling failed: {e}")))?;
        out.extend_from_slice(&frames[0]);
    }

    Ok(out[delay..delay + expected]
        .iter()
        .map(|&s| (s * 32_768.0).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16)
        .collect())
}

const MULAW_BIAS: i32 = 0x84;
const MULAW_CLIP: i32 = 32_635;

fn mulaw_encode(sample: i16) -> u8 {
    let mut s = sample as i32;
    let sign = if s < 0 { 0x80 } else { 0 };
    if s < 0 {
        s = -s;
    }
    s = s.min(MULAW_CLIP) + MULAW_BIAS;

    let mut exponent = 7;
    let mut mask = 0x4000;
    while exponent > 0 && s & mask == 0 {
        exponent -= 1;
        mask >>= 1;
    }
    let mantissa = (s >> (exponent + 3)) & 0x0F;
    !((sign | (exponent << 4) | mantissa) as u8)
}

fn mulaw_decode(byte: u8) -> i16 {
    let b = !byte as i32;
    let sign = b & 0x80;
    let exponent = (b >> 4) & 0x07;
    let mantissa = b & 0x0F;
    let magnitude = (((mantissa << 3) + MULAW_BIAS) << exponent) - MULAW_BIAS;
    (if sign != 0 { -magnitude } else { magnitude }) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm(rate: u32) -> AudioFormat {
        AudioFormat::pcm16(rate)
    }

    #[test]
    fn test_identity_passes_bytes_through() {
        let conv = AudioConverter::identity(AudioFormat::CANONICAL);
        assert!(conv.is_identity());
        // Identity does not validate, so even odd-length payloads pass.
        assert_eq!(conv.convert(&[1, 2, 3]).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_odd_pcm_length_is_conversion_error() {
        let conv = AudioConverter::new(pcm(8_000), pcm(16_000));
        let err = conv.convert(&[0, 1, 2]).unwrap_err();
        assert!(matches!(err, SpeechError::Conversion(_)));
    }

    #[test]
    fn test_upsample_doubles_length() {
        let conv = AudioConverter::new(pcm(8_000), pcm(16_000));
        let input = pcm16_to_bytes(&[0, 1000, 2000, 3000]);
        let out = pcm16_from_bytes(&conv.convert(&input).unwrap()).unwrap();
        assert_eq!(out.len(), 8);
    }

    #[test]
    fn test_resampling_preserves_steady_signal() {
        let conv = AudioConverter::new(pcm(8_000), pcm(16_000));
        let input = pcm16_to_bytes(&[1000; 1600]);
        let out = pcm16_from_bytes(&conv.convert(&input).unwrap()).unwrap();
        assert_eq!(out.len(), 3200);
        for &s in &out[1000..2200] {
            assert!((s - 1000).abs() < 50, "sample {s}");
        }
    }

    #[test]
    fn test_downsample_halves_length() {
        let conv = AudioConverter::new(pcm(32_000), pcm(16_000));
        let input = pcm16_to_bytes(&[10; 640]);
        let out = conv.convert(&input).unwrap();
        assert_eq!(out.len(), 640);
    }

    #[test]
    fn test_mulaw_roundtrip_is_close() {
        for sample in [0i16, 100, -100, 1000, -1000, 12_000, -30_000] {
            let decoded = mulaw_decode(mulaw_encode(sample));
            let tolerance = (sample as i32).abs() / 16 + 8;
            assert!(
                (decoded as i32 - sample as i32).abs() <= tolerance,
                "{sample} -> {decoded}"
            );
        }
    }

    #[test]
    fn test_mulaw_to_canonical() {
        let from = AudioFormat {
            encoding: AudioEncoding::MuLaw,
            sample_rate: 16_000,
            channels: 1,
        };
        let conv = AudioConverter::new(from, AudioFormat::CANONICAL);
        let out = conv.convert(&[0xFF; 10]).unwrap();
        // 0xFF is mu-law silence
        assert_eq!(pcm16_from_bytes(&out).unwrap(), vec![0; 10]);
    }

    #[test]
    fn test_wav_header_generation() {
        let wav = pcm_to_wav(&vec![0i16; 16_000], 16_000, 1, 16);
        assert_eq!(wav.len(), 44 + 16_000 * 2);
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(&wav[36..40], b"data");
        let sr = u32::from_le_bytes([wav[24], wav[25], wav[26], wav[27]]);
        assert_eq!(sr, 16_000);
    }

    #[test]
    fn test_wav_stereo_to_canonical() {
        let wav = pcm_to_wav(&[100, 300, -100, -300], 16_000, 2, 16);
        let from = AudioFormat {
            encoding: AudioEncoding::Wav,
            sample_rate: 16_000,
            channels: 2,
        };
        let out = AudioConverter::new(from, AudioFormat::CANONICAL)
            .convert(&wav)
            .unwrap();
        assert_eq!(pcm16_from_bytes(&out).unwrap(), vec![200, -200]);
    }

    #[test]
    fn test_truncated_wav_is_conversion_error() {
        let from = AudioFormat {
            encoding: AudioEncoding::Wav,
            sample_rate: 16_000,
            channels: 1,
        };
        let err = AudioConverter::new(from, pcm(8_000))
            .convert(b"RIFF\0\0")
            .unwrap_err();
        assert!(matches!(err, SpeechError::Conversion(_)));
    }

    #[test]
    fn test_mp3_cannot_be_decoded() {
        let from = AudioFormat {
            encoding: AudioEncoding::Mp3,
            sample_rate: 16_000,
            channels: 1,
        };
        let err = AudioConverter::new(from, AudioFormat::CANONICAL)
            .convert(&[0xFF, 0xFB])
            .unwrap_err();
        assert!(err.to_string().contains("mp3"));
    }
}
