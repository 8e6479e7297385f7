use std::io::Cursor;
use std::time::Duration;

use byteorder::{ByteOrder, LittleEndian};

/// Rate the speech service emits.
pub const SAMPLE_RATE: u32 = 24_000;
pub const CHANNELS: u16 = 1;
const SCALE: f32 = 32768.0;

/// Decoded mono samples in `[-1.0, 1.0]`.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl SampleBuffer {
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / f64::from(self.sample_rate))
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Decodes headerless 16-bit little-endian mono PCM at [`SAMPLE_RATE`].
/// A trailing odd byte is dropped. Feeds a client-side
/// [`PlaybackEngine`](super::playback::PlaybackEngine); the server itself
/// only wraps PCM with [`wav_from_pcm16`].
pub fn decode_pcm16(bytes: &[u8]) -> SampleBuffer {
    let whole = bytes.len() - bytes.len() % 2;
    let mut ints = vec![0i16; whole / 2];
    LittleEndian::read_i16_into(&bytes[..whole], &mut ints);

    SampleBuffer {
        samples: ints.iter().map(|&s| f32::from(s) / SCALE).collect(),
        sample_rate: SAMPLE_RATE,
    }
}

/// Inverse of [`decode_pcm16`]; samples outside `[-1.0, 1.0]` are clamped.
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    let ints: Vec<i16> = samples
        .iter()
        .map(|&s| (s * SCALE).round().clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16)
        .collect();

    let mut bytes = vec![0u8; ints.len() * 2];
    LittleEndian::write_i16_into(&ints, &mut bytes);
    bytes
}

/// Wraps raw PCM16 bytes in a WAV container so browsers can play them.
pub fn wav_from_pcm16(pcm: &[u8]) -> Result<Vec<u8>, hound::Error> {
    let spec = hound::WavSpec {
        channels: CHANNELS,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::with_capacity(pcm.len() + 44));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for pair in pcm.chunks_exact(2) {
            writer.write_sample(LittleEndian::read_i16(pair))?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_known_samples() {
        let bytes = [0x00, 0x00, 0x00, 0x40, 0x00, 0x80, 0xFF, 0x7F];
        let buffer = decode_pcm16(&bytes);

        assert_eq!(buffer.sample_rate, 24_000);
        assert_eq!(buffer.samples, vec![0.0, 0.5, -1.0, 32767.0 / 32768.0]);
    }

    #[test]
    fn test_odd_trailing_byte_dropped() {
        let buffer = decode_pcm16(&[0x00, 0x40, 0x12]);
        assert_eq!(buffer.samples.len(), 1);
    }

    #[test]
    fn test_waveform_round_trip() {
        let original: Vec<f32> = (0..2_400)
            .map(|i| (i as f32 * 440.0 * 2.0 * std::f32::consts::PI / 24_000.0).sin() * 0.8)
            .collect();

        let decoded = decode_pcm16(&encode_pcm16(&original));

        assert_eq!(decoded.samples.len(), original.len());
        let max_error = original
            .iter()
            .zip(&decoded.samples)
            .map(|(a, b)| (a - b).abs())
            .fold(0.0f32, f32::max);
        assert!(max_error <= 1.0 / 32768.0, "max error {max_error}");
    }

    #[test]
    fn test_duration_at_24k() {
        let buffer = SampleBuffer {
            samples: vec![0.0; 36_000],
            sample_rate: SAMPLE_RATE,
        };
        assert_eq!(buffer.duration(), Duration::from_millis(1_500));
    }

    #[test]
    fn test_wav_wrapping() {
        let pcm = encode_pcm16(&[0.0, 0.25, -0.25]);
        let wav = wav_from_pcm16(&pcm).unwrap();

        let mut reader = hound::WavReader::new(Cursor::new(wav)).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.sample_rate, 24_000);
        assert_eq!(spec.channels, 1);
        let samples: Vec<i16> = reader.samples::<i16>().map(Result::unwrap).collect();
        assert_eq!(samples, vec![0, 8192, -8192]);
    }
}
