//! Narration audio: raw PCM handling and the playback state machine.

pub mod pcm;
pub mod playback;

pub use pcm::{SampleBuffer, decode_pcm16, encode_pcm16, wav_from_pcm16};
pub use playback::{PlaybackEngine, PlaybackState};
