//! Read-aloud playback state machine.
//!
//! The engine never touches an audio device directly. It drives an
//! [`AudioOutput`], which can only play a buffer forward from an offset, and
//! reads time from a [`Clock`]. Pausing therefore means stopping the current
//! source and remembering how far it got; resuming starts a fresh source at
//! that offset.
//!
//! The server only hands out WAV bytes; this engine is the contract a
//! listening client implements, so no device-backed [`AudioOutput`] ships in
//! this crate.

use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;

use super::pcm::SampleBuffer;

/// Playback this close to the end counts as finished.
const END_TOLERANCE: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("audio output unavailable: {0}")]
    Output(String),
}

pub trait Clock {
    /// Monotonic time since an arbitrary origin.
    fn now(&self) -> Duration;
}

#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// A started source. Stopping releases it; it cannot be restarted.
pub trait PlaybackHandle {
    fn stop(&mut self);
}

pub trait AudioOutput {
    type Handle: PlaybackHandle;

    fn play_from(
        &mut self,
        buffer: &SampleBuffer,
        offset: Duration,
    ) -> Result<Self::Handle, AudioError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Idle,
    Generating,
    Playing,
    Paused,
}

/// Issued when playback needs audio that has not been synthesized yet.
/// Only the ticket for the current text is honoured on delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SynthesisTicket {
    generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayOutcome {
    Started,
    Resumed,
    NeedsSynthesis(SynthesisTicket),
    Busy,
}

pub struct PlaybackEngine<O: AudioOutput, C: Clock> {
    output: O,
    clock: C,
    state: PlaybackState,
    text: String,
    generation: u64,
    buffer: Option<SampleBuffer>,
    /// Position playback resumes from; while playing, where the source started.
    offset: Duration,
    started_at: Duration,
    source: Option<O::Handle>,
}

impl<O: AudioOutput, C: Clock> PlaybackEngine<O, C> {
    pub fn new(output: O, clock: C) -> Self {
        Self {
            output,
            clock,
            state: PlaybackState::Idle,
            text: String::new(),
            generation: 0,
            buffer: None,
            offset: Duration::ZERO,
            started_at: Duration::ZERO,
            source: None,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn has_audio(&self) -> bool {
        self.buffer.is_some()
    }

    pub fn duration(&self) -> Duration {
        self.buffer
            .as_ref()
            .map(SampleBuffer::duration)
            .unwrap_or_default()
    }

    /// Current playback position.
    pub fn position(&self) -> Duration {
        match self.state {
            PlaybackState::Playing => {
                let elapsed = self.clock.now().saturating_sub(self.started_at);
                (self.offset + elapsed).min(self.duration())
            }
            _ => self.offset,
        }
    }

    /// Points the engine at the analysis text being shown. A different text
    /// stops playback and drops the cached audio.
    pub fn set_text(&mut self, text: &str) {
        if self.text == text {
            return;
        }
        self.stop();
        self.buffer = None;
        self.generation += 1;
        self.text = text.to_string();
    }

    pub fn play(&mut self) -> Result<PlayOutcome, AudioError> {
        match self.state {
            PlaybackState::Playing | PlaybackState::Generating => Ok(PlayOutcome::Busy),
            PlaybackState::Paused => {
                self.start_source(self.offset)?;
                Ok(PlayOutcome::Resumed)
            }
            PlaybackState::Idle if self.buffer.is_some() => {
                self.start_source(self.offset)?;
                Ok(PlayOutcome::Started)
            }
            PlaybackState::Idle => {
                self.state = PlaybackState::Generating;
                Ok(PlayOutcome::NeedsSynthesis(SynthesisTicket {
                    generation: self.generation,
                }))
            }
        }
    }

    /// Hands over synthesized audio. Returns `false` when the ticket is stale
    /// or playback was stopped while generating.
    pub fn deliver(
        &mut self,
        ticket: SynthesisTicket,
        buffer: SampleBuffer,
    ) -> Result<bool, AudioError> {
        if ticket.generation != self.generation || self.state != PlaybackState::Generating {
            tracing::debug!(
                ticket = ticket.generation,
                current = self.generation,
                "discarding stale narration audio"
            );
            return Ok(false);
        }

        self.buffer = Some(buffer);
        self.start_source(Duration::ZERO)?;
        Ok(true)
    }

    /// Synthesis failed; go back to idle if the ticket is still current.
    pub fn fail(&mut self, ticket: SynthesisTicket) {
        if ticket.generation == self.generation && self.state == PlaybackState::Generating {
            self.state = PlaybackState::Idle;
        }
    }

    pub fn pause(&mut self) {
        if self.state != PlaybackState::Playing {
            return;
        }
        self.offset = self.position();
        self.release_source();
        self.state = PlaybackState::Paused;
    }

    /// Stops from any state and rewinds to the start.
    pub fn stop(&mut self) {
        self.release_source();
        self.offset = Duration::ZERO;
        self.state = PlaybackState::Idle;
    }

    /// Moves to `position`, clamped to the buffer. While playing the new
    /// source starts immediately.
    pub fn seek(&mut self, position: Duration) -> Result<(), AudioError> {
        let position = position.min(self.duration());
        match self.state {
            PlaybackState::Playing => {
                self.release_source();
                self.start_source(position)
            }
            PlaybackState::Paused | PlaybackState::Idle => {
                self.offset = position;
                Ok(())
            }
            PlaybackState::Generating => Ok(()),
        }
    }

    /// Detects natural completion. Returns `true` when playback just finished.
    pub fn tick(&mut self) -> bool {
        if self.state != PlaybackState::Playing {
            return false;
        }
        if self.position() + END_TOLERANCE < self.duration() {
            return false;
        }
        self.stop();
        true
    }

    /// Index of the block the narration has probably reached, assuming a
    /// uniform reading speed across all characters.
    pub fn active_block(&self, blocks: &[&str]) -> Option<usize> {
        if !matches!(self.state, PlaybackState::Playing | PlaybackState::Paused) {
            return None;
        }
        let duration = self.duration();
        if duration.is_zero() || blocks.is_empty() {
            return None;
        }

        let total: usize = blocks.iter().map(|b| b.chars().count()).sum();
        let progress = self.position().as_secs_f64() / duration.as_secs_f64();
        let estimate = progress * total as f64;

        let mut cumulative = 0usize;
        for (index, block) in blocks.iter().enumerate() {
            cumulative += block.chars().count();
            if cumulative as f64 >= estimate {
                return Some(index);
            }
        }
        Some(blocks.len() - 1)
    }

    fn start_source(&mut self, offset: Duration) -> Result<(), AudioError> {
        let Some(buffer) = self.buffer.as_ref() else {
            self.state = PlaybackState::Idle;
            return Ok(());
        };

        match self.output.play_from(buffer, offset) {
            Ok(handle) => {
                self.source = Some(handle);
                self.offset = offset;
                self.started_at = self.clock.now();
                self.state = PlaybackState::Playing;
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to start narration");
                self.offset = offset;
                self.state = PlaybackState::Idle;
                Err(e)
            }
        }
    }

    fn release_source(&mut self) {
        if let Some(mut source) = self.source.take() {
            source.stop();
        }
    }
}
