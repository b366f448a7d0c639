//! Render loop: beat clock, voices, buses, effects and the master stage

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use maestro_core::{
    Bus, Conductor, ConductorHandle, Instrument, MAX_EVENTS_PER_BEAT, NoteEvent, Settings,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::audio_io::{OutputSink, SinkError};
use crate::effects::{EffectChain, LinearRamp};
use crate::voices::{DrumVoice, StringVoice, SynthVoice, VoiceParams, VoicePool};

pub const MIN_BLOCK_SIZE: usize = 64;
pub const MAX_BLOCK_SIZE: usize = 4096;
pub const MIN_SAMPLE_RATE: u32 = 8000;

pub const STRING_VOICES: usize = 24;
pub const SYNTH_VOICES: usize = 48;
pub const DRUM_VOICES: usize = 16;

/// Bus gains in `Bus::index` order
const BUS_GAINS: [f32; Bus::COUNT] = [0.8, 0.7, 0.6, 0.65];

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Audio output error: {0}")]
    Sink(#[from] SinkError),
    #[error("Invalid engine config: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub block_size: usize,
    pub seed: u64,
    pub stall_timeout_ms: u64,
    pub queue_blocks: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            block_size: 256,
            seed: 7,
            stall_timeout_ms: 500,
            queue_blocks: 4,
        }
    }
}

impl EngineConfig {
    /// Block size rounded up to a power of two inside the supported range
    pub fn effective_block_size(&self) -> usize {
        self.block_size.clamp(MIN_BLOCK_SIZE, MAX_BLOCK_SIZE).next_power_of_two()
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_millis(self.stall_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.queue_blocks == 0 {
            return Err(EngineError::InvalidConfig("queue_blocks must be at least 1".into()));
        }
        if self.stall_timeout_ms == 0 {
            return Err(EngineError::InvalidConfig("stall_timeout_ms must be positive".into()));
        }
        Ok(())
    }
}

/// Why `run` returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Outro reached silence
    Finished,
    /// Stop flag observed
    Stopped,
}

pub struct AudioEngine {
    sample_rate: f32,
    block_size: usize,
    conductor: Conductor,
    events: Vec<NoteEvent>,
    strings: VoicePool<StringVoice>,
    synths: VoicePool<SynthVoice>,
    drums: VoicePool<DrumVoice>,
    buses: [Vec<f32>; Bus::COUNT],
    block: Vec<f32>,
    effects: EffectChain,
    master_gain: LinearRamp,
    /// Samples rendered since start
    clock: u64,
    /// Sample position of the next beat boundary
    next_beat: f64,
    beat_samples: f64,
}

impl AudioEngine {
    pub fn new(handle: &ConductorHandle, config: &EngineConfig, sample_rate: u32) -> Result<Self, EngineError> {
        config.validate()?;
        if sample_rate < MIN_SAMPLE_RATE {
            return Err(EngineError::InvalidConfig(format!(
                "sample rate {} below {}",
                sample_rate, MIN_SAMPLE_RATE
            )));
        }
        let sr = sample_rate as f32;
        let block_size = config.effective_block_size();
        let seed = config.seed;

        let mut string_seed = seed;
        let mut drum_seed = seed.wrapping_mul(31);
        Ok(Self {
            sample_rate: sr,
            block_size,
            conductor: Conductor::new(handle, seed),
            events: Vec::with_capacity(MAX_EVENTS_PER_BEAT),
            strings: VoicePool::new(STRING_VOICES, || {
                string_seed = string_seed.wrapping_add(1);
                StringVoice::new(sr, string_seed)
            }),
            synths: VoicePool::new(SYNTH_VOICES, || SynthVoice::new(sr)),
            drums: VoicePool::new(DRUM_VOICES, || {
                drum_seed = drum_seed.wrapping_add(1);
                DrumVoice::new(sr, drum_seed)
            }),
            buses: std::array::from_fn(|_| vec![0.0; block_size]),
            block: vec![0.0; block_size],
            effects: EffectChain::new(sr),
            master_gain: LinearRamp::new(1.0, 1),
            clock: 0,
            next_beat: 0.0,
            beat_samples: 0.0,
        })
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    /// Triggers rejected by the voice pools so far
    pub fn rejected_triggers(&self) -> u64 {
        self.strings.rejected() + self.synths.rejected() + self.drums.rejected()
    }

    pub fn conductor(&self) -> &Conductor {
        &self.conductor
    }

    /// Render and hand blocks to `sink` until the outro finishes or `stop` is set
    pub fn run<S: OutputSink + ?Sized>(&mut self, sink: &mut S, stop: &AtomicBool) -> Result<RunOutcome, EngineError> {
        let chain: Vec<_> = self.effects.effects().iter().map(|e| e.name()).collect();
        info!(
            sample_rate = self.sample_rate,
            block_size = self.block_size,
            effects = ?chain,
            "Audio engine started"
        );
        loop {
            let finished = self.render_block();
            sink.write_block(&self.block)?;

            if finished {
                sink.flush()?;
                info!(beats = self.conductor.state().beat, rejected = self.rejected_triggers(), "Outro finished");
                return Ok(RunOutcome::Finished);
            }
            if stop.load(Ordering::Acquire) {
                sink.flush()?;
                info!(rejected = self.rejected_triggers(), "Audio engine stopped");
                return Ok(RunOutcome::Stopped);
            }
        }
    }

    /// Render one block into the internal buffer. Returns true once the
    /// outro is done and the block is silent.
    pub fn render_block(&mut self) -> bool {
        let settings = self.conductor.load_settings();
        let done_at_start = self.conductor.is_finished()
            && self.master_gain.is_settled()
            && self.master_gain.value() == 0.0;

        for bus in &mut self.buses {
            bus.fill(0.0);
        }

        let n = self.block_size;
        let mut pos = 0;
        while pos < n {
            let now = (self.clock + pos as u64) as f64;
            if now >= self.next_beat {
                self.on_beat(&settings, now);
            }
            let until = (self.next_beat.ceil() - now).max(1.0) as usize;
            let end = (pos + until).min(n);

            self.strings.render_buses(&mut self.buses, pos..end);
            self.synths.render_buses(&mut self.buses, pos..end);
            self.drums.render_buses(&mut self.buses, pos..end);
            pos = end;
        }
        self.clock += n as u64;

        self.mix_down();

        let state = self.conductor.state();
        self.effects.process(&mut self.block, &state.effects, state.tempo);

        for sample in &mut self.block {
            let gain = self.master_gain.next_value();
            *sample = limit(*sample * gain);
        }

        self.conductor.publish();
        done_at_start
    }

    /// The block most recently rendered
    pub fn block(&self) -> &[f32] {
        &self.block
    }

    /// `now` is the first sample at or after the boundary
    fn on_beat(&mut self, settings: &Settings, now: f64) {
        self.conductor.advance_beat(settings, &mut self.events);
        let state = *self.conductor.state();

        self.beat_samples = 60.0 * self.sample_rate as f64 / state.tempo.max(1.0) as f64;
        let beat_start = self.next_beat;
        self.next_beat += self.beat_samples;
        self.master_gain.ramp_to(state.gain, self.beat_samples as usize);

        let lag = (now - beat_start).max(0.0);
        for i in 0..self.events.len() {
            let event = self.events[i];
            let onset = (event.offset as f64 * self.beat_samples - lag).max(0.0) as usize;
            self.trigger(&event, onset, state.settings.sustain);
        }
    }

    fn trigger(&mut self, event: &NoteEvent, onset: usize, sustain: u8) {
        let params = VoiceParams {
            instrument: event.instrument,
            pre_delay: onset,
            gate: (event.seconds * self.sample_rate) as usize,
            sustain,
            bus: event.layer.bus(),
        };
        match event.instrument {
            Instrument::String(_) => {
                let mut pitches = event.pitches;
                pitches.sort();
                let strum = (event.strum_ms * self.sample_rate / 1000.0) as usize;
                for (i, &pitch) in pitches.as_slice().iter().enumerate() {
                    let p = VoiceParams { pre_delay: onset + i * strum, ..params };
                    self.strings.trigger(pitch, event.velocity, &p);
                }
            }
            Instrument::Synth(_) => {
                for &pitch in event.pitches.as_slice() {
                    self.synths.trigger(pitch, event.velocity, &params);
                }
            }
            Instrument::Drum(_) => {
                self.drums.trigger_hit(event.velocity, &params);
            }
        }
    }

    fn mix_down(&mut self) {
        self.block.fill(0.0);
        for (bus, gain) in self.buses.iter().zip(BUS_GAINS) {
            for (out, x) in self.block.iter_mut().zip(bus) {
                *out += x * gain;
            }
        }
    }
}

/// Soft limiter on the master bus
#[inline]
fn limit(x: f32) -> f32 {
    (x * 0.85).tanh() * 0.9
}
