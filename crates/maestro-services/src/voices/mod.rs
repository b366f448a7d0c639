//! Synthesis voices and fixed-capacity voice pools

mod drums;
mod envelope;
mod string;
mod subtractive;

pub use drums::DrumVoice;
pub use envelope::{Adsr, AdsrState};
pub use string::StringVoice;
pub use subtractive::{SynthVoice, Waveform};

use std::ops::Range;

use maestro_core::{Bus, Instrument};

/// Lowest and highest MIDI notes a pitched voice accepts
pub const MIN_PITCH: u8 = 12;
pub const MAX_PITCH: u8 = 120;

/// Everything a voice needs beyond pitch and velocity
#[derive(Debug, Clone, Copy)]
pub struct VoiceParams {
    pub instrument: Instrument,
    /// Samples of silence before the onset
    pub pre_delay: usize,
    /// Samples the note sounds before release
    pub gate: usize,
    /// 0-100, shapes string decay
    pub sustain: u8,
    /// Mix group the voice renders into
    pub bus: Bus,
}

/// A monophonic sound generator living in a pool slot
pub trait Voice: Send {
    /// Start a note. Returns false (and stays silent) if the request is not playable.
    fn trigger(&mut self, pitch: u8, velocity: f32, params: &VoiceParams) -> bool;
    /// Add this voice's output into `out`
    fn render(&mut self, out: &mut [f32]);
    /// Enter release now
    fn release(&mut self);
    fn is_silent(&self) -> bool;
}

/// Sample-accurate onset and note-off countdowns
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Schedule {
    pre_delay: usize,
    gate: usize,
    released: bool,
}

impl Schedule {
    pub(crate) fn new(pre_delay: usize, gate: usize) -> Self {
        Self { pre_delay, gate, released: false }
    }

    /// Consume pre-delay for a block of `len` samples; returns the first sounding index
    pub(crate) fn start(&mut self, len: usize) -> usize {
        let wait = self.pre_delay.min(len);
        self.pre_delay -= wait;
        wait
    }

    pub(crate) fn is_pending(&self) -> bool {
        self.pre_delay > 0
    }

    /// Advance one sounding sample; true exactly once, when the gate closes
    pub(crate) fn tick(&mut self) -> bool {
        if self.released {
            return false;
        }
        if self.gate == 0 {
            self.released = true;
            return true;
        }
        self.gate -= 1;
        false
    }

    pub(crate) fn force_release(&mut self) {
        self.released = true;
        self.pre_delay = 0;
    }
}

/// Flush tiny values in feedback paths to zero
#[inline(always)]
pub(crate) fn flush_denormal(x: f32) -> f32 {
    if x.abs() < 1e-15 { 0.0 } else { x }
}

/// Fixed number of voices of one family with oldest-voice stealing
pub struct VoicePool<V: Voice> {
    voices: Vec<V>,
    buses: Vec<Bus>,
    ages: Vec<u64>,
    clock: u64,
    rejected: u64,
    stolen: u64,
}

impl<V: Voice> VoicePool<V> {
    pub fn new(capacity: usize, mut make: impl FnMut() -> V) -> Self {
        let capacity = capacity.max(1);
        Self {
            voices: (0..capacity).map(|_| make()).collect(),
            buses: vec![Bus::Harmony; capacity],
            ages: vec![0; capacity],
            clock: 0,
            rejected: 0,
            stolen: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.voices.len()
    }

    pub fn active(&self) -> usize {
        self.voices.iter().filter(|v| !v.is_silent()).count()
    }

    /// Triggers rejected as unplayable since construction
    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    pub fn stolen(&self) -> u64 {
        self.stolen
    }

    /// Start a note on a free slot, stealing the oldest when all are busy
    pub fn trigger(&mut self, pitch: u8, velocity: f32, params: &VoiceParams) -> bool {
        let free = self.voices.iter().position(|v| v.is_silent());
        let slot = free.unwrap_or_else(|| {
            self.ages
                .iter()
                .enumerate()
                .min_by_key(|(_, age)| **age)
                .map(|(i, _)| i)
                .unwrap_or(0)
        });

        if !self.voices[slot].trigger(pitch, velocity, params) {
            self.rejected += 1;
            return false;
        }
        if free.is_none() {
            self.stolen += 1;
        }
        self.clock += 1;
        self.ages[slot] = self.clock;
        self.buses[slot] = params.bus;
        true
    }

    /// Render each live voice into `range` of its own bus buffer
    pub fn render_buses(&mut self, buses: &mut [Vec<f32>; Bus::COUNT], range: Range<usize>) {
        for (voice, bus) in self.voices.iter_mut().zip(&self.buses) {
            if !voice.is_silent() {
                voice.render(&mut buses[bus.index()][range.clone()]);
            }
        }
    }

    pub(crate) fn voices_mut(&mut self) -> &mut [V] {
        &mut self.voices
    }
}


#[cfg(test)]
mod tests {
    use super::test_util::render_mixed;
    use super::*;
    use maestro_core::{DrumKind, StringPatch, SynthPatch};

    const SR: f32 = 8000.0;

    fn params(instrument: Instrument) -> VoiceParams {
        VoiceParams { instrument, pre_delay: 0, gate: 400, sustain: 50, bus: Bus::Lead }
    }

    #[test]
    fn test_pool_steals_oldest_when_full() {
        let mut pool = VoicePool::new(2, || SynthVoice::new(SR));
        let p = params(Instrument::Synth(SynthPatch::Pad));
        assert!(pool.trigger(60, 0.8, &p));
        assert!(pool.trigger(64, 0.8, &p));
        assert_eq!(pool.active(), 2);
        assert!(pool.trigger(67, 0.8, &p));
        assert_eq!(pool.active(), 2);
        assert_eq!(pool.stolen(), 1);
    }

    #[test]
    fn test_invalid_triggers_are_rejected_without_panicking() {
        let mut strings = VoicePool::new(4, || StringVoice::new(SR, 7));
        let clean = params(Instrument::String(StringPatch::Clean));
        assert!(!strings.trigger(5, 0.8, &clean));
        assert!(!strings.trigger(127, 0.8, &clean));
        assert!(!strings.trigger(60, f32::NAN, &clean));
        let zero = VoiceParams { gate: 0, ..clean };
        assert!(!strings.trigger(60, 0.8, &zero));
        // Wrong family
        assert!(!strings.trigger(60, 0.8, &params(Instrument::Synth(SynthPatch::Lead))));
        assert_eq!(strings.rejected(), 5);
        assert_eq!(strings.active(), 0);

        let mut synths = VoicePool::new(4, || SynthVoice::new(SR));
        // 120 is in range but far above Nyquist at this rate
        assert!(!synths.trigger(120, 0.8, &params(Instrument::Synth(SynthPatch::Lead))));

        let mut drums = VoicePool::new(4, || DrumVoice::new(SR, 3));
        assert!(!drums.trigger(36, 0.8, &params(Instrument::Synth(SynthPatch::Bass))));
        assert!(drums.trigger(36, 0.8, &params(Instrument::Drum(DrumKind::Kick))));

        let mut out = vec![0.0; 256];
        render_mixed(&mut strings, &mut out);
        render_mixed(&mut synths, &mut out);
        render_mixed(&mut drums, &mut out);
        assert!(out.iter().all(|s| s.is_finite()));
    }

    #[test]
    fn test_pre_delay_is_sample_accurate() {
        let mut pool = VoicePool::new(1, || SynthVoice::new(SR));
        let p = VoiceParams { pre_delay: 100, ..params(Instrument::Synth(SynthPatch::Lead)) };
        assert!(pool.trigger(60, 1.0, &p));
        let mut out = vec![0.0; 256];
        render_mixed(&mut pool, &mut out);
        assert!(out[..100].iter().all(|s| *s == 0.0));
        assert!(out[100..].iter().any(|s| *s != 0.0));
    }

    #[test]
    fn test_voices_fall_silent_after_gate() {
        let mut pool = VoicePool::new(1, || SynthVoice::new(SR));
        let p = VoiceParams { gate: 200, ..params(Instrument::Synth(SynthPatch::Arp)) };
        assert!(pool.trigger(72, 1.0, &p));
        let mut out = vec![0.0; 512];
        for _ in 0..64 {
            out.fill(0.0);
            render_mixed(&mut pool, &mut out);
        }
        assert_eq!(pool.active(), 0);
    }

    #[test]
    fn test_voices_render_into_their_bus() {
        let mut pool = VoicePool::new(2, || SynthVoice::new(SR));
        let bass = VoiceParams { bus: Bus::Bass, ..params(Instrument::Synth(SynthPatch::Bass)) };
        assert!(pool.trigger(40, 1.0, &bass));
        let mut buses: [Vec<f32>; Bus::COUNT] = std::array::from_fn(|_| vec![0.0; 256]);
        pool.render_buses(&mut buses, 64..256);
        assert!(buses[Bus::Bass.index()][64..].iter().any(|s| *s != 0.0));
        assert!(buses[Bus::Bass.index()][..64].iter().all(|s| *s == 0.0));
        for bus in [Bus::Drums, Bus::Harmony, Bus::Lead] {
            assert!(buses[bus.index()].iter().all(|s| *s == 0.0));
        }
    }
}
