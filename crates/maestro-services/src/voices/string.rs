//! Plucked string voice (Karplus-Strong)
//!
//! A noise burst circulates through a delay line whose length sets the pitch.
//! A two-point average in the loop damps high partials, a first-order allpass
//! supplies the fractional part of the period so intonation stays true at
//! high notes.

use maestro_core::{Instrument, StringPatch, midi_to_freq};

use super::{MAX_PITCH, MIN_PITCH, Schedule, Voice, VoiceParams, flush_denormal};

/// Loop gain ceiling, below unity so the loop can never grow
const MAX_LOOP_GAIN: f32 = 0.99999;
/// Output level below which a decaying string counts as finished
const SILENCE: f32 = 1e-4;

pub struct StringVoice {
    sample_rate: f32,
    rng: fastrand::Rng,
    line: Vec<f32>,
    len: usize,
    pos: usize,
    last: f32,
    ap_coef: f32,
    ap_x1: f32,
    ap_y1: f32,
    loop_gain: f32,
    level: f32,
    schedule: Schedule,
    released: bool,
    release_gain: f32,
    release_coef: f32,
    envelope: f32,
    active: bool,
}

impl StringVoice {
    /// Allocate a delay line long enough for the lowest playable note
    pub fn new(sample_rate: f32, seed: u64) -> Self {
        let longest = (sample_rate / midi_to_freq(MIN_PITCH as f32)).ceil() as usize + 2;
        Self {
            sample_rate,
            rng: fastrand::Rng::with_seed(seed),
            line: vec![0.0; longest],
            len: 1,
            pos: 0,
            last: 0.0,
            ap_coef: 0.0,
            ap_x1: 0.0,
            ap_y1: 0.0,
            loop_gain: 0.0,
            level: 0.0,
            schedule: Schedule::default(),
            released: false,
            release_gain: 1.0,
            // ~30 ms fade once the gate closes
            release_coef: (-1.0 / (0.03 * sample_rate)).exp(),
            envelope: 0.0,
            active: false,
        }
    }

    /// Loop gain per period: longer ring with more sustain, compensated so high notes don't die early
    fn loop_gain(freq: f32, sustain: u8, patch: StringPatch) -> f32 {
        let s = sustain.min(100) as f32 / 100.0;
        let base = 0.98 + 0.0199 * s;
        let octaves_up = (freq / 130.0).log2().max(0.0);
        let gain = (base + 0.008 * octaves_up).min(MAX_LOOP_GAIN);
        match patch {
            StringPatch::Muted => gain * 0.985,
            _ => gain,
        }
    }

    fn excite(&mut self, pitch: u8, velocity: f32, patch: StringPatch) {
        let line = &mut self.line[..self.len];
        for s in line.iter_mut() {
            *s = self.rng.f32() * 2.0 - 1.0;
        }
        // Low notes get a darker pluck; palm muting darker still
        let mut passes = (pitch as usize / 30).clamp(1, 3);
        if patch == StringPatch::Muted {
            passes += 3;
        }
        for _ in 0..passes {
            let mut prev = line[line.len() - 1];
            for s in line.iter_mut() {
                let cur = *s;
                *s = 0.5 * (cur + prev);
                prev = cur;
            }
        }
        // Remove DC left over from the burst
        let mean = line.iter().sum::<f32>() / line.len() as f32;
        for s in line.iter_mut() {
            *s = (*s - mean) * velocity;
        }
    }
}

impl Voice for StringVoice {
    fn trigger(&mut self, pitch: u8, velocity: f32, params: &VoiceParams) -> bool {
        let Instrument::String(patch) = params.instrument else {
            return false;
        };
        if !(MIN_PITCH..=MAX_PITCH).contains(&pitch) || velocity.is_nan() || velocity <= 0.0 || params.gate == 0 {
            return false;
        }

        let freq = midi_to_freq(pitch as f32);
        // Average adds half a sample of delay, allpass covers the rest
        let period = self.sample_rate / freq - 0.5;
        let whole = (period - 0.1).floor();
        if whole < 2.0 || whole as usize + 1 > self.line.len() {
            return false;
        }
        let frac = period - whole;
        self.len = whole as usize;
        self.ap_coef = (1.0 - frac) / (1.0 + frac);
        self.ap_x1 = 0.0;
        self.ap_y1 = 0.0;
        self.pos = 0;
        self.last = 0.0;

        let velocity = velocity.min(1.0);
        self.excite(pitch, velocity, patch);
        self.loop_gain = Self::loop_gain(freq, params.sustain, patch);
        self.level = match patch {
            StringPatch::Clean => 0.5,
            StringPatch::Crunch => 0.55,
            StringPatch::Muted => 0.6,
        };
        self.schedule = Schedule::new(params.pre_delay, params.gate);
        self.released = false;
        self.release_gain = 1.0;
        self.envelope = velocity;
        self.active = true;
        true
    }

    fn render(&mut self, out: &mut [f32]) {
        if !self.active {
            return;
        }
        let start = self.schedule.start(out.len());
        let len = self.len;

        for sample in &mut out[start..] {
            if self.schedule.tick() {
                self.released = true;
            }

            let x = self.line[self.pos];
            let avg = 0.5 * (x + self.last) * self.loop_gain;
            self.last = x;
            let y = self.ap_coef * avg + self.ap_x1 - self.ap_coef * self.ap_y1;
            self.ap_x1 = avg;
            self.ap_y1 = flush_denormal(y);
            self.line[self.pos] = self.ap_y1;
            self.pos += 1;
            if self.pos >= len {
                self.pos = 0;
            }

            if self.released {
                self.release_gain *= self.release_coef;
            }
            let value = x * self.level * self.release_gain;
            *sample += value;
            self.envelope = self.envelope * 0.999 + value.abs() * 0.001;
        }

        if self.release_gain < SILENCE || self.envelope < SILENCE * 0.1 {
            self.active = false;
        }
    }

    fn release(&mut self) {
        self.released = true;
        self.schedule.force_release();
    }

    fn is_silent(&self) -> bool {
        !self.active
    }
}
