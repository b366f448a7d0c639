//! Procedural drums: a swept sine body plus a band of noise, shaped per kind

use std::f64::consts::TAU;

use maestro_core::{DrumKind, Instrument};

use super::{Schedule, Voice, VoiceParams, VoicePool};

/// Level below which a hit is finished
const SILENCE: f64 = 1e-4;
/// Time constant of the fade applied to a choked hat
const CHOKE_SECONDS: f64 = 0.004;

/// One kind of hit. Times are decay time constants in seconds.
#[derive(Debug, Clone, Copy)]
struct Recipe {
    /// Settled body pitch, 0 for noise-only hits
    body_hz: f64,
    /// Extra body pitch at the strike, in multiples of `body_hz`
    sweep: f64,
    sweep_s: f64,
    body_s: f64,
    /// Second body partial as a ratio of the first, 0 for none
    overtone: f64,
    noise: f64,
    noise_s: f64,
    /// Noise band edges in Hz
    band: (f64, f64),
    level: f64,
}

const KICK: Recipe = Recipe {
    body_hz: 55.0,
    sweep: 3.0,
    sweep_s: 0.035,
    body_s: 0.32,
    overtone: 0.0,
    noise: 0.3,
    noise_s: 0.003,
    band: (1000.0, 6000.0),
    level: 0.9,
};

// Toms keep the kick's click, with a gentler sweep and a longer ring
const LOW_TOM: Recipe = Recipe {
    body_hz: 82.0,
    sweep: 0.6,
    sweep_s: 0.06,
    body_s: 0.55,
    noise: 0.15,
    level: 0.7,
    ..KICK
};
const MID_TOM: Recipe = Recipe { body_hz: 110.0, body_s: 0.48, ..LOW_TOM };
const HIGH_TOM: Recipe = Recipe { body_hz: 147.0, body_s: 0.42, ..LOW_TOM };

const SNARE: Recipe = Recipe {
    body_hz: 185.0,
    sweep: 0.25,
    sweep_s: 0.01,
    body_s: 0.03,
    overtone: 1.8,
    noise: 1.2,
    noise_s: 0.11,
    band: (900.0, 5000.0),
    level: 0.8,
};

const CLOSED_HAT: Recipe = Recipe {
    body_hz: 0.0,
    sweep: 0.0,
    sweep_s: 0.0,
    body_s: 0.0,
    overtone: 0.0,
    noise: 1.0,
    noise_s: 0.03,
    band: (7000.0, 16000.0),
    level: 0.45,
};
const OPEN_HAT: Recipe = Recipe { noise_s: 0.32, ..CLOSED_HAT };

fn recipe(kind: DrumKind) -> &'static Recipe {
    match kind {
        DrumKind::Kick => &KICK,
        DrumKind::Snare => &SNARE,
        DrumKind::ClosedHat => &CLOSED_HAT,
        DrumKind::OpenHat => &OPEN_HAT,
        DrumKind::LowTom => &LOW_TOM,
        DrumKind::MidTom => &MID_TOM,
        DrumKind::HighTom => &HIGH_TOM,
    }
}

/// A recipe shaped by one hit's velocity, as per-sample factors.
/// Harder hits sit slightly sharper, sweep further and ring longer.
#[derive(Debug, Clone, Copy, Default)]
struct Strike {
    freq: f64,
    sweep: f64,
    overtone: f64,
    noise: f64,
    gain: f64,
    body_decay: f64,
    sweep_decay: f64,
    noise_decay: f64,
    band_lo: f64,
    band_hi: f64,
}

impl Strike {
    fn new(recipe: &Recipe, velocity: f64, sample_rate: f64) -> Self {
        let hardness = 0.85 + 0.3 * velocity;
        let decay = |tau: f64| if tau > 0.0 { (-1.0 / (tau * sample_rate)).exp() } else { 0.0 };
        let pole = |hz: f64| 1.0 - (-TAU * hz.min(0.45 * sample_rate) / sample_rate).exp();
        Self {
            freq: recipe.body_hz * (1.0 + 0.04 * velocity),
            sweep: recipe.sweep * hardness,
            overtone: recipe.overtone,
            noise: recipe.noise,
            gain: recipe.level * velocity,
            body_decay: decay(recipe.body_s * hardness),
            sweep_decay: decay(recipe.sweep_s),
            noise_decay: decay(recipe.noise_s * hardness),
            band_lo: pole(recipe.band.0),
            band_hi: pole(recipe.band.1),
        }
    }
}

pub struct DrumVoice {
    sample_rate: f64,
    rng: fastrand::Rng,
    kind: DrumKind,
    strike: Strike,
    active: bool,
    phase: f64,
    phase2: f64,
    body_env: f64,
    sweep_env: f64,
    noise_env: f64,
    low_state: f64,
    high_state: f64,
    schedule: Schedule,
    /// Samples until a pending choke starts
    choke_in: Option<usize>,
    choked: bool,
    choke_coef: f64,
}

impl DrumVoice {
    pub fn new(sample_rate: f32, seed: u64) -> Self {
        let sample_rate = sample_rate as f64;
        Self {
            sample_rate,
            rng: fastrand::Rng::with_seed(seed),
            kind: DrumKind::Kick,
            strike: Strike::default(),
            active: false,
            phase: 0.0,
            phase2: 0.0,
            body_env: 0.0,
            sweep_env: 0.0,
            noise_env: 0.0,
            low_state: 0.0,
            high_state: 0.0,
            schedule: Schedule::default(),
            choke_in: None,
            choked: false,
            choke_coef: (-1.0 / (CHOKE_SECONDS * sample_rate)).exp(),
        }
    }

    pub fn kind(&self) -> Option<DrumKind> {
        self.active.then_some(self.kind)
    }

    /// Fade this hit out quickly, starting `after` samples from now
    pub fn choke(&mut self, after: usize) {
        if self.active {
            self.choke_in = Some(self.choke_in.map_or(after, |c| c.min(after)));
        }
    }

    fn tick(&mut self) -> f64 {
        let s = self.strike;
        let dt = 1.0 / self.sample_rate;

        let freq = s.freq * (1.0 + s.sweep * self.sweep_env);
        self.phase = (self.phase + freq * dt).fract();
        let mut body = (self.phase * TAU).sin();
        if s.overtone > 0.0 {
            self.phase2 = (self.phase2 + freq * s.overtone * dt).fract();
            body = 0.6 * body + 0.4 * (self.phase2 * TAU).sin();
        }

        // Low-pass at the top of the band, minus a low-pass at the bottom
        let white = self.rng.f64() * 2.0 - 1.0;
        self.high_state += s.band_hi * (white - self.high_state);
        self.low_state += s.band_lo * (self.high_state - self.low_state);
        let band = self.high_state - self.low_state;

        let sample = body * self.body_env + band * self.noise_env * s.noise;

        self.sweep_env *= s.sweep_decay;
        self.body_env *= s.body_decay;
        self.noise_env *= s.noise_decay;
        if self.choked {
            self.body_env *= self.choke_coef;
            self.noise_env *= self.choke_coef;
        }
        if self.body_env < SILENCE && self.noise_env < SILENCE {
            self.active = false;
        }
        sample * s.gain
    }
}

impl Voice for DrumVoice {
    /// Pitch is ignored, the kind comes from the instrument
    fn trigger(&mut self, _pitch: u8, velocity: f32, params: &VoiceParams) -> bool {
        let Instrument::Drum(kind) = params.instrument else {
            return false;
        };
        if velocity.is_nan() || velocity <= 0.0 || params.gate == 0 {
            return false;
        }
        let recipe = recipe(kind);
        self.kind = kind;
        self.strike = Strike::new(recipe, velocity.min(1.0) as f64, self.sample_rate);
        self.active = true;
        self.phase = 0.0;
        self.phase2 = 0.0;
        self.body_env = if recipe.body_hz > 0.0 { 1.0 } else { 0.0 };
        self.sweep_env = 1.0;
        self.noise_env = if recipe.noise > 0.0 { 1.0 } else { 0.0 };
        self.low_state = 0.0;
        self.high_state = 0.0;
        // One-shots ignore the gate; only the onset matters
        self.schedule = Schedule::new(params.pre_delay, usize::MAX);
        self.choke_in = None;
        self.choked = false;
        true
    }

    fn render(&mut self, out: &mut [f32]) {
        if !self.active {
            return;
        }
        let start = self.schedule.start(out.len());
        if let Some(wait) = self.choke_in {
            self.choke_in = Some(wait.saturating_sub(start));
        }

        for sample in &mut out[start..] {
            if let Some(wait) = self.choke_in {
                if wait == 0 {
                    self.choked = true;
                    self.choke_in = None;
                } else {
                    self.choke_in = Some(wait - 1);
                }
            }
            *sample += self.tick() as f32;
            if !self.active {
                break;
            }
        }
    }

    fn release(&mut self) {
        self.choke(0);
        self.schedule.force_release();
    }

    fn is_silent(&self) -> bool {
        !self.active
    }
}

impl VoicePool<DrumVoice> {
    /// Trigger a hit. A hat chokes any hat still ringing, at the new hit's onset.
    pub fn trigger_hit(&mut self, velocity: f32, params: &VoiceParams) -> bool {
        if matches!(params.instrument, Instrument::Drum(kind) if kind.is_hat()) {
            for voice in self.voices_mut() {
                if voice.kind().is_some_and(|k| k.is_hat()) {
                    voice.choke(params.pre_delay);
                }
            }
        }
        self.trigger(0, velocity, params)
    }
}
