//! Subtractive synth voice: two band-limited oscillators, noise, a resonant
//! low-pass and separate amp/filter envelopes. Piano is additive partials
//! through the same envelope path.

use std::f32::consts::{PI, TAU};

use maestro_core::{Instrument, SynthPatch, midi_to_freq};

use super::envelope::{Adsr, AdsrState};
use super::{MAX_PITCH, MIN_PITCH, Schedule, Voice, VoiceParams, flush_denormal};

/// Filter coefficients are recomputed this often (samples)
const CONTROL_INTERVAL: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waveform {
    Sine,
    Triangle,
    Saw,
    Square,
    /// Decaying harmonic series
    Piano,
}

struct PatchDef {
    osc1: Waveform,
    osc2: Waveform,
    /// Semitones relative to the played note
    osc2_transpose: f32,
    detune_cents: f32,
    osc2_mix: f32,
    noise: f32,
    cutoff: f32,
    /// 0..1
    resonance: f32,
    /// Octaves of cutoff sweep at full filter envelope
    env_octaves: f32,
    amp: Adsr,
    filter: Adsr,
    level: f32,
}

fn patch_def(patch: SynthPatch) -> PatchDef {
    match patch {
        SynthPatch::Bass => PatchDef {
            osc1: Waveform::Saw,
            osc2: Waveform::Square,
            osc2_transpose: -12.0,
            detune_cents: 0.0,
            osc2_mix: 0.5,
            noise: 0.0,
            cutoff: 300.0,
            resonance: 0.3,
            env_octaves: 3.0,
            amp: Adsr::new(0.005, 0.2, 0.7, 0.08),
            filter: Adsr::new(0.002, 0.15, 0.2, 0.1),
            level: 0.5,
        },
        SynthPatch::Pad => PatchDef {
            osc1: Waveform::Saw,
            osc2: Waveform::Saw,
            osc2_transpose: 0.0,
            detune_cents: 8.0,
            osc2_mix: 0.8,
            noise: 0.0,
            cutoff: 900.0,
            resonance: 0.1,
            env_octaves: 1.5,
            amp: Adsr::new(0.4, 0.5, 0.8, 0.8),
            filter: Adsr::new(0.6, 1.0, 0.5, 0.8),
            level: 0.25,
        },
        SynthPatch::Arp => PatchDef {
            osc1: Waveform::Square,
            osc2: Waveform::Saw,
            osc2_transpose: 12.0,
            detune_cents: 0.0,
            osc2_mix: 0.3,
            noise: 0.0,
            cutoff: 1400.0,
            resonance: 0.25,
            env_octaves: 2.0,
            amp: Adsr::new(0.002, 0.12, 0.3, 0.06),
            filter: Adsr::new(0.001, 0.1, 0.1, 0.06),
            level: 0.3,
        },
        SynthPatch::Lead => PatchDef {
            osc1: Waveform::Saw,
            osc2: Waveform::Square,
            osc2_transpose: 0.0,
            detune_cents: 5.0,
            osc2_mix: 0.6,
            noise: 0.0,
            cutoff: 1800.0,
            resonance: 0.35,
            env_octaves: 2.0,
            amp: Adsr::new(0.01, 0.2, 0.8, 0.15),
            filter: Adsr::new(0.01, 0.3, 0.4, 0.15),
            level: 0.35,
        },
        SynthPatch::Piano => PatchDef {
            osc1: Waveform::Piano,
            osc2: Waveform::Sine,
            osc2_transpose: 12.0,
            detune_cents: 1.5,
            osc2_mix: 0.15,
            noise: 0.0,
            cutoff: 5000.0,
            resonance: 0.0,
            env_octaves: 0.5,
            amp: Adsr::new(0.002, 1.2, 0.0, 0.25),
            filter: Adsr::new(0.001, 0.6, 0.0, 0.25),
            level: 0.35,
        },
        SynthPatch::Strings => PatchDef {
            osc1: Waveform::Saw,
            osc2: Waveform::Saw,
            osc2_transpose: 0.0,
            detune_cents: 12.0,
            osc2_mix: 1.0,
            noise: 0.0,
            cutoff: 2200.0,
            resonance: 0.05,
            env_octaves: 0.5,
            amp: Adsr::new(0.25, 0.3, 0.85, 0.5),
            filter: Adsr::new(0.3, 0.5, 0.7, 0.5),
            level: 0.22,
        },
        SynthPatch::Riser => PatchDef {
            osc1: Waveform::Saw,
            osc2: Waveform::Triangle,
            osc2_transpose: 7.0,
            detune_cents: 0.0,
            osc2_mix: 0.4,
            noise: 0.6,
            cutoff: 400.0,
            resonance: 0.4,
            env_octaves: 4.0,
            amp: Adsr::new(1.5, 0.1, 1.0, 0.3),
            filter: Adsr::new(2.0, 0.1, 1.0, 0.3),
            level: 0.25,
        },
        SynthPatch::Sweep => PatchDef {
            osc1: Waveform::Saw,
            osc2: Waveform::Saw,
            osc2_transpose: 0.0,
            detune_cents: 15.0,
            osc2_mix: 0.9,
            noise: 0.3,
            cutoff: 300.0,
            resonance: 0.5,
            env_octaves: 4.0,
            amp: Adsr::new(0.3, 0.2, 0.9, 0.6),
            filter: Adsr::new(0.001, 1.5, 0.0, 0.6),
            level: 0.22,
        },
    }
}

#[inline]
fn poly_blep(t: f32, dt: f32) -> f32 {
    if t < dt {
        let t = t / dt;
        2.0 * t - t * t - 1.0
    } else if t > 1.0 - dt {
        let t = (t - 1.0) / dt;
        t * t + 2.0 * t + 1.0
    } else {
        0.0
    }
}

/// Relative partial levels for the piano tone
const PIANO_PARTIALS: [f32; 6] = [1.0, 0.5, 0.3, 0.18, 0.1, 0.06];

/// Highest phase increment a partial may have
const MAX_PARTIAL_INC: f32 = 0.45;

#[inline]
fn oscillate(wave: Waveform, phase: f32, inc: f32) -> f32 {
    match wave {
        Waveform::Sine => (TAU * phase).sin(),
        Waveform::Triangle => 4.0 * (phase - 0.5).abs() - 1.0,
        Waveform::Saw => 2.0 * phase - 1.0 - poly_blep(phase, inc),
        Waveform::Square => {
            let naive = if phase < 0.5 { 1.0 } else { -1.0 };
            naive + poly_blep(phase, inc) - poly_blep((phase + 0.5).fract(), inc)
        }
        Waveform::Piano => {
            let mut sum = 0.0;
            for (k, amp) in PIANO_PARTIALS.iter().enumerate() {
                let n = (k + 1) as f32;
                if inc * n >= MAX_PARTIAL_INC {
                    break;
                }
                sum += amp * (TAU * (phase * n).fract()).sin();
            }
            sum * 0.6
        }
    }
}

/// Zero-delay-feedback state variable low-pass
#[derive(Debug, Clone, Copy, Default)]
struct Svf {
    ic1: f32,
    ic2: f32,
    a1: f32,
    a2: f32,
    a3: f32,
}

impl Svf {
    fn set(&mut self, cutoff: f32, resonance: f32, sample_rate: f32) {
        let g = (PI * cutoff / sample_rate).tan();
        let k = 2.0 - 1.8 * resonance.clamp(0.0, 1.0);
        self.a1 = 1.0 / (1.0 + g * (g + k));
        self.a2 = g * self.a1;
        self.a3 = g * self.a2;
    }

    #[inline]
    fn lowpass(&mut self, x: f32) -> f32 {
        let v3 = x - self.ic2;
        let v1 = self.a1 * self.ic1 + self.a2 * v3;
        let v2 = self.ic2 + self.a2 * self.ic1 + self.a3 * v3;
        self.ic1 = flush_denormal(2.0 * v1 - self.ic1);
        self.ic2 = flush_denormal(2.0 * v2 - self.ic2);
        v2
    }
}

pub struct SynthVoice {
    sample_rate: f32,
    def: PatchDef,
    rng: fastrand::Rng,
    phase1: f32,
    phase2: f32,
    inc1: f32,
    inc2: f32,
    velocity: f32,
    amp: AdsrState,
    filter_env: AdsrState,
    svf: Svf,
    schedule: Schedule,
    counter: usize,
    active: bool,
}

impl SynthVoice {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            sample_rate,
            def: patch_def(SynthPatch::Lead),
            rng: fastrand::Rng::with_seed(0x5eed),
            phase1: 0.0,
            phase2: 0.0,
            inc1: 0.0,
            inc2: 0.0,
            velocity: 0.0,
            amp: AdsrState::new(),
            filter_env: AdsrState::new(),
            svf: Svf::default(),
            schedule: Schedule::default(),
            counter: 0,
            active: false,
        }
    }

    fn cutoff(&self) -> f32 {
        let swept = self.def.cutoff * 2f32.powf(self.def.env_octaves * self.filter_env.level());
        swept.clamp(20.0, self.sample_rate * 0.45)
    }
}

impl Voice for SynthVoice {
    fn trigger(&mut self, pitch: u8, velocity: f32, params: &VoiceParams) -> bool {
        let Instrument::Synth(patch) = params.instrument else {
            return false;
        };
        if !(MIN_PITCH..=MAX_PITCH).contains(&pitch) || velocity.is_nan() || velocity <= 0.0 || params.gate == 0 {
            return false;
        }
        let freq = midi_to_freq(pitch as f32);
        if freq >= self.sample_rate * 0.45 {
            return false;
        }

        self.def = patch_def(patch);
        let ratio2 = 2f32.powf((self.def.osc2_transpose + self.def.detune_cents / 100.0) / 12.0);
        self.inc1 = freq / self.sample_rate;
        self.inc2 = (self.inc1 * ratio2).min(0.45);
        self.phase1 = 0.0;
        self.phase2 = 0.25;
        self.velocity = velocity.min(1.0);
        self.amp.note_on(&self.def.amp, self.sample_rate);
        self.filter_env.note_on(&self.def.filter, self.sample_rate);
        self.svf = Svf::default();
        self.svf.set(self.cutoff(), self.def.resonance, self.sample_rate);
        self.schedule = Schedule::new(params.pre_delay, params.gate);
        self.counter = 0;
        self.active = true;
        true
    }

    fn render(&mut self, out: &mut [f32]) {
        if !self.active {
            return;
        }
        let start = self.schedule.start(out.len());
        if self.schedule.is_pending() {
            return;
        }
        let gain = self.velocity * self.def.level;

        for sample in &mut out[start..] {
            if self.schedule.tick() {
                self.amp.note_off();
                self.filter_env.note_off();
            }

            let mut x = oscillate(self.def.osc1, self.phase1, self.inc1);
            x += self.def.osc2_mix * oscillate(self.def.osc2, self.phase2, self.inc2);
            if self.def.noise > 0.0 {
                x += self.def.noise * (self.rng.f32() * 2.0 - 1.0);
            }
            self.phase1 = (self.phase1 + self.inc1).fract();
            self.phase2 = (self.phase2 + self.inc2).fract();

            let env = self.amp.tick();
            self.filter_env.tick();
            if self.counter % CONTROL_INTERVAL == 0 {
                let cutoff = self.cutoff();
                self.svf.set(cutoff, self.def.resonance, self.sample_rate);
            }
            self.counter = self.counter.wrapping_add(1);

            *sample += self.svf.lowpass(x) * env * gain;

            if self.amp.is_idle() {
                self.active = false;
                break;
            }
        }
    }

    fn release(&mut self) {
        self.amp.note_off();
        self.filter_env.note_off();
        self.schedule.force_release();
    }

    fn is_silent(&self) -> bool {
        !self.active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: f32 = 48000.0;

    fn params(patch: SynthPatch, gate: usize) -> VoiceParams {
        VoiceParams {
            instrument: Instrument::Synth(patch),
            pre_delay: 0,
            gate,
            sustain: 50,
            bus: maestro_core::Bus::Lead,
        }
    }

    fn rms(buf: &[f32]) -> f32 {
        (buf.iter().map(|s| s * s).sum::<f32>() / buf.len() as f32).sqrt()
    }

    #[test]
    fn test_polyblep_saw_stays_bounded() {
        let inc = 880.0 / SR;
        let mut phase = 0.0;
        for _ in 0..4800 {
            let s = oscillate(Waveform::Saw, phase, inc);
            assert!(s.abs() <= 1.05);
            phase = (phase + inc).fract();
        }
    }

    #[test]
    fn test_every_patch_renders_finite_audio() {
        use SynthPatch::*;
        for patch in [Bass, Pad, Arp, Lead, Piano, Strings, Riser, Sweep] {
            let mut voice = SynthVoice::new(SR);
            assert!(voice.trigger(48, 0.9, &params(patch, 24000)));
            let mut out = vec![0.0; 48000];
            voice.render(&mut out);
            assert!(out.iter().all(|s| s.is_finite() && s.abs() < 4.0), "{:?}", patch);
            assert!(rms(&out) > 1e-4, "{:?} is silent", patch);
        }
    }

    #[test]
    fn test_piano_decays_without_note_off() {
        let mut voice = SynthVoice::new(SR);
        assert!(voice.trigger(60, 1.0, &params(SynthPatch::Piano, usize::MAX)));
        let mut out = vec![0.0; 4800];
        for _ in 0..20 {
            voice.render(&mut out);
        }
        assert!(voice.is_silent());
    }

    #[test]
    fn test_filter_envelope_opens_riser() {
        let mut voice = SynthVoice::new(SR);
        assert!(voice.trigger(48, 1.0, &params(SynthPatch::Riser, 96000)));
        let early = voice.cutoff();
        let mut out = vec![0.0; 48000];
        voice.render(&mut out);
        assert!(voice.cutoff() > early * 3.0);
    }

    #[test]
    fn test_release_silences_voice() {
        let mut voice = SynthVoice::new(SR);
        assert!(voice.trigger(60, 1.0, &params(SynthPatch::Pad, 96000)));
        let mut out = vec![0.0; 4800];
        voice.render(&mut out);
        voice.release();
        for _ in 0..20 {
            out.fill(0.0);
            voice.render(&mut out);
        }
        assert!(voice.is_silent());
    }
}
