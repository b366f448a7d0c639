//! Schroeder reverb: parallel damped combs into series allpasses

use std::fmt;

use maestro_core::EffectKind;

use super::{AudioEffect, LEVEL_RAMP_SECONDS, LinearRamp, crossfade};
use crate::voices::flush_denormal;

const COMB_MS: [f32; 8] = [47.3, 53.9, 61.1, 68.3, 77.9, 89.1, 101.3, 113.3];
const ALLPASS_MS: [f32; 3] = [7.3, 5.1, 2.7];
const ALLPASS_GAIN: f32 = 0.6;
const MAX_FEEDBACK: f32 = 0.95;
/// High-frequency loss inside each comb
const DAMPING: f32 = 0.25;
const MAX_MIX: f32 = 0.6;

pub fn feedback(level: u8) -> f32 {
    (0.70 + 0.22 * level.min(100) as f32 / 100.0).min(MAX_FEEDBACK)
}

#[derive(Debug, Clone)]
struct Comb {
    buffer: Vec<f32>,
    pos: usize,
    filter: f32,
}

impl Comb {
    fn new(samples: usize) -> Self {
        Self { buffer: vec![0.0; samples.max(1)], pos: 0, filter: 0.0 }
    }

    #[inline]
    fn tick(&mut self, input: f32, feedback: f32) -> f32 {
        let out = self.buffer[self.pos];
        self.filter = flush_denormal(out * (1.0 - DAMPING) + self.filter * DAMPING);
        self.buffer[self.pos] = flush_denormal(input + self.filter * feedback);
        self.pos = (self.pos + 1) % self.buffer.len();
        out
    }
}

#[derive(Debug, Clone)]
struct Allpass {
    buffer: Vec<f32>,
    pos: usize,
}

impl Allpass {
    fn new(samples: usize) -> Self {
        Self { buffer: vec![0.0; samples.max(1)], pos: 0 }
    }

    #[inline]
    fn tick(&mut self, input: f32) -> f32 {
        let delayed = self.buffer[self.pos];
        let out = delayed - ALLPASS_GAIN * input;
        self.buffer[self.pos] = flush_denormal(input + ALLPASS_GAIN * delayed);
        self.pos = (self.pos + 1) % self.buffer.len();
        out
    }
}

pub struct ReverbEffect {
    level: u8,
    mix: LinearRamp,
    feedback: LinearRamp,
    combs: Vec<Comb>,
    allpasses: Vec<Allpass>,
}

impl ReverbEffect {
    pub fn new(sample_rate: f32) -> Self {
        let samples = |ms: f32| (ms * sample_rate / 1000.0) as usize;
        let ramp = (LEVEL_RAMP_SECONDS * sample_rate) as usize;
        Self {
            level: 0,
            mix: LinearRamp::new(0.0, ramp),
            feedback: LinearRamp::new(feedback(0), ramp),
            combs: COMB_MS.iter().map(|&ms| Comb::new(samples(ms))).collect(),
            allpasses: ALLPASS_MS.iter().map(|&ms| Allpass::new(samples(ms))).collect(),
        }
    }
}

impl fmt::Debug for ReverbEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReverbEffect")
            .field("level", &self.level)
            .finish()
    }
}

impl AudioEffect for ReverbEffect {
    fn name(&self) -> &str { "Reverb" }

    fn kind(&self) -> EffectKind { EffectKind::Reverb }

    fn set_level(&mut self, level: u8) {
        self.level = level.min(100);
        self.mix.set_target(self.level as f32 / 100.0 * MAX_MIX);
        self.feedback.set_target(feedback(self.level));
    }

    fn process(&mut self, samples: &mut [f32]) {
        let scale = 1.0 / self.combs.len() as f32;
        for sample in samples.iter_mut() {
            let dry = *sample;
            let fb = self.feedback.next_value();
            let mut wet = 0.0;
            for comb in &mut self.combs {
                wet += comb.tick(dry, fb);
            }
            wet *= scale;
            for allpass in &mut self.allpasses {
                wet = allpass.tick(wet);
            }
            *sample = crossfade(dry, wet, self.mix.next_value());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::test_util::{BLOCK, SR, blocks_to_decay};

    #[test]
    fn test_feedback_below_unity_for_every_level() {
        for level in 0..=255u8 {
            assert!(feedback(level) < 1.0);
        }
        assert!((feedback(0) - 0.70).abs() < 1e-6);
        assert!((feedback(100) - 0.92).abs() < 1e-6);
    }

    #[test]
    fn test_impulse_decays_at_every_level() {
        for level in [0, 25, 50, 75, 100] {
            let mut fx = ReverbEffect::new(SR);
            assert!(blocks_to_decay(&mut fx, level, 1e-10, 2000).is_some(), "level {}", level);
        }
    }

    #[test]
    fn test_louder_level_rings_longer() {
        let mut low = ReverbEffect::new(SR);
        let mut high = ReverbEffect::new(SR);
        let quiet = blocks_to_decay(&mut low, 20, 1e-8, 2000);
        let loud = blocks_to_decay(&mut high, 100, 1e-8, 2000);
        assert!(loud > quiet);
    }

    #[test]
    fn test_feedback_ramps_on_level_change() {
        let mut fx = ReverbEffect::new(SR);
        fx.set_level(0);
        fx.process(&mut [0.0; BLOCK]);
        assert_eq!(fx.feedback.value(), feedback(0));

        fx.set_level(100);
        let ramp_len = (LEVEL_RAMP_SECONDS * SR) as usize;
        let max_step = (feedback(100) - feedback(0)) / ramp_len as f32 + 1e-6;
        let mut prev = fx.feedback.value();
        for _ in 0..ramp_len {
            fx.process(&mut [0.0]);
            let now = fx.feedback.value();
            assert!((now - prev).abs() <= max_step, "jumped {} -> {}", prev, now);
            prev = now;
        }
        assert_eq!(fx.feedback.value(), feedback(100));
    }
}
