//! Tempo-synced echo: dotted-eighth tap plus a longer second tap

use std::fmt;

use maestro_core::EffectKind;

use super::{AudioEffect, LEVEL_RAMP_SECONDS, LinearRamp, crossfade};
use crate::voices::flush_denormal;

const MAX_DELAY_MS: f32 = 2000.0;
const MIN_TAP_MS: f32 = 60.0;
const MAX_TAP_MS: f32 = 1200.0;
const SECOND_TAP_RATIO: f32 = 1.5;
const MAX_FEEDBACK: f32 = 0.9;
/// One-pole low-pass coefficient in the feedback path
const DAMPING: f32 = 0.35;
const MAX_MIX: f32 = 0.45;

/// Primary tap length for a tempo: three quarters of a beat, clamped
pub fn tap_ms(bpm: f32) -> f32 {
    (0.75 * 60_000.0 / bpm.max(1.0)).clamp(MIN_TAP_MS, MAX_TAP_MS)
}

pub fn feedback(level: u8) -> f32 {
    (0.25 + 0.45 * level.min(100) as f32 / 100.0).min(MAX_FEEDBACK)
}

pub struct DelayEffect {
    level: u8,
    mix: LinearRamp,
    feedback: LinearRamp,
    /// Primary tap in samples, ramped so tempo changes glide
    tap: LinearRamp,
    buffer: Vec<f32>,
    write_pos: usize,
    damp_state: f32,
    sample_rate: f32,
}

impl DelayEffect {
    pub fn new(sample_rate: f32) -> Self {
        let max_samples = (MAX_DELAY_MS * sample_rate / 1000.0) as usize;
        let ramp = (LEVEL_RAMP_SECONDS * sample_rate) as usize;
        Self {
            level: 0,
            mix: LinearRamp::new(0.0, ramp),
            feedback: LinearRamp::new(feedback(0), ramp),
            tap: LinearRamp::new(tap_ms(120.0) * sample_rate / 1000.0, ramp),
            buffer: vec![0.0; max_samples],
            write_pos: 0,
            damp_state: 0.0,
            sample_rate,
        }
    }

    #[inline]
    fn read(&self, delay: f32) -> f32 {
        let len = self.buffer.len();
        let delay = delay.clamp(1.0, (len - 2) as f32);
        let pos = self.write_pos as f32 + len as f32 - delay;
        let i = pos.floor();
        let frac = pos - i;
        let a = self.buffer[i as usize % len];
        let b = self.buffer[(i as usize + 1) % len];
        a + (b - a) * frac
    }
}

impl fmt::Debug for DelayEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelayEffect")
            .field("level", &self.level)
            .field("tap_samples", &self.tap.target())
            .finish()
    }
}

impl AudioEffect for DelayEffect {
    fn name(&self) -> &str { "Delay" }

    fn kind(&self) -> EffectKind { EffectKind::Delay }

    fn set_level(&mut self, level: u8) {
        self.level = level.min(100);
        self.mix.set_target(self.level as f32 / 100.0 * MAX_MIX);
        self.feedback.set_target(feedback(self.level));
    }

    fn set_tempo(&mut self, bpm: f32) {
        if bpm.is_finite() && bpm > 0.0 {
            self.tap.set_target(tap_ms(bpm) * self.sample_rate / 1000.0);
        }
    }

    fn process(&mut self, samples: &mut [f32]) {
        let len = self.buffer.len();
        for sample in samples.iter_mut() {
            let dry = *sample;
            let fb = self.feedback.next_value();
            let tap = self.tap.next_value();
            let first = self.read(tap);
            let second = self.read(tap * SECOND_TAP_RATIO);

            self.damp_state = flush_denormal(self.damp_state + DAMPING * (first - self.damp_state));
            self.buffer[self.write_pos] = dry + self.damp_state * fb;
            self.write_pos = (self.write_pos + 1) % len;

            let wet = first + 0.5 * second;
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
            assert!(feedback(level) <= MAX_FEEDBACK);
        }
        assert!((feedback(100) - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_tap_follows_tempo_within_bounds() {
        assert!((tap_ms(120.0) - 375.0).abs() < 1e-3);
        assert_eq!(tap_ms(20.0), MAX_TAP_MS);
        assert_eq!(tap_ms(1000.0), MIN_TAP_MS);
        // Second tap of the longest primary still fits the buffer
        assert!(MAX_TAP_MS * SECOND_TAP_RATIO < MAX_DELAY_MS);
    }

    #[test]
    fn test_impulse_decays_at_every_level() {
        for level in [0, 25, 50, 75, 100] {
            let mut fx = DelayEffect::new(SR);
            fx.set_tempo(120.0);
            assert!(blocks_to_decay(&mut fx, level, 1e-10, 3000).is_some(), "level {}", level);
        }
    }

    #[test]
    fn test_echo_arrives_after_tap() {
        let mut fx = DelayEffect::new(SR);
        fx.set_level(100);
        fx.set_tempo(120.0);
        let mut block = vec![0.0; 4000];
        fx.process(&mut block);
        block.fill(0.0);
        block[0] = 1.0;
        fx.process(&mut block);
        // 375 ms at 8 kHz
        assert!(block[1..2990].iter().all(|s| *s == 0.0));
        assert!(block[2990..3010].iter().any(|s| *s != 0.0));
    }

    #[test]
    fn test_feedback_ramps_on_level_change() {
        let mut fx = DelayEffect::new(SR);
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
