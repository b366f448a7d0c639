//! Four-voice modulated delay chorus

use std::f32::consts::TAU;
use std::fmt;

use maestro_core::EffectKind;

use super::{AudioEffect, LEVEL_RAMP_SECONDS, LinearRamp, crossfade};

const TAPS: usize = 4;
const DEPTH_MS: f32 = 3.0;
/// Longest base delay plus depth, with headroom for interpolation
const BUFFER_MS: f32 = 30.0;
/// Wet share at full level
const MAX_MIX: f32 = 0.5;

#[derive(Debug, Clone, Copy)]
struct Tap {
    /// Cycles per sample
    rate: f32,
    phase: f32,
    base: f32,
}

pub struct ChorusEffect {
    level: u8,
    mix: LinearRamp,
    buffer: Vec<f32>,
    write_pos: usize,
    taps: [Tap; TAPS],
    depth: f32,
}

impl ChorusEffect {
    pub fn new(sample_rate: f32) -> Self {
        let ms = sample_rate / 1000.0;
        let taps = std::array::from_fn(|i| {
            let v = i as f32 / TAPS as f32;
            Tap {
                rate: 1.5 * (0.9 + 0.4 * v) / sample_rate,
                phase: v,
                base: (15.0 + 8.0 * v) * ms,
            }
        });
        Self {
            level: 0,
            mix: LinearRamp::new(0.0, (LEVEL_RAMP_SECONDS * sample_rate) as usize),
            buffer: vec![0.0; (BUFFER_MS * ms) as usize + 2],
            write_pos: 0,
            taps,
            depth: DEPTH_MS * ms,
        }
    }

    /// Linear-interpolated read `delay` samples behind the write head
    #[inline]
    fn read(&self, delay: f32) -> f32 {
        let len = self.buffer.len();
        let pos = self.write_pos as f32 + len as f32 - delay;
        let i = pos.floor();
        let frac = pos - i;
        let a = self.buffer[i as usize % len];
        let b = self.buffer[(i as usize + 1) % len];
        a + (b - a) * frac
    }
}

impl fmt::Debug for ChorusEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChorusEffect")
            .field("level", &self.level)
            .finish()
    }
}

impl AudioEffect for ChorusEffect {
    fn name(&self) -> &str { "Chorus" }

    fn kind(&self) -> EffectKind { EffectKind::Chorus }

    fn set_level(&mut self, level: u8) {
        self.level = level.min(100);
        self.mix.set_target(self.level as f32 / 100.0 * MAX_MIX);
    }

    fn process(&mut self, samples: &mut [f32]) {
        let len = self.buffer.len();
        for sample in samples.iter_mut() {
            let dry = *sample;
            self.buffer[self.write_pos] = dry;

            let mut wet = 0.0;
            for t in 0..TAPS {
                let tap = self.taps[t];
                let delay = tap.base + self.depth * (TAU * tap.phase).sin();
                wet += self.read(delay);
                self.taps[t].phase = (tap.phase + tap.rate).fract();
            }
            wet /= TAPS as f32;

            self.write_pos = (self.write_pos + 1) % len;
            *sample = crossfade(dry, wet, self.mix.next_value());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::test_util::{SR, blocks_to_decay};

    #[test]
    fn test_taps_stay_inside_buffer() {
        let fx = ChorusEffect::new(48000.0);
        for tap in &fx.taps {
            assert!(tap.base + fx.depth + 1.0 < fx.buffer.len() as f32);
            assert!(tap.base - fx.depth > 1.0);
        }
    }

    #[test]
    fn test_impulse_decays_at_every_level() {
        for level in [0, 50, 100] {
            let mut fx = ChorusEffect::new(SR);
            // No feedback: gone once the longest tap has passed
            assert!(blocks_to_decay(&mut fx, level, 1e-12, 4).is_some(), "level {}", level);
        }
    }

    #[test]
    fn test_wet_signal_is_delayed() {
        let mut fx = ChorusEffect::new(SR);
        fx.set_level(100);
        let mut warm = vec![0.0; 512];
        fx.process(&mut warm);
        let mut block = vec![0.0; 512];
        block[0] = 1.0;
        fx.process(&mut block);
        // 12 ms at 8 kHz is 96 samples, shorter than any tap
        assert!(block[1..96].iter().all(|s| *s == 0.0));
        assert!(block[96..].iter().any(|s| *s != 0.0));
    }
}
