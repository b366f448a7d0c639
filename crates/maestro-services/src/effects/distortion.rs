//! Soft-clip distortion into a guitar cabinet filter

use std::fmt;

use maestro_core::EffectKind;

use super::{AudioEffect, LEVEL_RAMP_SECONDS, LinearRamp, crossfade};

const CAB_HIGHPASS_HZ: f32 = 80.0;
const CAB_LOWPASS_HZ: f32 = 4500.0;
/// Drive at full level
const MAX_DRIVE: f32 = 10.0;

/// Cabinet top end, kept under Nyquist at low sample rates
fn lowpass_cutoff(sample_rate: f32) -> f32 {
    CAB_LOWPASS_HZ.min(sample_rate * 0.45)
}

/// Cabinet voicing built from fundsp state-variable filters
#[cfg(feature = "hq-filter")]
mod cabinet {
    use fundsp::hacker::*;

    use super::CAB_HIGHPASS_HZ;

    pub struct Cabinet {
        highpass: An<FixedSvf<f64, HighpassMode<f64>>>,
        lowpass: [An<FixedSvf<f64, LowpassMode<f64>>>; 2],
    }

    impl Cabinet {
        pub fn new(sample_rate: f32) -> Self {
            let mut highpass = highpass_hz(CAB_HIGHPASS_HZ, 0.707);
            highpass.set_sample_rate(sample_rate as f64);
            let cutoff = super::lowpass_cutoff(sample_rate);
            let mut lowpass = [lowpass_hz(cutoff, 0.707), lowpass_hz(cutoff, 0.707)];
            for stage in &mut lowpass {
                stage.set_sample_rate(sample_rate as f64);
            }
            Self { highpass, lowpass }
        }

        #[inline]
        pub fn tick(&mut self, x: f32) -> f32 {
            let mut y = self.highpass.tick(&Frame::from([x]))[0];
            for stage in &mut self.lowpass {
                y = stage.tick(&Frame::from([y]))[0];
            }
            y
        }
    }
}

/// Cabinet voicing from one-pole sections
#[cfg(not(feature = "hq-filter"))]
mod cabinet {
    use std::f32::consts::TAU;

    use super::CAB_HIGHPASS_HZ;
    use crate::voices::flush_denormal;

    pub struct Cabinet {
        hp_coef: f32,
        hp_x1: f32,
        hp_y1: f32,
        lp_coef: f32,
        lp: [f32; 4],
    }

    impl Cabinet {
        pub fn new(sample_rate: f32) -> Self {
            let dt = 1.0 / sample_rate;
            let hp_rc = 1.0 / (TAU * CAB_HIGHPASS_HZ);
            let lp_rc = 1.0 / (TAU * super::lowpass_cutoff(sample_rate));
            Self {
                hp_coef: hp_rc / (hp_rc + dt),
                hp_x1: 0.0,
                hp_y1: 0.0,
                lp_coef: dt / (lp_rc + dt),
                lp: [0.0; 4],
            }
        }

        #[inline]
        pub fn tick(&mut self, x: f32) -> f32 {
            let hp = self.hp_coef * (self.hp_y1 + x - self.hp_x1);
            self.hp_x1 = x;
            self.hp_y1 = flush_denormal(hp);
            let mut y = hp;
            for state in &mut self.lp {
                *state = flush_denormal(*state + self.lp_coef * (y - *state));
                y = *state;
            }
            y
        }
    }
}

use cabinet::Cabinet;

pub struct DistortionEffect {
    level: u8,
    mix: LinearRamp,
    cabinet: Cabinet,
}

impl DistortionEffect {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            level: 0,
            mix: LinearRamp::new(0.0, (LEVEL_RAMP_SECONDS * sample_rate) as usize),
            cabinet: Cabinet::new(sample_rate),
        }
    }

    fn drive(mix: f32) -> f32 {
        1.0 + (MAX_DRIVE - 1.0) * mix
    }
}

impl fmt::Debug for DistortionEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistortionEffect")
            .field("level", &self.level)
            .finish()
    }
}

impl AudioEffect for DistortionEffect {
    fn name(&self) -> &str { "Distortion" }

    fn kind(&self) -> EffectKind { EffectKind::Distortion }

    fn set_level(&mut self, level: u8) {
        self.level = level.min(100);
        self.mix.set_target(self.level as f32 / 100.0);
    }

    fn process(&mut self, samples: &mut [f32]) {
        for sample in samples.iter_mut() {
            let mix = self.mix.next_value();
            let dry = *sample;
            let drive = Self::drive(mix);
            let clipped = (dry * drive).tanh() / drive.tanh();
            let wet = self.cabinet.tick(clipped);
            *sample = crossfade(dry, wet, mix);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::test_util::{BLOCK, SR, blocks_to_decay};

    #[test]
    fn test_output_bounded_at_full_drive() {
        let mut fx = DistortionEffect::new(SR);
        fx.set_level(100);
        let mut block: Vec<f32> = (0..BLOCK * 8).map(|i| (i as f32 * 0.1).sin() * 3.0).collect();
        fx.process(&mut block);
        assert!(block.iter().all(|s| s.is_finite() && s.abs() < 2.0));
    }

    #[test]
    fn test_impulse_decays_at_every_level() {
        for level in [0, 25, 50, 75, 100] {
            let mut fx = DistortionEffect::new(SR);
            assert!(blocks_to_decay(&mut fx, level, 1e-10, 50).is_some(), "level {}", level);
        }
    }

    #[test]
    fn test_level_change_is_ramped() {
        let mut fx = DistortionEffect::new(SR);
        fx.set_level(100);
        let mut block = vec![0.5; 4];
        fx.process(&mut block);
        // Four samples into a 160-sample ramp the signal is still mostly dry
        assert!((block[0] - 0.5).abs() < 0.05);
    }
}
