//! Master-bus effects chain

mod chorus;
mod delay;
mod distortion;
mod reverb;
mod smooth;

pub use chorus::ChorusEffect;
pub use delay::DelayEffect;
pub use distortion::DistortionEffect;
pub use reverb::ReverbEffect;
pub use smooth::LinearRamp;

use std::fmt::Debug;

use maestro_core::{EffectKind, EffectLevels};

/// Length of the level crossfade, in seconds
pub const LEVEL_RAMP_SECONDS: f32 = 0.02;

/// Audio effect that processes a mono block in place
pub trait AudioEffect: Send + Debug {
    fn name(&self) -> &str;
    fn kind(&self) -> EffectKind;
    /// New target level 0-100, reached over a short ramp
    fn set_level(&mut self, level: u8);
    /// Tempo-synced effects follow this
    fn set_tempo(&mut self, _bpm: f32) {}
    fn process(&mut self, samples: &mut [f32]);
}

/// Distortion, chorus, delay and reverb, always in that order
#[derive(Debug)]
pub struct EffectChain {
    effects: Vec<Box<dyn AudioEffect>>,
}

impl EffectChain {
    pub fn new(sample_rate: f32) -> Self {
        let effects: Vec<Box<dyn AudioEffect>> = vec![
            Box::new(DistortionEffect::new(sample_rate)),
            Box::new(ChorusEffect::new(sample_rate)),
            Box::new(DelayEffect::new(sample_rate)),
            Box::new(ReverbEffect::new(sample_rate)),
        ];
        Self { effects }
    }

    /// Push levels and tempo, then run every effect over the block
    pub fn process(&mut self, samples: &mut [f32], levels: &EffectLevels, tempo: f32) {
        for effect in &mut self.effects {
            effect.set_level(levels.get(effect.kind()));
            effect.set_tempo(tempo);
            effect.process(samples);
        }
    }

    pub fn effects(&self) -> &[Box<dyn AudioEffect>] {
        &self.effects
    }
}

/// Dry/wet mix at a ramped level
#[inline]
pub(crate) fn crossfade(dry: f32, wet: f32, mix: f32) -> f32 {
    dry * (1.0 - mix) + wet * mix
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::AudioEffect;

    pub const SR: f32 = 8000.0;
    pub const BLOCK: usize = 256;

    fn energy(buf: &[f32]) -> f32 {
        buf.iter().map(|s| s * s).sum()
    }

    /// Feed a unit impulse, return how many blocks until block energy falls below `floor`
    pub fn blocks_to_decay(effect: &mut dyn AudioEffect, level: u8, floor: f32, limit: usize) -> Option<usize> {
        effect.set_level(level);
        // Let the level ramp settle before the impulse
        let mut block = vec![0.0; BLOCK];
        effect.process(&mut block);

        block.fill(0.0);
        block[0] = 1.0;
        effect.process(&mut block);
        for n in 1..=limit {
            block.fill(0.0);
            effect.process(&mut block);
            assert!(block.iter().all(|s| s.is_finite()));
            if energy(&block) < floor {
                return Some(n);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_order_is_fixed() {
        let chain = EffectChain::new(48000.0);
        let kinds: Vec<_> = chain.effects().iter().map(|e| e.kind()).collect();
        assert_eq!(
            kinds,
            [EffectKind::Distortion, EffectKind::Chorus, EffectKind::Delay, EffectKind::Reverb]
        );
        let names: Vec<_> = chain.effects().iter().map(|e| e.name()).collect();
        assert_eq!(names, ["Distortion", "Chorus", "Delay", "Reverb"]);
    }

    #[test]
    fn test_zero_levels_pass_signal_through() {
        let mut chain = EffectChain::new(test_util::SR);
        let levels = EffectLevels { distortion: 0, chorus: 0, delay: 0, reverb: 0 };
        let mut block: Vec<f32> = (0..test_util::BLOCK).map(|i| ((i as f32) * 0.05).sin() * 0.5).collect();
        let dry = block.clone();
        chain.process(&mut block, &levels, 120.0);
        for (a, b) in block.iter().zip(&dry) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_full_chain_impulse_decays() {
        let mut chain = EffectChain::new(test_util::SR);
        let levels = EffectLevels { distortion: 100, chorus: 100, delay: 100, reverb: 100 };
        let mut block = vec![0.0; test_util::BLOCK];
        chain.process(&mut block, &levels, 120.0);
        block[0] = 1.0;
        chain.process(&mut block, &levels, 120.0);
        let mut last = f32::MAX;
        for _ in 0..3000 {
            block.fill(0.0);
            chain.process(&mut block, &levels, 120.0);
            last = block.iter().map(|s| s * s).sum();
            if last < 1e-10 {
                break;
            }
        }
        assert!(last < 1e-10);
    }
}
